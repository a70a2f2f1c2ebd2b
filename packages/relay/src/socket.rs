// ABOUTME: Push-socket transport with reconnect, exponential backoff and jitter
// ABOUTME: ConnectionMachine holds the policy; SocketSubscription drives a WebSocket with it

use crate::error::{RelayError, Result};
use crate::relay::{EventRelay, RelayEvent};
use futures_util::{SinkExt, StreamExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Normal closure
pub const CLOSE_NORMAL: u16 = 1000;
/// Abnormal closure without a status frame
pub const CLOSE_ABNORMAL: u16 = 1006;

const EVENT_BUFFER: usize = 256;

/// Reason tungstenite substitutes when a peer sends a code not allowed on the wire
const PROTOCOL_VIOLATION: &str = "Protocol violation";

/// Backoff parameters for reconnecting sockets
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1000),
            cap: Duration::from_millis(30_000),
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before jitter: `min(base * 2^attempt, cap)`
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Delay for a 0-indexed attempt with up to 50% added jitter
    pub fn delay_for_attempt<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        let delay = self.base_delay(attempt);
        let jitter = rng.gen_range(0.0..=0.5);
        delay + delay.mul_f64(jitter)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub reconnect_attempts: u32,
    pub should_reconnect: bool,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            status: ConnectionStatus::Connecting,
            reconnect_attempts: 0,
            should_reconnect: true,
        }
    }
}

/// What to do after the socket closed
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CloseDecision {
    Reconnect { attempt: u32, delay: Duration },
    Stop,
    GiveUp { attempts: u32 },
}

/// Reconnect bookkeeping for one logical subscription
#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    policy: ReconnectPolicy,
    state: ConnectionState,
}

impl ConnectionMachine {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            state: ConnectionState::default(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn on_connected(&mut self) {
        self.state.status = ConnectionStatus::Connected;
        self.state.reconnect_attempts = 0;
    }

    /// Decide the follow-up to a close; `None` means no close code was seen
    pub fn on_close<R: Rng>(&mut self, code: Option<u16>, rng: &mut R) -> CloseDecision {
        self.state.status = ConnectionStatus::Disconnected;

        if !self.state.should_reconnect {
            return CloseDecision::Stop;
        }
        if matches!(code, Some(CLOSE_NORMAL) | Some(CLOSE_ABNORMAL)) {
            return CloseDecision::Stop;
        }
        if self.state.reconnect_attempts >= self.policy.max_attempts {
            return CloseDecision::GiveUp {
                attempts: self.state.reconnect_attempts,
            };
        }

        let attempt = self.state.reconnect_attempts;
        let delay = self.policy.delay_for_attempt(attempt, rng);
        self.state.reconnect_attempts += 1;
        self.state.status = ConnectionStatus::Connecting;
        CloseDecision::Reconnect { attempt, delay }
    }

    /// Permanently stop reconnecting
    pub fn disconnect(&mut self) {
        self.state.should_reconnect = false;
        self.state.status = ConnectionStatus::Disconnected;
    }
}

/// Close code carried by a received close frame
///
/// Codes that must never be sent (1005, 1006, 1015, reserved ranges) reach us
/// rewritten to 1002 with a fixed reason; those count as abnormal closure.
fn close_frame_code(frame: Option<&CloseFrame>) -> Option<u16> {
    let frame = frame?;
    if frame.code == CloseCode::Protocol && frame.reason.as_str() == PROTOCOL_VIOLATION {
        return Some(CLOSE_ABNORMAL);
    }
    Some(u16::from(frame.code))
}

/// Read errors that mean the connection ended without a closing handshake
fn read_error_code(error: &WsError) -> Option<u16> {
    match error {
        WsError::ConnectionClosed
        | WsError::AlreadyClosed
        | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => Some(CLOSE_ABNORMAL),
        _ => None,
    }
}

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

enum SessionEnd {
    Closed(Option<u16>),
    Cancelled,
    ReceiverGone,
}

/// Cloneable control surface of a running subscription
#[derive(Clone)]
pub struct SocketControl {
    state: watch::Receiver<ConnectionState>,
    outgoing: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

impl SocketControl {
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state().status == ConnectionStatus::Connected
    }

    /// Serialise and send a message; only allowed while the socket is open
    pub fn send<T: Serialize>(&self, message: &T) -> Result<()> {
        if !self.is_open() {
            return Err(RelayError::NotConnected);
        }
        let json = serde_json::to_string(message)?;
        self.outgoing
            .send(json)
            .map_err(|_| RelayError::NotConnected)
    }

    /// Close with a normal-closure code and never reconnect
    pub fn disconnect(&self) {
        self.cancel.cancel();
    }

    /// Wait for the next state change
    pub async fn changed(&mut self) -> Option<ConnectionState> {
        self.state.changed().await.ok()?;
        Some(*self.state.borrow())
    }
}

/// Managed reconnecting WebSocket subscription
pub struct SocketSubscription {
    control: SocketControl,
    events: mpsc::Receiver<Result<RelayEvent>>,
    task: JoinHandle<Result<()>>,
}

impl SocketSubscription {
    /// Start connecting in the background
    pub fn connect(url: impl Into<String>, policy: ReconnectPolicy) -> Self {
        let url = url.into();
        let (state_tx, state_rx) = watch::channel(ConnectionState::default());
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();

        let driver = Driver {
            url,
            machine: ConnectionMachine::new(policy),
            state_tx,
            outgoing: outgoing_rx,
            events: events_tx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(driver.run());

        Self {
            control: SocketControl {
                state: state_rx,
                outgoing: outgoing_tx,
                cancel,
            },
            events: events_rx,
            task,
        }
    }

    pub fn control(&self) -> SocketControl {
        self.control.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.control.state()
    }

    pub fn send<T: Serialize>(&self, message: &T) -> Result<()> {
        self.control.send(message)
    }

    pub fn disconnect(&self) {
        self.control.disconnect();
    }

    /// Next delivered event; `None` once the subscription has ended
    pub async fn recv(&mut self) -> Option<Result<RelayEvent>> {
        self.events.recv().await
    }

    /// Wait for the background task to finish
    pub async fn join(self) -> Result<()> {
        drop(self.events);
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(RelayError::Connection(format!("socket task failed: {}", e))),
        }
    }
}

struct Driver {
    url: String,
    machine: ConnectionMachine,
    state_tx: watch::Sender<ConnectionState>,
    outgoing: mpsc::UnboundedReceiver<String>,
    events: mpsc::Sender<Result<RelayEvent>>,
    cancel: CancellationToken,
}

impl Driver {
    fn publish(&self) {
        self.state_tx.send_replace(self.machine.state());
    }

    async fn run(mut self) -> Result<()> {
        let mut rng = StdRng::from_entropy();
        let mut relay = EventRelay::new();

        let result = loop {
            self.publish();

            let connect = tokio::select! {
                _ = self.cancel.cancelled() => break Ok(()),
                connect = connect_async(self.url.as_str()) => connect,
            };

            let code = match connect {
                Ok((socket, _)) => {
                    self.machine.on_connected();
                    self.publish();
                    info!(url = %self.url, "Socket connected");

                    match self.session(socket, &mut relay).await {
                        SessionEnd::Closed(code) => code,
                        SessionEnd::Cancelled | SessionEnd::ReceiverGone => break Ok(()),
                    }
                }
                Err(e) => {
                    warn!(url = %self.url, "Socket connect failed: {}", e);
                    None
                }
            };

            match self.machine.on_close(code, &mut rng) {
                CloseDecision::Reconnect { attempt, delay } => {
                    self.publish();
                    info!(
                        url = %self.url,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Scheduling socket reconnect"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => break Ok(()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                CloseDecision::Stop => {
                    debug!(url = %self.url, ?code, "Socket closed without reconnect");
                    break Ok(());
                }
                CloseDecision::GiveUp { attempts } => {
                    error!(url = %self.url, attempts, "Socket reconnect attempts exhausted");
                    let _ = self
                        .events
                        .send(Err(RelayError::ReconnectExhausted(attempts)))
                        .await;
                    break Err(RelayError::ReconnectExhausted(attempts));
                }
            }
        };

        self.machine.disconnect();
        self.publish();
        result
    }

    async fn session(&mut self, socket: Socket, relay: &mut EventRelay) -> SessionEnd {
        let (mut write, mut read) = socket.split();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "client disconnect".into(),
                    };
                    if let Err(e) = write.send(Message::Close(Some(frame))).await {
                        debug!("Failed to send close frame: {}", e);
                    }
                    return SessionEnd::Cancelled;
                }
                Some(text) = self.outgoing.recv() => {
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        warn!(url = %self.url, "Socket send failed: {}", e);
                        return SessionEnd::Closed(None);
                    }
                }
                message = read.next() => {
                    let text = match message {
                        Some(Ok(Message::Text(text))) => text.as_str().to_string(),
                        Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                            Ok(text) => text,
                            Err(_) => continue,
                        },
                        Some(Ok(Message::Ping(data))) => {
                            let _ = write.send(Message::Pong(data)).await;
                            continue;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let code = close_frame_code(frame.as_ref());
                            debug!(url = %self.url, ?code, "Socket closed by server");
                            return SessionEnd::Closed(code);
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            let code = read_error_code(&e);
                            warn!(url = %self.url, ?code, "Socket read failed: {}", e);
                            return SessionEnd::Closed(code);
                        }
                        None => {
                            debug!(url = %self.url, "Socket dropped without a close frame");
                            return SessionEnd::Closed(Some(CLOSE_ABNORMAL));
                        }
                    };

                    for event in relay.ingest_text(&text) {
                        if self.events.send(Ok(event)).await.is_err() {
                            return SessionEnd::ReceiverGone;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy {
            base: Duration::from_millis(100),
            cap: Duration::from_millis(2_000),
            max_attempts: 10,
        }
    }

    #[test]
    fn test_delay_bounds() {
        let policy = policy();
        let mut rng = StdRng::seed_from_u64(7);
        for attempt in 0..12 {
            let floor = policy.base_delay(attempt);
            let expected_floor =
                Duration::from_millis(100 * 2u64.pow(attempt)).min(Duration::from_millis(2_000));
            assert_eq!(floor, expected_floor);

            for _ in 0..50 {
                let delay = policy.delay_for_attempt(attempt, &mut rng);
                assert!(delay >= floor, "attempt {attempt}: {delay:?} < {floor:?}");
                assert!(
                    delay <= floor.mul_f64(1.5) + Duration::from_nanos(1),
                    "attempt {attempt}: {delay:?} too long"
                );
            }
        }
    }

    #[test]
    fn test_huge_attempt_saturates_at_cap() {
        assert_eq!(policy().base_delay(64), Duration::from_millis(2_000));
    }

    #[test]
    fn test_exactly_max_attempts_delays() {
        let mut machine = ConnectionMachine::new(policy());
        let mut rng = StepRng::new(0, 1);
        machine.on_connected();

        let mut delays = 0;
        for _ in 0..10 {
            match machine.on_close(Some(4000), &mut rng) {
                CloseDecision::Reconnect { .. } => delays += 1,
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(delays, 10);
        assert_eq!(
            machine.on_close(Some(4000), &mut rng),
            CloseDecision::GiveUp { attempts: 10 }
        );
    }

    #[test]
    fn test_connect_resets_attempts() {
        let mut machine = ConnectionMachine::new(policy());
        let mut rng = StepRng::new(0, 1);
        machine.on_close(None, &mut rng);
        machine.on_close(None, &mut rng);
        assert_eq!(machine.state().reconnect_attempts, 2);

        machine.on_connected();
        assert_eq!(machine.state().reconnect_attempts, 0);
        assert_eq!(machine.state().status, ConnectionStatus::Connected);
    }

    #[test]
    fn test_planned_codes_stop() {
        let mut rng = StepRng::new(0, 1);
        for code in [CLOSE_NORMAL, CLOSE_ABNORMAL] {
            let mut machine = ConnectionMachine::new(policy());
            assert_eq!(machine.on_close(Some(code), &mut rng), CloseDecision::Stop);
        }

        let mut machine = ConnectionMachine::new(policy());
        assert!(matches!(
            machine.on_close(Some(1005), &mut rng),
            CloseDecision::Reconnect { attempt: 0, .. }
        ));
    }

    #[test]
    fn test_closes_without_handshake_are_abnormal() {
        assert_eq!(read_error_code(&WsError::ConnectionClosed), Some(CLOSE_ABNORMAL));
        assert_eq!(
            read_error_code(&WsError::Protocol(
                ProtocolError::ResetWithoutClosingHandshake
            )),
            Some(CLOSE_ABNORMAL)
        );
        assert_eq!(
            read_error_code(&WsError::Io(std::io::Error::other("boom"))),
            None
        );
    }

    #[test]
    fn test_rewritten_close_codes_are_abnormal() {
        let rewritten = CloseFrame {
            code: CloseCode::Protocol,
            reason: PROTOCOL_VIOLATION.into(),
        };
        assert_eq!(close_frame_code(Some(&rewritten)), Some(CLOSE_ABNORMAL));

        let genuine = CloseFrame {
            code: CloseCode::Protocol,
            reason: "bad frame".into(),
        };
        assert_eq!(close_frame_code(Some(&genuine)), Some(1002));
        assert_eq!(close_frame_code(None), None);
    }

    #[test]
    fn test_disconnect_never_reconnects() {
        let mut machine = ConnectionMachine::new(policy());
        let mut rng = StepRng::new(0, 1);
        machine.disconnect();
        for code in [None, Some(1001), Some(4000), Some(CLOSE_NORMAL)] {
            assert_eq!(machine.on_close(code, &mut rng), CloseDecision::Stop);
        }
        assert!(!machine.state().should_reconnect);
    }
}
