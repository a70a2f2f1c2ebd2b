// ABOUTME: `drover stream` and `drover watch` print canonical events as JSON lines
// ABOUTME: Pull streams run until the server ends them; both stop cleanly on Ctrl-C

use anyhow::Result;
use drover_relay::{PullStream, RelayConfig, RelayEvent, SocketSubscription};
use futures::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// One output line: the canonical frame plus any assembled message text
pub fn render(event: &RelayEvent) -> Value {
    let mut frame = event.event.to_frame();
    if let (Some(snapshot), Some(object)) = (&event.assembled, frame.as_object_mut()) {
        object.insert(
            "assembled".to_string(),
            serde_json::to_value(snapshot).unwrap_or(Value::Null),
        );
    }
    frame
}

pub async fn stream_command(url: &str) -> Result<()> {
    let stream = PullStream::new(url)?;
    let cancel = CancellationToken::new();

    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let events = stream.subscribe(cancel);
    futures::pin_mut!(events);

    while let Some(item) = events.next().await {
        match item {
            Ok(event) => println!("{}", render(&event)),
            Err(e) => {
                warn!(url = %url, "Stream error: {}", e);
                return Err(e.into());
            }
        }
    }

    info!(url = %url, "Stream finished");
    Ok(())
}

pub async fn watch_command(url: &str) -> Result<()> {
    let config = RelayConfig::from_env();
    let mut subscription = SocketSubscription::connect(url, config.reconnect);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!(url = %url, "Interrupted, closing socket");
                subscription.disconnect();
                break;
            }
            item = subscription.recv() => match item {
                Some(Ok(event)) => println!("{}", render(&event)),
                Some(Err(e)) => warn!(url = %url, "Socket error: {}", e),
                None => break,
            },
        }
    }

    subscription.join().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_relay::EventRelay;
    use serde_json::json;

    #[test]
    fn test_render_includes_assembled_text() {
        let mut relay = EventRelay::new();
        let event = relay
            .ingest(&json!({
                "type": "message.part.updated",
                "properties": {
                    "part": { "id": "p1", "messageID": "m1", "type": "text" },
                    "delta": "hi"
                }
            }))
            .unwrap();

        let line = render(&event);
        assert_eq!(line["type"], "message.part.updated");
        assert_eq!(line["assembled"]["text"], "hi");
    }

    #[test]
    fn test_render_plain_event() {
        let mut relay = EventRelay::new();
        let event = relay.ingest(&json!({ "type": "heartbeat" })).unwrap();
        let line = render(&event);
        assert_eq!(line["type"], "heartbeat");
        assert!(line.get("assembled").is_none());
    }
}
