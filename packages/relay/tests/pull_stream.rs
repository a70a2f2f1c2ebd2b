// ABOUTME: Integration tests for the pull-stream transport against a mock event-stream endpoint
// ABOUTME: Covers canonical delivery, text assembly, HTTP errors and cancellation of live streams

use drover_relay::{CanonicalEvent, PullStream, RelayError};
use futures::StreamExt;
use pretty_assertions::assert_eq;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BODY: &str = concat!(
    ": connected\n\n",
    "data: {\"type\":\"server.heartbeat\",\"properties\":{}}\n\n",
    "data: {\"type\":\"message.part.updated\",\"properties\":{\"part\":{\"id\":\"p1\",\"messageID\":\"m1\",\"sessionID\":\"s1\",\"type\":\"text\"},\"delta\":\"Hello, \"}}\n\n",
    "data: {\"type\":\"message.part.updated\",\"properties\":{\"part\":{\"id\":\"p1\",\"messageID\":\"m1\",\"sessionID\":\"s1\",\"type\":\"text\"},\"delta\":\"world\"}}\n\n",
    "event: status\n",
    "data: {\"status\":\"running\"}\n\n",
    "data: not json\n\n",
    "data: [DONE]\n\n",
);

async fn mount_stream(server: &MockServer, body: &str) {
    Mock::given(method("GET"))
        .and(path("/event"))
        .and(header("accept", "text/event-stream"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_stream_delivers_canonical_events_in_order() {
    let server = MockServer::start().await;
    mount_stream(&server, BODY).await;

    let stream = PullStream::new(format!("{}/event", server.uri())).unwrap();
    let events: Vec<_> = stream
        .subscribe(CancellationToken::new())
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .map(|item| item.unwrap())
        .collect();

    let kinds: Vec<&str> = events.iter().map(|e| e.event.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            CanonicalEvent::HEARTBEAT,
            CanonicalEvent::MESSAGE_PART_UPDATED,
            CanonicalEvent::MESSAGE_PART_UPDATED,
            CanonicalEvent::STATUS,
        ]
    );

    let assembled = events[2].assembled.as_ref().unwrap();
    assert_eq!(assembled.message_id, "m1");
    assert_eq!(assembled.text, "Hello, world");
    assert_eq!(events[2].event.session_id(), Some("s1"));
}

#[tokio::test]
async fn test_each_subscription_assembles_independently() {
    let server = MockServer::start().await;
    mount_stream(&server, BODY).await;

    let stream = PullStream::new(format!("{}/event", server.uri())).unwrap();
    for _ in 0..2 {
        let last_text = stream
            .subscribe(CancellationToken::new())
            .filter_map(|item| async move { item.ok().and_then(|e| e.assembled) })
            .collect::<Vec<_>>()
            .await
            .pop()
            .unwrap();
        assert_eq!(last_text.text, "Hello, world");
    }
}

#[tokio::test]
async fn test_error_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/event"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let stream = PullStream::new(format!("{}/event", server.uri())).unwrap();
    let items: Vec<_> = stream.subscribe(CancellationToken::new()).collect().await;

    assert_eq!(items.len(), 1);
    match &items[0] {
        Err(RelayError::Status { status, body }) => {
            assert_eq!(*status, 500);
            assert_eq!(body, "boom");
        }
        other => panic!("expected status error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_cancelled_subscription_yields_nothing() {
    let server = MockServer::start().await;
    mount_stream(&server, BODY).await;

    let stream = PullStream::new(format!("{}/event", server.uri())).unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let items: Vec<_> = stream.subscribe(cancel).collect().await;
    assert!(items.is_empty());
}

/// Serve one chunked event and keep the response open; reports when the client hangs up
async fn open_ended_server() -> (String, oneshot::Receiver<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (closed_tx, closed_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 4096];
        let _ = socket.read(&mut buf).await;

        let event = "data: {\"type\":\"heartbeat\",\"properties\":{}}\n\n";
        let head = "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n";
        let chunk = format!("{:x}\r\n{}\r\n", event.len(), event);
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.write_all(chunk.as_bytes()).await.unwrap();
        socket.flush().await.unwrap();

        loop {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => continue,
            }
        }
        let _ = closed_tx.send(());
    });

    (format!("http://{}/event", addr), closed_rx)
}

#[tokio::test]
async fn test_cancel_ends_live_stream_and_request() {
    let (url, closed) = open_ended_server().await;

    let stream = PullStream::new(url).unwrap();
    let cancel = CancellationToken::new();
    let events = stream.subscribe(cancel.clone());
    futures::pin_mut!(events);

    let first = timeout(Duration::from_secs(5), events.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(first.event.kind(), CanonicalEvent::HEARTBEAT);

    cancel.cancel();
    let next = timeout(Duration::from_secs(2), events.next()).await.unwrap();
    assert!(next.is_none());

    // The server sees the connection go away once the stream is gone
    drop(events);
    timeout(Duration::from_secs(5), closed).await.unwrap().unwrap();
}
