//! Local WebSocket server for connection tests.

#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use courier_link::codec;
use courier_link::{ConnectionManager, ConnectionOptions, EventHandlers, LinkTimeouts, Packet};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

pub type ServerSocket = WebSocketStream<TcpStream>;

pub struct TestServer {
    pub url: String,
    accepted: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// Number of WebSocket sessions accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Start a server that runs `handler(session_index, socket)` for every
/// accepted connection.
pub async fn spawn_server<F, Fut>(handler: F) -> TestServer
where
    F: Fn(usize, ServerSocket) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);
    let handler = Arc::new(handler);

    let handle = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                continue;
            };
            let index = counter.fetch_add(1, Ordering::SeqCst);
            let handler = Arc::clone(&handler);
            tokio::spawn(async move { handler(index, ws).await });
        }
    });

    TestServer {
        url: format!("ws://{}/ws", addr),
        accepted,
        handle,
    }
}

/// A URL nothing listens on.
pub async fn dead_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{}/ws", addr)
}

pub async fn send_text(ws: &mut ServerSocket, frame: impl Into<String>) {
    let frame: String = frame.into();
    let _ = ws.send(Message::Text(frame.into())).await;
}

pub async fn send_open(ws: &mut ServerSocket, ping_interval_ms: u64, ping_timeout_ms: u64) {
    send_text(
        ws,
        format!(
            r#"0{{"sid":"test-session","pingInterval":{},"pingTimeout":{}}}"#,
            ping_interval_ms, ping_timeout_ms
        ),
    )
    .await;
}

/// Next decoded packet from the client, skipping protocol frames.
pub async fn next_packet(ws: &mut ServerSocket) -> Option<Packet> {
    while let Some(Ok(msg)) = ws.next().await {
        if let Message::Text(text) = msg {
            if let Ok(packet) = codec::decode(text.as_str()) {
                return Some(packet);
            }
        }
    }
    None
}

/// Read until the client goes away.
pub async fn drain(ws: &mut ServerSocket) {
    while let Some(Ok(_)) = ws.next().await {}
}

pub fn fast_options() -> ConnectionOptions {
    ConnectionOptions::default()
        .with_reconnect_delay_ms(20)
        .with_max_reconnect_attempts(Some(3))
}

pub fn manager(url: &str, options: ConnectionOptions, handlers: EventHandlers) -> ConnectionManager {
    ConnectionManager::new(url, options, LinkTimeouts::fast(), handlers)
}

/// Wait for a value on a channel, failing the test after `secs` seconds.
pub async fn recv_within<T>(rx: &mut tokio::sync::mpsc::UnboundedReceiver<T>, secs: u64) -> T {
    tokio::time::timeout(Duration::from_secs(secs), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}
