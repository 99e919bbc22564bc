//! Session Transport
//!
//! Thin seam between the engine run loop and the socket. A transport
//! hands back a pair of channels: outbound text frames go in, transport
//! events come out. The WebSocket implementation runs the socket on its
//! own task; tests substitute a channel-backed fake.
//!
//! Application-level heartbeats (`{"type":"ping"}`) are answered inside
//! the transport task so they never reach the router.

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

/// Events surfaced by a transport connection
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The socket is open and ready for frames
    Opened,
    /// A text frame arrived
    Message(String),
    /// The socket closed with the given close code
    Closed {
        /// WebSocket close code; 1000 and 1001 are clean
        code: u16,
        /// Close reason, often empty
        reason: String,
    },
    /// The connect or an I/O operation failed
    Failed(String),
}

/// Channel pair for one connection attempt.
///
/// Dropping `outbound` asks the transport to close cleanly; the transport
/// dropping its end of `events` means the connection is gone.
pub struct TransportConn {
    /// Outgoing text frames
    pub outbound: mpsc::UnboundedSender<String>,
    /// Incoming transport events
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Dials session connections.
pub trait Transport: Send + Sync {
    /// Start a connection attempt to the given URL.
    ///
    /// Returns immediately; the outcome arrives as the first event
    /// (`Opened` or `Failed`).
    fn connect(&self, url: &str) -> TransportConn;
}

/// WebSocket transport backed by tokio-tungstenite.
#[derive(Debug, Default)]
pub struct WsTransport;

impl WsTransport {
    /// Create a WebSocket transport
    pub fn new() -> Self {
        Self
    }
}

impl Transport for WsTransport {
    fn connect(&self, url: &str) -> TransportConn {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let url = url.to_string();
        tokio::spawn(run_socket(url, event_tx, out_rx));
        TransportConn {
            outbound: out_tx,
            events: event_rx,
        }
    }
}

async fn run_socket(
    url: String,
    events: mpsc::UnboundedSender<TransportEvent>,
    mut outbound: mpsc::UnboundedReceiver<String>,
) {
    let (socket, _) = match connect_async(&url).await {
        Ok(pair) => pair,
        Err(e) => {
            tracing::warn!("[Transport] connect failed: {}", e);
            let _ = events.send(TransportEvent::Failed(e.to_string()));
            return;
        }
    };
    tracing::info!("[Transport] connected");
    if events.send(TransportEvent::Opened).is_err() {
        return;
    }

    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(raw) => {
                    if let Err(e) = sink.send(Message::Text(raw)).await {
                        let _ = events.send(TransportEvent::Failed(e.to_string()));
                        break;
                    }
                }
                None => {
                    // Engine dropped its sender: close cleanly
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: "".into(),
                        })))
                        .await;
                    break;
                }
            },
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(raw))) => {
                    if is_heartbeat(&raw) {
                        let _ = sink.send(Message::Text(heartbeat_reply())).await;
                        continue;
                    }
                    if events.send(TransportEvent::Message(raw)).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = sink.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.to_string()))
                        .unwrap_or((1005, String::new()));
                    tracing::info!("[Transport] closed, code {}", code);
                    let _ = events.send(TransportEvent::Closed { code, reason });
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!("[Transport] socket error: {}", e);
                    let _ = events.send(TransportEvent::Failed(e.to_string()));
                    break;
                }
                None => {
                    let _ = events.send(TransportEvent::Closed {
                        code: 1006,
                        reason: "stream ended".to_string(),
                    });
                    break;
                }
            },
        }
    }
}

fn is_heartbeat(raw: &str) -> bool {
    serde_json::from_str::<Value>(raw)
        .ok()
        .and_then(|v| v.get("type").and_then(Value::as_str).map(|t| t == "ping"))
        .unwrap_or(false)
}

fn heartbeat_reply() -> String {
    r#"{"type":"pong"}"#.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_detection() {
        assert!(is_heartbeat(r#"{"type":"ping"}"#));
        assert!(!is_heartbeat(r#"{"type":"join"}"#));
        assert!(!is_heartbeat("not json"));
    }
}
