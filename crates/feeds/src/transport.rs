//! JSON-RPC log subscription transport over WebSocket.

use crate::StreamError;
use async_trait::async_trait;
use escrow_core::RawLog;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

/// One live subscription session. The monitor drives it until it errors,
/// then tears it down and reconnects.
#[async_trait]
pub trait LogSession: Send {
    /// Next decoded-log record. Errors are terminal for the session.
    async fn next_log(&mut self) -> Result<RawLog, StreamError>;

    /// Liveness probe. A send failure is terminal for the session.
    async fn ping(&mut self) -> Result<(), StreamError>;
}

/// Factory for subscription sessions, one per tracked contract address.
#[async_trait]
pub trait LogTransport: Send + Sync {
    /// Open a transport connection and complete the subscription
    /// handshake for the given contract address.
    async fn open(&self, address: &str) -> Result<Box<dyn LogSession>, StreamError>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// `eth_subscribe("logs")` transport against a node WebSocket endpoint.
#[derive(Debug, Clone)]
pub struct WsLogTransport {
    node_url: String,
}

impl WsLogTransport {
    pub fn new(node_url: impl Into<String>) -> Self {
        Self {
            node_url: node_url.into(),
        }
    }
}

#[async_trait]
impl LogTransport for WsLogTransport {
    async fn open(&self, address: &str) -> Result<Box<dyn LogSession>, StreamError> {
        url::Url::parse(&self.node_url)?;
        let (mut ws, response) = connect_async(&self.node_url).await?;
        debug!(status = ?response.status(), address, "websocket connected");

        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_subscribe",
            "params": ["logs", { "address": address }],
        });
        ws.send(Message::Text(request.to_string())).await?;

        // The node acks the subscription with its id before any
        // notification is delivered.
        let subscription_id = loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    let value: Value = serde_json::from_str(&text)
                        .map_err(|e| StreamError::HandshakeFailed(e.to_string()))?;
                    if let Some(err) = value.get("error") {
                        return Err(StreamError::HandshakeFailed(err.to_string()));
                    }
                    if let Some(id) = value.get("result").and_then(Value::as_str) {
                        break id.to_string();
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    ws.send(Message::Pong(data)).await?;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(StreamError::HandshakeFailed(e.to_string())),
                None => {
                    return Err(StreamError::HandshakeFailed(
                        "stream ended during handshake".to_string(),
                    ))
                }
            }
        };
        debug!(subscription_id, address, "log subscription established");

        Ok(Box::new(WsLogSession {
            ws,
            subscription_id,
        }))
    }
}

struct WsLogSession {
    ws: WsStream,
    subscription_id: String,
}

#[async_trait]
impl LogSession for WsLogSession {
    async fn next_log(&mut self) -> Result<RawLog, StreamError> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    if let Some(log) = parse_notification(&text, &self.subscription_id) {
                        return Ok(log);
                    }
                    // Non-log frames (acks, unrelated subscriptions) are
                    // skipped; a malformed frame never kills the session.
                }
                Some(Ok(Message::Ping(data))) => {
                    self.ws.send(Message::Pong(data)).await?;
                }
                Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    return Err(StreamError::Disconnected(format!(
                        "close frame: {frame:?}"
                    )));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(StreamError::ConnectionFailed(e.to_string())),
                None => return Err(StreamError::Disconnected("stream ended".to_string())),
            }
        }
    }

    async fn ping(&mut self) -> Result<(), StreamError> {
        self.ws
            .send(Message::Ping(Vec::new()))
            .await
            .map_err(StreamError::from)
    }
}

/// Extract the log record from an `eth_subscription` notification frame.
fn parse_notification(text: &str, subscription_id: &str) -> Option<RawLog> {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "unparseable frame from node");
            return None;
        }
    };

    if value.get("method").and_then(Value::as_str) != Some("eth_subscription") {
        return None;
    }
    let params = value.get("params")?;
    if params.get("subscription").and_then(Value::as_str) != Some(subscription_id) {
        return None;
    }

    match serde_json::from_value::<RawLog>(params.get("result")?.clone()) {
        Ok(log) => Some(log),
        Err(e) => {
            warn!(error = %e, "log record failed structural decoding");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_notification() {
        let text = r#"{
            "jsonrpc": "2.0",
            "method": "eth_subscription",
            "params": {
                "subscription": "0xsub1",
                "result": {
                    "address": "0xescrow",
                    "topics": ["0xaaaa"],
                    "data": "0x",
                    "transactionHash": "0xt1",
                    "blockNumber": "0x2a"
                }
            }
        }"#;
        let log = parse_notification(text, "0xsub1").unwrap();
        assert_eq!(log.address, "0xescrow");
        assert_eq!(log.transaction_hash, "0xt1");
        assert_eq!(log.block_number_u64(), Some(42));
    }

    #[test]
    fn test_parse_notification_other_subscription() {
        let text = r#"{"method":"eth_subscription","params":{"subscription":"0xother","result":{}}}"#;
        assert!(parse_notification(text, "0xsub1").is_none());
    }

    #[test]
    fn test_parse_notification_ack_frame() {
        let text = r#"{"jsonrpc":"2.0","id":1,"result":"0xsub1"}"#;
        assert!(parse_notification(text, "0xsub1").is_none());
    }

    #[test]
    fn test_parse_notification_malformed() {
        assert!(parse_notification("not json", "0xsub1").is_none());
        let missing = r#"{"method":"eth_subscription","params":{"subscription":"0xsub1","result":{"address":1}}}"#;
        assert!(parse_notification(missing, "0xsub1").is_none());
    }
}
