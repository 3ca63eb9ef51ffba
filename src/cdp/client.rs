use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

#[derive(Debug, Error)]
pub enum CdpError {
    /// The socket is unusable; the caller must reconnect.
    #[error("cdp transport failed: {0}")]
    Transport(String),
    #[error("cdp socket closed")]
    Closed,
    /// The browser answered with an error; the socket is still fine.
    #[error("cdp error: {0}")]
    Protocol(String),
}

impl CdpError {
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, CdpError::Transport(_) | CdpError::Closed)
    }
}

/// Request/response client for one DevTools target websocket.
///
/// Events and replies to abandoned (timed-out) requests are skipped by id.
pub struct CdpClient {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    next_id: u64,
}

impl CdpClient {
    pub async fn connect(ws_url: &str) -> Result<Self, CdpError> {
        let (socket, _) = connect_async(ws_url)
            .await
            .map_err(|e| CdpError::Transport(format!("connect {ws_url}: {e}")))?;
        Ok(Self { socket, next_id: 1 })
    }

    pub async fn call(&mut self, method: &str, params: Value) -> Result<Value, CdpError> {
        let id = self.next_id;
        self.next_id += 1;

        let payload = serde_json::json!({
            "id": id,
            "method": method,
            "params": params,
        });
        self.socket
            .send(Message::Text(payload.to_string()))
            .await
            .map_err(|e| CdpError::Transport(format!("send failed: {e}")))?;

        loop {
            let msg = match self.socket.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => return Err(CdpError::Transport(format!("read failed: {e}"))),
                None => return Err(CdpError::Closed),
            };

            let text = match msg {
                Message::Text(text) => text,
                Message::Binary(bytes) => String::from_utf8(bytes)
                    .map_err(|e| CdpError::Protocol(format!("binary decode failed: {e}")))?,
                Message::Close(_) => return Err(CdpError::Closed),
                _ => continue,
            };

            let value: Value = serde_json::from_str(&text)
                .map_err(|e| CdpError::Protocol(format!("invalid json: {e}")))?;
            if value.get("id").and_then(Value::as_u64) != Some(id) {
                continue;
            }
            if let Some(error) = value.get("error") {
                return Err(CdpError::Protocol(error.to_string()));
            }

            return Ok(value.get("result").cloned().unwrap_or(Value::Null));
        }
    }

    /// Evaluates `expression` in the page and returns its value as a string.
    pub async fn evaluate_string(&mut self, expression: &str) -> Result<String, CdpError> {
        let result = self
            .call(
                "Runtime.evaluate",
                serde_json::json!({ "expression": expression, "returnByValue": true }),
            )
            .await?;

        if let Some(details) = result.get("exceptionDetails") {
            return Err(CdpError::Protocol(format!("evaluation threw: {details}")));
        }

        result
            .get("result")
            .and_then(|r| r.get("value"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| CdpError::Protocol(format!("non-string result for {expression}")))
    }

    pub async fn close(mut self) {
        let _ = self.socket.close(None).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdp::test_support::StubBrowser;

    #[tokio::test]
    async fn test_call_skips_events_and_other_replies() {
        let stub = StubBrowser::start().await;
        let mut client = CdpClient::connect(&stub.ws_url).await.unwrap();

        assert_eq!(
            client.evaluate_string("document.title").await.unwrap(),
            "Stub Meeting"
        );
        assert_eq!(
            client.evaluate_string("document.readyState").await.unwrap(),
            "complete"
        );
        client.close().await;
    }

    #[tokio::test]
    async fn test_protocol_errors_leave_socket_usable() {
        let stub = StubBrowser::start().await;
        let mut client = CdpClient::connect(&stub.ws_url).await.unwrap();

        let err = client
            .call("Bogus.method", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, CdpError::Protocol(_)));
        assert!(!err.is_connection_loss());

        let err = client.evaluate_string("navigator.userAgent").await.unwrap_err();
        assert!(matches!(err, CdpError::Protocol(ref msg) if msg.contains("threw")));

        assert_eq!(
            client.evaluate_string("document.title").await.unwrap(),
            "Stub Meeting"
        );
    }

    #[tokio::test]
    async fn test_dropped_socket_is_connection_loss() {
        let stub = StubBrowser::start().await;
        let mut client = CdpClient::connect(&stub.ws_url).await.unwrap();

        stub.drop_connections();
        let err = client.evaluate_string("document.title").await.unwrap_err();
        assert!(err.is_connection_loss());
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_is_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("ws://{}/devtools/page/X", listener.local_addr().unwrap());
        drop(listener);

        let Err(err) = CdpClient::connect(&url).await else {
            panic!("connect to a closed port should fail");
        };
        assert!(matches!(err, CdpError::Transport(_)));
    }
}
