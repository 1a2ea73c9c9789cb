//! WebSocket transport.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use hubline_protocol::codec::json::RECORD_SEPARATOR;
use tokio::sync::Mutex;
use tracing::debug;

use super::{Transport, TransportKind};
use crate::errors::ConnectionError;

/// A WebSocket split into independently locked halves, so a blocked read
/// never holds up a send.
pub struct WebSocketTransport {
    sink: Mutex<SplitSink<WebSocket, Message>>,
    stream: Mutex<SplitStream<WebSocket>>,
}

impl WebSocketTransport {
    /// Wrap an upgraded socket.
    pub fn new(socket: WebSocket) -> Self {
        let (sink, stream) = socket.split();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        }
    }
}

/// Text frames for record-separated JSON, binary frames for everything else.
fn frame(payload: Vec<u8>) -> Result<Message, ConnectionError> {
    if payload.last() == Some(&RECORD_SEPARATOR) {
        let text = String::from_utf8(payload)
            .map_err(|e| ConnectionError::Transport(format!("text frame is not UTF-8: {e}")))?;
        Ok(Message::Text(text.into()))
    } else {
        Ok(Message::Binary(payload.into()))
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&self, payload: Vec<u8>) -> Result<(), ConnectionError> {
        if payload.is_empty() {
            return Ok(());
        }
        let message = frame(payload)?;
        self.sink
            .lock()
            .await
            .send(message)
            .await
            .map_err(|e| ConnectionError::Transport(e.to_string()))
    }

    async fn read(&self) -> Result<Vec<u8>, ConnectionError> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text.as_str().as_bytes().to_vec()),
                Some(Ok(Message::Binary(data))) => return Ok(data.to_vec()),
                // Control frames are answered by the socket itself.
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "client sent close frame");
                    return Err(ConnectionError::TransportClosed);
                }
                Some(Err(e)) => return Err(ConnectionError::Transport(e.to_string())),
                None => return Err(ConnectionError::TransportClosed),
            }
        }
    }

    fn kind(&self) -> TransportKind {
        TransportKind::WebSockets
    }

    async fn close(&self) {
        if let Err(e) = self.sink.lock().await.close().await {
            debug!(error = %e, "websocket already closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn json_payload_goes_out_as_text() {
        let msg = frame(b"{\"type\":6}\x1e".to_vec()).unwrap();
        assert_matches!(msg, Message::Text(t) if t.as_str() == "{\"type\":6}\u{1e}");
    }

    #[test]
    fn msgpack_payload_goes_out_as_binary() {
        let msg = frame(vec![0x02, 0x91, 0x06]).unwrap();
        assert_matches!(msg, Message::Binary(b) if &b[..] == &[0x02u8, 0x91, 0x06][..]);
    }

    #[test]
    fn invalid_utf8_text_is_transport_error() {
        let err = frame(vec![0xff, 0xfe, RECORD_SEPARATOR]).unwrap_err();
        assert_matches!(err, ConnectionError::Transport(_));
    }
}
