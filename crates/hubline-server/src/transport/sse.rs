//! Server-Sent Events transport.

use std::convert::Infallible;

use async_trait::async_trait;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use super::rendezvous::Rendezvous;
use super::{Transport, TransportKind};
use crate::errors::ConnectionError;

/// Push-only stream to the client; client frames arrive over POST.
pub struct SseTransport {
    to_hub: Rendezvous,
    events: mpsc::UnboundedSender<Vec<u8>>,
    end: CancellationToken,
}

impl SseTransport {
    /// Create the transport and the receiving half that feeds the HTTP
    /// response body.
    pub fn new(end: CancellationToken) -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (events, rx) = mpsc::unbounded_channel();
        let transport = Self {
            to_hub: Rendezvous::new(end.clone()),
            events,
            end,
        };
        (transport, rx)
    }

    /// Hand one POST body to the connection. Returns once it has been read.
    pub async fn deliver(&self, body: Vec<u8>) -> Result<(), ConnectionError> {
        self.to_hub.put(body).await
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn send(&self, payload: Vec<u8>) -> Result<(), ConnectionError> {
        if self.end.is_cancelled() {
            return Err(ConnectionError::TransportClosed);
        }
        self.events
            .send(payload)
            .map_err(|_| ConnectionError::TransportClosed)
    }

    async fn read(&self) -> Result<Vec<u8>, ConnectionError> {
        self.to_hub.take().await
    }

    fn kind(&self) -> TransportKind {
        TransportKind::ServerSentEvents
    }
}

/// Wrap each payload as one `data:` event. The stream ends with the
/// connection.
pub fn event_stream(
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    end: CancellationToken,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    UnboundedReceiverStream::new(rx)
        .map(|payload| Ok(Event::default().data(String::from_utf8_lossy(&payload))))
        .take_until(end.cancelled_owned())
}

/// The HTTP response body for an SSE connection.
pub fn response(
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    end: CancellationToken,
) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send + 'static> {
    Sse::new(event_stream(rx, end)).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn send_never_blocks() {
        let (sse, mut rx) = SseTransport::new(CancellationToken::new());
        sse.send(b"one".to_vec()).await.unwrap();
        sse.send(b"two".to_vec()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), b"one");
        assert_eq!(rx.recv().await.unwrap(), b"two");
        assert_eq!(sse.kind(), TransportKind::ServerSentEvents);
    }

    #[tokio::test]
    async fn send_fails_when_stream_dropped() {
        let (sse, rx) = SseTransport::new(CancellationToken::new());
        drop(rx);
        assert_matches!(sse.send(vec![1]).await, Err(ConnectionError::TransportClosed));
    }

    #[tokio::test]
    async fn send_fails_after_termination() {
        let end = CancellationToken::new();
        let (sse, _rx) = SseTransport::new(end.clone());
        end.cancel();
        assert_matches!(sse.send(vec![1]).await, Err(ConnectionError::TransportClosed));
    }

    #[tokio::test]
    async fn posts_reach_read() {
        let (sse, _rx) = SseTransport::new(CancellationToken::new());
        let sse = Arc::new(sse);
        let poster = {
            let sse = Arc::clone(&sse);
            tokio::spawn(async move { sse.deliver(b"{\"type\":6}\x1e".to_vec()).await })
        };
        assert_eq!(sse.read().await.unwrap(), b"{\"type\":6}\x1e");
        poster.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn event_stream_ends_with_connection() {
        let end = CancellationToken::new();
        let (sse, rx) = SseTransport::new(end.clone());
        let mut events = Box::pin(event_stream(rx, end.clone()));
        sse.send(b"{}\x1e".to_vec()).await.unwrap();
        assert!(events.next().await.is_some());
        end.cancel();
        assert!(events.next().await.is_none());
    }
}
