//! Long-polling transport.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::rendezvous::Rendezvous;
use super::{Transport, TransportKind};
use crate::errors::ConnectionError;

/// Duplex emulated over two rendezvous channels: POST bodies flow to the
/// hub, hub messages flow out through pending GETs.
pub struct LongPollingTransport {
    to_hub: Rendezvous,
    from_hub: Rendezvous,
}

impl LongPollingTransport {
    /// Create a transport bound to a connection's termination token.
    pub fn new(end: CancellationToken) -> Self {
        Self {
            to_hub: Rendezvous::new(end.clone()),
            from_hub: Rendezvous::new(end),
        }
    }

    /// Hand one POST body to the connection. Returns once it has been read.
    pub async fn deliver(&self, body: Vec<u8>) -> Result<(), ConnectionError> {
        self.to_hub.put(body).await
    }

    /// Serve one GET: wait up to `wait` for an outbound message.
    ///
    /// `Ok(None)` means the poll timed out and the client should poll again.
    pub async fn poll(&self, wait: Duration) -> Result<Option<Vec<u8>>, ConnectionError> {
        self.from_hub.take_timeout(wait).await
    }
}

#[async_trait]
impl Transport for LongPollingTransport {
    async fn send(&self, payload: Vec<u8>) -> Result<(), ConnectionError> {
        self.from_hub.put(payload).await
    }

    async fn read(&self) -> Result<Vec<u8>, ConnectionError> {
        self.to_hub.take().await
    }

    fn kind(&self) -> TransportKind {
        TransportKind::LongPolling
    }
}
