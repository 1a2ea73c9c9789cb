//! Byte-message transports.
//!
//! A [`Transport`] hides whether bytes travel over a WebSocket, a pair of
//! long-polling requests, or an SSE stream plus POSTs. The connection state
//! machine only ever calls [`Transport::send`] and [`Transport::read`].

pub mod long_polling;
pub mod rendezvous;
pub mod sse;
pub mod websocket;

use std::fmt;

use async_trait::async_trait;
use axum::http::header::{ACCEPT, CONNECTION, UPGRADE};
use axum::http::{HeaderMap, HeaderName};
use hubline_protocol::{TransferFormat, TransportDescription};

use crate::errors::ConnectionError;

pub use long_polling::LongPollingTransport;
pub use rendezvous::Rendezvous;
pub use sse::SseTransport;
pub use websocket::WebSocketTransport;

/// The three ways a logical connection can be carried.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Full-duplex WebSocket.
    WebSockets,
    /// Server push over `text/event-stream`, client frames over POST.
    ServerSentEvents,
    /// GET polls for server frames, POST delivers client frames.
    LongPolling,
}

impl TransportKind {
    /// Name used in negotiate responses.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WebSockets => "WebSockets",
            Self::ServerSentEvents => "ServerSentEvents",
            Self::LongPolling => "LongPolling",
        }
    }

    /// Frame formats this transport carries without loss. SSE `data:`
    /// lines are text, so binary codecs are refused there.
    pub fn transfer_formats(self) -> &'static [TransferFormat] {
        match self {
            Self::ServerSentEvents => &[TransferFormat::Text],
            Self::WebSockets | Self::LongPolling => &[TransferFormat::Text, TransferFormat::Binary],
        }
    }

    /// Whether frames in `format` survive this transport intact.
    pub fn supports(self, format: TransferFormat) -> bool {
        self.transfer_formats().contains(&format)
    }

    /// Entry for the negotiate response.
    pub fn describe(self) -> TransportDescription {
        let formats: Vec<&str> = self.transfer_formats().iter().map(|f| f.as_str()).collect();
        TransportDescription::new(self.as_str(), &formats)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Send and receive whole byte messages.
///
/// Both calls may suspend. Implementations must tolerate `send` being
/// called from several tasks at once.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver one message to the client.
    async fn send(&self, payload: Vec<u8>) -> Result<(), ConnectionError>;

    /// Wait for the next message from the client.
    async fn read(&self) -> Result<Vec<u8>, ConnectionError>;

    /// Which transport this is.
    fn kind(&self) -> TransportKind;

    /// Release the underlying channel once the connection has ended.
    async fn close(&self) {}
}

/// Pick the transport for a new logical connection from its request headers.
pub fn select_transport(headers: &HeaderMap) -> TransportKind {
    let header = |name: HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default()
    };
    if header(CONNECTION).contains("upgrade") && header(UPGRADE) == "websocket" {
        TransportKind::WebSockets
    } else if header(ACCEPT).contains("text/event-stream") {
        TransportKind::ServerSentEvents
    } else {
        TransportKind::LongPolling
    }
}

/// In-memory transport for driving a connection from tests.
#[cfg(test)]
pub(crate) mod testing {
    use tokio::sync::{mpsc, Mutex};

    use super::{async_trait, ConnectionError, Transport, TransportKind};

    pub(crate) struct ChannelTransport {
        inbound: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
        outbound: mpsc::UnboundedSender<Vec<u8>>,
        kind: TransportKind,
    }

    /// Client-side ends: push inbound bytes, observe outbound bytes.
    pub(crate) struct ClientEnd {
        pub(crate) tx: mpsc::UnboundedSender<Vec<u8>>,
        pub(crate) rx: mpsc::UnboundedReceiver<Vec<u8>>,
    }

    pub(crate) fn pair() -> (ChannelTransport, ClientEnd) {
        pair_as(TransportKind::WebSockets)
    }

    /// Like [`pair`], but reporting `kind` to the connection.
    pub(crate) fn pair_as(kind: TransportKind) -> (ChannelTransport, ClientEnd) {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        (
            ChannelTransport {
                inbound: Mutex::new(in_rx),
                outbound: out_tx,
                kind,
            },
            ClientEnd {
                tx: in_tx,
                rx: out_rx,
            },
        )
    }

    #[async_trait]
    impl Transport for ChannelTransport {
        async fn send(&self, payload: Vec<u8>) -> Result<(), ConnectionError> {
            self.outbound
                .send(payload)
                .map_err(|_| ConnectionError::TransportClosed)
        }

        async fn read(&self) -> Result<Vec<u8>, ConnectionError> {
            self.inbound
                .lock()
                .await
                .recv()
                .await
                .ok_or(ConnectionError::TransportClosed)
        }

        fn kind(&self) -> TransportKind {
            self.kind
        }
    }
}
