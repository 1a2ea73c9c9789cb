//! Server error types.

use std::time::Duration;

use hubline_protocol::ProtocolError;
use thiserror::Error;

/// Why a connection ended.
///
/// Every variant is fatal to the one connection that raised it and to
/// nothing else.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Framing, decode, or unknown-message-type failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// The invocation named a method the hub does not have.
    #[error("unknown hub method '{0}'")]
    UnknownTarget(String),
    /// The invocation carried the wrong number of arguments.
    #[error("method '{target}' takes {expected} argument(s), got {actual}")]
    ArgumentCountMismatch {
        /// Method name.
        target: String,
        /// Declared parameter count.
        expected: usize,
        /// Arguments received.
        actual: usize,
    },
    /// An argument did not decode into the declared parameter type.
    #[error("argument {index} of '{target}' is invalid: {reason}")]
    ArgumentDecode {
        /// Method name.
        target: String,
        /// Zero-based argument position.
        index: usize,
        /// Decoder message.
        reason: String,
    },
    /// Nothing was received within the ping timeout.
    #[error("no message received for {0:?}")]
    PingTimeout(Duration),
    /// The transport was closed, or the termination signal fired while
    /// a send or read was blocked.
    #[error("transport closed")]
    TransportClosed,
    /// The underlying socket or stream reported an error.
    #[error("transport error: {0}")]
    Transport(String),
    /// The handshake was rejected.
    #[error("handshake failed: {0}")]
    Handshake(String),
    /// No handshake request arrived in time.
    #[error("handshake timed out")]
    HandshakeTimeout,
    /// The client sent a close message.
    #[error("closed by client{}", .0.as_deref().map(|e| format!(": {e}")).unwrap_or_default())]
    ClosedByClient(Option<String>),
    /// The server is shutting down.
    #[error("server shutting down")]
    Shutdown,
}

impl ConnectionError {
    /// Short machine-readable label, used for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Protocol(e) => e.kind(),
            Self::UnknownTarget(_) => "unknown_target",
            Self::ArgumentCountMismatch { .. } => "argument_count_mismatch",
            Self::ArgumentDecode { .. } => "argument_decode",
            Self::PingTimeout(_) => "ping_timeout",
            Self::TransportClosed => "transport_closed",
            Self::Transport(_) => "transport",
            Self::Handshake(_) => "handshake",
            Self::HandshakeTimeout => "handshake_timeout",
            Self::ClosedByClient(_) => "closed_by_client",
            Self::Shutdown => "shutdown",
        }
    }

    /// Whether this is an ordinary way for a connection to end.
    pub fn is_graceful(&self) -> bool {
        matches!(
            self,
            Self::TransportClosed | Self::ClosedByClient(None) | Self::Shutdown
        )
    }
}

/// Client Registry lookup failures. Returned to hub code, never fatal.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The connection or group does not exist.
    #[error("{what} '{name}' not found")]
    NotFound {
        /// `"connection"` or `"group"`.
        what: &'static str,
        /// The id or group name looked up.
        name: String,
    },
}

impl RegistryError {
    pub(crate) fn connection(id: &str) -> Self {
        Self::NotFound {
            what: "connection",
            name: id.to_owned(),
        }
    }

    pub(crate) fn group(name: &str) -> Self {
        Self::NotFound {
            what: "group",
            name: name.to_owned(),
        }
    }
}

/// Error returned by a hub method. Its text becomes `Completion.error`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct HubError {
    message: String,
}

impl HubError {
    /// Create an error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The message sent to the caller.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<RegistryError> for HubError {
    fn from(err: RegistryError) -> Self {
        Self::new(err.to_string())
    }
}

impl From<String> for HubError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HubError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}
