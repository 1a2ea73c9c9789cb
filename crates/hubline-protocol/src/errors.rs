//! Protocol error types.

use thiserror::Error;

/// Errors raised while framing, decoding, or encoding hub messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame terminator or length prefix is missing or malformed.
    #[error("framing error: {0}")]
    Framing(String),
    /// The payload is structurally invalid for the selected codec.
    #[error("decode error: {0}")]
    Decode(String),
    /// The message discriminator is not one this server understands.
    #[error("unknown message type: {0}")]
    UnknownMessageType(i64),
    /// The handshake named a protocol no codec implements.
    #[error("the protocol '{0}' is not supported")]
    UnknownProtocol(String),
    /// The handshake asked for a newer protocol version than the codec speaks.
    #[error("the requested protocol '{protocol}' version '{version}' is not available")]
    UnsupportedVersion {
        /// Protocol name from the handshake.
        protocol: String,
        /// Requested version.
        version: u32,
    },
    /// A message or value could not be serialized.
    #[error("encode error: {0}")]
    Encode(String),
}

impl ProtocolError {
    /// Short machine-readable label, used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Framing(_) => "framing",
            Self::Decode(_) => "decode",
            Self::UnknownMessageType(_) => "unknown_message_type",
            Self::UnknownProtocol(_) => "unknown_protocol",
            Self::UnsupportedVersion { .. } => "unsupported_version",
            Self::Encode(_) => "encode",
        }
    }
}

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
