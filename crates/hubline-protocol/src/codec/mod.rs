//! Wire codecs.
//!
//! A [`HubProtocol`] owns one format's framing and message shapes. The rest
//! of the system only ever talks to the trait, so adding a format means
//! implementing it and teaching [`protocol_for`] its name.

pub mod json;
pub mod msgpack;

use std::fmt;
use std::sync::Arc;

use crate::errors::{ProtocolError, Result};
use crate::message::HubMessage;

/// Whether a codec produces text or binary frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferFormat {
    /// UTF-8 text frames.
    Text,
    /// Arbitrary bytes.
    Binary,
}

impl TransferFormat {
    /// Name used in negotiate responses.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "Text",
            Self::Binary => "Binary",
        }
    }
}

impl fmt::Display for TransferFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One wire format: framing plus message encoding.
pub trait HubProtocol: Send + Sync + fmt::Debug {
    /// Name a client puts in its handshake.
    fn name(&self) -> &'static str;

    /// Highest protocol version this codec speaks.
    fn version(&self) -> u32 {
        1
    }

    /// Text or binary frames.
    fn transfer_format(&self) -> TransferFormat;

    /// Split one framed message off the front of `input`.
    ///
    /// Returns `(payload, remainder)`.
    fn decode_frame<'a>(&self, input: &'a [u8]) -> Result<(&'a [u8], &'a [u8])>;

    /// Wrap a payload in this codec's framing.
    fn encode_frame(&self, payload: &[u8]) -> Vec<u8>;

    /// Decode one unframed payload.
    fn decode_message(&self, payload: &[u8]) -> Result<HubMessage>;

    /// Encode one message without framing.
    fn encode_message(&self, message: &HubMessage) -> Result<Vec<u8>>;

    /// Precomputed, already framed ping.
    fn ping_frame(&self) -> &'static [u8];

    /// Encode and frame a message in one step.
    fn write_message(&self, message: &HubMessage) -> Result<Vec<u8>> {
        Ok(self.encode_frame(&self.encode_message(message)?))
    }

    /// Decode every framed message in `input`.
    fn parse_messages(&self, mut input: &[u8]) -> Result<Vec<HubMessage>> {
        let mut messages = Vec::new();
        while !input.is_empty() {
            let (payload, rest) = self.decode_frame(input)?;
            messages.push(self.decode_message(payload)?);
            input = rest;
        }
        Ok(messages)
    }
}

/// Resolve a handshake's protocol name and version to a codec.
pub fn protocol_for(name: &str, version: u32) -> Result<Arc<dyn HubProtocol>> {
    let protocol: Arc<dyn HubProtocol> = match name {
        json::PROTOCOL_NAME => Arc::new(json::JsonProtocol),
        msgpack::PROTOCOL_NAME => Arc::new(msgpack::MessagePackProtocol),
        other => return Err(ProtocolError::UnknownProtocol(other.to_owned())),
    };
    if version > protocol.version() {
        return Err(ProtocolError::UnsupportedVersion {
            protocol: name.to_owned(),
            version,
        });
    }
    Ok(protocol)
}
