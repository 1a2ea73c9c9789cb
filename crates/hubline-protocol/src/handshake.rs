//! Handshake payloads.
//!
//! The handshake is always JSON followed by the record separator, whatever
//! protocol the client asks for; the codec is only selected once the request
//! has been read.

use serde::{Deserialize, Serialize};

use crate::codec::json::RECORD_SEPARATOR;
use crate::errors::{ProtocolError, Result};

/// First message a client sends.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    /// Codec name (`json` or `messagepack`).
    pub protocol: String,
    /// Codec version.
    pub version: u32,
}

/// Server reply to the handshake. Empty means success.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    /// Failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HandshakeResponse {
    /// A successful handshake reply.
    pub fn ok() -> Self {
        Self::default()
    }

    /// A failed handshake reply.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
        }
    }
}

/// Split the handshake request off the front of `input`.
///
/// Returns the request and whatever bytes followed its terminator; clients
/// may pipeline their first messages behind the handshake.
pub fn parse_request(input: &[u8]) -> Result<(HandshakeRequest, &[u8])> {
    let end = input
        .iter()
        .position(|b| *b == RECORD_SEPARATOR)
        .ok_or_else(|| ProtocolError::Framing("handshake record separator not found".into()))?;
    let request = serde_json::from_slice(&input[..end])
        .map_err(|e| ProtocolError::Decode(format!("invalid handshake request: {e}")))?;
    Ok((request, &input[end + 1..]))
}

/// Encode a handshake request, terminator included.
pub fn encode_request(request: &HandshakeRequest) -> Result<Vec<u8>> {
    encode_json_frame(request)
}

/// Encode a handshake response, terminator included.
pub fn encode_response(response: &HandshakeResponse) -> Result<Vec<u8>> {
    encode_json_frame(response)
}

/// Parse a framed handshake response.
pub fn parse_response(input: &[u8]) -> Result<HandshakeResponse> {
    let end = input
        .iter()
        .position(|b| *b == RECORD_SEPARATOR)
        .ok_or_else(|| ProtocolError::Framing("handshake record separator not found".into()))?;
    serde_json::from_slice(&input[..end]).map_err(|e| ProtocolError::Decode(e.to_string()))
}

fn encode_json_frame<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec(value).map_err(|e| ProtocolError::Encode(e.to_string()))?;
    bytes.push(RECORD_SEPARATOR);
    Ok(bytes)
}
