//! # hubline-protocol
//!
//! Wire-level model of the hub protocol.
//!
//! - Message model: invocations, stream items, completions, pings, close
//! - Handshake and negotiate payloads
//! - [`HubProtocol`] codecs: JSON (record-separator framing) and MessagePack
//!   (length-prefixed framing)
//!
//! Codecs are stateless; a connection selects one during the handshake and
//! keeps it for its lifetime.

#![deny(unsafe_code)]

pub mod codec;
pub mod errors;
pub mod handshake;
pub mod message;
pub mod negotiate;

pub use codec::json::JsonProtocol;
pub use codec::msgpack::MessagePackProtocol;
pub use codec::{protocol_for, HubProtocol, TransferFormat};
pub use errors::{ProtocolError, Result};
pub use handshake::{HandshakeRequest, HandshakeResponse};
pub use message::{Argument, Close, Completion, HubMessage, Invocation, ResultKind, StreamItem};
pub use negotiate::{NegotiateResponse, TransportDescription};
