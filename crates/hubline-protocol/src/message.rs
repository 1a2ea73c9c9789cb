//! Hub message model shared by every codec.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::value::RawValue;
use serde_json::Value;

use crate::errors::{ProtocolError, Result};

/// Numeric message discriminators carried on the wire.
pub mod message_type {
    /// Invocation of a named target.
    pub const INVOCATION: i64 = 1;
    /// One element of a streaming reply.
    pub const STREAM_ITEM: i64 = 2;
    /// Terminal reply to an invocation.
    pub const COMPLETION: i64 = 3;
    /// Invocation whose result is a sequence.
    pub const STREAM_INVOCATION: i64 = 4;
    /// Keepalive.
    pub const PING: i64 = 6;
    /// Connection close notice.
    pub const CLOSE: i64 = 7;
}

/// One invocation argument.
///
/// Inbound arguments stay in their wire representation until the target
/// method's parameter types are known; [`Argument::decode`] then
/// deserializes them directly into the declared type.
#[derive(Clone, Debug)]
pub enum Argument {
    /// Raw JSON text as it appeared in the `arguments` array.
    Json(Box<RawValue>),
    /// A decoded MessagePack value tree.
    MessagePack(rmpv::Value),
    /// An already materialized value (server-initiated sends).
    Value(Value),
}

impl Argument {
    /// Decode this argument as `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        match self {
            Self::Json(raw) => serde_json::from_str(raw.get())
                .map_err(|e| ProtocolError::Decode(e.to_string())),
            Self::MessagePack(value) => rmpv::ext::from_value(value.clone())
                .map_err(|e| ProtocolError::Decode(e.to_string())),
            Self::Value(value) => {
                T::deserialize(value).map_err(|e| ProtocolError::Decode(e.to_string()))
            }
        }
    }

    /// Materialize this argument as a JSON value.
    pub fn to_value(&self) -> Result<Value> {
        match self {
            Self::Value(value) => Ok(value.clone()),
            _ => self.decode(),
        }
    }
}

impl From<Value> for Argument {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl PartialEq for Argument {
    fn eq(&self, other: &Self) -> bool {
        match (self.to_value(), other.to_value()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

impl Serialize for Argument {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Json(raw) => raw.serialize(serializer),
            Self::Value(value) => value.serialize(serializer),
            Self::MessagePack(_) => self
                .to_value()
                .map_err(serde::ser::Error::custom)?
                .serialize(serializer),
        }
    }
}

/// A request to call `target` with `arguments`.
#[derive(Clone, Debug, PartialEq)]
pub struct Invocation {
    /// Present only when the caller expects a reply.
    pub invocation_id: Option<String>,
    /// Method name, matched case-sensitively.
    pub target: String,
    /// Positional arguments.
    pub arguments: Vec<Argument>,
    /// Client-to-server stream ids (carried but not consumed).
    pub stream_ids: Vec<String>,
}

impl Invocation {
    /// Build a fire-and-forget invocation.
    pub fn new(target: impl Into<String>, arguments: Vec<Argument>) -> Self {
        Self {
            invocation_id: None,
            target: target.into(),
            arguments,
            stream_ids: Vec::new(),
        }
    }

    /// Attach an invocation id, turning this into a request that expects a reply.
    #[must_use]
    pub fn with_id(mut self, invocation_id: impl Into<String>) -> Self {
        self.invocation_id = Some(invocation_id.into());
        self
    }
}

/// One element produced by a streaming method.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamItem {
    /// The stream invocation this item belongs to.
    pub invocation_id: String,
    /// The element.
    pub item: Value,
}

/// How a completion resolved. MessagePack encodes this as an explicit tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultKind {
    /// The invocation failed; `error` carries the message.
    Error = 1,
    /// The invocation produced no value.
    Void = 2,
    /// The invocation produced a value.
    NonVoid = 3,
}

impl ResultKind {
    /// Parse the wire tag.
    pub fn from_tag(tag: i64) -> Option<Self> {
        match tag {
            1 => Some(Self::Error),
            2 => Some(Self::Void),
            3 => Some(Self::NonVoid),
            _ => None,
        }
    }
}

/// Terminal reply to an invocation.
#[derive(Clone, Debug, PartialEq)]
pub struct Completion {
    /// The invocation being answered.
    pub invocation_id: String,
    /// Result value, absent for void methods and failures.
    pub result: Option<Value>,
    /// Error text when the invocation failed.
    pub error: Option<String>,
}

impl Completion {
    /// A completion with no result.
    pub fn void(invocation_id: impl Into<String>) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            result: None,
            error: None,
        }
    }

    /// A completion carrying `result`.
    pub fn with_result(invocation_id: impl Into<String>, result: Value) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            result: Some(result),
            error: None,
        }
    }

    /// A failed completion.
    pub fn with_error(invocation_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            result: None,
            error: Some(error.into()),
        }
    }

    /// Which of the three completion shapes this is. An error wins over a result.
    pub fn kind(&self) -> ResultKind {
        if self.error.is_some() {
            ResultKind::Error
        } else if self.result.is_some() {
            ResultKind::NonVoid
        } else {
            ResultKind::Void
        }
    }
}

/// Close notice, optionally carrying the reason.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Close {
    /// Why the connection is closing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A decoded hub message.
#[derive(Clone, Debug, PartialEq)]
pub enum HubMessage {
    /// Type 1.
    Invocation(Invocation),
    /// Type 2.
    StreamItem(StreamItem),
    /// Type 3.
    Completion(Completion),
    /// Type 4.
    StreamInvocation(Invocation),
    /// Type 6.
    Ping,
    /// Type 7.
    Close(Close),
}

impl HubMessage {
    /// Wire discriminator for this message.
    pub fn message_type(&self) -> i64 {
        match self {
            Self::Invocation(_) => message_type::INVOCATION,
            Self::StreamItem(_) => message_type::STREAM_ITEM,
            Self::Completion(_) => message_type::COMPLETION,
            Self::StreamInvocation(_) => message_type::STREAM_INVOCATION,
            Self::Ping => message_type::PING,
            Self::Close(_) => message_type::CLOSE,
        }
    }

    /// Human-readable kind, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Invocation(_) => "invocation",
            Self::StreamItem(_) => "stream_item",
            Self::Completion(_) => "completion",
            Self::StreamInvocation(_) => "stream_invocation",
            Self::Ping => "ping",
            Self::Close(_) => "close",
        }
    }
}
