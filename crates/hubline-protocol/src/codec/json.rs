//! JSON codec: UTF-8 documents terminated by the ASCII record separator.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;

use super::{HubProtocol, TransferFormat};
use crate::errors::{ProtocolError, Result};
use crate::message::{
    message_type, Argument, Close, Completion, HubMessage, Invocation, StreamItem,
};

/// Frame terminator (0x1E).
pub const RECORD_SEPARATOR: u8 = 0x1E;

/// Handshake name of this codec.
pub const PROTOCOL_NAME: &str = "json";

const PING_FRAME: &[u8] = b"{\"type\":6}\x1e";

/// The JSON hub protocol.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonProtocol;

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    message_type: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvocationFrame {
    #[serde(default)]
    invocation_id: Option<String>,
    target: String,
    #[serde(default)]
    arguments: Vec<Box<RawValue>>,
    #[serde(default)]
    stream_ids: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamItemFrame {
    invocation_id: String,
    #[serde(default)]
    item: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompletionFrame {
    invocation_id: String,
    #[serde(default, deserialize_with = "present")]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Keeps an explicit `"result": null` distinct from a missing field.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InvocationOut<'a> {
    #[serde(rename = "type")]
    message_type: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    invocation_id: Option<&'a str>,
    target: &'a str,
    arguments: &'a [Argument],
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    stream_ids: &'a [String],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StreamItemOut<'a> {
    #[serde(rename = "type")]
    message_type: i64,
    invocation_id: &'a str,
    item: &'a Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompletionOut<'a> {
    #[serde(rename = "type")]
    message_type: i64,
    invocation_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

#[derive(Serialize)]
struct CloseOut<'a> {
    #[serde(rename = "type")]
    message_type: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

#[derive(Serialize)]
struct PingOut {
    #[serde(rename = "type")]
    message_type: i64,
}

fn decode_err(e: &serde_json::Error) -> ProtocolError {
    ProtocolError::Decode(e.to_string())
}

fn encode_err(e: &serde_json::Error) -> ProtocolError {
    ProtocolError::Encode(e.to_string())
}

impl JsonProtocol {
    fn decode_invocation(payload: &[u8]) -> Result<Invocation> {
        let frame: InvocationFrame = serde_json::from_slice(payload).map_err(|e| decode_err(&e))?;
        Ok(Invocation {
            invocation_id: frame.invocation_id.filter(|id| !id.is_empty()),
            target: frame.target,
            arguments: frame.arguments.into_iter().map(Argument::Json).collect(),
            stream_ids: frame.stream_ids,
        })
    }

    fn encode_invocation(message_type: i64, invocation: &Invocation) -> Result<Vec<u8>> {
        serde_json::to_vec(&InvocationOut {
            message_type,
            invocation_id: invocation.invocation_id.as_deref(),
            target: &invocation.target,
            arguments: &invocation.arguments,
            stream_ids: &invocation.stream_ids,
        })
        .map_err(|e| encode_err(&e))
    }
}

impl HubProtocol for JsonProtocol {
    fn name(&self) -> &'static str {
        PROTOCOL_NAME
    }

    fn transfer_format(&self) -> TransferFormat {
        TransferFormat::Text
    }

    fn decode_frame<'a>(&self, input: &'a [u8]) -> Result<(&'a [u8], &'a [u8])> {
        let end = input
            .iter()
            .position(|b| *b == RECORD_SEPARATOR)
            .ok_or_else(|| ProtocolError::Framing("record separator not found".into()))?;
        Ok((&input[..end], &input[end + 1..]))
    }

    fn encode_frame(&self, payload: &[u8]) -> Vec<u8> {
        let mut framed = Vec::with_capacity(payload.len() + 1);
        framed.extend_from_slice(payload);
        framed.push(RECORD_SEPARATOR);
        framed
    }

    fn decode_message(&self, payload: &[u8]) -> Result<HubMessage> {
        let envelope: Envelope = serde_json::from_slice(payload).map_err(|e| decode_err(&e))?;
        match envelope.message_type {
            message_type::INVOCATION => {
                Ok(HubMessage::Invocation(Self::decode_invocation(payload)?))
            }
            message_type::STREAM_INVOCATION => {
                Ok(HubMessage::StreamInvocation(Self::decode_invocation(payload)?))
            }
            message_type::STREAM_ITEM => {
                let frame: StreamItemFrame =
                    serde_json::from_slice(payload).map_err(|e| decode_err(&e))?;
                Ok(HubMessage::StreamItem(StreamItem {
                    invocation_id: frame.invocation_id,
                    item: frame.item,
                }))
            }
            message_type::COMPLETION => {
                let frame: CompletionFrame =
                    serde_json::from_slice(payload).map_err(|e| decode_err(&e))?;
                Ok(HubMessage::Completion(Completion {
                    invocation_id: frame.invocation_id,
                    result: frame.result,
                    error: frame.error,
                }))
            }
            message_type::PING => Ok(HubMessage::Ping),
            message_type::CLOSE => {
                let close: Close = serde_json::from_slice(payload).map_err(|e| decode_err(&e))?;
                Ok(HubMessage::Close(close))
            }
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }

    fn encode_message(&self, message: &HubMessage) -> Result<Vec<u8>> {
        let message_type = message.message_type();
        let encoded = match message {
            HubMessage::Invocation(invocation) | HubMessage::StreamInvocation(invocation) => {
                return Self::encode_invocation(message_type, invocation);
            }
            HubMessage::StreamItem(item) => serde_json::to_vec(&StreamItemOut {
                message_type,
                invocation_id: &item.invocation_id,
                item: &item.item,
            }),
            HubMessage::Completion(completion) => serde_json::to_vec(&CompletionOut {
                message_type,
                invocation_id: &completion.invocation_id,
                result: completion.result.as_ref().filter(|_| completion.error.is_none()),
                error: completion.error.as_deref(),
            }),
            HubMessage::Ping => serde_json::to_vec(&PingOut { message_type }),
            HubMessage::Close(close) => serde_json::to_vec(&CloseOut {
                message_type,
                error: close.error.as_deref(),
            }),
        };
        encoded.map_err(|e| encode_err(&e))
    }

    fn ping_frame(&self) -> &'static [u8] {
        PING_FRAME
    }
}
