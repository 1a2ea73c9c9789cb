//! MessagePack codec.
//!
//! Every frame is a MessagePack integer holding the payload length, followed
//! by the payload. Payloads are positional arrays whose first element is the
//! message type.

use rmpv::Value as MsgValue;
use serde_json::Value;

use super::{HubProtocol, TransferFormat};
use crate::errors::{ProtocolError, Result};
use crate::message::{
    message_type, Argument, Close, Completion, HubMessage, Invocation, ResultKind, StreamItem,
};

/// Handshake name of this codec.
pub const PROTOCOL_NAME: &str = "messagepack";

/// Length prefix `2` followed by `[6]`.
const PING_FRAME: &[u8] = &[0x02, 0x91, 0x06];

/// The MessagePack hub protocol.
#[derive(Clone, Copy, Debug, Default)]
pub struct MessagePackProtocol;

fn decode_err(message: impl Into<String>) -> ProtocolError {
    ProtocolError::Decode(message.into())
}

fn to_json(value: MsgValue) -> Result<Value> {
    rmpv::ext::from_value(value).map_err(|e| decode_err(e.to_string()))
}

fn from_json(value: &Value) -> Result<MsgValue> {
    rmpv::ext::to_value(value).map_err(|e| ProtocolError::Encode(e.to_string()))
}

fn argument_to_msgpack(argument: &Argument) -> Result<MsgValue> {
    match argument {
        Argument::MessagePack(value) => Ok(value.clone()),
        Argument::Value(value) => from_json(value),
        Argument::Json(_) => from_json(&argument.to_value()?),
    }
}

fn optional_string(value: &MsgValue, field: &str) -> Result<Option<String>> {
    match value {
        MsgValue::Nil => Ok(None),
        MsgValue::String(s) => s
            .as_str()
            .map(|s| Some(s.to_owned()))
            .ok_or_else(|| decode_err(format!("{field} is not valid UTF-8"))),
        _ => Err(decode_err(format!("{field} must be a string or nil"))),
    }
}

fn required_string(value: &MsgValue, field: &str) -> Result<String> {
    optional_string(value, field)?.ok_or_else(|| decode_err(format!("{field} is required")))
}

fn string_list(value: Option<&MsgValue>) -> Result<Vec<String>> {
    match value {
        None | Some(MsgValue::Nil) => Ok(Vec::new()),
        Some(MsgValue::Array(items)) => items
            .iter()
            .map(|item| required_string(item, "stream id"))
            .collect(),
        Some(_) => Err(decode_err("stream ids must be an array")),
    }
}

fn expect_len(fields: &[MsgValue], min: usize, kind: &str) -> Result<()> {
    if fields.len() < min {
        return Err(decode_err(format!(
            "{kind} needs at least {min} fields, got {}",
            fields.len()
        )));
    }
    Ok(())
}

fn empty_headers() -> MsgValue {
    MsgValue::Map(Vec::new())
}

impl MessagePackProtocol {
    fn decode_invocation(fields: Vec<MsgValue>, kind: &str) -> Result<Invocation> {
        expect_len(&fields, 5, kind)?;
        let invocation_id = optional_string(&fields[2], "invocation id")?.filter(|id| !id.is_empty());
        let target = required_string(&fields[3], "target")?;
        let stream_ids = string_list(fields.get(5))?;
        let arguments = match fields.into_iter().nth(4) {
            Some(MsgValue::Array(items)) => items.into_iter().map(Argument::MessagePack).collect(),
            Some(MsgValue::Nil) | None => Vec::new(),
            Some(_) => return Err(decode_err("arguments must be an array")),
        };
        Ok(Invocation {
            invocation_id,
            target,
            arguments,
            stream_ids,
        })
    }

    fn decode_completion(fields: Vec<MsgValue>) -> Result<Completion> {
        expect_len(&fields, 4, "completion")?;
        let invocation_id = required_string(&fields[2], "invocation id")?;
        let kind = fields[3]
            .as_i64()
            .and_then(ResultKind::from_tag)
            .ok_or_else(|| decode_err("invalid completion result kind"))?;
        let payload = fields.into_iter().nth(4);
        match (kind, payload) {
            (ResultKind::Void, _) => Ok(Completion::void(invocation_id)),
            (ResultKind::NonVoid, Some(result)) => {
                Ok(Completion::with_result(invocation_id, to_json(result)?))
            }
            (ResultKind::Error, Some(error)) => {
                let error = required_string(&error, "error")?;
                Ok(Completion::with_error(invocation_id, error))
            }
            (_, None) => Err(decode_err("completion is missing its payload")),
        }
    }

    fn encode_invocation(message_type: i64, invocation: &Invocation) -> Result<MsgValue> {
        let arguments = invocation
            .arguments
            .iter()
            .map(argument_to_msgpack)
            .collect::<Result<Vec<_>>>()?;
        let invocation_id = invocation
            .invocation_id
            .as_deref()
            .map_or(MsgValue::Nil, MsgValue::from);
        let mut fields = vec![
            MsgValue::from(message_type),
            empty_headers(),
            invocation_id,
            MsgValue::from(invocation.target.as_str()),
            MsgValue::Array(arguments),
        ];
        if !invocation.stream_ids.is_empty() {
            fields.push(MsgValue::Array(
                invocation
                    .stream_ids
                    .iter()
                    .map(|id| MsgValue::from(id.as_str()))
                    .collect(),
            ));
        }
        Ok(MsgValue::Array(fields))
    }

    fn encode_completion(completion: &Completion) -> Result<MsgValue> {
        let kind = completion.kind();
        let mut fields = vec![
            MsgValue::from(message_type::COMPLETION),
            empty_headers(),
            MsgValue::from(completion.invocation_id.as_str()),
            MsgValue::from(kind as i64),
        ];
        match kind {
            ResultKind::Error => {
                fields.push(MsgValue::from(completion.error.as_deref().unwrap_or_default()));
            }
            ResultKind::NonVoid => {
                if let Some(result) = &completion.result {
                    fields.push(from_json(result)?);
                }
            }
            ResultKind::Void => {}
        }
        Ok(MsgValue::Array(fields))
    }
}

impl HubProtocol for MessagePackProtocol {
    fn name(&self) -> &'static str {
        PROTOCOL_NAME
    }

    fn transfer_format(&self) -> TransferFormat {
        TransferFormat::Binary
    }

    fn decode_frame<'a>(&self, input: &'a [u8]) -> Result<(&'a [u8], &'a [u8])> {
        let mut cursor = input;
        let prefix = rmpv::decode::read_value(&mut cursor)
            .map_err(|e| ProtocolError::Framing(format!("invalid length prefix: {e}")))?;
        let len = prefix
            .as_u64()
            .ok_or_else(|| ProtocolError::Framing("length prefix is not an unsigned integer".into()))?;
        let len = usize::try_from(len)
            .map_err(|_| ProtocolError::Framing(format!("frame length {len} is too large")))?;
        if cursor.len() < len {
            return Err(ProtocolError::Framing(format!(
                "frame declares {len} bytes but only {} remain",
                cursor.len()
            )));
        }
        Ok(cursor.split_at(len))
    }

    fn encode_frame(&self, payload: &[u8]) -> Vec<u8> {
        let mut framed = Vec::with_capacity(payload.len() + 9);
        // Writes into a Vec are infallible.
        let _ = rmp::encode::write_uint(&mut framed, payload.len() as u64);
        framed.extend_from_slice(payload);
        framed
    }

    fn decode_message(&self, payload: &[u8]) -> Result<HubMessage> {
        let mut cursor = payload;
        let value = rmpv::decode::read_value(&mut cursor).map_err(|e| decode_err(e.to_string()))?;
        let MsgValue::Array(fields) = value else {
            return Err(decode_err("message is not an array"));
        };
        let message_type = fields
            .first()
            .and_then(MsgValue::as_i64)
            .ok_or_else(|| decode_err("message type is missing"))?;
        match message_type {
            message_type::INVOCATION => Ok(HubMessage::Invocation(Self::decode_invocation(
                fields,
                "invocation",
            )?)),
            message_type::STREAM_INVOCATION => Ok(HubMessage::StreamInvocation(
                Self::decode_invocation(fields, "stream invocation")?,
            )),
            message_type::STREAM_ITEM => {
                expect_len(&fields, 4, "stream item")?;
                let invocation_id = required_string(&fields[2], "invocation id")?;
                let item = fields.into_iter().nth(3).map_or(Ok(Value::Null), to_json)?;
                Ok(HubMessage::StreamItem(StreamItem {
                    invocation_id,
                    item,
                }))
            }
            message_type::COMPLETION => {
                Ok(HubMessage::Completion(Self::decode_completion(fields)?))
            }
            message_type::PING => Ok(HubMessage::Ping),
            message_type::CLOSE => {
                let error = match fields.get(1) {
                    Some(value) => optional_string(value, "close error")?,
                    None => None,
                };
                Ok(HubMessage::Close(Close { error }))
            }
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }

    fn encode_message(&self, message: &HubMessage) -> Result<Vec<u8>> {
        let value = match message {
            HubMessage::Invocation(invocation) | HubMessage::StreamInvocation(invocation) => {
                Self::encode_invocation(message.message_type(), invocation)?
            }
            HubMessage::StreamItem(item) => MsgValue::Array(vec![
                MsgValue::from(message_type::STREAM_ITEM),
                empty_headers(),
                MsgValue::from(item.invocation_id.as_str()),
                from_json(&item.item)?,
            ]),
            HubMessage::Completion(completion) => Self::encode_completion(completion)?,
            HubMessage::Ping => MsgValue::Array(vec![MsgValue::from(message_type::PING)]),
            HubMessage::Close(close) => MsgValue::Array(vec![
                MsgValue::from(message_type::CLOSE),
                close.error.as_deref().map_or(MsgValue::Nil, MsgValue::from),
                MsgValue::Boolean(false),
            ]),
        };
        let mut bytes = Vec::new();
        rmpv::encode::write_value(&mut bytes, &value)
            .map_err(|e| ProtocolError::Encode(e.to_string()))?;
        Ok(bytes)
    }

    fn ping_frame(&self) -> &'static [u8] {
        PING_FRAME
    }
}
