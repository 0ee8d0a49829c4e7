//! MessagePack-RPC message types and stream framing.
//!
//! Messages are MessagePack arrays written back to back on a TCP stream,
//! without any length prefix:
//!
//! ```text
//! request:      [0, msgid, method, params]
//! response:     [1, msgid, error, result]
//! notification: [2, method, params]
//! ```

use crate::config::RpcConfig;
use crate::{Result, ScnError};
use bytes::{BufMut, BytesMut};
use rmpv::Value;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

const REQUEST: u64 = 0;
const RESPONSE: u64 = 1;
const NOTIFICATION: u64 = 2;

/// A single MessagePack-RPC message.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcMessage {
    Request {
        msgid: u32,
        method: String,
        params: Vec<Value>,
    },
    Response {
        msgid: u32,
        error: Value,
        result: Value,
    },
    Notification {
        method: String,
        params: Vec<Value>,
    },
}

impl RpcMessage {
    /// Create a request message.
    pub fn request(msgid: u32, method: impl Into<String>, params: Vec<Value>) -> Self {
        RpcMessage::Request {
            msgid,
            method: method.into(),
            params,
        }
    }

    /// Create a success response.
    pub fn success(msgid: u32, result: Value) -> Self {
        RpcMessage::Response {
            msgid,
            error: Value::Nil,
            result,
        }
    }

    /// Create an error response.
    pub fn error(msgid: u32, error: impl Into<String>) -> Self {
        RpcMessage::Response {
            msgid,
            error: Value::from(error.into()),
            result: Value::Nil,
        }
    }

    /// Convert into the MessagePack array representation.
    pub fn into_value(self) -> Value {
        match self {
            RpcMessage::Request {
                msgid,
                method,
                params,
            } => Value::Array(vec![
                Value::from(REQUEST),
                Value::from(msgid),
                Value::from(method),
                Value::Array(params),
            ]),
            RpcMessage::Response {
                msgid,
                error,
                result,
            } => Value::Array(vec![Value::from(RESPONSE), Value::from(msgid), error, result]),
            RpcMessage::Notification { method, params } => Value::Array(vec![
                Value::from(NOTIFICATION),
                Value::from(method),
                Value::Array(params),
            ]),
        }
    }

    /// Parse the MessagePack array representation.
    pub fn from_value(value: Value) -> Result<Self> {
        let mut fields = match value {
            Value::Array(fields) => fields.into_iter(),
            other => {
                return Err(ScnError::decode(format!(
                    "RPC message is not an array: {}",
                    other
                )))
            }
        };

        let kind = fields
            .next()
            .and_then(|v| v.as_u64())
            .ok_or_else(|| ScnError::decode("RPC message has no type"))?;

        match (kind, fields.len()) {
            (REQUEST, 3) => {
                let msgid = next_msgid(&mut fields)?;
                let method = next_method(&mut fields)?;
                let params = next_params(&mut fields)?;
                Ok(RpcMessage::Request {
                    msgid,
                    method,
                    params,
                })
            }
            (RESPONSE, 3) => {
                let msgid = next_msgid(&mut fields)?;
                let error = fields.next().unwrap_or(Value::Nil);
                let result = fields.next().unwrap_or(Value::Nil);
                Ok(RpcMessage::Response {
                    msgid,
                    error,
                    result,
                })
            }
            (NOTIFICATION, 2) => {
                let method = next_method(&mut fields)?;
                let params = next_params(&mut fields)?;
                Ok(RpcMessage::Notification { method, params })
            }
            (kind, len) => Err(ScnError::decode(format!(
                "Invalid RPC message: type {} with {} fields",
                kind,
                len + 1
            ))),
        }
    }
}

fn next_msgid(fields: &mut impl Iterator<Item = Value>) -> Result<u32> {
    fields
        .next()
        .and_then(|v| v.as_u64())
        .and_then(|id| u32::try_from(id).ok())
        .ok_or_else(|| ScnError::decode("RPC message has an invalid msgid"))
}

fn next_method(fields: &mut impl Iterator<Item = Value>) -> Result<String> {
    match fields.next() {
        Some(Value::String(s)) => Ok(String::from_utf8_lossy(s.as_bytes()).into_owned()),
        Some(Value::Binary(b)) => Ok(String::from_utf8_lossy(&b).into_owned()),
        _ => Err(ScnError::decode("RPC message has an invalid method name")),
    }
}

fn next_params(fields: &mut impl Iterator<Item = Value>) -> Result<Vec<Value>> {
    match fields.next() {
        Some(Value::Array(params)) => Ok(params),
        _ => Err(ScnError::decode("RPC message params are not an array")),
    }
}

/// Deepest array/map nesting accepted in a message.
const MAX_DEPTH: usize = 1024;

/// Incremental MessagePack-RPC frame codec.
///
/// MessagePack values carry no overall length, so the decoder walks item
/// headers as bytes arrive and remembers where it stopped. Every byte is
/// examined once and the value is decoded only when its frame is complete.
#[derive(Debug, Clone)]
pub struct RpcCodec {
    max_message_size: usize,
    /// Bytes of the pending frame already walked
    scanned: usize,
    /// Items still expected by each open array or map
    pending: Vec<u64>,
}

impl RpcCodec {
    pub fn new() -> Self {
        Self::with_max_message_size(RpcConfig::MAX_MESSAGE_SIZE)
    }

    pub fn with_max_message_size(max_message_size: usize) -> Self {
        Self {
            max_message_size,
            scanned: 0,
            pending: Vec::new(),
        }
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Continue walking `src`. Returns the frame length once it is complete.
    fn scan(&mut self, src: &[u8]) -> Result<Option<usize>> {
        if self.pending.is_empty() {
            if src.is_empty() {
                return Ok(None);
            }
            self.pending.push(1);
        }

        while let Some(remaining) = self.pending.last_mut() {
            if *remaining == 0 {
                self.pending.pop();
                continue;
            }

            let Some(item) = item_header(&src[self.scanned..])? else {
                return Ok(None);
            };
            let end = self.scanned as u64 + item.len;
            if end > self.max_message_size as u64 {
                return Err(ScnError::transport(format!(
                    "RPC message size exceeds maximum {}",
                    self.max_message_size
                )));
            }
            if end > src.len() as u64 {
                return Ok(None);
            }

            self.scanned = end as usize;
            *remaining -= 1;
            if item.children > 0 {
                if self.pending.len() >= MAX_DEPTH {
                    return Err(ScnError::decode("RPC message is nested too deeply"));
                }
                self.pending.push(item.children);
            }
        }

        Ok(Some(std::mem::take(&mut self.scanned)))
    }
}

impl Default for RpcCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for RpcCodec {
    type Item = RpcMessage;
    type Error = ScnError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RpcMessage>> {
        let Some(len) = self.scan(src)? else {
            return Ok(None);
        };

        let frame = src.split_to(len);
        let value = rmpv::decode::read_value(&mut &frame[..])
            .map_err(|e| ScnError::decode(format!("Malformed RPC message: {}", e)))?;
        RpcMessage::from_value(value).map(Some)
    }
}

impl Encoder<RpcMessage> for RpcCodec {
    type Error = ScnError;

    fn encode(&mut self, item: RpcMessage, dst: &mut BytesMut) -> Result<()> {
        let mut writer = dst.writer();
        rmpv::encode::write_value(&mut writer, &item.into_value())
            .map_err(|e| ScnError::decode(format!("Failed to encode RPC message: {}", e)))
    }
}

/// Size of one MessagePack item and the number of items nested in it.
struct Item {
    /// Header plus inline payload
    len: u64,
    children: u64,
}

fn item_header(buf: &[u8]) -> Result<Option<Item>> {
    let Some(&marker) = buf.first() else {
        return Ok(None);
    };

    match marker {
        // positive/negative fixint, nil, false, true
        0x00..=0x7f | 0xe0..=0xff | 0xc0 | 0xc2 | 0xc3 => fixed(1),
        0x80..=0x8f => container(1, 2 * u64::from(marker & 0x0f)),
        0x90..=0x9f => container(1, u64::from(marker & 0x0f)),
        0xa0..=0xbf => fixed(1 + u64::from(marker & 0x1f)),
        0xcc | 0xd0 => fixed(2),
        0xcd | 0xd1 => fixed(3),
        0xca | 0xce | 0xd2 => fixed(5),
        0xcb | 0xcf | 0xd3 => fixed(9),
        // fixext 1/2/4/8/16 (marker, type, data)
        0xd4 => fixed(3),
        0xd5 => fixed(4),
        0xd6 => fixed(6),
        0xd7 => fixed(10),
        0xd8 => fixed(18),
        // bin and str 8/16/32
        0xc4 | 0xd9 => Ok(read_len(buf, 1).map(|n| Item { len: 2 + n, children: 0 })),
        0xc5 | 0xda => Ok(read_len(buf, 2).map(|n| Item { len: 3 + n, children: 0 })),
        0xc6 | 0xdb => Ok(read_len(buf, 4).map(|n| Item { len: 5 + n, children: 0 })),
        // ext 8/16/32 carry a type byte after the length
        0xc7 => Ok(read_len(buf, 1).map(|n| Item { len: 3 + n, children: 0 })),
        0xc8 => Ok(read_len(buf, 2).map(|n| Item { len: 4 + n, children: 0 })),
        0xc9 => Ok(read_len(buf, 4).map(|n| Item { len: 6 + n, children: 0 })),
        // array and map 16/32
        0xdc => Ok(read_len(buf, 2).map(|n| Item { len: 3, children: n })),
        0xdd => Ok(read_len(buf, 4).map(|n| Item { len: 5, children: n })),
        0xde => Ok(read_len(buf, 2).map(|n| Item { len: 3, children: 2 * n })),
        0xdf => Ok(read_len(buf, 4).map(|n| Item { len: 5, children: 2 * n })),
        0xc1 => Err(ScnError::decode("Malformed RPC message: reserved marker 0xc1")),
    }
}

fn fixed(len: u64) -> Result<Option<Item>> {
    Ok(Some(Item { len, children: 0 }))
}

fn container(len: u64, children: u64) -> Result<Option<Item>> {
    Ok(Some(Item { len, children }))
}

/// Big-endian length field of `width` bytes following the marker.
fn read_len(buf: &[u8], width: usize) -> Option<u64> {
    let field = buf.get(1..1 + width)?;
    Some(field.iter().fold(0u64, |n, b| (n << 8) | u64::from(*b)))
}

/// Buffered reader that yields whole messages from a byte stream.
#[derive(Debug)]
pub struct MessageReader<R> {
    reader: R,
    buf: BytesMut,
    codec: RpcCodec,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_max_message_size(reader, RpcConfig::MAX_MESSAGE_SIZE)
    }

    pub fn with_max_message_size(reader: R, max_message_size: usize) -> Self {
        Self {
            reader,
            buf: BytesMut::with_capacity(RpcConfig::READ_CHUNK_SIZE),
            codec: RpcCodec::with_max_message_size(max_message_size),
        }
    }

    /// Read the next message.
    ///
    /// Returns `None` on clean EOF (peer closed the connection between
    /// messages). Cancel safe: bytes already read stay buffered.
    pub async fn next_message(&mut self) -> Result<Option<RpcMessage>> {
        loop {
            if let Some(message) = self.codec.decode(&mut self.buf)? {
                return Ok(Some(message));
            }

            self.buf.reserve(RpcConfig::READ_CHUNK_SIZE);
            let read = self.reader.read_buf(&mut self.buf).await?;
            if read == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(ScnError::transport(format!(
                    "connection closed with {} bytes of an incomplete message",
                    self.buf.len()
                )));
            }
        }
    }
}

/// Encode a message to bytes.
pub fn encode_message(message: RpcMessage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    rmpv::encode::write_value(&mut bytes, &message.into_value())
        .map_err(|e| ScnError::decode(format!("Failed to encode RPC message: {}", e)))?;
    Ok(bytes)
}

/// Write a message to an async writer.
pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, message: RpcMessage) -> Result<()> {
    let bytes = encode_message(message)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Serialize any serde value as a MessagePack value.
pub fn to_msgpack<T: Serialize + ?Sized>(value: &T) -> Result<Value> {
    Ok(rmpv::ext::to_value(value)?)
}

/// Convert a MessagePack value into JSON.
///
/// Binary and invalid UTF-8 strings are decoded lossily, non-string map keys
/// are rendered as text, non-finite floats and extension values become null.
pub fn to_json(value: &Value) -> serde_json::Value {
    use serde_json::Value as Json;

    match value {
        Value::Nil => Json::Null,
        Value::Boolean(b) => Json::Bool(*b),
        Value::Integer(i) => {
            if let Some(u) = i.as_u64() {
                Json::from(u)
            } else if let Some(n) = i.as_i64() {
                Json::from(n)
            } else {
                Json::Null
            }
        }
        Value::F32(f) => float_to_json(f64::from(*f)),
        Value::F64(f) => float_to_json(*f),
        Value::String(s) => Json::String(String::from_utf8_lossy(s.as_bytes()).into_owned()),
        Value::Binary(b) => Json::String(String::from_utf8_lossy(b).into_owned()),
        Value::Array(items) => Json::Array(items.iter().map(to_json).collect()),
        Value::Map(entries) => Json::Object(
            entries
                .iter()
                .map(|(k, v)| (map_key(k), to_json(v)))
                .collect(),
        ),
        Value::Ext(..) => Json::Null,
    }
}

fn float_to_json(f: f64) -> serde_json::Value {
    serde_json::Number::from_f64(f)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

fn map_key(key: &Value) -> String {
    match key {
        Value::String(s) => String::from_utf8_lossy(s.as_bytes()).into_owned(),
        Value::Binary(b) => String::from_utf8_lossy(b).into_owned(),
        other => other.to_string(),
    }
}

/// Interpret a value as an optional string (nil → `None`).
pub fn as_opt_string(value: &Value) -> Option<String> {
    match value {
        Value::Nil => None,
        Value::String(s) => Some(String::from_utf8_lossy(s.as_bytes()).into_owned()),
        Value::Binary(b) => Some(String::from_utf8_lossy(b).into_owned()),
        other => Some(other.to_string()),
    }
}
