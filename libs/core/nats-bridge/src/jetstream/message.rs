//! Decoding of broker messages into engine items.

use crate::error::BridgeError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// How payloads are turned into item data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DecodeOptions {
    /// Force (true) or forbid (false) JSON parsing; `None` auto-detects.
    pub json_parse_body: Option<bool>,
    /// Keep the payload as raw bytes.
    pub content_is_binary: bool,
    /// Emit only the payload, without subject, reply and headers.
    pub only_content: bool,
}

/// Broker-independent view of a received message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawMessage {
    pub subject: String,
    pub reply: Option<String>,
    /// Header values in arrival order, per key.
    pub headers: Vec<(String, Vec<String>)>,
    pub payload: Bytes,
}

impl From<&async_nats::Message> for RawMessage {
    fn from(message: &async_nats::Message) -> Self {
        let headers = message
            .headers
            .as_ref()
            .map(|headers| {
                headers
                    .iter()
                    .map(|(name, values)| {
                        (
                            name.to_string(),
                            values.iter().map(|value| value.to_string()).collect(),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            subject: message.subject.to_string(),
            reply: message.reply.as_ref().map(|reply| reply.to_string()),
            headers,
            payload: message.payload.clone(),
        }
    }
}

/// One header key: a single value, or all values in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Single(String),
    Multiple(Vec<String>),
}

/// Decoded payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Json(Value),
    Text(String),
    Binary(Vec<u8>),
}

/// Payload classification before decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Json,
    Text,
    Binary,
}

/// True when the payload is wrapped in `{` ... `}`.
pub fn looks_like_json(raw: &[u8]) -> bool {
    raw.len() >= 2 && raw.first() == Some(&b'{') && raw.last() == Some(&b'}')
}

/// Decide how a payload will be decoded.
pub fn classify(raw: &[u8], options: &DecodeOptions) -> PayloadKind {
    if options.content_is_binary {
        return PayloadKind::Binary;
    }
    let parse_json = options
        .json_parse_body
        .unwrap_or_else(|| looks_like_json(raw));
    if parse_json {
        PayloadKind::Json
    } else {
        PayloadKind::Text
    }
}

/// A message as handed to the workflow engine.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerItem {
    pub payload: Payload,
    pub subject: String,
    pub reply: Option<String>,
    pub headers: BTreeMap<String, HeaderValue>,
}

impl TriggerItem {
    /// Decode a raw message with the given options.
    pub fn decode(raw: &RawMessage, options: &DecodeOptions) -> Result<Self, BridgeError> {
        let payload = match classify(&raw.payload, options) {
            PayloadKind::Binary => Payload::Binary(raw.payload.to_vec()),
            PayloadKind::Json if raw.payload.is_empty() => Payload::Json(Value::Object(Map::new())),
            PayloadKind::Json => {
                let value = serde_json::from_slice(&raw.payload).map_err(|e| {
                    BridgeError::processing(format!(
                        "invalid JSON payload on '{}': {}",
                        raw.subject, e
                    ))
                })?;
                Payload::Json(value)
            }
            PayloadKind::Text => Payload::Text(String::from_utf8_lossy(&raw.payload).into_owned()),
        };

        let headers = raw
            .headers
            .iter()
            .filter(|(_, values)| !values.is_empty())
            .map(|(name, values)| {
                let value = match values.as_slice() {
                    [single] => HeaderValue::Single(single.clone()),
                    many => HeaderValue::Multiple(many.to_vec()),
                };
                (name.clone(), value)
            })
            .collect();

        Ok(Self {
            payload,
            subject: raw.subject.clone(),
            reply: raw.reply.clone(),
            headers,
        })
    }

    /// The engine-facing JSON shape.
    ///
    /// With `only_content` and a JSON payload the item is the payload itself.
    pub fn to_json(&self, only_content: bool) -> Value {
        let data = serde_json::to_value(&self.payload).unwrap_or(Value::Null);

        if only_content {
            return match &self.payload {
                Payload::Json(_) => data,
                _ => serde_json::json!({ "data": data }),
            };
        }

        let mut item = Map::new();
        item.insert("data".to_string(), data);
        item.insert("subject".to_string(), Value::String(self.subject.clone()));
        if let Some(reply) = &self.reply {
            item.insert("reply".to_string(), Value::String(reply.clone()));
        }
        item.insert(
            "headers".to_string(),
            serde_json::to_value(&self.headers).unwrap_or_default(),
        );
        Value::Object(item)
    }
}
