//! Outbound publish and request/reply helpers.

use crate::error::BridgeError;
use crate::jetstream::{DecodeOptions, RawMessage, TriggerItem};
use async_nats::{Client, HeaderMap, Request};
use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Default request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(600);

/// A message to publish or send as a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundMessage {
    pub subject: String,
    pub payload: Bytes,
    /// Later entries replace earlier ones with the same key.
    pub headers: Vec<(String, String)>,
}

impl OutboundMessage {
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            payload: payload.into(),
            headers: Vec::new(),
        }
    }

    /// Add a header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    fn header_map(&self) -> HeaderMap {
        header_map(&self.headers)
    }
}

/// Request/reply options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RequestOptions {
    /// Reply timeout; for `request_many`, the total collection window
    pub timeout: Duration,
    /// Collect up to this many replies instead of a single one
    pub replies: Option<usize>,
    pub decode: DecodeOptions,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_REQUEST_TIMEOUT,
            replies: None,
            decode: DecodeOptions::default(),
        }
    }
}

impl RequestOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_replies(mut self, replies: usize) -> Self {
        self.replies = Some(replies);
        self
    }

    pub fn with_decode(mut self, decode: DecodeOptions) -> Self {
        self.decode = decode;
        self
    }
}

/// Build a header map; repeated keys keep the last value.
pub fn header_map(headers: &[(String, String)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (key, value) in headers {
        map.insert(key.as_str(), value.as_str());
    }
    map
}

/// Fire-and-forget publish.
pub async fn publish(client: &Client, message: &OutboundMessage) -> Result<(), BridgeError> {
    debug!(subject = %message.subject, bytes = message.payload.len(), "Publishing message");
    client
        .publish_with_headers(
            message.subject.clone(),
            message.header_map(),
            message.payload.clone(),
        )
        .await
        .map_err(BridgeError::publish_error)
}

/// Send a request and decode the single reply.
pub async fn request(
    client: &Client,
    message: &OutboundMessage,
    options: &RequestOptions,
) -> Result<TriggerItem, BridgeError> {
    debug!(subject = %message.subject, timeout_ms = options.timeout.as_millis() as u64, "Sending request");
    let request = Request::new()
        .payload(message.payload.clone())
        .headers(message.header_map())
        .timeout(Some(options.timeout));

    let reply = client
        .send_request(message.subject.clone(), request)
        .await
        .map_err(BridgeError::request_error)?;

    TriggerItem::decode(&RawMessage::from(&reply), &options.decode)
}

/// Send a request and collect replies until `replies` arrived or `timeout` elapsed.
///
/// Returns whatever arrived in the window, possibly nothing.
pub async fn request_many(
    client: &Client,
    message: &OutboundMessage,
    options: &RequestOptions,
) -> Result<Vec<TriggerItem>, BridgeError> {
    let max_replies = options.replies.unwrap_or(usize::MAX);
    let inbox = client.new_inbox();
    let mut replies = client
        .subscribe(inbox.clone())
        .await
        .map_err(BridgeError::request_error)?;

    client
        .publish_with_reply_and_headers(
            message.subject.clone(),
            inbox,
            message.header_map(),
            message.payload.clone(),
        )
        .await
        .map_err(BridgeError::request_error)?;

    let deadline = Instant::now() + options.timeout;
    let mut items = Vec::new();
    while items.len() < max_replies {
        match tokio::time::timeout_at(deadline, replies.next()).await {
            Ok(Some(reply)) => items.push(TriggerItem::decode(&RawMessage::from(&reply), &options.decode)?),
            Ok(None) | Err(_) => break,
        }
    }

    debug!(subject = %message.subject, replies = items.len(), "Collected request replies");
    Ok(items)
}
