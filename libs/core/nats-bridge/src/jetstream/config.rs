//! Configuration for JetStream trigger sessions.

use super::message::DecodeOptions;
use crate::error::BridgeError;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use tokio::sync::Semaphore;

/// Unlimited in-flight messages.
pub const UNLIMITED: i64 = -1;

/// Largest bound the consume loop can enforce.
pub const MAX_IN_FLIGHT_LIMIT: usize = Semaphore::MAX_PERMITS;

/// When a pulled message is acknowledged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, AsRefStr, EnumString)]
#[strum(serialize_all = "camelCase")]
#[serde(rename_all = "camelCase")]
pub enum AckMode {
    /// As soon as the message is received, before the engine sees it.
    #[default]
    Immediately,
    /// After the execution finishes, whether it succeeded or not.
    ExecutionFinishes,
    /// After the execution finishes successfully; nak on failure.
    ExecutionFinishesSuccessfully,
    /// When a later workflow step acknowledges the message.
    LaterMessageNode,
}

impl AckMode {
    /// Whether the engine receives a completion slot for each item.
    pub fn awaits_engine(&self) -> bool {
        !matches!(self, AckMode::Immediately)
    }
}

/// Session parameters supplied by the engine when a trigger starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    /// Stream name
    pub stream: String,

    /// Durable consumer name, or the ephemeral consumer to reuse
    pub consumer: String,

    /// Create (and later delete) an ephemeral pull consumer when needed
    pub ephemeral: bool,

    /// Subject filter for an auto-created ephemeral consumer
    pub filter_subject: Option<String>,

    /// Maximum concurrent messages; -1 for no limit
    pub in_flight_limit: i64,

    pub ack_mode: AckMode,

    pub decode: DecodeOptions,

    /// Single-shot test execution; forces the in-flight limit to 1
    pub manual: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            stream: String::new(),
            consumer: String::new(),
            ephemeral: false,
            filter_subject: None,
            in_flight_limit: UNLIMITED,
            ack_mode: AckMode::default(),
            decode: DecodeOptions::default(),
            manual: false,
        }
    }
}

impl SessionConfig {
    /// Session bound to an existing durable consumer.
    pub fn durable(stream: impl Into<String>, consumer: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            consumer: consumer.into(),
            ..Default::default()
        }
    }

    /// Session that provisions its own ephemeral consumer.
    pub fn ephemeral(stream: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            ephemeral: true,
            ..Default::default()
        }
    }

    /// Reuse this ephemeral consumer if it still exists.
    pub fn with_consumer(mut self, consumer: impl Into<String>) -> Self {
        self.consumer = consumer.into();
        self
    }

    /// Set the filter subject.
    pub fn with_filter_subject(mut self, subject: impl Into<String>) -> Self {
        self.filter_subject = Some(subject.into());
        self
    }

    /// Set the in-flight limit.
    pub fn with_in_flight_limit(mut self, limit: i64) -> Self {
        self.in_flight_limit = limit;
        self
    }

    /// Set the ack mode.
    pub fn with_ack_mode(mut self, mode: AckMode) -> Self {
        self.ack_mode = mode;
        self
    }

    /// Set the decode options.
    pub fn with_decode(mut self, decode: DecodeOptions) -> Self {
        self.decode = decode;
        self
    }

    /// Run as a single-shot manual execution.
    pub fn manual(mut self) -> Self {
        self.manual = true;
        self
    }

    /// Trimmed consumer name, if any.
    pub fn consumer_name(&self) -> Option<&str> {
        let name = self.consumer.trim();
        (!name.is_empty()).then_some(name)
    }

    /// Trimmed filter subject, if any.
    pub fn filter(&self) -> Option<&str> {
        self.filter_subject
            .as_deref()
            .map(str::trim)
            .filter(|subject| !subject.is_empty())
    }

    /// Reject configurations that cannot start. Makes no broker calls.
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.stream.trim().is_empty() {
            return Err(BridgeError::configuration("stream name is required"));
        }
        if self.in_flight_limit == 0 || self.in_flight_limit < UNLIMITED {
            return Err(BridgeError::configuration(
                "parallel message processing limit must be greater than zero (or -1 for no limit)",
            ));
        }
        if !self.ephemeral && self.consumer_name().is_none() {
            return Err(BridgeError::configuration(
                "consumer name is required for a durable consumer; provide one or enable the ephemeral consumer",
            ));
        }
        Ok(())
    }

    /// Effective concurrency bound; `None` means unbounded.
    ///
    /// Limits above what a semaphore can hold are capped.
    pub fn effective_limit(&self) -> Option<usize> {
        if self.manual {
            return Some(1);
        }
        usize::try_from(self.in_flight_limit)
            .ok()
            .map(|limit| limit.min(MAX_IN_FLIGHT_LIMIT))
    }
}
