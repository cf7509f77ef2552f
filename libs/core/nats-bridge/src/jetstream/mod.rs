//! JetStream trigger sessions.
//!
//! A [`ConsumerSession`] binds one pull consumer to one workflow trigger:
//! it provisions an ephemeral consumer when asked to, pulls messages under an
//! optional in-flight limit, hands each decoded [`TriggerItem`] to the engine
//! and acks or naks according to the configured [`AckMode`].
//!
//! Broker access goes through [`JetStreamApi`] so the session logic can run
//! against a real deployment ([`JetStreamClient`]) or an in-memory fake.

mod ack;
mod client;
mod config;
mod message;
mod session;

pub use ack::{MessageLifecycle, MessageState, Outcome, Verdict};
pub use client::{JetStreamClient, NatsPulledMessage};
pub use config::{AckMode, SessionConfig, UNLIMITED};
pub use message::{
    classify, looks_like_json, DecodeOptions, HeaderValue, Payload, PayloadKind, RawMessage,
    TriggerItem,
};
pub use session::{ConsumerSession, SessionState};

use crate::error::BridgeError;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Message subscription yielded by [`JetStreamApi::consume`].
pub type MessageStream<M> = BoxStream<'static, Result<M, BridgeError>>;

/// The JetStream operations a trigger session needs.
#[async_trait]
pub trait JetStreamApi: Send + Sync + 'static {
    type Message: PulledMessage;

    /// Whether the named consumer exists on the stream.
    async fn fetch_consumer(&self, stream: &str, consumer: &str) -> Result<bool, BridgeError>;

    /// Create an ephemeral pull consumer with explicit acks. Returns its name.
    async fn create_ephemeral_consumer(
        &self,
        stream: &str,
        filter_subject: Option<&str>,
    ) -> Result<String, BridgeError>;

    async fn delete_consumer(&self, stream: &str, consumer: &str) -> Result<(), BridgeError>;

    /// Open a continuous pull subscription on the consumer.
    async fn consume(
        &self,
        stream: &str,
        consumer: &str,
        max_batch: Option<usize>,
    ) -> Result<MessageStream<Self::Message>, BridgeError>;
}

/// A message pulled from a consumer, with its acknowledgement operations.
#[async_trait]
pub trait PulledMessage: Send + Sync + 'static {
    fn raw(&self) -> RawMessage;

    /// Extend the ack deadline ("working" / in progress).
    async fn mark_working(&self) -> Result<(), BridgeError>;

    /// Acknowledge and wait for the server to confirm.
    async fn ack(&self) -> Result<(), BridgeError>;

    /// Negative acknowledgement; requests redelivery.
    async fn nak(&self) -> Result<(), BridgeError>;
}
