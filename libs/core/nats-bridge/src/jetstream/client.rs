//! async-nats implementation of [`JetStreamApi`].

use super::{JetStreamApi, MessageStream, PulledMessage, RawMessage};
use crate::credentials::JetStreamParams;
use crate::error::BridgeError;
use crate::pool::{ConnectionHandle, NatsConnector};
use async_nats::jetstream::consumer::{pull, AckPolicy};
use async_nats::jetstream::{self, AckKind, Context};
use async_trait::async_trait;
use futures::StreamExt;
use tracing::debug;

/// JetStream context on top of a pooled connection.
///
/// Holds the pool reference for as long as it lives.
pub struct JetStreamClient {
    handle: ConnectionHandle<NatsConnector>,
    context: Context,
}

impl JetStreamClient {
    pub fn new(handle: ConnectionHandle<NatsConnector>, params: &JetStreamParams) -> Self {
        let client = handle.client().clone();
        let mut context = match (&params.domain, &params.api_prefix) {
            (Some(domain), _) => jetstream::with_domain(client, domain),
            (None, Some(prefix)) => jetstream::with_prefix(client, prefix),
            (None, None) => jetstream::new(client),
        };
        if let Some(timeout) = params.timeout {
            context.set_timeout(timeout);
        }
        Self { handle, context }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn handle(&self) -> &ConnectionHandle<NatsConnector> {
        &self.handle
    }

    async fn stream(&self, stream: &str) -> Result<jetstream::stream::Stream, BridgeError> {
        self.context
            .get_stream(stream)
            .await
            .map_err(|e| BridgeError::provision(format!("stream '{}': {}", stream, e)))
    }
}

#[async_trait]
impl JetStreamApi for JetStreamClient {
    type Message = NatsPulledMessage;

    async fn fetch_consumer(&self, stream: &str, consumer: &str) -> Result<bool, BridgeError> {
        let stream = self.stream(stream).await?;
        match stream.get_consumer::<pull::Config>(consumer).await {
            Ok(_) => Ok(true),
            Err(e) => {
                debug!(consumer = %consumer, error = %e, "Consumer lookup failed");
                Ok(false)
            }
        }
    }

    async fn create_ephemeral_consumer(
        &self,
        stream: &str,
        filter_subject: Option<&str>,
    ) -> Result<String, BridgeError> {
        let stream = self.stream(stream).await?;
        let consumer = stream
            .create_consumer(pull::Config {
                ack_policy: AckPolicy::Explicit,
                filter_subject: filter_subject.map(str::to_string).unwrap_or_default(),
                ..Default::default()
            })
            .await
            .map_err(BridgeError::provision)?;

        Ok(consumer.cached_info().name.clone())
    }

    async fn delete_consumer(&self, stream: &str, consumer: &str) -> Result<(), BridgeError> {
        let stream = self
            .context
            .get_stream(stream)
            .await
            .map_err(BridgeError::cleanup)?;
        stream
            .delete_consumer(consumer)
            .await
            .map(|_| ())
            .map_err(BridgeError::cleanup)
    }

    async fn consume(
        &self,
        stream: &str,
        consumer: &str,
        max_batch: Option<usize>,
    ) -> Result<MessageStream<NatsPulledMessage>, BridgeError> {
        let stream = self.stream(stream).await?;
        let consumer = stream
            .get_consumer::<pull::Config>(consumer)
            .await
            .map_err(|e| BridgeError::provision(format!("consumer '{}': {}", consumer, e)))?;

        let messages = match max_batch {
            Some(batch) => {
                consumer
                    .stream()
                    .max_messages_per_batch(batch)
                    .messages()
                    .await
            }
            None => consumer.messages().await,
        }
        .map_err(BridgeError::provision)?;

        Ok(messages
            .map(|message| {
                message
                    .map(|message| NatsPulledMessage { message })
                    .map_err(BridgeError::processing)
            })
            .boxed())
    }
}

/// A pulled JetStream message.
pub struct NatsPulledMessage {
    message: jetstream::Message,
}

#[async_trait]
impl PulledMessage for NatsPulledMessage {
    fn raw(&self) -> RawMessage {
        RawMessage::from(&self.message.message)
    }

    async fn mark_working(&self) -> Result<(), BridgeError> {
        self.message
            .ack_with(AckKind::Progress)
            .await
            .map_err(BridgeError::processing)
    }

    async fn ack(&self) -> Result<(), BridgeError> {
        self.message
            .double_ack()
            .await
            .map_err(BridgeError::processing)
    }

    async fn nak(&self) -> Result<(), BridgeError> {
        self.message
            .ack_with(AckKind::Nak(None))
            .await
            .map_err(BridgeError::processing)
    }
}
