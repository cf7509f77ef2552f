//! Entry point used by the engine to start a JetStream trigger.

use crate::bridge::EmissionBridge;
use crate::credentials::ConnectParams;
use crate::error::BridgeError;
use crate::jetstream::{ConsumerSession, JetStreamClient, SessionConfig};
use crate::pool::{ConnectionKey, NatsPool};
use std::sync::Arc;
use tracing::debug;

/// Session type returned by [`start_trigger`].
pub type NatsTrigger = ConsumerSession<JetStreamClient>;

/// Check out a pooled connection and start a consumer session on it.
///
/// The configuration is validated before the pool is touched. The pooled
/// reference is released when the session stops, or right away if starting fails.
pub async fn start_trigger<B: EmissionBridge>(
    pool: &NatsPool,
    params: &ConnectParams,
    execution_id: &str,
    config: SessionConfig,
    bridge: Arc<B>,
) -> Result<NatsTrigger, BridgeError> {
    config.validate()?;

    let key = ConnectionKey::resolve(params, execution_id);
    debug!(key = %key, stream = %config.stream, "Acquiring connection for trigger");
    let handle = pool.acquire(key, params).await?;
    let client = JetStreamClient::new(handle, &params.jetstream);

    ConsumerSession::start(client, config, bridge).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jetstream::{AckMode, JetStreamApi, MessageStream};
    use crate::pool::{ConnectionHandle, ConnectionPool, PoolConfig};
    use crate::test_support::{FakeConnector, FakeJetStream, FakeMessage, RecordingBridge};
    use async_trait::async_trait;

    /// Fake broker access that owns a pool reference, like [`JetStreamClient`].
    struct PooledJetStream {
        js: FakeJetStream,
        _handle: ConnectionHandle<FakeConnector>,
    }

    #[async_trait]
    impl JetStreamApi for PooledJetStream {
        type Message = FakeMessage;

        async fn fetch_consumer(&self, stream: &str, consumer: &str) -> Result<bool, BridgeError> {
            self.js.fetch_consumer(stream, consumer).await
        }

        async fn create_ephemeral_consumer(
            &self,
            stream: &str,
            filter_subject: Option<&str>,
        ) -> Result<String, BridgeError> {
            self.js.create_ephemeral_consumer(stream, filter_subject).await
        }

        async fn delete_consumer(&self, stream: &str, consumer: &str) -> Result<(), BridgeError> {
            self.js.delete_consumer(stream, consumer).await
        }

        async fn consume(
            &self,
            stream: &str,
            consumer: &str,
            max_batch: Option<usize>,
        ) -> Result<MessageStream<FakeMessage>, BridgeError> {
            self.js.consume(stream, consumer, max_batch).await
        }
    }

    #[tokio::test]
    async fn test_invalid_config_never_touches_pool() {
        let pool = NatsPool::new(Default::default(), PoolConfig::default());
        let bridge = RecordingBridge::new();

        let err = start_trigger(
            &pool,
            &ConnectParams::default(),
            "exec-1",
            SessionConfig::durable("ORDERS", " "),
            bridge,
        )
        .await
        .err()
        .unwrap();

        assert!(matches!(err, BridgeError::Configuration(_)));
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_stop_releases_pool_reference() {
        let pool = ConnectionPool::new(FakeConnector::new(), PoolConfig::default());
        let key = ConnectionKey::new("exec-1");
        let handle = pool
            .acquire(key.clone(), &ConnectParams::default())
            .await
            .unwrap();
        assert_eq!(pool.status_of(&key).ref_count, 1);

        let js = FakeJetStream::new();
        let api = PooledJetStream {
            js: js.clone(),
            _handle: handle,
        };
        let config = SessionConfig::ephemeral("ORDERS").with_ack_mode(AckMode::ExecutionFinishes);
        let session = ConsumerSession::start(api, config, RecordingBridge::new())
            .await
            .unwrap();
        assert_eq!(pool.status_of(&key).ref_count, 1);

        session.stop().await;

        let status = pool.status_of(&key);
        assert_eq!(status.ref_count, 0);
        assert!(status.has_timer);
        assert_eq!(js.deleted().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_start_releases_pool_reference() {
        let pool = ConnectionPool::new(FakeConnector::new(), PoolConfig::default());
        let key = ConnectionKey::new("exec-2");
        let handle = pool
            .acquire(key.clone(), &ConnectParams::default())
            .await
            .unwrap();

        let js = FakeJetStream::new();
        js.fail_consume();
        let api = PooledJetStream {
            js,
            _handle: handle,
        };

        let result = ConsumerSession::start(api, SessionConfig::durable("ORDERS", "worker"), RecordingBridge::new()).await;
        assert!(result.is_err());
        assert_eq!(pool.status_of(&key).ref_count, 0);
    }
}
