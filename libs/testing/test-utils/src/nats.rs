//! NATS test infrastructure
//!
//! Provides a `TestNats` helper that starts a NATS container with JetStream.

use async_nats::Client;
use async_nats::jetstream::stream::{Config as StreamConfig, Stream};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::nats::Nats;

/// Test NATS wrapper that ensures proper cleanup
///
/// The container is stopped and removed when this struct is dropped.
///
/// # Example
///
/// ```no_run
/// use test_utils::TestNats;
///
/// # async fn example() {
/// let nats = TestNats::new().await;
/// let stream = nats.create_stream("ORDERS", &["orders.>"]).await;
/// nats.publish("orders.created", r#"{"id":1}"#).await;
/// # }
/// ```
pub struct TestNats {
    #[allow(dead_code)]
    container: ContainerAsync<Nats>,
    client: Client,
    pub connection_string: String,
}

impl TestNats {
    /// Start NATS with JetStream enabled (`-js`).
    pub async fn new() -> Self {
        let nats_image = Nats::default().with_tag("latest").with_cmd(["-js"]);

        let container = nats_image
            .start()
            .await
            .expect("Failed to start NATS container");

        let host_port = container
            .get_host_port_ipv4(4222)
            .await
            .expect("Failed to get NATS port");

        let connection_string = format!("nats://127.0.0.1:{}", host_port);

        let client = async_nats::connect(&connection_string)
            .await
            .expect("Failed to connect to NATS");

        tracing::info!(port = host_port, "Test NATS ready with JetStream");

        Self {
            container,
            client,
            connection_string,
        }
    }

    /// A client independent of the code under test
    pub fn client(&self) -> Client {
        self.client.clone()
    }

    pub fn jetstream(&self) -> async_nats::jetstream::Context {
        async_nats::jetstream::new(self.client.clone())
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    /// Create a stream capturing `subjects`.
    pub async fn create_stream(&self, name: &str, subjects: &[&str]) -> Stream {
        self.jetstream()
            .create_stream(StreamConfig {
                name: name.to_string(),
                subjects: subjects.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            })
            .await
            .expect("Failed to create stream")
    }

    /// Publish to JetStream and wait for the stream ack.
    pub async fn publish(&self, subject: &str, payload: &'static str) {
        self.jetstream()
            .publish(subject.to_string(), payload.into())
            .await
            .expect("Failed to publish")
            .await
            .expect("Failed to get publish ack");
    }

    /// Number of consumers currently defined on `stream`.
    pub async fn consumer_count(&self, stream: &str) -> usize {
        let mut stream = self
            .jetstream()
            .get_stream(stream)
            .await
            .expect("Failed to get stream");
        stream
            .info()
            .await
            .expect("Failed to get stream info")
            .state
            .consumer_count
    }
}

impl Drop for TestNats {
    fn drop(&mut self) {
        tracing::debug!("Cleaning up test NATS container");
    }
}
