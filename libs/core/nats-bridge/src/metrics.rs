//! Prometheus metrics for the pool and trigger sessions.

use crate::pool::ConnectionKey;
use metrics::{counter, gauge};

/// Connection pool metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolMetrics;

impl PoolMetrics {
    /// Record a new underlying connection.
    pub fn opened(&self, key: &ConnectionKey) {
        counter!(
            "nats_bridge_connections_opened_total",
            "key" => key.to_string()
        )
        .increment(1);
    }

    /// Record an idle connection drained by the pool.
    pub fn drained(&self, key: &ConnectionKey) {
        counter!(
            "nats_bridge_connections_drained_total",
            "key" => key.to_string()
        )
        .increment(1);
    }

    /// Record a broker-side close.
    pub fn closed(&self, key: &ConnectionKey) {
        counter!(
            "nats_bridge_connections_closed_total",
            "key" => key.to_string()
        )
        .increment(1);
    }

    /// Update the live reference count for a key.
    pub fn references(&self, key: &ConnectionKey, count: usize) {
        gauge!(
            "nats_bridge_pool_references",
            "key" => key.to_string()
        )
        .set(count as f64);
    }
}

/// Per-session message metrics.
#[derive(Debug, Clone)]
pub struct SessionMetrics {
    stream_name: String,
}

impl SessionMetrics {
    /// Create new metrics.
    pub fn new(stream_name: &str) -> Self {
        Self {
            stream_name: stream_name.to_string(),
        }
    }

    /// Record a message pulled from the consumer.
    pub fn message_received(&self) {
        counter!(
            "nats_bridge_messages_received_total",
            "stream" => self.stream_name.clone()
        )
        .increment(1);
    }

    /// Record an ack.
    pub fn message_acked(&self) {
        counter!(
            "nats_bridge_messages_acked_total",
            "stream" => self.stream_name.clone()
        )
        .increment(1);
    }

    /// Record a nak.
    pub fn message_nacked(&self) {
        counter!(
            "nats_bridge_messages_nacked_total",
            "stream" => self.stream_name.clone()
        )
        .increment(1);
    }

    /// Record a decode, dispatch, or broker failure for one message.
    pub fn message_failed(&self, stage: &'static str) {
        counter!(
            "nats_bridge_message_failures_total",
            "stream" => self.stream_name.clone(),
            "stage" => stage
        )
        .increment(1);
    }
}

/// Install the Prometheus recorder.
pub fn init_metrics(
) -> Result<metrics_exporter_prometheus::PrometheusHandle, metrics_exporter_prometheus::BuildError>
{
    metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()
}
