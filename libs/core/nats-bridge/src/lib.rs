//! NATS bridge for workflow steps: a shared connection pool and JetStream
//! trigger sessions.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌──────────────────┐     ┌──────────────────┐
//! │ StoredCredentials│────▶│  ConnectParams   │────▶│  ConnectionPool  │
//! │  (engine record) │     │ (auth, TLS, JS)  │     │ (ref-counted,    │
//! └──────────────────┘     └──────────────────┘     │  idle drain)     │
//!                                                   └────────┬─────────┘
//!                                                            │ ConnectionHandle
//!                                                            ▼
//! ┌──────────────────┐     ┌──────────────────┐     ┌──────────────────┐
//! │  EmissionBridge  │◀────│ ConsumerSession  │◀────│ JetStreamClient  │
//! │ (workflow engine)│────▶│ (ack state mach.)│     │ (pull consumer)  │
//! └──────────────────┘     └──────────────────┘     └──────────────────┘
//!        Completion
//! ```
//!
//! # Key Features
//!
//! - **Connection Pool**: one connection per key, shared by every step that
//!   uses it, drained after 180 s without references
//! - **Scoped Handles**: references are returned on drop, on every exit path
//! - **Ack Modes**: immediately, on execution finish, on successful finish, or
//!   from a later workflow step
//! - **Backpressure**: bounded in-flight messages per session
//! - **Ephemeral Consumers**: provisioned on start, deleted on stop
//! - **Prometheus Metrics**: connections, references, acks and naks
//!
//! # Example
//!
//! ```rust,ignore
//! use nats_bridge::{shared_pool, start_trigger, AckMode, SessionConfig, StoredCredentials};
//!
//! let params = StoredCredentials { servers: "nats://localhost:4222".into(), ..Default::default() }
//!     .resolve()?;
//! let config = SessionConfig::ephemeral("ORDERS")
//!     .with_filter_subject("orders.*")
//!     .with_ack_mode(AckMode::ExecutionFinishesSuccessfully);
//!
//! let session = start_trigger(shared_pool(), &params, "execution-1", config, bridge).await?;
//! // ...
//! session.stop().await;
//! ```

mod bridge;
mod credentials;
mod error;
pub mod jetstream;
pub mod metrics;
pub mod pool;
mod publish;
mod trigger;

#[cfg(test)]
mod test_support;

pub use bridge::{Completion, CompletionSignal, EmissionBridge, ExecutionOutcome};
pub use credentials::{
    check_connectivity, AuthMethod, ConnectParams, JetStreamParams, StoredCredentials, TlsParams,
    DEFAULT_SERVER,
};
pub use error::BridgeError;
pub use jetstream::{
    AckMode, ConsumerSession, DecodeOptions, HeaderValue, JetStreamClient, Payload,
    SessionConfig, SessionState, TriggerItem, UNLIMITED,
};
pub use metrics::{init_metrics, PoolMetrics, SessionMetrics};
pub use pool::{
    shared_pool, ConnectionHandle, ConnectionKey, ConnectionPool, ConnectionStatus, NatsPool,
    PoolConfig, DEFAULT_IDLE_TIMEOUT,
};
pub use publish::{
    header_map, publish, request, request_many, OutboundMessage, RequestOptions,
    DEFAULT_REQUEST_TIMEOUT,
};
pub use trigger::{start_trigger, NatsTrigger};
