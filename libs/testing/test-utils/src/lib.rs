//! Shared test utilities for the NATS bridge
//!
//! - `TestNats`: NATS container with JetStream and automatic cleanup (feature: "nats")
//! - `unique_name`: collision-free stream/consumer names for tests sharing a server
//!
//! # Usage
//!
//! ```rust,ignore
//! use test_utils::{unique_name, TestNats};
//!
//! #[tokio::test]
//! async fn my_jetstream_test() {
//!     let nats = TestNats::new().await;
//!     let stream = unique_name("ORDERS");
//!     nats.create_stream(&stream, &["orders.>"]).await;
//! }
//! ```

use uuid::Uuid;

#[cfg(feature = "nats")]
mod nats;

#[cfg(feature = "nats")]
pub use nats::TestNats;

/// `PREFIX_<uuid>` with characters that are valid in stream and consumer names.
pub fn unique_name(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_names_differ() {
        let a = unique_name("ORDERS");
        let b = unique_name("ORDERS");

        assert!(a.starts_with("ORDERS_"));
        assert_ne!(a, b);
        assert!(!a.contains('-') && !a.contains('.'));
    }
}
