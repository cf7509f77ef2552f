//! JetStream Relay - Entry Point
//!
//! Command-line relay for NATS JetStream triggers, publishing and requests.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    jetstream_relay::run().await
}
