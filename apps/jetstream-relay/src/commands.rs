//! Subcommand implementations.

use crate::log_bridge::LogBridge;
use crate::{ConsumeArgs, PublishArgs, RequestArgs};
use eyre::{Result, WrapErr};
use nats_bridge::{
    check_connectivity, start_trigger, ConnectParams, ConnectionKey, NatsPool, OutboundMessage,
    RequestOptions, SessionConfig, TriggerItem,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;

impl ConsumeArgs {
    pub fn session_config(&self) -> SessionConfig {
        let mut config = match (&self.consumer, self.ephemeral) {
            (Some(consumer), true) => SessionConfig::ephemeral(&self.stream).with_consumer(consumer),
            (None, true) => SessionConfig::ephemeral(&self.stream),
            (consumer, false) => {
                SessionConfig::durable(&self.stream, consumer.clone().unwrap_or_default())
            }
        };

        if let Some(filter) = &self.filter {
            config = config.with_filter_subject(filter);
        }

        config
            .with_in_flight_limit(self.limit)
            .with_ack_mode(self.ack)
            .with_decode(self.decode.options())
    }
}

impl PublishArgs {
    pub fn message(&self) -> OutboundMessage {
        self.headers.iter().fold(
            OutboundMessage::new(&self.subject, self.payload.clone()),
            |message, (key, value)| message.with_header(key, value),
        )
    }
}

/// Consume until Ctrl-C, then stop the session and release the connection.
pub async fn consume(
    pool: &NatsPool,
    params: &ConnectParams,
    execution_id: &str,
    args: ConsumeArgs,
) -> Result<()> {
    let config = args.session_config();
    let bridge = Arc::new(LogBridge::new(config.decode.only_content, config.ack_mode));

    let session = start_trigger(pool, params, execution_id, config, bridge.clone())
        .await
        .wrap_err_with(|| format!("Failed to start consuming stream '{}'", args.stream))?;

    info!(
        stream = %session.stream_name(),
        consumer = %session.consumer_name(),
        ephemeral = session.created_ephemeral(),
        ack = %args.ack,
        "Consuming, press Ctrl-C to stop"
    );

    signal::ctrl_c()
        .await
        .wrap_err("Failed to listen for Ctrl-C")?;
    info!("Shutdown signal received");

    session.stop().await;
    info!(
        received = bridge.received(),
        failures = bridge.failures(),
        "Session stopped"
    );
    Ok(())
}

pub async fn publish(
    pool: &NatsPool,
    params: &ConnectParams,
    execution_id: &str,
    args: PublishArgs,
) -> Result<()> {
    let handle = pool
        .acquire(ConnectionKey::resolve(params, execution_id), params)
        .await
        .wrap_err("Failed to connect to NATS")?;

    let message = args.message();
    nats_bridge::publish(handle.client(), &message)
        .await
        .wrap_err_with(|| format!("Failed to publish to '{}'", message.subject))?;
    handle
        .client()
        .flush()
        .await
        .wrap_err("Failed to flush published message")?;

    info!(subject = %message.subject, bytes = message.payload.len(), "Published");
    Ok(())
}

pub async fn request(
    pool: &NatsPool,
    params: &ConnectParams,
    execution_id: &str,
    args: RequestArgs,
) -> Result<()> {
    let handle = pool
        .acquire(ConnectionKey::resolve(params, execution_id), params)
        .await
        .wrap_err("Failed to connect to NATS")?;

    let message = args.message.message();
    let mut options = RequestOptions::default()
        .with_timeout(Duration::from_millis(args.timeout_ms))
        .with_decode(args.decode.options());

    let items: Vec<TriggerItem> = match args.many {
        Some(replies) => {
            options = options.with_replies(replies);
            nats_bridge::request_many(handle.client(), &message, &options)
                .await
                .wrap_err_with(|| format!("Request to '{}' failed", message.subject))?
        }
        None => vec![nats_bridge::request(handle.client(), &message, &options)
            .await
            .wrap_err_with(|| format!("Request to '{}' failed", message.subject))?],
    };

    for item in &items {
        let json = item.to_json(options.decode.only_content);
        println!(
            "{}",
            serde_json::to_string_pretty(&json).wrap_err("Failed to render reply")?
        );
    }
    info!(subject = %message.subject, replies = items.len(), "Request complete");
    Ok(())
}

pub async fn check(params: &ConnectParams) -> Result<()> {
    let rtt = check_connectivity(params)
        .await
        .wrap_err("Connection check failed")?;
    println!("ok: round trip {} ms", rtt.as_millis());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Cli, Command};
    use clap::Parser;
    use nats_bridge::AckMode;

    fn consume_args(args: &[&str]) -> ConsumeArgs {
        let argv: Vec<&str> = ["jetstream-relay", "consume"]
            .into_iter()
            .chain(args.iter().copied())
            .collect();
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Consume(args) => args,
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_durable_session_config() {
        let config = consume_args(&["--stream", "ORDERS", "--consumer", "worker"]).session_config();

        assert_eq!(config, SessionConfig::durable("ORDERS", "worker"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_ephemeral_session_config() {
        let config = consume_args(&[
            "--stream",
            "ORDERS",
            "--ephemeral",
            "--consumer",
            "relay-tmp",
            "--filter",
            "orders.created",
            "--limit",
            "8",
            "--ack",
            "laterMessageNode",
            "--only-content",
        ])
        .session_config();

        assert!(config.ephemeral);
        assert_eq!(config.consumer_name(), Some("relay-tmp"));
        assert_eq!(config.filter(), Some("orders.created"));
        assert_eq!(config.effective_limit(), Some(8));
        assert_eq!(config.ack_mode, AckMode::LaterMessageNode);
        assert!(config.decode.only_content);
    }

    #[test]
    fn test_publish_message_keeps_headers() {
        let args = PublishArgs {
            subject: "orders.created".to_string(),
            payload: "hello".to_string(),
            headers: vec![("Trace".to_string(), "t-1".to_string())],
        };

        let message = args.message();
        assert_eq!(message.subject, "orders.created");
        assert_eq!(message.payload.as_ref(), b"hello");
        assert_eq!(message.headers, vec![("Trace".to_string(), "t-1".to_string())]);
    }
}
