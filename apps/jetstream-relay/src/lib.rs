//! JetStream Relay
//!
//! Wires the NATS bridge into a standalone process for operating and
//! debugging streams without a workflow engine.
//!
//! ## Architecture
//!
//! ```text
//! NATS_* environment
//!   ↓ (NatsConfig → StoredCredentials → ConnectParams)
//! ConnectionPool<NatsConnector>
//!   ↓
//! consume: ConsumerSession → LogBridge (logs each item, completes it)
//! publish / request: core NATS on a pooled connection
//! check: throwaway connection, round-trip time
//! ```

mod commands;
mod config;
mod log_bridge;

use clap::{Args, Parser, Subcommand};
use core_config::{Environment, FromEnv, NatsConfig};
use eyre::{Result, WrapErr};
use nats_bridge::pool::NatsConnector;
use nats_bridge::{AckMode, ConnectionPool, DecodeOptions, UNLIMITED};
use tracing::info;

pub use config::{pool_config, stored_credentials};
pub use log_bridge::LogBridge;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Relay NATS JetStream messages, publish and send requests"
)]
pub struct Cli {
    /// Pool key and trigger execution id
    #[arg(long, global = true, default_value = "jetstream-relay")]
    pub execution_id: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Consume a stream until Ctrl-C, logging every message
    Consume(ConsumeArgs),
    /// Publish one message
    Publish(PublishArgs),
    /// Send a request and print the replies
    Request(RequestArgs),
    /// Verify the configured credentials
    Check,
}

#[derive(Args, Debug)]
pub struct ConsumeArgs {
    /// Stream name
    #[arg(long)]
    pub stream: String,

    /// Durable consumer, or the ephemeral consumer to reuse
    #[arg(long, required_unless_present = "ephemeral")]
    pub consumer: Option<String>,

    /// Provision an ephemeral consumer and delete it on exit
    #[arg(long)]
    pub ephemeral: bool,

    /// Subject filter for the ephemeral consumer
    #[arg(long)]
    pub filter: Option<String>,

    /// Maximum messages in flight; -1 for no limit
    #[arg(long, default_value_t = UNLIMITED, allow_negative_numbers = true)]
    pub limit: i64,

    /// When messages are acknowledged
    #[arg(long, default_value_t = AckMode::Immediately)]
    pub ack: AckMode,

    #[command(flatten)]
    pub decode: DecodeArgs,
}

#[derive(Args, Debug)]
pub struct PublishArgs {
    pub subject: String,

    pub payload: String,

    /// Header as KEY=VALUE (repeatable)
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,
}

#[derive(Args, Debug)]
pub struct RequestArgs {
    #[command(flatten)]
    pub message: PublishArgs,

    /// Collect up to N replies instead of one
    #[arg(long)]
    pub many: Option<usize>,

    /// Reply timeout in milliseconds
    #[arg(long, default_value_t = 600)]
    pub timeout_ms: u64,

    #[command(flatten)]
    pub decode: DecodeArgs,
}

#[derive(Args, Debug, Default)]
pub struct DecodeArgs {
    /// Always parse payloads as JSON
    #[arg(long, conflicts_with = "no_json")]
    pub json: bool,

    /// Never parse payloads as JSON
    #[arg(long)]
    pub no_json: bool,

    /// Keep payloads as raw bytes
    #[arg(long)]
    pub binary: bool,

    /// Emit only the payload
    #[arg(long)]
    pub only_content: bool,
}

impl DecodeArgs {
    pub fn options(&self) -> DecodeOptions {
        let json_parse_body = match (self.json, self.no_json) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        };

        DecodeOptions {
            json_parse_body,
            content_is_binary: self.binary,
            only_content: self.only_content,
        }
    }
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err("header name cannot be empty".to_string());
    }
    Ok((key.to_string(), value.to_string()))
}

/// Run the relay
///
/// Sets up error reports, logging and metrics, loads the NATS configuration
/// from the environment, then runs the selected subcommand.
///
/// # Errors
///
/// Returns an error if:
/// - NATS configuration is invalid
/// - The broker cannot be reached or rejects the credentials
/// - The stream or consumer cannot be provisioned
pub async fn run() -> Result<()> {
    core_config::tracing::install_color_eyre();
    let cli = Cli::parse();

    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);
    let metrics = nats_bridge::init_metrics().wrap_err("Failed to install metrics recorder")?;

    let nats_config = NatsConfig::from_env().wrap_err("Failed to load NATS configuration")?;
    let params = stored_credentials(&nats_config)
        .resolve()
        .wrap_err("Invalid NATS credentials")?;
    let pool = ConnectionPool::new(NatsConnector, pool_config(&nats_config));

    info!(
        servers = ?params.servers,
        idle_timeout_secs = nats_config.idle_timeout.as_secs(),
        "Starting jetstream relay"
    );

    match cli.command {
        Command::Consume(args) => {
            commands::consume(&pool, &params, &cli.execution_id, args).await?;
            tracing::debug!(metrics = %metrics.render(), "Final metrics");
        }
        Command::Publish(args) => commands::publish(&pool, &params, &cli.execution_id, args).await?,
        Command::Request(args) => commands::request(&pool, &params, &cli.execution_id, args).await?,
        Command::Check => commands::check(&params).await?,
    }

    Ok(())
}
