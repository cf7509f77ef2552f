//! async-nats backed connector.

use super::{BrokerConnection, CloseSignal, Connector};
use crate::credentials::ConnectParams;
use crate::error::BridgeError;
use async_nats::{Client, Event};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Opens real NATS client sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct NatsConnector;

#[derive(Debug, Default)]
struct LinkState {
    closed: AtomicBool,
    draining: AtomicBool,
}

/// A pooled NATS client plus the lifecycle flags reported by its event callback.
#[derive(Debug)]
pub struct NatsConnection {
    client: Client,
    state: Arc<LinkState>,
}

impl NatsConnection {
    /// The underlying client. Cloning it shares the same socket.
    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl BrokerConnection for NatsConnection {
    fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }

    fn is_draining(&self) -> bool {
        self.state.draining.load(Ordering::Acquire)
    }

    async fn drain(&self) -> Result<(), BridgeError> {
        self.state.draining.store(true, Ordering::Release);
        self.client.drain().await.map_err(BridgeError::cleanup)
    }
}

#[async_trait]
impl Connector for NatsConnector {
    type Connection = NatsConnection;

    async fn connect(
        &self,
        params: &ConnectParams,
        on_closed: CloseSignal,
    ) -> Result<NatsConnection, BridgeError> {
        let servers = params.server_addrs()?;
        let state = Arc::new(LinkState::default());

        let callback_state = state.clone();
        let name = params.name.clone().unwrap_or_default();
        let options = params
            .connect_options()
            .await?
            .event_callback(move |event| {
                let state = callback_state.clone();
                let on_closed = on_closed.clone();
                let name = name.clone();
                async move {
                    match event {
                        Event::Closed => {
                            state.closed.store(true, Ordering::Release);
                            info!(connection = %name, "NATS connection closed");
                            on_closed.notify();
                        }
                        Event::Draining => {
                            state.draining.store(true, Ordering::Release);
                        }
                        Event::Disconnected => {
                            warn!(connection = %name, "NATS connection lost, reconnecting");
                        }
                        Event::Connected => {
                            debug!(connection = %name, "NATS connection (re)established");
                        }
                        other => {
                            debug!(connection = %name, event = %other, "NATS client event");
                        }
                    }
                }
            });

        let client = options
            .connect(servers.as_slice())
            .await
            .map_err(BridgeError::connection)?;

        Ok(NatsConnection { client, state })
    }
}
