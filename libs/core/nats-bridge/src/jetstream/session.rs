//! Trigger session: one pull consumer feeding one workflow trigger.

use super::ack::{MessageLifecycle, Outcome, Verdict};
use super::config::{AckMode, SessionConfig};
use super::message::{DecodeOptions, TriggerItem};
use super::{JetStreamApi, MessageStream, PulledMessage};
use crate::bridge::{Completion, EmissionBridge};
use crate::error::BridgeError;
use crate::metrics::SessionMetrics;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use strum::Display;
use tokio::sync::{watch, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Pause after a failed pull before asking for the next message.
const PULL_ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SessionState {
    Provisioning,
    Consuming,
    Draining,
    Closed,
}

struct Teardown<J> {
    api: J,
    task: JoinHandle<()>,
}

/// A running JetStream trigger.
///
/// Owns the broker access (and through it the pooled connection reference)
/// until [`stop`](Self::stop) completes.
pub struct ConsumerSession<J: JetStreamApi> {
    stream: String,
    consumer: String,
    created_ephemeral: bool,
    state: watch::Sender<SessionState>,
    shutdown: watch::Sender<bool>,
    teardown: Mutex<Option<Teardown<J>>>,
}

impl<J: JetStreamApi> ConsumerSession<J> {
    /// Validate, provision the consumer, subscribe and start consuming.
    ///
    /// Invalid configurations fail before any broker call. If subscribing
    /// fails after an ephemeral consumer was created, that consumer is deleted.
    pub async fn start<B: EmissionBridge>(
        api: J,
        config: SessionConfig,
        bridge: Arc<B>,
    ) -> Result<Self, BridgeError> {
        config.validate()?;

        let (state, _) = watch::channel(SessionState::Provisioning);
        let (consumer, created_ephemeral) = provision(&api, &config).await?;
        let limit = config.effective_limit();

        let messages = match api.consume(&config.stream, &consumer, limit).await {
            Ok(messages) => messages,
            Err(e) => {
                if created_ephemeral {
                    if let Err(cleanup) = api.delete_consumer(&config.stream, &consumer).await {
                        warn!(
                            stream = %config.stream,
                            consumer = %consumer,
                            error = %cleanup,
                            "Failed to delete ephemeral consumer after subscribe failure"
                        );
                    }
                }
                return Err(e);
            }
        };

        info!(
            stream = %config.stream,
            consumer = %consumer,
            ephemeral = created_ephemeral,
            ack_mode = %config.ack_mode,
            in_flight_limit = ?limit,
            "Starting JetStream trigger session"
        );

        let dispatcher = Arc::new(Dispatcher {
            bridge,
            mode: config.ack_mode,
            decode: config.decode.clone(),
            metrics: SessionMetrics::new(&config.stream),
            stream: config.stream.clone(),
        });
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(consume_loop(messages, dispatcher, limit, shutdown_rx));

        state.send_replace(SessionState::Consuming);

        Ok(Self {
            stream: config.stream,
            consumer,
            created_ephemeral,
            state,
            shutdown,
            teardown: Mutex::new(Some(Teardown { api, task })),
        })
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// The consumer actually bound, including a generated ephemeral name.
    pub fn consumer_name(&self) -> &str {
        &self.consumer
    }

    pub fn stream_name(&self) -> &str {
        &self.stream
    }

    /// Whether this session created the consumer it is bound to.
    pub fn created_ephemeral(&self) -> bool {
        self.created_ephemeral
    }

    /// Stop pulling, wait for every in-flight message to reach its ack/nak
    /// decision, delete the ephemeral consumer this session created and
    /// release the connection.
    ///
    /// Idempotent; concurrent callers return once teardown has finished.
    pub async fn stop(&self) {
        let mut teardown = self.teardown.lock().await;
        let Some(Teardown { api, task }) = teardown.take() else {
            return;
        };

        info!(stream = %self.stream, consumer = %self.consumer, "Stopping JetStream trigger session");
        self.state.send_replace(SessionState::Draining);
        self.shutdown.send_replace(true);

        if let Err(e) = task.await {
            log_join_error(&self.stream, e);
        }

        if self.created_ephemeral {
            match api.delete_consumer(&self.stream, &self.consumer).await {
                Ok(()) => debug!(stream = %self.stream, consumer = %self.consumer, "Deleted ephemeral consumer"),
                Err(e) => warn!(
                    stream = %self.stream,
                    consumer = %self.consumer,
                    error = %e,
                    "Failed to delete ephemeral consumer"
                ),
            }
        }

        drop(api);
        self.state.send_replace(SessionState::Closed);
        info!(stream = %self.stream, consumer = %self.consumer, "JetStream trigger session closed");
    }
}

impl<J: JetStreamApi> Drop for ConsumerSession<J> {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
        if let Ok(mut teardown) = self.teardown.try_lock() {
            if teardown.take().is_some() && self.created_ephemeral {
                warn!(
                    stream = %self.stream,
                    consumer = %self.consumer,
                    "Session dropped without stop; ephemeral consumer left for server-side cleanup"
                );
            }
        }
    }
}

/// Resolve the consumer to bind to, creating an ephemeral one when needed.
async fn provision<J: JetStreamApi>(
    api: &J,
    config: &SessionConfig,
) -> Result<(String, bool), BridgeError> {
    let requested = config.consumer_name();

    if !config.ephemeral {
        let name = requested.ok_or_else(|| BridgeError::configuration("consumer name is required"))?;
        return Ok((name.to_string(), false));
    }

    if let Some(name) = requested {
        match api.fetch_consumer(&config.stream, name).await {
            Ok(true) => {
                debug!(stream = %config.stream, consumer = %name, "Reusing existing consumer");
                return Ok((name.to_string(), false));
            }
            Ok(false) => {}
            Err(e) => debug!(
                stream = %config.stream,
                consumer = %name,
                error = %e,
                "Consumer lookup failed, creating an ephemeral consumer"
            ),
        }
    }

    let name = api
        .create_ephemeral_consumer(&config.stream, config.filter())
        .await?;
    info!(
        stream = %config.stream,
        consumer = %name,
        filter_subject = ?config.filter(),
        "Created ephemeral consumer"
    );
    Ok((name, true))
}

/// Per-session processing context shared by in-flight messages.
struct Dispatcher<B> {
    bridge: Arc<B>,
    mode: AckMode,
    decode: DecodeOptions,
    metrics: SessionMetrics,
    stream: String,
}

async fn consume_loop<M: PulledMessage, B: EmissionBridge>(
    mut messages: MessageStream<M>,
    dispatcher: Arc<Dispatcher<B>>,
    limit: Option<usize>,
    mut shutdown: watch::Receiver<bool>,
) {
    let semaphore = limit.map(|permits| Arc::new(Semaphore::new(permits)));
    let mut in_flight = JoinSet::new();
    let mut pulls_failing = false;

    loop {
        if *shutdown.borrow() {
            break;
        }

        let permit: Option<OwnedSemaphorePermit> = match &semaphore {
            Some(semaphore) => tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    log_join_result(&dispatcher.stream, joined);
                    continue;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => Some(permit),
                    Err(_) => break,
                },
            },
            None => None,
        };

        let next = tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                log_join_result(&dispatcher.stream, joined);
                continue;
            }
            next = messages.next() => next,
        };

        match next {
            Some(Ok(message)) => {
                pulls_failing = false;
                let dispatcher = dispatcher.clone();
                in_flight.spawn(async move {
                    dispatcher.process(message).await;
                    drop(permit);
                });
            }
            Some(Err(e)) => {
                dispatcher.metrics.message_failed("pull");
                warn!(stream = %dispatcher.stream, error = %e, "Failed to pull message");
                // report once per run of failures
                if !pulls_failing {
                    pulls_failing = true;
                    dispatcher.bridge.emit_error(e);
                }
                tokio::time::sleep(PULL_ERROR_BACKOFF).await;
            }
            None => {
                warn!(stream = %dispatcher.stream, "Message subscription ended");
                dispatcher
                    .bridge
                    .emit_error(BridgeError::connection("message subscription ended"));
                break;
            }
        }
    }

    reap(&mut in_flight, &dispatcher.stream).await;
    drop(messages);
}

async fn reap(in_flight: &mut JoinSet<()>, stream: &str) {
    while let Some(joined) = in_flight.join_next().await {
        log_join_result(stream, joined);
    }
}

fn log_join_result(stream: &str, joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        log_join_error(stream, e);
    }
}

fn log_join_error(stream: &str, e: JoinError) {
    if e.is_panic() {
        error!(stream = %stream, error = %e, "Message task panicked");
    }
}

impl<B: EmissionBridge> Dispatcher<B> {
    async fn process<M: PulledMessage>(&self, message: M) {
        self.metrics.message_received();
        let mut lifecycle = MessageLifecycle::new(self.mode);

        if let Err(e) = message.mark_working().await {
            debug!(stream = %self.stream, error = %e, "Failed to mark message in progress");
        }
        lifecycle.mark_working();

        if lifecycle.acks_on_receipt() {
            if let Err(e) = message.ack().await {
                self.metrics.message_failed("ack");
                let verdict = lifecycle.decide(Outcome::Failed(e));
                self.settle(&message, &mut lifecycle, verdict).await;
                return;
            }
            lifecycle.acked_on_receipt();
            self.metrics.message_acked();
        }

        let raw = message.raw();
        debug!(stream = %self.stream, subject = %raw.subject, "Received message");

        let (completion, signal) = if self.mode.awaits_engine() {
            let (completion, signal) = Completion::channel();
            (Some(completion), Some(signal))
        } else {
            (None, None)
        };

        let dispatched = match TriggerItem::decode(&raw, &self.decode) {
            Ok(item) => self
                .bridge
                .emit(item, completion)
                .inspect_err(|_| self.metrics.message_failed("dispatch")),
            Err(e) => {
                self.metrics.message_failed("decode");
                Err(e)
            }
        };

        let mut verdict = match dispatched {
            Ok(()) => lifecycle.decide(Outcome::Dispatched),
            Err(e) => lifecycle.decide(Outcome::Failed(e)),
        };

        if let (Verdict::Await, Some(signal)) = (&verdict, signal) {
            let outcome = match signal.await {
                Ok(signal) => Outcome::Signalled(signal),
                Err(_) => Outcome::Failed(BridgeError::processing(
                    "execution ended without reporting completion",
                )),
            };
            verdict = lifecycle.decide(outcome);
        }

        self.settle(&message, &mut lifecycle, verdict).await;
    }

    async fn settle<M: PulledMessage>(
        &self,
        message: &M,
        lifecycle: &mut MessageLifecycle,
        verdict: Verdict,
    ) {
        let mut verdict = verdict;
        loop {
            verdict = match verdict {
                Verdict::Ack => match message.ack().await {
                    Ok(()) => {
                        self.metrics.message_acked();
                        return;
                    }
                    Err(e) => {
                        self.metrics.message_failed("ack");
                        lifecycle.ack_failed(e)
                    }
                },
                Verdict::Nak(error) => {
                    match message.nak().await {
                        Ok(()) => self.metrics.message_nacked(),
                        Err(e) => {
                            self.metrics.message_failed("nak");
                            warn!(stream = %self.stream, error = %e, "Failed to nak message");
                        }
                    }
                    self.bridge.emit_error(error);
                    return;
                }
                Verdict::Surface(error) => {
                    self.bridge.emit_error(error);
                    return;
                }
                Verdict::Await | Verdict::Settled => return,
            };
        }
    }
}
