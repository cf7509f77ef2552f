//! In-memory fakes shared by the unit tests.

use crate::bridge::{Completion, CompletionSignal, EmissionBridge};
use crate::credentials::ConnectParams;
use crate::error::BridgeError;
use crate::jetstream::{JetStreamApi, MessageStream, Payload, PulledMessage, RawMessage, TriggerItem};
use crate::pool::{BrokerConnection, CloseSignal, Connector};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Poll `condition` until it holds, panicking after two seconds.
pub async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}

// Pool fakes

#[derive(Debug, Default)]
pub struct FakeLink {
    pub closed: AtomicBool,
    pub draining: AtomicBool,
    pub drains: AtomicUsize,
    pub on_closed: Mutex<Option<CloseSignal>>,
}

impl FakeLink {
    /// Simulate the broker closing the session.
    pub fn close_from_broker(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let signal = self.on_closed.lock().unwrap().clone();
        if let Some(signal) = signal {
            signal.notify();
        }
    }

    pub fn drain_count(&self) -> usize {
        self.drains.load(Ordering::SeqCst)
    }
}

/// Connection handed out by [`FakeConnector`]; shares state with the connector's log.
#[derive(Debug)]
pub struct FakeConnection {
    pub link: Arc<FakeLink>,
}

#[async_trait]
impl BrokerConnection for FakeConnection {
    fn is_closed(&self) -> bool {
        self.link.closed.load(Ordering::SeqCst)
    }

    fn is_draining(&self) -> bool {
        self.link.draining.load(Ordering::SeqCst)
    }

    async fn drain(&self) -> Result<(), BridgeError> {
        self.link.draining.store(true, Ordering::SeqCst);
        self.link.drains.fetch_add(1, Ordering::SeqCst);
        self.link.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ConnectorState {
    connects: AtomicUsize,
    fail: AtomicBool,
    delay_ms: AtomicUsize,
    links: Mutex<Vec<Arc<FakeLink>>>,
}

/// Counts connects; can be told to fail or to take a while.
#[derive(Debug, Clone, Default)]
pub struct FakeConnector {
    state: Arc<ConnectorState>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self, fail: bool) {
        self.state.fail.store(fail, Ordering::SeqCst);
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        self.state
            .delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
        self
    }

    /// Links in connect order.
    pub fn links(&self) -> Vec<Arc<FakeLink>> {
        self.state.links.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    type Connection = FakeConnection;

    async fn connect(
        &self,
        _params: &ConnectParams,
        on_closed: CloseSignal,
    ) -> Result<FakeConnection, BridgeError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);

        let delay = self.state.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        if self.state.fail.load(Ordering::SeqCst) {
            return Err(BridgeError::connection("connection refused"));
        }

        let link = Arc::new(FakeLink {
            on_closed: Mutex::new(Some(on_closed)),
            ..Default::default()
        });
        self.state.links.lock().unwrap().push(link.clone());
        Ok(FakeConnection { link })
    }
}

// JetStream fakes

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageEvent {
    Working,
    Ack,
    Nak,
}

/// Read side of a pushed message's acknowledgement log.
#[derive(Debug, Clone, Default)]
pub struct AckLog {
    events: Arc<Mutex<Vec<MessageEvent>>>,
}

impl AckLog {
    pub fn events(&self) -> Vec<MessageEvent> {
        self.events.lock().unwrap().clone()
    }
}

pub struct FakeMessage {
    raw: RawMessage,
    events: Arc<Mutex<Vec<MessageEvent>>>,
    fail_ack: bool,
}

impl FakeMessage {
    fn record(&self, event: MessageEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl PulledMessage for FakeMessage {
    fn raw(&self) -> RawMessage {
        self.raw.clone()
    }

    async fn mark_working(&self) -> Result<(), BridgeError> {
        self.record(MessageEvent::Working);
        Ok(())
    }

    async fn ack(&self) -> Result<(), BridgeError> {
        if self.fail_ack {
            return Err(BridgeError::processing("ack not confirmed"));
        }
        self.record(MessageEvent::Ack);
        Ok(())
    }

    async fn nak(&self) -> Result<(), BridgeError> {
        self.record(MessageEvent::Nak);
        Ok(())
    }
}

#[derive(Default)]
struct JetStreamState {
    calls: AtomicUsize,
    consumers: Mutex<HashSet<(String, String)>>,
    created: Mutex<Vec<(String, Option<String>)>>,
    deleted: Mutex<Vec<(String, String)>>,
    batches: Mutex<Vec<Option<usize>>>,
    fail_consume: AtomicBool,
    sender: Mutex<Option<mpsc::UnboundedSender<Result<FakeMessage, BridgeError>>>>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Result<FakeMessage, BridgeError>>>>,
}

/// Single-subscription in-memory JetStream.
#[derive(Clone)]
pub struct FakeJetStream {
    state: Arc<JetStreamState>,
}

impl FakeJetStream {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = JetStreamState {
            sender: Mutex::new(Some(tx)),
            receiver: Mutex::new(Some(rx)),
            ..Default::default()
        };
        Self {
            state: Arc::new(state),
        }
    }

    pub fn add_consumer(&self, stream: &str, consumer: &str) {
        self.state
            .consumers
            .lock()
            .unwrap()
            .insert((stream.to_string(), consumer.to_string()));
    }

    pub fn fail_consume(&self) {
        self.state.fail_consume.store(true, Ordering::SeqCst);
    }

    pub fn push(&self, subject: &str, payload: &[u8]) -> AckLog {
        self.push_message(subject, payload, false)
    }

    pub fn push_failing_ack(&self, subject: &str, payload: &[u8]) -> AckLog {
        self.push_message(subject, payload, true)
    }

    /// Push a message that records into an existing log.
    pub fn push_logged(&self, log: &AckLog, subject: &str, payload: &[u8]) {
        self.send_message(log, subject, payload, false);
    }

    fn push_message(&self, subject: &str, payload: &[u8], fail_ack: bool) -> AckLog {
        let log = AckLog::default();
        self.send_message(&log, subject, payload, fail_ack);
        log
    }

    fn send_message(&self, log: &AckLog, subject: &str, payload: &[u8], fail_ack: bool) {
        let message = FakeMessage {
            raw: RawMessage {
                subject: subject.to_string(),
                payload: Bytes::copy_from_slice(payload),
                ..Default::default()
            },
            events: log.events.clone(),
            fail_ack,
        };
        self.send(Ok(message));
    }

    /// Make the subscription yield a pull error.
    pub fn push_error(&self, error: &str) {
        self.send(Err(BridgeError::processing(error)));
    }

    fn send(&self, next: Result<FakeMessage, BridgeError>) {
        if let Some(sender) = self.state.sender.lock().unwrap().as_ref() {
            let _ = sender.send(next);
        }
    }

    pub fn created(&self) -> Vec<(String, Option<String>)> {
        self.state.created.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<(String, String)> {
        self.state.deleted.lock().unwrap().clone()
    }

    pub fn api_calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    /// Batch size requested by the most recent subscription.
    pub fn last_batch(&self) -> Option<usize> {
        self.state.batches.lock().unwrap().last().copied().flatten()
    }
}

#[async_trait]
impl JetStreamApi for FakeJetStream {
    type Message = FakeMessage;

    async fn fetch_consumer(&self, stream: &str, consumer: &str) -> Result<bool, BridgeError> {
        self.state.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .state
            .consumers
            .lock()
            .unwrap()
            .contains(&(stream.to_string(), consumer.to_string())))
    }

    async fn create_ephemeral_consumer(
        &self,
        stream: &str,
        filter_subject: Option<&str>,
    ) -> Result<String, BridgeError> {
        self.state.calls.fetch_add(1, Ordering::SeqCst);
        let mut created = self.state.created.lock().unwrap();
        created.push((stream.to_string(), filter_subject.map(str::to_string)));
        let name = format!("ephemeral-{}", created.len());
        self.add_consumer(stream, &name);
        Ok(name)
    }

    async fn delete_consumer(&self, stream: &str, consumer: &str) -> Result<(), BridgeError> {
        self.state.calls.fetch_add(1, Ordering::SeqCst);
        self.state
            .consumers
            .lock()
            .unwrap()
            .remove(&(stream.to_string(), consumer.to_string()));
        self.state
            .deleted
            .lock()
            .unwrap()
            .push((stream.to_string(), consumer.to_string()));
        Ok(())
    }

    async fn consume(
        &self,
        _stream: &str,
        _consumer: &str,
        max_batch: Option<usize>,
    ) -> Result<MessageStream<FakeMessage>, BridgeError> {
        self.state.calls.fetch_add(1, Ordering::SeqCst);
        self.state.batches.lock().unwrap().push(max_batch);
        if self.state.fail_consume.load(Ordering::SeqCst) {
            return Err(BridgeError::provision("consumer not found"));
        }
        let receiver = self
            .state
            .receiver
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| BridgeError::provision("already subscribed"))?;
        Ok(UnboundedReceiverStream::new(receiver).boxed())
    }
}

// Engine fake

#[derive(Default)]
struct Recorded {
    items: Vec<TriggerItem>,
    took_completion: Vec<bool>,
    pending: Vec<(TriggerItem, Completion)>,
    errors: Vec<String>,
    events_at_emit: Vec<Vec<MessageEvent>>,
}

/// Records emissions and holds completion slots until the test resolves them.
#[derive(Default)]
pub struct RecordingBridge {
    recorded: Mutex<Recorded>,
    watched: Mutex<Option<AckLog>>,
    reject: AtomicBool,
}

impl RecordingBridge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Engine that refuses every item.
    pub fn rejecting() -> Arc<Self> {
        let bridge = Self::default();
        bridge.reject.store(true, Ordering::SeqCst);
        Arc::new(bridge)
    }

    /// Snapshot `log` each time an item is emitted.
    pub fn watch(&self, log: &AckLog) {
        *self.watched.lock().unwrap() = Some(log.clone());
    }

    /// Acknowledgement log of the watched message at each emit.
    pub fn events_at_emit(&self) -> Vec<Vec<MessageEvent>> {
        self.recorded.lock().unwrap().events_at_emit.clone()
    }

    pub fn items(&self) -> Vec<TriggerItem> {
        self.recorded.lock().unwrap().items.clone()
    }

    pub fn took_completion(&self) -> Vec<bool> {
        self.recorded.lock().unwrap().took_completion.clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.recorded.lock().unwrap().errors.clone()
    }

    pub fn pending_completions(&self) -> usize {
        self.recorded.lock().unwrap().pending.len()
    }

    /// Resolve the oldest outstanding completion.
    pub fn complete_next(&self, signal: CompletionSignal) {
        let next = {
            let mut recorded = self.recorded.lock().unwrap();
            (!recorded.pending.is_empty()).then(|| recorded.pending.remove(0))
        };
        let (_, completion) = next.expect("no pending completion");
        resolve(completion, signal);
    }

    /// Resolve the completion of the item whose text payload is `text`.
    pub fn complete_payload(&self, text: &str, signal: CompletionSignal) {
        let found = {
            let mut recorded = self.recorded.lock().unwrap();
            let index = recorded
                .pending
                .iter()
                .position(|(item, _)| item.payload == Payload::Text(text.to_string()))
                .expect("no pending completion for payload");
            recorded.pending.remove(index)
        };
        resolve(found.1, signal);
    }

    /// Drop every outstanding completion without signalling.
    pub fn drop_completions(&self) {
        self.recorded.lock().unwrap().pending.clear();
    }
}

fn resolve(completion: Completion, signal: CompletionSignal) {
    match signal {
        CompletionSignal::Finished(outcome) => completion.finish(outcome),
        CompletionSignal::Acknowledged => completion.acknowledge(),
    }
}

impl EmissionBridge for RecordingBridge {
    fn emit(&self, item: TriggerItem, completion: Option<Completion>) -> Result<(), BridgeError> {
        let mut recorded = self.recorded.lock().unwrap();
        if let Some(log) = self.watched.lock().unwrap().as_ref() {
            recorded.events_at_emit.push(log.events());
        }
        if self.reject.load(Ordering::SeqCst) {
            return Err(BridgeError::processing("engine rejected the item"));
        }
        recorded.items.push(item.clone());
        recorded.took_completion.push(completion.is_some());
        if let Some(completion) = completion {
            recorded.pending.push((item, completion));
        }
        Ok(())
    }

    fn emit_error(&self, error: BridgeError) {
        self.recorded.lock().unwrap().errors.push(error.to_string());
    }
}
