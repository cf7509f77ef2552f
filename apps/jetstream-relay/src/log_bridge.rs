//! Stand-in for a workflow engine: every item is logged and completed at once.

use nats_bridge::{
    AckMode, BridgeError, Completion, CompletionSignal, EmissionBridge, ExecutionOutcome,
    TriggerItem,
};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

#[derive(Debug, Default)]
pub struct LogBridge {
    only_content: bool,
    mode: AckMode,
    received: AtomicU64,
    failures: AtomicU64,
}

impl LogBridge {
    pub fn new(only_content: bool, mode: AckMode) -> Self {
        Self {
            only_content,
            mode,
            ..Default::default()
        }
    }

    /// Signal that settles a logged item with an ack under the session's mode.
    ///
    /// `laterMessageNode` only acks on an explicit acknowledgement.
    pub fn completion_signal(&self) -> CompletionSignal {
        match self.mode {
            AckMode::LaterMessageNode => CompletionSignal::Acknowledged,
            _ => CompletionSignal::Finished(ExecutionOutcome::Succeeded),
        }
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

impl EmissionBridge for LogBridge {
    fn emit(&self, item: TriggerItem, completion: Option<Completion>) -> Result<(), BridgeError> {
        let seq = self.received.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            seq,
            subject = %item.subject,
            item = %item.to_json(self.only_content),
            "Received message"
        );

        if let Some(completion) = completion {
            match self.completion_signal() {
                CompletionSignal::Finished(outcome) => completion.finish(outcome),
                CompletionSignal::Acknowledged => completion.acknowledge(),
            }
        }
        Ok(())
    }

    fn emit_error(&self, error: BridgeError) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        warn!(error = %error, "Trigger reported an error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nats_bridge::jetstream::{MessageLifecycle, Outcome, Verdict};
    use nats_bridge::Payload;

    fn item() -> TriggerItem {
        TriggerItem {
            subject: "orders.created".to_string(),
            reply: None,
            headers: Default::default(),
            payload: Payload::Text("hello".to_string()),
        }
    }

    #[test]
    fn test_emit_counts_items() {
        let bridge = LogBridge::new(false, AckMode::Immediately);
        bridge.emit(item(), None).unwrap();
        bridge.emit(item(), None).unwrap();

        assert_eq!(bridge.received(), 2);
        assert_eq!(bridge.failures(), 0);
    }

    #[test]
    fn test_emit_error_counts_failures() {
        let bridge = LogBridge::new(true, AckMode::Immediately);
        bridge.emit_error(BridgeError::processing("bad payload"));

        assert_eq!(bridge.failures(), 1);
    }

    #[test]
    fn test_completion_acks_in_every_waiting_mode() {
        for mode in [
            AckMode::ExecutionFinishes,
            AckMode::ExecutionFinishesSuccessfully,
            AckMode::LaterMessageNode,
        ] {
            let bridge = LogBridge::new(false, mode);
            let mut lifecycle = MessageLifecycle::new(mode);
            lifecycle.mark_working();

            assert!(matches!(lifecycle.decide(Outcome::Dispatched), Verdict::Await));
            let verdict = lifecycle.decide(Outcome::Signalled(bridge.completion_signal()));
            assert!(matches!(verdict, Verdict::Ack), "mode {} should ack", mode);
        }
    }

    #[test]
    fn test_later_message_node_acknowledges() {
        let bridge = LogBridge::new(false, AckMode::LaterMessageNode);
        assert_eq!(bridge.completion_signal(), CompletionSignal::Acknowledged);
    }
}
