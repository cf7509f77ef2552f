//! Contract between a trigger session and the workflow engine.

use crate::error::BridgeError;
use crate::jetstream::TriggerItem;
use tokio::sync::oneshot;

/// How a workflow execution ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Succeeded,
    Failed(String),
}

/// Signal delivered through a [`Completion`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionSignal {
    /// The execution started by the item finished.
    Finished(ExecutionOutcome),
    /// A later workflow step explicitly acknowledged the message.
    Acknowledged,
}

/// Single-use slot through which the engine reports back on one message.
///
/// Dropping it without signalling counts as a failure and the message is nak'd.
#[derive(Debug)]
pub struct Completion {
    tx: oneshot::Sender<CompletionSignal>,
}

impl Completion {
    pub(crate) fn channel() -> (Self, oneshot::Receiver<CompletionSignal>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Report the end of the execution.
    pub fn finish(self, outcome: ExecutionOutcome) {
        // receiver gone means the session already gave up on this message
        let _ = self.tx.send(CompletionSignal::Finished(outcome));
    }

    /// Acknowledge the message from a later workflow step.
    pub fn acknowledge(self) {
        let _ = self.tx.send(CompletionSignal::Acknowledged);
    }
}

/// Hands decoded messages to the engine.
pub trait EmissionBridge: Send + Sync + 'static {
    /// Start an execution for `item`.
    ///
    /// `completion` is present for every ack mode except `immediately`; the
    /// engine keeps it until the execution (or the acknowledging step) is done.
    /// An error means the item never reached the engine.
    fn emit(&self, item: TriggerItem, completion: Option<Completion>) -> Result<(), BridgeError>;

    /// Out-of-band failure not tied to a successful item.
    fn emit_error(&self, error: BridgeError);
}
