//! Per-message acknowledgement state machine.
//!
//! ```text
//!  Received ─▶ MarkedWorking ─┬─(immediately)─▶ ImmediatelyAcked ─▶ dispatch
//!                             ├─(execution*)──▶ dispatch ─▶ AwaitingEngineCompletion ─▶ Acked | Nacked
//!                             └─(laterNode)───▶ dispatch ─▶ AwaitingExplicitAck ──────▶ Acked | Nacked
//! ```

use super::config::AckMode;
use crate::bridge::{CompletionSignal, ExecutionOutcome};
use crate::error::BridgeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    Received,
    MarkedWorking,
    ImmediatelyAcked,
    AwaitingEngineCompletion,
    AwaitingExplicitAck,
    Acked,
    Nacked,
}

impl MessageState {
    /// No further broker acknowledgement will be issued.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MessageState::ImmediatelyAcked | MessageState::Acked | MessageState::Nacked
        )
    }
}

/// Something that happened to a message after it was marked working.
#[derive(Debug)]
pub enum Outcome {
    /// The item reached the engine.
    Dispatched,
    /// The engine reported back through the completion slot.
    Signalled(CompletionSignal),
    /// Decoding, dispatch, or an earlier ack failed, or the slot was dropped.
    Failed(BridgeError),
}

/// What the session must do next.
#[derive(Debug)]
pub enum Verdict {
    /// Wait for the engine's completion signal.
    Await,
    /// Double-ack the message.
    Ack,
    /// Nak the message and report the error.
    Nak(BridgeError),
    /// Report the error; the message was already acknowledged.
    Surface(BridgeError),
    /// Nothing left to do.
    Settled,
}

/// Tracks one message from receipt to its final acknowledgement.
#[derive(Debug, Clone)]
pub struct MessageLifecycle {
    mode: AckMode,
    state: MessageState,
}

impl MessageLifecycle {
    pub fn new(mode: AckMode) -> Self {
        Self {
            mode,
            state: MessageState::Received,
        }
    }

    pub fn mode(&self) -> AckMode {
        self.mode
    }

    pub fn state(&self) -> MessageState {
        self.state
    }

    /// The ack deadline was extended.
    pub fn mark_working(&mut self) {
        if self.state == MessageState::Received {
            self.state = MessageState::MarkedWorking;
        }
    }

    /// Whether the message must be acked before it is dispatched.
    pub fn acks_on_receipt(&self) -> bool {
        self.mode == AckMode::Immediately && !self.state.is_terminal()
    }

    /// The receipt ack went through.
    pub fn acked_on_receipt(&mut self) {
        self.state = MessageState::ImmediatelyAcked;
    }

    /// Apply an outcome and return the required action.
    pub fn decide(&mut self, outcome: Outcome) -> Verdict {
        if matches!(self.state, MessageState::Acked | MessageState::Nacked) {
            return Verdict::Settled;
        }

        match self.mode {
            AckMode::Immediately => match outcome {
                Outcome::Failed(error) => Verdict::Surface(error),
                Outcome::Dispatched | Outcome::Signalled(_) => Verdict::Settled,
            },
            AckMode::ExecutionFinishes => match outcome {
                Outcome::Dispatched => self.wait(MessageState::AwaitingEngineCompletion),
                Outcome::Signalled(_) => self.ack(),
                Outcome::Failed(error) => self.nak(error),
            },
            AckMode::ExecutionFinishesSuccessfully => match outcome {
                Outcome::Dispatched => self.wait(MessageState::AwaitingEngineCompletion),
                Outcome::Signalled(CompletionSignal::Finished(ExecutionOutcome::Succeeded))
                | Outcome::Signalled(CompletionSignal::Acknowledged) => self.ack(),
                Outcome::Signalled(CompletionSignal::Finished(ExecutionOutcome::Failed(reason))) => {
                    self.nak(BridgeError::processing(reason))
                }
                Outcome::Failed(error) => self.nak(error),
            },
            AckMode::LaterMessageNode => match outcome {
                Outcome::Dispatched => self.wait(MessageState::AwaitingExplicitAck),
                Outcome::Signalled(CompletionSignal::Acknowledged) => self.ack(),
                Outcome::Signalled(CompletionSignal::Finished(ExecutionOutcome::Succeeded)) => self
                    .nak(BridgeError::processing(
                        "execution finished without acknowledging the message",
                    )),
                Outcome::Signalled(CompletionSignal::Finished(ExecutionOutcome::Failed(reason))) => {
                    self.nak(BridgeError::processing(reason))
                }
                Outcome::Failed(error) => self.nak(error),
            },
        }
    }

    /// The ack chosen by [`decide`](Self::decide) was rejected by the broker.
    pub fn ack_failed(&mut self, error: BridgeError) -> Verdict {
        self.nak(error)
    }

    fn wait(&mut self, state: MessageState) -> Verdict {
        self.state = state;
        Verdict::Await
    }

    fn ack(&mut self) -> Verdict {
        self.state = MessageState::Acked;
        Verdict::Ack
    }

    fn nak(&mut self, error: BridgeError) -> Verdict {
        self.state = MessageState::Nacked;
        Verdict::Nak(error)
    }
}
