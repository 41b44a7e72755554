use crate::api::{map_any_err, truncate_reason, MAX_REASON_LEN};
use crate::chain::WalletRejected;
use log::{debug, trace};
use thiserror::Error;
use std::fmt::Debug;

/// Terminal failure of a join or claim attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    #[error("approval rejected in wallet")]
    ApprovalRejected,
    #[error("approval failed: {0}")]
    ApprovalFailed(String),
    #[error("join rejected in wallet")]
    JoinRejected,
    #[error("join failed: {0}")]
    JoinFailed(String),
    #[error("claim rejected in wallet")]
    ClaimRejected,
    #[error("claim failed: {0}")]
    ClaimFailed(String),
    #[error("no issuer returned a proof: {0}")]
    ProofUnavailable(String),
    #[error("wallet is on chain {actual}, switch to chain {expected}")]
    ChainSwitchRequired { expected: u64, actual: u64 },
}
impl FlowError {
    /// True when the user declined a wallet prompt and may simply try again.
    pub fn is_user_rejection(&self) -> bool {
        matches!(
            self,
            Self::ApprovalRejected | Self::JoinRejected | Self::ClaimRejected
        )
    }
}

/// Whether the wallet reported that the user declined the request.
pub fn is_user_rejection(e: &anyhow::Error) -> bool {
    if e.chain().any(|cause| cause.is::<WalletRejected>()) {
        return true;
    }
    let message = map_any_err(e).to_lowercase();
    message.contains("user rejected")
        || message.contains("user denied")
        || message.contains("code: 4001")
        || message.contains("code=4001")
        || message.contains("\"code\":4001")
}

/// Error message bounded for display.
pub fn reason(e: &anyhow::Error) -> String {
    truncate_reason(&map_any_err(e), MAX_REASON_LEN)
}

/// `rejected` if the wallet declined, otherwise `failed` with the bounded reason.
pub fn classify(
    e: &anyhow::Error,
    rejected: FlowError,
    failed: fn(String) -> FlowError,
) -> FlowError {
    if is_user_rejection(e) {
        rejected
    } else {
        failed(reason(e))
    }
}

/// Identifies one run of a flow, from start until `reset()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Attempt(u64);

/// A flow state with its transition table.
pub trait Transitions: Sized + Clone + Debug + Default {
    type Event: Debug;
    /// Successor state for `event`, or `None` if the event doesn't apply here.
    fn next(&self, event: &Self::Event) -> Option<Self>;
    fn is_terminal(&self) -> bool;
}

/// Current state and attempt of a flow. Every event goes through [`Machine::apply`],
/// so a confirmation that was already acted on, or that belongs to a reset
/// attempt, is dropped here.
#[derive(Debug, Default)]
pub struct Machine<S> {
    state: S,
    attempt: Attempt,
}
impl<S: Transitions> Machine<S> {
    pub fn state(&self) -> &S {
        &self.state
    }
    pub fn attempt(&self) -> Attempt {
        self.attempt
    }
    pub fn apply(&mut self, attempt: Attempt, event: &S::Event) -> bool {
        if attempt != self.attempt {
            debug!("Ignoring {:?} from stale attempt {:?}", event, attempt);
            return false;
        }
        match self.state.next(event) {
            Some(next) => {
                trace!("{:?} --{:?}--> {:?}", self.state, event, next);
                self.state = next;
                true
            }
            None => {
                debug!("Ignoring {:?} in state {:?}", event, self.state);
                false
            }
        }
    }
    /// Back to the initial state under a new attempt id.
    pub fn reset(&mut self) -> Attempt {
        self.attempt = Attempt(self.attempt.0 + 1);
        self.state = S::default();
        self.attempt
    }
}
