use crate::api::*;
use crate::bitmap::{self, Bitmap, CommitmentHash};
use crate::chain::{Chain, JoinBatchCall};
use crate::flow::{classify, reason, Attempt, FlowError, Machine, Transitions};
use crate::settings::ChainSettings;
use log::{debug, warn};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    pub batch_id: BatchId,
    pub deposit: TokenAmount,
    pub stake_per_tick: TokenAmount,
    /// One slot per market of the batch, in market order.
    pub predictions: Vec<Option<Direction>>,
    pub market_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum JoinState {
    #[default]
    Idle,
    Encoded {
        commitment: CommitmentHash,
    },
    Approving {
        tx: Option<TxHash>,
        confirmed: bool,
    },
    Joining {
        tx: Option<TxHash>,
    },
    Done {
        tx: TxHash,
    },
    Error(FlowError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinEvent {
    Encoded(CommitmentHash),
    AllowanceSufficient,
    AllowanceInsufficient,
    ApprovalSubmitted(TxHash),
    ApprovalConfirmed(TxHash),
    JoinSubmitted(TxHash),
    JoinConfirmed(TxHash),
    Failed(FlowError),
}

impl Transitions for JoinState {
    type Event = JoinEvent;

    fn next(&self, event: &JoinEvent) -> Option<Self> {
        use JoinEvent as E;
        use JoinState as S;
        match (self, event) {
            (S::Idle, E::Encoded(commitment)) => Some(S::Encoded {
                commitment: *commitment,
            }),
            (S::Encoded { .. }, E::AllowanceSufficient) => Some(S::Joining { tx: None }),
            (S::Encoded { .. }, E::AllowanceInsufficient) => Some(S::Approving {
                tx: None,
                confirmed: false,
            }),
            (S::Approving { tx: None, .. }, E::ApprovalSubmitted(tx)) => Some(S::Approving {
                tx: Some(tx.clone()),
                confirmed: false,
            }),
            (
                S::Approving {
                    tx: Some(pending),
                    confirmed: false,
                },
                E::ApprovalConfirmed(tx),
            ) if pending == tx => Some(S::Approving {
                tx: Some(tx.clone()),
                confirmed: true,
            }),
            (S::Approving { confirmed: true, .. }, E::AllowanceSufficient) => {
                Some(S::Joining { tx: None })
            }
            (S::Joining { tx: None }, E::JoinSubmitted(tx)) => Some(S::Joining {
                tx: Some(tx.clone()),
            }),
            (S::Joining { tx: Some(pending) }, E::JoinConfirmed(tx)) if pending == tx => {
                Some(S::Done { tx: tx.clone() })
            }
            (state, E::Failed(e)) if !state.is_terminal() => Some(S::Error(e.clone())),
            _ => None,
        }
    }
    fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error(_))
    }
}

/// Commits predictions for a batch and joins it, approving the deposit token
/// first when the allowance is too low. Persisting the predictions once the
/// join is done is up to the caller.
pub struct JoinFlow {
    chain: Arc<Box<dyn Chain + Send + Sync>>,
    settings: ChainSettings,
    participant: Address,
    machine: Machine<JoinState>,
    commitment: Option<(Bitmap, CommitmentHash)>,
}

impl JoinFlow {
    pub fn new(
        chain: Arc<Box<dyn Chain + Send + Sync>>,
        settings: ChainSettings,
        participant: Address,
    ) -> Self {
        Self {
            chain,
            settings,
            participant,
            machine: Machine::default(),
            commitment: None,
        }
    }
    pub fn state(&self) -> &JoinState {
        self.machine.state()
    }
    pub fn attempt(&self) -> Attempt {
        self.machine.attempt()
    }
    pub fn commitment(&self) -> Option<&CommitmentHash> {
        self.commitment.as_ref().map(|(_, hash)| hash)
    }
    pub fn bitmap(&self) -> Option<&Bitmap> {
        self.commitment.as_ref().map(|(bitmap, _)| bitmap)
    }
    /// Feeds an externally observed receipt. Only confirmations are accepted;
    /// every other step is driven by [`JoinFlow::join`]. Returns whether it
    /// changed the state.
    pub fn notify(&mut self, attempt: Attempt, event: JoinEvent) -> bool {
        match event {
            JoinEvent::ApprovalConfirmed(_) | JoinEvent::JoinConfirmed(_) => {
                self.machine.apply(attempt, &event)
            }
            _ => {
                warn!("Ignoring {:?}, only confirmations can be fed in", event);
                false
            }
        }
    }
    pub fn reset(&mut self) -> Attempt {
        self.commitment = None;
        self.machine.reset()
    }
    /// Runs the whole flow. Ignored unless the flow is idle.
    pub async fn join(&mut self, request: &JoinRequest) -> &JoinState {
        if *self.state() != JoinState::Idle {
            warn!("Join requested in state {:?}, reset first", self.state());
            return self.state();
        }
        let attempt = self.attempt();
        if let Err(e) = self.run(attempt, request).await {
            warn!("Join of batch {} failed: {}", request.batch_id, e);
            self.machine.apply(attempt, &JoinEvent::Failed(e));
        }
        self.state()
    }

    async fn run(&mut self, attempt: Attempt, request: &JoinRequest) -> Result<(), FlowError> {
        let expected = self.settings.chain_id;
        let actual = self
            .chain
            .chain_id()
            .await
            .map_err(|e| FlowError::JoinFailed(reason(&e)))?;
        if actual != expected {
            return Err(FlowError::ChainSwitchRequired { expected, actual });
        }

        let bitmap = bitmap::encode(&request.predictions, request.market_count);
        let commitment = bitmap::hash(&bitmap);
        debug!(
            "Batch {} commitment {} for bitmap {}",
            request.batch_id,
            commitment,
            bitmap.to_hex()
        );
        self.commitment = Some((bitmap, commitment));
        self.machine.apply(attempt, &JoinEvent::Encoded(commitment));

        let allowance = self.allowance().await?;
        if allowance < request.deposit {
            self.machine
                .apply(attempt, &JoinEvent::AllowanceInsufficient);
            self.approve(attempt, request.deposit).await?;
        }
        self.machine.apply(attempt, &JoinEvent::AllowanceSufficient);

        let call = JoinBatchCall {
            batch_id: request.batch_id,
            deposit: request.deposit,
            stake_per_tick: request.stake_per_tick,
            commitment,
        };
        let tx = self
            .chain
            .join_batch(&call)
            .await
            .map_err(|e| classify(&e, FlowError::JoinRejected, FlowError::JoinFailed))?;
        self.machine
            .apply(attempt, &JoinEvent::JoinSubmitted(tx.clone()));
        let receipt = self
            .chain
            .wait_for_receipt(&tx)
            .await
            .map_err(|e| FlowError::JoinFailed(reason(&e)))?;
        if !receipt.success {
            return Err(FlowError::JoinFailed(format!("transaction {} reverted", tx)));
        }
        debug!("Joined batch {} in {}", request.batch_id, tx);
        self.machine.apply(attempt, &JoinEvent::JoinConfirmed(tx));
        Ok(())
    }

    async fn approve(&mut self, attempt: Attempt, deposit: TokenAmount) -> Result<(), FlowError> {
        let amount = deposit.saturating_mul(self.settings.approval_multiplier.max(1) as TokenAmount);
        let tx = self
            .chain
            .approve(&self.settings.pool_contract, amount)
            .await
            .map_err(|e| classify(&e, FlowError::ApprovalRejected, FlowError::ApprovalFailed))?;
        self.machine
            .apply(attempt, &JoinEvent::ApprovalSubmitted(tx.clone()));
        let receipt = self
            .chain
            .wait_for_receipt(&tx)
            .await
            .map_err(|e| FlowError::ApprovalFailed(reason(&e)))?;
        if !receipt.success {
            return Err(FlowError::ApprovalFailed(format!(
                "transaction {} reverted",
                tx
            )));
        }
        self.machine
            .apply(attempt, &JoinEvent::ApprovalConfirmed(tx));
        let allowance = self.allowance().await?;
        if allowance < deposit {
            return Err(FlowError::ApprovalFailed(format!(
                "allowance {} still below deposit {}",
                allowance, deposit
            )));
        }
        Ok(())
    }
    async fn allowance(&self) -> Result<TokenAmount, FlowError> {
        self.chain
            .allowance(&self.participant, &self.settings.pool_contract)
            .await
            .map_err(|e| FlowError::ApprovalFailed(reason(&e)))
    }
}
