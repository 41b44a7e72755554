use crate::api::*;
use crate::chain::{Chain, ClaimRewardsCall};
use crate::client::ProofRetriever;
use crate::flow::{classify, reason, Attempt, FlowError, Machine, Transitions};
use crate::settings::ChainSettings;
use log::{debug, warn};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ClaimState {
    #[default]
    Idle,
    FetchingProof,
    Claiming {
        tx: Option<TxHash>,
    },
    Done {
        tx: TxHash,
    },
    Error(FlowError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimEvent {
    Started,
    ProofFetched,
    ClaimSubmitted(TxHash),
    ClaimConfirmed(TxHash),
    Failed(FlowError),
}

impl Transitions for ClaimState {
    type Event = ClaimEvent;

    fn next(&self, event: &ClaimEvent) -> Option<Self> {
        use ClaimEvent as E;
        use ClaimState as S;
        match (self, event) {
            (S::Idle, E::Started) => Some(S::FetchingProof),
            (S::FetchingProof, E::ProofFetched) => Some(S::Claiming { tx: None }),
            (S::Claiming { tx: None }, E::ClaimSubmitted(tx)) => Some(S::Claiming {
                tx: Some(tx.clone()),
            }),
            (S::Claiming { tx: Some(pending) }, E::ClaimConfirmed(tx)) if pending == tx => {
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

/// Claims a tick range's rewards with a proof from the issuers.
pub struct ClaimFlow {
    chain: Arc<Box<dyn Chain + Send + Sync>>,
    retriever: Arc<ProofRetriever>,
    settings: ChainSettings,
    participant: Address,
    machine: Machine<ClaimState>,
    proof: Option<ClaimProof>,
}

impl ClaimFlow {
    pub fn new(
        chain: Arc<Box<dyn Chain + Send + Sync>>,
        retriever: Arc<ProofRetriever>,
        settings: ChainSettings,
        participant: Address,
    ) -> Self {
        Self {
            chain,
            retriever,
            settings,
            participant,
            machine: Machine::default(),
            proof: None,
        }
    }
    pub fn state(&self) -> &ClaimState {
        self.machine.state()
    }
    pub fn attempt(&self) -> Attempt {
        self.machine.attempt()
    }
    pub fn proof(&self) -> Option<&ClaimProof> {
        self.proof.as_ref()
    }
    /// Feeds an externally observed claim receipt. Other events are ignored.
    pub fn notify(&mut self, attempt: Attempt, event: ClaimEvent) -> bool {
        if !matches!(event, ClaimEvent::ClaimConfirmed(_)) {
            warn!("Ignoring {:?}, only confirmations can be fed in", event);
            return false;
        }
        self.machine.apply(attempt, &event)
    }
    pub fn reset(&mut self) -> Attempt {
        self.proof = None;
        self.machine.reset()
    }
    /// Runs the whole flow. Ignored unless the flow is idle.
    pub async fn claim(
        &mut self,
        batch_id: BatchId,
        from_tick: TickId,
        to_tick: TickId,
    ) -> &ClaimState {
        if *self.state() != ClaimState::Idle {
            warn!("Claim requested in state {:?}, reset first", self.state());
            return self.state();
        }
        let attempt = self.attempt();
        if let Err(e) = self.run(attempt, batch_id, from_tick, to_tick).await {
            warn!("Claim for batch {} failed: {}", batch_id, e);
            self.machine.apply(attempt, &ClaimEvent::Failed(e));
        }
        self.state()
    }

    async fn run(
        &mut self,
        attempt: Attempt,
        batch_id: BatchId,
        from_tick: TickId,
        to_tick: TickId,
    ) -> Result<(), FlowError> {
        let expected = self.settings.chain_id;
        let actual = self
            .chain
            .chain_id()
            .await
            .map_err(|e| FlowError::ClaimFailed(reason(&e)))?;
        if actual != expected {
            return Err(FlowError::ChainSwitchRequired { expected, actual });
        }

        self.machine.apply(attempt, &ClaimEvent::Started);
        let proof = self
            .retriever
            .fetch_proof(batch_id, &self.participant, from_tick, to_tick)
            .await
            .map_err(|e| FlowError::ProofUnavailable(e.to_string()))?;
        let call = ClaimRewardsCall {
            batch_id,
            from_tick,
            to_tick,
            balance: proof.balance.clone(),
            signature: proof.signature.clone(),
        };
        self.proof = Some(proof);
        self.machine.apply(attempt, &ClaimEvent::ProofFetched);

        let tx = self
            .chain
            .claim_rewards(&call)
            .await
            .map_err(|e| classify(&e, FlowError::ClaimRejected, FlowError::ClaimFailed))?;
        self.machine
            .apply(attempt, &ClaimEvent::ClaimSubmitted(tx.clone()));
        let receipt = self
            .chain
            .wait_for_receipt(&tx)
            .await
            .map_err(|e| FlowError::ClaimFailed(reason(&e)))?;
        if !receipt.success {
            return Err(FlowError::ClaimFailed(format!("transaction {} reverted", tx)));
        }
        debug!(
            "Claimed {} for batch {} ticks {}..{} in {}",
            call.balance, batch_id, call.from_tick, call.to_tick, tx
        );
        self.machine.apply(attempt, &ClaimEvent::ClaimConfirmed(tx));
        Ok(())
    }
}
