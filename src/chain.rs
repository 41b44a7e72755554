use crate::api::*;
use crate::bitmap::CommitmentHash;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex};

/// `joinBatch(batchId, depositAmount, stakePerTick, commitmentHash)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinBatchCall {
    pub batch_id: BatchId,
    pub deposit: TokenAmount,
    pub stake_per_tick: TokenAmount,
    pub commitment: CommitmentHash,
}

/// `claimRewards(batchId, fromTick, toTick, balance, signature)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimRewardsCall {
    pub batch_id: BatchId,
    pub from_tick: TickId,
    pub to_tick: TickId,
    pub balance: String,
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    pub success: bool,
}

/// The wallet refused to sign. Chain implementations return this (possibly
/// wrapped in context) so flows can tell a declined prompt from a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalletRejected;
impl Display for WalletRejected {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "user rejected the request")
    }
}
impl std::error::Error for WalletRejected {}

/// Wallet + RPC access for the participant's account.
#[async_trait]
pub trait Chain {
    async fn chain_id(&self) -> Result<u64>;
    async fn allowance(&self, owner: &Address, spender: &Address) -> Result<TokenAmount>;
    async fn approve(&self, spender: &Address, amount: TokenAmount) -> Result<TxHash>;
    async fn join_batch(&self, call: &JoinBatchCall) -> Result<TxHash>;
    async fn claim_rewards(&self, call: &ClaimRewardsCall) -> Result<TxHash>;
    async fn wait_for_receipt(&self, tx: &TxHash) -> Result<Receipt>;
}

/// Which submission a [`TestChain`] should refuse or revert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestCall {
    Approve,
    Join,
    Claim,
}
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestFailure {
    Reject,
    Error,
    Revert,
}

#[derive(Debug, Default)]
struct TestChainState {
    chain_id: u64,
    allowances: HashMap<(Address, Address), TokenAmount>,
    pending_approvals: HashMap<TxHash, (Address, TokenAmount)>,
    receipts: HashMap<TxHash, Receipt>,
    failures: HashMap<TestCall, TestFailure>,
    joins: Vec<JoinBatchCall>,
    claims: Vec<ClaimRewardsCall>,
    approvals: Vec<TokenAmount>,
    next_tx: u64,
}

/// In-memory chain. Approvals only raise the allowance once their receipt is awaited.
#[derive(Debug, Default, Clone)]
pub struct TestChain {
    owner: Address,
    state: Arc<Mutex<TestChainState>>,
}
impl TestChain {
    pub fn new(chain_id: u64, owner: impl Into<Address>) -> Self {
        let chain = Self {
            owner: owner.into(),
            state: Default::default(),
        };
        chain.with_state(|s| s.chain_id = chain_id);
        chain
    }
    pub fn set_chain_id(&self, chain_id: u64) {
        self.with_state(|s| s.chain_id = chain_id);
    }
    pub fn set_allowance(&self, spender: &str, amount: TokenAmount) {
        let owner = self.owner.clone();
        self.with_state(|s| {
            s.allowances.insert((owner, spender.to_string()), amount);
        });
    }
    pub fn fail(&self, call: TestCall, failure: TestFailure) {
        self.with_state(|s| {
            s.failures.insert(call, failure);
        });
    }
    pub fn joins(&self) -> Vec<JoinBatchCall> {
        self.with_state(|s| s.joins.clone())
    }
    pub fn claims(&self) -> Vec<ClaimRewardsCall> {
        self.with_state(|s| s.claims.clone())
    }
    pub fn approvals(&self) -> Vec<TokenAmount> {
        self.with_state(|s| s.approvals.clone())
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut TestChainState) -> T) -> T {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut state)
    }
    fn submit(&self, call: TestCall) -> Result<TxHash> {
        self.with_state(|s| {
            s.next_tx += 1;
            let tx = format!("0x{:064x}", s.next_tx);
            let success = match s.failures.get(&call) {
                Some(TestFailure::Reject) => return Err(WalletRejected.into()),
                Some(TestFailure::Error) => return Err(anyhow!("execution reverted: {:?}", call)),
                Some(TestFailure::Revert) => false,
                None => true,
            };
            s.receipts.insert(tx.clone(), Receipt { success });
            Ok(tx)
        })
    }
}
#[async_trait]
impl Chain for TestChain {
    async fn chain_id(&self) -> Result<u64> {
        Ok(self.with_state(|s| s.chain_id))
    }
    async fn allowance(&self, owner: &Address, spender: &Address) -> Result<TokenAmount> {
        Ok(self.with_state(|s| {
            s.allowances
                .get(&(owner.clone(), spender.clone()))
                .copied()
                .unwrap_or(0)
        }))
    }
    async fn approve(&self, spender: &Address, amount: TokenAmount) -> Result<TxHash> {
        let tx = self.submit(TestCall::Approve)?;
        self.with_state(|s| {
            s.approvals.push(amount);
            s.pending_approvals
                .insert(tx.clone(), (spender.clone(), amount));
        });
        Ok(tx)
    }
    async fn join_batch(&self, call: &JoinBatchCall) -> Result<TxHash> {
        let tx = self.submit(TestCall::Join)?;
        self.with_state(|s| s.joins.push(call.clone()));
        Ok(tx)
    }
    async fn claim_rewards(&self, call: &ClaimRewardsCall) -> Result<TxHash> {
        let tx = self.submit(TestCall::Claim)?;
        self.with_state(|s| s.claims.push(call.clone()));
        Ok(tx)
    }
    async fn wait_for_receipt(&self, tx: &TxHash) -> Result<Receipt> {
        let owner = self.owner.clone();
        self.with_state(|s| {
            let receipt = match s.receipts.get(tx) {
                Some(receipt) => *receipt,
                None => bail!("unknown transaction {}", tx),
            };
            if let Some((spender, amount)) = s.pending_approvals.remove(tx) {
                if receipt.success {
                    s.allowances.insert((owner, spender), amount);
                }
            }
            Ok(receipt)
        })
    }
}
