//! Mock chain for testing
//!
//! Keeps share balances, one asset token, and allowances in memory.
//! Every submission is recorded in order, and outcomes can be scripted per
//! transaction kind (wallet rejection, on-chain revert, pending polls).

use async_trait::async_trait;
use ethers::types::{Address, TxHash, U256};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::traits::{TransactionSubmitter, VaultClient};
use crate::transfer::error::TransferError;
use crate::transfer::types::{TxHandle, TxKind, TxStatus};

/// A transaction that reached the mock chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub kind: TxKind,
    pub vault: Address,
    pub amount: U256,
    pub hash: TxHash,
}

#[derive(Debug, Clone)]
enum Script {
    /// Wallet refuses to sign; nothing is broadcast
    Reject(String),
    /// Broadcast, then reverts
    Revert(String),
}

#[derive(Debug)]
struct MockTx {
    pending_polls: u32,
    outcome: TxStatus,
}

#[derive(Default)]
struct ChainState {
    shares: HashMap<(Address, Address), U256>,
    assets: HashMap<Address, U256>,
    allowances: HashMap<(Address, Address), U256>,
    redeem_fee_bps: HashMap<Address, u64>,
    scripts: HashMap<TxKind, VecDeque<Script>>,
    txs: HashMap<TxHash, MockTx>,
    submissions: Vec<Submission>,
    pending_polls: u32,
    allowance_failures: VecDeque<String>,
    hide_redeem_assets: bool,
    next_nonce: u64,
}

/// In-memory chain shared by all `MockVault`s it hands out
pub struct MockChain {
    asset: Address,
    state: Mutex<ChainState>,
}

impl MockChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            asset: Address::from_low_u64_be(0xa55e7),
            state: Mutex::new(ChainState::default()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Client for `vault`, signing as `caller`
    pub fn vault(self: &Arc<Self>, vault: Address, caller: Address) -> Arc<MockVault> {
        Arc::new(MockVault {
            address: vault,
            caller,
            chain: self.clone(),
        })
    }

    pub fn set_shares(&self, vault: Address, account: Address, shares: U256) {
        self.lock().shares.insert((vault, account), shares);
    }

    pub fn shares(&self, vault: Address, account: Address) -> U256 {
        self.lock().shares.get(&(vault, account)).copied().unwrap_or_default()
    }

    pub fn asset_balance(&self, account: Address) -> U256 {
        self.lock().assets.get(&account).copied().unwrap_or_default()
    }

    pub fn set_allowance(&self, owner: Address, spender: Address, amount: U256) {
        self.lock().allowances.insert((owner, spender), amount);
    }

    pub fn allowance_of(&self, owner: Address, spender: Address) -> U256 {
        self.lock().allowances.get(&(owner, spender)).copied().unwrap_or_default()
    }

    /// Withdrawal fee the vault keeps on redeem
    pub fn set_redeem_fee_bps(&self, vault: Address, bps: u64) {
        self.lock().redeem_fee_bps.insert(vault, bps);
    }

    /// Number of `Pending` polls each new transaction reports before its outcome
    pub fn set_pending_polls(&self, polls: u32) {
        self.lock().pending_polls = polls;
    }

    /// Let every pending transaction report its outcome on the next poll
    pub fn mine_all(&self) {
        for tx in self.lock().txs.values_mut() {
            tx.pending_polls = 0;
        }
    }

    /// The next allowance read fails with an RPC error
    pub fn fail_next_allowance(&self, reason: &str) {
        self.lock().allowance_failures.push_back(reason.to_string());
    }

    /// Confirm redeems without reporting the assets paid out, like a
    /// receipt missing its `Withdraw` event
    pub fn hide_redeem_assets(&self, hide: bool) {
        self.lock().hide_redeem_assets = hide;
    }

    /// The next `kind` submission is refused by the wallet
    pub fn reject_next(&self, kind: TxKind, reason: &str) {
        self.push_script(kind, Script::Reject(reason.to_string()));
    }

    /// The next `kind` submission is broadcast and reverts
    pub fn revert_next(&self, kind: TxKind, reason: &str) {
        self.push_script(kind, Script::Revert(reason.to_string()));
    }

    fn push_script(&self, kind: TxKind, script: Script) {
        self.lock().scripts.entry(kind).or_default().push_back(script);
    }

    /// All broadcast transactions, in submission order
    pub fn submissions(&self) -> Vec<Submission> {
        self.lock().submissions.clone()
    }

    pub fn submitted_kinds(&self) -> Vec<TxKind> {
        self.lock().submissions.iter().map(|s| s.kind).collect()
    }

    pub fn count(&self, kind: TxKind) -> usize {
        self.lock().submissions.iter().filter(|s| s.kind == kind).count()
    }

    fn submit<F>(&self, kind: TxKind, vault: Address, amount: U256, apply: F) -> Result<TxHandle, TransferError>
    where
        F: FnOnce(&mut ChainState) -> Result<Option<U256>, String>,
    {
        let mut state = self.lock();

        let script = state.scripts.get_mut(&kind).and_then(|q| q.pop_front());
        if let Some(Script::Reject(reason)) = &script {
            log::debug!("[mock] {} rejected by wallet: {}", kind, reason);
            return Err(TransferError::Submission(reason.clone()));
        }

        state.next_nonce += 1;
        let hash = TxHash::from_low_u64_be(state.next_nonce);

        let outcome = match script {
            Some(Script::Revert(reason)) => TxStatus::Failed(reason),
            _ => match apply(&mut *state) {
                Ok(assets) => TxStatus::Confirmed { assets },
                Err(reason) => TxStatus::Failed(reason),
            },
        };
        log::debug!("[mock] {} {:?} amount={} -> {:?}", kind, hash, amount, outcome);

        let pending_polls = state.pending_polls;
        state.txs.insert(hash, MockTx { pending_polls, outcome });
        state.submissions.push(Submission {
            kind,
            vault,
            amount,
            hash,
        });

        Ok(TxHandle { hash, kind })
    }
}

#[async_trait]
impl TransactionSubmitter for MockChain {
    async fn status(&self, tx: &TxHandle) -> Result<TxStatus, TransferError> {
        let mut state = self.lock();
        let mock = state
            .txs
            .get_mut(&tx.hash)
            .ok_or_else(|| TransferError::Rpc(format!("unknown transaction {:?}", tx.hash)))?;

        if mock.pending_polls > 0 {
            mock.pending_polls -= 1;
            return Ok(TxStatus::Pending);
        }
        Ok(mock.outcome.clone())
    }
}

/// One vault on a `MockChain`
pub struct MockVault {
    address: Address,
    caller: Address,
    chain: Arc<MockChain>,
}

#[async_trait]
impl VaultClient for MockVault {
    fn address(&self) -> Address {
        self.address
    }

    async fn asset_address(&self) -> Result<Address, TransferError> {
        Ok(self.chain.asset)
    }

    async fn balance_of(&self, account: Address) -> Result<U256, TransferError> {
        Ok(self.chain.shares(self.address, account))
    }

    async fn allowance(&self, owner: Address, spender: Address) -> Result<U256, TransferError> {
        if let Some(reason) = self.chain.lock().allowance_failures.pop_front() {
            log::debug!("[mock] allowance read failed: {}", reason);
            return Err(TransferError::Rpc(reason));
        }
        Ok(self.chain.allowance_of(owner, spender))
    }

    async fn submit_approve(&self, spender: Address, amount: U256) -> Result<TxHandle, TransferError> {
        let owner = self.caller;
        self.chain.submit(TxKind::Approve, self.address, amount, |state| {
            state.allowances.insert((owner, spender), amount);
            Ok(None)
        })
    }

    async fn submit_redeem(
        &self,
        shares: U256,
        receiver: Address,
        owner: Address,
    ) -> Result<TxHandle, TransferError> {
        let vault = self.address;
        self.chain.submit(TxKind::Redeem, vault, shares, |state| {
            let held = state.shares.get(&(vault, owner)).copied().unwrap_or_default();
            if shares > held {
                return Err("ERC4626: redeem more than max".to_string());
            }
            let fee_bps = state.redeem_fee_bps.get(&vault).copied().unwrap_or(0);
            let fee = shares * U256::from(fee_bps) / U256::from(10_000u64);
            let assets = shares - fee;

            state.shares.insert((vault, owner), held - shares);
            *state.assets.entry(receiver).or_default() += assets;
            Ok((!state.hide_redeem_assets).then_some(assets))
        })
    }

    async fn submit_deposit(&self, assets: U256, receiver: Address) -> Result<TxHandle, TransferError> {
        let vault = self.address;
        let caller = self.caller;
        self.chain.submit(TxKind::Deposit, vault, assets, |state| {
            let allowed = state.allowances.get(&(caller, vault)).copied().unwrap_or_default();
            if assets > allowed {
                return Err("ERC20: insufficient allowance".to_string());
            }
            let held = state.assets.get(&caller).copied().unwrap_or_default();
            if assets > held {
                return Err("ERC20: transfer amount exceeds balance".to_string());
            }

            state.allowances.insert((caller, vault), allowed - assets);
            state.assets.insert(caller, held - assets);
            *state.shares.entry((vault, receiver)).or_default() += assets;
            Ok(None)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    #[tokio::test]
    async fn test_redeem_credits_assets_minus_fee() {
        let chain = MockChain::new();
        let wallet = addr(100);
        let vault = chain.vault(addr(1), wallet);
        chain.set_shares(addr(1), wallet, U256::from(1000u64));
        chain.set_redeem_fee_bps(addr(1), 200);

        let tx = vault.submit_redeem(U256::from(500u64), wallet, wallet).await.unwrap();
        let status = chain.status(&tx).await.unwrap();

        assert_eq!(status, TxStatus::Confirmed { assets: Some(U256::from(490u64)) });
        assert_eq!(chain.asset_balance(wallet), U256::from(490u64));
        assert_eq!(chain.shares(addr(1), wallet), U256::from(500u64));
    }

    #[tokio::test]
    async fn test_deposit_without_allowance_reverts() {
        let chain = MockChain::new();
        let wallet = addr(100);
        let vault = chain.vault(addr(2), wallet);

        let tx = vault.submit_deposit(U256::from(10u64), wallet).await.unwrap();
        assert!(chain.status(&tx).await.unwrap().is_failed());
    }

    #[tokio::test]
    async fn test_scripted_rejection_is_not_broadcast() {
        let chain = MockChain::new();
        let vault = chain.vault(addr(2), addr(100));
        chain.reject_next(TxKind::Approve, "User rejected the request");

        let result = vault.submit_approve(addr(2), U256::from(1u64)).await;
        assert!(matches!(result, Err(TransferError::Submission(_))));
        assert!(chain.submissions().is_empty());
    }

    #[tokio::test]
    async fn test_scripted_allowance_failure_is_one_shot() {
        let chain = MockChain::new();
        let vault = chain.vault(addr(2), addr(100));
        chain.fail_next_allowance("connection reset");

        let first = vault.allowance(addr(100), addr(2)).await;
        assert_eq!(first, Err(TransferError::Rpc("connection reset".to_string())));
        assert_eq!(vault.allowance(addr(100), addr(2)).await, Ok(U256::zero()));
    }

    #[tokio::test]
    async fn test_hidden_redeem_assets() {
        let chain = MockChain::new();
        let wallet = addr(100);
        let vault = chain.vault(addr(1), wallet);
        chain.set_shares(addr(1), wallet, U256::from(10u64));
        chain.hide_redeem_assets(true);

        let tx = vault.submit_redeem(U256::from(10u64), wallet, wallet).await.unwrap();
        assert_eq!(chain.status(&tx).await.unwrap(), TxStatus::Confirmed { assets: None });
        assert_eq!(chain.asset_balance(wallet), U256::from(10u64));
    }

    #[tokio::test]
    async fn test_pending_polls() {
        let chain = MockChain::new();
        let vault = chain.vault(addr(2), addr(100));
        chain.set_pending_polls(2);

        let tx = vault.submit_approve(addr(2), U256::from(1u64)).await.unwrap();
        assert!(chain.status(&tx).await.unwrap().is_pending());
        assert!(chain.status(&tx).await.unwrap().is_pending());
        assert!(chain.status(&tx).await.unwrap().is_confirmed());
    }
}
