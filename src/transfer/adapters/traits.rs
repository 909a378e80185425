//! Vault and transaction adapter traits
//!
//! Defines the interface the orchestrator drives: one `VaultClient` per
//! vault address, and a `TransactionSubmitter` reporting transaction status.

use async_trait::async_trait;
use ethers::types::{Address, U256};
use std::collections::HashMap;
use std::sync::Arc;

use crate::transfer::error::TransferError;
use crate::transfer::types::{TxHandle, TxStatus};

/// ERC-4626 style vault, as seen from the connected wallet
///
/// `submit_*` calls return once the transaction is broadcast; they never
/// wait for it to be mined.
#[async_trait]
pub trait VaultClient: Send + Sync {
    /// Vault contract address
    fn address(&self) -> Address;

    /// Underlying asset token of this vault
    async fn asset_address(&self) -> Result<Address, TransferError>;

    /// Share balance of `account`
    async fn balance_of(&self, account: Address) -> Result<U256, TransferError>;

    /// ERC-20 allowance of the asset token from `owner` to `spender`
    async fn allowance(&self, owner: Address, spender: Address) -> Result<U256, TransferError>;

    /// Approve `spender` to pull `amount` of the asset token
    async fn submit_approve(&self, spender: Address, amount: U256) -> Result<TxHandle, TransferError>;

    /// Burn `shares` from `owner`, paying assets to `receiver`
    async fn submit_redeem(
        &self,
        shares: U256,
        receiver: Address,
        owner: Address,
    ) -> Result<TxHandle, TransferError>;

    /// Pull `assets` from the caller and mint shares to `receiver`
    async fn submit_deposit(&self, assets: U256, receiver: Address) -> Result<TxHandle, TransferError>;
}

/// Reports the status of broadcast transactions
#[async_trait]
pub trait TransactionSubmitter: Send + Sync {
    /// Current status; `Err` only when the status itself could not be read
    async fn status(&self, tx: &TxHandle) -> Result<TxStatus, TransferError>;
}

/// Vault clients keyed by vault address
#[derive(Default, Clone)]
pub struct VaultRegistry {
    vaults: HashMap<Address, Arc<dyn VaultClient>>,
}

impl VaultRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, vault: Arc<dyn VaultClient>) {
        self.vaults.insert(vault.address(), vault);
    }

    pub fn get(&self, address: Address) -> Result<Arc<dyn VaultClient>, TransferError> {
        self.vaults
            .get(&address)
            .cloned()
            .ok_or_else(|| TransferError::UnknownVault(format!("{:?}", address)))
    }
}
