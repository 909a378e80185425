//! On-chain adapters built on ethers
//!
//! `EthersVaultClient` talks to a BucketVault (ERC-4626) and its ERC-20
//! asset through any `Middleware`; with a `SignerMiddleware` the submit
//! calls are signed by the connected wallet. `EthersSubmitter` polls
//! receipts.

use async_trait::async_trait;
use ethers::contract::{abigen, parse_log, ContractCall};
use ethers::providers::Middleware;
use ethers::types::{Address, Log, TransactionReceipt, U256, U64};
use ethers::abi::Detokenize;
use std::fmt::Display;
use std::sync::Arc;

use super::traits::{TransactionSubmitter, VaultClient};
use crate::transfer::error::TransferError;
use crate::transfer::types::{TxHandle, TxKind, TxStatus};

abigen!(
    BucketVault,
    r#"[
        function asset() external view returns (address)
        function balanceOf(address account) external view returns (uint256)
        function deposit(uint256 assets, address receiver) external returns (uint256)
        function redeem(uint256 shares, address receiver, address owner) external returns (uint256)
        event Withdraw(address indexed sender, address indexed receiver, address indexed owner, uint256 assets, uint256 shares)
    ]"#
);

abigen!(
    Erc20Token,
    r#"[
        function allowance(address owner, address spender) external view returns (uint256)
        function approve(address spender, uint256 amount) external returns (bool)
    ]"#
);

fn rpc_error(e: impl Display) -> TransferError {
    TransferError::Rpc(e.to_string())
}

/// Broadcast a contract call and return its hash without waiting
async fn broadcast<M, D>(call: ContractCall<M, D>, kind: TxKind) -> Result<TxHandle, TransferError>
where
    M: Middleware + 'static,
    D: Detokenize + Send + Sync,
{
    let pending = call
        .send()
        .await
        .map_err(|e| TransferError::Submission(e.to_string()))?;
    Ok(TxHandle {
        hash: pending.tx_hash(),
        kind,
    })
}

/// BucketVault client
pub struct EthersVaultClient<M> {
    vault: BucketVault<M>,
    client: Arc<M>,
}

impl<M: Middleware + 'static> EthersVaultClient<M> {
    pub fn new(address: Address, client: Arc<M>) -> Self {
        Self {
            vault: BucketVault::new(address, client.clone()),
            client,
        }
    }

    async fn asset_token(&self) -> Result<Erc20Token<M>, TransferError> {
        let asset = self.asset_address().await?;
        Ok(Erc20Token::new(asset, self.client.clone()))
    }
}

#[async_trait]
impl<M: Middleware + 'static> VaultClient for EthersVaultClient<M> {
    fn address(&self) -> Address {
        self.vault.address()
    }

    async fn asset_address(&self) -> Result<Address, TransferError> {
        self.vault.asset().call().await.map_err(rpc_error)
    }

    async fn balance_of(&self, account: Address) -> Result<U256, TransferError> {
        self.vault.balance_of(account).call().await.map_err(rpc_error)
    }

    async fn allowance(&self, owner: Address, spender: Address) -> Result<U256, TransferError> {
        let token = self.asset_token().await?;
        token.allowance(owner, spender).call().await.map_err(rpc_error)
    }

    async fn submit_approve(&self, spender: Address, amount: U256) -> Result<TxHandle, TransferError> {
        let token = self.asset_token().await?;
        broadcast(token.approve(spender, amount), TxKind::Approve).await
    }

    async fn submit_redeem(
        &self,
        shares: U256,
        receiver: Address,
        owner: Address,
    ) -> Result<TxHandle, TransferError> {
        broadcast(self.vault.redeem(shares, receiver, owner), TxKind::Redeem).await
    }

    async fn submit_deposit(&self, assets: U256, receiver: Address) -> Result<TxHandle, TransferError> {
        broadcast(self.vault.deposit(assets, receiver), TxKind::Deposit).await
    }
}

/// Assets paid out, from the vault's `Withdraw` event
fn redeemed_assets(logs: &[Log]) -> Option<U256> {
    logs.iter()
        .find_map(|log| parse_log::<WithdrawFilter>(log.clone()).ok())
        .map(|event| event.assets)
}

fn receipt_status(kind: TxKind, receipt: &TransactionReceipt) -> TxStatus {
    if receipt.status == Some(U64::from(1u64)) {
        let assets = match kind {
            TxKind::Redeem => redeemed_assets(&receipt.logs),
            _ => None,
        };
        TxStatus::Confirmed { assets }
    } else {
        let block = receipt.block_number.map(|b| b.to_string()).unwrap_or_default();
        TxStatus::Failed(format!("{} reverted in block {}", kind, block))
    }
}

/// Receipt-polling status source
pub struct EthersSubmitter<M> {
    client: Arc<M>,
}

impl<M: Middleware + 'static> EthersSubmitter<M> {
    pub fn new(client: Arc<M>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<M: Middleware + 'static> TransactionSubmitter for EthersSubmitter<M> {
    async fn status(&self, tx: &TxHandle) -> Result<TxStatus, TransferError> {
        let receipt = self
            .client
            .get_transaction_receipt(tx.hash)
            .await
            .map_err(rpc_error)?;

        Ok(match receipt {
            Some(receipt) => receipt_status(tx.kind, &receipt),
            None => TxStatus::Pending,
        })
    }
}
