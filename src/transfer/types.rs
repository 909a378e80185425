//! Core types for bucket transfers
//!
//! Addresses and 256-bit amounts use the `ethers` primitives so the same
//! values flow unchanged between the orchestrator and the vault clients.

use ethers::types::{Address, TxHash, U256};
use serde::{Deserialize, Serialize};

use crate::transfer::error::TransferError;

/// One of the four yield vaults a user's funds are split across
///
/// Uses strum for String conversion:
/// - `kind.as_ref()` -> &str "bills" (zero-alloc)
/// - `"savings".parse::<BucketKind>()` -> Result<BucketKind>
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::AsRefStr,
    strum_macros::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BucketKind {
    Bills,
    Savings,
    Growth,
    Spendable,
}

impl BucketKind {
    /// Buckets whose vaults deploy funds into a yield protocol
    pub fn is_yield_bearing(&self) -> bool {
        !matches!(self, BucketKind::Spendable)
    }
}

/// Immutable input to a transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Vault the shares are redeemed from
    pub source_vault: Address,
    /// Vault the redeemed assets are deposited into
    pub destination_vault: Address,
    /// Shares of the source vault
    pub amount: U256,
    pub source_kind: BucketKind,
    pub destination_kind: BucketKind,
}

impl TransferRequest {
    /// Check the request-level invariants (no balance lookups)
    pub fn check(&self) -> Result<(), TransferError> {
        if self.amount.is_zero() {
            return Err(TransferError::Validation(
                "Amount must be greater than zero".to_string(),
            ));
        }
        if self.source_kind == self.destination_kind {
            return Err(TransferError::Validation(
                "Source and destination buckets must differ".to_string(),
            ));
        }
        Ok(())
    }
}

/// Display estimate of what a transfer will yield, recomputed per request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionEstimate {
    /// Assets received after redeeming `amount` shares
    pub expected_assets: U256,
    /// Units withheld by the source bucket's withdrawal policy
    pub conversion_fee: U256,
    pub conversion_fee_label: String,
    pub slippage_label: String,
    /// Amount available to deposit after fee and slippage
    pub net_amount: U256,
}

/// Which sub-step a transaction belongs to
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TxKind {
    Redeem,
    Approve,
    Deposit,
}

/// A broadcast transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxHandle {
    pub hash: TxHash,
    pub kind: TxKind,
}

/// Status of a submitted transaction as reported by the chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    /// Broadcast, not yet mined
    Pending,
    /// Mined successfully. `assets` carries the assets paid out by a redeem
    /// when the receipt reports them.
    Confirmed { assets: Option<U256> },
    /// Reverted on-chain or dropped
    Failed(String),
}

impl TxStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, TxStatus::Pending)
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, TxStatus::Confirmed { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TxStatus::Failed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(amount: u64, src: BucketKind, dst: BucketKind) -> TransferRequest {
        TransferRequest {
            source_vault: Address::from_low_u64_be(1),
            destination_vault: Address::from_low_u64_be(2),
            amount: U256::from(amount),
            source_kind: src,
            destination_kind: dst,
        }
    }

    #[test]
    fn test_bucket_kind_strings() {
        assert_eq!(BucketKind::Bills.as_ref(), "bills");
        assert_eq!(BucketKind::Spendable.to_string(), "spendable");
        assert_eq!("growth".parse::<BucketKind>().unwrap(), BucketKind::Growth);
        assert!("checking".parse::<BucketKind>().is_err());
    }

    #[test]
    fn test_yield_bearing() {
        assert!(BucketKind::Bills.is_yield_bearing());
        assert!(BucketKind::Savings.is_yield_bearing());
        assert!(BucketKind::Growth.is_yield_bearing());
        assert!(!BucketKind::Spendable.is_yield_bearing());
    }

    #[test]
    fn test_request_check() {
        assert!(request(500, BucketKind::Bills, BucketKind::Savings).check().is_ok());

        let err = request(0, BucketKind::Bills, BucketKind::Savings).check().unwrap_err();
        assert_eq!(err.to_string(), "Amount must be greater than zero");

        assert!(request(5, BucketKind::Growth, BucketKind::Growth).check().is_err());
    }

    #[test]
    fn test_tx_status_flags() {
        assert!(TxStatus::Pending.is_pending());
        assert!(TxStatus::Confirmed { assets: None }.is_confirmed());
        assert!(TxStatus::Failed("reverted".to_string()).is_failed());
        assert!(!TxStatus::Pending.is_failed());
    }

    #[test]
    fn test_bucket_kind_json() {
        let json = serde_json::to_string(&BucketKind::Savings).unwrap();
        assert_eq!(json, "\"savings\"");
        let parsed: BucketKind = serde_json::from_str("\"bills\"").unwrap();
        assert_eq!(parsed, BucketKind::Bills);
    }
}
