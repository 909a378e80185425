//! Error types for bucket transfers

use thiserror::Error;

/// Everything that can stop a transfer
///
/// The Display text doubles as the status message shown while the
/// orchestrator sits in the Error phase, so keep it human-readable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    /// Pre-flight rejection; never reaches the chain
    #[error("{0}")]
    Validation(String),

    /// Wallet refused to sign or RPC refused the broadcast
    #[error("Transaction submission failed: {0}")]
    Submission(String),

    /// Broadcast but reverted or dropped
    #[error("Transaction failed: {0}")]
    Confirmation(String),

    /// Still pending when the wait gave up; the handle is kept for retry
    #[error("Transaction not confirmed after {0} ms")]
    ConfirmationTimeout(u64),

    #[error("A transfer is already in progress")]
    TransferInProgress,

    #[error("No failed transfer to retry")]
    NoActiveTransfer,

    /// The transfer was reset while a sub-transaction was being awaited
    #[error("Transfer was reset while in progress")]
    Abandoned,

    #[error("Unknown vault: {0}")]
    UnknownVault(String),

    /// Read call against the chain failed
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Invalid phase transition from {from} on {event}")]
    InvalidTransition { from: String, event: String },
}

impl TransferError {
    /// Errors raised by a sub-transaction, after which the same phase may
    /// be retried
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Submission(_) | Self::Confirmation(_) | Self::ConfirmationTimeout(_) | Self::Rpc(_)
        )
    }
}
