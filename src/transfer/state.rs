//! Transfer State Machine
//!
//! Defines the phases, events, and transition function for a cross-bucket
//! transfer (redeem -> approve -> deposit).

use ethers::types::U256;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::transfer::error::TransferError;
use crate::transfer::types::{ConversionEstimate, TransferRequest, TxHandle, TxStatus};

/// Transfer phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferPhase {
    /// No transfer active
    Idle,
    /// Redeem submitted against the source vault
    Redeeming,
    /// Approve submitted for the destination vault
    Approving,
    /// Deposit submitted into the destination vault
    Depositing,
    /// Transfer complete ✅
    Complete,
    /// A sub-transaction failed ❌
    Error,
}

impl TransferPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferPhase::Idle => "idle",
            TransferPhase::Redeeming => "redeeming",
            TransferPhase::Approving => "approving",
            TransferPhase::Depositing => "depositing",
            TransferPhase::Complete => "complete",
            TransferPhase::Error => "error",
        }
    }

    /// A sub-transaction is being submitted or awaited
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            TransferPhase::Redeeming | TransferPhase::Approving | TransferPhase::Depositing
        )
    }

    /// Default status line for the phase. The Error phase is overridden by
    /// the last error message when one is known.
    pub fn status_message(&self) -> &'static str {
        match self {
            TransferPhase::Idle => "Ready to transfer",
            TransferPhase::Redeeming => "Withdrawing from source vault...",
            TransferPhase::Approving => "Approving destination vault...",
            TransferPhase::Depositing => "Depositing to destination vault...",
            TransferPhase::Complete => "Transfer complete!",
            TransferPhase::Error => "Transfer failed",
        }
    }
}

impl fmt::Display for TransferPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Events driving the phase machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEvent {
    /// Caller started a transfer; redeem is about to be submitted
    Start,
    /// Redeem mined, destination allowance too low
    RedeemConfirmed,
    /// Redeem mined, destination allowance already covers the assets
    RedeemConfirmedPreApproved,
    ApproveConfirmed,
    DepositConfirmed,
    /// Submission or confirmation of the current sub-transaction failed
    Fail,
    /// Caller retries the sub-step that failed
    Resume(TransferPhase),
    Reset,
}

impl fmt::Display for TransferEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferEvent::Resume(phase) => write!(f, "resume({})", phase),
            other => write!(f, "{:?}", other),
        }
    }
}

/// State transition function
///
/// Given the current phase and an event, returns the next phase or an
/// error for transitions the machine does not allow.
pub fn transition(current: TransferPhase, event: TransferEvent) -> Result<TransferPhase, TransferError> {
    use TransferEvent::*;
    use TransferPhase::*;

    let next = match (current, event) {
        (_, Reset) => Idle,

        // A finished or abandoned transfer may be replaced by a new one
        (Idle | Complete | Error, Start) => Redeeming,

        (Redeeming, RedeemConfirmed) => Approving,
        (Redeeming, RedeemConfirmedPreApproved) => Depositing,
        (Approving, ApproveConfirmed) => Depositing,
        (Depositing, DepositConfirmed) => Complete,

        (Redeeming | Approving | Depositing, Fail) => Error,

        (Error, Resume(phase)) if phase.is_in_flight() => phase,

        _ => {
            return Err(TransferError::InvalidTransition {
                from: current.to_string(),
                event: event.to_string(),
            })
        }
    };

    Ok(next)
}

/// Everything the orchestrator knows about the current transfer
///
/// Owned and mutated only by the orchestrator; callers get clones.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferState {
    pub phase: TransferPhase,
    pub request: Option<TransferRequest>,
    pub estimate: Option<ConversionEstimate>,
    /// Assets received by the wallet once the redeem is mined
    pub redeemed_assets: Option<U256>,
    /// Sub-step to resume on retry while in Error
    pub failed_phase: Option<TransferPhase>,
    pub last_error: Option<TransferError>,
    pub last_tx: Option<TxHandle>,
    pub last_tx_status: Option<TxStatus>,
    /// Phases entered since the last reset, starting with Idle
    pub visited: Vec<TransferPhase>,
}

impl TransferState {
    pub fn idle() -> Self {
        Self {
            phase: TransferPhase::Idle,
            request: None,
            estimate: None,
            redeemed_assets: None,
            failed_phase: None,
            last_error: None,
            last_tx: None,
            last_tx_status: None,
            visited: vec![TransferPhase::Idle],
        }
    }

    /// Apply an event, recording the phase entered
    pub fn apply(&mut self, event: TransferEvent) -> Result<TransferPhase, TransferError> {
        let next = transition(self.phase, event)?;
        self.phase = next;
        self.visited.push(next);
        Ok(next)
    }

    pub fn status_message(&self) -> String {
        match (&self.phase, &self.last_error) {
            (TransferPhase::Error, Some(err)) => err.to_string(),
            (phase, _) => phase.status_message().to_string(),
        }
    }
}

impl Default for TransferState {
    fn default() -> Self {
        Self::idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ===== Phase Property Tests =====

    #[test]
    fn test_in_flight_phases() {
        assert!(TransferPhase::Redeeming.is_in_flight());
        assert!(TransferPhase::Approving.is_in_flight());
        assert!(TransferPhase::Depositing.is_in_flight());

        assert!(!TransferPhase::Idle.is_in_flight());
        assert!(!TransferPhase::Complete.is_in_flight());
        assert!(!TransferPhase::Error.is_in_flight());
    }

    #[test]
    fn test_phase_names() {
        assert_eq!(TransferPhase::Complete.as_str(), "complete");
        assert_eq!(TransferPhase::Depositing.to_string(), "depositing");
    }

    #[test]
    fn test_status_messages() {
        assert_eq!(TransferPhase::Idle.status_message(), "Ready to transfer");
        assert_eq!(TransferPhase::Redeeming.status_message(), "Withdrawing from source vault...");
        assert_eq!(TransferPhase::Approving.status_message(), "Approving destination vault...");
        assert_eq!(TransferPhase::Depositing.status_message(), "Depositing to destination vault...");
        assert_eq!(TransferPhase::Complete.status_message(), "Transfer complete!");
        assert_eq!(TransferPhase::Error.status_message(), "Transfer failed");
    }

    #[test]
    fn test_error_status_prefers_last_error() {
        let mut state = TransferState::idle();
        state.phase = TransferPhase::Error;
        assert_eq!(state.status_message(), "Transfer failed");

        state.last_error = Some(TransferError::Confirmation("withdrawal delay".to_string()));
        assert_eq!(state.status_message(), "Transaction failed: withdrawal delay");
    }

    // ===== Happy Path Transitions =====

    #[test]
    fn test_happy_path_with_approval() {
        let mut state = TransferState::idle();
        state.apply(TransferEvent::Start).unwrap();
        state.apply(TransferEvent::RedeemConfirmed).unwrap();
        state.apply(TransferEvent::ApproveConfirmed).unwrap();
        state.apply(TransferEvent::DepositConfirmed).unwrap();

        assert_eq!(
            state.visited,
            vec![
                TransferPhase::Idle,
                TransferPhase::Redeeming,
                TransferPhase::Approving,
                TransferPhase::Depositing,
                TransferPhase::Complete,
            ]
        );
    }

    #[test]
    fn test_pre_approved_skips_approving() {
        let phase = transition(TransferPhase::Redeeming, TransferEvent::RedeemConfirmedPreApproved).unwrap();
        assert_eq!(phase, TransferPhase::Depositing);
    }

    // ===== Failure and Retry =====

    #[test]
    fn test_failures_go_to_error() {
        for phase in [TransferPhase::Redeeming, TransferPhase::Approving, TransferPhase::Depositing] {
            assert_eq!(transition(phase, TransferEvent::Fail).unwrap(), TransferPhase::Error);
        }
    }

    #[test]
    fn test_resume_only_into_sub_steps() {
        assert_eq!(
            transition(TransferPhase::Error, TransferEvent::Resume(TransferPhase::Depositing)).unwrap(),
            TransferPhase::Depositing
        );
        assert!(transition(TransferPhase::Error, TransferEvent::Resume(TransferPhase::Complete)).is_err());
        assert!(transition(TransferPhase::Idle, TransferEvent::Resume(TransferPhase::Redeeming)).is_err());
    }

    #[test]
    fn test_reset_from_anywhere() {
        for phase in [
            TransferPhase::Idle,
            TransferPhase::Redeeming,
            TransferPhase::Complete,
            TransferPhase::Error,
        ] {
            assert_eq!(transition(phase, TransferEvent::Reset).unwrap(), TransferPhase::Idle);
        }
    }

    // ===== Invalid Transitions =====

    #[test]
    fn test_start_rejected_while_in_flight() {
        assert!(transition(TransferPhase::Approving, TransferEvent::Start).is_err());
        assert!(transition(TransferPhase::Complete, TransferEvent::Start).is_ok());
    }

    #[test]
    fn test_out_of_order_confirmation_rejected() {
        let err = transition(TransferPhase::Redeeming, TransferEvent::DepositConfirmed).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid phase transition from redeeming on DepositConfirmed"
        );
        assert!(transition(TransferPhase::Idle, TransferEvent::ApproveConfirmed).is_err());
    }
}
