//! Transfer module - main module file
//!
//! Cross-bucket transfers as a resumable phase machine
//! (redeem -> approve -> deposit) driven against vault adapters.

pub mod adapters;
pub mod error;
pub mod fees;
pub mod orchestrator;
pub mod state;
pub mod types;
pub mod validator;

// Re-export commonly used types
pub use error::TransferError;
pub use fees::{FeeEstimate, FeePolicy};
pub use orchestrator::{OrchestratorConfig, TransferOrchestrator};
pub use state::{TransferEvent, TransferPhase, TransferState};
pub use types::{BucketKind, ConversionEstimate, TransferRequest, TxHandle, TxKind, TxStatus};
pub use validator::{validate_transfer, ValidationResult};
