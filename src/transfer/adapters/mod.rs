//! Adapters module - vault and transaction collaborators

pub mod traits;
pub mod mock;
pub mod ethers_vault;

pub use traits::{TransactionSubmitter, VaultClient, VaultRegistry};
pub use mock::{MockChain, MockVault, Submission};

// ethers-backed adapters (production)
pub use ethers_vault::{EthersSubmitter, EthersVaultClient};
