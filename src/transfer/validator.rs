//! Pre-flight validation of transfer amounts

use ethers::types::U256;

use crate::transfer::types::BucketKind;

pub const BILLS_DELAY_WARNING: &str =
    "Bills withdrawals are subject to a 7-day delay after deposit; the vault will reject early withdrawals";

/// Outcome of `validate_transfer`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub valid: bool,
    pub error: Option<String>,
    /// Informational only, never blocks the transfer
    pub warning: Option<String>,
}

impl ValidationResult {
    fn ok(warning: Option<String>) -> Self {
        Self {
            valid: true,
            error: None,
            warning,
        }
    }

    fn rejected(error: String, warning: Option<String>) -> Self {
        Self {
            valid: false,
            error: Some(error),
            warning,
        }
    }
}

/// Validate a transfer of `amount` shares out of `source`
///
/// The residual balance must be either zero or at least `dust_floor`, so
/// the vault is never left holding an unredeemable remainder.
pub fn validate_transfer(
    source: BucketKind,
    amount: U256,
    source_balance: U256,
    dust_floor: U256,
) -> ValidationResult {
    let warning = match source {
        BucketKind::Bills => Some(BILLS_DELAY_WARNING.to_string()),
        _ => None,
    };

    // 1. Amount must be positive
    if amount.is_zero() {
        return ValidationResult::rejected("Amount must be greater than zero".to_string(), warning);
    }

    // 2. Covered by balance
    if amount > source_balance {
        return ValidationResult::rejected("Insufficient balance".to_string(), warning);
    }

    // 3. No dust left behind
    let remaining = source_balance - amount;
    if !remaining.is_zero() && remaining < dust_floor {
        return ValidationResult::rejected(
            format!("Remaining balance would be below the minimum of {}", dust_floor),
            warning,
        );
    }

    ValidationResult::ok(warning)
}
