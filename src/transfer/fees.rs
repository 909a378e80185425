//! Display-side fee and slippage policy
//!
//! Estimates only. The vault contracts apply the authoritative fee.

use ethers::types::U256;

use crate::transfer::types::{BucketKind, ConversionEstimate};

const BPS_DENOMINATOR: u64 = 10_000;

/// Fee and slippage rates per bucket, in basis points (100 = 1%)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeePolicy {
    /// Withdrawal fee charged by the Bills vault on redeem
    pub bills_withdrawal_fee_bps: u64,
    /// Expected loss converting between yield protocols
    pub yield_slippage_bps: u64,
}

impl FeePolicy {
    pub fn new(bills_withdrawal_fee_bps: u64, yield_slippage_bps: u64) -> Self {
        Self {
            bills_withdrawal_fee_bps,
            yield_slippage_bps,
        }
    }

    /// Rates mirroring the deployed BucketVault configuration
    pub fn default_rates() -> Self {
        Self::new(200, 50) // 2%, 0.5%
    }

    pub fn fee_bps(&self, source: BucketKind) -> u64 {
        match source {
            BucketKind::Bills => self.bills_withdrawal_fee_bps,
            _ => 0,
        }
    }

    pub fn slippage_bps(&self, source: BucketKind, destination: BucketKind) -> u64 {
        if source.is_yield_bearing() || destination.is_yield_bearing() {
            self.yield_slippage_bps
        } else {
            0
        }
    }

    /// Labels for a (source, destination) pair, no network access
    pub fn estimate_fees(&self, source: BucketKind, destination: BucketKind) -> FeeEstimate {
        let fee_bps = self.fee_bps(source);
        let slippage_bps = self.slippage_bps(source, destination);

        FeeEstimate {
            conversion_fee_label: bps_label(fee_bps),
            slippage_label: if slippage_bps == 0 {
                bps_label(0)
            } else {
                format!("~{}", bps_label(slippage_bps))
            },
            fee_bps,
            slippage_bps,
        }
    }

    /// Shares are priced 1:1 with assets for display purposes
    pub fn estimate_conversion(
        &self,
        source: BucketKind,
        destination: BucketKind,
        amount: U256,
    ) -> ConversionEstimate {
        let fees = self.estimate_fees(source, destination);

        let conversion_fee = apply_bps(amount, fees.fee_bps);
        let expected_assets = amount.saturating_sub(conversion_fee);
        let slippage = apply_bps(expected_assets, fees.slippage_bps);

        ConversionEstimate {
            expected_assets,
            conversion_fee,
            conversion_fee_label: fees.conversion_fee_label,
            slippage_label: fees.slippage_label,
            net_amount: expected_assets.saturating_sub(slippage),
        }
    }
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self::default_rates()
    }
}

/// Result of `FeePolicy::estimate_fees`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeEstimate {
    pub conversion_fee_label: String,
    pub slippage_label: String,
    pub fee_bps: u64,
    pub slippage_bps: u64,
}

fn apply_bps(amount: U256, bps: u64) -> U256 {
    amount.saturating_mul(U256::from(bps)) / U256::from(BPS_DENOMINATOR)
}

/// 200 -> "2%", 50 -> "0.5%", 125 -> "1.25%"
fn bps_label(bps: u64) -> String {
    let whole = bps / 100;
    let frac = bps % 100;
    if frac == 0 {
        format!("{}%", whole)
    } else if frac % 10 == 0 {
        format!("{}.{}%", whole, frac / 10)
    } else {
        format!("{}.{:02}%", whole, frac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bills_to_savings_labels() {
        let fees = FeePolicy::default_rates().estimate_fees(BucketKind::Bills, BucketKind::Savings);
        assert_eq!(fees.conversion_fee_label, "2%");
        assert_eq!(fees.slippage_label, "~0.5%");
    }

    #[test]
    fn test_spendable_only_has_no_fee_or_slippage() {
        let fees = FeePolicy::default_rates().estimate_fees(BucketKind::Spendable, BucketKind::Spendable);
        assert_eq!(fees.conversion_fee_label, "0%");
        assert_eq!(fees.slippage_label, "0%");
    }

    #[test]
    fn test_yield_destination_carries_slippage() {
        let fees = FeePolicy::default_rates().estimate_fees(BucketKind::Spendable, BucketKind::Growth);
        assert_eq!(fees.fee_bps, 0);
        assert_eq!(fees.slippage_label, "~0.5%");
    }

    #[test]
    fn test_conversion_amounts() {
        let estimate = FeePolicy::default_rates().estimate_conversion(
            BucketKind::Bills,
            BucketKind::Savings,
            U256::from(1_000_000u64),
        );
        assert_eq!(estimate.conversion_fee, U256::from(20_000u64));
        assert_eq!(estimate.expected_assets, U256::from(980_000u64));
        // 0.5% of 980_000 = 4_900
        assert_eq!(estimate.net_amount, U256::from(975_100u64));
    }

    #[test]
    fn test_bps_label_formats() {
        assert_eq!(bps_label(0), "0%");
        assert_eq!(bps_label(200), "2%");
        assert_eq!(bps_label(50), "0.5%");
        assert_eq!(bps_label(125), "1.25%");
    }
}
