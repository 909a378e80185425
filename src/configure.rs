use config::{Config, ConfigError, Environment, File};
use ethers::types::{Address, U256};
use serde::Deserialize;
use std::time::Duration;

use crate::transfer::fees::FeePolicy;
use crate::transfer::orchestrator::OrchestratorConfig;
use crate::transfer::types::BucketKind;

/// BucketVault address per bucket, as hex strings
#[derive(Debug, Deserialize)]
pub struct VaultAddresses {
    pub bills: String,
    pub savings: String,
    pub growth: String,
    pub spendable: String,
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub log_level: String,
    pub log_to_file: bool,
    pub log_file: String,
    pub rpc_url: String,
    pub chain_id: u64,
    pub vaults: VaultAddresses,
    /// Minimum non-zero residual share balance; a UX guard, independent of
    /// the keeper's on-chain minimum balance
    pub dust_floor: u64,
    pub bills_withdrawal_fee_bps: u64,
    pub yield_slippage_bps: u64,
    pub poll_interval_ms: u64,
    pub confirmation_timeout_ms: u64,
    pub history_db: String,
}

impl AppConfig {
    pub fn vault_address(&self, kind: BucketKind) -> Result<Address, ConfigError> {
        let raw = match kind {
            BucketKind::Bills => &self.vaults.bills,
            BucketKind::Savings => &self.vaults.savings,
            BucketKind::Growth => &self.vaults.growth,
            BucketKind::Spendable => &self.vaults.spendable,
        };
        raw.parse::<Address>()
            .map_err(|e| ConfigError::Message(format!("vaults.{}: {}", kind, e)))
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            dust_floor: U256::from(self.dust_floor),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            confirmation_timeout: Duration::from_millis(self.confirmation_timeout_ms),
            fee_policy: FeePolicy::new(self.bills_withdrawal_fee_bps, self.yield_slippage_bps),
        }
    }
}

pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from("config/config.yaml")
}

pub fn load_config_from(path: &str) -> Result<AppConfig, ConfigError> {
    let s = Config::builder()
        // Set defaults
        .set_default("log_level", "info")?
        .set_default("log_to_file", false)?
        .set_default("log_file", "log/palm_budget.log")?
        .set_default("rpc_url", "http://localhost:8545")?
        .set_default("chain_id", 31337)?
        .set_default("dust_floor", 1000)?
        .set_default("bills_withdrawal_fee_bps", 200)?
        .set_default("yield_slippage_bps", 50)?
        .set_default("poll_interval_ms", 2000)?
        .set_default("confirmation_timeout_ms", 120000)?
        .set_default("history_db", "data/transfer_history")?
        // Add configuration from a file
        .add_source(File::with_name(path))
        // Add configuration from environment variables (APP_VAULTS__BILLS=0x...)
        .add_source(Environment::with_prefix("APP").prefix_separator("_").separator("__"))
        .build()?;

    s.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const VAULTS_YAML: &str = "
vaults:
  bills: \"0x0000000000000000000000000000000000000001\"
  savings: \"0x0000000000000000000000000000000000000002\"
  growth: \"0x0000000000000000000000000000000000000003\"
  spendable: \"0x0000000000000000000000000000000000000004\"
dust_floor: 50
";

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_and_file_values() {
        let file = write_config(VAULTS_YAML);
        let config = load_config_from(file.path().to_str().unwrap()).unwrap();

        assert_eq!(config.log_level, "info");
        assert_eq!(config.dust_floor, 50);
        assert_eq!(config.poll_interval_ms, 2000);
        assert_eq!(
            config.vault_address(BucketKind::Growth).unwrap(),
            Address::from_low_u64_be(3)
        );

        let orchestrator = config.orchestrator_config();
        assert_eq!(orchestrator.dust_floor, U256::from(50u64));
        assert_eq!(orchestrator.fee_policy, FeePolicy::default_rates());
    }

    #[test]
    fn test_bad_vault_address() {
        let file = write_config(&VAULTS_YAML.replace("0x0000000000000000000000000000000000000004", "nope"));
        let config = load_config_from(file.path().to_str().unwrap()).unwrap();
        assert!(config.vault_address(BucketKind::Spendable).is_err());
    }
}
