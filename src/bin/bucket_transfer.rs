use std::env;
use std::sync::Arc;

use clap::Parser;
use dotenv::dotenv;
use ethers::prelude::*;
use eyre::{eyre, Result};
use log::{error, info, warn};
use strum::IntoEnumIterator;

use palm_budget::configure::load_config;
use palm_budget::history_store::SledTransferHistory;
use palm_budget::logger;
use palm_budget::transfer::adapters::{EthersSubmitter, EthersVaultClient, VaultClient, VaultRegistry};
use palm_budget::transfer::{BucketKind, TransferOrchestrator, TransferRequest};

#[derive(Parser)]
#[clap(author, version, about = "Move value between PalmBudget buckets", long_about = None)]
struct Args {
    /// Source bucket (bills, savings, growth, spendable)
    #[clap(long)]
    from: BucketKind,
    /// Destination bucket
    #[clap(long)]
    to: BucketKind,
    /// Shares of the source vault, in base units
    #[clap(long)]
    amount: String,
    /// Print the fee estimate and validation result without submitting
    #[clap(long, action = clap::ArgAction::SetTrue)]
    estimate_only: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    let args = Args::parse();
    let config = load_config()?;
    logger::setup_logger(&config).map_err(|e| eyre!("Failed to set up logger: {e}"))?;

    let amount = U256::from_dec_str(&args.amount).map_err(|e| eyre!("Invalid amount {}: {e:?}", args.amount))?;

    let private_key = env::var("PRIVATE_KEY").map_err(|_| eyre!("PRIVATE_KEY must be set"))?;
    let wallet = private_key.parse::<LocalWallet>()?.with_chain_id(config.chain_id);
    let account = wallet.address();

    let provider = Provider::<Http>::try_from(config.rpc_url.as_str())?;
    let client = Arc::new(SignerMiddleware::new(provider, wallet));

    let mut vaults = VaultRegistry::new();
    for kind in BucketKind::iter() {
        let address = config.vault_address(kind)?;
        vaults.register(Arc::new(EthersVaultClient::new(address, client.clone())));
    }

    let request = TransferRequest {
        source_vault: config.vault_address(args.from)?,
        destination_vault: config.vault_address(args.to)?,
        amount,
        source_kind: args.from,
        destination_kind: args.to,
    };

    let history = Arc::new(SledTransferHistory::open(&config.history_db)?);
    let orchestrator = TransferOrchestrator::new(
        vaults,
        Arc::new(EthersSubmitter::new(client.clone())),
        config.orchestrator_config(),
    )
    .with_history(history);
    orchestrator.set_account(Some(account));

    let fees = orchestrator.estimate_fees(args.from, args.to);
    let estimate = orchestrator.estimate_conversion(&request);
    println!(
        "{} -> {}: fee {} ({}), slippage {}, expected net {}",
        args.from,
        args.to,
        fees.conversion_fee_label,
        estimate.conversion_fee,
        fees.slippage_label,
        estimate.net_amount
    );

    let balance = EthersVaultClient::new(request.source_vault, client.clone())
        .balance_of(account)
        .await?;
    let validation = orchestrator.validate_transfer(args.from, amount, balance);
    if let Some(warning) = &validation.warning {
        warn!("{warning}");
    }
    if !validation.valid {
        error!("Transfer rejected: {}", validation.error.unwrap_or_default());
        return Ok(());
    }

    if args.estimate_only {
        info!("Estimate only, nothing submitted (balance {balance})");
        return Ok(());
    }

    match orchestrator.execute_transfer(request).await {
        Ok(phase) => info!("Transfer finished in phase {phase}"),
        Err(e) => error!("Transfer stopped: {e}"),
    }
    println!("{}", orchestrator.status_message());

    Ok(())
}
