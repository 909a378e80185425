//! Transfer Orchestrator
//!
//! Drives one cross-bucket transfer through redeem -> approve -> deposit.
//! Each sub-step submits exactly one transaction and waits for it to reach a
//! terminal status before the phase advances. Failures park the machine in
//! Error with enough context to resume the failed sub-step; nothing is
//! retried automatically.

use ethers::types::{Address, U256};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::time::sleep;

use crate::history_store::{Direction, HistoryEntry, HistoryOutcome, TransferHistory};
use crate::transfer::adapters::{TransactionSubmitter, VaultRegistry};
use crate::transfer::error::TransferError;
use crate::transfer::fees::{FeeEstimate, FeePolicy};
use crate::transfer::state::{TransferEvent, TransferPhase, TransferState};
use crate::transfer::types::{BucketKind, ConversionEstimate, TransferRequest, TxHandle, TxKind, TxStatus};
use crate::transfer::validator::{self, ValidationResult};

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Smallest non-zero balance a transfer may leave in the source vault
    pub dust_floor: U256,
    /// Delay between status polls of a pending transaction
    pub poll_interval: Duration,
    /// Give up waiting (without forgetting the transaction) after this long
    pub confirmation_timeout: Duration,
    pub fee_policy: FeePolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            dust_floor: U256::from(1_000u64),
            poll_interval: Duration::from_millis(2000),
            confirmation_timeout: Duration::from_secs(120),
            fee_policy: FeePolicy::default_rates(),
        }
    }
}

struct Inner {
    state: TransferState,
    /// Bumped on every start and reset; stale drivers stop when it moves
    epoch: u64,
}

/// Sequences the three sub-transactions of a bucket transfer
pub struct TransferOrchestrator {
    vaults: VaultRegistry,
    submitter: Arc<dyn TransactionSubmitter>,
    history: Option<Arc<dyn TransferHistory>>,
    config: OrchestratorConfig,
    account: RwLock<Option<Address>>,
    inner: Mutex<Inner>,
    /// Single permit held while a transfer is being driven; the wallet
    /// signs one at a time
    signer: Semaphore,
}

impl TransferOrchestrator {
    pub fn new(
        vaults: VaultRegistry,
        submitter: Arc<dyn TransactionSubmitter>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            vaults,
            submitter,
            history: None,
            config,
            account: RwLock::new(None),
            inner: Mutex::new(Inner {
                state: TransferState::idle(),
                epoch: 0,
            }),
            signer: Semaphore::new(1),
        }
    }

    pub fn with_history(mut self, history: Arc<dyn TransferHistory>) -> Self {
        self.history = Some(history);
        self
    }

    /// Connected wallet; `None` when disconnected
    pub fn set_account(&self, account: Option<Address>) {
        *self.account.write().unwrap_or_else(PoisonError::into_inner) = account;
    }

    pub fn account(&self) -> Option<Address> {
        *self.account.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ===== Read-only accessors =====

    pub fn state(&self) -> TransferState {
        self.lock().state.clone()
    }

    pub fn phase(&self) -> TransferPhase {
        self.lock().state.phase
    }

    pub fn conversion_estimate(&self) -> Option<ConversionEstimate> {
        self.lock().state.estimate.clone()
    }

    pub fn last_error(&self) -> Option<TransferError> {
        self.lock().state.last_error.clone()
    }

    pub fn status_message(&self) -> String {
        self.lock().state.status_message()
    }

    /// A sub-step is running, the last transaction is still unconfirmed, or
    /// a reset driver has not yet let go of the wallet
    pub fn is_transferring(&self) -> bool {
        let busy = {
            let inner = self.lock();
            inner.state.phase.is_in_flight()
                || matches!(inner.state.last_tx_status, Some(TxStatus::Pending))
        };
        busy || self.signer.available_permits() == 0
    }

    pub fn is_complete(&self) -> bool {
        let inner = self.lock();
        inner.state.phase == TransferPhase::Complete
            && matches!(inner.state.last_tx_status, Some(TxStatus::Confirmed { .. }))
    }

    // ===== Pure helpers =====

    pub fn estimate_fees(&self, source: BucketKind, destination: BucketKind) -> FeeEstimate {
        self.config.fee_policy.estimate_fees(source, destination)
    }

    pub fn estimate_conversion(&self, request: &TransferRequest) -> ConversionEstimate {
        self.config
            .fee_policy
            .estimate_conversion(request.source_kind, request.destination_kind, request.amount)
    }

    pub fn validate_transfer(&self, source: BucketKind, amount: U256, source_balance: U256) -> ValidationResult {
        validator::validate_transfer(source, amount, source_balance, self.config.dust_floor)
    }

    // ===== Caller operations =====

    /// Start a transfer and drive it until Complete or Error
    ///
    /// Rejected without touching the chain when another transfer is in
    /// flight, no wallet is connected, or validation fails.
    pub async fn execute_transfer(&self, request: TransferRequest) -> Result<TransferPhase, TransferError> {
        let _signer = self
            .signer
            .try_acquire()
            .map_err(|_| TransferError::TransferInProgress)?;
        if self.phase().is_in_flight() {
            return Err(TransferError::TransferInProgress);
        }

        request.check()?;
        let account = self
            .account()
            .ok_or_else(|| TransferError::Validation("Connect a wallet first".to_string()))?;

        let source = self.vaults.get(request.source_vault)?;
        self.vaults.get(request.destination_vault)?;

        let balance = source.balance_of(account).await?;
        let validation = self.validate_transfer(request.source_kind, request.amount, balance);
        if let Some(warning) = &validation.warning {
            log::warn!("Transfer from {}: {}", request.source_kind, warning);
        }
        if !validation.valid {
            let reason = validation.error.unwrap_or_else(|| "Invalid transfer".to_string());
            return Err(TransferError::Validation(reason));
        }

        let estimate = self.estimate_conversion(&request);
        let epoch = {
            let mut inner = self.lock();
            if inner.state.phase == TransferPhase::Error && inner.state.redeemed_assets.is_some() {
                log::warn!("Starting a new transfer while redeemed assets of the previous one remain in the wallet");
            }

            let mut state = TransferState::idle();
            state.request = Some(request.clone());
            state.estimate = Some(estimate.clone());
            state.apply(TransferEvent::Start)?;

            inner.state = state;
            inner.epoch += 1;
            inner.epoch
        };

        log::info!(
            "Transfer started: {} -> {} amount={} (fee {}, slippage {}, net ~{})",
            request.source_kind,
            request.destination_kind,
            request.amount,
            estimate.conversion_fee_label,
            estimate.slippage_label,
            estimate.net_amount
        );

        self.drive(epoch, account).await
    }

    /// Resume a failed transfer from the sub-step that failed
    ///
    /// A transfer that failed after its redeem was mined resumes at approve
    /// or deposit; the redeem is never submitted twice. Failures a retry
    /// cannot fix (unknown vault, broken state) are returned as-is.
    pub async fn retry_transfer(&self) -> Result<TransferPhase, TransferError> {
        let _signer = self
            .signer
            .try_acquire()
            .map_err(|_| TransferError::TransferInProgress)?;
        let account = self
            .account()
            .ok_or_else(|| TransferError::Validation("Connect a wallet first".to_string()))?;

        let (epoch, failed, request) = {
            let inner = self.lock();
            if inner.state.phase != TransferPhase::Error {
                return Err(TransferError::NoActiveTransfer);
            }
            let failed = inner.state.failed_phase.ok_or(TransferError::NoActiveTransfer)?;
            if let Some(err) = inner.state.last_error.as_ref().filter(|e| !e.is_recoverable()) {
                log::warn!("Not retrying {} after: {}", failed, err);
                return Err(err.clone());
            }
            let request = inner.state.request.clone().ok_or(TransferError::NoActiveTransfer)?;
            (inner.epoch, failed, request)
        };

        // The allowance may have changed since the failure was recorded
        let resume = self.resume_point(epoch, failed, &request, account).await;
        self.update(epoch, |state| {
            state.apply(TransferEvent::Resume(resume))?;
            state.last_error = None;
            state.failed_phase = None;
            Ok(())
        })?;
        log::info!("Retrying transfer from {}", resume);

        self.drive(epoch, account).await
    }

    /// Forget the current transfer; never touches the chain
    pub fn reset_transfer(&self) {
        let mut inner = self.lock();
        if inner.state.phase.is_in_flight() {
            log::warn!("Reset while {}; the submitted transaction is no longer tracked", inner.state.phase);
        }
        inner.state = TransferState::idle();
        inner.epoch += 1;
    }

    // ===== Driver =====

    async fn drive(&self, epoch: u64, account: Address) -> Result<TransferPhase, TransferError> {
        loop {
            let (phase, request) = {
                let inner = self.lock();
                if inner.epoch != epoch {
                    return Err(TransferError::Abandoned);
                }
                (inner.state.phase, inner.state.request.clone())
            };
            let request = request.ok_or(TransferError::NoActiveTransfer)?;

            let step = match phase {
                TransferPhase::Redeeming => self.step_redeem(epoch, &request, account).await,
                TransferPhase::Approving => self.step_approve(epoch, &request, account).await,
                TransferPhase::Depositing => self.step_deposit(epoch, &request, account).await,
                done => return Ok(done),
            };

            match step {
                Ok(next) => {
                    log::info!("Transfer phase {} -> {}", phase, next);
                    if next == TransferPhase::Complete {
                        self.record_history(epoch, account, None);
                    }
                }
                Err(TransferError::Abandoned) => return Err(TransferError::Abandoned),
                Err(err) => {
                    log::error!("Transfer failed during {}: {}", phase, err);
                    let resume = self.resume_point(epoch, phase, &request, account).await;
                    self.fail(epoch, resume, err.clone())?;
                    self.record_history(epoch, account, Some(err.to_string()));
                    return Err(err);
                }
            }
        }
    }

    /// Redeem source shares into the wallet, then decide whether approval
    /// is needed
    async fn step_redeem(
        &self,
        epoch: u64,
        request: &TransferRequest,
        account: Address,
    ) -> Result<TransferPhase, TransferError> {
        let source = self.vaults.get(request.source_vault)?;
        let destination = self.vaults.get(request.destination_vault)?;

        let reported = self
            .run_tx(epoch, TxKind::Redeem, || {
                source.submit_redeem(request.amount, account, account)
            })
            .await?;

        let assets = match reported {
            Some(assets) => assets,
            None => {
                let expected = self.estimate_conversion(request).expected_assets;
                log::warn!("Redeem receipt did not report assets; using estimate {}", expected);
                expected
            }
        };
        self.update(epoch, |state| {
            state.redeemed_assets = Some(assets);
            Ok(())
        })?;

        let allowance = destination.allowance(account, request.destination_vault).await?;
        let event = if allowance >= assets {
            log::info!("Allowance {} covers {} redeemed assets, skipping approve", allowance, assets);
            TransferEvent::RedeemConfirmedPreApproved
        } else {
            TransferEvent::RedeemConfirmed
        };
        self.advance(epoch, event)
    }

    async fn step_approve(
        &self,
        epoch: u64,
        request: &TransferRequest,
        account: Address,
    ) -> Result<TransferPhase, TransferError> {
        let destination = self.vaults.get(request.destination_vault)?;
        let assets = self.redeemed_assets(epoch)?;

        // An earlier attempt may have landed after we stopped waiting
        let allowance = destination.allowance(account, request.destination_vault).await?;
        if allowance < assets {
            self.run_tx(epoch, TxKind::Approve, || {
                destination.submit_approve(request.destination_vault, assets)
            })
            .await?;
        }

        self.advance(epoch, TransferEvent::ApproveConfirmed)
    }

    async fn step_deposit(
        &self,
        epoch: u64,
        request: &TransferRequest,
        account: Address,
    ) -> Result<TransferPhase, TransferError> {
        let destination = self.vaults.get(request.destination_vault)?;
        let assets = self.redeemed_assets(epoch)?;

        self.run_tx(epoch, TxKind::Deposit, || destination.submit_deposit(assets, account))
            .await?;

        self.advance(epoch, TransferEvent::DepositConfirmed)
    }

    /// Submit one transaction and wait for it, or keep waiting on the same
    /// kind of transaction from an earlier attempt that has not failed
    async fn run_tx<F, Fut>(&self, epoch: u64, kind: TxKind, submit: F) -> Result<Option<U256>, TransferError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<TxHandle, TransferError>>,
    {
        let resumable = self.update(epoch, |state| {
            Ok(match (state.last_tx, &state.last_tx_status) {
                (Some(tx), Some(status)) if tx.kind == kind && !status.is_failed() => Some(tx),
                _ => None,
            })
        })?;

        let handle = match resumable {
            Some(handle) => {
                log::info!("Resuming {} tx {:?}", kind, handle.hash);
                handle
            }
            None => {
                let handle = submit().await?;
                log::info!("Submitted {} tx {:?}", kind, handle.hash);
                self.update(epoch, |state| {
                    state.last_tx = Some(handle);
                    state.last_tx_status = Some(TxStatus::Pending);
                    Ok(())
                })?;
                handle
            }
        };

        self.await_confirmation(epoch, handle).await
    }

    /// Poll until the transaction is mined, reverted, or the wait times out
    async fn await_confirmation(&self, epoch: u64, handle: TxHandle) -> Result<Option<U256>, TransferError> {
        let started = Instant::now();

        loop {
            let status = self.submitter.status(&handle).await?;
            self.update(epoch, |state| {
                state.last_tx_status = Some(status.clone());
                Ok(())
            })?;

            match status {
                TxStatus::Confirmed { assets } => {
                    log::info!("{} tx {:?} confirmed", handle.kind, handle.hash);
                    return Ok(assets);
                }
                TxStatus::Failed(reason) => return Err(TransferError::Confirmation(reason)),
                TxStatus::Pending => {}
            }

            if started.elapsed() >= self.config.confirmation_timeout {
                return Err(TransferError::ConfirmationTimeout(
                    self.config.confirmation_timeout.as_millis() as u64,
                ));
            }
            sleep(self.config.poll_interval).await;
        }
    }

    // ===== State helpers =====

    /// Mutate state if the transfer has not been reset or replaced
    fn update<T, F>(&self, epoch: u64, f: F) -> Result<T, TransferError>
    where
        F: FnOnce(&mut TransferState) -> Result<T, TransferError>,
    {
        let mut inner = self.lock();
        if inner.epoch != epoch {
            return Err(TransferError::Abandoned);
        }
        f(&mut inner.state)
    }

    fn advance(&self, epoch: u64, event: TransferEvent) -> Result<TransferPhase, TransferError> {
        self.update(epoch, |state| state.apply(event))
    }

    fn redeemed_assets(&self, epoch: u64) -> Result<U256, TransferError> {
        self.update(epoch, |state| {
            state.redeemed_assets.ok_or_else(|| {
                TransferError::InvalidTransition {
                    from: state.phase.to_string(),
                    event: "redeem not confirmed".to_string(),
                }
            })
        })
    }

    /// Sub-step a retry starts from after `phase` failed
    async fn resume_point(
        &self,
        epoch: u64,
        phase: TransferPhase,
        request: &TransferRequest,
        account: Address,
    ) -> TransferPhase {
        let Ok((redeemed, deposit_outstanding)) = self.update(epoch, |state| {
            let outstanding = matches!(
                (state.last_tx, &state.last_tx_status),
                (Some(tx), Some(status)) if tx.kind == TxKind::Deposit && !status.is_failed()
            );
            Ok((state.redeemed_assets, outstanding))
        }) else {
            return phase;
        };

        match (phase, redeemed) {
            // Once the redeem is mined the shares are gone; resume after it
            (TransferPhase::Redeeming, Some(_)) => TransferPhase::Approving,
            // A deposit that may still land keeps its handle; otherwise make
            // sure the allowance it spends is still there
            (TransferPhase::Depositing, Some(assets)) if !deposit_outstanding => {
                let Ok(destination) = self.vaults.get(request.destination_vault) else {
                    return phase;
                };
                match destination.allowance(account, request.destination_vault).await {
                    Ok(allowance) if allowance < assets => {
                        log::warn!("Allowance {} no longer covers {}; retry will approve again", allowance, assets);
                        TransferPhase::Approving
                    }
                    Ok(_) => phase,
                    Err(e) => {
                        log::warn!("Could not re-read allowance after failed deposit: {}", e);
                        phase
                    }
                }
            }
            _ => phase,
        }
    }

    fn fail(&self, epoch: u64, resume: TransferPhase, err: TransferError) -> Result<(), TransferError> {
        self.update(epoch, |state| {
            state.apply(TransferEvent::Fail)?;
            state.failed_phase = Some(resume);
            state.last_error = Some(err);
            Ok(())
        })
    }

    /// Append one entry per attempt outcome. A failed attempt that is later
    /// retried to completion leaves both its Failed and Completed entries.
    fn record_history(&self, epoch: u64, account: Address, failure: Option<String>) {
        let Some(history) = &self.history else {
            return;
        };
        let Ok(snapshot) = self.update(epoch, |state| Ok(state.clone())) else {
            return;
        };
        let Some(request) = snapshot.request else {
            return;
        };

        let outcome = match failure {
            Some(reason) => HistoryOutcome::Failed { reason },
            None => HistoryOutcome::Completed,
        };
        let now = chrono::Utc::now().timestamp_millis();
        let tx_hash = snapshot.last_tx.map(|tx| tx.hash);

        let mut entries = vec![HistoryEntry {
            account,
            bucket: request.source_kind,
            direction: Direction::Out,
            counterparty: request.destination_kind,
            amount: request.amount,
            tx_hash,
            outcome: outcome.clone(),
            timestamp_ms: now,
        }];
        if outcome == HistoryOutcome::Completed {
            entries.push(HistoryEntry {
                account,
                bucket: request.destination_kind,
                direction: Direction::In,
                counterparty: request.source_kind,
                amount: snapshot.redeemed_assets.unwrap_or(request.amount),
                tx_hash,
                outcome,
                timestamp_ms: now,
            });
        }

        for entry in &entries {
            if let Err(e) = history.append(entry) {
                log::warn!("Failed to record transfer history for {}: {}", entry.bucket, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::adapters::MockChain;

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    fn setup() -> (Arc<MockChain>, TransferOrchestrator) {
        let chain = MockChain::new();
        let wallet = addr(100);
        let mut vaults = VaultRegistry::new();
        vaults.register(chain.vault(addr(1), wallet));
        vaults.register(chain.vault(addr(2), wallet));

        let config = OrchestratorConfig {
            dust_floor: U256::from(10u64),
            poll_interval: Duration::from_millis(1),
            confirmation_timeout: Duration::from_millis(50),
            fee_policy: FeePolicy::default_rates(),
        };
        let orchestrator = TransferOrchestrator::new(vaults, chain.clone(), config);
        orchestrator.set_account(Some(wallet));
        chain.set_shares(addr(1), wallet, U256::from(1000u64));
        (chain, orchestrator)
    }

    fn request(amount: u64) -> TransferRequest {
        TransferRequest {
            source_vault: addr(1),
            destination_vault: addr(2),
            amount: U256::from(amount),
            source_kind: BucketKind::Growth,
            destination_kind: BucketKind::Spendable,
        }
    }

    #[tokio::test]
    async fn test_requires_connected_wallet() {
        let (chain, orchestrator) = setup();
        orchestrator.set_account(None);

        let err = orchestrator.execute_transfer(request(100)).await.unwrap_err();
        assert_eq!(err, TransferError::Validation("Connect a wallet first".to_string()));
        assert!(chain.submissions().is_empty());
        assert_eq!(orchestrator.phase(), TransferPhase::Idle);
    }

    #[tokio::test]
    async fn test_dust_residual_rejected_before_chain() {
        let (chain, orchestrator) = setup();

        let err = orchestrator.execute_transfer(request(995)).await.unwrap_err();
        assert!(matches!(err, TransferError::Validation(_)));
        assert!(chain.submissions().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_vault_rejected() {
        let (chain, orchestrator) = setup();
        let mut req = request(100);
        req.destination_vault = addr(9);

        let err = orchestrator.execute_transfer(req).await.unwrap_err();
        assert!(matches!(err, TransferError::UnknownVault(_)));
        assert!(chain.submissions().is_empty());
    }

    #[tokio::test]
    async fn test_pending_polls_then_complete() {
        let (chain, orchestrator) = setup();
        chain.set_pending_polls(3);

        let phase = orchestrator.execute_transfer(request(500)).await.unwrap();
        assert_eq!(phase, TransferPhase::Complete);
        assert!(orchestrator.is_complete());
        assert!(!orchestrator.is_transferring());
    }

    #[tokio::test]
    async fn test_timeout_keeps_handle_and_retry_does_not_resubmit() {
        let (chain, orchestrator) = setup();
        chain.set_pending_polls(u32::MAX);

        let err = orchestrator.execute_transfer(request(500)).await.unwrap_err();
        assert!(matches!(err, TransferError::ConfirmationTimeout(_)));
        assert_eq!(orchestrator.phase(), TransferPhase::Error);
        // Redeem is still out there
        assert!(orchestrator.is_transferring());
        assert_eq!(chain.count(TxKind::Redeem), 1);

        chain.mine_all();
        chain.set_pending_polls(0);
        let phase = orchestrator.retry_transfer().await.unwrap();

        assert_eq!(phase, TransferPhase::Complete);
        assert_eq!(chain.count(TxKind::Redeem), 1);
    }

    #[tokio::test]
    async fn test_retry_without_error_rejected() {
        let (_chain, orchestrator) = setup();
        assert_eq!(
            orchestrator.retry_transfer().await.unwrap_err(),
            TransferError::NoActiveTransfer
        );
    }

    #[tokio::test]
    async fn test_unrecoverable_failure_not_retried() {
        let (chain, orchestrator) = setup();
        {
            let mut inner = orchestrator.lock();
            let mut state = TransferState::idle();
            state.request = Some(request(100));
            state.apply(TransferEvent::Start).unwrap();
            state.apply(TransferEvent::Fail).unwrap();
            state.failed_phase = Some(TransferPhase::Redeeming);
            state.last_error = Some(TransferError::UnknownVault("0x09".to_string()));
            inner.state = state;
        }

        let err = orchestrator.retry_transfer().await.unwrap_err();
        assert_eq!(err, TransferError::UnknownVault("0x09".to_string()));
        assert_eq!(orchestrator.phase(), TransferPhase::Error);
        assert!(chain.submissions().is_empty());
    }

    #[tokio::test]
    async fn test_estimate_stored_for_request() {
        let (_chain, orchestrator) = setup();
        orchestrator.execute_transfer(request(500)).await.unwrap();

        let estimate = orchestrator.conversion_estimate().unwrap();
        assert_eq!(estimate.conversion_fee_label, "0%");
        assert_eq!(estimate.slippage_label, "~0.5%");
        assert_eq!(estimate.expected_assets, U256::from(500u64));
    }
}
