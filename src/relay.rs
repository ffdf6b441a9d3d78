//! Relay orchestration: one deposit, one job, one terminal state
//!
//! Each detected deposit is processed by its own task: resolve the
//! destination, withdraw the deposit contract's balance to the operator,
//! then hand the value to the transfer layer. Steps within a job are
//! strictly sequential; jobs run independently of each other and of the
//! poller. Failures of value-moving steps are terminal and never retried
//! automatically — blind retry risks duplicate transfers. Every terminal
//! record carries the contract, amount and destination so an operator can
//! recover manually.

use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::sol_types::SolCall;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::bridge::{TransferOutcome, TransferTracker};
use crate::contracts::TakeawayDeposit;
use crate::ledger::{LedgerClient, ReceiptStatus};
use crate::metrics;
use crate::resolver::{Destination, DestinationResolver};

/// A value-transfer event on a known deposit contract
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepositEvent {
    pub contract: Address,
    pub sender: Address,
    pub amount: U256,
    pub block_number: u64,
}

/// Job states; `Unresolved`, `Done` and `Failed` are terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Received,
    Resolving,
    Resolved,
    Unresolved,
    Withdrawing,
    Withdrawn,
    Transferring,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Received => "received",
            JobStatus::Resolving => "resolving",
            JobStatus::Resolved => "resolved",
            JobStatus::Unresolved => "unresolved",
            JobStatus::Withdrawing => "withdrawing",
            JobStatus::Withdrawn => "withdrawn",
            JobStatus::Transferring => "transferring",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }
}

/// Terminal result of a relay job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Done,
    /// No destination configured or no route available; funds stay put
    Unresolved,
    Failed,
}

/// Hard failure of a relay step
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("{stage} failed: {message}")]
    External {
        stage: &'static str,
        message: String,
    },

    #[error("withdrawal reverted in tx {tx_hash}")]
    WithdrawalReverted { tx_hash: TxHash },

    #[error("transfer transaction reverted in tx {tx_hash}")]
    SubmissionReverted { tx_hash: TxHash },

    #[error("engine reported transfer failed (refunded: {refunded})")]
    TransferFailed { refunded: bool },

    #[error("transfer status polling exhausted after {attempts} attempts")]
    StatusPollExhausted { attempts: u32 },
}

impl RelayError {
    pub fn external(stage: &'static str, source: eyre::Report) -> Self {
        RelayError::External {
            stage,
            message: format!("{source:#}"),
        }
    }
}

/// Per-deposit unit of work. Not persisted: a restart mid-job strands the
/// funds in the deposit contract until a later deposit or manual retrigger.
#[derive(Debug)]
struct RelayJob {
    deposit: DepositEvent,
    status: JobStatus,
    destination: Option<Destination>,
    withdrawal_tx: Option<TxHash>,
    created_at: DateTime<Utc>,
}

impl RelayJob {
    fn new(deposit: DepositEvent) -> Self {
        Self {
            deposit,
            status: JobStatus::Received,
            destination: None,
            withdrawal_tx: None,
            created_at: Utc::now(),
        }
    }

    fn transition(&mut self, to: JobStatus) {
        info!(
            contract = %self.deposit.contract,
            amount = %self.deposit.amount,
            from = self.status.as_str(),
            to = to.as_str(),
            "Job state transition"
        );
        metrics::record_job_transition(to.as_str());
        self.status = to;
    }
}

/// Drives relay jobs through the state machine
pub struct RelayOrchestrator {
    ledger: Arc<dyn LedgerClient>,
    resolver: DestinationResolver,
    tracker: TransferTracker,
    operator_address: Address,
}

impl RelayOrchestrator {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        resolver: DestinationResolver,
        tracker: TransferTracker,
        operator_address: Address,
    ) -> Self {
        Self {
            ledger,
            resolver,
            tracker,
            operator_address,
        }
    }

    /// Process one deposit to a terminal state. Never panics and never
    /// returns early without a terminal transition.
    pub async fn process_deposit(&self, deposit: DepositEvent) -> JobOutcome {
        let mut job = RelayJob::new(deposit);
        info!(
            contract = %deposit.contract,
            sender = %deposit.sender,
            amount = %deposit.amount,
            block_number = deposit.block_number,
            "Processing deposit"
        );

        let outcome = self.run(&mut job).await;
        let elapsed = (Utc::now() - job.created_at)
            .to_std()
            .unwrap_or_default()
            .as_secs_f64();
        metrics::record_job_outcome(terminal_str(outcome), elapsed);
        outcome
    }

    async fn run(&self, job: &mut RelayJob) -> JobOutcome {
        // Resolve
        job.transition(JobStatus::Resolving);
        let node = match self.resolver.record_key(job.deposit.contract).await {
            Ok(node) => node,
            Err(e) => return self.fail(job, RelayError::external("subdomain lookup", e)),
        };
        let destination = match self.resolver.destination(node).await {
            Ok(Some(destination)) => destination,
            Ok(None) => {
                job.transition(JobStatus::Unresolved);
                warn!(
                    contract = %job.deposit.contract,
                    amount = %job.deposit.amount,
                    node = %node,
                    "No destination configured, skipping relay"
                );
                return JobOutcome::Unresolved;
            }
            Err(e) => return self.fail(job, RelayError::external("destination lookup", e)),
        };
        job.destination = Some(destination);
        job.transition(JobStatus::Resolved);
        info!(
            contract = %job.deposit.contract,
            destination_chain_id = destination.chain_id,
            destination_address = %destination.address,
            "Destination resolved"
        );

        // Withdraw
        job.transition(JobStatus::Withdrawing);
        match self.withdraw(job.deposit.contract).await {
            Ok(tx_hash) => {
                job.withdrawal_tx = Some(tx_hash);
                job.transition(JobStatus::Withdrawn);
            }
            Err(e) => return self.fail(job, e),
        }

        // Transfer
        job.transition(JobStatus::Transferring);
        match self.tracker.relay(job.deposit.amount, &destination).await {
            Ok(TransferOutcome::Completed { partial }) => {
                job.transition(JobStatus::Done);
                info!(
                    contract = %job.deposit.contract,
                    amount = %job.deposit.amount,
                    destination_chain_id = destination.chain_id,
                    destination_address = %destination.address,
                    partial,
                    "Relay complete"
                );
                JobOutcome::Done
            }
            Ok(TransferOutcome::NoRoute) => {
                job.transition(JobStatus::Unresolved);
                JobOutcome::Unresolved
            }
            Err(e) => self.fail(job, e),
        }
    }

    /// Withdraw the deposit contract's balance to the operator address and
    /// wait for inclusion. A reverted withdrawal is a hard failure; the
    /// funds remain in the contract for a manual retry.
    async fn withdraw(&self, contract: Address) -> Result<TxHash, RelayError> {
        let data = TakeawayDeposit::withdrawToCall {
            to: self.operator_address,
        }
        .abi_encode();

        let tx_hash = self
            .ledger
            .send_transaction(contract, Bytes::from(data), U256::ZERO)
            .await
            .map_err(|e| RelayError::external("withdrawal submission", e))?;

        info!(contract = %contract, tx_hash = %tx_hash, "Withdrawal submitted");

        let receipt = self
            .ledger
            .wait_for_receipt(tx_hash)
            .await
            .map_err(|e| RelayError::external("withdrawal confirmation", e))?;

        if receipt.status == ReceiptStatus::Reverted {
            return Err(RelayError::WithdrawalReverted { tx_hash });
        }

        info!(
            contract = %contract,
            tx_hash = %tx_hash,
            block_number = receipt.block_number,
            "Withdrawal confirmed"
        );
        Ok(tx_hash)
    }

    fn fail(&self, job: &mut RelayJob, err: RelayError) -> JobOutcome {
        job.transition(JobStatus::Failed);

        // Refunds land back on the source chain; the value needs a fresh
        // relay attempt to reach the real destination, so call it out.
        let refunded = matches!(err, RelayError::TransferFailed { refunded: true });

        error!(
            contract = %job.deposit.contract,
            sender = %job.deposit.sender,
            amount = %job.deposit.amount,
            destination_chain_id = job.destination.map(|d| d.chain_id),
            destination_address = ?job.destination.map(|d| d.address),
            withdrawal_tx = ?job.withdrawal_tx,
            refunded,
            error = %err,
            "Relay job failed; manual recovery required"
        );
        JobOutcome::Failed
    }
}

fn terminal_str(outcome: JobOutcome) -> &'static str {
    match outcome {
        JobOutcome::Done => "done",
        JobOutcome::Unresolved => "unresolved",
        JobOutcome::Failed => "failed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{TransferStatus, TransferTracker};
    use crate::resolver::{DESTINATION_ADDRESS_KEY, DESTINATION_CHAIN_KEY};
    use crate::testutil::{encode_address, encode_b256, encode_string, FakeEngine, FakeLedger};
    use alloy::primitives::{address, b256, B256};
    use std::time::Duration;

    const REGISTRY: Address = address!("00000000000000000000000000000000000000e0");
    const ENS_REGISTRY: Address = address!("00000000000C2E074eC69A0dFb2997BA6C7d2e1e");
    const ENS_RESOLVER: Address = address!("00000000000000000000000000000000000000e5");
    const OPERATOR: Address = address!("00000000000000000000000000000000000000a1");
    const C1: Address = address!("0000000000000000000000000000000000000c01");
    const SENDER: Address = address!("00000000000000000000000000000000000000d1");
    const DEST: Address = address!("000000000000000000000000000000000000BEEF");

    const SOURCE_CHAIN: u64 = 10;

    fn node() -> B256 {
        b256!("3333333333333333333333333333333333333333333333333333333333333333")
    }

    fn deposit() -> DepositEvent {
        DepositEvent {
            contract: C1,
            sender: SENDER,
            amount: U256::from(500),
            block_number: 100,
        }
    }

    fn orchestrator(ledger: Arc<FakeLedger>, engine: Arc<FakeEngine>) -> RelayOrchestrator {
        let resolver = DestinationResolver::new(
            ledger.clone(),
            ledger.clone(),
            REGISTRY,
            ENS_REGISTRY,
        );
        let tracker = TransferTracker::new(
            ledger.clone(),
            engine,
            SOURCE_CHAIN,
            Default::default(),
            Duration::from_millis(1),
            5,
        );
        RelayOrchestrator::new(ledger, resolver, tracker, OPERATOR)
    }

    fn script_node(ledger: &FakeLedger) {
        ledger.script_call(
            REGISTRY,
            crate::contracts::TakeawayRegistry::getSubdomainCall {
                contractAddress: C1,
            }
            .abi_encode(),
            encode_b256(node()),
        );
    }

    fn script_destination(ledger: &FakeLedger, chain_id: u64, address: Address) {
        ledger.script_call(
            ENS_REGISTRY,
            crate::contracts::EnsRegistry::resolverCall { node: node() }.abi_encode(),
            encode_address(ENS_RESOLVER),
        );
        ledger.script_call(
            ENS_RESOLVER,
            crate::contracts::EnsResolver::textCall {
                node: node(),
                key: DESTINATION_CHAIN_KEY.to_string(),
            }
            .abi_encode(),
            encode_string(&chain_id.to_string()),
        );
        ledger.script_call(
            ENS_RESOLVER,
            crate::contracts::EnsResolver::textCall {
                node: node(),
                key: DESTINATION_ADDRESS_KEY.to_string(),
            }
            .abi_encode(),
            encode_string(&address.to_string()),
        );
    }

    fn script_absent_destination(ledger: &FakeLedger) {
        ledger.script_call(
            ENS_REGISTRY,
            crate::contracts::EnsRegistry::resolverCall { node: node() }.abi_encode(),
            encode_address(Address::ZERO),
        );
    }

    #[tokio::test]
    async fn unresolved_destination_skips_withdrawal() {
        // Scenario: deposit of 500 whose resolver finds no destination
        let ledger = Arc::new(FakeLedger::new(100));
        script_node(&ledger);
        script_absent_destination(&ledger);
        let orch = orchestrator(ledger.clone(), Arc::new(FakeEngine::default()));

        let outcome = orch.process_deposit(deposit()).await;
        assert_eq!(outcome, JobOutcome::Unresolved);
        // No withdrawal call was issued
        assert!(ledger.sent_transactions().is_empty());
    }

    #[tokio::test]
    async fn same_chain_destination_relays_directly() {
        // Scenario: destination {chain 10, DEST} with source chain 10
        let ledger = Arc::new(FakeLedger::new(100));
        script_node(&ledger);
        script_destination(&ledger, SOURCE_CHAIN, DEST);
        let engine = Arc::new(FakeEngine::default());
        let orch = orchestrator(ledger.clone(), engine.clone());

        let outcome = orch.process_deposit(deposit()).await;
        assert_eq!(outcome, JobOutcome::Done);
        assert_eq!(engine.plan_calls(), 0);

        let sent = ledger.sent_transactions();
        assert_eq!(sent.len(), 2);
        // First the withdrawal to the operator, then the direct transfer
        assert_eq!(sent[0].0, C1);
        assert_eq!(sent[1].0, DEST);
        assert_eq!(sent[1].2, U256::from(500));
    }

    #[tokio::test]
    async fn cross_chain_destination_relays_via_engine() {
        let ledger = Arc::new(FakeLedger::new(100));
        script_node(&ledger);
        script_destination(&ledger, 1, DEST);
        let engine = Arc::new(FakeEngine::default());
        engine.script_plan(SOURCE_CHAIN, 1);
        engine.script_statuses(&[TransferStatus::Done { partial: false }]);
        let orch = orchestrator(ledger.clone(), engine.clone());

        let outcome = orch.process_deposit(deposit()).await;
        assert_eq!(outcome, JobOutcome::Done);
        assert_eq!(engine.plan_calls(), 1);
        assert_eq!(engine.submit_calls(), 1);
        // Exactly one on-chain send: the withdrawal (the fake engine
        // performs no ledger submission)
        assert_eq!(ledger.sent_transactions().len(), 1);
        assert_eq!(ledger.sent_transactions()[0].0, C1);
    }

    #[tokio::test]
    async fn reverted_withdrawal_fails_the_job() {
        let ledger = Arc::new(FakeLedger::new(100));
        script_node(&ledger);
        script_destination(&ledger, 1, DEST);
        ledger.revert_next_transaction();
        let engine = Arc::new(FakeEngine::default());
        let orch = orchestrator(ledger.clone(), engine.clone());

        let outcome = orch.process_deposit(deposit()).await;
        assert_eq!(outcome, JobOutcome::Failed);
        // Never reached the transfer layer
        assert_eq!(engine.plan_calls(), 0);
    }

    #[tokio::test]
    async fn engine_failure_with_refund_is_terminal_failed() {
        let ledger = Arc::new(FakeLedger::new(100));
        script_node(&ledger);
        script_destination(&ledger, 1, DEST);
        let engine = Arc::new(FakeEngine::default());
        engine.script_plan(SOURCE_CHAIN, 1);
        engine.script_statuses(&[TransferStatus::Failed { refunded: true }]);
        let orch = orchestrator(ledger, engine);

        let outcome = orch.process_deposit(deposit()).await;
        assert_eq!(outcome, JobOutcome::Failed);
    }

    #[tokio::test]
    async fn no_route_ends_unresolved_after_withdrawal() {
        let ledger = Arc::new(FakeLedger::new(100));
        script_node(&ledger);
        script_destination(&ledger, 1, DEST);
        // No plan scripted: engine has no route for the pair
        let orch = orchestrator(ledger.clone(), Arc::new(FakeEngine::default()));

        let outcome = orch.process_deposit(deposit()).await;
        assert_eq!(outcome, JobOutcome::Unresolved);
        // Withdrawal already happened before the route lookup
        assert_eq!(ledger.sent_transactions().len(), 1);
    }

    #[tokio::test]
    async fn registry_failure_fails_the_job() {
        let ledger = Arc::new(FakeLedger::new(100));
        // getSubdomain not scripted: registry lookup fails
        let orch = orchestrator(ledger.clone(), Arc::new(FakeEngine::default()));

        let outcome = orch.process_deposit(deposit()).await;
        assert_eq!(outcome, JobOutcome::Failed);
        assert!(ledger.sent_transactions().is_empty());
    }

    #[tokio::test]
    async fn every_scripted_fault_reaches_a_terminal_state() {
        // State-machine totality across a grid of external outcomes
        for (revert, statuses) in [
            (false, vec![TransferStatus::Done { partial: false }]),
            (false, vec![TransferStatus::Done { partial: true }]),
            (false, vec![TransferStatus::Failed { refunded: false }]),
            (false, vec![TransferStatus::Failed { refunded: true }]),
            (false, vec![]), // poll exhaustion
            (true, vec![]),  // reverted withdrawal
        ] {
            let ledger = Arc::new(FakeLedger::new(100));
            script_node(&ledger);
            script_destination(&ledger, 1, DEST);
            if revert {
                ledger.revert_next_transaction();
            }
            let engine = Arc::new(FakeEngine::default());
            engine.script_plan(SOURCE_CHAIN, 1);
            engine.script_statuses(&statuses);
            let orch = orchestrator(ledger, engine);

            // A terminal outcome is returned; the future completes
            let outcome = tokio::time::timeout(
                Duration::from_secs(5),
                orch.process_deposit(deposit()),
            )
            .await
            .expect("job must terminate");
            assert!(matches!(
                outcome,
                JobOutcome::Done | JobOutcome::Unresolved | JobOutcome::Failed
            ));
        }
    }
}
