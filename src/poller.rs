//! Deposit polling loop
//!
//! A single scheduled loop drives everything: read the chain height, feed
//! new blocks to the index for discovery, query deposit events across the
//! known contract set, and dispatch each deposit into its own task without
//! waiting for it. Polling over HTTP is deliberate — push subscriptions on
//! public RPC endpoints are flaky, a scheduled-interval loop is not.
//!
//! Ticks never overlap (the loop is sequential); dispatched jobs do.

use alloy::rpc::types::Filter;
use alloy::sol_types::SolEvent;
use eyre::{Result, WrapErr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::api::StatusShared;
use crate::contracts::TakeawayDeposit::Deposit;
use crate::index::DepositIndex;
use crate::ledger::LedgerClient;
use crate::metrics;
use crate::relay::{DepositEvent, JobOutcome, RelayOrchestrator};

pub struct DepositPoller {
    ledger: Arc<dyn LedgerClient>,
    orchestrator: Arc<RelayOrchestrator>,
    index: DepositIndex,
    status: Arc<StatusShared>,
    poll_interval: Duration,
    catchup_chunk: u64,
    /// Last height whose deposit events have been queried. Advanced only
    /// after the tick's log queries succeed, so a failed tick re-queries
    /// the same range (idempotent by set-insertion discovery and per-event
    /// dispatch being downstream).
    last_polled: u64,
    /// Dispatched relay jobs. Fire-and-forget: the poller reaps finished
    /// tasks each tick but never waits on them.
    jobs: JoinSet<JobOutcome>,
}

impl DepositPoller {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        orchestrator: Arc<RelayOrchestrator>,
        index: DepositIndex,
        status: Arc<StatusShared>,
        poll_interval: Duration,
        catchup_chunk: u64,
    ) -> Self {
        let last_polled = index.high_water_mark();
        Self {
            ledger,
            orchestrator,
            index,
            status,
            poll_interval,
            catchup_chunk,
            last_polled,
            jobs: JoinSet::new(),
        }
    }

    /// Run the polling loop until shutdown. A failed tick is logged and the
    /// range retried on the next interval; only the loop's own queries can
    /// delay a tick, never dispatched jobs.
    pub async fn run(mut self, mut shutdown: mpsc::Receiver<()>) -> Result<()> {
        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            known_contracts = self.index.len(),
            from_height = self.last_polled,
            "Deposit poller started"
        );

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(
                        jobs_in_flight = self.jobs.len(),
                        "Deposit poller shutdown"
                    );
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!(error = %e, "Poll tick failed, will retry next interval");
                        metrics::record_error("poller");
                    }
                }
            }
        }

        Ok(())
    }

    /// One tick: discover new contracts, scan their deposits, dispatch.
    async fn tick(&mut self) -> Result<()> {
        self.reap_finished_jobs();

        let current = self
            .ledger
            .block_number()
            .await
            .wrap_err("Chain height query failed")?;

        if current <= self.last_polled {
            debug!(height = current, "No new blocks");
            return Ok(());
        }

        let from = self.last_polled + 1;

        self.index
            .discover_range(self.ledger.as_ref(), from, current, self.catchup_chunk)
            .await?;

        if !self.index.is_empty() {
            self.scan_deposits(from, current).await?;
        }

        self.last_polled = current;
        metrics::record_poll(current);
        self.status.record_poll(current, self.index.len(), self.jobs.len());
        Ok(())
    }

    /// Query `Deposit` logs across the full known set, chunked like the
    /// discovery scan, and dispatch one job per event.
    async fn scan_deposits(&mut self, from: u64, to: u64) -> Result<()> {
        let contracts = self.index.contracts();
        let chunk_size = self.catchup_chunk.max(1);
        let mut cursor = from;

        while cursor <= to {
            let end = to.min(cursor + chunk_size - 1);

            let filter = Filter::new()
                .address(contracts.clone())
                .event_signature(Deposit::SIGNATURE_HASH)
                .from_block(cursor)
                .to_block(end);

            let logs = self
                .ledger
                .get_logs(&filter)
                .await
                .wrap_err_with(|| format!("Deposit log query failed for blocks {cursor}-{end}"))?;

            for log in logs {
                let event = match Deposit::decode_log(&log.inner, true) {
                    Ok(event) => event,
                    Err(e) => {
                        error!(
                            tx_hash = ?log.transaction_hash,
                            log_index = ?log.log_index,
                            error = %e,
                            "Failed to decode deposit log"
                        );
                        continue;
                    }
                };

                let deposit = DepositEvent {
                    contract: event.address,
                    sender: event.data.from,
                    amount: event.data.amount,
                    block_number: log.block_number.unwrap_or(end),
                };

                info!(
                    contract = %deposit.contract,
                    sender = %deposit.sender,
                    amount = %deposit.amount,
                    block_number = deposit.block_number,
                    "Deposit detected"
                );
                metrics::record_deposit_detected();
                self.dispatch(deposit);
            }

            cursor = end + 1;
        }

        Ok(())
    }

    /// Fire-and-forget: the tick continues without awaiting the job.
    fn dispatch(&mut self, deposit: DepositEvent) {
        let orchestrator = self.orchestrator.clone();
        self.jobs
            .spawn(async move { orchestrator.process_deposit(deposit).await });
        self.status.record_dispatch();
    }

    fn reap_finished_jobs(&mut self) {
        while let Some(result) = self.jobs.try_join_next() {
            if let Err(e) = result {
                error!(error = %e, "Relay job task panicked");
            }
        }
    }

    /// Await every dispatched job; deterministic assertion hook for tests.
    #[cfg(test)]
    async fn join_dispatched(&mut self) -> Vec<JobOutcome> {
        let mut outcomes = Vec::new();
        while let Some(result) = self.jobs.join_next().await {
            outcomes.push(result.expect("job task panicked"));
        }
        outcomes
    }
}
