//! Deposit contract registry index
//!
//! Maintains the set of deposit contracts the factory has created, built
//! once from history and kept current by the poller. The index owns its
//! state; nothing else mutates the contract set or the high-water mark.

use alloy::primitives::Address;
use alloy::rpc::types::Filter;
use alloy::sol_types::SolEvent;
use eyre::{Result, WrapErr};
use std::collections::HashSet;
use tracing::{debug, error, info};

use crate::contracts::TakeawayFactory::DepositContractCreated;
use crate::ledger::LedgerClient;
use crate::metrics;

/// Set of known deposit contracts plus the height they are indexed to
pub struct DepositIndex {
    factory_address: Address,
    known_contracts: HashSet<Address>,
    high_water_mark: u64,
}

impl DepositIndex {
    /// Build the index from historical factory logs over `[from, to]`.
    ///
    /// Chunks are contiguous and non-overlapping; any failed chunk aborts
    /// the whole bootstrap, since a silently incomplete index is worse than
    /// a crashed start. The high-water mark is set only after every chunk
    /// succeeded.
    pub async fn bootstrap(
        ledger: &dyn LedgerClient,
        factory_address: Address,
        from: u64,
        to: u64,
        chunk_size: u64,
    ) -> Result<Self> {
        let mut index = Self {
            factory_address,
            known_contracts: HashSet::new(),
            high_water_mark: to,
        };

        if from > to {
            info!(from, to, "No blocks to bootstrap from");
            return Ok(index);
        }

        info!(
            from,
            to,
            chunk_size,
            "Bootstrapping deposit contract index from factory history"
        );

        let chunks = index
            .scan_created(ledger, from, to, chunk_size)
            .await
            .wrap_err("Index bootstrap aborted on failed chunk")?;

        info!(
            contracts = index.known_contracts.len(),
            high_water_mark = to,
            chunks,
            "Deposit contract index bootstrapped"
        );

        Ok(index)
    }

    /// Apply factory discovery over `[from, to]` to the existing index.
    ///
    /// No-op when the range is empty or already covered. Idempotent: set
    /// insertion tolerates re-querying a range after a failed tick. Returns
    /// the contracts that are new to the index.
    pub async fn discover_range(
        &mut self,
        ledger: &dyn LedgerClient,
        from: u64,
        to: u64,
        chunk_size: u64,
    ) -> Result<Vec<Address>> {
        if to <= self.high_water_mark || from > to {
            return Ok(Vec::new());
        }
        let from = from.max(self.high_water_mark + 1);

        let before: HashSet<Address> = self.known_contracts.clone();
        self.scan_created(ledger, from, to, chunk_size).await?;
        self.high_water_mark = to;

        let added: Vec<Address> = self
            .known_contracts
            .difference(&before)
            .copied()
            .collect();
        for contract in &added {
            info!(contract = %contract, "New deposit contract discovered");
        }
        Ok(added)
    }

    /// Query `DepositContractCreated` logs in fixed-size chunks and insert
    /// every discovered contract. Returns the number of chunks queried.
    async fn scan_created(
        &mut self,
        ledger: &dyn LedgerClient,
        from: u64,
        to: u64,
        chunk_size: u64,
    ) -> Result<u64> {
        let chunk_size = chunk_size.max(1);
        let mut cursor = from;
        let mut chunks = 0u64;

        while cursor <= to {
            let end = to.min(cursor + chunk_size - 1);
            chunks += 1;

            let filter = Filter::new()
                .address(self.factory_address)
                .event_signature(DepositContractCreated::SIGNATURE_HASH)
                .from_block(cursor)
                .to_block(end);

            let logs = ledger
                .get_logs(&filter)
                .await
                .wrap_err_with(|| format!("Factory log query failed for blocks {cursor}-{end}"))?;

            for log in logs {
                match DepositContractCreated::decode_log(&log.inner, true) {
                    Ok(event) => {
                        if self.known_contracts.insert(event.data.depositContract) {
                            metrics::record_contract_discovered();
                            debug!(
                                contract = %event.data.depositContract,
                                block_number = log.block_number,
                                "Indexed deposit contract"
                            );
                        }
                    }
                    Err(e) => {
                        error!(
                            tx_hash = ?log.transaction_hash,
                            log_index = ?log.log_index,
                            error = %e,
                            "Failed to decode factory log"
                        );
                    }
                }
            }

            cursor = end + 1;
        }

        metrics::set_known_contracts(self.known_contracts.len());
        Ok(chunks)
    }

    pub fn contains(&self, contract: &Address) -> bool {
        self.known_contracts.contains(contract)
    }

    pub fn is_empty(&self) -> bool {
        self.known_contracts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.known_contracts.len()
    }

    pub fn high_water_mark(&self) -> u64 {
        self.high_water_mark
    }

    /// Snapshot of the known contracts, for log-filter construction
    pub fn contracts(&self) -> Vec<Address> {
        self.known_contracts.iter().copied().collect()
    }
}
