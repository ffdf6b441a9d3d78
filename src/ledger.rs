//! Ledger client boundary
//!
//! All chain access goes through the `LedgerClient` trait so the index,
//! resolver and orchestrator can be driven by scripted fakes in tests. The
//! production implementation wraps an alloy HTTP provider with an optional
//! local signer.

use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{Filter, Log, TransactionRequest};
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Result of a confirmed transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    /// Included and not reverted
    Included,
    /// Included but reverted
    Reverted,
}

/// Receipt returned by [`LedgerClient::wait_for_receipt`]
#[derive(Debug, Clone, Copy)]
pub struct TxReceipt {
    pub status: ReceiptStatus,
    pub block_number: u64,
}

/// Chain access used by the index, poller, resolver and orchestrator
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Current chain height
    async fn block_number(&self) -> Result<u64>;

    /// Event logs matching `filter`
    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>>;

    /// Read-only eth_call against `to`
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes>;

    /// Sign and submit a transaction, returning its hash without waiting
    async fn send_transaction(&self, to: Address, data: Bytes, value: U256) -> Result<TxHash>;

    /// Block until the transaction is included, or attempts are exhausted
    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<TxReceipt>;
}

/// Alloy-backed ledger client for one EVM chain
pub struct EvmLedger {
    provider: RootProvider<Http<Client>>,
    rpc_url: String,
    chain_id: u64,
    signer: Option<PrivateKeySigner>,
    receipt_poll_interval: Duration,
    receipt_poll_max_attempts: u32,
    /// Serializes submissions sharing the operator key so concurrent jobs
    /// never race on nonce assignment.
    submit_lock: Mutex<()>,
}

impl EvmLedger {
    /// Create a ledger client. `private_key` is required only for chains the
    /// relayer writes to; read-only clients (ENS) pass `None`.
    pub fn new(
        rpc_url: &str,
        chain_id: u64,
        private_key: Option<&str>,
        receipt_poll_interval: Duration,
        receipt_poll_max_attempts: u32,
    ) -> Result<Self> {
        let url = rpc_url.parse().wrap_err("Invalid RPC URL")?;
        let provider = ProviderBuilder::new().on_http(url);

        let signer = match private_key {
            Some(key) => {
                let signer: PrivateKeySigner = key.parse().wrap_err("Invalid private key")?;
                info!(
                    chain_id,
                    operator_address = %signer.address(),
                    "Ledger client initialized with signer"
                );
                Some(signer)
            }
            None => {
                info!(chain_id, "Read-only ledger client initialized");
                None
            }
        };

        Ok(Self {
            provider,
            rpc_url: rpc_url.to_string(),
            chain_id,
            signer,
            receipt_poll_interval,
            receipt_poll_max_attempts,
            submit_lock: Mutex::new(()),
        })
    }

    /// Address of the configured signer
    pub fn operator_address(&self) -> Option<Address> {
        self.signer.as_ref().map(|s| s.address())
    }

    /// Chain ID this client talks to
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }
}

#[async_trait]
impl LedgerClient for EvmLedger {
    async fn block_number(&self) -> Result<u64> {
        let block = self
            .provider
            .get_block_number()
            .await
            .wrap_err("Failed to get block number")?;
        Ok(block)
    }

    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>> {
        let logs = self
            .provider
            .get_logs(filter)
            .await
            .wrap_err("Failed to get logs")?;
        Ok(logs)
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes> {
        let tx = TransactionRequest::default().with_to(to).with_input(data);
        let out = self
            .provider
            .call(&tx)
            .await
            .wrap_err_with(|| format!("eth_call to {} failed", to))?;
        Ok(out)
    }

    async fn send_transaction(&self, to: Address, data: Bytes, value: U256) -> Result<TxHash> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| eyre!("Ledger client for chain {} has no signer", self.chain_id))?;

        // Held across submission only; receipt waiting happens outside the
        // lock so one slow confirmation does not stall other jobs.
        let _guard = self.submit_lock.lock().await;

        let wallet = EthereumWallet::from(signer.clone());
        let provider = ProviderBuilder::new()
            .wallet(wallet)
            .on_http(self.rpc_url.parse().wrap_err("Invalid RPC URL")?);

        let tx = TransactionRequest::default()
            .with_from(signer.address())
            .with_to(to)
            .with_input(data)
            .with_value(value);

        let pending = provider
            .send_transaction(tx)
            .await
            .map_err(|e| eyre!("Failed to send transaction: {}", e))?;

        let tx_hash = *pending.tx_hash();
        debug!(chain_id = self.chain_id, tx_hash = %tx_hash, "Transaction submitted");

        Ok(tx_hash)
    }

    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<TxReceipt> {
        for attempt in 0..self.receipt_poll_max_attempts {
            match self.provider.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    let block_number = receipt
                        .block_number
                        .ok_or_else(|| eyre!("Receipt for {} has no block number", tx_hash))?;
                    let status = if receipt.status() {
                        ReceiptStatus::Included
                    } else {
                        ReceiptStatus::Reverted
                    };
                    debug!(
                        tx_hash = %tx_hash,
                        block_number,
                        ?status,
                        "Transaction receipt received"
                    );
                    return Ok(TxReceipt {
                        status,
                        block_number,
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(
                        tx_hash = %tx_hash,
                        attempt,
                        error = %e,
                        "Receipt query failed, will retry"
                    );
                }
            }
            tokio::time::sleep(self.receipt_poll_interval).await;
        }

        Err(eyre!(
            "No receipt for {} after {} attempts",
            tx_hash,
            self.receipt_poll_max_attempts
        ))
    }
}
