//! Cross-chain transfer engine client and path selection
//!
//! The engine is a LI.FI-style HTTP API: `GET /quote` returns a single best
//! route with a prepared transaction, the transaction is submitted on the
//! source chain, and `GET /status` is polled until the transfer reaches a
//! terminal state. Chains the engine does not cover — and same-chain
//! destinations — fall back to a direct native transfer.

use alloy::primitives::{Address, Bytes, TxHash, U256};
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use serde::Deserialize;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::ledger::{LedgerClient, ReceiptStatus};
use crate::metrics;
use crate::relay::RelayError;
use crate::resolver::Destination;

/// Native-asset sentinel used by the engine API
const NATIVE_TOKEN: &str = "0x0000000000000000000000000000000000000000";

/// Engine-computed route, ready for submission on the source chain
#[derive(Debug, Clone)]
pub struct TransferPlan {
    /// Engine tool/bridge identifier, echoed back in status queries
    pub tool: String,
    pub from_chain_id: u64,
    pub to_chain_id: u64,
    pub tx_to: Address,
    pub tx_data: Bytes,
    pub tx_value: U256,
}

/// Handle for a submitted transfer
#[derive(Debug, Clone)]
pub struct TransferRef {
    pub tx_hash: TxHash,
    pub tool: String,
    pub from_chain_id: u64,
    pub to_chain_id: u64,
}

/// Engine-reported transfer state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// Not terminal yet (includes "not found yet" on fresh submissions)
    Pending,
    /// Terminal success; `partial` marks a partial-amount completion
    Done { partial: bool },
    /// Terminal failure; `refunded` marks funds returned on the source chain
    Failed { refunded: bool },
}

/// Cross-chain transfer engine boundary
#[async_trait]
pub trait TransferEngine: Send + Sync {
    /// Compute a route; `None` when the engine has no route for the pair
    async fn plan(
        &self,
        from_chain_id: u64,
        to_chain_id: u64,
        amount: U256,
        to_address: Address,
    ) -> Result<Option<TransferPlan>>;

    /// Submit a plan's prepared transaction on the source chain
    async fn submit(&self, plan: &TransferPlan) -> Result<TransferRef, RelayError>;

    /// Current engine status for a submitted transfer
    async fn status(&self, transfer: &TransferRef) -> Result<TransferStatus>;
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    tool: String,
    #[serde(rename = "transactionRequest")]
    transaction_request: Option<QuoteTransactionRequest>,
    estimate: Option<QuoteEstimate>,
}

#[derive(Debug, Deserialize)]
struct QuoteTransactionRequest {
    to: String,
    data: String,
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QuoteEstimate {
    #[serde(rename = "toAmount")]
    to_amount: Option<String>,
    #[serde(rename = "executionDuration")]
    execution_duration: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    substatus: Option<String>,
}

/// HTTP client for the transfer engine's REST API
pub struct HttpTransferEngine {
    client: reqwest::Client,
    base_url: String,
    ledger: Arc<dyn LedgerClient>,
    operator_address: Address,
}

impl HttpTransferEngine {
    pub fn new(
        base_url: &str,
        ledger: Arc<dyn LedgerClient>,
        operator_address: Address,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            ledger,
            operator_address,
        })
    }
}

#[async_trait]
impl TransferEngine for HttpTransferEngine {
    async fn plan(
        &self,
        from_chain_id: u64,
        to_chain_id: u64,
        amount: U256,
        to_address: Address,
    ) -> Result<Option<TransferPlan>> {
        let response = self
            .client
            .get(format!("{}/quote", self.base_url))
            .query(&[
                ("fromChain", from_chain_id.to_string()),
                ("toChain", to_chain_id.to_string()),
                ("fromToken", NATIVE_TOKEN.to_string()),
                ("toToken", NATIVE_TOKEN.to_string()),
                ("fromAmount", amount.to_string()),
                ("fromAddress", self.operator_address.to_string()),
                ("toAddress", to_address.to_string()),
            ])
            .send()
            .await
            .wrap_err("Quote request failed")?;

        // The engine answers 404 when no route exists for the pair
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(eyre!("Quote request returned {}", response.status()));
        }

        let quote: QuoteResponse = response.json().await.wrap_err("Invalid quote response")?;

        let Some(tx) = quote.transaction_request else {
            return Err(eyre!("Quote did not include a transaction request"));
        };

        if let Some(estimate) = &quote.estimate {
            debug!(
                tool = %quote.tool,
                to_amount = ?estimate.to_amount,
                execution_duration_secs = ?estimate.execution_duration,
                "Quote received"
            );
        }

        let tx_to = Address::from_str(&tx.to).wrap_err("Quote has invalid `to` address")?;
        let tx_data = Bytes::from_str(&tx.data).wrap_err("Quote has invalid calldata")?;
        let tx_value = match tx.value.as_deref() {
            Some(v) => v.parse::<U256>().wrap_err("Quote has invalid value")?,
            None => U256::ZERO,
        };

        Ok(Some(TransferPlan {
            tool: quote.tool,
            from_chain_id,
            to_chain_id,
            tx_to,
            tx_data,
            tx_value,
        }))
    }

    async fn submit(&self, plan: &TransferPlan) -> Result<TransferRef, RelayError> {
        let tx_hash = self
            .ledger
            .send_transaction(plan.tx_to, plan.tx_data.clone(), plan.tx_value)
            .await
            .map_err(|e| RelayError::external("transfer submission", e))?;

        info!(tx_hash = %tx_hash, tool = %plan.tool, "Transfer transaction submitted");

        let receipt = self
            .ledger
            .wait_for_receipt(tx_hash)
            .await
            .map_err(|e| RelayError::external("transfer confirmation", e))?;

        if receipt.status == ReceiptStatus::Reverted {
            return Err(RelayError::SubmissionReverted { tx_hash });
        }

        info!(
            tx_hash = %tx_hash,
            block_number = receipt.block_number,
            "Transfer transaction confirmed on source chain"
        );

        Ok(TransferRef {
            tx_hash,
            tool: plan.tool.clone(),
            from_chain_id: plan.from_chain_id,
            to_chain_id: plan.to_chain_id,
        })
    }

    async fn status(&self, transfer: &TransferRef) -> Result<TransferStatus> {
        let response: StatusResponse = self
            .client
            .get(format!("{}/status", self.base_url))
            .query(&[
                ("txHash", format!("{:#x}", transfer.tx_hash)),
                ("bridge", transfer.tool.clone()),
                ("fromChain", transfer.from_chain_id.to_string()),
                ("toChain", transfer.to_chain_id.to_string()),
            ])
            .send()
            .await
            .wrap_err("Status request failed")?
            .json()
            .await
            .wrap_err("Invalid status response")?;

        let substatus = response.substatus.as_deref().unwrap_or("");
        let status = match response.status.as_str() {
            "DONE" => TransferStatus::Done {
                partial: substatus == "PARTIAL",
            },
            "FAILED" => TransferStatus::Failed {
                refunded: substatus == "REFUNDED",
            },
            // PENDING / NOT_FOUND and anything unrecognized: keep polling
            _ => TransferStatus::Pending,
        };
        Ok(status)
    }
}

/// Which leg a transfer takes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPath {
    /// Native value transfer straight to the destination address
    Direct,
    /// Cross-chain engine route
    Engine,
}

/// Terminal outcome of a tracked transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Completed { partial: bool },
    /// The engine has no route for the pair — a business outcome, not a
    /// defect; the job ends unresolved
    NoRoute,
}

/// Drives a transfer to a terminal state, choosing between the engine and
/// the direct fallback
pub struct TransferTracker {
    ledger: Arc<dyn LedgerClient>,
    engine: Arc<dyn TransferEngine>,
    source_chain_id: u64,
    unsupported_chains: HashSet<u64>,
    status_poll_interval: Duration,
    status_poll_max_attempts: u32,
}

impl TransferTracker {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        engine: Arc<dyn TransferEngine>,
        source_chain_id: u64,
        unsupported_chains: HashSet<u64>,
        status_poll_interval: Duration,
        status_poll_max_attempts: u32,
    ) -> Self {
        Self {
            ledger,
            engine,
            source_chain_id,
            unsupported_chains,
            status_poll_interval,
            status_poll_max_attempts,
        }
    }

    /// Direct transfer when the destination is on the source chain or when
    /// the engine does not support either end of the pair.
    pub fn select_path(&self, destination_chain_id: u64) -> TransferPath {
        if destination_chain_id == self.source_chain_id
            || self.unsupported_chains.contains(&self.source_chain_id)
            || self.unsupported_chains.contains(&destination_chain_id)
        {
            TransferPath::Direct
        } else {
            TransferPath::Engine
        }
    }

    /// Move `amount` to `destination`, blocking until a terminal state.
    pub async fn relay(
        &self,
        amount: U256,
        destination: &Destination,
    ) -> Result<TransferOutcome, RelayError> {
        match self.select_path(destination.chain_id) {
            TransferPath::Direct => self.relay_direct(amount, destination).await,
            TransferPath::Engine => self.relay_engine(amount, destination).await,
        }
    }

    async fn relay_direct(
        &self,
        amount: U256,
        destination: &Destination,
    ) -> Result<TransferOutcome, RelayError> {
        info!(
            destination_chain_id = destination.chain_id,
            destination_address = %destination.address,
            amount = %amount,
            "Relaying via direct transfer"
        );

        let tx_hash = self
            .ledger
            .send_transaction(destination.address, Bytes::new(), amount)
            .await
            .map_err(|e| RelayError::external("direct transfer", e))?;

        let receipt = self
            .ledger
            .wait_for_receipt(tx_hash)
            .await
            .map_err(|e| RelayError::external("direct transfer confirmation", e))?;

        if receipt.status == ReceiptStatus::Reverted {
            return Err(RelayError::SubmissionReverted { tx_hash });
        }

        info!(
            tx_hash = %tx_hash,
            block_number = receipt.block_number,
            "Direct transfer confirmed"
        );
        Ok(TransferOutcome::Completed { partial: false })
    }

    async fn relay_engine(
        &self,
        amount: U256,
        destination: &Destination,
    ) -> Result<TransferOutcome, RelayError> {
        let plan = self
            .engine
            .plan(
                self.source_chain_id,
                destination.chain_id,
                amount,
                destination.address,
            )
            .await
            .map_err(|e| RelayError::external("transfer planning", e))?;

        let Some(plan) = plan else {
            warn!(
                source_chain_id = self.source_chain_id,
                destination_chain_id = destination.chain_id,
                amount = %amount,
                "Engine has no route for this pair"
            );
            return Ok(TransferOutcome::NoRoute);
        };

        let transfer = self.engine.submit(&plan).await?;
        self.poll_to_terminal(&transfer).await
    }

    /// Poll engine status on a fixed interval until terminal. Exhaustion is
    /// a hard failure — a permanently stuck transfer must not pin a task
    /// forever.
    async fn poll_to_terminal(
        &self,
        transfer: &TransferRef,
    ) -> Result<TransferOutcome, RelayError> {
        for attempt in 1..=self.status_poll_max_attempts {
            tokio::time::sleep(self.status_poll_interval).await;
            metrics::record_status_poll();

            let status = match self.engine.status(transfer).await {
                Ok(status) => status,
                Err(e) => {
                    // Transient status-API failure: keep polling
                    warn!(
                        tx_hash = %transfer.tx_hash,
                        attempt,
                        error = %e,
                        "Transfer status query failed"
                    );
                    continue;
                }
            };

            debug!(
                tx_hash = %transfer.tx_hash,
                attempt,
                ?status,
                "Transfer status poll"
            );

            match status {
                TransferStatus::Pending => continue,
                TransferStatus::Done { partial } => {
                    info!(
                        tx_hash = %transfer.tx_hash,
                        partial,
                        "Transfer completed"
                    );
                    return Ok(TransferOutcome::Completed { partial });
                }
                TransferStatus::Failed { refunded } => {
                    return Err(RelayError::TransferFailed { refunded });
                }
            }
        }

        Err(RelayError::StatusPollExhausted {
            attempts: self.status_poll_max_attempts,
        })
    }
}
