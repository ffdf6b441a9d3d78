mod api;
mod bridge;
mod config;
mod contracts;
mod index;
mod ledger;
mod metrics;
mod poller;
mod relay;
mod resolver;
#[cfg(test)]
mod testutil;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use eyre::{eyre, WrapErr};

use bridge::{HttpTransferEngine, TransferTracker};
use config::Config;
use index::DepositIndex;
use ledger::{EvmLedger, LedgerClient};
use poller::DepositPoller;
use relay::RelayOrchestrator;
use resolver::DestinationResolver;

fn main() -> eyre::Result<()> {
    // Install color-eyre for better error reporting
    color_eyre::install()?;

    // Run the async main
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    init_logging();

    tracing::info!("Starting Takeaway Relayer");

    let config = Config::load()?;
    tracing::info!(
        chain_id = config.evm.chain_id,
        factory = %config.evm.factory_address,
        "Configuration loaded"
    );

    let factory_address = Address::from_str(&config.evm.factory_address)
        .wrap_err("Invalid FACTORY_ADDRESS")?;
    let registry_address = Address::from_str(&config.evm.registry_address)
        .wrap_err("Invalid REGISTRY_ADDRESS")?;
    let ens_registry_address = Address::from_str(&config.ens.registry_address)
        .wrap_err("Invalid ENS_REGISTRY_ADDRESS")?;

    let receipt_poll_interval = Duration::from_millis(config.relayer.receipt_poll_interval_ms);

    // Source chain client carries the operator signer; the ENS client is
    // read-only
    let source: Arc<EvmLedger> = Arc::new(EvmLedger::new(
        &config.evm.rpc_url,
        config.evm.chain_id,
        Some(&config.evm.private_key),
        receipt_poll_interval,
        config.relayer.receipt_poll_max_attempts,
    )?);
    let ens: Arc<EvmLedger> = Arc::new(EvmLedger::new(
        &config.ens.rpc_url,
        0,
        None,
        receipt_poll_interval,
        config.relayer.receipt_poll_max_attempts,
    )?);

    let operator_address = source
        .operator_address()
        .ok_or_else(|| eyre!("Source chain client has no signer"))?;
    tracing::info!(operator = %operator_address, "Operator wallet loaded");

    // Backfill factory history before watching the tip; a failed backfill is
    // fatal, a partial contract set must never serve deposits
    let height = source
        .block_number()
        .await
        .wrap_err("Failed to read chain height")?;
    let index = DepositIndex::bootstrap(
        source.as_ref(),
        factory_address,
        config.evm.from_block,
        height,
        config.relayer.bootstrap_chunk_blocks,
    )
    .await
    .wrap_err("Deposit contract bootstrap failed")?;
    tracing::info!(
        known_contracts = index.len(),
        high_water_mark = index.high_water_mark(),
        "Bootstrap complete"
    );

    let source_ledger: Arc<dyn LedgerClient> = source.clone();
    let ens_ledger: Arc<dyn LedgerClient> = ens;

    let resolver = DestinationResolver::new(
        source_ledger.clone(),
        ens_ledger,
        registry_address,
        ens_registry_address,
    );
    let engine = Arc::new(HttpTransferEngine::new(
        &config.bridge.api_url,
        source_ledger.clone(),
        operator_address,
    )?);
    let tracker = TransferTracker::new(
        source_ledger.clone(),
        engine,
        config.evm.chain_id,
        config.bridge.unsupported_chain_ids.iter().copied().collect(),
        Duration::from_millis(config.bridge.status_poll_interval_ms),
        config.bridge.status_poll_max_attempts,
    );
    let orchestrator = Arc::new(RelayOrchestrator::new(
        source_ledger.clone(),
        resolver,
        tracker,
        operator_address,
    ));

    let status = Arc::new(api::StatusShared::new());
    let poller = DepositPoller::new(
        source_ledger,
        orchestrator,
        index,
        status.clone(),
        Duration::from_millis(config.relayer.poll_interval_ms),
        config.relayer.catchup_chunk_blocks,
    );

    // Shutdown channel wired to SIGINT/SIGTERM
    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(()).await;
    });

    // Start metrics/API server
    let api_addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.relayer.api_port));
    tokio::spawn(async move {
        if let Err(e) = api::start_api_server(api_addr, status).await {
            tracing::error!(error = %e, "API server error");
        }
    });

    poller.run(shutdown_rx).await?;

    metrics::set_up(false);
    tracing::info!("Takeaway Relayer stopped");
    Ok(())
}

/// Initialize tracing/logging with structured output
fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,takeaway_relayer=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(filter)
        .init();
}

/// Wait for shutdown signals (SIGINT/SIGTERM)
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
