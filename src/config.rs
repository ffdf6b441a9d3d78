use eyre::{eyre, Result, WrapErr};
use serde::Deserialize;
use std::env;
use std::fmt;
use std::path::Path;

/// Main configuration for the relayer
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub evm: EvmConfig,
    pub ens: EnsConfig,
    pub relayer: RelayerConfig,
    pub bridge: BridgeConfig,
}

/// Source chain configuration
#[derive(Clone, Deserialize)]
pub struct EvmConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    /// Factory that emits DepositContractCreated events
    pub factory_address: String,
    /// Registry mapping deposit contracts to ENS subdomain nodes
    pub registry_address: String,
    pub private_key: String,
    /// Block from which to backfill factory history on startup
    #[serde(default)]
    pub from_block: u64,
}

/// Custom Debug that redacts private_key to prevent accidental log leakage.
impl fmt::Debug for EvmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvmConfig")
            .field("rpc_url", &self.rpc_url)
            .field("chain_id", &self.chain_id)
            .field("factory_address", &self.factory_address)
            .field("registry_address", &self.registry_address)
            .field("private_key", &"<redacted>")
            .field("from_block", &self.from_block)
            .finish()
    }
}

/// ENS configuration. Destination records live on a separate chain
/// (typically mainnet), so this carries its own RPC endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct EnsConfig {
    pub rpc_url: String,
    #[serde(default = "default_ens_registry")]
    pub registry_address: String,
}

/// Relayer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RelayerConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_bootstrap_chunk")]
    pub bootstrap_chunk_blocks: u64,
    #[serde(default = "default_catchup_chunk")]
    pub catchup_chunk_blocks: u64,
    #[serde(default = "default_receipt_poll_interval")]
    pub receipt_poll_interval_ms: u64,
    #[serde(default = "default_receipt_poll_attempts")]
    pub receipt_poll_max_attempts: u32,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
}

/// Transfer engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_bridge_api_url")]
    pub api_url: String,
    /// Destination chain IDs the engine cannot route to; transfers to these
    /// fall back to a direct native send on the source chain
    #[serde(default)]
    pub unsupported_chain_ids: Vec<u64>,
    #[serde(default = "default_status_poll_interval")]
    pub status_poll_interval_ms: u64,
    #[serde(default = "default_status_poll_attempts")]
    pub status_poll_max_attempts: u32,
}

/// Default functions
fn default_ens_registry() -> String {
    // Canonical ENS registry, same address on mainnet and testnets
    "0x00000000000C2E074eC69A0dFb2997BA6C7d2e1e".to_string()
}

fn default_poll_interval() -> u64 {
    5000
}

fn default_bootstrap_chunk() -> u64 {
    1000
}

fn default_catchup_chunk() -> u64 {
    2000
}

fn default_receipt_poll_interval() -> u64 {
    2000
}

fn default_receipt_poll_attempts() -> u32 {
    150
}

fn default_api_port() -> u16 {
    9090
}

fn default_bridge_api_url() -> String {
    "https://li.quest/v1".to_string()
}

fn default_status_poll_interval() -> u64 {
    10_000
}

fn default_status_poll_attempts() -> u32 {
    180
}

impl Config {
    /// Load configuration from environment variables
    /// Loads .env file if present, then reads from environment
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env").or_else(|_| Self::load_from_env())
    }

    /// Load from a specific .env file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::load_from_env()
    }

    /// Load configuration from environment variables
    fn load_from_env() -> Result<Self> {
        let evm = EvmConfig {
            rpc_url: env::var("EVM_RPC_URL")
                .map_err(|_| eyre!("EVM_RPC_URL environment variable is required"))?,
            chain_id: env::var("EVM_CHAIN_ID")
                .map_err(|_| eyre!("EVM_CHAIN_ID environment variable is required"))?
                .parse()
                .wrap_err("EVM_CHAIN_ID must be a valid u64")?,
            factory_address: env::var("FACTORY_ADDRESS")
                .map_err(|_| eyre!("FACTORY_ADDRESS environment variable is required"))?,
            registry_address: env::var("REGISTRY_ADDRESS")
                .map_err(|_| eyre!("REGISTRY_ADDRESS environment variable is required"))?,
            private_key: env::var("EVM_PRIVATE_KEY")
                .map_err(|_| eyre!("EVM_PRIVATE_KEY environment variable is required"))?,
            from_block: env::var("FROM_BLOCK")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
        };

        let ens = EnsConfig {
            rpc_url: env::var("ENS_RPC_URL")
                .map_err(|_| eyre!("ENS_RPC_URL environment variable is required"))?,
            registry_address: env::var("ENS_REGISTRY_ADDRESS")
                .unwrap_or_else(|_| default_ens_registry()),
        };

        let relayer = RelayerConfig {
            poll_interval_ms: env::var("POLL_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_poll_interval()),
            bootstrap_chunk_blocks: env::var("BOOTSTRAP_CHUNK_BLOCKS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_bootstrap_chunk()),
            catchup_chunk_blocks: env::var("CATCHUP_CHUNK_BLOCKS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_catchup_chunk()),
            receipt_poll_interval_ms: env::var("RECEIPT_POLL_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_receipt_poll_interval()),
            receipt_poll_max_attempts: env::var("RECEIPT_POLL_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_receipt_poll_attempts()),
            api_port: env::var("API_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_api_port()),
        };

        let bridge = BridgeConfig {
            api_url: env::var("BRIDGE_API_URL").unwrap_or_else(|_| default_bridge_api_url()),
            unsupported_chain_ids: env::var("BRIDGE_UNSUPPORTED_CHAIN_IDS")
                .ok()
                .map(|v| parse_chain_ids(&v))
                .transpose()?
                .unwrap_or_default(),
            status_poll_interval_ms: env::var("STATUS_POLL_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_status_poll_interval()),
            status_poll_max_attempts: env::var("STATUS_POLL_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_status_poll_attempts()),
        };

        let config = Config {
            evm,
            ens,
            relayer,
            bridge,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.evm.rpc_url.is_empty() {
            return Err(eyre!("evm.rpc_url cannot be empty"));
        }

        validate_address(&self.evm.factory_address, "evm.factory_address")?;
        validate_address(&self.evm.registry_address, "evm.registry_address")?;

        if self.evm.private_key.len() != 66 || !self.evm.private_key.starts_with("0x") {
            return Err(eyre!("evm.private_key must be 66 chars (0x + 64 hex chars)"));
        }

        if self.ens.rpc_url.is_empty() {
            return Err(eyre!("ens.rpc_url cannot be empty"));
        }
        validate_address(&self.ens.registry_address, "ens.registry_address")?;

        if self.relayer.poll_interval_ms == 0 {
            return Err(eyre!("relayer.poll_interval_ms must be greater than zero"));
        }
        if self.relayer.bootstrap_chunk_blocks == 0 {
            return Err(eyre!(
                "relayer.bootstrap_chunk_blocks must be greater than zero"
            ));
        }
        if self.relayer.catchup_chunk_blocks == 0 {
            return Err(eyre!(
                "relayer.catchup_chunk_blocks must be greater than zero"
            ));
        }

        if self.bridge.api_url.is_empty() {
            return Err(eyre!("bridge.api_url cannot be empty"));
        }
        if self.bridge.status_poll_max_attempts == 0 {
            return Err(eyre!(
                "bridge.status_poll_max_attempts must be greater than zero"
            ));
        }

        Ok(())
    }
}

fn validate_address(address: &str, field: &str) -> Result<()> {
    if address.len() != 42 || !address.starts_with("0x") {
        return Err(eyre!(
            "{field} must be a valid hex address (42 chars with 0x prefix)"
        ));
    }
    Ok(())
}

fn parse_chain_ids(raw: &str) -> Result<Vec<u64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u64>()
                .wrap_err_with(|| format!("Invalid chain ID in BRIDGE_UNSUPPORTED_CHAIN_IDS: {part}"))
        })
        .collect()
}
