//! Destination resolution via the Takeaway registry and ENS text records
//!
//! A deposit contract maps to an ENS subdomain namehash through the on-chain
//! registry; the destination chain and address live in two text records
//! under that node. ENS lives on its own chain, reached through a dedicated
//! ledger client. Destinations are fetched fresh for every relay — the
//! records may change between deposits, so nothing here is cached.

use alloy::primitives::{Address, Bytes, B256};
use alloy::sol_types::SolCall;
use eyre::{Result, WrapErr};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::contracts::{EnsRegistry, EnsResolver, TakeawayRegistry};
use crate::ledger::LedgerClient;

/// ENS text record holding the destination chain id
pub const DESTINATION_CHAIN_KEY: &str = "io.takeaway.destinationChainId";
/// ENS text record holding the destination address
pub const DESTINATION_ADDRESS_KEY: &str = "io.takeaway.destinationAddress";

/// Where a deposit should end up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Destination {
    pub chain_id: u64,
    pub address: Address,
}

/// Resolves deposit contracts to configured destinations
pub struct DestinationResolver {
    source: Arc<dyn LedgerClient>,
    ens: Arc<dyn LedgerClient>,
    registry_address: Address,
    ens_registry_address: Address,
}

impl DestinationResolver {
    pub fn new(
        source: Arc<dyn LedgerClient>,
        ens: Arc<dyn LedgerClient>,
        registry_address: Address,
        ens_registry_address: Address,
    ) -> Self {
        Self {
            source,
            ens,
            registry_address,
            ens_registry_address,
        }
    }

    /// Look up the ENS namehash registered for a deposit contract.
    ///
    /// A failed registry read is a hard error for the job — the relay must
    /// not guess a destination.
    pub async fn record_key(&self, deposit_contract: Address) -> Result<B256> {
        let data = TakeawayRegistry::getSubdomainCall {
            contractAddress: deposit_contract,
        }
        .abi_encode();

        let raw = self
            .source
            .call(self.registry_address, Bytes::from(data))
            .await
            .wrap_err("Registry getSubdomain call failed")?;

        let node = TakeawayRegistry::getSubdomainCall::abi_decode_returns(&raw, true)
            .wrap_err("Failed to decode getSubdomain return")?
            ._0;

        debug!(contract = %deposit_contract, node = %node, "Resolved subdomain namehash");
        Ok(node)
    }

    /// Read the destination configured under an ENS node.
    ///
    /// Returns `None` when no resolver is set, either text record is empty,
    /// or either record is malformed — an unconfigured destination is an
    /// expected state, not an error.
    pub async fn destination(&self, node: B256) -> Result<Option<Destination>> {
        let resolver = self.resolver_for(node).await?;
        if resolver == Address::ZERO {
            return Ok(None);
        }

        let chain_id_str = self.text(resolver, node, DESTINATION_CHAIN_KEY).await;
        let address_str = self.text(resolver, node, DESTINATION_ADDRESS_KEY).await;

        if chain_id_str.is_empty() || address_str.is_empty() {
            return Ok(None);
        }

        let chain_id = match chain_id_str.parse::<u64>() {
            Ok(id) => id,
            Err(_) => {
                warn!(
                    node = %node,
                    value = %chain_id_str,
                    "Destination chain id record is not a valid integer"
                );
                return Ok(None);
            }
        };

        let address = match Address::from_str(&address_str) {
            Ok(addr) => addr,
            Err(_) => {
                warn!(
                    node = %node,
                    value = %address_str,
                    "Destination address record is not a valid address"
                );
                return Ok(None);
            }
        };

        Ok(Some(Destination { chain_id, address }))
    }

    /// Resolver contract registered for a node. A failed registry read here
    /// is a hard error; a zero resolver is handled by the caller.
    async fn resolver_for(&self, node: B256) -> Result<Address> {
        let data = EnsRegistry::resolverCall { node }.abi_encode();
        let raw = self
            .ens
            .call(self.ens_registry_address, Bytes::from(data))
            .await
            .wrap_err("ENS resolver lookup failed")?;

        let resolver = EnsRegistry::resolverCall::abi_decode_returns(&raw, true)
            .wrap_err("Failed to decode ENS resolver return")?
            ._0;
        Ok(resolver)
    }

    /// Text record under a node. Read failures are treated as an unset
    /// record, matching the presence contract of [`Self::destination`].
    async fn text(&self, resolver: Address, node: B256, key: &str) -> String {
        let data = EnsResolver::textCall {
            node,
            key: key.to_string(),
        }
        .abi_encode();

        let raw = match self.ens.call(resolver, Bytes::from(data)).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(node = %node, key, error = %e, "ENS text record read failed");
                return String::new();
            }
        };

        match EnsResolver::textCall::abi_decode_returns(&raw, true) {
            Ok(ret) => ret._0,
            Err(e) => {
                warn!(node = %node, key, error = %e, "ENS text record decode failed");
                String::new()
            }
        }
    }
}
