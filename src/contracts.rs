//! Takeaway and ENS contract ABI definitions
//!
//! Uses alloy's sol! macro to generate type-safe call and event bindings.
//! Calls are ABI-encoded here and executed through the ledger client
//! boundary, so no provider plumbing is generated.

use alloy::sol;

sol! {
    /// Factory that deploys one deposit contract per registered subdomain
    contract TakeawayFactory {
        /// Emitted when a new deposit contract instance is deployed
        event DepositContractCreated(address indexed depositContract, bytes32 subdomainNamehash);
    }

    /// Per-user deposit contract
    contract TakeawayDeposit {
        /// Forward the full contract balance to `to` (relayer only)
        function withdrawTo(address to) external;

        /// Emitted when value arrives at the deposit contract
        event Deposit(address indexed from, uint256 amount);
    }

    /// Maps deposit contracts back to their ENS subdomain namehash
    contract TakeawayRegistry {
        function getSubdomain(address contractAddress) external view returns (bytes32);
    }

    /// ENS registry (lives on Ethereum mainnet)
    contract EnsRegistry {
        function resolver(bytes32 node) external view returns (address);
    }

    /// ENS public resolver, text records only
    contract EnsResolver {
        function text(bytes32 node, string key) external view returns (string);
    }
}
