//! Chain access: contract bindings, the EVM RPC client and the request governor.

pub mod contracts;
pub mod evm;
pub mod governor;

pub use contracts::MULTICALL3_ADDRESS;
pub use evm::{EvmChainClient, EvmClientConfig, signer_from_secret};
pub use governor::{GovernedChainClient, RetryPolicy, RpcGovernor, RpcGovernorConfig};
