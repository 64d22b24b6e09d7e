//! Infrastructure layer implementations.

pub mod blockchain;
pub mod blocklist;
pub mod database;
pub mod oracle;

pub use blockchain::{
    EvmChainClient, EvmClientConfig, GovernedChainClient, RpcGovernor, RpcGovernorConfig,
    signer_from_secret,
};
pub use blocklist::BlocklistManager;
pub use database::{PostgresClient, PostgresConfig};
pub use oracle::{
    NeynarClient, NeynarConfig, NeynarWebhookFilter, UnmanagedEventFilter, WebhookSubscription,
};
