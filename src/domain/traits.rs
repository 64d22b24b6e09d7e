//! Domain traits defining contracts for external systems.

use alloy::primitives::{Address, B256, Bytes, U256};
use async_trait::async_trait;

use super::error::{AppError, ChainError};
use super::types::{
    AuthorConfig, AuthorStats, BlocklistEntry, DedupKey, Fid, LeaderboardEntry, LeaderboardKind,
    Page, RecordOutcome, TipHistoryRecord, UserData,
};

/// Durable state: author configs, tip history, blocklist mirror and scalar settings
#[async_trait]
pub trait TipStore: Send + Sync {
    /// Check database connectivity
    async fn health_check(&self) -> Result<(), AppError>;

    /// Load an author's configuration by social identity
    async fn get_author_config(&self, fid: Fid) -> Result<Option<AuthorConfig>, AppError>;

    /// Load an author's configuration by funding address
    async fn get_author_config_by_address(
        &self,
        address: &Address,
    ) -> Result<Option<AuthorConfig>, AppError>;

    /// Create or replace an author's configuration
    async fn upsert_author_config(&self, config: &AuthorConfig) -> Result<(), AppError>;

    /// All configs with `is_active = true`
    async fn list_active_author_configs(&self) -> Result<Vec<AuthorConfig>, AppError>;

    /// Whether a settled tip with this dedup key exists
    async fn has_user_been_tipped_for_cast(&self, key: &DedupKey) -> Result<bool, AppError>;

    /// Append the history row and add its amount to the author's `total_spent`,
    /// atomically. Replaying the same dedup key changes nothing.
    async fn record_settlement(&self, record: &TipHistoryRecord)
    -> Result<RecordOutcome, AppError>;

    /// History rows for an author, newest first
    async fn list_tip_history(
        &self,
        author_fid: Fid,
        limit: i64,
    ) -> Result<Vec<TipHistoryRecord>, AppError>;

    /// Aggregated ranking over tip history
    async fn leaderboard(
        &self,
        kind: LeaderboardKind,
        limit: i64,
    ) -> Result<Vec<LeaderboardEntry>, AppError>;

    /// Spend summary for an author
    async fn author_stats(&self, fid: Fid) -> Result<Option<AuthorStats>, AppError>;

    /// All persisted blocklist entries
    async fn load_blocklist(&self) -> Result<Vec<BlocklistEntry>, AppError>;

    /// Insert or update a blocklist entry
    async fn upsert_blocklist_entry(&self, entry: &BlocklistEntry) -> Result<(), AppError>;

    /// Delete a blocklist entry; returns whether a row was removed
    async fn remove_blocklist_entry(&self, address: &Address) -> Result<bool, AppError>;

    /// Read a scalar setting
    async fn get_scalar(&self, key: &str) -> Result<Option<String>, AppError>;

    /// Write a scalar setting
    async fn set_scalar(&self, key: &str, value: &str) -> Result<(), AppError>;
}

/// Reputation / audience oracle (social-graph provider)
#[async_trait]
pub trait SocialOracle: Send + Sync {
    /// Follower count, reputation score and payout address in one call
    async fn get_user_data(&self, fid: Fid) -> Result<UserData, AppError>;

    /// Users that `fid` follows, one page at a time
    async fn get_following(
        &self,
        fid: Fid,
        limit: u32,
        cursor: Option<&str>,
    ) -> Result<Page<Fid>, AppError>;

    /// Users following `fid`, one page at a time
    async fn get_followers(
        &self,
        fid: Fid,
        limit: u32,
        cursor: Option<&str>,
    ) -> Result<Page<Fid>, AppError>;

    /// Payout address for a user, if they have one
    async fn resolve_address(&self, fid: Fid) -> Result<Option<Address>, AppError>;
}

/// Event-source subscription filter: which authors' interactions get delivered
#[async_trait]
pub trait EventFilter: Send + Sync {
    /// Stop delivering interactions on this author's content
    async fn remove_author(&self, fid: Fid) -> Result<(), AppError>;

    /// Resume delivering interactions on this author's content
    async fn add_author(&self, fid: Fid) -> Result<(), AppError>;
}

/// Outcome of a mined transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    Success,
    Reverted,
}

/// Chain node operations. Implementations perform exactly one logical RPC
/// interaction per call; retries and pacing belong to the governor.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Provider label for logs
    fn provider_name(&self) -> &str;

    /// Account that signs settlement transactions
    fn executor_address(&self) -> Option<Address>;

    /// Check RPC connectivity
    async fn health_check(&self) -> Result<(), ChainError>;

    /// ERC-20 `decimals()`
    async fn decimals(&self, token: Address) -> Result<u8, ChainError>;

    /// ERC-20 `allowance(owner, spender)`
    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, ChainError>;

    /// ERC-20 `balanceOf(owner)`
    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256, ChainError>;

    /// `(allowance(owner, spender), balanceOf(owner))` read as one combined call
    async fn allowance_and_balance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<(U256, U256), ChainError>;

    /// Simulate a call from the executor (`eth_call`); returns the return data
    async fn simulate(&self, to: Address, calldata: Bytes) -> Result<Bytes, ChainError>;

    /// Next usable nonce for the executor, including pending transactions
    async fn pending_nonce(&self) -> Result<u64, ChainError>;

    /// Sign and broadcast a call from the executor with an explicit nonce
    async fn send_transaction(
        &self,
        to: Address,
        calldata: Bytes,
        nonce: u64,
    ) -> Result<B256, ChainError>;

    /// Receipt status, `None` while the transaction is not mined
    async fn transaction_receipt(&self, hash: B256) -> Result<Option<ReceiptStatus>, ChainError>;
}
