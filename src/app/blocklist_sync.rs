//! Blocklist synchronizer.
//!
//! Keeps the blocklist equal to the set of authors whose on-chain allowance or
//! balance is below their largest enabled tip. Blocking also drops the author
//! from the event-source subscription so no more interactions arrive for them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy::primitives::{Address, U256};
use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;

use super::tokens::TokenDecimals;
use crate::domain::{AppError, ChainClient, EventFilter, Fid, TipStore};
use crate::infra::BlocklistManager;

/// Scalar key holding the completion time of the last full sweep
pub const LAST_SWEEP_KEY: &str = "last_blocklist_sweep_at";

/// Reason stored for entries added by an operator
pub const MANUAL_REASON: &str = "manual";

/// Synchronizer tuning
#[derive(Debug, Clone)]
pub struct BlocklistSyncConfig {
    /// How long a combined allowance/balance read is reused
    pub cache_ttl: Duration,
    /// Interval between full sweeps over all active authors
    pub sweep_interval: Duration,
    pub sweep_enabled: bool,
}

impl Default for BlocklistSyncConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(600),
            sweep_enabled: true,
        }
    }
}

impl BlocklistSyncConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let secs = |key: &str, fallback: Duration| {
            std::env::var(key)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(fallback)
        };
        Self {
            cache_ttl: secs("BLOCKLIST_CACHE_TTL_SECS", defaults.cache_ttl),
            sweep_interval: secs("BLOCKLIST_SWEEP_INTERVAL_SECS", defaults.sweep_interval),
            sweep_enabled: std::env::var("ENABLE_BLOCKLIST_SWEEP")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.sweep_enabled),
        }
    }
}

/// What a sync did to the blocklist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Added,
    Removed,
    Unchanged,
}

/// Totals from one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub checked: usize,
    pub added: usize,
    pub removed: usize,
    pub errors: usize,
}

/// Subscription change the event filter has not yet accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterChange {
    Remove,
    Add,
}

#[derive(Debug, Clone, Copy)]
struct CachedFunds {
    allowance: U256,
    balance: U256,
    fetched_at: Instant,
}

pub struct BlocklistSynchronizer {
    store: Arc<dyn TipStore>,
    chain: Arc<dyn ChainClient>,
    /// Account whose allowance counts as funding
    spender: Address,
    filter: Arc<dyn EventFilter>,
    blocklist: Arc<BlocklistManager>,
    tokens: Arc<TokenDecimals>,
    funds_cache: DashMap<(Address, Address), CachedFunds>,
    filter_backlog: DashMap<Address, (Fid, FilterChange)>,
    config: BlocklistSyncConfig,
}

impl BlocklistSynchronizer {
    #[must_use]
    pub fn new(
        store: Arc<dyn TipStore>,
        chain: Arc<dyn ChainClient>,
        spender: Address,
        filter: Arc<dyn EventFilter>,
        blocklist: Arc<BlocklistManager>,
        tokens: Arc<TokenDecimals>,
        config: BlocklistSyncConfig,
    ) -> Self {
        Self {
            store,
            chain,
            spender,
            filter,
            blocklist,
            tokens,
            funds_cache: DashMap::new(),
            filter_backlog: DashMap::new(),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &BlocklistSyncConfig {
        &self.config
    }

    #[must_use]
    pub fn blocklist(&self) -> &Arc<BlocklistManager> {
        &self.blocklist
    }

    /// Whether an author address is currently blocked. Never touches the chain.
    #[must_use]
    pub fn should_block(&self, address: &Address) -> bool {
        self.blocklist.is_blocked(address)
    }

    /// Re-check one author address against the chain and update the blocklist.
    #[instrument(skip(self), fields(address = %address))]
    pub async fn sync(&self, address: Address) -> Result<SyncAction, AppError> {
        if self.blocklist.check_address(&address).as_deref() == Some(MANUAL_REASON) {
            debug!("Manual blocklist entry, skipping sync");
            return Ok(SyncAction::Unchanged);
        }

        let config = self
            .store
            .get_author_config_by_address(&address)
            .await?
            .filter(|c| c.is_active);
        let Some(config) = config else {
            return self.clear(address).await;
        };

        let decimals = self.tokens.decimals(config.token_address).await?;
        let Some(required) = config.required_minimum(decimals)? else {
            return self.clear(address).await;
        };

        let (allowance, balance) = self.funds(config.token_address, address).await?;
        let shortfall = if allowance < required {
            Some("insufficient_allowance")
        } else if balance < required {
            Some("insufficient_balance")
        } else {
            None
        };

        match shortfall {
            Some(reason) => {
                let newly_blocked = self.blocklist.add_address(address, reason.to_string()).await?;
                if !newly_blocked {
                    self.retry_filter(address).await;
                    return Ok(SyncAction::Unchanged);
                }
                info!(
                    fid = config.fid,
                    allowance = %allowance,
                    balance = %balance,
                    required = %required,
                    reason,
                    "Author blocked"
                );
                self.apply_filter(address, config.fid, FilterChange::Remove)
                    .await;
                Ok(SyncAction::Added)
            }
            None => {
                if !self.blocklist.remove_address(&address).await? {
                    self.retry_filter(address).await;
                    return Ok(SyncAction::Unchanged);
                }
                info!(fid = config.fid, "Author unblocked");
                self.apply_filter(address, config.fid, FilterChange::Add)
                    .await;
                Ok(SyncAction::Removed)
            }
        }
    }

    /// Drop cached reads for these authors and sync each of them.
    pub async fn resync_authors(&self, addresses: &[Address]) -> SweepSummary {
        for address in addresses {
            self.funds_cache.retain(|(_, owner), _| owner != address);
        }
        self.sync_many(addresses).await
    }

    /// Sync every active author and record the sweep time.
    #[instrument(skip(self))]
    pub async fn sweep_all(&self) -> Result<SweepSummary, AppError> {
        let addresses: Vec<Address> = self
            .store
            .list_active_author_configs()
            .await?
            .into_iter()
            .map(|c| c.address)
            .collect();

        let summary = self.sync_many(&addresses).await;
        self.store
            .set_scalar(LAST_SWEEP_KEY, &Utc::now().to_rfc3339())
            .await?;

        info!(
            checked = summary.checked,
            added = summary.added,
            removed = summary.removed,
            errors = summary.errors,
            "Blocklist sweep complete"
        );
        Ok(summary)
    }

    /// Block an address by hand. Sync leaves manual entries alone.
    pub async fn add_manual(&self, address: Address) -> Result<bool, AppError> {
        self.blocklist
            .add_address(address, MANUAL_REASON.to_string())
            .await
    }

    /// Remove any entry for an address
    pub async fn remove(&self, address: &Address) -> Result<bool, AppError> {
        self.blocklist.remove_address(address).await
    }

    async fn sync_many(&self, addresses: &[Address]) -> SweepSummary {
        let mut summary = SweepSummary::default();
        for address in addresses {
            summary.checked += 1;
            match self.sync(*address).await {
                Ok(SyncAction::Added) => summary.added += 1,
                Ok(SyncAction::Removed) => summary.removed += 1,
                Ok(SyncAction::Unchanged) => {}
                Err(e) => {
                    summary.errors += 1;
                    warn!(address = %address, error = ?e, "Blocklist sync failed");
                }
            }
        }
        summary
    }

    /// Send a subscription change. A failed change is kept and resent on the
    /// next sync of the same address.
    async fn apply_filter(&self, address: Address, fid: Fid, change: FilterChange) {
        let result = match change {
            FilterChange::Remove => self.filter.remove_author(fid).await,
            FilterChange::Add => self.filter.add_author(fid).await,
        };
        match result {
            Ok(()) => {
                self.filter_backlog.remove(&address);
            }
            Err(e) => {
                warn!(fid, change = ?change, error = ?e, "Event filter update failed, will retry");
                self.filter_backlog.insert(address, (fid, change));
            }
        }
    }

    async fn retry_filter(&self, address: Address) {
        let pending = self.filter_backlog.get(&address).map(|entry| *entry.value());
        if let Some((fid, change)) = pending {
            debug!(fid, change = ?change, "Retrying event filter update");
            self.apply_filter(address, fid, change).await;
        }
    }

    /// Nothing to fund: make sure the address is not blocked
    async fn clear(&self, address: Address) -> Result<SyncAction, AppError> {
        self.filter_backlog.remove(&address);
        if self.blocklist.remove_address(&address).await? {
            Ok(SyncAction::Removed)
        } else {
            Ok(SyncAction::Unchanged)
        }
    }

    async fn funds(&self, token: Address, owner: Address) -> Result<(U256, U256), AppError> {
        if let Some(cached) = self.funds_cache.get(&(token, owner)) {
            if cached.fetched_at.elapsed() < self.config.cache_ttl {
                return Ok((cached.allowance, cached.balance));
            }
        }
        let (allowance, balance) = self
            .chain
            .allowance_and_balance(token, owner, self.spender)
            .await?;
        self.funds_cache.insert(
            (token, owner),
            CachedFunds {
                allowance,
                balance,
                fetched_at: Instant::now(),
            },
        );
        Ok((allowance, balance))
    }
}
