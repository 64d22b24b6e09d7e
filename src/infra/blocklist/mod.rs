//! In-memory blocklist of author addresses that cannot currently fund tips.
//!
//! Lookups hit a DashMap and never touch the database. Every change is written
//! through to the tip store first so the set survives restarts.

use std::sync::Arc;

use alloy::primitives::Address;
use chrono::Utc;
use dashmap::DashMap;
use tracing::{info, warn};

use crate::domain::{AppError, BlocklistEntry, TipStore};

/// Thread-safe blocklist with write-through persistence
pub struct BlocklistManager {
    store: DashMap<Address, BlocklistEntry>,
    db: Arc<dyn TipStore>,
}

impl BlocklistManager {
    /// Create a manager and load the persisted entries.
    pub async fn load(db: Arc<dyn TipStore>) -> Result<Self, AppError> {
        let manager = Self {
            store: DashMap::new(),
            db,
        };

        for entry in manager.db.load_blocklist().await? {
            manager.store.insert(entry.address, entry);
        }

        info!(
            count = manager.store.len(),
            "BlocklistManager initialized from database"
        );

        Ok(manager)
    }

    #[must_use]
    pub fn is_blocked(&self, address: &Address) -> bool {
        self.store.contains_key(address)
    }

    /// Reason recorded for a blocked address
    #[must_use]
    pub fn check_address(&self, address: &Address) -> Option<String> {
        self.store.get(address).map(|entry| entry.reason.clone())
    }

    /// Add or update an entry. Returns `true` if the address was not blocked before.
    pub async fn add_address(&self, address: Address, reason: String) -> Result<bool, AppError> {
        let entry = BlocklistEntry {
            address,
            reason,
            updated_at: Utc::now(),
        };
        self.db.upsert_blocklist_entry(&entry).await?;

        let reason = entry.reason.clone();
        let newly_blocked = self.store.insert(address, entry).is_none();

        if newly_blocked {
            warn!(address = %address, reason = %reason, "Address added to blocklist");
        } else {
            info!(address = %address, reason = %reason, "Blocklist entry updated");
        }

        Ok(newly_blocked)
    }

    /// Remove an entry. Returns `true` if the address was blocked.
    pub async fn remove_address(&self, address: &Address) -> Result<bool, AppError> {
        let removed_from_db = self.db.remove_blocklist_entry(address).await?;

        if self.store.remove(address).is_some() {
            info!(address = %address, "Address removed from blocklist");
            Ok(true)
        } else if removed_from_db {
            warn!(address = %address, "Address removed from blocklist (was not in cache)");
            Ok(true)
        } else {
            Ok(false)
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// All entries, most recently updated first
    #[must_use]
    pub fn list_all(&self) -> Vec<BlocklistEntry> {
        let mut entries: Vec<BlocklistEntry> =
            self.store.iter().map(|entry| entry.value().clone()).collect();
        entries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        entries
    }
}
