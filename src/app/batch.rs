//! Batch accumulator: the in-memory queue between validation and settlement.
//!
//! Spending limits hold under concurrent enqueue because admission compares
//! `committed + reserved + amount` against the limit while the queue lock is
//! held, and reservations are released only after the ledger committed.
//! A tip that was paid but could not be recorded keeps its reservation and
//! dedup key until its parked write lands.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use alloy::primitives::U256;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, instrument};

use crate::domain::amount::{self, MAX_TOKEN_DECIMALS};
use crate::domain::{
    AppError, DatabaseError, DedupKey, Fid, PendingTip, SettlementBatch, TipStore,
};

/// Flush triggers
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub flush_interval: Duration,
    /// Queue length that triggers an early flush
    pub max_size: usize,
    pub worker_enabled: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(60),
            max_size: 50,
            worker_enabled: true,
        }
    }
}

impl BatchConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            flush_interval: std::env::var("BATCH_FLUSH_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.flush_interval),
            max_size: std::env::var("BATCH_MAX_SIZE")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_size),
            worker_enabled: std::env::var("ENABLE_SETTLEMENT_WORKER")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.worker_enabled),
        }
    }
}

/// Result of offering a tip to the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued { queue_len: usize },
    /// Same dedup key is already queued or being settled
    Duplicate,
    /// Committed spend plus reservations would exceed the author's limit
    SpendingLimitReached,
}

/// Read-only view of the queue for operators
#[derive(Debug, Clone)]
pub struct QueueSnapshot {
    pub pending: Vec<PendingTip>,
    /// Human amounts reserved per author (queued plus in flight)
    pub reserved: Vec<(Fid, String)>,
    pub processing: bool,
}

#[derive(Default)]
struct QueueState {
    pending: Vec<PendingTip>,
    /// Full-precision units reserved per author
    reserved: HashMap<Fid, U256>,
    /// Keys queued or in flight
    keys: HashSet<DedupKey>,
}

/// Clears the processing flag when the flush that set it ends
pub struct FlushGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct BatchAccumulator {
    state: Mutex<QueueState>,
    store: Arc<dyn TipStore>,
    processing: AtomicBool,
    flush_requested: Notify,
    config: BatchConfig,
}

impl BatchAccumulator {
    #[must_use]
    pub fn new(store: Arc<dyn TipStore>, config: BatchConfig) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            store,
            processing: AtomicBool::new(false),
            flush_requested: Notify::new(),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Admit a validated tip.
    ///
    /// The author's committed spend is re-read under the queue lock so a batch
    /// that settled since validation is accounted for.
    #[instrument(skip(self, tip), fields(author = tip.author_fid, key = %tip.dedup_key))]
    pub async fn enqueue(&self, tip: PendingTip) -> Result<EnqueueOutcome, AppError> {
        let mut state = self.state.lock().await;

        if state.keys.contains(&tip.dedup_key) {
            debug!("Tip already queued or in flight");
            return Ok(EnqueueOutcome::Duplicate);
        }

        let config = self
            .store
            .get_author_config(tip.author_fid)
            .await?
            .ok_or_else(|| {
                AppError::Database(DatabaseError::NotFound(format!(
                    "author config {}",
                    tip.author_fid
                )))
            })?;
        let committed = amount::to_units(&config.total_spent, MAX_TOKEN_DECIMALS)?;
        let limit = amount::to_units(&config.spending_limit, MAX_TOKEN_DECIMALS)?;
        let requested = amount::to_units(&tip.amount, MAX_TOKEN_DECIMALS)?;
        let reserved = state
            .reserved
            .get(&tip.author_fid)
            .copied()
            .unwrap_or_default();

        let fits = committed
            .checked_add(reserved)
            .and_then(|v| v.checked_add(requested))
            .is_some_and(|total| total <= limit);
        if !fits {
            info!(
                committed = %config.total_spent,
                reserved = %amount::from_units(reserved, MAX_TOKEN_DECIMALS),
                limit = %config.spending_limit,
                "Tip refused: spending limit reached"
            );
            return Ok(EnqueueOutcome::SpendingLimitReached);
        }

        *state.reserved.entry(tip.author_fid).or_default() += requested;
        state.keys.insert(tip.dedup_key.clone());
        state.pending.push(tip);
        let queue_len = state.pending.len();
        drop(state);

        if queue_len >= self.config.max_size {
            debug!(queue_len, "Queue reached max size, requesting flush");
            self.flush_requested.notify_one();
        }
        Ok(EnqueueOutcome::Queued { queue_len })
    }

    /// Claim the single flush slot. `None` when a flush is already running.
    /// The guard keeps the processing flag set until dropped.
    pub fn begin_flush(&self) -> Option<FlushGuard<'_>> {
        if self
            .processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Flush already in progress, skipping");
            return None;
        }
        Some(FlushGuard {
            flag: &self.processing,
        })
    }

    /// Swap the live queue for an empty one. `None` when nothing is queued.
    pub async fn drain(&self, _guard: &FlushGuard<'_>) -> Option<SettlementBatch> {
        let tips = std::mem::take(&mut self.state.lock().await.pending);
        if tips.is_empty() {
            return None;
        }
        Some(SettlementBatch::new(tips))
    }

    /// [`begin_flush`](Self::begin_flush) and [`drain`](Self::drain) in one step
    pub async fn take_batch(&self) -> Option<(FlushGuard<'_>, SettlementBatch)> {
        let guard = self.begin_flush()?;
        let batch = self.drain(&guard).await?;
        Some((guard, batch))
    }

    /// Release reservations and keys for finished tips.
    ///
    /// Call only for tips that are in the ledger or were never paid.
    pub async fn release(&self, tips: &[PendingTip]) {
        let mut state = self.state.lock().await;
        for tip in tips {
            state.keys.remove(&tip.dedup_key);
            let units = amount::to_units(&tip.amount, MAX_TOKEN_DECIMALS).unwrap_or_default();
            if let Some(reserved) = state.reserved.get_mut(&tip.author_fid) {
                *reserved = reserved.saturating_sub(units);
                if reserved.is_zero() {
                    state.reserved.remove(&tip.author_fid);
                }
            }
        }
    }

    /// Resolves when the queue asks for an early flush
    pub async fn flush_requested(&self) {
        self.flush_requested.notified().await;
    }

    /// Ask for another flush when the queue refilled past the size trigger.
    /// Requests made while a flush was running are not lost this way.
    pub async fn request_flush_if_full(&self) -> bool {
        let queue_len = self.len().await;
        let full = queue_len >= self.config.max_size;
        if full {
            debug!(queue_len, "Queue still full after flush, requesting another");
            self.flush_requested.notify_one();
        }
        full
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    #[must_use]
    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    pub async fn snapshot(&self) -> QueueSnapshot {
        let state = self.state.lock().await;
        let mut reserved: Vec<(Fid, String)> = state
            .reserved
            .iter()
            .map(|(fid, units)| (*fid, amount::from_units(*units, MAX_TOKEN_DECIMALS)))
            .collect();
        reserved.sort_by_key(|(fid, _)| *fid);
        QueueSnapshot {
            pending: state.pending.clone(),
            reserved,
            processing: self.is_processing(),
        }
    }
}
