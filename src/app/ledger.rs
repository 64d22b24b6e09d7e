//! Ledger writer: turns settled tips into history rows and spend increments.
//!
//! Writes happen per tip, as each transfer confirms. A write that fails is
//! parked and retried before the next flush; until it lands, the tip keeps
//! its queue reservation and dedup key so the spending limit still counts it.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use alloy::primitives::B256;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::settlement::{SettledTip, SettlementSink};
use crate::domain::{AppError, DedupKey, PendingTip, RecordOutcome, TipHistoryRecord, TipStore};

/// Totals from recording one flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerSummary {
    pub recorded: usize,
    pub already_recorded: usize,
    /// Paid but not written; kept for retry
    pub parked: usize,
}

pub struct LedgerWriter {
    store: Arc<dyn TipStore>,
    unrecorded: Mutex<Vec<SettledTip>>,
}

impl LedgerWriter {
    #[must_use]
    pub fn new(store: Arc<dyn TipStore>) -> Self {
        Self {
            store,
            unrecorded: Mutex::new(Vec::new()),
        }
    }

    /// Record one settled tip. Replays of the same dedup key are no-ops.
    pub async fn record(
        &self,
        tip: &PendingTip,
        transaction_hash: B256,
    ) -> Result<RecordOutcome, AppError> {
        let record = TipHistoryRecord::from_settled(tip, &format!("{transaction_hash:#x}"));
        let outcome = self.store.record_settlement(&record).await?;
        match outcome {
            RecordOutcome::Recorded => info!(
                author = tip.author_fid,
                interactor = tip.interactor_fid,
                amount = %tip.amount,
                action = %tip.action_type,
                tx_hash = %transaction_hash,
                "Tip recorded"
            ),
            RecordOutcome::AlreadyRecorded => warn!(
                key = %tip.dedup_key,
                tx_hash = %transaction_hash,
                "Tip already in history, ledger unchanged"
            ),
        }
        Ok(outcome)
    }

    /// A sink that records each confirmed tip as it arrives
    #[must_use]
    pub fn session(&self) -> LedgerSession<'_> {
        LedgerSession {
            ledger: self,
            delivered: AtomicUsize::new(0),
            recorded: AtomicUsize::new(0),
            already_recorded: AtomicUsize::new(0),
            parked: AtomicUsize::new(0),
        }
    }

    async fn park(&self, settled: SettledTip) {
        self.unrecorded.lock().await.push(settled);
    }

    /// Retry every parked write. Returns the tips now safely in history.
    pub async fn retry_unrecorded(&self) -> Vec<PendingTip> {
        let parked = std::mem::take(&mut *self.unrecorded.lock().await);
        if parked.is_empty() {
            return Vec::new();
        }

        let mut landed = Vec::new();
        let mut still_parked = Vec::new();
        for settled in parked {
            match self.record(&settled.tip, settled.transaction_hash).await {
                Ok(_) => landed.push(settled.tip),
                Err(e) => {
                    error!(
                        key = %settled.tip.dedup_key,
                        tx_hash = %settled.transaction_hash,
                        error = ?e,
                        "Parked tip still cannot be recorded"
                    );
                    still_parked.push(settled);
                }
            }
        }
        if !landed.is_empty() {
            info!(recorded = landed.len(), remaining = still_parked.len(), "Parked tips recorded");
        }
        self.unrecorded.lock().await.extend(still_parked);
        landed
    }

    /// Settled tips whose history write is still outstanding
    pub async fn unrecorded(&self) -> Vec<SettledTip> {
        self.unrecorded.lock().await.clone()
    }

    pub async fn unrecorded_keys(&self) -> HashSet<DedupKey> {
        self.unrecorded
            .lock()
            .await
            .iter()
            .map(|s| s.tip.dedup_key.clone())
            .collect()
    }
}

/// Records one flush's confirmed tips and counts the outcomes
pub struct LedgerSession<'a> {
    ledger: &'a LedgerWriter,
    delivered: AtomicUsize,
    recorded: AtomicUsize,
    already_recorded: AtomicUsize,
    parked: AtomicUsize,
}

impl LedgerSession<'_> {
    #[must_use]
    pub fn summary(&self) -> LedgerSummary {
        LedgerSummary {
            recorded: self.recorded.load(Ordering::SeqCst),
            already_recorded: self.already_recorded.load(Ordering::SeqCst),
            parked: self.parked.load(Ordering::SeqCst),
        }
    }

    /// Tips confirmed on-chain during this session
    #[must_use]
    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SettlementSink for LedgerSession<'_> {
    async fn settled(&self, settled: &SettledTip) {
        self.delivered.fetch_add(1, Ordering::SeqCst);
        match self
            .ledger
            .record(&settled.tip, settled.transaction_hash)
            .await
        {
            Ok(RecordOutcome::Recorded) => {
                self.recorded.fetch_add(1, Ordering::SeqCst);
            }
            Ok(RecordOutcome::AlreadyRecorded) => {
                self.already_recorded.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => {
                self.parked.fetch_add(1, Ordering::SeqCst);
                error!(
                    key = %settled.tip.dedup_key,
                    tx_hash = %settled.transaction_hash,
                    error = ?e,
                    "Settled tip could not be recorded, parked for retry"
                );
                self.ledger.park(settled.clone()).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AuthorConfig, InteractionType};
    use crate::test_utils::MockTipStore;
    use alloy::primitives::{Address, U256};
    use chrono::Utc;

    fn tip() -> PendingTip {
        PendingTip {
            author_fid: 1,
            interactor_fid: 2,
            author_address: Address::repeat_byte(0xa1),
            interactor_address: Address::repeat_byte(0xf1),
            token_address: Address::repeat_byte(0x0c),
            amount: "0.1".to_string(),
            amount_units: U256::from(100_000u64),
            token_decimals: 6,
            cast_reference: Some("0xcast".to_string()),
            action_type: InteractionType::Like,
            dedup_key: DedupKey::compute(1, 2, Some("0xcast"), InteractionType::Like),
            enqueued_at: Utc::now(),
        }
    }

    fn settled(hash: B256) -> SettledTip {
        SettledTip {
            tip: tip(),
            transaction_hash: hash,
        }
    }

    fn store_with_author() -> Arc<MockTipStore> {
        let store = Arc::new(MockTipStore::new());
        store.insert_author(AuthorConfig::new(
            1,
            Address::repeat_byte(0xa1),
            Address::repeat_byte(0x0c),
            "10",
        ));
        store
    }

    #[tokio::test]
    async fn test_record_is_idempotent() {
        let store = store_with_author();
        let ledger = LedgerWriter::new(store.clone());
        let hash = B256::repeat_byte(0x11);

        let session = ledger.session();
        session.settled(&settled(hash)).await;
        session.settled(&settled(hash)).await;

        assert_eq!(
            session.summary(),
            LedgerSummary {
                recorded: 1,
                already_recorded: 1,
                parked: 0
            }
        );
        assert_eq!(session.delivered(), 2);
        assert_eq!(store.author(1).unwrap().total_spent, "0.1");
        let history = store.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].transaction_hash, format!("{hash:#x}"));
    }

    #[tokio::test]
    async fn test_failed_write_is_parked_then_retried() {
        let store = store_with_author();
        store.fail_next_records(1);
        let ledger = LedgerWriter::new(store.clone());

        let session = ledger.session();
        session.settled(&settled(B256::repeat_byte(0x11))).await;

        assert_eq!(session.summary().parked, 1);
        assert!(store.history().is_empty());
        assert!(ledger.unrecorded_keys().await.contains(&tip().dedup_key));

        let landed = ledger.retry_unrecorded().await;

        assert_eq!(landed.len(), 1);
        assert_eq!(landed[0].dedup_key, tip().dedup_key);
        assert!(ledger.unrecorded().await.is_empty());
        assert_eq!(store.history().len(), 1);
        assert_eq!(store.author(1).unwrap().total_spent, "0.1");
    }

    #[tokio::test]
    async fn test_retry_keeps_records_that_still_fail() {
        let store = store_with_author();
        store.fail_next_records(2);
        let ledger = LedgerWriter::new(store.clone());

        ledger.session().settled(&settled(B256::ZERO)).await;
        assert!(ledger.retry_unrecorded().await.is_empty());
        assert_eq!(ledger.unrecorded().await.len(), 1);

        assert_eq!(ledger.retry_unrecorded().await.len(), 1);
        assert!(ledger.unrecorded().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_author_is_parked() {
        let ledger = LedgerWriter::new(Arc::new(MockTipStore::new()));
        let session = ledger.session();
        session.settled(&settled(B256::ZERO)).await;

        assert_eq!(session.summary().parked, 1);
        assert_eq!(ledger.unrecorded().await.len(), 1);
    }
}
