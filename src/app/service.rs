//! Application service: ingestion (event → validate → enqueue) and flush
//! (batch → settle → record).

use std::sync::Arc;

use alloy::primitives::Address;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::batch::{BatchAccumulator, EnqueueOutcome, QueueSnapshot};
use super::blocklist_sync::{BlocklistSynchronizer, SweepSummary, SyncAction};
use super::ledger::{LedgerSummary, LedgerWriter};
use super::settlement::{CascadeOutcome, SettledTip, SettlementCascade, TransferRoute};
use super::validator::EligibilityValidator;
use crate::domain::{
    AppError, AuthorStats, BlocklistEntry, ChainClient, Eligibility, Fid, HealthResponse,
    HealthStatus, IneligibleReason, InteractionEvent, LeaderboardEntry, LeaderboardKind,
    PendingTip, TipStore, WebhookEnvelope,
};

/// What happened to one interaction
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Queued { queue_len: usize },
    Ineligible(IneligibleReason),
}

/// Acknowledgement for one webhook delivery
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WebhookReceipt {
    /// Interactions parsed from the envelope
    pub events: usize,
    pub queued: usize,
}

/// Result of one flush
#[derive(Debug, Clone)]
pub struct FlushSummary {
    pub batch_id: Uuid,
    pub tips: usize,
    /// Strategy that produced the report; `None` when the attempt was aborted
    pub strategy: Option<&'static str>,
    pub settled: usize,
    pub dropped: usize,
    /// Parked tips from earlier flushes recorded before this batch
    pub backfilled: usize,
    pub ledger: LedgerSummary,
}

pub struct AppService {
    store: Arc<dyn TipStore>,
    chain: Arc<dyn ChainClient>,
    validator: EligibilityValidator,
    accumulator: Arc<BatchAccumulator>,
    cascade: SettlementCascade,
    ledger: LedgerWriter,
    blocklist_sync: Arc<BlocklistSynchronizer>,
}

impl AppService {
    #[must_use]
    pub fn new(
        store: Arc<dyn TipStore>,
        chain: Arc<dyn ChainClient>,
        validator: EligibilityValidator,
        accumulator: Arc<BatchAccumulator>,
        cascade: SettlementCascade,
        blocklist_sync: Arc<BlocklistSynchronizer>,
    ) -> Self {
        Self {
            ledger: LedgerWriter::new(Arc::clone(&store)),
            store,
            chain,
            validator,
            accumulator,
            cascade,
            blocklist_sync,
        }
    }

    #[must_use]
    pub fn accumulator(&self) -> &Arc<BatchAccumulator> {
        &self.accumulator
    }

    #[must_use]
    pub fn blocklist_sync(&self) -> &Arc<BlocklistSynchronizer> {
        &self.blocklist_sync
    }

    #[must_use]
    pub fn transfer_route(&self) -> TransferRoute {
        self.cascade.route()
    }

    /// Parse a webhook body and ingest every interaction it carries.
    ///
    /// Never fails: malformed bodies and per-event faults are logged and the
    /// delivery is still acknowledged.
    #[instrument(skip(self, body))]
    pub async fn handle_webhook(&self, body: Value) -> WebhookReceipt {
        let events = match WebhookEnvelope::from_value(body).and_then(|e| e.into_interactions()) {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed webhook");
                return WebhookReceipt::default();
            }
        };

        let mut receipt = WebhookReceipt {
            events: events.len(),
            queued: 0,
        };
        for event in &events {
            match self.process_event(event).await {
                Ok(IngestOutcome::Queued { .. }) => receipt.queued += 1,
                Ok(IngestOutcome::Ineligible(_)) => {}
                Err(e) => error!(
                    author = event.author_fid,
                    interactor = event.interactor_fid,
                    error = ?e,
                    "Interaction dropped"
                ),
            }
        }
        receipt
    }

    /// Validate one interaction and queue its tip.
    #[instrument(
        skip(self, event),
        fields(
            action = %event.interaction_type,
            author = event.author_fid,
            interactor = event.interactor_fid
        )
    )]
    pub async fn process_event(&self, event: &InteractionEvent) -> Result<IngestOutcome, AppError> {
        let author = self.store.get_author_config(event.author_fid).await?;

        let tip = match self.validator.validate(event, author.as_ref()).await? {
            Eligibility::Ineligible(reason) => {
                debug!(reason = %reason, "Interaction not eligible");
                return Ok(IngestOutcome::Ineligible(reason));
            }
            Eligibility::Eligible(tip) => tip,
        };
        let Some(author) = author else {
            return Ok(IngestOutcome::Ineligible(IneligibleReason::AuthorNotConfigured));
        };

        let pending = PendingTip {
            author_fid: author.fid,
            interactor_fid: event.interactor_fid,
            author_address: author.address,
            interactor_address: tip.interactor_address,
            token_address: author.token_address,
            amount: tip.amount,
            amount_units: tip.amount_units,
            token_decimals: tip.token_decimals,
            cast_reference: event.cast_reference.clone(),
            action_type: event.interaction_type,
            dedup_key: event.dedup_key(),
            enqueued_at: Utc::now(),
        };

        match self.accumulator.enqueue(pending).await? {
            EnqueueOutcome::Queued { queue_len } => {
                info!(queue_len, "Tip queued");
                Ok(IngestOutcome::Queued { queue_len })
            }
            EnqueueOutcome::Duplicate => Ok(IngestOutcome::Ineligible(IneligibleReason::AlreadyTipped)),
            EnqueueOutcome::SpendingLimitReached => Ok(IngestOutcome::Ineligible(
                IneligibleReason::SpendingLimitReached,
            )),
        }
    }

    /// Settle whatever is queued. `None` when the queue was empty or another
    /// flush is running.
    ///
    /// Parked ledger writes from earlier flushes are retried first. Each tip
    /// is recorded the moment its transfer confirms; tips whose write failed
    /// stay reserved until a later retry lands.
    #[instrument(skip(self))]
    pub async fn flush(&self) -> Option<FlushSummary> {
        let guard = self.accumulator.begin_flush()?;

        let backfilled = self.ledger.retry_unrecorded().await;
        if !backfilled.is_empty() {
            self.accumulator.release(&backfilled).await;
        }

        let batch = self.accumulator.drain(&guard).await?;
        info!(batch_id = %batch.id(), tips = batch.len(), "Flushing batch");

        let mut summary = FlushSummary {
            batch_id: batch.id(),
            tips: batch.len(),
            strategy: None,
            settled: 0,
            dropped: 0,
            backfilled: backfilled.len(),
            ledger: LedgerSummary::default(),
        };

        let session = self.ledger.session();
        match self.cascade.settle(&batch, &session).await {
            CascadeOutcome::Settled { strategy, report } => {
                summary.strategy = Some(strategy);
                summary.settled = report.settled.len();
                summary.dropped = report.failed.len();
                for failed in &report.failed {
                    warn!(
                        key = %failed.tip.dedup_key,
                        author = failed.tip.author_fid,
                        reason = %failed.reason,
                        "Tip dropped after final strategy"
                    );
                }
            }
            CascadeOutcome::Aborted { reason } => {
                summary.settled = session.delivered();
                summary.dropped = batch.len() - summary.settled;
                error!(
                    batch_id = %batch.id(),
                    reason = %reason,
                    dropped = summary.dropped,
                    "Batch dropped"
                );
            }
        }
        summary.ledger = session.summary();

        let parked = self.ledger.unrecorded_keys().await;
        let finished: Vec<PendingTip> = batch
            .tips()
            .iter()
            .filter(|t| !parked.contains(&t.dedup_key))
            .cloned()
            .collect();
        self.accumulator.release(&finished).await;
        drop(guard);

        let mut touched: Vec<Address> = batch.tips().iter().map(|t| t.author_address).collect();
        touched.sort();
        touched.dedup();
        self.blocklist_sync.resync_authors(&touched).await;

        self.accumulator.request_flush_if_full().await;
        Some(summary)
    }

    /// Tips paid on-chain whose history write is still outstanding
    pub async fn unrecorded_tips(&self) -> Vec<SettledTip> {
        self.ledger.unrecorded().await
    }

    /// Run one blocklist sweep over all active authors
    pub async fn sweep_blocklist(&self) -> Result<SweepSummary, AppError> {
        self.blocklist_sync.sweep_all().await
    }

    /// Re-check one author address now
    pub async fn sync_blocklist_address(&self, address: Address) -> Result<SyncAction, AppError> {
        self.blocklist_sync.sync(address).await
    }

    #[must_use]
    pub fn list_blocklist(&self) -> Vec<BlocklistEntry> {
        self.blocklist_sync.blocklist().list_all()
    }

    pub async fn queue_snapshot(&self) -> QueueSnapshot {
        self.accumulator.snapshot().await
    }

    pub async fn author_stats(&self, fid: Fid) -> Result<Option<AuthorStats>, AppError> {
        self.store.author_stats(fid).await
    }

    #[instrument(skip(self))]
    pub async fn leaderboard(
        &self,
        kind: LeaderboardKind,
        limit: i64,
    ) -> Result<Vec<LeaderboardEntry>, AppError> {
        self.store.leaderboard(kind, limit).await
    }

    /// Database and chain connectivity
    pub async fn health_check(&self) -> HealthResponse {
        let database = match self.store.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => {
                warn!(error = ?e, "Database health check failed");
                HealthStatus::Unhealthy
            }
        };
        let chain = match self.chain.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => {
                warn!(error = ?e, "Chain health check failed");
                HealthStatus::Unhealthy
            }
        };
        HealthResponse::new(database, chain, self.accumulator.len().await)
    }
}
