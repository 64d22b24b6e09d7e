//! Background loops: the settlement flush scheduler and the blocklist sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use super::batch::BatchConfig;
use super::blocklist_sync::BlocklistSyncConfig;
use super::service::AppService;

/// Floor for loop periods; a zero interval would spin
const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Flush loop: settles the queue on every tick of `flush_interval` and
/// whenever the accumulator reports the size threshold was reached.
pub struct SettlementWorker {
    service: Arc<AppService>,
    flush_interval: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl SettlementWorker {
    #[must_use]
    pub fn new(
        service: Arc<AppService>,
        flush_interval: Duration,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            service,
            flush_interval,
            shutdown_rx,
        }
    }

    pub async fn run(mut self) {
        info!(interval = ?self.flush_interval, "Settlement worker started");
        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        let accumulator = Arc::clone(self.service.accumulator());
        loop {
            tokio::select! {
                _ = ticker.tick() => self.flush_once("timer").await,
                () = accumulator.flush_requested() => self.flush_once("size").await,
                result = self.shutdown_rx.changed() => {
                    if result.is_err() || *self.shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Settlement worker draining queue before exit");
        self.flush_once("shutdown").await;
        let unrecorded = self.service.unrecorded_tips().await;
        if !unrecorded.is_empty() {
            error!(
                count = unrecorded.len(),
                "Stopping with paid tips still missing from the ledger"
            );
        }
        info!("Settlement worker stopped");
    }

    async fn flush_once(&self, trigger: &'static str) {
        if self.service.accumulator().is_processing() {
            info!(trigger, "Flush already in progress, skipping");
            return;
        }
        if let Some(summary) = self.service.flush().await {
            info!(
                trigger,
                batch_id = %summary.batch_id,
                strategy = summary.strategy.unwrap_or("none"),
                settled = summary.settled,
                dropped = summary.dropped,
                recorded = summary.ledger.recorded,
                backfilled = summary.backfilled,
                "Flush complete"
            );
            if summary.ledger.parked > 0 {
                error!(
                    batch_id = %summary.batch_id,
                    parked = summary.ledger.parked,
                    "Settled tips missing from the ledger, will retry"
                );
            }
        }
    }
}

/// Start the flush loop
pub fn spawn_settlement_worker(
    service: Arc<AppService>,
    config: &BatchConfig,
) -> (JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let interval = config.flush_interval.max(MIN_INTERVAL);
    let worker = SettlementWorker::new(service, interval, shutdown_rx);
    let handle = tokio::spawn(worker.run());
    (handle, shutdown_tx)
}

/// Start the periodic blocklist sweep
pub fn spawn_blocklist_sweep(
    service: Arc<AppService>,
    config: &BlocklistSyncConfig,
) -> (JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let interval = config.sweep_interval.max(MIN_INTERVAL);

    let handle = tokio::spawn(async move {
        info!(interval = ?interval, "Blocklist sweep started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = service.sweep_blocklist().await {
                        warn!(error = ?e, "Blocklist sweep failed");
                    }
                }
                result = shutdown_rx.changed() => {
                    if result.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Blocklist sweep stopped");
    });

    (handle, shutdown_tx)
}
