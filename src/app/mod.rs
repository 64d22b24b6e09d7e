//! Application layer containing business logic and shared state.

pub mod batch;
pub mod blocklist_sync;
pub mod ledger;
pub mod service;
pub mod settlement;
pub mod state;
pub mod tokens;
pub mod validator;
pub mod worker;

pub use batch::{BatchAccumulator, BatchConfig, EnqueueOutcome, QueueSnapshot};
pub use blocklist_sync::{BlocklistSyncConfig, BlocklistSynchronizer, SweepSummary, SyncAction};
pub use ledger::{LedgerSummary, LedgerWriter};
pub use service::{AppService, FlushSummary, IngestOutcome, WebhookReceipt};
pub use settlement::{
    CascadeOutcome, SettledTip, SettlementCascade, SettlementConfig, SettlementSink,
    SettlementStrategy, TransferRoute,
};
pub use state::{AppState, PipelineConfig};
pub use tokens::TokenDecimals;
pub use validator::{EligibilityValidator, ValidatorConfig};
pub use worker::{spawn_blocklist_sweep, spawn_settlement_worker};
