//! Domain layer containing core business types, traits, and error definitions.

pub mod amount;
pub mod error;
pub mod traits;
pub mod types;
pub mod webhook;

pub use error::{
    AppError, ChainError, ChainErrorKind, ConfigError, DatabaseError, ExternalServiceError,
    ValidationError,
};
pub use traits::{ChainClient, EventFilter, ReceiptStatus, SocialOracle, TipStore};
pub use types::{
    ActionSetting, AudiencePolicy, AuthorConfig, AuthorStats, BlocklistEntry, DedupKey,
    Eligibility, EligibleTip, ErrorDetail, ErrorResponse, Fid, HealthResponse, HealthStatus,
    IneligibleReason, InteractionEvent, InteractionType, LeaderboardEntry, LeaderboardKind, Page,
    PendingTip, RecordOutcome, SettlementBatch, TipHistoryRecord, UserData,
};
pub use webhook::WebhookEnvelope;
