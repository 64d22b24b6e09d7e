//! The API layer, containing web handlers and routing.

pub mod admin;
pub mod handlers;
pub mod router;

pub use admin::{
    AddBlocklistRequest, BlocklistEntryResponse, BlocklistResponse, ListBlocklistResponse,
    QueueResponse, SyncBlocklistResponse,
};
pub use handlers::{ApiDoc, LeaderboardQuery, WebhookAck};
pub use router::create_router;
