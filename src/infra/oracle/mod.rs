//! Social-graph oracle and event-source filter clients.

pub mod neynar;

use async_trait::async_trait;
use tracing::info;

use crate::domain::{AppError, EventFilter, Fid};

pub use neynar::{
    DEFAULT_NEYNAR_API_URL, NeynarClient, NeynarConfig, NeynarWebhookFilter, WebhookSubscription,
};

/// Filter for deployments whose webhook subscription is managed elsewhere.
/// Changes are logged for the operator and otherwise ignored.
#[derive(Debug, Default)]
pub struct UnmanagedEventFilter;

#[async_trait]
impl EventFilter for UnmanagedEventFilter {
    async fn remove_author(&self, fid: Fid) -> Result<(), AppError> {
        info!(fid, "Webhook subscription unmanaged, author should be unsubscribed");
        Ok(())
    }

    async fn add_author(&self, fid: Fid) -> Result<(), AppError> {
        info!(fid, "Webhook subscription unmanaged, author should be subscribed");
        Ok(())
    }
}
