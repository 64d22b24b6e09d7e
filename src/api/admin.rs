//! Admin API handlers for blocklist management and queue inspection.

use std::str::FromStr;
use std::sync::Arc;

use alloy::primitives::Address;
use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::ToSchema;

use crate::app::{AppState, SyncAction};
use crate::domain::{AppError, AuthorStats, DatabaseError, Fid, ValidationError};

/// Request body for adding an address to the blocklist
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct AddBlocklistRequest {
    /// Author funding address to block
    #[schema(example = "0x8ba1f109551bd432803012645ac136ddd64dba72")]
    pub address: String,
}

/// Response for blocklist operations
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BlocklistResponse {
    pub success: bool,
    pub message: String,
}

/// Blocklist entry for listing
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BlocklistEntryResponse {
    pub address: String,
    /// `insufficient_allowance`, `insufficient_balance` or `manual`
    pub reason: String,
    pub updated_at: String,
}

/// Response for listing all blocklist entries
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ListBlocklistResponse {
    pub count: usize,
    pub entries: Vec<BlocklistEntryResponse>,
}

/// Result of an on-demand allowance/balance sync
#[derive(Debug, Serialize, ToSchema)]
pub struct SyncBlocklistResponse {
    pub address: String,
    pub action: SyncAction,
    pub blocked: bool,
}

/// One queued tip
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct QueuedTipResponse {
    pub author_fid: Fid,
    pub interactor_fid: Fid,
    pub interactor_address: String,
    pub token_address: String,
    pub amount: String,
    pub action_type: String,
    pub enqueued_at: String,
}

/// Amount an author has queued or in flight, next to their committed spend
#[derive(Debug, Serialize, ToSchema)]
pub struct ReservationResponse {
    pub author_fid: Fid,
    pub reserved: String,
    pub stats: Option<AuthorStats>,
}

/// Settlement queue state
#[derive(Debug, Serialize, ToSchema)]
pub struct QueueResponse {
    /// Whether a batch is being settled right now
    pub processing: bool,
    pub pending: Vec<QueuedTipResponse>,
    pub reservations: Vec<ReservationResponse>,
}

fn parse_address(raw: &str) -> Result<Address, AppError> {
    Address::from_str(raw.trim()).map_err(|e| {
        AppError::Validation(ValidationError::InvalidField {
            field: "address".to_string(),
            message: e.to_string(),
        })
    })
}

/// Add an address to the blocklist by hand
///
/// Manual entries are never cleared by allowance/balance syncs.
#[utoipa::path(
    post,
    path = "/admin/blocklist",
    tag = "admin",
    request_body = AddBlocklistRequest,
    responses(
        (status = 200, description = "Address added to blocklist", body = BlocklistResponse),
        (status = 400, description = "Invalid request", body = crate::domain::ErrorResponse),
    )
)]
pub async fn add_blocklist_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AddBlocklistRequest>,
) -> Result<Json<BlocklistResponse>, AppError> {
    if payload.address.trim().is_empty() {
        return Err(AppError::Validation(ValidationError::MissingField(
            "address".to_string(),
        )));
    }
    let address = parse_address(&payload.address)?;

    let newly = state.service.blocklist_sync().add_manual(address).await?;
    warn!(address = %address, newly, "Admin added address to blocklist");

    Ok(Json(BlocklistResponse {
        success: true,
        message: format!("Address {address} added to blocklist"),
    }))
}

/// Remove an address from the blocklist
///
/// DELETE /admin/blocklist/{address}
#[utoipa::path(
    delete,
    path = "/admin/blocklist/{address}",
    tag = "admin",
    params(
        ("address" = String, Path, description = "Address to remove from the blocklist")
    ),
    responses(
        (status = 200, description = "Address removed from blocklist", body = BlocklistResponse),
        (status = 400, description = "Invalid address", body = crate::domain::ErrorResponse),
        (status = 404, description = "Address not found in blocklist", body = crate::domain::ErrorResponse),
    )
)]
pub async fn remove_blocklist_handler(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
) -> Result<Json<BlocklistResponse>, AppError> {
    let address = parse_address(&address)?;

    if state.service.blocklist_sync().remove(&address).await? {
        warn!(address = %address, "Admin removed address from blocklist");
        Ok(Json(BlocklistResponse {
            success: true,
            message: format!("Address {address} removed from blocklist"),
        }))
    } else {
        Err(AppError::Database(DatabaseError::NotFound(format!(
            "Address {address} not found in blocklist"
        ))))
    }
}

/// List all addresses in the blocklist
#[utoipa::path(
    get,
    path = "/admin/blocklist",
    tag = "admin",
    responses(
        (status = 200, description = "All blocklisted addresses", body = ListBlocklistResponse),
    )
)]
pub async fn list_blocklist_handler(
    State(state): State<Arc<AppState>>,
) -> Json<ListBlocklistResponse> {
    let mut entries: Vec<BlocklistEntryResponse> = state
        .service
        .list_blocklist()
        .into_iter()
        .map(|e| BlocklistEntryResponse {
            address: e.address.to_string(),
            reason: e.reason,
            updated_at: e.updated_at.to_rfc3339(),
        })
        .collect();
    entries.sort_by(|a, b| a.address.cmp(&b.address));

    Json(ListBlocklistResponse {
        count: entries.len(),
        entries,
    })
}

/// Re-check an author's allowance and balance now
#[utoipa::path(
    post,
    path = "/admin/blocklist/{address}/sync",
    tag = "admin",
    params(
        ("address" = String, Path, description = "Author funding address")
    ),
    responses(
        (status = 200, description = "Sync result", body = SyncBlocklistResponse),
        (status = 400, description = "Invalid address", body = crate::domain::ErrorResponse),
        (status = 502, description = "Chain read failed", body = crate::domain::ErrorResponse),
    )
)]
pub async fn sync_blocklist_handler(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
) -> Result<Json<SyncBlocklistResponse>, AppError> {
    let address = parse_address(&address)?;
    let action = state.service.sync_blocklist_address(address).await?;

    Ok(Json(SyncBlocklistResponse {
        address: address.to_string(),
        action,
        blocked: state.service.blocklist_sync().should_block(&address),
    }))
}

/// Inspect the settlement queue
#[utoipa::path(
    get,
    path = "/admin/queue",
    tag = "admin",
    responses(
        (status = 200, description = "Queue state", body = QueueResponse),
        (status = 500, description = "Internal server error", body = crate::domain::ErrorResponse),
    )
)]
pub async fn queue_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<QueueResponse>, AppError> {
    let snapshot = state.service.queue_snapshot().await;

    let mut reservations = Vec::with_capacity(snapshot.reserved.len());
    for (author_fid, reserved) in snapshot.reserved {
        reservations.push(ReservationResponse {
            author_fid,
            reserved,
            stats: state.service.author_stats(author_fid).await?,
        });
    }

    let pending = snapshot
        .pending
        .into_iter()
        .map(|tip| QueuedTipResponse {
            author_fid: tip.author_fid,
            interactor_fid: tip.interactor_fid,
            interactor_address: tip.interactor_address.to_string(),
            token_address: tip.token_address.to_string(),
            amount: tip.amount,
            action_type: tip.action_type.to_string(),
            enqueued_at: tip.enqueued_at.to_rfc3339(),
        })
        .collect();

    Ok(Json(QueueResponse {
        processing: snapshot.processing,
        pending,
        reservations,
    }))
}
