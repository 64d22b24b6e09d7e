//! HTTP request handlers with OpenAPI documentation.

use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use utoipa::{IntoParams, OpenApi, ToSchema};
use validator::Validate;

use super::admin;
use crate::app::AppState;
use crate::domain::{
    AppError, ErrorDetail, ErrorResponse, HealthResponse, HealthStatus, LeaderboardEntry,
    LeaderboardKind, ValidationError,
};

/// OpenAPI documentation structure
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Reverse Tip Relayer API",
        version = "0.1.0",
        description = "Webhook ingestion, leaderboards and operator endpoints for the reverse-tip settlement relayer",
        license(
            name = "MIT"
        )
    ),
    paths(
        interaction_webhook_handler,
        health_check_handler,
        liveness_handler,
        leaderboard_handler,
        admin::list_blocklist_handler,
        admin::add_blocklist_handler,
        admin::remove_blocklist_handler,
        admin::sync_blocklist_handler,
        admin::queue_handler,
    ),
    components(
        schemas(
            WebhookAck,
            LeaderboardEntry,
            LeaderboardKind,
            HealthResponse,
            HealthStatus,
            ErrorResponse,
            ErrorDetail,
            admin::AddBlocklistRequest,
            admin::BlocklistResponse,
            admin::BlocklistEntryResponse,
            admin::ListBlocklistResponse,
            admin::SyncBlocklistResponse,
            admin::QueueResponse,
            admin::QueuedTipResponse,
            admin::ReservationResponse,
            crate::domain::AuthorStats,
            crate::app::SyncAction,
        )
    ),
    tags(
        (name = "webhooks", description = "Inbound interaction events"),
        (name = "leaderboard", description = "Tip rankings"),
        (name = "health", description = "Health check endpoints"),
        (name = "admin", description = "Operator endpoints")
    )
)]
pub struct ApiDoc;

/// Acknowledgement returned to the event source
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
    /// Interactions parsed from the delivery
    #[schema(example = 1)]
    pub events: usize,
}

/// Leaderboard query
#[derive(Debug, Deserialize, Validate, IntoParams)]
pub struct LeaderboardQuery {
    /// `tippers` (by amount paid) or `earners` (by amount received)
    #[serde(default)]
    pub kind: LeaderboardKind,
    /// Maximum rows (1-100, default: 10)
    #[validate(range(min = 1, max = 100, message = "Limit must be between 1 and 100"))]
    #[serde(default = "default_leaderboard_limit")]
    pub limit: i64,
}

fn default_leaderboard_limit() -> i64 {
    10
}

/// Receive interaction events from the social-graph provider
///
/// Every delivery is acknowledged with 200, including malformed bodies and
/// interactions that do not earn a tip. Eligible tips are queued for the next
/// settlement batch.
#[utoipa::path(
    post,
    path = "/webhooks/interactions",
    tag = "webhooks",
    request_body = Object,
    responses(
        (status = 200, description = "Delivery acknowledged", body = WebhookAck)
    )
)]
pub async fn interaction_webhook_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Json<WebhookAck> {
    let value = serde_json::from_slice::<Value>(&body).unwrap_or(Value::Null);
    let receipt = state.service.handle_webhook(value).await;
    info!(
        events = receipt.events,
        queued = receipt.queued,
        "Interaction webhook processed"
    );
    Json(WebhookAck {
        received: true,
        events: receipt.events,
    })
}

/// Detailed health check
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Health status", body = HealthResponse)
    )
)]
pub async fn health_check_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let health = state.service.health_check().await;
    Json(health)
}

/// Kubernetes liveness check
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "health",
    responses(
        (status = 200, description = "Application is alive")
    )
)]
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Top tippers or earners, aggregated per token
#[utoipa::path(
    get,
    path = "/leaderboard",
    tag = "leaderboard",
    params(LeaderboardQuery),
    responses(
        (status = 200, description = "Leaderboard rows", body = Vec<LeaderboardEntry>),
        (status = 400, description = "Invalid query", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn leaderboard_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<Vec<LeaderboardEntry>>, AppError> {
    query
        .validate()
        .map_err(|e| AppError::Validation(ValidationError::Multiple(e.to_string())))?;
    let rows = state.service.leaderboard(query.kind, query.limit).await?;
    Ok(Json(rows))
}
