//! Router construction.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    routing::{delete, get, post},
};
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use super::admin::{
    add_blocklist_handler, list_blocklist_handler, queue_handler, remove_blocklist_handler,
    sync_blocklist_handler,
};
use super::handlers::{
    ApiDoc, health_check_handler, interaction_webhook_handler, leaderboard_handler,
    liveness_handler,
};
use crate::app::AppState;

/// Webhook deliveries are small; anything bigger is not an interaction envelope
const MAX_BODY_BYTES: usize = 256 * 1024;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the HTTP router with tracing, timeout and body limit layers
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let admin = Router::new()
        .route(
            "/admin/blocklist",
            get(list_blocklist_handler).post(add_blocklist_handler),
        )
        .route("/admin/blocklist/{address}", delete(remove_blocklist_handler))
        .route("/admin/blocklist/{address}/sync", post(sync_blocklist_handler))
        .route("/admin/queue", get(queue_handler));

    Router::new()
        .route("/webhooks/interactions", post(interaction_webhook_handler))
        .route("/leaderboard", get(leaderboard_handler))
        .route("/health", get(health_check_handler))
        .route("/health/live", get(liveness_handler))
        .merge(admin)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}
