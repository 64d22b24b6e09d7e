//! Integration tests for the API.

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use reverse_tip_relayer::api::{ListBlocklistResponse, create_router};
use reverse_tip_relayer::app::{AppState, PipelineConfig};
use reverse_tip_relayer::domain::{
    ActionSetting, AuthorConfig, ChainClient, EventFilter, SocialOracle, TipStore,
};
use reverse_tip_relayer::test_utils::{MockChainClient, MockWorld};

const USDC: Address = Address::repeat_byte(0x0c);
const AUTHOR: Address = Address::repeat_byte(0xa1);
const FAN: Address = Address::repeat_byte(0xf1);

async fn create_test_state(world: &MockWorld) -> Arc<AppState> {
    let mut config = PipelineConfig::default();
    config.batch.worker_enabled = false;
    config.blocklist.cache_ttl = std::time::Duration::ZERO;

    let store: Arc<dyn TipStore> = world.store.clone();
    let chain: Arc<dyn ChainClient> = world.chain.clone();
    let oracle: Arc<dyn SocialOracle> = world.oracle.clone();
    let filter: Arc<dyn EventFilter> = world.filter.clone();
    Arc::new(
        AppState::build(store, chain, oracle, filter, config)
            .await
            .unwrap(),
    )
}

fn seed_author(world: &MockWorld) {
    let mut config = AuthorConfig::new(10, AUTHOR, USDC, "10");
    config.like = ActionSetting::enabled("0.1");
    world.store.insert_author(config);
    world
        .chain
        .fund(
            USDC,
            AUTHOR,
            MockChainClient::EXECUTOR,
            U256::from(10_000_000u64),
            U256::from(10_000_000u64),
        );
    world.oracle.add_user(20, 500, 0.9, Some(FAN));
}

async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&body_bytes).unwrap_or(Value::Null);
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_webhook_like_is_acknowledged_and_queued() {
    let world = MockWorld::new();
    seed_author(&world);
    let state = create_test_state(&world).await;
    let router = create_router(Arc::clone(&state));

    let payload = json!({
        "type": "reaction.created",
        "data": {
            "reaction_type": 1,
            "user": { "fid": 20 },
            "cast": { "hash": "0xabc", "author": { "fid": 10 } }
        }
    });
    let (status, body) = send(router, post_json("/webhooks/interactions", &payload)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], true);
    assert_eq!(body["events"], 1);
    assert_eq!(state.service.accumulator().len().await, 1);
}

#[tokio::test]
async fn test_webhook_malformed_body_still_returns_ok() {
    let world = MockWorld::new();
    let router = create_router(create_test_state(&world).await);

    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/interactions")
        .header("Content-Type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(router, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], true);
    assert_eq!(body["events"], 0);
}

#[tokio::test]
async fn test_webhook_unknown_event_type_is_ignored() {
    let world = MockWorld::new();
    let router = create_router(create_test_state(&world).await);

    let payload = json!({ "type": "user.updated", "data": { "fid": 3 } });
    let (status, body) = send(router, post_json("/webhooks/interactions", &payload)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["events"], 0);
}

#[tokio::test]
async fn test_health_check_healthy() {
    let world = MockWorld::new();
    let router = create_router(create_test_state(&world).await);

    let (status, body) = send(router, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"], "healthy");
    assert_eq!(body["chain"], "healthy");
    assert_eq!(body["queued_tips"], 0);
}

#[tokio::test]
async fn test_health_check_database_down() {
    let world = MockWorld::new();
    let state = create_test_state(&world).await;
    world.store.set_healthy(false);
    let router = create_router(state);

    let (status, body) = send(router, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "unhealthy");
    assert_eq!(body["database"], "unhealthy");
}

#[tokio::test]
async fn test_liveness() {
    let world = MockWorld::new();
    let router = create_router(create_test_state(&world).await);

    let response = router.oneshot(get("/health/live")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_leaderboard_after_settlement() {
    let world = MockWorld::new();
    seed_author(&world);
    let state = create_test_state(&world).await;

    let payload = json!({
        "type": "reaction.created",
        "data": {
            "reaction_type": "like",
            "user": { "fid": 20 },
            "cast": { "hash": "0xabc", "author": { "fid": 10 } }
        }
    });
    state.service.handle_webhook(payload).await;
    state.service.flush().await.unwrap();

    let router = create_router(Arc::clone(&state));
    let (status, body) = send(router, get("/leaderboard?kind=earners&limit=5")).await;

    assert_eq!(status, StatusCode::OK);
    let rows = body.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["address"], format!("{FAN:#x}"));
    assert_eq!(rows[0]["total_amount"], "0.1");
    assert_eq!(rows[0]["tip_count"], 1);
}

#[tokio::test]
async fn test_leaderboard_rejects_out_of_range_limit() {
    let world = MockWorld::new();
    let state = create_test_state(&world).await;

    for uri in ["/leaderboard?limit=0", "/leaderboard?limit=101"] {
        let (status, body) = send(create_router(Arc::clone(&state)), get(uri)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body["error"]["type"], "validation_error");
    }
}

#[tokio::test]
async fn test_admin_blocklist_lifecycle() {
    let world = MockWorld::new();
    let state = create_test_state(&world).await;
    let address = format!("{AUTHOR:#x}");

    let (status, body) = send(
        create_router(Arc::clone(&state)),
        post_json("/admin/blocklist", &json!({ "address": address })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(state.service.blocklist_sync().should_block(&AUTHOR));

    let response = create_router(Arc::clone(&state))
        .oneshot(get("/admin/blocklist"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let list: ListBlocklistResponse = serde_json::from_slice(&body_bytes).unwrap();
    assert_eq!(list.count, 1);
    assert_eq!(list.entries[0].reason, "manual");

    let delete = Request::builder()
        .method("DELETE")
        .uri(format!("/admin/blocklist/{address}"))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(create_router(Arc::clone(&state)), delete).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!state.service.blocklist_sync().should_block(&AUTHOR));

    let delete_again = Request::builder()
        .method("DELETE")
        .uri(format!("/admin/blocklist/{address}"))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(create_router(state), delete_again).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["type"], "not_found");
}

#[tokio::test]
async fn test_admin_blocklist_rejects_bad_address() {
    let world = MockWorld::new();
    let state = create_test_state(&world).await;

    let (status, _) = send(
        create_router(Arc::clone(&state)),
        post_json("/admin/blocklist", &json!({ "address": "not-an-address" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        create_router(state),
        post_json("/admin/blocklist", &json!({ "address": "  " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_admin_sync_blocks_underfunded_author() {
    let world = MockWorld::new();
    seed_author(&world);
    world
        .chain
        .set_allowance(USDC, AUTHOR, MockChainClient::EXECUTOR, U256::from(1_000u64));
    let state = create_test_state(&world).await;

    let uri = format!("/admin/blocklist/{AUTHOR:#x}/sync");
    let (status, body) = send(create_router(state), post_json(&uri, &Value::Null)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["action"], "added");
    assert_eq!(body["blocked"], true);
    assert_eq!(world.filter.removed(), vec![10]);
}

#[tokio::test]
async fn test_admin_queue_shows_pending_tips() {
    let world = MockWorld::new();
    seed_author(&world);
    let state = create_test_state(&world).await;

    let payload = json!({
        "type": "reaction.created",
        "data": {
            "reaction_type": 1,
            "user": { "fid": 20 },
            "cast": { "hash": "0xabc", "author": { "fid": 10 } }
        }
    });
    state.service.handle_webhook(payload).await;

    let (status, body) = send(create_router(state), get("/admin/queue")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["processing"], false);
    assert_eq!(body["pending"].as_array().unwrap().len(), 1);
    assert_eq!(body["pending"][0]["amount"], "0.1");
    assert_eq!(body["reservations"][0]["author_fid"], 10);
    assert_eq!(body["reservations"][0]["reserved"], "0.1");
    assert_eq!(body["reservations"][0]["stats"]["remaining"], "10");
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let world = MockWorld::new();
    let router = create_router(create_test_state(&world).await);

    let (status, body) = send(router, get("/api-docs/openapi.json")).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/webhooks/interactions"].is_object());
    assert!(body["paths"]["/admin/blocklist/{address}/sync"].is_object());
}
