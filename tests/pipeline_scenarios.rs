//! End-to-end pipeline scenarios over in-memory collaborators:
//! webhook → validate → enqueue → flush → settle → record.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, U256, address};
use serde_json::{Value, json};

use reverse_tip_relayer::app::{
    AppState, IngestOutcome, PipelineConfig, SyncAction, spawn_settlement_worker,
};
use reverse_tip_relayer::domain::{
    ActionSetting, AuthorConfig, ChainClient, EventFilter, IneligibleReason, InteractionEvent,
    InteractionType, SocialOracle, TipStore, amount,
};
use reverse_tip_relayer::test_utils::{MockChainClient, MockOracle, MockWorld};

const USDC: Address = address!("833589fcd6edb6e08f4c7c32d4f71b54bda02913");
const BATCH_CONTRACT: Address = Address::repeat_byte(0xbc);
const AUTHOR_FID: u64 = 10;
const AUTHOR: Address = Address::repeat_byte(0xa1);

/// 1 USDC in token units
const ONE: u64 = 1_000_000;

fn interactor_address(fid: u64) -> Address {
    Address::repeat_byte(0x40 + fid as u8)
}

fn fast_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.batch.worker_enabled = false;
    config.blocklist.cache_ttl = Duration::ZERO;
    config.settlement.receipt_poll_attempts = 3;
    config.settlement.receipt_poll_interval = Duration::from_millis(1);
    config.settlement.sequential_delay = Duration::ZERO;
    config
}

fn author_config(spending_limit: &str) -> AuthorConfig {
    let mut config = AuthorConfig::new(AUTHOR_FID, AUTHOR, USDC, spending_limit);
    config.like = ActionSetting::enabled("0.1");
    config
}

struct Harness {
    world: MockWorld,
    state: AppState,
    /// Address authors approve under this configuration
    spender: Address,
}

impl Harness {
    async fn new(config: PipelineConfig, author: AuthorConfig) -> Self {
        let world = MockWorld::new();
        Self::with_world(world, config, author).await
    }

    async fn with_world(world: MockWorld, config: PipelineConfig, author: AuthorConfig) -> Self {
        let spender = config
            .settlement
            .batch_contract
            .unwrap_or(MockChainClient::EXECUTOR);
        world.store.insert_author(author);
        world
            .chain
            .fund(USDC, AUTHOR, spender, U256::from(10 * ONE), U256::from(10 * ONE));
        for fid in 20..40 {
            world.oracle.add_user(fid, 500, 0.9, Some(interactor_address(fid)));
        }

        let store: Arc<dyn TipStore> = world.store.clone();
        let chain: Arc<dyn ChainClient> = world.chain.clone();
        let oracle: Arc<dyn SocialOracle> = world.oracle.clone();
        let filter: Arc<dyn EventFilter> = world.filter.clone();
        let state = AppState::build(store, chain, oracle, filter, config)
            .await
            .unwrap();
        assert_eq!(state.service.transfer_route().spender(), spender);
        Self {
            world,
            state,
            spender,
        }
    }

    fn total_spent(&self) -> String {
        self.world.store.author(AUTHOR_FID).unwrap().total_spent
    }
}

fn like(interactor: u64, cast: &str) -> Value {
    json!({
        "type": "reaction.created",
        "data": {
            "reaction_type": 1,
            "user": { "fid": interactor },
            "cast": { "hash": cast, "author": { "fid": AUTHOR_FID } }
        }
    })
}

fn like_event(interactor: u64, cast: &str) -> InteractionEvent {
    InteractionEvent {
        interaction_type: InteractionType::Like,
        author_fid: AUTHOR_FID,
        interactor_fid: interactor,
        cast_reference: Some(cast.to_string()),
        observed_at: chrono::Utc::now(),
    }
}

#[tokio::test]
async fn test_single_successful_like() {
    let h = Harness::new(fast_config(), author_config("10")).await;

    let receipt = h.state.service.handle_webhook(like(20, "0xcast")).await;
    assert_eq!(receipt.events, 1);
    assert_eq!(receipt.queued, 1);

    let summary = h.state.service.flush().await.unwrap();
    assert_eq!(summary.settled, 1);
    assert_eq!(summary.dropped, 0);

    let history = h.world.store.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].amount, "0.1");
    assert_eq!(history[0].to_address, interactor_address(20));
    assert_eq!(h.total_spent(), "0.1");
    assert_eq!(
        h.world.chain.balance_of_account(USDC, interactor_address(20)),
        U256::from(ONE / 10)
    );
}

#[tokio::test]
async fn test_insufficient_allowance_creates_no_tip() {
    let h = Harness::new(fast_config(), author_config("10")).await;
    h.world.chain.set_allowance(USDC, AUTHOR, h.spender, U256::from(ONE / 20));

    let outcome = h
        .state
        .service
        .process_event(&like_event(20, "0xcast"))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        IngestOutcome::Ineligible(IneligibleReason::InsufficientAllowance)
    );

    assert!(h.state.service.flush().await.is_none());
    assert!(h.world.chain.sent_transactions().is_empty());
    assert!(h.world.store.history().is_empty());
}

#[tokio::test]
async fn test_batch_contract_revert_falls_back_to_multicall() {
    let mut config = fast_config();
    config.settlement.batch_contract = Some(BATCH_CONTRACT);
    let h = Harness::new(config, author_config("10")).await;
    h.world.chain.fail_batch_contract(true);

    for interactor in [20, 21, 22] {
        h.state.service.handle_webhook(like(interactor, "0xcast")).await;
    }
    let summary = h.state.service.flush().await.unwrap();
    assert_eq!(summary.strategy, Some("multicall"));

    let history = h.world.store.history();
    assert_eq!(history.len(), 3);
    let hash = &history[0].transaction_hash;
    assert!(history.iter().all(|r| &r.transaction_hash == hash));

    let sent = h.world.chain.sent_transactions();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, BATCH_CONTRACT);
    assert_eq!(*hash, format!("{:#x}", sent[0].hash));
    assert_eq!(h.total_spent(), "0.3");
    assert_eq!(
        h.world.chain.allowance_of(USDC, AUTHOR, BATCH_CONTRACT),
        U256::from(10 * ONE - 3 * ONE / 10)
    );
}

#[tokio::test]
async fn test_without_contract_only_direct_transfers_run() {
    let h = Harness::new(fast_config(), author_config("10")).await;

    for interactor in [20, 21] {
        h.state.service.handle_webhook(like(interactor, "0xcast")).await;
    }
    let summary = h.state.service.flush().await.unwrap();
    assert_eq!(summary.strategy, Some("sequential"));
    assert_eq!(summary.settled, 2);

    let sent = h.world.chain.sent_transactions();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|tx| tx.to == USDC));
    assert_eq!(h.world.chain.call_count("simulate"), 2);
}

#[tokio::test]
async fn test_approval_to_the_wrong_spender_is_ineligible() {
    let mut config = fast_config();
    config.settlement.batch_contract = Some(BATCH_CONTRACT);
    let h = Harness::new(config, author_config("10")).await;
    h.world.chain.set_allowance(USDC, AUTHOR, BATCH_CONTRACT, U256::ZERO);
    h.world
        .chain
        .set_allowance(USDC, AUTHOR, MockChainClient::EXECUTOR, U256::from(10 * ONE));

    let outcome = h
        .state
        .service
        .process_event(&like_event(20, "0xcast"))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        IngestOutcome::Ineligible(IneligibleReason::InsufficientAllowance)
    );
}

#[tokio::test]
async fn test_full_cascade_to_individual_transfers() {
    let mut config = fast_config();
    config.settlement.batch_contract = Some(BATCH_CONTRACT);
    let h = Harness::new(config, author_config("10")).await;
    h.world.chain.fail_batch_contract(true);
    h.world.chain.revert_transfers_to(interactor_address(22));

    for interactor in [20, 21, 22] {
        h.state.service.handle_webhook(like(interactor, "0xcast")).await;
    }
    let summary = h.state.service.flush().await.unwrap();
    assert_eq!(summary.strategy, Some("sequential"));
    assert_eq!(summary.settled, 2);
    assert_eq!(summary.dropped, 1);

    let history = h.world.store.history();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|r| r.to_address != interactor_address(22)));
    assert_eq!(h.total_spent(), "0.2");
    assert!(
        h.world
            .chain
            .sent_transactions()
            .iter()
            .all(|tx| tx.to == BATCH_CONTRACT)
    );

    // dropped, not re-queued
    assert!(h.state.service.accumulator().is_empty().await);
}

#[tokio::test]
async fn test_duplicate_deliveries_settle_once() {
    let h = Harness::new(fast_config(), author_config("10")).await;

    let first = h.state.service.handle_webhook(like(20, "0xcast")).await;
    let again = h.state.service.handle_webhook(like(20, "0xcast")).await;
    assert_eq!(first.queued, 1);
    assert_eq!(again.queued, 0);

    h.state.service.flush().await.unwrap();

    let outcome = h
        .state
        .service
        .process_event(&like_event(20, "0xcast"))
        .await
        .unwrap();
    assert_eq!(outcome, IngestOutcome::Ineligible(IneligibleReason::AlreadyTipped));
    assert!(h.state.service.flush().await.is_none());

    assert_eq!(h.world.store.history().len(), 1);
    assert_eq!(h.total_spent(), "0.1");
}

#[tokio::test]
async fn test_failed_ledger_write_never_pays_twice() {
    let h = Harness::new(fast_config(), author_config("10")).await;
    h.world.store.fail_next_records(1);

    h.state.service.handle_webhook(like(20, "0xcast")).await;
    let first = h.state.service.flush().await.unwrap();
    assert_eq!(first.settled, 1);
    assert_eq!(first.ledger.parked, 1);
    assert!(h.world.store.history().is_empty());
    assert_eq!(h.state.service.unrecorded_tips().await.len(), 1);

    // paid but unrecorded: the key stays reserved
    let again = h.state.service.handle_webhook(like(20, "0xcast")).await;
    assert_eq!(again.queued, 0);
    assert_eq!(
        h.state
            .service
            .process_event(&like_event(20, "0xcast"))
            .await
            .unwrap(),
        IngestOutcome::Ineligible(IneligibleReason::AlreadyTipped)
    );

    h.state.service.handle_webhook(like(21, "0xother")).await;
    let second = h.state.service.flush().await.unwrap();
    assert_eq!(second.backfilled, 1);
    assert_eq!(second.settled, 1);
    assert!(h.state.service.unrecorded_tips().await.is_empty());

    let redelivered = h.state.service.handle_webhook(like(20, "0xcast")).await;
    assert_eq!(redelivered.queued, 0);
    assert!(h.state.service.flush().await.is_none());

    assert_eq!(h.world.chain.sent_transactions().len(), 2);
    assert_eq!(
        h.world.chain.balance_of_account(USDC, interactor_address(20)),
        U256::from(ONE / 10)
    );
    assert_eq!(h.world.store.history().len(), 2);
    assert_eq!(h.total_spent(), "0.2");
}

#[tokio::test]
async fn test_parked_write_still_counts_toward_limit() {
    let h = Harness::new(fast_config(), author_config("0.1")).await;
    h.world.store.fail_next_records(1);

    h.state.service.handle_webhook(like(20, "0xcast")).await;
    h.state.service.flush().await.unwrap();
    assert_eq!(h.total_spent(), "0");

    let outcome = h
        .state
        .service
        .process_event(&like_event(21, "0xcast"))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        IngestOutcome::Ineligible(IneligibleReason::SpendingLimitReached)
    );
}

#[tokio::test]
async fn test_same_interactor_different_casts_both_settle() {
    let h = Harness::new(fast_config(), author_config("10")).await;

    h.state.service.handle_webhook(like(20, "0xaaa")).await;
    h.state.service.handle_webhook(like(20, "0xbbb")).await;
    h.state.service.flush().await.unwrap();

    assert_eq!(h.world.store.history().len(), 2);
    assert_eq!(h.total_spent(), "0.2");
}

#[tokio::test]
async fn test_spending_limit_holds_under_concurrent_enqueue() {
    let h = Harness::new(fast_config(), author_config("0.3")).await;

    let mut tasks = Vec::new();
    for interactor in 20..30 {
        let service = Arc::clone(&h.state.service);
        tasks.push(tokio::spawn(async move {
            service.process_event(&like_event(interactor, "0xcast")).await
        }));
    }
    let mut queued = 0;
    for task in tasks {
        if let IngestOutcome::Queued { .. } = task.await.unwrap().unwrap() {
            queued += 1;
        }
    }
    assert_eq!(queued, 3);

    h.state.service.flush().await.unwrap();
    let settled: Vec<String> = h.world.store.history().into_iter().map(|r| r.amount).collect();
    let total = settled
        .iter()
        .try_fold("0".to_string(), |acc, a| amount::add(&acc, a))
        .unwrap();
    assert_eq!(total, "0.3");
    assert_eq!(h.total_spent(), "0.3");

    let outcome = h
        .state
        .service
        .process_event(&like_event(35, "0xcast"))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        IngestOutcome::Ineligible(IneligibleReason::SpendingLimitReached)
    );
}

#[tokio::test]
async fn test_blocklist_converges_with_allowance() {
    let h = Harness::new(fast_config(), author_config("10")).await;
    let sync = h.state.service.blocklist_sync();

    h.world.chain.set_allowance(USDC, AUTHOR, h.spender, U256::from(ONE / 20));
    assert_eq!(sync.sync(AUTHOR).await.unwrap(), SyncAction::Added);
    assert!(sync.should_block(&AUTHOR));
    assert_eq!(h.world.filter.removed(), vec![AUTHOR_FID]);

    let outcome = h
        .state
        .service
        .process_event(&like_event(20, "0xcast"))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        IngestOutcome::Ineligible(IneligibleReason::AuthorBlocklisted)
    );

    h.world.chain.set_allowance(USDC, AUTHOR, h.spender, U256::from(10 * ONE));
    assert_eq!(sync.sync(AUTHOR).await.unwrap(), SyncAction::Removed);
    assert!(!sync.should_block(&AUTHOR));
    assert_eq!(h.world.filter.added(), vec![AUTHOR_FID]);
}

#[tokio::test]
async fn test_author_spent_down_is_blocked_after_flush() {
    let h = Harness::new(fast_config(), author_config("10")).await;
    h.world
        .chain
        .fund(USDC, AUTHOR, h.spender, U256::from(ONE / 10), U256::from(10 * ONE));

    h.state.service.handle_webhook(like(20, "0xcast")).await;
    h.state.service.flush().await.unwrap();

    assert_eq!(h.world.store.history().len(), 1);
    assert!(h.state.service.blocklist_sync().should_block(&AUTHOR));
    assert_eq!(h.world.filter.removed(), vec![AUTHOR_FID]);
}

#[tokio::test]
async fn test_missing_executor_drops_batch() {
    let world = MockWorld {
        chain: Arc::new(MockChainClient::without_signer()),
        ..MockWorld::new()
    };
    let mut config = fast_config();
    config.settlement.batch_contract = Some(BATCH_CONTRACT);
    let h = Harness::with_world(world, config, author_config("10")).await;

    h.state.service.handle_webhook(like(20, "0xcast")).await;
    let summary = h.state.service.flush().await.unwrap();

    assert_eq!(summary.strategy, None);
    assert_eq!(summary.dropped, 1);
    assert!(h.world.store.history().is_empty());
    assert_eq!(h.total_spent(), "0");
    assert!(h.state.service.accumulator().is_empty().await);
}

#[tokio::test]
async fn test_malformed_webhook_is_acknowledged_with_no_events() {
    let h = Harness::new(fast_config(), author_config("10")).await;

    let receipt = h
        .state
        .service
        .handle_webhook(json!({ "type": "reaction.created", "data": { "nope": true } }))
        .await;
    assert_eq!(receipt.events, 0);

    let receipt = h.state.service.handle_webhook(Value::Null).await;
    assert_eq!(receipt.events, 0);
}

#[tokio::test]
async fn test_oracle_failure_drops_event_but_acknowledges() {
    let world = MockWorld {
        oracle: Arc::new(MockOracle::failing("oracle down")),
        ..MockWorld::new()
    };
    let h = Harness::with_world(world, fast_config(), author_config("10")).await;

    let receipt = h.state.service.handle_webhook(like(20, "0xcast")).await;
    assert_eq!(receipt.events, 1);
    assert_eq!(receipt.queued, 0);
}

#[tokio::test]
async fn test_worker_flushes_when_queue_reaches_max_size() {
    let mut config = fast_config();
    config.batch.max_size = 2;
    config.batch.flush_interval = Duration::from_secs(3600);
    let h = Harness::new(config.clone(), author_config("10")).await;

    let (handle, shutdown) = spawn_settlement_worker(Arc::clone(&h.state.service), &config.batch);

    h.state.service.handle_webhook(like(20, "0xcast")).await;
    h.state.service.handle_webhook(like(21, "0xcast")).await;

    let mut settled = 0;
    for _ in 0..200 {
        settled = h.world.store.history().len();
        if settled == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(settled, 2);

    shutdown.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_worker_drains_queue_on_shutdown() {
    let mut config = fast_config();
    config.batch.flush_interval = Duration::from_secs(3600);
    let h = Harness::new(config.clone(), author_config("10")).await;

    let (handle, shutdown) = spawn_settlement_worker(Arc::clone(&h.state.service), &config.batch);
    h.state.service.handle_webhook(like(20, "0xcast")).await;

    shutdown.send(true).unwrap();
    handle.await.unwrap();

    assert_eq!(h.world.store.history().len(), 1);
}

#[tokio::test]
async fn test_sweep_records_completion_time() {
    let h = Harness::new(fast_config(), author_config("10")).await;
    h.world.chain.set_balance(USDC, AUTHOR, U256::ZERO);

    let summary = h.state.service.sweep_blocklist().await.unwrap();
    assert_eq!(summary.checked, 1);
    assert_eq!(summary.added, 1);

    let entries = h.state.service.list_blocklist();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].reason, "insufficient_balance");
    assert!(
        h.world
            .store
            .get_scalar("last_blocklist_sweep_at")
            .await
            .unwrap()
            .is_some()
    );
}
