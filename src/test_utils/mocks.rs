//! Mock implementations for testing.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use alloy::primitives::{Address, B256, Bytes, U256};
use alloy::sol_types::SolCall;

use crate::app::settlement::{SettledTip, SettlementSink};
use crate::domain::amount;
use crate::domain::{
    AppError, AuthorConfig, AuthorStats, BlocklistEntry, ChainClient, ChainError, DatabaseError,
    DedupKey, EventFilter, ExternalServiceError, Fid, LeaderboardEntry, LeaderboardKind, Page,
    ReceiptStatus, RecordOutcome, SocialOracle, TipHistoryRecord, TipStore, UserData,
};
use crate::infra::blockchain::contracts::{IERC20, IMulticall3, ITipBatcher, MULTICALL3_ADDRESS};

/// Configuration for mock behavior
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    pub should_fail: bool,
    pub error_message: Option<String>,
}

impl MockConfig {
    #[must_use]
    pub fn success() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            should_fail: true,
            error_message: Some(message.into()),
        }
    }

    fn message(&self) -> String {
        self.error_message
            .clone()
            .unwrap_or_else(|| "Mock error".to_string())
    }
}

// ---------------------------------------------------------------------------
// Tip store
// ---------------------------------------------------------------------------

/// In-memory tip store
pub struct MockTipStore {
    configs: Mutex<HashMap<Fid, AuthorConfig>>,
    history: Mutex<Vec<TipHistoryRecord>>,
    blocklist: Mutex<HashMap<Address, BlocklistEntry>>,
    scalars: Mutex<HashMap<String, String>>,
    config: MockConfig,
    is_healthy: AtomicBool,
    failing_records: AtomicUsize,
}

impl MockTipStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            configs: Mutex::new(HashMap::new()),
            history: Mutex::new(Vec::new()),
            blocklist: Mutex::new(HashMap::new()),
            scalars: Mutex::new(HashMap::new()),
            config,
            is_healthy: AtomicBool::new(true),
            failing_records: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_config(MockConfig::failure(message))
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    /// Make the next `count` settlement writes fail
    pub fn fail_next_records(&self, count: usize) {
        self.failing_records.store(count, Ordering::SeqCst);
    }

    /// Seed an author configuration
    pub fn insert_author(&self, config: AuthorConfig) {
        self.configs.lock().unwrap().insert(config.fid, config);
    }

    /// Current configuration of an author
    pub fn author(&self, fid: Fid) -> Option<AuthorConfig> {
        self.configs.lock().unwrap().get(&fid).cloned()
    }

    /// All history rows in insertion order
    pub fn history(&self) -> Vec<TipHistoryRecord> {
        self.history.lock().unwrap().clone()
    }

    fn check_should_fail(&self) -> Result<(), AppError> {
        if self.config.should_fail {
            return Err(AppError::Database(DatabaseError::Query(
                self.config.message(),
            )));
        }
        Ok(())
    }
}

impl Default for MockTipStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TipStore for MockTipStore {
    async fn health_check(&self) -> Result<(), AppError> {
        if !self.is_healthy.load(Ordering::Relaxed) {
            return Err(AppError::Database(DatabaseError::Connection(
                "Unhealthy".to_string(),
            )));
        }
        self.check_should_fail()
    }

    async fn get_author_config(&self, fid: Fid) -> Result<Option<AuthorConfig>, AppError> {
        self.check_should_fail()?;
        Ok(self.author(fid))
    }

    async fn get_author_config_by_address(
        &self,
        address: &Address,
    ) -> Result<Option<AuthorConfig>, AppError> {
        self.check_should_fail()?;
        Ok(self
            .configs
            .lock()
            .unwrap()
            .values()
            .find(|c| c.address == *address)
            .cloned())
    }

    async fn upsert_author_config(&self, config: &AuthorConfig) -> Result<(), AppError> {
        self.check_should_fail()?;
        self.insert_author(config.clone());
        Ok(())
    }

    async fn list_active_author_configs(&self) -> Result<Vec<AuthorConfig>, AppError> {
        self.check_should_fail()?;
        let mut configs: Vec<AuthorConfig> = self
            .configs
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.is_active)
            .cloned()
            .collect();
        configs.sort_by_key(|c| c.fid);
        Ok(configs)
    }

    async fn has_user_been_tipped_for_cast(&self, key: &DedupKey) -> Result<bool, AppError> {
        self.check_should_fail()?;
        Ok(self
            .history
            .lock()
            .unwrap()
            .iter()
            .any(|r| r.dedup_key == *key))
    }

    async fn record_settlement(
        &self,
        record: &TipHistoryRecord,
    ) -> Result<RecordOutcome, AppError> {
        self.check_should_fail()?;
        if self
            .failing_records
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(AppError::Database(DatabaseError::Query(
                "connection reset during commit".to_string(),
            )));
        }
        let mut history = self.history.lock().unwrap();
        if history.iter().any(|r| r.dedup_key == record.dedup_key) {
            return Ok(RecordOutcome::AlreadyRecorded);
        }

        let mut configs = self.configs.lock().unwrap();
        let config = configs.get_mut(&record.author_fid).ok_or_else(|| {
            AppError::Database(DatabaseError::NotFound(format!(
                "author config {}",
                record.author_fid
            )))
        })?;
        config.total_spent = amount::add(&config.total_spent, &record.amount)?;
        history.push(record.clone());
        Ok(RecordOutcome::Recorded)
    }

    async fn list_tip_history(
        &self,
        author_fid: Fid,
        limit: i64,
    ) -> Result<Vec<TipHistoryRecord>, AppError> {
        self.check_should_fail()?;
        Ok(self
            .history
            .lock()
            .unwrap()
            .iter()
            .rev()
            .filter(|r| r.author_fid == author_fid)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn leaderboard(
        &self,
        kind: LeaderboardKind,
        limit: i64,
    ) -> Result<Vec<LeaderboardEntry>, AppError> {
        self.check_should_fail()?;
        let mut totals: HashMap<(Address, Address), (String, i64)> = HashMap::new();
        for record in self.history.lock().unwrap().iter() {
            let who = match kind {
                LeaderboardKind::Tippers => record.from_address,
                LeaderboardKind::Earners => record.to_address,
            };
            let entry = totals
                .entry((who, record.token_address))
                .or_insert_with(|| ("0".to_string(), 0));
            entry.0 = amount::add(&entry.0, &record.amount)?;
            entry.1 += 1;
        }

        let mut entries: Vec<LeaderboardEntry> = totals
            .into_iter()
            .map(|((address, token), (total, count))| LeaderboardEntry {
                address: format!("{address:#x}"),
                token_address: format!("{token:#x}"),
                total_amount: total,
                tip_count: count,
            })
            .collect();
        entries.sort_by(|a, b| {
            let a_units = amount::to_units(&a.total_amount, amount::MAX_TOKEN_DECIMALS)
                .unwrap_or_default();
            let b_units = amount::to_units(&b.total_amount, amount::MAX_TOKEN_DECIMALS)
                .unwrap_or_default();
            b_units.cmp(&a_units).then(b.tip_count.cmp(&a.tip_count))
        });
        entries.truncate(limit.max(0) as usize);
        Ok(entries)
    }

    async fn author_stats(&self, fid: Fid) -> Result<Option<AuthorStats>, AppError> {
        self.check_should_fail()?;
        let Some(config) = self.author(fid) else {
            return Ok(None);
        };
        let tips_sent = self
            .history
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.author_fid == fid)
            .count() as i64;
        Ok(Some(AuthorStats::new(
            fid,
            format!("{:#x}", config.address),
            config.total_spent,
            config.spending_limit,
            tips_sent,
        )))
    }

    async fn load_blocklist(&self) -> Result<Vec<BlocklistEntry>, AppError> {
        self.check_should_fail()?;
        Ok(self.blocklist.lock().unwrap().values().cloned().collect())
    }

    async fn upsert_blocklist_entry(&self, entry: &BlocklistEntry) -> Result<(), AppError> {
        self.check_should_fail()?;
        self.blocklist
            .lock()
            .unwrap()
            .insert(entry.address, entry.clone());
        Ok(())
    }

    async fn remove_blocklist_entry(&self, address: &Address) -> Result<bool, AppError> {
        self.check_should_fail()?;
        Ok(self.blocklist.lock().unwrap().remove(address).is_some())
    }

    async fn get_scalar(&self, key: &str) -> Result<Option<String>, AppError> {
        self.check_should_fail()?;
        Ok(self.scalars.lock().unwrap().get(key).cloned())
    }

    async fn set_scalar(&self, key: &str, value: &str) -> Result<(), AppError> {
        self.check_should_fail()?;
        self.scalars
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Chain client
// ---------------------------------------------------------------------------

/// A transaction accepted by [`MockChainClient::send_transaction`]
#[derive(Debug, Clone)]
pub struct SentTransaction {
    pub hash: B256,
    pub to: Address,
    pub calldata: Bytes,
    pub nonce: u64,
}

/// One decoded `transferFrom` leg
#[derive(Debug, Clone, Copy)]
struct TransferLeg {
    token: Address,
    from: Address,
    to: Address,
    amount: U256,
}

/// Programmable in-memory ERC-20 world.
///
/// Understands the calldata the settlement strategies produce (batch contract
/// `batchTip`, `aggregate3`, plain `transferFrom`) and moves balances on
/// success. Allowances are per spender: a leg only succeeds when its owner
/// approved the account that actually calls `transferFrom`, which is the
/// contract receiving `batchTip`/`aggregate3` or the executor for a direct
/// transfer. Legs of one transaction run in order, so earlier legs consume
/// allowance and balance seen by later ones.
pub struct MockChainClient {
    executor: Option<Address>,
    allowances: Mutex<HashMap<(Address, Address, Address), U256>>,
    balances: Mutex<HashMap<(Address, Address), U256>>,
    decimals: Mutex<HashMap<Address, u8>>,
    fail_batch_contract: AtomicBool,
    fail_multicall: AtomicBool,
    executor_authorized: AtomicBool,
    read_error: AtomicBool,
    is_healthy: AtomicBool,
    timeout_recipients: Mutex<HashSet<Address>>,
    revert_recipients: Mutex<HashSet<Address>>,
    receipts: Mutex<HashMap<B256, ReceiptStatus>>,
    sent: Mutex<Vec<SentTransaction>>,
    nonce: AtomicU64,
    calls: Mutex<HashMap<&'static str, usize>>,
}

/// Token state after running a transaction's legs
struct DryRun {
    outcomes: Vec<bool>,
    allowances: HashMap<(Address, Address, Address), U256>,
    balances: HashMap<(Address, Address), U256>,
}

impl DryRun {
    fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|ok| *ok)
    }
}

impl MockChainClient {
    /// Default mock executor address
    pub const EXECUTOR: Address = Address::repeat_byte(0xee);

    #[must_use]
    pub fn new() -> Self {
        Self {
            executor: Some(Self::EXECUTOR),
            allowances: Mutex::new(HashMap::new()),
            balances: Mutex::new(HashMap::new()),
            decimals: Mutex::new(HashMap::new()),
            fail_batch_contract: AtomicBool::new(false),
            fail_multicall: AtomicBool::new(false),
            executor_authorized: AtomicBool::new(true),
            read_error: AtomicBool::new(false),
            is_healthy: AtomicBool::new(true),
            timeout_recipients: Mutex::new(HashSet::new()),
            revert_recipients: Mutex::new(HashSet::new()),
            receipts: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            nonce: AtomicU64::new(0),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// A client with no executor key
    #[must_use]
    pub fn without_signer() -> Self {
        Self {
            executor: None,
            ..Self::new()
        }
    }

    /// ERC-20 `approve` from `owner` to `spender`
    pub fn set_allowance(&self, token: Address, owner: Address, spender: Address, value: U256) {
        self.allowances
            .lock()
            .unwrap()
            .insert((token, owner, spender), value);
    }

    pub fn set_balance(&self, token: Address, owner: Address, value: U256) {
        self.balances.lock().unwrap().insert((token, owner), value);
    }

    /// Approve `spender` and set the owner's balance at once
    pub fn fund(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
        allowance: U256,
        balance: U256,
    ) {
        self.set_allowance(token, owner, spender, allowance);
        self.set_balance(token, owner, balance);
    }

    pub fn set_decimals(&self, token: Address, decimals: u8) {
        self.decimals.lock().unwrap().insert(token, decimals);
    }

    pub fn allowance_of(&self, token: Address, owner: Address, spender: Address) -> U256 {
        self.allowances
            .lock()
            .unwrap()
            .get(&(token, owner, spender))
            .copied()
            .unwrap_or_default()
    }

    pub fn balance_of_account(&self, token: Address, owner: Address) -> U256 {
        self.balances
            .lock()
            .unwrap()
            .get(&(token, owner))
            .copied()
            .unwrap_or_default()
    }

    /// Make the batch contract revert in simulation
    pub fn fail_batch_contract(&self, fail: bool) {
        self.fail_batch_contract.store(fail, Ordering::SeqCst);
    }

    /// Make `aggregate3` writes revert in simulation
    pub fn fail_multicall(&self, fail: bool) {
        self.fail_multicall.store(fail, Ordering::SeqCst);
    }

    /// Whether the batch contract accepts the executor
    pub fn set_executor_authorized(&self, authorized: bool) {
        self.executor_authorized.store(authorized, Ordering::SeqCst);
    }

    /// Make every read fail with a connection error
    pub fn fail_reads(&self, fail: bool) {
        self.read_error.store(fail, Ordering::SeqCst);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::SeqCst);
    }

    /// Transfers to this recipient are broadcast but never confirmed
    pub fn timeout_transfers_to(&self, recipient: Address) {
        self.timeout_recipients.lock().unwrap().insert(recipient);
    }

    /// Transfers to this recipient revert in simulation
    pub fn revert_transfers_to(&self, recipient: Address) {
        self.revert_recipients.lock().unwrap().insert(recipient);
    }

    pub fn sent_transactions(&self) -> Vec<SentTransaction> {
        self.sent.lock().unwrap().clone()
    }

    /// How many times a trait method was invoked
    pub fn call_count(&self, method: &str) -> usize {
        self.calls.lock().unwrap().get(method).copied().unwrap_or(0)
    }

    fn record_call(&self, method: &'static str) {
        *self.calls.lock().unwrap().entry(method).or_insert(0) += 1;
    }

    fn check_reads(&self) -> Result<(), ChainError> {
        if self.read_error.load(Ordering::SeqCst) {
            return Err(ChainError::Connection("mock read failure".to_string()));
        }
        Ok(())
    }

    fn decode_transfer(token: Address, calldata: &[u8]) -> Option<TransferLeg> {
        let call = IERC20::transferFromCall::abi_decode(calldata, true).ok()?;
        Some(TransferLeg {
            token,
            from: call.from,
            to: call.to,
            amount: call.amount,
        })
    }

    /// Decode every transfer leg carried by a transaction to `to`
    fn decode_legs(&self, to: Address, calldata: &[u8]) -> Option<(&'static str, Vec<TransferLeg>)> {
        let selector = calldata.get(..4)?;
        if selector == ITipBatcher::batchTipCall::SELECTOR {
            let call = ITipBatcher::batchTipCall::abi_decode(calldata, true).ok()?;
            let legs = call
                .froms
                .iter()
                .zip(&call.tos)
                .zip(&call.tokens)
                .zip(&call.amounts)
                .map(|(((from, to), token), amount)| TransferLeg {
                    token: *token,
                    from: *from,
                    to: *to,
                    amount: *amount,
                })
                .collect();
            return Some(("batch", legs));
        }
        if selector == IMulticall3::aggregate3Call::SELECTOR {
            let call = IMulticall3::aggregate3Call::abi_decode(calldata, true).ok()?;
            let legs = call
                .calls
                .iter()
                .map(|c| Self::decode_transfer(c.target, &c.callData))
                .collect::<Option<Vec<_>>>()?;
            return Some(("multicall", legs));
        }
        if selector == IERC20::transferFromCall::SELECTOR {
            return Some(("transfer", vec![Self::decode_transfer(to, calldata)?]));
        }
        None
    }

    /// Account that ends up as `msg.sender` of each `transferFrom`
    fn transfer_caller(&self, kind: &str, to: Address) -> Address {
        match kind {
            "transfer" => self.executor.unwrap_or(Address::ZERO),
            _ => to,
        }
    }

    /// Contracts other than canonical Multicall3 only take writes from executors
    fn rejects_caller(&self, kind: &str, to: Address) -> bool {
        kind != "transfer"
            && to != MULTICALL3_ADDRESS
            && !self.executor_authorized.load(Ordering::SeqCst)
    }

    /// Run legs in order against a copy of the token state
    fn dry_run(&self, caller: Address, legs: &[TransferLeg]) -> DryRun {
        let reverts = self.revert_recipients.lock().unwrap().clone();
        let mut allowances = self.allowances.lock().unwrap().clone();
        let mut balances = self.balances.lock().unwrap().clone();

        let mut outcomes = Vec::with_capacity(legs.len());
        for leg in legs {
            let allowance_key = (leg.token, leg.from, caller);
            let allowance = allowances.get(&allowance_key).copied().unwrap_or_default();
            let balance = balances
                .get(&(leg.token, leg.from))
                .copied()
                .unwrap_or_default();
            let ok = !reverts.contains(&leg.to) && allowance >= leg.amount && balance >= leg.amount;
            if ok {
                allowances.insert(allowance_key, allowance - leg.amount);
                balances.insert((leg.token, leg.from), balance - leg.amount);
                let to = balances.entry((leg.token, leg.to)).or_default();
                *to = to.saturating_add(leg.amount);
            }
            outcomes.push(ok);
        }

        DryRun {
            outcomes,
            allowances,
            balances,
        }
    }

    fn commit(&self, run: DryRun) {
        *self.allowances.lock().unwrap() = run.allowances;
        *self.balances.lock().unwrap() = run.balances;
    }
}

impl Default for MockChainClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    fn provider_name(&self) -> &str {
        "mock"
    }

    fn executor_address(&self) -> Option<Address> {
        self.executor
    }

    async fn health_check(&self) -> Result<(), ChainError> {
        if self.is_healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ChainError::Connection("Unhealthy".to_string()))
        }
    }

    async fn decimals(&self, token: Address) -> Result<u8, ChainError> {
        self.record_call("decimals");
        self.check_reads()?;
        Ok(self.decimals.lock().unwrap().get(&token).copied().unwrap_or(6))
    }

    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, ChainError> {
        self.record_call("allowance");
        self.check_reads()?;
        Ok(self.allowance_of(token, owner, spender))
    }

    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256, ChainError> {
        self.record_call("balance_of");
        self.check_reads()?;
        Ok(self.balance_of_account(token, owner))
    }

    async fn allowance_and_balance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<(U256, U256), ChainError> {
        self.record_call("allowance_and_balance");
        self.check_reads()?;
        Ok((
            self.allowance_of(token, owner, spender),
            self.balance_of_account(token, owner),
        ))
    }

    async fn simulate(&self, to: Address, calldata: Bytes) -> Result<Bytes, ChainError> {
        self.record_call("simulate");
        if self.executor.is_none() {
            return Err(ChainError::Signing("no executor key configured".to_string()));
        }
        if calldata.get(..4) == Some(ITipBatcher::isExecutorCall::SELECTOR.as_slice()) {
            let authorized = self.executor_authorized.load(Ordering::SeqCst);
            return Ok(ITipBatcher::isExecutorCall::abi_encode_returns(&(authorized,)).into());
        }

        let (kind, legs) = self
            .decode_legs(to, &calldata)
            .ok_or_else(|| ChainError::InvalidRequest("unrecognized calldata".to_string()))?;
        if self.rejects_caller(kind, to) {
            return Err(ChainError::Reverted("caller is not an executor".to_string()));
        }
        match kind {
            "batch" if self.fail_batch_contract.load(Ordering::SeqCst) => {
                Err(ChainError::Reverted("batch contract reverted".to_string()))
            }
            "multicall" if self.fail_multicall.load(Ordering::SeqCst) => {
                Err(ChainError::Reverted("Multicall3: call failed".to_string()))
            }
            "multicall" | "transfer"
                if !self
                    .dry_run(self.transfer_caller(kind, to), &legs)
                    .all_succeeded() =>
            {
                Err(ChainError::Reverted(
                    "ERC20: transfer amount exceeds allowance".to_string(),
                ))
            }
            _ => Ok(Bytes::new()),
        }
    }

    async fn pending_nonce(&self) -> Result<u64, ChainError> {
        self.record_call("pending_nonce");
        if self.executor.is_none() {
            return Err(ChainError::Signing("no executor key configured".to_string()));
        }
        Ok(self.nonce.load(Ordering::SeqCst))
    }

    async fn send_transaction(
        &self,
        to: Address,
        calldata: Bytes,
        nonce: u64,
    ) -> Result<B256, ChainError> {
        self.record_call("send_transaction");
        if self.executor.is_none() {
            return Err(ChainError::Signing("no executor key configured".to_string()));
        }
        let expected = self.nonce.load(Ordering::SeqCst);
        if nonce != expected {
            return Err(ChainError::InvalidRequest(format!(
                "nonce too low: expected {expected}, got {nonce}"
            )));
        }
        self.nonce.fetch_add(1, Ordering::SeqCst);

        let hash = B256::from(U256::from(nonce + 1));
        let (kind, legs) = self.decode_legs(to, &calldata).unwrap_or(("unknown", Vec::new()));

        let never_confirms = {
            let timeouts = self.timeout_recipients.lock().unwrap();
            legs.iter().any(|l| timeouts.contains(&l.to))
        };
        if !never_confirms {
            let run = self.dry_run(self.transfer_caller(kind, to), &legs);
            let status = if self.rejects_caller(kind, to) {
                ReceiptStatus::Reverted
            } else if kind == "batch" || run.all_succeeded() {
                // batch legs are individually guarded on-chain
                self.commit(run);
                ReceiptStatus::Success
            } else {
                ReceiptStatus::Reverted
            };
            self.receipts.lock().unwrap().insert(hash, status);
        }

        self.sent.lock().unwrap().push(SentTransaction {
            hash,
            to,
            calldata,
            nonce,
        });
        Ok(hash)
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<ReceiptStatus>, ChainError> {
        self.record_call("transaction_receipt");
        Ok(self.receipts.lock().unwrap().get(&hash).copied())
    }
}

// ---------------------------------------------------------------------------
// Oracle
// ---------------------------------------------------------------------------

/// In-memory social graph
pub struct MockOracle {
    users: Mutex<HashMap<Fid, UserData>>,
    following: Mutex<HashMap<Fid, Vec<Fid>>>,
    followers: Mutex<HashMap<Fid, Vec<Fid>>>,
    config: MockConfig,
    page_requests: AtomicU64,
    user_lookups: AtomicU64,
}

impl MockOracle {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            following: Mutex::new(HashMap::new()),
            followers: Mutex::new(HashMap::new()),
            config,
            page_requests: AtomicU64::new(0),
            user_lookups: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_config(MockConfig::failure(message))
    }

    /// Register a user with stats and an optional payout address
    pub fn add_user(
        &self,
        fid: Fid,
        follower_count: u64,
        reputation_score: f64,
        address: Option<Address>,
    ) {
        self.users.lock().unwrap().insert(
            fid,
            UserData {
                fid,
                follower_count,
                reputation_score,
                payout_address: address,
            },
        );
    }

    /// Record that `follower` follows `followee`
    pub fn add_follow(&self, follower: Fid, followee: Fid) {
        self.following
            .lock()
            .unwrap()
            .entry(follower)
            .or_default()
            .push(followee);
        self.followers
            .lock()
            .unwrap()
            .entry(followee)
            .or_default()
            .push(follower);
    }

    /// Number of list pages served so far
    pub fn page_requests(&self) -> u64 {
        self.page_requests.load(Ordering::SeqCst)
    }

    /// Number of per-user lookups (`get_user_data` and `resolve_address`)
    pub fn user_lookups(&self) -> u64 {
        self.user_lookups.load(Ordering::SeqCst)
    }

    fn check_should_fail(&self) -> Result<(), AppError> {
        if self.config.should_fail {
            return Err(AppError::ExternalService(ExternalServiceError::Network(
                self.config.message(),
            )));
        }
        Ok(())
    }

    fn page(&self, list: Vec<Fid>, limit: u32, cursor: Option<&str>) -> Page<Fid> {
        self.page_requests.fetch_add(1, Ordering::SeqCst);
        let start = cursor.and_then(|c| c.parse::<usize>().ok()).unwrap_or(0);
        let end = (start + limit as usize).min(list.len());
        let items = list.get(start..end).map(<[Fid]>::to_vec).unwrap_or_default();
        let next_cursor = (end < list.len()).then(|| end.to_string());
        Page { items, next_cursor }
    }
}

impl Default for MockOracle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SocialOracle for MockOracle {
    async fn get_user_data(&self, fid: Fid) -> Result<UserData, AppError> {
        self.user_lookups.fetch_add(1, Ordering::SeqCst);
        self.check_should_fail()?;
        Ok(self
            .users
            .lock()
            .unwrap()
            .get(&fid)
            .cloned()
            .unwrap_or(UserData {
                fid,
                follower_count: 0,
                reputation_score: 0.0,
                payout_address: None,
            }))
    }

    async fn get_following(
        &self,
        fid: Fid,
        limit: u32,
        cursor: Option<&str>,
    ) -> Result<Page<Fid>, AppError> {
        self.check_should_fail()?;
        let list = self
            .following
            .lock()
            .unwrap()
            .get(&fid)
            .cloned()
            .unwrap_or_default();
        Ok(self.page(list, limit, cursor))
    }

    async fn get_followers(
        &self,
        fid: Fid,
        limit: u32,
        cursor: Option<&str>,
    ) -> Result<Page<Fid>, AppError> {
        self.check_should_fail()?;
        let list = self
            .followers
            .lock()
            .unwrap()
            .get(&fid)
            .cloned()
            .unwrap_or_default();
        Ok(self.page(list, limit, cursor))
    }

    async fn resolve_address(&self, fid: Fid) -> Result<Option<Address>, AppError> {
        self.user_lookups.fetch_add(1, Ordering::SeqCst);
        self.check_should_fail()?;
        Ok(self
            .users
            .lock()
            .unwrap()
            .get(&fid)
            .and_then(|u| u.payout_address))
    }
}

// ---------------------------------------------------------------------------
// Event filter
// ---------------------------------------------------------------------------

/// Records filter updates
#[derive(Default)]
pub struct MockEventFilter {
    removed: Mutex<Vec<Fid>>,
    added: Mutex<Vec<Fid>>,
    config: MockConfig,
    down: AtomicBool,
}

impl MockEventFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            config: MockConfig::failure(message),
            down: AtomicBool::new(true),
            ..Self::default()
        }
    }

    /// Switch failures on or off after construction
    pub fn set_failing(&self, failing: bool) {
        self.down.store(failing, Ordering::SeqCst);
    }

    pub fn removed(&self) -> Vec<Fid> {
        self.removed.lock().unwrap().clone()
    }

    pub fn added(&self) -> Vec<Fid> {
        self.added.lock().unwrap().clone()
    }

    fn check_should_fail(&self) -> Result<(), AppError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(AppError::ExternalService(ExternalServiceError::ApiError {
                status_code: 500,
                message: self.config.message(),
            }));
        }
        Ok(())
    }
}

#[async_trait]
impl EventFilter for MockEventFilter {
    async fn remove_author(&self, fid: Fid) -> Result<(), AppError> {
        self.check_should_fail()?;
        self.removed.lock().unwrap().push(fid);
        Ok(())
    }

    async fn add_author(&self, fid: Fid) -> Result<(), AppError> {
        self.check_should_fail()?;
        self.added.lock().unwrap().push(fid);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Settlement sink
// ---------------------------------------------------------------------------

/// Collects confirmed tips in delivery order
#[derive(Default)]
pub struct MockSettlementSink {
    settled: Mutex<Vec<SettledTip>>,
    chain: Option<Arc<MockChainClient>>,
    sent_at_delivery: Mutex<Vec<usize>>,
}

impl MockSettlementSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Also note how many transactions the chain had seen at each delivery
    #[must_use]
    pub fn observing(chain: Arc<MockChainClient>) -> Self {
        Self {
            chain: Some(chain),
            ..Self::default()
        }
    }

    /// Tips received so far
    pub fn delivered(&self) -> Vec<SettledTip> {
        self.settled.lock().unwrap().clone()
    }

    pub fn sent_at_delivery(&self) -> Vec<usize> {
        self.sent_at_delivery.lock().unwrap().clone()
    }
}

#[async_trait]
impl SettlementSink for MockSettlementSink {
    async fn settled(&self, settled: &SettledTip) {
        if let Some(chain) = &self.chain {
            let sent = chain.sent_transactions().len();
            self.sent_at_delivery.lock().unwrap().push(sent);
        }
        self.settled.lock().unwrap().push(settled.clone());
    }
}

/// Shared handles to a full set of mocks
pub struct MockWorld {
    pub store: Arc<MockTipStore>,
    pub chain: Arc<MockChainClient>,
    pub oracle: Arc<MockOracle>,
    pub filter: Arc<MockEventFilter>,
}

impl MockWorld {
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: Arc::new(MockTipStore::new()),
            chain: Arc::new(MockChainClient::new()),
            oracle: Arc::new(MockOracle::new()),
            filter: Arc::new(MockEventFilter::new()),
        }
    }
}

impl Default for MockWorld {
    fn default() -> Self {
        Self::new()
    }
}
