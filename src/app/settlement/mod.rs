//! Settlement cascade.
//!
//! A batch is offered to an ordered list of strategies. `Unavailable` and
//! `Failed` move on to the next strategy with the same tips; the first strategy
//! that returns a report (fully or partially settled) ends the cascade;
//! `Fatal` aborts and the batch is dropped.
//!
//! Every confirmed transfer is handed to a [`SettlementSink`] as soon as its
//! receipt arrives, before the strategy moves on.

pub mod batch_contract;
pub mod multicall;
mod route;
pub mod sequential;

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, B256, Bytes};
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{
    ChainClient, ChainError, ChainErrorKind, PendingTip, ReceiptStatus, SettlementBatch,
};

pub use batch_contract::BatchContractStrategy;
pub use multicall::MulticallStrategy;
pub use route::TransferRoute;
pub use sequential::SequentialStrategy;

/// Why a strategy did not settle the batch
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StrategyError {
    /// Strategy is not configured; try the next one
    #[error("strategy unavailable: {0}")]
    Unavailable(String),

    /// Nothing was settled; try the next one
    #[error("strategy failed: {0}")]
    Failed(String),

    /// Abort the whole attempt
    #[error("fatal settlement error: {0}")]
    Fatal(String),
}

/// A tip paid on-chain
#[derive(Debug, Clone)]
pub struct SettledTip {
    pub tip: PendingTip,
    pub transaction_hash: B256,
}

/// A tip a strategy gave up on
#[derive(Debug, Clone)]
pub struct FailedTip {
    pub tip: PendingTip,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct SettlementReport {
    pub settled: Vec<SettledTip>,
    pub failed: Vec<FailedTip>,
}

impl SettlementReport {
    /// Every tip of the batch settled in one transaction
    #[must_use]
    pub fn all_settled(batch: &SettlementBatch, transaction_hash: B256) -> Self {
        Self {
            settled: batch
                .tips()
                .iter()
                .map(|tip| SettledTip {
                    tip: tip.clone(),
                    transaction_hash,
                })
                .collect(),
            failed: Vec::new(),
        }
    }

    /// Hand every settled tip to the sink
    pub async fn deliver(&self, sink: &dyn SettlementSink) {
        for settled in &self.settled {
            sink.settled(settled).await;
        }
    }
}

/// Receives each tip the moment its transfer is confirmed
#[async_trait]
pub trait SettlementSink: Send + Sync {
    async fn settled(&self, settled: &SettledTip);
}

#[async_trait]
pub trait SettlementStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Settle what it can. Tips in the returned report's `settled` list have
    /// already been passed to `sink`.
    async fn settle(
        &self,
        batch: &SettlementBatch,
        sink: &dyn SettlementSink,
    ) -> Result<SettlementReport, StrategyError>;
}

/// Settlement tuning
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// Executor-restricted batch contract. When set it is also the address
    /// authors approve; without it only direct transfers run.
    pub batch_contract: Option<Address>,
    pub receipt_poll_attempts: u32,
    pub receipt_poll_interval: Duration,
    /// Pause between two transfers of the same author in sequential mode
    pub sequential_delay: Duration,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            batch_contract: None,
            receipt_poll_attempts: 30,
            receipt_poll_interval: Duration::from_millis(2_000),
            sequential_delay: Duration::from_millis(1_000),
        }
    }
}

impl SettlementConfig {
    /// Load from environment variables, falling back to defaults.
    /// Addresses are parsed by the caller.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let millis = |key: &str, fallback: Duration| {
            std::env::var(key)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(fallback)
        };
        Self {
            receipt_poll_attempts: std::env::var("RECEIPT_POLL_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.receipt_poll_attempts),
            receipt_poll_interval: millis("RECEIPT_POLL_INTERVAL_MS", defaults.receipt_poll_interval),
            sequential_delay: millis("SEQUENTIAL_DELAY_MS", defaults.sequential_delay),
            ..defaults
        }
    }
}

/// Bounded receipt polling at a fixed interval
#[derive(Clone)]
pub struct ReceiptPoller {
    chain: Arc<dyn ChainClient>,
    attempts: u32,
    interval: Duration,
}

impl ReceiptPoller {
    #[must_use]
    pub fn new(chain: Arc<dyn ChainClient>, attempts: u32, interval: Duration) -> Self {
        Self {
            chain,
            attempts: attempts.max(1),
            interval,
        }
    }

    /// Wait for a receipt. Lookup errors count as "not mined yet".
    pub async fn wait(&self, hash: B256) -> Result<ReceiptStatus, ChainError> {
        for attempt in 1..=self.attempts {
            match self.chain.transaction_receipt(hash).await {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => debug!(tx_hash = %hash, attempt, "Receipt not available yet"),
                Err(e) => debug!(tx_hash = %hash, attempt, error = %e, "Receipt lookup failed"),
            }
            if attempt < self.attempts {
                tokio::time::sleep(self.interval).await;
            }
        }
        Err(ChainError::ConfirmationTimeout(format!("{hash:#x}")))
    }
}

/// Simulate, broadcast with a fresh nonce, and wait for one all-or-nothing
/// transaction. Shared by the single-transaction strategies.
pub(crate) async fn submit_and_confirm(
    chain: &dyn ChainClient,
    poller: &ReceiptPoller,
    to: Address,
    calldata: Bytes,
) -> Result<B256, StrategyError> {
    chain
        .simulate(to, calldata.clone())
        .await
        .map_err(|e| escalate("simulation", e))?;

    let nonce = chain
        .pending_nonce()
        .await
        .map_err(|e| escalate("nonce lookup", e))?;

    let hash = match chain.send_transaction(to, calldata, nonce).await {
        Ok(hash) => hash,
        Err(e @ ChainError::Signing(_)) => return Err(StrategyError::Fatal(e.to_string())),
        Err(e) if e.kind() == ChainErrorKind::Transient => {
            // the node may have accepted it
            return Err(StrategyError::Fatal(format!(
                "broadcast outcome unknown: {e}"
            )));
        }
        Err(e) => return Err(StrategyError::Failed(format!("broadcast rejected: {e}"))),
    };

    match poller.wait(hash).await {
        Ok(ReceiptStatus::Success) => Ok(hash),
        Ok(ReceiptStatus::Reverted) => Err(StrategyError::Failed(format!(
            "transaction {hash:#x} reverted"
        ))),
        Err(e) => {
            error!(tx_hash = %hash, "Broadcast transaction not confirmed");
            Err(StrategyError::Fatal(e.to_string()))
        }
    }
}

fn escalate(stage: &str, err: ChainError) -> StrategyError {
    match err {
        ChainError::Signing(_) => StrategyError::Fatal(err.to_string()),
        _ => StrategyError::Failed(format!("{stage}: {err}")),
    }
}

/// Final state of one cascade run
#[derive(Debug)]
pub enum CascadeOutcome {
    Settled {
        strategy: &'static str,
        report: SettlementReport,
    },
    /// Nothing settled; every tip of the batch is dropped
    Aborted { reason: String },
}

pub struct SettlementCascade {
    chain: Arc<dyn ChainClient>,
    route: TransferRoute,
    strategies: Vec<Box<dyn SettlementStrategy>>,
}

impl SettlementCascade {
    /// The standard order: batch contract, aggregated transfers, sequential
    /// transfers, all spending through the same route
    #[must_use]
    pub fn new(chain: Arc<dyn ChainClient>, config: &SettlementConfig) -> Self {
        let route = TransferRoute::resolve(config.batch_contract, chain.executor_address());
        let poller = ReceiptPoller::new(
            Arc::clone(&chain),
            config.receipt_poll_attempts,
            config.receipt_poll_interval,
        );
        let strategies: Vec<Box<dyn SettlementStrategy>> = vec![
            Box::new(BatchContractStrategy::new(
                Arc::clone(&chain),
                route,
                poller.clone(),
            )),
            Box::new(MulticallStrategy::new(Arc::clone(&chain), route, poller.clone())),
            Box::new(SequentialStrategy::new(
                Arc::clone(&chain),
                route,
                poller,
                config.sequential_delay,
            )),
        ];
        Self {
            chain,
            route,
            strategies,
        }
    }

    /// Custom strategy list spending directly from the executor
    #[must_use]
    pub fn with_strategies(
        chain: Arc<dyn ChainClient>,
        strategies: Vec<Box<dyn SettlementStrategy>>,
    ) -> Self {
        let route = TransferRoute::resolve(None, chain.executor_address());
        Self {
            chain,
            route,
            strategies,
        }
    }

    /// Where funds are pulled from; its spender is what authors must approve
    #[must_use]
    pub fn route(&self) -> TransferRoute {
        self.route
    }

    #[instrument(skip(self, batch, sink), fields(batch_id = %batch.id(), tips = batch.len()))]
    pub async fn settle(&self, batch: &SettlementBatch, sink: &dyn SettlementSink) -> CascadeOutcome {
        if self.chain.executor_address().is_none() {
            error!("No executor key configured, dropping batch");
            return CascadeOutcome::Aborted {
                reason: "no executor key configured".to_string(),
            };
        }

        for strategy in &self.strategies {
            debug!(strategy = strategy.name(), "Attempting settlement");
            match strategy.settle(batch, sink).await {
                Ok(report) => {
                    info!(
                        strategy = strategy.name(),
                        settled = report.settled.len(),
                        failed = report.failed.len(),
                        "Batch settled"
                    );
                    return CascadeOutcome::Settled {
                        strategy: strategy.name(),
                        report,
                    };
                }
                Err(StrategyError::Unavailable(reason)) => {
                    debug!(strategy = strategy.name(), reason = %reason, "Strategy unavailable");
                }
                Err(StrategyError::Failed(reason)) => {
                    warn!(strategy = strategy.name(), reason = %reason, "Strategy failed, escalating");
                }
                Err(StrategyError::Fatal(reason)) => {
                    error!(strategy = strategy.name(), reason = %reason, "Settlement aborted");
                    return CascadeOutcome::Aborted { reason };
                }
            }
        }

        CascadeOutcome::Aborted {
            reason: "every settlement strategy failed".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DedupKey, InteractionType};
    use crate::test_utils::{MockChainClient, MockSettlementSink};
    use std::sync::Mutex;

    struct Scripted {
        name: &'static str,
        result: Result<(), StrategyError>,
        seen: Arc<Mutex<Vec<(&'static str, usize)>>>,
    }

    #[async_trait]
    impl SettlementStrategy for Scripted {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn settle(
            &self,
            batch: &SettlementBatch,
            sink: &dyn SettlementSink,
        ) -> Result<SettlementReport, StrategyError> {
            self.seen.lock().unwrap().push((self.name, batch.len()));
            self.result.clone()?;
            let report = SettlementReport::all_settled(batch, B256::ZERO);
            report.deliver(sink).await;
            Ok(report)
        }
    }

    fn cascade(
        chain: Arc<MockChainClient>,
        results: Vec<(&'static str, Result<(), StrategyError>)>,
    ) -> (SettlementCascade, Arc<Mutex<Vec<(&'static str, usize)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let strategies = results
            .into_iter()
            .map(|(name, result)| {
                Box::new(Scripted {
                    name,
                    result,
                    seen: Arc::clone(&seen),
                }) as Box<dyn SettlementStrategy>
            })
            .collect();
        (SettlementCascade::with_strategies(chain, strategies), seen)
    }

    fn batch() -> SettlementBatch {
        SettlementBatch::new(vec![PendingTip {
            author_fid: 1,
            interactor_fid: 2,
            author_address: Address::repeat_byte(0xa1),
            interactor_address: Address::repeat_byte(0xf1),
            token_address: Address::repeat_byte(0x0c),
            amount: "0.1".to_string(),
            amount_units: alloy::primitives::U256::from(100_000u64),
            token_decimals: 6,
            cast_reference: Some("0xc".to_string()),
            action_type: InteractionType::Like,
            dedup_key: DedupKey::compute(1, 2, Some("0xc"), InteractionType::Like),
            enqueued_at: chrono::Utc::now(),
        }])
    }

    #[tokio::test]
    async fn test_escalates_until_a_strategy_reports() {
        let (cascade, seen) = cascade(
            Arc::new(MockChainClient::new()),
            vec![
                ("first", Err(StrategyError::Unavailable("none".into()))),
                ("second", Err(StrategyError::Failed("revert".into()))),
                ("third", Ok(())),
                ("fourth", Ok(())),
            ],
        );
        let sink = MockSettlementSink::new();
        let outcome = cascade.settle(&batch(), &sink).await;

        assert!(matches!(outcome, CascadeOutcome::Settled { strategy: "third", .. }));
        let names: Vec<_> = seen.lock().unwrap().iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["first", "second", "third"]);
        assert_eq!(sink.delivered().len(), 1);
    }

    #[tokio::test]
    async fn test_fatal_stops_cascade() {
        let (cascade, seen) = cascade(
            Arc::new(MockChainClient::new()),
            vec![
                ("first", Err(StrategyError::Fatal("unconfirmed".into()))),
                ("second", Ok(())),
            ],
        );
        let sink = MockSettlementSink::new();
        let outcome = cascade.settle(&batch(), &sink).await;

        assert!(matches!(outcome, CascadeOutcome::Aborted { ref reason } if reason == "unconfirmed"));
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert!(sink.delivered().is_empty());
    }

    #[tokio::test]
    async fn test_missing_executor_aborts_before_any_strategy() {
        let (cascade, seen) = cascade(
            Arc::new(MockChainClient::without_signer()),
            vec![("first", Ok(()))],
        );
        assert!(matches!(
            cascade.settle(&batch(), &MockSettlementSink::new()).await,
            CascadeOutcome::Aborted { .. }
        ));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_configured_contract_becomes_the_route() {
        let chain: Arc<dyn ChainClient> = Arc::new(MockChainClient::new());
        let contract = Address::repeat_byte(0xbc);

        let cascade = SettlementCascade::new(
            Arc::clone(&chain),
            &SettlementConfig {
                batch_contract: Some(contract),
                ..Default::default()
            },
        );
        assert_eq!(cascade.route(), TransferRoute::Contract(contract));

        let cascade = SettlementCascade::new(chain, &SettlementConfig::default());
        assert_eq!(
            cascade.route(),
            TransferRoute::Executor(MockChainClient::EXECUTOR)
        );
    }

    #[tokio::test]
    async fn test_receipt_poller_times_out() {
        let chain = Arc::new(MockChainClient::new());
        let poller = ReceiptPoller::new(chain.clone(), 3, Duration::from_millis(1));
        let err = poller.wait(B256::repeat_byte(0x42)).await.unwrap_err();

        assert!(matches!(err, ChainError::ConfirmationTimeout(_)));
        assert_eq!(chain.call_count("transaction_receipt"), 3);
    }
}
