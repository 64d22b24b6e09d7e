//! Strategy 1: one call to the custom batch-payment contract.
//!
//! The contract try/catches each leg internally, so a single bad leg does not
//! revert the call. A mined transaction settles the whole batch.
//! Only available when the transfer route runs through the contract.

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use tracing::info;

use super::{
    ReceiptPoller, SettlementReport, SettlementSink, SettlementStrategy, StrategyError,
    TransferRoute, submit_and_confirm,
};
use crate::domain::{ChainClient, SettlementBatch};
use crate::infra::blockchain::contracts::ITipBatcher;

pub struct BatchContractStrategy {
    chain: Arc<dyn ChainClient>,
    route: TransferRoute,
    poller: ReceiptPoller,
}

impl BatchContractStrategy {
    #[must_use]
    pub fn new(chain: Arc<dyn ChainClient>, route: TransferRoute, poller: ReceiptPoller) -> Self {
        Self {
            chain,
            route,
            poller,
        }
    }

    async fn executor_authorized(
        &self,
        contract: Address,
        executor: Address,
    ) -> Result<bool, StrategyError> {
        let raw = self
            .chain
            .simulate(
                contract,
                ITipBatcher::isExecutorCall { account: executor }
                    .abi_encode()
                    .into(),
            )
            .await
            .map_err(|e| StrategyError::Failed(format!("isExecutor check: {e}")))?;
        let decoded = ITipBatcher::isExecutorCall::abi_decode_returns(&raw, true)
            .map_err(|e| StrategyError::Failed(format!("isExecutor decode: {e}")))?;
        Ok(decoded._0)
    }
}

/// `batchTip(froms, tos, tokens, amounts)` for the whole batch
pub fn encode_batch_tip(batch: &SettlementBatch) -> Vec<u8> {
    let tips = batch.tips();
    ITipBatcher::batchTipCall {
        froms: tips.iter().map(|t| t.author_address).collect(),
        tos: tips.iter().map(|t| t.interactor_address).collect(),
        tokens: tips.iter().map(|t| t.token_address).collect(),
        amounts: tips.iter().map(|t| t.amount_units).collect::<Vec<U256>>(),
    }
    .abi_encode()
}

#[async_trait]
impl SettlementStrategy for BatchContractStrategy {
    fn name(&self) -> &'static str {
        "batch_contract"
    }

    async fn settle(
        &self,
        batch: &SettlementBatch,
        sink: &dyn SettlementSink,
    ) -> Result<SettlementReport, StrategyError> {
        let Some(contract) = self.route.contract() else {
            return Err(StrategyError::Unavailable(
                "no batch contract configured".to_string(),
            ));
        };
        let executor = self
            .chain
            .executor_address()
            .ok_or_else(|| StrategyError::Fatal("no executor key configured".to_string()))?;

        if !self.executor_authorized(contract, executor).await? {
            return Err(StrategyError::Failed("executor not authorized".to_string()));
        }

        let hash = submit_and_confirm(
            self.chain.as_ref(),
            &self.poller,
            contract,
            encode_batch_tip(batch).into(),
        )
        .await?;

        info!(tx_hash = %hash, tips = batch.len(), "Batch contract call confirmed");
        let report = SettlementReport::all_settled(batch, hash);
        report.deliver(sink).await;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DedupKey, InteractionType, PendingTip};
    use crate::test_utils::{MockChainClient, MockSettlementSink};
    use chrono::Utc;
    use std::time::Duration;

    const TOKEN: Address = Address::repeat_byte(0x0c);
    const CONTRACT: Address = Address::repeat_byte(0xbc);

    fn batch(chain: &MockChainClient) -> SettlementBatch {
        let tips = (1u8..=3)
            .map(|i| {
                let author = Address::repeat_byte(0xa0 + i);
                chain.fund(
                    TOKEN,
                    author,
                    CONTRACT,
                    U256::from(1_000_000u64),
                    U256::from(1_000_000u64),
                );
                PendingTip {
                    author_fid: i.into(),
                    interactor_fid: 100 + u64::from(i),
                    author_address: author,
                    interactor_address: Address::repeat_byte(0xf0 + i),
                    token_address: TOKEN,
                    amount: "0.1".to_string(),
                    amount_units: U256::from(100_000u64),
                    token_decimals: 6,
                    cast_reference: Some(format!("0xc{i}")),
                    action_type: InteractionType::Like,
                    dedup_key: DedupKey::compute(i.into(), 100 + u64::from(i), Some("0xc"), InteractionType::Like),
                    enqueued_at: Utc::now(),
                }
            })
            .collect();
        SettlementBatch::new(tips)
    }

    fn strategy(chain: Arc<MockChainClient>, route: TransferRoute) -> BatchContractStrategy {
        let poller = ReceiptPoller::new(chain.clone(), 3, Duration::from_millis(1));
        BatchContractStrategy::new(chain, route, poller)
    }

    fn via_contract(chain: &Arc<MockChainClient>) -> BatchContractStrategy {
        strategy(chain.clone(), TransferRoute::Contract(CONTRACT))
    }

    #[tokio::test]
    async fn test_settles_whole_batch_with_one_hash() {
        let chain = Arc::new(MockChainClient::new());
        let batch = batch(&chain);
        let sink = MockSettlementSink::new();
        let report = via_contract(&chain).settle(&batch, &sink).await.unwrap();

        assert_eq!(report.settled.len(), 3);
        assert!(report.failed.is_empty());
        let sent = chain.sent_transactions();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, CONTRACT);
        assert!(report.settled.iter().all(|s| s.transaction_hash == sent[0].hash));
        assert_eq!(sink.delivered().len(), 3);
        assert_eq!(
            chain.balance_of_account(TOKEN, Address::repeat_byte(0xf1)),
            U256::from(100_000u64)
        );
    }

    #[tokio::test]
    async fn test_unavailable_when_executor_is_the_spender() {
        let chain = Arc::new(MockChainClient::new());
        let batch = batch(&chain);
        let err = strategy(chain.clone(), TransferRoute::Executor(MockChainClient::EXECUTOR))
            .settle(&batch, &MockSettlementSink::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StrategyError::Unavailable(_)));
        assert_eq!(chain.call_count("simulate"), 0);
    }

    #[tokio::test]
    async fn test_unauthorized_executor_escalates() {
        let chain = Arc::new(MockChainClient::new());
        chain.set_executor_authorized(false);
        let batch = batch(&chain);
        let err = via_contract(&chain)
            .settle(&batch, &MockSettlementSink::new())
            .await
            .unwrap_err();

        assert_eq!(err, StrategyError::Failed("executor not authorized".to_string()));
        assert!(chain.sent_transactions().is_empty());
    }

    #[tokio::test]
    async fn test_simulation_revert_escalates_without_broadcast() {
        let chain = Arc::new(MockChainClient::new());
        chain.fail_batch_contract(true);
        let batch = batch(&chain);
        let sink = MockSettlementSink::new();
        let err = via_contract(&chain).settle(&batch, &sink).await.unwrap_err();

        assert!(matches!(err, StrategyError::Failed(_)));
        assert!(chain.sent_transactions().is_empty());
        assert!(sink.delivered().is_empty());
    }

    #[test]
    fn test_encode_batch_tip_keeps_parallel_order() {
        let chain = MockChainClient::new();
        let batch = batch(&chain);
        let decoded = ITipBatcher::batchTipCall::abi_decode(&encode_batch_tip(&batch), true).unwrap();

        assert_eq!(decoded.froms.len(), 3);
        for (i, tip) in batch.tips().iter().enumerate() {
            assert_eq!(decoded.froms[i], tip.author_address);
            assert_eq!(decoded.tos[i], tip.interactor_address);
            assert_eq!(decoded.tokens[i], tip.token_address);
            assert_eq!(decoded.amounts[i], tip.amount_units);
        }
    }
}
