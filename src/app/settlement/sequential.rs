//! Strategy 3: one `transferFrom` per tip, grouped by author.
//!
//! The only strategy with partial success. Every transfer is simulated,
//! broadcast with a freshly fetched nonce and confirmed before the next one.
//! With a batch contract each transfer is a single-leg `aggregate3` through
//! it; otherwise the executor calls the token's `transferFrom` itself.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, B256, Bytes};
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::multicall::encode_aggregate;
use super::{
    FailedTip, ReceiptPoller, SettledTip, SettlementReport, SettlementSink, SettlementStrategy,
    StrategyError, TransferRoute,
};
use crate::domain::{ChainClient, ChainError, PendingTip, ReceiptStatus, SettlementBatch};
use crate::infra::blockchain::contracts::IERC20;

pub struct SequentialStrategy {
    chain: Arc<dyn ChainClient>,
    route: TransferRoute,
    poller: ReceiptPoller,
    /// Pause between transfers of the same author
    delay: Duration,
}

impl SequentialStrategy {
    #[must_use]
    pub fn new(
        chain: Arc<dyn ChainClient>,
        route: TransferRoute,
        poller: ReceiptPoller,
        delay: Duration,
    ) -> Self {
        Self {
            chain,
            route,
            poller,
            delay,
        }
    }

    /// Target and calldata moving one tip along the route
    fn transfer_call(&self, tip: &PendingTip) -> (Address, Bytes) {
        match self.route {
            TransferRoute::Contract(contract) => {
                (contract, encode_aggregate(std::slice::from_ref(tip)).into())
            }
            TransferRoute::Executor(_) => (
                tip.token_address,
                IERC20::transferFromCall {
                    from: tip.author_address,
                    to: tip.interactor_address,
                    amount: tip.amount_units,
                }
                .abi_encode()
                .into(),
            ),
        }
    }

    async fn transfer(&self, tip: &PendingTip) -> Result<B256, ChainError> {
        let (to, calldata) = self.transfer_call(tip);

        self.chain.simulate(to, calldata.clone()).await?;
        let nonce = self.chain.pending_nonce().await?;
        let hash = self.chain.send_transaction(to, calldata, nonce).await?;
        debug!(tx_hash = %hash, nonce, "Transfer broadcast");

        match self.poller.wait(hash).await? {
            ReceiptStatus::Success => Ok(hash),
            ReceiptStatus::Reverted => Err(ChainError::Reverted(format!(
                "transaction {hash:#x} reverted"
            ))),
        }
    }
}

/// Tips grouped by paying author, in first-seen order
fn group_by_author(tips: &[PendingTip]) -> Vec<(Address, Vec<&PendingTip>)> {
    let mut groups: Vec<(Address, Vec<&PendingTip>)> = Vec::new();
    for tip in tips {
        match groups.iter_mut().find(|(author, _)| *author == tip.author_address) {
            Some((_, group)) => group.push(tip),
            None => groups.push((tip.author_address, vec![tip])),
        }
    }
    groups
}

#[async_trait]
impl SettlementStrategy for SequentialStrategy {
    fn name(&self) -> &'static str {
        "sequential"
    }

    async fn settle(
        &self,
        batch: &SettlementBatch,
        sink: &dyn SettlementSink,
    ) -> Result<SettlementReport, StrategyError> {
        if self.chain.executor_address().is_none() {
            return Err(StrategyError::Fatal(
                "no executor key configured".to_string(),
            ));
        }

        let mut report = SettlementReport::default();
        for (author, tips) in group_by_author(batch.tips()) {
            for (index, tip) in tips.into_iter().enumerate() {
                if index > 0 && !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                match self.transfer(tip).await {
                    Ok(transaction_hash) => {
                        info!(author = %author, to = %tip.interactor_address, tx_hash = %transaction_hash, "Transfer confirmed");
                        let settled = SettledTip {
                            tip: tip.clone(),
                            transaction_hash,
                        };
                        sink.settled(&settled).await;
                        report.settled.push(settled);
                    }
                    Err(e @ ChainError::Signing(_)) => {
                        return Err(StrategyError::Fatal(e.to_string()));
                    }
                    Err(e) => {
                        warn!(
                            author = %author,
                            to = %tip.interactor_address,
                            key = %tip.dedup_key,
                            error = %e,
                            "Transfer failed, tip dropped"
                        );
                        report.failed.push(FailedTip {
                            tip: tip.clone(),
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DedupKey, InteractionType};
    use crate::infra::blockchain::contracts::IMulticall3;
    use crate::test_utils::{MockChainClient, MockSettlementSink};
    use alloy::primitives::U256;
    use chrono::Utc;

    const TOKEN: Address = Address::repeat_byte(0x0c);
    const CONTRACT: Address = Address::repeat_byte(0xbc);

    fn tip(author: u8, interactor: u8) -> PendingTip {
        PendingTip {
            author_fid: author.into(),
            interactor_fid: interactor.into(),
            author_address: Address::repeat_byte(author),
            interactor_address: Address::repeat_byte(interactor),
            token_address: TOKEN,
            amount: "0.1".to_string(),
            amount_units: U256::from(100_000u64),
            token_decimals: 6,
            cast_reference: None,
            action_type: InteractionType::Follow,
            dedup_key: DedupKey::compute(author.into(), interactor.into(), None, InteractionType::Follow),
            enqueued_at: Utc::now(),
        }
    }

    #[test]
    fn test_group_by_author_keeps_first_seen_order() {
        let tips = vec![tip(1, 10), tip(2, 11), tip(1, 12), tip(3, 13), tip(2, 14)];
        let groups = group_by_author(&tips);

        let shape: Vec<(Address, Vec<u64>)> = groups
            .into_iter()
            .map(|(a, g)| (a, g.iter().map(|t| t.interactor_fid).collect()))
            .collect();
        assert_eq!(
            shape,
            vec![
                (Address::repeat_byte(1), vec![10, 12]),
                (Address::repeat_byte(2), vec![11, 14]),
                (Address::repeat_byte(3), vec![13]),
            ]
        );
    }

    fn strategy(chain: &Arc<MockChainClient>, route: TransferRoute) -> SequentialStrategy {
        let poller = ReceiptPoller::new(chain.clone(), 3, Duration::from_millis(1));
        SequentialStrategy::new(chain.clone(), route, poller, Duration::ZERO)
    }

    fn fund(chain: &MockChainClient, author: u8, spender: Address) {
        chain.fund(
            TOKEN,
            Address::repeat_byte(author),
            spender,
            U256::from(1_000_000u64),
            U256::from(1_000_000u64),
        );
    }

    #[tokio::test]
    async fn test_executor_route_calls_token_directly() {
        let chain = Arc::new(MockChainClient::new());
        fund(&chain, 1, MockChainClient::EXECUTOR);
        let batch = SettlementBatch::new(vec![tip(1, 10), tip(1, 11)]);

        let report = strategy(&chain, TransferRoute::Executor(MockChainClient::EXECUTOR))
            .settle(&batch, &MockSettlementSink::new())
            .await
            .unwrap();

        assert_eq!(report.settled.len(), 2);
        let sent = chain.sent_transactions();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|tx| tx.to == TOKEN));
        assert_eq!(sent[0].nonce + 1, sent[1].nonce);
    }

    #[tokio::test]
    async fn test_contract_route_sends_single_leg_aggregates() {
        let chain = Arc::new(MockChainClient::new());
        fund(&chain, 1, CONTRACT);
        let batch = SettlementBatch::new(vec![tip(1, 10), tip(1, 11)]);

        let report = strategy(&chain, TransferRoute::Contract(CONTRACT))
            .settle(&batch, &MockSettlementSink::new())
            .await
            .unwrap();

        assert_eq!(report.settled.len(), 2);
        for tx in chain.sent_transactions() {
            assert_eq!(tx.to, CONTRACT);
            let call = IMulticall3::aggregate3Call::abi_decode(&tx.calldata, true).unwrap();
            assert_eq!(call.calls.len(), 1);
        }
        assert_eq!(
            chain.balance_of_account(TOKEN, Address::repeat_byte(10)),
            U256::from(100_000u64)
        );
    }

    #[tokio::test]
    async fn test_each_confirmed_transfer_reaches_sink_before_the_next_send() {
        let chain = Arc::new(MockChainClient::new());
        fund(&chain, 1, MockChainClient::EXECUTOR);
        fund(&chain, 2, MockChainClient::EXECUTOR);
        let batch = SettlementBatch::new(vec![tip(1, 10), tip(2, 11), tip(1, 12)]);
        let sink = MockSettlementSink::observing(chain.clone());

        strategy(&chain, TransferRoute::Executor(MockChainClient::EXECUTOR))
            .settle(&batch, &sink)
            .await
            .unwrap();

        assert_eq!(sink.sent_at_delivery(), vec![1, 2, 3]);
        let delivered: Vec<u64> = sink
            .delivered()
            .iter()
            .map(|s| s.tip.interactor_fid)
            .collect();
        assert_eq!(delivered, vec![10, 12, 11]);
    }

    #[tokio::test]
    async fn test_failed_transfer_is_reported_not_delivered() {
        let chain = Arc::new(MockChainClient::new());
        fund(&chain, 1, MockChainClient::EXECUTOR);
        chain.revert_transfers_to(Address::repeat_byte(11));
        let batch = SettlementBatch::new(vec![tip(1, 10), tip(1, 11)]);
        let sink = MockSettlementSink::new();

        let report = strategy(&chain, TransferRoute::Executor(MockChainClient::EXECUTOR))
            .settle(&batch, &sink)
            .await
            .unwrap();

        assert_eq!(report.settled.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].tip.interactor_fid, 11);
        assert_eq!(sink.delivered().len(), 1);
    }
}
