//! Strategy 2: every `transferFrom` aggregated into one `aggregate3` call.
//!
//! `allowFailure` is off for every leg, so one failing transfer reverts them
//! all. The call goes to the batch contract's executor-only `aggregate3`, so
//! each `transferFrom` runs with the contract as `msg.sender` and spends the
//! approvals authors granted it. A public aggregator would be the caller of
//! every leg and hold no approvals, so without a batch contract this strategy
//! is unavailable.

use std::sync::Arc;

use alloy::sol_types::SolCall;
use async_trait::async_trait;
use tracing::info;

use super::{
    ReceiptPoller, SettlementReport, SettlementSink, SettlementStrategy, StrategyError,
    TransferRoute, submit_and_confirm,
};
use crate::domain::{ChainClient, PendingTip, SettlementBatch};
use crate::infra::blockchain::contracts::{IERC20, IMulticall3};

pub struct MulticallStrategy {
    chain: Arc<dyn ChainClient>,
    route: TransferRoute,
    poller: ReceiptPoller,
}

impl MulticallStrategy {
    #[must_use]
    pub fn new(chain: Arc<dyn ChainClient>, route: TransferRoute, poller: ReceiptPoller) -> Self {
        Self {
            chain,
            route,
            poller,
        }
    }
}

/// Strict `transferFrom` leg for one tip
pub(crate) fn transfer_leg(tip: &PendingTip) -> IMulticall3::Call3 {
    IMulticall3::Call3 {
        target: tip.token_address,
        allowFailure: false,
        callData: IERC20::transferFromCall {
            from: tip.author_address,
            to: tip.interactor_address,
            amount: tip.amount_units,
        }
        .abi_encode()
        .into(),
    }
}

/// `aggregate3` with one strict `transferFrom` per tip
pub fn encode_aggregate(tips: &[PendingTip]) -> Vec<u8> {
    let calls = tips.iter().map(transfer_leg).collect();
    IMulticall3::aggregate3Call { calls }.abi_encode()
}

#[async_trait]
impl SettlementStrategy for MulticallStrategy {
    fn name(&self) -> &'static str {
        "multicall"
    }

    async fn settle(
        &self,
        batch: &SettlementBatch,
        sink: &dyn SettlementSink,
    ) -> Result<SettlementReport, StrategyError> {
        let Some(aggregator) = self.route.contract() else {
            return Err(StrategyError::Unavailable(
                "no executor-restricted aggregator configured".to_string(),
            ));
        };

        let hash = submit_and_confirm(
            self.chain.as_ref(),
            &self.poller,
            aggregator,
            encode_aggregate(batch.tips()).into(),
        )
        .await?;

        info!(tx_hash = %hash, tips = batch.len(), "Aggregated transfers confirmed");
        let report = SettlementReport::all_settled(batch, hash);
        report.deliver(sink).await;
        Ok(report)
    }
}
