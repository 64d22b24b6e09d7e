//! Application state management.

use std::sync::Arc;

use alloy::primitives::Address;
use tracing::{info, warn};

use crate::domain::{AppError, ChainClient, EventFilter, SocialOracle, TipStore};
use crate::infra::BlocklistManager;

use super::batch::{BatchAccumulator, BatchConfig};
use super::blocklist_sync::{BlocklistSyncConfig, BlocklistSynchronizer};
use super::service::AppService;
use super::settlement::{SettlementCascade, SettlementConfig};
use super::tokens::TokenDecimals;
use super::validator::{EligibilityValidator, ValidatorConfig};

/// Tuning for every pipeline component
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub batch: BatchConfig,
    pub blocklist: BlocklistSyncConfig,
    pub validator: ValidatorConfig,
    pub settlement: SettlementConfig,
}

impl PipelineConfig {
    /// Load from environment variables, falling back to defaults.
    /// Settlement contract addresses are set by the caller.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            batch: BatchConfig::from_env(),
            blocklist: BlocklistSyncConfig::from_env(),
            validator: ValidatorConfig::from_env(),
            settlement: SettlementConfig::from_env(),
        }
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<AppService>,
    pub store: Arc<dyn TipStore>,
    pub chain: Arc<dyn ChainClient>,
}

impl AppState {
    /// Wire the pipeline over its collaborators.
    ///
    /// Loads the persisted blocklist, so the store must be reachable.
    pub async fn build(
        store: Arc<dyn TipStore>,
        chain: Arc<dyn ChainClient>,
        oracle: Arc<dyn SocialOracle>,
        filter: Arc<dyn EventFilter>,
        config: PipelineConfig,
    ) -> Result<Self, AppError> {
        let blocklist = Arc::new(BlocklistManager::load(Arc::clone(&store)).await?);
        let tokens = Arc::new(TokenDecimals::new(Arc::clone(&chain)));

        let cascade = SettlementCascade::new(Arc::clone(&chain), &config.settlement);
        let spender = cascade.route().spender();
        if spender == Address::ZERO {
            warn!("No batch contract or signer configured, no author approval can be honored");
        } else {
            info!(route = %cascade.route(), "Authors approve the transfer route");
        }

        let blocklist_sync = Arc::new(BlocklistSynchronizer::new(
            Arc::clone(&store),
            Arc::clone(&chain),
            spender,
            filter,
            blocklist,
            Arc::clone(&tokens),
            config.blocklist,
        ));
        let validator = EligibilityValidator::new(
            Arc::clone(&store),
            oracle,
            Arc::clone(&chain),
            spender,
            tokens,
            Arc::clone(&blocklist_sync),
            config.validator,
        );
        let accumulator = Arc::new(BatchAccumulator::new(Arc::clone(&store), config.batch));

        let service = Arc::new(AppService::new(
            Arc::clone(&store),
            Arc::clone(&chain),
            validator,
            accumulator,
            cascade,
            blocklist_sync,
        ));

        Ok(Self {
            service,
            store,
            chain,
        })
    }
}
