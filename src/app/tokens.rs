//! Process-lifetime cache of ERC-20 decimals.

use std::sync::Arc;

use alloy::primitives::Address;
use dashmap::DashMap;
use tracing::debug;

use crate::domain::{ChainClient, ChainError};

/// Reads `decimals()` once per token and keeps the answer
pub struct TokenDecimals {
    chain: Arc<dyn ChainClient>,
    cache: DashMap<Address, u8>,
}

impl TokenDecimals {
    #[must_use]
    pub fn new(chain: Arc<dyn ChainClient>) -> Self {
        Self {
            chain,
            cache: DashMap::new(),
        }
    }

    pub async fn decimals(&self, token: Address) -> Result<u8, ChainError> {
        if let Some(decimals) = self.cache.get(&token) {
            return Ok(*decimals);
        }
        let decimals = self.chain.decimals(token).await?;
        debug!(token = %token, decimals, "Cached token decimals");
        self.cache.insert(token, decimals);
        Ok(decimals)
    }
}
