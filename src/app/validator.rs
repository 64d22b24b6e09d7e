//! Eligibility validator: decides whether an interaction earns a tip and how much.
//!
//! Gates run in a fixed order and the first failing gate decides the reason.
//! Cheap checks (config, oracle, store) come before any per-tip chain read.

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use tracing::{debug, instrument};

use super::blocklist_sync::BlocklistSynchronizer;
use super::tokens::TokenDecimals;
use crate::domain::amount::{self, MAX_TOKEN_DECIMALS};
use crate::domain::{
    AppError, AudiencePolicy, AuthorConfig, ChainClient, EligibleTip, Eligibility, Fid,
    IneligibleReason, InteractionEvent, SocialOracle, TipStore,
};

/// Validator tuning
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Entries requested per audience page
    pub audience_page_size: u32,
    /// Pages inspected before an audience check gives up
    pub audience_lookahead_pages: u32,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            audience_page_size: 100,
            audience_lookahead_pages: 1,
        }
    }
}

impl ValidatorConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            audience_page_size: defaults.audience_page_size,
            audience_lookahead_pages: std::env::var("AUDIENCE_LOOKAHEAD_PAGES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .filter(|pages| *pages > 0)
                .unwrap_or(defaults.audience_lookahead_pages),
        }
    }
}

pub struct EligibilityValidator {
    store: Arc<dyn TipStore>,
    oracle: Arc<dyn SocialOracle>,
    chain: Arc<dyn ChainClient>,
    /// Account that will call `transferFrom` at settlement
    spender: Address,
    tokens: Arc<TokenDecimals>,
    blocklist: Arc<BlocklistSynchronizer>,
    config: ValidatorConfig,
}

impl EligibilityValidator {
    #[must_use]
    pub fn new(
        store: Arc<dyn TipStore>,
        oracle: Arc<dyn SocialOracle>,
        chain: Arc<dyn ChainClient>,
        spender: Address,
        tokens: Arc<TokenDecimals>,
        blocklist: Arc<BlocklistSynchronizer>,
        config: ValidatorConfig,
    ) -> Self {
        Self {
            store,
            oracle,
            chain,
            spender,
            tokens,
            blocklist,
            config,
        }
    }

    /// Decide whether `event` earns a tip under `author`'s configuration.
    ///
    /// Errors are collaborator faults (oracle, store, chain). Ineligibility is
    /// always `Ok(Eligibility::Ineligible(_))`.
    #[instrument(
        skip(self, event, author),
        fields(
            action = %event.interaction_type,
            author = event.author_fid,
            interactor = event.interactor_fid
        )
    )]
    pub async fn validate(
        &self,
        event: &InteractionEvent,
        author: Option<&AuthorConfig>,
    ) -> Result<Eligibility, AppError> {
        let Some(author) = author else {
            return Ok(Eligibility::Ineligible(IneligibleReason::AuthorNotConfigured));
        };
        if !author.is_active {
            return Ok(Eligibility::Ineligible(IneligibleReason::AuthorInactive));
        }

        let setting = author.action(event.interaction_type);
        if !setting.enabled {
            return Ok(Eligibility::Ineligible(IneligibleReason::ActionDisabled));
        }

        let user = self.oracle.get_user_data(event.interactor_fid).await?;
        if user.follower_count < author.min_follower_count {
            return Ok(Eligibility::Ineligible(IneligibleReason::InsufficientFollowers));
        }
        if user.reputation_score < author.min_reputation_score {
            return Ok(Eligibility::Ineligible(IneligibleReason::InsufficientReputation));
        }

        if !self
            .audience_matches(author.audience, author.fid, event.interactor_fid)
            .await?
        {
            return Ok(Eligibility::Ineligible(IneligibleReason::AudienceMismatch));
        }

        let Some(amount) = setting
            .amount
            .as_deref()
            .and_then(positive_amount)
        else {
            return Ok(Eligibility::Ineligible(IneligibleReason::NoAmount));
        };

        if self
            .store
            .has_user_been_tipped_for_cast(&event.dedup_key())
            .await?
        {
            return Ok(Eligibility::Ineligible(IneligibleReason::AlreadyTipped));
        }

        if !within_limit(&author.total_spent, &amount, &author.spending_limit)? {
            return Ok(Eligibility::Ineligible(IneligibleReason::SpendingLimitReached));
        }

        if self.blocklist.should_block(&author.address) {
            return Ok(Eligibility::Ineligible(IneligibleReason::AuthorBlocklisted));
        }

        let Some(interactor_address) = user.payout_address else {
            return Ok(Eligibility::Ineligible(IneligibleReason::InteractorUnresolved));
        };

        let token_decimals = self.tokens.decimals(author.token_address).await?;
        let Ok(amount_units) = amount::to_units(&amount, token_decimals) else {
            debug!(amount = %amount, token_decimals, "Amount finer than token precision");
            return Ok(Eligibility::Ineligible(IneligibleReason::NoAmount));
        };

        let (allowance, balance) = self
            .chain
            .allowance_and_balance(author.token_address, author.address, self.spender)
            .await?;
        if allowance < amount_units {
            return Ok(Eligibility::Ineligible(IneligibleReason::InsufficientAllowance));
        }
        if balance < amount_units {
            return Ok(Eligibility::Ineligible(IneligibleReason::InsufficientBalance));
        }

        Ok(Eligibility::Eligible(EligibleTip {
            amount,
            amount_units,
            token_decimals,
            interactor_address,
        }))
    }

    /// Bounded audience lookup. Only the first `audience_lookahead_pages` pages
    /// are inspected, so large audiences can be under-approved.
    async fn audience_matches(
        &self,
        policy: AudiencePolicy,
        author: Fid,
        interactor: Fid,
    ) -> Result<bool, AppError> {
        if policy == AudiencePolicy::Anyone {
            return Ok(true);
        }

        let mut cursor: Option<String> = None;
        for _ in 0..self.config.audience_lookahead_pages {
            let page = match policy {
                AudiencePolicy::Following => {
                    self.oracle
                        .get_following(author, self.config.audience_page_size, cursor.as_deref())
                        .await?
                }
                AudiencePolicy::Followers => {
                    self.oracle
                        .get_followers(author, self.config.audience_page_size, cursor.as_deref())
                        .await?
                }
                AudiencePolicy::Anyone => return Ok(true),
            };
            if page.items.contains(&interactor) {
                return Ok(true);
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(false),
            }
        }

        debug!(author, interactor, "Audience lookahead exhausted");
        Ok(false)
    }
}

/// Normalized amount if it parses and is above zero
fn positive_amount(raw: &str) -> Option<String> {
    let units = amount::to_units(raw, MAX_TOKEN_DECIMALS).ok()?;
    (!units.is_zero()).then(|| amount::from_units(units, MAX_TOKEN_DECIMALS))
}

/// `spent + amount <= limit`, compared at full precision
fn within_limit(spent: &str, amount: &str, limit: &str) -> Result<bool, AppError> {
    let spent = amount::to_units(spent, MAX_TOKEN_DECIMALS)?;
    let amount = amount::to_units(amount, MAX_TOKEN_DECIMALS)?;
    let limit = amount::to_units(limit, MAX_TOKEN_DECIMALS)?;
    Ok(spent.checked_add(amount).is_some_and(|total: U256| total <= limit))
}
