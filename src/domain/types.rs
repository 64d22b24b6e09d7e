//! Domain types for interactions, author configuration, pending tips and the ledger.

use alloy::primitives::{Address, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;
use uuid::Uuid;

use super::amount;
use super::error::ValidationError;

/// Social identity (Farcaster id)
pub type Fid = u64;

/// Kind of interaction that can earn a tip
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum InteractionType {
    Like,
    Reply,
    Recast,
    Quote,
    Follow,
}

impl InteractionType {
    pub const ALL: [InteractionType; 5] = [
        Self::Like,
        Self::Reply,
        Self::Recast,
        Self::Quote,
        Self::Follow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Reply => "reply",
            Self::Recast => "recast",
            Self::Quote => "quote",
            Self::Follow => "follow",
        }
    }
}

impl std::str::FromStr for InteractionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "like" => Ok(Self::Like),
            "reply" => Ok(Self::Reply),
            "recast" => Ok(Self::Recast),
            "quote" => Ok(Self::Quote),
            "follow" => Ok(Self::Follow),
            _ => Err(format!("Invalid interaction type: {}", s)),
        }
    }
}

impl std::fmt::Display for InteractionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identity of a tip for duplicate detection: one tip per
/// `(author, interactor, cast, action)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupKey(String);

impl DedupKey {
    #[must_use]
    pub fn compute(
        author: Fid,
        interactor: Fid,
        cast_reference: Option<&str>,
        action: InteractionType,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(
            format!(
                "{}|{}|{}|{}",
                author,
                interactor,
                cast_reference.unwrap_or_default().to_ascii_lowercase(),
                action.as_str()
            )
            .as_bytes(),
        );
        Self(alloy::hex::encode(hasher.finalize()))
    }

    /// Wrap a key read back from storage
    #[must_use]
    pub fn from_stored(value: String) -> Self {
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DedupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An interaction reported by the social-graph provider. Immutable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InteractionEvent {
    pub interaction_type: InteractionType,
    /// Author of the cast (or the followed user); the tip payer
    pub author_fid: Fid,
    /// User who interacted; the tip recipient
    pub interactor_fid: Fid,
    /// Cast hash; `None` for follows
    pub cast_reference: Option<String>,
    pub observed_at: DateTime<Utc>,
}

impl InteractionEvent {
    #[must_use]
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey::compute(
            self.author_fid,
            self.interactor_fid,
            self.cast_reference.as_deref(),
            self.interaction_type,
        )
    }
}

/// Who is allowed to earn tips from an author
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AudiencePolicy {
    /// Interactor must be followed by the author
    Following,
    /// Interactor must follow the author
    Followers,
    #[default]
    Anyone,
}

impl AudiencePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Following => "following",
            Self::Followers => "followers",
            Self::Anyone => "anyone",
        }
    }
}

impl std::str::FromStr for AudiencePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "following" => Ok(Self::Following),
            "followers" => Ok(Self::Followers),
            "anyone" => Ok(Self::Anyone),
            _ => Err(format!("Invalid audience policy: {}", s)),
        }
    }
}

/// Per-action tip setting
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ActionSetting {
    pub enabled: bool,
    /// Human decimal amount, e.g. "0.1"
    pub amount: Option<String>,
}

impl ActionSetting {
    #[must_use]
    pub fn enabled(amount: &str) -> Self {
        Self {
            enabled: true,
            amount: Some(amount.to_string()),
        }
    }
}

/// Per-author tipping configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthorConfig {
    pub fid: Fid,
    /// Wallet that funds the tips
    pub address: Address,
    pub token_address: Address,
    pub like: ActionSetting,
    pub reply: ActionSetting,
    pub recast: ActionSetting,
    pub quote: ActionSetting,
    pub follow: ActionSetting,
    /// Human decimal cap on lifetime spend
    pub spending_limit: String,
    /// Human decimal total settled so far
    pub total_spent: String,
    pub audience: AudiencePolicy,
    pub min_follower_count: u64,
    pub min_reputation_score: f64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AuthorConfig {
    #[must_use]
    pub fn new(fid: Fid, address: Address, token_address: Address, spending_limit: &str) -> Self {
        let now = Utc::now();
        Self {
            fid,
            address,
            token_address,
            like: ActionSetting::default(),
            reply: ActionSetting::default(),
            recast: ActionSetting::default(),
            quote: ActionSetting::default(),
            follow: ActionSetting::default(),
            spending_limit: spending_limit.to_string(),
            total_spent: "0".to_string(),
            audience: AudiencePolicy::Anyone,
            min_follower_count: 0,
            min_reputation_score: 0.0,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn action(&self, action: InteractionType) -> &ActionSetting {
        match action {
            InteractionType::Like => &self.like,
            InteractionType::Reply => &self.reply,
            InteractionType::Recast => &self.recast,
            InteractionType::Quote => &self.quote,
            InteractionType::Follow => &self.follow,
        }
    }

    pub fn action_mut(&mut self, action: InteractionType) -> &mut ActionSetting {
        match action {
            InteractionType::Like => &mut self.like,
            InteractionType::Reply => &mut self.reply,
            InteractionType::Recast => &mut self.recast,
            InteractionType::Quote => &mut self.quote,
            InteractionType::Follow => &mut self.follow,
        }
    }

    /// Smallest balance/allowance that keeps this author able to pay any enabled tip:
    /// the maximum of the enabled, positive per-action amounts. `None` when nothing
    /// is enabled.
    pub fn required_minimum(&self, decimals: u8) -> Result<Option<U256>, ValidationError> {
        let mut required: Option<U256> = None;
        for action in InteractionType::ALL {
            let setting = self.action(action);
            let Some(amount) = setting.amount.as_deref().filter(|_| setting.enabled) else {
                continue;
            };
            let units = amount::to_units(amount, decimals)?;
            if units.is_zero() {
                continue;
            }
            required = Some(required.map_or(units, |current| current.max(units)));
        }
        Ok(required)
    }
}

/// A validated, not yet settled tip. Never mutated once enqueued.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingTip {
    pub author_fid: Fid,
    pub interactor_fid: Fid,
    pub author_address: Address,
    pub interactor_address: Address,
    pub token_address: Address,
    /// Human decimal amount
    pub amount: String,
    /// Amount in integer token units
    pub amount_units: U256,
    pub token_decimals: u8,
    pub cast_reference: Option<String>,
    pub action_type: InteractionType,
    pub dedup_key: DedupKey,
    pub enqueued_at: DateTime<Utc>,
}

/// Ordered snapshot of pending tips pulled off the queue for one settlement attempt
#[derive(Debug, Clone)]
pub struct SettlementBatch {
    id: Uuid,
    tips: Vec<PendingTip>,
    formed_at: DateTime<Utc>,
}

impl SettlementBatch {
    #[must_use]
    pub fn new(tips: Vec<PendingTip>) -> Self {
        Self {
            id: Uuid::now_v7(),
            tips,
            formed_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn tips(&self) -> &[PendingTip] {
        &self.tips
    }

    pub fn formed_at(&self) -> DateTime<Utc> {
        self.formed_at
    }

    pub fn len(&self) -> usize {
        self.tips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tips.is_empty()
    }
}

/// Address currently unable to fund tips
#[derive(Debug, Clone, PartialEq)]
pub struct BlocklistEntry {
    pub address: Address,
    pub reason: String,
    pub updated_at: DateTime<Utc>,
}

/// Append-only proof of a completed transfer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TipHistoryRecord {
    pub id: Uuid,
    pub from_address: Address,
    pub to_address: Address,
    pub token_address: Address,
    pub amount: String,
    pub action_type: InteractionType,
    pub cast_reference: Option<String>,
    pub transaction_hash: String,
    pub author_fid: Fid,
    pub interactor_fid: Fid,
    pub dedup_key: DedupKey,
    pub settled_at: DateTime<Utc>,
}

impl TipHistoryRecord {
    #[must_use]
    pub fn from_settled(tip: &PendingTip, transaction_hash: &str) -> Self {
        Self {
            id: Uuid::now_v7(),
            from_address: tip.author_address,
            to_address: tip.interactor_address,
            token_address: tip.token_address,
            amount: tip.amount.clone(),
            action_type: tip.action_type,
            cast_reference: tip.cast_reference.clone(),
            transaction_hash: transaction_hash.to_string(),
            author_fid: tip.author_fid,
            interactor_fid: tip.interactor_fid,
            dedup_key: tip.dedup_key.clone(),
            settled_at: Utc::now(),
        }
    }
}

/// Result of an idempotent ledger write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded,
    /// Same dedup key already in history; nothing changed
    AlreadyRecorded,
}

/// Oracle view of a user
#[derive(Debug, Clone, PartialEq)]
pub struct UserData {
    pub fid: Fid,
    pub follower_count: u64,
    pub reputation_score: f64,
    /// Where tips to this user are paid, when they have an address
    pub payout_address: Option<Address>,
}

/// One page of a paginated oracle list
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_cursor: None,
        }
    }
}

/// Why an interaction does not earn a tip. Stable codes for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IneligibleReason {
    AuthorNotConfigured,
    AuthorInactive,
    ActionDisabled,
    InsufficientFollowers,
    InsufficientReputation,
    AudienceMismatch,
    NoAmount,
    AlreadyTipped,
    SpendingLimitReached,
    AuthorBlocklisted,
    InteractorUnresolved,
    InsufficientAllowance,
    InsufficientBalance,
}

impl IneligibleReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorNotConfigured => "author_not_configured",
            Self::AuthorInactive => "author_inactive",
            Self::ActionDisabled => "action_disabled",
            Self::InsufficientFollowers => "insufficient_followers",
            Self::InsufficientReputation => "insufficient_reputation",
            Self::AudienceMismatch => "audience_mismatch",
            Self::NoAmount => "no_amount",
            Self::AlreadyTipped => "already_tipped",
            Self::SpendingLimitReached => "spending_limit_reached",
            Self::AuthorBlocklisted => "author_blocklisted",
            Self::InteractorUnresolved => "interactor_unresolved",
            Self::InsufficientAllowance => "insufficient_allowance",
            Self::InsufficientBalance => "insufficient_balance",
        }
    }
}

impl std::fmt::Display for IneligibleReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Amount owed for an eligible interaction
#[derive(Debug, Clone, PartialEq)]
pub struct EligibleTip {
    pub amount: String,
    pub amount_units: U256,
    pub token_decimals: u8,
    pub interactor_address: Address,
}

/// Validator verdict
#[derive(Debug, Clone, PartialEq)]
pub enum Eligibility {
    Eligible(EligibleTip),
    Ineligible(IneligibleReason),
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Self::Eligible(_))
    }

    /// Human amount owed, if eligible
    pub fn amount(&self) -> Option<&str> {
        match self {
            Self::Eligible(tip) => Some(&tip.amount),
            Self::Ineligible(_) => None,
        }
    }

    pub fn reason(&self) -> Option<IneligibleReason> {
        match self {
            Self::Eligible(_) => None,
            Self::Ineligible(reason) => Some(*reason),
        }
    }
}

/// Leaderboard ranking side
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LeaderboardKind {
    /// Authors ranked by amount paid out
    #[default]
    Tippers,
    /// Interactors ranked by amount received
    Earners,
}

/// One leaderboard row, aggregated per token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct LeaderboardEntry {
    #[schema(example = "0x8ba1f109551bd432803012645ac136ddd64dba72")]
    pub address: String,
    #[schema(example = "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913")]
    pub token_address: String,
    #[schema(example = "12.5")]
    pub total_amount: String,
    pub tip_count: i64,
}

/// Spend summary for one author
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct AuthorStats {
    pub fid: Fid,
    pub address: String,
    pub total_spent: String,
    pub spending_limit: String,
    /// `spending_limit - total_spent`, never negative
    pub remaining: String,
    pub tips_sent: i64,
}

impl AuthorStats {
    #[must_use]
    pub fn new(
        fid: Fid,
        address: String,
        total_spent: String,
        spending_limit: String,
        tips_sent: i64,
    ) -> Self {
        let remaining = amount::headroom(&spending_limit, &total_spent)
            .unwrap_or_else(|_| "0".to_string());
        Self {
            fid,
            address,
            total_spent,
            spending_limit,
            remaining,
            tips_sent,
        }
    }
}

/// Health status enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub database: HealthStatus,
    pub chain: HealthStatus,
    /// Tips waiting for the next flush
    pub queued_tips: usize,
    pub timestamp: DateTime<Utc>,
    #[schema(example = "0.1.0")]
    pub version: String,
}

impl HealthResponse {
    #[must_use]
    pub fn new(database: HealthStatus, chain: HealthStatus, queued_tips: usize) -> Self {
        let status = match (&database, &chain) {
            (HealthStatus::Healthy, HealthStatus::Healthy) => HealthStatus::Healthy,
            (HealthStatus::Unhealthy, _) => HealthStatus::Unhealthy,
            _ => HealthStatus::Degraded,
        };
        Self {
            status,
            database,
            chain,
            queued_tips,
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Error response structure
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

/// Error detail structure
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    #[schema(example = "validation_error")]
    pub r#type: String,
    pub message: String,
}
