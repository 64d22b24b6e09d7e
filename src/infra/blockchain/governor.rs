//! RPC request governor.
//!
//! Every chain call goes through one FIFO queue with a minimum spacing between
//! calls. Failed calls are retried according to [`ChainErrorKind`]:
//! rate limits back off exponentially (capped, jittered), transient failures
//! back off linearly, fatal errors surface immediately.

use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy::primitives::{Address, B256, Bytes, U256};
use async_trait::async_trait;
use ::governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use rand::Rng;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::{ChainClient, ChainError, ChainErrorKind, ReceiptStatus};

/// Governor tuning
#[derive(Debug, Clone)]
pub struct RpcGovernorConfig {
    /// Minimum spacing between two calls to the node
    pub min_interval: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// First rate-limit backoff; doubles per consecutive rate limit
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Linear step for transient failures
    pub transient_step: Duration,
}

impl Default for RpcGovernorConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(100),
            max_retries: 5,
            backoff_base: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(30),
            transient_step: Duration::from_millis(250),
        }
    }
}

impl RpcGovernorConfig {
    /// Load from environment variables, falling back to defaults
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
            min_interval: millis("RPC_MIN_INTERVAL_MS", defaults.min_interval),
            max_retries: std::env::var("RPC_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_retries),
            backoff_base: millis("RPC_BACKOFF_BASE_MS", defaults.backoff_base),
            backoff_cap: millis("RPC_BACKOFF_CAP_MS", defaults.backoff_cap),
            transient_step: defaults.transient_step,
        }
    }
}

/// Exponential backoff `base * 2^streak`, capped. The shift is clamped so the
/// multiplication cannot overflow.
#[must_use]
pub fn bounded_exponential_backoff(base: Duration, streak: u32, cap: Duration) -> Duration {
    if base.is_zero() {
        return Duration::ZERO;
    }
    let factor = 1u32 << streak.min(16);
    base.saturating_mul(factor).min(cap.max(base))
}

/// Which failures a call may be retried on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Retry rate limits and transient failures
    Idempotent,
    /// Retry rate limits only. Used for broadcasts, where a transient failure
    /// leaves the outcome unknown.
    RateLimitOnly,
}

/// Serializes and paces calls to a single chain node
pub struct RpcGovernor {
    provider: String,
    config: RpcGovernorConfig,
    queue: Mutex<()>,
    limiter: Option<DefaultDirectRateLimiter>,
    total_retries: AtomicU64,
}

impl RpcGovernor {
    #[must_use]
    pub fn new(provider: impl Into<String>, config: RpcGovernorConfig) -> Self {
        let limiter = Quota::with_period(config.min_interval)
            .map(|quota| RateLimiter::direct(quota.allow_burst(NonZeroU32::MIN)));
        Self {
            provider: provider.into(),
            config,
            queue: Mutex::new(()),
            limiter,
            total_retries: AtomicU64::new(0),
        }
    }

    /// Number of retries performed since startup
    #[must_use]
    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }

    /// Run `op` through the queue.
    ///
    /// The queue slot is held across retries, so calls complete in arrival order
    /// and a throttled call does not let later calls overtake it.
    pub async fn execute<T, F, Fut>(
        &self,
        method: &'static str,
        policy: RetryPolicy,
        mut op: F,
    ) -> Result<T, ChainError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, ChainError>> + Send,
        T: Send,
    {
        let _slot = self.queue.lock().await;
        let mut attempt: u32 = 0;
        let mut rate_limit_streak: u32 = 0;

        loop {
            if let Some(limiter) = &self.limiter {
                limiter.until_ready().await;
            }

            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let kind = err.kind();
            let retryable = match (kind, policy) {
                (ChainErrorKind::Fatal, _) => false,
                (ChainErrorKind::Transient, RetryPolicy::RateLimitOnly) => false,
                _ => attempt < self.config.max_retries,
            };
            if !retryable {
                debug!(
                    provider = %self.provider,
                    method,
                    attempt,
                    kind = ?kind,
                    error = %err,
                    "RPC call failed without retry"
                );
                return Err(err);
            }

            let delay = match kind {
                ChainErrorKind::RateLimited => {
                    let backoff = bounded_exponential_backoff(
                        self.config.backoff_base,
                        rate_limit_streak,
                        self.config.backoff_cap,
                    );
                    rate_limit_streak += 1;
                    with_jitter(backoff)
                }
                _ => self.config.transient_step.saturating_mul(attempt + 1),
            };

            attempt += 1;
            self.total_retries.fetch_add(1, Ordering::Relaxed);
            warn!(
                provider = %self.provider,
                method,
                attempt,
                max_retries = self.config.max_retries,
                kind = ?kind,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying RPC call"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

fn with_jitter(delay: Duration) -> Duration {
    let max_jitter = (delay.as_millis() as u64 / 10).max(1);
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..max_jitter))
}

/// [`ChainClient`] whose every call goes through an [`RpcGovernor`]
pub struct GovernedChainClient {
    inner: Arc<dyn ChainClient>,
    governor: Arc<RpcGovernor>,
}

impl GovernedChainClient {
    #[must_use]
    pub fn new(inner: Arc<dyn ChainClient>, config: RpcGovernorConfig) -> Self {
        let governor = Arc::new(RpcGovernor::new(inner.provider_name(), config));
        Self { inner, governor }
    }

    #[must_use]
    pub fn governor(&self) -> &Arc<RpcGovernor> {
        &self.governor
    }
}

#[async_trait]
impl ChainClient for GovernedChainClient {
    fn provider_name(&self) -> &str {
        self.inner.provider_name()
    }

    fn executor_address(&self) -> Option<Address> {
        self.inner.executor_address()
    }

    async fn health_check(&self) -> Result<(), ChainError> {
        self.governor
            .execute("health_check", RetryPolicy::Idempotent, || {
                self.inner.health_check()
            })
            .await
    }

    async fn decimals(&self, token: Address) -> Result<u8, ChainError> {
        self.governor
            .execute("decimals", RetryPolicy::Idempotent, || {
                self.inner.decimals(token)
            })
            .await
    }

    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, ChainError> {
        self.governor
            .execute("allowance", RetryPolicy::Idempotent, || {
                self.inner.allowance(token, owner, spender)
            })
            .await
    }

    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256, ChainError> {
        self.governor
            .execute("balance_of", RetryPolicy::Idempotent, || {
                self.inner.balance_of(token, owner)
            })
            .await
    }

    async fn allowance_and_balance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<(U256, U256), ChainError> {
        self.governor
            .execute("allowance_and_balance", RetryPolicy::Idempotent, || {
                self.inner.allowance_and_balance(token, owner, spender)
            })
            .await
    }

    async fn simulate(&self, to: Address, calldata: Bytes) -> Result<Bytes, ChainError> {
        self.governor
            .execute("simulate", RetryPolicy::Idempotent, || {
                self.inner.simulate(to, calldata.clone())
            })
            .await
    }

    async fn pending_nonce(&self) -> Result<u64, ChainError> {
        self.governor
            .execute("pending_nonce", RetryPolicy::Idempotent, || {
                self.inner.pending_nonce()
            })
            .await
    }

    async fn send_transaction(
        &self,
        to: Address,
        calldata: Bytes,
        nonce: u64,
    ) -> Result<B256, ChainError> {
        self.governor
            .execute("send_transaction", RetryPolicy::RateLimitOnly, || {
                self.inner.send_transaction(to, calldata.clone(), nonce)
            })
            .await
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<ReceiptStatus>, ChainError> {
        self.governor
            .execute("transaction_receipt", RetryPolicy::Idempotent, || {
                self.inner.transaction_receipt(hash)
            })
            .await
    }
}
