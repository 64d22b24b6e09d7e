//! Neynar social-graph oracle and webhook subscription filter.
//!
//! The oracle answers user stats, follow lists and payout addresses. The
//! filter keeps the webhook subscription limited to authors that can
//! currently fund tips.

use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::Address;
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument};

use crate::domain::{
    AppError, EventFilter, ExternalServiceError, Fid, Page, SocialOracle, UserData,
};

/// Default Neynar API base URL
pub const DEFAULT_NEYNAR_API_URL: &str = "https://api.neynar.com";

/// Neynar client configuration
#[derive(Debug, Clone)]
pub struct NeynarConfig {
    pub api_key: SecretString,
    pub base_url: String,
    pub timeout: Duration,
}

impl NeynarConfig {
    #[must_use]
    pub fn new(api_key: SecretString) -> Self {
        Self {
            api_key,
            base_url: DEFAULT_NEYNAR_API_URL.to_string(),
            timeout: Duration::from_secs(15),
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[derive(Debug, Deserialize)]
struct BulkUsersResponse {
    #[serde(default)]
    users: Vec<NeynarUser>,
}

#[derive(Debug, Deserialize)]
struct NeynarUser {
    fid: Fid,
    #[serde(default)]
    follower_count: u64,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    experimental: Option<Experimental>,
    #[serde(default)]
    verified_addresses: Option<VerifiedAddresses>,
    #[serde(default)]
    custody_address: Option<String>,
}

impl NeynarUser {
    fn reputation_score(&self) -> f64 {
        self.score
            .or_else(|| self.experimental.as_ref().and_then(|e| e.neynar_user_score))
            .unwrap_or(0.0)
    }

    /// First verified EVM address, falling back to the custody address
    fn payout_address(&self) -> Option<Address> {
        self.verified_addresses
            .iter()
            .flat_map(|v| v.eth_addresses.iter())
            .chain(self.custody_address.iter())
            .find_map(|raw| Address::from_str(raw).ok())
    }
}

#[derive(Debug, Deserialize)]
struct Experimental {
    #[serde(default)]
    neynar_user_score: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct VerifiedAddresses {
    #[serde(default)]
    eth_addresses: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct FollowListResponse {
    #[serde(default)]
    users: Vec<FollowEntry>,
    #[serde(default)]
    next: Option<NextCursor>,
}

#[derive(Debug, Deserialize)]
struct FollowEntry {
    user: FollowUser,
}

#[derive(Debug, Deserialize)]
struct FollowUser {
    fid: Fid,
}

#[derive(Debug, Deserialize)]
struct NextCursor {
    #[serde(default)]
    cursor: Option<String>,
}

/// HTTP client for the Neynar v2 API
#[derive(Debug, Clone)]
pub struct NeynarClient {
    http_client: Client,
    config: NeynarConfig,
}

impl NeynarClient {
    pub fn new(config: NeynarConfig) -> Result<Self, AppError> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                AppError::ExternalService(ExternalServiceError::Configuration(e.to_string()))
            })?;
        Ok(Self {
            http_client,
            config,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.config.base_url, path);
        self.http_client
            .request(method, url)
            .header("x-api-key", self.config.api_key.expose_secret())
            .header("accept", "application/json")
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, AppError> {
        let response = request.send().await.map_err(|e| {
            error!(error = %e, "Neynar API request failed");
            AppError::ExternalService(ExternalServiceError::Network(e.to_string()))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Neynar API returned error");
            return Err(AppError::ExternalService(ExternalServiceError::ApiError {
                status_code: status.as_u16(),
                message: body,
            }));
        }

        response.json().await.map_err(|e| {
            error!(error = %e, "Failed to parse Neynar response");
            AppError::ExternalService(ExternalServiceError::ParseError(e.to_string()))
        })
    }

    async fn fetch_user(&self, fid: Fid) -> Result<Option<NeynarUser>, AppError> {
        let request = self
            .request(Method::GET, "/v2/farcaster/user/bulk")
            .query(&[("fids", fid.to_string())]);
        let body: BulkUsersResponse = self.send_json(request).await?;
        Ok(body.users.into_iter().find(|u| u.fid == fid))
    }

    async fn follow_page(
        &self,
        path: &str,
        fid: Fid,
        limit: u32,
        cursor: Option<&str>,
    ) -> Result<Page<Fid>, AppError> {
        let mut query = vec![
            ("fid", fid.to_string()),
            ("limit", limit.clamp(1, 100).to_string()),
        ];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }
        let body: FollowListResponse = self
            .send_json(self.request(Method::GET, path).query(&query))
            .await?;

        debug!(fid, count = body.users.len(), path, "Fetched follow page");

        Ok(Page {
            items: body.users.into_iter().map(|e| e.user.fid).collect(),
            next_cursor: body
                .next
                .and_then(|n| n.cursor)
                .filter(|c| !c.is_empty()),
        })
    }
}

#[async_trait]
impl SocialOracle for NeynarClient {
    #[instrument(skip(self))]
    async fn get_user_data(&self, fid: Fid) -> Result<UserData, AppError> {
        let user = self.fetch_user(fid).await?.ok_or_else(|| {
            AppError::ExternalService(ExternalServiceError::ApiError {
                status_code: 404,
                message: format!("user {fid} not found"),
            })
        })?;
        Ok(UserData {
            fid,
            follower_count: user.follower_count,
            reputation_score: user.reputation_score(),
            payout_address: user.payout_address(),
        })
    }

    #[instrument(skip(self))]
    async fn get_following(
        &self,
        fid: Fid,
        limit: u32,
        cursor: Option<&str>,
    ) -> Result<Page<Fid>, AppError> {
        self.follow_page("/v2/farcaster/following", fid, limit, cursor)
            .await
    }

    #[instrument(skip(self))]
    async fn get_followers(
        &self,
        fid: Fid,
        limit: u32,
        cursor: Option<&str>,
    ) -> Result<Page<Fid>, AppError> {
        self.follow_page("/v2/farcaster/followers", fid, limit, cursor)
            .await
    }

    #[instrument(skip(self))]
    async fn resolve_address(&self, fid: Fid) -> Result<Option<Address>, AppError> {
        Ok(self.fetch_user(fid).await?.and_then(|u| u.payout_address()))
    }
}

/// Webhook registration the filter keeps in sync
#[derive(Debug, Clone)]
pub struct WebhookSubscription {
    pub webhook_id: String,
    pub name: String,
    pub target_url: String,
}

/// Event filter backed by a Neynar webhook subscription.
///
/// Holds the set of author fids whose interactions should be delivered and
/// pushes the whole set on every change.
pub struct NeynarWebhookFilter {
    client: NeynarClient,
    subscription: WebhookSubscription,
    authors: Mutex<BTreeSet<Fid>>,
}

impl NeynarWebhookFilter {
    #[must_use]
    pub fn new(
        client: NeynarClient,
        subscription: WebhookSubscription,
        initial_authors: impl IntoIterator<Item = Fid>,
    ) -> Self {
        Self {
            client,
            subscription,
            authors: Mutex::new(initial_authors.into_iter().collect()),
        }
    }

    /// Authors currently subscribed
    pub async fn authors(&self) -> Vec<Fid> {
        self.authors.lock().await.iter().copied().collect()
    }

    /// Push the current author set to the webhook
    pub async fn publish(&self) -> Result<(), AppError> {
        let authors = self.authors.lock().await;
        self.push(&authors).await
    }

    async fn push(&self, authors: &BTreeSet<Fid>) -> Result<(), AppError> {
        let fids: Vec<Fid> = authors.iter().copied().collect();
        let body = json!({
            "webhook_id": self.subscription.webhook_id,
            "name": self.subscription.name,
            "url": self.subscription.target_url,
            "subscription": {
                "reaction.created": { "target_fids": fids },
                "cast.created": { "parent_author_fids": fids },
                "follow.created": { "target_fids": fids },
            }
        });
        let request = self
            .client
            .request(Method::PUT, "/v2/farcaster/webhook")
            .json(&body);
        let _: serde_json::Value = self.client.send_json(request).await?;
        info!(
            webhook_id = %self.subscription.webhook_id,
            authors = fids.len(),
            "Webhook subscription updated"
        );
        Ok(())
    }

    /// Apply a change and push it; the change is reverted if the push fails
    async fn update(&self, fid: Fid, include: bool) -> Result<(), AppError> {
        let mut authors = self.authors.lock().await;
        let changed = if include {
            authors.insert(fid)
        } else {
            authors.remove(&fid)
        };
        if !changed {
            return Ok(());
        }
        if let Err(e) = self.push(&authors).await {
            if include {
                authors.remove(&fid);
            } else {
                authors.insert(fid);
            }
            return Err(e);
        }
        Ok(())
    }
}

#[async_trait]
impl EventFilter for NeynarWebhookFilter {
    #[instrument(skip(self))]
    async fn remove_author(&self, fid: Fid) -> Result<(), AppError> {
        self.update(fid, false).await
    }

    #[instrument(skip(self))]
    async fn add_author(&self, fid: Fid) -> Result<(), AppError> {
        self.update(fid, true).await
    }
}
