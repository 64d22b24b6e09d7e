//! Application entry point.

use std::env;
use std::str::FromStr;
use std::sync::Arc;

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use anyhow::{Context, Result};
use dotenvy::dotenv;
use secrecy::SecretString;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use reverse_tip_relayer::api::create_router;
use reverse_tip_relayer::app::{
    AppState, PipelineConfig, spawn_blocklist_sweep, spawn_settlement_worker,
};
use reverse_tip_relayer::domain::{ChainClient, EventFilter, TipStore};
use reverse_tip_relayer::infra::blockchain::MULTICALL3_ADDRESS;
use reverse_tip_relayer::infra::{
    EvmChainClient, EvmClientConfig, GovernedChainClient, NeynarClient, NeynarConfig,
    NeynarWebhookFilter, PostgresClient, PostgresConfig, RpcGovernorConfig, UnmanagedEventFilter,
    WebhookSubscription, signer_from_secret,
};

/// Application configuration
struct Config {
    database_url: String,
    signer: PrivateKeySigner,
    chain: EvmClientConfig,
    governor: RpcGovernorConfig,
    neynar: NeynarConfig,
    /// Webhook subscription kept in sync with the blocklist (optional)
    webhook: Option<WebhookSubscription>,
    host: String,
    port: u16,
    pipeline: PipelineConfig,
}

impl Config {
    fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL not set")?;
        let signer = Self::load_signer()?;

        let multicall_address =
            optional_address("MULTICALL_ADDRESS")?.unwrap_or(MULTICALL3_ADDRESS);
        let chain = EvmClientConfig {
            rpc_url: env::var("RPC_URL").unwrap_or_else(|_| "https://mainnet.base.org".to_string()),
            chain_id: env::var("CHAIN_ID")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8453),
            multicall_address,
            ..Default::default()
        };

        let api_key = env::var("NEYNAR_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .context("NEYNAR_API_KEY not set")?;
        let mut neynar = NeynarConfig::new(SecretString::from(api_key));
        if let Some(url) = env::var("NEYNAR_API_URL").ok().filter(|u| !u.is_empty()) {
            neynar = neynar.with_base_url(url);
        }

        let webhook_id = env::var("NEYNAR_WEBHOOK_ID").ok().filter(|v| !v.is_empty());
        let webhook_url = env::var("NEYNAR_WEBHOOK_URL").ok().filter(|v| !v.is_empty());
        let webhook = match (webhook_id, webhook_url) {
            (Some(webhook_id), Some(target_url)) => Some(WebhookSubscription {
                webhook_id,
                name: env::var("NEYNAR_WEBHOOK_NAME")
                    .unwrap_or_else(|_| "reverse-tips".to_string()),
                target_url,
            }),
            (Some(_), None) => {
                anyhow::bail!("NEYNAR_WEBHOOK_ID is set but NEYNAR_WEBHOOK_URL is not")
            }
            _ => None,
        };

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let mut pipeline = PipelineConfig::from_env();
        pipeline.settlement.batch_contract = optional_address("BATCH_CONTRACT_ADDRESS")?;
        if pipeline.settlement.batch_contract == Some(MULTICALL3_ADDRESS) {
            anyhow::bail!(
                "BATCH_CONTRACT_ADDRESS must be the executor-restricted batch contract, \
                 not the public Multicall3 deployment"
            );
        }

        Ok(Self {
            database_url,
            signer,
            chain,
            governor: RpcGovernorConfig::from_env(),
            neynar,
            webhook,
            host,
            port,
            pipeline,
        })
    }

    fn load_signer() -> Result<PrivateKeySigner> {
        let key = env::var("EXECUTOR_PRIVATE_KEY").map_err(|_| {
            anyhow::anyhow!(
                "EXECUTOR_PRIVATE_KEY environment variable is not set.\n\
                 This is a REQUIRED configuration: settlement transactions are signed with it.\n\
                 Please set EXECUTOR_PRIVATE_KEY to a hex-encoded secp256k1 private key."
            )
        })?;
        if key.is_empty() {
            anyhow::bail!("EXECUTOR_PRIVATE_KEY environment variable is empty.");
        }

        info!("Loading executor key from environment");
        signer_from_secret(&SecretString::from(key))
            .context("Failed to parse EXECUTOR_PRIVATE_KEY")
    }
}

fn optional_address(key: &str) -> Result<Option<Address>> {
    match env::var(key).ok().filter(|v| !v.trim().is_empty()) {
        Some(raw) => Address::from_str(raw.trim())
            .map(Some)
            .with_context(|| format!("{key} is not a valid address")),
        None => Ok(None),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,sqlx=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C"),
        () = terminate => info!("Received SIGTERM"),
    }
}

/// Authors the event source should deliver for: active and not blocklisted
async fn subscribed_authors(store: &dyn TipStore) -> Result<Vec<u64>> {
    let blocked: Vec<Address> = store
        .load_blocklist()
        .await?
        .into_iter()
        .map(|e| e.address)
        .collect();
    Ok(store
        .list_active_author_configs()
        .await?
        .into_iter()
        .filter(|c| !blocked.contains(&c.address))
        .map(|c| c.fid)
        .collect())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    info!("🏗️  Reverse Tip Relayer v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!("🔑 Executor: {}", config.signer.address());

    info!("📦 Initializing infrastructure...");

    let postgres_client = PostgresClient::new(&config.database_url, PostgresConfig::default()).await?;
    postgres_client.run_migrations().await?;
    let store: Arc<dyn TipStore> = Arc::new(postgres_client);
    info!("   ✓ Database connected and migrations applied");

    let evm_client = EvmChainClient::new(config.chain.clone(), Some(config.signer))?;
    let chain: Arc<dyn ChainClient> = Arc::new(GovernedChainClient::new(
        Arc::new(evm_client),
        config.governor.clone(),
    ));
    info!(
        "   ✓ Chain client created (min interval {:?}, max retries {})",
        config.governor.min_interval, config.governor.max_retries
    );

    let neynar = NeynarClient::new(config.neynar.clone())?;
    info!("   ✓ Social-graph oracle created ({})", config.neynar.base_url);

    let filter: Arc<dyn EventFilter> = match config.webhook.clone() {
        Some(subscription) => {
            let authors = subscribed_authors(store.as_ref()).await?;
            let filter = NeynarWebhookFilter::new(neynar.clone(), subscription, authors);
            if let Err(e) = filter.publish().await {
                warn!(error = ?e, "   ⚠ Initial webhook subscription push failed");
            }
            info!(
                "   ✓ Webhook subscription managed ({} authors)",
                filter.authors().await.len()
            );
            Arc::new(filter)
        }
        None => {
            info!("   ○ Webhook subscription unmanaged (NEYNAR_WEBHOOK_ID not set)");
            Arc::new(UnmanagedEventFilter)
        }
    };

    match config.pipeline.settlement.batch_contract {
        Some(contract) => info!("   ✓ Batch contract: {} (authors approve it)", contract),
        None => info!("   ○ Batch contract not configured (authors approve the executor, per-tip transfers only)"),
    }

    let app_state = AppState::build(
        Arc::clone(&store),
        Arc::clone(&chain),
        Arc::new(neynar),
        filter,
        config.pipeline.clone(),
    )
    .await?;
    info!(
        "   ✓ Blocklist loaded ({} entries)",
        app_state.service.list_blocklist().len()
    );
    let app_state = Arc::new(app_state);

    let settlement_worker = if config.pipeline.batch.worker_enabled {
        let worker =
            spawn_settlement_worker(Arc::clone(&app_state.service), &config.pipeline.batch);
        info!(
            "   ✓ Settlement worker started (flush every {:?} or at {} tips)",
            config.pipeline.batch.flush_interval, config.pipeline.batch.max_size
        );
        Some(worker)
    } else {
        info!("   ○ Settlement worker disabled");
        None
    };

    let sweep_shutdown_tx = if config.pipeline.blocklist.sweep_enabled {
        let (_handle, shutdown_tx) =
            spawn_blocklist_sweep(Arc::clone(&app_state.service), &config.pipeline.blocklist);
        info!(
            "   ✓ Blocklist sweep started (every {:?})",
            config.pipeline.blocklist.sweep_interval
        );
        Some(shutdown_tx)
    } else {
        info!("   ○ Blocklist sweep disabled");
        None
    };

    let router = create_router(app_state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("🚀 Server starting on http://{}", addr);
    info!("📖 Swagger UI available at http://{}/swagger-ui", addr);
    info!("📄 OpenAPI spec at http://{}/api-docs/openapi.json", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(tx) = sweep_shutdown_tx {
        let _ = tx.send(true);
    }
    // The settlement worker drains the queue before exiting
    if let Some((handle, tx)) = settlement_worker {
        let _ = tx.send(true);
        if let Err(e) = handle.await {
            error!(error = %e, "Settlement worker panicked");
        }
    }

    info!("Server shutdown complete");
    Ok(())
}
