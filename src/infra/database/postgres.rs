//! PostgreSQL tip store implementation.
//!
//! Addresses are stored as lowercase `0x` hex text. Amounts are `NUMERIC`
//! columns, bound from and read back as decimal strings so no precision is lost
//! in transit.

use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::Address;
use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgPoolOptions, postgres::PgRow};
use tracing::{debug, info, instrument};

use crate::domain::amount;
use crate::domain::{
    ActionSetting, AppError, AudiencePolicy, AuthorConfig, AuthorStats, BlocklistEntry,
    DatabaseError, DedupKey, Fid, LeaderboardEntry, LeaderboardKind, RecordOutcome,
    TipHistoryRecord, TipStore,
};

/// PostgreSQL connection pool configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

/// PostgreSQL tip store with connection pooling
pub struct PostgresClient {
    pool: PgPool,
}

const AUTHOR_COLUMNS: &str = r#"
    fid, address, token_address,
    like_enabled, like_amount::text AS like_amount,
    reply_enabled, reply_amount::text AS reply_amount,
    recast_enabled, recast_amount::text AS recast_amount,
    quote_enabled, quote_amount::text AS quote_amount,
    follow_enabled, follow_amount::text AS follow_amount,
    spending_limit::text AS spending_limit, total_spent::text AS total_spent,
    audience, min_follower_count, min_reputation_score, is_active,
    created_at, updated_at
"#;

const HISTORY_COLUMNS: &str = r#"
    id, from_address, to_address, token_address, amount::text AS amount, action_type,
    cast_reference, transaction_hash, author_fid, interactor_fid, dedup_key, settled_at
"#;

fn addr_text(address: &Address) -> String {
    format!("{address:#x}")
}

fn parse_address(column: &str, value: &str) -> Result<Address, AppError> {
    Address::from_str(value).map_err(|e| {
        AppError::Database(DatabaseError::Query(format!(
            "invalid address in column {column}: {e}"
        )))
    })
}

fn fid_param(fid: Fid) -> i64 {
    fid as i64
}

fn query_error(e: sqlx::Error) -> AppError {
    AppError::Database(DatabaseError::Query(e.to_string()))
}

impl PostgresClient {
    /// Create a new PostgreSQL client with custom configuration
    pub async fn new(database_url: &str, config: PostgresConfig) -> Result<Self, AppError> {
        info!("Connecting to PostgreSQL...");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect(database_url)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a new PostgreSQL client with default configuration
    pub async fn with_defaults(database_url: &str) -> Result<Self, AppError> {
        Self::new(database_url, PostgresConfig::default()).await
    }

    /// Run database migrations using sqlx migrate
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Migration(e.to_string())))?;
        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying connection pool (for testing)
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn action_setting(row: &PgRow, action: &str) -> ActionSetting {
        let amount: Option<String> = row.get(format!("{action}_amount").as_str());
        ActionSetting {
            enabled: row.get(format!("{action}_enabled").as_str()),
            amount: amount.map(|a| amount::normalize(&a)),
        }
    }

    fn row_to_author_config(row: &PgRow) -> Result<AuthorConfig, AppError> {
        let fid: i64 = row.get("fid");
        let address: String = row.get("address");
        let token_address: String = row.get("token_address");
        let spending_limit: String = row.get("spending_limit");
        let total_spent: String = row.get("total_spent");
        let audience: String = row.get("audience");
        let min_follower_count: i64 = row.get("min_follower_count");

        Ok(AuthorConfig {
            fid: fid as Fid,
            address: parse_address("address", &address)?,
            token_address: parse_address("token_address", &token_address)?,
            like: Self::action_setting(row, "like"),
            reply: Self::action_setting(row, "reply"),
            recast: Self::action_setting(row, "recast"),
            quote: Self::action_setting(row, "quote"),
            follow: Self::action_setting(row, "follow"),
            spending_limit: amount::normalize(&spending_limit),
            total_spent: amount::normalize(&total_spent),
            audience: audience.parse().unwrap_or(AudiencePolicy::Anyone),
            min_follower_count: min_follower_count.max(0) as u64,
            min_reputation_score: row.get("min_reputation_score"),
            is_active: row.get("is_active"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn row_to_history(row: &PgRow) -> Result<TipHistoryRecord, AppError> {
        let from_address: String = row.get("from_address");
        let to_address: String = row.get("to_address");
        let token_address: String = row.get("token_address");
        let amount_text: String = row.get("amount");
        let action_type: String = row.get("action_type");
        let author_fid: i64 = row.get("author_fid");
        let interactor_fid: i64 = row.get("interactor_fid");

        Ok(TipHistoryRecord {
            id: row.get("id"),
            from_address: parse_address("from_address", &from_address)?,
            to_address: parse_address("to_address", &to_address)?,
            token_address: parse_address("token_address", &token_address)?,
            amount: amount::normalize(&amount_text),
            action_type: action_type
                .parse()
                .map_err(|e: String| AppError::Database(DatabaseError::Query(e)))?,
            cast_reference: row.get("cast_reference"),
            transaction_hash: row.get("transaction_hash"),
            author_fid: author_fid as Fid,
            interactor_fid: interactor_fid as Fid,
            dedup_key: DedupKey::from_stored(row.get("dedup_key")),
            settled_at: row.get("settled_at"),
        })
    }

    async fn fetch_author_config(
        &self,
        lookup: AuthorLookup,
    ) -> Result<Option<AuthorConfig>, AppError> {
        let column = match lookup {
            AuthorLookup::Fid(_) => "fid",
            AuthorLookup::Address(_) => "address",
        };
        let sql = format!("SELECT {AUTHOR_COLUMNS} FROM author_configs WHERE {column} = $1");
        let query = match lookup {
            AuthorLookup::Fid(fid) => sqlx::query(&sql).bind(fid),
            AuthorLookup::Address(address) => sqlx::query(&sql).bind(address),
        };
        let row = query
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?;
        row.as_ref().map(Self::row_to_author_config).transpose()
    }
}

enum AuthorLookup {
    Fid(i64),
    Address(String),
}

#[async_trait]
impl TipStore for PostgresClient {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_author_config(&self, fid: Fid) -> Result<Option<AuthorConfig>, AppError> {
        self.fetch_author_config(AuthorLookup::Fid(fid_param(fid)))
            .await
    }

    #[instrument(skip(self))]
    async fn get_author_config_by_address(
        &self,
        address: &Address,
    ) -> Result<Option<AuthorConfig>, AppError> {
        self.fetch_author_config(AuthorLookup::Address(addr_text(address)))
            .await
    }

    #[instrument(skip(self, config), fields(fid = config.fid))]
    async fn upsert_author_config(&self, config: &AuthorConfig) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO author_configs (
                fid, address, token_address,
                like_enabled, like_amount, reply_enabled, reply_amount,
                recast_enabled, recast_amount, quote_enabled, quote_amount,
                follow_enabled, follow_amount,
                spending_limit, total_spent, audience,
                min_follower_count, min_reputation_score, is_active,
                created_at, updated_at
            )
            VALUES (
                $1, $2, $3,
                $4, $5::numeric, $6, $7::numeric,
                $8, $9::numeric, $10, $11::numeric,
                $12, $13::numeric,
                $14::numeric, $15::numeric, $16,
                $17, $18, $19,
                $20, NOW()
            )
            ON CONFLICT (fid) DO UPDATE SET
                address = EXCLUDED.address,
                token_address = EXCLUDED.token_address,
                like_enabled = EXCLUDED.like_enabled,
                like_amount = EXCLUDED.like_amount,
                reply_enabled = EXCLUDED.reply_enabled,
                reply_amount = EXCLUDED.reply_amount,
                recast_enabled = EXCLUDED.recast_enabled,
                recast_amount = EXCLUDED.recast_amount,
                quote_enabled = EXCLUDED.quote_enabled,
                quote_amount = EXCLUDED.quote_amount,
                follow_enabled = EXCLUDED.follow_enabled,
                follow_amount = EXCLUDED.follow_amount,
                spending_limit = EXCLUDED.spending_limit,
                audience = EXCLUDED.audience,
                min_follower_count = EXCLUDED.min_follower_count,
                min_reputation_score = EXCLUDED.min_reputation_score,
                is_active = EXCLUDED.is_active,
                updated_at = NOW()
            "#,
        )
        .bind(fid_param(config.fid))
        .bind(addr_text(&config.address))
        .bind(addr_text(&config.token_address))
        .bind(config.like.enabled)
        .bind(config.like.amount.as_deref())
        .bind(config.reply.enabled)
        .bind(config.reply.amount.as_deref())
        .bind(config.recast.enabled)
        .bind(config.recast.amount.as_deref())
        .bind(config.quote.enabled)
        .bind(config.quote.amount.as_deref())
        .bind(config.follow.enabled)
        .bind(config.follow.amount.as_deref())
        .bind(&config.spending_limit)
        .bind(&config.total_spent)
        .bind(config.audience.as_str())
        .bind(config.min_follower_count as i64)
        .bind(config.min_reputation_score)
        .bind(config.is_active)
        .bind(config.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_active_author_configs(&self) -> Result<Vec<AuthorConfig>, AppError> {
        let sql = format!(
            "SELECT {AUTHOR_COLUMNS} FROM author_configs WHERE is_active = TRUE ORDER BY fid"
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?;
        rows.iter().map(Self::row_to_author_config).collect()
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn has_user_been_tipped_for_cast(&self, key: &DedupKey) -> Result<bool, AppError> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM tip_history WHERE dedup_key = $1)")
            .bind(key.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(query_error)?;
        Ok(row.get::<bool, _>(0))
    }

    #[instrument(skip(self, record), fields(dedup_key = %record.dedup_key, tx_hash = %record.transaction_hash))]
    async fn record_settlement(
        &self,
        record: &TipHistoryRecord,
    ) -> Result<RecordOutcome, AppError> {
        let mut tx = self.pool.begin().await.map_err(query_error)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO tip_history (
                id, from_address, to_address, token_address, amount, action_type,
                cast_reference, transaction_hash, author_fid, interactor_fid,
                dedup_key, settled_at
            )
            VALUES ($1, $2, $3, $4, $5::numeric, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (dedup_key) DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(addr_text(&record.from_address))
        .bind(addr_text(&record.to_address))
        .bind(addr_text(&record.token_address))
        .bind(&record.amount)
        .bind(record.action_type.as_str())
        .bind(record.cast_reference.as_deref())
        .bind(&record.transaction_hash)
        .bind(fid_param(record.author_fid))
        .bind(fid_param(record.interactor_fid))
        .bind(record.dedup_key.as_str())
        .bind(record.settled_at)
        .execute(&mut *tx)
        .await
        .map_err(query_error)?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await.map_err(query_error)?;
            debug!("Settlement already recorded");
            return Ok(RecordOutcome::AlreadyRecorded);
        }

        let updated = sqlx::query(
            r#"
            UPDATE author_configs
            SET total_spent = total_spent + $1::numeric,
                updated_at = NOW()
            WHERE fid = $2
            "#,
        )
        .bind(&record.amount)
        .bind(fid_param(record.author_fid))
        .execute(&mut *tx)
        .await
        .map_err(query_error)?;

        if updated.rows_affected() == 0 {
            tx.rollback().await.map_err(query_error)?;
            return Err(AppError::Database(DatabaseError::NotFound(format!(
                "author config {}",
                record.author_fid
            ))));
        }

        tx.commit().await.map_err(query_error)?;
        Ok(RecordOutcome::Recorded)
    }

    #[instrument(skip(self))]
    async fn list_tip_history(
        &self,
        author_fid: Fid,
        limit: i64,
    ) -> Result<Vec<TipHistoryRecord>, AppError> {
        let sql = format!(
            "SELECT {HISTORY_COLUMNS} FROM tip_history WHERE author_fid = $1 \
             ORDER BY settled_at DESC, id DESC LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(fid_param(author_fid))
            .bind(limit.clamp(1, 1000))
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?;
        rows.iter().map(Self::row_to_history).collect()
    }

    #[instrument(skip(self))]
    async fn leaderboard(
        &self,
        kind: LeaderboardKind,
        limit: i64,
    ) -> Result<Vec<LeaderboardEntry>, AppError> {
        let column = match kind {
            LeaderboardKind::Tippers => "from_address",
            LeaderboardKind::Earners => "to_address",
        };
        let sql = format!(
            r#"
            SELECT {column} AS address, token_address,
                   SUM(amount)::text AS total_amount, COUNT(*) AS tip_count
            FROM tip_history
            GROUP BY {column}, token_address
            ORDER BY SUM(amount) DESC, COUNT(*) DESC
            LIMIT $1
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(limit.clamp(1, 100))
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?;

        Ok(rows
            .iter()
            .map(|row| {
                let total: String = row.get("total_amount");
                LeaderboardEntry {
                    address: row.get("address"),
                    token_address: row.get("token_address"),
                    total_amount: amount::normalize(&total),
                    tip_count: row.get("tip_count"),
                }
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn author_stats(&self, fid: Fid) -> Result<Option<AuthorStats>, AppError> {
        let row = sqlx::query(
            r#"
            SELECT c.fid, c.address, c.total_spent::text AS total_spent,
                   c.spending_limit::text AS spending_limit,
                   (SELECT COUNT(*) FROM tip_history h WHERE h.author_fid = c.fid) AS tips_sent
            FROM author_configs c
            WHERE c.fid = $1
            "#,
        )
        .bind(fid_param(fid))
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)?;

        Ok(row.map(|row| {
            let fid: i64 = row.get("fid");
            let total_spent: String = row.get("total_spent");
            let spending_limit: String = row.get("spending_limit");
            AuthorStats::new(
                fid as Fid,
                row.get("address"),
                amount::normalize(&total_spent),
                amount::normalize(&spending_limit),
                row.get("tips_sent"),
            )
        }))
    }

    #[instrument(skip(self))]
    async fn load_blocklist(&self) -> Result<Vec<BlocklistEntry>, AppError> {
        let rows = sqlx::query("SELECT address, reason, updated_at FROM blocklist ORDER BY created_at")
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?;

        rows.iter()
            .map(|row| {
                let address: String = row.get("address");
                Ok(BlocklistEntry {
                    address: parse_address("address", &address)?,
                    reason: row.get("reason"),
                    updated_at: row.get("updated_at"),
                })
            })
            .collect()
    }

    #[instrument(skip(self, entry), fields(address = %entry.address))]
    async fn upsert_blocklist_entry(&self, entry: &BlocklistEntry) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO blocklist (address, reason, created_at, updated_at)
            VALUES ($1, $2, NOW(), $3)
            ON CONFLICT (address) DO UPDATE SET
                reason = EXCLUDED.reason,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(addr_text(&entry.address))
        .bind(&entry.reason)
        .bind(entry.updated_at)
        .execute(&self.pool)
        .await
        .map_err(query_error)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove_blocklist_entry(&self, address: &Address) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM blocklist WHERE address = $1")
            .bind(addr_text(address))
            .execute(&self.pool)
            .await
            .map_err(query_error)?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn get_scalar(&self, key: &str) -> Result<Option<String>, AppError> {
        let row = sqlx::query("SELECT value FROM app_config WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?;
        Ok(row.map(|r| r.get("value")))
    }

    #[instrument(skip(self, value))]
    async fn set_scalar(&self, key: &str, value: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO app_config (key, value, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(query_error)?;
        Ok(())
    }
}
