//! SQLite-backed holding store

use super::store::{
    HoldingKey, HoldingStore, HoldingWrite, Modified, Mutation, duplicate, missing,
};
use crate::error::{InvestoError, Result};
use crate::models::{Holding, HoldingId, NewHolding, UserId};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteRow,
};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

#[derive(Debug, Clone)]
pub struct SqliteHoldingStore {
    pool: SqlitePool,
}

impl SqliteHoldingStore {
    /// Open (creating if missing) the database at `db_url` and ensure the schema
    pub async fn connect(db_url: &str) -> Result<Self> {
        let in_memory = db_url.contains(":memory:");

        if !in_memory {
            if let Some(path_part) = db_url.strip_prefix("sqlite://") {
                if let Some(parent) = Path::new(path_part).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        tokio::fs::create_dir_all(parent).await.map_err(|e| {
                            InvestoError::Storage(format!(
                                "failed to create database directory: {e}"
                            ))
                        })?;
                    }
                }
            }
        }

        let mut options = SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // Every connection to `:memory:` is its own database, so pin it to one
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options.connect_with(options).await?;
        info!(db_url, "Connected to holding store");

        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS holdings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                company_name TEXT,
                shares INTEGER NOT NULL CHECK (shares > 0),
                average_cost TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (user_id, symbol)
            );
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_holdings_user ON holdings (user_id, id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    fn map_row(row: &SqliteRow) -> Result<Holding> {
        let average_cost: String = row.try_get("average_cost")?;
        let average_cost = Decimal::from_str(&average_cost).map_err(|e| {
            InvestoError::Storage(format!("corrupt average_cost '{average_cost}': {e}"))
        })?;
        let shares: i64 = row.try_get("shares")?;

        Ok(Holding {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            symbol: row.try_get("symbol")?,
            company_name: row.try_get("company_name")?,
            shares: u64::try_from(shares)
                .map_err(|_| InvestoError::Storage(format!("corrupt share count {shares}")))?,
            average_cost,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn shares_column(shares: u64) -> Result<i64> {
        i64::try_from(shares)
            .map_err(|_| InvestoError::InvalidQuantity(format!("{shares} shares is too many")))
    }

    async fn insert(conn: &mut SqliteConnection, holding: NewHolding) -> Result<Holding> {
        let result = sqlx::query(
            r"
            INSERT INTO holdings
                (user_id, symbol, company_name, shares, average_cost, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(holding.user_id)
        .bind(&holding.symbol)
        .bind(holding.company_name.as_deref())
        .bind(Self::shares_column(holding.shares)?)
        .bind(holding.average_cost.to_string())
        .bind(holding.created_at)
        .bind(holding.created_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => duplicate(&holding.symbol),
            other => other.into(),
        })?;

        Ok(Holding {
            id: result.last_insert_rowid(),
            user_id: holding.user_id,
            symbol: holding.symbol,
            company_name: holding.company_name,
            shares: holding.shares,
            average_cost: holding.average_cost,
            created_at: holding.created_at,
            updated_at: holding.created_at,
        })
    }

    async fn update(conn: &mut SqliteConnection, current: &Holding, changed: &Holding) -> Result<()> {
        sqlx::query(
            r"
            UPDATE holdings
            SET company_name = ?, shares = ?, average_cost = ?, updated_at = ?
            WHERE id = ? AND user_id = ?
            ",
        )
        .bind(changed.company_name.as_deref())
        .bind(Self::shares_column(changed.shares)?)
        .bind(changed.average_cost.to_string())
        .bind(changed.updated_at)
        .bind(current.id)
        .bind(current.user_id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl HoldingStore for SqliteHoldingStore {
    async fn get(&self, user_id: UserId, id: HoldingId) -> Result<Option<Holding>> {
        let row = sqlx::query("SELECT * FROM holdings WHERE user_id = ? AND id = ?")
            .bind(user_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::map_row).transpose()
    }

    async fn list(&self, user_id: UserId) -> Result<Vec<Holding>> {
        let rows = sqlx::query("SELECT * FROM holdings WHERE user_id = ? ORDER BY id ASC")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::map_row).collect()
    }

    async fn modify(
        &self,
        user_id: UserId,
        key: HoldingKey<'_>,
        mutation: Mutation,
    ) -> Result<Modified> {
        // Rolled back on drop, so a cancelled caller leaves no partial write
        let mut tx = self.pool.begin().await?;

        // Claim the write lock before reading, as BEGIN IMMEDIATE would
        sqlx::query("UPDATE holdings SET shares = shares WHERE 0")
            .execute(&mut *tx)
            .await?;

        let row = match key {
            HoldingKey::Symbol(symbol) => {
                sqlx::query("SELECT * FROM holdings WHERE user_id = ? AND symbol = ?")
                    .bind(user_id)
                    .bind(symbol)
                    .fetch_optional(&mut *tx)
                    .await?
            }
            HoldingKey::Id(id) => {
                sqlx::query("SELECT * FROM holdings WHERE user_id = ? AND id = ?")
                    .bind(user_id)
                    .bind(id)
                    .fetch_optional(&mut *tx)
                    .await?
            }
        };
        let before = row.as_ref().map(Self::map_row).transpose()?;

        let after = match mutation(before.as_ref())? {
            HoldingWrite::Insert(new) => Some(Self::insert(&mut *tx, new).await?),
            HoldingWrite::Update(changed) => {
                let current = before.as_ref().ok_or_else(|| missing(user_id, key))?;
                Self::update(&mut *tx, current, &changed).await?;
                Some(Holding {
                    company_name: changed.company_name,
                    shares: changed.shares,
                    average_cost: changed.average_cost,
                    updated_at: changed.updated_at,
                    ..current.clone()
                })
            }
            HoldingWrite::Delete => {
                let current = before.as_ref().ok_or_else(|| missing(user_id, key))?;
                sqlx::query("DELETE FROM holdings WHERE id = ? AND user_id = ?")
                    .bind(current.id)
                    .bind(current.user_id)
                    .execute(&mut *tx)
                    .await?;
                None
            }
        };

        tx.commit().await?;
        Ok(Modified { before, after })
    }
}
