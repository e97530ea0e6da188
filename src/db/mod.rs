//! Trade log and bot state persistence.
//!
//! Stores what a restart needs:
//! - Append-only trade records (entries and exits) for the risk profile
//! - A single bot state row (running flag, network mode, last tick)

use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::models::{PositionSide, RecordKind, TradeRecord};

/// Append-only trade history.
///
/// The trading core only appends and reads; trimming belongs to the host.
#[async_trait]
pub trait TradeLog: Send + Sync {
    async fn append(&self, record: &TradeRecord) -> Result<()>;

    /// Most recent `limit` records, oldest first.
    async fn recent(&self, limit: usize) -> Result<Vec<TradeRecord>>;

    /// Most recent `limit` exit records, oldest first.
    async fn recent_exits(&self, limit: usize) -> Result<Vec<TradeRecord>>;

    /// Delete all but the newest `keep` records, returning how many were removed.
    async fn trim(&self, keep: usize) -> Result<u64>;
}

/// Database connection pool.
pub struct Database {
    pool: SqlitePool,
}

/// Bot state stored in database.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BotState {
    pub id: i64,
    pub symbol: String,
    pub mode: String,
    pub is_running: bool,
    pub last_tick_at: Option<String>,
    pub started_at: String,
    pub updated_at: String,
}

/// Stored trade record row.
#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredTradeRecord {
    symbol: String,
    kind: String,
    side: String,
    profit_pct: f64,
    entry_price: String,
    exit_price: Option<String>,
    quantity: String,
    confidence: Option<f64>,
    reason: String,
    timestamp: String,
}

impl StoredTradeRecord {
    fn into_record(self) -> Result<TradeRecord> {
        let kind = RecordKind::parse(&self.kind)
            .ok_or_else(|| anyhow!("Unknown record kind: {}", self.kind))?;
        let side = PositionSide::parse(&self.side)
            .ok_or_else(|| anyhow!("Unknown position side: {}", self.side))?;
        let exit_price = self
            .exit_price
            .as_deref()
            .map(Decimal::from_str)
            .transpose()
            .context("Invalid exit price")?;

        Ok(TradeRecord {
            symbol: self.symbol,
            kind,
            side,
            profit_pct: self.profit_pct,
            entry_price: Decimal::from_str(&self.entry_price).context("Invalid entry price")?,
            exit_price,
            quantity: Decimal::from_str(&self.quantity).context("Invalid quantity")?,
            confidence: self.confidence,
            reason: self.reason,
            timestamp: DateTime::parse_from_rfc3339(&self.timestamp)
                .context("Invalid timestamp")?
                .with_timezone(&Utc),
        })
    }
}

fn into_records(rows: Vec<StoredTradeRecord>) -> Result<Vec<TradeRecord>> {
    // Queries select newest first
    let mut records = rows
        .into_iter()
        .map(StoredTradeRecord::into_record)
        .collect::<Result<Vec<_>>>()?;
    records.reverse();
    Ok(records)
}

impl Database {
    /// Create a new database connection.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Private in-memory database (one connection, so every query sees the same data).
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run all database migrations.
    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bot_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                symbol TEXT NOT NULL,
                mode TEXT NOT NULL,
                is_running INTEGER NOT NULL DEFAULT 0,
                last_tick_at TEXT,
                started_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trade_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                kind TEXT NOT NULL,
                side TEXT NOT NULL,
                profit_pct REAL NOT NULL DEFAULT 0,
                entry_price TEXT NOT NULL,
                exit_price TEXT,
                quantity TEXT NOT NULL,
                confidence REAL,
                reason TEXT NOT NULL,
                timestamp TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trade_records_kind ON trade_records(kind, id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ==================== Bot State ====================

    /// Initialize or reset the bot state row for a new run.
    pub async fn init_bot_state(&self, symbol: &str, mode: &str) -> Result<BotState> {
        sqlx::query(
            r#"
            INSERT INTO bot_state (id, symbol, mode, is_running, started_at, updated_at)
            VALUES (1, ?, ?, 1, datetime('now'), datetime('now'))
            ON CONFLICT(id) DO UPDATE SET
                symbol = excluded.symbol,
                mode = excluded.mode,
                is_running = 1,
                started_at = datetime('now'),
                updated_at = datetime('now')
            "#,
        )
        .bind(symbol)
        .bind(mode)
        .execute(&self.pool)
        .await?;

        self.get_bot_state()
            .await?
            .ok_or_else(|| anyhow!("Bot state not initialized"))
    }

    /// Get current bot state, if the bot has ever run.
    pub async fn get_bot_state(&self) -> Result<Option<BotState>> {
        sqlx::query_as::<_, BotState>("SELECT * FROM bot_state WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .context("Failed to read bot state")
    }

    /// Record a completed tick.
    pub async fn record_tick(&self) -> Result<()> {
        sqlx::query(
            "UPDATE bot_state SET last_tick_at = datetime('now'), updated_at = datetime('now') WHERE id = 1",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark bot as stopped.
    pub async fn mark_bot_stopped(&self) -> Result<()> {
        sqlx::query("UPDATE bot_state SET is_running = 0, updated_at = datetime('now') WHERE id = 1")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ==================== Trade Records ====================

    pub async fn count_trade_records(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM trade_records")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl TradeLog for Database {
    async fn append(&self, record: &TradeRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trade_records (
                symbol, kind, side, profit_pct, entry_price, exit_price,
                quantity, confidence, reason, timestamp
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.symbol)
        .bind(record.kind.as_str())
        .bind(record.side.as_str())
        .bind(record.profit_pct)
        .bind(record.entry_price.to_string())
        .bind(record.exit_price.map(|p| p.to_string()))
        .bind(record.quantity.to_string())
        .bind(record.confidence)
        .bind(&record.reason)
        .bind(record.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to append trade record")?;

        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query_as::<_, StoredTradeRecord>(
            "SELECT * FROM trade_records ORDER BY id DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch trade records")?;

        into_records(rows)
    }

    async fn recent_exits(&self, limit: usize) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query_as::<_, StoredTradeRecord>(
            "SELECT * FROM trade_records WHERE kind = 'exit' ORDER BY id DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch closed trades")?;

        into_records(rows)
    }

    async fn trim(&self, keep: usize) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM trade_records
            WHERE id NOT IN (SELECT id FROM trade_records ORDER BY id DESC LIMIT ?)
            "#,
        )
        .bind(keep as i64)
        .execute(&self.pool)
        .await
        .context("Failed to trim trade records")?;

        Ok(result.rows_affected())
    }
}

/// Trade log kept in process memory.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryTradeLog {
    records: std::sync::Mutex<Vec<TradeRecord>>,
}

#[cfg(test)]
impl MemoryTradeLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<TradeRecord>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> Vec<TradeRecord> {
        self.lock().clone()
    }
}

#[cfg(test)]
fn tail<'a>(records: impl DoubleEndedIterator<Item = &'a TradeRecord>, limit: usize) -> Vec<TradeRecord> {
    let mut out: Vec<TradeRecord> = records.rev().take(limit).cloned().collect();
    out.reverse();
    out
}

#[cfg(test)]
#[async_trait]
impl TradeLog for MemoryTradeLog {
    async fn append(&self, record: &TradeRecord) -> Result<()> {
        self.lock().push(record.clone());
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<TradeRecord>> {
        Ok(tail(self.lock().iter(), limit))
    }

    async fn recent_exits(&self, limit: usize) -> Result<Vec<TradeRecord>> {
        Ok(tail(self.lock().iter().filter(|r| r.is_exit()), limit))
    }

    async fn trim(&self, keep: usize) -> Result<u64> {
        let mut records = self.lock();
        let excess = records.len().saturating_sub(keep);
        records.drain(..excess);
        Ok(excess as u64)
    }
}
