//! Append-only prediction audit log on SQLite

use crate::config::AuditConfig;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS prediction_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    model_version TEXT NOT NULL,
    latency_ms REAL NOT NULL,
    inputs TEXT NOT NULL,
    outputs TEXT NOT NULL,
    status_code INTEGER NOT NULL
)";

/// One scoring call as recorded in the audit store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub model_version: String,
    pub latency_ms: f64,
    pub inputs: Value,
    pub outputs: Value,
    pub status_code: u16,
}

impl AuditEntry {
    pub fn new(
        model_version: impl Into<String>,
        latency_ms: f64,
        inputs: Value,
        outputs: Value,
        status_code: u16,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            model_version: model_version.into(),
            latency_ms,
            inputs,
            outputs,
            status_code,
        }
    }
}

/// Stored entry with its row id
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    pub id: i64,
    #[serde(flatten)]
    pub entry: AuditEntry,
}

/// Audit store with a background writer.
///
/// [`AuditLog::record`] never waits on the database: entries go through a
/// bounded queue and are dropped with a warning when it is full.
pub struct AuditLog {
    pool: SqlitePool,
    sender: mpsc::Sender<AuditEntry>,
    dropped: AtomicU64,
}

impl AuditLog {
    /// Open the store, create the table and start the writer task
    pub async fn connect(config: &AuditConfig) -> Result<Arc<Self>> {
        let options = SqliteConnectOptions::from_str(&config.database_url)
            .with_context(|| format!("Invalid audit database URL '{}'", config.database_url))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(options)
            .await
            .context("Failed to open audit database")?;

        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .context("Failed to create prediction_logs table")?;

        let (sender, mut receiver) = mpsc::channel::<AuditEntry>(config.queue_capacity.max(1));

        let writer_pool = pool.clone();
        tokio::spawn(async move {
            while let Some(entry) = receiver.recv().await {
                if let Err(e) = insert(&writer_pool, &entry).await {
                    error!(error = %e, status_code = entry.status_code, "Failed to write audit entry");
                }
            }
            debug!("Audit writer stopped");
        });

        info!(database = %config.database_url, "Audit log ready");

        Ok(Arc::new(Self {
            pool,
            sender,
            dropped: AtomicU64::new(0),
        }))
    }

    /// Queue an entry; returns `false` if it was dropped
    pub fn record(&self, entry: AuditEntry) -> bool {
        match self.sender.try_send(entry) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(dropped = dropped, "Audit queue full, entry dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Audit writer stopped, entry dropped");
                false
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Write an entry immediately, bypassing the queue
    pub async fn insert(&self, entry: &AuditEntry) -> Result<i64> {
        insert(&self.pool, entry).await
    }

    /// Newest entries first
    pub async fn recent(&self, limit: u32) -> Result<Vec<AuditRecord>> {
        let rows = sqlx::query(
            "SELECT id, timestamp, model_version, latency_ms, inputs, outputs, status_code
             FROM prediction_logs ORDER BY id DESC LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .context("Failed to read audit entries")?;

        rows.iter()
            .map(|row| -> Result<AuditRecord> {
                let timestamp: String = row.try_get("timestamp")?;
                let inputs: String = row.try_get("inputs")?;
                let outputs: String = row.try_get("outputs")?;
                let status_code: i64 = row.try_get("status_code")?;
                Ok(AuditRecord {
                    id: row.try_get("id")?,
                    entry: AuditEntry {
                        timestamp: DateTime::parse_from_rfc3339(&timestamp)?.with_timezone(&Utc),
                        model_version: row.try_get("model_version")?,
                        latency_ms: row.try_get("latency_ms")?,
                        inputs: serde_json::from_str(&inputs)?,
                        outputs: serde_json::from_str(&outputs)?,
                        status_code: u16::try_from(status_code)?,
                    },
                })
            })
            .collect()
    }
}

async fn insert(pool: &SqlitePool, entry: &AuditEntry) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO prediction_logs (timestamp, model_version, latency_ms, inputs, outputs, status_code)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(entry.timestamp.to_rfc3339())
    .bind(&entry.model_version)
    .bind(entry.latency_ms)
    .bind(entry.inputs.to_string())
    .bind(entry.outputs.to_string())
    .bind(i64::from(entry.status_code))
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}
