// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL key-value backend for durable queue persistence.
//!
//! The queue is one serialized value under a single key, so the schema is a
//! plain key-value table:
//! ```sql
//! CREATE TABLE kv_entries (
//!   kv_key VARCHAR(255) PRIMARY KEY,
//!   kv_value LONGTEXT NOT NULL,
//!   updated_at BIGINT NOT NULL
//! )
//! ```
//!
//! SQLite is the expected on-device backend (`sqlite://uploads.db?mode=rwc`);
//! MySQL works through the same `Any` driver.

use async_trait::async_trait;
use sqlx::{AnyPool, Row, any::AnyPoolOptions};
use super::traits::{KvStore, StorageError};
use crate::resilience::retry::{retry, RetryConfig};
use std::sync::Once;
use std::time::Duration;
use tracing::debug;

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

pub struct SqlKvStore {
    pool: AnyPool,
    is_sqlite: bool,
}

impl SqlKvStore {
    /// Connect with startup-mode retry (fails fast if config is wrong).
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        install_drivers();

        let is_sqlite = connection_string.starts_with("sqlite:");

        let pool = retry("sql_connect", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(if is_sqlite { 1 } else { 5 })
                .acquire_timeout(Duration::from_secs(10))
                .connect(connection_string)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        let store = Self { pool, is_sqlite };

        if is_sqlite {
            store.enable_wal_mode().await?;
        }

        store.init_schema().await?;
        debug!(sqlite = is_sqlite, "SQL key-value store ready");
        Ok(store)
    }

    /// SQLite WAL journaling keeps the single queue row crash-safe without
    /// a full fsync on every write.
    async fn enable_wal_mode(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to enable WAL mode: {}", e)))?;

        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to set synchronous mode: {}", e)))?;

        Ok(())
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        let sql = if self.is_sqlite {
            r#"
            CREATE TABLE IF NOT EXISTS kv_entries (
                kv_key TEXT PRIMARY KEY,
                kv_value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#
        } else {
            r#"
            CREATE TABLE IF NOT EXISTS kv_entries (
                kv_key VARCHAR(255) PRIMARY KEY,
                kv_value LONGTEXT NOT NULL,
                updated_at BIGINT NOT NULL
            )
            "#
        };

        retry("sql_init_schema", &RetryConfig::startup(), || async {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl KvStore for SqlKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let row = sqlx::query("SELECT kv_value FROM kv_entries WHERE kv_key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        // SQLite hands TEXT back as String, MySQL LONGTEXT comes back as bytes
        let value = row
            .try_get::<String, _>("kv_value")
            .ok()
            .or_else(|| {
                row.try_get::<Vec<u8>, _>("kv_value")
                    .ok()
                    .and_then(|bytes| String::from_utf8(bytes).ok())
            })
            .ok_or_else(|| StorageError::Corruption {
                key: key.to_string(),
                reason: "value is not valid UTF-8 text".to_string(),
            })?;

        Ok(Some(value))
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let sql = if self.is_sqlite {
            "INSERT INTO kv_entries (kv_key, kv_value, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(kv_key) DO UPDATE SET kv_value = excluded.kv_value, updated_at = excluded.updated_at"
        } else {
            "INSERT INTO kv_entries (kv_key, kv_value, updated_at) VALUES (?, ?, ?) \
             ON DUPLICATE KEY UPDATE kv_value = VALUES(kv_value), updated_at = VALUES(updated_at)"
        };

        sqlx::query(sql)
            .bind(key)
            .bind(value)
            .bind(now_millis())
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM kv_entries WHERE kv_key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }
}
