// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SQLite cache backend
//!
//! Keeps the cache across restarts.
//!
//! Thread-safe via internal Mutex (SQLite Connection is not Sync).
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE kv (
//!     key TEXT PRIMARY KEY,
//!     value TEXT NOT NULL,
//!     expires_at INTEGER
//! );
//! CREATE TABLE zset (
//!     key TEXT NOT NULL,
//!     member TEXT NOT NULL,
//!     score INTEGER NOT NULL,
//!     PRIMARY KEY (key, member)
//! );
//! CREATE INDEX idx_zset_score ON zset(key, score);
//! ```

use super::clock::{Clock, SystemClock};
use super::store::CacheStore;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Cache backend stored in a SQLite database.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

fn unavailable(e: rusqlite::Error) -> Error {
    Error::CacheUnavailable(e.to_string())
}

impl SqliteStore {
    /// Open (or create) a file-based database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|e| {
            Error::CacheUnavailable(format!(
                "Failed to open SQLite database at {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::with_connection(conn, Arc::new(SystemClock))
    }

    /// In-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        Self::open_in_memory_with_clock(Arc::new(SystemClock))
    }

    pub fn open_in_memory_with_clock(clock: Arc<dyn Clock>) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(unavailable)?;
        Self::with_connection(conn, clock)
    }

    fn with_connection(conn: Connection, clock: Arc<dyn Clock>) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
            clock,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at INTEGER
            );
            CREATE TABLE IF NOT EXISTS zset (
                key TEXT NOT NULL,
                member TEXT NOT NULL,
                score INTEGER NOT NULL,
                PRIMARY KEY (key, member)
            );
            CREATE INDEX IF NOT EXISTS idx_zset_score ON zset(key, score);",
        )
        .map_err(unavailable)
    }

    fn rows(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<(String, i64)>> {
        let mut stmt = conn.prepare(sql).map_err(unavailable)?;
        let rows = stmt
            .query_map(params, |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(unavailable)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(unavailable)?;
        Ok(rows)
    }
}

impl CacheStore for SqliteStore {
    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|d| self.clock.now_millis() + d.as_millis() as i64);
        self.conn
            .lock()
            .execute(
                "INSERT INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
                params![key, value, expires_at],
            )
            .map_err(unavailable)?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let now = self.clock.now_millis();
        let conn = self.conn.lock();
        let row: Option<(String, Option<i64>)> = conn
            .query_row(
                "SELECT value, expires_at FROM kv WHERE key = ?1",
                [key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(unavailable)?;

        match row {
            Some((_, Some(at))) if at <= now => {
                conn.execute("DELETE FROM kv WHERE key = ?1", [key])
                    .map_err(unavailable)?;
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value)),
            None => Ok(None),
        }
    }

    fn zadd(&self, key: &str, member: &str, score: i64) -> Result<()> {
        self.conn
            .lock()
            .execute(
                "INSERT INTO zset (key, member, score) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key, member) DO UPDATE SET score = excluded.score",
                params![key, member, score],
            )
            .map_err(unavailable)?;
        Ok(())
    }

    fn zrevrange(&self, key: &str, count: usize) -> Result<Vec<(String, i64)>> {
        let conn = self.conn.lock();
        Self::rows(
            &conn,
            "SELECT member, score FROM zset WHERE key = ?1
             ORDER BY score DESC, member DESC LIMIT ?2",
            params![key, count as i64],
        )
    }

    fn zrange_by_score(&self, key: &str, min: i64, max: i64) -> Result<Vec<(String, i64)>> {
        let conn = self.conn.lock();
        Self::rows(
            &conn,
            "SELECT member, score FROM zset WHERE key = ?1 AND score BETWEEN ?2 AND ?3
             ORDER BY score ASC, member ASC",
            params![key, min, max],
        )
    }

    fn zrem_range_by_score(&self, key: &str, min: i64, max: i64) -> Result<usize> {
        self.conn
            .lock()
            .execute(
                "DELETE FROM zset WHERE key = ?1 AND score BETWEEN ?2 AND ?3",
                params![key, min, max],
            )
            .map_err(unavailable)
    }

    fn zcard(&self, key: &str) -> Result<usize> {
        let count: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM zset WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .map_err(unavailable)?;
        Ok(count as usize)
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let now = self.clock.now_millis();
        let conn = self.conn.lock();
        // substr comparison avoids LIKE wildcards inside device ids
        let mut stmt = conn
            .prepare(
                "SELECT key FROM kv
                   WHERE substr(key, 1, length(?1)) = ?1
                     AND (expires_at IS NULL OR expires_at > ?2)
                 UNION
                 SELECT DISTINCT key FROM zset WHERE substr(key, 1, length(?1)) = ?1
                 ORDER BY 1",
            )
            .map_err(unavailable)?;
        let keys = stmt
            .query_map(params![prefix, now], |row| row.get(0))
            .map_err(unavailable)?
            .collect::<rusqlite::Result<Vec<String>>>()
            .map_err(unavailable)?;
        Ok(keys)
    }

    fn delete(&self, keys: &[String]) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(unavailable)?;
        let mut removed = 0;
        for key in keys {
            let strings = tx
                .execute("DELETE FROM kv WHERE key = ?1", [key])
                .map_err(unavailable)?;
            let members = tx
                .execute("DELETE FROM zset WHERE key = ?1", [key])
                .map_err(unavailable)?;
            if strings + members > 0 {
                removed += 1;
            }
        }
        tx.commit().map_err(unavailable)?;
        Ok(removed)
    }
}
