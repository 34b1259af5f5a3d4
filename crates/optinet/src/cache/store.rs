// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Key-value and sorted-set storage backend trait.

use crate::error::Result;
use std::time::Duration;

/// Storage backend for the monitoring cache.
///
/// Two kinds of keys live side by side:
/// - string keys, optionally expiring
/// - sorted sets of unique members scored by epoch milliseconds
///
/// Every operation is atomic per key; nothing spans keys.
pub trait CacheStore: Send + Sync {
    /// Set a string key, replacing any previous value and expiry.
    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Value of a string key, `None` when missing or expired.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Values of several string keys, positionally.
    fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        keys.iter().map(|k| self.get(k)).collect()
    }

    /// Add `member` with `score`; an existing member only has its score updated.
    fn zadd(&self, key: &str, member: &str, score: i64) -> Result<()>;

    /// Up to `count` members with the highest scores, highest first.
    fn zrevrange(&self, key: &str, count: usize) -> Result<Vec<(String, i64)>>;

    /// Members with `min <= score <= max`, lowest first.
    fn zrange_by_score(&self, key: &str, min: i64, max: i64) -> Result<Vec<(String, i64)>>;

    /// Remove members with `min <= score <= max`; returns how many went.
    fn zrem_range_by_score(&self, key: &str, min: i64, max: i64) -> Result<usize>;

    /// Number of members in a sorted set.
    fn zcard(&self, key: &str) -> Result<usize>;

    /// All live keys (of either kind) starting with `prefix`, sorted.
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Delete keys of either kind; returns how many existed.
    fn delete(&self, keys: &[String]) -> Result<usize>;
}
