// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process cache backend.

use super::clock::{Clock, SystemClock};
use super::store::CacheStore;
use crate::error::Result;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

struct StringEntry {
    value: String,
    expires_at: Option<i64>,
}

#[derive(Default)]
struct SortedSet {
    scores: HashMap<String, i64>,
    ordered: BTreeSet<(i64, String)>,
}

impl SortedSet {
    fn insert(&mut self, member: &str, score: i64) {
        if let Some(old) = self.scores.insert(member.to_string(), score) {
            self.ordered.remove(&(old, member.to_string()));
        }
        self.ordered.insert((score, member.to_string()));
    }

    fn remove_range(&mut self, min: i64, max: i64) -> usize {
        let doomed: Vec<(i64, String)> = self
            .ordered
            .range((min, String::new())..)
            .take_while(|(score, _)| *score <= max)
            .cloned()
            .collect();
        for entry in &doomed {
            self.ordered.remove(entry);
            self.scores.remove(&entry.1);
        }
        doomed.len()
    }
}

#[derive(Default)]
struct Inner {
    strings: HashMap<String, StringEntry>,
    zsets: HashMap<String, SortedSet>,
}

/// Cache backend held in process memory.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Expiry is judged against `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            clock,
        }
    }

    fn is_live(entry: &StringEntry, now: i64) -> bool {
        entry.expires_at.map_or(true, |at| now < at)
    }
}

impl CacheStore for MemoryStore {
    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|d| self.clock.now_millis() + d.as_millis() as i64);
        self.inner.lock().strings.insert(
            key.to_string(),
            StringEntry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();
        let expired = match inner.strings.get(key) {
            Some(entry) if Self::is_live(entry, now) => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            inner.strings.remove(key);
        }
        Ok(None)
    }

    fn zadd(&self, key: &str, member: &str, score: i64) -> Result<()> {
        self.inner
            .lock()
            .zsets
            .entry(key.to_string())
            .or_default()
            .insert(member, score);
        Ok(())
    }

    fn zrevrange(&self, key: &str, count: usize) -> Result<Vec<(String, i64)>> {
        let inner = self.inner.lock();
        Ok(inner
            .zsets
            .get(key)
            .map(|set| {
                set.ordered
                    .iter()
                    .rev()
                    .take(count)
                    .map(|(score, member)| (member.clone(), *score))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn zrange_by_score(&self, key: &str, min: i64, max: i64) -> Result<Vec<(String, i64)>> {
        let inner = self.inner.lock();
        Ok(inner
            .zsets
            .get(key)
            .map(|set| {
                set.ordered
                    .range((min, String::new())..)
                    .take_while(|(score, _)| *score <= max)
                    .map(|(score, member)| (member.clone(), *score))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn zrem_range_by_score(&self, key: &str, min: i64, max: i64) -> Result<usize> {
        let mut inner = self.inner.lock();
        let Some(set) = inner.zsets.get_mut(key) else {
            return Ok(0);
        };
        let removed = set.remove_range(min, max);
        if set.scores.is_empty() {
            inner.zsets.remove(key);
        }
        Ok(removed)
    }

    fn zcard(&self, key: &str) -> Result<usize> {
        Ok(self
            .inner
            .lock()
            .zsets
            .get(key)
            .map_or(0, |set| set.scores.len()))
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let now = self.clock.now_millis();
        let inner = self.inner.lock();
        let mut keys: Vec<String> = inner
            .strings
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && Self::is_live(e, now))
            .map(|(k, _)| k.clone())
            .chain(
                inner
                    .zsets
                    .keys()
                    .filter(|k| k.starts_with(prefix))
                    .cloned(),
            )
            .collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    fn delete(&self, keys: &[String]) -> Result<usize> {
        let mut inner = self.inner.lock();
        let mut removed = 0;
        for key in keys {
            let had_string = inner.strings.remove(key).is_some();
            let had_set = inner.zsets.remove(key).is_some();
            if had_string || had_set {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;

    #[test]
    fn test_set_get_ttl() {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = MemoryStore::with_clock(clock.clone());

        store.set("a", "1", None).unwrap();
        store.set("b", "2", Some(Duration::from_secs(5))).unwrap();
        assert_eq!(store.get("b").unwrap().as_deref(), Some("2"));

        clock.advance(5_000);
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));
        assert_eq!(store.get("b").unwrap(), None);
        assert_eq!(store.keys_with_prefix("").unwrap(), vec!["a"]);
    }

    #[test]
    fn test_zset_member_uniqueness_and_order() {
        let store = MemoryStore::new();
        store.zadd("z", "x", 30).unwrap();
        store.zadd("z", "y", 10).unwrap();
        store.zadd("z", "w", 20).unwrap();
        // re-adding a member moves it instead of duplicating it
        store.zadd("z", "y", 40).unwrap();

        assert_eq!(store.zcard("z").unwrap(), 3);
        let top: Vec<_> = store
            .zrevrange("z", 2)
            .unwrap()
            .into_iter()
            .map(|(m, _)| m)
            .collect();
        assert_eq!(top, vec!["y", "x"]);
        assert_eq!(
            store.zrange_by_score("z", 20, 30).unwrap(),
            vec![("w".to_string(), 20), ("x".to_string(), 30)]
        );
    }

    #[test]
    fn test_zrem_range_and_delete() {
        let store = MemoryStore::new();
        for (m, s) in [("a", -5), ("b", 0), ("c", 5), ("d", 10)] {
            store.zadd("z", m, s).unwrap();
        }
        assert_eq!(store.zrem_range_by_score("z", i64::MIN, 5).unwrap(), 3);
        assert_eq!(store.zrevrange("z", 10).unwrap(), vec![("d".to_string(), 10)]);

        store.set("dev:1:a", "v", None).unwrap();
        assert_eq!(store.keys_with_prefix("dev:1:").unwrap(), vec!["dev:1:a"]);
        let all = vec!["z".to_string(), "dev:1:a".to_string(), "missing".to_string()];
        assert_eq!(store.delete(&all).unwrap(), 2);
        assert_eq!(store.zcard("z").unwrap(), 0);
    }
}
