// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Durable, TTL-bounded, LRU-capped validation cache.
//!
//! [`ValidationCache`] persists one JSON file per entry, named by the
//! lowercase hex SHA-256 of the cache key. Writes go through a sibling
//! `.tmp` file and an atomic rename so a crash mid-write never leaves a
//! torn file observable. The cache never fails a request: if its directory
//! can't be created or used, it quietly disables itself — every `get`
//! becomes a miss, every `set`/`invalidate` a no-op.

use chainborn_core::{cache_file_name, ValidationResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Default cap on the number of entries retained.
pub const DEFAULT_MAX_ENTRIES: usize = 100;

#[derive(Debug, Clone)]
struct EntryMeta {
    file_name: String,
    #[allow(dead_code)] // kept for parity with the documented metadata shadow; not read today
    created_at: DateTime<Utc>,
    last_accessed_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// Mirror of [`ValidationResult`] that also derives [`Deserialize`], so the
/// public result type can stay "immutable and one-way" while the cache
/// still round-trips it to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedValidationResult {
    is_valid: bool,
    errors: Vec<String>,
    validated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_key: Option<String>,
}

impl From<&ValidationResult> for PersistedValidationResult {
    fn from(r: &ValidationResult) -> Self {
        Self {
            is_valid: r.is_valid,
            errors: r.errors.clone(),
            validated_at: r.validated_at,
            expires_at: r.expires_at,
            cache_key: r.cache_key.clone(),
        }
    }
}

impl From<PersistedValidationResult> for ValidationResult {
    fn from(p: PersistedValidationResult) -> Self {
        Self {
            is_valid: p.is_valid,
            errors: p.errors,
            validated_at: p.validated_at,
            expires_at: p.expires_at,
            cache_key: p.cache_key,
        }
    }
}

/// The on-disk record for one cache entry: `{ "result": {...}, "expiresAt": ".." }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedResult {
    result: PersistedValidationResult,
    expires_at: DateTime<Utc>,
}

/// Durable validation result cache.
///
/// One process-wide instance is expected; all methods are
/// safe to call concurrently. The internal mutex guards only the in-memory
/// index — metadata bookkeeping and eviction decisions — never the
/// surrounding file I/O.
#[derive(Debug)]
pub struct ValidationCache {
    dir: Option<PathBuf>,
    max_entries: usize,
    index: Mutex<BTreeMap<String, EntryMeta>>,
}

impl ValidationCache {
    /// Open (or create) the cache directory and load its current contents.
    ///
    /// Performs a startup scan: deletes stray `.tmp`
    /// files, drops (and deletes) expired or corrupt entries, and populates
    /// the in-memory index keyed by the cache key recovered from each
    /// entry's persisted `cacheKey` field — not from the filename, which is
    /// only that key's hash. If the directory cannot be created or listed,
    /// the cache degrades: every subsequent operation is a no-op/miss.
    pub async fn open(dir: impl Into<PathBuf>, max_entries: usize) -> Self {
        let dir = dir.into();

        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            tracing::error!(
                error = %e,
                dir = %dir.display(),
                "failed to create validation cache directory; cache is running in degraded mode"
            );
            return Self {
                dir: None,
                max_entries,
                index: Mutex::new(BTreeMap::new()),
            };
        }

        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    dir = %dir.display(),
                    "failed to list validation cache directory; cache is running in degraded mode"
                );
                return Self {
                    dir: None,
                    max_entries,
                    index: Mutex::new(BTreeMap::new()),
                };
            }
        };

        let mut index = BTreeMap::new();
        let now = Utc::now();

        loop {
            let entry = match read_dir.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(_) => break,
            };
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };

            if name.ends_with(".tmp") {
                let _ = tokio::fs::remove_file(&path).await;
                continue;
            }
            if !name.ends_with(".json") {
                continue;
            }

            let content = match tokio::fs::read_to_string(&path).await {
                Ok(c) => c,
                Err(_) => continue,
            };
            let persisted: PersistedResult = match serde_json::from_str(&content) {
                Ok(p) => p,
                Err(_) => {
                    let _ = tokio::fs::remove_file(&path).await;
                    continue;
                }
            };
            if persisted.expires_at <= now {
                let _ = tokio::fs::remove_file(&path).await;
                continue;
            }
            let Some(cache_key) = persisted.result.cache_key.clone() else {
                let _ = tokio::fs::remove_file(&path).await;
                continue;
            };

            index.insert(
                cache_key,
                EntryMeta {
                    file_name: name,
                    created_at: persisted.result.validated_at,
                    last_accessed_at: now,
                    expires_at: persisted.expires_at,
                },
            );
        }

        tracing::info!(entries = index.len(), dir = %dir.display(), "validation cache loaded from disk");
        Self {
            dir: Some(dir),
            max_entries,
            index: Mutex::new(index),
        }
    }

    /// Whether the cache is running in degraded (always-miss) mode.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.dir.is_none()
    }

    /// Current number of entries held in the index.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.lock().unwrap().len()
    }

    /// Whether the index currently holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured maximum entry count.
    #[must_use]
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Fetch a cached result. Returns `None` when absent, expired, or
    /// structurally corrupt; a hit bumps the entry's `last_accessed_at`.
    pub async fn get(&self, key: &str) -> Option<ValidationResult> {
        let dir = self.dir.as_ref()?.clone();

        let (file_name, indexed_expiry) = {
            let index = self.index.lock().unwrap();
            let meta = index.get(key)?;
            (meta.file_name.clone(), meta.expires_at)
        };

        let now = Utc::now();
        if indexed_expiry <= now {
            self.remove_entry(key, &file_name, &dir).await;
            return None;
        }

        let path = dir.join(&file_name);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(_) => {
                self.remove_entry(key, &file_name, &dir).await;
                return None;
            }
        };
        let persisted: PersistedResult = match serde_json::from_str(&content) {
            Ok(p) => p,
            Err(_) => {
                self.remove_entry(key, &file_name, &dir).await;
                return None;
            }
        };
        if persisted.expires_at <= now {
            self.remove_entry(key, &file_name, &dir).await;
            return None;
        }

        {
            let mut index = self.index.lock().unwrap();
            if let Some(meta) = index.get_mut(key) {
                meta.last_accessed_at = now;
            }
        }

        Some(persisted.result.into())
    }

    /// Store `result` under `key` with the given `ttl`, possibly evicting
    /// the least-recently-accessed entry if this is a new key and the cache
    /// is already at capacity. Updating an existing key never evicts.
    pub async fn set(&self, key: &str, result: &ValidationResult, ttl: chrono::Duration) {
        let Some(dir) = self.dir.clone() else {
            return;
        };

        let now = Utc::now();
        let expires_at = now + ttl;
        let file_name = cache_file_name(key);
        let persisted = PersistedResult {
            result: PersistedValidationResult::from(result),
            expires_at,
        };
        let content = match serde_json::to_string(&persisted) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize cache entry; write skipped");
                return;
            }
        };

        let tmp_path = dir.join(format!("{file_name}.tmp"));
        let dest_path = dir.join(&file_name);

        if let Err(e) = tokio::fs::write(&tmp_path, content.as_bytes()).await {
            tracing::error!(error = %e, "failed to write cache entry; degrading to miss for this write");
            return;
        }
        if let Err(e) = tokio::fs::rename(&tmp_path, &dest_path).await {
            tracing::error!(error = %e, "failed to rename cache entry into place");
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return;
        }

        let evicted_key = {
            let mut index = self.index.lock().unwrap();
            let is_new = !index.contains_key(key);
            let evicted = if is_new && index.len() >= self.max_entries {
                oldest_key(&index)
            } else {
                None
            };
            if let Some(evicted) = &evicted {
                index.remove(evicted);
            }
            index.insert(
                key.to_string(),
                EntryMeta {
                    file_name: file_name.clone(),
                    created_at: now,
                    last_accessed_at: now,
                    expires_at,
                },
            );
            evicted
        };

        if let Some(evicted_key) = evicted_key {
            let evicted_file = dir.join(cache_file_name(&evicted_key));
            let _ = tokio::fs::remove_file(evicted_file).await;
            tracing::info!(evicted_key, "evicted least-recently-used cache entry at capacity");
        }
    }

    /// Remove any entry for `key`, on disk and in the index.
    pub async fn invalidate(&self, key: &str) {
        let Some(dir) = self.dir.clone() else {
            return;
        };
        let file_name = {
            let mut index = self.index.lock().unwrap();
            index.remove(key).map(|m| m.file_name)
        };
        let file_name = file_name.unwrap_or_else(|| cache_file_name(key));
        let _ = tokio::fs::remove_file(dir.join(file_name)).await;
    }

    async fn remove_entry(&self, key: &str, file_name: &str, dir: &Path) {
        {
            let mut index = self.index.lock().unwrap();
            index.remove(key);
        }
        let _ = tokio::fs::remove_file(dir.join(file_name)).await;
    }
}

fn oldest_key(index: &BTreeMap<String, EntryMeta>) -> Option<String> {
    index
        .iter()
        .min_by_key(|(_, meta)| meta.last_accessed_at)
        .map(|(k, _)| k.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainborn_core::{cache_file_name, ValidationResult};
    use chrono::Duration;

    fn result(cache_key: &str) -> ValidationResult {
        let now = Utc::now();
        ValidationResult::valid(now, now + Duration::seconds(600), cache_key)
    }

    #[tokio::test]
    async fn set_then_get_round_trips_before_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ValidationCache::open(dir.path(), DEFAULT_MAX_ENTRIES).await;
        let r = result("k1");
        cache.set("k1", &r, Duration::seconds(60)).await;
        let fetched = cache.get("k1").await.unwrap();
        assert_eq!(fetched.cache_key, r.cache_key);
        assert_eq!(fetched.is_valid, r.is_valid);
    }

    #[tokio::test]
    async fn invalidate_then_get_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ValidationCache::open(dir.path(), DEFAULT_MAX_ENTRIES).await;
        cache.set("k1", &result("k1"), Duration::seconds(60)).await;
        cache.invalidate("k1").await;
        assert!(cache.get("k1").await.is_none());
    }

    #[tokio::test]
    async fn expired_entry_is_a_miss_and_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ValidationCache::open(dir.path(), DEFAULT_MAX_ENTRIES).await;
        cache.set("k1", &result("k1"), Duration::seconds(-1)).await;
        assert!(cache.get("k1").await.is_none());
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn capacity_evicts_exactly_one_least_recently_accessed_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ValidationCache::open(dir.path(), 2).await;
        cache.set("k1", &result("k1"), Duration::seconds(600)).await;
        cache.set("k2", &result("k2"), Duration::seconds(600)).await;
        // touch k1 so it is more recently accessed than k2
        cache.get("k1").await;
        cache.set("k3", &result("k3"), Duration::seconds(600)).await;

        assert_eq!(cache.len(), 2);
        assert!(cache.get("k1").await.is_some());
        assert!(cache.get("k2").await.is_none());
        assert!(cache.get("k3").await.is_some());
    }

    #[tokio::test]
    async fn updating_an_existing_key_does_not_evict() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ValidationCache::open(dir.path(), 1).await;
        cache.set("k1", &result("k1"), Duration::seconds(600)).await;
        cache.set("k1", &result("k1"), Duration::seconds(600)).await;
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn corrupt_entry_on_disk_is_treated_as_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ValidationCache::open(dir.path(), DEFAULT_MAX_ENTRIES).await;
        cache.set("k1", &result("k1"), Duration::seconds(600)).await;

        let path = dir.path().join(cache_file_name("k1"));
        std::fs::write(&path, "{ not json").unwrap();

        assert!(cache.get("k1").await.is_none());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn filename_is_sha256_hex_of_key_plus_json() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ValidationCache::open(dir.path(), DEFAULT_MAX_ENTRIES).await;
        cache.set("my-cache-key", &result("my-cache-key"), Duration::seconds(600)).await;
        let expected = dir.path().join(cache_file_name("my-cache-key"));
        assert!(expected.exists());
    }

    #[tokio::test]
    async fn startup_scan_drops_expired_entries_and_stray_tmp_files() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = ValidationCache::open(dir.path(), DEFAULT_MAX_ENTRIES).await;
            cache.set("fresh", &result("fresh"), Duration::seconds(600)).await;
            cache.set("stale", &result("stale"), Duration::seconds(-1)).await;
        }
        std::fs::write(dir.path().join("leftover.json.tmp"), "garbage").unwrap();

        let reopened = ValidationCache::open(dir.path(), DEFAULT_MAX_ENTRIES).await;
        assert_eq!(reopened.len(), 1);
        assert!(reopened.get("fresh").await.is_some());
        assert!(!dir.path().join("leftover.json.tmp").exists());
    }

    #[tokio::test]
    async fn degraded_mode_when_directory_cannot_be_created() {
        let dir = tempfile::tempdir().unwrap();
        let file_in_the_way = dir.path().join("not-a-directory");
        std::fs::write(&file_in_the_way, "occupied").unwrap();
        let blocked_path = file_in_the_way.join("cache");

        let cache = ValidationCache::open(blocked_path, DEFAULT_MAX_ENTRIES).await;
        assert!(cache.is_degraded());
        cache.set("k1", &result("k1"), Duration::seconds(600)).await;
        assert!(cache.get("k1").await.is_none());
        cache.invalidate("k1").await;
    }

    #[test]
    fn cache_never_exceeds_max_entries_property() {
        use proptest::prelude::*;
        let runtime = tokio::runtime::Runtime::new().unwrap();
        proptest!(ProptestConfig::with_cases(20), |(n_ops in 1usize..40, cap in 1usize..6)| {
            let max_len = runtime.block_on(async {
                let dir = tempfile::tempdir().unwrap();
                let cache = ValidationCache::open(dir.path(), cap).await;
                let mut max_len = 0;
                for i in 0..n_ops {
                    let key = format!("k{i}");
                    cache.set(&key, &result(&key), Duration::seconds(600)).await;
                    max_len = max_len.max(cache.len());
                }
                max_len
            });
            prop_assert!(max_len <= cap);
        });
    }
}
