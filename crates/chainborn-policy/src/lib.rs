// SPDX-License-Identifier: MIT OR Apache-2.0
//! Policy document store.
//!
//! [`PolicyStore`] resolves a per-product [`LicensePolicy`] from a directory
//! of `<product_id>.json` documents and memoizes both positive and negative
//! lookups for the life of the process. Parse and I/O failures are never
//! memoized, so a transient problem (a policy document mid-write, a
//! temporarily unreadable disk) can succeed on a later call.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use chainborn_core::LicensePolicy;
use chainborn_error::{ChainbornError, ErrorCode};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Maximum length, in bytes, of a `product_id` accepted as a lookup key.
pub const MAX_PRODUCT_ID_LEN: usize = 256;

#[derive(Debug, Clone)]
enum PolicyCacheEntry {
    Found(Arc<LicensePolicy>),
    NotFound,
}

/// Process-wide cache of policy documents read from a directory.
///
/// Reads take a short read lock; a miss that requires a disk probe takes a
/// write lock only long enough to insert the freshly-resolved entry. Entries
/// are never removed once inserted — by design the policy map only grows
/// for the life of a process, matching the append-only cache the embedding
/// application's other long-lived maps use.
#[derive(Debug)]
pub struct PolicyStore {
    dir: PathBuf,
    cache: RwLock<HashMap<String, PolicyCacheEntry>>,
}

impl PolicyStore {
    /// Create a store rooted at `dir`. The directory is not required to
    /// exist yet; a missing directory simply makes every lookup a miss.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Root directory this store resolves policy documents under.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Resolve the policy for `product_id`, consulting the memoized map
    /// first. Returns `Ok(None)` when no policy document exists (or an
    /// invalid `product_id` was supplied — a nonexistent product is
    /// indistinguishable from an adversarial one at this layer); returns
    /// `Err` only for a policy document that exists but fails to parse.
    pub fn get_policy(&self, product_id: &str) -> Result<Option<Arc<LicensePolicy>>, ChainbornError> {
        if let Some(entry) = self.cache.read().unwrap().get(product_id) {
            return Ok(match entry {
                PolicyCacheEntry::Found(policy) => Some(Arc::clone(policy)),
                PolicyCacheEntry::NotFound => None,
            });
        }

        let path = match self.resolve_path(product_id) {
            Ok(path) => path,
            Err(_) => {
                self.remember_not_found(product_id);
                return Ok(None);
            }
        };

        if !path.exists() {
            self.remember_not_found(product_id);
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path).map_err(|e| {
            ChainbornError::new(
                ErrorCode::PolicyParseFailed,
                format!("failed to read policy document for '{product_id}'"),
            )
            .with_context("product_id", product_id)
            .with_source(e)
        })?;

        let policy: LicensePolicy = serde_json::from_str(&content).map_err(|e| {
            ChainbornError::new(
                ErrorCode::PolicyParseFailed,
                format!("policy document for '{product_id}' is not valid JSON"),
            )
            .with_context("product_id", product_id)
            .with_source(e)
        })?;

        policy.validate().map_err(|e| {
            e.with_context("product_id", product_id)
        })?;

        if policy.product_id != product_id {
            return Err(ChainbornError::new(
                ErrorCode::PolicyStructureInvalid,
                format!(
                    "policy document filename stem '{product_id}' does not match its productId field '{}'",
                    policy.product_id
                ),
            ));
        }

        let policy = Arc::new(policy);
        self.cache.write().unwrap().insert(
            product_id.to_string(),
            PolicyCacheEntry::Found(Arc::clone(&policy)),
        );
        tracing::info!(product_id, "loaded policy document");
        Ok(Some(policy))
    }

    fn remember_not_found(&self, product_id: &str) {
        self.cache
            .write()
            .unwrap()
            .entry(product_id.to_string())
            .or_insert(PolicyCacheEntry::NotFound);
    }

    /// Build the on-disk path for `product_id`, rejecting anything that
    /// could escape [`Self::dir`].
    fn resolve_path(&self, product_id: &str) -> Result<PathBuf, ChainbornError> {
        if product_id.is_empty() || product_id.len() > MAX_PRODUCT_ID_LEN {
            return Err(ChainbornError::new(
                ErrorCode::PolicyPathTraversal,
                "productId is empty or exceeds the maximum length",
            ));
        }
        if product_id.contains("..") || product_id.contains('/') || product_id.contains('\\') {
            return Err(ChainbornError::new(
                ErrorCode::PolicyPathTraversal,
                format!("productId '{product_id}' contains a path separator or '..'"),
            ));
        }

        let candidate = self.dir.join(format!("{product_id}.json"));

        // Close the symlink-escape gap a pure string check would miss: if the
        // file and the policy directory both exist, their canonical forms
        // must agree on the parent.
        if let (Ok(canonical_dir), Ok(canonical_candidate)) =
            (self.dir.canonicalize(), candidate.canonicalize())
        {
            if canonical_candidate.parent() != Some(canonical_dir.as_path()) {
                return Err(ChainbornError::new(
                    ErrorCode::PolicyPathTraversal,
                    format!("productId '{product_id}' resolves outside the policy directory"),
                ));
            }
        }

        Ok(candidate)
    }
}
