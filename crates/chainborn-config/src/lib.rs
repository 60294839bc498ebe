// SPDX-License-Identifier: MIT OR Apache-2.0
//! Runtime configuration for the validator itself.
//!
//! [`ChainbornConfig`] is the validator's *own* settings — where to find
//! policy documents, where to keep the validation cache, which proof file to
//! read by default. It is distinct from, and has no awareness of, whatever
//! configuration format the embedding application uses.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use chainborn_error::{ChainbornError, ErrorCode};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the environment variable naming a config file path, consulted
/// when no explicit path is given to [`load_config`].
pub const CONFIG_PATH_ENV: &str = "CHAINBORN_CONFIG";

/// Validator runtime configuration.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChainbornConfig {
    /// Directory containing one `<product_id>.json` policy document per
    /// product.
    pub policy_dir: PathBuf,
    /// Directory the validation cache persists entries under.
    pub cache_dir: PathBuf,
    /// Default proof envelope file path, used when no other source is
    /// configured.
    pub proof_path: PathBuf,
    /// Maximum number of entries the validation cache retains.
    pub max_cache_entries: usize,
}

impl Default for ChainbornConfig {
    fn default() -> Self {
        Self {
            policy_dir: PathBuf::from("/etc/chainborn/policies"),
            cache_dir: PathBuf::from("/var/lib/chainborn/cache"),
            proof_path: PathBuf::from("/etc/chainborn/proof.json"),
            max_cache_entries: 100,
        }
    }
}

/// Load a [`ChainbornConfig`].
///
/// Resolution order: `path`, if given; otherwise the file named by
/// [`CONFIG_PATH_ENV`], if that variable is set and the file exists;
/// otherwise [`ChainbornConfig::default`]. Environment overrides (see
/// [`apply_env_overrides`]) are applied on top in every case, then the
/// result is validated.
pub fn load_config(path: Option<&Path>) -> Result<ChainbornConfig, ChainbornError> {
    let resolved = path
        .map(PathBuf::from)
        .or_else(|| std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from));

    let mut config = match resolved {
        Some(p) if p.exists() => parse_toml(&read_to_string(&p)?)?,
        Some(p) => {
            return Err(ChainbornError::new(
                ErrorCode::ConfigFileNotFound,
                format!("config file not found: {}", p.display()),
            )
            .with_context("path", p.display().to_string()));
        }
        None => ChainbornConfig::default(),
    };

    apply_env_overrides(&mut config);
    validate_config(&config)?;
    Ok(config)
}

fn read_to_string(path: &Path) -> Result<String, ChainbornError> {
    std::fs::read_to_string(path).map_err(|e| {
        ChainbornError::new(
            ErrorCode::ConfigFileNotFound,
            format!("failed to read config file: {}", path.display()),
        )
        .with_context("path", path.display().to_string())
        .with_source(e)
    })
}

/// Parse a TOML document into a [`ChainbornConfig`], filling in defaults for
/// any field left unspecified.
pub fn parse_toml(content: &str) -> Result<ChainbornConfig, ChainbornError> {
    let partial: PartialConfig = toml::from_str(content).map_err(|e| {
        ChainbornError::new(ErrorCode::ConfigParseFailed, "failed to parse config as TOML")
            .with_source(e)
    })?;
    let defaults = ChainbornConfig::default();
    Ok(ChainbornConfig {
        policy_dir: partial.policy_dir.unwrap_or(defaults.policy_dir),
        cache_dir: partial.cache_dir.unwrap_or(defaults.cache_dir),
        proof_path: partial.proof_path.unwrap_or(defaults.proof_path),
        max_cache_entries: partial.max_cache_entries.unwrap_or(defaults.max_cache_entries),
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartialConfig {
    policy_dir: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    proof_path: Option<PathBuf>,
    max_cache_entries: Option<usize>,
}

/// Apply environment variable overrides.
///
/// Recognised variables: `CHAINBORN_POLICY_DIR`, `CHAINBORN_CACHE_DIR`,
/// `CHAINBORN_PROOF_PATH`, `CHAINBORN_MAX_CACHE_ENTRIES`. An override with a
/// value that fails to parse (e.g. a non-numeric `max_cache_entries`) is
/// silently ignored; [`validate_config`] catches the field being left at its
/// prior value only if that value is itself invalid.
pub fn apply_env_overrides(config: &mut ChainbornConfig) {
    if let Ok(val) = std::env::var("CHAINBORN_POLICY_DIR") {
        config.policy_dir = PathBuf::from(val);
    }
    if let Ok(val) = std::env::var("CHAINBORN_CACHE_DIR") {
        config.cache_dir = PathBuf::from(val);
    }
    if let Ok(val) = std::env::var("CHAINBORN_PROOF_PATH") {
        config.proof_path = PathBuf::from(val);
    }
    if let Ok(val) = std::env::var("CHAINBORN_MAX_CACHE_ENTRIES") {
        if let Ok(n) = val.parse::<usize>() {
            config.max_cache_entries = n;
        }
    }
}

/// Validate a loaded configuration. The only hard rule today is that
/// `max_cache_entries` must be nonzero, since a zero-capacity cache can
/// never satisfy the "cache hit returns without re-verifying" property.
pub fn validate_config(config: &ChainbornConfig) -> Result<(), ChainbornError> {
    if config.max_cache_entries == 0 {
        return Err(ChainbornError::new(
            ErrorCode::ConfigValidationFailed,
            "maxCacheEntries must be greater than zero",
        ));
    }
    Ok(())
}
