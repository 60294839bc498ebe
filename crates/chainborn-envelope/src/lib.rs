// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Proof envelope loader.
//!
//! [`load`] resolves a [`ProofEnvelope`] from a priority-ordered set of
//! sources — an inline base64 variable, a file pointer variable, or a
//! default path — and structurally validates whatever it finds. The first
//! source present wins; later sources are never consulted.

use base64::Engine as _;
use chainborn_core::{EnvReader, ProofEnvelope, SystemEnv};
use chainborn_error::{ChainbornError, ErrorCode};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable carrying an inline base64-encoded envelope. Highest
/// priority source.
pub const INLINE_PROOF_ENV: &str = "LICENSE_PROOF";
/// Environment variable naming a file containing the envelope JSON. Second
/// priority source.
pub const PROOF_FILE_ENV: &str = "LICENSE_PROOF_FILE";
/// Default path consulted when neither environment source is present.
pub const DEFAULT_PROOF_PATH: &str = "/etc/chainborn/proof.json";

/// A single envelope source, in the priority order they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// `LICENSE_PROOF`.
    Inline,
    /// `LICENSE_PROOF_FILE`.
    FilePointer,
    /// The default path.
    DefaultPath,
}

impl Source {
    fn label(self) -> &'static str {
        match self {
            Self::Inline => INLINE_PROOF_ENV,
            Self::FilePointer => PROOF_FILE_ENV,
            Self::DefaultPath => DEFAULT_PROOF_PATH,
        }
    }
}

/// Loads a [`ProofEnvelope`] from the environment, using the real process
/// environment and filesystem and the compiled-in [`DEFAULT_PROOF_PATH`].
pub fn load() -> Result<ProofEnvelope, ChainbornError> {
    load_with(&SystemEnv, Path::new(DEFAULT_PROOF_PATH))
}

/// Loads a [`ProofEnvelope`], consulting `env` for the two environment
/// sources and `default_path` as the final fallback. Exists so tests (and
/// `chainborn-config`-aware callers) can drive this with a fixed
/// environment and an arbitrary default path instead of the real ones.
pub fn load_with(env: &dyn EnvReader, default_path: &Path) -> Result<ProofEnvelope, ChainbornError> {
    if let Some(inline) = env.var(INLINE_PROOF_ENV) {
        if !inline.trim().is_empty() {
            tracing::info!(source = Source::Inline.label(), "resolved proof envelope");
            return decode_and_parse(&inline, Source::Inline);
        }
    }

    if let Some(path) = env.var(PROOF_FILE_ENV) {
        if !path.trim().is_empty() {
            tracing::info!(source = Source::FilePointer.label(), path, "resolved proof envelope");
            return read_and_parse(Path::new(&path), Source::FilePointer);
        }
    }

    if default_path.exists() {
        tracing::info!(
            source = Source::DefaultPath.label(),
            path = %default_path.display(),
            "resolved proof envelope"
        );
        return read_and_parse(default_path, Source::DefaultPath);
    }

    tracing::warn!(
        checked = ?[Source::Inline.label(), Source::FilePointer.label(), &default_path.display().to_string()],
        "no proof envelope source was available"
    );
    Err(ChainbornError::new(
        ErrorCode::EnvelopeSourceMissing,
        format!(
            "no proof envelope available; checked {}, {}, {}",
            Source::Inline.label(),
            Source::FilePointer.label(),
            default_path.display()
        ),
    ))
}

fn read_and_parse(path: &Path, source: Source) -> Result<ProofEnvelope, ChainbornError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        ChainbornError::new(
            ErrorCode::EnvelopeFileNotFound,
            format!("envelope file not found: {}", path.display()),
        )
        .with_context("path", path.display().to_string())
        .with_context("source", format!("{source:?}"))
        .with_source(e)
    })?;
    parse_json(&content, source)
}

fn decode_and_parse(inline_b64: &str, source: Source) -> Result<ProofEnvelope, ChainbornError> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(inline_b64.trim())
        .map_err(|e| {
            ChainbornError::new(
                ErrorCode::EnvelopeBase64Invalid,
                format!("{} is not valid base64", INLINE_PROOF_ENV),
            )
            .with_context("source", format!("{source:?}"))
            .with_source(e)
        })?;
    let text = String::from_utf8(decoded).map_err(|e| {
        ChainbornError::new(
            ErrorCode::EnvelopeJsonInvalid,
            format!("{} decodes to non-UTF-8 content", INLINE_PROOF_ENV),
        )
        .with_source(e)
    })?;
    parse_json(&text, source)
}

/// Either a bare [`ProofEnvelope`], or the wrapper
/// `{ proof, version, metadata }`. When wrapped, the outer
/// `version`/`metadata` take precedence over the inner envelope's fields of
/// the same name.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EnvelopeShape {
    Wrapped {
        proof: ProofEnvelope,
        #[serde(default)]
        version: Option<String>,
        #[serde(default)]
        metadata: Option<std::collections::BTreeMap<String, String>>,
    },
    Bare(ProofEnvelope),
}

fn parse_json(content: &str, source: Source) -> Result<ProofEnvelope, ChainbornError> {
    let shape: EnvelopeShape = serde_json::from_str(content).map_err(|e| {
        ChainbornError::new(ErrorCode::EnvelopeJsonInvalid, "envelope content is not valid JSON")
            .with_context("source", format!("{source:?}"))
            .with_source(e)
    })?;

    let envelope = match shape {
        EnvelopeShape::Bare(e) => e,
        EnvelopeShape::Wrapped {
            mut proof,
            version,
            metadata,
        } => {
            if let Some(version) = version {
                proof.envelope_version = version;
            }
            if metadata.is_some() {
                proof.metadata = metadata;
            }
            proof
        }
    };

    envelope.validate_structure().map_err(|e| {
        e.with_context("source", format!("{source:?}"))
    })?;

    Ok(envelope)
}

/// Resolve a configured proof file path relative to the process's current
/// working directory, matching how `chainborn-config` treats relative
/// paths. Exposed so callers building their own [`EnvReader`]-driven
/// resolution (e.g. the CLI) don't have to duplicate the rule.
#[must_use]
pub fn resolve_relative(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}
