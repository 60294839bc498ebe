// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Unified error taxonomy with stable error codes for the Chainborn license
//! validator.
//!
//! Every fallible operation across `chainborn-*` crates returns a
//! [`ChainbornError`]: a machine-readable [`ErrorCode`], a human-readable
//! message, an optional cause, and a small string→string context map used
//! for structured logging (`product_id`, `cache_key`, and similar). Build
//! one with the fluent [`ChainbornError::new`] constructor.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Envelope/policy shape violations that should never happen with a
    /// well-formed producer.
    Contract,
    /// Proof envelope resolution and structural validation.
    Envelope,
    /// Policy document resolution and parsing.
    Policy,
    /// Binding collection and comparison.
    Binding,
    /// Cryptographic verification.
    Crypto,
    /// Validation cache storage.
    Cache,
    /// Validator runtime configuration.
    Config,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Contract => "contract",
            Self::Envelope => "envelope",
            Self::Policy => "policy",
            Self::Binding => "binding",
            Self::Crypto => "crypto",
            Self::Cache => "cache",
            Self::Config => "config",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serializes to a `SCREAMING_SNAKE_CASE` string guaranteed not
/// to change across patch releases; [`ErrorCode::code`] gives the short
/// `CB-XX-###` form used in logs and error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // -- Contract --
    /// The envelope is structurally invalid (missing/malformed field).
    EnvelopeStructureInvalid,
    /// The policy document is structurally invalid.
    PolicyStructureInvalid,
    /// The envelope or policy schema version is unsupported (major mismatch).
    SchemaVersionUnsupported,

    // -- Envelope --
    /// No configured source produced a proof envelope.
    EnvelopeSourceMissing,
    /// A byte field failed to decode as base64.
    EnvelopeBase64Invalid,
    /// The envelope file named by a source could not be found.
    EnvelopeFileNotFound,
    /// The envelope source content is not valid JSON.
    EnvelopeJsonInvalid,

    // -- Policy --
    /// No policy document exists for the requested product.
    PolicyNotFound,
    /// The policy document exists but failed to parse.
    PolicyParseFailed,
    /// The requested product id attempts to escape the policy directory.
    PolicyPathTraversal,

    // -- Binding --
    /// Binding data was required but none was supplied or collected.
    BindingDataMissing,
    /// A required binding field was absent from binding data or public inputs.
    BindingFieldMissing,
    /// Binding data and public inputs disagree.
    BindingMismatch,

    // -- Crypto --
    /// The verifier backend rejected the proof.
    CryptoVerifyFailed,
    /// The verifier backend could not be reached or crashed.
    CryptoBackendUnavailable,

    // -- Cache --
    /// A cached entry's expiry exceeds the permitted bound.
    CacheInvariantViolation,
    /// Reading or writing the cache directory failed.
    CacheIoError,
    /// A cache entry exists but is not a valid persisted record.
    CacheCorrupt,

    // -- Config --
    /// The configuration file named by a path could not be found.
    ConfigFileNotFound,
    /// The configuration file failed to parse.
    ConfigParseFailed,
    /// The configuration failed semantic validation.
    ConfigValidationFailed,

    // -- Internal --
    /// An unexpected internal error occurred.
    InternalError,
}

impl ErrorCode {
    /// Broad category this code belongs to.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::EnvelopeStructureInvalid
            | Self::PolicyStructureInvalid
            | Self::SchemaVersionUnsupported => ErrorCategory::Contract,

            Self::EnvelopeSourceMissing
            | Self::EnvelopeBase64Invalid
            | Self::EnvelopeFileNotFound
            | Self::EnvelopeJsonInvalid => ErrorCategory::Envelope,

            Self::PolicyNotFound | Self::PolicyParseFailed | Self::PolicyPathTraversal => {
                ErrorCategory::Policy
            }

            Self::BindingDataMissing | Self::BindingFieldMissing | Self::BindingMismatch => {
                ErrorCategory::Binding
            }

            Self::CryptoVerifyFailed | Self::CryptoBackendUnavailable => ErrorCategory::Crypto,

            Self::CacheInvariantViolation | Self::CacheIoError | Self::CacheCorrupt => {
                ErrorCategory::Cache
            }

            Self::ConfigFileNotFound
            | Self::ConfigParseFailed
            | Self::ConfigValidationFailed => ErrorCategory::Config,

            Self::InternalError => ErrorCategory::Internal,
        }
    }

    /// Stable short code string, e.g. `"CB-EN-002"`.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::EnvelopeStructureInvalid => "CB-CT-001",
            Self::PolicyStructureInvalid => "CB-CT-002",
            Self::SchemaVersionUnsupported => "CB-CT-003",

            Self::EnvelopeSourceMissing => "CB-EN-001",
            Self::EnvelopeBase64Invalid => "CB-EN-002",
            Self::EnvelopeFileNotFound => "CB-EN-003",
            Self::EnvelopeJsonInvalid => "CB-EN-004",

            Self::PolicyNotFound => "CB-PL-001",
            Self::PolicyParseFailed => "CB-PL-002",
            Self::PolicyPathTraversal => "CB-PL-003",

            Self::BindingDataMissing => "CB-BD-001",
            Self::BindingFieldMissing => "CB-BD-002",
            Self::BindingMismatch => "CB-BD-003",

            Self::CryptoVerifyFailed => "CB-CR-001",
            Self::CryptoBackendUnavailable => "CB-CR-002",

            Self::CacheInvariantViolation => "CB-CH-001",
            Self::CacheIoError => "CB-CH-002",
            Self::CacheCorrupt => "CB-CH-003",

            Self::ConfigFileNotFound => "CB-CF-001",
            Self::ConfigParseFailed => "CB-CF-002",
            Self::ConfigValidationFailed => "CB-CF-003",

            Self::InternalError => "CB-IN-001",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// ---------------------------------------------------------------------------
// ChainbornError
// ---------------------------------------------------------------------------

/// A structured error carrying a stable [`ErrorCode`], a message, optional
/// context for logging, and an optional cause.
#[derive(Debug)]
pub struct ChainbornError {
    code: ErrorCode,
    message: String,
    context: BTreeMap<String, String>,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl ChainbornError {
    /// Start building an error with the given code and message.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: BTreeMap::new(),
            source: None,
        }
    }

    /// Attach a key-value pair of context, e.g. `product_id`.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Attach an underlying cause.
    #[must_use]
    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// The stable error code.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// The broad category for this error.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// The context map attached to this error.
    #[must_use]
    pub fn context(&self) -> &BTreeMap<String, String> {
        &self.context
    }
}

impl fmt::Display for ChainbornError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.code(), self.message)?;
        if !self.context.is_empty() {
            write!(f, " (")?;
            for (i, (k, v)) in self.context.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{k}={v}")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl std::error::Error for ChainbornError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}
