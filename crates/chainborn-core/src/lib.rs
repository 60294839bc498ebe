// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! chainborn-core
//!
//! The stable data model for the Chainborn offline license validator.
//! If you only take one dependency from this workspace, take this one.

use base64::Engine as _;
use chainborn_error::{ChainbornError, ErrorCode};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Envelope schema version this crate was built against.
pub const ENVELOPE_VERSION: &str = "1.0";

/// Policy schema version this crate was built against.
pub const POLICY_SCHEMA_VERSION: &str = "1.0.0";

/// Known license tiers, lowest to highest. Only tiers in this list can be
/// compared; an unrecognized tier never satisfies a `required_tier` check.
pub const TIER_ORDER: &[&str] = &["free", "standard", "professional", "enterprise"];

/// Returns the rank of `tier` in [`TIER_ORDER`], or `None` if unrecognized.
#[must_use]
pub fn tier_rank(tier: &str) -> Option<usize> {
    TIER_ORDER.iter().position(|t| *t == tier)
}

/// Returns `true` when `present` is known and ranks at or above `required`.
#[must_use]
pub fn tier_satisfies(required: &str, present: &str) -> bool {
    match (tier_rank(required), tier_rank(present)) {
        (Some(req), Some(have)) => have >= req,
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Proof envelope
// ---------------------------------------------------------------------------

/// Anti-replay challenge carried by a [`ProofEnvelope`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    /// Unique nonce binding this proof to a single validation request.
    pub nonce: String,
    /// When the challenge was issued.
    pub issued_at: DateTime<Utc>,
    /// When the challenge expires.
    pub expires_at: DateTime<Utc>,
}

impl Challenge {
    /// Validates the structural invariant `issued_at <= expires_at` and that
    /// `nonce` is non-empty.
    pub fn validate(&self) -> Result<(), ChainbornError> {
        if self.nonce.trim().is_empty() {
            return Err(ChainbornError::new(
                ErrorCode::EnvelopeStructureInvalid,
                "challenge.nonce must not be empty",
            ));
        }
        if self.issued_at > self.expires_at {
            return Err(ChainbornError::new(
                ErrorCode::EnvelopeStructureInvalid,
                "challenge.issued_at must not be after challenge.expires_at",
            ));
        }
        Ok(())
    }
}

/// Portable, serializable container for a zero-knowledge proof and the
/// metadata needed to verify and bind it.
///
/// All byte fields are base64-encoded on the wire; use
/// [`ProofEnvelope::proof_bytes`] / [`ProofEnvelope::verification_key_bytes`]
/// to get at the decoded octets.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProofEnvelope {
    /// Base64-encoded opaque ZK proof.
    pub proof_bytes: String,
    /// Base64-encoded verification parameters for the circuit.
    pub verification_key_bytes: String,
    /// Identifies which product policy this proof pertains to.
    pub product_id: String,
    /// Anti-replay challenge.
    pub challenge: Challenge,
    /// Optional free-form metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
    /// Envelope schema version. Named `version` on the wire per `spec.md`
    /// §6; `envelopeVersion` is still accepted as an alias for payloads
    /// produced before the field was renamed to match the documented shape.
    #[serde(rename = "version", alias = "envelopeVersion", default = "default_envelope_version")]
    pub envelope_version: String,
}

fn default_envelope_version() -> String {
    ENVELOPE_VERSION.to_string()
}

impl ProofEnvelope {
    /// Decodes [`Self::proof_bytes`] from base64.
    pub fn proof_bytes(&self) -> Result<Vec<u8>, ChainbornError> {
        decode_b64(&self.proof_bytes, "proofBytes")
    }

    /// Decodes [`Self::verification_key_bytes`] from base64.
    pub fn verification_key_bytes(&self) -> Result<Vec<u8>, ChainbornError> {
        decode_b64(&self.verification_key_bytes, "verificationKeyBytes")
    }

    /// Full structural validation: base64 fields decode, `product_id` is
    /// non-empty, and the challenge invariant holds. Does not check the
    /// envelope version; callers decide how strict to be about that (see
    /// [`envelope_version_supported`]).
    pub fn validate_structure(&self) -> Result<(), ChainbornError> {
        self.proof_bytes()?;
        self.verification_key_bytes()?;
        if self.product_id.trim().is_empty() {
            return Err(ChainbornError::new(
                ErrorCode::EnvelopeStructureInvalid,
                "productId must not be empty",
            ));
        }
        self.challenge.validate()?;
        Ok(())
    }
}

fn decode_b64(value: &str, field: &str) -> Result<Vec<u8>, ChainbornError> {
    base64::engine::general_purpose::STANDARD
        .decode(value)
        .map_err(|e| {
            ChainbornError::new(
                ErrorCode::EnvelopeBase64Invalid,
                format!("field '{field}' is not valid base64"),
            )
            .with_context("field", field)
            .with_source(e)
        })
}

/// Accepts only a matching major version; any minor/patch difference is
/// tolerated for forward compatibility.
#[must_use]
pub fn envelope_version_supported(version: &str) -> bool {
    major_component(version) == major_component(ENVELOPE_VERSION)
}

/// Accepts only a matching major version of the policy schema.
#[must_use]
pub fn policy_schema_supported(version: &str) -> bool {
    major_component(version) == major_component(POLICY_SCHEMA_VERSION)
}

fn major_component(version: &str) -> &str {
    version.split('.').next().unwrap_or(version)
}

// ---------------------------------------------------------------------------
// License policy
// ---------------------------------------------------------------------------

/// Binding mode declared by a [`LicensePolicy`]: how (if at all) a proof is
/// tied to a runtime identity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BindingMode {
    /// No binding check is performed.
    None,
    /// Bind on organization identity.
    Organization,
    /// Bind on environment identity.
    Environment,
    /// Reserved for host attestation (TPM/enclave). Currently a no-op.
    Attestation,
}

/// Revocation model declared by a [`LicensePolicy`]. Informs the recommended
/// cache TTL; the core never executes live revocation checks at runtime.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RevocationModel {
    /// No revocation is modeled.
    None,
    /// Revocation is tracked on-chain (out of scope for the core).
    OnChain,
    /// Revocation is checked via a periodic external process (out of scope).
    PeriodicCheck,
}

/// Minimum permitted cache TTL: 60 seconds.
pub const MIN_CACHE_TTL_SECS: i64 = 60;
/// Maximum permitted cache TTL: 7 days.
pub const MAX_CACHE_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// A per-product license policy, authored declaratively and loaded from a
/// JSON document named `<product_id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LicensePolicy {
    /// Product identifier; must match the policy document's filename stem.
    pub product_id: String,
    /// Policy schema version.
    pub version: String,
    /// Minimum tier required, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_tier: Option<String>,
    /// Feature set required, if any. Must be unique.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_features: Option<Vec<String>>,
    /// How a proof is tied to runtime identity.
    pub binding_mode: BindingMode,
    /// Cache lifetime in seconds, within `[60, 604800]`.
    pub cache_ttl: i64,
    /// Declared revocation model.
    pub revocation_model: RevocationModel,
    /// Optional grace period in seconds, `>= 0`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grace_period: Option<i64>,
    /// Opaque product-specific properties, untouched by the core.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_properties: Option<serde_json::Value>,
}

impl LicensePolicy {
    /// Validates the structural invariants: non-empty
    /// `product_id`, `cache_ttl` within bounds, non-negative `grace_period`,
    /// unique `required_features`, and a supported schema version.
    pub fn validate(&self) -> Result<(), ChainbornError> {
        if self.product_id.trim().is_empty() {
            return Err(ChainbornError::new(
                ErrorCode::PolicyStructureInvalid,
                "productId must not be empty",
            ));
        }
        if !(MIN_CACHE_TTL_SECS..=MAX_CACHE_TTL_SECS).contains(&self.cache_ttl) {
            return Err(ChainbornError::new(
                ErrorCode::PolicyStructureInvalid,
                format!(
                    "cacheTtl must be within [{MIN_CACHE_TTL_SECS}, {MAX_CACHE_TTL_SECS}] seconds, got {}",
                    self.cache_ttl
                ),
            ));
        }
        if let Some(grace) = self.grace_period {
            if grace < 0 {
                return Err(ChainbornError::new(
                    ErrorCode::PolicyStructureInvalid,
                    "gracePeriod must not be negative",
                ));
            }
        }
        if let Some(features) = &self.required_features {
            let mut seen = std::collections::HashSet::new();
            for f in features {
                if !seen.insert(f) {
                    return Err(ChainbornError::new(
                        ErrorCode::PolicyStructureInvalid,
                        format!("requiredFeatures contains duplicate entry '{f}'"),
                    ));
                }
            }
        }
        if !policy_schema_supported(&self.version) {
            return Err(ChainbornError::new(
                ErrorCode::SchemaVersionUnsupported,
                format!("unsupported policy schema version '{}'", self.version),
            ));
        }
        Ok(())
    }

    /// Cache TTL as a [`chrono::Duration`].
    #[must_use]
    pub fn cache_ttl_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cache_ttl)
    }
}

// ---------------------------------------------------------------------------
// Validation context, strictness, result
// ---------------------------------------------------------------------------

/// Caller-controlled strictness. Only affects whether binding-mismatch and
/// policy-gating failures (never product-mismatch, nonce, or crypto
/// failures) are downgraded to warnings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Strictness {
    /// Binding mismatches and unenforced policy gating fail the request.
    #[default]
    Strict,
    /// Binding mismatches and unenforced policy gating are logged but do
    /// not fail the request.
    Permissive,
}

/// Caller-supplied context for a single validation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValidationContext {
    /// Product the caller expects this proof to validate against.
    pub product_id: String,
    /// Pre-collected binding data, if the caller already has it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding_data: Option<BTreeMap<String, String>>,
    /// Strictness mode for this validation.
    #[serde(default)]
    pub strictness: Strictness,
}

/// Outcome of a single validation. Immutable once constructed.
#[derive(Debug, Clone, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    /// Whether the proof is valid under the given context.
    pub is_valid: bool,
    /// Ordered list of human-readable errors (empty when `is_valid`).
    pub errors: Vec<String>,
    /// When this result was produced.
    pub validated_at: DateTime<Utc>,
    /// When this result (and any cache entry for it) expires.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// The cache key this result was stored/looked up under, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,
}

impl ValidationResult {
    /// Build an invalid result with a single error and no expiry.
    #[must_use]
    pub fn invalid(now: DateTime<Utc>, error: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            errors: vec![error.into()],
            validated_at: now,
            expires_at: None,
            cache_key: None,
        }
    }

    /// Build an invalid result with multiple errors and no expiry.
    #[must_use]
    pub fn invalid_many(now: DateTime<Utc>, errors: Vec<String>) -> Self {
        Self {
            is_valid: false,
            errors,
            validated_at: now,
            expires_at: None,
            cache_key: None,
        }
    }

    /// Build a successful result.
    #[must_use]
    pub fn valid(
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        cache_key: impl Into<String>,
    ) -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            validated_at: now,
            expires_at: Some(expires_at),
            cache_key: Some(cache_key.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Canonical hashing helpers
// ---------------------------------------------------------------------------

/// Compute the hex-encoded SHA-256 digest of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Build the deterministic `binding_signature` component of a cache key:
/// the canonical JSON encoding of `binding_data` (a [`BTreeMap`] always
/// serializes its entries in sorted-key order), then base64-encoded.
/// Order-independent, and injection-safe against `=`/`|`/any other
/// character appearing inside a key or value: JSON string escaping keeps
/// `{"a": "x|b=y"}` and `{"a": "x", "b": "y"}` from ever colliding, unlike a
/// hand-joined `key=value|key=value` encoding would.
#[must_use]
pub fn binding_signature(binding_data: &BTreeMap<String, String>) -> String {
    let canonical = serde_json::to_string(binding_data)
        .expect("BTreeMap<String, String> always serializes to JSON");
    base64::engine::general_purpose::STANDARD.encode(canonical)
}

/// Compute the deterministic cache key for a validation request: the
/// `:`-joined encoding of `product_id`, `nonce`, `strictness`, and the
/// [`binding_signature`] of the (possibly empty) binding data.
#[must_use]
pub fn cache_key(
    product_id: &str,
    nonce: &str,
    strictness: Strictness,
    binding_data: &BTreeMap<String, String>,
) -> String {
    let strictness_str = match strictness {
        Strictness::Strict => "strict",
        Strictness::Permissive => "permissive",
    };
    format!(
        "{product_id}:{nonce}:{strictness_str}:{}",
        binding_signature(binding_data)
    )
}

/// Filename a cache entry for `key` is stored under: lowercase hex SHA-256
/// of the key, plus `.json`.
#[must_use]
pub fn cache_file_name(key: &str) -> String {
    format!("{}.json", sha256_hex(key.as_bytes()))
}

// ---------------------------------------------------------------------------
// Ambient-state seams
// ---------------------------------------------------------------------------

/// Indirection over `std::env::var`, so callers that read ambient process
/// state (the envelope loader's `LICENSE_PROOF*` variables, the binding
/// collector's orchestrator-identity variables) can be driven by a fixed,
/// test-supplied environment instead of the real one.
pub trait EnvReader: Send + Sync {
    /// Read a single environment variable, returning `None` when unset.
    fn var(&self, key: &str) -> Option<String>;

    /// Enumerate every visible `(key, value)` pair. Used only by the
    /// binding collector's `CHAINBORN_BINDING_*` prefix scan, where the key
    /// set isn't known up front; every other caller sticks to [`Self::var`].
    fn all_vars(&self) -> Vec<(String, String)>;
}

/// [`EnvReader`] backed by the process's real environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl EnvReader for SystemEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn all_vars(&self) -> Vec<(String, String)> {
        std::env::vars().collect()
    }
}

/// [`EnvReader`] backed by a fixed map, for tests.
#[derive(Debug, Clone, Default)]
pub struct FixedEnv(pub BTreeMap<String, String>);

impl FixedEnv {
    /// Build a [`FixedEnv`] from an iterator of `(key, value)` pairs.
    pub fn new(vars: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>) -> Self {
        Self(
            vars.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl EnvReader for FixedEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.0.get(key).cloned()
    }

    fn all_vars(&self) -> Vec<(String, String)> {
        self.0.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

/// Indirection over reading a small file's contents in full, so callers that
/// probe ambient filesystem state (the binding collector's `/proc/self/cgroup`
/// read) can be driven by fixture content in tests.
pub trait FsReader: Send + Sync {
    /// Read the full contents of `path` as a string, or `None` if the path
    /// does not exist or cannot be read as UTF-8 — both are treated as "this
    /// source is unavailable," never an error, by every caller of this trait.
    fn read_to_string(&self, path: &str) -> Option<String>;
}

/// [`FsReader`] backed by the real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemFs;

impl FsReader for SystemFs {
    fn read_to_string(&self, path: &str) -> Option<String> {
        std::fs::read_to_string(path).ok()
    }
}

/// [`FsReader`] backed by a fixed map, for tests.
#[derive(Debug, Clone, Default)]
pub struct FixedFs(pub BTreeMap<String, String>);

impl FixedFs {
    /// Build a [`FixedFs`] from an iterator of `(path, content)` pairs.
    pub fn new(files: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>) -> Self {
        Self(
            files
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl FsReader for FixedFs {
    fn read_to_string(&self, path: &str) -> Option<String> {
        self.0.get(path).cloned()
    }
}
