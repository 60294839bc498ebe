// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! `VerifierBackend` — the single cryptographic boundary of the validator.
//!
//! The orchestrator (`chainborn-orchestrator`) treats every implementation
//! of [`VerifierBackend`] uniformly: a mock for tests, a sidecar process for
//! production. This crate defines the contract only; see
//! `chainborn-verifier-mock` and `chainborn-verifier-sidecar` for concrete
//! backends.

use async_trait::async_trait;
use chainborn_core::Challenge;
use std::collections::BTreeMap;

/// Identity metadata a backend reports about itself, surfaced in logs and
/// diagnostics — never used to select validation behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierIdentity {
    /// Short backend identifier, e.g. `"mock"` or `"sidecar"`.
    pub id: String,
    /// Backend implementation version, if known.
    pub backend_version: Option<String>,
}

/// Well-known [`VerifyOutcome::public_inputs`] key carrying the license
/// tier a proof attests to. Consulted only by the orchestrator's stub-mode
/// policy gating (`spec.md` §4.7 step 8); absent unless a backend populates
/// it.
pub const PUBLIC_INPUT_TIER: &str = "tier";
/// Well-known [`VerifyOutcome::public_inputs`] key carrying a
/// comma-joined feature list. See [`PUBLIC_INPUT_TIER`].
pub const PUBLIC_INPUT_FEATURES: &str = "features";

/// Result of a single proof verification.
#[derive(Debug, Clone, Default)]
pub struct VerifyOutcome {
    /// Whether the proof verified successfully.
    pub valid: bool,
    /// Backend-supplied error text when `valid` is `false`.
    pub error: Option<String>,
    /// Public outputs the backend is willing to surface, if any. Never
    /// populated when `valid` is `false`.
    pub public_inputs: Option<BTreeMap<String, String>>,
}

impl VerifyOutcome {
    /// Build a successful outcome with no public inputs.
    #[must_use]
    pub fn valid() -> Self {
        Self {
            valid: true,
            error: None,
            public_inputs: None,
        }
    }

    /// Build a successful outcome carrying public inputs.
    #[must_use]
    pub fn valid_with_public_inputs(public_inputs: BTreeMap<String, String>) -> Self {
        Self {
            valid: true,
            error: None,
            public_inputs: Some(public_inputs),
        }
    }

    /// Build a failed outcome with an explanatory message. Covers both "the
    /// proof is invalid" and "the backend could not be reached" per
    /// `spec.md` §4.5 — both surface identically to the orchestrator.
    #[must_use]
    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(error.into()),
            public_inputs: None,
        }
    }

    /// Parse [`PUBLIC_INPUT_FEATURES`] into an individual feature set, if
    /// present.
    #[must_use]
    pub fn features(&self) -> Option<Vec<String>> {
        self.public_inputs
            .as_ref()?
            .get(PUBLIC_INPUT_FEATURES)
            .map(|csv| {
                csv.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
    }

    /// The [`PUBLIC_INPUT_TIER`] value, if present.
    #[must_use]
    pub fn tier(&self) -> Option<&str> {
        self.public_inputs.as_ref()?.get(PUBLIC_INPUT_TIER).map(String::as_str)
    }
}

/// Narrow interface to an external ZK-verify backend. The only component in
/// the workspace permitted to execute cryptographic verification.
///
/// Implementations must be side-effect-free with respect to shared mutable
/// state (telemetry aside) and must never panic on malformed input —
/// `spec.md` §4.5 requires every failure mode to surface as
/// `valid=false, error=Some(..)`.
#[async_trait]
pub trait VerifierBackend: Send + Sync {
    /// Identity metadata for this backend.
    fn identity(&self) -> VerifierIdentity;

    /// Verify `proof_bytes` against `verification_key_bytes` for the given
    /// `challenge`. Backends may be I/O-bound (a sidecar call) or
    /// compute-bound (an in-process check); either way this is async to let
    /// the orchestrator treat both uniformly as a suspension point.
    async fn verify(
        &self,
        proof_bytes: &[u8],
        verification_key_bytes: &[u8],
        challenge: &Challenge,
    ) -> VerifyOutcome;
}
