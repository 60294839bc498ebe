// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Deterministic mock [`VerifierBackend`] for tests and local development.
//!
//! Never fails: any non-empty `proof_bytes`/`verification_key_bytes` pair
//! verifies, optionally seeded with caller-supplied public inputs so tests
//! can exercise binding comparison and policy gating without a real ZK
//! backend.

use async_trait::async_trait;
use chainborn_core::Challenge;
use chainborn_verifier::{VerifierBackend, VerifierIdentity, VerifyOutcome};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Mock backend. By default returns `valid=true` with no public inputs
/// ("stub mode"); seed public inputs with [`MockVerifier::with_public_inputs`]
/// or force a failure with [`MockVerifier::always_invalid`].
#[derive(Debug)]
pub struct MockVerifier {
    public_inputs: Option<BTreeMap<String, String>>,
    forced_failure: Option<String>,
    calls: Mutex<u64>,
}

impl Default for MockVerifier {
    fn default() -> Self {
        Self {
            public_inputs: None,
            forced_failure: None,
            calls: Mutex::new(0),
        }
    }
}

impl MockVerifier {
    /// A mock that always succeeds with no public inputs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A mock that succeeds and surfaces the given public inputs, e.g. for
    /// exercising binding or tier/feature policy gating.
    #[must_use]
    pub fn with_public_inputs(public_inputs: BTreeMap<String, String>) -> Self {
        Self {
            public_inputs: Some(public_inputs),
            forced_failure: None,
            calls: Mutex::new(0),
        }
    }

    /// A mock that always fails verification with the given message.
    #[must_use]
    pub fn always_invalid(error: impl Into<String>) -> Self {
        Self {
            public_inputs: None,
            forced_failure: Some(error.into()),
            calls: Mutex::new(0),
        }
    }

    /// Number of times [`VerifierBackend::verify`] has been called. Used by
    /// orchestrator tests to assert the cache short-circuits repeated
    /// cryptographic work (`spec.md` §8, scenario 1).
    #[must_use]
    pub fn call_count(&self) -> u64 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl VerifierBackend for MockVerifier {
    fn identity(&self) -> VerifierIdentity {
        VerifierIdentity {
            id: "mock".to_string(),
            backend_version: Some(env!("CARGO_PKG_VERSION").to_string()),
        }
    }

    async fn verify(
        &self,
        proof_bytes: &[u8],
        verification_key_bytes: &[u8],
        _challenge: &Challenge,
    ) -> VerifyOutcome {
        *self.calls.lock().unwrap() += 1;

        if let Some(error) = &self.forced_failure {
            return VerifyOutcome::invalid(error.clone());
        }

        if proof_bytes.is_empty() || verification_key_bytes.is_empty() {
            return VerifyOutcome::invalid("proof or verification key bytes were empty");
        }

        match &self.public_inputs {
            Some(inputs) => VerifyOutcome::valid_with_public_inputs(inputs.clone()),
            None => VerifyOutcome::valid(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn challenge() -> Challenge {
        let now = Utc::now();
        Challenge {
            nonce: "n".into(),
            issued_at: now,
            expires_at: now + chrono::Duration::seconds(60),
        }
    }

    #[tokio::test]
    async fn default_mock_verifies_any_non_empty_proof() {
        let mock = MockVerifier::new();
        let outcome = mock.verify(b"proof", b"vk", &challenge()).await;
        assert!(outcome.valid);
        assert!(outcome.public_inputs.is_none());
    }

    #[tokio::test]
    async fn rejects_empty_inputs() {
        let mock = MockVerifier::new();
        let outcome = mock.verify(b"", b"vk", &challenge()).await;
        assert!(!outcome.valid);
    }

    #[tokio::test]
    async fn surfaces_seeded_public_inputs() {
        let mut inputs = BTreeMap::new();
        inputs.insert("org_id".to_string(), "acme".to_string());
        let mock = MockVerifier::with_public_inputs(inputs);
        let outcome = mock.verify(b"proof", b"vk", &challenge()).await;
        assert!(outcome.valid);
        assert_eq!(
            outcome.public_inputs.unwrap().get("org_id"),
            Some(&"acme".to_string())
        );
    }

    #[tokio::test]
    async fn always_invalid_reports_the_configured_error() {
        let mock = MockVerifier::always_invalid("simulated backend rejection");
        let outcome = mock.verify(b"proof", b"vk", &challenge()).await;
        assert!(!outcome.valid);
        assert_eq!(outcome.error.as_deref(), Some("simulated backend rejection"));
    }

    #[tokio::test]
    async fn call_count_tracks_invocations() {
        let mock = MockVerifier::new();
        assert_eq!(mock.call_count(), 0);
        mock.verify(b"proof", b"vk", &challenge()).await;
        mock.verify(b"proof", b"vk", &challenge()).await;
        assert_eq!(mock.call_count(), 2);
    }
}
