// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end validation scenarios against a real `Orchestrator`, backed by
//! a temporary policy directory and a temporary validation cache directory.
//! Covers the literal walkthroughs from `spec.md` §8: a proof whose own
//! expiry is the binding constraint, a proof bound by a short cache TTL
//! instead, an expired challenge, a self-healing cache invariant violation,
//! a binding mismatch, and a product-id short-circuit.

use base64::Engine as _;
use chainborn_cache::ValidationCache;
use chainborn_core::{
    BindingMode, Challenge, LicensePolicy, ProofEnvelope, RevocationModel, Strictness,
    ValidationContext,
};
use chainborn_orchestrator::Orchestrator;
use chainborn_policy::PolicyStore;
use chainborn_verifier_mock::MockVerifier;
use chrono::{Duration, Utc};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

fn write_policy(dir: &Path, policy: &LicensePolicy) {
    let path = dir.join(format!("{}.json", policy.product_id));
    std::fs::write(&path, serde_json::to_string(policy).unwrap()).unwrap();
}

fn policy(product_id: &str, cache_ttl: i64, binding_mode: BindingMode) -> LicensePolicy {
    LicensePolicy {
        product_id: product_id.to_string(),
        version: chainborn_core::POLICY_SCHEMA_VERSION.to_string(),
        required_tier: None,
        required_features: None,
        binding_mode,
        cache_ttl,
        revocation_model: RevocationModel::None,
        grace_period: None,
        custom_properties: None,
    }
}

fn envelope(product_id: &str, nonce: &str, issued: Duration, expires: Duration) -> ProofEnvelope {
    let now = Utc::now();
    ProofEnvelope {
        proof_bytes: base64::engine::general_purpose::STANDARD.encode(b"proof-bytes"),
        verification_key_bytes: base64::engine::general_purpose::STANDARD.encode(b"vk-bytes"),
        product_id: product_id.to_string(),
        challenge: Challenge {
            nonce: nonce.to_string(),
            issued_at: now + issued,
            expires_at: now + expires,
        },
        metadata: None,
        envelope_version: chainborn_core::ENVELOPE_VERSION.to_string(),
    }
}

fn context(product_id: &str) -> ValidationContext {
    ValidationContext {
        product_id: product_id.to_string(),
        binding_data: None,
        strictness: Strictness::Strict,
    }
}

async fn build_orchestrator(policy_dir: &Path, cache_dir: &Path) -> (Orchestrator, Arc<MockVerifier>) {
    let policy_store = Arc::new(PolicyStore::new(policy_dir));
    let cache = Arc::new(ValidationCache::open(cache_dir, 100).await);
    let verifier = Arc::new(MockVerifier::new());
    let orchestrator = Orchestrator::new(policy_store, cache, verifier.clone());
    (orchestrator, verifier)
}

/// Scenario 1: a short-lived proof caches under its own `challenge.expires_at`
/// because that is tighter than the policy's cache TTL.
#[tokio::test]
async fn happy_path_bounded_by_proof_expiry() {
    let policy_dir = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    write_policy(policy_dir.path(), &policy("acme-pro", 3600, BindingMode::None));
    let (orchestrator, verifier) = build_orchestrator(policy_dir.path(), cache_dir.path()).await;

    let proof = envelope("acme-pro", "n1", Duration::seconds(-1), Duration::seconds(120));
    let ctx = context("acme-pro");

    let result = orchestrator.validate(&proof, &ctx).await.unwrap();
    assert!(result.is_valid);
    assert!(result.expires_at.unwrap() <= proof.challenge.expires_at);

    orchestrator.validate(&proof, &ctx).await.unwrap();
    assert_eq!(verifier.call_count(), 1, "repeat validation must be served from cache");
}

/// Scenario 2: a long-lived proof is instead bounded by the policy's short
/// cache TTL.
#[tokio::test]
async fn happy_path_bounded_by_short_cache_ttl() {
    let policy_dir = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    write_policy(policy_dir.path(), &policy("acme-pro", 60, BindingMode::None));
    let (orchestrator, _verifier) = build_orchestrator(policy_dir.path(), cache_dir.path()).await;

    let proof = envelope("acme-pro", "n2", Duration::seconds(-1), Duration::hours(6));
    let ctx = context("acme-pro");

    let result = orchestrator.validate(&proof, &ctx).await.unwrap();
    assert!(result.is_valid);
    let ttl = result.expires_at.unwrap() - result.validated_at;
    assert!(ttl <= Duration::seconds(61));
}

/// Scenario 3: an expired challenge fails before any cryptographic work runs.
#[tokio::test]
async fn expired_challenge_fails_without_verifying() {
    let policy_dir = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    write_policy(policy_dir.path(), &policy("acme-pro", 3600, BindingMode::None));
    let (orchestrator, verifier) = build_orchestrator(policy_dir.path(), cache_dir.path()).await;

    let proof = envelope("acme-pro", "n3", Duration::seconds(-600), Duration::seconds(-1));
    let ctx = context("acme-pro");

    let result = orchestrator.validate(&proof, &ctx).await.unwrap();
    assert!(!result.is_valid);
    assert!(result.errors[0].to_lowercase().contains("expired"));
    assert_eq!(verifier.call_count(), 0);
}

/// Scenario 4: a cache entry whose `expiresAt` exceeds the permitted bound
/// (proof tampering or a prior bug) is detected, reported as invalid, and
/// removed — the following call recomputes cleanly.
#[tokio::test]
async fn cache_invariant_violation_is_detected_and_self_heals() {
    let policy_dir = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    write_policy(policy_dir.path(), &policy("acme-pro", 300, BindingMode::None));
    let (orchestrator, _verifier) = build_orchestrator(policy_dir.path(), cache_dir.path()).await;

    let proof = envelope("acme-pro", "n4", Duration::seconds(-1), Duration::seconds(600));
    let ctx = context("acme-pro");

    let key_binding_data = BTreeMap::new();
    let key = chainborn_core::cache_key(&ctx.product_id, &proof.challenge.nonce, ctx.strictness, &key_binding_data);
    let now = Utc::now();
    let poisoned = chainborn_core::ValidationResult::valid(
        now,
        proof.challenge.expires_at + Duration::hours(1),
        key.clone(),
    );
    let raw_cache = ValidationCache::open(cache_dir.path(), 100).await;
    raw_cache.set(&key, &poisoned, Duration::hours(2)).await;

    let result = orchestrator.validate(&proof, &ctx).await.unwrap();
    assert!(!result.is_valid);
    assert!(result.errors[0].contains("Cache invariant violation"));

    let healed = orchestrator.validate(&proof, &ctx).await.unwrap();
    assert!(healed.is_valid);
}

/// Scenario 5: the caller's binding data disagrees with what the verifier
/// attests to, so the request fails under the default strict mode.
#[tokio::test]
async fn binding_mismatch_fails_under_strictness() {
    let policy_dir = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    write_policy(policy_dir.path(), &policy("acme-pro", 300, BindingMode::Organization));

    let policy_store = Arc::new(PolicyStore::new(policy_dir.path()));
    let cache = Arc::new(ValidationCache::open(cache_dir.path(), 100).await);
    let mut public_inputs = BTreeMap::new();
    public_inputs.insert("org_id".to_string(), "globex".to_string());
    let verifier = Arc::new(MockVerifier::with_public_inputs(public_inputs));
    let orchestrator = Orchestrator::new(policy_store, cache, verifier);

    let proof = envelope("acme-pro", "n5", Duration::seconds(-1), Duration::seconds(600));
    let mut ctx = context("acme-pro");
    let mut binding_data = BTreeMap::new();
    binding_data.insert("org_id".to_string(), "acme".to_string());
    ctx.binding_data = Some(binding_data);

    let result = orchestrator.validate(&proof, &ctx).await.unwrap();
    assert!(!result.is_valid);
    assert!(result.errors[0].contains("acme"));
    assert!(result.errors[0].contains("globex"));
}

/// Scenario 6: the proof's `productId` disagrees with the requested product,
/// short-circuiting before any policy lookup or verifier call.
#[tokio::test]
async fn product_mismatch_short_circuits() {
    let policy_dir = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    // No policy document exists for either id; a short-circuit never needs one.
    let (orchestrator, verifier) = build_orchestrator(policy_dir.path(), cache_dir.path()).await;

    let proof = envelope("acme-pro", "n6", Duration::seconds(-1), Duration::seconds(600));
    let ctx = context("other-product");

    let result = orchestrator.validate(&proof, &ctx).await.unwrap();
    assert!(!result.is_valid);
    assert_eq!(verifier.call_count(), 0);
}
