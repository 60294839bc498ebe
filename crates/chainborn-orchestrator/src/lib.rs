// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! The validation orchestrator: sequences checks, enforces ordering, and
//! produces a single authoritative [`ValidationResult`].
//!
//! [`Orchestrator::validate`] implements an eleven-step pipeline, run
//! exactly in the order below. Failures encountered while running the
//! pipeline itself become `Ok(ValidationResult { is_valid: false, .. })`;
//! failures from a collaborator outside the pipeline's own logic (a policy
//! document that exists but fails to parse) propagate as `Err` instead.

use chainborn_binding::{collect as collect_binding_data, validate as validate_binding};
use chainborn_cache::ValidationCache;
use chainborn_core::{
    cache_key, tier_satisfies, EnvReader, FsReader, ProofEnvelope, Strictness, SystemEnv, SystemFs,
    ValidationContext, ValidationResult,
};
use chainborn_error::ChainbornError;
use chainborn_policy::PolicyStore;
use chainborn_verifier::VerifierBackend;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Wires the Policy Store, Validation Cache, Verifier Gateway, and Binding
/// Collector/Comparator into the `validate()` pipeline.
///
/// Constructed once per process and safe to call concurrently: two
/// validations for different cache keys make independent progress, and two
/// concurrent validations for the same key may both compute and both
/// write, with the last write winning.
pub struct Orchestrator {
    policy_store: Arc<PolicyStore>,
    cache: Arc<ValidationCache>,
    verifier: Arc<dyn VerifierBackend>,
    env: Arc<dyn EnvReader>,
    fs: Arc<dyn FsReader>,
}

impl Orchestrator {
    /// Build an orchestrator backed by the real process environment and
    /// filesystem for binding collection.
    #[must_use]
    pub fn new(
        policy_store: Arc<PolicyStore>,
        cache: Arc<ValidationCache>,
        verifier: Arc<dyn VerifierBackend>,
    ) -> Self {
        Self::with_env_fs(policy_store, cache, verifier, Arc::new(SystemEnv), Arc::new(SystemFs))
    }

    /// Build an orchestrator with injected environment/filesystem readers,
    /// so tests can drive binding collection with fixed values instead of
    /// the real process state.
    #[must_use]
    pub fn with_env_fs(
        policy_store: Arc<PolicyStore>,
        cache: Arc<ValidationCache>,
        verifier: Arc<dyn VerifierBackend>,
        env: Arc<dyn EnvReader>,
        fs: Arc<dyn FsReader>,
    ) -> Self {
        Self {
            policy_store,
            cache,
            verifier,
            env,
            fs,
        }
    }

    /// Run the full validation pipeline for `proof` under `context`.
    #[tracing::instrument(skip(self, proof, context), fields(product_id = %context.product_id))]
    pub async fn validate(
        &self,
        proof: &ProofEnvelope,
        context: &ValidationContext,
    ) -> Result<ValidationResult, ChainbornError> {
        let now = Utc::now();

        // Step 1: product-match guard.
        if proof.product_id != context.product_id {
            let result = ValidationResult::invalid(
                now,
                format!(
                    "proof product_id '{}' does not match requested product_id '{}'",
                    proof.product_id, context.product_id
                ),
            );
            log_outcome(&context.product_id, &result);
            return Ok(result);
        }

        // Step 2: cache probe. The key is derived from the caller-supplied
        // binding data only — never the collected binding data assembled in
        // step 4 — so the key is stable regardless of whether this request
        // needed collection.
        let key_binding_data = context.binding_data.clone().unwrap_or_default();
        let cache_key = cache_key(
            &context.product_id,
            &proof.challenge.nonce,
            context.strictness,
            &key_binding_data,
        );

        let policy_result = self.policy_store.get_policy(&context.product_id);

        if let Some(cached) = self.cache.get(&cache_key).await {
            match &policy_result {
                Ok(Some(policy)) => {
                    let bound = std::cmp::min(
                        proof.challenge.expires_at,
                        cached.validated_at + policy.cache_ttl_duration(),
                    );
                    let invariant_holds = cached.expires_at.is_some_and(|exp| exp <= bound);
                    if invariant_holds {
                        log_outcome(&context.product_id, &cached);
                        return Ok(cached);
                    }

                    self.cache.invalidate(&cache_key).await;
                    tracing::error!(
                        product_id = %context.product_id,
                        cache_key,
                        "cache invariant violation: cached entry's expiry exceeded the permitted bound"
                    );
                    let result = ValidationResult::invalid(
                        now,
                        "Cache invariant violation: cached expiry exceeded the permitted bound",
                    );
                    log_outcome(&context.product_id, &result);
                    return Ok(result);
                }
                // Policy unavailable (missing or failed to parse) during the
                // invariant recheck: treat as a cache miss and fall through.
                Ok(None) | Err(_) => {}
            }
        }

        // Step 3: policy fetch. A parse failure is a collaborator failure,
        // not a pipeline decision, so it propagates as `Err`.
        let policy = match policy_result {
            Ok(Some(policy)) => policy,
            Ok(None) => {
                let result = ValidationResult::invalid(
                    now,
                    format!("Policy not found for '{}'", context.product_id),
                );
                log_outcome(&context.product_id, &result);
                return Ok(result);
            }
            Err(e) => return Err(e),
        };

        // Step 4: binding data assembly, attached to this request only.
        let mut effective_binding_data = context.binding_data.clone();
        if policy.binding_mode != chainborn_core::BindingMode::None
            && effective_binding_data.as_ref().is_none_or(BTreeMap::is_empty)
        {
            effective_binding_data = Some(collect_binding_data(self.env.as_ref(), self.fs.as_ref()));
        }

        // Step 5: nonce checks, before any cryptographic work.
        if proof.challenge.expires_at <= now {
            let result = ValidationResult::invalid(now, "Challenge has expired and cannot be validated");
            log_outcome(&context.product_id, &result);
            return Ok(result);
        }
        if proof.challenge.issued_at > now {
            let result =
                ValidationResult::invalid(now, "Challenge issued in the future relative to this host's clock");
            log_outcome(&context.product_id, &result);
            return Ok(result);
        }

        // Step 6: cryptographic verification.
        let proof_bytes = proof.proof_bytes()?;
        let verification_key_bytes = proof.verification_key_bytes()?;
        let outcome = self
            .verifier
            .verify(&proof_bytes, &verification_key_bytes, &proof.challenge)
            .await;
        if !outcome.valid {
            let result = ValidationResult::invalid(
                now,
                outcome.error.unwrap_or_else(|| "verifier rejected the proof".to_string()),
            );
            log_outcome(&context.product_id, &result);
            return Ok(result);
        }

        // Step 7: binding check.
        let binding_result = validate_binding(
            policy.binding_mode,
            effective_binding_data.as_ref(),
            outcome.public_inputs.as_ref(),
        );
        if !binding_result.valid {
            if context.strictness == Strictness::Permissive {
                tracing::warn!(
                    product_id = %context.product_id,
                    errors = ?binding_result.errors,
                    "binding mismatch downgraded to a warning under permissive strictness"
                );
            } else {
                let result = ValidationResult::invalid_many(now, binding_result.errors);
                log_outcome(&context.product_id, &result);
                return Ok(result);
            }
        }

        // Step 8: policy gating (tier/feature), stub mode while the
        // verifier backend doesn't yet surface these public outputs.
        if let Some(gating_errors) = evaluate_policy_gating(&policy, &outcome) {
            if context.strictness == Strictness::Permissive {
                tracing::warn!(
                    product_id = %context.product_id,
                    errors = ?gating_errors,
                    "policy gating failure downgraded to a warning under permissive strictness"
                );
            } else {
                let result = ValidationResult::invalid_many(now, gating_errors);
                log_outcome(&context.product_id, &result);
                return Ok(result);
            }
        }

        // Step 9: compute the single authoritative expiry.
        let expires_at = std::cmp::min(proof.challenge.expires_at, now + policy.cache_ttl_duration());

        // Step 10: cache write.
        let result = ValidationResult::valid(now, expires_at, cache_key.clone());
        self.cache.set(&cache_key, &result, expires_at - now).await;

        // Step 11: return.
        log_outcome(&context.product_id, &result);
        Ok(result)
    }
}

/// Evaluates tier/feature gating against the verifier's public outputs.
/// Returns `None` when gating passes or is pending (the outputs the policy
/// needs are simply absent — stub mode, `spec.md` §4.7 step 8); returns
/// `Some(errors)` only when the outputs are present and insufficient.
fn evaluate_policy_gating(
    policy: &chainborn_core::LicensePolicy,
    outcome: &chainborn_verifier::VerifyOutcome,
) -> Option<Vec<String>> {
    let mut errors = Vec::new();

    if let Some(required_tier) = &policy.required_tier {
        match outcome.tier() {
            Some(present_tier) => {
                if !tier_satisfies(required_tier, present_tier) {
                    errors.push(format!(
                        "required tier '{required_tier}' not satisfied by present tier '{present_tier}'"
                    ));
                }
            }
            None => {
                tracing::info!(
                    required_tier,
                    "tier gating pending: verifier did not surface a tier public output"
                );
            }
        }
    }

    if let Some(required_features) = &policy.required_features {
        if !required_features.is_empty() {
            match outcome.features() {
                Some(present_features) => {
                    let missing: Vec<&str> = required_features
                        .iter()
                        .filter(|f| !present_features.iter().any(|p| p == *f))
                        .map(String::as_str)
                        .collect();
                    if !missing.is_empty() {
                        errors.push(format!("required features not satisfied: {}", missing.join(", ")));
                    }
                }
                None => {
                    tracing::info!(
                        "feature gating pending: verifier did not surface a features public output"
                    );
                }
            }
        }
    }

    if errors.is_empty() {
        None
    } else {
        Some(errors)
    }
}

fn log_outcome(product_id: &str, result: &ValidationResult) {
    if result.is_valid {
        tracing::info!(product_id, outcome = "valid", "validation complete");
    } else {
        tracing::warn!(
            product_id,
            outcome = "invalid",
            errors = ?result.errors,
            "validation complete"
        );
    }
}
