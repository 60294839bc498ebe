// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Binding collector and comparator.
//!
//! The collector ([`collect`]) observes runtime identity from the process
//! environment and `/proc/self/cgroup`; the comparator ([`validate`])
//! enforces a policy's [`BindingMode`] by comparing that data against a
//! verifier's public outputs. Both are pure with respect to the rest of the
//! pipeline: the collector never fails (individual sources are skipped on
//! error), and the comparator is a plain function of its inputs.

use chainborn_core::BindingMode;
use std::collections::BTreeMap;

/// Prefix stripped from custom binding environment variables; the remainder
/// is lowercased and kept verbatim as the binding key.
pub const CUSTOM_BINDING_PREFIX: &str = "CHAINBORN_BINDING_";

/// Indirection over reading environment variables and small files, so tests
/// can supply fixed values instead of the real process environment.
/// Re-exported from `chainborn-core` so callers only need one import.
pub use chainborn_core::{EnvReader, FsReader};

/// Collects binding data from the process environment and filesystem.
///
/// An individual source's absence or malformed value is never an error; it
/// is simply omitted from the result. This function itself cannot fail.
#[must_use]
pub fn collect(env: &dyn EnvReader, fs: &dyn FsReader) -> BTreeMap<String, String> {
    let mut data = BTreeMap::new();

    if let Some(hostname) = collect_hostname(env) {
        data.insert("hostname".to_string(), hostname);
    }
    if let Some(container_id) = collect_container_id(env, fs) {
        data.insert("container_id".to_string(), container_id);
    }
    if let Some(ns) = first_non_empty(env, &["K8S_NAMESPACE", "KUBERNETES_NAMESPACE"]) {
        data.insert("k8s_namespace".to_string(), ns);
    }
    if let Some(pod) = first_non_empty(env, &["K8S_POD_NAME", "KUBERNETES_POD_NAME"]) {
        data.insert("k8s_pod_name".to_string(), pod);
    }
    collect_custom_bindings(env, &mut data);

    data
}

fn collect_hostname(env: &dyn EnvReader) -> Option<String> {
    // `hostname` is sourced from the machine name, which on the platforms
    // this validator runs in is reliably surfaced via `HOSTNAME`.
    non_empty(env.var("HOSTNAME"))
}

fn collect_container_id(env: &dyn EnvReader, fs: &dyn FsReader) -> Option<String> {
    if let Some(hostname) = env.var("HOSTNAME") {
        if is_hex_in_range(&hostname, 12, 64) {
            return Some(hostname);
        }
    }

    let cgroup = fs.read_to_string("/proc/self/cgroup")?;
    cgroup.lines().find_map(container_id_from_cgroup_line)
}

/// Extracts a container id from a single `/proc/self/cgroup` line, matching
/// any of three known patterns:
/// `.../docker/<hex>`, `.../docker-<hex>.scope`, `.../kubepods/.../pod<...>/<hex>`.
fn container_id_from_cgroup_line(line: &str) -> Option<String> {
    let line = line.trim();
    let parts: Vec<&str> = line.split('/').collect();

    if let Some(last) = parts.last() {
        if let Some(stripped) = last
            .strip_prefix("docker-")
            .and_then(|s| s.strip_suffix(".scope"))
        {
            if is_hex_in_range(stripped, 12, 64) {
                return Some(stripped.to_string());
            }
        }
    }

    for (i, part) in parts.iter().enumerate() {
        if *part == "docker" {
            if let Some(next) = parts.get(i + 1) {
                if is_hex_in_range(next, 12, 64) {
                    return Some((*next).to_string());
                }
            }
        }
    }

    if parts.iter().any(|p| p.starts_with("kubepods")) {
        if let Some(last) = parts.last() {
            if is_hex_in_range(last, 12, 64) {
                return Some((*last).to_string());
            }
        }
    }

    None
}

fn is_hex_in_range(s: &str, min_len: usize, max_len: usize) -> bool {
    (min_len..=max_len).contains(&s.len())
        && !s.is_empty()
        && s.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

fn first_non_empty(env: &dyn EnvReader, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| non_empty(env.var(k)))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn collect_custom_bindings(env: &dyn EnvReader, data: &mut BTreeMap<String, String>) {
    for (key, value) in env.all_vars() {
        if let Some(rest) = case_insensitive_strip_prefix(&key, CUSTOM_BINDING_PREFIX) {
            if let Some(v) = non_empty(Some(value)) {
                data.insert(rest.to_lowercase(), v);
            }
        }
    }
}

fn case_insensitive_strip_prefix<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

/// Outcome of a binding comparison.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BindingCheckResult {
    /// Whether the binding check passed.
    pub valid: bool,
    /// Errors explaining a failed check; empty when `valid`.
    pub errors: Vec<String>,
}

impl BindingCheckResult {
    fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    fn fail(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            errors: vec![error.into()],
        }
    }
}

/// Validates `binding_data` against `public_inputs` under `mode`.
/// Purely functional: no I/O, no shared state.
#[must_use]
pub fn validate(
    mode: BindingMode,
    binding_data: Option<&BTreeMap<String, String>>,
    public_inputs: Option<&BTreeMap<String, String>>,
) -> BindingCheckResult {
    match mode {
        BindingMode::None => BindingCheckResult::ok(),
        BindingMode::Organization => validate_keyed(binding_data, public_inputs, "org_id"),
        BindingMode::Environment => validate_keyed(binding_data, public_inputs, "environment_id"),
        BindingMode::Attestation => {
            tracing::warn!("attestation binding mode is reserved and not yet enforced");
            BindingCheckResult::ok()
        }
    }
}

fn validate_keyed(
    binding_data: Option<&BTreeMap<String, String>>,
    public_inputs: Option<&BTreeMap<String, String>>,
    key: &str,
) -> BindingCheckResult {
    let Some(binding_data) = binding_data else {
        return BindingCheckResult::fail("binding data is required but was not supplied");
    };

    let Some(expected) = binding_data.get(key).filter(|v| !v.trim().is_empty()) else {
        return BindingCheckResult::fail(format!("binding data is missing required field '{key}'"));
    };

    let public_inputs = match public_inputs {
        Some(inputs) if !inputs.is_empty() => inputs,
        _ => {
            tracing::warn!(
                field = key,
                "verifier did not surface public inputs; binding check running in stub mode"
            );
            return BindingCheckResult::ok();
        }
    };

    let Some(actual) = public_inputs.get(key).filter(|v| !v.trim().is_empty()) else {
        return BindingCheckResult::fail(format!(
            "verifier public inputs are missing required field '{key}'"
        ));
    };

    if expected == actual {
        BindingCheckResult::ok()
    } else {
        BindingCheckResult::fail(format!(
            "binding mismatch on '{key}': expected '{expected}', got '{actual}'"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainborn_core::{FixedEnv, FixedFs};

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn collect_picks_up_hostname_and_k8s_identity() {
        let env = FixedEnv::new([
            ("HOSTNAME", "web-1"),
            ("K8S_NAMESPACE", "prod"),
            ("K8S_POD_NAME", "web-1-abcde"),
        ]);
        let fs = FixedFs::new(Vec::<(&str, &str)>::new());
        let data = collect(&env, &fs);
        assert_eq!(data.get("hostname"), Some(&"web-1".to_string()));
        assert_eq!(data.get("k8s_namespace"), Some(&"prod".to_string()));
        assert_eq!(data.get("k8s_pod_name"), Some(&"web-1-abcde".to_string()));
    }

    #[test]
    fn collect_prefers_kubernetes_fallback_variables() {
        let env = FixedEnv::new([("KUBERNETES_NAMESPACE", "staging")]);
        let fs = FixedFs::new(Vec::<(&str, &str)>::new());
        let data = collect(&env, &fs);
        assert_eq!(data.get("k8s_namespace"), Some(&"staging".to_string()));
    }

    #[test]
    fn container_id_from_hostname_when_hex() {
        let env = FixedEnv::new([("HOSTNAME", "abcdef0123456789")]);
        let fs = FixedFs::new(Vec::<(&str, &str)>::new());
        let data = collect(&env, &fs);
        assert_eq!(data.get("container_id"), Some(&"abcdef0123456789".to_string()));
    }

    #[test]
    fn container_id_from_cgroup_docker_path() {
        let env = FixedEnv::new([("HOSTNAME", "not-hex-hostname")]);
        let fs = FixedFs::new([(
            "/proc/self/cgroup",
            "0::/docker/abcdef0123456789abcdef0123456789abcdef0123456789abcdef01\n",
        )]);
        let data = collect(&env, &fs);
        assert_eq!(
            data.get("container_id"),
            Some(&"abcdef0123456789abcdef0123456789abcdef0123456789abcdef01".to_string())
        );
    }

    #[test]
    fn container_id_from_cgroup_docker_scope_suffix() {
        let env = FixedEnv::new(Vec::<(&str, &str)>::new());
        let fs = FixedFs::new([(
            "/proc/self/cgroup",
            "1:name=systemd:/docker-abcdef0123456789abcdef01.scope\n",
        )]);
        let data = collect(&env, &fs);
        assert_eq!(
            data.get("container_id"),
            Some(&"abcdef0123456789abcdef01".to_string())
        );
    }

    #[test]
    fn container_id_from_kubepods_path() {
        let env = FixedEnv::new(Vec::<(&str, &str)>::new());
        let fs = FixedFs::new([(
            "/proc/self/cgroup",
            "0::/kubepods/burstable/pod1234/abcdef0123456789abcdef0123456789\n",
        )]);
        let data = collect(&env, &fs);
        assert_eq!(
            data.get("container_id"),
            Some(&"abcdef0123456789abcdef0123456789".to_string())
        );
    }

    #[test]
    fn collect_strips_custom_binding_prefix_case_insensitively() {
        let env = FixedEnv::new([
            ("chainborn_binding_seat_count", "42"),
            ("CHAINBORN_BINDING_Region", "us-east"),
            ("UNRELATED", "ignored"),
        ]);
        let fs = FixedFs::new(Vec::<(&str, &str)>::new());
        let data = collect(&env, &fs);
        assert_eq!(data.get("seat_count"), Some(&"42".to_string()));
        assert_eq!(data.get("region"), Some(&"us-east".to_string()));
        assert!(!data.contains_key("unrelated"));
    }

    #[test]
    fn collect_omits_absent_sources_entirely() {
        let env = FixedEnv::new(Vec::<(&str, &str)>::new());
        let fs = FixedFs::new(Vec::<(&str, &str)>::new());
        let data = collect(&env, &fs);
        assert!(data.is_empty());
    }

    #[test]
    fn none_mode_always_valid() {
        let result = validate(BindingMode::None, None, None);
        assert!(result.valid);
    }

    #[test]
    fn organization_mode_requires_binding_data() {
        let result = validate(BindingMode::Organization, None, None);
        assert!(!result.valid);
        assert!(result.errors[0].contains("binding data is required"));
    }

    #[test]
    fn organization_mode_requires_org_id_in_binding_data() {
        let binding_data = map(&[("other", "x")]);
        let result = validate(BindingMode::Organization, Some(&binding_data), None);
        assert!(!result.valid);
        assert!(result.errors[0].contains("org_id"));
    }

    #[test]
    fn organization_mode_stub_mode_when_public_inputs_absent() {
        let binding_data = map(&[("org_id", "acme")]);
        let result = validate(BindingMode::Organization, Some(&binding_data), None);
        assert!(result.valid, "stub mode must pass when verifier has no public inputs yet");
    }

    #[test]
    fn organization_mode_rejects_mismatch_with_both_values_in_error() {
        let binding_data = map(&[("org_id", "acme")]);
        let public_inputs = map(&[("org_id", "widgets")]);
        let result = validate(BindingMode::Organization, Some(&binding_data), Some(&public_inputs));
        assert!(!result.valid);
        assert!(result.errors[0].contains("acme"));
        assert!(result.errors[0].contains("widgets"));
    }

    #[test]
    fn organization_mode_accepts_exact_match() {
        let binding_data = map(&[("org_id", "acme")]);
        let public_inputs = map(&[("org_id", "acme")]);
        let result = validate(BindingMode::Organization, Some(&binding_data), Some(&public_inputs));
        assert!(result.valid);
    }

    #[test]
    fn environment_mode_is_keyed_on_environment_id() {
        let binding_data = map(&[("environment_id", "prod")]);
        let public_inputs = map(&[("environment_id", "staging")]);
        let result = validate(BindingMode::Environment, Some(&binding_data), Some(&public_inputs));
        assert!(!result.valid);
        assert!(result.errors[0].contains("environment_id"));
    }

    #[test]
    fn attestation_mode_is_a_stub_that_always_passes() {
        let result = validate(BindingMode::Attestation, None, None);
        assert!(result.valid);
    }
}
