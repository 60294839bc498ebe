// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
use anyhow::{Context, Result};
use chainborn_cache::ValidationCache;
use chainborn_core::{Strictness, ValidationContext};
use chainborn_orchestrator::Orchestrator;
use chainborn_policy::PolicyStore;
use chainborn_verifier::VerifierBackend;
use chainborn_verifier_mock::MockVerifier;
use chainborn_verifier_sidecar::{SidecarSpec, SidecarVerifier};
use clap::{Parser, Subcommand, ValueEnum};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Exit code used when a proof fails validation or the run hits a runtime error.
const EXIT_INVALID: i32 = 1;

#[derive(Parser, Debug)]
#[command(name = "chainborn", version, about = "Offline zero-knowledge license validator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate a proof envelope against a product's license policy.
    Validate {
        /// Product this proof is expected to validate against.
        #[arg(long)]
        product_id: String,

        /// Verifier backend to use.
        #[arg(long, value_enum, default_value_t = BackendArg::Mock)]
        backend: BackendArg,

        /// Command to spawn for `--backend sidecar`.
        #[arg(long)]
        sidecar_command: Option<String>,

        /// Arguments passed to the sidecar command. Repeatable.
        #[arg(long = "sidecar-arg")]
        sidecar_args: Vec<String>,

        /// Strictness mode for this validation.
        #[arg(long, value_enum, default_value_t = StrictnessArg::Strict)]
        strictness: StrictnessArg,

        /// Pre-collected binding data as key=value. Repeatable; overrides
        /// automatic collection from the environment.
        #[arg(long = "binding")]
        bindings: Vec<String>,

        /// Path to the configuration file (see `chainborn-config`).
        #[arg(long)]
        config: Option<PathBuf>,

        /// Explicit proof envelope path; overrides the configured/default one.
        #[arg(long)]
        proof: Option<PathBuf>,
    },

    /// Print a JSON schema for one of the wire types.
    Schema {
        #[arg(value_enum)]
        kind: SchemaArg,
    },
}

#[derive(Debug, Clone, ValueEnum)]
enum BackendArg {
    /// Deterministic in-process mock; always succeeds on non-empty proof bytes.
    Mock,
    /// Spawn an external process and speak one JSONL request/response over stdio.
    Sidecar,
}

#[derive(Debug, Clone, ValueEnum)]
enum StrictnessArg {
    Strict,
    Permissive,
}

impl From<StrictnessArg> for Strictness {
    fn from(v: StrictnessArg) -> Self {
        match v {
            StrictnessArg::Strict => Strictness::Strict,
            StrictnessArg::Permissive => Strictness::Permissive,
        }
    }
}

#[derive(Debug, Clone, ValueEnum)]
enum SchemaArg {
    ProofEnvelope,
    LicensePolicy,
    ValidationResult,
    ValidationContext,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("chainborn=debug")
    } else {
        EnvFilter::new("chainborn=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let result = match cli.command {
        Commands::Validate {
            product_id,
            backend,
            sidecar_command,
            sidecar_args,
            strictness,
            bindings,
            config,
            proof,
        } => {
            cmd_validate(
                product_id,
                backend,
                sidecar_command,
                sidecar_args,
                strictness,
                bindings,
                config,
                proof,
            )
            .await
        }
        Commands::Schema { kind } => cmd_schema(kind),
    };

    match result {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(EXIT_INVALID);
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn cmd_validate(
    product_id: String,
    backend: BackendArg,
    sidecar_command: Option<String>,
    sidecar_args: Vec<String>,
    strictness: StrictnessArg,
    bindings: Vec<String>,
    config_path: Option<PathBuf>,
    proof_path: Option<PathBuf>,
) -> Result<i32> {
    let config = chainborn_config::load_config(config_path.as_deref())
        .context("load chainborn configuration")?;

    let proof = match proof_path {
        Some(path) => {
            let env = chainborn_core::FixedEnv::new([(
                chainborn_envelope::PROOF_FILE_ENV,
                path.display().to_string(),
            )]);
            chainborn_envelope::load_with(&env, &config.proof_path)
                .with_context(|| format!("load proof envelope from {}", path.display()))?
        }
        None => chainborn_envelope::load_with(&chainborn_core::SystemEnv, &config.proof_path)
            .context("load proof envelope")?,
    };

    let mut binding_data = BTreeMap::new();
    for raw in &bindings {
        let (key, value) = raw
            .split_once('=')
            .with_context(|| format!("--binding '{raw}' is not in key=value form"))?;
        binding_data.insert(key.to_string(), value.to_string());
    }

    let context = ValidationContext {
        product_id,
        binding_data: if binding_data.is_empty() {
            None
        } else {
            Some(binding_data)
        },
        strictness: strictness.into(),
    };

    let policy_store = Arc::new(PolicyStore::new(&config.policy_dir));
    let cache = Arc::new(ValidationCache::open(&config.cache_dir, config.max_cache_entries).await);
    let verifier: Arc<dyn VerifierBackend> = match backend {
        BackendArg::Mock => Arc::new(MockVerifier::new()),
        BackendArg::Sidecar => {
            let command = sidecar_command.context("--sidecar-command is required for --backend sidecar")?;
            let mut spec = SidecarSpec::new(command);
            spec.args = sidecar_args;
            Arc::new(SidecarVerifier::new(spec))
        }
    };

    let orchestrator = Orchestrator::new(policy_store, cache, verifier);
    let result = orchestrator.validate(&proof, &context).await?;

    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(if result.is_valid { 0 } else { EXIT_INVALID })
}

fn cmd_schema(kind: SchemaArg) -> Result<i32> {
    let schema = match kind {
        SchemaArg::ProofEnvelope => schemars::schema_for!(chainborn_core::ProofEnvelope),
        SchemaArg::LicensePolicy => schemars::schema_for!(chainborn_core::LicensePolicy),
        SchemaArg::ValidationResult => schemars::schema_for!(chainborn_core::ValidationResult),
        SchemaArg::ValidationContext => schemars::schema_for!(chainborn_core::ValidationContext),
    };
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(0)
}
