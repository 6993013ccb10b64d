//! Chains controller CLI
//!
//! Entry point for the `chains-controller` command-line tool.

use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use chains_controller::config::{deep_merge, override_at};
use chains_controller::signing::{Signer, X509Signer};
use chains_controller::{
    AnnotationLedger, ChainsConfig, Controller, ControllerOptions, Coordinator, EffectiveConfig,
    ObjectResult, ObjectSigner, Registry, SignContext, Verifier,
};
use chains_objects::{FileStore, ObjectKind, ObjectStore};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const EXIT_FAILURE: i32 = 1;
const EXIT_CONFIG: i32 = 2;
const EXIT_CANCELLED: i32 = 130;

#[derive(Parser)]
#[command(name = "chains-controller")]
#[command(about = "Sign provenance for completed Tekton runs", version)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Override a config value, e.g. `--set transparency.enabled=manual`
    #[arg(long = "set", value_name = "KEY=VALUE", global = true)]
    overrides: Vec<String>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile every run in a directory of TaskRun/PipelineRun documents
    Reconcile {
        /// Directory holding the object documents
        #[arg(long)]
        store: PathBuf,

        /// Output the per-object report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Verify the stored signatures of one run
    Verify {
        /// Directory holding the object documents
        #[arg(long)]
        store: PathBuf,

        /// Object kind (TaskRun or PipelineRun)
        kind: String,

        /// Object as <namespace>/<name>
        target: String,
    },

    /// Generate an x509 signing key
    GenerateKey {
        /// Where to write the base64 key seed
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration
    Config {
        /// Output as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let code = match cli.command {
        Commands::GenerateKey { path, force } => run_generate_key(path, force),
        Commands::Config { json } => {
            let config = load_config(cli.config, &cli.overrides);
            run_config(&config, json)
        }
        Commands::Reconcile { store, json } => {
            let config = load_config(cli.config, &cli.overrides);
            run_reconcile(&config, store, json)
        }
        Commands::Verify {
            store,
            kind,
            target,
        } => {
            let config = load_config(cli.config, &cli.overrides);
            run_verify(&config, store, &kind, &target)
        }
    };
    process::exit(code);
}

fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .try_init();
}

fn parse_overrides(overrides: &[String]) -> Result<Option<Value>, String> {
    let mut merged: Option<Value> = None;
    for raw in overrides {
        let (path, value) = raw
            .split_once('=')
            .ok_or_else(|| format!("override '{raw}' is not KEY=VALUE"))?;
        let value =
            serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        let layer = override_at(path.trim(), value);
        merged = Some(match merged {
            Some(base) => deep_merge(base, layer),
            None => layer,
        });
    }
    Ok(merged)
}

fn load_config(path: Option<PathBuf>, overrides: &[String]) -> EffectiveConfig {
    let overrides = match parse_overrides(overrides) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(EXIT_CONFIG);
        }
    };
    match EffectiveConfig::build(path.as_deref(), overrides) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            process::exit(EXIT_CONFIG);
        }
    }
}

/// The signing stack wired over a directory store.
struct Stack {
    store: Arc<FileStore>,
    registry: Arc<Registry>,
    settings: Arc<ChainsConfig>,
    ledger: AnnotationLedger,
}

impl Stack {
    fn open(config: &EffectiveConfig, store_dir: &Path) -> Result<Self, String> {
        let store = Arc::new(
            FileStore::open(store_dir).map_err(|e| format!("{}: {}", store_dir.display(), e))?,
        );
        let ledger = AnnotationLedger::new(store.clone());
        let registry =
            Registry::from_config(&config.settings, &ledger).map_err(|e| e.to_string())?;
        Ok(Self {
            store,
            registry: Arc::new(registry),
            settings: Arc::new(config.settings.clone()),
            ledger,
        })
    }

    fn signer(&self) -> ObjectSigner {
        ObjectSigner::new(
            self.registry.clone(),
            self.settings.clone(),
            self.ledger.clone(),
        )
    }
}

fn run_reconcile(config: &EffectiveConfig, store_dir: PathBuf, json: bool) -> i32 {
    let stack = match Stack::open(config, &store_dir) {
        Ok(stack) => stack,
        Err(e) => {
            eprintln!("Error: {}", e);
            return EXIT_CONFIG;
        }
    };

    let ctx = SignContext::background();
    let cancel = ctx.cancel_handle();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("\nReceived interrupt signal, stopping after in-flight objects...");
        cancel.store(true, Ordering::SeqCst);
    }) {
        eprintln!("Warning: could not install signal handler: {}", e);
    }

    let options = ControllerOptions::from(&config.settings.controller);
    let controller = Controller::new(Coordinator::new(stack.signer()), options);
    let report = match controller.run_all(&ctx) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Error listing objects: {}", e);
            return EXIT_FAILURE;
        }
    };

    if json {
        let results: serde_json::Map<String, Value> = report
            .results
            .iter()
            .map(|(target, result)| {
                let value = match result {
                    ObjectResult::Reconciled(outcome) => {
                        serde_json::json!({"outcome": outcome.to_string()})
                    }
                    ObjectResult::Failed { attempts, error } => {
                        serde_json::json!({"outcome": "failed", "attempts": attempts, "error": error})
                    }
                };
                (target.to_string(), value)
            })
            .collect();
        let doc = serde_json::json!({
            "results": results,
            "requeues": report.requeues,
            "cancelled": report.cancelled,
        });
        match serde_json::to_string_pretty(&doc) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("Error serializing output: {}", e);
                return EXIT_FAILURE;
            }
        }
    } else {
        for (target, result) in &report.results {
            match result {
                ObjectResult::Reconciled(outcome) => {
                    println!("{:<50} {}", target.to_string(), outcome)
                }
                ObjectResult::Failed { attempts, error } => {
                    println!(
                        "{:<50} failed after {} attempts: {}",
                        target.to_string(),
                        attempts,
                        error
                    )
                }
            }
        }
        println!();
        println!("{}", report.summary());
    }

    if report.cancelled {
        EXIT_CANCELLED
    } else if report.failed().is_empty() {
        0
    } else {
        EXIT_FAILURE
    }
}

fn run_verify(config: &EffectiveConfig, store_dir: PathBuf, kind: &str, target: &str) -> i32 {
    let kind = match ObjectKind::parse(kind) {
        Ok(kind) => kind,
        Err(e) => {
            eprintln!("Error: {}", e);
            return EXIT_CONFIG;
        }
    };
    let Some((namespace, name)) = target.split_once('/') else {
        eprintln!("Error: target must be <namespace>/<name>, got '{}'", target);
        return EXIT_CONFIG;
    };

    let stack = match Stack::open(config, &store_dir) {
        Ok(stack) => stack,
        Err(e) => {
            eprintln!("Error: {}", e);
            return EXIT_CONFIG;
        }
    };
    let obj = match stack.store.get(kind, namespace, name) {
        Ok(obj) => obj,
        Err(e) => {
            eprintln!("Error: {}", e);
            return EXIT_FAILURE;
        }
    };

    let verifier = Verifier::new(stack.registry.clone(), stack.settings.clone());
    let report = verifier.verify(&SignContext::background(), &obj);
    for verified in &report.verified {
        println!("ok      {} ({})", verified.key, verified.backend);
    }
    for error in &report.errors {
        println!("FAILED  {}", error);
    }
    println!();
    println!("{}", report);

    if report.is_ok() {
        0
    } else {
        EXIT_FAILURE
    }
}

fn run_generate_key(path: PathBuf, force: bool) -> i32 {
    if path.exists() && !force {
        eprintln!(
            "Error: {} already exists (use --force to overwrite)",
            path.display()
        );
        return EXIT_FAILURE;
    }
    match X509Signer::generate_to_file(&path) {
        Ok(signer) => {
            println!("Wrote signing key to {}", path.display());
            println!("Key ID: {}", signer.key_id());
            0
        }
        Err(e) => {
            eprintln!("Error generating key: {}", e);
            EXIT_FAILURE
        }
    }
}

fn run_config(config: &EffectiveConfig, json: bool) -> i32 {
    if json {
        return match config.to_json() {
            Ok(text) => {
                println!("{}", text);
                0
            }
            Err(e) => {
                eprintln!("Error serializing config: {}", e);
                EXIT_FAILURE
            }
        };
    }

    let settings = &config.settings;
    for source in &config.sources {
        match &source.path {
            Some(path) => println!("source: {:?} ({})", source.origin, path),
            None => println!("source: {:?}", source.origin),
        }
    }
    println!();
    for (section, artifact) in [
        ("taskrun", &settings.artifacts.taskrun),
        ("pipelinerun", &settings.artifacts.pipelinerun),
        ("oci", &settings.artifacts.oci),
        ("sbom", &settings.artifacts.sbom),
        ("maven", &settings.artifacts.maven),
    ] {
        let storage: Vec<&str> = artifact.storage.iter().map(String::as_str).collect();
        if artifact.enabled() {
            println!(
                "  {:<12} format={} signer={} storage={}",
                section,
                artifact.format,
                artifact.signer,
                storage.join(",")
            );
        } else {
            println!("  {:<12} disabled", section);
        }
    }
    println!();
    println!("  transparency: {}", settings.transparency.enabled);
    println!("  docdb:        {}", settings.storage.docdb.url);
    println!(
        "  workers:      {} (max requeues {})",
        settings.controller.threads_per_controller, settings.controller.max_requeues
    );
    0
}
