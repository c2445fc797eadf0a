//! ZeroTier One API conformance harness
//!
//! Provisions (or attaches to) a ZeroTier One instance, exercises its local
//! service API and checks every response against a JSON Schema bundle.
//!
//! ## Usage
//!
//! ```bash
//! # Run the conformance catalog against a fresh container
//! ztconform run
//!
//! # Run against an already running instance
//! AUTH_TOKEN=... ztconform run --target 127.0.0.1:9993
//!
//! # Check a saved payload against one schema
//! ztconform validate --schema NodeStatus status.json
//!
//! # Show which groups the target version would run
//! ztconform plan --version 1.12.2
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use ztconform_core::config::{
    DEFAULT_NODE_ID, DEFAULT_SCHEMA_BUNDLE, DEFAULT_VERSION, ENV_LOGS_DIR, ENV_SCHEMA_BUNDLE,
    ENV_VERSION,
};
use ztconform_core::logging::{write_run_metadata, JsonlLayer, RunMetadata};
use ztconform_core::{
    parse_version, ConfigError, HarnessConfig, NotFoundPolicy, ValidatorRegistry, VersionGate,
};
use ztconform_scenarios::{catalog, render_markdown, ConformanceSession, Node, ScenarioGroup};

/// Exit status when the run completed but something did not conform.
const EXIT_NONCONFORMING: u8 = 2;

/// ZeroTier One API conformance harness
#[derive(Parser, Debug)]
#[command(name = "ztconform")]
#[command(version)]
#[command(about = "Check a ZeroTier One service API against its JSON Schemas")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Write JSONL run logs to this directory
    #[arg(long, global = true)]
    logs_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the conformance catalog
    Run(RunArgs),

    /// Print the /status response of the target
    Status(TargetArgs),

    /// Validate a JSON file against one schema
    Validate {
        /// Schema ID in the bundle
        #[arg(long)]
        schema: String,

        /// JSON file to check
        file: PathBuf,

        #[arg(long)]
        schema_bundle: Option<PathBuf>,
    },

    /// List the schema IDs in the bundle
    Schemas {
        #[arg(long)]
        schema_bundle: Option<PathBuf>,
    },

    /// Show the catalog and which groups the target version runs
    Plan {
        /// Target version (default: $ZT_VERSION or 1.14.0)
        #[arg(long)]
        version: Option<String>,

        #[arg(long)]
        node_id: Option<String>,
    },
}

#[derive(Args, Debug)]
struct TargetArgs {
    /// Target version; selects the image tag and version-gated groups
    #[arg(long)]
    version: Option<String>,

    /// host:port of a running instance (token from AUTH_TOKEN)
    #[arg(long)]
    target: Option<String>,

    #[arg(long)]
    schema_bundle: Option<PathBuf>,

    /// How a 404 from an unstable endpoint is treated
    #[arg(long, value_name = "fail|skip")]
    unstable_not_found: Option<NotFoundPolicy>,

    /// Member node ID used by the member scenarios
    #[arg(long)]
    node_id: Option<String>,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    target: TargetArgs,

    /// Also write the report to this file (JSON if it ends in .json)
    #[arg(long)]
    report: Option<PathBuf>,

    /// Print the report as JSON instead of markdown
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let logs_dir = cli
        .logs_dir
        .clone()
        .or_else(|| std::env::var(ENV_LOGS_DIR).ok().map(PathBuf::from));
    let session_id = chrono::Utc::now().format("%Y-%m-%dT%H-%M-%S").to_string();
    init_tracing(cli.verbose, logs_dir.as_deref(), &session_id);

    match cli.command {
        Commands::Run(args) => {
            let config = build_config(&args.target, logs_dir)?;
            run(config, &args, &session_id).await
        }
        Commands::Status(args) => {
            let config = build_config(&args, logs_dir)?;
            status(config).await
        }
        Commands::Validate {
            schema,
            file,
            schema_bundle,
        } => validate(&schema, &file, &bundle_path(schema_bundle)),
        Commands::Schemas { schema_bundle } => schemas(&bundle_path(schema_bundle)),
        Commands::Plan { version, node_id } => plan(version, node_id),
    }
}

fn init_tracing(verbose: bool, logs_dir: Option<&Path>, session_id: &str) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let jsonl = logs_dir.map(|dir| JsonlLayer::new(dir, session_id));
    let (jsonl, jsonl_error) = match jsonl {
        Some(Ok(layer)) => (Some(layer), None),
        Some(Err(e)) => (None, Some(e)),
        None => (None, None),
    };
    let jsonl_path = jsonl
        .as_ref()
        .map(|layer| layer.log_path().display().to_string());

    // Logs go to stderr so reports on stdout stay machine-readable.
    tracing_subscriber::registry()
        .with(jsonl)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();

    if let Some(path) = jsonl_path {
        tracing::info!(path = %path, session = %session_id, "JSONL logging enabled");
    }
    if let Some(e) = jsonl_error {
        tracing::warn!("Failed to initialize JSONL logging: {}", e);
    }
}

/// Environment first, then command-line overrides.
fn build_config(args: &TargetArgs, logs_dir: Option<PathBuf>) -> Result<HarnessConfig> {
    let mut config = match HarnessConfig::from_env() {
        Ok(config) => config,
        Err(ConfigError::MissingToken) => missing_token(),
        Err(e) => return Err(e).context("Invalid configuration"),
    };

    if let Some(version) = &args.version {
        config.set_version(version).context("Invalid --version")?;
    }
    if let Some(target) = &args.target {
        match config.set_external(target, None) {
            Ok(()) => {}
            Err(ConfigError::MissingToken) => missing_token(),
            Err(e) => return Err(e).context("Invalid --target"),
        }
    }
    if let Some(path) = &args.schema_bundle {
        config.schema_bundle = path.clone();
    }
    if let Some(policy) = args.unstable_not_found {
        config.not_found = policy;
    }
    if let Some(node_id) = &args.node_id {
        config.node_id = node_id.clone();
    }
    config.logs_dir = logs_dir;
    Ok(config)
}

/// Running against a live instance without its credential is not a test
/// failure; nothing runs.
fn missing_token() -> ! {
    eprintln!("{}", ConfigError::MissingToken);
    std::process::exit(1);
}

fn bundle_path(flag: Option<PathBuf>) -> PathBuf {
    flag.or_else(|| std::env::var(ENV_SCHEMA_BUNDLE).ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SCHEMA_BUNDLE))
}

async fn run(config: HarnessConfig, args: &RunArgs, session_id: &str) -> Result<ExitCode> {
    if let Some(logs_dir) = &config.logs_dir {
        let metadata = RunMetadata::new(
            session_id,
            config.target_version.to_string(),
            config.target.describe(),
            config.schema_bundle.display().to_string(),
        );
        if let Err(e) = write_run_metadata(logs_dir, &metadata) {
            tracing::warn!("Failed to write run metadata: {}", e);
        }
    }

    let session = ConformanceSession::new(config);
    let report = session.run().await.context("Conformance run aborted")?;

    let markdown = render_markdown(&report);
    let json = report.to_json().context("Failed to serialize report")?;
    if args.json {
        println!("{json}");
    } else {
        println!("{markdown}");
    }

    if let Some(path) = &args.report {
        let is_json = path.extension().map(|e| e == "json").unwrap_or(false);
        std::fs::write(path, if is_json { &json } else { &markdown })
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Report written");
    }

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_NONCONFORMING)
    })
}

async fn status(config: HarnessConfig) -> Result<ExitCode> {
    let session = ConformanceSession::new(config);
    let (endpoint, response) = session.status().await.context("Failed to query status")?;

    println!("Target: {}:{}", endpoint.host, endpoint.port);
    println!("HTTP {}", response.status);
    if let Some(body) = &response.body {
        println!("{}", serde_json::to_string_pretty(body)?);
    }
    Ok(if response.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn validate(schema: &str, file: &Path, bundle: &Path) -> Result<ExitCode> {
    let registry = ValidatorRegistry::load(bundle)
        .with_context(|| format!("Failed to load schema bundle {}", bundle.display()))?;
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let value: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("{} is not valid JSON", file.display()))?;

    let result = registry.check(schema, Some(&value))?;
    print!("{}", result.render(schema, Some(&value)));
    Ok(if result.is_valid() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_NONCONFORMING)
    })
}

fn schemas(bundle: &Path) -> Result<ExitCode> {
    let registry = ValidatorRegistry::load(bundle)
        .with_context(|| format!("Failed to load schema bundle {}", bundle.display()))?;
    for id in registry.bundle().ids() {
        println!("{id}");
    }
    Ok(ExitCode::SUCCESS)
}

fn plan(version: Option<String>, node_id: Option<String>) -> Result<ExitCode> {
    let version = version
        .or_else(|| std::env::var(ENV_VERSION).ok())
        .unwrap_or_else(|| DEFAULT_VERSION.to_string());
    let gate = VersionGate::new(parse_version(&version)?);
    let node_id = node_id.unwrap_or_else(|| DEFAULT_NODE_ID.to_string());

    println!("Target version: {}", gate.target());
    for group in catalog::zerotier(&node_id) {
        print_group(&group, &gate, 0);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_group(group: &ScenarioGroup, gate: &VersionGate, depth: usize) {
    let indent = "  ".repeat(depth);
    let decision = gate.decide(group.min_version.as_ref());
    if decision.is_included() {
        println!("{indent}{}", group.name);
    } else {
        println!("{indent}{} [skip: {decision}]", group.name);
        return;
    }
    for child in &group.children {
        match child {
            Node::Step(step) => {
                println!("{indent}  {} {} -> {}", step.method, step.path, step.schema)
            }
            Node::Group(nested) => print_group(nested, gate, depth + 1),
        }
    }
}
