//! MCP Harness CLI
//!
//! The `mcp-harness` command runs MCP servers in disposable sandboxes and
//! reports how well their tools behave.
//!
//! ## Commands
//!
//! - `test`: run one target now and print its report
//! - `batch`: schedule several targets concurrently and wait for them
//! - `list`: show catalog targets with their last result
//! - `register`: add a target to the catalog
//! - `cleanup`: remove every harness instance left on the engine

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn, Level};

use mcp_harness_core::{
    CatalogStore, DockerCli, EnvValue, FsCatalog, HarnessConfig, HeuristicAssessor, Orchestrator,
    RuleBasedGenerator, RunOverrides, SandboxManager, Scheduler, TargetMetadata, TestReport,
    TriggerOutcome, METRICS,
};

#[derive(Parser)]
#[command(name = "mcp-harness")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Containerized conformance and quality testing for MCP servers", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Harness configuration file (JSON)
    #[arg(short, long, global = true, env = "MCP_HARNESS_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding target checkouts
    #[arg(long, global = true, env = "MCP_HARNESS_REPOS_DIR")]
    repos_dir: Option<PathBuf>,

    /// Catalog directory
    #[arg(long, global = true, env = "MCP_HARNESS_CATALOG_DIR")]
    catalog_dir: Option<PathBuf>,

    /// Container engine binary (docker, podman)
    #[arg(long, global = true, env = "MCP_HARNESS_ENGINE")]
    engine: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Test one target and print the report as JSON
    Test {
        /// Target name
        target: String,

        #[command(flatten)]
        launch: LaunchArgs,

        /// Mark the target running and store the report in the catalog
        #[arg(long)]
        save: bool,
    },

    /// Test several targets concurrently (every eligible catalog target if
    /// none are named)
    Batch {
        targets: Vec<String>,
    },

    /// List catalog targets with their last status and pass rate
    List,

    /// Register a target in the catalog
    Register {
        /// Target name
        name: String,

        /// Local checkout of the server
        #[arg(short, long)]
        path: Option<PathBuf>,

        /// Git URL the checkout came from
        #[arg(long)]
        repo_url: Option<String>,

        /// Pre-built image to pull instead of building
        #[arg(long)]
        image: Option<String>,

        /// Server command
        #[arg(long)]
        command: Option<String>,

        /// Server argument (repeatable)
        #[arg(long = "arg", allow_hyphen_values = true)]
        args: Vec<String>,

        /// Environment variable KEY=VALUE (repeatable)
        #[arg(short, long = "env", value_parser = parse_env)]
        env: Vec<(String, String)>,

        #[arg(long)]
        description: Option<String>,
    },

    /// Remove every harness-named instance on the engine
    Cleanup,
}

/// Per-run launch overrides.
#[derive(clap::Args)]
struct LaunchArgs {
    /// Override the server command
    #[arg(long)]
    command: Option<String>,

    /// Override the server arguments (repeatable)
    #[arg(long = "arg", allow_hyphen_values = true)]
    args: Vec<String>,

    /// Extra environment variable KEY=VALUE (repeatable)
    #[arg(short, long = "env", value_parser = parse_env)]
    env: Vec<(String, String)>,

    /// Seconds to wait for the instance to come up
    #[arg(long)]
    startup_timeout: Option<u64>,

    /// Pull this image instead of building from source
    #[arg(long)]
    image: Option<String>,
}

impl LaunchArgs {
    fn into_overrides(self) -> RunOverrides {
        RunOverrides {
            image: self.image,
            command: self.command,
            args: (!self.args.is_empty()).then_some(self.args),
            env_vars: self.env.into_iter().collect(),
            startup_timeout_secs: self.startup_timeout,
        }
    }
}

fn parse_env(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    mcp_harness_core::init_tracing(cli.json, level);

    let config = load_config(&cli)?;
    let catalog = Arc::new(
        FsCatalog::new(&config.catalog_dir)
            .with_context(|| format!("Failed to open catalog at {}", config.catalog_dir.display()))?,
    );

    let result = match cli.command {
        Commands::Test {
            target,
            launch,
            save,
        } => cmd_test(config, catalog, &target, launch.into_overrides(), save).await,
        Commands::Batch { targets } => cmd_batch(config, catalog, targets).await,
        Commands::List => cmd_list(catalog.as_ref(), cli.json).await,
        Commands::Register {
            name,
            path,
            repo_url,
            image,
            command,
            args,
            env,
            description,
        } => {
            let mut meta = TargetMetadata::new(name);
            meta.local_path = path;
            meta.repo_url = repo_url;
            meta.image_reference = image;
            meta.command = command;
            meta.args = args;
            meta.description = description;
            meta.env = env.into_iter().map(|(k, v)| (k, EnvValue::Plain(v))).collect();
            cmd_register(catalog.as_ref(), meta).await
        }
        Commands::Cleanup => cmd_cleanup(config, catalog).await,
    };

    METRICS.flush();
    result
}

fn load_config(cli: &Cli) -> Result<HarnessConfig> {
    let mut config = match &cli.config {
        Some(path) => HarnessConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => HarnessConfig::default(),
    };
    if let Some(dir) = &cli.repos_dir {
        config.repos_dir = dir.clone();
    }
    if let Some(dir) = &cli.catalog_dir {
        config.catalog_dir = dir.clone();
    }
    if let Some(engine) = &cli.engine {
        config.engine_binary = engine.clone();
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn build_scheduler(config: HarnessConfig, catalog: Arc<FsCatalog>) -> Result<Scheduler> {
    let engine = DockerCli::new(config.engine_binary.clone());
    engine
        .check_available()
        .await
        .with_context(|| format!("Container engine '{}' is not usable", config.engine_binary))?;

    let sandbox = Arc::new(SandboxManager::from_config(Arc::new(engine), &config));
    let enabled = config.testing_enabled;
    let orchestrator = Orchestrator::new(
        sandbox,
        catalog,
        Arc::new(RuleBasedGenerator::new()),
        Arc::new(HeuristicAssessor::new()),
        config,
    );
    Ok(Scheduler::new(Arc::new(orchestrator), enabled))
}

async fn cmd_test(
    config: HarnessConfig,
    catalog: Arc<FsCatalog>,
    target: &str,
    overrides: RunOverrides,
    save: bool,
) -> Result<()> {
    let scheduler = build_scheduler(config, catalog).await?;
    let report = if save {
        scheduler
            .retest(target, Some(overrides))
            .await
            .with_context(|| format!("Failed to test '{target}'"))?
    } else {
        scheduler.orchestrator().test_target(target, &overrides).await
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    summarize(&report);
    if let Some(err) = &report.error {
        bail!("run for '{}' ended early: {}", target, err.message);
    }
    Ok(())
}

/// One line per target on stderr, after the JSON on stdout.
fn summarize(report: &TestReport) {
    let quality = report
        .average_quality()
        .map(|q| format!("{q:.1}/10"))
        .unwrap_or_else(|| "-".to_string());
    eprintln!(
        "{}: {}/{} passed ({:.0}%), quality {}, {} ms",
        report.target_name,
        report.passed_tests,
        report.total_tests,
        report.success_rate(),
        quality,
        report.execution_time_ms
    );
}

async fn cmd_batch(config: HarnessConfig, catalog: Arc<FsCatalog>, targets: Vec<String>) -> Result<()> {
    let scheduler = build_scheduler(config, catalog.clone()).await?;

    let targets = if targets.is_empty() {
        catalog
            .list_targets()
            .await
            .context("Failed to list catalog targets")?
            .into_iter()
            .filter(|meta| scheduler.should_test(meta))
            .map(|meta| meta.name)
            .collect()
    } else {
        targets
    };
    if targets.is_empty() {
        println!("No targets to test.");
        return Ok(());
    }

    let mut handles = Vec::new();
    for target in &targets {
        match scheduler.trigger(target, None) {
            TriggerOutcome::Scheduled(handle) => handles.push(handle),
            TriggerOutcome::AlreadyRunning => warn!(target = %target, "already running, skipped"),
            TriggerOutcome::Disabled => bail!("testing is disabled in the configuration"),
        }
    }
    info!(scheduled = handles.len(), "waiting for runs");
    println!("{}", serde_json::to_string_pretty(&scheduler.status())?);

    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "run task failed");
        }
    }

    for target in &targets {
        if let Some(report) = catalog.get_target(target).await?.and_then(|m| m.last_report) {
            summarize(&report);
        }
    }
    println!("{}", serde_json::to_string_pretty(&scheduler.status())?);
    Ok(())
}

#[derive(Serialize)]
struct ListRow {
    name: String,
    status: Option<String>,
    pass_rate: Option<f64>,
    average_quality: Option<f64>,
}

async fn cmd_list(catalog: &FsCatalog, json: bool) -> Result<()> {
    let targets = catalog
        .list_targets()
        .await
        .context("Failed to list catalog targets")?;
    if targets.is_empty() {
        println!("No targets registered. Run 'mcp-harness register' first.");
        return Ok(());
    }

    let rows: Vec<ListRow> = targets
        .into_iter()
        .map(|meta| ListRow {
            status: meta.test_status.map(|s| s.to_string()),
            pass_rate: meta.last_report.as_ref().map(TestReport::success_rate),
            average_quality: meta.last_report.as_ref().and_then(TestReport::average_quality),
            name: meta.name,
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    for row in &rows {
        println!(
            "{:<32} {:<10} {:>7} {:>8}",
            row.name,
            row.status.as_deref().unwrap_or("untested"),
            row.pass_rate
                .map(|r| format!("{r:.0}%"))
                .unwrap_or_else(|| "-".to_string()),
            row.average_quality
                .map(|q| format!("{q:.1}"))
                .unwrap_or_else(|| "-".to_string()),
        );
    }
    Ok(())
}

async fn cmd_register(catalog: &FsCatalog, meta: TargetMetadata) -> Result<()> {
    if meta.local_path.is_none() && meta.image_reference.is_none() && meta.repo_url.is_none() {
        bail!("register needs at least one of --path, --image or --repo-url");
    }
    if let Some(path) = &meta.local_path {
        if !path.is_dir() {
            bail!("{} is not a directory", path.display());
        }
    }
    let name = meta.name.clone();
    catalog
        .put_target(meta)
        .await
        .with_context(|| format!("Failed to register '{name}'"))?;
    println!("Registered '{name}'");
    Ok(())
}

async fn cmd_cleanup(config: HarnessConfig, catalog: Arc<FsCatalog>) -> Result<()> {
    let scheduler = build_scheduler(config, catalog).await?;
    let removed = scheduler
        .cleanup_all()
        .await
        .context("Failed to clean up instances")?;
    println!("Removed {removed} instance(s)");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env() {
        assert_eq!(parse_env("A=b=c").unwrap(), ("A".into(), "b=c".into()));
        assert_eq!(parse_env("EMPTY=").unwrap(), ("EMPTY".into(), String::new()));
        assert!(parse_env("novalue").is_err());
        assert!(parse_env("=x").is_err());
    }

    #[test]
    fn test_launch_args_into_overrides() {
        let cli = Cli::try_parse_from([
            "mcp-harness",
            "test",
            "weather",
            "--command",
            "uv",
            "--arg",
            "run",
            "--arg",
            "server.py",
            "-e",
            "API_KEY=k",
            "--startup-timeout",
            "5",
        ])
        .unwrap();
        let Commands::Test { target, launch, save } = cli.command else {
            panic!("expected test command");
        };
        assert_eq!(target, "weather");
        assert!(!save);
        let overrides = launch.into_overrides();
        assert_eq!(overrides.command.as_deref(), Some("uv"));
        assert_eq!(overrides.args.unwrap(), vec!["run", "server.py"]);
        assert_eq!(overrides.env_vars["API_KEY"], "k");
        assert_eq!(overrides.startup_timeout_secs, Some(5));
    }

    #[test]
    fn test_no_args_keeps_configured_args() {
        let cli = Cli::try_parse_from(["mcp-harness", "test", "weather"]).unwrap();
        let Commands::Test { launch, .. } = cli.command else {
            panic!("expected test command");
        };
        let overrides = launch.into_overrides();
        assert!(overrides.args.is_none());
        assert!(overrides.env_vars.is_empty());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["mcp-harness", "list", "--json", "--engine", "podman"]).unwrap();
        assert!(cli.json);
        assert_eq!(cli.engine.as_deref(), Some("podman"));
    }
}
