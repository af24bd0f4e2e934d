//! `coopctl` entry point.
//!
//! This binary is the composition root for the workspace. Responsibilities:
//!
//! 1. **Wire observability** via [`observability::init`]: `tracing-subscriber`
//!    on stderr, plus OTLP span and metric export when
//!    `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
//! 2. **Load configuration**: an optional JSON [`cooperation::CooperationConfig`]
//!    file, overridden by command-line flags.
//! 3. **Dispatch** one of the subcommands:
//!    - `key` prints the label and fingerprint a cooperation key would get.
//!    - `simulate` runs concurrent callers (optionally across several
//!      simulated nodes sharing a lease table) and prints a JSON report.
//!
//! Reports go to stdout; logs go to stderr.

mod observability;
mod simulate;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use cooperation::{CooperationConfig, CooperationKey, CooperationPointFactory};
use serde::Serialize;

#[derive(Debug, Parser)]
#[command(name = "coopctl", version, about = "Inspect and exercise single-flight cooperation points")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the label and fingerprint of a cooperation key.
    Key {
        scope: String,
        action: String,
        nested: Vec<String>,
    },
    /// Run concurrent callers against cooperation points and report the outcome.
    Simulate(SimulateArgs),
}

#[derive(Debug, clap::Args)]
struct SimulateArgs {
    /// JSON file holding a cooperation config; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Longest a follower waits on a local leader (0 waits forever).
    #[arg(long)]
    major_timeout_ms: Option<u64>,

    /// Longest a node waits on another node's lease (0 waits forever).
    #[arg(long)]
    minor_timeout_ms: Option<u64>,

    /// Participant cap per key, leader included (0 is unlimited).
    #[arg(long)]
    threads_per_key: Option<usize>,

    /// Run every caller's work directly.
    #[arg(long)]
    disabled: bool,

    #[arg(long, default_value_t = 5)]
    callers: usize,

    #[arg(long, default_value_t = 1)]
    nodes: usize,

    /// Simulated upstream latency.
    #[arg(long, default_value_t = 200)]
    work_ms: u64,

    /// Delay between successive callers on a node.
    #[arg(long, default_value_t = 2)]
    stagger_ms: u64,

    /// Let followers that time out or hit the cap run their own fetch.
    #[arg(long)]
    fallback: bool,

    /// Consult the shared blob store before a fallback fetch.
    #[arg(long)]
    check: bool,

    #[arg(long, default_value = "npm-proxy")]
    scope: String,

    #[arg(long, default_value = "fetch")]
    action: String,

    #[arg(default_values_t = [String::from("lodash"), String::from("4.17.21")])]
    nested: Vec<String>,
}

#[derive(Debug, Serialize)]
struct KeyView<'a> {
    label: &'a str,
    fingerprint: &'a str,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let telemetry = observability::init(cli.json_logs)?;

    let result = match cli.command {
        Command::Key { scope, action, nested } => print_key(&scope, &action, &nested),
        Command::Simulate(args) => run_simulation(args).await,
    };

    telemetry.shutdown();
    result
}

fn print_key(scope: &str, action: &str, nested: &[String]) -> anyhow::Result<()> {
    let nested: Vec<&str> = nested.iter().map(String::as_str).collect();
    let key = CooperationKey::create(scope, action, &nested)?;
    let view = KeyView {
        label: key.label(),
        fingerprint: key.fingerprint(),
    };
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<CooperationConfig> {
    let Some(path) = path else {
        return Ok(CooperationConfig::default());
    };
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

async fn run_simulation(args: SimulateArgs) -> anyhow::Result<()> {
    let factory = CooperationPointFactory::new(load_config(args.config.as_ref())?);

    let mut builder = factory.configure();
    if let Some(ms) = args.major_timeout_ms {
        builder = builder.major_timeout(Duration::from_millis(ms));
    }
    if let Some(ms) = args.minor_timeout_ms {
        builder = builder.minor_timeout(Duration::from_millis(ms));
    }
    if let Some(threads) = args.threads_per_key {
        builder = builder.threads_per_key(threads);
    }
    if args.disabled {
        builder = builder.enabled(false);
    }
    tracing::info!(config = ?builder.config(), nodes = args.nodes, callers = args.callers, "Starting simulation");

    let scenario = simulate::Scenario {
        scope: args.scope,
        action: args.action,
        nested: args.nested,
        nodes: args.nodes.max(1),
        callers: args.callers,
        latency: Duration::from_millis(args.work_ms),
        stagger: Duration::from_millis(args.stagger_ms),
        fallback: args.fallback,
        check: args.check,
    };
    let report = simulate::run(&builder, scenario).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
