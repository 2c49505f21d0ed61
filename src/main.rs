//! mindgraph — run search sub-query graphs from the command line
//!
//! Usage:
//!   mindgraph run --plan plan.jsonl              → execute a plan, print the final snapshot
//!   mindgraph run --plan p.jsonl --resume s.json → continue from a saved snapshot
//!   mindgraph validate snapshot.yaml             → validate and correct a snapshot file
//!   mindgraph config                             → print the effective configuration

mod plan;

use anyhow::Context;
use clap::{Parser, Subcommand};
use mindgraph_core::{adapter_for, EngineConfig, SnapshotAdapter};
use mindgraph_exec::{RunContext, Scheduler};
use mindgraph_search::build_chain;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_CONFIG: &str = "mindgraph.toml";

#[derive(Parser)]
#[command(
    name = "mindgraph",
    about = "Loop-governed execution of dynamic search sub-query graphs",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to engine config (TOML). Falls back to MINDGRAPH_CONFIG, then ./mindgraph.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,

    /// Write logs to a file (in addition to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a planner command file
    Run {
        /// Planner commands: JSON lines or a JSON array
        #[arg(short, long)]
        plan: PathBuf,
        /// Snapshot to resume from
        #[arg(short, long)]
        resume: Option<PathBuf>,
        /// Print execution events as JSON lines on stderr
        #[arg(long, default_value_t = false)]
        events: bool,
        /// Output format for the final snapshot: json, yaml, adjacency
        #[arg(short, long, default_value = "json")]
        format: String,
    },
    /// Validate a snapshot file and print the corrected result
    Validate {
        file: PathBuf,
        /// Input format (default: from the file extension)
        #[arg(short, long)]
        format: Option<String>,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_json, cli.log_file.as_deref());

    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var("MINDGRAPH_CONFIG").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let config = EngineConfig::load(&config_path);

    match cli.command {
        Commands::Run {
            plan,
            resume,
            events,
            format,
        } => run(config, &plan, resume.as_deref(), events, &format).await?,
        Commands::Validate { file, format } => validate(&file, format.as_deref())?,
        Commands::Config => print!("{}", config.to_toml()),
    }

    Ok(())
}

/// Logs go to stderr so stdout stays clean for snapshots.
fn init_tracing(json: bool, log_file: Option<&Path>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "mindgraph=info,mindgraph_exec=info,mindgraph_search=warn".into());

    let (plain, structured) = if json {
        (
            None,
            Some(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)),
        )
    } else {
        (
            Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
            None,
        )
    };

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let name = path.file_name().map(|n| n.to_owned()).unwrap_or_else(|| "mindgraph.log".into());
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            (
                Some(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(structured)
        .with(file_layer)
        .init();
    guard
}

async fn run(
    config: EngineConfig,
    plan_path: &Path,
    resume: Option<&Path>,
    print_events: bool,
    format: &str,
) -> anyhow::Result<()> {
    let problems = config.validate();
    if !problems.is_empty() {
        anyhow::bail!("invalid configuration:\n  {}", problems.join("\n  "));
    }
    let output = adapter_for(format).ok_or_else(|| anyhow::anyhow!("unknown output format: {}", format))?;

    let text = std::fs::read_to_string(plan_path)
        .with_context(|| format!("reading plan {}", plan_path.display()))?;
    let plan = plan::parse_plan(&text)?;
    for (line, err) in &plan.rejected {
        warn!(entry = *line, error = %err, "plan entry is not a known command, skipped");
    }

    let snapshot = match resume {
        Some(path) => Some(load_snapshot(path, None)?),
        None => None,
    };

    let chain = Arc::new(build_chain(&config.search));
    info!(backends = ?chain.backend_names(), commands = plan.commands.len(), "starting run");
    let scheduler = Scheduler::new(&config, Arc::clone(&chain));
    let (ctx, mut rx) = RunContext::new(&config.scheduler);

    let printer = if print_events {
        Some(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Ok(line) = serde_json::to_string(&event) {
                    eprintln!("{}", line);
                }
            }
        }))
    } else {
        drop(rx);
        None
    };

    let result = match &snapshot {
        Some(snapshot) => scheduler.resume_commands(&ctx, snapshot, plan.commands).await,
        None => scheduler.run_commands(&ctx, plan.commands).await,
    };

    // Closing the context closes the event stream.
    drop(ctx);
    if let Some(printer) = printer {
        let _ = printer.await;
    }

    for status in chain.status().await {
        if status.state != "closed" {
            warn!(backend = %status.backend, state = status.state, strikes = status.strikes, "backend circuit not closed at end of run");
        }
    }

    let bytes = output.encode(&result)?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&bytes)?;
    stdout.write_all(b"\n")?;
    Ok(())
}

fn validate(path: &Path, format: Option<&str>) -> anyhow::Result<()> {
    let (snapshot, corrections) = decode_file(path, format)?;
    let report = serde_json::json!({
        "snapshot": snapshot,
        "corrections": corrections,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !corrections.is_empty() {
        info!(count = corrections.len(), "snapshot needed corrections");
    }
    Ok(())
}

fn load_snapshot(path: &Path, format: Option<&str>) -> anyhow::Result<mindgraph_core::Snapshot> {
    let (snapshot, corrections) = decode_file(path, format)?;
    for c in &corrections {
        warn!(path = %c.path, "{}", c.message);
    }
    Ok(snapshot)
}

fn decode_file(
    path: &Path,
    format: Option<&str>,
) -> anyhow::Result<(mindgraph_core::Snapshot, Vec<mindgraph_core::Correction>)> {
    let adapter = pick_adapter(path, format)?;
    let bytes = std::fs::read(path).with_context(|| format!("reading snapshot {}", path.display()))?;
    Ok(adapter.decode(&bytes))
}

fn pick_adapter(path: &Path, format: Option<&str>) -> anyhow::Result<Box<dyn SnapshotAdapter>> {
    let name = match format {
        Some(f) => f.to_string(),
        None => path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("json")
            .to_ascii_lowercase(),
    };
    adapter_for(&name).ok_or_else(|| anyhow::anyhow!("unknown snapshot format: {}", name))
}
