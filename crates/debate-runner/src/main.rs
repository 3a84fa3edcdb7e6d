//! debate-runner: run a scripted multi-agent consensus debate.
//!
//! ```bash
//! debate-runner scenario.toml
//! debate-runner scenario.toml --config consensus.toml --json
//! RUST_LOG=consensus=debug debate-runner scenario.toml --store-dir ./runs
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use consensus::{ConsensusConfig, FileDebateStore};
use debate_runner::{build_protocol, render_text, Scenario};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Scenario TOML describing the task, agents and scripted analyses
    scenario: PathBuf,

    /// Consensus config TOML; replaces the scenario's [config] section
    #[arg(long)]
    config: Option<PathBuf>,

    /// Persist the transcript as JSON under this directory
    #[arg(long)]
    store_dir: Option<PathBuf>,

    /// Print the full run as JSON instead of the text report
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "consensus=info,debate_runner=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let scenario = Scenario::load(&args.scenario)?;
    let config = match &args.config {
        Some(path) => ConsensusConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => scenario.consensus_config(),
    }
    .with_env_overrides();

    let mut protocol = build_protocol(&scenario)?;
    if let Some(dir) = &args.store_dir {
        let store = FileDebateStore::open(dir)
            .with_context(|| format!("Failed to open store {}", dir.display()))?;
        protocol = protocol.with_store(Arc::new(store));
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received — finishing with the proposals collected so far");
            on_signal.cancel();
        }
    });

    info!(
        task_id = %scenario.task.id,
        agents = scenario.agents.len(),
        "running scenario"
    );
    let run = protocol
        .run_with_cancel(
            &scenario.task.id,
            &scenario.task.description,
            &scenario.task.data,
            &config,
            cancel,
        )
        .await
        .context("Consensus run failed")?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&run).context("Failed to serialize run")?
        );
    } else {
        print!("{}", render_text(&run));
    }

    Ok(())
}
