//! RxVis command line runner.
//!
//! Runs a graph document and prints the event stream to stdout, one event
//! per line. Logs go to stderr.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use rxvis_rs::{
    config::SimulationConfig,
    pipeline::{FlowNotification, FlowValueEvent, Graph, RunOutcome, RunReport, Simulation},
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Parser)]
#[command(name = "rxvis-rs", version, about = "Simulate reactive pipeline diagrams")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a graph and print its events
    Run {
        /// Graph document (JSON)
        graph: PathBuf,
        /// Simulation config (TOML); defaults to the user config
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
        /// Disable broken elements instead of rejecting the graph
        #[arg(long)]
        tolerate_partial: bool,
    },
    /// Check a graph without running it
    Validate {
        graph: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,rxvis_rs=debug")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match Cli::parse().command {
        Command::Run {
            graph,
            config,
            format,
            tolerate_partial,
        } => {
            let mut config = load_config(config.as_deref())?;
            config.tolerate_partial_graphs |= tolerate_partial;
            run(&graph, config, format)
        }
        Command::Validate { graph, config } => {
            let config = load_config(config.as_deref())?;
            validate(&graph, config)
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<SimulationConfig> {
    match path {
        Some(path) => Ok(SimulationConfig::load(path)?),
        None => Ok(SimulationConfig::load_or_default()),
    }
}

fn load_graph(path: &Path) -> anyhow::Result<Graph> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read graph {}", path.display()))?;
    Graph::from_json_str(&content)
        .with_context(|| format!("Failed to parse graph {}", path.display()))
}

fn run(path: &Path, config: SimulationConfig, format: Format) -> anyhow::Result<()> {
    let graph = load_graph(path)?;
    let simulation = Simulation::with_script_engine(config);
    let handle = simulation.spawn(&graph)?;

    // Print while the run is in progress. A panicked run never closes the
    // stream, so poll the thread as well.
    let events = handle.events();
    loop {
        match events.recv_timeout(POLL_INTERVAL) {
            Some(FlowNotification::Event(event)) => print_event(&event, format)?,
            Some(FlowNotification::Closed) => break,
            None if handle.is_finished() => {
                for notification in events.drain() {
                    if let FlowNotification::Event(event) = notification {
                        print_event(&event, format)?;
                    }
                }
                break;
            }
            None => {}
        }
    }

    let summary = handle.join()?;
    let report = RunReport::from_events(&summary.events());
    match format {
        Format::Text => eprint!("{}", report),
        Format::Json => eprintln!("{}", serde_json::to_string(&report)?),
    }
    for diagnostic in &summary.diagnostics {
        eprintln!("diagnostic: {}", diagnostic);
    }
    if !summary.pending_elements.is_empty() {
        let pending: Vec<&str> = summary.pending_elements.iter().map(|id| id.as_str()).collect();
        eprintln!("pending: {}", pending.join(", "));
    }

    match summary.outcome {
        RunOutcome::Completed => Ok(()),
        RunOutcome::Aborted => bail!("simulation aborted"),
        RunOutcome::StepLimitExceeded => bail!(
            "simulation exceeded the step limit of {}",
            simulation.config().step_limit
        ),
    }
}

fn print_event(event: &FlowValueEvent, format: Format) -> anyhow::Result<()> {
    match format {
        Format::Text => println!("{}", event.summary()),
        Format::Json => println!("{}", serde_json::to_string(event)?),
    }
    Ok(())
}

fn validate(path: &Path, config: SimulationConfig) -> anyhow::Result<()> {
    let graph = load_graph(path)?;
    let simulation = Simulation::with_script_engine(config);
    let plan = simulation.compile(&graph)?;
    for diagnostic in &plan.diagnostics {
        eprintln!("diagnostic: {}", diagnostic);
    }
    for id in &plan.unreachable_results {
        eprintln!("unreachable result: {}", id);
    }
    println!(
        "ok: {} elements, {} active, {} seeds",
        plan.stats.total_elements, plan.stats.active_elements, plan.stats.seed_elements
    );
    Ok(())
}
