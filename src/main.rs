use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::eyre;
use rtdiag::config::{self, load_config, load_config_from_path};
use rtdiag::system::tracker::TrackingAllocator;
use rtdiag::system::workload;
use rtdiag::{Collector, logging, report};

#[global_allocator]
static GLOBAL: TrackingAllocator = TrackingAllocator;

#[derive(Parser)]
#[command(
    name = "rtdiag",
    version,
    about = "One-shot runtime diagnostics snapshot of the running process"
)]
struct Cli {
    /// Path to config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the snapshot as JSON instead of the text report.
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Number of allocation sites to list.
    #[arg(long)]
    top: Option<usize>,

    /// Workload compute threads.
    #[arg(long)]
    threads: Option<usize>,

    /// Workload child processes.
    #[arg(long)]
    processes: Option<usize>,

    /// Raise log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Workload child entry point.
    #[command(name = workload::CHILD_SUBCOMMAND, hide = true)]
    WorkloadChild { iterations: u64 },
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    if let Some(Command::WorkloadChild { iterations }) = cli.command {
        workload::run_child(iterations)?;
        return Ok(());
    }

    logging::init_tracing(cli.verbose, cli.json)?;
    let config = load_config_for_cli(&cli);

    let mut collector = Collector::new(&config)?;
    let snapshot = collector.collect_snapshot()?;

    if cli.json {
        let json = report::render_json(&snapshot)
            .map_err(|e| eyre!("failed to serialize snapshot: {e}"))?;
        println!("{json}");
    } else {
        print!("{}", report::render(&snapshot));
    }

    Ok(())
}

fn load_config_for_cli(cli: &Cli) -> config::Config {
    let mut config = match &cli.config {
        Some(path) => load_config_from_path(path),
        None => load_config(),
    };

    if let Some(top) = cli.top {
        config.memory.top_n = top;
    }
    if let Some(threads) = cli.threads {
        config.workload.threads = threads;
    }
    if let Some(processes) = cli.processes {
        config.workload.processes = processes;
    }

    config
}
