//! mmsim - event-loop workload simulator for the mmgc memory manager.
//!
//! Parses arguments with clap, installs a tracing subscriber that also
//! captures the collector's `log` records, and dispatches to the command
//! handlers.

mod commands;
mod error;
mod workload;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::{run_run, run_stress, RunArgs, StressArgs};
use error::{Result, SimError};

/// mmsim - drive the mmgc collector with synthetic workloads
#[derive(Parser, Debug)]
#[command(name = "mmsim")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Event-loop workload simulator for the mmgc memory manager", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true, env = "MMSIM_VERBOSE")]
    verbose: bool,

    /// Disable color output
    #[arg(long, global = true, env = "MMSIM_NO_COLOR")]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run an allocation workload through a simulated event loop
    ///
    /// Every iteration allocates one object and yields to the collector.
    /// A fraction of the objects stays rooted for one more round.
    Run(RunCommand),

    /// Mutate a random graph between collector steps and verify it
    ///
    /// Exits with an error if a reachable object is freed or garbage
    /// survives a full collection.
    Stress(StressCommand),
}

/// Arguments for the run subcommand.
#[derive(Parser, Debug)]
struct RunCommand {
    /// Objects allocated per round
    #[arg(short, long, default_value_t = 10_000)]
    objects: usize,

    /// Number of rounds
    #[arg(short, long, default_value_t = 10)]
    rounds: usize,

    /// Percentage of objects kept alive into the next round
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u8).range(0..=100))]
    retain: u8,

    /// Collector time budget per slice in microseconds (0 runs whole cycles)
    #[arg(long, default_value_t = 1000)]
    budget_us: u64,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Collect before every allocation
    #[arg(long)]
    aggressive: bool,

    /// Heap size in chunks below which the event loop never collects
    #[arg(long, default_value_t = 2)]
    min_chunks: usize,

    /// Workload seed
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

/// Arguments for the stress subcommand.
#[derive(Parser, Debug)]
struct StressCommand {
    /// Mutations to perform
    #[arg(short, long, default_value_t = 10_000)]
    iterations: usize,

    /// Workload seed
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.no_color).context("setting up logging")?;

    execute_command(cli.command, cli.verbose).context("mmsim failed")
}

/// Install the tracing subscriber.
///
/// `RUST_LOG` overrides the default filter. Output goes to stderr so JSON
/// reports on stdout stay parseable.
fn init_logging(verbose: bool, no_color: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("warn")
        }
    });

    let subscriber = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(!no_color)
        .with_target(verbose)
        .with_thread_ids(false)
        .with_thread_names(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(subscriber)
        .try_init()
        .map_err(|e| SimError::Logging(e.to_string()))?;

    Ok(())
}

fn execute_command(command: Commands, verbose: bool) -> Result<()> {
    match command {
        Commands::Run(args) => run_run(RunArgs {
            objects: args.objects,
            rounds: args.rounds,
            retain: args.retain,
            budget_us: args.budget_us,
            aggressive: args.aggressive,
            min_chunks: args.min_chunks,
            seed: args.seed,
            json: args.json,
            verbose,
        }),
        Commands::Stress(args) => run_stress(StressArgs {
            iterations: args.iterations,
            seed: args.seed,
            verbose,
        }),
    }
}
