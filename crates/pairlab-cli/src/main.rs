use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod session;
mod sim;

use session::{EditArgs, LabPaths, NewArgs, ShowArgs};
use sim::SimulateArgs;

#[derive(Parser)]
#[command(name = "pairlab")]
#[command(about = "Paired-session trial progression engine", long_about = None)]
struct Cli {
    /// Directory holding session records and trial logs; defaults to the
    /// platform's local data directory.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a session record, or resume the matching one
    New(NewArgs),
    /// List resumable session records
    List,
    /// Print one session record
    Show(ShowArgs),
    /// Edit a record before restarting it
    Edit(EditArgs),
    /// Drive a record with simulated participants and feeders
    Simulate(SimulateArgs),
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let paths = LabPaths::resolve(cli.data_dir)?;

    match cli.command {
        Commands::New(args) => session::new_record(&paths, &args),
        Commands::List => session::list_records(&paths),
        Commands::Show(args) => session::show_record(&paths, &args),
        Commands::Edit(args) => session::edit_record(&paths, &args),
        Commands::Simulate(args) => sim::run_simulation(&paths, &args),
    }
}

fn init_tracing() {
    let level = std::env::var("PAIRLAB_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
