use clap::{Parser, Subcommand};
use std::process;
use tracing::error;
use tracing::Level;

mod cmd;
mod reports;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(global = true, long, default_value_t = false)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run or restart a layout optimisation
    Optimise(cmd::optimise::OptimiseArgs),
    /// Evaluate one candidate layout (invoked by the optimiser)
    Worker(cmd::worker::WorkerArgs),
    /// Consolidate the results of a run
    Results(cmd::results::ResultsArgs),
    /// Report configuration and run state
    Status(cmd::status::StatusArgs),
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.debug { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .init();

    let outcome = match cli.command {
        Commands::Optimise(args) => cmd::optimise::run(args),
        Commands::Worker(args) => cmd::worker::run(args),
        Commands::Results(args) => cmd::results::run(args),
        Commands::Status(args) => cmd::status::run(args),
    };

    if let Err(e) = outcome {
        error!("❌ {}", e);
        process::exit(1);
    }
}
