use crate::reports;
use arrayforge::config::{OptimiserConfig, RunOptions, RunOverrides};
use arrayforge::error::AfResult;
use arrayforge::optimizer::{Driver, OptimiserThread};
use clap::Args;
use std::path::PathBuf;
use tracing::info;

#[derive(Args, Debug, Clone)]
pub struct OptimiseArgs {
    /// Optimiser configuration file (JSON)
    #[arg(short, long)]
    pub config: PathBuf,

    /// Resume from the checkpoint in the worker directory
    #[arg(long, default_value_t = false)]
    pub restart: bool,

    #[command(flatten)]
    pub overrides: RunOverrides,
}

pub fn run(args: OptimiseArgs) -> AfResult<()> {
    info!("📂 Loading configuration: {}", args.config.display());
    let mut config = OptimiserConfig::load_from_file(&args.config)?;
    args.overrides.apply(&mut config);
    let options = RunOptions::try_from(&config)?;

    info!(
        "🚀 {} optimisation in {}",
        if args.restart { "Restarting" } else { "Starting" },
        options.worker_dir.display()
    );
    let driver = Driver::new(options, args.restart)?;
    let summary = OptimiserThread::spawn(driver)?.join()?;

    reports::print_run_summary(&summary);
    Ok(())
}
