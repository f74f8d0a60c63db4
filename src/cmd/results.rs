use crate::reports;
use arrayforge::config::OptimiserConfig;
use arrayforge::error::{AfResult, ArrayForgeError};
use arrayforge::results::ResultPostProcessor;
use clap::Args;
use std::path::PathBuf;
use tracing::info;

#[derive(Args, Debug, Clone)]
pub struct ResultsArgs {
    #[arg(short, long)]
    pub config: PathBuf,

    /// Write the consolidated table to this CSV file
    #[arg(long)]
    pub csv: Option<PathBuf>,
}

pub fn run(args: ResultsArgs) -> AfResult<()> {
    let config = OptimiserConfig::load_from_file(&args.config)?;
    let worker_dir = config.worker_dir.clone().ok_or_else(|| {
        ArrayForgeError::Configuration("Missing required key: worker_dir".to_string())
    })?;

    let processor = ResultPostProcessor::new(worker_dir, config.root_name());
    let table = processor.collect()?;

    reports::print_results_table(&table);
    reports::print_summary(&table.summary());
    if let Some(favorite) = processor.favorite()? {
        reports::print_favorite(&favorite);
    }

    if let Some(path) = &args.csv {
        table.write_csv_file(path)?;
        info!("💾 Wrote {} rows to {}", table.len(), path.display());
    }
    Ok(())
}
