use crate::reports;
use arrayforge::config::{config_status, optimiser_status, worker_dir_status, OptimiserConfig};
use arrayforge::error::AfResult;
use clap::Args;
use std::path::PathBuf;

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(short, long)]
    pub config: PathBuf,
}

pub fn run(args: StatusArgs) -> AfResult<()> {
    let config = OptimiserConfig::load_from_file(&args.config)?;

    let (config_msg, config_code) = config_status(&config);
    let (dir_msg, dir_code) = worker_dir_status(&config);
    let mut rows = vec![
        ("Configuration", config_msg, config_code),
        ("Worker directory", dir_msg, dir_code),
    ];
    if let (Some(msg), code) = optimiser_status(&config) {
        rows.push(("Optimisation", msg, code));
    }

    reports::print_status(&rows);
    Ok(())
}
