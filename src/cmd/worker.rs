use arrayforge::error::AfResult;
use arrayforge::geometry::LayoutParameters;
use arrayforge::worker::{run_worker, SurrogateRunner, WorkerStatus};
use clap::Args;
use std::path::PathBuf;
use tracing::warn;

#[derive(Args, Debug, Clone)]
#[command(allow_negative_numbers = true)]
pub struct WorkerArgs {
    /// Scenario input artifact
    pub scenario: PathBuf,

    /// Array orientation in radians
    pub orientation: f64,

    pub delta_row: f64,

    pub delta_col: f64,

    pub n_nodes: usize,

    pub t1: f64,

    pub t2: f64,

    #[arg(long)]
    pub dev_per_string: Option<u32>,

    #[arg(long)]
    pub n_evals: Option<usize>,
}

pub fn run(args: WorkerArgs) -> AfResult<()> {
    let params = LayoutParameters {
        array_orientation: args.orientation,
        delta_row: args.delta_row,
        delta_col: args.delta_col,
        n_nodes: args.n_nodes,
        t1: args.t1,
        t2: args.t2,
        dev_per_string: args.dev_per_string,
    };

    let status = run_worker(&args.scenario, &params, args.n_evals, &SurrogateRunner)?;
    if status == WorkerStatus::Exception {
        warn!("Worker finished with an exception for {}", args.scenario.display());
    }
    Ok(())
}
