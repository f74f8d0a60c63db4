pub mod cache;
pub mod checkpoint;
pub mod cma;
pub mod control;
pub mod driver;
pub mod evaluator;
pub mod noise;
pub mod params;
pub mod pool;
pub mod scaler;

pub use self::cache::{EvaluationCache, EvaluationRecord, EvaluationStatus};
pub use self::control::{OptimiserThread, RunControl};
pub use self::driver::{Driver, RunSummary, Termination};
pub use self::evaluator::{Evaluation, Evaluator, Outcome, WorkerLauncher};
