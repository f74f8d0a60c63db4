use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArrayForgeError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV Error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON Parsing Error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Geometry Constraint Error: {0}")]
    GeometryConstraint(String),

    #[error("Expected number of nodes not found. Expected {expected} but found {found}")]
    InsufficientNodes { expected: usize, found: usize },

    #[error("Violation of the minimum distance constraint ({count} pairs)")]
    SpacingViolation { count: usize },

    #[error("Serialization Error: {0}")]
    Serialization(String),

    #[error("Worker Launch Error (exit code {code:?}): {message}")]
    WorkerLaunch { code: Option<i32>, message: String },

    #[error("Result Parse Error: {0}")]
    ResultParse(String),

    #[error("Simulation Exception: {0}")]
    Simulation(String),

    #[error("Iteration {0} has already been recorded")]
    LedgerConflict(u64),

    #[error("Configuration Error: {0}")]
    Configuration(String),

    #[error("Checkpoint Error: {0}")]
    Checkpoint(String),
}

impl ArrayForgeError {
    /// Constraint failures the caller may answer by adjusting parameters.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::GeometryConstraint(_)
                | Self::InsufficientNodes { .. }
                | Self::SpacingViolation { .. }
        )
    }
}

pub type AfResult<T> = Result<T, ArrayForgeError>;
