use thiserror::Error;

/// Errors surfaced by the solving pipeline.
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("no enabled vehicles in the fleet")]
    NoEnabledVehicles,

    #[error("no solution found within the time budget")]
    NoSolution,

    #[error("route for {kind} #{vehicle_id} violates its hard limits")]
    InfeasibleRoute { kind: String, vehicle_id: usize },

    #[error("distance matrix unavailable: {0}")]
    MatrixUnavailable(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("cache error: {0}")]
    Cache(String),
}

/// Errors raised by a single routing-engine request. These are retried and
/// eventually absorbed by the failover chain; they never cross the
/// orchestrator boundary.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("engine response malformed: {0}")]
    Malformed(String),

    #[error("engine rejected request: {0}")]
    Rejected(String),

    #[error("engine unavailable: {0}")]
    Unavailable(String),
}
