//! Pipeline error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("platform error: {0}")]
    Platform(#[from] infergrid_platform::PlatformError),
    #[error("state store error: {0}")]
    State(#[from] infergrid_state::StateError),
    #[error("invalid input: {0}")]
    Input(String),
    #[error("benchmark failed: {0}")]
    Benchmark(String),
}
