//! Reconciliation errors. Always isolated to one deployment's sync.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("platform error: {0}")]
    Platform(#[from] infergrid_platform::PlatformError),
    #[error("state store error: {0}")]
    State(#[from] infergrid_state::StateError),
}
