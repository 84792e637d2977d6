//! Platform error types.
//!
//! The split matters to callers: `Connection` is retryable at the
//! activity layer, `Configuration` is terminal, and ingress/endpoint
//! unreadiness is not an error at all — it is a probe outcome
//! (`EndpointReadiness`), produced after bounded in-handler retries.

use thiserror::Error;

/// Result type alias for platform operations.
pub type PlatformResult<T> = Result<T, PlatformError>;

/// Errors that can occur during cluster platform operations.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// Cluster unreachable. Surfaced to the workflow as retryable.
    #[error("cluster connection failed: {0}")]
    Connection(String),

    /// Missing or invalid cluster/config. Terminal, not retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The platform probe itself failed; we fail closed rather than
    /// guessing a variant.
    #[error("platform probe failed: {0}")]
    ProbeFailed(String),

    /// The cluster API answered with a non-success status.
    #[error("cluster api error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("sealed config error: {0}")]
    Sealed(#[from] infergrid_core::SealedError),

    #[error("state store error: {0}")]
    State(#[from] infergrid_state::StateError),
}

impl PlatformError {
    /// Whether an activity retry could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PlatformError::Connection(_) | PlatformError::Api { status: 500..=599, .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_errors_are_retryable() {
        assert!(PlatformError::Connection("refused".into()).is_retryable());
        assert!(
            PlatformError::Api {
                status: 503,
                message: "unavailable".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn configuration_errors_are_terminal() {
        assert!(!PlatformError::Configuration("no cluster".into()).is_retryable());
        assert!(!PlatformError::ProbeFailed("apis unreachable".into()).is_retryable());
        assert!(
            !PlatformError::Api {
                status: 404,
                message: "gone".into()
            }
            .is_retryable()
        );
    }
}
