//! infergrid-core — shared domain types for InferGrid.
//!
//! Deployment intent shapes (node/device lists), cluster configuration,
//! the deploy-config merge used when adding workers to an existing
//! deployment, and the sealed (encrypted-at-rest) cluster config wrapper.

pub mod config;
pub mod merge;
pub mod sealed;
pub mod types;

pub use config::InferConfig;
pub use merge::merge_deploy_config;
pub use sealed::{ConfigSealer, SealedError, fingerprint};
pub use types::*;
