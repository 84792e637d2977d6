//! infergrid-state — embedded state store for InferGrid.
//!
//! Backed by [redb](https://docs.rs/redb): typed tables for deployment,
//! worker, cluster, and benchmark rows plus an opaque JSON blob table
//! used for workflow status flags, deploy-config snapshots, and
//! reconciliation locks.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value
//! columns. Composite keys (`{cluster_id}/{namespace}`,
//! `{cluster_id}/{namespace}:{worker}`) enable prefix scans for owned
//! child rows, and make the "one namespace per deployment" invariant a
//! property of the key shape.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by
//! `Arc<Database>`) and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
