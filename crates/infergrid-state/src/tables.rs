//! redb table definitions for the InferGrid state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized
//! domain types). Composite keys follow `{cluster_id}/{namespace}` for
//! deployments and `{cluster_id}/{namespace}:{worker}` for worker rows.

use redb::TableDefinition;

/// Deployment rows keyed by `{cluster_id}/{namespace}`.
pub const DEPLOYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployments");

/// Worker rows keyed by `{cluster_id}/{namespace}:{worker_name}`.
pub const WORKERS: TableDefinition<&str, &[u8]> = TableDefinition::new("workers");

/// Cluster records keyed by `{cluster_id}`.
pub const CLUSTERS: TableDefinition<&str, &[u8]> = TableDefinition::new("clusters");

/// Benchmarks keyed by `{benchmark_id}`.
pub const BENCHMARKS: TableDefinition<&str, &[u8]> = TableDefinition::new("benchmarks");

/// Opaque JSON blobs keyed by caller-chosen strings: workflow status
/// flags (`wf_status_{id}`), histories (`wf_history_{id}`), pending
/// events (`wf_events_{id}`), deploy-config snapshots
/// (`deploy_config_{namespace}`), and the reconciliation sync-state
/// sentinel (`deployment_sync_state`).
pub const BLOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("blobs");
