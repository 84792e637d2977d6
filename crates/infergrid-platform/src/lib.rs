//! infergrid-platform — cluster platform abstraction for InferGrid.
//!
//! One capability interface ([`ClusterHandler`]) over two variants
//! (Kubernetes, OpenShift), selected by a live API probe per operation —
//! never cached, failing closed if the probe itself fails. On top sits
//! the [`DeploymentHandler`], which translates abstract deployment
//! intent (node/device lists) into concrete cluster operations and is
//! the only entry point the workflow activities and the reconciler use.
//!
//! Every handler operation is a pure function of
//! `(cluster_config, args)`: no handler holds cross-call mutable state.

pub mod api;
pub mod error;
pub mod handler;
pub mod kubernetes;
pub mod metrics;
pub mod openshift;
pub mod ops;
pub mod probe;
pub mod sim;
pub mod types;

pub use api::{ClusterApi, HttpClusterApi};
pub use error::{PlatformError, PlatformResult};
pub use handler::{DeploymentHandler, FixedResolver, HandlerResolver, ProbeResolver};
pub use kubernetes::KubernetesHandler;
pub use metrics::{MetricsSource, StaticMetrics};
pub use openshift::OpenShiftHandler;
pub use ops::ClusterHandler;
pub use probe::detect_platform;
pub use sim::SimCluster;
pub use types::*;
