//! Optional GPU utilization enrichment.

use std::collections::HashMap;

use async_trait::async_trait;

use infergrid_core::ClusterConfig;

use crate::error::PlatformResult;

/// Supplies per-device utilization figures, keyed by
/// `(node_name, device_name)`. Wired in where a cluster exposes
/// time-slicing metrics; node info works without one.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn device_utilization(
        &self,
        config: &ClusterConfig,
    ) -> PlatformResult<HashMap<(String, String), f64>>;
}

/// Fixed utilization table for tests and the simulator.
#[derive(Default)]
pub struct StaticMetrics {
    table: HashMap<(String, String), f64>,
}

impl StaticMetrics {
    pub fn new(table: HashMap<(String, String), f64>) -> Self {
        Self { table }
    }
}

#[async_trait]
impl MetricsSource for StaticMetrics {
    async fn device_utilization(
        &self,
        _config: &ClusterConfig,
    ) -> PlatformResult<HashMap<(String, String), f64>> {
        Ok(self.table.clone())
    }
}
