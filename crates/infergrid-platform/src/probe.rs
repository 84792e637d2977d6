//! Platform variant detection.

use serde_json::Value;

use infergrid_core::{ClusterConfig, Platform};

use crate::api::ClusterApi;
use crate::error::{PlatformError, PlatformResult};

/// API group that only OpenShift serves.
const OPENSHIFT_ROUTE_GROUP: &str = "route.openshift.io";

/// Probes the cluster's API group list to decide which platform it is.
///
/// The verdict is never cached: clusters get upgraded and swapped
/// behind stable addresses, so each operation that needs a handler
/// probes again. If the probe itself fails we fail closed and return
/// an error rather than defaulting to either variant.
pub async fn detect_platform(
    api: &dyn ClusterApi,
    config: &ClusterConfig,
) -> PlatformResult<Platform> {
    let groups = api
        .get_json(config, "/apis")
        .await
        .map_err(|e| PlatformError::ProbeFailed(e.to_string()))?;

    if has_group(&groups, OPENSHIFT_ROUTE_GROUP) {
        Ok(Platform::Openshift)
    } else {
        Ok(Platform::Kubernetes)
    }
}

fn has_group(discovery: &Value, name: &str) -> bool {
    discovery["groups"]
        .as_array()
        .map(|groups| {
            groups
                .iter()
                .any(|group| group["name"].as_str() == Some(name))
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct StubApi {
        response: PlatformResult<Value>,
    }

    #[async_trait]
    impl ClusterApi for StubApi {
        async fn get_json(&self, _: &ClusterConfig, _: &str) -> PlatformResult<Value> {
            match &self.response {
                Ok(v) => Ok(v.clone()),
                Err(_) => Err(PlatformError::Connection("down".to_string())),
            }
        }
        async fn post_json(&self, _: &ClusterConfig, _: &str, _: &Value) -> PlatformResult<Value> {
            unreachable!()
        }
        async fn delete(&self, _: &ClusterConfig, _: &str) -> PlatformResult<Value> {
            unreachable!()
        }
        async fn get_text(&self, _: &ClusterConfig, _: &str) -> PlatformResult<String> {
            unreachable!()
        }
    }

    fn config() -> ClusterConfig {
        ClusterConfig {
            server: "http://c:6443".to_string(),
            token: "t".to_string(),
            ingress_url: "http://i".to_string(),
            platform: None,
        }
    }

    #[tokio::test]
    async fn route_group_means_openshift() {
        let api = StubApi {
            response: Ok(json!({"groups": [
                {"name": "apps"},
                {"name": "route.openshift.io"},
            ]})),
        };
        let platform = detect_platform(&api, &config()).await.unwrap();
        assert_eq!(platform, Platform::Openshift);
    }

    #[tokio::test]
    async fn plain_groups_mean_kubernetes() {
        let api = StubApi {
            response: Ok(json!({"groups": [{"name": "apps"}, {"name": "batch"}]})),
        };
        let platform = detect_platform(&api, &config()).await.unwrap();
        assert_eq!(platform, Platform::Kubernetes);
    }

    #[tokio::test]
    async fn probe_failure_is_not_a_default() {
        let api = StubApi {
            response: Err(PlatformError::Connection("down".to_string())),
        };
        let err = detect_platform(&api, &config()).await.unwrap_err();
        assert!(matches!(err, PlatformError::ProbeFailed(_)));
    }
}
