//! Cluster infrastructure context
//!
//! The cluster-scoped `Infrastructure` object (`config.openshift.io/v1`,
//! named `cluster`) tells the actuator which virtual IPs the API server and
//! ingress float between nodes, and whether the load balancer in front of
//! them is managed by the user.

use crate::error::ControllerError;
use async_trait::async_trait;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use kube::{Api, Client};
use serde::Deserialize;

/// Name of the singleton Infrastructure object
pub const INFRASTRUCTURE_NAME: &str = "cluster";

/// Load balancer type meaning API and ingress VIPs are not cluster managed
pub const LOAD_BALANCER_USER_MANAGED: &str = "UserManaged";

/// What the translator needs to know about the cluster
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterInfrastructure {
    pub api_server_internal_ips: Vec<String>,
    pub ingress_ips: Vec<String>,
    /// Suppresses allowed-address-pairs for the VIPs
    pub user_managed_load_balancer: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InfrastructureStatus {
    #[serde(default)]
    platform_status: Option<PlatformStatus>,
}

#[derive(Debug, Default, Deserialize)]
struct PlatformStatus {
    #[serde(default)]
    openstack: Option<OpenStackPlatformStatus>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenStackPlatformStatus {
    #[serde(rename = "apiServerInternalIPs", default)]
    api_server_internal_ips: Vec<String>,
    #[serde(rename = "ingressIPs", default)]
    ingress_ips: Vec<String>,
    #[serde(default)]
    load_balancer: Option<LoadBalancer>,
}

#[derive(Debug, Default, Deserialize)]
struct LoadBalancer {
    #[serde(rename = "type", default)]
    lb_type: String,
}

impl ClusterInfrastructure {
    /// Read the OpenStack platform status out of an Infrastructure `status`.
    pub fn from_status(status: &serde_json::Value) -> Result<Self, ControllerError> {
        let status: InfrastructureStatus = serde_json::from_value(status.clone())
            .map_err(|e| ControllerError::Translation(format!("malformed Infrastructure status: {}", e)))?;
        let openstack = status
            .platform_status
            .and_then(|platform| platform.openstack)
            .ok_or_else(|| {
                ControllerError::Translation(
                    "cluster Infrastructure has no OpenStack platform status".to_string(),
                )
            })?;

        Ok(Self {
            api_server_internal_ips: openstack.api_server_internal_ips,
            ingress_ips: openstack.ingress_ips,
            user_managed_load_balancer: openstack
                .load_balancer
                .is_some_and(|lb| lb.lb_type == LOAD_BALANCER_USER_MANAGED),
        })
    }
}

/// Source of the cluster infrastructure context.
#[async_trait]
pub trait InfrastructureSource: Send + Sync {
    async fn cluster_infrastructure(&self) -> Result<ClusterInfrastructure, ControllerError>;
}

/// Reads the Infrastructure object through the dynamic API.
pub struct KubeInfrastructureSource {
    api: Api<DynamicObject>,
}

impl KubeInfrastructureSource {
    pub fn new(client: Client) -> Self {
        let gvk = GroupVersionKind::gvk("config.openshift.io", "v1", "Infrastructure");
        let resource = ApiResource::from_gvk(&gvk);
        Self {
            api: Api::all_with(client, &resource),
        }
    }
}

#[async_trait]
impl InfrastructureSource for KubeInfrastructureSource {
    async fn cluster_infrastructure(&self) -> Result<ClusterInfrastructure, ControllerError> {
        let infrastructure = self.api.get(INFRASTRUCTURE_NAME).await?;
        let status = infrastructure
            .data
            .get("status")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        ClusterInfrastructure::from_status(&status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reads_vips_and_managed_load_balancer() {
        let status = json!({
            "platformStatus": {
                "type": "OpenStack",
                "openstack": {
                    "apiServerInternalIPs": ["10.0.0.5"],
                    "ingressIPs": ["10.0.0.7", "fd00::7"],
                    "loadBalancer": {"type": "OpenShiftManagedDefault"}
                }
            }
        });

        let infra = ClusterInfrastructure::from_status(&status).unwrap();
        assert_eq!(infra.api_server_internal_ips, vec!["10.0.0.5"]);
        assert_eq!(infra.ingress_ips, vec!["10.0.0.7", "fd00::7"]);
        assert!(!infra.user_managed_load_balancer);
    }

    #[test]
    fn test_user_managed_load_balancer() {
        let status = json!({
            "platformStatus": {
                "openstack": {"loadBalancer": {"type": "UserManaged"}}
            }
        });

        let infra = ClusterInfrastructure::from_status(&status).unwrap();
        assert!(infra.user_managed_load_balancer);
        assert!(infra.api_server_internal_ips.is_empty());
    }

    #[test]
    fn test_missing_openstack_status_is_an_error() {
        let status = json!({"platformStatus": {"type": "AWS"}});
        assert!(ClusterInfrastructure::from_status(&status).is_err());
        assert!(ClusterInfrastructure::from_status(&serde_json::Value::Null).is_err());
    }
}
