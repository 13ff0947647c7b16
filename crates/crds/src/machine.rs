//! Machine CRD
//!
//! A single compute instance managed by a cloud-provider actuator. The
//! provider-specific configuration travels opaquely in `spec.providerSpec.value`
//! and is decoded by [`crate::decode_provider_spec`].

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Label carrying the cluster ID the machine belongs to.
pub const MACHINE_CLUSTER_ID_LABEL: &str = "machine.openshift.io/cluster-api-cluster";

/// Label carrying the region the instance was placed in.
pub const MACHINE_REGION_LABEL: &str = "machine.openshift.io/region";

/// Label carrying the availability zone the instance was placed in.
pub const MACHINE_AZ_LABEL: &str = "machine.openshift.io/zone";

/// Label carrying the instance flavor.
pub const MACHINE_INSTANCE_TYPE_LABEL: &str = "machine.openshift.io/instance-type";

/// Annotation carrying the last observed instance state.
pub const MACHINE_INSTANCE_STATE_ANNOTATION: &str = "machine.openshift.io/instance-state";

/// Finalizer guarding cloud resources until the actuator has deleted them.
pub const MACHINE_FINALIZER: &str = "machine.machine.openshift.io";

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "machine.openshift.io",
    version = "v1beta1",
    kind = "Machine",
    namespaced,
    status = "MachineStatus",
    shortname = "ma"
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// Provider ID linking this machine to its cloud instance
    /// (`openstack:///<instance-id>`). Written once by the actuator.
    #[serde(rename = "providerID", default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,

    /// Provider-specific configuration
    #[serde(default)]
    pub provider_spec: ProviderSpec,
}

/// Wrapper around the raw provider configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSpec {
    /// Raw provider spec; carries its own apiVersion/kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub value: Option<serde_json::Value>,
}

fn preserve_unknown_fields(_: &mut schemars::SchemaGenerator) -> schemars::Schema {
    schemars::json_schema!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true
    })
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    /// Last time the status was written by the controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<chrono::DateTime<chrono::Utc>>,

    /// Machine-readable reason for the last reconcile failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<MachineErrorReason>,

    /// Human-readable message for the last reconcile failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Addresses assigned to the instance
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<MachineAddress>,

    /// Lifecycle phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<MachinePhase>,
}

/// A single address reported for a machine.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct MachineAddress {
    /// Address type
    #[serde(rename = "type")]
    pub address_type: MachineAddressType,

    /// The address itself
    pub address: String,
}

impl MachineAddress {
    /// Creates an address of the given type.
    pub fn new(address_type: MachineAddressType, address: impl Into<String>) -> Self {
        Self {
            address_type,
            address: address.into(),
        }
    }
}

/// Address types, matching the Kubernetes node address vocabulary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum MachineAddressType {
    /// Hostname of the machine
    Hostname,
    /// Address reachable from outside the cluster network
    #[serde(rename = "ExternalIP")]
    ExternalIp,
    /// Address on the cluster network
    #[serde(rename = "InternalIP")]
    InternalIp,
    /// External DNS name
    #[serde(rename = "ExternalDNS")]
    ExternalDns,
    /// Internal DNS name
    #[serde(rename = "InternalDNS")]
    InternalDns,
}

/// Machine lifecycle phase.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum MachinePhase {
    /// Instance creation requested, not yet confirmed
    Provisioning,
    /// Instance exists and carries a provider ID
    Provisioned,
    /// Instance is being torn down
    Deleting,
    /// Permanent failure; the controller no longer acts on the machine
    Failed,
}

/// Reasons recorded in `status.errorReason`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum MachineErrorReason {
    /// The provider spec cannot be satisfied as written
    InvalidConfiguration,
    /// Creating the instance failed
    CreateError,
    /// Updating the instance failed
    UpdateError,
    /// Deleting the instance failed
    DeleteError,
}

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "machine.openshift.io",
    version = "v1beta1",
    kind = "MachineSet",
    namespaced,
    status = "MachineSetStatus",
    shortname = "ms"
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSetSpec {
    /// Desired number of machines
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Template for machines created by this set
    #[serde(default)]
    pub template: MachineTemplateSpec,
}

/// Template used to stamp out machines.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineTemplateSpec {
    /// Spec of the machines to create
    #[serde(default)]
    pub spec: MachineSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineSetStatus {
    /// Number of machines observed
    #[serde(default)]
    pub replicas: i32,

    /// Most recent generation observed by the controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}
