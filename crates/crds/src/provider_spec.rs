//! OpenStack provider spec
//!
//! The provider-specific half of a [`crate::Machine`]. It is stored as raw
//! JSON inside `spec.providerSpec.value` and decoded on every reconcile.
//!
//! Two API versions carry the same shape: the current
//! `machine.openshift.io/v1alpha1` and the older
//! `openstackproviderconfig.openshift.io/v1alpha1` group. Both decode into
//! [`OpenstackProviderSpec`], so everything downstream works against a single
//! type.

use crate::references::SecretReference;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Kind carried by provider specs.
pub const PROVIDER_SPEC_KIND: &str = "OpenstackProviderSpec";

/// Errors decoding a raw provider spec
#[derive(Debug, Error)]
pub enum ProviderSpecError {
    /// The machine carries no provider spec at all
    #[error("no such providerSpec found in manifest")]
    Missing,

    /// The provider spec names an API version this controller cannot read
    #[error("unsupported providerSpec apiVersion {0:?}")]
    UnsupportedVersion(String),

    /// The provider spec names a kind other than OpenstackProviderSpec
    #[error("unsupported providerSpec kind {0:?}")]
    UnsupportedKind(String),

    /// The provider spec does not match the expected shape
    #[error("cannot unmarshal providerSpec: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Provider spec API versions understood by the decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderSpecVersion {
    /// `machine.openshift.io/v1alpha1`, also assumed when apiVersion is absent
    MachineV1Alpha1,
    /// `openstackproviderconfig.openshift.io/v1alpha1`
    LegacyProviderConfigV1Alpha1,
}

impl ProviderSpecVersion {
    /// API version string for this schema version
    pub fn api_version(self) -> &'static str {
        match self {
            Self::MachineV1Alpha1 => "machine.openshift.io/v1alpha1",
            Self::LegacyProviderConfigV1Alpha1 => "openstackproviderconfig.openshift.io/v1alpha1",
        }
    }

    /// Resolve the schema version named by a raw `apiVersion` field
    pub fn from_api_version(api_version: &str) -> Result<Self, ProviderSpecError> {
        match api_version {
            "" => Ok(Self::MachineV1Alpha1),
            v if v == Self::MachineV1Alpha1.api_version() => Ok(Self::MachineV1Alpha1),
            v if v == Self::LegacyProviderConfigV1Alpha1.api_version() => {
                Ok(Self::LegacyProviderConfigV1Alpha1)
            }
            other => Err(ProviderSpecError::UnsupportedVersion(other.to_string())),
        }
    }
}

/// Decode a raw provider spec value into the internal representation.
pub fn decode_provider_spec(
    value: Option<&serde_json::Value>,
) -> Result<OpenstackProviderSpec, ProviderSpecError> {
    let value = value.ok_or(ProviderSpecError::Missing)?;

    let api_version = value
        .get("apiVersion")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default();
    let version = ProviderSpecVersion::from_api_version(api_version)?;

    if let Some(kind) = value.get("kind").and_then(serde_json::Value::as_str) {
        if !kind.is_empty() && kind != PROVIDER_SPEC_KIND {
            return Err(ProviderSpecError::UnsupportedKind(kind.to_string()));
        }
    }

    let spec = match version {
        ProviderSpecVersion::MachineV1Alpha1 => {
            serde_json::from_value::<OpenstackProviderSpec>(value.clone())?
        }
        ProviderSpecVersion::LegacyProviderConfigV1Alpha1 => {
            let legacy = serde_json::from_value::<OpenstackProviderSpec>(value.clone())?;
            legacy.into_current()
        }
    };

    Ok(spec)
}

/// Desired configuration of an OpenStack instance
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpenstackProviderSpec {
    /// API version of this document
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,

    /// Kind of this document
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,

    /// Secret holding `clouds.yaml` (and optionally `cacert`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clouds_secret: Option<SecretReference>,

    /// Cloud entry to use inside `clouds.yaml`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cloud_name: String,

    /// Flavor name
    #[serde(default)]
    pub flavor: String,

    /// Image name (ignored when booting from a root volume)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,

    /// SSH key pair name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key_name: String,

    /// User name for SSH access
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ssh_user_name: String,

    /// Networks to attach, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<NetworkParam>,

    /// Explicit ports to create, after the network-derived ones
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PortOpts>,

    /// Floating IP to associate with the instance
    #[serde(rename = "floatingIP", default, skip_serializing_if = "String::is_empty")]
    pub floating_ip: String,

    /// Availability zone; empty means no preference
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub availability_zone: String,

    /// Security groups applied to every port without its own list
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_groups: Vec<SecurityGroupParam>,

    /// Secret holding the user data template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data_secret: Option<SecretReference>,

    /// Create a trunk for every network-derived port
    #[serde(default)]
    pub trunk: bool,

    /// Tags applied to the instance and its ports
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Free-form server metadata
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub server_metadata: BTreeMap<String, String>,

    /// Attach a config drive
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_drive: Option<bool>,

    /// Boot from a volume instead of the image directly
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_volume: Option<RootVolume>,

    /// Extra disks attached to the instance
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_block_devices: Vec<AdditionalBlockDevice>,

    /// Server group ID
    #[serde(rename = "serverGroupID", default, skip_serializing_if = "String::is_empty")]
    pub server_group_id: String,

    /// Server group name; created with soft-anti-affinity when missing
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub server_group_name: String,

    /// Subnet whose address is used as the node's primary IP
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub primary_subnet: String,
}

impl OpenstackProviderSpec {
    /// Rewrite a spec decoded from the legacy group so it reads as the current
    /// version. The legacy group is a rename; its fields map one to one.
    fn into_current(mut self) -> Self {
        self.api_version = ProviderSpecVersion::MachineV1Alpha1.api_version().to_string();
        self.kind = PROVIDER_SPEC_KIND.to_string();
        self
    }
}

/// Network selector plus the subnets to allocate addresses from
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkParam {
    /// Network ID
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uuid: String,

    /// Fixed IPv4 address for the NIC (unused by the current port mapping)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fixed_ip: String,

    /// Network query, used when `uuid` is empty
    #[serde(default)]
    pub filter: Filter,

    /// Subnets to take fixed IPs from
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subnets: Vec<SubnetParam>,

    /// Skip API/Ingress VIP address pairs on ports of this network
    #[serde(default)]
    pub no_allowed_address_pairs: bool,

    /// Tags applied to ports created on this network
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub port_tags: Vec<String>,

    /// VNIC type for ports on this network
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub vnic_type: String,

    /// Binding profile for ports on this network
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub profile: BTreeMap<String, String>,

    /// Whether port security is enabled; unset inherits the cloud default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_security: Option<bool>,
}

/// Network query fields
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tenant_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub project_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tags: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tags_any: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub not_tags: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub not_tags_any: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_state_up: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared: Option<bool>,
}

impl Filter {
    /// True when no field of the filter is set
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Subnet selector within a [`NetworkParam`]
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubnetParam {
    /// Subnet ID
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uuid: String,

    /// Subnet query, used when `uuid` is empty
    #[serde(default)]
    pub filter: SubnetFilter,

    /// Tags applied to ports that take an address from this subnet
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub port_tags: Vec<String>,

    /// Whether port security is enabled on ports in this subnet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_security: Option<bool>,
}

/// Subnet query fields
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubnetFilter {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub network_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tenant_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub project_id: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub ip_version: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub gateway_ip: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cidr: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ipv6_address_mode: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ipv6_ra_mode: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subnetpool_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tags: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tags_any: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub not_tags: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub not_tags_any: String,
}

fn is_zero(value: &i32) -> bool {
    *value == 0
}

/// An explicitly specified port
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PortOpts {
    /// Network the port is created on
    #[serde(rename = "networkID", default)]
    pub network_id: String,

    /// Suffix appended to the instance name to form the port name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name_suffix: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_state_up: Option<bool>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mac_address: String,

    /// Fixed IPs requested on the port
    #[serde(rename = "fixedIPs", default, skip_serializing_if = "Vec::is_empty")]
    pub fixed_ips: Vec<FixedIps>,

    #[serde(rename = "tenantID", default, skip_serializing_if = "String::is_empty")]
    pub tenant_id: String,

    #[serde(rename = "projectID", default, skip_serializing_if = "String::is_empty")]
    pub project_id: String,

    /// Security group IDs; unset falls back to the spec-level groups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_groups: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_address_pairs: Vec<AddressPair>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub vnic_type: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub profile: BTreeMap<String, String>,

    /// Whether port security is enabled; unset inherits the cloud default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_security: Option<bool>,

    /// Create a trunk with this port as parent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trunk: Option<bool>,

    #[serde(rename = "hostID", default, skip_serializing_if = "String::is_empty")]
    pub host_id: String,
}

/// Fixed IP request on an explicit port
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FixedIps {
    #[serde(rename = "subnetID", default)]
    pub subnet_id: String,
    #[serde(rename = "ipAddress", default, skip_serializing_if = "String::is_empty")]
    pub ip_address: String,
}

/// Allowed address pair on a port
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddressPair {
    #[serde(rename = "ipAddress", default)]
    pub ip_address: String,
    #[serde(rename = "macAddress", default, skip_serializing_if = "String::is_empty")]
    pub mac_address: String,
}

/// Security group selector
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroupParam {
    /// Security group ID; overrides `filter.id`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uuid: String,

    /// Security group name; overrides `filter.name`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default)]
    pub filter: SecurityGroupFilter,
}

/// Security group query fields
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroupFilter {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tenant_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub project_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tags: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tags_any: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub not_tags: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub not_tags_any: String,
}

/// Root volume the instance boots from
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RootVolume {
    #[serde(rename = "sourceType", default, skip_serializing_if = "String::is_empty")]
    pub source_type: String,

    /// Source of the volume; by convention an image name
    #[serde(rename = "sourceUUID", default, skip_serializing_if = "String::is_empty")]
    pub source_uuid: String,

    #[serde(rename = "deviceType", default, skip_serializing_if = "String::is_empty")]
    pub device_type: String,

    #[serde(rename = "volumeType", default, skip_serializing_if = "String::is_empty")]
    pub volume_type: String,

    /// Size in GiB
    #[serde(rename = "diskSize", default)]
    pub size: i32,

    #[serde(rename = "availabilityZone", default, skip_serializing_if = "String::is_empty")]
    pub zone: String,
}

/// Additional disk attached to the instance
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AdditionalBlockDevice {
    /// Name, unique among the instance's block devices
    pub name: String,

    /// Size in GiB
    #[serde(rename = "sizeGiB", default)]
    pub size_gib: i32,

    #[serde(default)]
    pub storage: BlockDeviceStorage,
}

/// Where an additional block device lives
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockDeviceStorage {
    /// `Local` or `Volume`
    #[serde(rename = "type", default)]
    pub storage_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<BlockDeviceVolume>,
}

/// Volume options for `Volume` block devices
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BlockDeviceVolume {
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub volume_type: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub availability_zone: String,
}
