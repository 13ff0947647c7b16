//! OpenStack API data models
//!
//! Request and response types for the Nova, Neutron, Glance and Cinder
//! endpoints the machine controller touches. Field names follow the REST
//! wire format; only the fields read by the controller are modelled.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Compute (Nova)
// ---------------------------------------------------------------------------

/// Compute flavor
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Flavor {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub vcpus: i64,
    /// Memory in MiB
    #[serde(default)]
    pub ram: i64,
    /// Root disk in GiB
    #[serde(default)]
    pub disk: i64,
}

/// Nova server group
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerGroup {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Single placement policy (microversion 2.64+)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
    /// Placement policies (pre-2.64)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policies: Vec<String>,
}

/// Availability zone as reported by `os-availability-zone`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AvailabilityZone {
    #[serde(rename = "zoneName")]
    pub zone_name: String,
    #[serde(rename = "zoneState", default)]
    pub zone_state: ZoneState,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ZoneState {
    #[serde(default)]
    pub available: bool,
}

/// Server address entry
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerAddress {
    pub addr: String,
    #[serde(default)]
    pub version: u8,
    /// `fixed` or `floating`
    #[serde(rename = "OS-EXT-IPS:type", default, skip_serializing_if = "Option::is_none")]
    pub ip_type: Option<String>,
    #[serde(rename = "OS-EXT-IPS-MAC:mac_addr", default, skip_serializing_if = "Option::is_none")]
    pub mac_addr: Option<String>,
}

impl ServerAddress {
    /// True when Nova reports the address as a floating IP
    pub fn is_floating(&self) -> bool {
        self.ip_type.as_deref() == Some("floating")
    }
}

/// Compute server
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Server {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// ACTIVE, BUILD, ERROR, SHUTOFF, ...
    #[serde(default)]
    pub status: String,
    #[serde(rename = "OS-EXT-AZ:availability_zone", default)]
    pub availability_zone: String,
    /// Addresses keyed by network name
    #[serde(default)]
    pub addresses: BTreeMap<String, Vec<ServerAddress>>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Flavor embedded in the server record (microversion 2.47+)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flavor: Option<serde_json::Value>,
}

/// Network interface attached to a server
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InterfaceAttachment {
    pub port_id: String,
    #[serde(rename = "net_id", default)]
    pub network_id: String,
    #[serde(default)]
    pub mac_addr: String,
    #[serde(default)]
    pub port_state: String,
}

/// Block device mapping for server create
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockDeviceMapping {
    /// `image`, `volume` or `blank`
    pub source_type: String,
    /// `volume` or `local`
    pub destination_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uuid: String,
    pub boot_index: i32,
    pub delete_on_termination: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_size: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

/// Server create request
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServerCreateRequest {
    pub name: String,
    #[serde(rename = "imageRef", default, skip_serializing_if = "String::is_empty")]
    pub image_ref: String,
    #[serde(rename = "flavorRef")]
    pub flavor_ref: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key_name: String,
    /// Base64-encoded user data
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_data: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_drive: Option<bool>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub availability_zone: String,
    /// Port IDs, in attachment order
    #[serde(skip)]
    pub port_ids: Vec<String>,
    #[serde(rename = "block_device_mapping_v2", default, skip_serializing_if = "Vec::is_empty")]
    pub block_devices: Vec<BlockDeviceMapping>,
    /// Server group placed into via scheduler hints
    #[serde(skip)]
    pub server_group_id: Option<String>,
}

impl ServerCreateRequest {
    /// Wire body for `POST /servers`
    pub fn to_body(&self) -> Result<serde_json::Value, serde_json::Error> {
        let mut server = serde_json::to_value(self)?;
        if let Some(obj) = server.as_object_mut() {
            let networks = self
                .port_ids
                .iter()
                .map(|port| serde_json::json!({ "port": port }))
                .collect::<Vec<_>>();
            obj.insert("networks".to_string(), serde_json::Value::Array(networks));
        }
        let mut body = serde_json::json!({ "server": server });
        if let Some(group) = self.server_group_id.as_deref().filter(|g| !g.is_empty()) {
            body["os:scheduler_hints"] = serde_json::json!({ "group": group });
        }
        Ok(body)
    }
}

// ---------------------------------------------------------------------------
// Image (Glance)
// ---------------------------------------------------------------------------

/// Glance image
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Image {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
}

// ---------------------------------------------------------------------------
// Network (Neutron)
// ---------------------------------------------------------------------------

/// Neutron network
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Network {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "router:external", default)]
    pub external: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Neutron subnet
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subnet {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub network_id: String,
    #[serde(default)]
    pub cidr: String,
    #[serde(default)]
    pub ip_version: i32,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Neutron security group
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecurityGroup {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// Fixed IP on a port
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortFixedIp {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subnet_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ip_address: String,
}

/// Allowed address pair on a port
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AllowedAddressPair {
    pub ip_address: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mac_address: String,
}

/// Neutron port
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Port {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub network_id: String,
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub mac_address: String,
    #[serde(default)]
    pub fixed_ips: Vec<PortFixedIp>,
    #[serde(default)]
    pub security_groups: Vec<String>,
    #[serde(default)]
    pub allowed_address_pairs: Vec<AllowedAddressPair>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_security_enabled: Option<bool>,
    #[serde(rename = "trunk_details", default, skip_serializing_if = "Option::is_none")]
    pub trunk_details: Option<serde_json::Value>,
}

/// Port create request
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PortCreateRequest {
    pub name: String,
    pub network_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_state_up: Option<bool>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mac_address: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fixed_ips: Vec<PortFixedIp>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub project_id: String,
    /// `None` leaves the cloud default group in place
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_groups: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_address_pairs: Option<Vec<AllowedAddressPair>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_security_enabled: Option<bool>,
    #[serde(rename = "binding:vnic_type", default, skip_serializing_if = "String::is_empty")]
    pub vnic_type: String,
    #[serde(rename = "binding:host_id", default, skip_serializing_if = "String::is_empty")]
    pub host_id: String,
    #[serde(rename = "binding:profile", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub profile: BTreeMap<String, serde_json::Value>,
}

/// Neutron trunk
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Trunk {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub port_id: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Neutron floating IP
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FloatingIp {
    pub id: String,
    pub floating_ip_address: String,
    #[serde(default)]
    pub floating_network_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_ip_address: Option<String>,
}

/// Neutron API extension
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Extension {
    pub alias: String,
    #[serde(default)]
    pub name: String,
}

// ---------------------------------------------------------------------------
// Block storage (Cinder)
// ---------------------------------------------------------------------------

/// Cinder volume
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Volume {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// creating, available, in-use, error, ...
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub size: i32,
}

/// Volume create request
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeCreateRequest {
    pub name: String,
    /// Size in GiB
    pub size: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(rename = "volume_type", default, skip_serializing_if = "String::is_empty")]
    pub volume_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub availability_zone: String,
    #[serde(rename = "imageRef", default, skip_serializing_if = "String::is_empty")]
    pub image_id: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// List filters
// ---------------------------------------------------------------------------

/// Render `(key, value)` pairs as a query string, skipping empty values
fn render_query(pairs: &[(&str, &str)]) -> String {
    let rendered = pairs
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>();
    if rendered.is_empty() {
        String::new()
    } else {
        format!("?{}", rendered.join("&"))
    }
}

fn bool_param(value: Option<bool>) -> &'static str {
    match value {
        Some(true) => "true",
        Some(false) => "false",
        None => "",
    }
}

/// Network list filter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkListOpts {
    pub id: String,
    pub name: String,
    pub description: String,
    pub project_id: String,
    pub tenant_id: String,
    pub status: String,
    pub tags: String,
    pub tags_any: String,
    pub not_tags: String,
    pub not_tags_any: String,
    pub admin_state_up: Option<bool>,
    pub shared: Option<bool>,
    pub external: Option<bool>,
}

impl NetworkListOpts {
    /// Query string for `GET /v2.0/networks`
    pub fn to_query(&self) -> String {
        render_query(&[
            ("id", self.id.as_str()),
            ("name", self.name.as_str()),
            ("description", self.description.as_str()),
            ("project_id", self.project_id.as_str()),
            ("tenant_id", self.tenant_id.as_str()),
            ("status", self.status.as_str()),
            ("tags", self.tags.as_str()),
            ("tags-any", self.tags_any.as_str()),
            ("not-tags", self.not_tags.as_str()),
            ("not-tags-any", self.not_tags_any.as_str()),
            ("admin_state_up", bool_param(self.admin_state_up)),
            ("shared", bool_param(self.shared)),
            ("router:external", bool_param(self.external)),
        ])
    }
}

/// Subnet list filter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubnetListOpts {
    pub id: String,
    pub name: String,
    pub description: String,
    pub network_id: String,
    pub project_id: String,
    pub tenant_id: String,
    pub ip_version: i32,
    pub gateway_ip: String,
    pub cidr: String,
    pub ipv6_address_mode: String,
    pub ipv6_ra_mode: String,
    pub subnetpool_id: String,
    pub tags: String,
    pub tags_any: String,
    pub not_tags: String,
    pub not_tags_any: String,
}

impl SubnetListOpts {
    /// Query string for `GET /v2.0/subnets`
    pub fn to_query(&self) -> String {
        let ip_version = if self.ip_version == 0 {
            String::new()
        } else {
            self.ip_version.to_string()
        };
        render_query(&[
            ("id", self.id.as_str()),
            ("name", self.name.as_str()),
            ("description", self.description.as_str()),
            ("network_id", self.network_id.as_str()),
            ("project_id", self.project_id.as_str()),
            ("tenant_id", self.tenant_id.as_str()),
            ("ip_version", ip_version.as_str()),
            ("gateway_ip", self.gateway_ip.as_str()),
            ("cidr", self.cidr.as_str()),
            ("ipv6_address_mode", self.ipv6_address_mode.as_str()),
            ("ipv6_ra_mode", self.ipv6_ra_mode.as_str()),
            ("subnetpool_id", self.subnetpool_id.as_str()),
            ("tags", self.tags.as_str()),
            ("tags-any", self.tags_any.as_str()),
            ("not-tags", self.not_tags.as_str()),
            ("not-tags-any", self.not_tags_any.as_str()),
        ])
    }

    /// True when only the ID is set, so no query is needed
    pub fn is_id_only(&self) -> bool {
        !self.id.is_empty()
            && Self {
                id: String::new(),
                ..self.clone()
            } == Self::default()
    }
}

/// Security group list filter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityGroupListOpts {
    pub id: String,
    pub name: String,
    pub description: String,
    pub project_id: String,
    pub tenant_id: String,
    pub tags: String,
    pub tags_any: String,
    pub not_tags: String,
    pub not_tags_any: String,
}

impl SecurityGroupListOpts {
    /// Query string for `GET /v2.0/security-groups`
    pub fn to_query(&self) -> String {
        render_query(&[
            ("id", self.id.as_str()),
            ("name", self.name.as_str()),
            ("description", self.description.as_str()),
            ("project_id", self.project_id.as_str()),
            ("tenant_id", self.tenant_id.as_str()),
            ("tags", self.tags.as_str()),
            ("tags-any", self.tags_any.as_str()),
            ("not-tags", self.not_tags.as_str()),
            ("not-tags-any", self.not_tags_any.as_str()),
        ])
    }

    /// True when only the ID is set, so no query is needed
    pub fn is_id_only(&self) -> bool {
        !self.id.is_empty()
            && Self {
                id: String::new(),
                ..self.clone()
            } == Self::default()
    }
}

/// Port list filter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortListOpts {
    pub name: String,
    pub network_id: String,
    pub device_id: String,
}

impl PortListOpts {
    /// Query string for `GET /v2.0/ports`
    pub fn to_query(&self) -> String {
        render_query(&[
            ("name", self.name.as_str()),
            ("network_id", self.network_id.as_str()),
            ("device_id", self.device_id.as_str()),
        ])
    }
}
