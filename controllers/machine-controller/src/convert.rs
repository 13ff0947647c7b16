//! Provider spec translation
//!
//! Turns a decoded [`OpenstackProviderSpec`] into an [`InstanceSpec`]: the
//! normalized description of the server, its ports, volumes and placement
//! that the instance service knows how to create. Translation runs fresh on
//! every pass and never mutates the input.
//!
//! Port ordering matters: ports derived from `networks` come first, in order,
//! followed by the explicit `ports`. The first port lands on the primary
//! network.

use crate::error::ControllerError;
use crate::infrastructure::ClusterInfrastructure;
use crds::{
    BlockDeviceStorage, MACHINE_CLUSTER_ID_LABEL, Machine, NetworkParam, OpenstackProviderSpec, PortOpts,
    SecurityGroupParam, SubnetParam,
};
use kube::ResourceExt;
use openstack_client::{ComputeService, NetworkService, SubnetListOpts};
use std::collections::BTreeMap;
use std::fmt;
use tracing::info;

/// Tag carried by every instance created by this controller
pub const PROVIDER_TAG: &str = "cluster-api-provider-openstack";

/// Policy of server groups created on demand
pub const DEFAULT_SERVER_GROUP_POLICY: &str = "soft-anti-affinity";

/// Block device type names in the provider spec
pub const LOCAL_BLOCK_DEVICE: &str = "Local";
pub const VOLUME_BLOCK_DEVICE: &str = "Volume";

/// Everything needed to create one server
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceSpec {
    pub name: String,
    /// Image name; with a root volume, the volume's source image
    pub image: String,
    pub flavor: String,
    pub ssh_key_name: String,
    pub user_data: String,
    pub tags: Vec<String>,
    pub metadata: BTreeMap<String, String>,
    pub config_drive: bool,
    pub failure_domain: String,
    pub server_group_id: String,
    pub trunk: bool,
    pub ports: Vec<PortSpec>,
    pub security_groups: Vec<SecurityGroupFilter>,
    pub root_volume: Option<RootVolumeSpec>,
    pub additional_block_devices: Vec<BlockDeviceSpec>,
}

/// Selects exactly one network
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkFilter {
    pub id: String,
    pub name: String,
    pub description: String,
    pub project_id: String,
    pub tags: String,
    pub tags_any: String,
    pub not_tags: String,
    pub not_tags_any: String,
}

impl NetworkFilter {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Writes `{field: "value", ...}` for the fields that are set.
fn write_set_fields(f: &mut fmt::Formatter<'_>, fields: &[(&str, &str)]) -> fmt::Result {
    f.write_str("{")?;
    let mut first = true;
    for (name, value) in fields.iter().filter(|(_, value)| !value.is_empty()) {
        if !first {
            f.write_str(", ")?;
        }
        first = false;
        write!(f, "{}: {:?}", name, value)?;
    }
    f.write_str("}")
}

impl fmt::Display for NetworkFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_set_fields(
            f,
            &[
                ("id", &self.id),
                ("name", &self.name),
                ("description", &self.description),
                ("projectId", &self.project_id),
                ("tags", &self.tags),
                ("tagsAny", &self.tags_any),
                ("notTags", &self.not_tags),
                ("notTagsAny", &self.not_tags_any),
            ],
        )
    }
}

/// Selects exactly one subnet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubnetFilter {
    pub id: String,
    pub name: String,
    pub description: String,
    pub project_id: String,
    pub ip_version: i32,
    pub gateway_ip: String,
    pub cidr: String,
    pub ipv6_address_mode: String,
    pub ipv6_ra_mode: String,
    pub tags: String,
    pub tags_any: String,
    pub not_tags: String,
    pub not_tags_any: String,
}

impl SubnetFilter {
    /// Neutron list query for this filter
    pub fn to_list_opts(&self) -> SubnetListOpts {
        SubnetListOpts {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            project_id: self.project_id.clone(),
            ip_version: self.ip_version,
            gateway_ip: self.gateway_ip.clone(),
            cidr: self.cidr.clone(),
            ipv6_address_mode: self.ipv6_address_mode.clone(),
            ipv6_ra_mode: self.ipv6_ra_mode.clone(),
            tags: self.tags.clone(),
            tags_any: self.tags_any.clone(),
            not_tags: self.not_tags.clone(),
            not_tags_any: self.not_tags_any.clone(),
            ..Default::default()
        }
    }
}

impl fmt::Display for SubnetFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ip_version = if self.ip_version == 0 {
            String::new()
        } else {
            self.ip_version.to_string()
        };
        write_set_fields(
            f,
            &[
                ("id", &self.id),
                ("name", &self.name),
                ("description", &self.description),
                ("projectId", &self.project_id),
                ("ipVersion", &ip_version),
                ("gatewayIp", &self.gateway_ip),
                ("cidr", &self.cidr),
                ("ipv6AddressMode", &self.ipv6_address_mode),
                ("ipv6RaMode", &self.ipv6_ra_mode),
                ("tags", &self.tags),
                ("tagsAny", &self.tags_any),
                ("notTags", &self.not_tags),
                ("notTagsAny", &self.not_tags_any),
            ],
        )
    }
}

/// Selects one or more security groups
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityGroupFilter {
    pub id: String,
    pub name: String,
    pub description: String,
    pub project_id: String,
    pub tags: String,
    pub tags_any: String,
    pub not_tags: String,
    pub not_tags_any: String,
}

impl fmt::Display for SecurityGroupFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_set_fields(
            f,
            &[
                ("id", &self.id),
                ("name", &self.name),
                ("description", &self.description),
                ("projectId", &self.project_id),
                ("tags", &self.tags),
                ("tagsAny", &self.tags_any),
                ("notTags", &self.not_tags),
                ("notTagsAny", &self.not_tags_any),
            ],
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixedIp {
    pub subnet: Option<SubnetFilter>,
    pub ip_address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressPair {
    pub ip_address: String,
    pub mac_address: String,
}

/// Port binding capabilities
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BindingProfile {
    pub ovs_hw_offload: bool,
    pub trusted_vf: bool,
}

/// One port of the instance
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortSpec {
    pub network: NetworkFilter,
    pub name_suffix: String,
    pub description: String,
    pub admin_state_up: Option<bool>,
    pub mac_address: String,
    pub fixed_ips: Vec<FixedIp>,
    pub allowed_address_pairs: Vec<AddressPair>,
    /// `None` uses the instance-level security groups
    pub security_groups: Option<Vec<SecurityGroupFilter>>,
    /// `None` inherits the instance trunk flag
    pub trunk: Option<bool>,
    /// `None` leaves the cloud default in place
    pub disable_port_security: Option<bool>,
    pub vnic_type: String,
    pub profile: BindingProfile,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RootVolumeSpec {
    pub size: i32,
    pub volume_type: String,
    pub availability_zone: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockDeviceType {
    /// Ephemeral disk on the hypervisor
    Local,
    /// Cinder volume
    Volume,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDeviceSpec {
    pub name: String,
    pub size_gib: i32,
    pub device_type: BlockDeviceType,
    pub volume_type: String,
    pub availability_zone: String,
}

/// `first` unless it is empty, else `second`.
fn coalesce(first: &str, second: &str) -> String {
    let value = if first.is_empty() { second } else { first };
    value.to_string()
}

/// Invert an optional port-security flag, keeping "unset" unset.
fn disable_port_security(port_security: Option<bool>) -> Option<bool> {
    port_security.map(|enabled| !enabled)
}

/// Map the free-form binding profile onto the capabilities we understand.
pub fn binding_profile(profile: &BTreeMap<String, String>) -> BindingProfile {
    let mut binding = BindingProfile::default();
    for (key, value) in profile {
        if key == "capabilities" && value.contains("switchdev") {
            binding.ovs_hw_offload = true;
        }
        if key == "trusted" && value == "true" {
            binding.trusted_vf = true;
        }
    }
    binding
}

fn subnet_filter(subnet: &SubnetParam) -> SubnetFilter {
    let filter = &subnet.filter;
    SubnetFilter {
        id: coalesce(&subnet.uuid, &filter.id),
        name: filter.name.clone(),
        description: filter.description.clone(),
        project_id: coalesce(&filter.project_id, &filter.tenant_id),
        ip_version: filter.ip_version,
        gateway_ip: filter.gateway_ip.clone(),
        cidr: filter.cidr.clone(),
        ipv6_address_mode: filter.ipv6_address_mode.clone(),
        ipv6_ra_mode: filter.ipv6_ra_mode.clone(),
        tags: filter.tags.clone(),
        tags_any: filter.tags_any.clone(),
        not_tags: filter.not_tags.clone(),
        not_tags_any: filter.not_tags_any.clone(),
    }
}

/// Expand one `NetworkParam` into ports.
///
/// A param with neither network ID nor filter yields one port per subnet;
/// anything else yields a single port with one fixed IP per subnet.
pub fn network_param_to_ports(
    net: &NetworkParam,
    api_vips: &[String],
    ingress_vips: &[String],
    trunk: bool,
    ignore_address_pairs: bool,
) -> Vec<PortSpec> {
    let allowed_address_pairs = if net.no_allowed_address_pairs || ignore_address_pairs {
        Vec::new()
    } else {
        api_vips
            .iter()
            .chain(ingress_vips)
            .map(|vip| AddressPair {
                ip_address: vip.clone(),
                mac_address: String::new(),
            })
            .collect()
    };

    let network = NetworkFilter {
        id: coalesce(&net.uuid, &net.filter.id),
        name: net.filter.name.clone(),
        description: net.filter.description.clone(),
        project_id: coalesce(&net.filter.project_id, &net.filter.tenant_id),
        tags: net.filter.tags.clone(),
        tags_any: net.filter.tags_any.clone(),
        not_tags: net.filter.not_tags.clone(),
        not_tags_any: net.filter.not_tags_any.clone(),
    };

    let base = PortSpec {
        network,
        allowed_address_pairs,
        trunk: Some(trunk),
        disable_port_security: disable_port_security(net.port_security),
        vnic_type: net.vnic_type.clone(),
        profile: binding_profile(&net.profile),
        ..Default::default()
    };

    if base.network.id.is_empty() && net.filter.is_empty() {
        // Subnets only: the network is resolved from each subnet later
        return net
            .subnets
            .iter()
            .map(|subnet| PortSpec {
                fixed_ips: vec![FixedIp {
                    subnet: Some(subnet_filter(subnet)),
                    ip_address: String::new(),
                }],
                tags: net.port_tags.iter().chain(&subnet.port_tags).cloned().collect(),
                ..base.clone()
            })
            .collect();
    }

    let fixed_ips = net
        .subnets
        .iter()
        .map(|subnet| FixedIp {
            subnet: Some(subnet_filter(subnet)),
            ip_address: String::new(),
        })
        .collect();
    let tags = net
        .port_tags
        .iter()
        .chain(net.subnets.iter().flat_map(|subnet| subnet.port_tags.iter()))
        .cloned()
        .collect();

    vec![PortSpec {
        fixed_ips,
        tags,
        ..base
    }]
}

/// Translate an explicit `PortOpts`.
pub fn port_opts_to_port(port: &PortOpts, ignore_address_pairs: bool) -> PortSpec {
    let security_groups = port.security_groups.as_ref().map(|ids| {
        ids.iter()
            .map(|id| SecurityGroupFilter {
                id: id.clone(),
                ..Default::default()
            })
            .collect()
    });

    let allowed_address_pairs = if ignore_address_pairs {
        Vec::new()
    } else {
        port.allowed_address_pairs
            .iter()
            .map(|pair| AddressPair {
                ip_address: pair.ip_address.clone(),
                mac_address: pair.mac_address.clone(),
            })
            .collect()
    };

    PortSpec {
        network: NetworkFilter {
            id: port.network_id.clone(),
            ..Default::default()
        },
        name_suffix: port.name_suffix.clone(),
        description: port.description.clone(),
        admin_state_up: port.admin_state_up,
        mac_address: port.mac_address.clone(),
        fixed_ips: port
            .fixed_ips
            .iter()
            .map(|ip| FixedIp {
                subnet: Some(SubnetFilter {
                    id: ip.subnet_id.clone(),
                    ..Default::default()
                }),
                ip_address: ip.ip_address.clone(),
            })
            .collect(),
        allowed_address_pairs,
        security_groups,
        trunk: port.trunk,
        disable_port_security: disable_port_security(port.port_security),
        vnic_type: port.vnic_type.clone(),
        profile: binding_profile(&port.profile),
        tags: port.tags.clone(),
    }
}

/// Security-group selectors; `uuid` and `name` override the filter.
pub fn security_group_filters(params: &[SecurityGroupParam]) -> Vec<SecurityGroupFilter> {
    params
        .iter()
        .map(|group| SecurityGroupFilter {
            id: coalesce(&group.uuid, &group.filter.id),
            name: coalesce(&group.name, &group.filter.name),
            description: group.filter.description.clone(),
            project_id: group.filter.project_id.clone(),
            tags: group.filter.tags.clone(),
            tags_any: group.filter.tags_any.clone(),
            not_tags: group.filter.not_tags.clone(),
            not_tags_any: group.filter.not_tags_any.clone(),
        })
        .collect()
}

/// All ports of the instance: network-derived first, then explicit.
pub fn create_ports(
    spec: &OpenstackProviderSpec,
    api_vips: &[String],
    ingress_vips: &[String],
    ignore_address_pairs: bool,
) -> Vec<PortSpec> {
    let mut ports = Vec::with_capacity(spec.networks.len() + spec.ports.len());
    for network in &spec.networks {
        ports.extend(network_param_to_ports(
            network,
            api_vips,
            ingress_vips,
            spec.trunk,
            ignore_address_pairs,
        ));
    }
    for port in &spec.ports {
        ports.push(port_opts_to_port(port, ignore_address_pairs));
    }
    ports
}

/// Image to boot from. With a root volume this is the volume's source.
pub fn image_name(spec: &OpenstackProviderSpec) -> &str {
    match &spec.root_volume {
        Some(root_volume) => &root_volume.source_uuid,
        None => &spec.image,
    }
}

pub fn root_volume(spec: &OpenstackProviderSpec) -> Option<RootVolumeSpec> {
    spec.root_volume.as_ref().map(|root_volume| RootVolumeSpec {
        size: root_volume.size,
        volume_type: root_volume.volume_type.clone(),
        availability_zone: root_volume.zone.clone(),
    })
}

/// `<namespace>-<cluster ID label>`
pub fn cluster_name_with_namespace(machine: &Machine) -> String {
    let cluster = machine
        .labels()
        .get(MACHINE_CLUSTER_ID_LABEL)
        .map(String::as_str)
        .unwrap_or_default();
    format!("{}-{}", machine.namespace().unwrap_or_default(), cluster)
}

/// Tags added to every instance after the spec's own tags
pub fn default_tags(machine: &Machine) -> Vec<String> {
    vec![PROVIDER_TAG.to_string(), cluster_name_with_namespace(machine)]
}

fn additional_block_devices(spec: &OpenstackProviderSpec) -> Result<Vec<BlockDeviceSpec>, ControllerError> {
    spec.additional_block_devices
        .iter()
        .map(|device| {
            if device.storage == BlockDeviceStorage::default() {
                return Err(ControllerError::InvalidConfiguration(
                    "missing storage for additional block device".to_string(),
                ));
            }
            let device_type = match device.storage.storage_type.as_str() {
                LOCAL_BLOCK_DEVICE => BlockDeviceType::Local,
                VOLUME_BLOCK_DEVICE => BlockDeviceType::Volume,
                other => {
                    return Err(ControllerError::InvalidConfiguration(format!(
                        "unknown block device type: {}",
                        other
                    )));
                }
            };
            let volume = device.storage.volume.clone().unwrap_or_default();
            Ok(BlockDeviceSpec {
                name: device.name.clone(),
                size_gib: device.size_gib,
                device_type,
                volume_type: volume.volume_type,
                availability_zone: volume.availability_zone,
            })
        })
        .collect()
}

/// Resolve the network of every subnet-only port.
///
/// Each subnet query must match exactly one subnet.
pub async fn resolve_subnet_networks(
    ports: &mut [PortSpec],
    network: &dyn NetworkService,
) -> Result<(), ControllerError> {
    for port in ports.iter_mut().filter(|port| port.network.is_empty()) {
        let Some(subnet) = port.fixed_ips.first().and_then(|ip| ip.subnet.as_ref()) else {
            continue;
        };
        let subnets = network.list_subnets(&subnet.to_list_opts()).await?;
        match subnets.as_slice() {
            [found] => port.network.id = found.network_id.clone(),
            [] => {
                return Err(ControllerError::InvalidConfiguration(format!(
                    "no subnet found matching filter {}",
                    subnet
                )));
            }
            _ => {
                return Err(ControllerError::InvalidConfiguration(format!(
                    "{} subnets match filter {}; expected exactly one",
                    subnets.len(),
                    subnet
                )));
            }
        }
    }
    Ok(())
}

/// Server group to place the instance in, creating it by name if needed.
pub async fn resolve_server_group(
    spec: &OpenstackProviderSpec,
    compute: &dyn ComputeService,
) -> Result<String, ControllerError> {
    if !spec.server_group_id.is_empty() || spec.server_group_name.is_empty() {
        return Ok(spec.server_group_id.clone());
    }

    let groups = compute.list_server_groups().await?;
    let matching = groups
        .iter()
        .filter(|group| group.name == spec.server_group_name)
        .collect::<Vec<_>>();
    match matching.as_slice() {
        [group] => Ok(group.id.clone()),
        [] => {
            info!("Creating server group {}", spec.server_group_name);
            let group = compute
                .create_server_group(&spec.server_group_name, DEFAULT_SERVER_GROUP_POLICY)
                .await
                .map_err(|e| ControllerError::Translation(format!("error when creating a server group: {}", e)))?;
            Ok(group.id)
        }
        _ => Err(ControllerError::InvalidConfiguration(format!(
            "more than one server group of name {} exists",
            spec.server_group_name
        ))),
    }
}

/// Inputs to a translation beyond the spec itself
#[derive(Clone, Copy)]
pub struct TranslationContext<'a> {
    pub infrastructure: &'a ClusterInfrastructure,
    pub user_data: &'a str,
    pub compute: &'a dyn ComputeService,
    pub network: &'a dyn NetworkService,
}

/// Build the full instance spec for creating `machine`.
pub async fn machine_to_instance_spec(
    machine: &Machine,
    spec: &OpenstackProviderSpec,
    ctx: TranslationContext<'_>,
) -> Result<InstanceSpec, ControllerError> {
    let infra = ctx.infrastructure;
    let mut ports = create_ports(
        spec,
        &infra.api_server_internal_ips,
        &infra.ingress_ips,
        infra.user_managed_load_balancer,
    );
    resolve_subnet_networks(&mut ports, ctx.network).await?;
    let additional_block_devices = additional_block_devices(spec)?;
    // Last: may create a server group in the cloud
    let server_group_id = resolve_server_group(spec, ctx.compute).await?;

    let mut tags = spec.tags.clone();
    tags.extend(default_tags(machine));

    Ok(InstanceSpec {
        name: machine.name_any(),
        image: image_name(spec).to_string(),
        flavor: spec.flavor.clone(),
        ssh_key_name: spec.key_name.clone(),
        user_data: ctx.user_data.to_string(),
        tags,
        metadata: spec.server_metadata.clone(),
        config_drive: spec.config_drive.unwrap_or(false),
        failure_domain: spec.availability_zone.clone(),
        server_group_id,
        trunk: spec.trunk,
        ports,
        security_groups: security_group_filters(&spec.security_groups),
        root_volume: root_volume(spec),
        additional_block_devices,
    })
}

/// Instance spec with just enough to find and delete what a machine owns.
pub fn minimal_instance_spec(machine: &Machine, spec: &OpenstackProviderSpec) -> InstanceSpec {
    InstanceSpec {
        name: machine.name_any(),
        // Port names only; VIPs do not matter
        ports: create_ports(spec, &[], &[], true),
        root_volume: root_volume(spec),
        ..Default::default()
    }
}
