//! Instance service
//!
//! The cloud-call layer between an [`InstanceSpec`] and the OpenStack APIs.
//! Creation is get-or-create for every named resource, so a pass interrupted
//! halfway picks up what the previous one left behind. Resources created by a
//! failed [`InstanceService::create_instance`] call are deleted again before
//! the error is returned.

use crate::convert::{
    BindingProfile, BlockDeviceType, InstanceSpec, NetworkFilter, PortSpec, SecurityGroupFilter,
};
use crate::error::ControllerError;
use crate::session::CloudSession;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use crds::{MachineAddress, MachineAddressType};
use openstack_client::{
    AllowedAddressPair, BlockDeviceMapping, FloatingIp, NetworkListOpts, OpenStackError, Port,
    PortCreateRequest, PortFixedIp, PortListOpts, SecurityGroupListOpts, Server, ServerCreateRequest,
    Volume, VolumeCreateRequest,
};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Prefix of every provider ID written by this controller
pub const PROVIDER_PREFIX: &str = "openstack:///";

/// Neutron names are limited to 255 characters
const MAX_PORT_NAME_LENGTH: usize = 255;

const VOLUME_AVAILABLE: &str = "available";
const VOLUME_ERROR: &str = "error";

/// How long to wait on slow cloud operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Wait for a new volume to become available
    pub volume_available: Duration,
    /// Keep retrying a failing port delete
    pub port_delete: Duration,
    /// Wait for a deleted server to disappear
    pub server_delete: Duration,
    /// Interval between polls and retries
    pub poll_interval: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            volume_available: Duration::from_secs(300),
            port_delete: Duration::from_secs(180),
            server_delete: Duration::from_secs(180),
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// Observed state of a server
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceStatus {
    server: Server,
}

impl InstanceStatus {
    pub fn new(server: Server) -> Self {
        Self { server }
    }

    pub fn id(&self) -> &str {
        &self.server.id
    }

    /// Nova status, e.g. `ACTIVE` or `ERROR`
    pub fn state(&self) -> &str {
        &self.server.status
    }

    pub fn availability_zone(&self) -> &str {
        &self.server.availability_zone
    }

    /// Addresses of every network; floating IPs are external.
    pub fn addresses(&self) -> Vec<MachineAddress> {
        self.server
            .addresses
            .values()
            .flatten()
            .map(|address| {
                let address_type = if address.is_floating() {
                    MachineAddressType::ExternalIp
                } else {
                    MachineAddressType::InternalIp
                };
                MachineAddress::new(address_type, address.addr.clone())
            })
            .collect()
    }

    /// Provider ID naming this server
    pub fn provider_id(&self) -> String {
        format!("{}{}", PROVIDER_PREFIX, self.server.id)
    }
}

/// Name of the port at `index`: `<instance>-<suffix>` or `<instance>-<index>`.
///
/// Names over the Neutron limit keep their last 255 characters.
pub fn port_name(instance_name: &str, index: usize, name_suffix: &str) -> String {
    let name = if name_suffix.is_empty() {
        format!("{}-{}", instance_name, index)
    } else {
        format!("{}-{}", instance_name, name_suffix)
    };
    let length = name.chars().count();
    if length <= MAX_PORT_NAME_LENGTH {
        return name;
    }
    name.chars().skip(length - MAX_PORT_NAME_LENGTH).collect()
}

/// Name of the port on the primary network, if the spec has any port.
pub fn primary_port_name(spec: &InstanceSpec) -> Option<String> {
    spec.ports
        .first()
        .map(|port| port_name(&spec.name, 0, &port.name_suffix))
}

fn root_volume_name(instance_name: &str) -> String {
    format!("{}-root", instance_name)
}

fn block_device_volume_name(instance_name: &str, device_name: &str) -> String {
    format!("{}-{}", instance_name, device_name)
}

/// Instance tags followed by port tags, without duplicates.
fn merge_tags(instance_tags: &[String], port_tags: &[String]) -> Vec<String> {
    let mut tags: Vec<String> = Vec::with_capacity(instance_tags.len() + port_tags.len());
    for tag in instance_tags.iter().chain(port_tags) {
        if !tags.contains(tag) {
            tags.push(tag.clone());
        }
    }
    tags
}

fn binding_profile_map(profile: BindingProfile) -> BTreeMap<String, serde_json::Value> {
    let mut map = BTreeMap::new();
    if profile.ovs_hw_offload {
        map.insert("capabilities".to_string(), serde_json::json!(["switchdev"]));
    }
    if profile.trusted_vf {
        map.insert("trusted".to_string(), serde_json::json!(true));
    }
    map
}

fn network_list_opts(filter: &NetworkFilter) -> NetworkListOpts {
    NetworkListOpts {
        id: filter.id.clone(),
        name: filter.name.clone(),
        description: filter.description.clone(),
        project_id: filter.project_id.clone(),
        tags: filter.tags.clone(),
        tags_any: filter.tags_any.clone(),
        not_tags: filter.not_tags.clone(),
        not_tags_any: filter.not_tags_any.clone(),
        ..Default::default()
    }
}

fn security_group_list_opts(filter: &SecurityGroupFilter) -> SecurityGroupListOpts {
    SecurityGroupListOpts {
        id: filter.id.clone(),
        name: filter.name.clone(),
        description: filter.description.clone(),
        project_id: filter.project_id.clone(),
        tags: filter.tags.clone(),
        tags_any: filter.tags_any.clone(),
        not_tags: filter.not_tags.clone(),
        not_tags_any: filter.not_tags_any.clone(),
        ..Default::default()
    }
}

fn not_unique(kind: &str, name: &str, count: usize) -> ControllerError {
    OpenStackError::InvalidRequest(format!("found {} {}s named {}; expected at most one", count, kind, name))
        .into()
}

/// Resources created during one `create_instance` call
#[derive(Debug, Default)]
struct CreatedResources {
    trunks: Vec<String>,
    ports: Vec<String>,
    volumes: Vec<String>,
}

/// Cloud operations on instances, over one cloud session.
#[derive(Clone)]
pub struct InstanceService {
    session: CloudSession,
    timeouts: Timeouts,
}

impl InstanceService {
    pub fn new(session: CloudSession, timeouts: Timeouts) -> Self {
        Self { session, timeouts }
    }

    pub fn session(&self) -> &CloudSession {
        &self.session
    }

    /// Server with the given ID, if it exists.
    pub async fn get_instance_status(&self, id: &str) -> Result<Option<InstanceStatus>, ControllerError> {
        Ok(self.session.compute.get_server(id).await?.map(InstanceStatus::new))
    }

    /// Server with exactly the given name, if it exists.
    pub async fn get_instance_status_by_name(&self, name: &str) -> Result<Option<InstanceStatus>, ControllerError> {
        let mut servers = self.session.compute.list_servers_by_name(name).await?;
        match servers.len() {
            0 => Ok(None),
            1 => Ok(servers.pop().map(InstanceStatus::new)),
            count => Err(not_unique("server", name, count)),
        }
    }

    /// Create the server described by `spec` with its ports and volumes.
    pub async fn create_instance(&self, spec: &InstanceSpec) -> Result<InstanceStatus, ControllerError> {
        let mut created = CreatedResources::default();
        match self.create_instance_resources(spec, &mut created).await {
            Ok(status) => Ok(status),
            Err(err) => {
                warn!("Creating instance {} failed, cleaning up: {}", spec.name, err);
                match self.delete_created(&created).await {
                    Ok(()) => Err(err),
                    Err(cleanup) => Err(err.with_cleanup(cleanup)),
                }
            }
        }
    }

    async fn create_instance_resources(
        &self,
        spec: &InstanceSpec,
        created: &mut CreatedResources,
    ) -> Result<InstanceStatus, ControllerError> {
        let default_security_groups = self.resolve_security_groups(&spec.security_groups).await?;

        let mut port_ids = Vec::with_capacity(spec.ports.len());
        for (index, port_spec) in spec.ports.iter().enumerate() {
            let port = self
                .get_or_create_port(spec, index, port_spec, &default_security_groups, created)
                .await?;
            self.session
                .network
                .replace_tags("ports", &port.id, &merge_tags(&spec.tags, &port_spec.tags))
                .await?;
            if port_spec.trunk.unwrap_or(spec.trunk) {
                self.ensure_trunk(spec, &port, created).await?;
            }
            port_ids.push(port.id);
        }

        let image_id = if spec.image.is_empty() {
            String::new()
        } else {
            self.session.image.get_image_id(&spec.image).await?
        };

        let mut block_devices = Vec::new();
        let mut image_ref = image_id.clone();
        if let Some(root) = &spec.root_volume {
            let volume = self
                .get_or_create_volume(
                    VolumeCreateRequest {
                        name: root_volume_name(&spec.name),
                        size: root.size,
                        description: format!("Root volume for {}", spec.name),
                        volume_type: root.volume_type.clone(),
                        availability_zone: root.availability_zone.clone(),
                        image_id: image_id.clone(),
                        ..Default::default()
                    },
                    created,
                )
                .await?;
            block_devices.push(BlockDeviceMapping {
                source_type: "volume".to_string(),
                destination_type: "volume".to_string(),
                uuid: volume.id,
                boot_index: 0,
                delete_on_termination: true,
                ..Default::default()
            });
            // The server boots from the volume
            image_ref.clear();
        } else if !spec.additional_block_devices.is_empty() {
            // Extra mappings replace the implicit image disk, so spell it out
            block_devices.push(BlockDeviceMapping {
                source_type: "image".to_string(),
                destination_type: "local".to_string(),
                uuid: image_id.clone(),
                boot_index: 0,
                delete_on_termination: true,
                ..Default::default()
            });
        }

        for device in &spec.additional_block_devices {
            let mapping = match device.device_type {
                BlockDeviceType::Local => BlockDeviceMapping {
                    source_type: "blank".to_string(),
                    destination_type: "local".to_string(),
                    boot_index: -1,
                    delete_on_termination: true,
                    volume_size: Some(device.size_gib),
                    tag: Some(device.name.clone()),
                    ..Default::default()
                },
                BlockDeviceType::Volume => {
                    let volume = self
                        .get_or_create_volume(
                            VolumeCreateRequest {
                                name: block_device_volume_name(&spec.name, &device.name),
                                size: device.size_gib,
                                description: format!("Additional block device for {}", spec.name),
                                volume_type: device.volume_type.clone(),
                                availability_zone: device.availability_zone.clone(),
                                ..Default::default()
                            },
                            created,
                        )
                        .await?;
                    BlockDeviceMapping {
                        source_type: "volume".to_string(),
                        destination_type: "volume".to_string(),
                        uuid: volume.id,
                        boot_index: -1,
                        delete_on_termination: true,
                        tag: Some(device.name.clone()),
                        ..Default::default()
                    }
                }
            };
            block_devices.push(mapping);
        }

        for volume_id in block_devices
            .iter()
            .filter(|mapping| mapping.source_type == "volume")
            .map(|mapping| mapping.uuid.clone())
            .collect::<Vec<_>>()
        {
            self.wait_for_volume(&volume_id).await?;
        }

        let request = ServerCreateRequest {
            name: spec.name.clone(),
            image_ref,
            flavor_ref: self.session.compute.get_flavor_id(&spec.flavor).await?,
            key_name: spec.ssh_key_name.clone(),
            user_data: STANDARD.encode(&spec.user_data),
            metadata: spec.metadata.clone(),
            tags: spec.tags.clone(),
            config_drive: spec.config_drive.then_some(true),
            availability_zone: spec.failure_domain.clone(),
            port_ids,
            block_devices,
            server_group_id: (!spec.server_group_id.is_empty()).then(|| spec.server_group_id.clone()),
        };

        info!("Creating server {}", spec.name);
        let server = self.session.compute.create_server(&request).await?;
        Ok(InstanceStatus::new(server))
    }

    async fn resolve_network(&self, filter: &NetworkFilter) -> Result<String, ControllerError> {
        let id_only = NetworkFilter {
            id: filter.id.clone(),
            ..Default::default()
        };
        if !filter.id.is_empty() && *filter == id_only {
            return Ok(filter.id.clone());
        }

        let mut networks = self.session.network.list_networks(&network_list_opts(filter)).await?;
        match networks.len() {
            1 => Ok(networks.remove(0).id),
            0 => Err(OpenStackError::NotFound(format!("no network found matching {}", filter)).into()),
            count => Err(OpenStackError::InvalidRequest(format!(
                "{} networks match {}; expected exactly one",
                count, filter
            ))
            .into()),
        }
    }

    async fn resolve_security_groups(&self, filters: &[SecurityGroupFilter]) -> Result<Vec<String>, ControllerError> {
        let mut ids: Vec<String> = Vec::new();
        for filter in filters {
            let id_only = SecurityGroupFilter {
                id: filter.id.clone(),
                ..Default::default()
            };
            let found = if !filter.id.is_empty() && *filter == id_only {
                vec![filter.id.clone()]
            } else {
                let groups = self
                    .session
                    .network
                    .list_security_groups(&security_group_list_opts(filter))
                    .await?;
                if groups.is_empty() {
                    return Err(OpenStackError::NotFound(format!(
                        "no security group found matching {}",
                        filter
                    ))
                    .into());
                }
                groups.into_iter().map(|group| group.id).collect()
            };
            for id in found {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }

    async fn resolve_fixed_ips(&self, port: &PortSpec, network_id: &str) -> Result<Vec<PortFixedIp>, ControllerError> {
        let mut fixed_ips = Vec::with_capacity(port.fixed_ips.len());
        for fixed_ip in &port.fixed_ips {
            let subnet_id = match &fixed_ip.subnet {
                None => String::new(),
                Some(filter) => {
                    let opts = filter.to_list_opts();
                    if opts.is_id_only() {
                        opts.id
                    } else {
                        let opts = openstack_client::SubnetListOpts {
                            network_id: network_id.to_string(),
                            ..opts
                        };
                        let mut subnets = self.session.network.list_subnets(&opts).await?;
                        match subnets.len() {
                            1 => subnets.remove(0).id,
                            0 => {
                                return Err(OpenStackError::NotFound(format!(
                                    "no subnet found matching {}",
                                    filter
                                ))
                                .into());
                            }
                            count => {
                                return Err(OpenStackError::InvalidRequest(format!(
                                    "{} subnets match {}; expected exactly one",
                                    count, filter
                                ))
                                .into());
                            }
                        }
                    }
                }
            };
            fixed_ips.push(PortFixedIp {
                subnet_id,
                ip_address: fixed_ip.ip_address.clone(),
            });
        }
        Ok(fixed_ips)
    }

    async fn get_or_create_port(
        &self,
        spec: &InstanceSpec,
        index: usize,
        port: &PortSpec,
        default_security_groups: &[String],
        created: &mut CreatedResources,
    ) -> Result<Port, ControllerError> {
        let name = port_name(&spec.name, index, &port.name_suffix);
        let network_id = self.resolve_network(&port.network).await?;

        let mut existing = self
            .session
            .network
            .list_ports(&PortListOpts {
                name: name.clone(),
                network_id: network_id.clone(),
                ..Default::default()
            })
            .await?;
        match existing.len() {
            0 => {}
            1 => {
                debug!("Reusing port {}", name);
                return Ok(existing.remove(0));
            }
            count => return Err(not_unique("port", &name, count)),
        }

        let port_security_disabled = port.disable_port_security == Some(true);
        let security_groups = if port_security_disabled {
            None
        } else {
            let ids = match &port.security_groups {
                Some(filters) => self.resolve_security_groups(filters).await?,
                None => default_security_groups.to_vec(),
            };
            (!ids.is_empty()).then_some(ids)
        };
        let allowed_address_pairs = if port_security_disabled || port.allowed_address_pairs.is_empty() {
            None
        } else {
            Some(
                port.allowed_address_pairs
                    .iter()
                    .map(|pair| AllowedAddressPair {
                        ip_address: pair.ip_address.clone(),
                        mac_address: pair.mac_address.clone(),
                    })
                    .collect(),
            )
        };

        let request = PortCreateRequest {
            name: name.clone(),
            network_id: network_id.clone(),
            description: port.description.clone(),
            admin_state_up: port.admin_state_up,
            mac_address: port.mac_address.clone(),
            fixed_ips: self.resolve_fixed_ips(port, &network_id).await?,
            project_id: port.network.project_id.clone(),
            security_groups,
            allowed_address_pairs,
            port_security_enabled: port.disable_port_security.map(|disabled| !disabled),
            vnic_type: port.vnic_type.clone(),
            profile: binding_profile_map(port.profile),
            ..Default::default()
        };

        info!("Creating port {}", name);
        let port = self.session.network.create_port(&request).await?;
        created.ports.push(port.id.clone());
        Ok(port)
    }

    async fn ensure_trunk(
        &self,
        spec: &InstanceSpec,
        port: &Port,
        created: &mut CreatedResources,
    ) -> Result<(), ControllerError> {
        if !self.session.network.trunk_supported().await? {
            return Err(OpenStackError::InvalidRequest(
                "there is no trunk support; please ensure that the trunk extension is enabled in your OpenStack deployment"
                    .to_string(),
            )
            .into());
        }

        let mut trunks = self.session.network.list_trunks(&port.id).await?;
        let trunk = match trunks.len() {
            0 => {
                info!("Creating trunk {}", port.name);
                let trunk = self.session.network.create_trunk(&port.name, &port.id).await?;
                created.trunks.push(trunk.id.clone());
                trunk
            }
            1 => trunks.remove(0),
            count => return Err(not_unique("trunk", &port.name, count)),
        };
        self.session.network.replace_tags("trunks", &trunk.id, &spec.tags).await?;
        Ok(())
    }

    async fn get_or_create_volume(
        &self,
        request: VolumeCreateRequest,
        created: &mut CreatedResources,
    ) -> Result<Volume, ControllerError> {
        let mut existing = self.session.volume.list_volumes_by_name(&request.name).await?;
        match existing.len() {
            0 => {
                info!("Creating volume {}", request.name);
                let volume = self.session.volume.create_volume(&request).await?;
                created.volumes.push(volume.id.clone());
                Ok(volume)
            }
            1 => Ok(existing.remove(0)),
            count => Err(not_unique("volume", &request.name, count)),
        }
    }

    async fn wait_for_volume(&self, id: &str) -> Result<(), ControllerError> {
        let deadline = Instant::now() + self.timeouts.volume_available;
        loop {
            let volume = self.session.volume.get_volume(id).await?;
            match volume.status.as_str() {
                VOLUME_AVAILABLE => return Ok(()),
                VOLUME_ERROR => {
                    return Err(OpenStackError::InvalidRequest(format!("volume {} is in error state", id)).into());
                }
                status => debug!("Volume {} is {}", id, status),
            }
            if Instant::now() >= deadline {
                return Err(OpenStackError::InvalidRequest(format!(
                    "volume {} did not become available within {:?}",
                    id, self.timeouts.volume_available
                ))
                .into());
            }
            tokio::time::sleep(self.timeouts.poll_interval).await;
        }
    }

    async fn delete_created(&self, created: &CreatedResources) -> Result<(), ControllerError> {
        let mut first_error = None;
        for id in &created.trunks {
            if let Err(e) = self.session.network.delete_trunk(id).await {
                first_error.get_or_insert(ControllerError::from(e));
            }
        }
        for id in &created.ports {
            if let Err(e) = self.session.network.delete_port(id).await {
                first_error.get_or_insert(ControllerError::from(e));
            }
        }
        for id in &created.volumes {
            if let Err(e) = self.session.volume.delete_volume(id).await {
                first_error.get_or_insert(ControllerError::from(e));
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Delete the server and everything created alongside it.
    ///
    /// `status` is `None` when the server is already gone; leftover ports
    /// and the root volume are still cleaned up.
    pub async fn delete_instance(
        &self,
        status: Option<&InstanceStatus>,
        spec: &InstanceSpec,
    ) -> Result<(), ControllerError> {
        match status {
            Some(status) => {
                for interface in self.session.compute.list_interfaces(status.id()).await? {
                    self.delete_trunks(&interface.port_id).await?;
                }
                info!("Deleting server {}", status.id());
                match self.session.compute.delete_server(status.id()).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e.into()),
                }
                self.wait_for_server_deleted(status.id()).await?;
            }
            None => info!("Server {} already deleted", spec.name),
        }

        for (index, port) in spec.ports.iter().enumerate() {
            let name = port_name(&spec.name, index, &port.name_suffix);
            let ports = self
                .session
                .network
                .list_ports(&PortListOpts {
                    name,
                    ..Default::default()
                })
                .await?;
            for port in ports {
                self.delete_trunks(&port.id).await?;
                self.delete_port_with_retry(&port.id).await?;
            }
        }

        // With a server the root volume goes with it
        if status.is_none() && spec.root_volume.is_some() {
            for volume in self
                .session
                .volume
                .list_volumes_by_name(&root_volume_name(&spec.name))
                .await?
            {
                info!("Deleting root volume {}", volume.name);
                match self.session.volume.delete_volume(&volume.id).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }

    async fn delete_trunks(&self, port_id: &str) -> Result<(), ControllerError> {
        for trunk in self.session.network.list_trunks(port_id).await? {
            debug!("Deleting trunk {}", trunk.id);
            match self.session.network.delete_trunk(&trunk.id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn delete_port_with_retry(&self, id: &str) -> Result<(), ControllerError> {
        let deadline = Instant::now() + self.timeouts.port_delete;
        loop {
            match self.session.network.delete_port(id).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_not_found() => return Ok(()),
                Err(e) if Instant::now() >= deadline => return Err(e.into()),
                Err(e) => {
                    debug!("Retrying delete of port {}: {}", id, e);
                    tokio::time::sleep(self.timeouts.poll_interval).await;
                }
            }
        }
    }

    async fn wait_for_server_deleted(&self, id: &str) -> Result<(), ControllerError> {
        let deadline = Instant::now() + self.timeouts.server_delete;
        while self.session.compute.get_server(id).await?.is_some() {
            if Instant::now() >= deadline {
                return Err(OpenStackError::InvalidRequest(format!(
                    "server {} was not deleted within {:?}",
                    id, self.timeouts.server_delete
                ))
                .into());
            }
            tokio::time::sleep(self.timeouts.poll_interval).await;
        }
        Ok(())
    }

    /// Floating IP with `address`, allocated from the external network if
    /// it does not exist yet.
    pub async fn get_or_create_floating_ip(&self, address: &str) -> Result<FloatingIp, ControllerError> {
        if let Some(fip) = self.session.network.list_floating_ips(address).await?.into_iter().next() {
            return Ok(fip);
        }

        let mut external = self
            .session
            .network
            .list_networks(&NetworkListOpts {
                external: Some(true),
                ..Default::default()
            })
            .await?;
        if external.len() != 1 {
            return Err(OpenStackError::InvalidRequest(format!(
                "found {} external networks; expected exactly one to allocate floating IP {}",
                external.len(),
                address
            ))
            .into());
        }
        let network = external.remove(0);
        info!("Creating floating IP {} on network {}", address, network.id);
        Ok(self.session.network.create_floating_ip(&network.id, address).await?)
    }

    /// ID of the port a floating IP should be attached to.
    ///
    /// The only port when the server has exactly one, else the server's port
    /// named after the primary network.
    pub async fn management_port(
        &self,
        status: &InstanceStatus,
        primary_port_name: Option<&str>,
    ) -> Result<String, ControllerError> {
        let mut interfaces = self.session.compute.list_interfaces(status.id()).await?;
        if interfaces.len() == 1 {
            return Ok(interfaces.remove(0).port_id);
        }

        let name = primary_port_name.ok_or_else(|| {
            ControllerError::from(OpenStackError::InvalidRequest(format!(
                "server {} has {} ports and no primary network",
                status.id(),
                interfaces.len()
            )))
        })?;
        let mut ports = self
            .session
            .network
            .list_ports(&PortListOpts {
                name: name.to_string(),
                device_id: status.id().to_string(),
                ..Default::default()
            })
            .await?;
        match ports.len() {
            1 => Ok(ports.remove(0).id),
            count => Err(OpenStackError::InvalidRequest(format!(
                "expected exactly one management port named {} on server {}, found {}",
                name,
                status.id(),
                count
            ))
            .into()),
        }
    }

    pub async fn associate_floating_ip(&self, floating_ip_id: &str, port_id: &str) -> Result<(), ControllerError> {
        info!("Associating floating IP {} with port {}", floating_ip_id, port_id);
        self.session
            .network
            .associate_floating_ip(floating_ip_id, port_id)
            .await?;
        Ok(())
    }
}
