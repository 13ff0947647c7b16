//! Network operations for MockOpenStackClient

use super::{MockOpenStackClient, has_tags, lock, matches};
use crate::error::OpenStackError;
use crate::models::*;
use crate::openstack_trait::NetworkService;

#[async_trait::async_trait]
impl NetworkService for MockOpenStackClient {
    async fn list_networks(&self, opts: &NetworkListOpts) -> Result<Vec<Network>, OpenStackError> {
        self.record("list_networks", &opts.to_query())?;
        Ok(lock(&self.networks)
            .values()
            .filter(|n| {
                matches(&opts.id, &n.id)
                    && matches(&opts.name, &n.name)
                    && has_tags(&opts.tags, &n.tags)
                    && opts.external.is_none_or(|external| external == n.external)
            })
            .cloned()
            .collect())
    }

    async fn list_subnets(&self, opts: &SubnetListOpts) -> Result<Vec<Subnet>, OpenStackError> {
        self.record("list_subnets", &opts.to_query())?;
        Ok(lock(&self.subnets)
            .values()
            .filter(|s| {
                matches(&opts.id, &s.id)
                    && matches(&opts.name, &s.name)
                    && matches(&opts.network_id, &s.network_id)
                    && matches(&opts.cidr, &s.cidr)
                    && (opts.ip_version == 0 || opts.ip_version == s.ip_version)
                    && has_tags(&opts.tags, &s.tags)
            })
            .cloned()
            .collect())
    }

    async fn list_security_groups(&self, opts: &SecurityGroupListOpts) -> Result<Vec<SecurityGroup>, OpenStackError> {
        self.record("list_security_groups", &opts.to_query())?;
        Ok(lock(&self.security_groups)
            .values()
            .filter(|g| matches(&opts.id, &g.id) && matches(&opts.name, &g.name))
            .cloned()
            .collect())
    }

    async fn list_ports(&self, opts: &PortListOpts) -> Result<Vec<Port>, OpenStackError> {
        self.record("list_ports", &opts.to_query())?;
        Ok(lock(&self.ports)
            .values()
            .filter(|p| {
                matches(&opts.name, &p.name)
                    && matches(&opts.network_id, &p.network_id)
                    && matches(&opts.device_id, &p.device_id)
            })
            .cloned()
            .collect())
    }

    async fn create_port(&self, request: &PortCreateRequest) -> Result<Port, OpenStackError> {
        self.record("create_port", &request.name)?;
        lock(&self.port_requests).push(request.clone());

        let id = self.next_id("port");
        let port = Port {
            id: id.clone(),
            name: request.name.clone(),
            network_id: request.network_id.clone(),
            device_id: String::new(),
            mac_address: format!("fa:16:3e:00:00:{:02x}", lock(&self.ports).len() % 256),
            fixed_ips: request.fixed_ips.clone(),
            security_groups: request.security_groups.clone().unwrap_or_default(),
            allowed_address_pairs: request.allowed_address_pairs.clone().unwrap_or_default(),
            tags: Vec::new(),
            port_security_enabled: request.port_security_enabled,
            trunk_details: None,
        };
        lock(&self.ports).insert(id, port.clone());
        Ok(port)
    }

    async fn delete_port(&self, id: &str) -> Result<(), OpenStackError> {
        self.record("delete_port", id)?;
        lock(&self.ports)
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| OpenStackError::NotFound(format!("port {} not found", id)))
    }

    async fn replace_tags(&self, resource: &str, id: &str, tags: &[String]) -> Result<(), OpenStackError> {
        self.record("replace_tags", &format!("{}/{}", resource, id))?;
        match resource {
            "ports" => {
                if let Some(port) = lock(&self.ports).get_mut(id) {
                    port.tags = tags.to_vec();
                }
            }
            "trunks" => {
                if let Some(trunk) = lock(&self.trunks).get_mut(id) {
                    trunk.tags = tags.to_vec();
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn trunk_supported(&self) -> Result<bool, OpenStackError> {
        self.record("trunk_supported", "")?;
        Ok(*lock(&self.trunk_support))
    }

    async fn list_trunks(&self, port_id: &str) -> Result<Vec<Trunk>, OpenStackError> {
        self.record("list_trunks", port_id)?;
        Ok(lock(&self.trunks)
            .values()
            .filter(|t| t.port_id == port_id)
            .cloned()
            .collect())
    }

    async fn create_trunk(&self, name: &str, port_id: &str) -> Result<Trunk, OpenStackError> {
        self.record("create_trunk", name)?;
        let trunk = Trunk {
            id: self.next_id("trunk"),
            name: name.to_string(),
            port_id: port_id.to_string(),
            tags: Vec::new(),
        };
        lock(&self.trunks).insert(trunk.id.clone(), trunk.clone());
        Ok(trunk)
    }

    async fn delete_trunk(&self, id: &str) -> Result<(), OpenStackError> {
        self.record("delete_trunk", id)?;
        lock(&self.trunks)
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| OpenStackError::NotFound(format!("trunk {} not found", id)))
    }

    async fn list_floating_ips(&self, address: &str) -> Result<Vec<FloatingIp>, OpenStackError> {
        self.record("list_floating_ips", address)?;
        Ok(lock(&self.floating_ips)
            .values()
            .filter(|f| f.floating_ip_address == address)
            .cloned()
            .collect())
    }

    async fn create_floating_ip(&self, network_id: &str, address: &str) -> Result<FloatingIp, OpenStackError> {
        self.record("create_floating_ip", address)?;
        let fip = FloatingIp {
            id: self.next_id("fip"),
            floating_ip_address: address.to_string(),
            floating_network_id: network_id.to_string(),
            port_id: None,
            fixed_ip_address: None,
        };
        lock(&self.floating_ips).insert(fip.id.clone(), fip.clone());
        Ok(fip)
    }

    async fn associate_floating_ip(&self, floating_ip_id: &str, port_id: &str) -> Result<FloatingIp, OpenStackError> {
        self.record("associate_floating_ip", &format!("{}/{}", floating_ip_id, port_id))?;

        let fixed_ip = lock(&self.ports)
            .get(port_id)
            .and_then(|p| p.fixed_ips.first().map(|ip| ip.ip_address.clone()));

        let mut fips = lock(&self.floating_ips);
        let fip = fips
            .get_mut(floating_ip_id)
            .ok_or_else(|| OpenStackError::NotFound(format!("floating IP {} not found", floating_ip_id)))?;
        fip.port_id = Some(port_id.to_string());
        fip.fixed_ip_address = fixed_ip;
        let fip = fip.clone();
        drop(fips);

        // Surface the association on the owning server like Nova does
        let device_id = lock(&self.ports).get(port_id).map(|p| p.device_id.clone());
        if let Some(device_id) = device_id {
            let network_name = {
                let ports = lock(&self.ports);
                let networks = lock(&self.networks);
                ports
                    .get(port_id)
                    .map(|p| {
                        networks
                            .get(&p.network_id)
                            .map(|n| n.name.clone())
                            .unwrap_or_else(|| p.network_id.clone())
                    })
                    .unwrap_or_default()
            };
            if let Some(server) = lock(&self.servers).get_mut(&device_id) {
                server
                    .addresses
                    .entry(network_name)
                    .or_default()
                    .push(ServerAddress {
                        addr: fip.floating_ip_address.clone(),
                        version: 4,
                        ip_type: Some("floating".to_string()),
                        mac_addr: None,
                    });
            }
        }
        Ok(fip)
    }
}
