//! Compute operations for MockOpenStackClient

use super::{MockOpenStackClient, lock};
use crate::error::OpenStackError;
use crate::models::*;
use crate::openstack_trait::ComputeService;
use std::collections::BTreeMap;

impl MockOpenStackClient {
    /// Addresses for a new server, keyed by the name of each port's network
    fn addresses_for_ports(&self, port_ids: &[String]) -> BTreeMap<String, Vec<ServerAddress>> {
        let ports = lock(&self.ports);
        let networks = lock(&self.networks);
        let mut addresses: BTreeMap<String, Vec<ServerAddress>> = BTreeMap::new();
        for port in port_ids.iter().filter_map(|id| ports.get(id)) {
            let network_name = networks
                .get(&port.network_id)
                .map(|n| n.name.clone())
                .unwrap_or_else(|| port.network_id.clone());
            let entry = addresses.entry(network_name).or_default();
            for ip in port.fixed_ips.iter().filter(|ip| !ip.ip_address.is_empty()) {
                entry.push(ServerAddress {
                    addr: ip.ip_address.clone(),
                    version: if ip.ip_address.contains(':') { 6 } else { 4 },
                    ip_type: Some("fixed".to_string()),
                    mac_addr: Some(port.mac_address.clone()),
                });
            }
        }
        addresses
    }
}

#[async_trait::async_trait]
impl ComputeService for MockOpenStackClient {
    async fn get_flavor_id(&self, name: &str) -> Result<String, OpenStackError> {
        self.record("get_flavor_id", name)?;
        lock(&self.flavors)
            .values()
            .find(|f| f.name == name)
            .map(|f| f.id.clone())
            .ok_or_else(|| OpenStackError::NotFound(format!("flavor {:?} not found", name)))
    }

    async fn get_flavor(&self, id: &str) -> Result<Flavor, OpenStackError> {
        self.record("get_flavor", id)?;
        lock(&self.flavors)
            .get(id)
            .cloned()
            .ok_or_else(|| OpenStackError::NotFound(format!("flavor {} not found", id)))
    }

    async fn list_availability_zones(&self) -> Result<Vec<AvailabilityZone>, OpenStackError> {
        self.record("list_availability_zones", "")?;
        Ok(lock(&self.availability_zones).clone())
    }

    async fn list_server_groups(&self) -> Result<Vec<ServerGroup>, OpenStackError> {
        self.record("list_server_groups", "")?;
        Ok(lock(&self.server_groups).values().cloned().collect())
    }

    async fn get_server_group(&self, id: &str) -> Result<ServerGroup, OpenStackError> {
        self.record("get_server_group", id)?;
        lock(&self.server_groups)
            .get(id)
            .cloned()
            .ok_or_else(|| OpenStackError::NotFound(format!("server group {} not found", id)))
    }

    async fn create_server_group(&self, name: &str, policy: &str) -> Result<ServerGroup, OpenStackError> {
        self.record("create_server_group", name)?;
        let group = ServerGroup {
            id: self.next_id("server-group"),
            name: name.to_string(),
            policy: None,
            policies: vec![policy.to_string()],
        };
        lock(&self.server_groups).insert(group.id.clone(), group.clone());
        Ok(group)
    }

    async fn get_server(&self, id: &str) -> Result<Option<Server>, OpenStackError> {
        self.record("get_server", id)?;
        Ok(lock(&self.servers).get(id).cloned())
    }

    async fn list_servers_by_name(&self, name: &str) -> Result<Vec<Server>, OpenStackError> {
        self.record("list_servers_by_name", name)?;
        Ok(lock(&self.servers)
            .values()
            .filter(|s| s.name == name)
            .cloned()
            .collect())
    }

    async fn create_server(&self, request: &ServerCreateRequest) -> Result<Server, OpenStackError> {
        self.record("create_server", &request.name)?;
        lock(&self.server_requests).push(request.clone());

        let id = self.next_id("server");
        for port_id in &request.port_ids {
            if let Some(port) = lock(&self.ports).get_mut(port_id) {
                port.device_id = id.clone();
            }
        }

        let mut flavor = serde_json::Map::new();
        if let Some(f) = lock(&self.flavors).get(&request.flavor_ref) {
            flavor.insert("original_name".to_string(), serde_json::json!(f.name));
        }
        flavor.insert("id".to_string(), serde_json::json!(request.flavor_ref));

        let server = Server {
            id: id.clone(),
            name: request.name.clone(),
            status: "ACTIVE".to_string(),
            availability_zone: request.availability_zone.clone(),
            addresses: self.addresses_for_ports(&request.port_ids),
            metadata: request.metadata.clone(),
            tags: request.tags.clone(),
            flavor: Some(serde_json::Value::Object(flavor)),
        };
        lock(&self.servers).insert(id, server.clone());
        Ok(server)
    }

    async fn delete_server(&self, id: &str) -> Result<(), OpenStackError> {
        self.record("delete_server", id)?;
        match lock(&self.servers).remove(id) {
            Some(_) => {
                for port in lock(&self.ports).values_mut().filter(|p| p.device_id == id) {
                    port.device_id.clear();
                }
                Ok(())
            }
            None => Err(OpenStackError::NotFound(format!("server {} not found", id))),
        }
    }

    async fn list_interfaces(&self, server_id: &str) -> Result<Vec<InterfaceAttachment>, OpenStackError> {
        self.record("list_interfaces", server_id)?;
        Ok(lock(&self.ports)
            .values()
            .filter(|p| p.device_id == server_id)
            .map(|p| InterfaceAttachment {
                port_id: p.id.clone(),
                network_id: p.network_id.clone(),
                mac_addr: p.mac_address.clone(),
                port_state: "ACTIVE".to_string(),
            })
            .collect())
    }
}
