//! OpenStack API client
//!
//! Authenticates against Keystone once and talks to Nova, Neutron, Glance and
//! Cinder through endpoints taken from the service catalog.

use crate::auth::{self, AuthSession};
use crate::clouds::Cloud;
use crate::common::HttpClient;
use crate::error::OpenStackError;
use crate::models::*;
use crate::openstack_trait::{ComputeService, ImageService, NetworkService, VolumeService};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// Compute microversion used by default (server tags need 2.52+)
pub const COMPUTE_MICROVERSION: &str = "2.53";

/// First compute microversion accepting soft-anti-affinity groups
const SERVER_GROUP_MICROVERSION: &str = "2.15";

/// OpenStack API client
#[derive(Debug, Clone)]
pub struct OpenStackClient {
    compute: HttpClient,
    network: HttpClient,
    image: HttpClient,
    volume: HttpClient,
    region: String,
}

impl OpenStackClient {
    /// Authenticate with the given cloud entry and build service clients
    ///
    /// # Arguments
    /// * `cloud` - Cloud entry from `clouds.yaml`
    /// * `ca_cert` - Optional PEM bundle trusted in addition to the webpki roots
    pub async fn connect(cloud: &Cloud, ca_cert: Option<&[u8]>) -> Result<Self, OpenStackError> {
        let mut builder = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("openstack-machine-controller/", env!("CARGO_PKG_VERSION")));

        if let Some(pem) = ca_cert.filter(|pem| !pem.is_empty()) {
            let certs = reqwest::Certificate::from_pem_bundle(pem)
                .map_err(|e| OpenStackError::Config(format!("invalid CA bundle: {}", e)))?;
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }
        if cloud.verify == Some(false) {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder.build().map_err(OpenStackError::Http)?;

        let session = auth::authenticate(&client, cloud).await?;
        Self::from_session(client, &session, &cloud.region_name, cloud.interface())
    }

    /// Build service clients from an existing token and catalog
    pub fn from_session(
        client: Client,
        session: &AuthSession,
        region: &str,
        interface: &str,
    ) -> Result<Self, OpenStackError> {
        let endpoint = |service: &str| session.endpoint(service, region, interface);
        let service = |url: String| HttpClient::new(client.clone(), url, session.token.clone());

        let network_url = endpoint("network")?;
        let network_url = if network_url.ends_with("/v2.0") {
            network_url
        } else {
            format!("{}/v2.0", network_url)
        };

        Ok(Self {
            compute: service(endpoint("compute")?).with_microversion("compute", COMPUTE_MICROVERSION),
            network: service(network_url),
            image: service(endpoint("image")?),
            volume: service(endpoint("volumev3").or_else(|_| endpoint("block-storage"))?),
            region: region.to_string(),
        })
    }

    /// Region the service endpoints were selected for
    pub fn region(&self) -> &str {
        &self.region
    }
}

// Response envelopes

#[derive(Deserialize)]
struct FlavorsEnvelope {
    flavors: Vec<Flavor>,
}

#[derive(Deserialize)]
struct FlavorEnvelope {
    flavor: Flavor,
}

#[derive(Deserialize)]
struct AvailabilityZonesEnvelope {
    #[serde(rename = "availabilityZoneInfo")]
    zones: Vec<AvailabilityZone>,
}

#[derive(Deserialize)]
struct ServerGroupsEnvelope {
    server_groups: Vec<ServerGroup>,
}

#[derive(Deserialize)]
struct ServerGroupEnvelope {
    server_group: ServerGroup,
}

#[derive(Deserialize)]
struct ServersEnvelope {
    servers: Vec<Server>,
}

#[derive(Deserialize)]
struct ServerEnvelope {
    server: Server,
}

#[derive(Deserialize)]
struct CreatedServer {
    id: String,
}

#[derive(Deserialize)]
struct CreatedServerEnvelope {
    server: CreatedServer,
}

#[derive(Deserialize)]
struct InterfacesEnvelope {
    #[serde(rename = "interfaceAttachments")]
    interfaces: Vec<InterfaceAttachment>,
}

#[derive(Deserialize)]
struct ImagesEnvelope {
    images: Vec<Image>,
}

#[derive(Deserialize)]
struct NetworksEnvelope {
    networks: Vec<Network>,
}

#[derive(Deserialize)]
struct SubnetsEnvelope {
    subnets: Vec<Subnet>,
}

#[derive(Deserialize)]
struct SecurityGroupsEnvelope {
    security_groups: Vec<SecurityGroup>,
}

#[derive(Deserialize)]
struct PortsEnvelope {
    ports: Vec<Port>,
}

#[derive(Deserialize)]
struct PortEnvelope {
    port: Port,
}

#[derive(Deserialize)]
struct ExtensionsEnvelope {
    extensions: Vec<Extension>,
}

#[derive(Deserialize)]
struct TrunksEnvelope {
    trunks: Vec<Trunk>,
}

#[derive(Deserialize)]
struct TrunkEnvelope {
    trunk: Trunk,
}

#[derive(Deserialize)]
struct FloatingIpsEnvelope {
    floatingips: Vec<FloatingIp>,
}

#[derive(Deserialize)]
struct FloatingIpEnvelope {
    floatingip: FloatingIp,
}

#[derive(Deserialize)]
struct VolumesEnvelope {
    volumes: Vec<Volume>,
}

#[derive(Deserialize)]
struct VolumeEnvelope {
    volume: Volume,
}

/// Pick the single match out of a name lookup
fn exactly_one<T>(kind: &str, name: &str, mut matches: Vec<T>) -> Result<T, OpenStackError> {
    match matches.len() {
        0 => Err(OpenStackError::NotFound(format!("{} {:?} not found", kind, name))),
        1 => Ok(matches.remove(0)),
        n => Err(OpenStackError::InvalidRequest(format!(
            "found {} {}s with name {:?}",
            n, kind, name
        ))),
    }
}

#[async_trait::async_trait]
impl ComputeService for OpenStackClient {
    async fn get_flavor_id(&self, name: &str) -> Result<String, OpenStackError> {
        let response: FlavorsEnvelope = self.compute.get("/flavors/detail?is_public=None").await?;
        let matches = response
            .flavors
            .into_iter()
            .filter(|f| f.name == name)
            .collect::<Vec<_>>();
        exactly_one("flavor", name, matches).map(|f| f.id)
    }

    async fn get_flavor(&self, id: &str) -> Result<Flavor, OpenStackError> {
        let response: FlavorEnvelope = self
            .compute
            .get(&format!("/flavors/{}", urlencoding::encode(id)))
            .await?;
        Ok(response.flavor)
    }

    async fn list_availability_zones(&self) -> Result<Vec<AvailabilityZone>, OpenStackError> {
        let response: AvailabilityZonesEnvelope = self.compute.get("/os-availability-zone").await?;
        Ok(response.zones)
    }

    async fn list_server_groups(&self) -> Result<Vec<ServerGroup>, OpenStackError> {
        let response: ServerGroupsEnvelope = self.compute.get("/os-server-groups").await?;
        Ok(response.server_groups)
    }

    async fn get_server_group(&self, id: &str) -> Result<ServerGroup, OpenStackError> {
        let response: ServerGroupEnvelope = self
            .compute
            .get(&format!("/os-server-groups/{}", urlencoding::encode(id)))
            .await?;
        Ok(response.server_group)
    }

    async fn create_server_group(&self, name: &str, policy: &str) -> Result<ServerGroup, OpenStackError> {
        let body = json!({ "server_group": { "name": name, "policies": [policy] } });
        let response: ServerGroupEnvelope = self
            .compute
            .post_with_microversion("/os-server-groups", &body, Some(SERVER_GROUP_MICROVERSION))
            .await?;
        debug!("Created server group {} ({})", name, response.server_group.id);
        Ok(response.server_group)
    }

    async fn get_server(&self, id: &str) -> Result<Option<Server>, OpenStackError> {
        match self
            .compute
            .get::<ServerEnvelope>(&format!("/servers/{}", urlencoding::encode(id)))
            .await
        {
            Ok(response) => Ok(Some(response.server)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list_servers_by_name(&self, name: &str) -> Result<Vec<Server>, OpenStackError> {
        // Nova matches names as regular expressions
        let pattern = format!("^{}$", name);
        let response: ServersEnvelope = self
            .compute
            .get(&format!("/servers/detail?name={}", urlencoding::encode(&pattern)))
            .await?;
        Ok(response.servers)
    }

    async fn create_server(&self, request: &ServerCreateRequest) -> Result<Server, OpenStackError> {
        let created: CreatedServerEnvelope = self.compute.post("/servers", &request.to_body()?).await?;
        debug!("Created server {} ({})", request.name, created.server.id);
        match self.get_server(&created.server.id).await? {
            Some(server) => Ok(server),
            None => Ok(Server {
                id: created.server.id,
                name: request.name.clone(),
                status: "BUILD".to_string(),
                ..Default::default()
            }),
        }
    }

    async fn delete_server(&self, id: &str) -> Result<(), OpenStackError> {
        self.compute
            .delete(&format!("/servers/{}", urlencoding::encode(id)))
            .await
    }

    async fn list_interfaces(&self, server_id: &str) -> Result<Vec<InterfaceAttachment>, OpenStackError> {
        let response: InterfacesEnvelope = self
            .compute
            .get(&format!("/servers/{}/os-interface", urlencoding::encode(server_id)))
            .await?;
        Ok(response.interfaces)
    }
}

#[async_trait::async_trait]
impl ImageService for OpenStackClient {
    async fn get_image_id(&self, name: &str) -> Result<String, OpenStackError> {
        let response: ImagesEnvelope = self
            .image
            .get(&format!("/v2/images?name={}", urlencoding::encode(name)))
            .await?;
        exactly_one("image", name, response.images).map(|i| i.id)
    }
}

#[async_trait::async_trait]
impl NetworkService for OpenStackClient {
    async fn list_networks(&self, opts: &NetworkListOpts) -> Result<Vec<Network>, OpenStackError> {
        let response: NetworksEnvelope = self
            .network
            .get(&format!("/networks{}", opts.to_query()))
            .await?;
        Ok(response.networks)
    }

    async fn list_subnets(&self, opts: &SubnetListOpts) -> Result<Vec<Subnet>, OpenStackError> {
        let response: SubnetsEnvelope = self
            .network
            .get(&format!("/subnets{}", opts.to_query()))
            .await?;
        Ok(response.subnets)
    }

    async fn list_security_groups(&self, opts: &SecurityGroupListOpts) -> Result<Vec<SecurityGroup>, OpenStackError> {
        let response: SecurityGroupsEnvelope = self
            .network
            .get(&format!("/security-groups{}", opts.to_query()))
            .await?;
        Ok(response.security_groups)
    }

    async fn list_ports(&self, opts: &PortListOpts) -> Result<Vec<Port>, OpenStackError> {
        let response: PortsEnvelope = self
            .network
            .get(&format!("/ports{}", opts.to_query()))
            .await?;
        Ok(response.ports)
    }

    async fn create_port(&self, request: &PortCreateRequest) -> Result<Port, OpenStackError> {
        let body = json!({ "port": request });
        let response: PortEnvelope = self.network.post("/ports", &body).await?;
        debug!("Created port {} ({})", request.name, response.port.id);
        Ok(response.port)
    }

    async fn delete_port(&self, id: &str) -> Result<(), OpenStackError> {
        self.network
            .delete(&format!("/ports/{}", urlencoding::encode(id)))
            .await
    }

    async fn replace_tags(&self, resource: &str, id: &str, tags: &[String]) -> Result<(), OpenStackError> {
        let body = json!({ "tags": tags });
        let _: serde_json::Value = self
            .network
            .put(&format!("/{}/{}/tags", resource, urlencoding::encode(id)), &body)
            .await?;
        Ok(())
    }

    async fn trunk_supported(&self) -> Result<bool, OpenStackError> {
        let response: ExtensionsEnvelope = self.network.get("/extensions").await?;
        Ok(response.extensions.iter().any(|ext| ext.alias == "trunk"))
    }

    async fn list_trunks(&self, port_id: &str) -> Result<Vec<Trunk>, OpenStackError> {
        let response: TrunksEnvelope = self
            .network
            .get(&format!("/trunks?port_id={}", urlencoding::encode(port_id)))
            .await?;
        Ok(response.trunks)
    }

    async fn create_trunk(&self, name: &str, port_id: &str) -> Result<Trunk, OpenStackError> {
        let body = json!({ "trunk": { "name": name, "port_id": port_id } });
        let response: TrunkEnvelope = self.network.post("/trunks", &body).await?;
        debug!("Created trunk {} ({})", name, response.trunk.id);
        Ok(response.trunk)
    }

    async fn delete_trunk(&self, id: &str) -> Result<(), OpenStackError> {
        self.network
            .delete(&format!("/trunks/{}", urlencoding::encode(id)))
            .await
    }

    async fn list_floating_ips(&self, address: &str) -> Result<Vec<FloatingIp>, OpenStackError> {
        let response: FloatingIpsEnvelope = self
            .network
            .get(&format!(
                "/floatingips?floating_ip_address={}",
                urlencoding::encode(address)
            ))
            .await?;
        Ok(response.floatingips)
    }

    async fn create_floating_ip(&self, network_id: &str, address: &str) -> Result<FloatingIp, OpenStackError> {
        let body = json!({
            "floatingip": {
                "floating_network_id": network_id,
                "floating_ip_address": address,
            }
        });
        let response: FloatingIpEnvelope = self.network.post("/floatingips", &body).await?;
        Ok(response.floatingip)
    }

    async fn associate_floating_ip(&self, floating_ip_id: &str, port_id: &str) -> Result<FloatingIp, OpenStackError> {
        let body = json!({ "floatingip": { "port_id": port_id } });
        let response: FloatingIpEnvelope = self
            .network
            .put(&format!("/floatingips/{}", urlencoding::encode(floating_ip_id)), &body)
            .await?;
        Ok(response.floatingip)
    }
}

#[async_trait::async_trait]
impl VolumeService for OpenStackClient {
    async fn create_volume(&self, request: &VolumeCreateRequest) -> Result<Volume, OpenStackError> {
        let body = json!({ "volume": request });
        let response: VolumeEnvelope = self.volume.post("/volumes", &body).await?;
        debug!("Created volume {} ({})", request.name, response.volume.id);
        Ok(response.volume)
    }

    async fn get_volume(&self, id: &str) -> Result<Volume, OpenStackError> {
        let response: VolumeEnvelope = self
            .volume
            .get(&format!("/volumes/{}", urlencoding::encode(id)))
            .await?;
        Ok(response.volume)
    }

    async fn delete_volume(&self, id: &str) -> Result<(), OpenStackError> {
        self.volume
            .delete(&format!("/volumes/{}", urlencoding::encode(id)))
            .await
    }

    async fn list_volumes_by_name(&self, name: &str) -> Result<Vec<Volume>, OpenStackError> {
        let response: VolumesEnvelope = self
            .volume
            .get(&format!("/volumes/detail?name={}", urlencoding::encode(name)))
            .await?;
        Ok(response.volumes)
    }
}
