//! Service traits for mocking
//!
//! One trait per OpenStack service. The concrete [`crate::OpenStackClient`]
//! implements all four, and tests substitute [`crate::mock`] implementations.
//! All async methods must be `Send` to work with Tokio's work-stealing runtime.

use crate::error::OpenStackError;
use crate::models::*;

/// Nova operations
#[async_trait::async_trait]
pub trait ComputeService: Send + Sync {
    /// Resolve a flavor name to its ID
    async fn get_flavor_id(&self, name: &str) -> Result<String, OpenStackError>;

    /// Fetch flavor details by ID
    async fn get_flavor(&self, id: &str) -> Result<Flavor, OpenStackError>;

    async fn list_availability_zones(&self) -> Result<Vec<AvailabilityZone>, OpenStackError>;

    async fn list_server_groups(&self) -> Result<Vec<ServerGroup>, OpenStackError>;
    async fn get_server_group(&self, id: &str) -> Result<ServerGroup, OpenStackError>;
    async fn create_server_group(&self, name: &str, policy: &str) -> Result<ServerGroup, OpenStackError>;

    /// Fetch a server by ID; `None` when it does not exist
    async fn get_server(&self, id: &str) -> Result<Option<Server>, OpenStackError>;

    /// List servers whose name matches exactly
    async fn list_servers_by_name(&self, name: &str) -> Result<Vec<Server>, OpenStackError>;

    async fn create_server(&self, request: &ServerCreateRequest) -> Result<Server, OpenStackError>;
    async fn delete_server(&self, id: &str) -> Result<(), OpenStackError>;

    /// Ports attached to a server
    async fn list_interfaces(&self, server_id: &str) -> Result<Vec<InterfaceAttachment>, OpenStackError>;
}

/// Glance operations
#[async_trait::async_trait]
pub trait ImageService: Send + Sync {
    /// Resolve an image name to its ID; exactly one image must match
    async fn get_image_id(&self, name: &str) -> Result<String, OpenStackError>;
}

/// Neutron operations
#[async_trait::async_trait]
pub trait NetworkService: Send + Sync {
    async fn list_networks(&self, opts: &NetworkListOpts) -> Result<Vec<Network>, OpenStackError>;
    async fn list_subnets(&self, opts: &SubnetListOpts) -> Result<Vec<Subnet>, OpenStackError>;
    async fn list_security_groups(&self, opts: &SecurityGroupListOpts) -> Result<Vec<SecurityGroup>, OpenStackError>;

    async fn list_ports(&self, opts: &PortListOpts) -> Result<Vec<Port>, OpenStackError>;
    async fn create_port(&self, request: &PortCreateRequest) -> Result<Port, OpenStackError>;
    async fn delete_port(&self, id: &str) -> Result<(), OpenStackError>;

    /// Replace all tags on a resource (`ports`, `trunks`, ...)
    async fn replace_tags(&self, resource: &str, id: &str, tags: &[String]) -> Result<(), OpenStackError>;

    /// Whether the cloud advertises the `trunk` extension
    async fn trunk_supported(&self) -> Result<bool, OpenStackError>;
    /// Trunks whose parent is `port_id`
    async fn list_trunks(&self, port_id: &str) -> Result<Vec<Trunk>, OpenStackError>;
    async fn create_trunk(&self, name: &str, port_id: &str) -> Result<Trunk, OpenStackError>;
    async fn delete_trunk(&self, id: &str) -> Result<(), OpenStackError>;

    /// Floating IPs with the given address
    async fn list_floating_ips(&self, address: &str) -> Result<Vec<FloatingIp>, OpenStackError>;
    async fn create_floating_ip(&self, network_id: &str, address: &str) -> Result<FloatingIp, OpenStackError>;
    async fn associate_floating_ip(&self, floating_ip_id: &str, port_id: &str) -> Result<FloatingIp, OpenStackError>;
}

/// Cinder operations
#[async_trait::async_trait]
pub trait VolumeService: Send + Sync {
    async fn create_volume(&self, request: &VolumeCreateRequest) -> Result<Volume, OpenStackError>;
    async fn get_volume(&self, id: &str) -> Result<Volume, OpenStackError>;
    async fn delete_volume(&self, id: &str) -> Result<(), OpenStackError>;
    async fn list_volumes_by_name(&self, name: &str) -> Result<Vec<Volume>, OpenStackError>;
}
