//! Mock OpenStack client for unit testing
//!
//! An in-memory cloud implementing every service trait, so controller tests
//! can run without a real OpenStack deployment.
//!
//! The mock is organized into service modules:
//! - `compute.rs` - flavors, availability zones, server groups, servers
//! - `network.rs` - networks, subnets, security groups, ports, trunks, floating IPs
//! - `storage.rs` - images and volumes
//!
//! Every trait call is appended to a call log (`"<method>:<argument>"`) and
//! any method can be made to fail with [`MockOpenStackClient::fail`].

mod compute;
mod network;
mod storage;

use crate::error::OpenStackError;
use crate::models::*;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

/// Lock a mock store, recovering the data if a test panicked mid-update
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Mock OpenStack client for testing
///
/// Stores resources in memory and can be configured to return specific
/// responses for testing different scenarios.
#[derive(Debug, Clone, Default)]
pub struct MockOpenStackClient {
    pub(crate) flavors: Arc<Mutex<BTreeMap<String, Flavor>>>,
    pub(crate) availability_zones: Arc<Mutex<Vec<AvailabilityZone>>>,
    pub(crate) server_groups: Arc<Mutex<BTreeMap<String, ServerGroup>>>,
    pub(crate) servers: Arc<Mutex<BTreeMap<String, Server>>>,
    pub(crate) server_requests: Arc<Mutex<Vec<ServerCreateRequest>>>,
    pub(crate) images: Arc<Mutex<BTreeMap<String, Image>>>,
    pub(crate) networks: Arc<Mutex<BTreeMap<String, Network>>>,
    pub(crate) subnets: Arc<Mutex<BTreeMap<String, Subnet>>>,
    pub(crate) security_groups: Arc<Mutex<BTreeMap<String, SecurityGroup>>>,
    pub(crate) ports: Arc<Mutex<BTreeMap<String, Port>>>,
    pub(crate) port_requests: Arc<Mutex<Vec<PortCreateRequest>>>,
    pub(crate) trunks: Arc<Mutex<BTreeMap<String, Trunk>>>,
    pub(crate) trunk_support: Arc<Mutex<bool>>,
    pub(crate) floating_ips: Arc<Mutex<BTreeMap<String, FloatingIp>>>,
    pub(crate) volumes: Arc<Mutex<BTreeMap<String, Volume>>>,
    pub(crate) calls: Arc<Mutex<Vec<String>>>,
    pub(crate) failures: Arc<Mutex<HashMap<String, String>>>,
    // Counter for generating IDs
    pub(crate) next_id: Arc<Mutex<u64>>,
}

impl MockOpenStackClient {
    /// Create an empty mock cloud with trunk support enabled
    pub fn new() -> Self {
        let client = Self::default();
        *lock(&client.trunk_support) = true;
        client
    }

    /// Add a flavor (for test setup)
    pub fn add_flavor(&self, flavor: Flavor) {
        lock(&self.flavors).insert(flavor.id.clone(), flavor);
    }

    /// Add an availability zone (for test setup)
    pub fn add_availability_zone(&self, name: &str, available: bool) {
        lock(&self.availability_zones).push(AvailabilityZone {
            zone_name: name.to_string(),
            zone_state: ZoneState { available },
        });
    }

    /// Add a server group (for test setup)
    pub fn add_server_group(&self, group: ServerGroup) {
        lock(&self.server_groups).insert(group.id.clone(), group);
    }

    /// Add a server (for test setup)
    pub fn add_server(&self, server: Server) {
        lock(&self.servers).insert(server.id.clone(), server);
    }

    /// Add an image (for test setup)
    pub fn add_image(&self, image: Image) {
        lock(&self.images).insert(image.id.clone(), image);
    }

    /// Add a network (for test setup)
    pub fn add_network(&self, network: Network) {
        lock(&self.networks).insert(network.id.clone(), network);
    }

    /// Add a subnet (for test setup)
    pub fn add_subnet(&self, subnet: Subnet) {
        lock(&self.subnets).insert(subnet.id.clone(), subnet);
    }

    /// Add a security group (for test setup)
    pub fn add_security_group(&self, group: SecurityGroup) {
        lock(&self.security_groups).insert(group.id.clone(), group);
    }

    /// Add a port (for test setup)
    pub fn add_port(&self, port: Port) {
        lock(&self.ports).insert(port.id.clone(), port);
    }

    /// Add a floating IP (for test setup)
    pub fn add_floating_ip(&self, fip: FloatingIp) {
        lock(&self.floating_ips).insert(fip.id.clone(), fip);
    }

    /// Add a volume (for test setup)
    pub fn add_volume(&self, volume: Volume) {
        lock(&self.volumes).insert(volume.id.clone(), volume);
    }

    /// Toggle the `trunk` network extension
    pub fn set_trunk_support(&self, supported: bool) {
        *lock(&self.trunk_support) = supported;
    }

    /// Make every call to `method` fail with an API error carrying `message`
    pub fn fail(&self, method: &str, message: &str) {
        lock(&self.failures).insert(method.to_string(), message.to_string());
    }

    /// Stop failing calls to `method`
    pub fn clear_failure(&self, method: &str) {
        lock(&self.failures).remove(method);
    }

    /// Every call made so far, as `"<method>:<argument>"`
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    /// Number of calls made to `method`
    pub fn call_count(&self, method: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| call.split(':').next() == Some(method))
            .count()
    }

    /// Forget all recorded calls
    pub fn reset_calls(&self) {
        lock(&self.calls).clear();
    }

    /// Servers currently in the mock cloud
    pub fn servers(&self) -> Vec<Server> {
        lock(&self.servers).values().cloned().collect()
    }

    /// Server create requests received so far
    pub fn server_requests(&self) -> Vec<ServerCreateRequest> {
        lock(&self.server_requests).clone()
    }

    /// Ports currently in the mock cloud
    pub fn ports(&self) -> Vec<Port> {
        lock(&self.ports).values().cloned().collect()
    }

    /// Port create requests received so far
    pub fn port_requests(&self) -> Vec<PortCreateRequest> {
        lock(&self.port_requests).clone()
    }

    /// Server groups currently in the mock cloud
    pub fn server_groups(&self) -> Vec<ServerGroup> {
        lock(&self.server_groups).values().cloned().collect()
    }

    /// Trunks currently in the mock cloud
    pub fn trunks(&self) -> Vec<Trunk> {
        lock(&self.trunks).values().cloned().collect()
    }

    /// Volumes currently in the mock cloud
    pub fn volumes(&self) -> Vec<Volume> {
        lock(&self.volumes).values().cloned().collect()
    }

    /// Floating IPs currently in the mock cloud
    pub fn floating_ips(&self) -> Vec<FloatingIp> {
        lock(&self.floating_ips).values().cloned().collect()
    }

    /// Record a call and return the injected failure for `method`, if any
    pub(crate) fn record(&self, method: &str, argument: &str) -> Result<(), OpenStackError> {
        lock(&self.calls).push(format!("{}:{}", method, argument));
        match lock(&self.failures).get(method) {
            Some(message) => Err(OpenStackError::Api {
                status: 500,
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Generate the next ID for `kind`
    pub(crate) fn next_id(&self, kind: &str) -> String {
        let mut id = lock(&self.next_id);
        *id += 1;
        format!("{}-{}", kind, *id)
    }
}

/// True when `filter` is empty or equal to `value`
pub(crate) fn matches(filter: &str, value: &str) -> bool {
    filter.is_empty() || filter == value
}

/// True when every comma-separated tag in `filter` is present
pub(crate) fn has_tags(filter: &str, tags: &[String]) -> bool {
    filter.is_empty()
        || filter
            .split(',')
            .all(|wanted| tags.iter().any(|tag| tag == wanted))
}
