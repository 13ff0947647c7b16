//! Test utilities for unit testing the actuator and reconcilers
//!
//! In-memory stand-ins for everything outside the process: secrets, the
//! Machine API, cloud sessions, events and the cluster Infrastructure object.
//! The cloud itself is `MockOpenStackClient` from `openstack-client`.

use crate::actuator::Actuator;
use crate::error::ControllerError;
use crate::events::EventPublisher;
use crate::flavorcache::FlavorCache;
use crate::infrastructure::{ClusterInfrastructure, InfrastructureSource};
use crate::instance::Timeouts;
use crate::session::{CloudSession, CloudSessionProvider, SecretStore};
use crate::store::MachineStore;
use async_trait::async_trait;
use crds::*;
use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use kube::runtime::events::EventType;
use openstack_client::{Flavor, Image, MockOpenStackClient, Network};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Cluster ID label value carried by test machines
pub const TEST_CLUSTER_ID: &str = "ocp-test";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Helper to create a test Machine carrying `spec` as its provider spec
pub fn create_test_machine(name: &str, namespace: &str, spec: &OpenstackProviderSpec) -> Machine {
    Machine {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                MACHINE_CLUSTER_ID_LABEL.to_string(),
                TEST_CLUSTER_ID.to_string(),
            )])),
            resource_version: Some("1".to_string()),
            ..Default::default()
        },
        spec: MachineSpec {
            provider_id: None,
            provider_spec: ProviderSpec {
                value: serde_json::to_value(spec).ok(),
            },
        },
        status: None,
    }
}

/// Helper to create a test MachineSet whose template carries `spec`
pub fn create_test_machine_set(name: &str, namespace: &str, spec: &OpenstackProviderSpec) -> MachineSet {
    MachineSet {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            resource_version: Some("1".to_string()),
            ..Default::default()
        },
        spec: MachineSetSpec {
            replicas: Some(3),
            template: MachineTemplateSpec {
                spec: MachineSpec {
                    provider_id: None,
                    provider_spec: ProviderSpec {
                        value: serde_json::to_value(spec).ok(),
                    },
                },
            },
        },
        status: None,
    }
}

/// Provider spec that passes validation against [`mock_cloud`]
pub fn valid_provider_spec() -> OpenstackProviderSpec {
    OpenstackProviderSpec {
        flavor: "m1.large".to_string(),
        image: "rhcos".to_string(),
        networks: vec![NetworkParam {
            uuid: "net-1".to_string(),
            ..Default::default()
        }],
        ..Default::default()
    }
}

/// Mock cloud with one network, image and flavor
pub fn mock_cloud() -> MockOpenStackClient {
    let mock = MockOpenStackClient::new();
    mock.add_network(Network {
        id: "net-1".to_string(),
        name: "nodes".to_string(),
        ..Default::default()
    });
    mock.add_image(Image {
        id: "image-1".to_string(),
        name: "rhcos".to_string(),
        status: "active".to_string(),
    });
    mock.add_flavor(Flavor {
        id: "flavor-1".to_string(),
        name: "m1.large".to_string(),
        vcpus: 4,
        ram: 8192,
        disk: 40,
    });
    mock
}

/// Timeouts that never sleep
pub fn test_timeouts() -> Timeouts {
    Timeouts {
        volume_available: Duration::ZERO,
        port_delete: Duration::ZERO,
        server_delete: Duration::ZERO,
        poll_interval: Duration::ZERO,
    }
}

/// In-memory Secrets and ConfigMaps
#[derive(Debug, Default)]
pub struct FakeSecretStore {
    secrets: BTreeMap<(String, String), BTreeMap<String, Vec<u8>>>,
    config_maps: BTreeMap<(String, String), BTreeMap<String, String>>,
}

impl FakeSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, namespace: &str, name: &str, data: &[(&str, &str)]) -> Self {
        let data = data
            .iter()
            .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
            .collect();
        self.secrets.insert((namespace.to_string(), name.to_string()), data);
        self
    }

    pub fn with_config_map(mut self, namespace: &str, name: &str, data: &[(&str, &str)]) -> Self {
        let data = data.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        self.config_maps.insert((namespace.to_string(), name.to_string()), data);
        self
    }
}

#[async_trait]
impl SecretStore for FakeSecretStore {
    async fn secret_data(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, Vec<u8>>, ControllerError> {
        self.secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| ControllerError::InvalidConfig(format!("secrets \"{}\" not found in {}", name, namespace)))
    }

    async fn config_map_data(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, String>, ControllerError> {
        self.config_maps
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| {
                ControllerError::InvalidConfig(format!("configmaps \"{}\" not found in {}", name, namespace))
            })
    }
}

/// RFC 7386 JSON merge patch
fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = json!({});
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                merge_patch(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

fn next_resource_version(current: Option<&str>) -> String {
    let current = current.and_then(|v| v.parse::<u64>().ok()).unwrap_or(0);
    (current + 1).to_string()
}

fn key<K: ResourceExt>(object: &K) -> String {
    format!("{}/{}", object.namespace().unwrap_or_default(), object.name_any())
}

/// In-memory Machine API with resourceVersion checks
#[derive(Debug, Default)]
pub struct InMemoryMachineStore {
    machines: Mutex<BTreeMap<String, Machine>>,
    machine_sets: Mutex<BTreeMap<String, MachineSet>>,
    /// Number of upcoming machine patches to reject with a conflict
    conflicts: Mutex<usize>,
    patches: Mutex<Vec<Value>>,
}

impl InMemoryMachineStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_machine(&self, machine: &Machine) {
        lock(&self.machines).insert(key(machine), machine.clone());
    }

    pub fn add_machine_set(&self, machine_set: &MachineSet) {
        lock(&self.machine_sets).insert(key(machine_set), machine_set.clone());
    }

    pub fn machine(&self, namespace: &str, name: &str) -> Option<Machine> {
        lock(&self.machines).get(&format!("{}/{}", namespace, name)).cloned()
    }

    pub fn machine_set(&self, namespace: &str, name: &str) -> Option<MachineSet> {
        lock(&self.machine_sets).get(&format!("{}/{}", namespace, name)).cloned()
    }

    /// Reject the next `count` machine patches as concurrent modifications
    pub fn conflict_next(&self, count: usize) {
        *lock(&self.conflicts) = count;
    }

    /// Every metadata/spec patch received, in order
    pub fn patches(&self) -> Vec<Value> {
        lock(&self.patches).clone()
    }

    fn check_version(&self, machine: &Machine, stored: &Machine) -> Result<(), ControllerError> {
        let mut conflicts = lock(&self.conflicts);
        if *conflicts > 0 {
            *conflicts -= 1;
            return Err(ControllerError::Conflict(format!("Machine {}", key(machine))));
        }
        if machine.metadata.resource_version != stored.metadata.resource_version {
            return Err(ControllerError::Conflict(format!("Machine {}", key(machine))));
        }
        Ok(())
    }
}

#[async_trait]
impl MachineStore for InMemoryMachineStore {
    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Option<Machine>, ControllerError> {
        Ok(self.machine(namespace, name))
    }

    async fn patch_machine(&self, machine: &Machine, patch: Value) -> Result<Machine, ControllerError> {
        let stored = self.machine(
            &machine.namespace().unwrap_or_default(),
            &machine.name_any(),
        );
        let stored = stored.unwrap_or_else(|| machine.clone());
        self.check_version(machine, &stored)?;
        lock(&self.patches).push(patch.clone());

        let mut value = serde_json::to_value(&stored)
            .map_err(|e| ControllerError::InvalidConfig(e.to_string()))?;
        merge_patch(&mut value, &patch);
        let mut updated: Machine =
            serde_json::from_value(value).map_err(|e| ControllerError::InvalidConfig(e.to_string()))?;
        updated.metadata.resource_version =
            Some(next_resource_version(stored.metadata.resource_version.as_deref()));
        self.add_machine(&updated);
        Ok(updated)
    }

    async fn patch_machine_status(
        &self,
        machine: &Machine,
        status: &MachineStatus,
    ) -> Result<Machine, ControllerError> {
        let stored = self.machine(
            &machine.namespace().unwrap_or_default(),
            &machine.name_any(),
        );
        let mut updated = stored.unwrap_or_else(|| machine.clone());
        self.check_version(machine, &updated)?;
        updated.status = Some(status.clone());
        updated.metadata.resource_version =
            Some(next_resource_version(updated.metadata.resource_version.as_deref()));
        self.add_machine(&updated);
        Ok(updated)
    }

    async fn patch_machine_set(&self, machine_set: &MachineSet, patch: Value) -> Result<MachineSet, ControllerError> {
        let stored = self
            .machine_set(&machine_set.namespace().unwrap_or_default(), &machine_set.name_any())
            .unwrap_or_else(|| machine_set.clone());
        let mut value = serde_json::to_value(&stored)
            .map_err(|e| ControllerError::InvalidConfig(e.to_string()))?;
        merge_patch(&mut value, &patch);
        let updated: MachineSet =
            serde_json::from_value(value).map_err(|e| ControllerError::InvalidConfig(e.to_string()))?;
        self.add_machine_set(&updated);
        Ok(updated)
    }
}

/// Hands out one session over a shared mock cloud
pub struct StaticSessionProvider {
    session: CloudSession,
}

impl StaticSessionProvider {
    pub fn new(mock: Arc<MockOpenStackClient>) -> Self {
        Self {
            session: CloudSession::from_client(mock, "RegionOne"),
        }
    }
}

#[async_trait]
impl CloudSessionProvider for StaticSessionProvider {
    async fn session(
        &self,
        _machine_namespace: &str,
        _spec: &OpenstackProviderSpec,
    ) -> Result<CloudSession, ControllerError> {
        Ok(self.session.clone())
    }
}

/// An event captured by [`RecordingEventPublisher`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub object: String,
    pub warning: bool,
    pub reason: String,
    pub action: String,
    pub note: String,
}

/// Keeps every published event
#[derive(Debug, Default)]
pub struct RecordingEventPublisher {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        lock(&self.events).clone()
    }

    /// Events with the given reason
    pub fn with_reason(&self, reason: &str) -> Vec<RecordedEvent> {
        self.events().into_iter().filter(|e| e.reason == reason).collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        lock(&self.events).push(RecordedEvent {
            object: resource_ref.name.clone().unwrap_or_default(),
            warning: matches!(type_, EventType::Warning),
            reason: reason.to_string(),
            action: action.to_string(),
            note: note.unwrap_or_default(),
        });
    }
}

/// Fixed cluster Infrastructure context
#[derive(Debug, Default)]
pub struct FakeInfrastructure {
    pub infrastructure: ClusterInfrastructure,
}

#[async_trait]
impl InfrastructureSource for FakeInfrastructure {
    async fn cluster_infrastructure(&self) -> Result<ClusterInfrastructure, ControllerError> {
        Ok(self.infrastructure.clone())
    }
}

/// Actuator wired to a mock cloud and in-memory fakes
pub struct TestEnv {
    pub cloud: Arc<MockOpenStackClient>,
    pub store: Arc<InMemoryMachineStore>,
    pub events: Arc<RecordingEventPublisher>,
    pub flavors: Arc<FlavorCache>,
    pub actuator: Arc<Actuator>,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_secrets(FakeSecretStore::new())
    }

    pub fn with_secrets(secrets: FakeSecretStore) -> Self {
        let cloud = Arc::new(mock_cloud());
        let store = Arc::new(InMemoryMachineStore::new());
        let events = Arc::new(RecordingEventPublisher::new());
        let flavors = Arc::new(FlavorCache::new());
        let actuator = Arc::new(Actuator::new(
            store.clone(),
            Arc::new(StaticSessionProvider::new(cloud.clone())),
            Arc::new(FakeInfrastructure::default()),
            Arc::new(secrets),
            events.clone(),
            flavors.clone(),
            test_timeouts(),
        ));
        Self {
            cloud,
            store,
            events,
            flavors,
            actuator,
        }
    }

    /// Store `machine` and return it
    pub fn machine(&self, machine: Machine) -> Machine {
        self.store.add_machine(&machine);
        machine
    }
}
