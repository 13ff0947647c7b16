//! Machine persistence
//!
//! Writes to Machines and MachineSets go through [`MachineStore`] so the
//! actuator can be driven against an in-memory store in tests. Every machine
//! patch is a JSON merge patch carrying the `metadata.resourceVersion` the
//! caller last saw; the API server rejects it with 409 when the object moved
//! on, which surfaces as [`ControllerError::Conflict`].

use crate::error::ControllerError;
use async_trait::async_trait;
use crds::{Machine, MachineSet, MachineStatus};
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use serde_json::{Value, json};
use tracing::debug;

/// Write access to Machines and MachineSets.
#[async_trait]
pub trait MachineStore: Send + Sync {
    /// Current state of a machine, `None` once it is gone.
    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Option<Machine>, ControllerError>;

    /// Merge `patch` into the machine's metadata/spec. Returns the stored object.
    async fn patch_machine(&self, machine: &Machine, patch: Value) -> Result<Machine, ControllerError>;

    /// Replace the machine's status. Returns the stored object.
    async fn patch_machine_status(
        &self,
        machine: &Machine,
        status: &MachineStatus,
    ) -> Result<Machine, ControllerError>;

    /// Merge `patch` into the machine set's metadata/spec.
    async fn patch_machine_set(&self, machine_set: &MachineSet, patch: Value) -> Result<MachineSet, ControllerError>;
}

/// Add `metadata.resourceVersion` to a merge patch so it only applies to
/// the version the caller read.
pub fn with_resource_version(mut patch: Value, resource_version: Option<&str>) -> Value {
    let Some(resource_version) = resource_version else {
        return patch;
    };
    if let Value::Object(root) = &mut patch {
        let metadata = root.entry("metadata").or_insert_with(|| json!({}));
        if let Value::Object(metadata) = metadata {
            metadata.insert("resourceVersion".to_string(), json!(resource_version));
        }
    }
    patch
}

fn object_key<K: ResourceExt>(object: &K) -> String {
    format!("{}/{}", object.namespace().unwrap_or_default(), object.name_any())
}

fn conflict_or<K: ResourceExt>(err: kube::Error, object: &K, kind: &str) -> ControllerError {
    match err {
        kube::Error::Api(ae) if ae.code == 409 => {
            ControllerError::Conflict(format!("{} {}", kind, object_key(object)))
        }
        other => ControllerError::Kube(other),
    }
}

/// [`MachineStore`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeMachineStore {
    client: Client,
}

impl KubeMachineStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn machines(&self, machine: &Machine) -> Api<Machine> {
        Api::namespaced(self.client.clone(), &machine.namespace().unwrap_or_default())
    }
}

#[async_trait]
impl MachineStore for KubeMachineStore {
    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Option<Machine>, ControllerError> {
        let api: Api<Machine> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn patch_machine(&self, machine: &Machine, patch: Value) -> Result<Machine, ControllerError> {
        let patch = with_resource_version(patch, machine.metadata.resource_version.as_deref());
        debug!("Patching Machine {}: {}", object_key(machine), patch);
        self.machines(machine)
            .patch(&machine.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| conflict_or(e, machine, "Machine"))
    }

    async fn patch_machine_status(
        &self,
        machine: &Machine,
        status: &MachineStatus,
    ) -> Result<Machine, ControllerError> {
        // Null out fields the new status no longer carries
        let mut status_value = serde_json::to_value(status)
            .map_err(|e| ControllerError::Translation(format!("failed to encode machine status: {}", e)))?;
        if let Value::Object(fields) = &mut status_value {
            for key in ["errorReason", "errorMessage", "phase", "addresses"] {
                fields.entry(key).or_insert(Value::Null);
            }
        }
        let patch = with_resource_version(
            json!({ "status": status_value }),
            machine.metadata.resource_version.as_deref(),
        );
        self.machines(machine)
            .patch_status(&machine.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| conflict_or(e, machine, "Machine"))
    }

    async fn patch_machine_set(&self, machine_set: &MachineSet, patch: Value) -> Result<MachineSet, ControllerError> {
        let api: Api<MachineSet> =
            Api::namespaced(self.client.clone(), &machine_set.namespace().unwrap_or_default());
        api.patch(&machine_set.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| conflict_or(e, machine_set, "MachineSet"))
    }
}
