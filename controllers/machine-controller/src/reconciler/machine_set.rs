//! MachineSet reconciliation
//!
//! Publishes the flavor's vCPU count and memory on each MachineSet so the
//! cluster autoscaler can size node groups without talking to the cloud.

use super::Reconciler;
use crate::error::ControllerError;
use crate::events::{actions, reasons};
use crate::flavorcache::REFRESH_FAILURE_AFTER;
use crds::{MachineSet, decode_provider_spec};
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, error, info};

/// vCPU count of the set's flavor
pub const VCPU_ANNOTATION: &str = "machine.openshift.io/vCPU";

/// Memory of the set's flavor in MiB
pub const MEMORY_MB_ANNOTATION: &str = "machine.openshift.io/memoryMb";

/// Retry delay after a failed flavor lookup: half the failure TTL
pub fn flavor_lookup_requeue() -> Duration {
    Duration::from_secs((REFRESH_FAILURE_AFTER.num_seconds() / 2).unsigned_abs())
}

impl Reconciler {
    /// Reconcile one MachineSet.
    pub async fn reconcile_machine_set(&self, machine_set: &MachineSet) -> Result<Action, ControllerError> {
        let name = machine_set.name_any();
        let namespace = machine_set.namespace().unwrap_or_default();
        info!("Reconciling MachineSet {}/{}", namespace, name);

        if machine_set.metadata.deletion_timestamp.is_some() {
            debug!("MachineSet {}/{} is being deleted, ignoring", namespace, name);
            return Ok(Action::await_change());
        }

        let resource_key = format!("MachineSet/{}/{}", namespace, name);
        match self.annotate_machine_set(machine_set).await {
            Ok(action) => {
                self.reset_error(&resource_key);
                Ok(action)
            }
            Err(err) => {
                error!("Failed to reconcile MachineSet {}/{}: {}", namespace, name, err);
                self.publish_machine_set_error(machine_set, err.to_string()).await;
                self.increment_error(&resource_key);
                Err(err)
            }
        }
    }

    async fn annotate_machine_set(&self, machine_set: &MachineSet) -> Result<Action, ControllerError> {
        let name = machine_set.name_any();
        let namespace = machine_set.namespace().unwrap_or_default();

        let spec = decode_provider_spec(machine_set.spec.template.spec.provider_spec.value.as_ref()).map_err(|e| {
            ControllerError::InvalidConfiguration(format!(
                "failed to get OpenStackProviderSpec from machineset: {}",
                e
            ))
        })?;
        if spec.flavor.is_empty() {
            return Err(ControllerError::InvalidConfiguration(format!(
                "flavor name is empty for machineset {:?} in namespace {:?}",
                name, namespace
            )));
        }

        let session = self.sessions.session(&namespace, &spec).await?;
        let flavor = match self.flavors.get(session.compute.as_ref(), &spec.flavor).await {
            Ok(flavor) => flavor,
            Err(e) => {
                let message = format!("failed to find information for {:?}: {}", spec.flavor, e);
                error!("MachineSet {}/{}: {}", namespace, name, message);
                self.publish_machine_set_error(machine_set, message).await;
                return Ok(Action::requeue(flavor_lookup_requeue()));
            }
        };

        let vcpus = flavor.vcpus.to_string();
        let memory = flavor.ram.to_string();
        let annotations = machine_set.annotations();
        if annotations.get(VCPU_ANNOTATION) == Some(&vcpus) && annotations.get(MEMORY_MB_ANNOTATION) == Some(&memory) {
            debug!("MachineSet {}/{} annotations are up to date", namespace, name);
            return Ok(Action::await_change());
        }

        self.store
            .patch_machine_set(
                machine_set,
                json!({
                    "metadata": {
                        "annotations": {
                            VCPU_ANNOTATION: vcpus,
                            MEMORY_MB_ANNOTATION: memory,
                        }
                    }
                }),
            )
            .await?;
        info!(
            "Annotated MachineSet {}/{} with flavor {} ({} vCPU, {} MiB)",
            namespace, name, spec.flavor, flavor.vcpus, flavor.ram
        );
        Ok(Action::await_change())
    }

    async fn publish_machine_set_error(&self, machine_set: &MachineSet, message: String) {
        self.events
            .publish(
                &machine_set.object_ref(&()),
                EventType::Warning,
                reasons::RECONCILE_ERROR,
                actions::RECONCILE,
                Some(message),
            )
            .await;
    }
}
