//! Machine reconciliation
//!
//! Wraps the actuator with the Machine lifecycle: the finalizer, the phase
//! and error fields in status, and the choice between create, update and
//! delete.

use super::Reconciler;
use crate::error::ControllerError;
use crate::events::{actions, reasons};
use crds::{MACHINE_FINALIZER, Machine, MachineErrorReason, MachinePhase, MachineStatus};
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use serde_json::json;
use tracing::{debug, error, info, warn};

/// Message recorded when a machine's provider ID points at nothing
pub const INSTANCE_MISSING_MESSAGE: &str = "Can't find created instance.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    fn error_reason(self) -> MachineErrorReason {
        match self {
            Operation::Create => MachineErrorReason::CreateError,
            Operation::Update => MachineErrorReason::UpdateError,
            Operation::Delete => MachineErrorReason::DeleteError,
        }
    }

    fn event_reason(self) -> &'static str {
        match self {
            Operation::Create => reasons::FAILED_CREATE,
            Operation::Update => reasons::FAILED_UPDATE,
            Operation::Delete => reasons::FAILED_DELETE,
        }
    }

    fn action(self) -> &'static str {
        match self {
            Operation::Create => actions::CREATE,
            Operation::Update => actions::UPDATE,
            Operation::Delete => actions::DELETE,
        }
    }
}

fn machine_key(machine: &Machine) -> String {
    format!("{}/{}", machine.namespace().unwrap_or_default(), machine.name_any())
}

fn phase(machine: &Machine) -> Option<MachinePhase> {
    machine.status.as_ref().and_then(|s| s.phase)
}

impl Reconciler {
    /// Reconcile one Machine.
    pub async fn reconcile_machine(&self, machine: &Machine) -> Result<Action, ControllerError> {
        let key = machine_key(machine);
        let resource_key = format!("Machine/{}", key);
        info!("Reconciling Machine {}", key);

        if machine.metadata.deletion_timestamp.is_some() {
            return self.reconcile_machine_deletion(machine, &resource_key).await;
        }

        let machine = self.ensure_finalizer(machine).await?;

        if phase(&machine) == Some(MachinePhase::Failed) {
            debug!("Machine {} is in phase Failed, skipping reconciliation", key);
            return Ok(Action::await_change());
        }

        let has_provider_id = machine.spec.provider_id.is_some();
        let exists = match self.actuator.exists(&machine).await {
            Ok(exists) => exists,
            Err(err) => {
                let operation = if has_provider_id { Operation::Update } else { Operation::Create };
                return self.handle_machine_error(&machine, operation, err, &resource_key).await;
            }
        };

        let (operation, result) = if exists {
            (Operation::Update, self.actuator.update(&machine).await)
        } else if has_provider_id {
            warn!("Machine {} has a provider ID but its instance is gone", key);
            self.write_status(&machine, |status| {
                status.phase = Some(MachinePhase::Failed);
                status.error_message = Some(INSTANCE_MISSING_MESSAGE.to_string());
            })
            .await?;
            return Ok(Action::await_change());
        } else {
            let machine = self
                .write_status(&machine, |status| status.phase = Some(MachinePhase::Provisioning))
                .await?;
            (Operation::Create, self.actuator.create(&machine).await)
        };

        match result {
            Ok(updated) => {
                self.write_status(&updated, |status| {
                    status.phase = Some(MachinePhase::Provisioned);
                    status.error_reason = None;
                    status.error_message = None;
                })
                .await?;
                self.reset_error(&resource_key);
                Ok(Action::await_change())
            }
            Err(err) => self.handle_machine_error(&machine, operation, err, &resource_key).await,
        }
    }

    async fn reconcile_machine_deletion(
        &self,
        machine: &Machine,
        resource_key: &str,
    ) -> Result<Action, ControllerError> {
        let key = machine_key(machine);
        if !machine.finalizers().iter().any(|f| f == MACHINE_FINALIZER) {
            debug!("Machine {} is being deleted and carries no finalizer", key);
            return Ok(Action::await_change());
        }

        info!("Deleting Machine {}", key);
        let machine = self
            .write_status(machine, |status| status.phase = Some(MachinePhase::Deleting))
            .await?;

        if let Err(err) = self.actuator.delete(&machine).await {
            return self
                .handle_machine_error(&machine, Operation::Delete, err, resource_key)
                .await;
        }

        let finalizers: Vec<String> = machine
            .finalizers()
            .iter()
            .filter(|f| f.as_str() != MACHINE_FINALIZER)
            .cloned()
            .collect();
        self.store
            .patch_machine(&machine, json!({ "metadata": { "finalizers": finalizers } }))
            .await?;
        info!("Removed finalizer from Machine {}", key);
        self.reset_error(resource_key);
        Ok(Action::await_change())
    }

    async fn ensure_finalizer(&self, machine: &Machine) -> Result<Machine, ControllerError> {
        if machine.finalizers().iter().any(|f| f == MACHINE_FINALIZER) {
            return Ok(machine.clone());
        }
        let mut finalizers = machine.finalizers().to_vec();
        finalizers.push(MACHINE_FINALIZER.to_string());
        debug!("Adding finalizer to Machine {}", machine_key(machine));
        self.store
            .patch_machine(machine, json!({ "metadata": { "finalizers": finalizers } }))
            .await
    }

    /// Apply `mutate` to the machine's status and write it when it changed.
    async fn write_status<F>(&self, machine: &Machine, mutate: F) -> Result<Machine, ControllerError>
    where
        F: FnOnce(&mut MachineStatus),
    {
        let current = machine.status.clone().unwrap_or_default();
        let mut status = current.clone();
        mutate(&mut status);
        if machine.status.is_some() && status == current {
            return Ok(machine.clone());
        }
        status.last_updated = Some(chrono::Utc::now());
        self.store.patch_machine_status(machine, &status).await
    }

    async fn handle_machine_error(
        &self,
        machine: &Machine,
        operation: Operation,
        err: ControllerError,
        resource_key: &str,
    ) -> Result<Action, ControllerError> {
        let key = machine_key(machine);

        if let Some(delay) = err.requeue_after() {
            debug!("Requeueing Machine {} in {:?}", key, delay);
            return Ok(Action::requeue(delay));
        }
        if matches!(err, ControllerError::Conflict(_)) {
            info!("Machine {} changed during reconciliation: {}", key, err);
            return Err(err);
        }

        let message = err.to_string();
        error!("Failed to {:?} Machine {}: {}", operation, key, message);
        self.events
            .publish(
                &machine.object_ref(&()),
                EventType::Warning,
                operation.event_reason(),
                operation.action(),
                Some(message.clone()),
            )
            .await;

        if err.is_permanent() {
            self.record_error(machine, MachineErrorReason::InvalidConfiguration, message, true)
                .await;
            return Ok(Action::await_change());
        }

        self.record_error(machine, operation.error_reason(), message, false)
            .await;
        self.increment_error(resource_key);
        Err(err)
    }

    /// Best-effort write of the error fields, against the latest version of
    /// the machine.
    async fn record_error(&self, machine: &Machine, reason: MachineErrorReason, message: String, failed: bool) {
        let key = machine_key(machine);
        let latest = match self
            .store
            .get_machine(&machine.namespace().unwrap_or_default(), &machine.name_any())
            .await
        {
            Ok(Some(latest)) => latest,
            Ok(None) => {
                debug!("Machine {} is gone, not recording error", key);
                return;
            }
            Err(e) => {
                warn!("Failed to read Machine {}: {}", key, e);
                machine.clone()
            }
        };

        let result = self
            .write_status(&latest, |status| {
                status.error_reason = Some(reason);
                status.error_message = Some(message);
                if failed {
                    status.phase = Some(MachinePhase::Failed);
                }
            })
            .await;
        if let Err(e) = result {
            warn!("Failed to update status of Machine {}: {}", key, e);
        }
    }
}
