//! Machine actuator
//!
//! Drives one Machine towards its provider spec. Nothing about the instance
//! is remembered between passes: each call rederives where the machine
//! stands from the cloud (instance by provider ID or by name) and takes the
//! next step from there.
//!
//! `create` and `update` run the same reconcile pass:
//! 1. decode the provider spec and open a cloud session
//! 2. find the instance; create it when there is none and no provider ID
//! 3. record the provider ID
//! 4. attach the floating IP, if any
//! 5. write labels, annotations and status addresses

use crate::convert::{TranslationContext, machine_to_instance_spec, minimal_instance_spec};
use crate::error::ControllerError;
use crate::events::{EventPublisher, actions, reasons};
use crate::flavorcache::FlavorCache;
use crate::infrastructure::InfrastructureSource;
use crate::instance::{InstanceService, InstanceStatus, PROVIDER_PREFIX, Timeouts, primary_port_name};
use crate::session::{CloudSessionProvider, SecretStore};
use crate::store::MachineStore;
use crate::userdata::get_user_data;
use crate::validation::validate_machine;
use crds::{
    MACHINE_AZ_LABEL, MACHINE_INSTANCE_STATE_ANNOTATION, MACHINE_INSTANCE_TYPE_LABEL,
    MACHINE_REGION_LABEL, Machine, MachineAddress, MachineAddressType, OpenstackProviderSpec,
    decode_provider_spec,
};
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Annotation holding the instance ID
pub const RESOURCE_ID_ANNOTATION: &str = "openstack-resourceId";

/// Annotation written by older releases; removed when seen
pub const LEGACY_INSTANCE_STATUS_ANNOTATION: &str = "instance-status";

/// Delay before looking again for an instance that is not visible yet
pub const INSTANCE_NOT_FOUND_REQUEUE: Duration = Duration::from_secs(30);

/// Delay before checking that a floating IP association took effect
pub const FLOATING_IP_REQUEUE: Duration = Duration::from_secs(5);

/// Everything the actuator talks to
pub struct Actuator {
    store: Arc<dyn MachineStore>,
    sessions: Arc<dyn CloudSessionProvider>,
    infrastructure: Arc<dyn InfrastructureSource>,
    secrets: Arc<dyn SecretStore>,
    events: Arc<dyn EventPublisher>,
    flavors: Arc<FlavorCache>,
    timeouts: Timeouts,
}

impl Actuator {
    pub fn new(
        store: Arc<dyn MachineStore>,
        sessions: Arc<dyn CloudSessionProvider>,
        infrastructure: Arc<dyn InfrastructureSource>,
        secrets: Arc<dyn SecretStore>,
        events: Arc<dyn EventPublisher>,
        flavors: Arc<FlavorCache>,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            store,
            sessions,
            infrastructure,
            secrets,
            events,
            flavors,
            timeouts,
        }
    }

    /// True when the machine's instance exists in the cloud.
    pub async fn exists(&self, machine: &Machine) -> Result<bool, ControllerError> {
        let spec = decode_provider_spec(machine.spec.provider_spec.value.as_ref())?;
        let (service, _) = self.instance_service(machine, &spec).await?;
        Ok(instance_status(machine, &service).await?.is_some())
    }

    pub async fn create(&self, machine: &Machine) -> Result<Machine, ControllerError> {
        self.reconcile(machine).await
    }

    pub async fn update(&self, machine: &Machine) -> Result<Machine, ControllerError> {
        self.reconcile(machine).await
    }

    /// Delete the machine's instance and the ports and volumes made for it.
    pub async fn delete(&self, machine: &Machine) -> Result<(), ControllerError> {
        let name = machine.name_any();
        let spec = decode_provider_spec(machine.spec.provider_spec.value.as_ref())?;
        let (service, _) = self.instance_service(machine, &spec).await?;

        let status = instance_status(machine, &service).await.map_err(|e| {
            warn!("error getting instance status for {:?}: {}", name, e);
            e
        })?;

        let instance_spec = minimal_instance_spec(machine, &spec);
        service.delete_instance(status.as_ref(), &instance_spec).await?;

        self.publish(
            machine,
            EventType::Normal,
            reasons::DELETED,
            actions::DELETE,
            format!("Deleted machine {}", name),
        )
        .await;
        Ok(())
    }

    /// One pass of the create/update state machine.
    ///
    /// Returns the machine as last written. Not-ready conditions come back as
    /// [`ControllerError::RequeueAfter`].
    async fn reconcile(&self, machine: &Machine) -> Result<Machine, ControllerError> {
        let name = machine.name_any();
        let original_resource_version = machine.resource_version();

        let spec = decode_provider_spec(machine.spec.provider_spec.value.as_ref()).map_err(|e| {
            ControllerError::InvalidConfiguration(format!("Cannot unmarshal providerSpec for {}: {}", name, e))
        })?;
        let (service, region) = self.instance_service(machine, &spec).await?;

        let mut status = instance_status(machine, &service).await?;
        let mut created = None;
        if status.is_none() && !has_provider_id(machine) {
            let (instance, instance_spec) = self.create_instance(machine, &spec, &service).await?;
            status = Some(instance);
            created = Some(instance_spec);
        }

        let Some(status) = status else {
            info!("Instance for machine {} not found yet, requeueing", name);
            return Err(ControllerError::RequeueAfter(INSTANCE_NOT_FOUND_REQUEUE));
        };

        let mut machine = match self.set_provider_id(machine, &status).await {
            Ok(machine) => machine,
            Err(err) => {
                warn!("error setting provider ID for {:?}: {}", name, err);
                // Without a provider ID a later pass would not find this
                // instance reliably; remove it rather than leak it
                let Some(instance_spec) = created else {
                    return Err(err);
                };
                info!("Deleting instance {} created by this pass", status.id());
                return match service.delete_instance(Some(&status), &instance_spec).await {
                    Ok(()) => Err(err),
                    Err(cleanup) => Err(err.with_cleanup(cleanup)),
                };
            }
        };

        reconcile_floating_ip(&machine, &spec, &status, &service).await?;

        if let Some(patch) = metadata_patch(&machine, &region, &spec.flavor, &status) {
            machine = self.store.patch_machine(&machine, patch).await?;
        }

        let mut machine_status = machine.status.clone().unwrap_or_default();
        machine_status.addresses = machine_addresses(&machine, &status);
        if machine.status.as_ref() != Some(&machine_status) {
            machine = self.store.patch_machine_status(&machine, &machine_status).await?;
        }

        if machine.resource_version() != original_resource_version {
            self.publish(
                &machine,
                EventType::Normal,
                reasons::UPDATED,
                actions::UPDATE,
                format!("Updated machine {}", name),
            )
            .await;
        }
        Ok(machine)
    }

    async fn instance_service(
        &self,
        machine: &Machine,
        spec: &OpenstackProviderSpec,
    ) -> Result<(InstanceService, String), ControllerError> {
        let session = self
            .sessions
            .session(&machine.namespace().unwrap_or_default(), spec)
            .await?;
        let region = session.region.clone();
        Ok((InstanceService::new(session, self.timeouts), region))
    }

    async fn create_instance(
        &self,
        machine: &Machine,
        spec: &OpenstackProviderSpec,
        service: &InstanceService,
    ) -> Result<(InstanceStatus, crate::convert::InstanceSpec), ControllerError> {
        let name = machine.name_any();
        let session = service.session();

        validate_machine(spec, session, &self.flavors)
            .await
            .map_err(|e| ControllerError::InvalidConfiguration(format!("Machine validation failed: {}", e)))?;

        let infrastructure = self.infrastructure.cluster_infrastructure().await?;
        let user_data = get_user_data(self.secrets.as_ref(), machine, spec)
            .await
            .map_err(|e| ControllerError::UserData(format!("error getting bootstrap for {}: {}", name, e)))?;

        let instance_spec = machine_to_instance_spec(
            machine,
            spec,
            TranslationContext {
                infrastructure: &infrastructure,
                user_data: &user_data,
                compute: session.compute.as_ref(),
                network: session.network.as_ref(),
            },
        )
        .await?;

        let status = service
            .create_instance(&instance_spec)
            .await
            .map_err(|e| ControllerError::CreateMachine(format!("error creating Openstack instance: {}", e)))?;

        info!("Created instance {} for machine {}", status.id(), name);
        self.publish(
            machine,
            EventType::Normal,
            reasons::CREATED,
            actions::CREATE,
            format!("Created OpenStack instance {}", status.id()),
        )
        .await;
        Ok((status, instance_spec))
    }

    /// Record the instance's provider ID; never overwrites one already set.
    async fn set_provider_id(&self, machine: &Machine, status: &InstanceStatus) -> Result<Machine, ControllerError> {
        if has_provider_id(machine) {
            return Ok(machine.clone());
        }
        let provider_id = status.provider_id();
        debug!("Setting provider ID of machine {} to {}", machine.name_any(), provider_id);
        self.store
            .patch_machine(machine, json!({ "spec": { "providerID": provider_id } }))
            .await
    }

    pub(crate) async fn publish(
        &self,
        machine: &Machine,
        type_: EventType,
        reason: &str,
        action: &str,
        note: String,
    ) {
        self.events
            .publish(&machine.object_ref(&()), type_, reason, action, Some(note))
            .await;
    }
}

fn has_provider_id(machine: &Machine) -> bool {
    machine.spec.provider_id.is_some()
}

/// Instance named by the machine's provider ID, or by its name when the
/// provider ID is not set yet.
async fn instance_status(
    machine: &Machine,
    service: &InstanceService,
) -> Result<Option<InstanceStatus>, ControllerError> {
    let name = machine.name_any();
    match &machine.spec.provider_id {
        None => service.get_instance_status_by_name(&name).await,
        Some(provider_id) => {
            let id = provider_id.strip_prefix(PROVIDER_PREFIX).ok_or_else(|| {
                ControllerError::InvalidConfiguration(format!(
                    "OpenStack Machine {} has invalid provider ID: {}",
                    name, provider_id
                ))
            })?;
            service.get_instance_status(id).await
        }
    }
}

async fn reconcile_floating_ip(
    machine: &Machine,
    spec: &OpenstackProviderSpec,
    status: &InstanceStatus,
    service: &InstanceService,
) -> Result<(), ControllerError> {
    if spec.floating_ip.is_empty() {
        return Ok(());
    }
    let attached = status
        .addresses()
        .iter()
        .any(|a| a.address_type == MachineAddressType::ExternalIp && a.address == spec.floating_ip);
    if attached {
        return Ok(());
    }

    let floating_ip = service.get_or_create_floating_ip(&spec.floating_ip).await?;
    let primary_port = primary_port_name(&minimal_instance_spec(machine, spec));
    let port_id = service.management_port(status, primary_port.as_deref()).await?;
    service.associate_floating_ip(&floating_ip.id, &port_id).await?;

    Err(ControllerError::RequeueAfter(FLOATING_IP_REQUEUE))
}

/// Merge patch for labels and annotations, or `None` when nothing changes.
fn metadata_patch(machine: &Machine, region: &str, flavor: &str, status: &InstanceStatus) -> Option<Value> {
    let labels = machine.labels();
    let annotations = machine.annotations();
    let mut label_patch = Map::new();
    let mut annotation_patch = Map::new();

    let label_keys = [MACHINE_REGION_LABEL, MACHINE_AZ_LABEL, MACHINE_INSTANCE_TYPE_LABEL];
    let all_labelled = label_keys
        .iter()
        .all(|key| labels.get(*key).is_some_and(|value| !value.is_empty()));
    if !all_labelled {
        for (key, value) in label_keys.into_iter().zip([region, status.availability_zone(), flavor]) {
            if labels.get(key).map(String::as_str) != Some(value) {
                label_patch.insert(key.to_string(), json!(value));
            }
        }
    }

    if annotations.contains_key(LEGACY_INSTANCE_STATUS_ANNOTATION) {
        info!("Machine {}: Removed legacy instance-status annotation", machine.name_any());
        annotation_patch.insert(LEGACY_INSTANCE_STATUS_ANNOTATION.to_string(), Value::Null);
    }
    for (key, value) in [
        (RESOURCE_ID_ANNOTATION, status.id()),
        (MACHINE_INSTANCE_STATE_ANNOTATION, status.state()),
    ] {
        if annotations.get(key).map(String::as_str) != Some(value) {
            annotation_patch.insert(key.to_string(), json!(value));
        }
    }

    if label_patch.is_empty() && annotation_patch.is_empty() {
        return None;
    }
    let mut metadata = Map::new();
    if !label_patch.is_empty() {
        metadata.insert("labels".to_string(), Value::Object(label_patch));
    }
    if !annotation_patch.is_empty() {
        metadata.insert("annotations".to_string(), Value::Object(annotation_patch));
    }
    Some(json!({ "metadata": metadata }))
}

/// Instance addresses plus the machine name as hostname and internal DNS name.
fn machine_addresses(machine: &Machine, status: &InstanceStatus) -> Vec<MachineAddress> {
    let name = machine.name_any();
    let mut addresses = status.addresses();
    addresses.push(MachineAddress::new(MachineAddressType::Hostname, name.clone()));
    addresses.push(MachineAddress::new(MachineAddressType::InternalDns, name));
    addresses
}
