//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the actuator to
//! the Kubernetes API and OpenStack, and runs the watchers:
//! - Machine: creates, updates and deletes OpenStack instances
//! - MachineSet: annotates sets with their flavor's vCPU and memory

use crate::actuator::Actuator;
use crate::error::ControllerError;
use crate::events::KubeEventPublisher;
use crate::flavorcache::FlavorCache;
use crate::infrastructure::KubeInfrastructureSource;
use crate::instance::Timeouts;
use crate::reconciler::Reconciler;
use crate::session::{KubeSecretStore, OpenStackSessionProvider, SecretStore};
use crate::store::KubeMachineStore;
use crate::watcher::Watcher;
use crds::{Machine, MachineSet};
use kube::{Api, Client};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Runtime settings read from the environment in `main`
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Namespace to watch; all namespaces when `None`
    pub namespace: Option<String>,
    /// Reporting controller name on events
    pub controller_name: String,
    /// Reconciles in flight per watcher
    pub concurrency: u16,
}

/// Main controller for OpenStack Machines.
pub struct Controller {
    machine_watcher: JoinHandle<Result<(), ControllerError>>,
    machine_set_watcher: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance and starts its watchers.
    pub async fn new(settings: ControllerSettings) -> Result<Self, ControllerError> {
        info!("Initializing OpenStack Machine Controller");

        let kube_client = Client::try_default().await?;

        let (machine_api, machine_set_api): (Api<Machine>, Api<MachineSet>) = match settings.namespace.as_deref() {
            Some(ns) => (
                Api::namespaced(kube_client.clone(), ns),
                Api::namespaced(kube_client.clone(), ns),
            ),
            None => (Api::all(kube_client.clone()), Api::all(kube_client.clone())),
        };

        let secrets: Arc<dyn SecretStore> = Arc::new(KubeSecretStore::new(kube_client.clone()));
        let sessions = Arc::new(OpenStackSessionProvider::new(secrets.clone()));
        let store = Arc::new(KubeMachineStore::new(kube_client.clone()));
        let events = Arc::new(KubeEventPublisher::new(kube_client.clone(), &settings.controller_name));
        let flavors = Arc::new(FlavorCache::new());

        let actuator = Arc::new(Actuator::new(
            store.clone(),
            sessions.clone(),
            Arc::new(KubeInfrastructureSource::new(kube_client.clone())),
            secrets,
            events.clone(),
            flavors.clone(),
            Timeouts::default(),
        ));

        let reconciler = Arc::new(Reconciler::new(actuator, store, sessions, events, flavors));

        let watcher_instance = Arc::new(Watcher::new(
            reconciler,
            machine_api,
            machine_set_api,
            settings.concurrency,
        ));

        let machine_watcher = {
            let watcher = watcher_instance.clone();
            tokio::spawn(async move { watcher.watch_machines().await })
        };

        let machine_set_watcher = {
            let watcher = watcher_instance;
            tokio::spawn(async move { watcher.watch_machine_sets().await })
        };

        Ok(Self {
            machine_watcher,
            machine_set_watcher,
        })
    }

    /// Runs the controller until shutdown.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("OpenStack Machine Controller running");

        // Wait for any watcher to exit (they should run forever)
        tokio::select! {
            result = &mut self.machine_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("Machine watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("Machine watcher error: {}", e)))?;
            }
            result = &mut self.machine_set_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("MachineSet watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("MachineSet watcher error: {}", e)))?;
            }
        }

        Ok(())
    }
}
