//! Kubernetes resource watchers.
//!
//! This module handles watching Machines and MachineSets for changes and
//! triggering reconciliation using kube_runtime::Controller.
//!
//! Both watchers use a generic `watch_resource()` helper that handles the
//! reconcile loop with automatic reconnection and retry logic.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crds::{Machine, MachineSet};
use futures::StreamExt;
use kube::{Api, ResourceExt};
use kube_runtime::{
    Controller, watcher,
    controller::{Action, Config as ControllerConfig},
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Delay before retrying a pass that lost an optimistic-lock race
const CONFLICT_REQUEUE: Duration = Duration::from_secs(5);

/// Generic watcher helper around kube_runtime::Controller.
///
/// The Controller reconnects the watch, deduplicates queued objects and
/// keeps at most `concurrency` reconciles in flight. Failed reconciles are
/// requeued with the per-resource Fibonacci backoff kept by the reconciler.
async fn watch_resource<K, F>(
    api: Api<K>,
    reconciler: Arc<Reconciler>,
    reconcile_fn: F,
    resource_name: &'static str,
    concurrency: u16,
) -> Result<(), ControllerError>
where
    K: kube::Resource + Clone + Send + Sync + 'static + std::fmt::Debug + serde::de::DeserializeOwned,
    K::DynamicType: Default + std::cmp::Eq + std::hash::Hash + Clone + std::fmt::Debug + Unpin,
    F: Fn(Arc<Reconciler>, Arc<K>) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Action, ControllerError>> + Send>>
        + Send
        + Sync
        + Clone
        + 'static,
{
    info!("Starting {} watcher", resource_name);

    let error_policy = move |obj: Arc<K>, error: &ControllerError, ctx: Arc<Reconciler>| {
        if matches!(error, ControllerError::Conflict(_)) {
            return Action::requeue(CONFLICT_REQUEUE);
        }
        let resource_key = format!(
            "{}/{}/{}",
            resource_name,
            obj.namespace().unwrap_or_default(),
            obj.name_any()
        );
        let (backoff_seconds, error_count) = ctx.get_backoff_for_resource(&resource_key);
        error!(
            "Reconciliation error for {} (attempt {}), retrying in {}s: {}",
            resource_key, error_count, backoff_seconds, error
        );
        Action::requeue(Duration::from_secs(backoff_seconds))
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<Reconciler>| {
        let reconcile_fn = reconcile_fn.clone();
        async move {
            debug!("Reconciling {} {}", resource_name, obj.name_any());
            reconcile_fn(ctx, obj).await
        }
    };

    // Debounce batches the status writes of one pass into a single event
    let controller_config = ControllerConfig::default()
        .debounce(Duration::from_secs(1))
        .concurrency(concurrency);

    Controller::new(api, watcher::Config::default())
        .with_config(controller_config)
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            if let Err(e) = res {
                debug!("Controller error for {}: {}", resource_name, e);
            }
        })
        .await;

    Ok(())
}

/// Watches Machines and MachineSets.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    machine_api: Api<Machine>,
    machine_set_api: Api<MachineSet>,
    concurrency: u16,
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(
        reconciler: Arc<Reconciler>,
        machine_api: Api<Machine>,
        machine_set_api: Api<MachineSet>,
        concurrency: u16,
    ) -> Self {
        Self {
            reconciler,
            machine_api,
            machine_set_api,
            concurrency,
        }
    }

    /// Watches Machines and drives each through the actuator.
    pub async fn watch_machines(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.machine_api.clone(),
            self.reconciler.clone(),
            |reconciler, machine| Box::pin(async move { reconciler.reconcile_machine(&machine).await }),
            "Machine",
            self.concurrency,
        )
        .await
    }

    /// Watches MachineSets and keeps their flavor annotations current.
    pub async fn watch_machine_sets(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.machine_set_api.clone(),
            self.reconciler.clone(),
            |reconciler, machine_set| {
                Box::pin(async move { reconciler.reconcile_machine_set(&machine_set).await })
            },
            "MachineSet",
            self.concurrency,
        )
        .await
    }
}
