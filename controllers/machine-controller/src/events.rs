//! Kubernetes Event recording.
//!
//! A trait-based abstraction over `kube::runtime::events::Recorder` so the
//! actuator can emit the events visible via `kubectl describe machine`.
//!
//! Events are fire-and-forget: failures are logged as warnings and never
//! propagate to the reconcile pass.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::Client;
use kube::runtime::events::{EventType, Recorder, Reporter};
use tracing::warn;

/// Publishes Kubernetes Events about a resource.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an event on `resource_ref`.
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Production implementation wrapping `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a publisher reporting as `controller_name`.
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: None,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = kube::runtime::events::Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// Discards every event.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct NoopEventPublisher;

#[cfg(test)]
#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Event reasons, shown under REASON in `kubectl get events`.
pub mod reasons {
    pub const CREATED: &str = "Created";
    pub const UPDATED: &str = "Updated";
    pub const DELETED: &str = "Deleted";
    pub const FAILED_CREATE: &str = "FailedCreate";
    pub const FAILED_UPDATE: &str = "FailedUpdate";
    pub const FAILED_DELETE: &str = "FailedDelete";
    pub const RECONCILE_ERROR: &str = "ReconcileError";
}

/// Event actions, shown under ACTION in `kubectl get events`.
pub mod actions {
    pub const CREATE: &str = "Create";
    pub const UPDATE: &str = "Update";
    pub const DELETE: &str = "Delete";
    pub const RECONCILE: &str = "Reconcile";
}
