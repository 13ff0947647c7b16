//! Controller-specific error types.
//!
//! This module defines the errors produced while reconciling Machines and
//! MachineSets. How a variant is surfaced (status fields, events, requeue)
//! is decided by the machine reconciler; see [`ControllerError::is_permanent`].

use crate::flavorcache::FlavorLookupError;
use crds::ProviderSpecError;
use kube::Error as KubeError;
use openstack_client::OpenStackError;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur in the OpenStack Machine Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// OpenStack API error
    #[error("OpenStack error: {0}")]
    OpenStack(#[from] OpenStackError),

    /// The machine's configuration can never be satisfied as written
    #[error("invalid machine configuration: {0}")]
    InvalidConfiguration(String),

    /// Not an error: the pass should be retried after the given delay
    #[error("requeue in {0:?}")]
    RequeueAfter(Duration),

    /// Instance creation failed
    #[error("failed to create machine: {0}")]
    CreateMachine(String),

    /// An optimistic-lock patch lost against a concurrent writer
    #[error("concurrent modification of {0}")]
    Conflict(String),

    /// The provider spec could not be turned into an instance spec
    #[error("failed to translate provider spec: {0}")]
    Translation(String),

    /// Pre-flight validation failed
    #[error("validation failed: {0}")]
    Validation(String),

    /// Cloud credentials could not be resolved or authenticated
    #[error("failed to create cloud session: {0}")]
    Session(String),

    /// User data could not be fetched or rendered
    #[error("user data error: {0}")]
    UserData(String),

    /// Flavor lookup through the flavor cache failed
    #[error(transparent)]
    Flavor(#[from] FlavorLookupError),

    /// Cleanup after a failed step also failed; both errors are kept
    #[error("{original} (cleanup also failed: {cleanup})")]
    Compensation {
        original: Box<ControllerError>,
        cleanup: Box<ControllerError>,
    },

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Invalid controller configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<ProviderSpecError> for ControllerError {
    fn from(err: ProviderSpecError) -> Self {
        ControllerError::InvalidConfiguration(err.to_string())
    }
}

impl ControllerError {
    /// Permanent errors mark the machine `Failed` and are never retried.
    pub fn is_permanent(&self) -> bool {
        matches!(self, ControllerError::InvalidConfiguration(_))
    }

    /// Delay requested by a [`ControllerError::RequeueAfter`].
    pub fn requeue_after(&self) -> Option<Duration> {
        match self {
            ControllerError::RequeueAfter(delay) => Some(*delay),
            _ => None,
        }
    }

    /// Wrap `self` with the error raised while cleaning up after it.
    pub fn with_cleanup(self, cleanup: ControllerError) -> Self {
        ControllerError::Compensation {
            original: Box::new(self),
            cleanup: Box::new(cleanup),
        }
    }
}
