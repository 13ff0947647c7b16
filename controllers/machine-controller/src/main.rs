//! OpenStack Machine Controller
//!
//! Machine API actuator for OpenStack:
//! - Machine: creates, updates and deletes the backing Nova instance, its
//!   ports, trunks, volumes and floating IP
//! - MachineSet: annotates sets with their flavor's vCPU and memory

mod actuator;
mod backoff;
mod controller;
mod convert;
mod error;
mod events;
mod flavorcache;
mod infrastructure;
mod instance;
mod reconciler;
mod session;
mod store;
mod userdata;
mod validation;
mod watcher;

#[cfg(test)]
mod convert_test;
#[cfg(test)]
mod test_utils;

use crate::controller::{Controller, ControllerSettings};
use crate::error::ControllerError;
use std::env;
use tracing::{info, warn};

const DEFAULT_CONTROLLER_NAME: &str = "openstack-machine-controller";
const DEFAULT_CONCURRENCY: u16 = 3;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt::init();

    // reqwest and kube both use rustls; pick the provider once for the process
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("rustls crypto provider was already installed");
    }

    info!("Starting OpenStack Machine Controller");

    // Load configuration from environment variables
    let namespace = env::var("WATCH_NAMESPACE").ok().filter(|ns| !ns.is_empty());
    let controller_name =
        env::var("CONTROLLER_NAME").unwrap_or_else(|_| DEFAULT_CONTROLLER_NAME.to_string());
    let concurrency = match env::var("RECONCILE_CONCURRENCY") {
        Ok(value) => value.parse::<u16>().ok().filter(|c| *c > 0).ok_or_else(|| {
            ControllerError::InvalidConfig(format!(
                "RECONCILE_CONCURRENCY must be a positive integer, got {:?}",
                value
            ))
        })?,
        Err(_) => DEFAULT_CONCURRENCY,
    };

    info!("Configuration:");
    info!("  Namespace: {}", namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Controller name: {}", controller_name);
    info!("  Reconcile concurrency: {}", concurrency);

    // Initialize and run controller
    let controller = Controller::new(ControllerSettings {
        namespace,
        controller_name,
        concurrency,
    })
    .await?;
    controller.run().await?;

    Ok(())
}
