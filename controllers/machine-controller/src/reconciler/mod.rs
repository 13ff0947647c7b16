//! Reconciliation logic for Machine API resources.
//!
//! - `machine`: Machine lifecycle (finalizer, phases, error status) around
//!   the [`Actuator`]
//! - `machine_set`: vCPU and memory annotations on MachineSets

pub mod machine;
#[cfg(test)]
mod machine_test;
pub mod machine_set;

use crate::actuator::Actuator;
use crate::backoff::FibonacciBackoff;
use crate::events::EventPublisher;
use crate::flavorcache::FlavorCache;
use crate::session::CloudSessionProvider;
use crate::store::MachineStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Backoff state for a resource
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::new(1, 10), // 1 minute min, 10 minutes max
            error_count: 0,
        }
    }

    fn increment_error(&mut self) {
        self.error_count += 1;
    }

    fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Reconciles Machines and MachineSets.
pub struct Reconciler {
    pub(crate) actuator: Arc<Actuator>,
    pub(crate) store: Arc<dyn MachineStore>,
    pub(crate) sessions: Arc<dyn CloudSessionProvider>,
    pub(crate) events: Arc<dyn EventPublisher>,
    pub(crate) flavors: Arc<FlavorCache>,
    /// Error count tracking per resource (kind/namespace/name -> BackoffState)
    backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(
        actuator: Arc<Actuator>,
        store: Arc<dyn MachineStore>,
        sessions: Arc<dyn CloudSessionProvider>,
        events: Arc<dyn EventPublisher>,
        flavors: Arc<FlavorCache>,
    ) -> Self {
        Self {
            actuator,
            store,
            sessions,
            events,
            flavors,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Get the Fibonacci backoff duration for a resource based on its error count
    ///
    /// Returns (backoff_seconds, error_count)
    pub fn get_backoff_for_resource(&self, resource_key: &str) -> (u64, u32) {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                let state = states
                    .entry(resource_key.to_string())
                    .or_insert_with(BackoffState::new);
                let backoff_seconds = state.backoff.next_backoff_seconds();
                (backoff_seconds, state.error_count)
            }
            Err(e) => {
                warn!("Failed to lock backoff_states: {}, using default backoff", e);
                (60, 0)
            }
        }
    }

    /// Increment error count for a resource
    pub fn increment_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states
                .entry(resource_key.to_string())
                .or_insert_with(BackoffState::new)
                .increment_error();
        }
    }

    /// Reset error count for a resource (on successful reconciliation)
    pub fn reset_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock()
            && let Some(state) = states.get_mut(resource_key)
        {
            state.reset();
        }
    }
}
