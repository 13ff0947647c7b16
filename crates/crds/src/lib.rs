//! Machine API CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the Machine API objects the
//! OpenStack machine controller acts on, plus the OpenStack provider spec
//! carried inside each machine.

pub mod machine;
pub mod provider_spec;
pub mod references;

pub use machine::*;
pub use provider_spec::*;
pub use references::*;
