//! OpenStack REST API Client
//!
//! A Rust client library for the OpenStack services a machine actuator needs:
//! Keystone v3 for authentication, Nova for servers, Neutron for networking,
//! Glance for images and Cinder for volumes.
//!
//! # Example
//!
//! ```no_run
//! use openstack_client::{Clouds, ComputeService, OpenStackClient};
//!
//! # async fn example(clouds_yaml: &[u8]) -> Result<(), Box<dyn std::error::Error>> {
//! let cloud = Clouds::from_yaml(clouds_yaml)?.cloud("openstack")?;
//! let client = OpenStackClient::connect(&cloud, None).await?;
//!
//! let flavor_id = client.get_flavor_id("m1.large").await?;
//! let flavor = client.get_flavor(&flavor_id).await?;
//! println!("{} vCPUs, {} MiB", flavor.vcpus, flavor.ram);
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Service traits**: `ComputeService`, `NetworkService`, `ImageService`,
//!   `VolumeService`, one per service so callers depend only on what they use
//! - **clouds.yaml**: password and application-credential entries
//! - **Mocking**: `MockOpenStackClient` behind the `test-util` feature

pub mod auth;
pub mod client;
pub mod clouds;
pub mod common;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod openstack_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::OpenStackClient;
pub use clouds::{AuthInfo, Cloud, Clouds};
pub use common::HttpClient;
pub use error::OpenStackError;
pub use models::*;
pub use openstack_trait::{ComputeService, ImageService, NetworkService, VolumeService};
#[cfg(feature = "test-util")]
pub use mock::MockOpenStackClient;
