//! `clouds.yaml` parsing
//!
//! Only the subset of the os-client-config format the controller needs:
//! Keystone v3 password and application-credential auth, region, interface
//! and TLS verification settings.

use crate::error::OpenStackError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Top-level `clouds.yaml` document
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Clouds {
    #[serde(default)]
    pub clouds: BTreeMap<String, Cloud>,
}

impl Clouds {
    /// Parse a `clouds.yaml` document
    pub fn from_yaml(content: &[u8]) -> Result<Self, OpenStackError> {
        serde_yaml::from_slice(content)
            .map_err(|e| OpenStackError::Config(format!("failed to parse clouds.yaml: {}", e)))
    }

    /// Look up a cloud entry by name
    pub fn cloud(&self, name: &str) -> Result<Cloud, OpenStackError> {
        self.clouds
            .get(name)
            .cloned()
            .ok_or_else(|| OpenStackError::Config(format!("cloud {:?} not found in clouds.yaml", name)))
    }
}

/// A single cloud entry
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Cloud {
    #[serde(default)]
    pub auth: AuthInfo,
    /// `password` (default) or `v3applicationcredential`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_type: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub region_name: String,
    /// Endpoint interface; `public` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify: Option<bool>,
    /// Path to a CA bundle on disk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cacert: Option<String>,
}

impl Cloud {
    /// Endpoint interface to select from the service catalog
    pub fn interface(&self) -> &str {
        self.interface.as_deref().unwrap_or("public")
    }

    /// True when the entry authenticates with an application credential
    pub fn uses_application_credential(&self) -> bool {
        matches!(
            self.auth_type.as_deref(),
            Some("v3applicationcredential") | Some("applicationcredential")
        ) || self.auth.application_credential_id.is_some()
    }
}

/// Authentication block of a cloud entry
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AuthInfo {
    #[serde(default)]
    pub auth_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_domain_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_domain_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_domain_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_domain_id: Option<String>,
    /// Used for both user and project domain when those are unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_credential_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_credential_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_credential_secret: Option<String>,
}
