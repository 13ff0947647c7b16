//! Kubernetes object references used by provider specs
//!
//! Secrets holding cloud credentials and user data are referenced by name with
//! an optional namespace that defaults to the namespace of the referencing
//! machine.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to a Secret, optionally in another namespace
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    /// Name of the secret
    #[serde(default)]
    pub name: String,

    /// Namespace of the secret (defaults to the referencing object's namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl SecretReference {
    /// Create a reference to a secret in the referencing object's namespace
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
        }
    }

    /// Namespace to read the secret from, falling back to `default_namespace`
    /// when the reference leaves it unset or empty
    pub fn namespace_or<'a>(&'a self, default_namespace: &'a str) -> &'a str {
        match self.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => ns,
            _ => default_namespace,
        }
    }
}
