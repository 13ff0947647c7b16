//! Cloud sessions
//!
//! Resolves the credentials a machine names in its provider spec and builds
//! authenticated OpenStack service clients from them. Credentials live in a
//! `clouds.yaml` key of a Secret; an optional CA bundle sits next to it or,
//! on older clusters, in the cloud provider config map.

use crate::error::ControllerError;
use async_trait::async_trait;
use crds::OpenstackProviderSpec;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{Api, Client};
use openstack_client::{
    Cloud, Clouds, ComputeService, ImageService, NetworkService, OpenStackClient, VolumeService,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Secret key holding the clouds.yaml document
pub const CLOUDS_YAML_KEY: &str = "clouds.yaml";

/// Secret key holding an optional PEM CA bundle
pub const CA_CERT_KEY: &str = "cacert";

/// Config map consulted for a CA bundle when the credentials secret has none
pub const CA_CONFIG_MAP_NAMESPACE: &str = "openshift-config";
pub const CA_CONFIG_MAP_NAME: &str = "cloud-provider-config";
pub const CA_CONFIG_MAP_KEY: &str = "ca-bundle.pem";

/// Read access to Secrets and ConfigMaps.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Data of the secret `namespace/name`.
    async fn secret_data(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, Vec<u8>>, ControllerError>;

    /// Data of the config map `namespace/name`.
    async fn config_map_data(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, String>, ControllerError>;
}

/// [`SecretStore`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeSecretStore {
    client: Client,
}

impl KubeSecretStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn secret_data(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, Vec<u8>>, ControllerError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = api.get(name).await?;
        Ok(secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(key, value)| (key, value.0))
            .collect())
    }

    async fn config_map_data(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, String>, ControllerError> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let config_map = api.get(name).await?;
        Ok(config_map.data.unwrap_or_default())
    }
}

/// A cloud entry plus the CA bundle to trust when talking to it
#[derive(Debug, Clone)]
pub struct CloudCredentials {
    pub cloud: Cloud,
    pub ca_cert: Option<Vec<u8>>,
}

/// Resolve the cloud entry referenced by `spec`.
///
/// The secret namespace defaults to `machine_namespace`.
pub async fn get_cloud(
    secrets: &dyn SecretStore,
    machine_namespace: &str,
    spec: &OpenstackProviderSpec,
) -> Result<CloudCredentials, ControllerError> {
    let secret_ref = spec
        .clouds_secret
        .as_ref()
        .filter(|secret| !secret.name.is_empty())
        .ok_or_else(|| ControllerError::Session("Cloud secret name can't be empty".to_string()))?;

    if spec.cloud_name.is_empty() {
        return Err(ControllerError::Session(format!(
            "secret name set to {} but no cloud was specified; set cloudName in the provider spec",
            secret_ref.name
        )));
    }

    let namespace = secret_ref.namespace_or(machine_namespace);
    let data = secrets
        .secret_data(namespace, &secret_ref.name)
        .await
        .map_err(|e| {
            ControllerError::Session(format!(
                "failed to get secret {}/{}: {}",
                namespace, secret_ref.name, e
            ))
        })?;

    let content = data.get(CLOUDS_YAML_KEY).ok_or_else(|| {
        ControllerError::Session(format!(
            "OpenStack credentials secret {} did not contain key {}",
            secret_ref.name, CLOUDS_YAML_KEY
        ))
    })?;
    let cloud = Clouds::from_yaml(content)
        .and_then(|clouds| clouds.cloud(&spec.cloud_name))
        .map_err(|e| {
            ControllerError::Session(format!(
                "failed to read clouds credentials stored in secret {}: {}",
                secret_ref.name, e
            ))
        })?;

    let ca_cert = match data.get(CA_CERT_KEY) {
        Some(cert) => Some(cert.clone()),
        None => ca_cert_from_config(secrets).await,
    };

    Ok(CloudCredentials { cloud, ca_cert })
}

async fn ca_cert_from_config(secrets: &dyn SecretStore) -> Option<Vec<u8>> {
    match secrets
        .config_map_data(CA_CONFIG_MAP_NAMESPACE, CA_CONFIG_MAP_NAME)
        .await
    {
        Ok(data) => data.get(CA_CONFIG_MAP_KEY).map(|cert| cert.clone().into_bytes()),
        Err(e) => {
            warn!(
                "failed to get configmap {}/{}: {}",
                CA_CONFIG_MAP_NAMESPACE, CA_CONFIG_MAP_NAME, e
            );
            None
        }
    }
}

/// Authenticated clients for one cloud
#[derive(Clone)]
pub struct CloudSession {
    pub compute: Arc<dyn ComputeService>,
    pub network: Arc<dyn NetworkService>,
    pub image: Arc<dyn ImageService>,
    pub volume: Arc<dyn VolumeService>,
    /// Region the clients talk to, used for the machine's region label
    pub region: String,
}

impl CloudSession {
    /// Build a session from a client implementing every service.
    pub fn from_client<C>(client: Arc<C>, region: impl Into<String>) -> Self
    where
        C: ComputeService + NetworkService + ImageService + VolumeService + 'static,
    {
        Self {
            compute: client.clone(),
            network: client.clone(),
            image: client.clone(),
            volume: client,
            region: region.into(),
        }
    }
}

/// Builds cloud sessions for a machine's provider spec.
#[async_trait]
pub trait CloudSessionProvider: Send + Sync {
    async fn session(
        &self,
        machine_namespace: &str,
        spec: &OpenstackProviderSpec,
    ) -> Result<CloudSession, ControllerError>;
}

/// Authenticates against Keystone with the credentials from the secret store.
pub struct OpenStackSessionProvider {
    secrets: Arc<dyn SecretStore>,
}

impl OpenStackSessionProvider {
    pub fn new(secrets: Arc<dyn SecretStore>) -> Self {
        Self { secrets }
    }
}

#[async_trait]
impl CloudSessionProvider for OpenStackSessionProvider {
    async fn session(
        &self,
        machine_namespace: &str,
        spec: &OpenstackProviderSpec,
    ) -> Result<CloudSession, ControllerError> {
        let credentials = get_cloud(self.secrets.as_ref(), machine_namespace, spec).await?;
        if credentials.ca_cert.is_none() {
            info!("Cloud provider CA cert not provided, using system trust bundle");
        }

        let client = OpenStackClient::connect(&credentials.cloud, credentials.ca_cert.as_deref())
            .await
            .map_err(|e| ControllerError::Session(format!("failed to authenticate provider client: {}", e)))?;
        let region = credentials.cloud.region_name.clone();
        Ok(CloudSession::from_client(Arc::new(client), region))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use crds::SecretReference;

    const CLOUDS_YAML: &str = r#"
clouds:
  openstack:
    auth:
      auth_url: https://keystone.example.com:5000
      username: admin
      password: secret
      project_name: admin
      user_domain_name: Default
    region_name: RegionOne
"#;

    fn spec_with_secret(name: &str, cloud: &str) -> OpenstackProviderSpec {
        OpenstackProviderSpec {
            clouds_secret: Some(SecretReference::new(name)),
            cloud_name: cloud.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_get_cloud_reads_secret_in_machine_namespace() {
        let store = FakeSecretStore::new()
            .with_secret(
                "machines",
                "openstack-cloud-credentials",
                &[(CLOUDS_YAML_KEY, CLOUDS_YAML), (CA_CERT_KEY, "PEM")],
            );

        let creds = get_cloud(
            &store,
            "machines",
            &spec_with_secret("openstack-cloud-credentials", "openstack"),
        )
        .await
        .unwrap();

        assert_eq!(creds.cloud.region_name, "RegionOne");
        assert_eq!(creds.ca_cert.as_deref(), Some(b"PEM".as_slice()));
    }

    #[tokio::test]
    async fn test_get_cloud_requires_secret_name_and_cloud_name() {
        let store = FakeSecretStore::new();

        let err = get_cloud(&store, "machines", &OpenstackProviderSpec::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Cloud secret name can't be empty"));

        let err = get_cloud(&store, "machines", &spec_with_secret("creds", ""))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no cloud was specified"));
    }

    #[tokio::test]
    async fn test_get_cloud_names_missing_key() {
        let store = FakeSecretStore::new().with_secret("machines", "creds", &[("other", "x")]);

        let err = get_cloud(&store, "machines", &spec_with_secret("creds", "openstack"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("did not contain key clouds.yaml"));
    }

    #[tokio::test]
    async fn test_ca_cert_falls_back_to_config_map() {
        let store = FakeSecretStore::new()
            .with_secret("machines", "creds", &[(CLOUDS_YAML_KEY, CLOUDS_YAML)])
            .with_config_map(
                CA_CONFIG_MAP_NAMESPACE,
                CA_CONFIG_MAP_NAME,
                &[(CA_CONFIG_MAP_KEY, "CONFIG-PEM")],
            );

        let creds = get_cloud(&store, "machines", &spec_with_secret("creds", "openstack"))
            .await
            .unwrap();
        assert_eq!(creds.ca_cert.as_deref(), Some(b"CONFIG-PEM".as_slice()));

        // No config map at all is not an error
        let bare = FakeSecretStore::new().with_secret("machines", "creds", &[(CLOUDS_YAML_KEY, CLOUDS_YAML)]);
        let creds = get_cloud(&bare, "machines", &spec_with_secret("creds", "openstack"))
            .await
            .unwrap();
        assert!(creds.ca_cert.is_none());
    }

    #[tokio::test]
    async fn test_secret_namespace_override() {
        let store = FakeSecretStore::new().with_secret("kube-system", "creds", &[(CLOUDS_YAML_KEY, CLOUDS_YAML)]);
        let mut spec = spec_with_secret("creds", "openstack");
        if let Some(secret) = spec.clouds_secret.as_mut() {
            secret.namespace = Some("kube-system".to_string());
        }

        assert!(get_cloud(&store, "machines", &spec).await.is_ok());
    }
}
