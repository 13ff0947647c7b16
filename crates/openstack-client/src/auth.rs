//! Keystone v3 authentication
//!
//! Issues a token with password or application-credential auth and picks
//! service endpoints out of the returned catalog.

use crate::clouds::Cloud;
use crate::error::OpenStackError;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

/// Header carrying the issued token in Keystone responses
const SUBJECT_TOKEN_HEADER: &str = "X-Subject-Token";

/// Issued token plus the service catalog it came with
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub token: String,
    pub catalog: Vec<CatalogEntry>,
}

/// Catalog entry for one service type
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntry {
    #[serde(rename = "type")]
    pub service_type: String,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

/// Endpoint of a service
#[derive(Debug, Clone, Deserialize)]
pub struct Endpoint {
    pub interface: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub region_id: Option<String>,
    pub url: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: TokenBody,
}

#[derive(Debug, Deserialize)]
struct TokenBody {
    #[serde(default)]
    catalog: Vec<CatalogEntry>,
}

impl AuthSession {
    /// Resolve the endpoint for `service_type` in `region` on `interface`.
    /// An empty region matches any endpoint.
    pub fn endpoint(
        &self,
        service_type: &str,
        region: &str,
        interface: &str,
    ) -> Result<String, OpenStackError> {
        self.catalog
            .iter()
            .filter(|entry| entry.service_type == service_type)
            .flat_map(|entry| entry.endpoints.iter())
            .find(|ep| {
                ep.interface == interface
                    && (region.is_empty()
                        || ep.region.as_deref() == Some(region)
                        || ep.region_id.as_deref() == Some(region))
            })
            .map(|ep| ep.url.trim_end_matches('/').to_string())
            .ok_or_else(|| {
                OpenStackError::Config(format!(
                    "no {} endpoint for service {:?} in region {:?}",
                    interface, service_type, region
                ))
            })
    }
}

/// Build the Keystone v3 token request body for a cloud entry
pub fn token_request_body(cloud: &Cloud) -> Result<serde_json::Value, OpenStackError> {
    let auth = &cloud.auth;

    if cloud.uses_application_credential() {
        let secret = auth.application_credential_secret.clone().ok_or_else(|| {
            OpenStackError::Config("application_credential_secret is required".to_string())
        })?;
        let credential = match (&auth.application_credential_id, &auth.application_credential_name) {
            (Some(id), _) => json!({ "id": id, "secret": secret }),
            (None, Some(name)) => json!({
                "name": name,
                "secret": secret,
                "user": user_ref(cloud)?,
            }),
            (None, None) => {
                return Err(OpenStackError::Config(
                    "application_credential_id or application_credential_name is required".to_string(),
                ));
            }
        };
        return Ok(json!({
            "auth": {
                "identity": {
                    "methods": ["application_credential"],
                    "application_credential": credential,
                }
            }
        }));
    }

    let password = auth
        .password
        .clone()
        .ok_or_else(|| OpenStackError::Config("password is required".to_string()))?;
    let mut user = user_ref(cloud)?;
    user["password"] = json!(password);

    let mut body = json!({
        "auth": {
            "identity": {
                "methods": ["password"],
                "password": { "user": user },
            }
        }
    });
    if let Some(scope) = project_scope(cloud) {
        body["auth"]["scope"] = scope;
    }
    Ok(body)
}

fn user_ref(cloud: &Cloud) -> Result<serde_json::Value, OpenStackError> {
    let auth = &cloud.auth;
    if let Some(id) = &auth.user_id {
        return Ok(json!({ "id": id }));
    }
    let name = auth
        .username
        .clone()
        .ok_or_else(|| OpenStackError::Config("username or user_id is required".to_string()))?;
    let domain = match (
        auth.user_domain_id.as_ref().or(auth.domain_id.as_ref()),
        auth.user_domain_name.as_ref().or(auth.domain_name.as_ref()),
    ) {
        (Some(id), _) => json!({ "id": id }),
        (None, Some(name)) => json!({ "name": name }),
        (None, None) => json!({ "id": "default" }),
    };
    Ok(json!({ "name": name, "domain": domain }))
}

fn project_scope(cloud: &Cloud) -> Option<serde_json::Value> {
    let auth = &cloud.auth;
    if let Some(id) = &auth.project_id {
        return Some(json!({ "project": { "id": id } }));
    }
    let name = auth.project_name.as_ref()?;
    let domain = match (
        auth.project_domain_id.as_ref().or(auth.domain_id.as_ref()),
        auth.project_domain_name.as_ref().or(auth.domain_name.as_ref()),
    ) {
        (Some(id), _) => json!({ "id": id }),
        (None, Some(name)) => json!({ "name": name }),
        (None, None) => json!({ "id": "default" }),
    };
    Some(json!({ "project": { "name": name, "domain": domain } }))
}

/// Authenticate against Keystone and return the token and catalog
pub async fn authenticate(client: &Client, cloud: &Cloud) -> Result<AuthSession, OpenStackError> {
    if cloud.auth.auth_url.is_empty() {
        return Err(OpenStackError::Config("auth_url is required".to_string()));
    }
    let base = cloud.auth.auth_url.trim_end_matches('/');
    let url = if base.ends_with("/v3") {
        format!("{}/auth/tokens", base)
    } else {
        format!("{}/v3/auth/tokens", base)
    };
    debug!("POST {}", url);

    let response = client
        .post(&url)
        .header("Accept", "application/json")
        .json(&token_request_body(cloud)?)
        .send()
        .await?;

    let status = response.status();
    if status == 401 || status == 403 {
        let body = response.text().await.unwrap_or_default();
        return Err(OpenStackError::Authentication(format!("{} - {}", status, body)));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(OpenStackError::Api {
            status: status.as_u16(),
            message: format!("POST {} failed: {}", url, body),
        });
    }

    let token = response
        .headers()
        .get(SUBJECT_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| OpenStackError::Authentication("Keystone returned no token".to_string()))?;

    let body: TokenResponse = response.json().await?;
    debug!("Authenticated against {}", cloud.auth.auth_url);

    Ok(AuthSession {
        token,
        catalog: body.token.catalog,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clouds::AuthInfo;

    fn password_cloud() -> Cloud {
        Cloud {
            auth: AuthInfo {
                auth_url: "https://keystone:5000/v3".to_string(),
                username: Some("admin".to_string()),
                password: Some("secret".to_string()),
                project_name: Some("shiftstack".to_string()),
                domain_name: Some("Default".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_password_body_uses_shared_domain() {
        let body = token_request_body(&password_cloud()).unwrap();
        let user = &body["auth"]["identity"]["password"]["user"];
        assert_eq!(user["name"], "admin");
        assert_eq!(user["domain"]["name"], "Default");
        assert_eq!(body["auth"]["scope"]["project"]["domain"]["name"], "Default");
    }

    #[test]
    fn test_application_credential_body() {
        let cloud = Cloud {
            auth_type: Some("v3applicationcredential".to_string()),
            auth: AuthInfo {
                auth_url: "https://keystone:5000".to_string(),
                application_credential_id: Some("id-1".to_string()),
                application_credential_secret: Some("s3cret".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let body = token_request_body(&cloud).unwrap();
        assert_eq!(body["auth"]["identity"]["methods"][0], "application_credential");
        assert_eq!(body["auth"]["identity"]["application_credential"]["id"], "id-1");
        assert!(body["auth"].get("scope").is_none());
    }

    #[test]
    fn test_missing_password_is_config_error() {
        let mut cloud = password_cloud();
        cloud.auth.password = None;
        assert!(matches!(token_request_body(&cloud), Err(OpenStackError::Config(_))));
    }

    #[test]
    fn test_endpoint_selection() {
        let session = AuthSession {
            token: "t".to_string(),
            catalog: vec![CatalogEntry {
                service_type: "compute".to_string(),
                endpoints: vec![
                    Endpoint {
                        interface: "internal".to_string(),
                        region: Some("regionOne".to_string()),
                        region_id: None,
                        url: "http://nova-internal/v2.1".to_string(),
                    },
                    Endpoint {
                        interface: "public".to_string(),
                        region: Some("regionOne".to_string()),
                        region_id: None,
                        url: "https://nova/v2.1/".to_string(),
                    },
                ],
            }],
        };
        assert_eq!(
            session.endpoint("compute", "regionOne", "public").unwrap(),
            "https://nova/v2.1"
        );
        assert!(session.endpoint("compute", "regionTwo", "public").is_err());
        assert!(session.endpoint("network", "", "public").is_err());
    }
}
