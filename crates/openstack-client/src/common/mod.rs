//! Common utilities for the OpenStack API client
//!
//! Provides the authenticated HTTP wrapper shared by every service client.

use crate::error::OpenStackError;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use tracing::debug;

/// Header carrying the Keystone token on service requests
const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

/// Header pinning the API microversion on Nova requests
const MICROVERSION_HEADER: &str = "OpenStack-API-Version";

/// HTTP client wrapper bound to one service endpoint
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
    token: String,
    /// `(service, version)`, e.g. `("compute", "2.53")`
    microversion: Option<(String, String)>,
}

impl HttpClient {
    /// Create a new HTTP client wrapper
    pub fn new(client: Client, base_url: String, token: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            microversion: None,
        }
    }

    /// Pin a microversion on every request made by this client
    pub fn with_microversion(mut self, service: &str, version: &str) -> Self {
        self.microversion = Some((service.to_string(), version.to_string()));
        self
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a full URL from a path
    pub fn build_url(&self, path: &str) -> String {
        if path.starts_with("http") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    fn authorize(&self, builder: RequestBuilder, microversion: Option<&str>) -> RequestBuilder {
        let builder = builder
            .header(AUTH_TOKEN_HEADER, &self.token)
            .header("Accept", "application/json");
        match (&self.microversion, microversion) {
            (Some((service, _)), Some(version)) => {
                builder.header(MICROVERSION_HEADER, format!("{} {}", service, version))
            }
            (Some((service, version)), None) => {
                builder.header(MICROVERSION_HEADER, format!("{} {}", service, version))
            }
            (None, _) => builder,
        }
    }

    async fn check(method: &str, path: &str, response: Response) -> Result<Response, OpenStackError> {
        let status = response.status();
        if status == 404 {
            let body = response.text().await.unwrap_or_default();
            return Err(OpenStackError::NotFound(format!(
                "Resource not found: {} - {}",
                path, body
            )));
        }
        if status == 401 {
            let body = response.text().await.unwrap_or_default();
            return Err(OpenStackError::Authentication(format!(
                "{} {} rejected: {}",
                method, path, body
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OpenStackError::Api {
                status: status.as_u16(),
                message: format!("{} {} failed: {}", method, path, body),
            });
        }
        Ok(response)
    }

    /// Make a GET request
    pub async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, OpenStackError> {
        let url = self.build_url(path);
        debug!("GET {}", url);

        let response = self.authorize(self.client.get(&url), None).send().await?;
        let response = Self::check("GET", path, response).await?;
        response.json().await.map_err(OpenStackError::Http)
    }

    /// Make a POST request
    pub async fn post<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, OpenStackError> {
        self.post_with_microversion(path, body, None).await
    }

    /// Make a POST request with a per-call microversion override
    pub async fn post_with_microversion<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &serde_json::Value,
        microversion: Option<&str>,
    ) -> Result<T, OpenStackError> {
        let url = self.build_url(path);
        debug!("POST {}", url);

        let response = self
            .authorize(self.client.post(&url), microversion)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;
        let response = Self::check("POST", path, response).await?;
        response.json().await.map_err(OpenStackError::Http)
    }

    /// Make a POST request whose response has no body of interest
    pub async fn post_no_content(&self, path: &str, body: &serde_json::Value) -> Result<(), OpenStackError> {
        let url = self.build_url(path);
        debug!("POST {}", url);

        let response = self
            .authorize(self.client.post(&url), None)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;
        Self::check("POST", path, response).await?;
        Ok(())
    }

    /// Make a PUT request
    pub async fn put<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, OpenStackError> {
        let url = self.build_url(path);
        debug!("PUT {}", url);

        let response = self
            .authorize(self.client.put(&url), None)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;
        let response = Self::check("PUT", path, response).await?;
        response.json().await.map_err(OpenStackError::Http)
    }

    /// Make a DELETE request
    pub async fn delete(&self, path: &str) -> Result<(), OpenStackError> {
        let url = self.build_url(path);
        debug!("DELETE {}", url);

        let response = self.authorize(self.client.delete(&url), None).send().await?;
        Self::check("DELETE", path, response).await?;
        Ok(())
    }
}
