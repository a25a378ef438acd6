//! Remote lookup transport for the registry client.

use std::time::Duration;

use async_trait::async_trait;

use crate::{RegistryError, TenantRegistryRecord};

/// Performs one uncached remote lookup of a tenant slug.
#[async_trait]
pub trait RegistryFetch: Send + Sync {
    async fn fetch(&self, slug: &str) -> Result<TenantRegistryRecord, RegistryError>;
}

/// Control-plane HTTP transport: `GET /v1/tenants/resolve?slug=` with an
/// internal shared-secret header.
pub struct HttpRegistryFetch {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpRegistryFetch {
    pub fn new(base_url: &str, token: &str) -> Result<Self, RegistryError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|err| RegistryError::Upstream(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }
}

#[async_trait]
impl RegistryFetch for HttpRegistryFetch {
    async fn fetch(&self, slug: &str) -> Result<TenantRegistryRecord, RegistryError> {
        let url = format!("{}/v1/tenants/resolve", self.base_url);
        let mut request = self.client.get(&url).query(&[("slug", slug)]);
        if !self.token.is_empty() {
            request = request.header("X-Internal-Token", &self.token);
        }
        let response = request
            .send()
            .await
            .map_err(|err| RegistryError::Upstream(err.to_string()))?;

        match response.status() {
            status if status == reqwest::StatusCode::NOT_FOUND => {
                Err(RegistryError::NotFound(slug.to_string()))
            }
            status if !status.is_success() => Err(RegistryError::Upstream(format!(
                "registry returned {status}"
            ))),
            _ => response
                .json::<TenantRegistryRecord>()
                .await
                .map_err(|err| RegistryError::Upstream(format!("invalid registry body: {err}"))),
        }
    }
}
