//! Optional identity registry gate.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Lookup of registered agent addresses.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityRegistry: Send + Sync {
    /// `Ok(false)` means the registry answered and the address is unknown.
    async fn is_registered(&self, address: &str) -> Result<bool>;
}

#[derive(Debug, Deserialize)]
struct RegistrationResponse {
    registered: bool,
}

/// Registry served over HTTP at `{endpoint}/agents/{address}`.
pub struct HttpIdentityRegistry {
    http: Client,
    endpoint: String,
}

impl HttpIdentityRegistry {
    pub fn new(endpoint: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(5))
            .user_agent("caliguland/0.1.0 (identity-registry)")
            .build()
            .context("Failed to build HTTP client for identity registry")?;
        Ok(Self { http, endpoint: endpoint.trim_end_matches('/').to_string() })
    }
}

#[async_trait]
impl IdentityRegistry for HttpIdentityRegistry {
    async fn is_registered(&self, address: &str) -> Result<bool> {
        let url = format!("{}/agents/{address}", self.endpoint);
        debug!(url = %url, "Identity registry lookup");
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .context("Identity registry request failed")?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Identity registry error {status}: {body}");
        }
        let parsed: RegistrationResponse = resp
            .json()
            .await
            .context("Failed to parse identity registry response")?;
        Ok(parsed.registered)
    }
}
