//! HTTP client for a settlement bridge service.
//!
//! The bridge fronts the game contracts and speaks plain JSON. Every call is
//! best-effort: transport or decode errors are logged and surface as `None`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

use super::{ChainAdapter, ChainMarketState, TxHash};
use crate::types::{Outcome, Position};

#[derive(Debug, Deserialize)]
struct TxResponse {
    tx_hash: String,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    balance: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PositionResponse {
    yes_shares: f64,
    no_shares: f64,
}

/// Settlement bridge client.
pub struct HttpChainClient {
    http: Client,
    endpoint: String,
    api_key: Option<SecretString>,
}

impl HttpChainClient {
    pub fn new(endpoint: &str, api_key: Option<SecretString>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent("caliguland/0.1.0 (settlement-bridge)")
            .build()
            .context("Failed to build HTTP client for settlement bridge")?;

        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<T> {
        let request = match &self.api_key {
            Some(key) => request.bearer_auth(key.expose_secret()),
            None => request,
        };
        let resp = request
            .send()
            .await
            .with_context(|| format!("Settlement bridge request failed: {what}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Settlement bridge error {status} on {what}: {body}");
        }

        resp.json()
            .await
            .with_context(|| format!("Failed to parse settlement bridge response: {what}"))
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: serde_json::Value) -> Option<T> {
        let url = format!("{}/{path}", self.endpoint);
        debug!(url = %url, "Settlement bridge POST");
        match self.send(self.http.post(&url).json(&body), path).await {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(error = %e, path, "Settlement bridge unavailable");
                None
            }
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Option<T> {
        let url = format!("{}/{path}", self.endpoint);
        debug!(url = %url, "Settlement bridge GET");
        match self.send(self.http.get(&url), path).await {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(error = %e, path, "Settlement bridge unavailable");
                None
            }
        }
    }
}

#[async_trait]
impl ChainAdapter for HttpChainClient {
    async fn check_connection(&self) -> bool {
        let url = format!("{}/health", self.endpoint);
        match self.http.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!(error = %e, "Settlement bridge health check failed");
                false
            }
        }
    }

    async fn get_balance(&self, address: Option<String>) -> Option<f64> {
        let path = match address {
            Some(addr) => format!("balance/{addr}"),
            None => "balance".to_string(),
        };
        self.get::<BalanceResponse>(&path).await.map(|b| b.balance)
    }

    async fn commit_game(&self, session_id: &str, commitment_hash: &str) -> Option<TxHash> {
        self.post::<TxResponse>(
            "games/commit",
            json!({ "session_id": session_id, "commitment": commitment_hash }),
        )
        .await
        .map(|r| r.tx_hash)
    }

    async fn place_bet(
        &self,
        session_id: &str,
        agent_id: &str,
        outcome: Outcome,
        amount: f64,
    ) -> Option<TxHash> {
        self.post::<TxResponse>(
            "markets/bet",
            json!({
                "session_id": session_id,
                "agent": agent_id,
                "outcome": outcome,
                "amount": amount,
            }),
        )
        .await
        .map(|r| r.tx_hash)
    }

    async fn resolve_market(
        &self,
        session_id: &str,
        outcome: Outcome,
        salt: &str,
    ) -> Option<TxHash> {
        self.post::<TxResponse>(
            "markets/resolve",
            json!({ "session_id": session_id, "outcome": outcome, "salt": salt }),
        )
        .await
        .map(|r| r.tx_hash)
    }

    async fn claim_payout(&self, session_id: &str, agent_id: &str) -> Option<TxHash> {
        self.post::<TxResponse>(
            "markets/claim",
            json!({ "session_id": session_id, "agent": agent_id }),
        )
        .await
        .map(|r| r.tx_hash)
    }

    async fn get_market_state(&self, session_id: &str) -> Option<ChainMarketState> {
        self.get(&format!("markets/{session_id}")).await
    }

    async fn get_position(&self, session_id: &str, agent_id: &str) -> Option<Position> {
        self.get::<PositionResponse>(&format!("markets/{session_id}/positions/{agent_id}"))
            .await
            .map(|p| Position { yes_shares: p.yes_shares, no_shares: p.no_shares })
    }

    fn name(&self) -> &str {
        "settlement-bridge"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
