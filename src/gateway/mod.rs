//! Signed skill gateway.
//!
//! Every externally submitted action arrives as a JSON-RPC `message/send`
//! (or `message/stream`) frame and goes through the same pipeline, stopping
//! at the first failure:
//!
//! 1. frame and envelope structure
//! 2. freshness against the server clock
//! 3. ed25519 signature over the canonical payload
//! 4. identity registry, when one is configured
//! 5. replay of the message id
//! 6. skill parse and dispatch into the engine
//!
//! Failures map to fixed JSON-RPC error codes. Dispatch results, including
//! business rejections, are always returned as `{success, message, data}`.

pub mod envelope;
pub mod registry;
pub mod replay;
pub mod skills;

use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::engine::runtime::GameRuntime;
use envelope::{JsonRpcRequest, JsonRpcResponse, SignedEnvelope};
use registry::IdentityRegistry;
use replay::ReplayGuard;
use skills::{Skill, SkillResult};

pub use envelope::AgentKey;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Message expired: timestamp is {skew_secs}s away from server time")]
    Stale { skew_secs: i64 },

    #[error("Duplicate message id: {0}")]
    Replay(String),

    #[error("Signature verification failed: {0}")]
    SignatureFailed(String),

    #[error("Agent {0} is not registered")]
    NotRegistered(String),

    /// Detail is logged, never returned.
    #[error("Internal error")]
    Internal(String),
}

impl GatewayError {
    pub fn code(&self) -> i64 {
        match self {
            GatewayError::InvalidRequest(_) | GatewayError::Stale { .. } | GatewayError::Replay(_) => {
                envelope::INVALID_REQUEST
            }
            GatewayError::MethodNotFound(_) => envelope::METHOD_NOT_FOUND,
            GatewayError::InvalidParams(_) => envelope::INVALID_PARAMS,
            GatewayError::SignatureFailed(_) | GatewayError::NotRegistered(_) => {
                envelope::SIGNATURE_FAILED
            }
            GatewayError::Internal(_) => envelope::INTERNAL_ERROR,
        }
    }

    /// Authentication failures, as opposed to malformed input.
    pub fn is_security_failure(&self) -> bool {
        matches!(
            self,
            GatewayError::Stale { .. }
                | GatewayError::Replay(_)
                | GatewayError::SignatureFailed(_)
                | GatewayError::NotRegistered(_)
        )
    }
}

pub struct SkillGateway {
    runtime: Arc<GameRuntime>,
    registry: Option<Arc<dyn IdentityRegistry>>,
    freshness_ms: i64,
    replay: Mutex<ReplayGuard>,
}

impl SkillGateway {
    pub fn new(runtime: Arc<GameRuntime>, config: &GatewayConfig) -> Self {
        Self {
            runtime,
            registry: None,
            freshness_ms: (config.freshness_window_secs as i64).saturating_mul(1_000),
            replay: Mutex::new(ReplayGuard::new(config.freshness_window_secs)),
        }
    }

    pub fn with_registry(mut self, registry: Arc<dyn IdentityRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn runtime(&self) -> &Arc<GameRuntime> {
        &self.runtime
    }

    /// Handle one JSON-RPC frame against the current server time.
    pub async fn handle(&self, body: Value) -> JsonRpcResponse {
        self.handle_at(body, Utc::now().timestamp_millis()).await
    }

    /// Handle one frame as if the server clock read `now_ms`.
    pub async fn handle_at(&self, body: Value, now_ms: i64) -> JsonRpcResponse {
        let id = body.get("id").cloned().unwrap_or(Value::Null);
        match self.process(body, now_ms).await {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(err) => {
                match &err {
                    GatewayError::Internal(detail) => {
                        warn!(code = err.code(), detail = %detail, "Skill request failed internally")
                    }
                    e if e.is_security_failure() => {
                        warn!(code = err.code(), error = %err, "Skill request rejected")
                    }
                    _ => debug!(code = err.code(), error = %err, "Malformed skill request"),
                }
                JsonRpcResponse::failure(id, &err)
            }
        }
    }

    async fn process(&self, body: Value, now_ms: i64) -> Result<Value, GatewayError> {
        let request: JsonRpcRequest = serde_json::from_value(body)
            .map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;
        if request.jsonrpc != "2.0" {
            return Err(GatewayError::InvalidRequest(format!(
                "unsupported jsonrpc version {}",
                request.jsonrpc
            )));
        }
        if request.method != envelope::METHOD_SEND && request.method != envelope::METHOD_STREAM {
            return Err(GatewayError::MethodNotFound(request.method));
        }

        let envelope = SignedEnvelope::from_params(request.params.as_ref())?;

        let skew_ms = (now_ms - envelope.timestamp).abs();
        if skew_ms > self.freshness_ms {
            return Err(GatewayError::Stale { skew_secs: skew_ms / 1_000 });
        }

        let agent_id = envelope.verify()?;
        self.check_registry(&agent_id).await?;

        let fresh_id = self
            .replay
            .lock()
            .await
            .check_and_record(&envelope.message_id, envelope.timestamp, now_ms);
        if !fresh_id {
            return Err(GatewayError::Replay(envelope.message_id));
        }

        let skill = Skill::parse(&envelope.skill_id, &envelope.data)?;
        let query = skill.is_query();
        let result = self
            .runtime
            .with_engine(|engine| skills::dispatch(engine, &agent_id, skill))
            .await;

        if query {
            debug!(agent_id = %agent_id, skill = %envelope.skill_id, "Query served");
        } else {
            info!(
                agent_id = %agent_id,
                skill = %envelope.skill_id,
                success = result.success,
                "Skill dispatched"
            );
        }
        reply(&result)
    }

    /// Unreachable registry: allow. Explicit "not registered": reject.
    async fn check_registry(&self, agent_id: &str) -> Result<(), GatewayError> {
        let Some(registry) = &self.registry else {
            return Ok(());
        };
        match registry.is_registered(agent_id).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(GatewayError::NotRegistered(agent_id.to_string())),
            Err(e) => {
                warn!(agent_id, error = %e, "Identity registry unavailable, allowing request");
                Ok(())
            }
        }
    }
}

/// Wrap a dispatch result as an A2A agent message.
fn reply(result: &SkillResult) -> Result<Value, GatewayError> {
    let data = serde_json::to_value(result).map_err(|e| GatewayError::Internal(e.to_string()))?;
    Ok(json!({
        "kind": "message",
        "role": "agent",
        "messageId": uuid::Uuid::new_v4().to_string(),
        "parts": [{ "kind": "data", "data": data }],
    }))
}

/// The `{success, message, data}` body inside a gateway result.
pub fn skill_result(result: &Value) -> Option<SkillResult> {
    let data = result.get("parts")?.get(0)?.get("data")?;
    serde_json::from_value(data.clone()).ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
