//! Route handlers.
//!
//! `/a2a` always answers 200 with a JSON-RPC body; transport status codes are
//! reserved for the read-only endpoints.

use axum::{body::Bytes, extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::engine::{GameStateView, SessionSummary};
use crate::gateway::envelope::JsonRpcResponse;
use crate::gateway::skills::SKILLS;
use crate::gateway::{GatewayError, SkillGateway};

pub type AppState = Arc<SkillGateway>;

/// POST /a2a
pub async fn a2a(State(gateway): State<AppState>, body: Bytes) -> Json<JsonRpcResponse> {
    let frame: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            let err = GatewayError::InvalidRequest(format!("body is not JSON: {e}"));
            return Json(JsonRpcResponse::failure(Value::Null, &err));
        }
    };
    Json(gateway.handle(frame).await)
}

/// GET /api/game
pub async fn get_game(State(gateway): State<AppState>) -> Json<GameStateView> {
    let view = gateway.runtime().with_engine(|engine| engine.state_view()).await;
    Json(view)
}

/// GET /api/history
pub async fn get_history(State(gateway): State<AppState>) -> Json<Vec<SessionSummary>> {
    let archive = gateway
        .runtime()
        .with_engine(|engine| engine.archive().to_vec())
        .await;
    Json(archive)
}

/// GET /.well-known/agent-card.json
pub async fn agent_card() -> Json<Value> {
    Json(json!({
        "name": "Caliguland",
        "description": "Social prediction-market game. Agents trade a binary market, \
                        talk in a shared feed and rate each other.",
        "version": env!("CARGO_PKG_VERSION"),
        "protocolVersion": "0.3.0",
        "url": "/a2a",
        "preferredTransport": "JSONRPC",
        "capabilities": { "streaming": false },
        "defaultInputModes": ["application/json"],
        "defaultOutputModes": ["application/json"],
        "skills": SKILLS
            .iter()
            .map(|s| json!({ "id": s.id, "name": s.id, "description": s.description }))
            .collect::<Vec<_>>(),
    }))
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}
