//! JSON-RPC frames and the signed skill envelope.
//!
//! A request carries one A2A message whose data part holds
//! `{skillId, agentAddress, signature, timestamp, ...skillData}`. The
//! signature is ed25519 over the canonical payload
//! `{messageId, timestamp, skillId, data}` where `data` is the skill data
//! with the four auth fields removed. Addresses are `0x` + hex public key.

use anyhow::{Context, Result};
use ed25519_dalek::{Keypair, PublicKey, SecretKey, Signature, Signer, Verifier};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::GatewayError;
use crate::types::{normalize_address, AgentId};

pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
pub const SIGNATURE_FAILED: i64 = -32001;

/// Data-part keys that authenticate the envelope and are excluded from the
/// signed payload.
pub const AUTH_FIELDS: [&str; 4] = ["skillId", "agentAddress", "signature", "timestamp"];

pub const METHOD_SEND: &str = "message/send";
pub const METHOD_STREAM: &str = "message/stream";

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self { jsonrpc: "2.0".into(), id, result: Some(result), error: None }
    }

    pub fn failure(id: Value, err: &GatewayError) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: None,
            error: Some(JsonRpcError { code: err.code(), message: err.to_string() }),
        }
    }
}

/// Authenticated fields pulled out of a request, not yet verified.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedEnvelope {
    pub message_id: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub skill_id: String,
    pub agent_address: String,
    pub signature: String,
    /// Skill data with the auth fields stripped.
    pub data: Map<String, Value>,
}

impl SignedEnvelope {
    /// Pull the envelope out of `params.message`.
    pub fn from_params(params: Option<&Value>) -> Result<Self, GatewayError> {
        let message = params
            .and_then(|p| p.get("message"))
            .and_then(Value::as_object)
            .ok_or_else(|| GatewayError::InvalidParams("missing params.message".into()))?;
        let message_id = message
            .get("messageId")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| GatewayError::InvalidParams("missing messageId".into()))?;
        let parts = message
            .get("parts")
            .and_then(Value::as_array)
            .ok_or_else(|| GatewayError::InvalidParams("missing message parts".into()))?;
        let mut data = parts
            .iter()
            .find(|p| p.get("kind").and_then(Value::as_str) == Some("data"))
            .and_then(|p| p.get("data"))
            .and_then(Value::as_object)
            .cloned()
            .ok_or_else(|| GatewayError::InvalidParams("missing data part".into()))?;

        let skill_id = take_str(&mut data, "skillId")?;
        let agent_address = take_str(&mut data, "agentAddress")?;
        let signature = take_str(&mut data, "signature")?;
        let timestamp = data
            .remove("timestamp")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| GatewayError::InvalidParams("missing or non-integer timestamp".into()))?;

        Ok(Self {
            message_id: message_id.to_string(),
            timestamp,
            skill_id,
            agent_address,
            signature,
            data,
        })
    }

    pub fn canonical_bytes(&self) -> Vec<u8> {
        canonical_payload(&self.message_id, self.timestamp, &self.skill_id, &self.data)
    }

    /// Verify the signature against the claimed address.
    pub fn verify(&self) -> Result<AgentId, GatewayError> {
        let public = parse_address(&self.agent_address)?;
        let sig_bytes = hex::decode(self.signature.trim_start_matches("0x"))
            .map_err(|_| GatewayError::SignatureFailed("signature is not hex".into()))?;
        let signature = Signature::try_from(sig_bytes.as_slice())
            .map_err(|_| GatewayError::SignatureFailed("malformed signature".into()))?;
        public
            .verify(&self.canonical_bytes(), &signature)
            .map_err(|_| GatewayError::SignatureFailed("signature does not match signer".into()))?;
        Ok(normalize_address(&self.agent_address))
    }
}

fn take_str(data: &mut Map<String, Value>, key: &str) -> Result<String, GatewayError> {
    match data.remove(key) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s),
        _ => Err(GatewayError::InvalidParams(format!("missing {key}"))),
    }
}

fn parse_address(address: &str) -> Result<PublicKey, GatewayError> {
    let hex_part = address
        .trim()
        .strip_prefix("0x")
        .or_else(|| address.trim().strip_prefix("0X"))
        .ok_or_else(|| GatewayError::SignatureFailed("address must start with 0x".into()))?;
    let bytes = hex::decode(hex_part)
        .map_err(|_| GatewayError::SignatureFailed("address is not hex".into()))?;
    PublicKey::from_bytes(&bytes)
        .map_err(|_| GatewayError::SignatureFailed("address is not a public key".into()))
}

/// Bytes covered by the signature. `serde_json` maps keep keys sorted, so
/// the encoding is deterministic.
pub fn canonical_payload(
    message_id: &str,
    timestamp: i64,
    skill_id: &str,
    data: &Map<String, Value>,
) -> Vec<u8> {
    let mut stripped = data.clone();
    for field in AUTH_FIELDS {
        stripped.remove(field);
    }
    let payload = json!({
        "messageId": message_id,
        "timestamp": timestamp,
        "skillId": skill_id,
        "data": Value::Object(stripped),
    });
    payload.to_string().into_bytes()
}

// ---------------------------------------------------------------------------
// Signing (client side)
// ---------------------------------------------------------------------------

/// An agent's signing key.
pub struct AgentKey {
    keypair: Keypair,
}

impl AgentKey {
    pub fn from_secret(secret: &[u8; 32]) -> Result<Self> {
        let secret = SecretKey::from_bytes(secret)
            .map_err(|e| anyhow::anyhow!("{e}"))
            .context("Invalid agent secret key")?;
        let public: PublicKey = (&secret).into();
        Ok(Self { keypair: Keypair { secret, public } })
    }

    pub fn generate() -> Result<Self> {
        let mut secret = [0u8; 32];
        OsRng.fill_bytes(&mut secret);
        Self::from_secret(&secret)
    }

    /// `0x` + lower-case hex public key.
    pub fn address(&self) -> AgentId {
        format!("0x{}", hex::encode(self.keypair.public.to_bytes()))
    }

    /// Build the data part for `skill_id`, auth fields included.
    pub fn sign(
        &self,
        message_id: &str,
        timestamp: i64,
        skill_id: &str,
        data: Map<String, Value>,
    ) -> Map<String, Value> {
        let signature = self
            .keypair
            .sign(&canonical_payload(message_id, timestamp, skill_id, &data));
        let mut out = data;
        out.insert("skillId".into(), Value::from(skill_id));
        out.insert("agentAddress".into(), Value::from(self.address()));
        out.insert("signature".into(), Value::from(hex::encode(signature.to_bytes())));
        out.insert("timestamp".into(), Value::from(timestamp));
        out
    }

    /// A complete `message/send` request.
    pub fn request(&self, message_id: &str, timestamp: i64, skill_id: &str, data: Value) -> Value {
        let data = match data {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        json!({
            "jsonrpc": "2.0",
            "method": METHOD_SEND,
            "id": message_id,
            "params": {
                "message": {
                    "role": "user",
                    "kind": "message",
                    "messageId": message_id,
                    "parts": [{
                        "kind": "data",
                        "data": Value::Object(self.sign(message_id, timestamp, skill_id, data)),
                    }],
                },
            },
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
