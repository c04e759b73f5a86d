//! Commitment attestation.
//!
//! An attestor signs `commitment_hash ‖ session_id` so observers can check
//! that the digest existed before betting opened. Production deployments put
//! this behind a TEE; [`LocalAttestor`] signs with an in-process ed25519 key.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Keypair, PublicKey, SecretKey, Signature, Signer, Verifier};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::PublishedCommitment;

/// Signed statement over a published commitment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attestation {
    /// Hex-encoded ed25519 public key of the attestor.
    pub attestor: String,
    /// Hex-encoded signature.
    pub signature: String,
    pub attested_at: DateTime<Utc>,
}

impl Attestation {
    /// Check the signature against `published`.
    pub fn verify(&self, published: &PublishedCommitment) -> bool {
        let Ok(pk_bytes) = hex::decode(&self.attestor) else {
            return false;
        };
        let Ok(sig_bytes) = hex::decode(&self.signature) else {
            return false;
        };
        let Ok(public) = PublicKey::from_bytes(&pk_bytes) else {
            return false;
        };
        let Ok(signature) = Signature::try_from(sig_bytes.as_slice()) else {
            return false;
        };
        public
            .verify(&attestation_message(published), &signature)
            .is_ok()
    }
}

fn attestation_message(published: &PublishedCommitment) -> Vec<u8> {
    let mut msg = published.commitment_hash.as_bytes().to_vec();
    msg.extend_from_slice(published.session_id.as_bytes());
    msg
}

/// Anything able to anchor a commitment.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Attestor: Send + Sync {
    async fn attest(&self, published: &PublishedCommitment) -> Result<Attestation>;
}

/// In-process ed25519 attestor.
pub struct LocalAttestor {
    keypair: Keypair,
}

impl LocalAttestor {
    pub fn from_secret(secret: &[u8; 32]) -> Result<Self> {
        let secret = SecretKey::from_bytes(secret)
            .map_err(|e| anyhow::anyhow!("{e}"))
            .context("Invalid attestor secret key")?;
        let public: PublicKey = (&secret).into();
        Ok(Self { keypair: Keypair { secret, public } })
    }

    /// Attestor with a key drawn from the OS RNG.
    pub fn generate() -> Result<Self> {
        let mut secret = [0u8; 32];
        OsRng.fill_bytes(&mut secret);
        Self::from_secret(&secret)
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.keypair.public.to_bytes())
    }

    pub fn sign(&self, published: &PublishedCommitment) -> Attestation {
        let signature = self.keypair.sign(&attestation_message(published));
        Attestation {
            attestor: self.public_key_hex(),
            signature: hex::encode(signature.to_bytes()),
            attested_at: Utc::now(),
        }
    }
}

#[async_trait]
impl Attestor for LocalAttestor {
    async fn attest(&self, published: &PublishedCommitment) -> Result<Attestation> {
        Ok(self.sign(published))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
