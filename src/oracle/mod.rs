//! Commit-reveal oracle binding the hidden outcome before play starts.
//!
//! At session start the engine draws a random salt and publishes
//! `SHA-256(outcome ‖ salt ‖ session_id)`. The salt never leaves this module
//! until [`OracleCommitment::reveal`] runs. Anyone holding the published
//! digest can check a [`Reveal`] with [`Reveal::verify`].

pub mod attest;

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::{debug, error};

use crate::types::Outcome;

pub use attest::{Attestation, Attestor, LocalAttestor};

/// Salt length in bytes (hex-encoded to twice this).
pub const SALT_LEN: usize = 32;

/// Hash the outcome, hex salt and session id into a hex digest.
pub fn compute_commitment(outcome: Outcome, salt_hex: &str, session_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(outcome.as_str().as_bytes());
    hasher.update(salt_hex.as_bytes());
    hasher.update(session_id.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generate a fresh hex-encoded salt from the OS RNG.
pub fn generate_salt() -> String {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    hex::encode(salt)
}

/// Reveal hash did not match the published commitment. Fatal: payout must
/// not proceed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Oracle integrity violation in session {session_id}: published {published}, recomputed {recomputed}")]
pub struct IntegrityViolation {
    pub session_id: String,
    pub published: String,
    pub recomputed: String,
}

/// What the world sees before reveal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedCommitment {
    pub session_id: String,
    pub commitment_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Disclosed outcome and salt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reveal {
    pub session_id: String,
    pub outcome: Outcome,
    pub salt: String,
}

impl Reveal {
    /// Recompute the digest and compare against `published`.
    pub fn verify(&self, published: &str) -> Result<(), IntegrityViolation> {
        let recomputed = compute_commitment(self.outcome, &self.salt, &self.session_id);
        if recomputed.eq_ignore_ascii_case(published) {
            Ok(())
        } else {
            Err(IntegrityViolation {
                session_id: self.session_id.clone(),
                published: published.to_string(),
                recomputed,
            })
        }
    }
}

/// Server-side half of the commitment. Holds the salt.
pub struct OracleCommitment {
    session_id: String,
    outcome: Outcome,
    salt: SecretString,
    commitment_hash: String,
    created_at: DateTime<Utc>,
    revealed: bool,
}

impl fmt::Debug for OracleCommitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OracleCommitment")
            .field("session_id", &self.session_id)
            .field("commitment_hash", &self.commitment_hash)
            .field("revealed", &self.revealed)
            .finish_non_exhaustive()
    }
}

impl OracleCommitment {
    /// Commit to `outcome` with a freshly generated salt.
    pub fn commit(session_id: &str, outcome: Outcome) -> Self {
        Self::commit_with_salt(session_id, outcome, generate_salt())
    }

    /// Commit with a caller-supplied salt.
    pub fn commit_with_salt(session_id: &str, outcome: Outcome, salt_hex: String) -> Self {
        let commitment_hash = compute_commitment(outcome, &salt_hex, session_id);
        debug!(session_id, commitment = %commitment_hash, "Oracle commitment created");
        Self {
            session_id: session_id.to_string(),
            outcome,
            salt: SecretString::new(salt_hex),
            commitment_hash,
            created_at: Utc::now(),
            revealed: false,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn commitment_hash(&self) -> &str {
        &self.commitment_hash
    }

    pub fn is_revealed(&self) -> bool {
        self.revealed
    }

    pub fn published(&self) -> PublishedCommitment {
        PublishedCommitment {
            session_id: self.session_id.clone(),
            commitment_hash: self.commitment_hash.clone(),
            created_at: self.created_at,
        }
    }

    /// Disclose outcome and salt, checked against the stored digest.
    /// Callers must halt resolution on `Err`.
    pub fn reveal(&mut self) -> Result<Reveal, IntegrityViolation> {
        self.revealed = true;
        let reveal = Reveal {
            session_id: self.session_id.clone(),
            outcome: self.outcome,
            salt: self.salt.expose_secret().clone(),
        };
        if let Err(violation) = reveal.verify(&self.commitment_hash) {
            error!(
                session_id = %self.session_id,
                published = %violation.published,
                recomputed = %violation.recomputed,
                "Oracle reveal does not match published commitment"
            );
            return Err(violation);
        }
        Ok(reveal)
    }

    /// Replace the stored salt. Only used to exercise the mismatch path.
    #[cfg(test)]
    pub(crate) fn tamper_salt(&mut self, salt_hex: &str) {
        self.salt = SecretString::new(salt_hex.to_string());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
