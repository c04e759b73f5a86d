//! Settlement-chain collaborator.
//!
//! Defines the `ChainAdapter` trait consumed by the game runtime. The
//! in-memory engine is the source of truth; the chain is synced after the
//! fact and every adapter call degrades to `None`/`false` instead of
//! failing, so the game keeps running with no chain at all.

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::types::{Outcome, Position};

/// Transaction hash returned by the chain.
pub type TxHash = String;

/// On-chain view of a session's market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainMarketState {
    pub yes_shares: f64,
    pub no_shares: f64,
    pub resolved: bool,
    pub outcome: Option<Outcome>,
}

/// Client-facing surface of the settlement contracts.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    async fn check_connection(&self) -> bool;

    /// Balance of `address`, or of the operator account when `None`.
    async fn get_balance(&self, address: Option<String>) -> Option<f64>;

    async fn commit_game(&self, session_id: &str, commitment_hash: &str) -> Option<TxHash>;

    async fn place_bet(
        &self,
        session_id: &str,
        agent_id: &str,
        outcome: Outcome,
        amount: f64,
    ) -> Option<TxHash>;

    async fn resolve_market(&self, session_id: &str, outcome: Outcome, salt: &str)
        -> Option<TxHash>;

    async fn claim_payout(&self, session_id: &str, agent_id: &str) -> Option<TxHash>;

    async fn get_market_state(&self, session_id: &str) -> Option<ChainMarketState>;

    async fn get_position(&self, session_id: &str, agent_id: &str) -> Option<Position>;

    /// Adapter name for logging.
    fn name(&self) -> &str;
}

/// Work queued by the engine for the chain, replayed after the engine lock
/// is released.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ChainOp {
    CommitGame {
        session_id: String,
        commitment_hash: String,
    },
    PlaceBet {
        session_id: String,
        agent_id: String,
        outcome: Outcome,
        amount: f64,
    },
    ResolveMarket {
        session_id: String,
        outcome: Outcome,
        salt: String,
    },
    ClaimPayout {
        session_id: String,
        agent_id: String,
    },
}

/// Outcome of replaying a batch of [`ChainOp`]s.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub submitted: Vec<TxHash>,
    pub failed: usize,
}

/// Replay `ops` in order against `adapter`. Failures are logged and counted,
/// never retried or rolled back.
pub async fn sync(adapter: &dyn ChainAdapter, ops: Vec<ChainOp>) -> SyncReport {
    let mut report = SyncReport::default();
    if ops.is_empty() {
        return report;
    }

    for op in ops {
        let tx = match &op {
            ChainOp::CommitGame { session_id, commitment_hash } => {
                adapter.commit_game(session_id, commitment_hash).await
            }
            ChainOp::PlaceBet { session_id, agent_id, outcome, amount } => {
                adapter.place_bet(session_id, agent_id, *outcome, *amount).await
            }
            ChainOp::ResolveMarket { session_id, outcome, salt } => {
                adapter.resolve_market(session_id, *outcome, salt).await
            }
            ChainOp::ClaimPayout { session_id, agent_id } => {
                adapter.claim_payout(session_id, agent_id).await
            }
        };
        match tx {
            Some(hash) => {
                debug!(adapter = adapter.name(), tx = %hash, ?op, "Chain op submitted");
                report.submitted.push(hash);
            }
            None => {
                warn!(adapter = adapter.name(), ?op, "Chain op failed, continuing in-memory");
                report.failed += 1;
            }
        }
    }

    info!(
        adapter = adapter.name(),
        submitted = report.submitted.len(),
        failed = report.failed,
        "Chain sync complete"
    );
    report
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
