//! In-memory chain adapter for integration testing.
//!
//! Records every call in order and hands out sequential fake transaction
//! hashes. Can be switched into a failing mode to check that the game keeps
//! running when the chain is down.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use caliguland::chain::{ChainAdapter, ChainMarketState, TxHash};
use caliguland::types::{Outcome, Position};

#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Commit { session_id: String, commitment_hash: String },
    Bet { agent_id: String, outcome: Outcome, amount: f64 },
    Resolve { outcome: Outcome, salt: String },
    Claim { agent_id: String },
}

#[derive(Default)]
pub struct RecordingChain {
    calls: Mutex<Vec<Recorded>>,
    offline: AtomicBool,
}

impl RecordingChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail.
    pub fn go_offline(&self) {
        self.offline.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Recorded> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Recorded) -> Option<TxHash> {
        if self.offline.load(Ordering::SeqCst) {
            return None;
        }
        let mut calls = self.calls.lock().unwrap();
        calls.push(call);
        Some(format!("0xtx{:04}", calls.len()))
    }
}

#[async_trait]
impl ChainAdapter for RecordingChain {
    async fn check_connection(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }

    async fn get_balance(&self, _address: Option<String>) -> Option<f64> {
        None
    }

    async fn commit_game(&self, session_id: &str, commitment_hash: &str) -> Option<TxHash> {
        self.record(Recorded::Commit {
            session_id: session_id.to_string(),
            commitment_hash: commitment_hash.to_string(),
        })
    }

    async fn place_bet(
        &self,
        _session_id: &str,
        agent_id: &str,
        outcome: Outcome,
        amount: f64,
    ) -> Option<TxHash> {
        self.record(Recorded::Bet { agent_id: agent_id.to_string(), outcome, amount })
    }

    async fn resolve_market(&self, _session_id: &str, outcome: Outcome, salt: &str) -> Option<TxHash> {
        self.record(Recorded::Resolve { outcome, salt: salt.to_string() })
    }

    async fn claim_payout(&self, _session_id: &str, agent_id: &str) -> Option<TxHash> {
        self.record(Recorded::Claim { agent_id: agent_id.to_string() })
    }

    async fn get_market_state(&self, _session_id: &str) -> Option<ChainMarketState> {
        None
    }

    async fn get_position(&self, _session_id: &str, _agent_id: &str) -> Option<Position> {
        None
    }

    fn name(&self) -> &str {
        "recording"
    }
}
