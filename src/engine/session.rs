//! A single game session and its public views.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use super::scenarios::Scenario;
use crate::market::MarketMaker;
use crate::oracle::{Attestation, OracleCommitment, Reveal};
use crate::types::{
    normalize_address, Agent, AgentId, AgentType, DirectMessage, GroupChat, InsiderClue,
    MarketSnapshot, Outcome, Payout, Phase, Position, Post, Rejection,
};

/// The running game. Owned by the engine, keyed by `id`.
#[derive(Debug)]
pub struct GameSession {
    pub(super) id: String,
    pub(super) scenario: Scenario,
    pub(super) phase: Phase,
    pub(super) current_day: u32,
    /// Ticks since the session started.
    pub(super) ticks: u64,
    pub(super) agents: BTreeMap<AgentId, Agent>,
    pub(super) market: MarketMaker,
    pub(super) feed: Vec<Post>,
    pub(super) direct_messages: Vec<DirectMessage>,
    pub(super) groups: HashMap<String, GroupChat>,
    pub(super) insider_clues: Vec<InsiderClue>,
    pub(super) betting_open: bool,
    pub(super) revealed: bool,
    pub(super) final_outcome: Option<Outcome>,
    pub(super) reveal: Option<Reveal>,
    pub(super) attestation: Option<Attestation>,
    pub(super) oracle: OracleCommitment,
    /// Set when the reveal failed verification. No payouts follow.
    pub(super) halted: bool,
    pub(super) debrief_remaining: u32,
    pub(super) payouts: Vec<Payout>,
    pub(super) started_at: DateTime<Utc>,
}

impl GameSession {
    pub(super) fn new(
        id: String,
        scenario: Scenario,
        agents: BTreeMap<AgentId, Agent>,
        market: MarketMaker,
        oracle: OracleCommitment,
    ) -> Self {
        Self {
            id,
            scenario,
            phase: Phase::Early,
            current_day: 1,
            ticks: 0,
            agents,
            market,
            feed: Vec::new(),
            direct_messages: Vec::new(),
            groups: HashMap::new(),
            insider_clues: Vec::new(),
            betting_open: true,
            revealed: false,
            final_outcome: None,
            reveal: None,
            attestation: None,
            oracle,
            halted: false,
            debrief_remaining: 0,
            payouts: Vec::new(),
            started_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn question(&self) -> &str {
        &self.scenario.question
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn current_day(&self) -> u32 {
        self.current_day
    }

    pub fn betting_open(&self) -> bool {
        self.betting_open
    }

    pub fn is_revealed(&self) -> bool {
        self.revealed
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Only set once the reveal verified.
    pub fn final_outcome(&self) -> Option<Outcome> {
        self.final_outcome
    }

    pub fn reveal(&self) -> Option<&Reveal> {
        self.reveal.as_ref()
    }

    pub fn commitment_hash(&self) -> &str {
        self.oracle.commitment_hash()
    }

    pub fn attestation(&self) -> Option<&Attestation> {
        self.attestation.as_ref()
    }

    pub fn agent(&self, agent_id: &str) -> Option<&Agent> {
        self.agents.get(&normalize_address(agent_id))
    }

    pub fn agents(&self) -> impl Iterator<Item = &Agent> {
        self.agents.values()
    }

    pub fn market(&self) -> &MarketMaker {
        &self.market
    }

    pub fn feed(&self) -> &[Post] {
        &self.feed
    }

    pub fn direct_messages(&self) -> &[DirectMessage] {
        &self.direct_messages
    }

    pub fn group(&self, group_id: &str) -> Option<&GroupChat> {
        self.groups.get(group_id)
    }

    pub fn insider_clues(&self) -> &[InsiderClue] {
        &self.insider_clues
    }

    pub fn payouts(&self) -> &[Payout] {
        &self.payouts
    }

    pub(super) fn require_agent(&self, agent_id: &str) -> Result<&Agent, Rejection> {
        self.agents
            .get(agent_id)
            .ok_or_else(|| Rejection::UnknownAgent(agent_id.to_string()))
    }

    pub(super) fn agent_mut(&mut self, agent_id: &str) -> Result<&mut Agent, Rejection> {
        self.agents
            .get_mut(agent_id)
            .ok_or_else(|| Rejection::UnknownAgent(agent_id.to_string()))
    }

    /// Trading is allowed only while betting is open in EARLY, MID or LATE.
    pub(super) fn ensure_trading(&self) -> Result<(), Rejection> {
        if !self.betting_open || self.halted {
            return Err(Rejection::BettingClosed);
        }
        match self.phase {
            Phase::Early | Phase::Mid | Phase::Late => Ok(()),
            other => Err(Rejection::WrongPhase(other)),
        }
    }

    /// Everyone holding a positive balance in the winning outcome.
    pub fn winners(&self) -> Vec<AgentId> {
        self.payouts
            .iter()
            .filter(|p| p.amount > 0.0)
            .map(|p| p.agent_id.clone())
            .collect()
    }

    /// Public view. The hidden outcome only appears after a verified reveal.
    pub fn view(&self, total_days: u32) -> SessionView {
        SessionView {
            session_id: self.id.clone(),
            question: self.scenario.question.clone(),
            description: self.scenario.description.clone(),
            phase: self.phase,
            day: self.current_day,
            total_days,
            betting_open: self.betting_open,
            revealed: self.revealed,
            halted: self.halted,
            outcome: self.final_outcome,
            commitment_hash: self.oracle.commitment_hash().to_string(),
            attestation: self.attestation.clone(),
            market: self.market.snapshot(),
            players: self
                .agents
                .values()
                .map(|a| PlayerView {
                    id: a.id.clone(),
                    name: a.name.clone(),
                    agent_type: a.agent_type,
                    balance: a.balance,
                    reputation: a.reputation,
                    wins: a.wins,
                })
                .collect(),
            feed_size: self.feed.len(),
            started_at: self.started_at,
        }
    }

    /// Private view for one agent: its holdings, inbox and groups.
    pub fn agent_view(&self, agent_id: &str) -> Result<AgentView, Rejection> {
        let id = normalize_address(agent_id);
        let agent = self.require_agent(&id)?.clone();
        let inbox = self
            .direct_messages
            .iter()
            .filter(|m| m.to == id || m.from == id)
            .cloned()
            .collect();
        let mut groups: Vec<GroupChat> = self
            .groups
            .values()
            .filter(|g| g.members.contains(&id))
            .cloned()
            .collect();
        groups.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(AgentView {
            position: self.market.position(&id),
            agent,
            direct_messages: inbox,
            groups,
        })
    }

    pub(super) fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.id.clone(),
            scenario_id: self.scenario.id.clone(),
            question: self.scenario.question.clone(),
            outcome: self.final_outcome,
            winners: self.winners(),
            total_volume: self.market.snapshot().total_volume,
            trades: self.market.ledger().len(),
            players: self.agents.len(),
            days_played: self.current_day,
            halted: self.halted,
            commitment_hash: self.oracle.commitment_hash().to_string(),
            started_at: self.started_at,
            archived_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerView {
    pub id: AgentId,
    pub name: String,
    pub agent_type: AgentType,
    pub balance: f64,
    pub reputation: f64,
    pub wins: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionView {
    pub session_id: String,
    pub question: String,
    pub description: String,
    pub phase: Phase,
    pub day: u32,
    pub total_days: u32,
    pub betting_open: bool,
    pub revealed: bool,
    pub halted: bool,
    pub outcome: Option<Outcome>,
    pub commitment_hash: String,
    pub attestation: Option<Attestation>,
    pub market: MarketSnapshot,
    pub players: Vec<PlayerView>,
    pub feed_size: usize,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentView {
    pub agent: Agent,
    pub position: Position,
    pub direct_messages: Vec<DirectMessage>,
    pub groups: Vec<GroupChat>,
}

/// What is left of a session after it is archived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub scenario_id: String,
    pub question: String,
    pub outcome: Option<Outcome>,
    pub winners: Vec<AgentId>,
    pub total_volume: f64,
    pub trades: usize,
    pub players: usize,
    pub days_played: u32,
    pub halted: bool,
    pub commitment_hash: String,
    pub started_at: DateTime<Utc>,
    pub archived_at: DateTime<Utc>,
}
