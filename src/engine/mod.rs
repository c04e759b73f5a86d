//! Session engine: the single authority over lobby, phases and play.
//!
//! The engine is synchronous. Every public method takes `&mut self`, applies
//! its change completely or returns a [`Rejection`], and then broadcasts the
//! delta. Network work (chain sync, attestation) is never performed here: it
//! is queued in the [`Outbox`] and drained by the runtime after the engine
//! lock is released.
//!
//! Phase progression is driven only by [`SessionEngine::tick`]:
//!
//! ```text
//! LOBBY -> EARLY -> MID -> LATE -> REVEAL -> ENDED -> (archive) -> LOBBY
//! ```

pub mod events;
pub mod runtime;
pub mod scenarios;
pub mod session;
mod social;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, error, info, warn};

use crate::chain::ChainOp;
use crate::config::GameConfig;
use crate::market::{lmsr, MarketMaker};
use crate::oracle::{Attestation, IntegrityViolation, OracleCommitment, PublishedCommitment};
use crate::reputation::{ReputationLedger, ReputationScore};
use crate::types::{
    normalize_address, Agent, AgentId, AgentType, Bet, DirectMessage, Fill, InsiderClue,
    MarketSnapshot, Outcome, Phase, Position, Post, PostKind, Rejection, FeedbackCategory,
};

pub use events::{Broadcaster, GameEvent};
pub use scenarios::Scenario;
pub use session::{AgentView, GameSession, PlayerView, SessionSummary, SessionView};

/// Fatal engine conditions. Business refusals are [`Rejection`]s instead.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Integrity(#[from] IntegrityViolation),
}

/// External work queued by the engine.
#[derive(Debug, Default)]
pub struct Outbox {
    pub chain: Vec<ChainOp>,
    pub attest: Vec<PublishedCommitment>,
}

impl Outbox {
    pub fn is_empty(&self) -> bool {
        self.chain.is_empty() && self.attest.is_empty()
    }
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub session_id: Option<String>,
    pub phase: Option<Phase>,
    pub day: u32,
    pub started: bool,
    pub day_advanced: bool,
    pub resolved: bool,
    pub archived: bool,
}

/// Result of an executed trade, as seen by the trader.
#[derive(Debug, Clone, Serialize)]
pub struct TradeReceipt {
    pub fill: Fill,
    pub balance: f64,
    pub position: Position,
    pub market: MarketSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct LobbyEntry {
    pub id: AgentId,
    pub name: String,
    pub agent_type: AgentType,
}

/// Everything a client may see about the engine.
#[derive(Debug, Clone, Serialize)]
pub struct GameStateView {
    pub phase: Phase,
    pub lobby: Vec<LobbyEntry>,
    pub min_players: usize,
    pub max_players: usize,
    pub session: Option<SessionView>,
    pub archived_sessions: usize,
}

pub struct SessionEngine {
    config: GameConfig,
    lobby: BTreeMap<AgentId, Agent>,
    session: Option<GameSession>,
    archive: Vec<SessionSummary>,
    /// Everyone who has sat in a session roster, including finished ones.
    past_players: HashSet<AgentId>,
    reputation: ReputationLedger,
    broadcaster: Broadcaster,
    rng: StdRng,
    queued_scenario: Option<Scenario>,
    outbox: Outbox,
}

impl SessionEngine {
    pub fn new(config: GameConfig, broadcaster: Broadcaster) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            lobby: BTreeMap::new(),
            session: None,
            archive: Vec::new(),
            past_players: HashSet::new(),
            reputation: ReputationLedger::new(),
            broadcaster,
            rng,
            queued_scenario: None,
            outbox: Outbox::default(),
        }
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    fn emit(&self, event: GameEvent) {
        debug!(kind = event.kind(), "Broadcast");
        (self.broadcaster)(&event);
    }

    fn emit_all(&self, events: Vec<GameEvent>) {
        for event in events {
            self.emit(event);
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn phase(&self) -> Phase {
        self.session.as_ref().map(|s| s.phase).unwrap_or(Phase::Lobby)
    }

    pub fn session(&self) -> Option<&GameSession> {
        self.session.as_ref()
    }

    pub fn lobby(&self) -> impl Iterator<Item = &Agent> {
        self.lobby.values()
    }

    pub fn archive(&self) -> &[SessionSummary] {
        &self.archive
    }

    pub fn reputation(&self) -> &ReputationLedger {
        &self.reputation
    }

    pub fn reputation_mut(&mut self) -> &mut ReputationLedger {
        &mut self.reputation
    }

    /// Reputation for `agent_id`, neutral if nobody rated it yet.
    pub fn reputation_of(&self, agent_id: &str) -> ReputationScore {
        self.reputation
            .score(agent_id)
            .cloned()
            .unwrap_or_else(|| ReputationScore::neutral(&normalize_address(agent_id)))
    }

    pub fn state_view(&self) -> GameStateView {
        GameStateView {
            phase: self.phase(),
            lobby: self
                .lobby
                .values()
                .map(|a| LobbyEntry {
                    id: a.id.clone(),
                    name: a.name.clone(),
                    agent_type: a.agent_type,
                })
                .collect(),
            min_players: self.config.min_players,
            max_players: self.config.max_players,
            session: self.session.as_ref().map(|s| s.view(self.config.total_days)),
            archived_sessions: self.archive.len(),
        }
    }

    pub fn agent_view(&self, agent_id: &str) -> Result<AgentView, Rejection> {
        self.session
            .as_ref()
            .ok_or(Rejection::NoActiveGame)?
            .agent_view(agent_id)
    }

    /// Most recent `limit` feed posts, oldest first.
    pub fn feed(&self, limit: usize) -> Vec<Post> {
        match &self.session {
            Some(s) => {
                let start = s.feed.len().saturating_sub(limit);
                s.feed[start..].to_vec()
            }
            None => Vec::new(),
        }
    }

    pub fn market_snapshot(&self) -> Result<MarketSnapshot, Rejection> {
        Ok(self.session.as_ref().ok_or(Rejection::NoActiveGame)?.market.snapshot())
    }

    /// Cost of buying `shares` of `outcome` now.
    pub fn quote(&self, outcome: Outcome, shares: f64) -> Result<f64, Rejection> {
        if !shares.is_finite() || shares <= 0.0 {
            return Err(Rejection::InvalidAmount(shares));
        }
        Ok(self.session.as_ref().ok_or(Rejection::NoActiveGame)?.market.quote(outcome, shares))
    }

    /// Shares of `outcome` that `amount` currency buys now.
    pub fn quote_spend(&self, outcome: Outcome, amount: f64) -> Result<f64, Rejection> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(Rejection::InvalidAmount(amount));
        }
        Ok(self
            .session
            .as_ref()
            .ok_or(Rejection::NoActiveGame)?
            .market
            .quote_spend(outcome, amount))
    }

    // -----------------------------------------------------------------------
    // Lobby
    // -----------------------------------------------------------------------

    /// Add an agent to the waiting lobby. Returns the lobby size.
    pub fn join_lobby(
        &mut self,
        agent_id: &str,
        name: &str,
        agent_type: AgentType,
    ) -> Result<usize, Rejection> {
        let id = normalize_address(agent_id);
        let in_session = self.session.as_ref().is_some_and(|s| s.agents.contains_key(&id));
        if in_session || self.lobby.contains_key(&id) {
            return Err(Rejection::AlreadyJoined(id));
        }
        if self.lobby.len() >= self.config.max_players {
            return Err(Rejection::LobbyFull { max: self.config.max_players });
        }

        let name = if name.trim().is_empty() { id.as_str() } else { name.trim() };
        let mut agent = Agent::new(&id, name, agent_type, self.config.starting_balance);
        agent.reputation = self.reputation.overall(&id);
        let name = agent.name.clone();
        self.lobby.insert(id.clone(), agent);
        let lobby_size = self.lobby.len();

        info!(agent_id = %id, lobby_size, "Agent joined lobby");
        self.emit(GameEvent::LobbyJoined { agent_id: id, name, lobby_size });
        Ok(lobby_size)
    }

    /// Remove an agent from the waiting lobby. Players already in a session
    /// cannot leave it.
    pub fn leave_lobby(&mut self, agent_id: &str) -> Result<usize, Rejection> {
        let id = normalize_address(agent_id);
        if self.lobby.remove(&id).is_none() {
            return Err(Rejection::UnknownAgent(id));
        }
        let lobby_size = self.lobby.len();
        info!(agent_id = %id, lobby_size, "Agent left lobby");
        self.emit(GameEvent::LobbyLeft { agent_id: id, lobby_size });
        Ok(lobby_size)
    }

    /// Force the scenario used by the next session.
    pub fn queue_scenario(&mut self, scenario: Scenario) {
        info!(scenario = %scenario.id, "Scenario queued for next session");
        self.queued_scenario = Some(scenario);
    }

    // -----------------------------------------------------------------------
    // Clock
    // -----------------------------------------------------------------------

    /// Advance the clock by one tick.
    ///
    /// Returns `Err` only for an oracle integrity violation; the session is
    /// then halted without payouts.
    pub fn tick(&mut self) -> Result<TickReport, EngineError> {
        if self.session.is_none() {
            let mut report = TickReport::default();
            if self.lobby.len() >= self.config.min_players {
                self.start_session();
                report.started = true;
                if let Some(s) = &self.session {
                    report.session_id = Some(s.id.clone());
                    report.phase = Some(s.phase);
                    report.day = s.current_day;
                }
            }
            return Ok(report);
        }

        let ticks_per_day = self.config.ticks_per_day();
        let mut events = Vec::new();
        let mut report = TickReport::default();
        let mut advanced_to = None;

        if let Some(session) = self.session.as_mut() {
            report.session_id = Some(session.id.clone());

            if session.phase == Phase::Ended {
                session.debrief_remaining = session.debrief_remaining.saturating_sub(1);
                if session.debrief_remaining == 0 {
                    report.archived = true;
                }
            } else {
                session.ticks += 1;
                if session.ticks % ticks_per_day == 0 && session.current_day < self.config.total_days {
                    session.current_day += 1;
                    report.day_advanced = true;
                    advanced_to = Some(session.current_day);
                    events.push(GameEvent::DayAdvanced {
                        session_id: session.id.clone(),
                        day: session.current_day,
                    });
                }
            }
            report.phase = Some(session.phase);
            report.day = session.current_day;
        }
        self.emit_all(events);

        if report.archived {
            self.archive_session();
            report.phase = Some(Phase::Lobby);
            return Ok(report);
        }

        if let Some(day) = advanced_to {
            self.deliver_scheduled(day);
            self.apply_phase_for_day(day);
            if day >= self.config.total_days {
                report.resolved = true;
                self.resolve()?;
            }
            report.phase = Some(self.phase());
        }
        Ok(report)
    }

    fn phase_for_day(&self, day: u32) -> Phase {
        let c = &self.config;
        if day <= c.early_end_day {
            Phase::Early
        } else if day <= c.mid_end_day {
            Phase::Mid
        } else if day < c.betting_close_day {
            Phase::Late
        } else {
            Phase::Reveal
        }
    }

    fn apply_phase_for_day(&mut self, day: u32) {
        let target = self.phase_for_day(day);
        let mut events = Vec::new();
        if let Some(session) = self.session.as_mut() {
            if target == Phase::Reveal && session.betting_open {
                session.betting_open = false;
                info!(session_id = %session.id, day, "Betting closed");
                events.push(GameEvent::BettingClosed { session_id: session.id.clone(), day });
            }
            if session.phase != target {
                info!(session_id = %session.id, from = %session.phase, to = %target, day, "Phase transition");
                session.phase = target;
                events.push(GameEvent::PhaseChanged {
                    session_id: session.id.clone(),
                    phase: target,
                    day,
                });
            }
        }
        self.emit_all(events);
    }

    fn start_session(&mut self) {
        let session_id = uuid::Uuid::new_v4().to_string();
        let scenario = match self.queued_scenario.take() {
            Some(s) => s,
            None => scenarios::pick(&mut self.rng),
        };

        // The commitment exists before the session (and its market) does.
        let oracle = OracleCommitment::commit(&session_id, scenario.outcome);
        let published = oracle.published();

        let roster = std::mem::take(&mut self.lobby);
        let players: Vec<AgentId> = roster.keys().cloned().collect();
        self.past_players.extend(players.iter().cloned());
        let market = MarketMaker::new(self.config.liquidity_b, self.config.max_trade_cost);
        let session = GameSession::new(session_id.clone(), scenario, roster, market, oracle);

        info!(
            session_id = %session_id,
            scenario = %session.scenario.id,
            players = players.len(),
            commitment = %published.commitment_hash,
            "Session started"
        );

        self.outbox.chain.push(ChainOp::CommitGame {
            session_id: session_id.clone(),
            commitment_hash: published.commitment_hash.clone(),
        });
        self.outbox.attest.push(published.clone());

        let question = session.scenario.question.clone();
        self.session = Some(session);

        self.emit(GameEvent::GameStarted {
            session_id: session_id.clone(),
            question,
            commitment_hash: published.commitment_hash,
            players,
        });
        self.emit(GameEvent::PhaseChanged { session_id, phase: Phase::Early, day: 1 });
        self.deliver_scheduled(1);
    }

    /// Publish the NPC posts and hand out the clues scheduled for `day`.
    fn deliver_scheduled(&mut self, day: u32) {
        let mut events = Vec::new();
        if let Some(session) = self.session.as_mut() {
            let now = Utc::now();
            let posts: Vec<_> = session.scenario.posts.iter().filter(|p| p.day == day).cloned().collect();
            for scheduled in posts {
                let post = Post {
                    id: uuid::Uuid::new_v4().to_string(),
                    author: session.scenario.npc_name(&scheduled.npc_id).to_string(),
                    kind: PostKind::Npc,
                    content: scheduled.content,
                    day,
                    created_at: now,
                    reactions: BTreeMap::new(),
                };
                session.feed.push(post.clone());
                events.push(GameEvent::PostCreated { post });
            }

            let roster: Vec<AgentId> = session.agents.keys().cloned().collect();
            if !roster.is_empty() {
                let clues: Vec<_> =
                    session.scenario.clues.iter().filter(|c| c.day == day).cloned().collect();
                for template in clues {
                    let recipient = roster[day as usize % roster.len()].clone();
                    let (content, reliable) = template.render(session.scenario.outcome);
                    let message = DirectMessage {
                        id: uuid::Uuid::new_v4().to_string(),
                        from: template.npc_id.clone(),
                        to: recipient.clone(),
                        content: content.clone(),
                        day,
                        created_at: now,
                    };
                    let clue = InsiderClue {
                        agent_id: recipient,
                        npc_id: template.npc_id,
                        day,
                        content,
                        reliable,
                    };
                    debug!(session_id = %session.id, agent_id = %clue.agent_id, day, "Insider clue delivered");
                    session.direct_messages.push(message.clone());
                    session.insider_clues.push(clue.clone());
                    events.push(GameEvent::direct_message(&message));
                    events.push(GameEvent::ClueDelivered {
                        session_id: session.id.clone(),
                        agent_id: clue.agent_id,
                        npc_id: clue.npc_id,
                        day,
                    });
                }
            }
        }
        self.emit_all(events);
    }

    /// Reveal, verify and pay out. On mismatch the session halts with no
    /// payouts and the violation is returned.
    fn resolve(&mut self) -> Result<(), EngineError> {
        let debrief = self.config.debrief_ticks;
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        if session.revealed {
            return Ok(());
        }
        session.betting_open = false;
        session.revealed = true;
        session.phase = Phase::Ended;
        session.debrief_remaining = debrief.max(1);
        let session_id = session.id.clone();
        let day = session.current_day;

        let reveal = match session.oracle.reveal() {
            Ok(reveal) => reveal,
            Err(violation) => {
                session.halted = true;
                error!(
                    session_id = %session_id,
                    published = %violation.published,
                    recomputed = %violation.recomputed,
                    "Payout halted: oracle integrity violation"
                );
                self.emit(GameEvent::IntegrityViolation {
                    session_id: session_id.clone(),
                    published: violation.published.clone(),
                    recomputed: violation.recomputed.clone(),
                });
                self.emit(GameEvent::PhaseChanged { session_id, phase: Phase::Ended, day });
                return Err(EngineError::Integrity(violation));
            }
        };

        let outcome = reveal.outcome;
        let payouts = session.market.settle(outcome);
        for payout in &payouts {
            if let Some(agent) = session.agents.get_mut(&payout.agent_id) {
                agent.balance = lmsr::round(agent.balance + payout.amount);
                agent.wins += 1;
            }
        }
        session.final_outcome = Some(outcome);
        session.payouts = payouts.clone();
        session.reveal = Some(reveal.clone());
        let winners = session.winners();
        let commitment_hash = session.oracle.commitment_hash().to_string();

        info!(
            session_id = %session_id,
            outcome = %outcome,
            winners = winners.len(),
            paid = payouts.iter().map(|p| p.amount).sum::<f64>(),
            "Session resolved"
        );

        self.outbox.chain.push(ChainOp::ResolveMarket {
            session_id: session_id.clone(),
            outcome,
            salt: reveal.salt.clone(),
        });
        for agent_id in &winners {
            self.outbox.chain.push(ChainOp::ClaimPayout {
                session_id: session_id.clone(),
                agent_id: agent_id.clone(),
            });
        }

        self.emit(GameEvent::OutcomeRevealed {
            session_id: session_id.clone(),
            outcome,
            salt: reveal.salt,
            commitment_hash,
        });
        self.emit(GameEvent::PayoutsIssued { session_id: session_id.clone(), payouts, winners });
        self.emit(GameEvent::PhaseChanged { session_id, phase: Phase::Ended, day });
        Ok(())
    }

    fn archive_session(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        let summary = session.summary();
        info!(
            session_id = %summary.session_id,
            outcome = ?summary.outcome,
            halted = summary.halted,
            "Session archived"
        );
        self.archive.push(summary);
        self.emit(GameEvent::SessionArchived { session_id: session.id });
    }

    // -----------------------------------------------------------------------
    // Market
    // -----------------------------------------------------------------------

    /// Spend `amount` currency on `outcome`.
    pub fn place_bet(
        &mut self,
        agent_id: &str,
        outcome: Outcome,
        amount: f64,
    ) -> Result<TradeReceipt, Rejection> {
        let id = normalize_address(agent_id);
        let session = self.session.as_mut().ok_or(Rejection::NoActiveGame)?;
        session.ensure_trading()?;
        let available = session.require_agent(&id)?.balance;

        let fill = session.market.buy(&id, outcome, amount, available, session.current_day)?;
        let agent = session.agent_mut(&id)?;
        agent.balance = lmsr::round(agent.balance - fill.amount);
        let balance = agent.balance;

        let receipt = TradeReceipt {
            balance,
            position: session.market.position(&id),
            market: session.market.snapshot(),
            fill,
        };
        let bet = session.market.ledger().last().cloned();
        self.outbox.chain.push(ChainOp::PlaceBet {
            session_id: session.id.clone(),
            agent_id: id.clone(),
            outcome,
            amount: receipt.fill.amount,
        });

        info!(
            agent_id = %id,
            %outcome,
            cost = receipt.fill.amount,
            shares = receipt.fill.shares,
            odds = receipt.market.yes_odds,
            "Bet placed"
        );
        self.emit_trade(bet, &receipt);
        Ok(receipt)
    }

    /// Sell `shares` of `outcome` back to the market.
    pub fn sell_shares(
        &mut self,
        agent_id: &str,
        outcome: Outcome,
        shares: f64,
    ) -> Result<TradeReceipt, Rejection> {
        let id = normalize_address(agent_id);
        let session = self.session.as_mut().ok_or(Rejection::NoActiveGame)?;
        session.ensure_trading()?;
        session.require_agent(&id)?;

        let fill = session.market.sell(&id, outcome, shares, session.current_day)?;
        let agent = session.agent_mut(&id)?;
        agent.balance = lmsr::round(agent.balance + fill.amount);
        let balance = agent.balance;

        let receipt = TradeReceipt {
            balance,
            position: session.market.position(&id),
            market: session.market.snapshot(),
            fill,
        };
        let bet = session.market.ledger().last().cloned();

        info!(
            agent_id = %id,
            %outcome,
            proceeds = receipt.fill.amount,
            shares = receipt.fill.shares,
            "Shares sold"
        );
        self.emit_trade(bet, &receipt);
        Ok(receipt)
    }

    fn emit_trade(&self, bet: Option<Bet>, receipt: &TradeReceipt) {
        if let Some(bet) = bet {
            self.emit(GameEvent::TradeExecuted { bet, market: receipt.market.clone() });
        }
    }

    // -----------------------------------------------------------------------
    // Reputation
    // -----------------------------------------------------------------------

    pub fn submit_feedback(
        &mut self,
        from: &str,
        to: &str,
        category: FeedbackCategory,
        rating: u8,
        comment: &str,
    ) -> Result<ReputationScore, Rejection> {
        let rater = normalize_address(from);
        if !self.is_participant(&rater) {
            return Err(Rejection::UnknownAgent(rater));
        }
        let score = self
            .reputation
            .submit_feedback(from, to, category, rating, comment)?
            .clone();
        self.sync_agent_reputation(&score.agent_id, score.overall_score);
        self.emit(GameEvent::FeedbackSubmitted {
            from: rater,
            to: score.agent_id.clone(),
            overall_score: score.overall_score,
        });
        Ok(score)
    }

    /// Copy a ledger score onto the roster entry, wherever the agent is.
    pub fn sync_agent_reputation(&mut self, agent_id: &str, overall: f64) {
        if let Some(agent) = self.lobby.get_mut(agent_id) {
            agent.reputation = overall;
        }
        if let Some(agent) = self.session.as_mut().and_then(|s| s.agents.get_mut(agent_id)) {
            agent.reputation = overall;
        }
    }

    /// Waiting in the lobby, seated in the running session, or played before.
    pub fn is_participant(&self, agent_id: &str) -> bool {
        self.lobby.contains_key(agent_id)
            || self.session.as_ref().is_some_and(|s| s.agents.contains_key(agent_id))
            || self.past_players.contains(agent_id)
    }

    /// Every agent in the lobby or the running session.
    pub fn known_agents(&self) -> Vec<AgentId> {
        let mut ids: Vec<AgentId> = self.lobby.keys().cloned().collect();
        if let Some(s) = &self.session {
            ids.extend(s.agents.keys().cloned());
        }
        ids
    }

    // -----------------------------------------------------------------------
    // Outbox
    // -----------------------------------------------------------------------

    pub fn drain_outbox(&mut self) -> Outbox {
        std::mem::take(&mut self.outbox)
    }

    /// Store an attestation for the running session. Ignored unless it
    /// verifies against the session's commitment.
    pub fn record_attestation(&mut self, session_id: &str, attestation: Attestation) -> bool {
        let Some(session) = self.session.as_mut().filter(|s| s.id == session_id) else {
            warn!(session_id, "Attestation for unknown session dropped");
            return false;
        };
        if !attestation.verify(&session.oracle.published()) {
            warn!(session_id, attestor = %attestation.attestor, "Attestation failed verification");
            return false;
        }
        info!(session_id, attestor = %attestation.attestor, "Commitment attested");
        session.attestation = Some(attestation);
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// One tick per day, short debrief, fixed seed.
    pub(crate) fn test_config() -> GameConfig {
        GameConfig {
            tick_interval_ms: 1_000,
            game_duration_ms: 30_000,
            total_days: 30,
            early_end_day: 10,
            mid_end_day: 20,
            betting_close_day: 29,
            debrief_ticks: 2,
            min_players: 5,
            max_players: 8,
            liquidity_b: 100.0,
            max_trade_cost: 1_000.0,
            starting_balance: 1_000.0,
            max_post_length: 280,
            seed: Some(7),
        }
    }

    pub(crate) fn recorder() -> (Broadcaster, Arc<Mutex<Vec<GameEvent>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let b: Broadcaster = Arc::new(move |e: &GameEvent| sink.lock().unwrap().push(e.clone()));
        (b, seen)
    }

    pub(crate) fn agent(n: u8) -> String {
        format!("0x{:02x}{}", n, "ab".repeat(31))
    }

    pub(crate) fn started_engine() -> SessionEngine {
        let mut engine = SessionEngine::new(test_config(), events::silent());
        for i in 0..5 {
            engine.join_lobby(&agent(i), &format!("agent-{i}"), AgentType::Ai).unwrap();
        }
        engine.tick().unwrap();
        engine
    }

    fn yes_scenario() -> Scenario {
        let mut s = scenarios::catalog().remove(0);
        s.outcome = Outcome::Yes;
        s
    }

    fn run_to_day(engine: &mut SessionEngine, day: u32) {
        while engine.session().map(|s| s.current_day()).unwrap_or(0) < day {
            engine.tick().unwrap();
        }
    }

    #[test]
    fn test_lobby_waits_for_min_players() {
        let mut engine = SessionEngine::new(test_config(), events::silent());
        for i in 0..4 {
            engine.join_lobby(&agent(i), "a", AgentType::Ai).unwrap();
        }
        let report = engine.tick().unwrap();
        assert!(!report.started);
        assert_eq!(engine.phase(), Phase::Lobby);

        engine.join_lobby(&agent(4), "e", AgentType::Human).unwrap();
        let report = engine.tick().unwrap();
        assert!(report.started);
        assert_eq!(engine.phase(), Phase::Early);
        assert_eq!(engine.session().unwrap().current_day(), 1);
        assert_eq!(engine.lobby().count(), 0);
    }

    #[test]
    fn test_join_rejects_duplicates_and_full_lobby() {
        let mut engine = SessionEngine::new(test_config(), events::silent());
        engine.join_lobby(&agent(1), "a", AgentType::Ai).unwrap();
        let upper = agent(1).to_uppercase().replacen("0X", "0x", 1);
        assert!(matches!(
            engine.join_lobby(&upper, "a", AgentType::Ai),
            Err(Rejection::AlreadyJoined(_))
        ));
        for i in 2..9 {
            engine.join_lobby(&agent(i), "x", AgentType::Ai).unwrap();
        }
        assert_eq!(
            engine.join_lobby(&agent(9), "x", AgentType::Ai),
            Err(Rejection::LobbyFull { max: 8 })
        );
    }

    #[test]
    fn test_leave_lobby() {
        let mut engine = SessionEngine::new(test_config(), events::silent());
        engine.join_lobby(&agent(1), "a", AgentType::Ai).unwrap();
        assert_eq!(engine.leave_lobby(&agent(1)), Ok(0));
        assert!(matches!(engine.leave_lobby(&agent(1)), Err(Rejection::UnknownAgent(_))));
    }

    #[test]
    fn test_commitment_queued_before_any_bet() {
        let mut engine = started_engine();
        let outbox = engine.drain_outbox();
        assert!(matches!(outbox.chain.first(), Some(ChainOp::CommitGame { .. })));
        assert_eq!(outbox.attest.len(), 1);
        let session = engine.session().unwrap();
        assert_eq!(outbox.attest[0].commitment_hash, session.commitment_hash());
        assert_eq!(session.commitment_hash().len(), 64);
    }

    #[test]
    fn test_bet_before_session_rejected() {
        let mut engine = SessionEngine::new(test_config(), events::silent());
        engine.join_lobby(&agent(1), "a", AgentType::Ai).unwrap();
        assert_eq!(
            engine.place_bet(&agent(1), Outcome::Yes, 10.0).unwrap_err(),
            Rejection::NoActiveGame
        );
    }

    #[test]
    fn test_place_bet_debits_balance() {
        let mut engine = started_engine();
        let receipt = engine.place_bet(&agent(0), Outcome::Yes, 100.0).unwrap();
        let expected = 100.0 * (2.0 * std::f64::consts::E - 1.0).ln();
        assert!((receipt.fill.shares - expected).abs() < 1e-5);
        assert!((receipt.balance - 900.0).abs() < 1e-5);
        assert!(receipt.market.yes_odds > 0.5);
        assert_eq!(receipt.position.yes_shares, receipt.fill.shares);
    }

    #[test]
    fn test_rejected_bet_leaves_state_untouched() {
        let mut engine = started_engine();
        let err = engine.place_bet(&agent(0), Outcome::Yes, 5_000.0).unwrap_err();
        assert!(matches!(err, Rejection::TradeTooLarge { .. }));
        let session = engine.session().unwrap();
        assert_eq!(session.agent(&agent(0)).unwrap().balance, 1_000.0);
        assert_eq!(session.market().ledger().len(), 0);
    }

    #[test]
    fn test_unknown_agent_cannot_trade() {
        let mut engine = started_engine();
        assert!(matches!(
            engine.place_bet(&agent(42), Outcome::No, 10.0),
            Err(Rejection::UnknownAgent(_))
        ));
    }

    #[test]
    fn test_phase_progression_and_betting_close() {
        let mut engine = started_engine();
        run_to_day(&mut engine, 11);
        assert_eq!(engine.phase(), Phase::Mid);
        run_to_day(&mut engine, 21);
        assert_eq!(engine.phase(), Phase::Late);
        engine.place_bet(&agent(1), Outcome::No, 10.0).unwrap();

        run_to_day(&mut engine, 29);
        assert_eq!(engine.phase(), Phase::Reveal);
        assert!(!engine.session().unwrap().betting_open());
        assert_eq!(
            engine.place_bet(&agent(1), Outcome::No, 10.0).unwrap_err(),
            Rejection::BettingClosed
        );
        // Positions are frozen, not closed.
        assert!(engine.session().unwrap().market().position(&agent(1)).no_shares > 0.0);
    }

    #[test]
    fn test_full_session_pays_winners() {
        let mut engine = SessionEngine::new(test_config(), events::silent());
        engine.queue_scenario(yes_scenario());
        for i in 0..5 {
            engine.join_lobby(&agent(i), "p", AgentType::Ai).unwrap();
        }
        engine.tick().unwrap();
        let yes = engine.place_bet(&agent(0), Outcome::Yes, 100.0).unwrap();
        engine.place_bet(&agent(1), Outcome::No, 50.0).unwrap();
        engine.drain_outbox();

        run_to_day(&mut engine, 30);
        let session = engine.session().unwrap();
        assert_eq!(session.phase(), Phase::Ended);
        assert_eq!(session.final_outcome(), Some(Outcome::Yes));
        assert!(session.reveal().unwrap().verify(session.commitment_hash()).is_ok());
        assert_eq!(session.winners(), vec![agent(0)]);

        let a = session.agent(&agent(0)).unwrap();
        assert!((a.balance - (yes.balance + yes.fill.shares)).abs() < 1e-5);
        assert_eq!(a.wins, 1);
        let b = session.agent(&agent(1)).unwrap();
        assert!((b.balance - 950.0).abs() < 1e-5);
        assert_eq!(b.wins, 0);

        let outbox = engine.drain_outbox();
        assert!(matches!(outbox.chain[0], ChainOp::ResolveMarket { outcome: Outcome::Yes, .. }));
        assert!(matches!(&outbox.chain[1], ChainOp::ClaimPayout { agent_id, .. } if *agent_id == agent(0)));
    }

    #[test]
    fn test_debrief_then_archive() {
        let mut engine = started_engine();
        run_to_day(&mut engine, 30);
        assert_eq!(engine.phase(), Phase::Ended);
        engine.tick().unwrap();
        assert_eq!(engine.phase(), Phase::Ended);
        let report = engine.tick().unwrap();
        assert!(report.archived);
        assert_eq!(engine.phase(), Phase::Lobby);
        assert_eq!(engine.archive().len(), 1);
        assert!(engine.archive()[0].outcome.is_some());

        // Players may join the next game.
        engine.join_lobby(&agent(0), "again", AgentType::Ai).unwrap();
    }

    #[test]
    fn test_integrity_violation_halts_payout() {
        let (broadcaster, seen) = recorder();
        let mut engine = SessionEngine::new(test_config(), broadcaster);
        for i in 0..5 {
            engine.join_lobby(&agent(i), "p", AgentType::Ai).unwrap();
        }
        engine.tick().unwrap();
        engine.place_bet(&agent(0), Outcome::Yes, 100.0).unwrap();
        engine.place_bet(&agent(1), Outcome::No, 100.0).unwrap();
        engine.session.as_mut().unwrap().oracle.tamper_salt(&"11".repeat(32));

        let mut result = Ok(TickReport::default());
        for _ in 0..40 {
            result = engine.tick();
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(EngineError::Integrity(_))));

        let session = engine.session().unwrap();
        assert!(session.is_halted());
        assert!(session.final_outcome().is_none());
        assert!(session.payouts().is_empty());
        assert!((session.agent(&agent(0)).unwrap().balance - 900.0).abs() < 1e-5);
        assert!(seen
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, GameEvent::IntegrityViolation { .. })));
    }

    #[test]
    fn test_scheduled_content_delivered() {
        let mut engine = SessionEngine::new(test_config(), events::silent());
        engine.queue_scenario(yes_scenario());
        for i in 0..5 {
            engine.join_lobby(&agent(i), "p", AgentType::Ai).unwrap();
        }
        engine.tick().unwrap();
        run_to_day(&mut engine, 12);

        let session = engine.session().unwrap();
        assert!(session.feed().iter().any(|p| p.kind == PostKind::Npc && p.day == 2));
        let clues = session.insider_clues();
        assert_eq!(clues.len(), 2);
        let roster: Vec<_> = session.agents().map(|a| a.id.clone()).collect();
        assert_eq!(clues[0].day, 5);
        assert_eq!(clues[0].agent_id, roster[5 % roster.len()]);
        assert!(clues[0].reliable);
        assert!(!clues[1].reliable);
        assert!(session.direct_messages().iter().any(|m| m.to == clues[0].agent_id));
    }

    #[test]
    fn test_clue_broadcasts_hide_text_and_reliability() {
        let (broadcaster, seen) = recorder();
        let mut engine = SessionEngine::new(test_config(), broadcaster);
        engine.queue_scenario(yes_scenario());
        for i in 0..5 {
            engine.join_lobby(&agent(i), "p", AgentType::Ai).unwrap();
        }
        engine.tick().unwrap();
        run_to_day(&mut engine, 6);

        let clue_text = engine.session().unwrap().insider_clues()[0].content.clone();
        let seen = seen.lock().unwrap();
        assert!(seen.iter().any(|e| matches!(e, GameEvent::ClueDelivered { day: 5, .. })));
        for event in seen.iter() {
            let json = serde_json::to_string(event).unwrap();
            assert!(!json.contains(&clue_text), "{json}");
            assert!(!json.contains("reliable"), "{json}");
        }
    }

    #[test]
    fn test_feedback_updates_roster_reputation() {
        let mut engine = started_engine();
        let score = engine
            .submit_feedback(&agent(0), &agent(1), FeedbackCategory::Accuracy, 5, "sharp")
            .unwrap();
        assert_eq!(score.overall_score, 100.0);
        assert_eq!(engine.session().unwrap().agent(&agent(1)).unwrap().reputation, 100.0);
        assert_eq!(
            engine.submit_feedback(&agent(2), &agent(2), FeedbackCategory::Accuracy, 5, ""),
            Err(Rejection::SelfTarget)
        );
    }

    #[test]
    fn test_feedback_requires_rater_to_have_played() {
        let mut engine = started_engine();
        let outsider = "0xfeedfeedfeedfeedfeedfeedfeedfeedfeedfeed";
        assert_eq!(
            engine.submit_feedback(outsider, &agent(1), FeedbackCategory::Trustworthiness, 1, ""),
            Err(Rejection::UnknownAgent(outsider.to_string()))
        );
        assert!(engine.reputation().score(&agent(1)).is_none());

        run_to_day(&mut engine, 30);
        engine.tick().unwrap();
        assert!(engine.tick().unwrap().archived);
        assert!(engine.session().is_none());

        // Finished players keep their voice after the roster is archived.
        let score = engine
            .submit_feedback(&agent(3), &agent(4), FeedbackCategory::Helpfulness, 4, "")
            .unwrap();
        assert_eq!(score.feedback_received, 1);

        // Lobby members count as participants before their first game.
        engine.join_lobby(outsider, "late", AgentType::Ai).unwrap();
        assert!(engine
            .submit_feedback(outsider, &agent(4), FeedbackCategory::Accuracy, 3, "")
            .is_ok());
    }

    #[test]
    fn test_record_attestation_requires_valid_signature() {
        use crate::oracle::LocalAttestor;
        let mut engine = started_engine();
        let published = engine.drain_outbox().attest.remove(0);
        let attestor = LocalAttestor::from_secret(&[9u8; 32]).unwrap();

        let mut forged = attestor.sign(&published);
        forged.signature = attestor.sign(&PublishedCommitment {
            commitment_hash: "00".repeat(32),
            ..published.clone()
        }).signature;
        assert!(!engine.record_attestation(&published.session_id, forged));
        assert!(!engine.record_attestation("other", attestor.sign(&published)));
        assert!(engine.record_attestation(&published.session_id, attestor.sign(&published)));
        assert!(engine.session().unwrap().attestation().is_some());
    }

    #[test]
    fn test_game_started_broadcast() {
        let (broadcaster, seen) = recorder();
        let mut engine = SessionEngine::new(test_config(), broadcaster);
        for i in 0..5 {
            engine.join_lobby(&agent(i), "p", AgentType::Ai).unwrap();
        }
        engine.tick().unwrap();
        let events = seen.lock().unwrap();
        let kinds: Vec<_> = events.iter().map(|e| e.kind()).collect();
        assert_eq!(kinds.iter().filter(|k| **k == "lobby_joined").count(), 5);
        assert!(kinds.contains(&"game_started"));
        assert!(kinds.contains(&"phase_changed"));
    }

    #[test]
    fn test_state_view_hides_outcome_until_reveal() {
        let engine = started_engine();
        let view = engine.state_view();
        let session = view.session.unwrap();
        assert!(session.outcome.is_none());
        let json = serde_json::to_string(&session).unwrap();
        assert!(!json.contains("hints_yes"));
        assert_eq!(session.players.len(), 5);
    }
}
