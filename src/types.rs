//! Shared types for the Caliguland game core.
//!
//! These types form the data model used across the market, oracle,
//! reputation, engine and gateway modules. They carry no behaviour that
//! depends on session state, so every module can depend on them without
//! circular references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Agent identity: the lower-cased hex address of the agent's signing key.
pub type AgentId = String;

/// Normalise an address so comparisons are case-insensitive.
pub fn normalize_address(address: &str) -> AgentId {
    address.trim().to_ascii_lowercase()
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Binary market outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Yes,
    No,
}

impl Outcome {
    /// The opposite outcome.
    pub fn opposite(&self) -> Self {
        match self {
            Outcome::Yes => Outcome::No,
            Outcome::No => Outcome::Yes,
        }
    }

    /// Canonical byte tag used in commitments.
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Yes => "YES",
            Outcome::No => "NO",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Outcome {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "yes" | "y" | "true" => Ok(Outcome::Yes),
            "no" | "n" | "false" => Ok(Outcome::No),
            _ => Err(anyhow::anyhow!("Unknown outcome: {s}")),
        }
    }
}

/// Session phase. `Lobby` means no session is in play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Phase {
    Lobby,
    Early,
    Mid,
    Late,
    Reveal,
    Ended,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Lobby => "LOBBY",
            Phase::Early => "EARLY",
            Phase::Mid => "MID",
            Phase::Late => "LATE",
            Phase::Reveal => "REVEAL",
            Phase::Ended => "ENDED",
        };
        f.write_str(s)
    }
}

/// What kind of participant an agent is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    #[default]
    Ai,
    Human,
}

/// Reaction an agent can leave on a feed post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reaction {
    Like,
    Dislike,
}

/// Who authored a feed post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostKind {
    Agent,
    Npc,
}

/// Direction of a market trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeKind {
    Buy,
    Sell,
}

// ---------------------------------------------------------------------------
// Roster
// ---------------------------------------------------------------------------

/// A player in the lobby or in a running session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub agent_type: AgentType,
    /// Spendable currency.
    pub balance: f64,
    /// Mirror of the ledger's overall score (0-100).
    pub reputation: f64,
    pub wins: u32,
    pub following: BTreeSet<AgentId>,
    pub joined_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(id: &str, name: &str, agent_type: AgentType, balance: f64) -> Self {
        Self {
            id: normalize_address(id),
            name: name.to_string(),
            agent_type,
            balance,
            reputation: 50.0,
            wins: 0,
            following: BTreeSet::new(),
            joined_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Social
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub author: String,
    pub kind: PostKind,
    pub content: String,
    pub day: u32,
    pub created_at: DateTime<Utc>,
    pub reactions: BTreeMap<AgentId, Reaction>,
}

impl Post {
    pub fn likes(&self) -> usize {
        self.reactions.values().filter(|r| **r == Reaction::Like).count()
    }

    pub fn dislikes(&self) -> usize {
        self.reactions.values().filter(|r| **r == Reaction::Dislike).count()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectMessage {
    pub id: String,
    pub from: String,
    pub to: AgentId,
    pub content: String,
    pub day: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMessage {
    pub id: String,
    pub from: AgentId,
    pub content: String,
    pub day: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupChat {
    pub id: String,
    pub name: String,
    pub creator: AgentId,
    pub members: BTreeSet<AgentId>,
    pub messages: Vec<GroupMessage>,
}

/// A clue handed privately to one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsiderClue {
    pub agent_id: AgentId,
    pub npc_id: String,
    pub day: u32,
    pub content: String,
    /// Whether the clue points at the hidden outcome.
    pub reliable: bool,
}

// ---------------------------------------------------------------------------
// Market
// ---------------------------------------------------------------------------

/// One entry of the immutable trade ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bet {
    pub id: String,
    pub agent_id: AgentId,
    pub outcome: Outcome,
    pub kind: TradeKind,
    /// Currency spent (buy) or received (sell).
    pub amount: f64,
    pub shares: f64,
    pub day: u32,
    /// Price of `outcome` immediately before execution.
    pub odds: f64,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for Bet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self.kind {
            TradeKind::Buy => "bought",
            TradeKind::Sell => "sold",
        };
        write!(
            f,
            "{} {verb} {:.2} {} for {:.2} @ {:.1}% (day {})",
            self.agent_id,
            self.shares,
            self.outcome,
            self.amount,
            self.odds * 100.0,
            self.day,
        )
    }
}

/// Per-agent share holdings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub yes_shares: f64,
    pub no_shares: f64,
}

impl Position {
    pub fn shares(&self, outcome: Outcome) -> f64 {
        match outcome {
            Outcome::Yes => self.yes_shares,
            Outcome::No => self.no_shares,
        }
    }

    pub fn shares_mut(&mut self, outcome: Outcome) -> &mut f64 {
        match outcome {
            Outcome::Yes => &mut self.yes_shares,
            Outcome::No => &mut self.no_shares,
        }
    }
}

/// Public view of the market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub yes_shares: f64,
    pub no_shares: f64,
    pub yes_odds: f64,
    pub no_odds: f64,
    pub total_volume: f64,
    pub liquidity: f64,
    pub trades: usize,
}

impl fmt::Display for MarketSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "YES {:.1}% | NO {:.1}% | vol {:.2} | b={}",
            self.yes_odds * 100.0,
            self.no_odds * 100.0,
            self.total_volume,
            self.liquidity,
        )
    }
}

/// Result of an executed trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub outcome: Outcome,
    pub kind: TradeKind,
    pub shares: f64,
    /// Cost paid (buy) or proceeds received (sell).
    pub amount: f64,
    pub price_before: f64,
    pub price_after: f64,
}

/// Redemption owed to one agent after resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payout {
    pub agent_id: AgentId,
    pub shares: f64,
    pub amount: f64,
}

// ---------------------------------------------------------------------------
// Reputation
// ---------------------------------------------------------------------------

/// Feedback dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackCategory {
    Trustworthiness,
    Accuracy,
    Helpfulness,
}

impl FeedbackCategory {
    pub const ALL: &'static [FeedbackCategory] = &[
        FeedbackCategory::Trustworthiness,
        FeedbackCategory::Accuracy,
        FeedbackCategory::Helpfulness,
    ];

    /// Weight in the overall score.
    pub fn weight(&self) -> f64 {
        match self {
            FeedbackCategory::Trustworthiness => 0.40,
            FeedbackCategory::Accuracy => 0.35,
            FeedbackCategory::Helpfulness => 0.25,
        }
    }
}

impl fmt::Display for FeedbackCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedbackCategory::Trustworthiness => write!(f, "trustworthiness"),
            FeedbackCategory::Accuracy => write!(f, "accuracy"),
            FeedbackCategory::Helpfulness => write!(f, "helpfulness"),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Well-formed requests the game refuses. Never fatal; surfaced to callers
/// as `{success: false}`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Rejection {
    #[error("Lobby is full ({max} players)")]
    LobbyFull { max: usize },

    #[error("Agent {0} already joined")]
    AlreadyJoined(AgentId),

    #[error("Agent {0} is not in the game")]
    UnknownAgent(AgentId),

    #[error("No game is in progress")]
    NoActiveGame,

    #[error("Action not allowed during {0}")]
    WrongPhase(Phase),

    #[error("Betting is closed")]
    BettingClosed,

    #[error("Invalid amount: {0}")]
    InvalidAmount(f64),

    #[error("Insufficient balance: need {needed:.2}, have {available:.2}")]
    InsufficientBalance { needed: f64, available: f64 },

    #[error("Insufficient shares: need {needed:.2}, have {available:.2}")]
    InsufficientShares { needed: f64, available: f64 },

    #[error("Trade cost {cost:.2} exceeds the maximum of {max:.2}")]
    TradeTooLarge { cost: f64, max: f64 },

    #[error("Trade would push the price out of bounds")]
    PriceOutOfBounds,

    #[error("Agents cannot target themselves")]
    SelfTarget,

    #[error("Message content is empty")]
    EmptyContent,

    #[error("Post not found: {0}")]
    PostNotFound(String),

    #[error("Group not found: {0}")]
    GroupNotFound(String),

    #[error("Agent {0} is not a member of this group")]
    NotGroupMember(AgentId),

    #[error("Agent {0} is already a member of this group")]
    AlreadyGroupMember(AgentId),

    #[error("Rating must be between 1 and 5, got {0}")]
    InvalidRating(u8),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
