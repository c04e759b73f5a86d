//! Broadcast deltas emitted by the engine.
//!
//! The engine calls an injected [`Broadcaster`] after every observable state
//! change. Transports (WebSocket fan-out, logs, tests) subscribe by
//! supplying the callback; the engine knows nothing about them.

use serde::Serialize;
use std::sync::Arc;

use crate::types::{
    AgentId, Bet, DirectMessage, GroupMessage, MarketSnapshot, Outcome, Payout, Phase, Post,
    Reaction,
};

/// Callback receiving every engine event.
pub type Broadcaster = Arc<dyn Fn(&GameEvent) + Send + Sync>;

/// A broadcaster that drops everything.
pub fn silent() -> Broadcaster {
    Arc::new(|_| {})
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    LobbyJoined {
        agent_id: AgentId,
        name: String,
        lobby_size: usize,
    },
    LobbyLeft {
        agent_id: AgentId,
        lobby_size: usize,
    },
    GameStarted {
        session_id: String,
        question: String,
        commitment_hash: String,
        players: Vec<AgentId>,
    },
    DayAdvanced {
        session_id: String,
        day: u32,
    },
    PhaseChanged {
        session_id: String,
        phase: Phase,
        day: u32,
    },
    BettingClosed {
        session_id: String,
        day: u32,
    },
    PostCreated {
        post: Post,
    },
    /// Content stays with the recipient; only the envelope is public.
    DirectMessageSent {
        message_id: String,
        from: String,
        to: AgentId,
        day: u32,
    },
    /// Who got a clue and when. Text and reliability are never broadcast.
    ClueDelivered {
        session_id: String,
        agent_id: AgentId,
        npc_id: String,
        day: u32,
    },
    TradeExecuted {
        bet: Bet,
        market: MarketSnapshot,
    },
    FollowChanged {
        follower: AgentId,
        target: AgentId,
        following: bool,
    },
    ReactionAdded {
        post_id: String,
        agent_id: AgentId,
        reaction: Reaction,
    },
    FeedbackSubmitted {
        from: AgentId,
        to: AgentId,
        overall_score: f64,
    },
    GroupCreated {
        group_id: String,
        name: String,
        members: Vec<AgentId>,
    },
    GroupMessageSent {
        group_id: String,
        message_id: String,
        from: AgentId,
        day: u32,
    },
    GroupMembershipChanged {
        group_id: String,
        agent_id: AgentId,
        joined: bool,
    },
    OutcomeRevealed {
        session_id: String,
        outcome: Outcome,
        salt: String,
        commitment_hash: String,
    },
    PayoutsIssued {
        session_id: String,
        payouts: Vec<Payout>,
        winners: Vec<AgentId>,
    },
    IntegrityViolation {
        session_id: String,
        published: String,
        recomputed: String,
    },
    SessionArchived {
        session_id: String,
    },
}

impl GameEvent {
    pub fn direct_message(message: &DirectMessage) -> Self {
        GameEvent::DirectMessageSent {
            message_id: message.id.clone(),
            from: message.from.clone(),
            to: message.to.clone(),
            day: message.day,
        }
    }

    pub fn group_message(group_id: &str, message: &GroupMessage) -> Self {
        GameEvent::GroupMessageSent {
            group_id: group_id.to_string(),
            message_id: message.id.clone(),
            from: message.from.clone(),
            day: message.day,
        }
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            GameEvent::LobbyJoined { .. } => "lobby_joined",
            GameEvent::LobbyLeft { .. } => "lobby_left",
            GameEvent::GameStarted { .. } => "game_started",
            GameEvent::DayAdvanced { .. } => "day_advanced",
            GameEvent::PhaseChanged { .. } => "phase_changed",
            GameEvent::BettingClosed { .. } => "betting_closed",
            GameEvent::PostCreated { .. } => "post_created",
            GameEvent::DirectMessageSent { .. } => "direct_message_sent",
            GameEvent::ClueDelivered { .. } => "clue_delivered",
            GameEvent::TradeExecuted { .. } => "trade_executed",
            GameEvent::FollowChanged { .. } => "follow_changed",
            GameEvent::ReactionAdded { .. } => "reaction_added",
            GameEvent::FeedbackSubmitted { .. } => "feedback_submitted",
            GameEvent::GroupCreated { .. } => "group_created",
            GameEvent::GroupMessageSent { .. } => "group_message_sent",
            GameEvent::GroupMembershipChanged { .. } => "group_membership_changed",
            GameEvent::OutcomeRevealed { .. } => "outcome_revealed",
            GameEvent::PayoutsIssued { .. } => "payouts_issued",
            GameEvent::IntegrityViolation { .. } => "integrity_violation",
            GameEvent::SessionArchived { .. } => "session_archived",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let ev = GameEvent::PhaseChanged {
            session_id: "s".into(),
            phase: Phase::Mid,
            day: 11,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "phase_changed");
        assert_eq!(json["phase"], "MID");
        assert_eq!(ev.kind(), "phase_changed");
    }

    #[test]
    fn test_private_payloads_never_serialized() {
        let dm = DirectMessage {
            id: "m".into(),
            from: "npc:groom".into(),
            to: "0xaa".into(),
            content: "the horse has the votes".into(),
            day: 5,
            created_at: chrono::Utc::now(),
        };
        let clue = GameEvent::ClueDelivered {
            session_id: "s".into(),
            agent_id: "0xaa".into(),
            npc_id: "npc:groom".into(),
            day: 5,
        };
        for ev in [GameEvent::direct_message(&dm), clue] {
            let json = serde_json::to_value(&ev).unwrap();
            let text = json.to_string();
            assert!(json.get("content").is_none());
            assert!(json.get("reliable").is_none());
            assert!(!text.contains("horse"));
        }
    }

    #[test]
    fn test_silent_broadcaster_accepts_events() {
        let b = silent();
        b(&GameEvent::SessionArchived { session_id: "s".into() });
    }
}
