//! Skill catalog and dispatch into the engine.
//!
//! Parsing is two-step: the skill id must be known (else METHOD_NOT_FOUND),
//! then the data must fit that skill's parameters (else INVALID_PARAMS).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};

use super::GatewayError;
use crate::engine::SessionEngine;
use crate::types::{AgentType, FeedbackCategory, Outcome, Reaction, Rejection};

/// Public description of one skill, listed on the agent card.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SkillInfo {
    pub id: &'static str,
    pub description: &'static str,
}

pub const SKILLS: &[SkillInfo] = &[
    SkillInfo { id: "join-game", description: "Join the lobby for the next game" },
    SkillInfo { id: "leave-game", description: "Leave the lobby before the game starts" },
    SkillInfo { id: "get-game-state", description: "Current phase, market and roster" },
    SkillInfo { id: "get-market", description: "Current market odds and volume" },
    SkillInfo { id: "get-feed", description: "Recent public feed posts" },
    SkillInfo { id: "get-reputation", description: "Reputation score for an agent" },
    SkillInfo { id: "quote-trade", description: "Price a trade without executing it" },
    SkillInfo { id: "place-bet", description: "Spend currency on YES or NO shares" },
    SkillInfo { id: "sell-shares", description: "Sell shares back to the market" },
    SkillInfo { id: "post-to-feed", description: "Publish a post to the public feed" },
    SkillInfo { id: "send-dm", description: "Send a direct message to another agent" },
    SkillInfo { id: "follow", description: "Follow another agent" },
    SkillInfo { id: "unfollow", description: "Stop following an agent" },
    SkillInfo { id: "react-to-post", description: "Like or dislike a feed post" },
    SkillInfo { id: "submit-feedback", description: "Rate another agent 1-5 in a category" },
    SkillInfo { id: "create-group", description: "Create a private group chat" },
    SkillInfo { id: "send-group-message", description: "Post to a group you belong to" },
    SkillInfo { id: "leave-group", description: "Leave a group chat" },
    SkillInfo { id: "invite-to-group", description: "Invite an agent into your group" },
];

#[derive(Debug, Clone, PartialEq)]
pub enum QuoteBy {
    Shares(f64),
    Amount(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Skill {
    JoinGame { name: String, agent_type: AgentType },
    LeaveGame,
    GetGameState,
    GetMarket,
    GetFeed { limit: usize },
    GetReputation { agent_id: Option<String> },
    QuoteTrade { outcome: Outcome, by: QuoteBy },
    PlaceBet { outcome: Outcome, amount: f64 },
    SellShares { outcome: Outcome, shares: f64 },
    PostToFeed { content: String },
    SendDm { to: String, content: String },
    Follow { target: String },
    Unfollow { target: String },
    ReactToPost { post_id: String, reaction: Reaction },
    SubmitFeedback { target: String, category: FeedbackCategory, rating: u8, comment: String },
    CreateGroup { name: String, members: Vec<String> },
    SendGroupMessage { group_id: String, content: String },
    LeaveGroup { group_id: String },
    InviteToGroup { group_id: String, invitee: String },
}

// Parameter shapes, camelCase on the wire.

fn any_case_outcome<'de, D: Deserializer<'de>>(d: D) -> Result<Outcome, D::Error> {
    let raw = String::deserialize(d)?;
    raw.parse().map_err(serde::de::Error::custom)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinParams {
    #[serde(default)]
    name: String,
    #[serde(default)]
    agent_type: AgentType,
}

#[derive(Deserialize)]
struct FeedParams {
    #[serde(default = "default_feed_limit")]
    limit: usize,
}

fn default_feed_limit() -> usize {
    50
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReputationParams {
    #[serde(default)]
    agent_id: Option<String>,
}

#[derive(Deserialize)]
struct QuoteParams {
    #[serde(deserialize_with = "any_case_outcome")]
    outcome: Outcome,
    #[serde(default)]
    shares: Option<f64>,
    #[serde(default)]
    amount: Option<f64>,
}

#[derive(Deserialize)]
struct BetParams {
    #[serde(deserialize_with = "any_case_outcome")]
    outcome: Outcome,
    amount: f64,
}

#[derive(Deserialize)]
struct SellParams {
    #[serde(deserialize_with = "any_case_outcome")]
    outcome: Outcome,
    shares: f64,
}

#[derive(Deserialize)]
struct ContentParams {
    content: String,
}

#[derive(Deserialize)]
struct DmParams {
    to: String,
    content: String,
}

#[derive(Deserialize)]
struct TargetParams {
    target: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReactParams {
    post_id: String,
    reaction: Reaction,
}

#[derive(Deserialize)]
struct FeedbackParams {
    target: String,
    category: FeedbackCategory,
    rating: u8,
    #[serde(default)]
    comment: String,
}

#[derive(Deserialize)]
struct CreateGroupParams {
    name: String,
    #[serde(default)]
    members: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupMessageParams {
    group_id: String,
    content: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupParams {
    group_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InviteParams {
    group_id: String,
    invitee: String,
}

fn params<T: DeserializeOwned>(data: &Map<String, Value>) -> Result<T, GatewayError> {
    serde_json::from_value(Value::Object(data.clone()))
        .map_err(|e| GatewayError::InvalidParams(e.to_string()))
}

impl Skill {
    pub fn parse(skill_id: &str, data: &Map<String, Value>) -> Result<Self, GatewayError> {
        let skill = match skill_id {
            "join-game" => {
                let p: JoinParams = params(data)?;
                Skill::JoinGame { name: p.name, agent_type: p.agent_type }
            }
            "leave-game" => Skill::LeaveGame,
            "get-game-state" => Skill::GetGameState,
            "get-market" => Skill::GetMarket,
            "get-feed" => Skill::GetFeed { limit: params::<FeedParams>(data)?.limit },
            "get-reputation" => {
                Skill::GetReputation { agent_id: params::<ReputationParams>(data)?.agent_id }
            }
            "quote-trade" => {
                let p: QuoteParams = params(data)?;
                let by = match (p.shares, p.amount) {
                    (Some(shares), None) => QuoteBy::Shares(shares),
                    (None, Some(amount)) => QuoteBy::Amount(amount),
                    _ => {
                        return Err(GatewayError::InvalidParams(
                            "quote-trade needs exactly one of shares or amount".into(),
                        ))
                    }
                };
                Skill::QuoteTrade { outcome: p.outcome, by }
            }
            "place-bet" => {
                let p: BetParams = params(data)?;
                Skill::PlaceBet { outcome: p.outcome, amount: p.amount }
            }
            "sell-shares" => {
                let p: SellParams = params(data)?;
                Skill::SellShares { outcome: p.outcome, shares: p.shares }
            }
            "post-to-feed" => Skill::PostToFeed { content: params::<ContentParams>(data)?.content },
            "send-dm" => {
                let p: DmParams = params(data)?;
                Skill::SendDm { to: p.to, content: p.content }
            }
            "follow" => Skill::Follow { target: params::<TargetParams>(data)?.target },
            "unfollow" => Skill::Unfollow { target: params::<TargetParams>(data)?.target },
            "react-to-post" => {
                let p: ReactParams = params(data)?;
                Skill::ReactToPost { post_id: p.post_id, reaction: p.reaction }
            }
            "submit-feedback" => {
                let p: FeedbackParams = params(data)?;
                Skill::SubmitFeedback {
                    target: p.target,
                    category: p.category,
                    rating: p.rating,
                    comment: p.comment,
                }
            }
            "create-group" => {
                let p: CreateGroupParams = params(data)?;
                Skill::CreateGroup { name: p.name, members: p.members }
            }
            "send-group-message" => {
                let p: GroupMessageParams = params(data)?;
                Skill::SendGroupMessage { group_id: p.group_id, content: p.content }
            }
            "leave-group" => Skill::LeaveGroup { group_id: params::<GroupParams>(data)?.group_id },
            "invite-to-group" => {
                let p: InviteParams = params(data)?;
                Skill::InviteToGroup { group_id: p.group_id, invitee: p.invitee }
            }
            other => return Err(GatewayError::MethodNotFound(format!("Unknown skill: {other}"))),
        };
        Ok(skill)
    }

    /// Read-only skills never change engine state.
    pub fn is_query(&self) -> bool {
        matches!(
            self,
            Skill::GetGameState
                | Skill::GetMarket
                | Skill::GetFeed { .. }
                | Skill::GetReputation { .. }
                | Skill::QuoteTrade { .. }
        )
    }
}

/// Body of every dispatch reply, success or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl SkillResult {
    fn ok(message: impl Into<String>, data: Value) -> Self {
        Self { success: true, message: message.into(), data: Some(data) }
    }

    fn rejected(rejection: &Rejection) -> Self {
        Self { success: false, message: rejection.to_string(), data: None }
    }
}

fn respond<T: Serialize>(
    result: Result<T, Rejection>,
    message: impl FnOnce(&T) -> String,
) -> SkillResult {
    match result {
        Ok(value) => {
            let message = message(&value);
            SkillResult {
                success: true,
                message,
                data: serde_json::to_value(&value).ok(),
            }
        }
        Err(rejection) => SkillResult::rejected(&rejection),
    }
}

/// Run `skill` for the verified caller `agent_id`.
pub fn dispatch(engine: &mut SessionEngine, agent_id: &str, skill: Skill) -> SkillResult {
    match skill {
        Skill::JoinGame { name, agent_type } => respond(
            engine.join_lobby(agent_id, &name, agent_type),
            |n| format!("Joined lobby ({n} waiting)"),
        ),
        Skill::LeaveGame => respond(engine.leave_lobby(agent_id), |_| "Left lobby".into()),
        Skill::GetGameState => {
            let you = engine.agent_view(agent_id).ok();
            SkillResult::ok(
                format!("Phase {}", engine.phase()),
                json!({ "game": engine.state_view(), "you": you }),
            )
        }
        Skill::GetMarket => respond(engine.market_snapshot(), |m| m.to_string()),
        Skill::GetFeed { limit } => {
            let posts = engine.feed(limit);
            SkillResult::ok(format!("{} posts", posts.len()), json!({ "posts": posts }))
        }
        Skill::GetReputation { agent_id: target } => {
            let score = engine.reputation_of(target.as_deref().unwrap_or(agent_id));
            SkillResult::ok(format!("Overall {:.2}", score.overall_score), json!(score))
        }
        Skill::QuoteTrade { outcome, by } => match by {
            QuoteBy::Shares(shares) => respond(engine.quote(outcome, shares), |cost| {
                format!("{shares} {outcome} costs {cost:.6}")
            })
            .with_data(|cost| json!({ "outcome": outcome, "shares": shares, "cost": cost })),
            QuoteBy::Amount(amount) => respond(engine.quote_spend(outcome, amount), |shares| {
                format!("{amount} buys {shares:.6} {outcome}")
            })
            .with_data(|shares| json!({ "outcome": outcome, "amount": amount, "shares": shares })),
        },
        Skill::PlaceBet { outcome, amount } => respond(
            engine.place_bet(agent_id, outcome, amount),
            |r| format!("Bought {:.6} {outcome} for {:.2}", r.fill.shares, r.fill.amount),
        ),
        Skill::SellShares { outcome, shares } => respond(
            engine.sell_shares(agent_id, outcome, shares),
            |r| format!("Sold {:.6} {outcome} for {:.2}", r.fill.shares, r.fill.amount),
        ),
        Skill::PostToFeed { content } => {
            respond(engine.post_to_feed(agent_id, &content), |_| "Posted".into())
        }
        Skill::SendDm { to, content } => {
            respond(engine.send_direct_message(agent_id, &to, &content), |_| "Message sent".into())
        }
        Skill::Follow { target } => respond(engine.follow(agent_id, &target), |changed| {
            if *changed { "Now following".into() } else { "Already following".into() }
        }),
        Skill::Unfollow { target } => respond(engine.unfollow(agent_id, &target), |changed| {
            if *changed { "Unfollowed".into() } else { "Was not following".into() }
        }),
        Skill::ReactToPost { post_id, reaction } => respond(
            engine.react_to_post(agent_id, &post_id, reaction),
            |_| "Reaction recorded".into(),
        ),
        Skill::SubmitFeedback { target, category, rating, comment } => respond(
            engine.submit_feedback(agent_id, &target, category, rating, &comment),
            |s| format!("Feedback recorded, overall {:.2}", s.overall_score),
        ),
        Skill::CreateGroup { name, members } => respond(
            engine.create_group(agent_id, &name, &members),
            |g| format!("Group {} created", g.name),
        ),
        Skill::SendGroupMessage { group_id, content } => respond(
            engine.send_group_message(agent_id, &group_id, &content),
            |_| "Group message sent".into(),
        ),
        Skill::LeaveGroup { group_id } => {
            respond(engine.leave_group(agent_id, &group_id), |_| "Left group".into())
        }
        Skill::InviteToGroup { group_id, invitee } => respond(
            engine.invite_to_group(agent_id, &group_id, &invitee),
            |_| "Invitation accepted".into(),
        ),
    }
}

impl SkillResult {
    /// Replace the payload of a successful numeric reply.
    fn with_data(mut self, shape: impl FnOnce(f64) -> Value) -> Self {
        if let Some(n) = self.data.as_ref().and_then(Value::as_f64) {
            self.data = Some(shape(n));
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
