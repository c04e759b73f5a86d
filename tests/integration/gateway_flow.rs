//! A whole game played through signed JSON-RPC envelopes.

use serde_json::{json, Value};
use std::sync::Arc;

use caliguland::config::GatewayConfig;
use caliguland::engine::runtime::GameRuntime;
use caliguland::engine::{events, SessionEngine};
use caliguland::gateway::skills::SkillResult;
use caliguland::gateway::{skill_result, AgentKey, SkillGateway};
use caliguland::types::{Outcome, Phase};

use crate::{fast_config, scenario_with};

const T0: i64 = 1_760_000_000_000;

struct Client {
    key: AgentKey,
    sent: usize,
}

impl Client {
    fn new(seed: u8) -> Self {
        Self { key: AgentKey::from_secret(&[seed; 32]).unwrap(), sent: 0 }
    }

    fn frame(&mut self, skill: &str, data: Value, at: i64) -> Value {
        self.sent += 1;
        let id = format!("{}-{}", &self.key.address()[2..10], self.sent);
        self.key.request(&id, at, skill, data)
    }

    async fn call(&mut self, gw: &SkillGateway, skill: &str, data: Value, at: i64) -> SkillResult {
        let resp = gw.handle_at(self.frame(skill, data, at), at).await;
        assert!(resp.error.is_none(), "{skill}: {:?}", resp.error);
        skill_result(resp.result.as_ref().unwrap()).unwrap()
    }
}

fn gateway() -> SkillGateway {
    let mut engine = SessionEngine::new(fast_config(), events::silent());
    engine.queue_scenario(scenario_with(Outcome::Yes));
    let runtime = Arc::new(GameRuntime::new(engine));
    SkillGateway::new(runtime, &GatewayConfig::default())
}

async fn tick_until(gw: &SkillGateway, phase: Phase) {
    for _ in 0..64 {
        if gw.runtime().with_engine(|e| e.phase()).await == phase {
            return;
        }
        gw.runtime().tick().await.unwrap();
    }
    panic!("never reached {phase}");
}

#[tokio::test]
async fn test_signed_game_end_to_end() {
    let gw = gateway();
    let mut clients: Vec<Client> = (1..=5).map(Client::new).collect();

    for (i, c) in clients.iter_mut().enumerate() {
        let r = c.call(&gw, "join-game", json!({"name": format!("agent-{i}")}), T0).await;
        assert!(r.success, "{}", r.message);
    }
    gw.runtime().tick().await.unwrap();

    let state = clients[0].call(&gw, "get-game-state", json!({}), T0).await;
    let data = state.data.unwrap();
    assert_eq!(data["game"]["phase"], "EARLY");
    assert_eq!(data["game"]["session"]["players"].as_array().unwrap().len(), 5);
    assert!(data["game"]["session"]["outcome"].is_null());

    let quote = clients[0]
        .call(&gw, "quote-trade", json!({"outcome": "yes", "amount": 100}), T0)
        .await;
    let quoted = quote.data.unwrap()["shares"].as_f64().unwrap();

    let bet = clients[0]
        .call(&gw, "place-bet", json!({"outcome": "YES", "amount": 100}), T0)
        .await;
    assert!(bet.success, "{}", bet.message);
    let shares = bet.data.unwrap()["fill"]["shares"].as_f64().unwrap();
    assert!((shares - 100.0 * (2.0 * std::f64::consts::E - 1.0).ln()).abs() < 1e-3);
    assert!((shares - quoted).abs() < 1e-6);

    let post = clients[1]
        .call(&gw, "post-to-feed", json!({"content": "The horse has the votes."}), T0)
        .await;
    assert!(post.success);
    let post_id = post.data.unwrap()["id"].as_str().unwrap().to_string();
    let like = clients[2]
        .call(&gw, "react-to-post", json!({"postId": post_id, "reaction": "like"}), T0)
        .await;
    assert!(like.success, "{}", like.message);

    let target = clients[1].key.address();
    let feedback = clients[2]
        .call(
            &gw,
            "submit-feedback",
            json!({"target": target, "category": "accuracy", "rating": 5}),
            T0,
        )
        .await;
    assert!(feedback.success, "{}", feedback.message);

    let too_big = clients[3]
        .call(&gw, "place-bet", json!({"outcome": "NO", "amount": 5000}), T0)
        .await;
    assert!(!too_big.success);

    tick_until(&gw, Phase::Reveal).await;
    let closed = clients[3]
        .call(&gw, "place-bet", json!({"outcome": "NO", "amount": 10}), T0)
        .await;
    assert!(!closed.success);
    assert_eq!(closed.message, "Betting is closed");

    tick_until(&gw, Phase::Ended).await;
    let end = clients[0].call(&gw, "get-game-state", json!({}), T0).await;
    let data = end.data.unwrap();
    assert_eq!(data["game"]["session"]["outcome"], "YES");
    let balance = data["you"]["agent"]["balance"].as_f64().unwrap();
    assert!((balance - (900.0 + shares)).abs() < 1e-3);

    let rep = clients[4]
        .call(&gw, "get-reputation", json!({"agentId": target}), T0)
        .await;
    assert!(rep.data.unwrap()["overall_score"].as_f64().unwrap() > 50.0);
}

#[tokio::test]
async fn test_replayed_bet_is_not_executed_twice() {
    let gw = gateway();
    let mut clients: Vec<Client> = (11..=15).map(Client::new).collect();
    for c in clients.iter_mut() {
        c.call(&gw, "join-game", json!({}), T0).await;
    }
    gw.runtime().tick().await.unwrap();

    let frame = clients[0].frame("place-bet", json!({"outcome": "NO", "amount": 20}), T0);
    let first = gw.handle_at(frame.clone(), T0).await;
    assert!(first.error.is_none());
    let replay = gw.handle_at(frame, T0 + 2_000).await;
    assert_eq!(replay.error.unwrap().code, -32600);

    let volume = gw
        .runtime()
        .with_engine(|e| e.market_snapshot().unwrap().total_volume)
        .await;
    assert!((volume - 20.0).abs() < 1e-6);
}

#[tokio::test]
async fn test_stale_and_mutated_envelopes_rejected() {
    let gw = gateway();
    let mut c = Client::new(21);

    let stale = c.frame("join-game", json!({}), T0 - 6 * 60 * 1_000);
    assert_eq!(gw.handle_at(stale, T0).await.error.unwrap().code, -32600);

    let mut mutated = c.frame("join-game", json!({"name": "honest"}), T0);
    mutated["params"]["message"]["parts"][0]["data"]["name"] = json!("forged");
    assert_eq!(gw.handle_at(mutated, T0).await.error.unwrap().code, -32001);

    let lobby = gw.runtime().with_engine(|e| e.lobby().count()).await;
    assert_eq!(lobby, 0);
}

#[tokio::test]
async fn test_sell_shares_rejected_once_betting_closes() {
    let gw = gateway();
    let mut clients: Vec<Client> = (31..=35).map(Client::new).collect();
    for c in clients.iter_mut() {
        c.call(&gw, "join-game", json!({}), T0).await;
    }
    gw.runtime().tick().await.unwrap();

    let bet = clients[0]
        .call(&gw, "place-bet", json!({"outcome": "YES", "amount": 50}), T0)
        .await;
    assert!(bet.success, "{}", bet.message);
    let shares = bet.data.unwrap()["fill"]["shares"].as_f64().unwrap();

    let partial = clients[0]
        .call(&gw, "sell-shares", json!({"outcome": "YES", "shares": shares / 2.0}), T0)
        .await;
    assert!(partial.success, "{}", partial.message);

    tick_until(&gw, Phase::Reveal).await;
    let closed = clients[0]
        .call(&gw, "sell-shares", json!({"outcome": "YES", "shares": shares / 4.0}), T0)
        .await;
    assert!(!closed.success);
    assert_eq!(closed.message, "Betting is closed");

    let seller = clients[0].key.address();
    let (held, trades) = gw
        .runtime()
        .with_engine(|e| {
            let market = e.session().unwrap().market();
            (market.position(&seller).yes_shares, market.ledger().len())
        })
        .await;
    assert!((held - shares / 2.0).abs() < 1e-5);
    assert_eq!(trades, 2);
}
