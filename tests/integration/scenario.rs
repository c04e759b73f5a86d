//! Full sessions driven through the runtime: lobby to archive, with chain
//! sync and attestation wired in.

use std::sync::{Arc, Mutex};

use caliguland::engine::runtime::GameRuntime;
use caliguland::engine::{GameEvent, SessionEngine};
use caliguland::oracle::{compute_commitment, LocalAttestor};
use caliguland::types::{AgentType, Outcome, Phase};

use crate::mock_chain::{RecordingChain, Recorded};
use crate::{fast_config, scenario_with};

fn player(n: u8) -> String {
    format!("0x{:02x}{}", n, "cd".repeat(31))
}

struct Harness {
    runtime: GameRuntime,
    chain: Arc<RecordingChain>,
    events: Arc<Mutex<Vec<&'static str>>>,
}

fn harness(outcome: Outcome) -> Harness {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let mut engine = SessionEngine::new(
        fast_config(),
        Arc::new(move |e: &GameEvent| sink.lock().unwrap().push(e.kind())),
    );
    engine.queue_scenario(scenario_with(outcome));

    let chain = Arc::new(RecordingChain::new());
    let runtime = GameRuntime::new(engine)
        .with_chain(chain.clone())
        .with_attestor(Arc::new(LocalAttestor::from_secret(&[3u8; 32]).unwrap()));
    Harness { runtime, chain, events }
}

async fn join_five(runtime: &GameRuntime) {
    runtime
        .with_engine(|engine| {
            for i in 0..5 {
                engine.join_lobby(&player(i), &format!("p{i}"), AgentType::Ai).unwrap();
            }
        })
        .await;
}

async fn tick_until(runtime: &GameRuntime, phase: Phase) {
    for _ in 0..64 {
        if runtime.with_engine(|e| e.phase()).await == phase {
            return;
        }
        runtime.tick().await.unwrap();
    }
    panic!("never reached {phase}");
}

#[tokio::test]
async fn test_full_session_settles_and_archives() {
    let h = harness(Outcome::Yes);
    join_five(&h.runtime).await;

    let report = h.runtime.tick().await.unwrap();
    assert!(report.started);

    let (session_id, hash, attested) = h
        .runtime
        .with_engine(|e| {
            let s = e.session().unwrap();
            (s.id().to_string(), s.commitment_hash().to_string(), s.attestation().is_some())
        })
        .await;
    assert!(attested);
    assert_eq!(
        h.chain.calls()[0],
        Recorded::Commit { session_id: session_id.clone(), commitment_hash: hash.clone() }
    );

    let yes = h
        .runtime
        .with_engine(|e| e.place_bet(&player(0), Outcome::Yes, 100.0))
        .await
        .unwrap();
    let expected_shares = 100.0 * (2.0 * std::f64::consts::E - 1.0).ln();
    assert!((yes.fill.shares - expected_shares).abs() < 1e-3);
    assert!(yes.market.yes_odds > 0.5);

    h.runtime
        .with_engine(|e| e.place_bet(&player(1), Outcome::No, 50.0))
        .await
        .unwrap();
    assert!(h
        .chain
        .calls()
        .iter()
        .any(|c| matches!(c, Recorded::Bet { outcome: Outcome::No, .. })));

    tick_until(&h.runtime, Phase::Reveal).await;
    let late = h
        .runtime
        .with_engine(|e| e.place_bet(&player(2), Outcome::Yes, 10.0))
        .await;
    assert!(late.is_err());

    tick_until(&h.runtime, Phase::Ended).await;
    let (reveal, balances, clues) = h
        .runtime
        .with_engine(|e| {
            let s = e.session().unwrap();
            let balances: Vec<f64> = (0..2).map(|i| s.agent(&player(i)).unwrap().balance).collect();
            (s.reveal().cloned().unwrap(), balances, s.insider_clues().len())
        })
        .await;

    assert_eq!(reveal.outcome, Outcome::Yes);
    assert_eq!(compute_commitment(reveal.outcome, &reveal.salt, &session_id), hash);
    assert!(reveal.verify(&hash).is_ok());
    assert!(clues >= 1);
    assert!((balances[0] - (1_000.0 - 100.0 + yes.fill.shares)).abs() < 1e-3);
    assert!((balances[1] - 950.0).abs() < 1e-3);

    let calls = h.chain.calls();
    assert!(calls.contains(&Recorded::Resolve { outcome: Outcome::Yes, salt: reveal.salt.clone() }));
    assert!(calls.contains(&Recorded::Claim { agent_id: player(0) }));
    assert!(!calls.contains(&Recorded::Claim { agent_id: player(1) }));

    tick_until(&h.runtime, Phase::Lobby).await;
    let archive = h.runtime.with_engine(|e| e.archive().to_vec()).await;
    assert_eq!(archive.len(), 1);
    assert_eq!(archive[0].outcome, Some(Outcome::Yes));
    assert_eq!(archive[0].winners, vec![player(0)]);
    assert!(!archive[0].halted);

    let events = h.events.lock().unwrap();
    let started = events.iter().position(|k| *k == "game_started").unwrap();
    let revealed = events.iter().position(|k| *k == "outcome_revealed").unwrap();
    assert!(started < revealed);
}

#[tokio::test]
async fn test_game_survives_chain_outage() {
    let h = harness(Outcome::No);
    h.chain.go_offline();
    join_five(&h.runtime).await;
    h.runtime.tick().await.unwrap();

    let receipt = h
        .runtime
        .with_engine(|e| e.place_bet(&player(3), Outcome::No, 25.0))
        .await
        .unwrap();
    assert!(receipt.balance < 1_000.0);

    tick_until(&h.runtime, Phase::Ended).await;
    let outcome = h
        .runtime
        .with_engine(|e| e.session().and_then(|s| s.final_outcome()))
        .await;
    assert_eq!(outcome, Some(Outcome::No));
    assert!(h.chain.calls().is_empty());
}

#[tokio::test]
async fn test_lobby_filled_during_session_waits_for_next_game() {
    let h = harness(Outcome::Yes);
    join_five(&h.runtime).await;
    h.runtime.tick().await.unwrap();

    let lobby = h
        .runtime
        .with_engine(|e| e.join_lobby(&player(9), "late", AgentType::Human))
        .await
        .unwrap();
    assert_eq!(lobby, 1);
    let in_session = h
        .runtime
        .with_engine(|e| e.session().unwrap().agent(&player(9)).is_some())
        .await;
    assert!(!in_session);
}
