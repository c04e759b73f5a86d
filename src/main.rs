//! CALIGULAND: social prediction-market game server
//!
//! Entry point. Loads configuration, initialises structured logging, wires
//! the optional chain, attestation, reputation and registry collaborators,
//! then runs the game clock and the HTTP server until Ctrl+C.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use caliguland::chain::http::HttpChainClient;
use caliguland::config;
use caliguland::engine::runtime::GameRuntime;
use caliguland::engine::{Broadcaster, GameEvent, SessionEngine};
use caliguland::gateway::registry::HttpIdentityRegistry;
use caliguland::gateway::SkillGateway;
use caliguland::oracle::attest::LocalAttestor;
use caliguland::reputation::mirror::HttpReputationMirror;
use caliguland::server;

const BANNER: &str = r#"
   ____      _ _             _                 _
  / ___|__ _| (_) __ _ _   _| | __ _ _ __   __| |
 | |   / _` | | |/ _` | | | | |/ _` | '_ \ / _` |
 | |__| (_| | | | (_| | |_| | | (_| | | | | (_| |
  \____\__,_|_|_|\__, |\__,_|_|\__,_|_| |_|\__,_|
                 |___/

  Social prediction-market game server
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = config::AppConfig::load("config.toml")?;

    init_logging();

    println!("{BANNER}");
    info!(
        tick_interval_ms = cfg.game.tick_interval_ms,
        ticks_per_day = cfg.game.ticks_per_day(),
        total_days = cfg.game.total_days,
        min_players = cfg.game.min_players,
        max_players = cfg.game.max_players,
        liquidity_b = cfg.game.liquidity_b,
        "Caliguland starting up"
    );

    // -- Initialise components -------------------------------------------

    let engine = SessionEngine::new(cfg.game.clone(), log_broadcaster());

    let attestor = LocalAttestor::generate()?;
    info!(public_key = %attestor.public_key_hex(), "Oracle attestation key generated");
    let mut runtime = GameRuntime::new(engine).with_attestor(Arc::new(attestor));

    match (&cfg.chain.endpoint, cfg.chain.enabled) {
        (Some(endpoint), true) => {
            info!(endpoint = %endpoint, "Chain settlement enabled");
            runtime = runtime.with_chain(Arc::new(HttpChainClient::new(endpoint, cfg.chain.api_key())?));
        }
        (None, true) => warn!("Chain enabled but no endpoint configured, running off-chain"),
        _ => info!("Chain settlement disabled"),
    }

    match (&cfg.reputation.endpoint, cfg.reputation.mirror_enabled) {
        (Some(endpoint), true) => {
            info!(endpoint = %endpoint, "Reputation mirror enabled");
            runtime = runtime.with_mirror(
                Arc::new(HttpReputationMirror::new(endpoint)?),
                cfg.reputation.clone(),
            );
        }
        (None, true) => warn!("Reputation mirror enabled but no endpoint configured"),
        _ => {}
    }

    let runtime = Arc::new(runtime);
    let mut gateway = SkillGateway::new(runtime.clone(), &cfg.gateway);
    if cfg.gateway.require_registry {
        match &cfg.gateway.registry_endpoint {
            Some(endpoint) => {
                info!(endpoint = %endpoint, "Identity registry gate enabled");
                gateway = gateway.with_registry(Arc::new(HttpIdentityRegistry::new(endpoint)?));
            }
            None => warn!("require_registry is set but no registry_endpoint configured"),
        }
    }

    // -- Run -------------------------------------------------------------

    let (stop_tx, stop_rx) = watch::channel(false);

    let clock = tokio::spawn(runtime.clone().run(
        Duration::from_millis(cfg.game.tick_interval_ms),
        stopped(stop_rx.clone()),
    ));

    let http = tokio::spawn(server::serve(Arc::new(gateway), cfg.server.port, stopped(stop_rx)));

    info!("Serving. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received.");
    let _ = stop_tx.send(true);

    clock.await?;
    http.await??;

    let engine = runtime.engine().lock().await;
    info!(
        phase = %engine.phase(),
        archived_sessions = engine.archive().len(),
        "Caliguland shut down cleanly."
    );

    Ok(())
}

/// Resolves once the stop flag flips.
async fn stopped(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            break;
        }
    }
}

/// Engine events go to the log until a fan-out transport subscribes.
fn log_broadcaster() -> Broadcaster {
    Arc::new(|event: &GameEvent| match serde_json::to_string(event) {
        Ok(json) => debug!(kind = event.kind(), event = %json, "Game event"),
        Err(e) => warn!(kind = event.kind(), error = %e, "Unserializable game event"),
    })
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("caliguland=info"));

    let json_logging = std::env::var("CALIGULAND_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
