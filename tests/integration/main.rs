//! End-to-end tests: full sessions through the engine, the runtime and the
//! signed gateway, with an in-memory chain standing in for the bridge.

mod gateway_flow;
mod mock_chain;
mod scenario;

use caliguland::config::GameConfig;
use caliguland::engine::scenarios;
use caliguland::engine::Scenario;
use caliguland::types::Outcome;

/// One tick per in-game day, five players to start.
pub fn fast_config() -> GameConfig {
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
        seed: Some(42),
    }
}

pub fn scenario_with(outcome: Outcome) -> Scenario {
    let mut scenario = scenarios::catalog().remove(0);
    scenario.outcome = outcome;
    scenario
}
