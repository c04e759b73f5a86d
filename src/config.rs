//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (bridge API keys) are referenced by env-var name in the config
//! and resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub game: GameConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub reputation: ReputationConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Session timing, roster limits and market parameters.
#[derive(Debug, Deserialize, Clone)]
pub struct GameConfig {
    pub tick_interval_ms: u64,
    pub game_duration_ms: u64,
    /// In-game days per session. Resolution happens on the last day.
    pub total_days: u32,
    /// Last day of EARLY.
    pub early_end_day: u32,
    /// Last day of MID.
    pub mid_end_day: u32,
    /// Day betting closes and REVEAL begins.
    pub betting_close_day: u32,
    /// Ticks spent in ENDED before the session is archived.
    pub debrief_ticks: u32,
    pub min_players: usize,
    pub max_players: usize,
    /// LMSR liquidity parameter `b`.
    pub liquidity_b: f64,
    pub max_trade_cost: f64,
    pub starting_balance: f64,
    pub max_post_length: usize,
    /// Seed for scenario and outcome selection. Random when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            game_duration_ms: 60 * 60 * 1_000,
            total_days: 30,
            early_end_day: 10,
            mid_end_day: 20,
            betting_close_day: 29,
            debrief_ticks: 30,
            min_players: 5,
            max_players: 20,
            liquidity_b: 100.0,
            max_trade_cost: 1_000.0,
            starting_balance: 1_000.0,
            max_post_length: 280,
            seed: None,
        }
    }
}

impl GameConfig {
    /// Ticks per in-game day, never zero.
    pub fn ticks_per_day(&self) -> u64 {
        let per_day_ms = self.game_duration_ms / u64::from(self.total_days.max(1));
        (per_day_ms / self.tick_interval_ms.max(1)).max(1)
    }

    /// Reject thresholds that would make the phase machine inconsistent.
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 {
            anyhow::bail!("tick_interval_ms must be positive");
        }
        if self.min_players == 0 || self.min_players > self.max_players {
            anyhow::bail!(
                "min_players ({}) must be between 1 and max_players ({})",
                self.min_players,
                self.max_players
            );
        }
        if !(self.liquidity_b.is_finite() && self.liquidity_b > 0.0) {
            anyhow::bail!("liquidity_b must be positive, got {}", self.liquidity_b);
        }
        if !(self.max_trade_cost > 0.0 && self.starting_balance >= 0.0) {
            anyhow::bail!("max_trade_cost must be positive and starting_balance non-negative");
        }
        if !(1 <= self.early_end_day
            && self.early_end_day <= self.mid_end_day
            && self.mid_end_day < self.betting_close_day
            && self.betting_close_day < self.total_days)
        {
            anyhow::bail!(
                "day thresholds must satisfy 1 <= early_end ({}) <= mid_end ({}) < betting_close ({}) < total_days ({})",
                self.early_end_day,
                self.mid_end_day,
                self.betting_close_day,
                self.total_days
            );
        }
        if self.max_post_length == 0 {
            anyhow::bail!("max_post_length must be positive");
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    /// Maximum envelope age, and replay-window length.
    pub freshness_window_secs: u64,
    /// Require signers to be present in the identity registry.
    #[serde(default)]
    pub require_registry: bool,
    #[serde(default)]
    pub registry_endpoint: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            freshness_window_secs: 300,
            require_registry: false,
            registry_endpoint: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ChainConfig {
    pub enabled: bool,
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Name of the env var holding the bridge API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl ChainConfig {
    /// Resolve the bridge API key, if one is configured and set.
    pub fn api_key(&self) -> Option<SecretString> {
        self.api_key_env
            .as_deref()
            .and_then(|env| AppConfig::resolve_env(env).ok())
            .map(SecretString::new)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReputationConfig {
    pub mirror_enabled: bool,
    #[serde(default)]
    pub endpoint: Option<String>,
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    /// How often pending feedback is flushed, in ticks.
    pub flush_every_ticks: u64,
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            mirror_enabled: false,
            endpoint: None,
            batch_size: 5,
            batch_delay_ms: 250,
            flush_every_ticks: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Invalid config file: {path}"))
    }

    /// Parse and validate configuration from TOML text.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(contents).context("Failed to parse config TOML")?;
        config.game.validate()?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
