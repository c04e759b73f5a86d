//! Automated market maker for the session's binary question.
//!
//! Holds the pooled YES/NO quantities, every agent's per-outcome share
//! balance, and the append-only trade ledger. Each trade computes its full
//! delta, validates it, and only then mutates state, so a rejected trade
//! leaves the maker untouched.

pub mod lmsr;

use chrono::Utc;
use std::collections::BTreeMap;
use tracing::debug;

use crate::types::{
    AgentId, Bet, Fill, MarketSnapshot, Outcome, Payout, Position, Rejection, TradeKind,
};

/// Shares below this are treated as dust and zeroed.
const DUST: f64 = 1e-9;

#[derive(Debug)]
pub struct MarketMaker {
    /// Liquidity parameter `b`.
    liquidity: f64,
    /// Largest single trade, in currency.
    max_trade_cost: f64,
    q_yes: f64,
    q_no: f64,
    total_volume: f64,
    positions: BTreeMap<AgentId, Position>,
    ledger: Vec<Bet>,
}

impl MarketMaker {
    pub fn new(liquidity: f64, max_trade_cost: f64) -> Self {
        Self {
            liquidity,
            max_trade_cost,
            q_yes: 0.0,
            q_no: 0.0,
            total_volume: 0.0,
            positions: BTreeMap::new(),
            ledger: Vec::new(),
        }
    }

    pub fn liquidity(&self) -> f64 {
        self.liquidity
    }

    /// Outstanding pooled shares for `outcome`.
    pub fn outstanding(&self, outcome: Outcome) -> f64 {
        match outcome {
            Outcome::Yes => self.q_yes,
            Outcome::No => self.q_no,
        }
    }

    /// Current (unrounded) price of `outcome`.
    pub fn price(&self, outcome: Outcome) -> f64 {
        lmsr::price(outcome, self.q_yes, self.q_no, self.liquidity)
    }

    /// Cost of buying `shares` of `outcome` right now. Pure.
    pub fn quote(&self, outcome: Outcome, shares: f64) -> f64 {
        lmsr::round(lmsr::trade_cost(
            outcome,
            self.q_yes,
            self.q_no,
            shares,
            self.liquidity,
        ))
    }

    /// Shares of `outcome` that `amount` currency would buy right now. Pure.
    pub fn quote_spend(&self, outcome: Outcome, amount: f64) -> f64 {
        lmsr::round(lmsr::shares_for_spend(
            outcome,
            self.q_yes,
            self.q_no,
            amount,
            self.liquidity,
        ))
    }

    pub fn position(&self, agent_id: &str) -> Position {
        self.positions.get(agent_id).copied().unwrap_or_default()
    }

    pub fn positions(&self) -> &BTreeMap<AgentId, Position> {
        &self.positions
    }

    pub fn ledger(&self) -> &[Bet] {
        &self.ledger
    }

    pub fn snapshot(&self) -> MarketSnapshot {
        let yes_odds = lmsr::round(self.price(Outcome::Yes));
        MarketSnapshot {
            yes_shares: lmsr::round(self.q_yes),
            no_shares: lmsr::round(self.q_no),
            yes_odds,
            no_odds: 1.0 - yes_odds,
            total_volume: lmsr::round(self.total_volume),
            liquidity: self.liquidity,
            trades: self.ledger.len(),
        }
    }

    /// Spend `amount` currency on `outcome`.
    ///
    /// `available` is the agent's spendable balance; the caller debits
    /// `fill.amount` from it on success.
    pub fn buy(
        &mut self,
        agent_id: &str,
        outcome: Outcome,
        amount: f64,
        available: f64,
        day: u32,
    ) -> Result<Fill, Rejection> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(Rejection::InvalidAmount(amount));
        }
        if amount > self.max_trade_cost {
            return Err(Rejection::TradeTooLarge { cost: amount, max: self.max_trade_cost });
        }
        if amount > available {
            return Err(Rejection::InsufficientBalance { needed: amount, available });
        }

        let shares = self.quote_spend(outcome, amount);
        if !shares.is_finite() || shares <= 0.0 {
            return Err(Rejection::InvalidAmount(amount));
        }
        let cost = self.quote(outcome, shares);
        if cost > available {
            return Err(Rejection::InsufficientBalance { needed: cost, available });
        }

        let price_before = self.price(outcome);
        let (after_yes, after_no) = lmsr::shifted(outcome, self.q_yes, self.q_no, shares);
        let price_after = lmsr::price(outcome, after_yes, after_no, self.liquidity);
        if !(price_after > 0.0 && price_after < 1.0) {
            return Err(Rejection::PriceOutOfBounds);
        }

        // Commit.
        self.q_yes = after_yes;
        self.q_no = after_no;
        *self
            .positions
            .entry(agent_id.to_string())
            .or_default()
            .shares_mut(outcome) += shares;
        self.total_volume += cost;
        self.record(agent_id, outcome, TradeKind::Buy, cost, shares, day, price_before);

        debug!(agent_id, %outcome, shares, cost, price_after, "Buy executed");

        Ok(Fill {
            outcome,
            kind: TradeKind::Buy,
            shares,
            amount: cost,
            price_before: lmsr::round(price_before),
            price_after: lmsr::round(price_after),
        })
    }

    /// Sell `shares` of `outcome` back to the pool. The caller credits
    /// `fill.amount` to the agent's balance on success.
    pub fn sell(
        &mut self,
        agent_id: &str,
        outcome: Outcome,
        shares: f64,
        day: u32,
    ) -> Result<Fill, Rejection> {
        if !shares.is_finite() || shares <= 0.0 {
            return Err(Rejection::InvalidAmount(shares));
        }
        let shares = lmsr::round(shares);
        let held = self.position(agent_id).shares(outcome);
        if shares > held + DUST {
            return Err(Rejection::InsufficientShares { needed: shares, available: held });
        }
        let shares = shares.min(held);

        let price_before = self.price(outcome);
        let proceeds = -self.quote(outcome, -shares);
        if !proceeds.is_finite() || proceeds < 0.0 {
            return Err(Rejection::PriceOutOfBounds);
        }
        let (after_yes, after_no) = lmsr::shifted(outcome, self.q_yes, self.q_no, -shares);

        // Commit.
        self.q_yes = after_yes.max(0.0);
        self.q_no = after_no.max(0.0);
        if let Some(pos) = self.positions.get_mut(agent_id) {
            let slot = pos.shares_mut(outcome);
            *slot -= shares;
            if *slot < DUST {
                *slot = 0.0;
            }
        }
        self.total_volume += proceeds;
        self.record(agent_id, outcome, TradeKind::Sell, proceeds, shares, day, price_before);

        let price_after = self.price(outcome);
        debug!(agent_id, %outcome, shares, proceeds, price_after, "Sell executed");

        Ok(Fill {
            outcome,
            kind: TradeKind::Sell,
            shares,
            amount: proceeds,
            price_before: lmsr::round(price_before),
            price_after: lmsr::round(price_after),
        })
    }

    /// Redeem every winning share 1:1. Agents holding no winning shares get
    /// nothing and are omitted.
    pub fn settle(&self, winner: Outcome) -> Vec<Payout> {
        self.positions
            .iter()
            .filter_map(|(agent_id, pos)| {
                let shares = pos.shares(winner);
                (shares > 0.0).then(|| Payout {
                    agent_id: agent_id.clone(),
                    shares,
                    amount: lmsr::round(shares),
                })
            })
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &mut self,
        agent_id: &str,
        outcome: Outcome,
        kind: TradeKind,
        amount: f64,
        shares: f64,
        day: u32,
        odds: f64,
    ) {
        self.ledger.push(Bet {
            id: uuid::Uuid::new_v4().to_string(),
            agent_id: agent_id.to_string(),
            outcome,
            kind,
            amount,
            shares,
            day,
            odds: lmsr::round(odds),
            timestamp: Utc::now(),
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
