//! Logarithmic Market Scoring Rule math.
//!
//! Pure functions over the outstanding share quantities `(q_yes, q_no)` and
//! the liquidity parameter `b`. Every exponential goes through
//! [`log_sum_exp`] so large share imbalances never overflow.

use crate::types::Outcome;

/// Decimal places kept on prices, shares and amounts.
pub const PRECISION: i32 = 6;

/// Round to [`PRECISION`] decimal places.
pub fn round(value: f64) -> f64 {
    let scale = 10f64.powi(PRECISION);
    (value * scale).round() / scale
}

/// `ln(e^a + e^c)` with the larger exponent factored out.
pub fn log_sum_exp(a: f64, c: f64) -> f64 {
    let m = a.max(c);
    if m == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    m + ((a - m).exp() + (c - m).exp()).ln()
}

/// Cost function `C(q) = b * ln(e^(q_yes/b) + e^(q_no/b))`.
pub fn cost(q_yes: f64, q_no: f64, b: f64) -> f64 {
    b * log_sum_exp(q_yes / b, q_no / b)
}

/// Instantaneous price of YES.
pub fn price_yes(q_yes: f64, q_no: f64, b: f64) -> f64 {
    let y = q_yes / b;
    let n = q_no / b;
    let m = y.max(n);
    let ey = (y - m).exp();
    let en = (n - m).exp();
    ey / (ey + en)
}

/// Instantaneous price of `outcome`.
pub fn price(outcome: Outcome, q_yes: f64, q_no: f64, b: f64) -> f64 {
    match outcome {
        Outcome::Yes => price_yes(q_yes, q_no, b),
        Outcome::No => 1.0 - price_yes(q_yes, q_no, b),
    }
}

/// Quantities after adding `delta` shares of `outcome`.
pub fn shifted(outcome: Outcome, q_yes: f64, q_no: f64, delta: f64) -> (f64, f64) {
    match outcome {
        Outcome::Yes => (q_yes + delta, q_no),
        Outcome::No => (q_yes, q_no + delta),
    }
}

/// Cost of moving the pool by `delta` shares of `outcome`.
///
/// Positive for purchases, negative for sales.
pub fn trade_cost(outcome: Outcome, q_yes: f64, q_no: f64, delta: f64, b: f64) -> f64 {
    let (ay, an) = shifted(outcome, q_yes, q_no, delta);
    cost(ay, an, b) - cost(q_yes, q_no, b)
}

/// Shares of `outcome` that `spend` currency buys: the exact inverse of
/// [`trade_cost`].
///
/// Solving `C(q_self + d, q_other) - C(q_self, q_other) = s` gives
/// `d = b * ln(e^(s/b) + (e^(s/b) - 1) * e^((q_other - q_self)/b))`.
pub fn shares_for_spend(outcome: Outcome, q_yes: f64, q_no: f64, spend: f64, b: f64) -> f64 {
    if spend <= 0.0 {
        return 0.0;
    }
    let (q_self, q_other) = match outcome {
        Outcome::Yes => (q_yes, q_no),
        Outcome::No => (q_no, q_yes),
    };
    let s = spend / b;
    // ln(e^s - 1), kept finite for large s.
    let ln_expm1 = if s > 30.0 {
        s + (-(-s).exp()).ln_1p()
    } else {
        s.exp_m1().ln()
    };
    let tail = ln_expm1 + (q_other - q_self) / b;
    b * log_sum_exp(s, tail)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
