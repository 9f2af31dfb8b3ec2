//! Integer helpers shared by the engine.
//!
//! All arithmetic is on `u128` with floor division. Nothing here panics:
//! division by zero yields zero and overflow saturates.

use flows_core::constants::SECONDS_PER_MONTH;
use flows_core::types::{FlowRates, Grant};

/// `floor(a * b / denominator)`, zero when `denominator` is zero.
///
/// When `a * b` overflows, splits both operands by the denominator:
/// `a*b/d = (a/d)*b + (a%d)*(b/d) + (a%d)*(b%d)/d`, which is exact as long
/// as the result fits; otherwise saturates.
pub fn mul_div_floor(a: u128, b: u128, denominator: u128) -> u128 {
    if denominator == 0 {
        return 0;
    }
    if let Some(product) = a.checked_mul(b) {
        return product / denominator;
    }
    let (aq, ar) = (a / denominator, a % denominator);
    let (bq, br) = (b / denominator, b % denominator);
    let tail = ar.checked_mul(br).map_or(u128::MAX, |p| p / denominator);
    aq.saturating_mul(b)
        .saturating_add(ar.saturating_mul(bq))
        .saturating_add(tail)
}

/// Signed difference `new - old`, saturating at the `i128` range.
pub fn signed_delta(new: u128, old: u128) -> i128 {
    if new >= old {
        i128::try_from(new - old).unwrap_or(i128::MAX)
    } else {
        i128::try_from(old - new).map(|d| -d).unwrap_or(i128::MIN)
    }
}

/// Apply a signed delta to a stored value, never going below zero.
pub fn apply_delta_clamped(value: u128, delta: i128) -> u128 {
    if delta >= 0 {
        value.saturating_add(delta.unsigned_abs())
    } else {
        value.saturating_sub(delta.unsigned_abs())
    }
}

/// Component-wise signed deltas between two rate snapshots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct RateDelta {
    pub total: i128,
    pub baseline: i128,
    pub bonus: i128,
}

impl RateDelta {
    pub fn between(new: &FlowRates, old: &FlowRates) -> Self {
        Self {
            total: signed_delta(new.total, old.total),
            baseline: signed_delta(new.baseline, old.baseline),
            bonus: signed_delta(new.bonus, old.bonus),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.total == 0 && self.baseline == 0 && self.bonus == 0
    }

    pub fn apply(&self, rates: &FlowRates) -> FlowRates {
        FlowRates {
            total: apply_delta_clamped(rates.total, self.total),
            baseline: apply_delta_clamped(rates.baseline, self.baseline),
            bonus: apply_delta_clamped(rates.bonus, self.bonus),
        }
    }
}

/// Accrue earnings and payouts at the current rates up to `now`.
///
/// Must run before any rate on the grant changes so the old rate is
/// charged for the time it was in effect. Returns whether anything changed.
pub fn settle_earnings(grant: &mut Grant, now: u64) -> bool {
    if now <= grant.earnings_settled_at {
        return false;
    }
    let elapsed = u128::from(now - grant.earnings_settled_at);
    let month = u128::from(SECONDS_PER_MONTH);
    grant.total_earned = grant
        .total_earned
        .saturating_add(mul_div_floor(grant.monthly_incoming_flow_rate, elapsed, month));
    if grant.is_flow {
        grant.total_paid_out = grant
            .total_paid_out
            .saturating_add(mul_div_floor(grant.monthly_outgoing_flow_rate, elapsed, month));
    }
    grant.earnings_settled_at = now;
    true
}
