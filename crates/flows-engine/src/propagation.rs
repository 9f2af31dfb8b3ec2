//! Flow-rate propagator.
//!
//! Recomputes the proportional shares a flow's pools pay to its direct
//! children and pushes net changes to flows fed through sibling edges.
//!
//! The funding graph has two kinds of edges:
//! - **structural**: parent → child rows stored in the children keyspace.
//!   Shares are written directly onto the child row.
//! - **sibling**: a child row that names a flow contract whose canonical
//!   row lives under a different parent. That canonical row only receives
//!   the *difference* between the value pushed now and the value pushed last
//!   time (the sibling snapshot), so repeated passes are idempotent and no
//!   subtree walk is needed.
//!
//! Shares use floor division; the rounding remainder stays with the pool.

use tracing::debug;

use flows_core::error::{FlowsError, InvariantError};
use flows_core::events::EventContext;
use flows_core::store::FlowStore;
use flows_core::types::{Address, FlowRates, Grant, GrantId};

use crate::lookup::require_grant;
use crate::math::{mul_div_floor, settle_earnings, RateDelta};

/// Summary of one recompute pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecomputeReport {
    pub parent_id: GrantId,
    pub children: usize,
    /// Child rows whose incoming rate changed.
    pub direct_writes: usize,
    /// Sibling targets that received a non-zero delta.
    pub sibling_writes: usize,
    /// Sum of all direct shares; at most the parent's pool rates.
    pub distributed: FlowRates,
}

impl RecomputeReport {
    pub fn writes(&self) -> usize {
        self.direct_writes + self.sibling_writes
    }
}

/// Proportional shares of `parent`'s pools for each of `children`, in order.
///
/// `total = parent.self_units + Σ child.units` per pool; a zero total gives
/// every child a zero share.
pub fn compute_shares(parent: &Grant, children: &[Grant]) -> Vec<FlowRates> {
    let total_baseline = children
        .iter()
        .fold(parent.self_baseline_units, |acc, c| acc.saturating_add(c.baseline_member_units));
    let total_bonus = children
        .iter()
        .fold(parent.self_bonus_units, |acc, c| acc.saturating_add(c.bonus_member_units));

    children
        .iter()
        .map(|child| {
            FlowRates::new(
                mul_div_floor(parent.monthly_baseline_pool_flow_rate, child.baseline_member_units, total_baseline),
                mul_div_floor(parent.monthly_bonus_pool_flow_rate, child.bonus_member_units, total_bonus),
            )
        })
        .collect()
}

fn add_rates(a: &FlowRates, b: &FlowRates) -> FlowRates {
    FlowRates {
        total: a.total.saturating_add(b.total),
        baseline: a.baseline.saturating_add(b.baseline),
        bonus: a.bonus.saturating_add(b.bonus),
    }
}

/// Recompute and write the shares of every direct child of `parent_id`,
/// then propagate sibling deltas.
///
/// Child rows are only written when their rate actually changes, so a second
/// pass without intervening changes writes nothing.
pub fn recompute_child_shares<S: FlowStore + ?Sized>(
    store: &mut S,
    ctx: &EventContext,
    parent_id: &GrantId,
) -> Result<RecomputeReport, FlowsError> {
    let parent = require_grant(store, parent_id)?;
    let child_ids = store.children(parent_id)?;
    let children = child_ids
        .iter()
        .map(|id| require_grant(store, id))
        .collect::<Result<Vec<_>, _>>()?;
    let shares = compute_shares(&parent, &children);

    let mut report = RecomputeReport {
        parent_id: parent_id.clone(),
        children: children.len(),
        ..RecomputeReport::default()
    };

    for (child, share) in children.iter().zip(&shares) {
        report.distributed = add_rates(&report.distributed, share);
        let incoming = add_rates(share, &child.sibling_inflow);
        if child.incoming() == incoming {
            continue;
        }
        let mut updated = child.clone();
        settle_earnings(&mut updated, ctx.block_timestamp);
        updated.set_incoming(incoming);
        updated.updated_at = ctx.block_timestamp;
        store.put_grant(&updated)?;
        report.direct_writes += 1;
    }

    for (child, share) in children.iter().zip(&shares) {
        if !child.is_flow {
            continue;
        }
        let Some(canonical) = store.flow_contract_grant(&child.recipient)? else {
            continue;
        };
        // Direct children are already covered by the writes above.
        if canonical == child.id || canonical == *parent_id || child_ids.contains(&canonical) {
            continue;
        }
        if apply_sibling_delta(store, ctx, &child.recipient, parent_id, *share)? {
            report.sibling_writes += 1;
        }
    }

    debug!(
        parent = %parent_id,
        children = report.children,
        direct_writes = report.direct_writes,
        sibling_writes = report.sibling_writes,
        "recomputed child shares"
    );
    Ok(report)
}

/// Push `new` as the rate `parent_id` now feeds to the flow contract
/// `recipient` through a sibling edge.
///
/// Only `new - snapshot` is applied to the recipient's canonical row, with
/// every field clamped at zero. Returns whether anything was written; an
/// unchanged value writes nothing and needs no canonical row.
pub fn apply_sibling_delta<S: FlowStore + ?Sized>(
    store: &mut S,
    ctx: &EventContext,
    recipient: &Address,
    parent_id: &GrantId,
    new: FlowRates,
) -> Result<bool, FlowsError> {
    let previous = store
        .sibling_snapshot(ctx.chain_id, recipient, parent_id)?
        .unwrap_or_default();
    let delta = RateDelta::between(&new, &previous);
    if delta.is_zero() {
        return Ok(false);
    }

    let target_id = store
        .flow_contract_grant(recipient)?
        .ok_or_else(|| InvariantError::MissingFlowContract(recipient.to_string()))?;
    let mut target = require_grant(store, &target_id)?;
    settle_earnings(&mut target, ctx.block_timestamp);
    target.set_incoming(delta.apply(&target.incoming()));
    target.sibling_inflow = delta.apply(&target.sibling_inflow);
    target.updated_at = ctx.block_timestamp;
    store.put_grant(&target)?;

    if new.is_zero() {
        store.delete_sibling_snapshot(ctx.chain_id, recipient, parent_id)?;
    } else {
        store.put_sibling_snapshot(ctx.chain_id, recipient, parent_id, &new)?;
    }

    debug!(
        target = %target_id,
        parent = %parent_id,
        delta = delta.total,
        "applied sibling delta"
    );
    Ok(true)
}
