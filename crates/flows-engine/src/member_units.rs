//! Member-unit tracker.
//!
//! The pool oracle reports every member's units in a flow's baseline or bonus
//! pool. Those units are the weights the propagator splits pool rates by.

use tracing::{debug, info};

use flows_core::error::{FlowsError, InvariantError};
use flows_core::events::EventContext;
use flows_core::store::FlowStore;
use flows_core::types::{Address, FlowRates, Grant, GrantId};

use crate::lookup::{require_grant, require_pool_flow};
use crate::math::settle_earnings;
use crate::propagation::apply_sibling_delta;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MemberUnitsOutcome {
    /// The flow's own units in its pool.
    Ignored,
    /// No recipient row yet; units kept for seeding.
    Recorded { flow_id: GrantId },
    Applied {
        flow_id: GrantId,
        row_id: GrantId,
        /// Rows dropped from the flow's child list by removal bookkeeping.
        removed_rows: usize,
    },
}

impl MemberUnitsOutcome {
    /// Flow whose shares must be recomputed, if any row changed.
    pub fn recompute_target(&self) -> Option<&GrantId> {
        match self {
            Self::Applied { flow_id, .. } => Some(flow_id),
            Self::Ignored | Self::Recorded { .. } => None,
        }
    }
}

/// The row a units update applies to: the latest active row, else the latest.
pub fn target_row<S: FlowStore + ?Sized>(
    store: &S,
    parent_id: &GrantId,
    member: &Address,
) -> Result<Option<Grant>, FlowsError> {
    let mut latest = None;
    for id in store.recipient_rows(parent_id, member)?.iter().rev() {
        let row = require_grant(store, id)?;
        if row.is_active && !row.is_removed {
            return Ok(Some(row));
        }
        if latest.is_none() {
            latest = Some(row);
        }
    }
    Ok(latest)
}

pub fn apply_member_units<S: FlowStore + ?Sized>(
    store: &mut S,
    ctx: &EventContext,
    pool: &Address,
    member: &Address,
    new_units: u128,
) -> Result<MemberUnitsOutcome, FlowsError> {
    let flow = require_pool_flow(store, pool)?;
    let (is_baseline, is_bonus) = flow.pool_kind(pool);
    if is_baseline == is_bonus {
        return Err(InvariantError::AmbiguousPool {
            pool: pool.to_string(),
            grant: flow.id.to_string(),
            matches: usize::from(is_baseline) + usize::from(is_bonus),
        }
        .into());
    }
    if *member == flow.recipient {
        debug!(flow = %flow.id, %pool, "ignoring flow's own member units");
        return Ok(MemberUnitsOutcome::Ignored);
    }

    store.put_pool_member_units(pool, member, new_units)?;

    let Some(mut row) = target_row(store, &flow.id, member)? else {
        debug!(flow = %flow.id, %member, new_units, "member units recorded before recipient row");
        return Ok(MemberUnitsOutcome::Recorded { flow_id: flow.id });
    };

    let previous_baseline = row.baseline_member_units;
    if is_baseline {
        row.baseline_member_units = new_units;
    } else {
        row.bonus_member_units = new_units;
    }
    row.member_units = row.baseline_member_units.saturating_add(row.bonus_member_units);
    row.updated_at = ctx.block_timestamp;
    store.put_grant(&row)?;

    let removed_rows = if is_baseline && previous_baseline > 0 && new_units == 0 {
        run_removal_bookkeeping(store, ctx, &flow.id, member)?
    } else {
        0
    };

    debug!(
        flow = %flow.id,
        row = %row.id,
        baseline = row.baseline_member_units,
        bonus = row.bonus_member_units,
        "member units applied"
    );
    Ok(MemberUnitsOutcome::Applied {
        flow_id: flow.id,
        row_id: row.id,
        removed_rows,
    })
}

/// Detach `recipient` from `parent_id` once it no longer participates.
///
/// Pushes the sibling snapshot for (recipient, parent) to zero, then, if
/// no active row of the recipient remains under the parent, drops its rows
/// from the child list. Dropped rows keep only their sibling inflow; dropped
/// flows stop paying out. Returns the number of rows dropped.
pub fn run_removal_bookkeeping<S: FlowStore + ?Sized>(
    store: &mut S,
    ctx: &EventContext,
    parent_id: &GrantId,
    recipient: &Address,
) -> Result<usize, FlowsError> {
    apply_sibling_delta(store, ctx, recipient, parent_id, FlowRates::ZERO)?;

    let row_ids = store.recipient_rows(parent_id, recipient)?;
    let mut rows = Vec::with_capacity(row_ids.len());
    for id in &row_ids {
        let row = require_grant(store, id)?;
        if row.is_active && !row.is_removed {
            return Ok(0);
        }
        rows.push(row);
    }

    let mut children = store.children(parent_id)?;
    let before = children.len();
    children.retain(|id| !row_ids.contains(id));
    let removed = before - children.len();
    if removed == 0 {
        return Ok(0);
    }
    store.put_children(parent_id, &children)?;

    for mut row in rows {
        settle_earnings(&mut row, ctx.block_timestamp);
        row.set_incoming(row.sibling_inflow);
        if row.is_flow {
            row.monthly_baseline_pool_flow_rate = 0;
            row.monthly_bonus_pool_flow_rate = 0;
            row.refresh_outgoing();
        }
        row.updated_at = ctx.block_timestamp;
        store.put_grant(&row)?;
    }

    info!(parent = %parent_id, %recipient, removed, "recipient detached from flow");
    Ok(removed)
}
