//! Allocation registry.
//!
//! Each (contract, allocation key) owns a live set of allocation records. A
//! vote from a later block supersedes every record of the key from an
//! earlier block; records cast in the same block coexist (one voter may
//! spread a key's weight over several recipients in one transaction).

use tracing::{debug, warn};

use flows_core::constants::ALLOCATION_BPS_SCALE;
use flows_core::error::FlowsError;
use flows_core::events::EventContext;
use flows_core::store::FlowStore;
use flows_core::types::{Address, Allocation, AllocationId, GrantId, Hash256};

use crate::lookup::{require_flow, require_grant};
use crate::math::mul_div_floor;

/// One allocation as cast on chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AllocationVote {
    pub contract: Address,
    pub key: Hash256,
    pub recipient_id: Hash256,
    pub allocator: Address,
    /// Parts per million of `total_weight`.
    pub bps: u32,
    pub total_weight: u128,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CastOutcome {
    /// Flow whose child shares must be recomputed.
    pub flow_id: GrantId,
    /// The key had no live records before this cast; its weight was counted.
    pub first_vote_for_key: bool,
    /// Stale records removed from the live set.
    pub invalidated: usize,
    pub units: u128,
}

/// `floor(bps * total_weight / ALLOCATION_BPS_SCALE)`.
pub fn allocation_units(bps: u32, total_weight: u128) -> u128 {
    mul_div_floor(u128::from(bps), total_weight, ALLOCATION_BPS_SCALE)
}

fn subtract_units<S: FlowStore + ?Sized>(store: &mut S, grant_id: &GrantId, units: u128) -> Result<(), FlowsError> {
    if units == 0 {
        return Ok(());
    }
    let mut grant = require_grant(store, grant_id)?;
    grant.allocations_count = grant.allocations_count.saturating_sub(units);
    store.put_grant(&grant)?;
    Ok(())
}

/// Record `vote` and invalidate the key's records from earlier blocks.
///
/// Replaying the same vote in the same block replaces the earlier copy, so
/// units are never counted twice. A zero-unit vote only clears.
pub fn cast_allocation<S: FlowStore + ?Sized>(
    store: &mut S,
    ctx: &EventContext,
    vote: &AllocationVote,
) -> Result<CastOutcome, FlowsError> {
    let flow = require_flow(store, &vote.contract)?;
    let grant_id = GrantId::from_recipient_id(&vote.recipient_id);
    require_grant(store, &grant_id)?;

    let id = AllocationId::new(
        &vote.contract,
        &vote.recipient_id,
        &vote.allocator,
        ctx.block_number,
        &vote.key,
    );
    let live = store.live_set(&vote.contract, &vote.key)?;
    let was_empty = live.is_empty();

    let mut kept = Vec::with_capacity(live.len() + 1);
    let mut invalidated = 0;
    for existing in live {
        let Some(record) = store.allocation(&existing)? else {
            warn!(allocation = %existing, "live set references a missing allocation, dropping");
            continue;
        };
        if existing == id {
            subtract_units(store, &record.grant_id, record.units)?;
            continue;
        }
        if record.block_number != ctx.block_number {
            subtract_units(store, &record.grant_id, record.units)?;
            store.delete_allocation(&existing)?;
            invalidated += 1;
            continue;
        }
        kept.push(existing);
    }

    let units = allocation_units(vote.bps, vote.total_weight);
    if units > 0 {
        store.put_allocation(&Allocation {
            id: id.clone(),
            chain_id: ctx.chain_id,
            contract: vote.contract,
            recipient_id: vote.recipient_id,
            grant_id: grant_id.clone(),
            allocator: vote.allocator,
            key: vote.key,
            bps: vote.bps,
            total_weight: vote.total_weight,
            units,
            block_number: ctx.block_number,
            tx_hash: ctx.tx_hash,
            created_at: ctx.block_timestamp,
        })?;
        let mut grant = require_grant(store, &grant_id)?;
        grant.allocations_count = grant.allocations_count.saturating_add(units);
        grant.updated_at = ctx.block_timestamp;
        store.put_grant(&grant)?;
        kept.push(id);
    } else {
        store.delete_allocation(&id)?;
    }
    store.put_live_set(&vote.contract, &vote.key, &kept)?;

    let first_vote_for_key = was_empty && units > 0;
    if first_vote_for_key {
        let mut flow = require_grant(store, &flow.id)?;
        flow.total_allocation_weight = flow.total_allocation_weight.saturating_add(vote.total_weight);
        flow.updated_at = ctx.block_timestamp;
        store.put_grant(&flow)?;
    }

    debug!(
        flow = %flow.id,
        recipient = %grant_id,
        key = %vote.key,
        units,
        invalidated,
        first_vote_for_key,
        "allocation cast"
    );
    Ok(CastOutcome {
        flow_id: flow.id,
        first_vote_for_key,
        invalidated,
        units,
    })
}
