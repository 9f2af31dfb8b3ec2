//! Grant row lifecycle: flows initialising, recipients being added and
//! removed, and pool distribution rates changing.
//!
//! A nested flow announces itself (`flow_initialized`) before its parent
//! registers it as a recipient. Until then it lives in a placeholder row
//! keyed by its contract address; the parent's `flow_recipient_created`
//! adopts it into the canonical recipient row. When a second parent adds an
//! already-adopted flow, its row is a mirror fed through sibling edges.

use tracing::{debug, info};

use flows_core::constants::SECONDS_PER_MONTH;
use flows_core::error::{FlowsError, InvariantError};
use flows_core::events::EventContext;
use flows_core::store::FlowStore;
use flows_core::types::{Address, Grant, GrantId, GrantMetadata, GrantStatus, Hash256};

use crate::lookup::{require_flow, require_grant, require_pool_flow};
use crate::math::settle_earnings;
use crate::member_units::run_removal_bookkeeping;

/// A flow contract's initial configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowInit {
    pub contract: Address,
    pub parent: Option<Address>,
    pub pools: FlowPools,
    pub baseline_pool_flow_rate_percent: u32,
    pub manager_reward_pool_flow_rate_percent: u32,
    pub self_baseline_units: u128,
    pub self_bonus_units: u128,
    pub metadata_uri: Option<String>,
    pub metadata: Option<GrantMetadata>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlowPools {
    pub baseline: Address,
    pub bonus: Address,
}

/// A recipient added to a flow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewRecipient {
    pub contract: Address,
    pub recipient_id: Hash256,
    pub recipient: Address,
    pub metadata_uri: Option<String>,
    pub metadata: Option<GrantMetadata>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecipientOutcome {
    pub parent_id: GrantId,
    pub grant_id: GrantId,
    /// A placeholder row was folded into this one.
    pub adopted: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemovalOutcome {
    pub parent_id: GrantId,
    pub grant_id: GrantId,
    /// False when the row was already removed.
    pub changed: bool,
    pub detached: usize,
}

fn apply_metadata(grant: &mut Grant, uri: Option<String>, metadata: Option<GrantMetadata>) {
    if let Some(metadata) = metadata {
        grant.metadata = metadata;
    }
    if uri.is_some() {
        grant.metadata_uri = uri;
    }
}

fn index_flow<S: FlowStore + ?Sized>(store: &mut S, flow: &Grant) -> Result<(), FlowsError> {
    store.put_flow_contract_grant(&flow.recipient, &flow.id)?;
    for pool in [flow.baseline_pool, flow.bonus_pool].into_iter().flatten() {
        store.put_pool_grant(&pool, &flow.id)?;
    }
    Ok(())
}

/// Create or fill in the row of a flow contract.
///
/// Top-level flows are canonical and active at once. A nested flow gets a
/// placeholder row under its parent until the parent adds it as a
/// recipient. An existing canonical row is updated in place.
pub fn flow_initialized<S: FlowStore + ?Sized>(
    store: &mut S,
    ctx: &EventContext,
    init: FlowInit,
) -> Result<GrantId, FlowsError> {
    let mut row = match store.flow_contract_grant(&init.contract)? {
        Some(id) => require_grant(store, &id)?,
        None => {
            let mut row = Grant::new(
                GrantId::from_address(&init.contract),
                ctx.chain_id,
                init.contract,
                ctx.block_timestamp,
            );
            match init.parent {
                None => {
                    row.is_top_level = true;
                    row.is_active = true;
                    row.status = GrantStatus::Registered;
                }
                Some(parent) => {
                    let parent = require_flow(store, &parent)?;
                    row.parent_id = Some(parent.id);
                    row.root_id = parent.root_id;
                    row.is_placeholder = true;
                }
            }
            row
        }
    };

    row.is_flow = true;
    row.baseline_pool = Some(init.pools.baseline);
    row.bonus_pool = Some(init.pools.bonus);
    row.baseline_pool_flow_rate_percent = init.baseline_pool_flow_rate_percent;
    row.manager_reward_pool_flow_rate_percent = init.manager_reward_pool_flow_rate_percent;
    row.self_baseline_units = init.self_baseline_units;
    row.self_bonus_units = init.self_bonus_units;
    apply_metadata(&mut row, init.metadata_uri, init.metadata);
    row.updated_at = ctx.block_timestamp;
    store.put_grant(&row)?;
    index_flow(store, &row)?;

    info!(
        flow = %row.id,
        top_level = row.is_top_level,
        placeholder = row.is_placeholder,
        "flow initialized"
    );
    Ok(row.id)
}

fn push_unique(list: &mut Vec<GrantId>, id: &GrantId) -> bool {
    if list.contains(id) {
        return false;
    }
    list.push(id.clone());
    true
}

/// Create or reactivate a recipient row under `parent` and link it.
fn upsert_recipient_row<S: FlowStore + ?Sized>(
    store: &mut S,
    ctx: &EventContext,
    parent: &Grant,
    recipient: NewRecipient,
    is_flow: bool,
) -> Result<Grant, FlowsError> {
    let id = GrantId::from_recipient_id(&recipient.recipient_id);
    let (mut row, was_live) = match store.grant(&id)? {
        Some(existing) => {
            let live = existing.is_active && !existing.is_removed;
            (existing, live)
        }
        None => {
            let mut row = Grant::new(id.clone(), ctx.chain_id, recipient.recipient, ctx.block_timestamp);
            row.parent_id = Some(parent.id.clone());
            row.root_id = parent.root_id.clone();
            (row, false)
        }
    };
    row.is_flow |= is_flow;
    row.is_active = true;
    row.is_removed = false;
    row.status = GrantStatus::Registered;

    if let Some(pool) = parent.baseline_pool {
        row.baseline_member_units = store.pool_member_units(&pool, &row.recipient)?.unwrap_or(0);
    }
    if let Some(pool) = parent.bonus_pool {
        row.bonus_member_units = store.pool_member_units(&pool, &row.recipient)?.unwrap_or(0);
    }
    row.member_units = row.baseline_member_units.saturating_add(row.bonus_member_units);
    apply_metadata(&mut row, recipient.metadata_uri, recipient.metadata);
    row.updated_at = ctx.block_timestamp;

    let mut children = store.children(&parent.id)?;
    if push_unique(&mut children, &id) {
        store.put_children(&parent.id, &children)?;
    }
    let mut rows = store.recipient_rows(&parent.id, &row.recipient)?;
    if push_unique(&mut rows, &id) {
        store.put_recipient_rows(&parent.id, &row.recipient, &rows)?;
    }

    // Registry-governed flows count activity through status changes.
    if !was_live && parent.registry.is_none() {
        let mut parent = require_grant(store, &parent.id)?;
        parent.active_recipient_count = parent.active_recipient_count.saturating_add(1);
        parent.updated_at = ctx.block_timestamp;
        store.put_grant(&parent)?;
    }
    Ok(row)
}

pub fn recipient_created<S: FlowStore + ?Sized>(
    store: &mut S,
    ctx: &EventContext,
    recipient: NewRecipient,
) -> Result<RecipientOutcome, FlowsError> {
    let parent = require_flow(store, &recipient.contract)?;
    let row = upsert_recipient_row(store, ctx, &parent, recipient, false)?;
    store.put_grant(&row)?;
    debug!(parent = %parent.id, grant = %row.id, "recipient created");
    Ok(RecipientOutcome {
        parent_id: parent.id,
        grant_id: row.id,
        adopted: false,
    })
}

/// Add a nested flow as a recipient of `recipient.contract`.
///
/// The new row becomes the flow's canonical row unless another parent
/// already owns it, in which case it is a mirror.
pub fn flow_recipient_created<S: FlowStore + ?Sized>(
    store: &mut S,
    ctx: &EventContext,
    recipient: NewRecipient,
    pools: FlowPools,
) -> Result<RecipientOutcome, FlowsError> {
    let parent = require_flow(store, &recipient.contract)?;
    let flow_contract = recipient.recipient;
    let mut row = upsert_recipient_row(store, ctx, &parent, recipient, true)?;
    row.baseline_pool.get_or_insert(pools.baseline);
    row.bonus_pool.get_or_insert(pools.bonus);

    let mut adopted = false;
    match store.flow_contract_grant(&flow_contract)? {
        None => {
            store.put_grant(&row)?;
            index_flow(store, &row)?;
        }
        Some(canonical) if canonical == row.id => store.put_grant(&row)?,
        Some(canonical) => {
            let existing = require_grant(store, &canonical)?;
            if existing.is_placeholder {
                adopt_placeholder(store, ctx, existing, &mut row)?;
                adopted = true;
            } else {
                store.put_grant(&row)?;
                info!(grant = %row.id, canonical = %canonical, "flow already owned by another parent, row fed as sibling");
            }
        }
    }

    debug!(parent = %parent.id, grant = %row.id, adopted, "flow recipient created");
    Ok(RecipientOutcome {
        parent_id: parent.id,
        grant_id: row.id,
        adopted,
    })
}

/// Fold `placeholder` into `row` and re-key every index that named it.
fn adopt_placeholder<S: FlowStore + ?Sized>(
    store: &mut S,
    ctx: &EventContext,
    mut placeholder: Grant,
    row: &mut Grant,
) -> Result<(), FlowsError> {
    settle_earnings(&mut placeholder, ctx.block_timestamp);
    settle_earnings(row, ctx.block_timestamp);

    row.is_flow = true;
    row.is_placeholder = false;
    row.baseline_pool = placeholder.baseline_pool.or(row.baseline_pool);
    row.bonus_pool = placeholder.bonus_pool.or(row.bonus_pool);
    row.baseline_pool_flow_rate_percent = placeholder.baseline_pool_flow_rate_percent;
    row.manager_reward_pool_flow_rate_percent = placeholder.manager_reward_pool_flow_rate_percent;
    row.self_baseline_units = placeholder.self_baseline_units;
    row.self_bonus_units = placeholder.self_bonus_units;
    row.monthly_baseline_pool_flow_rate = placeholder.monthly_baseline_pool_flow_rate;
    row.monthly_bonus_pool_flow_rate = placeholder.monthly_bonus_pool_flow_rate;
    row.refresh_outgoing();
    row.sibling_inflow = placeholder.sibling_inflow;
    row.set_incoming(placeholder.sibling_inflow);
    row.total_earned = row.total_earned.saturating_add(placeholder.total_earned);
    row.total_paid_out = row.total_paid_out.saturating_add(placeholder.total_paid_out);
    row.total_allocation_weight = placeholder.total_allocation_weight;
    row.active_recipient_count = placeholder.active_recipient_count;
    row.awaiting_recipient_count = placeholder.awaiting_recipient_count;
    row.challenged_recipient_count = placeholder.challenged_recipient_count;
    row.registry = placeholder.registry;
    row.arbitrator = placeholder.arbitrator;
    if row.metadata.is_empty() {
        row.metadata = placeholder.metadata.clone();
    }
    if row.metadata_uri.is_none() {
        row.metadata_uri = placeholder.metadata_uri.clone();
    }
    store.put_grant(row)?;
    index_flow(store, row)?;

    if let Some(registry) = placeholder.registry {
        if let Some(mut config) = store.registry(&registry)? {
            config.flow_id = row.id.clone();
            store.put_registry(&config)?;
        }
    }
    if let Some(arbitrator) = placeholder.arbitrator {
        store.put_arbitrator_flow(&arbitrator, &row.id)?;
    }

    let children = store.children(&placeholder.id)?;
    let mut moved_recipients: Vec<Address> = Vec::new();
    for child_id in &children {
        let mut child = require_grant(store, child_id)?;
        child.parent_id = Some(row.id.clone());
        child.root_id = row.root_id.clone();
        store.put_grant(&child)?;
        if !moved_recipients.contains(&child.recipient) {
            moved_recipients.push(child.recipient);
        }
    }
    let mut adopted_children = store.children(&row.id)?;
    for child_id in &children {
        push_unique(&mut adopted_children, child_id);
    }
    store.put_children(&row.id, &adopted_children)?;
    store.delete_children(&placeholder.id)?;

    for recipient in moved_recipients {
        let rows = store.recipient_rows(&placeholder.id, &recipient)?;
        store.put_recipient_rows(&row.id, &recipient, &rows)?;
        store.delete_recipient_rows(&placeholder.id, &recipient)?;
        if let Some(snapshot) = store.sibling_snapshot(ctx.chain_id, &recipient, &placeholder.id)? {
            store.put_sibling_snapshot(ctx.chain_id, &recipient, &row.id, &snapshot)?;
            store.delete_sibling_snapshot(ctx.chain_id, &recipient, &placeholder.id)?;
        }
    }

    store.delete_grant(&placeholder.id)?;
    info!(placeholder = %placeholder.id, grant = %row.id, children = children.len(), "placeholder adopted");
    Ok(())
}

/// Mark a recipient removed. Repeated removals are no-ops.
pub fn recipient_removed<S: FlowStore + ?Sized>(
    store: &mut S,
    ctx: &EventContext,
    contract: &Address,
    recipient_id: &Hash256,
) -> Result<RemovalOutcome, FlowsError> {
    let mut parent = require_flow(store, contract)?;
    let id = GrantId::from_recipient_id(recipient_id);
    let mut row = require_grant(store, &id)?;
    if row.is_removed {
        debug!(grant = %id, "recipient already removed");
        return Ok(RemovalOutcome {
            parent_id: parent.id,
            grant_id: id,
            changed: false,
            detached: 0,
        });
    }

    if row.is_active && parent.registry.is_none() {
        parent.active_recipient_count = parent.active_recipient_count.saturating_sub(1);
        parent.updated_at = ctx.block_timestamp;
        store.put_grant(&parent)?;
    }
    row.is_removed = true;
    row.is_active = false;
    row.updated_at = ctx.block_timestamp;
    store.put_grant(&row)?;

    let detached = if row.baseline_member_units == 0 {
        run_removal_bookkeeping(store, ctx, &parent.id, &row.recipient)?
    } else {
        0
    };
    info!(parent = %parent.id, grant = %id, detached, "recipient removed");
    Ok(RemovalOutcome {
        parent_id: parent.id,
        grant_id: id,
        changed: true,
        detached,
    })
}

/// Record a pool's new distribution rate. Returns the flow to recompute, or
/// `None` when the distributor is not the flow itself.
pub fn flow_distribution_updated<S: FlowStore + ?Sized>(
    store: &mut S,
    ctx: &EventContext,
    pool: &Address,
    distributor: &Address,
    rate_per_second: u128,
) -> Result<Option<GrantId>, FlowsError> {
    let mut flow = require_pool_flow(store, pool)?;
    if *distributor != flow.recipient {
        debug!(flow = %flow.id, %distributor, "distribution by a foreign distributor, ignoring");
        return Ok(None);
    }
    let (is_baseline, is_bonus) = flow.pool_kind(pool);
    if is_baseline == is_bonus {
        return Err(InvariantError::AmbiguousPool {
            pool: pool.to_string(),
            grant: flow.id.to_string(),
            matches: usize::from(is_baseline) + usize::from(is_bonus),
        }
        .into());
    }

    settle_earnings(&mut flow, ctx.block_timestamp);
    let monthly = rate_per_second.saturating_mul(u128::from(SECONDS_PER_MONTH));
    if is_baseline {
        flow.monthly_baseline_pool_flow_rate = monthly;
    } else {
        flow.monthly_bonus_pool_flow_rate = monthly;
    }
    flow.refresh_outgoing();
    flow.updated_at = ctx.block_timestamp;
    store.put_grant(&flow)?;
    debug!(flow = %flow.id, %pool, monthly, "pool distribution updated");
    Ok(Some(flow.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use flows_core::store::{keys, MemoryFlowStore, Table};

    fn init(contract: u8, parent: Option<u8>) -> FlowInit {
        FlowInit {
            contract: addr(contract),
            parent: parent.map(addr),
            pools: FlowPools {
                baseline: baseline_pool_of(addr(contract)),
                bonus: bonus_pool_of(addr(contract)),
            },
            baseline_pool_flow_rate_percent: 500_000,
            manager_reward_pool_flow_rate_percent: 0,
            self_baseline_units: 1,
            self_bonus_units: 0,
            metadata_uri: None,
            metadata: None,
        }
    }

    fn recipient(contract: u8, seed: u8, to: Address) -> NewRecipient {
        NewRecipient {
            contract: addr(contract),
            recipient_id: rid(seed),
            recipient: to,
            metadata_uri: None,
            metadata: None,
        }
    }

    fn pools(contract: u8) -> FlowPools {
        FlowPools {
            baseline: baseline_pool_of(addr(contract)),
            bonus: bonus_pool_of(addr(contract)),
        }
    }

    #[test]
    fn top_level_flow_is_canonical_and_active() {
        let mut store = MemoryFlowStore::new();
        let id = flow_initialized(&mut store, &ctx(1, 1), init(0xF0, None)).unwrap();
        let row = store.grant(&id).unwrap().unwrap();
        assert!(row.is_top_level && row.is_active && row.is_flow);
        assert!(!row.is_placeholder);
        assert_eq!(row.root_id, id);
        assert_eq!(store.flow_contract_grant(&addr(0xF0)).unwrap(), Some(id.clone()));
        assert_eq!(store.pool_grant(&baseline_pool_of(addr(0xF0))).unwrap(), Some(id));
    }

    #[test]
    fn reinitialising_updates_in_place() {
        let mut store = MemoryFlowStore::new();
        flow_initialized(&mut store, &ctx(1, 1), init(0xF0, None)).unwrap();
        let mut again = init(0xF0, None);
        again.self_baseline_units = 9;
        let id = flow_initialized(&mut store, &ctx(2, 2), again).unwrap();
        assert_eq!(store.len(Table::Grants), 1);
        assert_eq!(store.grant(&id).unwrap().unwrap().self_baseline_units, 9);
    }

    #[test]
    fn nested_flow_with_unknown_parent_is_fatal() {
        let mut store = MemoryFlowStore::new();
        let err = flow_initialized(&mut store, &ctx(1, 1), init(0xC0, Some(0xF0))).unwrap_err();
        assert!(matches!(err, FlowsError::Invariant(InvariantError::MissingFlowContract(_))));
    }

    #[test]
    fn recipient_seeded_from_recorded_units() {
        let mut store = MemoryFlowStore::new();
        let flow = flow_initialized(&mut store, &ctx(1, 1), init(0xF0, None)).unwrap();
        store.put_pool_member_units(&baseline_pool_of(addr(0xF0)), &addr(0xA1), 4).unwrap();
        store.put_pool_member_units(&bonus_pool_of(addr(0xF0)), &addr(0xA1), 2).unwrap();

        let out = recipient_created(&mut store, &ctx(2, 2), recipient(0xF0, 0xA1, addr(0xA1))).unwrap();
        assert_eq!(out.parent_id, flow);
        let row = store.grant(&out.grant_id).unwrap().unwrap();
        assert_eq!((row.baseline_member_units, row.bonus_member_units, row.member_units), (4, 2, 6));
        assert_eq!(row.parent_id, Some(flow.clone()));
        assert_eq!(store.children(&flow).unwrap(), vec![out.grant_id.clone()]);
        assert_eq!(store.recipient_rows(&flow, &addr(0xA1)).unwrap(), vec![out.grant_id]);
    }

    #[test]
    fn active_counter_follows_create_and_remove() {
        let mut store = MemoryFlowStore::new();
        let flow = flow_initialized(&mut store, &ctx(1, 1), init(0xF0, None)).unwrap();
        recipient_created(&mut store, &ctx(2, 2), recipient(0xF0, 0xA1, addr(0xA1))).unwrap();
        // Replayed creation does not count twice.
        recipient_created(&mut store, &ctx(2, 2), recipient(0xF0, 0xA1, addr(0xA1))).unwrap();
        assert_eq!(store.grant(&flow).unwrap().unwrap().active_recipient_count, 1);

        let out = recipient_removed(&mut store, &ctx(3, 3), &addr(0xF0), &rid(0xA1)).unwrap();
        assert!(out.changed);
        let again = recipient_removed(&mut store, &ctx(4, 4), &addr(0xF0), &rid(0xA1)).unwrap();
        assert!(!again.changed);
        assert_eq!(store.grant(&flow).unwrap().unwrap().active_recipient_count, 0);
    }

    #[test]
    fn removal_without_units_detaches_immediately() {
        let mut store = MemoryFlowStore::new();
        let flow = flow_initialized(&mut store, &ctx(1, 1), init(0xF0, None)).unwrap();
        recipient_created(&mut store, &ctx(2, 2), recipient(0xF0, 0xA1, addr(0xA1))).unwrap();
        let out = recipient_removed(&mut store, &ctx(3, 3), &addr(0xF0), &rid(0xA1)).unwrap();
        assert_eq!(out.detached, 1);
        assert!(store.children(&flow).unwrap().is_empty());
        let row = store.grant(&out.grant_id).unwrap().unwrap();
        assert!(row.is_removed && !row.is_active);
    }

    #[test]
    fn removal_with_units_waits_for_oracle() {
        let mut store = MemoryFlowStore::new();
        let flow = flow_initialized(&mut store, &ctx(1, 1), init(0xF0, None)).unwrap();
        store.put_pool_member_units(&baseline_pool_of(addr(0xF0)), &addr(0xA1), 4).unwrap();
        recipient_created(&mut store, &ctx(2, 2), recipient(0xF0, 0xA1, addr(0xA1))).unwrap();
        let out = recipient_removed(&mut store, &ctx(3, 3), &addr(0xF0), &rid(0xA1)).unwrap();
        assert_eq!(out.detached, 0);
        assert_eq!(store.children(&flow).unwrap().len(), 1);
    }

    #[test]
    fn placeholder_adopted_by_parent() {
        let mut store = MemoryFlowStore::new();
        let top = flow_initialized(&mut store, &ctx(1, 1), init(0xF0, None)).unwrap();
        let placeholder = flow_initialized(&mut store, &ctx(2, 2), init(0xC0, Some(0xF0))).unwrap();
        let p = store.grant(&placeholder).unwrap().unwrap();
        assert!(p.is_placeholder && !p.is_active);
        assert!(store.children(&top).unwrap().is_empty());

        // The nested flow gets a recipient of its own before adoption.
        let leaf = recipient_created(&mut store, &ctx(2, 2), recipient(0xC0, 0x11, addr(0x11))).unwrap();
        assert_eq!(leaf.parent_id, placeholder);

        let out = flow_recipient_created(&mut store, &ctx(3, 3), recipient(0xF0, 0xC1, addr(0xC0)), pools(0xC0)).unwrap();
        assert!(out.adopted);
        assert_eq!(store.grant(&placeholder).unwrap(), None);

        let row = store.grant(&out.grant_id).unwrap().unwrap();
        assert!(row.is_flow && row.is_active && !row.is_placeholder);
        assert_eq!(row.parent_id, Some(top.clone()));
        assert_eq!(row.self_baseline_units, 1);
        assert_eq!(row.active_recipient_count, 1);

        assert_eq!(store.flow_contract_grant(&addr(0xC0)).unwrap(), Some(out.grant_id.clone()));
        assert_eq!(store.pool_grant(&baseline_pool_of(addr(0xC0))).unwrap(), Some(out.grant_id.clone()));
        assert_eq!(store.children(&top).unwrap(), vec![out.grant_id.clone()]);
        assert_eq!(store.children(&out.grant_id).unwrap(), vec![leaf.grant_id.clone()]);
        assert!(store.children(&placeholder).unwrap().is_empty());
        assert_eq!(store.recipient_rows(&out.grant_id, &addr(0x11)).unwrap(), vec![leaf.grant_id.clone()]);
        // The placeholder's index entries are gone, not just emptied.
        assert_eq!(store.get_raw(Table::Children, &keys::grant(&placeholder)).unwrap(), None);
        assert_eq!(
            store.get_raw(Table::RecipientRows, &keys::recipient_rows(&placeholder, &addr(0x11))).unwrap(),
            None
        );
        assert_eq!(store.len(Table::Children), 2);

        let leaf_row = store.grant(&leaf.grant_id).unwrap().unwrap();
        assert_eq!(leaf_row.parent_id, Some(out.grant_id));
    }

    #[test]
    fn second_parent_gets_a_mirror_row() {
        let mut store = MemoryFlowStore::new();
        flow_initialized(&mut store, &ctx(1, 1), init(0xF0, None)).unwrap();
        flow_initialized(&mut store, &ctx(1, 1), init(0xF1, None)).unwrap();
        flow_initialized(&mut store, &ctx(2, 2), init(0xC0, Some(0xF0))).unwrap();
        let first = flow_recipient_created(&mut store, &ctx(3, 3), recipient(0xF0, 0xC1, addr(0xC0)), pools(0xC0)).unwrap();
        let second = flow_recipient_created(&mut store, &ctx(4, 4), recipient(0xF1, 0xC2, addr(0xC0)), pools(0xC0)).unwrap();
        assert!(!second.adopted);
        assert_eq!(store.flow_contract_grant(&addr(0xC0)).unwrap(), Some(first.grant_id));
        let mirror = store.grant(&second.grant_id).unwrap().unwrap();
        assert!(mirror.is_flow && mirror.is_active);
    }

    #[test]
    fn flow_recipient_without_placeholder_becomes_canonical() {
        let mut store = MemoryFlowStore::new();
        flow_initialized(&mut store, &ctx(1, 1), init(0xF0, None)).unwrap();
        let out = flow_recipient_created(&mut store, &ctx(2, 2), recipient(0xF0, 0xC1, addr(0xC0)), pools(0xC0)).unwrap();
        assert!(!out.adopted);
        assert_eq!(store.flow_contract_grant(&addr(0xC0)).unwrap(), Some(out.grant_id.clone()));

        // A late initialisation fills in the canonical row.
        let id = flow_initialized(&mut store, &ctx(3, 3), init(0xC0, Some(0xF0))).unwrap();
        assert_eq!(id, out.grant_id);
        let row = store.grant(&id).unwrap().unwrap();
        assert!(!row.is_placeholder);
        assert_eq!(row.self_baseline_units, 1);
    }

    #[test]
    fn distribution_rate_is_monthly() {
        let mut store = MemoryFlowStore::new();
        let flow = flow_initialized(&mut store, &ctx(1, 1), init(0xF0, None)).unwrap();
        let target = flow_distribution_updated(&mut store, &ctx(2, 2), &bonus_pool_of(addr(0xF0)), &addr(0xF0), 3).unwrap();
        assert_eq!(target, Some(flow.clone()));
        let row = store.grant(&flow).unwrap().unwrap();
        assert_eq!(row.monthly_bonus_pool_flow_rate, 3 * u128::from(SECONDS_PER_MONTH));
        assert_eq!(row.monthly_outgoing_flow_rate, row.monthly_bonus_pool_flow_rate);
    }

    #[test]
    fn foreign_distributor_is_ignored() {
        let mut store = MemoryFlowStore::new();
        let flow = flow_initialized(&mut store, &ctx(1, 1), init(0xF0, None)).unwrap();
        let target = flow_distribution_updated(&mut store, &ctx(2, 2), &bonus_pool_of(addr(0xF0)), &addr(0x01), 3).unwrap();
        assert_eq!(target, None);
        assert_eq!(store.grant(&flow).unwrap().unwrap().monthly_outgoing_flow_rate, 0);
    }
}
