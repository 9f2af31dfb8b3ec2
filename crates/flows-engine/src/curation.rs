//! Curation registry and arbitration state machine.
//!
//! Registry items become grants under the flow the registry governs. Status
//! transitions gate the parent flow's recipient counters; they never touch
//! flow rates (those follow the pool oracle).
//!
//! Dispute rows are keyed by (dispute id, arbitrator). The arbitrator's
//! `dispute_created` and the registry's `dispute` event may arrive in either
//! order; both upsert the same row.

use tracing::{debug, info, warn};

use flows_core::error::{FlowsError, InvariantError};
use flows_core::events::EventContext;
use flows_core::store::FlowStore;
use flows_core::types::{
    Address, Dispute, DisputeKey, Grant, GrantId, GrantMetadata, GrantStatus, Hash256, RegistryConfig,
    Ruling,
};

use crate::lookup::{
    require_arbitrator_flow, require_flow, require_grant, require_parent, require_registry, require_registry_item,
};

/// Bind a curation registry and its arbitrator to the flow they govern.
pub fn registry_initialized<S: FlowStore + ?Sized>(
    store: &mut S,
    ctx: &EventContext,
    config: RegistryConfigInput,
) -> Result<GrantId, FlowsError> {
    let mut flow = require_flow(store, &config.flow)?;
    store.put_registry(&RegistryConfig {
        registry: config.registry,
        flow_id: flow.id.clone(),
        arbitrator: config.arbitrator,
        challenge_period_duration: config.challenge_period_duration,
    })?;
    store.put_arbitrator_flow(&config.arbitrator, &flow.id)?;
    flow.registry = Some(config.registry);
    flow.arbitrator = Some(config.arbitrator);
    flow.updated_at = ctx.block_timestamp;
    store.put_grant(&flow)?;
    info!(flow = %flow.id, registry = %config.registry, arbitrator = %config.arbitrator, "registry initialized");
    Ok(flow.id)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegistryConfigInput {
    pub registry: Address,
    pub flow: Address,
    pub arbitrator: Address,
    pub challenge_period_duration: u64,
}

/// An item submitted to a registry for listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmittedItem {
    pub registry: Address,
    pub item_id: Hash256,
    pub recipient: Address,
    pub evidence_group_id: Hash256,
    pub is_flow: bool,
    pub metadata_uri: Option<String>,
    pub metadata: Option<GrantMetadata>,
}

/// Create or refresh the item's grant in `RegistrationRequested`.
pub fn submit_item<S: FlowStore + ?Sized>(
    store: &mut S,
    ctx: &EventContext,
    item: SubmittedItem,
) -> Result<GrantId, FlowsError> {
    let config = require_registry(store, &item.registry)?;
    let flow = require_grant(store, &config.flow_id)?;
    let id = GrantId::from_recipient_id(&item.item_id);

    let mut grant = match store.grant(&id)? {
        Some(existing) => existing,
        None => {
            let mut grant = Grant::new(id.clone(), ctx.chain_id, item.recipient, ctx.block_timestamp);
            grant.parent_id = Some(flow.id.clone());
            grant.root_id = flow.root_id.clone();
            grant.is_flow = item.is_flow;
            grant
        }
    };
    let old = ItemState {
        status: grant.status,
        disputed: grant.is_disputed,
        resolved: grant.is_resolved,
    };
    let requested = ItemState {
        status: GrantStatus::RegistrationRequested,
        disputed: false,
        resolved: false,
    };
    let effects = counter_effects(old, requested, grant.is_active);

    grant.status = requested.status;
    grant.challenge_period_ends_at = ctx.block_timestamp.saturating_add(config.challenge_period_duration);
    grant.evidence_group_id = Some(item.evidence_group_id);
    grant.is_disputed = false;
    grant.is_resolved = false;
    if let Some(metadata) = item.metadata {
        grant.metadata = metadata;
    }
    if item.metadata_uri.is_some() {
        grant.metadata_uri = item.metadata_uri;
    }
    grant.updated_at = ctx.block_timestamp;
    store.put_grant(&grant)?;

    store.put_registry_item_grant(&item.registry, &item.item_id, &id)?;
    store.put_evidence_group_item(&item.registry, &item.evidence_group_id, &item.item_id)?;

    if !effects.is_zero() {
        let mut flow = require_grant(store, &flow.id)?;
        effects.apply(&mut flow);
        flow.updated_at = ctx.block_timestamp;
        store.put_grant(&flow)?;
    }
    debug!(grant = %id, flow = %flow.id, ?effects, deadline = grant.challenge_period_ends_at, "item submitted");
    Ok(id)
}

/// `Registered → ClearingRequested`. Already clearing is a no-op.
pub fn request_removal<S: FlowStore + ?Sized>(
    store: &mut S,
    ctx: &EventContext,
    registry: &Address,
    item_id: &Hash256,
    evidence_group_id: &Hash256,
) -> Result<(), FlowsError> {
    let config = require_registry(store, registry)?;
    let mut grant = require_registry_item(store, registry, item_id)?;
    match grant.status {
        GrantStatus::Registered => {}
        GrantStatus::ClearingRequested => {
            debug!(grant = %grant.id, "removal already requested");
            return Ok(());
        }
        other => {
            warn!(grant = %grant.id, status = ?other, "removal requested from unexpected status, ignoring");
            return Ok(());
        }
    }
    grant.status = GrantStatus::ClearingRequested;
    grant.challenge_period_ends_at = ctx.block_timestamp.saturating_add(config.challenge_period_duration);
    grant.evidence_group_id = Some(*evidence_group_id);
    grant.updated_at = ctx.block_timestamp;
    store.put_grant(&grant)?;
    store.put_evidence_group_item(registry, evidence_group_id, item_id)?;
    debug!(grant = %grant.id, "removal requested");
    Ok(())
}

/// Signed changes to a flow's recipient counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CounterEffects {
    pub awaiting: i8,
    pub active: i8,
    pub challenged: i8,
}

/// Item state before and after a status change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ItemState {
    pub status: GrantStatus,
    pub disputed: bool,
    pub resolved: bool,
}

impl ItemState {
    fn dispute_open(&self) -> bool {
        self.disputed && !self.resolved
    }
}

/// Counter effects of moving an item from `old` to `new`.
pub fn counter_effects(old: ItemState, new: ItemState, is_active: bool) -> CounterEffects {
    use flows_core::types::GrantStatus::*;
    let mut effects = CounterEffects::default();

    if old.status != RegistrationRequested && new.status == RegistrationRequested && !is_active {
        effects.awaiting += 1;
    }
    if old.status == RegistrationRequested && matches!(new.status, Absent | Registered) {
        effects.awaiting -= 1;
    }
    if old.status == RegistrationRequested && new.status == Registered {
        effects.active += 1;
    }
    if old.status == ClearingRequested && new.status == Absent {
        effects.active -= 1;
    }
    match (old.dispute_open(), new.dispute_open()) {
        (false, true) => effects.challenged += 1,
        (true, false) => effects.challenged -= 1,
        _ => {}
    }
    effects
}

fn apply_counter(value: u32, delta: i8) -> u32 {
    if delta >= 0 {
        value.saturating_add(u32::from(delta.unsigned_abs()))
    } else {
        value.saturating_sub(u32::from(delta.unsigned_abs()))
    }
}

impl CounterEffects {
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(&self, flow: &mut Grant) {
        flow.awaiting_recipient_count = apply_counter(flow.awaiting_recipient_count, self.awaiting);
        flow.active_recipient_count = apply_counter(flow.active_recipient_count, self.active);
        flow.challenged_recipient_count = apply_counter(flow.challenged_recipient_count, self.challenged);
    }
}

/// Apply a registry status change and update the governing flow's counters.
///
/// An unknown status code is logged and ignored.
pub fn item_status_change<S: FlowStore + ?Sized>(
    store: &mut S,
    ctx: &EventContext,
    registry: &Address,
    item_id: &Hash256,
    status: u8,
    disputed: bool,
    resolved: bool,
) -> Result<(), FlowsError> {
    let Some(new_status) = GrantStatus::from_code(status) else {
        warn!(%registry, item = %item_id, status, "unknown item status code, ignoring");
        return Ok(());
    };
    let config = require_registry(store, registry)?;
    let mut grant = require_registry_item(store, registry, item_id)?;

    let old = ItemState {
        status: grant.status,
        disputed: grant.is_disputed,
        resolved: grant.is_resolved,
    };
    let new = ItemState {
        status: new_status,
        disputed,
        resolved,
    };
    let effects = counter_effects(old, new, grant.is_active);

    grant.status = new_status;
    grant.is_disputed = disputed;
    grant.is_resolved = resolved;
    grant.updated_at = ctx.block_timestamp;
    store.put_grant(&grant)?;

    if !effects.is_zero() {
        let mut flow = require_grant(store, &config.flow_id)?;
        effects.apply(&mut flow);
        flow.updated_at = ctx.block_timestamp;
        store.put_grant(&flow)?;
    }
    debug!(grant = %grant.id, from = ?old.status, to = ?new_status, ?effects, "item status changed");
    Ok(())
}

/// Arbitrator-side dispute parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DisputeOpened {
    pub arbitrator: Address,
    pub dispute_id: u64,
    pub arbitrable: Address,
    pub voting_starts_at: u64,
    pub voting_ends_at: u64,
    pub reveal_period_ends_at: u64,
    pub arbitration_cost: u128,
}

fn load_or_new_dispute<S: FlowStore + ?Sized>(
    store: &S,
    ctx: &EventContext,
    dispute_id: u64,
    arbitrator: Address,
) -> Result<Dispute, FlowsError> {
    let key = DisputeKey { dispute_id, arbitrator };
    Ok(store.dispute(&key)?.unwrap_or_else(|| Dispute {
        dispute_id,
        arbitrator,
        created_at: ctx.block_timestamp,
        ..Dispute::default()
    }))
}

/// Record the arbitrator's view of a new dispute. No ruling, not executed.
pub fn start_dispute<S: FlowStore + ?Sized>(
    store: &mut S,
    ctx: &EventContext,
    opened: DisputeOpened,
) -> Result<DisputeKey, FlowsError> {
    let flow_id = require_arbitrator_flow(store, &opened.arbitrator)?;
    let mut dispute = load_or_new_dispute(store, ctx, opened.dispute_id, opened.arbitrator)?;
    dispute.flow_id = Some(flow_id);
    dispute.registry.get_or_insert(opened.arbitrable);
    dispute.voting_starts_at = opened.voting_starts_at;
    dispute.voting_ends_at = opened.voting_ends_at;
    dispute.reveal_period_ends_at = opened.reveal_period_ends_at;
    dispute.arbitration_cost = opened.arbitration_cost;
    store.put_dispute(&dispute)?;
    debug!(dispute = opened.dispute_id, arbitrator = %opened.arbitrator, "dispute created");
    Ok(dispute.key())
}

/// Link a dispute to the item whose evidence group the registry names.
pub fn link_dispute<S: FlowStore + ?Sized>(
    store: &mut S,
    ctx: &EventContext,
    registry: &Address,
    arbitrator: &Address,
    dispute_id: u64,
    evidence_group_id: &Hash256,
    challenger: &Address,
) -> Result<GrantId, FlowsError> {
    let item_id = store.evidence_group_item(registry, evidence_group_id)?.ok_or_else(|| {
        InvariantError::MissingRegistryItem {
            registry: registry.to_string(),
            item: evidence_group_id.to_string(),
        }
    })?;
    let grant = require_registry_item(store, registry, &item_id)?;
    let flow = require_parent(store, &grant)?;

    let mut dispute = load_or_new_dispute(store, ctx, dispute_id, *arbitrator)?;
    dispute.grant_id = Some(grant.id.clone());
    dispute.registry = Some(*registry);
    dispute.item_id = Some(item_id);
    dispute.challenger = Some(*challenger);
    dispute.evidence_group_id = Some(*evidence_group_id);
    if dispute.flow_id.is_none() {
        dispute.flow_id = Some(flow.id);
    }
    store.put_dispute(&dispute)?;
    info!(dispute = dispute_id, grant = %grant.id, %challenger, "dispute linked to grant");
    Ok(grant.id)
}

fn require_dispute<S: FlowStore + ?Sized>(store: &S, dispute_id: u64, arbitrator: &Address) -> Result<Dispute, FlowsError> {
    let key = DisputeKey {
        dispute_id,
        arbitrator: *arbitrator,
    };
    store.dispute(&key)?.ok_or_else(|| {
        InvariantError::MissingDispute {
            dispute_id,
            arbitrator: arbitrator.to_string(),
        }
        .into()
    })
}

/// Add revealed votes to the tally of `choice`.
pub fn reveal_vote<S: FlowStore + ?Sized>(
    store: &mut S,
    arbitrator: &Address,
    dispute_id: u64,
    choice: u8,
    votes: u128,
) -> Result<(), FlowsError> {
    let mut dispute = require_dispute(store, dispute_id, arbitrator)?;
    let tally = match Ruling::from_code(choice) {
        Some(Ruling::Refused) => &mut dispute.votes_refused,
        Some(Ruling::Requester) => &mut dispute.votes_for_requester,
        Some(Ruling::Challenger) => &mut dispute.votes_for_challenger,
        None => {
            warn!(dispute = dispute_id, choice, "vote for unknown choice, ignoring");
            return Ok(());
        }
    };
    *tally = tally.saturating_add(votes);
    dispute.total_votes = dispute.total_votes.saturating_add(votes);
    store.put_dispute(&dispute)?;
    Ok(())
}

/// Record the ruling and mark the dispute executed. Replays are no-ops.
pub fn execute_ruling<S: FlowStore + ?Sized>(
    store: &mut S,
    arbitrator: &Address,
    dispute_id: u64,
    ruling: u8,
) -> Result<(), FlowsError> {
    let mut dispute = require_dispute(store, dispute_id, arbitrator)?;
    if dispute.is_executed {
        debug!(dispute = dispute_id, "ruling already executed");
        return Ok(());
    }
    dispute.ruling = Ruling::from_code(ruling);
    if dispute.ruling.is_none() {
        warn!(dispute = dispute_id, ruling, "unknown ruling code");
    }
    dispute.is_executed = true;
    store.put_dispute(&dispute)?;
    info!(dispute = dispute_id, ruling = ?dispute.ruling, "ruling executed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use flows_core::store::MemoryFlowStore;
    use flows_core::types::GrantStatus::*;
    use proptest::prelude::*;

    const REGISTRY: u8 = 0xE0;
    const ARBITRATOR: u8 = 0xAB;

    fn governed() -> (MemoryFlowStore, GrantId) {
        let mut store = MemoryFlowStore::new();
        put_flow(&mut store, addr(0xF0), None);
        let flow = registry_initialized(
            &mut store,
            &ctx(1, 1),
            RegistryConfigInput {
                registry: addr(REGISTRY),
                flow: addr(0xF0),
                arbitrator: addr(ARBITRATOR),
                challenge_period_duration: 100,
            },
        )
        .unwrap();
        (store, flow)
    }

    fn submit(store: &mut MemoryFlowStore, seed: u8, ts: u64) -> GrantId {
        submit_item(
            store,
            &ctx(2, ts),
            SubmittedItem {
                registry: addr(REGISTRY),
                item_id: rid(seed),
                recipient: addr(seed),
                evidence_group_id: Hash256::from_u64(u64::from(seed)),
                is_flow: false,
                metadata_uri: None,
                metadata: None,
            },
        )
        .unwrap()
    }

    fn status(store: &mut MemoryFlowStore, seed: u8, code: u8, disputed: bool, resolved: bool) {
        item_status_change(store, &ctx(3, 3), &addr(REGISTRY), &rid(seed), code, disputed, resolved).unwrap();
    }

    fn counters(store: &MemoryFlowStore, flow: &GrantId) -> (u32, u32, u32) {
        let f = store.grant(flow).unwrap().unwrap();
        (f.awaiting_recipient_count, f.active_recipient_count, f.challenged_recipient_count)
    }

    fn state(status: GrantStatus, disputed: bool, resolved: bool) -> ItemState {
        ItemState { status, disputed, resolved }
    }

    // ------------------------------------------------------------------
    // Counter transitions
    // ------------------------------------------------------------------

    #[test]
    fn entering_registration_requested_counts_awaiting() {
        let e = counter_effects(state(Absent, false, false), state(RegistrationRequested, false, false), false);
        assert_eq!(e, CounterEffects { awaiting: 1, active: 0, challenged: 0 });
        // An already active item does not wait.
        let e = counter_effects(state(Absent, false, false), state(RegistrationRequested, false, false), true);
        assert!(e.is_zero());
    }

    #[test]
    fn acceptance_moves_awaiting_to_active() {
        let e = counter_effects(state(RegistrationRequested, false, false), state(Registered, false, false), false);
        assert_eq!(e, CounterEffects { awaiting: -1, active: 1, challenged: 0 });
    }

    #[test]
    fn rejection_only_drops_awaiting() {
        let e = counter_effects(state(RegistrationRequested, false, false), state(Absent, false, false), false);
        assert_eq!(e, CounterEffects { awaiting: -1, active: 0, challenged: 0 });
    }

    #[test]
    fn clearing_to_absent_drops_active() {
        let e = counter_effects(state(ClearingRequested, false, false), state(Absent, false, false), true);
        assert_eq!(e, CounterEffects { awaiting: 0, active: -1, challenged: 0 });
    }

    #[test]
    fn dispute_open_and_close_track_challenged() {
        let e = counter_effects(
            state(RegistrationRequested, false, false),
            state(RegistrationRequested, true, false),
            false,
        );
        assert_eq!(e.challenged, 1);
        let e = counter_effects(
            state(RegistrationRequested, true, false),
            state(Registered, true, true),
            false,
        );
        assert_eq!(e.challenged, -1);
    }

    #[test]
    fn unmatched_transition_is_neutral() {
        let e = counter_effects(state(Registered, false, false), state(ClearingRequested, false, false), true);
        assert!(e.is_zero());
    }

    // ------------------------------------------------------------------
    // Item lifecycle through the store
    // ------------------------------------------------------------------

    #[test]
    fn submitted_item_awaits_then_registers() {
        let (mut store, flow) = governed();
        let id = submit(&mut store, 0x31, 50);
        let g = store.grant(&id).unwrap().unwrap();
        assert_eq!(g.status, RegistrationRequested);
        assert_eq!(g.challenge_period_ends_at, 150);
        assert_eq!(g.parent_id.as_ref(), Some(&flow));
        assert!(!g.is_active);
        assert_eq!(counters(&store, &flow), (1, 0, 0));

        status(&mut store, 0x31, 2, false, false);
        assert_eq!(counters(&store, &flow), (1, 0, 0));
        status(&mut store, 0x31, 1, false, false);
        assert_eq!(counters(&store, &flow), (0, 1, 0));
        assert_eq!(store.grant(&id).unwrap().unwrap().status, Registered);
    }

    #[test]
    fn resubmission_counts_awaiting_once() {
        let (mut store, flow) = governed();
        submit(&mut store, 0x31, 50);
        submit(&mut store, 0x31, 60);
        assert_eq!(counters(&store, &flow), (1, 0, 0));

        // Rejected, then submitted again.
        status(&mut store, 0x31, 0, false, false);
        assert_eq!(counters(&store, &flow), (0, 0, 0));
        submit(&mut store, 0x31, 70);
        assert_eq!(counters(&store, &flow), (1, 0, 0));
    }

    #[test]
    fn removal_request_transitions() {
        let (mut store, _) = governed();
        let id = submit(&mut store, 0x31, 50);
        let group = Hash256::from_u64(0x99);

        // Not registered yet: ignored.
        request_removal(&mut store, &ctx(4, 60), &addr(REGISTRY), &rid(0x31), &group).unwrap();
        assert_eq!(store.grant(&id).unwrap().unwrap().status, RegistrationRequested);

        status(&mut store, 0x31, 1, false, false);
        request_removal(&mut store, &ctx(5, 200), &addr(REGISTRY), &rid(0x31), &group).unwrap();
        let g = store.grant(&id).unwrap().unwrap();
        assert_eq!(g.status, ClearingRequested);
        assert_eq!(g.challenge_period_ends_at, 300);
        assert_eq!(store.evidence_group_item(&addr(REGISTRY), &group).unwrap(), Some(rid(0x31)));

        // Second request is a no-op.
        request_removal(&mut store, &ctx(6, 400), &addr(REGISTRY), &rid(0x31), &group).unwrap();
        assert_eq!(store.grant(&id).unwrap().unwrap().challenge_period_ends_at, 300);
    }

    #[test]
    fn unknown_status_code_is_ignored() {
        let (mut store, flow) = governed();
        let id = submit(&mut store, 0x31, 50);
        status(&mut store, 0x31, 9, true, false);
        let g = store.grant(&id).unwrap().unwrap();
        assert_eq!(g.status, RegistrationRequested);
        assert!(!g.is_disputed);
        assert_eq!(counters(&store, &flow), (1, 0, 0));
    }

    #[test]
    fn status_for_unknown_item_is_fatal() {
        let (mut store, _) = governed();
        let err = item_status_change(&mut store, &ctx(1, 1), &addr(REGISTRY), &rid(0x77), 1, false, false).unwrap_err();
        assert!(matches!(err, FlowsError::Invariant(InvariantError::MissingRegistryItem { .. })));
    }

    #[test]
    fn registry_binds_flow_and_arbitrator() {
        let (store, flow) = governed();
        let f = store.grant(&flow).unwrap().unwrap();
        assert_eq!(f.registry, Some(addr(REGISTRY)));
        assert_eq!(f.arbitrator, Some(addr(ARBITRATOR)));
        assert_eq!(store.arbitrator_flow(&addr(ARBITRATOR)).unwrap(), Some(flow));
    }

    // ------------------------------------------------------------------
    // Disputes
    // ------------------------------------------------------------------

    fn opened(dispute_id: u64) -> DisputeOpened {
        DisputeOpened {
            arbitrator: addr(ARBITRATOR),
            dispute_id,
            arbitrable: addr(REGISTRY),
            voting_starts_at: 10,
            voting_ends_at: 20,
            reveal_period_ends_at: 30,
            arbitration_cost: 5,
        }
    }

    fn link(store: &mut MemoryFlowStore, dispute_id: u64, seed: u8) -> GrantId {
        link_dispute(
            store,
            &ctx(7, 7),
            &addr(REGISTRY),
            &addr(ARBITRATOR),
            dispute_id,
            &Hash256::from_u64(u64::from(seed)),
            &addr(0xCC),
        )
        .unwrap()
    }

    fn key(dispute_id: u64) -> DisputeKey {
        DisputeKey { dispute_id, arbitrator: addr(ARBITRATOR) }
    }

    #[test]
    fn dispute_links_in_either_order() {
        let (mut a, flow) = governed();
        let grant = submit(&mut a, 0x31, 50);
        start_dispute(&mut a, &ctx(7, 7), opened(1)).unwrap();
        link(&mut a, 1, 0x31);

        let (mut b, _) = governed();
        submit(&mut b, 0x31, 50);
        link(&mut b, 1, 0x31);
        start_dispute(&mut b, &ctx(7, 7), opened(1)).unwrap();

        let da = a.dispute(&key(1)).unwrap().unwrap();
        let db = b.dispute(&key(1)).unwrap().unwrap();
        assert_eq!(da, db);
        assert_eq!(da.grant_id, Some(grant));
        assert_eq!(da.flow_id, Some(flow));
        assert_eq!(da.item_id, Some(rid(0x31)));
        assert_eq!(da.voting_ends_at, 20);
        assert_eq!(da.ruling, None);
        assert!(!da.is_executed);
    }

    #[test]
    fn linking_does_not_touch_grant_flags() {
        let (mut store, _) = governed();
        let grant = submit(&mut store, 0x31, 50);
        link(&mut store, 1, 0x31);
        let g = store.grant(&grant).unwrap().unwrap();
        assert!(!g.is_disputed);
    }

    #[test]
    fn linking_item_without_flow_row_is_fatal() {
        let (mut store, flow) = governed();
        submit(&mut store, 0x31, 50);
        store.delete_grant(&flow).unwrap();
        let err = link_dispute(
            &mut store,
            &ctx(7, 7),
            &addr(REGISTRY),
            &addr(ARBITRATOR),
            1,
            &Hash256::from_u64(0x31),
            &addr(0xCC),
        )
        .unwrap_err();
        assert!(matches!(err, FlowsError::Invariant(InvariantError::MissingParent { .. })));
    }

    #[test]
    fn unknown_evidence_group_is_fatal() {
        let (mut store, _) = governed();
        let err = link_dispute(
            &mut store,
            &ctx(1, 1),
            &addr(REGISTRY),
            &addr(ARBITRATOR),
            1,
            &Hash256::from_u64(4242),
            &addr(0xCC),
        )
        .unwrap_err();
        assert!(matches!(err, FlowsError::Invariant(InvariantError::MissingRegistryItem { .. })));
    }

    #[test]
    fn dispute_for_unknown_arbitrator_is_fatal() {
        let (mut store, _) = governed();
        let mut o = opened(1);
        o.arbitrator = addr(0x01);
        let err = start_dispute(&mut store, &ctx(1, 1), o).unwrap_err();
        assert!(matches!(err, FlowsError::Invariant(InvariantError::MissingArbitrator(_))));
    }

    #[test]
    fn votes_tally_by_choice() {
        let (mut store, _) = governed();
        start_dispute(&mut store, &ctx(7, 7), opened(1)).unwrap();
        reveal_vote(&mut store, &addr(ARBITRATOR), 1, 1, 10).unwrap();
        reveal_vote(&mut store, &addr(ARBITRATOR), 1, 2, 4).unwrap();
        reveal_vote(&mut store, &addr(ARBITRATOR), 1, 1, 3).unwrap();
        reveal_vote(&mut store, &addr(ARBITRATOR), 1, 7, 100).unwrap();
        let d = store.dispute(&key(1)).unwrap().unwrap();
        assert_eq!(d.votes_for_requester, 13);
        assert_eq!(d.votes_for_challenger, 4);
        assert_eq!(d.votes_refused, 0);
        assert_eq!(d.total_votes, 17);
    }

    #[test]
    fn ruling_executes_once() {
        let (mut store, _) = governed();
        start_dispute(&mut store, &ctx(7, 7), opened(1)).unwrap();
        execute_ruling(&mut store, &addr(ARBITRATOR), 1, 2).unwrap();
        execute_ruling(&mut store, &addr(ARBITRATOR), 1, 1).unwrap();
        let d = store.dispute(&key(1)).unwrap().unwrap();
        assert_eq!(d.ruling, Some(Ruling::Challenger));
        assert!(d.is_executed);
    }

    #[test]
    fn ruling_for_missing_dispute_is_fatal() {
        let (mut store, _) = governed();
        let err = execute_ruling(&mut store, &addr(ARBITRATOR), 9, 1).unwrap_err();
        assert!(matches!(err, FlowsError::Invariant(InvariantError::MissingDispute { dispute_id: 9, .. })));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn counters_never_underflow(steps in prop::collection::vec((0u8..4, any::<bool>(), any::<bool>()), 1..40)) {
            let (mut store, flow) = governed();
            submit(&mut store, 0x31, 50);
            for (code, disputed, resolved) in steps {
                status(&mut store, 0x31, code, disputed, resolved);
                let f = store.grant(&flow).unwrap().unwrap();
                prop_assert!(f.awaiting_recipient_count <= 40);
                prop_assert!(f.active_recipient_count <= 40);
                prop_assert!(f.challenged_recipient_count <= 1);
            }
        }
    }
}
