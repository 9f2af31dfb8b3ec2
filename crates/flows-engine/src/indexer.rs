//! Event reducer.
//!
//! [`Indexer::apply`] routes each event to its component and decides when
//! the propagator runs. With batching on, `allocation_set` only marks its
//! flow pending; the matching `allocation_committed` (or the end of the
//! block) runs one recompute per pending flow.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use flows_core::constants::DEFAULT_FRESHNESS_WINDOW_SECS;
use flows_core::error::FlowsError;
use flows_core::events::{Event, EventContext};
use flows_core::store::FlowStore;
use flows_core::types::{Address, GrantId, Hash256, IndexedBlock};

use crate::allocation::{cast_allocation, AllocationVote};
use crate::curation::{self, DisputeOpened, RegistryConfigInput, SubmittedItem};
use crate::lifecycle::{self, FlowInit, FlowPools, NewRecipient};
use crate::lookup::{require_flow, require_grant};
use crate::math::settle_earnings;
use crate::member_units::apply_member_units;
use crate::propagation::recompute_child_shares;

/// Engine tuning.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Aggregate refresh is skipped while the indexed head lags wall-clock
    /// time by more than this.
    pub freshness_window_secs: u64,
    /// Defer `allocation_set` recomputes until the allocation is committed.
    pub batch_allocations: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            freshness_window_secs: DEFAULT_FRESHNESS_WINDOW_SECS,
            batch_allocations: true,
        }
    }
}

/// What one event caused.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Flows whose child shares were recomputed, in order.
    pub recomputed: Vec<GrantId>,
    /// A recompute was left for a later commit.
    pub deferred: bool,
}

#[derive(Debug, Default)]
pub struct Indexer {
    config: EngineConfig,
    /// Flow contracts with allocations awaiting commit.
    pending: BTreeSet<Address>,
}

impl Indexer {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            pending: BTreeSet::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Number of flows with a deferred recompute.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Reduce one event into `store`.
    ///
    /// An error leaves `store` partially written; callers reduce into a
    /// [`WriteBuffer`](flows_core::store::WriteBuffer) and drop it on failure.
    pub fn apply<S: FlowStore + ?Sized>(
        &mut self,
        store: &mut S,
        ctx: &EventContext,
        event: &Event,
    ) -> Result<ApplyOutcome, FlowsError> {
        let mut out = ApplyOutcome::default();
        debug!(
            kind = event.kind(),
            block = ctx.block_number,
            log = ctx.log_index,
            "applying event"
        );

        match event.clone() {
            Event::FlowInitialized {
                contract,
                parent,
                baseline_pool,
                bonus_pool,
                baseline_pool_flow_rate_percent,
                manager_reward_pool_flow_rate_percent,
                self_baseline_units,
                self_bonus_units,
                metadata_uri,
                metadata,
            } => {
                let id = lifecycle::flow_initialized(
                    store,
                    ctx,
                    FlowInit {
                        contract,
                        parent,
                        pools: FlowPools {
                            baseline: baseline_pool,
                            bonus: bonus_pool,
                        },
                        baseline_pool_flow_rate_percent,
                        manager_reward_pool_flow_rate_percent,
                        self_baseline_units,
                        self_bonus_units,
                        metadata_uri,
                        metadata,
                    },
                )?;
                self.recompute(store, ctx, &id, &mut out)?;
            }
            Event::RecipientCreated {
                contract,
                recipient_id,
                recipient,
                metadata_uri,
                metadata,
            } => {
                let created = lifecycle::recipient_created(
                    store,
                    ctx,
                    NewRecipient {
                        contract,
                        recipient_id,
                        recipient,
                        metadata_uri,
                        metadata,
                    },
                )?;
                self.recompute(store, ctx, &created.parent_id, &mut out)?;
            }
            Event::FlowRecipientCreated {
                contract,
                recipient_id,
                recipient,
                baseline_pool,
                bonus_pool,
                metadata_uri,
                metadata,
            } => {
                let created = lifecycle::flow_recipient_created(
                    store,
                    ctx,
                    NewRecipient {
                        contract,
                        recipient_id,
                        recipient,
                        metadata_uri,
                        metadata,
                    },
                    FlowPools {
                        baseline: baseline_pool,
                        bonus: bonus_pool,
                    },
                )?;
                self.recompute(store, ctx, &created.parent_id, &mut out)?;
                if created.adopted {
                    self.recompute(store, ctx, &created.grant_id, &mut out)?;
                }
            }
            Event::RecipientRemoved { contract, recipient_id } => {
                let removed = lifecycle::recipient_removed(store, ctx, &contract, &recipient_id)?;
                if removed.changed {
                    self.recompute(store, ctx, &removed.parent_id, &mut out)?;
                }
            }
            Event::AllocationSet {
                contract,
                recipient_id,
                key,
                allocator,
                bps,
                total_weight,
                ..
            } => {
                let cast = cast_allocation(
                    store,
                    ctx,
                    &AllocationVote {
                        contract,
                        key,
                        recipient_id,
                        allocator,
                        bps,
                        total_weight,
                    },
                )?;
                if self.config.batch_allocations {
                    self.pending.insert(contract);
                    out.deferred = true;
                } else {
                    self.recompute(store, ctx, &cast.flow_id, &mut out)?;
                }
            }
            Event::VoteCast {
                contract,
                recipient_id,
                token_id,
                voter,
                bps,
                total_weight,
            } => {
                let cast = cast_allocation(
                    store,
                    ctx,
                    &AllocationVote {
                        contract,
                        key: Hash256::from_u64(token_id),
                        recipient_id,
                        allocator: voter,
                        bps,
                        total_weight,
                    },
                )?;
                self.run_recompute(store, ctx, &cast.flow_id, &mut out)?;
            }
            Event::AllocationCommitted { contract, .. } => {
                if self.pending.remove(&contract) {
                    let flow = require_flow(store, &contract)?;
                    self.run_recompute(store, ctx, &flow.id, &mut out)?;
                } else {
                    debug!(%contract, "commit without pending allocations");
                }
            }
            Event::MemberUnitsUpdated { pool, member, new_units } => {
                let applied = apply_member_units(store, ctx, &pool, &member, new_units)?;
                if let Some(flow_id) = applied.recompute_target() {
                    self.recompute(store, ctx, flow_id, &mut out)?;
                }
            }
            Event::FlowDistributionUpdated {
                pool,
                distributor,
                new_rate,
            } => {
                if let Some(flow_id) = lifecycle::flow_distribution_updated(store, ctx, &pool, &distributor, new_rate)? {
                    self.recompute(store, ctx, &flow_id, &mut out)?;
                }
            }
            Event::RegistryInitialized {
                registry,
                flow,
                arbitrator,
                challenge_period_duration,
            } => {
                curation::registry_initialized(
                    store,
                    ctx,
                    RegistryConfigInput {
                        registry,
                        flow,
                        arbitrator,
                        challenge_period_duration,
                    },
                )?;
            }
            Event::ItemSubmitted {
                registry,
                item_id,
                recipient,
                evidence_group_id,
                is_flow,
                metadata_uri,
                metadata,
                ..
            } => {
                curation::submit_item(
                    store,
                    ctx,
                    SubmittedItem {
                        registry,
                        item_id,
                        recipient,
                        evidence_group_id,
                        is_flow,
                        metadata_uri,
                        metadata,
                    },
                )?;
            }
            Event::RemovalRequested {
                registry,
                item_id,
                evidence_group_id,
                ..
            } => curation::request_removal(store, ctx, &registry, &item_id, &evidence_group_id)?,
            Event::ItemStatusChange {
                registry,
                item_id,
                status,
                disputed,
                resolved,
            } => curation::item_status_change(store, ctx, &registry, &item_id, status, disputed, resolved)?,
            Event::Dispute {
                registry,
                arbitrator,
                dispute_id,
                evidence_group_id,
                challenger,
            } => {
                curation::link_dispute(store, ctx, &registry, &arbitrator, dispute_id, &evidence_group_id, &challenger)?;
            }
            Event::DisputeCreated {
                arbitrator,
                dispute_id,
                arbitrable,
                voting_starts_at,
                voting_ends_at,
                reveal_period_ends_at,
                arbitration_cost,
            } => {
                curation::start_dispute(
                    store,
                    ctx,
                    DisputeOpened {
                        arbitrator,
                        dispute_id,
                        arbitrable,
                        voting_starts_at,
                        voting_ends_at,
                        reveal_period_ends_at,
                        arbitration_cost,
                    },
                )?;
            }
            Event::VoteRevealed {
                arbitrator,
                dispute_id,
                choice,
                votes,
                ..
            } => curation::reveal_vote(store, &arbitrator, dispute_id, choice, votes)?,
            Event::RulingExecuted {
                arbitrator,
                dispute_id,
                ruling,
            } => curation::execute_ruling(store, &arbitrator, dispute_id, ruling)?,
        }
        Ok(out)
    }

    /// Recompute `flow_id` now, unless it is waiting on an allocation commit.
    fn recompute<S: FlowStore + ?Sized>(
        &mut self,
        store: &mut S,
        ctx: &EventContext,
        flow_id: &GrantId,
        out: &mut ApplyOutcome,
    ) -> Result<(), FlowsError> {
        if !self.pending.is_empty() {
            let flow = require_grant(store, flow_id)?;
            if self.pending.contains(&flow.recipient) {
                out.deferred = true;
                return Ok(());
            }
        }
        self.run_recompute(store, ctx, flow_id, out)
    }

    fn run_recompute<S: FlowStore + ?Sized>(
        &mut self,
        store: &mut S,
        ctx: &EventContext,
        flow_id: &GrantId,
        out: &mut ApplyOutcome,
    ) -> Result<(), FlowsError> {
        recompute_child_shares(store, ctx, flow_id)?;
        out.recomputed.push(flow_id.clone());
        Ok(())
    }

    /// Run every recompute still pending at the end of a block.
    pub fn finish_block<S: FlowStore + ?Sized>(
        &mut self,
        store: &mut S,
        ctx: &EventContext,
    ) -> Result<Vec<GrantId>, FlowsError> {
        let pending = std::mem::take(&mut self.pending);
        let mut flushed = Vec::with_capacity(pending.len());
        for contract in pending {
            let flow = require_flow(store, &contract)?;
            warn!(flow = %flow.id, block = ctx.block_number, "allocations never committed, flushing at block end");
            recompute_child_shares(store, ctx, &flow.id)?;
            flushed.push(flow.id);
        }
        Ok(flushed)
    }

    /// Drop deferred work, e.g. after a block failed to reduce.
    pub fn reset(&mut self) {
        self.pending.clear();
    }

    /// Settle earnings of every grant up to the head of its own chain.
    ///
    /// Chains whose head is more than the freshness window behind
    /// `wall_now` are left alone. Returns `None` when no chain is fresh.
    pub fn refresh_aggregates<S: FlowStore + ?Sized>(
        &self,
        store: &mut S,
        heads: &[IndexedBlock],
        wall_now: u64,
    ) -> Result<Option<usize>, FlowsError> {
        let window = self.config.freshness_window_secs;
        let fresh: BTreeMap<u64, u64> = heads
            .iter()
            .filter(|head| {
                let lag = wall_now.saturating_sub(head.timestamp);
                if lag > window {
                    debug!(chain = head.chain_id, lag, window, "head is stale, skipping aggregate refresh");
                    return false;
                }
                true
            })
            .map(|head| (head.chain_id, head.timestamp))
            .collect();
        if fresh.is_empty() {
            return Ok(None);
        }

        let mut settled = 0;
        for mut grant in store.grants()? {
            let Some(&head_timestamp) = fresh.get(&grant.chain_id) else {
                continue;
            };
            if settle_earnings(&mut grant, head_timestamp) {
                store.put_grant(&grant)?;
                settled += 1;
            }
        }
        debug!(settled, chains = fresh.len(), "aggregates refreshed");
        Ok(Some(settled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use flows_core::constants::SECONDS_PER_MONTH;
    use flows_core::store::MemoryFlowStore;

    const FLOW: u8 = 0xF0;

    fn flow_init() -> Event {
        Event::FlowInitialized {
            contract: addr(FLOW),
            parent: None,
            baseline_pool: baseline_pool_of(addr(FLOW)),
            bonus_pool: bonus_pool_of(addr(FLOW)),
            baseline_pool_flow_rate_percent: 1_000_000,
            manager_reward_pool_flow_rate_percent: 0,
            self_baseline_units: 0,
            self_bonus_units: 0,
            metadata_uri: None,
            metadata: None,
        }
    }

    fn recipient(seed: u8) -> Event {
        Event::RecipientCreated {
            contract: addr(FLOW),
            recipient_id: rid(seed),
            recipient: addr(seed),
            metadata_uri: None,
            metadata: None,
        }
    }

    fn units(seed: u8, n: u128) -> Event {
        Event::MemberUnitsUpdated {
            pool: baseline_pool_of(addr(FLOW)),
            member: addr(seed),
            new_units: n,
        }
    }

    fn allocation(seed: u8, bps: u32) -> Event {
        Event::AllocationSet {
            contract: addr(FLOW),
            recipient_id: rid(seed),
            strategy: addr(0x5A),
            key: Hash256::from_u64(1),
            allocator: addr(0x55),
            bps,
            total_weight: 1_000_000,
        }
    }

    fn committed() -> Event {
        Event::AllocationCommitted {
            contract: addr(FLOW),
            strategy: addr(0x5A),
            key: Hash256::from_u64(1),
        }
    }

    fn setup(batch: bool) -> (Indexer, MemoryFlowStore, GrantId) {
        let mut indexer = Indexer::new(EngineConfig {
            batch_allocations: batch,
            ..EngineConfig::default()
        });
        let mut store = MemoryFlowStore::new();
        let c = ctx(1, 0);
        for event in [flow_init(), recipient(0xA1), recipient(0xB1), units(0xA1, 1), units(0xB1, 3)] {
            indexer.apply(&mut store, &c, &event).unwrap();
        }
        // 300,000 per month, rounded to a whole per-second rate.
        let rate = Event::FlowDistributionUpdated {
            pool: baseline_pool_of(addr(FLOW)),
            distributor: addr(FLOW),
            new_rate: 300_000 / u128::from(SECONDS_PER_MONTH) + 1,
        };
        indexer.apply(&mut store, &c, &rate).unwrap();
        (indexer, store, GrantId::from_address(&addr(FLOW)))
    }

    #[test]
    fn event_driven_split() {
        let (_, store, flow) = setup(true);
        let pool_rate = store.grant(&flow).unwrap().unwrap().monthly_baseline_pool_flow_rate;
        let a = incoming(&store, &GrantId::from_recipient_id(&rid(0xA1)));
        let b = incoming(&store, &GrantId::from_recipient_id(&rid(0xB1)));
        assert_eq!(a, pool_rate / 4);
        assert_eq!(b, pool_rate * 3 / 4);
    }

    #[test]
    fn batched_allocations_wait_for_commit() {
        let (mut indexer, mut store, flow) = setup(true);
        let out = indexer.apply(&mut store, &ctx(2, 10), &allocation(0xA1, 500_000)).unwrap();
        assert!(out.deferred);
        assert!(out.recomputed.is_empty());
        assert_eq!(indexer.pending(), 1);

        // Units updates for the pending flow are folded into the commit.
        let out = indexer.apply(&mut store, &ctx(2, 10), &units(0xA1, 2)).unwrap();
        assert!(out.deferred);

        let out = indexer.apply(&mut store, &ctx(2, 10), &committed()).unwrap();
        assert_eq!(out.recomputed, vec![flow.clone()]);
        assert_eq!(indexer.pending(), 0);

        // A second commit has nothing to do.
        let out = indexer.apply(&mut store, &ctx(2, 10), &committed()).unwrap();
        assert!(out.recomputed.is_empty());
    }

    #[test]
    fn unbatched_allocations_recompute_at_once() {
        let (mut indexer, mut store, flow) = setup(false);
        let out = indexer.apply(&mut store, &ctx(2, 10), &allocation(0xA1, 500_000)).unwrap();
        assert_eq!(out.recomputed, vec![flow]);
        assert!(!out.deferred);
    }

    #[test]
    fn legacy_vote_recomputes_immediately() {
        let (mut indexer, mut store, flow) = setup(true);
        let vote = Event::VoteCast {
            contract: addr(FLOW),
            recipient_id: rid(0xB1),
            token_id: 42,
            voter: addr(0x56),
            bps: 1_000_000,
            total_weight: 10,
        };
        let out = indexer.apply(&mut store, &ctx(2, 10), &vote).unwrap();
        assert_eq!(out.recomputed, vec![flow]);
        let live = store.live_set(&addr(FLOW), &Hash256::from_u64(42)).unwrap();
        assert_eq!(live.len(), 1);
    }

    #[test]
    fn finish_block_flushes_uncommitted() {
        let (mut indexer, mut store, flow) = setup(true);
        indexer.apply(&mut store, &ctx(2, 10), &allocation(0xA1, 500_000)).unwrap();
        let flushed = indexer.finish_block(&mut store, &ctx(2, 10)).unwrap();
        assert_eq!(flushed, vec![flow]);
        assert_eq!(indexer.pending(), 0);
        assert!(indexer.finish_block(&mut store, &ctx(2, 10)).unwrap().is_empty());
    }

    fn head(chain_id: u64, timestamp: u64) -> IndexedBlock {
        IndexedBlock { chain_id, number: 1, timestamp }
    }

    #[test]
    fn refresh_is_suppressed_when_stale() {
        let (indexer, mut store, _) = setup(true);
        let window = indexer.config().freshness_window_secs;
        assert_eq!(indexer.refresh_aggregates(&mut store, &[], 1_000).unwrap(), None);
        assert_eq!(indexer.refresh_aggregates(&mut store, &[head(1, 1_000)], 1_000 + window + 1).unwrap(), None);
        let settled = indexer.refresh_aggregates(&mut store, &[head(1, 1_000)], 1_000 + window).unwrap();
        assert!(settled.unwrap() > 0);
        // Settling again to the same head changes nothing.
        assert_eq!(indexer.refresh_aggregates(&mut store, &[head(1, 1_000)], 1_000).unwrap(), Some(0));
    }

    #[test]
    fn refresh_settles_each_chain_to_its_own_head() {
        let (indexer, mut store, _) = setup(true);
        let before = store.grants().unwrap();
        let window = indexer.config().freshness_window_secs;

        // Another chain is far ahead; chain 1 has no head of its own.
        let settled = indexer.refresh_aggregates(&mut store, &[head(2, 1_000_000)], 1_000_000 + window).unwrap();
        assert_eq!(settled, Some(0));
        assert_eq!(store.grants().unwrap(), before);

        // With both heads known, chain 1 rows stop at chain 1's head.
        let heads = [head(1, 1_000), head(2, 1_000_000)];
        let settled = indexer.refresh_aggregates(&mut store, &heads, 1_000).unwrap();
        assert_eq!(settled, Some(before.len()));
        assert!(store.grants().unwrap().iter().all(|g| g.earnings_settled_at == 1_000));
    }

    #[test]
    fn unknown_pool_fails_the_event() {
        let (mut indexer, mut store, _) = setup(true);
        let bad = Event::MemberUnitsUpdated {
            pool: addr(0x99),
            member: addr(0xA1),
            new_units: 1,
        };
        assert!(indexer.apply(&mut store, &ctx(2, 10), &bad).is_err());
    }
}
