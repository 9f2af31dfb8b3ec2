//! Shared builders and an in-memory harness for scenario tests.

use flows_core::error::FlowsError;
use flows_core::events::{Event, EventContext};
use flows_core::store::{FlowStore, MemoryFlowStore, WriteBuffer};
use flows_core::types::{Address, Grant, GrantId, Hash256};
use flows_engine::propagation::{recompute_child_shares, RecomputeReport};
use flows_engine::{ApplyOutcome, EngineConfig, Indexer};

pub const CHAIN_ID: u64 = 8453;

/// Address with every byte set to `seed`.
pub fn addr(seed: u8) -> Address {
    Address([seed; 20])
}

/// Recipient id with every byte set to `seed`.
pub fn rid(seed: u8) -> Hash256 {
    Hash256([seed; 32])
}

/// Grant id of the recipient row created with `rid(seed)`.
pub fn row(seed: u8) -> GrantId {
    GrantId::from_recipient_id(&rid(seed))
}

/// Grant id of a flow keyed by its contract (top-level or placeholder).
pub fn flow_row(contract: Address) -> GrantId {
    GrantId::from_address(&contract)
}

fn tagged(contract: Address, tag: u8) -> Address {
    let mut bytes = contract.0;
    bytes[0] = tag;
    Address(bytes)
}

pub fn baseline_pool(contract: Address) -> Address {
    tagged(contract, 0xBA)
}

pub fn bonus_pool(contract: Address) -> Address {
    tagged(contract, 0xB0)
}

pub fn ctx(block: u64) -> EventContext {
    EventContext {
        chain_id: CHAIN_ID,
        block_number: block,
        block_timestamp: 1_000 + block * 12,
        log_index: 0,
        tx_hash: Hash256::from_u64(block),
    }
}

pub fn flow_initialized(contract: Address, parent: Option<Address>) -> Event {
    Event::FlowInitialized {
        contract,
        parent,
        baseline_pool: baseline_pool(contract),
        bonus_pool: bonus_pool(contract),
        baseline_pool_flow_rate_percent: 800_000,
        manager_reward_pool_flow_rate_percent: 0,
        self_baseline_units: 0,
        self_bonus_units: 0,
        metadata_uri: None,
        metadata: None,
    }
}

/// Leaf recipient `addr(seed)` with id `rid(seed)`.
pub fn recipient_created(contract: Address, seed: u8) -> Event {
    Event::RecipientCreated {
        contract,
        recipient_id: rid(seed),
        recipient: addr(seed),
        metadata_uri: None,
        metadata: None,
    }
}

/// Nested flow `child` added to `parent` with id `rid(id_seed)`.
pub fn flow_recipient_created(parent: Address, child: Address, id_seed: u8) -> Event {
    Event::FlowRecipientCreated {
        contract: parent,
        recipient_id: rid(id_seed),
        recipient: child,
        baseline_pool: baseline_pool(child),
        bonus_pool: bonus_pool(child),
        metadata_uri: None,
        metadata: None,
    }
}

pub fn recipient_removed(contract: Address, seed: u8) -> Event {
    Event::RecipientRemoved {
        contract,
        recipient_id: rid(seed),
    }
}

pub fn baseline_units(contract: Address, member: Address, units: u128) -> Event {
    Event::MemberUnitsUpdated {
        pool: baseline_pool(contract),
        member,
        new_units: units,
    }
}

pub fn bonus_units(contract: Address, member: Address, units: u128) -> Event {
    Event::MemberUnitsUpdated {
        pool: bonus_pool(contract),
        member,
        new_units: units,
    }
}

/// Baseline distribution of `contract` at `per_second`.
pub fn distribution(contract: Address, per_second: u128) -> Event {
    Event::FlowDistributionUpdated {
        pool: baseline_pool(contract),
        distributor: contract,
        new_rate: per_second,
    }
}

pub fn allocation(contract: Address, seed: u8, allocator: Address, key: u64, bps: u32, total_weight: u128) -> Event {
    Event::AllocationSet {
        contract,
        recipient_id: rid(seed),
        strategy: addr(0x5A),
        key: Hash256::from_u64(key),
        allocator,
        bps,
        total_weight,
    }
}

pub fn committed(contract: Address, key: u64) -> Event {
    Event::AllocationCommitted {
        contract,
        strategy: addr(0x5A),
        key: Hash256::from_u64(key),
    }
}

/// Engine plus in-memory store, committing block by block like the node.
pub struct Harness {
    pub indexer: Indexer,
    pub store: MemoryFlowStore,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            indexer: Indexer::new(config),
            store: MemoryFlowStore::new(),
        }
    }

    /// Reduce `events` as block `number` and commit atomically.
    ///
    /// On error nothing is committed and deferred work is dropped.
    pub fn block(&mut self, number: u64, events: &[Event]) -> Result<Vec<ApplyOutcome>, FlowsError> {
        let c = ctx(number);
        let (outcomes, writes) = {
            let mut buffer = WriteBuffer::new(&self.store);
            let mut outcomes = Vec::with_capacity(events.len());
            let mut failed = None;
            for event in events {
                match self.indexer.apply(&mut buffer, &c, event) {
                    Ok(out) => outcomes.push(out),
                    Err(e) => {
                        failed = Some(e);
                        break;
                    }
                }
            }
            if failed.is_none() {
                if let Err(e) = self.indexer.finish_block(&mut buffer, &c) {
                    failed = Some(e);
                }
            }
            if let Some(e) = failed {
                self.indexer.reset();
                return Err(e);
            }
            (outcomes, buffer.into_writes())
        };
        self.store.apply_writes(writes)?;
        Ok(outcomes)
    }

    /// Like [`Harness::block`], panicking on failure.
    pub fn run(&mut self, number: u64, events: &[Event]) -> Vec<ApplyOutcome> {
        self.block(number, events).unwrap()
    }

    pub fn grant(&self, id: &GrantId) -> Grant {
        self.store
            .grant(id)
            .unwrap()
            .unwrap_or_else(|| panic!("grant {id} missing"))
    }

    pub fn incoming(&self, id: &GrantId) -> u128 {
        self.grant(id).monthly_incoming_flow_rate
    }

    pub fn canonical(&self, contract: Address) -> GrantId {
        self.store.flow_contract_grant(&contract).unwrap().unwrap()
    }

    /// Overwrite a flow's monthly pool rates, bypassing per-second granularity.
    pub fn set_monthly_pool_rates(&mut self, contract: Address, baseline: u128, bonus: u128) {
        let id = self.canonical(contract);
        let mut flow = self.grant(&id);
        flow.monthly_baseline_pool_flow_rate = baseline;
        flow.monthly_bonus_pool_flow_rate = bonus;
        flow.refresh_outgoing();
        self.store.put_grant(&flow).unwrap();
    }

    pub fn recompute(&mut self, contract: Address, block: u64) -> RecomputeReport {
        let id = self.canonical(contract);
        recompute_child_shares(&mut self.store, &ctx(block), &id).unwrap()
    }

    /// Every grant row in key order.
    pub fn snapshot(&self) -> Vec<Grant> {
        self.store.grants().unwrap()
    }

    /// Structural children of a flow contract's canonical row.
    pub fn children(&self, contract: Address) -> Vec<GrantId> {
        self.store.children(&self.canonical(contract)).unwrap()
    }
}
