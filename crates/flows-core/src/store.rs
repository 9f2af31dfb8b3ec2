//! Keyed store interface, in-memory implementation, and block write buffer.
//!
//! [`FlowStore`] is an abstract table-per-keyspace store: implementors
//! provide raw byte access and get every typed accessor for free. The
//! [`MemoryFlowStore`] is suitable for testing; the node uses RocksDB
//! (flows-node). A [`WriteBuffer`] layers uncommitted writes over any store
//! so that a whole block can be reduced and then committed (or dropped) at
//! once.
//!
//! Values are bincode-encoded. Keys are built by the functions in [`keys`].

use std::collections::{BTreeMap, HashMap};

use crate::error::StoreError;
use crate::types::{
    Address, Allocation, AllocationId, Dispute, DisputeKey, FlowRates, Grant, GrantId, Hash256,
    IndexedBlock, RegistryConfig,
};

/// One keyspace of the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    Grants,
    Allocations,
    AllocationLiveSets,
    PoolGrants,
    Children,
    SiblingSnapshots,
    Disputes,
    RegistryItems,
    FlowContracts,
    RecipientRows,
    Registries,
    Arbitrators,
    EvidenceGroups,
    PoolMemberUnits,
    Meta,
}

impl Table {
    pub const ALL: [Table; 15] = [
        Table::Grants,
        Table::Allocations,
        Table::AllocationLiveSets,
        Table::PoolGrants,
        Table::Children,
        Table::SiblingSnapshots,
        Table::Disputes,
        Table::RegistryItems,
        Table::FlowContracts,
        Table::RecipientRows,
        Table::Registries,
        Table::Arbitrators,
        Table::EvidenceGroups,
        Table::PoolMemberUnits,
        Table::Meta,
    ];

    /// Stable name, used as the RocksDB column family name.
    pub fn name(&self) -> &'static str {
        match self {
            Table::Grants => "grants",
            Table::Allocations => "allocations",
            Table::AllocationLiveSets => "allocation_live_sets",
            Table::PoolGrants => "pool_grants",
            Table::Children => "children",
            Table::SiblingSnapshots => "sibling_snapshots",
            Table::Disputes => "disputes",
            Table::RegistryItems => "registry_items",
            Table::FlowContracts => "flow_contracts",
            Table::RecipientRows => "recipient_rows",
            Table::Registries => "registries",
            Table::Arbitrators => "arbitrators",
            Table::EvidenceGroups => "evidence_groups",
            Table::PoolMemberUnits => "pool_member_units",
            Table::Meta => "meta",
        }
    }
}

/// A single buffered mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteOp {
    Put { table: Table, key: Vec<u8>, value: Vec<u8> },
    Delete { table: Table, key: Vec<u8> },
}

/// Key encodings. Variable-length grant ids are hex strings and never
/// contain a zero byte, which separates them from what follows.
pub mod keys {
    use super::*;

    pub fn grant(id: &GrantId) -> Vec<u8> {
        id.as_str().as_bytes().to_vec()
    }

    pub fn allocation(id: &AllocationId) -> Vec<u8> {
        id.0.as_bytes().to_vec()
    }

    pub fn live_set(contract: &Address, key: &Hash256) -> Vec<u8> {
        let mut k = Vec::with_capacity(52);
        k.extend_from_slice(contract.as_bytes());
        k.extend_from_slice(key.as_bytes());
        k
    }

    pub fn address(address: &Address) -> Vec<u8> {
        address.as_bytes().to_vec()
    }

    pub fn sibling_snapshot(chain_id: u64, recipient: &Address, parent: &GrantId) -> Vec<u8> {
        let mut k = Vec::with_capacity(28 + parent.as_str().len());
        k.extend_from_slice(&chain_id.to_be_bytes());
        k.extend_from_slice(recipient.as_bytes());
        k.extend_from_slice(parent.as_str().as_bytes());
        k
    }

    pub fn dispute(key: &DisputeKey) -> Vec<u8> {
        let mut k = Vec::with_capacity(28);
        k.extend_from_slice(&key.dispute_id.to_be_bytes());
        k.extend_from_slice(key.arbitrator.as_bytes());
        k
    }

    pub fn registry_item(registry: &Address, item_id: &Hash256) -> Vec<u8> {
        let mut k = Vec::with_capacity(52);
        k.extend_from_slice(registry.as_bytes());
        k.extend_from_slice(item_id.as_bytes());
        k
    }

    pub fn recipient_rows(parent: &GrantId, recipient: &Address) -> Vec<u8> {
        let mut k = Vec::with_capacity(parent.as_str().len() + 21);
        k.extend_from_slice(parent.as_str().as_bytes());
        k.push(0);
        k.extend_from_slice(recipient.as_bytes());
        k
    }

    pub fn pool_member(pool: &Address, member: &Address) -> Vec<u8> {
        let mut k = Vec::with_capacity(40);
        k.extend_from_slice(pool.as_bytes());
        k.extend_from_slice(member.as_bytes());
        k
    }

    pub const INDEXED_BLOCK_PREFIX: &[u8] = b"indexed_block/";

    pub fn indexed_block(chain_id: u64) -> Vec<u8> {
        let mut k = INDEXED_BLOCK_PREFIX.to_vec();
        k.extend_from_slice(&chain_id.to_be_bytes());
        k
    }
}

fn encode<T: bincode::Encode + ?Sized>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StoreError::Codec(e.to_string()))
}

fn decode<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T, StoreError> {
    let (value, _) = bincode::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| StoreError::Codec(e.to_string()))?;
    Ok(value)
}

/// Abstract keyed store holding every keyspace the indexer maintains.
///
/// Implementors provide the four raw operations; the typed accessors are
/// provided methods. List-valued keyspaces (children, live sets, recipient
/// rows) drop their key when written empty.
///
/// Not thread-safe; callers should wrap in a `Mutex` or `RwLock` if
/// concurrent access is needed.
pub trait FlowStore {
    fn get_raw(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    fn put_raw(&mut self, table: Table, key: Vec<u8>, value: Vec<u8>) -> Result<(), StoreError>;

    fn delete_raw(&mut self, table: Table, key: &[u8]) -> Result<(), StoreError>;

    /// All entries of a table in key order.
    fn scan_raw(&self, table: Table) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;

    /// Apply a set of buffered writes.
    ///
    /// Default implementation applies them one by one; persistent stores
    /// override it to commit atomically.
    fn apply_writes(&mut self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        for op in ops {
            match op {
                WriteOp::Put { table, key, value } => self.put_raw(table, key, value)?,
                WriteOp::Delete { table, key } => self.delete_raw(table, &key)?,
            }
        }
        Ok(())
    }

    // --- typed helpers ---

    fn get_value<T: bincode::Decode<()>>(&self, table: Table, key: &[u8]) -> Result<Option<T>, StoreError> {
        self.get_raw(table, key)?.map(|bytes| decode(&bytes)).transpose()
    }

    fn put_value<T: bincode::Encode + ?Sized>(&mut self, table: Table, key: Vec<u8>, value: &T) -> Result<(), StoreError> {
        let bytes = encode(value)?;
        self.put_raw(table, key, bytes)
    }

    fn put_list<T: bincode::Encode>(&mut self, table: Table, key: Vec<u8>, list: &[T]) -> Result<(), StoreError> {
        if list.is_empty() {
            self.delete_raw(table, &key)
        } else {
            self.put_value(table, key, list)
        }
    }

    // --- grants ---

    fn grant(&self, id: &GrantId) -> Result<Option<Grant>, StoreError> {
        self.get_value(Table::Grants, &keys::grant(id))
    }

    fn put_grant(&mut self, grant: &Grant) -> Result<(), StoreError> {
        self.put_value(Table::Grants, keys::grant(&grant.id), grant)
    }

    fn delete_grant(&mut self, id: &GrantId) -> Result<(), StoreError> {
        self.delete_raw(Table::Grants, &keys::grant(id))
    }

    /// Every grant row. Used by periodic aggregate refresh and the read side.
    fn grants(&self) -> Result<Vec<Grant>, StoreError> {
        self.scan_raw(Table::Grants)?
            .iter()
            .map(|(_, v)| decode(v))
            .collect()
    }

    // --- allocations ---

    fn allocation(&self, id: &AllocationId) -> Result<Option<Allocation>, StoreError> {
        self.get_value(Table::Allocations, &keys::allocation(id))
    }

    fn put_allocation(&mut self, allocation: &Allocation) -> Result<(), StoreError> {
        self.put_value(Table::Allocations, keys::allocation(&allocation.id), allocation)
    }

    fn delete_allocation(&mut self, id: &AllocationId) -> Result<(), StoreError> {
        self.delete_raw(Table::Allocations, &keys::allocation(id))
    }

    fn allocations(&self) -> Result<Vec<Allocation>, StoreError> {
        self.scan_raw(Table::Allocations)?
            .iter()
            .map(|(_, v)| decode(v))
            .collect()
    }

    fn live_set(&self, contract: &Address, key: &Hash256) -> Result<Vec<AllocationId>, StoreError> {
        Ok(self
            .get_value(Table::AllocationLiveSets, &keys::live_set(contract, key))?
            .unwrap_or_default())
    }

    fn put_live_set(&mut self, contract: &Address, key: &Hash256, ids: &[AllocationId]) -> Result<(), StoreError> {
        self.put_list(Table::AllocationLiveSets, keys::live_set(contract, key), ids)
    }

    // --- funding graph ---

    fn pool_grant(&self, pool: &Address) -> Result<Option<GrantId>, StoreError> {
        self.get_value(Table::PoolGrants, &keys::address(pool))
    }

    fn put_pool_grant(&mut self, pool: &Address, id: &GrantId) -> Result<(), StoreError> {
        self.put_value(Table::PoolGrants, keys::address(pool), id)
    }

    fn children(&self, parent: &GrantId) -> Result<Vec<GrantId>, StoreError> {
        Ok(self.get_value(Table::Children, &keys::grant(parent))?.unwrap_or_default())
    }

    fn put_children(&mut self, parent: &GrantId, children: &[GrantId]) -> Result<(), StoreError> {
        self.put_list(Table::Children, keys::grant(parent), children)
    }

    fn delete_children(&mut self, parent: &GrantId) -> Result<(), StoreError> {
        self.delete_raw(Table::Children, &keys::grant(parent))
    }

    fn flow_contract_grant(&self, contract: &Address) -> Result<Option<GrantId>, StoreError> {
        self.get_value(Table::FlowContracts, &keys::address(contract))
    }

    fn put_flow_contract_grant(&mut self, contract: &Address, id: &GrantId) -> Result<(), StoreError> {
        self.put_value(Table::FlowContracts, keys::address(contract), id)
    }

    fn recipient_rows(&self, parent: &GrantId, recipient: &Address) -> Result<Vec<GrantId>, StoreError> {
        Ok(self
            .get_value(Table::RecipientRows, &keys::recipient_rows(parent, recipient))?
            .unwrap_or_default())
    }

    fn put_recipient_rows(&mut self, parent: &GrantId, recipient: &Address, rows: &[GrantId]) -> Result<(), StoreError> {
        self.put_list(Table::RecipientRows, keys::recipient_rows(parent, recipient), rows)
    }

    fn delete_recipient_rows(&mut self, parent: &GrantId, recipient: &Address) -> Result<(), StoreError> {
        self.delete_raw(Table::RecipientRows, &keys::recipient_rows(parent, recipient))
    }

    fn sibling_snapshot(&self, chain_id: u64, recipient: &Address, parent: &GrantId) -> Result<Option<FlowRates>, StoreError> {
        self.get_value(Table::SiblingSnapshots, &keys::sibling_snapshot(chain_id, recipient, parent))
    }

    fn put_sibling_snapshot(&mut self, chain_id: u64, recipient: &Address, parent: &GrantId, rates: &FlowRates) -> Result<(), StoreError> {
        self.put_value(Table::SiblingSnapshots, keys::sibling_snapshot(chain_id, recipient, parent), rates)
    }

    fn delete_sibling_snapshot(&mut self, chain_id: u64, recipient: &Address, parent: &GrantId) -> Result<(), StoreError> {
        self.delete_raw(Table::SiblingSnapshots, &keys::sibling_snapshot(chain_id, recipient, parent))
    }

    fn pool_member_units(&self, pool: &Address, member: &Address) -> Result<Option<u128>, StoreError> {
        self.get_value(Table::PoolMemberUnits, &keys::pool_member(pool, member))
    }

    fn put_pool_member_units(&mut self, pool: &Address, member: &Address, units: u128) -> Result<(), StoreError> {
        self.put_value(Table::PoolMemberUnits, keys::pool_member(pool, member), &units)
    }

    // --- curation ---

    fn dispute(&self, key: &DisputeKey) -> Result<Option<Dispute>, StoreError> {
        self.get_value(Table::Disputes, &keys::dispute(key))
    }

    fn put_dispute(&mut self, dispute: &Dispute) -> Result<(), StoreError> {
        self.put_value(Table::Disputes, keys::dispute(&dispute.key()), dispute)
    }

    fn registry_item_grant(&self, registry: &Address, item_id: &Hash256) -> Result<Option<GrantId>, StoreError> {
        self.get_value(Table::RegistryItems, &keys::registry_item(registry, item_id))
    }

    fn put_registry_item_grant(&mut self, registry: &Address, item_id: &Hash256, id: &GrantId) -> Result<(), StoreError> {
        self.put_value(Table::RegistryItems, keys::registry_item(registry, item_id), id)
    }

    fn registry(&self, registry: &Address) -> Result<Option<RegistryConfig>, StoreError> {
        self.get_value(Table::Registries, &keys::address(registry))
    }

    fn put_registry(&mut self, config: &RegistryConfig) -> Result<(), StoreError> {
        self.put_value(Table::Registries, keys::address(&config.registry), config)
    }

    fn arbitrator_flow(&self, arbitrator: &Address) -> Result<Option<GrantId>, StoreError> {
        self.get_value(Table::Arbitrators, &keys::address(arbitrator))
    }

    fn put_arbitrator_flow(&mut self, arbitrator: &Address, flow: &GrantId) -> Result<(), StoreError> {
        self.put_value(Table::Arbitrators, keys::address(arbitrator), flow)
    }

    fn evidence_group_item(&self, registry: &Address, group: &Hash256) -> Result<Option<Hash256>, StoreError> {
        self.get_value(Table::EvidenceGroups, &keys::registry_item(registry, group))
    }

    fn put_evidence_group_item(&mut self, registry: &Address, group: &Hash256, item_id: &Hash256) -> Result<(), StoreError> {
        self.put_value(Table::EvidenceGroups, keys::registry_item(registry, group), item_id)
    }

    // --- meta ---

    fn indexed_block(&self, chain_id: u64) -> Result<Option<IndexedBlock>, StoreError> {
        self.get_value(Table::Meta, &keys::indexed_block(chain_id))
    }

    fn put_indexed_block(&mut self, block: &IndexedBlock) -> Result<(), StoreError> {
        self.put_value(Table::Meta, keys::indexed_block(block.chain_id), block)
    }

    /// Resume point of every chain seen so far.
    fn indexed_blocks(&self) -> Result<Vec<IndexedBlock>, StoreError> {
        self.scan_raw(Table::Meta)?
            .iter()
            .filter(|(k, _)| k.starts_with(keys::INDEXED_BLOCK_PREFIX))
            .map(|(_, v)| decode(v))
            .collect()
    }
}

/// In-memory store for testing.
///
/// Stores everything in `BTreeMap`s with no persistence.
#[derive(Default, Debug, Clone)]
pub struct MemoryFlowStore {
    tables: HashMap<Table, BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryFlowStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries in a table.
    pub fn len(&self, table: Table) -> usize {
        self.tables.get(&table).map_or(0, BTreeMap::len)
    }
}

impl FlowStore for MemoryFlowStore {
    fn get_raw(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.tables.get(&table).and_then(|t| t.get(key)).cloned())
    }

    fn put_raw(&mut self, table: Table, key: Vec<u8>, value: Vec<u8>) -> Result<(), StoreError> {
        self.tables.entry(table).or_default().insert(key, value);
        Ok(())
    }

    fn delete_raw(&mut self, table: Table, key: &[u8]) -> Result<(), StoreError> {
        if let Some(t) = self.tables.get_mut(&table) {
            t.remove(key);
        }
        Ok(())
    }

    fn scan_raw(&self, table: Table) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        Ok(self
            .tables
            .get(&table)
            .map(|t| t.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }
}

/// Uncommitted writes layered over a base store.
///
/// Reads see buffered writes first. Nothing reaches the base store until
/// [`into_writes`](Self::into_writes) is handed to
/// [`FlowStore::apply_writes`]; dropping the buffer discards the block.
pub struct WriteBuffer<'a, S: FlowStore + ?Sized> {
    base: &'a S,
    /// `None` marks a pending delete.
    writes: BTreeMap<(Table, Vec<u8>), Option<Vec<u8>>>,
}

impl<'a, S: FlowStore + ?Sized> WriteBuffer<'a, S> {
    pub fn new(base: &'a S) -> Self {
        Self {
            base,
            writes: BTreeMap::new(),
        }
    }

    /// Number of buffered writes (puts and deletes).
    pub fn pending(&self) -> usize {
        self.writes.len()
    }

    /// Consume the buffer into an ordered list of write operations.
    pub fn into_writes(self) -> Vec<WriteOp> {
        self.writes
            .into_iter()
            .map(|((table, key), value)| match value {
                Some(value) => WriteOp::Put { table, key, value },
                None => WriteOp::Delete { table, key },
            })
            .collect()
    }
}

impl<S: FlowStore + ?Sized> FlowStore for WriteBuffer<'_, S> {
    fn get_raw(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        match self.writes.get(&(table, key.to_vec())) {
            Some(buffered) => Ok(buffered.clone()),
            None => self.base.get_raw(table, key),
        }
    }

    fn put_raw(&mut self, table: Table, key: Vec<u8>, value: Vec<u8>) -> Result<(), StoreError> {
        self.writes.insert((table, key), Some(value));
        Ok(())
    }

    fn delete_raw(&mut self, table: Table, key: &[u8]) -> Result<(), StoreError> {
        self.writes.insert((table, key.to_vec()), None);
        Ok(())
    }

    fn scan_raw(&self, table: Table) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = self.base.scan_raw(table)?.into_iter().collect();
        for ((t, key), value) in &self.writes {
            if *t != table {
                continue;
            }
            match value {
                Some(v) => {
                    merged.insert(key.clone(), v.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_iter().collect())
    }
}
