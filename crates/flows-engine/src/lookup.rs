//! Required cross-reference lookups.
//!
//! Every mapping resolved here is write-once and must exist before it is
//! referenced; a miss is an [`InvariantError`] that aborts the event.

use flows_core::error::{FlowsError, InvariantError};
use flows_core::store::FlowStore;
use flows_core::types::{Address, Grant, GrantId, Hash256, RegistryConfig};

pub fn require_grant<S: FlowStore + ?Sized>(store: &S, id: &GrantId) -> Result<Grant, FlowsError> {
    store
        .grant(id)?
        .ok_or_else(|| InvariantError::MissingGrant(id.to_string()).into())
}

/// Parent row of `child`.
pub fn require_parent<S: FlowStore + ?Sized>(store: &S, child: &Grant) -> Result<Grant, FlowsError> {
    let parent_id = child.parent_id.as_ref().ok_or_else(|| InvariantError::MissingParent {
        child: child.id.to_string(),
        parent: "<none>".into(),
    })?;
    store.grant(parent_id)?.ok_or_else(|| {
        InvariantError::MissingParent {
            child: child.id.to_string(),
            parent: parent_id.to_string(),
        }
        .into()
    })
}

/// Canonical row of a flow contract.
pub fn require_flow<S: FlowStore + ?Sized>(store: &S, contract: &Address) -> Result<Grant, FlowsError> {
    let id = store
        .flow_contract_grant(contract)?
        .ok_or_else(|| InvariantError::MissingFlowContract(contract.to_string()))?;
    require_grant(store, &id)
}

/// Flow owning a distribution pool.
pub fn require_pool_flow<S: FlowStore + ?Sized>(store: &S, pool: &Address) -> Result<Grant, FlowsError> {
    let id = store
        .pool_grant(pool)?
        .ok_or_else(|| InvariantError::MissingPool(pool.to_string()))?;
    require_grant(store, &id)
}

pub fn require_registry<S: FlowStore + ?Sized>(store: &S, registry: &Address) -> Result<RegistryConfig, FlowsError> {
    store
        .registry(registry)?
        .ok_or_else(|| InvariantError::MissingRegistry(registry.to_string()).into())
}

/// Grant row of a curation registry item.
pub fn require_registry_item<S: FlowStore + ?Sized>(
    store: &S,
    registry: &Address,
    item_id: &Hash256,
) -> Result<Grant, FlowsError> {
    let id = store.registry_item_grant(registry, item_id)?.ok_or_else(|| {
        InvariantError::MissingRegistryItem {
            registry: registry.to_string(),
            item: item_id.to_string(),
        }
    })?;
    require_grant(store, &id)
}

pub fn require_arbitrator_flow<S: FlowStore + ?Sized>(store: &S, arbitrator: &Address) -> Result<GrantId, FlowsError> {
    store
        .arbitrator_flow(arbitrator)?
        .ok_or_else(|| InvariantError::MissingArbitrator(arbitrator.to_string()).into())
}
