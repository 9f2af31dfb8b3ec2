//! JSON-RPC server for the Flows indexer.
//!
//! Uses jsonrpsee 0.24 to expose read-only queries over indexed grants,
//! allocations, and disputes. Rates and other `u128` amounts are rendered
//! as decimal strings.

use std::sync::Arc;

use jsonrpsee::core::async_trait;
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObjectOwned;
use serde::{Deserialize, Serialize};

use flows_core::error::FlowsError;
use flows_core::types::{Address, Allocation, Dispute, Grant, GrantId, GrantMetadata, Hash256, IndexedBlock};

use crate::node::Node;

/// JSON representation of a grant row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantJson {
    pub id: String,
    pub chain_id: u64,
    pub recipient: String,
    pub parent_id: Option<String>,
    pub root_id: String,
    pub is_flow: bool,
    pub is_top_level: bool,
    pub is_placeholder: bool,
    /// Registry status name, e.g. "registered".
    pub status: String,
    pub is_active: bool,
    pub is_removed: bool,
    pub baseline_member_units: String,
    pub bonus_member_units: String,
    pub monthly_incoming_flow_rate: String,
    pub monthly_incoming_baseline_flow_rate: String,
    pub monthly_incoming_bonus_flow_rate: String,
    pub monthly_outgoing_flow_rate: String,
    pub monthly_baseline_pool_flow_rate: String,
    pub monthly_bonus_pool_flow_rate: String,
    pub baseline_pool: Option<String>,
    pub bonus_pool: Option<String>,
    pub total_earned: String,
    pub total_allocation_weight: String,
    pub active_recipient_count: u32,
    pub awaiting_recipient_count: u32,
    pub challenged_recipient_count: u32,
    pub is_disputed: bool,
    pub is_resolved: bool,
    pub challenge_period_ends_at: u64,
    pub metadata: GrantMetadata,
    pub metadata_uri: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl From<Grant> for GrantJson {
    fn from(g: Grant) -> Self {
        let status = serde_json::to_value(g.status)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        Self {
            id: g.id.0,
            chain_id: g.chain_id,
            recipient: g.recipient.to_string(),
            parent_id: g.parent_id.map(|p| p.0),
            root_id: g.root_id.0,
            is_flow: g.is_flow,
            is_top_level: g.is_top_level,
            is_placeholder: g.is_placeholder,
            status,
            is_active: g.is_active,
            is_removed: g.is_removed,
            baseline_member_units: g.baseline_member_units.to_string(),
            bonus_member_units: g.bonus_member_units.to_string(),
            monthly_incoming_flow_rate: g.monthly_incoming_flow_rate.to_string(),
            monthly_incoming_baseline_flow_rate: g.monthly_incoming_baseline_flow_rate.to_string(),
            monthly_incoming_bonus_flow_rate: g.monthly_incoming_bonus_flow_rate.to_string(),
            monthly_outgoing_flow_rate: g.monthly_outgoing_flow_rate.to_string(),
            monthly_baseline_pool_flow_rate: g.monthly_baseline_pool_flow_rate.to_string(),
            monthly_bonus_pool_flow_rate: g.monthly_bonus_pool_flow_rate.to_string(),
            baseline_pool: g.baseline_pool.map(|a| a.to_string()),
            bonus_pool: g.bonus_pool.map(|a| a.to_string()),
            total_earned: g.total_earned.to_string(),
            total_allocation_weight: g.total_allocation_weight.to_string(),
            active_recipient_count: g.active_recipient_count,
            awaiting_recipient_count: g.awaiting_recipient_count,
            challenged_recipient_count: g.challenged_recipient_count,
            is_disputed: g.is_disputed,
            is_resolved: g.is_resolved,
            challenge_period_ends_at: g.challenge_period_ends_at,
            metadata: g.metadata,
            metadata_uri: g.metadata_uri,
            created_at: g.created_at,
            updated_at: g.updated_at,
        }
    }
}

/// JSON representation of a live allocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationJson {
    pub id: String,
    pub grant_id: String,
    pub recipient_id: String,
    pub allocator: String,
    pub bps: u32,
    pub total_weight: String,
    pub units: String,
    pub block_number: u64,
}

impl From<Allocation> for AllocationJson {
    fn from(a: Allocation) -> Self {
        Self {
            id: a.id.0,
            grant_id: a.grant_id.0,
            recipient_id: a.recipient_id.to_string(),
            allocator: a.allocator.to_string(),
            bps: a.bps,
            total_weight: a.total_weight.to_string(),
            units: a.units.to_string(),
            block_number: a.block_number,
        }
    }
}

/// JSON representation of a dispute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisputeJson {
    pub dispute_id: u64,
    pub arbitrator: String,
    pub flow_id: Option<String>,
    pub grant_id: Option<String>,
    pub challenger: Option<String>,
    pub voting_ends_at: u64,
    pub reveal_period_ends_at: u64,
    pub votes_refused: String,
    pub votes_for_requester: String,
    pub votes_for_challenger: String,
    pub total_votes: String,
    /// "refused", "requester", "challenger", or absent while pending.
    pub ruling: Option<String>,
    pub is_executed: bool,
}

impl From<Dispute> for DisputeJson {
    fn from(d: Dispute) -> Self {
        let ruling = d.ruling.and_then(|r| {
            serde_json::to_value(r)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
        });
        Self {
            dispute_id: d.dispute_id,
            arbitrator: d.arbitrator.to_string(),
            flow_id: d.flow_id.map(|f| f.0),
            grant_id: d.grant_id.map(|g| g.0),
            challenger: d.challenger.map(|c| c.to_string()),
            voting_ends_at: d.voting_ends_at,
            reveal_period_ends_at: d.reveal_period_ends_at,
            votes_refused: d.votes_refused.to_string(),
            votes_for_requester: d.votes_for_requester.to_string(),
            votes_for_challenger: d.votes_for_challenger.to_string(),
            total_votes: d.total_votes.to_string(),
            ruling,
            is_executed: d.is_executed,
        }
    }
}

/// JSON representation of indexer status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusJson {
    /// Last committed block per chain.
    pub heads: Vec<IndexedBlock>,
    pub grants: usize,
    pub pending_recomputes: usize,
}

/// Parse a 40-character hex string (optional `0x`) into an Address.
pub fn parse_address(s: &str) -> Result<Address, ErrorObjectOwned> {
    let hex_str = s.strip_prefix("0x").unwrap_or(s);
    if hex_str.len() != 40 {
        return Err(rpc_error(-1, "address must be 40 hex characters"));
    }
    let bytes = hex::decode(hex_str).map_err(|_| rpc_error(-1, "invalid hex in address"))?;
    let arr: [u8; 20] = bytes
        .try_into()
        .map_err(|_| rpc_error(-1, "address must be 20 bytes"))?;
    Ok(Address(arr))
}

/// Parse a 64-character hex string (optional `0x`) into a Hash256.
pub fn parse_hash(s: &str) -> Result<Hash256, ErrorObjectOwned> {
    let hex_str = s.strip_prefix("0x").unwrap_or(s);
    if hex_str.len() != 64 {
        return Err(rpc_error(-1, "hash must be 64 hex characters"));
    }
    let bytes = hex::decode(hex_str).map_err(|_| rpc_error(-1, "invalid hex in hash"))?;
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| rpc_error(-1, "hash must be 32 bytes"))?;
    Ok(Hash256(arr))
}

/// Grant ids are lowercase `0x` hex.
fn parse_grant_id(s: &str) -> GrantId {
    let lower = s.to_ascii_lowercase();
    if lower.starts_with("0x") {
        GrantId(lower)
    } else {
        GrantId(format!("0x{lower}"))
    }
}

/// Create a JSON-RPC error.
fn rpc_error(code: i32, msg: &str) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(code, msg.to_string(), None::<()>)
}

fn internal(e: FlowsError) -> ErrorObjectOwned {
    rpc_error(-1, &e.to_string())
}

/// The Flows JSON-RPC interface.
#[rpc(server)]
pub trait FlowsRpc {
    /// Returns a grant row by id.
    #[method(name = "flows_getGrant")]
    async fn get_grant(&self, id: String) -> Result<GrantJson, ErrorObjectOwned>;

    /// Returns the structural children of a grant.
    #[method(name = "flows_getChildren")]
    async fn get_children(&self, id: String) -> Result<Vec<GrantJson>, ErrorObjectOwned>;

    /// Returns the flow owning a baseline or bonus pool.
    #[method(name = "flows_getGrantByPool")]
    async fn get_grant_by_pool(&self, pool: String) -> Result<GrantJson, ErrorObjectOwned>;

    #[method(name = "flows_getDispute")]
    async fn get_dispute(&self, arbitrator: String, dispute_id: u64) -> Result<DisputeJson, ErrorObjectOwned>;

    /// Returns the live allocations of an allocation key.
    #[method(name = "flows_getAllocations")]
    async fn get_allocations(&self, contract: String, key: String) -> Result<Vec<AllocationJson>, ErrorObjectOwned>;

    #[method(name = "flows_getStatus")]
    async fn get_status(&self) -> Result<StatusJson, ErrorObjectOwned>;
}

/// Implementation of the Flows RPC server.
pub struct RpcServerImpl {
    node: Arc<Node>,
}

impl RpcServerImpl {
    pub fn new(node: Arc<Node>) -> Self {
        Self { node }
    }
}

#[async_trait]
impl FlowsRpcServer for RpcServerImpl {
    async fn get_grant(&self, id: String) -> Result<GrantJson, ErrorObjectOwned> {
        self.node
            .grant(&parse_grant_id(&id))
            .map_err(internal)?
            .map(GrantJson::from)
            .ok_or_else(|| rpc_error(-5, "grant not found"))
    }

    async fn get_children(&self, id: String) -> Result<Vec<GrantJson>, ErrorObjectOwned> {
        let id = parse_grant_id(&id);
        if self.node.grant(&id).map_err(internal)?.is_none() {
            return Err(rpc_error(-5, "grant not found"));
        }
        Ok(self
            .node
            .children(&id)
            .map_err(internal)?
            .into_iter()
            .map(GrantJson::from)
            .collect())
    }

    async fn get_grant_by_pool(&self, pool: String) -> Result<GrantJson, ErrorObjectOwned> {
        let pool = parse_address(&pool)?;
        self.node
            .grant_by_pool(&pool)
            .map_err(internal)?
            .map(GrantJson::from)
            .ok_or_else(|| rpc_error(-5, "no grant for pool"))
    }

    async fn get_dispute(&self, arbitrator: String, dispute_id: u64) -> Result<DisputeJson, ErrorObjectOwned> {
        let arbitrator = parse_address(&arbitrator)?;
        self.node
            .dispute(arbitrator, dispute_id)
            .map_err(internal)?
            .map(DisputeJson::from)
            .ok_or_else(|| rpc_error(-5, "dispute not found"))
    }

    async fn get_allocations(&self, contract: String, key: String) -> Result<Vec<AllocationJson>, ErrorObjectOwned> {
        let contract = parse_address(&contract)?;
        let key = parse_hash(&key)?;
        Ok(self
            .node
            .allocations(&contract, &key)
            .map_err(internal)?
            .into_iter()
            .map(AllocationJson::from)
            .collect())
    }

    async fn get_status(&self) -> Result<StatusJson, ErrorObjectOwned> {
        Ok(StatusJson {
            heads: self.node.heads(),
            grants: self.node.grant_count().map_err(internal)?,
            pending_recomputes: self.node.pending_recomputes(),
        })
    }
}

/// Start the JSON-RPC server on the given address.
///
/// Returns a [`ServerHandle`] that can be used to stop the server.
pub async fn start_rpc_server(addr: &str, node: Arc<Node>) -> Result<ServerHandle, FlowsError> {
    let server = Server::builder()
        .build(addr)
        .await
        .map_err(|e| FlowsError::Config(format!("RPC server error: {e}")))?;

    let rpc_impl = RpcServerImpl::new(node);
    let handle = server.start(rpc_impl.into_rpc());

    Ok(handle)
}
