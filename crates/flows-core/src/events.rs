//! Pre-decoded chain events consumed by the indexer.
//!
//! Events arrive in block order, then log order. Each carries an
//! [`EventContext`] locating it on chain. Addresses and 32-byte values are
//! hex strings on the wire; an event is `{"type": ..., "data": {...}}` with
//! the tag first so `u128` fields decode without buffering.

use serde::{Deserialize, Serialize};

use crate::types::{Address, GrantMetadata, Hash256};

/// Where an event was emitted.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct EventContext {
    pub chain_id: u64,
    pub block_number: u64,
    /// Block timestamp (Unix seconds).
    pub block_timestamp: u64,
    pub log_index: u32,
    pub tx_hash: Hash256,
}

/// A decoded event together with its position.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct EventRecord {
    pub ctx: EventContext,
    pub event: Event,
}

/// Every event kind the indexer reduces.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Event {
    // --- Lifecycle ---
    FlowInitialized {
        contract: Address,
        #[serde(default)]
        parent: Option<Address>,
        baseline_pool: Address,
        bonus_pool: Address,
        #[serde(default)]
        baseline_pool_flow_rate_percent: u32,
        #[serde(default)]
        manager_reward_pool_flow_rate_percent: u32,
        #[serde(default)]
        self_baseline_units: u128,
        #[serde(default)]
        self_bonus_units: u128,
        #[serde(default)]
        metadata_uri: Option<String>,
        #[serde(default)]
        metadata: Option<GrantMetadata>,
    },
    RecipientCreated {
        contract: Address,
        recipient_id: Hash256,
        recipient: Address,
        #[serde(default)]
        metadata_uri: Option<String>,
        #[serde(default)]
        metadata: Option<GrantMetadata>,
    },
    FlowRecipientCreated {
        contract: Address,
        recipient_id: Hash256,
        /// The child flow contract.
        recipient: Address,
        baseline_pool: Address,
        bonus_pool: Address,
        #[serde(default)]
        metadata_uri: Option<String>,
        #[serde(default)]
        metadata: Option<GrantMetadata>,
    },
    RecipientRemoved {
        contract: Address,
        recipient_id: Hash256,
    },

    // --- Allocation ---
    AllocationSet {
        contract: Address,
        recipient_id: Hash256,
        strategy: Address,
        key: Hash256,
        allocator: Address,
        bps: u32,
        total_weight: u128,
    },
    VoteCast {
        contract: Address,
        recipient_id: Hash256,
        token_id: u64,
        voter: Address,
        bps: u32,
        total_weight: u128,
    },
    AllocationCommitted {
        contract: Address,
        strategy: Address,
        key: Hash256,
    },

    // --- Pool oracle ---
    MemberUnitsUpdated {
        pool: Address,
        member: Address,
        new_units: u128,
    },
    FlowDistributionUpdated {
        pool: Address,
        distributor: Address,
        /// Per-second rate.
        new_rate: u128,
    },

    // --- Curation / arbitration ---
    RegistryInitialized {
        registry: Address,
        flow: Address,
        arbitrator: Address,
        challenge_period_duration: u64,
    },
    ItemSubmitted {
        registry: Address,
        item_id: Hash256,
        submitter: Address,
        recipient: Address,
        evidence_group_id: Hash256,
        #[serde(default)]
        is_flow: bool,
        #[serde(default)]
        metadata_uri: Option<String>,
        #[serde(default)]
        metadata: Option<GrantMetadata>,
    },
    RemovalRequested {
        registry: Address,
        item_id: Hash256,
        requester: Address,
        evidence_group_id: Hash256,
    },
    ItemStatusChange {
        registry: Address,
        item_id: Hash256,
        /// Registry status code (0 absent, 1 registered, 2 registration requested, 3 clearing requested).
        status: u8,
        disputed: bool,
        resolved: bool,
    },
    Dispute {
        registry: Address,
        arbitrator: Address,
        dispute_id: u64,
        evidence_group_id: Hash256,
        challenger: Address,
    },
    DisputeCreated {
        arbitrator: Address,
        dispute_id: u64,
        arbitrable: Address,
        voting_starts_at: u64,
        voting_ends_at: u64,
        reveal_period_ends_at: u64,
        #[serde(default)]
        arbitration_cost: u128,
    },
    VoteRevealed {
        arbitrator: Address,
        dispute_id: u64,
        voter: Address,
        choice: u8,
        votes: u128,
    },
    RulingExecuted {
        arbitrator: Address,
        dispute_id: u64,
        ruling: u8,
    },
}

impl Event {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FlowInitialized { .. } => "flow_initialized",
            Self::RecipientCreated { .. } => "recipient_created",
            Self::FlowRecipientCreated { .. } => "flow_recipient_created",
            Self::RecipientRemoved { .. } => "recipient_removed",
            Self::AllocationSet { .. } => "allocation_set",
            Self::VoteCast { .. } => "vote_cast",
            Self::AllocationCommitted { .. } => "allocation_committed",
            Self::MemberUnitsUpdated { .. } => "member_units_updated",
            Self::FlowDistributionUpdated { .. } => "flow_distribution_updated",
            Self::RegistryInitialized { .. } => "registry_initialized",
            Self::ItemSubmitted { .. } => "item_submitted",
            Self::RemovalRequested { .. } => "removal_requested",
            Self::ItemStatusChange { .. } => "item_status_change",
            Self::Dispute { .. } => "dispute",
            Self::DisputeCreated { .. } => "dispute_created",
            Self::VoteRevealed { .. } => "vote_revealed",
            Self::RulingExecuted { .. } => "ruling_executed",
        }
    }

    /// Metadata URI still waiting to be resolved, if any.
    pub fn unresolved_metadata_uri(&self) -> Option<&str> {
        match self {
            Self::FlowInitialized { metadata_uri: Some(uri), metadata: None, .. }
            | Self::RecipientCreated { metadata_uri: Some(uri), metadata: None, .. }
            | Self::FlowRecipientCreated { metadata_uri: Some(uri), metadata: None, .. }
            | Self::ItemSubmitted { metadata_uri: Some(uri), metadata: None, .. } => Some(uri),
            _ => None,
        }
    }

    /// Attach resolved metadata to an event that carries a metadata slot.
    pub fn set_metadata(&mut self, resolved: GrantMetadata) {
        match self {
            Self::FlowInitialized { metadata, .. }
            | Self::RecipientCreated { metadata, .. }
            | Self::FlowRecipientCreated { metadata, .. }
            | Self::ItemSubmitted { metadata, .. } => *metadata = Some(resolved),
            _ => {}
        }
    }
}
