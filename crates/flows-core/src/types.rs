//! Core domain types: addresses, grants, allocations, disputes.
//!
//! All rates are monthly amounts in token wei and all unit counters are
//! pool member units; both use `u128` per pool-oracle convention.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Error parsing a hex-encoded address or hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseHexError(pub String);

impl fmt::Display for ParseHexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid hex value: {}", self.0)
    }
}

impl std::error::Error for ParseHexError {}

fn decode_fixed<const N: usize>(s: &str) -> Result<[u8; N], ParseHexError> {
    let trimmed = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(trimmed).map_err(|_| ParseHexError(s.to_string()))?;
    bytes.try_into().map_err(|_| ParseHexError(s.to_string()))
}

/// A 20-byte contract or account address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, bincode::Encode, bincode::Decode)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const ZERO: Self = Self([0u8; 20]);

    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl FromStr for Address {
    type Err = ParseHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_fixed::<20>(s).map(Self)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A 32-byte value: recipient ids, registry item ids, allocation keys, tx hashes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, bincode::Encode, bincode::Decode)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash (32 zero bytes).
    pub const ZERO: Self = Self([0u8; 32]);

    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Check if this is the zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Big-endian uint256 encoding of a small integer (e.g. a legacy voting token id).
    pub fn from_u64(value: u64) -> Self {
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({self})")
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl FromStr for Hash256 {
    type Err = ParseHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_fixed::<32>(s).map(Self)
    }
}

impl Serialize for Hash256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Primary key of a grant row.
///
/// Recipient rows are keyed by their 32-byte recipient id; flow rows that
/// are not (yet) a recipient anywhere are keyed by their contract address.
#[derive(
    Serialize, Deserialize, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Debug,
    bincode::Encode, bincode::Decode,
)]
#[serde(transparent)]
pub struct GrantId(pub String);

impl GrantId {
    pub fn from_recipient_id(id: &Hash256) -> Self {
        Self(id.to_string())
    }

    pub fn from_address(address: &Address) -> Self {
        Self(address.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GrantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Curation registry status of an item, numbered as the registry emits it.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default,
    bincode::Encode, bincode::Decode,
)]
#[serde(rename_all = "snake_case")]
pub enum GrantStatus {
    #[default]
    Absent,
    Registered,
    RegistrationRequested,
    ClearingRequested,
}

impl GrantStatus {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Absent),
            1 => Some(Self::Registered),
            2 => Some(Self::RegistrationRequested),
            3 => Some(Self::ClearingRequested),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::Absent => 0,
            Self::Registered => 1,
            Self::RegistrationRequested => 2,
            Self::ClearingRequested => 3,
        }
    }
}

/// A monthly flow rate split across the baseline and bonus pools.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct FlowRates {
    pub total: u128,
    pub baseline: u128,
    pub bonus: u128,
}

impl FlowRates {
    pub const ZERO: Self = Self { total: 0, baseline: 0, bonus: 0 };

    /// Build from the per-pool parts; `total` is their (saturating) sum.
    pub fn new(baseline: u128, bonus: u128) -> Self {
        Self {
            total: baseline.saturating_add(bonus),
            baseline,
            bonus,
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

/// Human-readable metadata attached to a grant.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct GrantMetadata {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub tagline: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image: String,
}

impl GrantMetadata {
    pub fn is_empty(&self) -> bool {
        self.title.is_empty()
            && self.tagline.is_empty()
            && self.description.is_empty()
            && self.image.is_empty()
    }
}

/// A node of the funding tree: a leaf recipient or a nested flow.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Grant {
    pub id: GrantId,
    pub chain_id: u64,
    /// Receiving address. For flows this is the flow contract itself.
    pub recipient: Address,
    pub parent_id: Option<GrantId>,
    pub root_id: GrantId,

    pub is_flow: bool,
    pub is_top_level: bool,
    /// Flow row created from `flow_initialized` before its parent registered it.
    pub is_placeholder: bool,

    pub status: GrantStatus,
    pub is_active: bool,
    pub is_removed: bool,

    pub baseline_member_units: u128,
    pub bonus_member_units: u128,
    pub member_units: u128,
    /// The flow's own units in its baseline pool.
    pub self_baseline_units: u128,
    /// The flow's own units in its bonus pool.
    pub self_bonus_units: u128,

    pub monthly_incoming_flow_rate: u128,
    pub monthly_incoming_baseline_flow_rate: u128,
    pub monthly_incoming_bonus_flow_rate: u128,
    /// Portion of the incoming rate received through sibling edges.
    pub sibling_inflow: FlowRates,

    pub monthly_outgoing_flow_rate: u128,
    pub monthly_baseline_pool_flow_rate: u128,
    pub monthly_bonus_pool_flow_rate: u128,
    pub baseline_pool: Option<Address>,
    pub bonus_pool: Option<Address>,
    pub baseline_pool_flow_rate_percent: u32,
    pub manager_reward_pool_flow_rate_percent: u32,

    pub total_earned: u128,
    pub total_paid_out: u128,
    pub earnings_settled_at: u64,

    pub allocations_count: u128,
    pub total_allocation_weight: u128,

    pub active_recipient_count: u32,
    pub awaiting_recipient_count: u32,
    pub challenged_recipient_count: u32,

    pub challenge_period_ends_at: u64,
    pub is_disputed: bool,
    pub is_resolved: bool,
    pub evidence_group_id: Option<Hash256>,
    pub registry: Option<Address>,
    pub arbitrator: Option<Address>,

    pub metadata: GrantMetadata,
    pub metadata_uri: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Grant {
    /// An inactive row with zeroed counters.
    pub fn new(id: GrantId, chain_id: u64, recipient: Address, created_at: u64) -> Self {
        Self {
            root_id: id.clone(),
            id,
            chain_id,
            recipient,
            created_at,
            updated_at: created_at,
            earnings_settled_at: created_at,
            ..Self::default()
        }
    }

    pub fn incoming(&self) -> FlowRates {
        FlowRates {
            total: self.monthly_incoming_flow_rate,
            baseline: self.monthly_incoming_baseline_flow_rate,
            bonus: self.monthly_incoming_bonus_flow_rate,
        }
    }

    pub fn set_incoming(&mut self, rates: FlowRates) {
        self.monthly_incoming_flow_rate = rates.total;
        self.monthly_incoming_baseline_flow_rate = rates.baseline;
        self.monthly_incoming_bonus_flow_rate = rates.bonus;
    }

    /// Which of this flow's pools `pool` is: `(is_baseline, is_bonus)`.
    pub fn pool_kind(&self, pool: &Address) -> (bool, bool) {
        (
            self.baseline_pool.as_ref() == Some(pool),
            self.bonus_pool.as_ref() == Some(pool),
        )
    }

    /// Recompute `monthly_outgoing_flow_rate` from the pool rates.
    pub fn refresh_outgoing(&mut self) {
        self.monthly_outgoing_flow_rate = self
            .monthly_baseline_pool_flow_rate
            .saturating_add(self.monthly_bonus_pool_flow_rate);
    }
}

/// Primary key of an allocation record: (contract, recipient, allocator, block, key).
#[derive(
    Serialize, Deserialize, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug,
    bincode::Encode, bincode::Decode,
)]
#[serde(transparent)]
pub struct AllocationId(pub String);

impl AllocationId {
    pub fn new(
        contract: &Address,
        recipient_id: &Hash256,
        allocator: &Address,
        block_number: u64,
        key: &Hash256,
    ) -> Self {
        Self(format!("{contract}-{recipient_id}-{allocator}-{block_number}-{key}"))
    }
}

impl fmt::Display for AllocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One live vote/allocation of an allocation key.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Allocation {
    pub id: AllocationId,
    pub chain_id: u64,
    pub contract: Address,
    pub recipient_id: Hash256,
    pub grant_id: GrantId,
    pub allocator: Address,
    pub key: Hash256,
    /// Share of the allocator's weight, out of `ALLOCATION_BPS_SCALE`.
    pub bps: u32,
    pub total_weight: u128,
    pub units: u128,
    pub block_number: u64,
    pub tx_hash: Hash256,
    pub created_at: u64,
}

/// Arbitration ruling, numbered as the arbitrator emits it.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
#[serde(rename_all = "snake_case")]
pub enum Ruling {
    Refused,
    Requester,
    Challenger,
}

impl Ruling {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Refused),
            1 => Some(Self::Requester),
            2 => Some(Self::Challenger),
            _ => None,
        }
    }
}

/// Primary key of a dispute: (dispute id, arbitrator).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DisputeKey {
    pub dispute_id: u64,
    pub arbitrator: Address,
}

/// An arbitration dispute over a registry item.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Dispute {
    pub dispute_id: u64,
    pub arbitrator: Address,
    pub flow_id: Option<GrantId>,
    /// Set once the registry's dispute event resolves the item.
    pub grant_id: Option<GrantId>,
    pub registry: Option<Address>,
    pub item_id: Option<Hash256>,
    pub challenger: Option<Address>,
    pub evidence_group_id: Option<Hash256>,
    pub voting_starts_at: u64,
    pub voting_ends_at: u64,
    pub reveal_period_ends_at: u64,
    pub arbitration_cost: u128,
    pub votes_refused: u128,
    pub votes_for_requester: u128,
    pub votes_for_challenger: u128,
    pub total_votes: u128,
    pub ruling: Option<Ruling>,
    pub is_executed: bool,
    pub created_at: u64,
}

impl Dispute {
    pub fn key(&self) -> DisputeKey {
        DisputeKey {
            dispute_id: self.dispute_id,
            arbitrator: self.arbitrator,
        }
    }
}

/// Settings of a curation registry governing one flow.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct RegistryConfig {
    pub registry: Address,
    pub flow_id: GrantId,
    pub arbitrator: Address,
    pub challenge_period_duration: u64,
}

/// The last block committed for a chain.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct IndexedBlock {
    pub chain_id: u64,
    pub number: u64,
    pub timestamp: u64,
}
