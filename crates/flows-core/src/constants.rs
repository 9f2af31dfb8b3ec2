//! Protocol constants. Flow rates are in token wei; monthly rates use a 30-day month.

/// Seconds in the accounting month used for every `monthly_*` rate.
pub const SECONDS_PER_MONTH: u64 = 30 * 24 * 60 * 60;

/// Denominator for allocation weights: a `bps` of 1_000_000 is the allocator's full weight.
pub const ALLOCATION_BPS_SCALE: u128 = 1_000_000;

/// Denominator for the pool split percentages carried by `flow_initialized`.
pub const PERCENTAGE_SCALE: u32 = 1_000_000;

/// Default freshness window for periodic aggregate refresh, in seconds.
///
/// While the newest indexed block is older than this, the indexer is
/// backfilling and periodic refresh is suppressed.
pub const DEFAULT_FRESHNESS_WINDOW_SECS: u64 = 10 * 60;

/// Default interval between periodic aggregate refreshes, in seconds.
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 60;

/// Default JSON-RPC port of the indexer read side.
pub const DEFAULT_RPC_PORT: u16 = 18_642;
