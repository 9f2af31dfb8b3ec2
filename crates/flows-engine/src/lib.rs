//! # flows-engine: Flow-rate propagation and allocation consistency.
//!
//! The engine reduces ordered chain events into the grant tree kept in a
//! [`FlowStore`](flows_core::store::FlowStore):
//!
//! - [`allocation`] keeps per-key live votes and invalidates stale ones.
//! - [`member_units`] tracks baseline/bonus pool weights per grant.
//! - [`propagation`] recomputes proportional shares and pushes sibling deltas.
//! - [`curation`] runs the registry/arbitration state machine.
//! - [`lifecycle`] creates, adopts and removes grant rows.
//! - [`indexer`] dispatches every event and owns batch state.
//!
//! Everything here is synchronous and deterministic; persistence, I/O and
//! scheduling live in `flows-node`.

pub mod allocation;
pub mod curation;
pub mod indexer;
pub mod lifecycle;
pub mod lookup;
pub mod math;
pub mod member_units;
pub mod propagation;

pub use indexer::{ApplyOutcome, EngineConfig, Indexer};
