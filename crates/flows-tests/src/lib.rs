//! Scenario and property test suite for the Flows indexer.
//!
//! Tests drive the engine only through chain events, the way the node
//! does, and check the funding-tree invariants on the resulting store.

pub mod helpers;
