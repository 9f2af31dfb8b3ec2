//! # flows-core
//! Foundation types, events, and the abstract keyed store for the Flows indexer.

pub mod constants;
pub mod error;
pub mod events;
pub mod store;
pub mod types;
