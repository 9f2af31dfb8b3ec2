//! Error types for the Flows indexer.
use thiserror::Error;

/// A required cross-reference is missing or inconsistent.
///
/// Continuing past any of these would corrupt derived aggregates, so the
/// event that hit it is aborted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvariantError {
    #[error("grant not found: {0}")] MissingGrant(String),
    #[error("parent {parent} of grant {child} not found")] MissingParent { child: String, parent: String },
    #[error("no grant for pool {0}")] MissingPool(String),
    #[error("pool {pool} matches {matches} pools of grant {grant}")] AmbiguousPool { pool: String, grant: String, matches: usize },
    #[error("no grant for flow contract {0}")] MissingFlowContract(String),
    #[error("no flow for arbitrator {0}")] MissingArbitrator(String),
    #[error("no flow for curation registry {0}")] MissingRegistry(String),
    #[error("no grant for registry item {item} in {registry}")] MissingRegistryItem { registry: String, item: String },
    #[error("dispute {dispute_id} not found for arbitrator {arbitrator}")] MissingDispute { dispute_id: u64, arbitrator: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("backend: {0}")] Backend(String),
    #[error("codec: {0}")] Codec(String),
}

#[derive(Error, Debug)]
pub enum FlowsError {
    #[error(transparent)] Invariant(#[from] InvariantError),
    #[error(transparent)] Store(#[from] StoreError),
    #[error("config: {0}")] Config(String),
    #[error("event source: {0}")] Source(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invariant_display() {
        let err = InvariantError::AmbiguousPool {
            pool: "0xaa".into(),
            grant: "0xbb".into(),
            matches: 2,
        };
        assert_eq!(err.to_string(), "pool 0xaa matches 2 pools of grant 0xbb");
    }

    #[test]
    fn flows_error_is_transparent() {
        let err: FlowsError = InvariantError::MissingGrant("0x01".into()).into();
        assert_eq!(err.to_string(), "grant not found: 0x01");
        assert!(matches!(err, FlowsError::Invariant(_)));

        let err: FlowsError = StoreError::Codec("bad".into()).into();
        assert_eq!(err.to_string(), "codec: bad");
    }
}
