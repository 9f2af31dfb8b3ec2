//! Block-atomic indexing driver.
//!
//! The [`Node`] owns the persistent store and the engine's [`Indexer`]. It
//! reads newline-delimited event records, groups them by block, resolves
//! metadata, reduces the block into a [`WriteBuffer`] overlay and commits
//! the overlay as one RocksDB batch together with the block's resume point.
//! A block that fails to reduce commits nothing.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, error, info, warn};

use flows_core::error::FlowsError;
use flows_core::events::EventRecord;
use flows_core::store::{FlowStore, Table, WriteBuffer};
use flows_core::types::{Address, Allocation, Dispute, DisputeKey, Grant, GrantId, Hash256, IndexedBlock};
use flows_engine::Indexer;

use crate::config::NodeConfig;
use crate::metadata::{resolve_records, MetadataResolver};
use crate::storage::RocksStore;

/// Result of feeding one block to [`Node::process_block`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockSummary {
    pub chain_id: u64,
    pub number: u64,
    pub events: usize,
    /// Flows recomputed, including block-end flushes.
    pub recomputed: usize,
    /// The block was at or below the resume point and was not applied.
    pub skipped: bool,
}

/// Totals over one [`Node::ingest`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub blocks: u64,
    pub skipped_blocks: u64,
    pub events: u64,
}

impl IngestStats {
    fn record(&mut self, summary: &BlockSummary) {
        if summary.skipped {
            self.skipped_blocks += 1;
        } else {
            self.blocks += 1;
            self.events += summary.events as u64;
        }
    }
}

/// The indexing node.
pub struct Node {
    /// RocksDB storage behind a read-write lock.
    storage: Arc<RwLock<RocksStore>>,
    /// Reducer state. Locked for a whole block.
    indexer: Mutex<Indexer>,
    resolver: Arc<dyn MetadataResolver>,
    /// Last committed block per chain.
    heads: RwLock<BTreeMap<u64, IndexedBlock>>,
    config: NodeConfig,
}

impl Node {
    /// Open storage and restore resume points.
    pub fn new(config: NodeConfig, resolver: Arc<dyn MetadataResolver>) -> Result<Arc<Self>, FlowsError> {
        let store = RocksStore::open(config.db_path())?;
        let heads: BTreeMap<u64, IndexedBlock> = store
            .indexed_blocks()?
            .into_iter()
            .map(|b| (b.chain_id, b))
            .collect();
        for head in heads.values() {
            info!(chain = head.chain_id, block = head.number, "resuming");
        }

        Ok(Arc::new(Self {
            storage: Arc::new(RwLock::new(store)),
            indexer: Mutex::new(Indexer::new(config.engine.clone())),
            resolver,
            heads: RwLock::new(heads),
            config,
        }))
    }

    /// Reduce one block and commit it atomically.
    ///
    /// Every record must belong to the same chain and block. Metadata must
    /// already be resolved; unresolved URIs are stored without metadata.
    pub fn process_block(&self, records: &[EventRecord]) -> Result<BlockSummary, FlowsError> {
        let Some(first) = records.first() else {
            return Ok(BlockSummary { skipped: true, ..BlockSummary::default() });
        };
        let (chain_id, number) = (first.ctx.chain_id, first.ctx.block_number);
        if let Some(stray) = records
            .iter()
            .find(|r| r.ctx.chain_id != chain_id || r.ctx.block_number != number)
        {
            return Err(FlowsError::Source(format!(
                "block {chain_id}/{number} mixed with event from {}/{}",
                stray.ctx.chain_id, stray.ctx.block_number
            )));
        }

        let mut summary = BlockSummary {
            chain_id,
            number,
            events: records.len(),
            ..BlockSummary::default()
        };
        if self.head(chain_id).is_some_and(|h| h.number >= number) {
            debug!(chain = chain_id, block = number, "already indexed, skipping");
            summary.skipped = true;
            return Ok(summary);
        }

        let mut indexer = self.indexer.lock();
        let (writes, recomputed) = {
            let store = self.storage.read();
            let mut buffer = WriteBuffer::new(&*store);
            match reduce_block(&mut indexer, &mut buffer, records) {
                Ok(recomputed) => (buffer.into_writes(), recomputed),
                Err(e) => {
                    indexer.reset();
                    error!(chain = chain_id, block = number, error = %e, "block failed, nothing committed");
                    return Err(e);
                }
            }
        };
        summary.recomputed = recomputed;

        let last = &records[records.len() - 1].ctx;
        let head = IndexedBlock {
            chain_id,
            number,
            timestamp: last.block_timestamp,
        };
        self.storage.write().apply_writes(writes)?;
        self.heads.write().insert(chain_id, head);

        debug!(
            chain = chain_id,
            block = number,
            events = summary.events,
            recomputed = summary.recomputed,
            "block committed"
        );
        Ok(summary)
    }

    /// Read newline-delimited event records until EOF, committing block by block.
    ///
    /// Stops at the first malformed line or failed block; earlier blocks
    /// stay committed.
    pub async fn ingest<R: AsyncBufRead + Unpin>(&self, reader: R) -> Result<IngestStats, FlowsError> {
        let mut lines = reader.lines();
        let mut stats = IngestStats::default();
        let mut block: Vec<EventRecord> = Vec::new();
        let mut line_no = 0u64;

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| FlowsError::Source(e.to_string()))?
        {
            line_no += 1;
            let text = line.trim();
            if text.is_empty() {
                continue;
            }
            let record: EventRecord = serde_json::from_str(text)
                .map_err(|e| FlowsError::Source(format!("line {line_no}: {e}")))?;

            let same_block = block.first().is_none_or(|f| {
                f.ctx.chain_id == record.ctx.chain_id && f.ctx.block_number == record.ctx.block_number
            });
            if !same_block {
                let summary = self.commit(std::mem::take(&mut block)).await?;
                stats.record(&summary);
            }
            block.push(record);
        }
        if !block.is_empty() {
            let summary = self.commit(block).await?;
            stats.record(&summary);
        }

        info!(
            blocks = stats.blocks,
            skipped = stats.skipped_blocks,
            events = stats.events,
            "event source drained"
        );
        Ok(stats)
    }

    async fn commit(&self, mut records: Vec<EventRecord>) -> Result<BlockSummary, FlowsError> {
        if let Some(first) = records.first() {
            let (chain_id, number) = (first.ctx.chain_id, first.ctx.block_number);
            let fresh = self.head(chain_id).is_none_or(|h| h.number < number);
            if fresh {
                let resolved = resolve_records(self.resolver.as_ref(), &mut records).await;
                if resolved > 0 {
                    debug!(block = number, resolved, "metadata resolved");
                }
            }
        }
        self.process_block(&records)
    }

    /// Settle earnings of every grant up to its chain's indexed head.
    ///
    /// Returns `None` when nothing is indexed yet or every head is stale.
    pub fn refresh_aggregates(&self, wall_now: u64) -> Result<Option<usize>, FlowsError> {
        let heads = self.heads();
        if heads.is_empty() {
            return Ok(None);
        }
        let indexer = self.indexer.lock();
        let (settled, writes) = {
            let store = self.storage.read();
            let mut buffer = WriteBuffer::new(&*store);
            let settled = indexer.refresh_aggregates(&mut buffer, &heads, wall_now)?;
            (settled, buffer.into_writes())
        };
        if settled.is_some() && !writes.is_empty() {
            self.storage.write().apply_writes(writes)?;
        }
        Ok(settled)
    }

    /// Refresh aggregates every `refresh_interval_secs` until the task is dropped.
    pub async fn run_refresh(self: Arc<Self>) {
        let period = Duration::from_secs(self.config.refresh_interval_secs.max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let now = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0);
            match self.refresh_aggregates(now) {
                Ok(Some(settled)) => debug!(settled, "periodic refresh"),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "periodic refresh failed"),
            }
        }
    }

    // --- read side ---

    pub fn head(&self, chain_id: u64) -> Option<IndexedBlock> {
        self.heads.read().get(&chain_id).copied()
    }

    pub fn heads(&self) -> Vec<IndexedBlock> {
        self.heads.read().values().copied().collect()
    }

    pub fn grant(&self, id: &GrantId) -> Result<Option<Grant>, FlowsError> {
        Ok(self.storage.read().grant(id)?)
    }

    /// Structural children of a grant, skipping dangling ids.
    pub fn children(&self, id: &GrantId) -> Result<Vec<Grant>, FlowsError> {
        let store = self.storage.read();
        let mut out = Vec::new();
        for child in store.children(id)? {
            if let Some(grant) = store.grant(&child)? {
                out.push(grant);
            }
        }
        Ok(out)
    }

    pub fn grant_by_pool(&self, pool: &Address) -> Result<Option<Grant>, FlowsError> {
        let store = self.storage.read();
        match store.pool_grant(pool)? {
            Some(id) => Ok(store.grant(&id)?),
            None => Ok(None),
        }
    }

    pub fn dispute(&self, arbitrator: Address, dispute_id: u64) -> Result<Option<Dispute>, FlowsError> {
        Ok(self.storage.read().dispute(&DisputeKey { dispute_id, arbitrator })?)
    }

    /// Live allocations of one allocation key.
    pub fn allocations(&self, contract: &Address, key: &Hash256) -> Result<Vec<Allocation>, FlowsError> {
        let store = self.storage.read();
        let mut out = Vec::new();
        for id in store.live_set(contract, key)? {
            if let Some(allocation) = store.allocation(&id)? {
                out.push(allocation);
            }
        }
        Ok(out)
    }

    /// Number of grant rows. Walks the grants column family.
    pub fn grant_count(&self) -> Result<usize, FlowsError> {
        Ok(self.storage.read().count(Table::Grants)?)
    }

    /// Flow recomputes deferred until their allocation is committed.
    pub fn pending_recomputes(&self) -> usize {
        self.indexer.lock().pending()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }
}

fn reduce_block<S: FlowStore + ?Sized>(
    indexer: &mut Indexer,
    store: &mut S,
    records: &[EventRecord],
) -> Result<usize, FlowsError> {
    let mut recomputed = 0;
    for record in records {
        recomputed += indexer.apply(store, &record.ctx, &record.event)?.recomputed.len();
    }
    let last = &records[records.len() - 1].ctx;
    recomputed += indexer.finish_block(store, last)?.len();
    store.put_indexed_block(&IndexedBlock {
        chain_id: last.chain_id,
        number: last.block_number,
        timestamp: last.block_timestamp,
    })?;
    Ok(recomputed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::NullResolver;
    use flows_core::events::{Event, EventContext};

    fn temp_node() -> (Arc<Node>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = NodeConfig {
            data_dir: dir.path().to_path_buf(),
            ..NodeConfig::default()
        };
        (Node::new(config, Arc::new(NullResolver)).unwrap(), dir)
    }

    fn record(block: u64, log: u32, event: Event) -> EventRecord {
        EventRecord {
            ctx: EventContext {
                chain_id: 1,
                block_number: block,
                block_timestamp: block * 10,
                log_index: log,
                tx_hash: Hash256::from_u64(block),
            },
            event,
        }
    }

    fn flow_init(seed: u8) -> Event {
        Event::FlowInitialized {
            contract: Address([seed; 20]),
            parent: None,
            baseline_pool: Address([seed.wrapping_add(1); 20]),
            bonus_pool: Address([seed.wrapping_add(2); 20]),
            baseline_pool_flow_rate_percent: 1_000_000,
            manager_reward_pool_flow_rate_percent: 0,
            self_baseline_units: 0,
            self_bonus_units: 0,
            metadata_uri: None,
            metadata: None,
        }
    }

    #[test]
    fn commits_block_and_resume_point() {
        let (node, _dir) = temp_node();
        let summary = node.process_block(&[record(5, 0, flow_init(0x10))]).unwrap();
        assert!(!summary.skipped);
        assert_eq!(summary.events, 1);
        assert_eq!(node.head(1).map(|h| h.number), Some(5));
        assert!(node.grant(&GrantId::from_address(&Address([0x10; 20]))).unwrap().is_some());
        assert_eq!(node.grant_count().unwrap(), 1);
    }

    #[test]
    fn replayed_block_is_skipped() {
        let (node, _dir) = temp_node();
        node.process_block(&[record(5, 0, flow_init(0x10))]).unwrap();
        let again = node.process_block(&[record(5, 0, flow_init(0x20))]).unwrap();
        assert!(again.skipped);
        assert!(node.grant(&GrantId::from_address(&Address([0x20; 20]))).unwrap().is_none());
    }

    #[test]
    fn failed_block_commits_nothing() {
        let (node, _dir) = temp_node();
        let unknown_pool = Event::MemberUnitsUpdated {
            pool: Address([0xEE; 20]),
            member: Address([0x01; 20]),
            new_units: 5,
        };
        let err = node
            .process_block(&[record(3, 0, flow_init(0x10)), record(3, 1, unknown_pool)])
            .unwrap_err();
        assert!(matches!(err, FlowsError::Invariant(_)));
        assert_eq!(node.grant_count().unwrap(), 0);
        assert_eq!(node.head(1), None);
    }

    #[test]
    fn mixed_blocks_are_rejected() {
        let (node, _dir) = temp_node();
        let err = node
            .process_block(&[record(3, 0, flow_init(0x10)), record(4, 0, flow_init(0x20))])
            .unwrap_err();
        assert!(matches!(err, FlowsError::Source(_)));
    }

    #[test]
    fn heads_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = NodeConfig {
            data_dir: dir.path().to_path_buf(),
            ..NodeConfig::default()
        };
        {
            let node = Node::new(config.clone(), Arc::new(NullResolver)).unwrap();
            node.process_block(&[record(9, 0, flow_init(0x10))]).unwrap();
        }
        let node = Node::new(config, Arc::new(NullResolver)).unwrap();
        assert_eq!(node.head(1).map(|h| h.number), Some(9));
        assert_eq!(node.heads().len(), 1);
    }

    #[test]
    fn refresh_needs_an_indexed_head() {
        let (node, _dir) = temp_node();
        assert_eq!(node.refresh_aggregates(1_000).unwrap(), None);
        node.process_block(&[record(5, 0, flow_init(0x10))]).unwrap();
        // Head timestamp is 50; a wall clock far ahead is stale.
        assert_eq!(node.refresh_aggregates(1_000_000).unwrap(), None);
        assert!(node.refresh_aggregates(60).unwrap().is_some());
    }

    #[test]
    fn refresh_keeps_lagging_chain_at_its_own_head() {
        let (node, _dir) = temp_node();
        node.process_block(&[record(5, 0, flow_init(0x10))]).unwrap();
        for (block, seed, ts) in [(7, 0x20, 99_000), (8, 0x30, 100_000)] {
            let mut other = record(block, 0, flow_init(seed));
            other.ctx.chain_id = 2;
            other.ctx.block_timestamp = ts;
            node.process_block(&[other]).unwrap();
        }

        // Chain 1's head (50) is stale next to chain 2's.
        assert_eq!(node.refresh_aggregates(100_000).unwrap(), Some(1));
        let lagging = node.grant(&GrantId::from_address(&Address([0x10; 20]))).unwrap().unwrap();
        assert_eq!(lagging.earnings_settled_at, 50);
        let fresh = node.grant(&GrantId::from_address(&Address([0x20; 20]))).unwrap().unwrap();
        assert_eq!(fresh.chain_id, 2);
        assert_eq!(fresh.earnings_settled_at, 100_000);
    }

    #[tokio::test]
    async fn ingest_groups_lines_by_block() {
        let (node, _dir) = temp_node();
        let lines: Vec<String> = [
            record(1, 0, flow_init(0x10)),
            record(1, 1, flow_init(0x20)),
            record(2, 0, flow_init(0x30)),
        ]
        .iter()
        .map(|r| serde_json::to_string(r).unwrap())
        .collect();
        let input = format!("{}\n\n{}\n{}\n", lines[0], lines[1], lines[2]);

        let stats = node.ingest(input.as_bytes()).await.unwrap();
        assert_eq!(stats, IngestStats { blocks: 2, skipped_blocks: 0, events: 3 });
        assert_eq!(node.head(1).map(|h| h.number), Some(2));

        // Replaying the same log is a no-op.
        let stats = node.ingest(input.as_bytes()).await.unwrap();
        assert_eq!(stats.skipped_blocks, 2);
        assert_eq!(stats.blocks, 0);
    }

    #[tokio::test]
    async fn malformed_line_stops_ingest() {
        let (node, _dir) = temp_node();
        let good = serde_json::to_string(&record(1, 0, flow_init(0x10))).unwrap();
        let input = format!("{good}\nnot json\n");
        let err = node.ingest(input.as_bytes()).await.unwrap_err();
        assert!(err.to_string().contains("line 2"));
        // The malformed line ends the stream before block 1 is flushed.
        assert_eq!(node.head(1), None);
    }
}
