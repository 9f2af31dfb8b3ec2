//! RocksDB-backed persistent index storage.
//!
//! Implements [`FlowStore`] with one column family per [`Table`]. Buffered
//! block writes are committed through a single [`WriteBatch`], so a block
//! is either fully visible or not at all.

use std::path::Path;

use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};

use flows_core::error::StoreError;
use flows_core::store::{FlowStore, Table, WriteOp};

/// RocksDB-backed persistent index storage.
pub struct RocksStore {
    db: DB,
}

impl RocksStore {
    /// Open or create a database at the given path.
    ///
    /// Missing column families are created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = Table::ALL
            .iter()
            .map(|table| ColumnFamilyDescriptor::new(table.name(), Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors)
            .map_err(backend)?;

        Ok(Self { db })
    }

    /// Flush memtables of every column family to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        for table in Table::ALL {
            let cf = self.cf_handle(table)?;
            self.db.flush_cf(cf).map_err(backend)?;
        }
        Ok(())
    }

    /// Number of entries in a table. Walks the whole column family.
    pub fn count(&self, table: Table) -> Result<usize, StoreError> {
        let cf = self.cf_handle(table)?;
        let mut count = 0;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            item.map_err(backend)?;
            count += 1;
        }
        Ok(count)
    }

    fn cf_handle(&self, table: Table) -> Result<&rocksdb::ColumnFamily, StoreError> {
        let name = table.name();
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Backend(format!("missing column family: {name}")))
    }
}

fn backend(e: rocksdb::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

impl FlowStore for RocksStore {
    fn get_raw(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let cf = self.cf_handle(table)?;
        self.db.get_cf(cf, key).map_err(backend)
    }

    fn put_raw(&mut self, table: Table, key: Vec<u8>, value: Vec<u8>) -> Result<(), StoreError> {
        let cf = self.cf_handle(table)?;
        self.db.put_cf(cf, key, value).map_err(backend)
    }

    fn delete_raw(&mut self, table: Table, key: &[u8]) -> Result<(), StoreError> {
        let cf = self.cf_handle(table)?;
        self.db.delete_cf(cf, key).map_err(backend)
    }

    fn scan_raw(&self, table: Table) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let cf = self.cf_handle(table)?;
        let mut out = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item.map_err(backend)?;
            out.push((key.to_vec(), value.to_vec()));
        }
        Ok(out)
    }

    fn apply_writes(&mut self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        let mut batch = WriteBatch::default();
        for op in ops {
            match op {
                WriteOp::Put { table, key, value } => {
                    batch.put_cf(self.cf_handle(table)?, key, value);
                }
                WriteOp::Delete { table, key } => {
                    batch.delete_cf(self.cf_handle(table)?, key);
                }
            }
        }
        self.db.write(batch).map_err(backend)
    }
}
