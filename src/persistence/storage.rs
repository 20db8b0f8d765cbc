//! RocksDB record store
//!
//! One column family per row kind. Every graph commit becomes a single
//! `rocksdb::WriteBatch`, which RocksDB applies atomically across column
//! families.

use super::{NodeRow, PropertyRow, Record, RecordKey, RecordStore, StoreError, StoreResult, TagRow, WriteBatch, WriteOp};
use crate::graph::{NodeClass, NodeId};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, DB};
use std::path::Path;
use tracing::{debug, info};

const NODES_CF: &str = "nodes";
const PROPERTIES_CF: &str = "properties";
const TAGS_CF: &str = "tags";

/// RocksDB-based record store
pub struct RocksStore {
    db: DB,
}

impl RocksStore {
    /// Open or create a store at `path`
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;
        info!("Opening record store at: {:?}", path);

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts.set_wal_recovery_mode(rocksdb::DBRecoveryMode::PointInTime);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new("default", Options::default()),
            ColumnFamilyDescriptor::new(NODES_CF, Self::cf_options()),
            ColumnFamilyDescriptor::new(PROPERTIES_CF, Self::cf_options()),
            ColumnFamilyDescriptor::new(TAGS_CF, Self::cf_options()),
        ];

        let db = DB::open_cf_descriptors(&opts, path, cf_descriptors)?;
        info!("Record store opened successfully");

        Ok(Self { db })
    }

    fn cf_options() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf(&self, name: &str) -> StoreResult<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::ColumnFamily(name.to_string()))
    }

    /// Flush all data to disk
    pub fn flush(&self) -> StoreResult<()> {
        self.db.flush()?;
        debug!("Flushed record store to disk");
        Ok(())
    }

    fn node_key(id: NodeId) -> Vec<u8> {
        id.as_bytes().to_vec()
    }

    /// Key for a row owned by a node: 16 id bytes followed by the name
    fn owned_key(owner: NodeId, name: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(16 + name.len());
        key.extend_from_slice(owner.as_bytes());
        key.extend_from_slice(name.as_bytes());
        key
    }

    fn scan<T: serde::de::DeserializeOwned>(&self, cf_name: &str) -> StoreResult<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut rows = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            rows.push(bincode::deserialize(&value)?);
        }
        Ok(rows)
    }
}

impl RecordStore for RocksStore {
    fn load(&self) -> StoreResult<Vec<Record>> {
        let mut records: Vec<Record> = self.scan::<NodeRow>(NODES_CF)?.into_iter().map(Record::Node).collect();
        records.extend(self.scan::<PropertyRow>(PROPERTIES_CF)?.into_iter().map(Record::Property));
        records.extend(self.scan::<TagRow>(TAGS_CF)?.into_iter().map(Record::Tag));
        debug!("Loaded {} rows from record store", records.len());
        Ok(records)
    }

    fn fetch(&self, class: NodeClass, node_type: &str) -> StoreResult<Vec<NodeRow>> {
        Ok(self
            .scan::<NodeRow>(NODES_CF)?
            .into_iter()
            .filter(|row| row.class() == class && row.node_type == node_type)
            .collect())
    }

    fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        let nodes = self.cf(NODES_CF)?;
        let properties = self.cf(PROPERTIES_CF)?;
        let tags = self.cf(TAGS_CF)?;

        let count = batch.len();
        let mut write = rocksdb::WriteBatch::default();
        for op in batch {
            match op {
                WriteOp::Put(Record::Node(row)) => {
                    write.put_cf(nodes, Self::node_key(row.id), bincode::serialize(&row)?);
                }
                WriteOp::Put(Record::Property(row)) => {
                    write.put_cf(properties, Self::owned_key(row.owner, &row.name), bincode::serialize(&row)?);
                }
                WriteOp::Put(Record::Tag(row)) => {
                    write.put_cf(tags, Self::owned_key(row.owner, &row.name), bincode::serialize(&row)?);
                }
                WriteOp::Delete(RecordKey::Node(id)) => {
                    write.delete_cf(nodes, Self::node_key(id));
                }
                WriteOp::Delete(RecordKey::Property(owner, name)) => {
                    write.delete_cf(properties, Self::owned_key(owner, &name));
                }
                WriteOp::Delete(RecordKey::Tag(owner, name)) => {
                    write.delete_cf(tags, Self::owned_key(owner, &name));
                }
            }
        }

        self.db.write(write)?;
        debug!("Committed {} ops to record store", count);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeRecord;
    use crate::persistence::{assemble, rows_for};
    use tempfile::TempDir;

    #[test]
    fn test_store_open() {
        let temp_dir = TempDir::new().unwrap();
        let store = RocksStore::open(temp_dir.path()).unwrap();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_commit_and_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let mut node = NodeRecord::new(NodeClass::Entity, "T").unwrap();
        node.set_property("P", 111);
        node.add_group("G");

        {
            let store = RocksStore::open(temp_dir.path()).unwrap();
            let mut batch = WriteBatch::new();
            for row in rows_for(&node) {
                batch.put(row);
            }
            store.commit(batch).unwrap();
            store.flush().unwrap();
        }

        let store = RocksStore::open(temp_dir.path()).unwrap();
        let nodes = assemble(store.load().unwrap());
        assert_eq!(nodes.get(&node.id), Some(&node));
        assert_eq!(store.fetch(NodeClass::Entity, "T").unwrap().len(), 1);
        assert!(store.fetch(NodeClass::Entity, "other").unwrap().is_empty());
    }

    #[test]
    fn test_delete_rows() {
        let temp_dir = TempDir::new().unwrap();
        let store = RocksStore::open(temp_dir.path()).unwrap();
        let mut node = NodeRecord::new(NodeClass::Action, "A").unwrap();
        node.set_property("P", 1);
        node.add_group("G");

        let mut batch = WriteBatch::new();
        for row in rows_for(&node) {
            batch.put(row);
        }
        store.commit(batch).unwrap();

        let mut delete = WriteBatch::new();
        delete.delete(RecordKey::Property(node.id, "P".into()));
        delete.delete(RecordKey::Tag(node.id, "G".into()));
        delete.delete(RecordKey::Node(node.id));
        store.commit(delete).unwrap();

        assert!(store.load().unwrap().is_empty());
    }
}
