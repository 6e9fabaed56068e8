use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::{Column, KeyValueStore, PrefixVisitor, ScanResult, StoreError, WriteBatch, WriteOp};

type Bucket = BTreeMap<Vec<u8>, Vec<u8>>;

/// In-memory store holding one ordered bucket per wallet column. Backs
/// the test suites and the `--backend memory` escape hatch.
pub struct MemoryStore {
    buckets: RwLock<[Bucket; Column::ALL.len()]>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            buckets: RwLock::new(std::array::from_fn(|_| Bucket::new())),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let buckets = self.buckets.read().expect("memory store lock");
        Ok(buckets[column.index()].get(key).cloned())
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let mut buckets = self.buckets.write().expect("memory store lock");
        buckets[column.index()].insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError> {
        let mut buckets = self.buckets.write().expect("memory store lock");
        buckets[column.index()].remove(key);
        Ok(())
    }

    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError> {
        let buckets = self.buckets.read().expect("memory store lock");
        Ok(buckets[column.index()]
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    fn for_each_prefix<'a>(
        &self,
        column: Column,
        prefix: &[u8],
        visitor: &mut PrefixVisitor<'a>,
    ) -> Result<(), StoreError> {
        let buckets = self.buckets.read().expect("memory store lock");
        for (key, value) in buckets[column.index()]
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
        {
            visitor(key, value)?;
        }
        Ok(())
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        let mut buckets = self.buckets.write().expect("memory store lock");
        for op in batch.iter() {
            match op {
                WriteOp::Put { column, key, value } => {
                    buckets[column.index()]
                        .insert(key.as_slice().to_vec(), value.as_slice().to_vec());
                }
                WriteOp::Delete { column, key } => {
                    buckets[column.index()].remove(key.as_slice());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_scan_is_ordered_and_bounded() {
        let store = MemoryStore::new();
        store.put(Column::Keys, b"m/44'/1'/0'/0/0", b"a").unwrap();
        store.put(Column::Keys, b"m/44'/1'/0'/0/10", b"b").unwrap();
        store.put(Column::Keys, b"m/44'/1'/0'/1/0", b"c").unwrap();

        let hits = store
            .scan_prefix(Column::Keys, b"m/44'/1'/0'/0/")
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.windows(2).all(|pair| pair[0].0 <= pair[1].0));

        let all = store.scan_prefix(Column::Keys, b"").unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn buckets_do_not_alias() {
        let store = MemoryStore::new();
        store.put(Column::Auth, b"k", b"auth").unwrap();
        store.put(Column::Utxos, b"k", b"utxo").unwrap();

        assert_eq!(store.get(Column::Auth, b"k").unwrap(), Some(b"auth".to_vec()));
        store.delete(Column::Auth, b"k").unwrap();
        assert_eq!(store.get(Column::Auth, b"k").unwrap(), None);
        assert_eq!(store.get(Column::Utxos, b"k").unwrap(), Some(b"utxo".to_vec()));
    }
}
