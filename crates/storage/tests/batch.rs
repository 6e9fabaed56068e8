use btcw_storage::memory::MemoryStore;
use btcw_storage::{Column, KeyValueStore, WriteBatch};

#[test]
fn batch_put_and_delete() {
    let store = MemoryStore::new();

    let mut batch = WriteBatch::new();
    batch.put(Column::Keys, "m/44'/1'/0'/0/0", b"kp0".to_vec());
    batch.put(Column::Keys, "m/44'/1'/0'/0/1", b"kp1".to_vec());
    batch.put(Column::WalletMetadata, "balance", 0i64.to_le_bytes());
    store.write_batch(&batch).expect("commit");

    assert_eq!(
        store.get(Column::Keys, b"m/44'/1'/0'/0/0").unwrap(),
        Some(b"kp0".to_vec())
    );
    assert_eq!(
        store.get(Column::WalletMetadata, b"balance").unwrap(),
        Some(0i64.to_le_bytes().to_vec())
    );

    let mut batch = WriteBatch::new();
    batch.delete(Column::Keys, "m/44'/1'/0'/0/0");
    store.write_batch(&batch).expect("commit");
    assert_eq!(store.get(Column::Keys, b"m/44'/1'/0'/0/0").unwrap(), None);
}

#[test]
fn prefix_scan_is_column_scoped() {
    let store = MemoryStore::new();
    store
        .put(Column::Keys, b"m/44'/1'/0'/0/0", b"ext")
        .unwrap();
    store
        .put(Column::Keys, b"m/44'/1'/0'/1/0", b"int")
        .unwrap();
    store.put(Column::Utxos, b"m/44'", b"not a key").unwrap();

    let external = store
        .scan_prefix(Column::Keys, b"m/44'/1'/0'/0/")
        .unwrap();
    assert_eq!(external.len(), 1);
    assert_eq!(external[0].1, b"ext".to_vec());

    let all_keys = store.scan_prefix(Column::Keys, b"").unwrap();
    assert_eq!(all_keys.len(), 2);
}

#[test]
fn visitor_error_stops_iteration() {
    let store = MemoryStore::new();
    store.put(Column::Utxos, b"a", b"1").unwrap();
    store.put(Column::Utxos, b"b", b"2").unwrap();

    let mut seen = 0usize;
    let result = store.for_each_prefix(Column::Utxos, b"", &mut |_key, _value| {
        seen += 1;
        Err(btcw_storage::StoreError::NotFound)
    });
    assert!(result.is_err());
    assert_eq!(seen, 1);
}
