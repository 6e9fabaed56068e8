//! Typed wallet persistence over the bucketed key-value store.

use std::sync::Arc;

use btcw_consensus::{Amount, Network};
use btcw_primitives::derive_chain_keys;
use btcw_storage::{Column, KeyValueStore, StoreError, WriteBatch};
use zeroize::Zeroize;

use crate::crypto::{self, WRAP_KEY_LEN};
use crate::error::WalletError;
use crate::keys::KeyPair;
use crate::utxo::Utxo;

const ENCODED_HASH_KEY: &str = "encoded_hash";
const MASTER_SEED_KEY: &str = "master_seed";
const ACCOUNT_0_EXTERNAL_KEY: &str = "account_0_external";
const ACCOUNT_0_INTERNAL_KEY: &str = "account_0_internal";
const BALANCE_KEY: &str = "balance";
const LAST_SCANNED_BLOCK_KEY: &str = "last_scanned_block";
const LAST_EXTERNAL_IDX_KEY: &str = "last_external_idx";
const LAST_INTERNAL_IDX_KEY: &str = "last_internal_idx";

/// BIP-44 chain constants for the account-0 tree.
pub const EXTERNAL_CHAIN: u32 = 0;
pub const INTERNAL_CHAIN: u32 = 1;

/// Derivation-path string for a leaf, e.g. `m/44'/1'/0'/0/5`.
pub fn derivation_path(network: Network, chain: u32, index: u32) -> String {
    format!("m/44'/{}'/0'/{}/{}", network.coin_type(), chain, index)
}

/// Prefix shared by every external-chain leaf of this network.
pub fn external_path_prefix(network: Network) -> String {
    format!("m/44'/{}'/0'/{}/", network.coin_type(), EXTERNAL_CHAIN)
}

#[derive(Clone)]
pub struct WalletStore {
    inner: Arc<dyn KeyValueStore>,
}

impl WalletStore {
    pub fn new(inner: Arc<dyn KeyValueStore>) -> Self {
        Self { inner }
    }

    /// True once a wallet has been initialized: all buckets are reachable
    /// and the master seed sentinel is present.
    pub fn exists(&self) -> Result<bool, WalletError> {
        let seed = self.inner.get(Column::WalletMetadata, MASTER_SEED_KEY.as_bytes())?;
        let hash = self.inner.get(Column::Auth, ENCODED_HASH_KEY.as_bytes())?;
        Ok(seed.is_some() && hash.is_some())
    }

    /// Create the wallet: derive the chain keys from `seed`, seal them
    /// under the passphrase-derived key, and write the initial state in one
    /// transaction.
    pub fn init_wallet(
        &self,
        seed: &[u8],
        encoded_hash: &str,
        network: Network,
    ) -> Result<(), WalletError> {
        if self.exists()? {
            return Err(WalletError::AlreadyExists);
        }

        let (master, external, internal) = derive_chain_keys(seed, network)?;

        let (_, key, _) = crypto::decode_hash(encoded_hash)?;
        let wrap_key: [u8; WRAP_KEY_LEN] =
            key.try_into().map_err(|_| WalletError::BadHash)?;

        let mut master_xprv = master.to_xprv(network);
        let mut external_xprv = external.to_xprv(network);
        let mut internal_xprv = internal.to_xprv(network);
        let encrypted_master = crypto::encrypt(master_xprv.as_bytes(), &wrap_key)?;
        let encrypted_external = crypto::encrypt(external_xprv.as_bytes(), &wrap_key)?;
        let encrypted_internal = crypto::encrypt(internal_xprv.as_bytes(), &wrap_key)?;
        master_xprv.zeroize();
        external_xprv.zeroize();
        internal_xprv.zeroize();

        let mut batch = WriteBatch::new();
        batch.put(Column::Auth, ENCODED_HASH_KEY, encoded_hash.as_bytes());
        batch.put(Column::WalletMetadata, MASTER_SEED_KEY, encrypted_master);
        batch.put(
            Column::WalletMetadata,
            ACCOUNT_0_EXTERNAL_KEY,
            encrypted_external,
        );
        batch.put(
            Column::WalletMetadata,
            ACCOUNT_0_INTERNAL_KEY,
            encrypted_internal,
        );
        batch.put(Column::WalletMetadata, BALANCE_KEY, 0i64.to_le_bytes());
        batch.put(
            Column::WalletMetadata,
            LAST_EXTERNAL_IDX_KEY,
            0u32.to_le_bytes(),
        );
        batch.put(
            Column::WalletMetadata,
            LAST_INTERNAL_IDX_KEY,
            0u32.to_le_bytes(),
        );
        batch.put(
            Column::WalletMetadata,
            LAST_SCANNED_BLOCK_KEY,
            0i64.to_le_bytes(),
        );
        self.inner.write_batch(&batch)?;
        Ok(())
    }

    pub fn encoded_hash(&self) -> Result<String, WalletError> {
        let bytes = self
            .inner
            .get(Column::Auth, ENCODED_HASH_KEY.as_bytes())?
            .ok_or(WalletError::NotInitialized)?;
        String::from_utf8(bytes).map_err(|_| WalletError::BadHash)
    }

    pub fn balance(&self) -> Result<Amount, WalletError> {
        self.metadata_i64(BALANCE_KEY)
    }

    pub fn set_balance(&self, balance: Amount) -> Result<(), WalletError> {
        self.put_metadata(BALANCE_KEY, &balance.to_le_bytes())
    }

    pub fn last_scanned_block(&self) -> Result<i64, WalletError> {
        self.metadata_i64(LAST_SCANNED_BLOCK_KEY)
    }

    pub fn set_last_scanned_block(&self, height: i64) -> Result<(), WalletError> {
        self.put_metadata(LAST_SCANNED_BLOCK_KEY, &height.to_le_bytes())
    }

    pub fn last_external_idx(&self) -> Result<u32, WalletError> {
        self.metadata_u32(LAST_EXTERNAL_IDX_KEY)
    }

    pub fn last_internal_idx(&self) -> Result<u32, WalletError> {
        self.metadata_u32(LAST_INTERNAL_IDX_KEY)
    }

    /// Encrypted external-chain extended key.
    pub fn external_chain_key(&self) -> Result<Vec<u8>, WalletError> {
        self.inner
            .get(Column::WalletMetadata, ACCOUNT_0_EXTERNAL_KEY.as_bytes())?
            .ok_or(WalletError::NotInitialized)
    }

    /// Encrypted internal-chain extended key.
    pub fn internal_chain_key(&self) -> Result<Vec<u8>, WalletError> {
        self.inner
            .get(Column::WalletMetadata, ACCOUNT_0_INTERNAL_KEY.as_bytes())?
            .ok_or(WalletError::NotInitialized)
    }

    /// Store a freshly derived key pair and advance the chain's next-free
    /// index in the same transaction.
    pub fn put_key_pair_with_index(
        &self,
        path: &str,
        key_pair: &KeyPair,
        chain: u32,
        next_index: u32,
    ) -> Result<(), WalletError> {
        let encoded = serde_json::to_vec(key_pair)
            .map_err(|_| WalletError::InvalidData("key pair serialization failed"))?;
        let index_key = if chain == EXTERNAL_CHAIN {
            LAST_EXTERNAL_IDX_KEY
        } else {
            LAST_INTERNAL_IDX_KEY
        };
        let mut batch = WriteBatch::new();
        batch.put(Column::Keys, path, encoded);
        batch.put(Column::WalletMetadata, index_key, next_index.to_le_bytes());
        self.inner.write_batch(&batch)?;
        Ok(())
    }

    pub fn key_pair(&self, path: &str) -> Result<Option<KeyPair>, WalletError> {
        let Some(bytes) = self.inner.get(Column::Keys, path.as_bytes())? else {
            return Ok(None);
        };
        let key_pair = serde_json::from_slice(&bytes)
            .map_err(|_| WalletError::InvalidData("stored key pair is malformed"))?;
        Ok(Some(key_pair))
    }

    /// All key pairs whose derivation path starts with `prefix`.
    pub fn key_pairs_with_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, KeyPair)>, WalletError> {
        let mut pairs = Vec::new();
        for (path, bytes) in self.inner.scan_prefix(Column::Keys, prefix.as_bytes())? {
            let path = String::from_utf8(path)
                .map_err(|_| WalletError::InvalidData("stored key path is not UTF-8"))?;
            let key_pair = serde_json::from_slice(&bytes)
                .map_err(|_| WalletError::InvalidData("stored key pair is malformed"))?;
            pairs.push((path, key_pair));
        }
        Ok(pairs)
    }

    /// Linear scan of the keys bucket for the path holding `address`.
    /// Cold path: only change-output bookkeeping uses it.
    pub fn find_path_for_address(&self, address: &str) -> Result<Option<String>, WalletError> {
        let mut found = None;
        let target = address.as_bytes().to_vec();
        self.inner
            .for_each_prefix(Column::Keys, b"", &mut |path, bytes| {
                if found.is_some() {
                    return Ok(());
                }
                let key_pair: KeyPair = serde_json::from_slice(bytes)
                    .map_err(|err| StoreError::Backend(err.to_string()))?;
                if key_pair.address.as_bytes() == target.as_slice() {
                    found = Some(String::from_utf8_lossy(path).into_owned());
                }
                Ok(())
            })?;
        Ok(found)
    }

    pub fn put_utxo(&self, utxo: &Utxo) -> Result<(), WalletError> {
        let encoded = serde_json::to_vec(utxo)
            .map_err(|_| WalletError::InvalidData("utxo serialization failed"))?;
        self.inner
            .put(Column::Utxos, utxo.outpoint().as_bytes(), &encoded)?;
        Ok(())
    }

    /// Overwrite an existing UTXO. Fails with `NotFound` when the outpoint
    /// has never been stored.
    pub fn update_utxo(&self, outpoint: &str, utxo: &Utxo) -> Result<(), WalletError> {
        if self.inner.get(Column::Utxos, outpoint.as_bytes())?.is_none() {
            return Err(WalletError::Store(StoreError::NotFound));
        }
        let encoded = serde_json::to_vec(utxo)
            .map_err(|_| WalletError::InvalidData("utxo serialization failed"))?;
        self.inner.put(Column::Utxos, outpoint.as_bytes(), &encoded)?;
        Ok(())
    }

    pub fn utxos(&self) -> Result<Vec<Utxo>, WalletError> {
        let mut utxos = Vec::new();
        for (_, bytes) in self.inner.scan_prefix(Column::Utxos, b"")? {
            let utxo = serde_json::from_slice(&bytes)
                .map_err(|_| WalletError::InvalidData("stored utxo is malformed"))?;
            utxos.push(utxo);
        }
        Ok(utxos)
    }

    fn metadata_i64(&self, key: &str) -> Result<i64, WalletError> {
        let bytes = self
            .inner
            .get(Column::WalletMetadata, key.as_bytes())?
            .ok_or(WalletError::NotInitialized)?;
        let bytes: [u8; 8] = bytes
            .try_into()
            .map_err(|_| WalletError::InvalidData("metadata field has wrong width"))?;
        Ok(i64::from_le_bytes(bytes))
    }

    fn metadata_u32(&self, key: &str) -> Result<u32, WalletError> {
        let bytes = self
            .inner
            .get(Column::WalletMetadata, key.as_bytes())?
            .ok_or(WalletError::NotInitialized)?;
        let bytes: [u8; 4] = bytes
            .try_into()
            .map_err(|_| WalletError::InvalidData("metadata field has wrong width"))?;
        Ok(u32::from_le_bytes(bytes))
    }

    fn put_metadata(&self, key: &str, value: &[u8]) -> Result<(), WalletError> {
        self.inner.put(Column::WalletMetadata, key.as_bytes(), value)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use btcw_storage::memory::MemoryStore;

    use crate::crypto;

    fn memory_store() -> WalletStore {
        WalletStore::new(Arc::new(MemoryStore::new()))
    }

    fn init(store: &WalletStore) -> String {
        let encoded = crypto::hash_passphrase(b"correct horse").expect("hash");
        store
            .init_wallet(&[0u8; 32], &encoded, Network::Testnet3)
            .expect("init");
        encoded
    }

    #[test]
    fn init_writes_initial_state() {
        let store = memory_store();
        assert!(!store.exists().unwrap());
        let encoded = init(&store);

        assert!(store.exists().unwrap());
        assert_eq!(store.encoded_hash().unwrap(), encoded);
        assert_eq!(store.balance().unwrap(), 0);
        assert_eq!(store.last_scanned_block().unwrap(), 0);
        assert_eq!(store.last_external_idx().unwrap(), 0);
        assert_eq!(store.last_internal_idx().unwrap(), 0);
    }

    #[test]
    fn init_twice_fails() {
        let store = memory_store();
        init(&store);
        let encoded = crypto::hash_passphrase(b"other").expect("hash");
        assert!(matches!(
            store.init_wallet(&[1u8; 32], &encoded, Network::Testnet3),
            Err(WalletError::AlreadyExists)
        ));
    }

    #[test]
    fn chain_keys_are_encrypted_at_rest() {
        let store = memory_store();
        let encoded = init(&store);
        let (_, key, _) = crypto::decode_hash(&encoded).unwrap();
        let wrap_key: [u8; WRAP_KEY_LEN] = key.try_into().unwrap();

        let sealed = store.external_chain_key().unwrap();
        assert!(!sealed.starts_with(b"tprv"));
        let plain = crypto::decrypt(&sealed, &wrap_key).expect("unseal");
        assert!(std::str::from_utf8(&plain).unwrap().starts_with("tprv"));
    }

    #[test]
    fn key_pair_roundtrip_and_prefix_scan() {
        let store = memory_store();
        let encoded = init(&store);
        let (_, key, _) = crypto::decode_hash(&encoded).unwrap();
        let wrap_key: [u8; WRAP_KEY_LEN] = key.try_into().unwrap();

        let (_, external, internal) =
            btcw_primitives::derive_chain_keys(&[0u8; 32], Network::Testnet3).unwrap();
        for (chain_key, chain) in [(external, EXTERNAL_CHAIN), (internal, INTERNAL_CHAIN)] {
            let leaf = chain_key.derive_child(0).unwrap();
            let kp = crate::keys::new_key_pair(&leaf, Network::Testnet3, &wrap_key).unwrap();
            let path = derivation_path(Network::Testnet3, chain, 0);
            store
                .put_key_pair_with_index(&path, &kp, chain, 1)
                .expect("put");
            assert_eq!(store.key_pair(&path).unwrap(), Some(kp));
        }
        assert_eq!(store.last_external_idx().unwrap(), 1);
        assert_eq!(store.last_internal_idx().unwrap(), 1);

        let externals = store
            .key_pairs_with_prefix(&external_path_prefix(Network::Testnet3))
            .unwrap();
        assert_eq!(externals.len(), 1);
        assert_eq!(externals[0].0, "m/44'/1'/0'/0/0");
    }

    #[test]
    fn find_path_for_address() {
        let store = memory_store();
        let encoded = init(&store);
        let (_, key, _) = crypto::decode_hash(&encoded).unwrap();
        let wrap_key: [u8; WRAP_KEY_LEN] = key.try_into().unwrap();

        let (_, external, _) =
            btcw_primitives::derive_chain_keys(&[0u8; 32], Network::Testnet3).unwrap();
        let leaf = external.derive_child(3).unwrap();
        let kp = crate::keys::new_key_pair(&leaf, Network::Testnet3, &wrap_key).unwrap();
        let path = derivation_path(Network::Testnet3, EXTERNAL_CHAIN, 3);
        store.put_key_pair_with_index(&path, &kp, EXTERNAL_CHAIN, 4).unwrap();

        assert_eq!(
            store.find_path_for_address(&kp.address).unwrap(),
            Some(path)
        );
        assert_eq!(store.find_path_for_address("nope").unwrap(), None);
    }

    #[test]
    fn utxo_update_requires_existing_entry() {
        let store = memory_store();
        init(&store);

        let mut utxo = Utxo::new("ab".repeat(32), 0, 5_000, vec![0x76], "m/x".into());
        assert!(matches!(
            store.update_utxo(&utxo.outpoint(), &utxo),
            Err(WalletError::Store(StoreError::NotFound))
        ));

        store.put_utxo(&utxo).expect("put");
        utxo.spent = true;
        store.update_utxo(&utxo.outpoint(), &utxo).expect("update");

        let stored = store.utxos().unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].spent);
    }
}
