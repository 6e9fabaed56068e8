//! The wallet facade: cached state, key generation, and the lock/unlock
//! state machine.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use btcw_consensus::{Amount, Network};
use btcw_log::{log_error, log_info};
use btcw_primitives::ExtendedPrivKey;
use rand::RngCore;
use tokio::sync::Mutex;
use zeroize::Zeroize;

use crate::crypto::{self, WRAP_KEY_LEN};
use crate::error::WalletError;
use crate::keys::{self, KeyPair};
use crate::node::NodeClient;
use crate::store::{
    self, external_path_prefix, WalletStore, EXTERNAL_CHAIN, INTERNAL_CHAIN,
};
use crate::utxo::Utxo;

/// Longest unlock the wallet accepts, one hour.
pub const MAX_UNLOCK_SECS: u64 = 3600;

/// How far below the chain tip a fresh wallet starts scanning.
pub const FRESH_WALLET_SCAN_LAG: i64 = 10;

pub struct Wallet {
    network: Network,
    pub(crate) store: WalletStore,
    node: OnceLock<Arc<NodeClient>>,
    pub(crate) state: Mutex<WalletState>,
}

pub(crate) struct WalletState {
    pub balance: Amount,
    pub last_external_idx: u32,
    pub last_internal_idx: u32,
    pub last_scanned_block: i64,
    /// External address → derivation path; the scanner's hot match set.
    pub addresses: HashMap<String, String>,
    pub utxos: Vec<Utxo>,
    pub unlocked_key: Option<[u8; WRAP_KEY_LEN]>,
    /// Unix deadline after which the wallet locks itself; 0 while locked.
    pub unlocked_until: u64,
    /// Bumped on every lock/unlock so stale relock timers do nothing.
    pub unlock_generation: u64,
}

/// Hash the passphrase, generate the seed, and initialize persistent
/// state. Returns the seed so the caller can show it once for backup.
pub fn create_wallet(
    store: &WalletStore,
    network: Network,
    passphrase: &[u8],
) -> Result<[u8; 32], WalletError> {
    if store.exists()? {
        return Err(WalletError::AlreadyExists);
    }
    let encoded_hash = crypto::hash_passphrase(passphrase)?;
    let mut seed = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut seed);
    store.init_wallet(&seed, &encoded_hash, network)?;
    Ok(seed)
}

impl Wallet {
    /// Open an initialized wallet and populate the in-memory caches. The
    /// wallet always starts locked.
    pub fn load(store: WalletStore, network: Network) -> Result<Self, WalletError> {
        if !store.exists()? {
            return Err(WalletError::NotInitialized);
        }

        let balance = store.balance()?;
        let last_external_idx = store.last_external_idx()?;
        let last_internal_idx = store.last_internal_idx()?;
        let last_scanned_block = store.last_scanned_block()?;

        let mut addresses = HashMap::new();
        for (path, key_pair) in store.key_pairs_with_prefix(&external_path_prefix(network))? {
            addresses.insert(key_pair.address, path);
        }
        let utxos = store.utxos()?;

        Ok(Self {
            network,
            store,
            node: OnceLock::new(),
            state: Mutex::new(WalletState {
                balance,
                last_external_idx,
                last_internal_idx,
                last_scanned_block,
                addresses,
                utxos,
                unlocked_key: None,
                unlocked_until: 0,
                unlock_generation: 0,
            }),
        })
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn set_node(&self, node: Arc<NodeClient>) {
        if self.node.set(node).is_err() {
            log_error!("node client installed twice");
        }
    }

    pub(crate) fn node(&self) -> Arc<NodeClient> {
        self.node.get().expect("node client not installed").clone()
    }

    pub async fn balance(&self) -> Amount {
        self.state.lock().await.balance
    }

    pub async fn last_scanned_block(&self) -> i64 {
        self.state.lock().await.last_scanned_block
    }

    /// Derive the next external-chain address, persist its key pair, and
    /// publish it to the address index and the node-side filter.
    pub async fn get_new_address(&self) -> Result<String, WalletError> {
        let (address, filter_addresses) = {
            let mut state = self.state.lock().await;
            let wrap_key = self.require_unlocked(&mut state)?;

            let chain_key = self.unseal_chain_key(self.store.external_chain_key()?, &wrap_key)?;
            let index = state.last_external_idx;
            let leaf = chain_key.derive_child(index)?;
            let key_pair = keys::new_key_pair(&leaf, self.network, &wrap_key)?;
            let path = store::derivation_path(self.network, EXTERNAL_CHAIN, index);

            self.store
                .put_key_pair_with_index(&path, &key_pair, EXTERNAL_CHAIN, index + 1)?;
            state.last_external_idx = index + 1;
            state
                .addresses
                .insert(key_pair.address.clone(), path);

            let filter_addresses: Vec<String> = state.addresses.keys().cloned().collect();
            (key_pair.address, filter_addresses)
        };

        if let Some(node) = self.node.get() {
            if let Err(err) = node.load_address_filter(&filter_addresses).await {
                log_error!("failed to reload node address filter: {err}");
            }
        }
        Ok(address)
    }

    /// Derive the next internal-chain key pair for a change output.
    /// Caller holds the state lock and has already checked the wrap key.
    pub(crate) fn next_change_key(
        &self,
        state: &mut WalletState,
        wrap_key: &[u8; WRAP_KEY_LEN],
    ) -> Result<(KeyPair, String), WalletError> {
        let chain_key = self.unseal_chain_key(self.store.internal_chain_key()?, wrap_key)?;
        let index = state.last_internal_idx;
        let leaf = chain_key.derive_child(index)?;
        let key_pair = keys::new_key_pair(&leaf, self.network, wrap_key)?;
        let path = store::derivation_path(self.network, INTERNAL_CHAIN, index);

        self.store
            .put_key_pair_with_index(&path, &key_pair, INTERNAL_CHAIN, index + 1)?;
        state.last_internal_idx = index + 1;
        Ok((key_pair, path))
    }

    fn unseal_chain_key(
        &self,
        sealed: Vec<u8>,
        wrap_key: &[u8; WRAP_KEY_LEN],
    ) -> Result<ExtendedPrivKey, WalletError> {
        let mut xprv_bytes = crypto::decrypt(&sealed, wrap_key)?;
        let parsed = std::str::from_utf8(&xprv_bytes)
            .map_err(|_| WalletError::InvalidData("stored extended key is not UTF-8"))
            .and_then(|xprv| {
                ExtendedPrivKey::from_xprv(xprv, self.network).map_err(WalletError::from)
            });
        xprv_bytes.zeroize();
        parsed
    }

    /// Verify the passphrase and expose the wrap key for `duration_secs`.
    /// Returns the unlock generation for the caller's relock timer.
    pub async fn unlock(
        &self,
        passphrase: &str,
        duration_secs: u64,
    ) -> Result<u64, WalletError> {
        if duration_secs > MAX_UNLOCK_SECS {
            return Err(WalletError::BadUnlockDuration);
        }
        let encoded_hash = self.store.encoded_hash()?;
        if !crypto::verify_passphrase(&encoded_hash, passphrase.as_bytes()) {
            return Err(WalletError::BadPassphrase);
        }
        let (_, mut key, _) = crypto::decode_hash(&encoded_hash)?;
        let wrap_key: [u8; WRAP_KEY_LEN] = key
            .as_slice()
            .try_into()
            .map_err(|_| WalletError::BadHash)?;
        key.zeroize();

        let mut state = self.state.lock().await;
        if let Some(old) = state.unlocked_key.as_mut() {
            old.zeroize();
        }
        state.unlocked_key = Some(wrap_key);
        state.unlocked_until = unix_now().saturating_add(duration_secs);
        state.unlock_generation += 1;
        log_info!("wallet unlocked for {duration_secs}s");
        Ok(state.unlock_generation)
    }

    /// Drop the wrap key immediately and cancel any pending relock timer.
    pub async fn lock(&self) {
        let mut state = self.state.lock().await;
        lock_state(&mut state);
        log_info!("wallet locked");
    }

    /// The wrap key, after applying the expiry backstop. Fails with
    /// `Locked` when no unlock is active.
    pub(crate) fn require_unlocked(
        &self,
        state: &mut WalletState,
    ) -> Result<[u8; WRAP_KEY_LEN], WalletError> {
        if state.unlocked_until != 0 && unix_now() >= state.unlocked_until {
            lock_state(state);
        }
        state.unlocked_key.ok_or(WalletError::Locked)
    }

    /// Move the scan cursor of a fresh wallet to just below the chain tip
    /// so historic blocks are skipped.
    pub async fn init_scan_cursor(&self) -> Result<(), WalletError> {
        let mut state = self.state.lock().await;
        if state.last_scanned_block != 0 {
            return Ok(());
        }
        let tip = self.node().get_block_count().await?;
        let start = (tip - FRESH_WALLET_SCAN_LAG).max(0);
        self.store.set_last_scanned_block(start)?;
        state.last_scanned_block = start;
        log_info!("fresh wallet: scan cursor initialized to height {start}");
        Ok(())
    }

    /// Push the full external address set into the node-side filter.
    pub async fn reload_address_filter(&self) -> Result<(), WalletError> {
        let addresses: Vec<String> = {
            let state = self.state.lock().await;
            state.addresses.keys().cloned().collect()
        };
        self.node().load_address_filter(&addresses).await?;
        Ok(())
    }
}

/// Relock the wallet after `duration_secs` unless a newer unlock or an
/// explicit lock superseded `generation`.
pub fn spawn_relock(wallet: Arc<Wallet>, duration_secs: u64, generation: u64) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(duration_secs)).await;
        let mut state = wallet.state.lock().await;
        if state.unlock_generation == generation && state.unlocked_key.is_some() {
            lock_state(&mut state);
            log_info!("wallet auto-locked after {duration_secs}s");
        }
    });
}

fn lock_state(state: &mut WalletState) {
    if let Some(key) = state.unlocked_key.as_mut() {
        key.zeroize();
    }
    state.unlocked_key = None;
    state.unlocked_until = 0;
    state.unlock_generation += 1;
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use btcw_storage::memory::MemoryStore;

    use crate::node::StubNode;

    pub const PASSPHRASE: &str = "correct horse";

    /// Memory-backed wallet created from the all-zero seed with a stub
    /// node installed.
    pub fn stub_wallet(fee_per_kb: Amount) -> (Arc<Wallet>, Arc<NodeClient>) {
        let store = WalletStore::new(Arc::new(MemoryStore::new()));
        let encoded = crypto::hash_passphrase(PASSPHRASE.as_bytes()).expect("hash");
        store
            .init_wallet(&[0u8; 32], &encoded, Network::Testnet3)
            .expect("init");
        let wallet = Arc::new(Wallet::load(store, Network::Testnet3).expect("load"));
        let node = Arc::new(NodeClient::Stub(StubNode::new(fee_per_kb)));
        wallet.set_node(node.clone());
        (wallet, node)
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::{stub_wallet, PASSPHRASE};
    use super::*;
    use btcw_primitives::derive_chain_keys;

    #[tokio::test]
    async fn starts_locked() {
        let (wallet, _node) = stub_wallet(2);
        assert!(matches!(
            wallet.get_new_address().await,
            Err(WalletError::Locked)
        ));
    }

    #[tokio::test]
    async fn unlock_rejects_bad_passphrase_and_duration() {
        let (wallet, _node) = stub_wallet(2);
        assert!(matches!(
            wallet.unlock("wrong horse", 60).await,
            Err(WalletError::BadPassphrase)
        ));
        assert!(matches!(
            wallet.unlock(PASSPHRASE, MAX_UNLOCK_SECS + 1).await,
            Err(WalletError::BadUnlockDuration)
        ));
        wallet.unlock(PASSPHRASE, 60).await.expect("unlock");
    }

    #[tokio::test]
    async fn address_generation_is_deterministic() {
        let (wallet, _node) = stub_wallet(2);
        wallet.unlock(PASSPHRASE, 600).await.expect("unlock");

        let mut generated = Vec::new();
        for _ in 0..3 {
            generated.push(wallet.get_new_address().await.expect("address"));
        }

        // Same leaves derived straight from the seed.
        let (_, external, _) = derive_chain_keys(&[0u8; 32], Network::Testnet3).expect("derive");
        for (index, address) in generated.iter().enumerate() {
            let leaf = external.derive_child(index as u32).expect("leaf");
            let expected = btcw_primitives::p2pkh_address(
                &btcw_primitives::hash160(&leaf.public_key_bytes()),
                Network::Testnet3,
            );
            assert_eq!(address, &expected);
        }

        let state = wallet.state.lock().await;
        assert_eq!(state.last_external_idx, 3);
        assert_eq!(wallet.store.last_external_idx().unwrap(), 3);
        for address in &generated {
            assert!(state.addresses.contains_key(address));
        }
    }

    #[tokio::test]
    async fn address_index_survives_reload() {
        let (wallet, _node) = stub_wallet(2);
        wallet.unlock(PASSPHRASE, 600).await.expect("unlock");
        let address = wallet.get_new_address().await.expect("address");

        let reloaded = Wallet::load(wallet.store.clone(), Network::Testnet3).expect("reload");
        let state = reloaded.state.lock().await;
        assert_eq!(
            state.addresses.get(&address),
            Some(&"m/44'/1'/0'/0/0".to_string())
        );
        assert_eq!(state.last_external_idx, 1);
        assert!(state.unlocked_key.is_none());
    }

    #[tokio::test]
    async fn new_address_reloads_node_filter() {
        let (wallet, node) = stub_wallet(2);
        wallet.unlock(PASSPHRASE, 600).await.expect("unlock");
        let address = wallet.get_new_address().await.expect("address");

        let NodeClient::Stub(stub) = node.as_ref() else {
            unreachable!()
        };
        let filters = stub.filters.lock().expect("stub lock");
        assert_eq!(filters.len(), 1);
        assert_eq!(filters[0], vec![address]);
    }

    #[tokio::test(start_paused = true)]
    async fn relock_timer_fires() {
        let (wallet, _node) = stub_wallet(2);
        let generation = wallet.unlock(PASSPHRASE, 2).await.expect("unlock");
        spawn_relock(wallet.clone(), 2, generation);

        wallet.get_new_address().await.expect("unlocked");
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(matches!(
            wallet.get_new_address().await,
            Err(WalletError::Locked)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_lock_cancels_timer() {
        let (wallet, _node) = stub_wallet(2);
        let generation = wallet.unlock(PASSPHRASE, 2).await.expect("unlock");
        spawn_relock(wallet.clone(), 2, generation);

        wallet.lock().await;
        // A second unlock outlives the first timer's deadline.
        let generation = wallet.unlock(PASSPHRASE, 600).await.expect("unlock");
        spawn_relock(wallet.clone(), 600, generation);
        tokio::time::sleep(Duration::from_secs(5)).await;
        wallet.get_new_address().await.expect("still unlocked");
    }

    #[tokio::test]
    async fn load_requires_initialized_store() {
        use btcw_storage::memory::MemoryStore;
        let store = WalletStore::new(Arc::new(MemoryStore::new()));
        assert!(matches!(
            Wallet::load(store, Network::Testnet3),
            Err(WalletError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn create_wallet_rejects_existing() {
        let (wallet, _node) = stub_wallet(2);
        assert!(matches!(
            create_wallet(&wallet.store, Network::Testnet3, b"pp"),
            Err(WalletError::AlreadyExists)
        ));
    }
}
