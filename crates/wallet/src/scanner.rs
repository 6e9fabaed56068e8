//! Block scanning: catch-up from the stored cursor plus live ingestion.

use std::sync::Arc;
use std::time::Duration;

use btcw_log::{log_error, log_info};
use btcw_primitives::script_pubkey_to_address;
use btcw_script::{classify_script_pubkey, ScriptType};
use tokio::sync::{mpsc, watch};

use crate::error::WalletError;
use crate::node::{BlockEvent, BlockTx};
use crate::utxo::Utxo;
use crate::wallet::Wallet;

/// How often the polling backend is asked for new blocks.
pub const POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Drive the scanner until shutdown: one catch-up pass, then either the
/// push-notification stream or the 30-second polling loop.
pub async fn run(
    wallet: Arc<Wallet>,
    events: Option<mpsc::Receiver<BlockEvent>>,
    mut shutdown: watch::Receiver<bool>,
) {
    catch_up(&wallet).await;

    match events {
        Some(mut events) => loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                event = events.recv() => {
                    match event {
                        Some(BlockEvent::FilteredBlock { height, hash, txs }) => {
                            log_info!("received new block {hash} at height {height}");
                            let _ = scan_txs(&wallet, &hash, &txs).await;
                        }
                        None => {
                            log_error!("node notification stream closed");
                            break;
                        }
                    }
                }
            }
        },
        None => {
            let mut ticker = tokio::time::interval(POLL_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => catch_up(&wallet).await,
                }
            }
        }
    }
}

/// Scan every block between the stored cursor and the chain tip. A fresh
/// wallet first jumps its cursor to just below the tip. Transient errors
/// are logged and leave the cursor where it was, so the block is retried
/// on the next pass.
pub async fn catch_up(wallet: &Wallet) {
    if let Err(err) = wallet.init_scan_cursor().await {
        log_error!("error scanning blockchain - could not initialize cursor: {err}");
        return;
    }

    let node = wallet.node();
    let tip = match node.get_block_count().await {
        Ok(tip) => tip,
        Err(err) => {
            log_error!("error scanning blockchain - could not get block count: {err}");
            return;
        }
    };

    loop {
        let next = wallet.last_scanned_block().await + 1;
        if next > tip {
            break;
        }
        let hash = match node.get_block_hash(next).await {
            Ok(hash) => hash,
            Err(err) => {
                log_error!("error scanning blockchain - could not get block hash: {err}");
                return;
            }
        };
        let block = match node.get_block_with_tx(&hash).await {
            Ok(block) => block,
            Err(err) => {
                log_error!("error getting block {hash}: {err}");
                return;
            }
        };
        if scan_txs(wallet, &block.hash, &block.txs).await.is_err() {
            return;
        }
    }

    log_info!(
        "finished scanning, synced with blockchain at height {}",
        wallet.last_scanned_block().await
    );
}

/// Scan one block's transactions for outputs paying wallet addresses,
/// then advance the cursor by one. Each match is committed UTXO-first,
/// balance second, so a crash in between is recoverable by a rescan.
pub async fn scan_txs(wallet: &Wallet, block_hash: &str, txs: &[BlockTx]) -> Result<(), WalletError> {
    let mut state = wallet.state.lock().await;

    for tx in txs {
        for output in &tx.outputs {
            if classify_script_pubkey(&output.script_pubkey) != ScriptType::P2Pkh {
                continue;
            }
            let Some(address) = script_pubkey_to_address(&output.script_pubkey, wallet.network())
            else {
                continue;
            };
            let Some(path) = state.addresses.get(&address).cloned() else {
                continue;
            };

            log_info!("found new receiving transaction in block {block_hash}");
            let utxo = Utxo::new(
                tx.txid.clone(),
                output.index,
                output.value,
                output.script_pubkey.clone(),
                path,
            );
            if let Err(err) = wallet.store.put_utxo(&utxo) {
                log_error!("error adding new UTXO: {err}");
                return Err(err);
            }
            let balance = state.balance + utxo.value;
            if let Err(err) = wallet.store.set_balance(balance) {
                log_error!("error setting wallet balance: {err}");
                return Err(err);
            }
            state.balance = balance;
            state.utxos.push(utxo);
            log_info!("added new transaction {} to wallet", tx.txid);
        }
    }

    let next = state.last_scanned_block + 1;
    if let Err(err) = wallet.store.set_last_scanned_block(next) {
        log_error!("error updating last scanned block: {err}");
        return Err(err);
    }
    state.last_scanned_block = next;
    Ok(())
}
