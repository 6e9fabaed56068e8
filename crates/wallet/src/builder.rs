//! Transaction construction: coin selection, change, fees, signing,
//! verification, broadcast, and post-broadcast bookkeeping.

use std::sync::Arc;

use btcw_consensus::{amount_from_btc, Amount};
use btcw_log::{log_error, log_info};
use btcw_primitives::hash::txid_from_hex;
use btcw_primitives::{address_to_script_pubkey, OutPoint, Transaction, TxIn, TxOut};
use btcw_script::{signature_script, verify_script, STANDARD_SCRIPT_VERIFY_FLAGS};

use crate::error::WalletError;
use crate::keys;
use crate::utxo::{select_utxos, Utxo};
use crate::wallet::{Wallet, WalletState};

/// Confirmation target passed to the node's fee estimator.
const FEE_CONFIRMATION_TARGET: i64 = 6;

struct BuiltTransaction {
    tx: Transaction,
    fee: Amount,
    change: ChangeRecord,
}

/// The change output as remembered from assembly; bookkeeping turns it
/// into the wallet's new UTXO after broadcast.
struct ChangeRecord {
    index: u32,
    value: Amount,
    address: String,
    script_pubkey: Vec<u8>,
}

/// Build, sign, verify, and broadcast a payment of `amount_btc` to
/// `address`. Returns the txid as soon as the node accepts the
/// transaction; local bookkeeping completes asynchronously.
pub async fn send_to_address(
    wallet: &Arc<Wallet>,
    address: &str,
    amount_btc: f64,
) -> Result<String, WalletError> {
    // Node round-trips may block for seconds, so they happen outside the
    // state lock: the fee rate is fetched up front and the lock is
    // released again before broadcast. Between the two, selection,
    // assembly, signing, and verification run under one exclusive region.
    let node = wallet.node();
    let fee_rate = node.estimate_fee(FEE_CONFIRMATION_TARGET).await;

    let (tx, selected, amount, fee, change) = {
        let mut state = wallet.state.lock().await;
        let wrap_key = wallet.require_unlocked(&mut state)?;

        let amount = amount_from_btc(amount_btc)?;
        if state.balance < amount {
            return Err(WalletError::InsufficientFunds);
        }

        let unspent: Vec<Utxo> = state
            .utxos
            .iter()
            .filter(|utxo| !utxo.spent)
            .cloned()
            .collect();
        let (selected, total) = select_utxos(amount, &unspent)?;

        let built = create_raw_transaction(
            wallet, &mut state, &wrap_key, address, amount, fee_rate, &selected, total,
        )?;
        let mut tx = built.tx;

        for (index, utxo) in selected.iter().enumerate() {
            let key_pair = wallet
                .store
                .key_pair(&utxo.derivation_path)?
                .ok_or(WalletError::InvalidData("no key pair for selected utxo"))?;
            let (secret_key, compressed) =
                keys::decrypt_private_key(&key_pair, wallet.network(), &wrap_key)?;
            let script_sig =
                signature_script(&tx, index, &utxo.script_pubkey, &secret_key, compressed)?;
            tx.vin[index].script_sig = script_sig;
        }

        for (index, utxo) in selected.iter().enumerate() {
            verify_script(
                &tx.vin[index].script_sig,
                &utxo.script_pubkey,
                &tx,
                index,
                STANDARD_SCRIPT_VERIFY_FLAGS,
            )
            .map_err(WalletError::InvalidSignedTx)?;
        }

        (tx, selected, amount, built.fee, built.change)
    };

    let txid = node.send_raw_tx(&tx, false).await?;
    log_info!("broadcast transaction {txid}");

    let bookkeep_wallet = wallet.clone();
    let bookkeep_txid = txid.clone();
    tokio::spawn(async move {
        bookkeep(bookkeep_wallet, bookkeep_txid, selected, change, amount, fee).await;
    });

    Ok(txid)
}

/// Assemble the unsigned transaction: recipient output, one input per
/// selected UTXO, and a change output to a fresh internal address with
/// the fee already deducted.
#[allow(clippy::too_many_arguments)]
fn create_raw_transaction(
    wallet: &Wallet,
    state: &mut WalletState,
    wrap_key: &[u8; crate::crypto::WRAP_KEY_LEN],
    address: &str,
    amount: Amount,
    fee_rate: Amount,
    selected: &[Utxo],
    total: Amount,
) -> Result<BuiltTransaction, WalletError> {
    let recipient_script = address_to_script_pubkey(address, wallet.network())?;

    let mut tx = Transaction::new();
    tx.vout.push(TxOut {
        value: amount,
        script_pubkey: recipient_script,
    });

    for utxo in selected {
        let hash = txid_from_hex(&utxo.txid)
            .ok_or(WalletError::InvalidData("stored utxo txid is not hex"))?;
        tx.vin.push(TxIn::new(OutPoint::new(hash, utxo.vout_idx)));
    }

    if total <= amount {
        return Err(WalletError::InsufficientAmount);
    }
    let change_amount = total - amount;

    let (change_key, _path) = wallet.next_change_key(state, wrap_key)?;
    let change_script = address_to_script_pubkey(&change_key.address, wallet.network())?;
    let change_index = tx.vout.len() as u32;
    tx.vout.push(TxOut {
        value: change_amount,
        script_pubkey: change_script.clone(),
    });

    let fee = fee_for_size(tx.serialized_size(), fee_rate);
    if fee >= change_amount {
        return Err(WalletError::FeeExceedsChange);
    }
    let change_value = change_amount - fee;
    tx.vout[change_index as usize].value = change_value;

    Ok(BuiltTransaction {
        tx,
        fee,
        change: ChangeRecord {
            index: change_index,
            value: change_value,
            address: change_key.address,
            script_pubkey: change_script,
        },
    })
}

/// Fee for a serialized size at `fee_rate` satoshi per kB, integer kB.
fn fee_for_size(size: usize, fee_rate: Amount) -> Amount {
    (size / 1000) as Amount * fee_rate
}

/// Post-broadcast bookkeeping, strictly ordered: mark the spent inputs,
/// insert the change output, then settle the balance. Failures are
/// logged only; the transaction is already on the network and a rescan
/// reconciles local state.
async fn bookkeep(
    wallet: Arc<Wallet>,
    txid: String,
    selected: Vec<Utxo>,
    change: ChangeRecord,
    amount: Amount,
    fee: Amount,
) {
    let mut state = wallet.state.lock().await;

    for utxo in &selected {
        let mut spent = utxo.clone();
        spent.spent = true;
        if let Err(err) = wallet.store.update_utxo(&spent.outpoint(), &spent) {
            log_error!("error marking utxo {} spent: {err}", spent.outpoint());
        }
        if let Some(cached) = state
            .utxos
            .iter_mut()
            .find(|cached| cached.txid == utxo.txid && cached.vout_idx == utxo.vout_idx)
        {
            cached.spent = true;
        }
    }

    match wallet.store.find_path_for_address(&change.address) {
        Ok(Some(path)) => {
            let change_utxo = Utxo::new(
                txid.clone(),
                change.index,
                change.value,
                change.script_pubkey,
                path,
            );
            if let Err(err) = wallet.store.put_utxo(&change_utxo) {
                log_error!("error adding change UTXO to wallet: {err}");
            } else {
                state.utxos.push(change_utxo);
            }
        }
        Ok(None) => {
            log_error!("no key pair found for change address {}", change.address);
        }
        Err(err) => {
            log_error!("error resolving change address {}: {err}", change.address);
        }
    }

    let balance = state.balance - amount - fee;
    if let Err(err) = wallet.store.set_balance(balance) {
        log_error!("error updating balance after broadcast of {txid}: {err}");
    } else {
        state.balance = balance;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use btcw_consensus::Network;
    use btcw_primitives::derive_chain_keys;

    use crate::node::{BlockTx, BlockTxOut, NodeClient};
    use crate::scanner;
    use crate::wallet::testutil::{stub_wallet, PASSPHRASE};

    fn credit_tx(txid: &str, address: &str, value: Amount) -> BlockTx {
        BlockTx {
            txid: txid.to_string(),
            outputs: vec![BlockTxOut {
                index: 0,
                value,
                script_pubkey: address_to_script_pubkey(address, Network::Testnet3)
                    .expect("script"),
            }],
        }
    }

    async fn funded_wallet(
        fee_per_kb: Amount,
        credits: &[Amount],
    ) -> (Arc<Wallet>, Arc<NodeClient>) {
        let (wallet, node) = stub_wallet(fee_per_kb);
        wallet.unlock(PASSPHRASE, 600).await.expect("unlock");
        let address = wallet.get_new_address().await.expect("address");
        for (i, value) in credits.iter().enumerate() {
            let txid = format!("{i:02x}").repeat(32);
            scanner::scan_txs(&wallet, "block", &[credit_tx(&txid, &address, *value)])
                .await
                .expect("scan");
        }
        (wallet, node)
    }

    async fn wait_for_balance(wallet: &Wallet, expected: Amount) {
        for _ in 0..200 {
            if wallet.balance().await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "balance never settled at {expected}, still {}",
            wallet.balance().await
        );
    }

    fn recipient_address() -> String {
        btcw_primitives::p2pkh_address(&[0x5a; 20], Network::Testnet3)
    }

    #[test]
    fn integer_kb_fee() {
        assert_eq!(fee_for_size(225, 10_000), 0);
        assert_eq!(fee_for_size(999, 10_000), 0);
        assert_eq!(fee_for_size(1_000, 10_000), 10_000);
        assert_eq!(fee_for_size(2_500, 10_000), 20_000);
    }

    #[tokio::test]
    async fn send_requires_unlock() {
        let (wallet, _node) = stub_wallet(2);
        assert!(matches!(
            send_to_address(&wallet, &recipient_address(), 0.0005).await,
            Err(WalletError::Locked)
        ));
    }

    #[tokio::test]
    async fn send_rejects_bad_amounts() {
        let (wallet, _node) = funded_wallet(2, &[200_000]).await;
        for bad in [f64::NAN, f64::INFINITY, -0.5] {
            assert!(matches!(
                send_to_address(&wallet, &recipient_address(), bad).await,
                Err(WalletError::BadAmount(_))
            ));
        }
    }

    #[tokio::test]
    async fn send_checks_balance_precondition() {
        let (wallet, _node) = stub_wallet(2);
        wallet.unlock(PASSPHRASE, 600).await.expect("unlock");
        assert!(matches!(
            send_to_address(&wallet, &recipient_address(), 0.0005).await,
            Err(WalletError::InsufficientFunds)
        ));
    }

    #[tokio::test]
    async fn send_with_no_utxos() {
        let (wallet, _node) = stub_wallet(2);
        wallet.unlock(PASSPHRASE, 600).await.expect("unlock");
        // Balance says funds exist but the UTXO set is empty.
        wallet.state.lock().await.balance = 100_000;
        assert!(matches!(
            send_to_address(&wallet, &recipient_address(), 0.0005).await,
            Err(WalletError::NoUtxos)
        ));
    }

    #[tokio::test]
    async fn send_rejects_invalid_address() {
        let (wallet, _node) = funded_wallet(2, &[200_000]).await;
        assert!(matches!(
            send_to_address(&wallet, "not-an-address", 0.0005).await,
            Err(WalletError::InvalidAddress(_))
        ));
    }

    #[tokio::test]
    async fn send_round_trip() {
        let (wallet, node) = funded_wallet(2, &[200_000]).await;
        let recipient = recipient_address();

        let txid = send_to_address(&wallet, &recipient, 0.0005)
            .await
            .expect("send");

        let NodeClient::Stub(stub) = node.as_ref() else {
            unreachable!()
        };
        let sent = stub.sent.lock().expect("stub lock").clone();
        assert_eq!(sent.len(), 1);
        let tx = &sent[0];
        assert_eq!(txid, tx.txid_hex());

        // Recipient output first, remembered change output second.
        assert_eq!(tx.vout.len(), 2);
        assert_eq!(tx.vout[0].value, 50_000);
        assert_eq!(
            tx.vout[0].script_pubkey,
            address_to_script_pubkey(&recipient, Network::Testnet3).unwrap()
        );

        // Change pays the first internal-chain address; fee is zero for a
        // sub-kilobyte transaction at 2 sat/kB.
        let (_, _, internal) = derive_chain_keys(&[0u8; 32], Network::Testnet3).unwrap();
        let change_leaf = internal.derive_child(0).unwrap();
        let change_address = btcw_primitives::p2pkh_address(
            &btcw_primitives::hash160(&change_leaf.public_key_bytes()),
            Network::Testnet3,
        );
        assert_eq!(tx.vout[1].value, 150_000);
        assert_eq!(
            tx.vout[1].script_pubkey,
            address_to_script_pubkey(&change_address, Network::Testnet3).unwrap()
        );

        wait_for_balance(&wallet, 150_000).await;

        let stored = wallet.store.utxos().unwrap();
        let spent_input = stored
            .iter()
            .find(|u| u.txid == "00".repeat(32))
            .expect("input utxo");
        assert!(spent_input.spent);
        let change_utxo = stored.iter().find(|u| u.txid == txid).expect("change utxo");
        assert!(!change_utxo.spent);
        assert_eq!(change_utxo.value, 150_000);
        assert_eq!(change_utxo.vout_idx, 1);
        assert_eq!(change_utxo.derivation_path, "m/44'/1'/0'/1/0");

        let state = wallet.state.lock().await;
        assert_eq!(state.last_internal_idx, 1);
        assert_eq!(
            state.balance,
            state
                .utxos
                .iter()
                .filter(|u| !u.spent)
                .map(|u| u.value)
                .sum::<Amount>()
        );
    }

    #[tokio::test]
    async fn fee_exceeding_change_is_refused() {
        // Twenty-four 10k inputs push the unsigned transaction over one
        // kB; at 10_000 sat/kB the fee swallows the 5k change.
        let credits = [10_000 as Amount; 24];
        let (wallet, node) = funded_wallet(10_000, &credits).await;

        assert!(matches!(
            send_to_address(&wallet, &recipient_address(), 0.00235).await,
            Err(WalletError::FeeExceedsChange)
        ));

        let NodeClient::Stub(stub) = node.as_ref() else {
            unreachable!()
        };
        assert!(stub.sent.lock().expect("stub lock").is_empty());
        // Nothing was spent or settled.
        wait_for_balance(&wallet, 240_000).await;
        assert!(wallet.store.utxos().unwrap().iter().all(|u| !u.spent));
    }

    #[tokio::test]
    async fn spent_utxos_are_not_respent() {
        let (wallet, node) = funded_wallet(2, &[200_000]).await;
        let recipient = recipient_address();

        send_to_address(&wallet, &recipient, 0.0005).await.expect("send");
        wait_for_balance(&wallet, 150_000).await;

        // Second spend must use the change output, not the spent coin.
        send_to_address(&wallet, &recipient, 0.0005)
            .await
            .expect("second send");
        wait_for_balance(&wallet, 100_000).await;

        let NodeClient::Stub(stub) = node.as_ref() else {
            unreachable!()
        };
        let sent = stub.sent.lock().expect("stub lock").clone();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].vin.len(), 1);
        assert_eq!(
            btcw_primitives::hash::txid_to_hex(&sent[1].vin[0].prevout.hash),
            sent[0].txid_hex()
        );
    }
}
