//! The wallet's unspent-output records and coin selection.

use btcw_consensus::Amount;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::keys::base64_bytes;

/// One output owned by the wallet. `txid` is display-order hex; the store
/// key is `"<txid>:<vout>"`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Utxo {
    #[serde(rename = "TxID")]
    pub txid: String,
    #[serde(rename = "VoutIdx")]
    pub vout_idx: u32,
    #[serde(rename = "Value")]
    pub value: Amount,
    #[serde(rename = "ScriptPubKey", with = "base64_bytes")]
    pub script_pubkey: Vec<u8>,
    #[serde(rename = "Spent")]
    pub spent: bool,
    #[serde(rename = "DerivationPath")]
    pub derivation_path: String,
}

impl Utxo {
    pub fn new(
        txid: String,
        vout_idx: u32,
        value: Amount,
        script_pubkey: Vec<u8>,
        derivation_path: String,
    ) -> Self {
        Self {
            txid,
            vout_idx,
            value,
            script_pubkey,
            spent: false,
            derivation_path,
        }
    }

    pub fn outpoint(&self) -> String {
        format!("{}:{}", self.txid, self.vout_idx)
    }
}

#[derive(Debug, Eq, PartialEq)]
pub enum SelectError {
    NoUtxos,
    InsufficientAmount,
}

impl std::fmt::Display for SelectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectError::NoUtxos => write!(f, "no utxos to select"),
            SelectError::InsufficientAmount => {
                write!(f, "not enough value in utxos to fulfill amount")
            }
        }
    }
}

impl std::error::Error for SelectError {}

/// Pick unspent outputs covering strictly more than `amount`.
///
/// Candidates are drawn uniformly at random (OS CSPRNG) from the remaining
/// set and accumulated until the running total exceeds the target. Spent
/// entries are discarded as they are drawn.
pub fn select_utxos(amount: Amount, utxos: &[Utxo]) -> Result<(Vec<Utxo>, Amount), SelectError> {
    let mut candidates: Vec<Utxo> = utxos.to_vec();

    if candidates.is_empty() {
        return Err(SelectError::NoUtxos);
    }
    if candidates.len() == 1 {
        let only = &candidates[0];
        if !only.spent && only.value > amount {
            let total = only.value;
            return Ok((candidates, total));
        }
        return Err(SelectError::InsufficientAmount);
    }

    let mut selected = Vec::new();
    let mut total: Amount = 0;
    let mut rng = rand::rngs::OsRng;

    loop {
        let idx = rng.gen_range(0..candidates.len());
        let utxo = candidates.swap_remove(idx);
        if !utxo.spent {
            total += utxo.value;
            selected.push(utxo);
        }

        if total > amount {
            break;
        }

        // Down to the final candidate: either it closes the gap or the set
        // cannot cover the amount.
        if candidates.len() == 1 {
            let last = candidates.remove(0);
            if !last.spent && total + last.value > amount {
                total += last.value;
                selected.push(last);
                break;
            }
            return Err(SelectError::InsufficientAmount);
        }
        if candidates.is_empty() {
            return Err(SelectError::InsufficientAmount);
        }
    }

    Ok((selected, total))
}
