//! P2PKH signature-script construction.

use secp256k1::{Message, SecretKey};

use btcw_primitives::Transaction;

use crate::secp::secp256k1_full;
use crate::sighash::{signature_hash, SighashError, SighashType, SIGHASH_ALL};

#[derive(Debug)]
pub enum SignError {
    Sighash(SighashError),
    BadDigest,
}

impl std::fmt::Display for SignError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignError::Sighash(err) => write!(f, "{err}"),
            SignError::BadDigest => write!(f, "signature digest rejected"),
        }
    }
}

impl std::error::Error for SignError {}

impl From<SighashError> for SignError {
    fn from(err: SighashError) -> Self {
        SignError::Sighash(err)
    }
}

/// Build the script-sig spending a P2PKH output: a SIGHASH_ALL signature
/// over `prev_script` followed by the serialized public key.
pub fn signature_script(
    tx: &Transaction,
    input_index: usize,
    prev_script: &[u8],
    secret_key: &SecretKey,
    compressed: bool,
) -> Result<Vec<u8>, SignError> {
    let secp = secp256k1_full();
    let sighash = signature_hash(
        tx,
        Some(input_index),
        prev_script,
        SighashType(SIGHASH_ALL),
    )?;
    let msg = Message::from_digest_slice(&sighash).map_err(|_| SignError::BadDigest)?;
    let signature = secp.sign_ecdsa(&msg, secret_key);

    let mut sig_bytes = signature.serialize_der().to_vec();
    sig_bytes.push(SIGHASH_ALL as u8);

    let pubkey = secret_key.public_key(secp);
    let pubkey_bytes = if compressed {
        pubkey.serialize().to_vec()
    } else {
        pubkey.serialize_uncompressed().to_vec()
    };

    let mut script = Vec::with_capacity(2 + sig_bytes.len() + pubkey_bytes.len());
    push_data(&mut script, &sig_bytes);
    push_data(&mut script, &pubkey_bytes);
    Ok(script)
}

fn push_data(script: &mut Vec<u8>, data: &[u8]) {
    const OP_PUSHDATA1: u8 = 0x4c;
    if data.len() <= 75 {
        script.push(data.len() as u8);
    } else {
        script.push(OP_PUSHDATA1);
        script.push(data.len() as u8);
    }
    script.extend_from_slice(data);
}
