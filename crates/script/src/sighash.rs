//! Legacy signature hashing for transparent inputs.

use btcw_consensus::Hash256;
use btcw_primitives::encoding::{Encodable, Encoder};
use btcw_primitives::hash::sha256d;
use btcw_primitives::Transaction;

pub const SIGHASH_ALL: u32 = 0x01;
pub const SIGHASH_NONE: u32 = 0x02;
pub const SIGHASH_SINGLE: u32 = 0x03;
pub const SIGHASH_ANYONECANPAY: u32 = 0x80;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SighashType(pub u32);

impl SighashType {
    pub fn base_type(self) -> u32 {
        self.0 & 0x1f
    }

    pub fn has_anyone_can_pay(self) -> bool {
        (self.0 & SIGHASH_ANYONECANPAY) != 0
    }
}

#[derive(Debug)]
pub enum SighashError {
    InputIndexOutOfRange,
    MissingOutput,
}

impl std::fmt::Display for SighashError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SighashError::InputIndexOutOfRange => write!(f, "input index out of range"),
            SighashError::MissingOutput => write!(f, "no matching output for SIGHASH_SINGLE"),
        }
    }
}

impl std::error::Error for SighashError {}

/// Compute the digest an input signature commits to. `script_code` is the
/// previous output's locking script.
pub fn signature_hash(
    tx: &Transaction,
    input_index: Option<usize>,
    script_code: &[u8],
    sighash_type: SighashType,
) -> Result<Hash256, SighashError> {
    if let Some(index) = input_index {
        if index >= tx.vin.len() {
            return Err(SighashError::InputIndexOutOfRange);
        }
        if sighash_type.base_type() == SIGHASH_SINGLE && index >= tx.vout.len() {
            return Err(SighashError::MissingOutput);
        }
    } else if sighash_type.base_type() == SIGHASH_SINGLE {
        return Err(SighashError::MissingOutput);
    }

    let anyone_can_pay = sighash_type.has_anyone_can_pay();
    if anyone_can_pay && input_index.is_none() {
        return Err(SighashError::InputIndexOutOfRange);
    }
    let hash_single = sighash_type.base_type() == SIGHASH_SINGLE;
    let hash_none = sighash_type.base_type() == SIGHASH_NONE;

    let mut encoder = Encoder::new();
    encoder.write_i32_le(tx.version);

    let input_count = if anyone_can_pay { 1 } else { tx.vin.len() };
    encoder.write_varint(input_count as u64);
    for idx in 0..input_count {
        let actual_index = if anyone_can_pay {
            input_index.expect("checked by anyone_can_pay guard")
        } else {
            idx
        };
        let input = &tx.vin[actual_index];
        input.prevout.consensus_encode(&mut encoder);
        let is_signing = input_index == Some(actual_index);
        if is_signing {
            encoder.write_var_bytes(script_code);
        } else {
            encoder.write_varint(0);
        }

        if !is_signing && (hash_single || hash_none) {
            encoder.write_u32_le(0);
        } else {
            encoder.write_u32_le(input.sequence);
        }
    }

    let output_count = if hash_none {
        0
    } else if hash_single {
        input_index.ok_or(SighashError::MissingOutput)? + 1
    } else {
        tx.vout.len()
    };
    encoder.write_varint(output_count as u64);
    for idx in 0..output_count {
        if hash_single && Some(idx) != input_index {
            encoder.write_i64_le(-1);
            encoder.write_varint(0);
        } else {
            tx.vout[idx].consensus_encode(&mut encoder);
        }
    }

    encoder.write_u32_le(tx.lock_time);
    encoder.write_u32_le(sighash_type.0);

    Ok(sha256d(&encoder.into_inner()))
}
