//! Transaction types and serialization.

use btcw_consensus::{Amount, Hash256};

use crate::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::{sha256d, txid_to_hex};
use crate::outpoint::OutPoint;

pub const TX_VERSION: i32 = 1;

/// Disable any locktime/sequence semantics on an input.
pub const SEQUENCE_FINAL: u32 = u32::MAX;

#[derive(Clone, Debug, PartialEq)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

impl TxIn {
    pub fn new(prevout: OutPoint) -> Self {
        Self {
            prevout,
            script_sig: Vec::new(),
            sequence: SEQUENCE_FINAL,
        }
    }
}

impl Encodable for TxIn {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.prevout.consensus_encode(encoder);
        encoder.write_var_bytes(&self.script_sig);
        encoder.write_u32_le(self.sequence);
    }
}

impl Decodable for TxIn {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let prevout = OutPoint::consensus_decode(decoder)?;
        let script_sig = decoder.read_var_bytes()?;
        let sequence = decoder.read_u32_le()?;
        Ok(Self {
            prevout,
            script_sig,
            sequence,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TxOut {
    pub value: Amount,
    pub script_pubkey: Vec<u8>,
}

impl Encodable for TxOut {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_i64_le(self.value);
        encoder.write_var_bytes(&self.script_pubkey);
    }
}

impl Decodable for TxOut {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let value = decoder.read_i64_le()?;
        let script_pubkey = decoder.read_var_bytes()?;
        Ok(Self {
            value,
            script_pubkey,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Transaction {
    pub version: i32,
    pub vin: Vec<TxIn>,
    pub vout: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    pub fn new() -> Self {
        Self {
            version: TX_VERSION,
            vin: Vec::new(),
            vout: Vec::new(),
            lock_time: 0,
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        self.consensus_encode(&mut encoder);
        encoder.into_inner()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let tx = Self::consensus_decode(&mut decoder)?;
        decoder.finish()?;
        Ok(tx)
    }

    pub fn serialized_size(&self) -> usize {
        self.serialize().len()
    }

    /// Double-SHA256 of the serialization, internal byte order.
    pub fn txid(&self) -> Hash256 {
        sha256d(&self.serialize())
    }

    /// The txid in the display-order hex form used on the wire and in the
    /// UTXO store keys.
    pub fn txid_hex(&self) -> String {
        txid_to_hex(&self.txid())
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl Encodable for Transaction {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_i32_le(self.version);
        encoder.write_varint(self.vin.len() as u64);
        for input in &self.vin {
            input.consensus_encode(encoder);
        }
        encoder.write_varint(self.vout.len() as u64);
        for output in &self.vout {
            output.consensus_encode(encoder);
        }
        encoder.write_u32_le(self.lock_time);
    }
}

impl Decodable for Transaction {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let version = decoder.read_i32_le()?;
        let input_count = decoder.read_varint()? as usize;
        let mut vin = Vec::with_capacity(input_count.min(1024));
        for _ in 0..input_count {
            vin.push(TxIn::consensus_decode(decoder)?);
        }
        let output_count = decoder.read_varint()? as usize;
        let mut vout = Vec::with_capacity(output_count.min(1024));
        for _ in 0..output_count {
            vout.push(TxOut::consensus_decode(decoder)?);
        }
        let lock_time = decoder.read_u32_le()?;
        Ok(Self {
            version,
            vin,
            vout,
            lock_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx() -> Transaction {
        Transaction {
            version: TX_VERSION,
            vin: vec![TxIn::new(OutPoint::new([0xAB; 32], 3))],
            vout: vec![
                TxOut {
                    value: 50_000,
                    script_pubkey: vec![0x76, 0xa9, 0x14],
                },
                TxOut {
                    value: 149_000,
                    script_pubkey: vec![0xac],
                },
            ],
            lock_time: 0,
        }
    }

    #[test]
    fn serialization_roundtrip() {
        let tx = sample_tx();
        let bytes = tx.serialize();
        let decoded = Transaction::deserialize(&bytes).expect("decode");
        assert_eq!(decoded, tx);
    }

    #[test]
    fn serialized_size_matches_layout() {
        let tx = sample_tx();
        // 4 version + 1 input count + (32 + 4 + 1 + 0 + 4) input
        // + 1 output count + (8 + 1 + 3) + (8 + 1 + 1) outputs + 4 locktime.
        assert_eq!(tx.serialized_size(), 4 + 1 + 41 + 1 + 12 + 10 + 4);
    }

    #[test]
    fn txid_is_stable() {
        let tx = sample_tx();
        assert_eq!(tx.txid(), tx.txid());
        assert_eq!(tx.txid_hex().len(), 64);
    }

    #[test]
    fn rejects_trailing_garbage() {
        let mut bytes = sample_tx().serialize();
        bytes.push(0x00);
        assert!(Transaction::deserialize(&bytes).is_err());
    }
}
