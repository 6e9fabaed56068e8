//! Core transaction types, consensus serialization, and key codecs.

pub mod address;
pub mod encoding;
pub mod hash;
pub mod hd;
pub mod outpoint;
pub mod transaction;

pub use address::{
    address_to_pubkey_hash, address_to_script_pubkey, p2pkh_address, p2pkh_script,
    script_pubkey_to_address, secret_key_to_wif, wif_to_secret_key, AddressError,
};
pub use hash::{hash160, sha256, sha256d, txid_from_hex, txid_to_hex};
pub use hd::{derive_chain_keys, ExtendedPrivKey, HdError};
pub use outpoint::OutPoint;
pub use transaction::{Transaction, TxIn, TxOut};
