//! BIP-32 hierarchical-deterministic key derivation.
//!
//! Only the private-key side is implemented: the wallet derives every
//! address from extended private keys along the BIP-44 account-0 path and
//! never hands out xpubs.

use std::sync::OnceLock;

use btcw_consensus::{chain_params, Network};
use hmac::{Hmac, Mac};
use secp256k1::{PublicKey, Scalar, Secp256k1, SecretKey};
use sha2::Sha512;

use crate::address::{base58check_decode, base58check_encode, AddressError};
use crate::hash::hash160;

/// First hardened child index.
pub const HARDENED_OFFSET: u32 = 0x8000_0000;

const XPRV_PAYLOAD_LEN: usize = 78;

#[derive(Debug, Eq, PartialEq)]
pub enum HdError {
    /// Derivation produced key material outside the curve order.
    DeriveFailed,
    /// A serialized extended key could not be decoded.
    InvalidEncoding,
    /// The extended key's version bytes belong to a different network.
    WrongNetwork,
    /// Hardened derivation requested past the index space.
    IndexOverflow,
}

impl std::fmt::Display for HdError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HdError::DeriveFailed => write!(f, "key derivation failed"),
            HdError::InvalidEncoding => write!(f, "invalid extended key encoding"),
            HdError::WrongNetwork => write!(f, "extended key network mismatch"),
            HdError::IndexOverflow => write!(f, "derivation index out of range"),
        }
    }
}

impl std::error::Error for HdError {}

impl From<AddressError> for HdError {
    fn from(_: AddressError) -> Self {
        HdError::InvalidEncoding
    }
}

#[derive(Clone)]
pub struct ExtendedPrivKey {
    pub depth: u8,
    pub parent_fingerprint: [u8; 4],
    pub child_number: u32,
    pub chain_code: [u8; 32],
    pub secret_key: SecretKey,
}

impl ExtendedPrivKey {
    /// BIP-32 master key from a seed.
    pub fn from_seed(seed: &[u8]) -> Result<Self, HdError> {
        let digest = hmac_sha512(b"Bitcoin seed", seed);
        let mut il = [0u8; 32];
        il.copy_from_slice(&digest[..32]);
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&digest[32..]);

        let secret_key = SecretKey::from_slice(&il).map_err(|_| HdError::DeriveFailed)?;
        Ok(Self {
            depth: 0,
            parent_fingerprint: [0u8; 4],
            child_number: 0,
            chain_code,
            secret_key,
        })
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_secret_key(secp(), &self.secret_key)
    }

    /// Serialized compressed public key (33 bytes).
    pub fn public_key_bytes(&self) -> [u8; 33] {
        self.public_key().serialize()
    }

    /// CKDpriv: derive the child key at `child_number`. Indices at or above
    /// [`HARDENED_OFFSET`] are hardened.
    pub fn derive_child(&self, child_number: u32) -> Result<Self, HdError> {
        let mut data = Vec::with_capacity(37);
        if child_number >= HARDENED_OFFSET {
            data.push(0u8);
            data.extend_from_slice(&self.secret_key.secret_bytes());
        } else {
            data.extend_from_slice(&self.public_key_bytes());
        }
        data.extend_from_slice(&child_number.to_be_bytes());

        let digest = hmac_sha512(&self.chain_code, &data);
        let mut il = [0u8; 32];
        il.copy_from_slice(&digest[..32]);
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&digest[32..]);

        let tweak = Scalar::from_be_bytes(il).map_err(|_| HdError::DeriveFailed)?;
        let secret_key = self
            .secret_key
            .add_tweak(&tweak)
            .map_err(|_| HdError::DeriveFailed)?;

        Ok(Self {
            depth: self.depth.checked_add(1).ok_or(HdError::IndexOverflow)?,
            parent_fingerprint: self.fingerprint(),
            child_number,
            chain_code,
            secret_key,
        })
    }

    /// Derive the hardened child at `index` (i.e. `index + HARDENED_OFFSET`).
    pub fn derive_hardened(&self, index: u32) -> Result<Self, HdError> {
        let child = index.checked_add(HARDENED_OFFSET).ok_or(HdError::IndexOverflow)?;
        self.derive_child(child)
    }

    fn fingerprint(&self) -> [u8; 4] {
        let hash = hash160(&self.public_key_bytes());
        [hash[0], hash[1], hash[2], hash[3]]
    }

    /// Serialize to the textual xprv form for `network`.
    pub fn to_xprv(&self, network: Network) -> String {
        let params = chain_params(network);
        let mut payload = Vec::with_capacity(XPRV_PAYLOAD_LEN);
        payload.extend_from_slice(&params.xprv_version);
        payload.push(self.depth);
        payload.extend_from_slice(&self.parent_fingerprint);
        payload.extend_from_slice(&self.child_number.to_be_bytes());
        payload.extend_from_slice(&self.chain_code);
        payload.push(0u8);
        payload.extend_from_slice(&self.secret_key.secret_bytes());
        base58check_encode(&payload)
    }

    /// Parse a textual xprv, checking its version bytes against `network`.
    pub fn from_xprv(encoded: &str, network: Network) -> Result<Self, HdError> {
        let payload = base58check_decode(encoded)?;
        if payload.len() != XPRV_PAYLOAD_LEN {
            return Err(HdError::InvalidEncoding);
        }
        let params = chain_params(network);
        if payload[..4] != params.xprv_version {
            return Err(HdError::WrongNetwork);
        }
        let depth = payload[4];
        let mut parent_fingerprint = [0u8; 4];
        parent_fingerprint.copy_from_slice(&payload[5..9]);
        let mut child_bytes = [0u8; 4];
        child_bytes.copy_from_slice(&payload[9..13]);
        let child_number = u32::from_be_bytes(child_bytes);
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&payload[13..45]);
        if payload[45] != 0 {
            return Err(HdError::InvalidEncoding);
        }
        let secret_key =
            SecretKey::from_slice(&payload[46..]).map_err(|_| HdError::InvalidEncoding)?;
        Ok(Self {
            depth,
            parent_fingerprint,
            child_number,
            chain_code,
            secret_key,
        })
    }
}

/// Derive the BIP-44 account-0 chain keys for `network`:
/// master (`m`), external chain (`m/44'/ct'/0'/0`), and internal chain
/// (`m/44'/ct'/0'/1`), with the coin type taken from the network.
pub fn derive_chain_keys(
    seed: &[u8],
    network: Network,
) -> Result<(ExtendedPrivKey, ExtendedPrivKey, ExtendedPrivKey), HdError> {
    let master = ExtendedPrivKey::from_seed(seed)?;
    let purpose = master.derive_hardened(44)?;
    let coin_type = purpose.derive_hardened(network.coin_type())?;
    let account = coin_type.derive_hardened(0)?;
    let external = account.derive_child(0)?;
    let internal = account.derive_child(1)?;
    Ok((master, external, internal))
}

fn hmac_sha512(key: &[u8], data: &[u8]) -> [u8; 64] {
    let mut mac = Hmac::<Sha512>::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    let digest = mac.finalize().into_bytes();
    let mut out = [0u8; 64];
    out.copy_from_slice(&digest);
    out
}

fn secp() -> &'static Secp256k1<secp256k1::All> {
    static SECP: OnceLock<Secp256k1<secp256k1::All>> = OnceLock::new();
    SECP.get_or_init(Secp256k1::new)
}
