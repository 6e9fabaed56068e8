//! Wallet key pairs derived from extended keys.

use btcw_consensus::Network;
use btcw_primitives::address::pubkey_to_address;
use btcw_primitives::{hash160, secret_key_to_wif, wif_to_secret_key, ExtendedPrivKey};
use secp256k1::SecretKey;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::crypto::{self, WRAP_KEY_LEN};
use crate::error::WalletError;

/// One leaf of the HD tree as persisted in the keys bucket.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct KeyPair {
    /// Serialized compressed public key.
    #[serde(rename = "publicKey", with = "base64_bytes")]
    pub public_key: Vec<u8>,
    /// WIF-encoded private key, sealed under the wrap key.
    #[serde(rename = "privateKey", with = "base64_bytes")]
    pub encrypted_private_key: Vec<u8>,
    #[serde(rename = "publicKeyHash", with = "base64_bytes")]
    pub public_key_hash: Vec<u8>,
    #[serde(rename = "address")]
    pub address: String,
}

/// Build the persisted key pair for an HD leaf: compressed pubkey, WIF
/// sealed under the wrap key, hash160, and the P2PKH address.
pub fn new_key_pair(
    leaf: &ExtendedPrivKey,
    network: Network,
    wrap_key: &[u8; WRAP_KEY_LEN],
) -> Result<KeyPair, WalletError> {
    let secret = leaf.secret_key.secret_bytes();
    let mut wif = secret_key_to_wif(&secret, network, true);
    let encrypted_private_key = crypto::encrypt(wif.as_bytes(), wrap_key)?;
    wif.zeroize();

    let public_key = leaf.public_key_bytes().to_vec();
    let public_key_hash = hash160(&public_key).to_vec();
    let address = pubkey_to_address(&public_key, network);

    Ok(KeyPair {
        public_key,
        encrypted_private_key,
        public_key_hash,
        address,
    })
}

/// Unseal the WIF of a key pair and decode it into a signing key.
pub fn decrypt_private_key(
    key_pair: &KeyPair,
    network: Network,
    wrap_key: &[u8; WRAP_KEY_LEN],
) -> Result<(SecretKey, bool), WalletError> {
    let mut wif_bytes = crypto::decrypt(&key_pair.encrypted_private_key, wrap_key)?;
    let wif = std::str::from_utf8(&wif_bytes)
        .map_err(|_| WalletError::InvalidData("stored WIF is not valid UTF-8"))?;
    let result = wif_to_secret_key(wif, network);
    wif_bytes.zeroize();
    let (mut secret, compressed) = result?;
    let secret_key = SecretKey::from_slice(&secret)
        .map_err(|_| WalletError::InvalidData("stored WIF holds an invalid secret key"))?;
    secret.zeroize();
    Ok((secret_key, compressed))
}

/// Serde adapter storing byte fields as base64 strings.
pub(crate) mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use btcw_primitives::derive_chain_keys;

    const WRAP_KEY: [u8; WRAP_KEY_LEN] = [0x11; WRAP_KEY_LEN];

    fn sample_leaf() -> ExtendedPrivKey {
        let (_, external, _) = derive_chain_keys(&[0u8; 32], Network::Testnet3).expect("derive");
        external.derive_child(0).expect("leaf")
    }

    #[test]
    fn key_pair_fields_are_consistent() {
        let leaf = sample_leaf();
        let kp = new_key_pair(&leaf, Network::Testnet3, &WRAP_KEY).expect("key pair");
        assert_eq!(kp.public_key.len(), 33);
        assert_eq!(kp.public_key_hash, hash160(&kp.public_key).to_vec());
        assert_eq!(
            kp.address,
            pubkey_to_address(&kp.public_key, Network::Testnet3)
        );
        // The sealed WIF never stores the key bytes in the clear.
        assert!(!kp
            .encrypted_private_key
            .windows(32)
            .any(|window| window == leaf.secret_key.secret_bytes()));
    }

    #[test]
    fn private_key_roundtrips_through_seal() {
        let leaf = sample_leaf();
        let kp = new_key_pair(&leaf, Network::Testnet3, &WRAP_KEY).expect("key pair");
        let (secret, compressed) =
            decrypt_private_key(&kp, Network::Testnet3, &WRAP_KEY).expect("decrypt");
        assert!(compressed);
        assert_eq!(secret.secret_bytes(), leaf.secret_key.secret_bytes());
    }

    #[test]
    fn wrong_wrap_key_is_rejected() {
        let leaf = sample_leaf();
        let kp = new_key_pair(&leaf, Network::Testnet3, &WRAP_KEY).expect("key pair");
        let wrong = [0x22u8; WRAP_KEY_LEN];
        assert!(matches!(
            decrypt_private_key(&kp, Network::Testnet3, &wrong),
            Err(WalletError::CryptoFailed)
        ));
    }

    #[test]
    fn json_shape_matches_store_layout() {
        let leaf = sample_leaf();
        let kp = new_key_pair(&leaf, Network::Testnet3, &WRAP_KEY).expect("key pair");
        let value: serde_json::Value = serde_json::from_str(&serde_json::to_string(&kp).unwrap())
            .expect("json");
        for field in ["publicKey", "privateKey", "publicKeyHash", "address"] {
            assert!(value.get(field).is_some(), "missing field {field}");
        }
        let decoded: KeyPair = serde_json::from_value(value).expect("decode");
        assert_eq!(decoded, kp);
    }
}
