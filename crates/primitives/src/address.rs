//! Base58 address, script, and WIF codecs.

use btcw_consensus::{chain_params, Network};

use crate::hash::{hash160, sha256d};

#[derive(Debug, Eq, PartialEq)]
pub enum AddressError {
    InvalidLength,
    InvalidCharacter,
    InvalidChecksum,
    UnknownPrefix,
}

impl std::fmt::Display for AddressError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressError::InvalidLength => write!(f, "invalid payload length"),
            AddressError::InvalidCharacter => write!(f, "invalid base58 character"),
            AddressError::InvalidChecksum => write!(f, "checksum mismatch"),
            AddressError::UnknownPrefix => write!(f, "unknown version prefix"),
        }
    }
}

impl std::error::Error for AddressError {}

/// Decode a P2PKH address into the locking script paying it.
pub fn address_to_script_pubkey(address: &str, network: Network) -> Result<Vec<u8>, AddressError> {
    let hash = address_to_pubkey_hash(address, network)?;
    Ok(p2pkh_script(&hash))
}

/// Decode a P2PKH address into its 20-byte public-key hash.
pub fn address_to_pubkey_hash(address: &str, network: Network) -> Result<[u8; 20], AddressError> {
    let payload = base58check_decode(address)?;
    let params = chain_params(network);
    if payload.len() != 21 {
        return Err(AddressError::InvalidLength);
    }
    if payload[0] != params.p2pkh_prefix {
        return Err(AddressError::UnknownPrefix);
    }
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&payload[1..]);
    Ok(hash)
}

/// Encode the address paying a P2PKH locking script, if the script is one.
pub fn script_pubkey_to_address(script: &[u8], network: Network) -> Option<String> {
    if !is_p2pkh(script) {
        return None;
    }
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&script[3..23]);
    Some(p2pkh_address(&hash, network))
}

/// Encode a P2PKH address for a 20-byte public-key hash.
pub fn p2pkh_address(hash: &[u8; 20], network: Network) -> String {
    let params = chain_params(network);
    let mut payload = Vec::with_capacity(21);
    payload.push(params.p2pkh_prefix);
    payload.extend_from_slice(hash);
    base58check_encode(&payload)
}

pub fn secret_key_to_wif(secret: &[u8; 32], network: Network, compressed: bool) -> String {
    let params = chain_params(network);
    let mut payload = Vec::with_capacity(1 + secret.len() + usize::from(compressed));
    payload.push(params.wif_prefix);
    payload.extend_from_slice(secret);
    if compressed {
        payload.push(0x01);
    }
    base58check_encode(&payload)
}

pub fn wif_to_secret_key(wif: &str, network: Network) -> Result<([u8; 32], bool), AddressError> {
    let payload = base58check_decode(wif)?;
    if payload.is_empty() {
        return Err(AddressError::InvalidLength);
    }

    let params = chain_params(network);
    if payload[0] != params.wif_prefix {
        return Err(AddressError::UnknownPrefix);
    }

    if payload.len() == 33 {
        let mut secret = [0u8; 32];
        secret.copy_from_slice(&payload[1..33]);
        return Ok((secret, false));
    }

    if payload.len() == 34 && payload[33] == 0x01 {
        let mut secret = [0u8; 32];
        secret.copy_from_slice(&payload[1..33]);
        return Ok((secret, true));
    }

    Err(AddressError::InvalidLength)
}

pub fn p2pkh_script(hash: &[u8]) -> Vec<u8> {
    const OP_DUP: u8 = 0x76;
    const OP_HASH160: u8 = 0xa9;
    const OP_EQUALVERIFY: u8 = 0x88;
    const OP_CHECKSIG: u8 = 0xac;

    let mut script = Vec::with_capacity(25);
    script.push(OP_DUP);
    script.push(OP_HASH160);
    script.push(0x14);
    script.extend_from_slice(hash);
    script.push(OP_EQUALVERIFY);
    script.push(OP_CHECKSIG);
    script
}

/// Address for a serialized compressed public key.
pub fn pubkey_to_address(pubkey: &[u8], network: Network) -> String {
    p2pkh_address(&hash160(pubkey), network)
}

fn is_p2pkh(script: &[u8]) -> bool {
    script.len() == 25
        && script[0] == 0x76
        && script[1] == 0xa9
        && script[2] == 0x14
        && script[23] == 0x88
        && script[24] == 0xac
}

pub(crate) fn base58check_decode(input: &str) -> Result<Vec<u8>, AddressError> {
    let bytes = base58_decode(input)?;
    if bytes.len() < 4 {
        return Err(AddressError::InvalidLength);
    }
    let (payload, checksum) = bytes.split_at(bytes.len() - 4);
    let digest = sha256d(payload);
    if checksum != &digest[..4] {
        return Err(AddressError::InvalidChecksum);
    }
    Ok(payload.to_vec())
}

pub(crate) fn base58check_encode(payload: &[u8]) -> String {
    let mut data = Vec::with_capacity(payload.len() + 4);
    data.extend_from_slice(payload);
    let checksum = sha256d(payload);
    data.extend_from_slice(&checksum[..4]);
    base58_encode(&data)
}

fn base58_decode(input: &str) -> Result<Vec<u8>, AddressError> {
    if input.is_empty() {
        return Err(AddressError::InvalidLength);
    }
    let mut bytes = Vec::new();
    for ch in input.bytes() {
        let value = base58_value(ch).ok_or(AddressError::InvalidCharacter)? as u32;
        let mut carry = value;
        for byte in bytes.iter_mut().rev() {
            let val = (*byte as u32) * 58 + carry;
            *byte = (val & 0xff) as u8;
            carry = val >> 8;
        }
        while carry > 0 {
            bytes.insert(0, (carry & 0xff) as u8);
            carry >>= 8;
        }
    }

    let leading_zeros = input.bytes().take_while(|b| *b == b'1').count();
    let mut out = vec![0u8; leading_zeros];
    out.extend_from_slice(&bytes);
    Ok(out)
}

fn base58_encode(data: &[u8]) -> String {
    const ALPHABET: &[u8; 58] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
    if data.is_empty() {
        return String::new();
    }
    let mut digits = vec![0u8];
    for byte in data {
        let mut carry = *byte as u32;
        for digit in digits.iter_mut().rev() {
            let value = (*digit as u32) * 256 + carry;
            *digit = (value % 58) as u8;
            carry = value / 58;
        }
        while carry > 0 {
            digits.insert(0, (carry % 58) as u8);
            carry /= 58;
        }
    }
    let leading_zeros = data.iter().take_while(|b| **b == 0u8).count();
    let mut out = String::with_capacity(leading_zeros + digits.len());
    for _ in 0..leading_zeros {
        out.push('1');
    }
    for digit in digits {
        out.push(ALPHABET[digit as usize] as char);
    }
    out
}

fn base58_value(byte: u8) -> Option<u8> {
    const ALPHABET: &[u8; 58] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
    ALPHABET
        .iter()
        .position(|value| *value == byte)
        .map(|pos| pos as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base58_leading_zeros() {
        let payload = [0u8, 0, 1, 2, 3];
        let encoded = base58check_encode(&payload);
        assert!(encoded.starts_with("11"));
        assert_eq!(base58check_decode(&encoded).unwrap(), payload);
    }

    #[test]
    fn address_roundtrip() {
        let hash = [0x42u8; 20];
        for network in [Network::Testnet3, Network::Simnet, Network::Regtest] {
            let address = p2pkh_address(&hash, network);
            assert_eq!(address_to_pubkey_hash(&address, network).unwrap(), hash);
            let script = address_to_script_pubkey(&address, network).unwrap();
            assert_eq!(script, p2pkh_script(&hash));
            assert_eq!(
                script_pubkey_to_address(&script, network).as_deref(),
                Some(address.as_str())
            );
        }
    }

    #[test]
    fn address_rejects_wrong_network() {
        let hash = [0x42u8; 20];
        let address = p2pkh_address(&hash, Network::Simnet);
        assert_eq!(
            address_to_pubkey_hash(&address, Network::Testnet3).unwrap_err(),
            AddressError::UnknownPrefix
        );
    }

    #[test]
    fn address_rejects_corruption() {
        let hash = [0x42u8; 20];
        let mut address = p2pkh_address(&hash, Network::Testnet3);
        let replacement = if address.ends_with('2') { '3' } else { '2' };
        address.pop();
        address.push(replacement);
        assert_eq!(
            address_to_pubkey_hash(&address, Network::Testnet3).unwrap_err(),
            AddressError::InvalidChecksum
        );
    }

    #[test]
    fn non_p2pkh_script_has_no_address() {
        // P2SH-looking script.
        let script = [&[0xa9u8, 0x14][..], &[0u8; 20], &[0x87u8][..]].concat();
        assert_eq!(script_pubkey_to_address(&script, Network::Testnet3), None);
    }
}
