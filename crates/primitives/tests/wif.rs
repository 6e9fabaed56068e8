use btcw_consensus::Network;
use btcw_primitives::{secret_key_to_wif, wif_to_secret_key, AddressError};

#[test]
fn wif_roundtrips_testnet3() {
    let secret = [0x11u8; 32];

    let wif_uncompressed = secret_key_to_wif(&secret, Network::Testnet3, false);
    let (decoded, compressed) =
        wif_to_secret_key(&wif_uncompressed, Network::Testnet3).expect("decode testnet wif");
    assert_eq!(decoded, secret);
    assert!(!compressed);

    let wif_compressed = secret_key_to_wif(&secret, Network::Testnet3, true);
    let (decoded, compressed) =
        wif_to_secret_key(&wif_compressed, Network::Testnet3).expect("decode testnet wif");
    assert_eq!(decoded, secret);
    assert!(compressed);
}

#[test]
fn wif_roundtrips_simnet() {
    let secret = [0x22u8; 32];
    let wif = secret_key_to_wif(&secret, Network::Simnet, true);
    let (decoded, compressed) = wif_to_secret_key(&wif, Network::Simnet).expect("decode");
    assert_eq!(decoded, secret);
    assert!(compressed);
}

#[test]
fn wif_rejects_wrong_network() {
    let secret = [0x33u8; 32];
    let wif = secret_key_to_wif(&secret, Network::Simnet, false);
    let err = wif_to_secret_key(&wif, Network::Testnet3).unwrap_err();
    assert!(matches!(err, AddressError::UnknownPrefix));
}

#[test]
fn wif_regtest_shares_testnet_prefix() {
    let secret = [0x44u8; 32];
    let wif = secret_key_to_wif(&secret, Network::Regtest, true);
    let (decoded, _) = wif_to_secret_key(&wif, Network::Testnet3).expect("decode");
    assert_eq!(decoded, secret);
}
