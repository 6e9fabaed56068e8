use btcw_consensus::Network;
use btcw_primitives::hd::HARDENED_OFFSET;
use btcw_primitives::{derive_chain_keys, p2pkh_address, ExtendedPrivKey};

fn vector1_seed() -> Vec<u8> {
    (0u8..16).collect()
}

#[test]
fn bip32_vector1_master() {
    // BIP-32 test vector 1, chain m.
    let master = ExtendedPrivKey::from_seed(&vector1_seed()).expect("master");
    assert_eq!(
        master.to_xprv(Network::Mainnet),
        "xprv9s21ZrQH143K3QTDL4LXw2F7HEK3wJUD2nW2nRk4stbPy6cq3jPPqjiChkVvvNKmPGJxWUtg6LnF5kejMRNNU3TGtRBeJgk33yuGBxrMPHi"
    );
}

#[test]
fn bip32_vector1_first_hardened_child() {
    // BIP-32 test vector 1, chain m/0'.
    let master = ExtendedPrivKey::from_seed(&vector1_seed()).expect("master");
    let child = master.derive_hardened(0).expect("m/0'");
    assert_eq!(
        child.to_xprv(Network::Mainnet),
        "xprv9uHRZZhk6KAJC1avXpDAp4MDc3sQKNxDiPvvkX8Br5ngLNv1TxvUxt4cV1rGL5hj6KCesnDYUhd7oWgT11eZG7XnxHrnYeSvkzY7d2bhkJ7"
    );
}

#[test]
fn xprv_roundtrip() {
    let master = ExtendedPrivKey::from_seed(&[7u8; 32]).expect("master");
    let child = master
        .derive_hardened(44)
        .and_then(|k| k.derive_child(5))
        .expect("child");
    let encoded = child.to_xprv(Network::Testnet3);
    let decoded = ExtendedPrivKey::from_xprv(&encoded, Network::Testnet3).expect("parse");
    assert_eq!(decoded.depth, child.depth);
    assert_eq!(decoded.parent_fingerprint, child.parent_fingerprint);
    assert_eq!(decoded.child_number, child.child_number);
    assert_eq!(decoded.chain_code, child.chain_code);
    assert_eq!(
        decoded.secret_key.secret_bytes(),
        child.secret_key.secret_bytes()
    );
}

#[test]
fn xprv_rejects_other_network() {
    let master = ExtendedPrivKey::from_seed(&[7u8; 32]).expect("master");
    let encoded = master.to_xprv(Network::Simnet);
    assert!(ExtendedPrivKey::from_xprv(&encoded, Network::Testnet3).is_err());
}

#[test]
fn chain_derivation_is_deterministic() {
    let seed = [0u8; 32];
    let (_, ext_a, int_a) = derive_chain_keys(&seed, Network::Testnet3).expect("derive");
    let (_, ext_b, int_b) = derive_chain_keys(&seed, Network::Testnet3).expect("derive");

    for index in [0u32, 1, 2, 100] {
        let leaf_a = ext_a.derive_child(index).expect("leaf");
        let leaf_b = ext_b.derive_child(index).expect("leaf");
        let addr_a = p2pkh_address(
            &btcw_primitives::hash160(&leaf_a.public_key_bytes()),
            Network::Testnet3,
        );
        let addr_b = p2pkh_address(
            &btcw_primitives::hash160(&leaf_b.public_key_bytes()),
            Network::Testnet3,
        );
        assert_eq!(addr_a, addr_b);
    }

    // External and internal chains diverge immediately.
    assert_ne!(
        ext_a.derive_child(0).unwrap().public_key_bytes(),
        int_a.derive_child(0).unwrap().public_key_bytes()
    );
    assert_ne!(
        int_a.public_key_bytes(),
        int_b.derive_child(0).unwrap().public_key_bytes()
    );
}

#[test]
fn chain_keys_sit_at_depth_four() {
    let (master, external, internal) =
        derive_chain_keys(&[9u8; 32], Network::Regtest).expect("derive");
    assert_eq!(master.depth, 0);
    assert_eq!(external.depth, 4);
    assert_eq!(internal.depth, 4);
    assert_eq!(external.child_number, 0);
    assert_eq!(internal.child_number, 1);
    assert!(external.child_number < HARDENED_OFFSET);
}
