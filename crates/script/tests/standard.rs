use btcw_script::standard::p2pkh_pubkey_hash;
use btcw_script::{classify_script_pubkey, ScriptType};

#[test]
fn classifies_p2pkh() {
    let script = btcw_primitives::p2pkh_script(&[0x11; 20]);
    assert_eq!(classify_script_pubkey(&script), ScriptType::P2Pkh);
    assert_eq!(p2pkh_pubkey_hash(&script), Some([0x11; 20]));
}

#[test]
fn classifies_p2sh() {
    let script = [&[0xa9u8, 0x14][..], &[0u8; 20], &[0x87u8][..]].concat();
    assert_eq!(classify_script_pubkey(&script), ScriptType::P2Sh);
    assert_eq!(p2pkh_pubkey_hash(&script), None);
}

#[test]
fn classifies_witness_programs() {
    let p2wpkh = [&[0x00u8, 0x14][..], &[0u8; 20]].concat();
    assert_eq!(classify_script_pubkey(&p2wpkh), ScriptType::P2Wpkh);

    let p2wsh = [&[0x00u8, 0x20][..], &[0u8; 32]].concat();
    assert_eq!(classify_script_pubkey(&p2wsh), ScriptType::P2Wsh);
}

#[test]
fn classifies_p2pk() {
    let mut script = vec![33u8];
    script.extend_from_slice(&[0x02; 33]);
    script.push(0xac);
    assert_eq!(classify_script_pubkey(&script), ScriptType::P2Pk);
}

#[test]
fn rejects_garbage() {
    assert_eq!(classify_script_pubkey(&[]), ScriptType::Unknown);
    assert_eq!(classify_script_pubkey(&[0x6a]), ScriptType::Unknown);
    // Truncated P2PKH.
    let mut script = btcw_primitives::p2pkh_script(&[0x11; 20]);
    script.pop();
    assert_eq!(classify_script_pubkey(&script), ScriptType::Unknown);
}
