//! Per-network chain parameter definitions.

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Network {
    Mainnet,
    Testnet3,
    Simnet,
    Regtest,
}

impl Network {
    pub fn name(self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet3 => "testnet3",
            Network::Simnet => "simnet",
            Network::Regtest => "regtest",
        }
    }

    /// BIP-44 coin type: 1 for the test networks, 0 for mainnet.
    pub fn coin_type(self) -> u32 {
        match self {
            Network::Mainnet => 0,
            Network::Testnet3 | Network::Simnet | Network::Regtest => 1,
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ChainParams {
    pub network: Network,
    /// Base58 version byte for P2PKH addresses.
    pub p2pkh_prefix: u8,
    /// Base58 version byte for P2SH addresses.
    pub p2sh_prefix: u8,
    /// Base58 version byte for WIF-encoded private keys.
    pub wif_prefix: u8,
    /// BIP-32 serialization magic for extended private keys.
    pub xprv_version: [u8; 4],
    /// Default RPC port of a btcd-style node on this network.
    pub btcd_rpc_port: u16,
    /// Default RPC port of a bitcoind-style node on this network.
    pub core_rpc_port: u16,
}

const MAINNET: ChainParams = ChainParams {
    network: Network::Mainnet,
    p2pkh_prefix: 0x00,
    p2sh_prefix: 0x05,
    wif_prefix: 0x80,
    xprv_version: [0x04, 0x88, 0xAD, 0xE4],
    btcd_rpc_port: 8334,
    core_rpc_port: 8332,
};

const TESTNET3: ChainParams = ChainParams {
    network: Network::Testnet3,
    p2pkh_prefix: 0x6F,
    p2sh_prefix: 0xC4,
    wif_prefix: 0xEF,
    xprv_version: [0x04, 0x35, 0x83, 0x94],
    btcd_rpc_port: 18334,
    core_rpc_port: 18332,
};

const SIMNET: ChainParams = ChainParams {
    network: Network::Simnet,
    p2pkh_prefix: 0x3F,
    p2sh_prefix: 0x7B,
    wif_prefix: 0x64,
    xprv_version: [0x04, 0x20, 0xB9, 0x00],
    btcd_rpc_port: 18556,
    core_rpc_port: 18443,
};

const REGTEST: ChainParams = ChainParams {
    network: Network::Regtest,
    p2pkh_prefix: 0x6F,
    p2sh_prefix: 0xC4,
    wif_prefix: 0xEF,
    xprv_version: [0x04, 0x35, 0x83, 0x94],
    btcd_rpc_port: 18556,
    core_rpc_port: 18443,
};

pub fn chain_params(network: Network) -> &'static ChainParams {
    match network {
        Network::Mainnet => &MAINNET,
        Network::Testnet3 => &TESTNET3,
        Network::Simnet => &SIMNET,
        Network::Regtest => &REGTEST,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_match_network() {
        for network in [
            Network::Mainnet,
            Network::Testnet3,
            Network::Simnet,
            Network::Regtest,
        ] {
            assert_eq!(chain_params(network).network, network);
        }
    }

    #[test]
    fn coin_types() {
        assert_eq!(Network::Mainnet.coin_type(), 0);
        assert_eq!(Network::Testnet3.coin_type(), 1);
        assert_eq!(Network::Simnet.coin_type(), 1);
        assert_eq!(Network::Regtest.coin_type(), 1);
    }
}
