//! Network parameters and monetary units shared across the wallet crates.

pub mod money;
pub mod params;

pub use money::{amount_from_btc, money_range, Amount, AmountError, COIN, MAX_MONEY};
pub use params::{chain_params, ChainParams, Network};

pub type Hash256 = [u8; 32];
