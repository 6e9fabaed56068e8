use btcw_consensus::AmountError;
use btcw_primitives::hd::HdError;
use btcw_primitives::AddressError;
use btcw_script::{ScriptError, SignError};
use btcw_storage::StoreError;

use crate::crypto::CryptoError;
use crate::node::NodeError;
use crate::utxo::SelectError;

#[derive(Debug)]
pub enum WalletError {
    /// No wallet has been created in this data directory.
    NotInitialized,
    /// A wallet already exists in this data directory.
    AlreadyExists,
    BadPassphrase,
    /// The operation needs the wrap key but the wallet is locked.
    Locked,
    /// Authenticated decryption failed: wrong key or tampered data.
    CryptoFailed,
    /// The stored encoded passphrase hash is malformed.
    BadHash,
    BadAmount(AmountError),
    InsufficientFunds,
    /// Selected coins do not cover the requested amount.
    InsufficientAmount,
    NoUtxos,
    /// The estimated fee consumes the whole change output.
    FeeExceedsChange,
    BadUnlockDuration,
    InvalidAddress(AddressError),
    /// Post-sign script verification failed.
    InvalidSignedTx(ScriptError),
    Node(NodeError),
    Store(StoreError),
    Derive(HdError),
    Sign(SignError),
    InvalidData(&'static str),
}

impl std::fmt::Display for WalletError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WalletError::NotInitialized => write!(f, "wallet does not exist"),
            WalletError::AlreadyExists => write!(f, "wallet already exists"),
            WalletError::BadPassphrase => write!(f, "incorrect passphrase"),
            WalletError::Locked => write!(f, "wallet is locked"),
            WalletError::CryptoFailed => write!(f, "decryption error"),
            WalletError::BadHash => write!(f, "invalid passphrase hash"),
            WalletError::BadAmount(err) => write!(f, "invalid amount: {err}"),
            WalletError::InsufficientFunds => write!(f, "insufficient funds"),
            WalletError::InsufficientAmount => {
                write!(f, "not enough value in utxos to fulfill amount")
            }
            WalletError::NoUtxos => write!(f, "no utxos to select"),
            WalletError::FeeExceedsChange => write!(f, "fee exceeds change output"),
            WalletError::BadUnlockDuration => {
                write!(f, "unlock duration must be 3600 seconds or less")
            }
            WalletError::InvalidAddress(err) => write!(f, "invalid address: {err}"),
            WalletError::InvalidSignedTx(err) => {
                write!(f, "signed transaction failed verification: {err}")
            }
            WalletError::Node(err) => write!(f, "node error: {err}"),
            WalletError::Store(err) => write!(f, "store error: {err}"),
            WalletError::Derive(err) => write!(f, "derivation error: {err}"),
            WalletError::Sign(err) => write!(f, "signing error: {err}"),
            WalletError::InvalidData(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for WalletError {}

impl From<StoreError> for WalletError {
    fn from(err: StoreError) -> Self {
        WalletError::Store(err)
    }
}

impl From<HdError> for WalletError {
    fn from(err: HdError) -> Self {
        WalletError::Derive(err)
    }
}

impl From<AmountError> for WalletError {
    fn from(err: AmountError) -> Self {
        WalletError::BadAmount(err)
    }
}

impl From<AddressError> for WalletError {
    fn from(err: AddressError) -> Self {
        WalletError::InvalidAddress(err)
    }
}

impl From<NodeError> for WalletError {
    fn from(err: NodeError) -> Self {
        WalletError::Node(err)
    }
}

impl From<SignError> for WalletError {
    fn from(err: SignError) -> Self {
        WalletError::Sign(err)
    }
}

impl From<CryptoError> for WalletError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::BadHash => WalletError::BadHash,
            CryptoError::CryptoFailed => WalletError::CryptoFailed,
        }
    }
}

impl From<SelectError> for WalletError {
    fn from(err: SelectError) -> Self {
        match err {
            SelectError::NoUtxos => WalletError::NoUtxos,
            SelectError::InsufficientAmount => WalletError::InsufficientAmount,
        }
    }
}
