//! Script classification, signature hashing, signing, and verification.

pub mod interpreter;
mod secp;
pub mod sighash;
pub mod sign;
pub mod standard;

pub use interpreter::{verify_script, ScriptError, STANDARD_SCRIPT_VERIFY_FLAGS};
pub use sighash::{signature_hash, SighashError, SighashType, SIGHASH_ALL};
pub use sign::{signature_script, SignError};
pub use standard::{classify_script_pubkey, ScriptType};
