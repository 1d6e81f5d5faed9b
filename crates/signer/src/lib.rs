//! Transaction envelope construction and signing.
//!
//! Builds the raw transaction accepted by the service's `sendTransaction`
//! mutation and signs it with an Ed25519 key, producing the `inputRaw` and
//! `inputEncryption` variable blocks.

mod error;
mod transaction;

pub use error::SignerError;
pub use transaction::*;
