use std::fmt;

use ed25519_dalek::{Signer, SigningKey};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use crate::error::SignerError;

/// Length of an Ed25519 secret key in bytes.
pub const PRIVATE_KEY_BYTES: usize = 32;

/// The unsigned transaction envelope (`InputRawTransaction`).
///
/// Numeric fields are carried as `0x`-prefixed hex strings, matching the
/// service's GraphQL scalar encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransaction {
    pub chain_id: String,
    pub cycles_limit: String,
    pub cycles_price: String,
    pub nonce: String,
    pub timeout: String,
    pub service_name: String,
    pub method: String,
    pub payload: String,
}

impl RawTransaction {
    /// Check that the hex-encoded fields are well formed.
    pub fn validate(&self) -> Result<(), SignerError> {
        ensure_hex("chainId", &self.chain_id)?;
        ensure_hex("cyclesLimit", &self.cycles_limit)?;
        ensure_hex("cyclesPrice", &self.cycles_price)?;
        ensure_hex("nonce", &self.nonce)?;
        ensure_hex("timeout", &self.timeout)?;
        if self.service_name.is_empty() {
            return Err(SignerError::invalid_field("serviceName", "must not be empty"));
        }
        if self.method.is_empty() {
            return Err(SignerError::invalid_field("method", "must not be empty"));
        }
        Ok(())
    }

    /// Keccak-256 digest over the canonical JSON encoding of the envelope.
    pub fn hash(&self) -> Result<[u8; 32], SignerError> {
        let encoded = serde_json::to_vec(self)?;
        Ok(Keccak256::digest(&encoded).into())
    }
}

/// Signature block accompanying a raw transaction (`InputTransactionEncryption`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionEncryption {
    pub tx_hash: String,
    pub pubkey: String,
    pub signature: String,
}

/// A raw transaction together with its signature block, shaped as the
/// variables of the `sendTransaction` mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedTransaction {
    pub input_raw: RawTransaction,
    pub input_encryption: TransactionEncryption,
}

/// Anything able to turn a raw envelope into a signed transaction.
pub trait TransactionSigner {
    fn sign(&self, raw: RawTransaction) -> Result<SignedTransaction, SignerError>;
}

/// Ed25519 transaction signer.
#[derive(Clone)]
pub struct Ed25519Signer {
    key: SigningKey,
}

impl Ed25519Signer {
    pub fn from_bytes(secret: &[u8; PRIVATE_KEY_BYTES]) -> Self {
        Self {
            key: SigningKey::from_bytes(secret),
        }
    }

    /// Parse a hex-encoded secret key, with or without a `0x` prefix.
    pub fn from_hex(raw: &str) -> Result<Self, SignerError> {
        let normalized = raw.trim().trim_start_matches("0x");
        let bytes = hex::decode(normalized)
            .map_err(|err| SignerError::InvalidPrivateKey(format!("invalid hex: {err}")))?;
        let secret: [u8; PRIVATE_KEY_BYTES] = bytes.try_into().map_err(|_| {
            SignerError::InvalidPrivateKey(format!(
                "private key must be {PRIVATE_KEY_BYTES} bytes ({} hex chars)",
                PRIVATE_KEY_BYTES * 2
            ))
        })?;
        Ok(Self::from_bytes(&secret))
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.key.verifying_key().to_bytes()
    }

    pub fn public_key_hex(&self) -> String {
        prefixed_hex(&self.public_key())
    }

    /// Account address: the trailing 20 bytes of the Keccak-256 of the public key.
    pub fn address(&self) -> String {
        let digest = Keccak256::digest(self.public_key());
        prefixed_hex(&digest[12..])
    }
}

impl fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ed25519Signer")
            .field("pubkey", &self.public_key_hex())
            .finish()
    }
}

impl TransactionSigner for Ed25519Signer {
    fn sign(&self, raw: RawTransaction) -> Result<SignedTransaction, SignerError> {
        raw.validate()?;
        let tx_hash = raw.hash()?;
        let signature = self.key.sign(&tx_hash);
        Ok(SignedTransaction {
            input_raw: raw,
            input_encryption: TransactionEncryption {
                tx_hash: prefixed_hex(&tx_hash),
                pubkey: self.public_key_hex(),
                signature: prefixed_hex(&signature.to_bytes()),
            },
        })
    }
}

/// Hex-encode `bytes` with a leading `0x`.
pub fn prefixed_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

fn ensure_hex(field: &'static str, value: &str) -> Result<(), SignerError> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| SignerError::invalid_field(field, "missing 0x prefix"))?;
    if digits.is_empty() {
        return Err(SignerError::invalid_field(field, "no hex digits"));
    }
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(SignerError::invalid_field(field, format!("not hex: {value}")));
    }
    Ok(())
}
