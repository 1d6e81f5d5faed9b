//! Signed payload generation.
//!
//! Every call to [`PayloadGenerator::produce`] yields a freshly nonced, signed
//! `sendTransaction` request body. Nonces mix a random seed from the OS RNG with
//! a coarse timestamp bucket that is refreshed at most once per flush interval.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use txbench_signer::{prefixed_hex, RawTransaction, SignedTransaction, TransactionSigner};

use crate::error::{BenchError, Result};
use crate::graphql::{GraphQlRequest, SEND_TRANSACTION_MUTATION};

/// Random bytes mixed into every nonce.
pub const NONCE_SEED_BYTES: usize = 16;

pub const DEFAULT_SERVICE: &str = "asset";
pub const DEFAULT_METHOD: &str = "transfer";
pub const DEFAULT_CYCLES_PRICE: &str = "0x01";
pub const DEFAULT_CYCLES_LIMIT: &str = "0x5208";

/// Wall-clock source in milliseconds since the Unix epoch.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::from_secs(0))
            .as_millis() as u64
    }
}

/// Manually driven clock; clones share the same instant.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_ms: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now_ms.fetch_add(by.as_millis() as u64, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::Relaxed)
    }
}

/// The current nonce epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampBucket {
    value_ms: u64,
    flush_interval: Duration,
}

impl TimestampBucket {
    pub fn new(now_ms: u64, flush_interval: Duration) -> Self {
        Self {
            value_ms: now_ms,
            flush_interval,
        }
    }

    pub fn value(&self) -> u64 {
        self.value_ms
    }

    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    /// Move the bucket to `now_ms` if strictly more than the flush interval has
    /// elapsed since the last advance. Returns whether it moved.
    pub fn advance_if_stale(&mut self, now_ms: u64) -> bool {
        let elapsed = now_ms.saturating_sub(self.value_ms);
        if u128::from(elapsed) > self.flush_interval.as_millis() {
            self.value_ms = now_ms;
            true
        } else {
            false
        }
    }
}

/// The logical transfer every request carries. Fixed for a whole run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferIntent {
    pub asset_id: String,
    pub to: String,
    pub value: u64,
    pub service_name: String,
    pub method: String,
    pub chain_id: String,
    pub cycles_price: String,
    pub cycles_limit: String,
    /// Block height after which the service drops the transaction.
    pub timeout: String,
}

impl TransferIntent {
    /// An `asset.transfer` intent with the default cycles settings.
    pub fn asset_transfer(
        asset_id: impl Into<String>,
        to: impl Into<String>,
        value: u64,
        chain_id: impl Into<String>,
        timeout: impl Into<String>,
    ) -> Self {
        Self {
            asset_id: asset_id.into(),
            to: to.into(),
            value,
            service_name: DEFAULT_SERVICE.to_string(),
            method: DEFAULT_METHOD.to_string(),
            chain_id: chain_id.into(),
            cycles_price: DEFAULT_CYCLES_PRICE.to_string(),
            cycles_limit: DEFAULT_CYCLES_LIMIT.to_string(),
            timeout: timeout.into(),
        }
    }

    fn service_payload(&self) -> Result<String> {
        Ok(serde_json::to_string(&TransferPayload {
            asset_id: &self.asset_id,
            to: &self.to,
            value: self.value,
        })?)
    }
}

#[derive(Serialize)]
struct TransferPayload<'a> {
    asset_id: &'a str,
    to: &'a str,
    value: u64,
}

/// One signed request, discarded once its body has been sent.
#[derive(Debug, Clone)]
pub struct SignedPayload {
    pub nonce: String,
    pub timestamp_bucket: u64,
    pub transaction: SignedTransaction,
}

impl SignedPayload {
    /// Serialize as a `{query, variables}` GraphQL request body.
    pub fn to_body(&self) -> Result<Vec<u8>> {
        let request = GraphQlRequest {
            query: SEND_TRANSACTION_MUTATION,
            variables: &self.transaction,
        };
        Ok(serde_json::to_vec(&request)?)
    }
}

/// Produces a uniquely nonced signed payload per call.
///
/// Owns its timestamp bucket; each worker and the coordinator construct their
/// own generator so no nonce state is ever shared.
pub struct PayloadGenerator<S, C = SystemClock> {
    intent: TransferIntent,
    payload: String,
    signer: S,
    clock: C,
    bucket: TimestampBucket,
}

impl<S: TransactionSigner, C: Clock> PayloadGenerator<S, C> {
    pub fn new(
        intent: TransferIntent,
        signer: S,
        clock: C,
        flush_interval: Duration,
    ) -> Result<Self> {
        if flush_interval.is_zero() {
            return Err(BenchError::InvalidConfig("flush interval must be > 0".to_string()));
        }
        let payload = intent.service_payload()?;
        let bucket = TimestampBucket::new(clock.now_ms(), flush_interval);
        Ok(Self {
            intent,
            payload,
            signer,
            clock,
            bucket,
        })
    }

    pub fn intent(&self) -> &TransferIntent {
        &self.intent
    }

    pub fn bucket(&self) -> TimestampBucket {
        self.bucket
    }

    /// Build and sign the next payload. Signing failures are returned as-is;
    /// there is no internal retry.
    pub fn produce(&mut self) -> Result<SignedPayload> {
        let timestamp_bucket = self.bucket.value();
        let nonce = self.next_nonce(timestamp_bucket);
        self.bucket.advance_if_stale(self.clock.now_ms());

        let raw = RawTransaction {
            chain_id: self.intent.chain_id.clone(),
            cycles_limit: self.intent.cycles_limit.clone(),
            cycles_price: self.intent.cycles_price.clone(),
            nonce: nonce.clone(),
            timeout: self.intent.timeout.clone(),
            service_name: self.intent.service_name.clone(),
            method: self.intent.method.clone(),
            payload: self.payload.clone(),
        };
        let transaction = self.signer.sign(raw)?;

        Ok(SignedPayload {
            nonce,
            timestamp_bucket,
            transaction,
        })
    }

    /// Shorthand for `produce()?.to_body()`.
    pub fn produce_body(&mut self) -> Result<Vec<u8>> {
        self.produce()?.to_body()
    }

    fn next_nonce(&self, bucket: u64) -> String {
        let mut seed = [0u8; NONCE_SEED_BYTES];
        OsRng.fill_bytes(&mut seed);

        let mut hasher = blake3::Hasher::new();
        hasher.update(hex::encode(seed).as_bytes());
        hasher.update(bucket.to_string().as_bytes());
        prefixed_hex(hasher.finalize().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use txbench_signer::{Ed25519Signer, SignerError};

    fn intent() -> TransferIntent {
        TransferIntent::asset_transfer("0xaa", "0xbb", 1, "0xb6a4", "0x14")
    }

    fn generator(clock: ManualClock) -> PayloadGenerator<Ed25519Signer, ManualClock> {
        PayloadGenerator::new(
            intent(),
            Ed25519Signer::from_bytes(&[9u8; 32]),
            clock,
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[test]
    fn test_nonces_are_unique_across_ten_thousand_payloads() {
        let mut generator = generator(ManualClock::new(1_000));
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let payload = generator.produce().unwrap();
            assert!(seen.insert(payload.nonce), "nonce reused");
        }
    }

    #[test]
    fn test_nonce_is_fixed_width_hex() {
        let mut generator = generator(ManualClock::new(1_000));
        let payload = generator.produce().unwrap();
        assert!(payload.nonce.starts_with("0x"));
        assert_eq!(payload.nonce.len(), 2 + 64);
        assert_eq!(payload.transaction.input_raw.nonce, payload.nonce);
    }

    #[test]
    fn test_bucket_advances_only_after_flush_interval() {
        let clock = ManualClock::new(10_000);
        let mut generator = generator(clock.clone());

        generator.produce().unwrap();
        assert_eq!(generator.bucket().value(), 10_000);

        // Exactly the interval is not enough.
        clock.advance(Duration::from_millis(1_000));
        generator.produce().unwrap();
        assert_eq!(generator.bucket().value(), 10_000);

        clock.advance(Duration::from_millis(1));
        let payload = generator.produce().unwrap();
        // The nonce uses the bucket as it stood before the advance.
        assert_eq!(payload.timestamp_bucket, 10_000);
        assert_eq!(generator.bucket().value(), 11_001);

        let payload = generator.produce().unwrap();
        assert_eq!(payload.timestamp_bucket, 11_001);
    }

    #[test]
    fn test_bucket_advances_at_most_once_per_call() {
        let mut bucket = TimestampBucket::new(0, Duration::from_secs(1));
        assert!(bucket.advance_if_stale(5_000));
        assert!(!bucket.advance_if_stale(5_000));
        assert_eq!(bucket.value(), 5_000);
    }

    #[test]
    fn test_body_is_send_transaction_mutation() {
        let mut generator = generator(ManualClock::new(1_000));
        let body = generator.produce_body().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(value["query"], SEND_TRANSACTION_MUTATION);
        assert_eq!(value["variables"]["inputRaw"]["method"], "transfer");
        assert_eq!(
            value["variables"]["inputRaw"]["payload"],
            r#"{"asset_id":"0xaa","to":"0xbb","value":1}"#
        );
        assert!(value["variables"]["inputEncryption"]["signature"].is_string());
    }

    struct FailingSigner;

    impl TransactionSigner for FailingSigner {
        fn sign(
            &self,
            _raw: RawTransaction,
        ) -> std::result::Result<SignedTransaction, SignerError> {
            Err(SignerError::InvalidPrivateKey("broken".to_string()))
        }
    }

    #[test]
    fn test_signing_failure_propagates() {
        let mut generator = PayloadGenerator::new(
            intent(),
            FailingSigner,
            ManualClock::new(0),
            Duration::from_secs(1),
        )
        .unwrap();
        assert!(matches!(generator.produce(), Err(BenchError::Signing(_))));
    }

    #[test]
    fn test_zero_flush_interval_is_rejected() {
        let result = PayloadGenerator::new(
            intent(),
            Ed25519Signer::from_bytes(&[9u8; 32]),
            ManualClock::new(0),
            Duration::ZERO,
        );
        assert!(matches!(result, Err(BenchError::InvalidConfig(_))));
    }
}
