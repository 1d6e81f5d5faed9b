//! Worker process entry point.
//!
//! A worker is the same binary started with the `worker` subcommand. It reads
//! its run options and transfer data from the environment, fires signed load
//! until the engine's duration elapses, and exits `0`, or `1` if the run failed.

use std::process::ExitCode;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info};
use txbench_signer::Ed25519Signer;

use crate::engine::{LoadEngine, LoadOptions};
use crate::error::{BenchError, Result};
use crate::payload::{PayloadGenerator, SystemClock, TransferIntent};
use crate::traffic::SignedTraffic;

/// Environment variable carrying the JSON-encoded [`LoadOptions`].
pub const OPTIONS_ENV: &str = "OPTIONS";
/// Environment variable carrying the JSON-encoded [`WorkerData`].
pub const WORKER_DATA_ENV: &str = "WORKER_DATA";

/// Per-worker transfer configuration.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerData {
    pub asset_id: String,
    pub to: String,
    pub value: u64,
    pub chain_id: String,
    /// Hex-encoded Ed25519 secret key.
    pub private_key: String,
    pub timeout: String,
    /// Nonce timestamp refresh interval, in seconds.
    pub flush_time: u64,
    #[serde(default)]
    pub index: usize,
}

impl std::fmt::Debug for WorkerData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerData")
            .field("asset_id", &self.asset_id)
            .field("to", &self.to)
            .field("value", &self.value)
            .field("chain_id", &self.chain_id)
            .field("timeout", &self.timeout)
            .field("flush_time", &self.flush_time)
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

impl WorkerData {
    pub fn intent(&self) -> TransferIntent {
        TransferIntent::asset_transfer(
            self.asset_id.clone(),
            self.to.clone(),
            self.value,
            self.chain_id.clone(),
            self.timeout.clone(),
        )
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_time)
    }

    pub fn signer(&self) -> Result<Ed25519Signer> {
        Ok(Ed25519Signer::from_hex(&self.private_key)?)
    }

    /// Build a fresh generator owning its own signer and timestamp bucket.
    pub fn generator(&self) -> Result<PayloadGenerator<Ed25519Signer, SystemClock>> {
        PayloadGenerator::new(self.intent(), self.signer()?, SystemClock, self.flush_interval())
    }

    pub fn with_index(&self, index: usize) -> Self {
        Self {
            index,
            ..self.clone()
        }
    }
}

/// Read both configuration blocks from the process environment.
pub fn load_env() -> Result<(LoadOptions, WorkerData)> {
    let options = read_env_json(OPTIONS_ENV)?;
    let data = read_env_json(WORKER_DATA_ENV)?;
    Ok((options, data))
}

fn read_env_json<T: serde::de::DeserializeOwned>(name: &str) -> Result<T> {
    let raw = std::env::var(name)
        .map_err(|_| BenchError::InvalidConfig(format!("missing environment variable {name}")))?;
    Ok(serde_json::from_str(&raw)?)
}

/// Run one worker's load to completion and return its application error count.
pub async fn run_worker(options: LoadOptions, data: WorkerData) -> Result<u64> {
    let generator = data.generator()?;
    let engine = LoadEngine::new(options)?;
    let mut traffic = SignedTraffic::new(generator, format!("worker-{}", data.index));

    let summary = engine.run(&mut traffic).await?;
    info!(
        worker = data.index,
        responses = summary.responses,
        errors = traffic.error_count(),
        "worker finished"
    );
    Ok(traffic.error_count())
}

/// `txbench worker` entry point.
pub async fn run_worker_from_env() -> ExitCode {
    let outcome = match load_env() {
        Ok((options, data)) => {
            let index = data.index;
            run_worker(options, data)
                .await
                .map_err(|err| (index, err))
        }
        Err(err) => Err((0, err)),
    };
    match outcome {
        Ok(_) => ExitCode::SUCCESS,
        Err((worker, err)) => {
            error!(worker, error = %err, "worker run failed");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data() -> WorkerData {
        WorkerData {
            asset_id: "0xaa".to_string(),
            to: "0xbb".to_string(),
            value: 1,
            chain_id: "0x01".to_string(),
            private_key: hex::encode([4u8; 32]),
            timeout: "0x20".to_string(),
            flush_time: 1,
            index: 0,
        }
    }

    #[test]
    fn test_worker_data_uses_camel_case_keys() {
        let json = serde_json::to_value(data()).unwrap();
        assert_eq!(json["assetId"], "0xaa");
        assert_eq!(json["chainId"], "0x01");
        assert_eq!(json["privateKey"], hex::encode([4u8; 32]));
        assert_eq!(json["flushTime"], 1);
    }

    #[test]
    fn test_index_defaults_when_absent() {
        let json = r#"{"assetId":"0xaa","to":"0xbb","value":1,"chainId":"0x01",
            "privateKey":"0404040404040404040404040404040404040404040404040404040404040404",
            "timeout":"0x20","flushTime":2}"#;
        let parsed: WorkerData = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.index, 0);
        assert_eq!(parsed.flush_interval(), Duration::from_secs(2));
    }

    #[test]
    fn test_debug_hides_private_key() {
        let rendered = format!("{:?}", data());
        assert!(!rendered.contains(&hex::encode([4u8; 32])));
    }

    #[test]
    fn test_bad_private_key_fails_generator() {
        let mut bad = data();
        bad.private_key = "1234".to_string();
        assert!(matches!(bad.generator(), Err(BenchError::Signing(_))));
    }

    #[test]
    fn test_each_generator_is_independent() {
        let data = data();
        let mut a = data.generator().unwrap();
        let mut b = data.generator().unwrap();
        assert_ne!(a.produce().unwrap().nonce, b.produce().unwrap().nonce);
    }
}
