use thiserror::Error;
use txbench_signer::SignerError;

#[derive(Error, Debug)]
pub enum BenchError {
    #[error("Failed to build signed payload: {0}")]
    Signing(#[from] SignerError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Ledger query failed: {0}")]
    Ledger(String),

    #[error("Reconciler {operation}() called while {state}")]
    ReconcilerState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("No blocks were produced during the run")]
    NoBlocksProduced,

    #[error("Run duration is zero")]
    ZeroDuration,

    #[error("Worker {index} failed: {reason}")]
    Worker { index: usize, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BenchError>;
