//! Throughput benchmark for a transaction-processing service.
//!
//! A coordinator and a set of worker processes flood the service with freshly
//! signed transfers; the ledger is then reconciled against the run window to
//! report transactions per block, seconds per block and transactions per second.

pub mod classify;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod graphql;
pub mod ledger;
pub mod metrics;
pub mod payload;
pub mod pool;
pub mod report;
pub mod traffic;
pub mod worker;

pub use classify::{classify_response, ResponseClass};
pub use coordinator::run_main;
pub use engine::{LoadEngine, LoadOptions, RequestLifecycle, ResponseEvent, RunSummary};
pub use error::{BenchError, Result};
pub use ledger::{
    BlockInfo, GraphQlLedger, LedgerProbe, LedgerReconciler, LedgerSnapshot, Reconciliation,
    SettlePolicy,
};
pub use metrics::{DerivedMetrics, RunStatistics};
pub use payload::{
    Clock, ManualClock, PayloadGenerator, SignedPayload, SystemClock, TimestampBucket,
    TransferIntent,
};
pub use pool::{ProcessLauncher, WorkerHandle, WorkerLauncher, WorkerPool};
pub use report::RunOutcome;
pub use traffic::SignedTraffic;
pub use worker::WorkerData;
