//! Command line and configuration file handling.
//!
//! Settings come from an optional TOML file (`--config`) and are then
//! overridden by any flag given explicitly on the command line.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use crate::engine::LoadOptions;
use crate::error::{BenchError, Result};
use crate::ledger::SettlePolicy;
use crate::worker::WorkerData;

pub const DEFAULT_URL: &str = "http://127.0.0.1:8000/graphql";
pub const DEFAULT_CHAIN_ID: &str =
    "0xb6a4d7da21443f5e816e8700eea87610e6d769657d6b8ec73028457bf2ca4036";

#[derive(Debug, Parser)]
#[command(name = "txbench")]
#[command(about = "Signed-transaction throughput benchmark with ledger reconciliation")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a benchmark against the service
    Run(BenchArgs),
    /// Internal: run as a load worker configured through the environment
    #[command(hide = true)]
    Worker,
}

#[derive(Debug, Clone, Default, Args)]
pub struct BenchArgs {
    /// TOML file providing defaults for any of the options below
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// GraphQL endpoint of the service
    #[arg(short, long)]
    pub url: Option<String>,

    /// Concurrent connections per process
    #[arg(short, long)]
    pub connections: Option<usize>,

    /// Run duration in seconds
    #[arg(short, long)]
    pub duration: Option<u64>,

    /// Requests in flight per connection
    #[arg(short, long)]
    pub pipelining: Option<usize>,

    /// Worker processes started alongside the coordinator
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Chain id placed in every transaction
    #[arg(long)]
    pub chain_id: Option<String>,

    /// Sender's Ed25519 secret key (hex)
    #[arg(long)]
    pub private_key: Option<String>,

    /// Recipient address
    #[arg(long)]
    pub receiver: Option<String>,

    /// Asset transferred by every transaction
    #[arg(long)]
    pub asset_id: Option<String>,

    /// Amount per transfer
    #[arg(long)]
    pub value: Option<u64>,

    /// Blocks past the starting height after which transactions expire
    #[arg(long)]
    pub timeout_gap: Option<u64>,

    /// Seconds between nonce timestamp refreshes
    #[arg(long)]
    pub flush_time: Option<u64>,

    /// Extra blocks to wait for after the run before the final snapshot
    #[arg(long)]
    pub settle_blocks: Option<u64>,

    /// Maximum seconds to wait for those blocks
    #[arg(long)]
    pub settle_timeout: Option<u64>,

    /// Write a JSON report to this path
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,

    /// Disable progress rendering
    #[arg(short, long)]
    pub quiet: bool,
}

/// Fully resolved benchmark settings.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BenchConfig {
    pub url: String,
    pub connections: usize,
    pub duration: u64,
    pub pipelining: usize,
    pub workers: usize,
    pub chain_id: String,
    pub private_key: String,
    pub receiver: String,
    pub asset_id: String,
    pub value: u64,
    pub timeout_gap: u64,
    pub flush_time: u64,
    pub settle_blocks: u64,
    pub settle_timeout: u64,
    pub report: Option<PathBuf>,
    pub quiet: bool,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            connections: 20,
            duration: 10,
            pipelining: 1,
            workers: 1,
            chain_id: DEFAULT_CHAIN_ID.to_string(),
            private_key: String::new(),
            receiver: String::new(),
            asset_id: String::new(),
            value: 1,
            timeout_gap: 20,
            flush_time: 1,
            settle_blocks: 0,
            settle_timeout: 30,
            report: None,
            quiet: false,
        }
    }
}

impl std::fmt::Debug for BenchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BenchConfig")
            .field("url", &self.url)
            .field("connections", &self.connections)
            .field("duration", &self.duration)
            .field("pipelining", &self.pipelining)
            .field("workers", &self.workers)
            .field("chain_id", &self.chain_id)
            .field("receiver", &self.receiver)
            .field("asset_id", &self.asset_id)
            .field("value", &self.value)
            .field("timeout_gap", &self.timeout_gap)
            .field("flush_time", &self.flush_time)
            .field("settle_blocks", &self.settle_blocks)
            .field("settle_timeout", &self.settle_timeout)
            .field("report", &self.report)
            .finish_non_exhaustive()
    }
}

impl BenchConfig {
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|err| BenchError::InvalidConfig(format!("config file: {err}")))
    }

    /// Layer the command line over the config file (or defaults) and validate.
    pub fn resolve(args: &BenchArgs) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        config.apply(args);
        config.validate()?;
        Ok(config)
    }

    fn apply(&mut self, args: &BenchArgs) {
        fn set<T: Clone>(slot: &mut T, value: &Option<T>) {
            if let Some(value) = value {
                *slot = value.clone();
            }
        }
        set(&mut self.url, &args.url);
        set(&mut self.connections, &args.connections);
        set(&mut self.duration, &args.duration);
        set(&mut self.pipelining, &args.pipelining);
        set(&mut self.workers, &args.workers);
        set(&mut self.chain_id, &args.chain_id);
        set(&mut self.private_key, &args.private_key);
        set(&mut self.receiver, &args.receiver);
        set(&mut self.asset_id, &args.asset_id);
        set(&mut self.value, &args.value);
        set(&mut self.timeout_gap, &args.timeout_gap);
        set(&mut self.flush_time, &args.flush_time);
        set(&mut self.settle_blocks, &args.settle_blocks);
        set(&mut self.settle_timeout, &args.settle_timeout);
        if args.report.is_some() {
            self.report = args.report.clone();
        }
        self.quiet |= args.quiet;
    }

    pub fn validate(&self) -> Result<()> {
        if self.private_key.is_empty() {
            return Err(BenchError::InvalidConfig("--private-key is required".into()));
        }
        if self.receiver.is_empty() {
            return Err(BenchError::InvalidConfig("--receiver is required".into()));
        }
        if self.asset_id.is_empty() {
            return Err(BenchError::InvalidConfig("--asset-id is required".into()));
        }
        if self.flush_time == 0 {
            return Err(BenchError::InvalidConfig("--flush-time must be > 0".into()));
        }
        txbench_signer::Ed25519Signer::from_hex(&self.private_key)?;
        self.load_options().validate()
    }

    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            url: self.url.clone(),
            connections: self.connections,
            pipelining: self.pipelining,
            duration_ms: self.duration.saturating_mul(1000),
            ..LoadOptions::default()
        }
    }

    /// Worker data for a run whose transactions expire at `timeout`.
    pub fn worker_data(&self, timeout: u64) -> WorkerData {
        WorkerData {
            asset_id: self.asset_id.clone(),
            to: self.receiver.clone(),
            value: self.value,
            chain_id: self.chain_id.clone(),
            private_key: self.private_key.clone(),
            timeout: format!("0x{timeout:x}"),
            flush_time: self.flush_time,
            index: 0,
        }
    }

    pub fn settle_policy(&self) -> SettlePolicy {
        SettlePolicy {
            blocks: self.settle_blocks,
            timeout: Duration::from_secs(self.settle_timeout),
            ..SettlePolicy::default()
        }
    }
}
