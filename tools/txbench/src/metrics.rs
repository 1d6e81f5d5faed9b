use serde::Serialize;

use crate::engine::RunSummary;
use crate::error::{BenchError, Result};

/// Client-side view of one run, owned by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RunStatistics {
    pub started_at_ms: u64,
    pub ended_at_ms: u64,
    pub duration_secs: f64,
    pub error_count: u64,
}

impl RunStatistics {
    pub fn from_summary(summary: &RunSummary, error_count: u64) -> Self {
        let ended_at_ms = summary.started_at_ms + (summary.duration_secs * 1000.0).round() as u64;
        Self {
            started_at_ms: summary.started_at_ms,
            ended_at_ms,
            duration_secs: summary.duration_secs,
            error_count,
        }
    }
}

/// Throughput figures, each rounded to two decimal places.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DerivedMetrics {
    pub transactions_per_block: f64,
    pub seconds_per_block: f64,
    pub transactions_per_second: f64,
}

impl DerivedMetrics {
    /// Fails with [`BenchError::NoBlocksProduced`] when no block was observed,
    /// and with [`BenchError::ZeroDuration`] for an empty run window.
    pub fn compute(transfer_processed: u64, block_usage: u64, duration_secs: f64) -> Result<Self> {
        if block_usage == 0 {
            return Err(BenchError::NoBlocksProduced);
        }
        if duration_secs <= 0.0 || !duration_secs.is_finite() {
            return Err(BenchError::ZeroDuration);
        }
        let txs = transfer_processed as f64;
        let blocks = block_usage as f64;
        Ok(Self {
            transactions_per_block: round2(txs / blocks),
            seconds_per_block: round2(duration_secs / blocks),
            transactions_per_second: round2(txs / duration_secs),
        })
    }
}

/// Round half away from zero to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
