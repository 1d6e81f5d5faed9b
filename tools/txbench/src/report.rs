//! Run report rendering.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::engine::RunSummary;
use crate::error::Result;
use crate::ledger::{BlockInfo, LedgerSnapshot, Reconciliation};
use crate::metrics::{DerivedMetrics, RunStatistics};

/// Everything a finished run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub error_count: u64,
    pub summary: RunSummary,
    pub statistics: RunStatistics,
    pub reconciliation: Reconciliation,
    /// Absent when no block was produced during the run or it had no duration.
    pub metrics: Option<DerivedMetrics>,
}

/// Block table, balance/height comparison and the three throughput lines.
pub fn render(outcome: &RunOutcome) -> String {
    let reconciliation = &outcome.reconciliation;
    let mut out = render_blocks(&reconciliation.blocks);
    out.push('\n');
    if reconciliation.settled_blocks > 0 {
        out.push_str(&format!(
            "{} blocks ({} tx) after cutoff height {} excluded from throughput\n",
            reconciliation.settled_blocks,
            reconciliation.settled_transactions,
            reconciliation.cutoff_height
        ));
    }
    out.push_str("TPS:\n");
    out.push_str(&render_balances(&reconciliation.start, &reconciliation.end));
    out.push('\n');
    match &outcome.metrics {
        Some(metrics) => out.push_str(&render_metrics(metrics)),
        None if reconciliation.block_usage == 0 => {
            out.push_str("no blocks produced during the run; throughput unavailable\n")
        }
        None => out.push_str("run duration was zero; throughput unavailable\n"),
    }
    out
}

#[derive(Tabled)]
struct BlockRow {
    block_id: u64,
    count: u64,
    round: u64,
}

#[derive(Tabled)]
struct BalanceRow {
    #[tabled(rename = "")]
    snapshot: &'static str,
    balance: u128,
    #[tabled(rename = "block height")]
    block_height: u64,
}

/// One row per block in ascending height order.
pub fn render_blocks(blocks: &BTreeMap<u64, BlockInfo>) -> String {
    let rows = blocks.iter().map(|(id, info)| BlockRow {
        block_id: *id,
        count: info.transactions_count,
        round: info.round,
    });
    Table::new(rows).with(Style::blank()).to_string()
}

pub fn render_balances(start: &LedgerSnapshot, end: &LedgerSnapshot) -> String {
    let row = |snapshot, s: &LedgerSnapshot| BalanceRow {
        snapshot,
        balance: s.account_balance,
        block_height: s.block_height,
    };
    Table::new([row("init", start), row("done", end)])
        .with(Style::ascii())
        .to_string()
}

pub fn render_metrics(metrics: &DerivedMetrics) -> String {
    format!(
        "{:.2} tx/block\n{:.2} sec/block\n{:.2} tx/sec\n",
        metrics.transactions_per_block, metrics.seconds_per_block, metrics.transactions_per_second
    )
}

/// Write the outcome as pretty JSON, creating parent directories as needed.
pub async fn write_json(path: &Path, outcome: &RunOutcome) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(outcome)?;
    tokio::fs::write(path, bytes).await?;
    Ok(())
}
