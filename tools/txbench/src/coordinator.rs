//! Run coordination.
//!
//! The coordinator snapshots the ledger, starts the workers, drives its own
//! load engine for the measurement window and then tears everything down in a
//! fixed order: kill workers, reconcile the ledger, report.

use std::time::Duration;

use indicatif::ProgressBar;
use tracing::{info, warn};
use txbench_signer::TransactionSigner;

use crate::engine::LoadEngine;
use crate::error::{BenchError, Result};
use crate::ledger::{LedgerProbe, LedgerReconciler};
use crate::metrics::{DerivedMetrics, RunStatistics};
use crate::payload::{Clock, PayloadGenerator};
use crate::pool::{WorkerLauncher, WorkerPool};
use crate::report::{self, RunOutcome};
use crate::traffic::SignedTraffic;

/// Run one benchmark end to end and print its report to stdout.
///
/// The returned error count covers responses seen by the coordinator's own
/// engine; workers keep their counts to themselves. A failed engine run is
/// returned as an error after the workers have been terminated.
pub async fn run_main<P, S, C, L>(
    reconciler: &mut LedgerReconciler<P>,
    generator: PayloadGenerator<S, C>,
    workers: &mut WorkerPool<L>,
    engine: &LoadEngine,
) -> Result<RunOutcome>
where
    P: LedgerProbe,
    S: TransactionSigner,
    C: Clock,
    L: WorkerLauncher,
{
    reconciler.start().await?;
    workers.launch_all()?;

    let mut traffic = SignedTraffic::new(generator, "main");
    let run = engine.run(&mut traffic).await;

    let killed = workers.terminate_all();
    info!(workers = killed, "terminated workers");
    workers.reap_all().await;

    let summary = run?;
    let error_count = traffic.error_count();

    let spinner = if engine.is_tracked() {
        let spinner = ProgressBar::new_spinner();
        spinner.set_message("TPS is calculating");
        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner
    } else {
        ProgressBar::hidden()
    };
    let reconciliation = reconciler.end().await;
    spinner.finish_and_clear();
    let reconciliation = reconciliation?;

    let metrics = match DerivedMetrics::compute(
        reconciliation.transfer_processed,
        reconciliation.block_usage,
        summary.duration_secs,
    ) {
        Ok(metrics) => Some(metrics),
        Err(err @ (BenchError::NoBlocksProduced | BenchError::ZeroDuration)) => {
            warn!(error = %err, "throughput unavailable");
            None
        }
        Err(err) => return Err(err),
    };

    let outcome = RunOutcome {
        error_count,
        statistics: RunStatistics::from_summary(&summary, error_count),
        summary,
        reconciliation,
        metrics,
    };
    print!("{}", report::render(&outcome));
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::LoadOptions;
    use crate::ledger::testing::FakeLedger;
    use crate::ledger::{BlockInfo, GraphQlLedger, SettlePolicy};
    use crate::payload::{ManualClock, TransferIntent};
    use crate::pool::testing::RecordingLauncher;
    use std::sync::atomic::{AtomicU64, Ordering};
    use txbench_signer::Ed25519Signer;

    fn generator() -> PayloadGenerator<Ed25519Signer, ManualClock> {
        PayloadGenerator::new(
            TransferIntent::asset_transfer("0xaa", "0xbb", 1, "0x01", "0x10"),
            Ed25519Signer::from_bytes(&[2u8; 32]),
            ManualClock::new(0),
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_unreachable_service_still_terminates_workers() {
        // Nothing listens on port 9; every request fails at the transport level.
        let engine = LoadEngine::new(LoadOptions {
            url: "http://127.0.0.1:9/graphql".to_string(),
            connections: 2,
            duration_ms: 200,
            ..LoadOptions::default()
        })
        .unwrap();
        let launcher = RecordingLauncher::default();
        let mut workers = WorkerPool::new(launcher.clone(), 2);
        let ledger = FakeLedger::new(5, 10);
        let mut reconciler = LedgerReconciler::new(ledger, SettlePolicy::default());

        let outcome = run_main(&mut reconciler, generator(), &mut workers, &engine)
            .await
            .unwrap();

        let mut kills = launcher.kills.lock().unwrap().clone();
        kills.sort_unstable();
        assert_eq!(kills, vec![0, 1]);
        assert_eq!(outcome.error_count, 0);
        assert_eq!(outcome.summary.responses, 0);
        assert!(outcome.metrics.is_none());
    }

    fn unreachable_engine() -> LoadEngine {
        LoadEngine::new(LoadOptions {
            url: "http://127.0.0.1:9/graphql".to_string(),
            connections: 1,
            duration_ms: 100,
            ..LoadOptions::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_unreachable_ledger_at_start_is_fatal() {
        let launcher = RecordingLauncher::default();
        let mut workers = WorkerPool::new(launcher.clone(), 2);
        let ledger = GraphQlLedger::new("http://127.0.0.1:9/graphql", "0xaa", "0xbb").unwrap();
        let mut reconciler = LedgerReconciler::new(ledger, SettlePolicy::default());

        let engine = unreachable_engine();
        let result = run_main(&mut reconciler, generator(), &mut workers, &engine).await;

        assert!(matches!(result, Err(BenchError::Http(_))));
        assert!(launcher.launched.lock().unwrap().is_empty());
        assert_eq!(workers.launched(), 0);
    }

    /// Answers the start snapshot, then loses contact with the service.
    struct LedgerLostAfterStart {
        height_calls: AtomicU64,
    }

    #[async_trait::async_trait]
    impl LedgerProbe for LedgerLostAfterStart {
        async fn latest_height(&self) -> Result<u64> {
            if self.height_calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(10)
            } else {
                Err(BenchError::Ledger("connection reset".to_string()))
            }
        }

        async fn balance(&self) -> Result<u128> {
            Ok(1_000)
        }

        async fn block(&self, _height: u64) -> Result<BlockInfo> {
            Err(BenchError::Ledger("connection reset".to_string()))
        }
    }

    #[tokio::test]
    async fn test_failed_end_snapshot_is_fatal_after_workers_stop() {
        let launcher = RecordingLauncher::default();
        let mut workers = WorkerPool::new(launcher.clone(), 2);
        let ledger = LedgerLostAfterStart {
            height_calls: AtomicU64::new(0),
        };
        let mut reconciler = LedgerReconciler::new(ledger, SettlePolicy::default());

        let engine = unreachable_engine();
        let result = run_main(&mut reconciler, generator(), &mut workers, &engine).await;

        assert!(matches!(result, Err(BenchError::Ledger(_))));
        let mut kills = launcher.kills.lock().unwrap().clone();
        kills.sort_unstable();
        assert_eq!(kills, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_reconciler_misuse_launches_nothing() {
        let engine = LoadEngine::new(LoadOptions::default()).unwrap();
        let launcher = RecordingLauncher::default();
        let mut workers = WorkerPool::new(launcher.clone(), 2);
        let mut reconciler = LedgerReconciler::new(FakeLedger::new(1, 1), SettlePolicy::default());
        reconciler.start().await.unwrap();

        let result = run_main(&mut reconciler, generator(), &mut workers, &engine).await;
        assert!(matches!(result, Err(BenchError::ReconcilerState { .. })));
        assert!(launcher.launched.lock().unwrap().is_empty());
    }
}
