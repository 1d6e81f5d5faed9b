use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use txbench::config::{BenchArgs, BenchConfig, Cli, Command};
use txbench::{
    coordinator, report, worker, GraphQlLedger, LedgerProbe, LedgerReconciler, LoadEngine,
    PayloadGenerator, ProcessLauncher, SystemClock, WorkerPool,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Worker => Ok(worker::run_worker_from_env().await),
    }
}

async fn run(args: BenchArgs) -> Result<ExitCode> {
    let config = BenchConfig::resolve(&args).context("resolve configuration")?;
    info!(?config, "starting benchmark");

    let data_template = config.worker_data(0);
    let signer = data_template.signer().context("load private key")?;

    let ledger = GraphQlLedger::new(&config.url, &config.asset_id, signer.address())?;
    let current_height = ledger
        .latest_height()
        .await
        .context("query latest block height")?;
    let data = config.worker_data(current_height.saturating_add(config.timeout_gap));

    let options = config.load_options();
    let launcher = ProcessLauncher::current_exe(options.clone(), data.clone())
        .context("locate txbench executable")?;
    let mut workers = WorkerPool::new(launcher, config.workers);

    let generator =
        PayloadGenerator::new(data.intent(), signer, SystemClock, data.flush_interval())?;
    let engine = LoadEngine::new(options)?.track(!config.quiet);
    let mut reconciler = LedgerReconciler::new(ledger, config.settle_policy());

    let outcome = coordinator::run_main(&mut reconciler, generator, &mut workers, &engine)
        .await
        .context("benchmark run failed")?;

    if let Some(path) = &config.report {
        report::write_json(path, &outcome)
            .await
            .with_context(|| format!("write report {}", path.display()))?;
        info!(path = %path.display(), "report written");
    }
    info!(errors = outcome.error_count, "benchmark finished");
    Ok(ExitCode::SUCCESS)
}
