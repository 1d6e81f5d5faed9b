//! Worker fan-out.
//!
//! Workers are isolated processes configured once at spawn time. The only
//! signals crossing the process boundary are start and forced stop.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::engine::LoadOptions;
use crate::error::{BenchError, Result};
use crate::worker::{WorkerData, OPTIONS_ENV, WORKER_DATA_ENV};

/// A running worker as seen by the coordinator.
#[async_trait]
pub trait WorkerHandle: Send {
    fn index(&self) -> usize;

    /// Request immediate termination without waiting for it.
    fn terminate(&mut self) -> Result<()>;

    /// Wait for the worker to exit and return its exit code, if any.
    async fn reap(&mut self) -> Result<Option<i32>>;
}

/// Starts workers on demand.
pub trait WorkerLauncher {
    fn launch(&self, index: usize) -> Result<Box<dyn WorkerHandle>>;
}

/// Spawns `<program> worker` with the configuration in its environment.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    options: LoadOptions,
    data: WorkerData,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, options: LoadOptions, data: WorkerData) -> Self {
        Self {
            program: program.into(),
            options,
            data,
        }
    }

    /// Launch copies of the currently running executable.
    pub fn current_exe(options: LoadOptions, data: WorkerData) -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?, options, data))
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(&self, index: usize) -> Result<Box<dyn WorkerHandle>> {
        let options = serde_json::to_string(&self.options)?;
        let data = serde_json::to_string(&self.data.with_index(index))?;
        let child = Command::new(&self.program)
            .arg("worker")
            .env(OPTIONS_ENV, options)
            .env(WORKER_DATA_ENV, data)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| BenchError::Worker {
                index,
                reason: format!("spawn {}: {err}", self.program.display()),
            })?;
        debug!(worker = index, pid = child.id(), "worker spawned");
        Ok(Box::new(ProcessWorker { index, child }))
    }
}

pub struct ProcessWorker {
    index: usize,
    child: Child,
}

#[async_trait]
impl WorkerHandle for ProcessWorker {
    fn index(&self) -> usize {
        self.index
    }

    fn terminate(&mut self) -> Result<()> {
        self.child.start_kill().map_err(|err| BenchError::Worker {
            index: self.index,
            reason: format!("kill: {err}"),
        })
    }

    async fn reap(&mut self) -> Result<Option<i32>> {
        let status = self.child.wait().await.map_err(|err| BenchError::Worker {
            index: self.index,
            reason: format!("wait: {err}"),
        })?;
        Ok(status.code())
    }
}

/// A fixed-size set of workers with a single teardown path.
pub struct WorkerPool<L> {
    launcher: L,
    size: usize,
    workers: Vec<Box<dyn WorkerHandle>>,
    terminated: bool,
}

impl<L: WorkerLauncher> WorkerPool<L> {
    pub fn new(launcher: L, size: usize) -> Self {
        Self {
            launcher,
            size,
            workers: Vec::with_capacity(size),
            terminated: false,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn launched(&self) -> usize {
        self.workers.len()
    }

    /// Start every worker. If one fails to start, those already running are
    /// terminated and the error is returned.
    pub fn launch_all(&mut self) -> Result<()> {
        for index in self.workers.len()..self.size {
            match self.launcher.launch(index) {
                Ok(worker) => self.workers.push(worker),
                Err(err) => {
                    self.terminate_all();
                    return Err(err);
                }
            }
        }
        info!(workers = self.workers.len(), "workers launched");
        Ok(())
    }

    /// Send every launched worker one termination request. Later calls are
    /// no-ops. Returns how many workers were signalled.
    pub fn terminate_all(&mut self) -> usize {
        if self.terminated {
            return 0;
        }
        self.terminated = true;
        for worker in &mut self.workers {
            if let Err(err) = worker.terminate() {
                warn!(worker = worker.index(), error = %err, "failed to terminate worker");
            }
        }
        self.workers.len()
    }

    /// Wait for every worker to exit.
    pub async fn reap_all(&mut self) {
        for worker in &mut self.workers {
            match worker.reap().await {
                Ok(code) => debug!(worker = worker.index(), ?code, "worker exited"),
                Err(err) => warn!(worker = worker.index(), error = %err, "failed to reap worker"),
            }
        }
    }
}
