//! Fixed-size pool of worker handles.

use std::collections::BTreeMap;

use forkpool_core::{WorkerId, WorkerStat};
use futures_util::future::{join_all, try_join_all};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::channel::WorkerSignal;
use crate::config::PoolConfig;
use crate::error::WorkerError;
use crate::worker::WorkerHandle;

/// Worker handles indexed by [`WorkerId`].
#[derive(Debug, Default)]
pub struct WorkerPool {
    workers: Vec<WorkerHandle>,
}

impl WorkerPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `fork_count` handles. No process is spawned.
    pub fn setup(&mut self, config: &PoolConfig) {
        self.workers = (0..config.fork_count)
            .map(|index| WorkerHandle::new(config.for_worker(WorkerId::new(index))))
            .collect();
        debug!(workers = self.workers.len(), "Pool set up");
    }

    /// Start every worker concurrently. Fails if any worker fails to come online.
    pub async fn up(
        &mut self,
        signals: mpsc::UnboundedSender<WorkerSignal>,
    ) -> Result<usize, WorkerError> {
        let started = try_join_all(
            self.workers
                .iter_mut()
                .map(|worker| worker.startup(signals.clone())),
        )
        .await?;
        info!(workers = started.len(), "Pool is up");
        Ok(started.len())
    }

    /// Shut every worker down concurrently. Succeeds once all exited cleanly.
    pub async fn shutdown(&mut self) -> Result<(), WorkerError> {
        let results = join_all(self.workers.iter_mut().map(|worker| worker.shutdown())).await;
        results.into_iter().collect::<Result<Vec<_>, _>>()?;
        info!("Pool is down");
        Ok(())
    }

    /// The lowest-indexed free worker.
    pub fn get_free_worker(&mut self) -> Option<&mut WorkerHandle> {
        self.workers.iter_mut().find(|worker| worker.is_free())
    }

    pub fn get(&self, id: WorkerId) -> Option<&WorkerHandle> {
        self.workers.get(id.index())
    }

    pub fn get_mut(&mut self, id: WorkerId) -> Option<&mut WorkerHandle> {
        self.workers.get_mut(id.index())
    }

    /// Statistics for each worker.
    pub fn workers_stat(&self) -> BTreeMap<WorkerId, WorkerStat> {
        self.workers
            .iter()
            .map(|worker| (worker.id(), worker.stat()))
            .collect()
    }

    /// Statistics summed over all workers.
    pub fn total_stat(&self) -> WorkerStat {
        self.workers
            .iter()
            .fold(WorkerStat::default(), |total, worker| total + worker.stat())
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkerHandle> {
        self.workers.iter()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Returns true if any worker is running a task.
    pub fn has_busy_workers(&self) -> bool {
        self.workers.iter().any(WorkerHandle::is_busy)
    }

    #[cfg(test)]
    pub(crate) fn push(&mut self, worker: WorkerHandle) {
        self.workers.push(worker);
    }
}
