//! Two dedicated tokio runtimes: `Common` for request-path work (appends, queries) and
//! `DiskIo` for background conversion (dropper, compaction, fsck). Keeping them separate
//! means a slow page rewrite never starves a foreground query for a worker thread.

use std::future::Future;

use tokio::runtime::{Builder, Runtime};
use tracing::error;

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PoolKind {
    Common,
    DiskIo,
}

pub struct ThreadPoolManager {
    common: Runtime,
    disk_io: Runtime,
}

impl ThreadPoolManager {
    pub fn new() -> Result<Self> {
        let common = Builder::new_multi_thread()
            .thread_name("tsdb-common")
            .enable_all()
            .build()
            .map_err(Error::Io)?;
        let disk_io = Builder::new_multi_thread()
            .thread_name("tsdb-disk-io")
            .worker_threads(2)
            .enable_all()
            .build()
            .map_err(Error::Io)?;
        Ok(Self { common, disk_io })
    }

    fn runtime(&self, kind: PoolKind) -> &Runtime {
        match kind {
            PoolKind::Common => &self.common,
            PoolKind::DiskIo => &self.disk_io,
        }
    }

    /// Spawns `future` onto the named pool without waiting for it.
    pub fn spawn<F>(&self, kind: PoolKind, future: F) -> TaskHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        TaskHandle { inner: self.runtime(kind).spawn(future) }
    }

    /// Bridges the synchronous public API onto the async internals: blocks the calling
    /// thread until `future`, run on `kind`'s runtime, resolves.
    pub fn block_on<F>(&self, kind: PoolKind, future: F) -> F::Output
    where
        F: Future,
    {
        self.runtime(kind).block_on(future)
    }
}

/// A handle to a spawned task. Awaiting it turns a panic into `Error::Internal` instead
/// of propagating a `JoinError` the caller would otherwise have to know about.
pub struct TaskHandle<T> {
    inner: tokio::task::JoinHandle<T>,
}

impl<T> TaskHandle<T> {
    pub async fn join(self) -> Result<T> {
        self.inner.await.map_err(|e| {
            error!(error = %e, "background task panicked");
            Error::Internal(e.to_string())
        })
    }

    pub fn abort(&self) {
        self.inner.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawned_task_runs_and_joins() {
        let pools = ThreadPoolManager::new().unwrap();
        let handle = pools.spawn(PoolKind::Common, async { 2 + 2 });
        let result = pools.block_on(PoolKind::Common, handle.join()).unwrap();
        assert_eq!(result, 4);
    }

    #[test]
    fn panicking_task_reports_internal_error() {
        let pools = ThreadPoolManager::new().unwrap();
        let handle = pools.spawn(PoolKind::DiskIo, async {
            panic!("boom");
            #[allow(unreachable_code)]
            0
        });
        let result = pools.block_on(PoolKind::DiskIo, handle.join());
        assert!(matches!(result, Err(Error::Internal(_))));
    }

    #[test]
    fn block_on_bridges_sync_call_site_to_async_work() {
        let pools = ThreadPoolManager::new().unwrap();
        let value = pools.block_on(PoolKind::Common, async {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            42
        });
        assert_eq!(value, 42);
    }
}
