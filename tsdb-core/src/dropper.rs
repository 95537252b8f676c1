//! Background conversion of closed WAL segments into pages. Where `MemStorage` evicts
//! its own chunks straight to a `PageSink`, `WAL`/`COMPRESSED`/`CACHE` strategies still
//! have raw WAL records sitting on disk after a segment closes; this is what turns
//! those into compressed, indexed pages.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::error::Result;
use crate::measurement::Measurement;
use crate::page::PageManager;
use crate::wal::{WalManager, WalSegment};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

pub struct Dropper {
    wal: Arc<WalManager>,
    pages: Arc<PageManager>,
    chunk_size: u32,
    notify: Notify,
    stopping: AtomicBool,
}

impl Dropper {
    pub fn new(wal: Arc<WalManager>, pages: Arc<PageManager>, chunk_size: u32) -> Self {
        Self { wal, pages, chunk_size, notify: Notify::new(), stopping: AtomicBool::new(false) }
    }

    fn convert_segment(&self, mut segment: WalSegment) -> Result<()> {
        let records = segment.read_all()?;
        if records.is_empty() {
            return Ok(());
        }
        let mut by_id: std::collections::BTreeMap<u64, Vec<Measurement>> = std::collections::BTreeMap::new();
        for m in records {
            by_id.entry(m.id).or_default().push(m);
        }
        let batches: Vec<(u64, Vec<Measurement>)> = by_id
            .into_iter()
            .map(|(id, mut ms)| {
                ms.sort_by_key(|m| m.time);
                (id, ms)
            })
            .collect();
        self.pages.append_measurement_batches(self.chunk_size, &batches)?;
        std::fs::remove_file(segment.path())?;
        Ok(())
    }

    fn run_pass(&self) -> Result<usize> {
        let closed = self.wal.take_closed();
        let converted = closed.len();
        for segment in closed {
            let seq = segment.seq();
            if let Err(e) = self.convert_segment(segment) {
                warn!(seq, error = %e, "failed converting wal segment to page");
            }
        }
        if converted > 0 {
            debug!(converted, "dropper converted wal segments to pages");
        }
        Ok(converted)
    }

    /// Runs until `stop()`, waking on its own timer plus whatever `wake()` calls arrive
    /// from append-pressure signals; intended to be spawned onto the `DISK_IO` pool.
    pub async fn run(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
                _ = self.notify.notified() => {}
            }
            if let Err(e) = self.run_pass() {
                warn!(error = %e, "dropper pass failed");
            }
            if self.stopping.load(Ordering::Acquire) {
                let _ = self.run_pass();
                break;
            }
        }
    }

    pub fn wake(&self) {
        self.notify.notify_one();
    }

    pub fn stop(&self) {
        self.stopping.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    /// Synchronous drain used by `Engine::flush`/`stop`: converts whatever is closed
    /// right now without waiting for the background loop's next tick.
    pub fn drain_now(&self) -> Result<()> {
        self.run_pass()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::WalManager;

    #[test]
    fn drain_now_converts_closed_segments_into_a_page() {
        let dir = tempfile::tempdir().unwrap();
        let wal_dir = dir.path().join("wal");
        let page_dir = dir.path().join("page");
        let wal = Arc::new(WalManager::open(&wal_dir, 4).unwrap());
        let pages = Arc::new(PageManager::open(&page_dir).unwrap());
        let dropper = Dropper::new(wal.clone(), pages.clone(), 4096);

        for i in 0..8u64 {
            wal.append(Measurement::new(1, i, i as f64, 0)).unwrap();
        }
        assert_eq!(wal.closed_segment_count(), 2);

        dropper.drain_now().unwrap();
        assert_eq!(wal.closed_segment_count(), 0);
        assert_eq!(pages.page_count(), 1);
        assert_eq!(pages.foreach(1, 0, 7, 0).unwrap().len(), 8);
    }
}
