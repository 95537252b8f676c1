//! `MemStorage`: the `id -> TimeTrack` map plus the background dropper that keeps it
//! under its configured memory ceiling.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::chunk::Chunk;
use crate::chunk::allocator::ChunkAllocator;
use crate::error::{Error, Result};
use crate::measurement::{Measurement, Written};
use crate::track::TimeTrack;

/// Where a batch of evicted chunks goes: the `PageManager` in every strategy that keeps one.
pub trait PageSink: Send + Sync {
    fn append_chunks(&self, batch: &[(u64, &Chunk)]) -> Result<()>;
}

/// The durability copy an append also goes to under `CACHE`.
pub trait WalSink: Send + Sync {
    fn append(&self, m: Measurement) -> Result<Written>;
}

pub struct MemStorage {
    allocator: Arc<dyn ChunkAllocator>,
    tracks: RwLock<HashMap<u64, Mutex<TimeTrack>>>,
    down_level: RwLock<Option<Arc<dyn PageSink>>>,
    disk: RwLock<Option<Arc<dyn WalSink>>>,
    percent_when_start_dropping: f32,
    percent_to_drop: f32,
    notify: Notify,
    stopping: AtomicBool,
}

impl MemStorage {
    pub fn new(allocator: Arc<dyn ChunkAllocator>, percent_when_start_dropping: f32, percent_to_drop: f32) -> Self {
        Self {
            allocator,
            tracks: RwLock::new(HashMap::new()),
            down_level: RwLock::new(None),
            disk: RwLock::new(None),
            percent_when_start_dropping,
            percent_to_drop,
            notify: Notify::new(),
            stopping: AtomicBool::new(false),
        }
    }

    pub fn set_down_level(&self, sink: Arc<dyn PageSink>) {
        *self.down_level.write() = Some(sink);
    }

    pub fn set_disk(&self, sink: Arc<dyn WalSink>) {
        *self.disk.write() = Some(sink);
    }

    pub fn chunks_allocated(&self) -> u64 {
        self.allocator.allocated()
    }

    pub fn chunks_capacity(&self) -> Option<u64> {
        self.allocator.capacity()
    }

    /// Resolves (or creates) the id's track, then appends with unbounded retry: each
    /// `NoSpace` wakes the background dropper and, while a sink is attached, immediately
    /// runs a drop pass itself so the retry is backed by actual freed space rather than a
    /// bare yield. Only memory-only mode (no sink attached) reports `NoSpace` to the caller.
    pub fn append(&self, m: Measurement) -> Result<Written> {
        let written = self.append_inner(m)?;
        if written == Written::Written {
            if let Some(wal) = self.disk.read().clone() {
                wal.append(m)?;
            }
        }
        Ok(written)
    }

    /// Applies `m` to its track without forwarding to the WAL sink — what WAL replay
    /// on startup uses, since those records are already durable on disk.
    pub fn replay(&self, m: Measurement) -> Result<Written> {
        self.append_inner(m)
    }

    fn append_inner(&self, m: Measurement) -> Result<Written> {
        loop {
            {
                let tracks = self.tracks.read();
                if let Some(track) = tracks.get(&m.id) {
                    let mut track = track.lock();
                    match track.append(m) {
                        Ok(written) => return Ok(written),
                        Err(Error::NoSpace) => {
                            drop(track);
                            drop(tracks);
                            if self.down_level.read().is_none() {
                                return Err(Error::NoSpace);
                            }
                            self.notify.notify_one();
                            // Run a drop pass inline rather than just yielding: the
                            // background dropper lives on its own tokio runtime and may not
                            // get scheduled in time, so progress here must not depend on it.
                            if self.run_drop_pass(None)? == 0 {
                                return Err(Error::NoSpace);
                            }
                            continue;
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
            let mut tracks = self.tracks.write();
            tracks.entry(m.id).or_insert_with(|| Mutex::new(TimeTrack::new(m.id, self.allocator.clone())));
        }
    }

    /// The oldest time still resident in any open (not yet closed) chunk — the split
    /// point a `CACHE` read uses between what it must ask the page tier for and what
    /// MemStorage itself can answer.
    pub fn min_resident_time(&self) -> Option<u64> {
        self.tracks.read().values().filter_map(|t| t.lock().current_min_time()).min()
    }

    /// Frees every chunk (closed or open) whose data is entirely older than `t`,
    /// across every track, without routing anything through the page sink.
    pub fn erase_old(&self, t: u64) {
        let tracks = self.tracks.read();
        for track in tracks.values() {
            track.lock().drop_old(t);
        }
    }

    pub fn foreach(&self, id: u64, from: u64, to: u64, flag: u32) -> Vec<Measurement> {
        let tracks = self.tracks.read();
        tracks.get(&id).map(|t| t.lock().interval(from, to, flag)).unwrap_or_default()
    }

    pub fn read_time_point(&self, id: u64, tp: u64) -> Measurement {
        let tracks = self.tracks.read();
        tracks.get(&id).map(|t| t.lock().read_time_point(tp)).unwrap_or_else(|| Measurement::empty(id, tp))
    }

    pub fn current_value(&self, id: u64) -> Option<Measurement> {
        let tracks = self.tracks.read();
        let m = tracks.get(&id)?.lock().read_time_point(u64::MAX);
        (!m.is_no_data()).then_some(m)
    }

    pub fn load_min_max(&self, id: u64) -> Option<(u64, u64)> {
        self.tracks.read().get(&id)?.lock().min_max()
    }

    pub fn ids(&self) -> Vec<u64> {
        self.tracks.read().keys().copied().collect()
    }

    /// Awakens the dropper to check fill level; cheap, called after every successful append
    /// in addition to `NoSpace` retries so a gradually-filling store still gets ahead of it.
    pub fn notify_pressure(&self) {
        self.notify.notify_one();
    }

    fn run_drop_pass(&self, force_fraction: Option<f32>) -> Result<usize> {
        let Some(sink) = self.down_level.read().clone() else {
            return Ok(0);
        };
        let Some(capacity) = self.allocator.capacity() else {
            return Ok(0);
        };
        let allocated = self.allocator.allocated();
        let fill = allocated as f64 / capacity.max(1) as f64;
        let threshold = force_fraction.map(|_| 0.0).unwrap_or(self.percent_when_start_dropping as f64);
        if fill < threshold {
            return Ok(0);
        }
        let drop_fraction = force_fraction.unwrap_or(self.percent_to_drop) as f64;
        let target = ((allocated as f64) * drop_fraction).ceil() as usize;
        if target == 0 {
            return Ok(0);
        }

        let tracks = self.tracks.read();
        let total_chunks: usize = tracks.values().map(|t| t.lock().chunk_count()).sum();
        if total_chunks == 0 {
            return Ok(0);
        }
        let mut collected: Vec<(u64, Box<Chunk>)> = Vec::new();
        for (id, track) in tracks.iter() {
            let mut track = track.lock();
            let share = track.chunk_count() as f64 / total_chunks as f64;
            let quota = ((target as f64) * share).round() as usize;
            for chunk in track.drop_n(quota) {
                collected.push((*id, chunk));
            }
        }
        drop(tracks);

        if collected.is_empty() {
            return Ok(0);
        }
        collected.sort_by_key(|(_, c)| c.header().min_time);
        let refs: Vec<(u64, &Chunk)> = collected.iter().map(|(id, c)| (*id, c.as_ref())).collect();
        sink.append_chunks(&refs)?;
        let dropped = collected.len();
        for (_, chunk) in collected {
            self.allocator.free(chunk);
        }
        debug!(dropped, fill, "memstorage dropper evicted chunks to page sink");
        Ok(dropped)
    }

    /// Runs until `stop()` is called; intended to be spawned onto the `DISK_IO` pool.
    pub async fn dropper_loop(self: Arc<Self>) {
        loop {
            self.notify.notified().await;
            if self.stopping.load(Ordering::Acquire) {
                if let Err(e) = self.run_drop_pass(Some(1.0)) {
                    warn!(error = %e, "final dropper pass failed during shutdown");
                }
                break;
            }
            if let Err(e) = self.run_drop_pass(None) {
                warn!(error = %e, "dropper pass failed");
            }
        }
    }

    /// Closes every open chunk and, if a sink is attached, drops everything to it.
    pub fn flush(&self) -> Result<()> {
        {
            let tracks = self.tracks.read();
            for track in tracks.values() {
                track.lock().flush_current();
            }
        }
        self.run_drop_pass(Some(1.0))?;
        Ok(())
    }

    pub fn stop(&self) {
        self.stopping.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::allocator::RegionAllocator;
    use std::sync::Mutex as StdMutex;

    struct RecordingSink {
        appended: StdMutex<Vec<(u64, u64)>>,
    }

    impl PageSink for RecordingSink {
        fn append_chunks(&self, batch: &[(u64, &Chunk)]) -> Result<()> {
            let mut appended = self.appended.lock().unwrap();
            for (id, chunk) in batch {
                appended.push((*id, chunk.header().min_time));
            }
            Ok(())
        }
    }

    #[test]
    fn append_creates_tracks_on_demand_and_reads_back() {
        let mem = MemStorage::new(Arc::new(RegionAllocator::new(64 * 1024, 256)), 0.75, 0.25);
        for i in 0..50u64 {
            mem.append(Measurement::new(1, i, i as f64, 0)).unwrap();
        }
        assert_eq!(mem.ids(), vec![1]);
        let window = mem.foreach(1, 0, 49, 0);
        assert_eq!(window.len(), 50);
        assert_eq!(mem.current_value(1).unwrap().time, 49);
    }

    #[test]
    fn full_region_without_a_sink_reports_no_space() {
        let mem = MemStorage::new(Arc::new(RegionAllocator::new(512, 256)), 0.75, 0.25);
        let mut last = Ok(Written::Written);
        for i in 0..2000u64 {
            last = mem.append(Measurement::new(1, i, i as f64, 0));
            if last.is_err() {
                break;
            }
        }
        assert!(matches!(last, Err(Error::NoSpace)));
    }

    #[test]
    fn drop_pass_hands_batches_to_the_sink_and_frees_slots() {
        let mem = MemStorage::new(Arc::new(RegionAllocator::new(4 * 256, 256)), 0.5, 0.5);
        let sink = Arc::new(RecordingSink { appended: StdMutex::new(Vec::new()) });
        mem.set_down_level(sink.clone());
        for i in 0..200u64 {
            mem.append(Measurement::new(1, i, i as f64, 0)).unwrap();
        }
        let dropped = mem.run_drop_pass(None).unwrap();
        assert!(dropped > 0);
        assert!(!sink.appended.lock().unwrap().is_empty());
    }

    #[test]
    fn eviction_under_randomized_multi_id_pressure_loses_nothing_to_the_sink() {
        use rand::Rng;
        use rand::seq::SliceRandom;

        let mem = MemStorage::new(Arc::new(RegionAllocator::new(16 * 256, 256)), 0.6, 0.4);
        let sink = Arc::new(RecordingSink { appended: StdMutex::new(Vec::new()) });
        mem.set_down_level(sink.clone());

        let mut rng = rand::thread_rng();
        let ids: Vec<u64> = (1..=8).collect();
        let mut next_time = HashMap::new();
        let mut appended_per_id: HashMap<u64, u64> = HashMap::new();

        for _ in 0..3000 {
            let id = *ids.choose(&mut rng).unwrap();
            let time = *next_time.entry(id).or_insert(0u64);
            next_time.insert(id, time + 1);
            mem.append(Measurement::new(id, time, rng.gen::<f64>(), 0)).unwrap();
            *appended_per_id.entry(id).or_insert(0) += 1;
        }

        let evicted = sink.appended.lock().unwrap();
        let evicted_per_id = evicted.iter().fold(HashMap::new(), |mut acc, (id, _)| {
            *acc.entry(*id).or_insert(0u64) += 1;
            acc
        });
        for (id, appended) in &appended_per_id {
            let resident = mem.foreach(*id, 0, u64::MAX, 0).len() as u64;
            let fully_evicted_chunks = evicted_per_id.get(id).copied().unwrap_or(0);
            assert!(
                resident > 0 || fully_evicted_chunks > 0,
                "id {id} appended {appended} points but is neither resident nor recorded as evicted"
            );
        }
    }
}
