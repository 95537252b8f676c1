//! The engine orchestrator: assembles the tiers a [`Strategy`] calls for, owns the
//! summary map and single-process lockfile, and routes every public operation through
//! the lock manager and thread pools.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::chunk::allocator::{ChunkAllocator, RegionAllocator};
use crate::dropper::Dropper;
use crate::error::{Error, Result};
use crate::lock::{LockKind, LockManager};
use crate::manifest::Manifest;
use crate::measurement::{Measurement, Status, Written};
use crate::memstorage::MemStorage;
use crate::page::PageManager;
use crate::pool::{PoolKind, TaskHandle, ThreadPoolManager};
use crate::settings::Settings;
use crate::stats::{Description, FsckReport, QueryInterval};
use crate::strategy::Strategy;
use crate::wal::WalManager;

const LOCKFILE_NAME: &str = "lockfile";

type Callback = Box<dyn Fn(Measurement) + Send + Sync>;

struct Subscription {
    token: u64,
    ids: std::collections::HashSet<u64>,
    flag: u32,
    callback: Callback,
}

/// The assembled, running storage engine for one directory.
pub struct Engine {
    settings: Settings,
    strategy: Strategy,
    summary: RwLock<HashMap<u64, Measurement>>,
    wal: Option<Arc<WalManager>>,
    mem: Option<Arc<MemStorage>>,
    pages: Arc<PageManager>,
    dropper: Option<Arc<Dropper>>,
    locks: Arc<LockManager>,
    pools: Arc<ThreadPoolManager>,
    subscriptions: Mutex<Vec<Subscription>>,
    next_subscription: AtomicU64,
    background: Mutex<Vec<TaskHandle<()>>>,
    stopped: AtomicBool,
}

/// Opens an existing storage directory, reading its `Settings` to pick the strategy.
/// A directory with no `Settings` file has never been explicitly initialized; open it
/// with [`Engine::open`] and a freshly built `Settings` instead.
pub fn open_storage(path: &Path) -> Result<Engine> {
    if !Settings::exists(path) {
        return Err(Error::Format(format!("{path:?}: no Settings file, construct explicitly with Engine::open")));
    }
    let settings = Settings::load(path)?;
    Engine::open(settings)
}

impl Engine {
    pub fn open(settings: Settings) -> Result<Self> {
        std::fs::create_dir_all(&settings.storage_path)?;
        std::fs::create_dir_all(&settings.raw_path)?;

        let lockfile = settings.storage_path.join(LOCKFILE_NAME);
        if lockfile.exists() {
            return Err(Error::StorageLocked(settings.storage_path.clone()));
        }
        std::fs::write(&lockfile, std::process::id().to_string())?;

        let mut manifest = Manifest::load_or_default(&settings.storage_path)?;
        manifest.check_version()?;

        if !Settings::exists(&settings.storage_path) {
            settings.save()?;
        }

        let pools = Arc::new(ThreadPoolManager::new()?);
        let locks = Arc::new(LockManager::new());
        let pages = Arc::new(PageManager::open(&settings.storage_path)?);

        let strategy = settings.strategy;
        let mut wal = None;
        let mut mem = None;
        let mut dropper = None;

        if strategy.has_wal() {
            let manager = Arc::new(WalManager::open(&settings.raw_path, settings.wal_file_size)?);
            wal = Some(manager);
        }

        if strategy.has_memstorage() {
            let allocator: Arc<dyn ChunkAllocator> =
                Arc::new(RegionAllocator::new(settings.memory_limit, settings.chunk_size));
            let storage =
                Arc::new(MemStorage::new(allocator, settings.percent_when_start_droping, settings.percent_to_drop));
            storage.set_down_level(pages.clone());
            if let Some(wal) = &wal {
                storage.set_disk(wal.clone());
            }
            mem = Some(storage);
        }

        // COMPRESSED is the only strategy whose WAL segments must themselves flow to
        // pages in the background; WAL has no background conversion (manual `compress_all`
        // only) and CACHE's background path is MemStorage -> Page (its WAL is replay-only).
        if strategy == Strategy::Compressed {
            if let Some(wal) = &wal {
                dropper = Some(Arc::new(Dropper::new(wal.clone(), pages.clone(), settings.chunk_size)));
            }
        }

        let engine = Self {
            settings,
            strategy,
            summary: RwLock::new(HashMap::new()),
            wal,
            mem,
            pages,
            dropper,
            locks,
            pools,
            subscriptions: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            background: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        };

        engine.replay_wal_into_memstorage()?;
        engine.spawn_background_workers();
        engine.save_manifest()?;

        info!(strategy = %engine.strategy, path = ?engine.settings.storage_path, "engine opened");
        Ok(engine)
    }

    /// Rebuilds MemStorage's in-memory state from whatever the WAL still holds — the
    /// crash-recovery path for `CACHE` (the only strategy carrying both tiers).
    fn replay_wal_into_memstorage(&self) -> Result<()> {
        let (Some(wal), Some(mem)) = (&self.wal, &self.mem) else { return Ok(()) };
        let records = wal.all_records()?;
        if records.is_empty() {
            return Ok(());
        }
        debug!(count = records.len(), "replaying wal records into memstorage");
        for m in records {
            mem.replay(m)?;
            let mut summary = self.summary.write();
            let should_update = summary.get(&m.id).is_none_or(|prev| m.time >= prev.time);
            if should_update {
                summary.insert(m.id, m);
            }
        }
        Ok(())
    }

    fn spawn_background_workers(&self) {
        let mut background = self.background.lock();
        if let Some(mem) = &self.mem {
            let mem = mem.clone();
            background.push(self.pools.spawn(PoolKind::DiskIo, async move { mem.dropper_loop().await }));
        }
        if let Some(dropper) = &self.dropper {
            let dropper = dropper.clone();
            background.push(self.pools.spawn(PoolKind::DiskIo, async move { dropper.run().await }));
        }
    }

    fn save_manifest(&self) -> Result<()> {
        let mut manifest = Manifest::load_or_default(&self.settings.storage_path)?;
        manifest.set_wal_files(self.wal.as_ref().map(|w| w.segment_file_names()).unwrap_or_default());
        manifest.set_page_files(self.pages.page_file_names());
        manifest.save(&self.settings.storage_path)
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Checks the summary map and rejects writes to the past without touching any
    /// tier; otherwise writes through the strategy's top-level writer and, on success,
    /// advances the summary.
    pub fn append(&self, m: Measurement) -> Result<Status> {
        {
            let summary = self.summary.read();
            if let Some(prev) = summary.get(&m.id) {
                if m.time < prev.time {
                    return Ok(Status::ignored_with(format!("writing to past: id {} time {}", m.id, m.time)));
                }
            }
        }

        let written = self.write_through(m)?;

        if written == Written::Written {
            self.summary.write().insert(m.id, m);
            self.notify_subscribers(m);
        }
        Ok(Status::ok(1))
    }

    fn write_through(&self, m: Measurement) -> Result<Written> {
        match (&self.mem, &self.wal) {
            (Some(mem), _) => mem.append(m),
            (None, Some(wal)) => self.pools.block_on(PoolKind::Common, async {
                let _guard = self.locks.write(LockKind::Wal).await;
                wal.append(m)
            }),
            (None, None) => Err(Error::Internal("engine has neither a memstorage nor a wal tier".into())),
        }
    }

    fn notify_subscribers(&self, m: Measurement) {
        let subs = self.subscriptions.lock();
        for sub in subs.iter() {
            if sub.ids.contains(&m.id) && m.matches_flag(sub.flag) {
                (sub.callback)(m);
            }
        }
    }

    /// Registers a callback invoked synchronously, inline with `append`, for every
    /// write matching `ids`/`flag`. Returns a token for [`Engine::unsubscribe`].
    pub fn subscribe(&self, ids: &[u64], flag: u32, callback: impl Fn(Measurement) + Send + Sync + 'static) -> u64 {
        let token = self.next_subscription.fetch_add(1, Ordering::SeqCst);
        self.subscriptions.lock().push(Subscription {
            token,
            ids: ids.iter().copied().collect(),
            flag,
            callback: Box::new(callback),
        });
        token
    }

    pub fn unsubscribe(&self, token: u64) {
        self.subscriptions.lock().retain(|s| s.token != token);
    }

    fn resident_foreach(&self, id: u64, from: u64, to: u64, flag: u32) -> Result<Vec<Measurement>> {
        if let Some(mem) = &self.mem {
            return Ok(mem.foreach(id, from, to, flag));
        }
        if let Some(wal) = &self.wal {
            let dir = wal.clone();
            let records = self.pools.block_on(PoolKind::Common, async {
                let _guard = self.locks.read(LockKind::Wal).await;
                dir.all_records()
            })?;
            return Ok(records.into_iter().filter(|m| m.id == id && m.time >= from && m.time <= to && m.matches_flag(flag)).collect());
        }
        Ok(Vec::new())
    }

    fn page_foreach(&self, id: u64, from: u64, to: u64, flag: u32) -> Result<Vec<Measurement>> {
        let pages = self.pages.clone();
        self.pools.block_on(PoolKind::Common, async {
            let _guard = self.locks.read(LockKind::Page).await;
            pages.foreach(id, from, to, flag)
        })
    }

    fn merge_prefer_resident(page: Vec<Measurement>, resident: Vec<Measurement>) -> Vec<Measurement> {
        let mut merged: HashMap<(u64, u64), Measurement> = HashMap::new();
        for m in page {
            merged.insert((m.id, m.time), m);
        }
        for m in resident {
            merged.insert((m.id, m.time), m);
        }
        let mut out: Vec<Measurement> = merged.into_values().collect();
        out.sort_by_key(|m| m.time);
        out
    }

    /// Range query over `q`. `CACHE` splits the range at the oldest time still
    /// resident in an open chunk; every other strategy queries both of its tiers over
    /// the full range and merges, with the resident tier winning on an exact tie.
    pub fn read_interval(&self, q: QueryInterval) -> Result<Vec<Measurement>> {
        debug!(id = q.id, from = q.from, to = q.to, flag = q.flag, "read_interval");
        if self.strategy == Strategy::Cache {
            let mem = self.mem.as_ref().expect("CACHE always has a memstorage tier");
            let split = mem.min_resident_time();
            let page_part = match split {
                Some(split) if split > q.from => {
                    let page_to = split.saturating_sub(1).min(q.to);
                    if page_to >= q.from { self.page_foreach(q.id, q.from, page_to, q.flag)? } else { Vec::new() }
                }
                Some(_) => Vec::new(),
                None => self.page_foreach(q.id, q.from, q.to, q.flag)?,
            };
            let mem_part = match split {
                Some(split) if split <= q.to => mem.foreach(q.id, split.max(q.from), q.to, q.flag),
                _ => Vec::new(),
            };
            return Ok(Self::merge_prefer_resident(page_part, mem_part));
        }

        let page_part = self.page_foreach(q.id, q.from, q.to, q.flag)?;
        let resident_part = self.resident_foreach(q.id, q.from, q.to, q.flag)?;
        Ok(Self::merge_prefer_resident(page_part, resident_part))
    }

    /// `foreach` expressed as a callback: walks `read_interval`'s result in time order,
    /// stopping early the first time `callback` returns `false` (the engine's stand-in
    /// for a cancellation token).
    pub fn foreach(&self, q: QueryInterval, mut callback: impl FnMut(Measurement) -> bool) -> Result<()> {
        for m in self.read_interval(q)? {
            if !callback(m) {
                break;
            }
        }
        Ok(())
    }

    fn time_point_one(&self, id: u64, tp: u64, flag: u32) -> Result<Measurement> {
        let page_hit = self.pools.block_on(PoolKind::Common, async {
            let _guard = self.locks.read(LockKind::Page).await;
            self.pages.time_point(id, tp)
        })?;
        let resident_hit = if let Some(mem) = &self.mem {
            let m = mem.read_time_point(id, tp);
            (!m.is_no_data()).then_some(m)
        } else if let Some(wal) = &self.wal {
            let records = self.pools.block_on(PoolKind::Common, async {
                let _guard = self.locks.read(LockKind::Wal).await;
                wal.all_records()
            })?;
            records.into_iter().filter(|m| m.id == id && m.time <= tp).max_by_key(|m| m.time)
        } else {
            None
        };

        let best = match (page_hit, resident_hit) {
            (Some(p), Some(r)) => Some(if r.time >= p.time { r } else { p }),
            (Some(p), None) => Some(p),
            (None, Some(r)) => Some(r),
            (None, None) => None,
        };
        Ok(best.filter(|m| m.matches_flag(flag)).unwrap_or_else(|| Measurement::empty(id, tp)))
    }

    pub fn read_time_point(&self, ids: &[u64], time_point: u64, flag: u32) -> Result<HashMap<u64, Measurement>> {
        let mut out = HashMap::with_capacity(ids.len());
        for &id in ids {
            out.insert(id, self.time_point_one(id, time_point, flag)?);
        }
        Ok(out)
    }

    /// The fast path: answers straight from the summary map, which always holds the
    /// latest successfully-appended measurement per id.
    pub fn current_value(&self, ids: &[u64], flag: u32) -> HashMap<u64, Measurement> {
        let summary = self.summary.read();
        ids.iter()
            .filter_map(|id| summary.get(id).filter(|m| m.matches_flag(flag)).map(|m| (*id, *m)))
            .collect()
    }

    pub fn load_min_max(&self, id: u64) -> Option<(u64, u64)> {
        if !self.settings.load_min_max {
            return None;
        }
        let mem_mm = self.mem.as_ref().and_then(|m| m.load_min_max(id));
        let page_mm = self.pages.load_min_max(id);
        match (mem_mm, page_mm) {
            (Some((a, b)), Some((c, d))) => Some((a.min(c), b.max(d))),
            (Some(mm), None) | (None, Some(mm)) => Some(mm),
            (None, None) => None,
        }
    }

    pub fn description(&self) -> Description {
        let mut ids: std::collections::HashSet<u64> = self.pages.ids().into_iter().collect();
        if let Some(mem) = &self.mem {
            ids.extend(mem.ids());
        }
        Description {
            ids: ids.len() as u64,
            wal_segments_open: self.wal.as_ref().map(|w| w.open_segment_count()).unwrap_or(0),
            wal_segments_closed: self.wal.as_ref().map(|w| w.closed_segment_count()).unwrap_or(0),
            pages: self.pages.page_count(),
            memstorage_chunks_allocated: self.mem.as_ref().map(|m| m.chunks_allocated()).unwrap_or(0),
            memstorage_chunks_capacity: self.mem.as_ref().and_then(|m| m.chunks_capacity()),
        }
    }

    /// Closes open WAL/MemStorage chunks and drains any queued conversion work so
    /// every durable write is reflected in pages (or, for `WAL`/`CACHE`, at least on disk
    /// in a closed segment), then rewrites the manifest.
    pub fn flush(&self) -> Result<()> {
        if let Some(mem) = &self.mem {
            mem.flush()?;
        }
        if let Some(wal) = &self.wal {
            wal.flush()?;
        }
        if let Some(dropper) = &self.dropper {
            dropper.drain_now()?;
        }
        self.save_manifest()
    }

    /// Forces every tier's outstanding data down into pages right now, regardless of
    /// fill thresholds — the manual compress path `WAL` relies on since it has no
    /// background conversion of its own.
    pub fn compress_all(&self) -> Result<()> {
        if let Some(mem) = &self.mem {
            mem.flush()?;
        }
        if let Some(wal) = &self.wal {
            wal.flush()?;
            let standalone = Dropper::new(wal.clone(), self.pages.clone(), self.settings.chunk_size);
            standalone.drain_now()?;
        }
        self.save_manifest()
    }

    pub fn fsck(&self) -> Result<FsckReport> {
        let pages = self.pages.clone();
        self.pools.block_on(PoolKind::DiskIo, async {
            let _guard = self.locks.write(LockKind::Page).await;
            pages.fsck()
        })
    }

    pub fn erase_old(&self, t: u64) -> Result<()> {
        if let Some(mem) = &self.mem {
            mem.erase_old(t);
        }
        if let Some(wal) = &self.wal {
            let wal = wal.clone();
            self.pools.block_on(PoolKind::DiskIo, async {
                let _guard = self.locks.write(LockKind::Wal).await;
                wal.erase_old(t)
            })?;
        }
        let pages = self.pages.clone();
        self.pools.block_on(PoolKind::DiskIo, async {
            let _guard = self.locks.write(LockKind::Page).await;
            pages.erase_old(t)
        })?;
        self.save_manifest()
    }

    pub fn compact_to(&self, target: u32) -> Result<()> {
        let pages = self.pages.clone();
        let chunk_size = self.settings.chunk_size;
        self.pools.block_on(PoolKind::DiskIo, async {
            let _guard = self.locks.write(LockKind::Page).await;
            pages.compact_to(chunk_size, target)
        })?;
        self.save_manifest()
    }

    pub fn compact_by_time(&self, from: u64, to: u64) -> Result<()> {
        let pages = self.pages.clone();
        let chunk_size = self.settings.chunk_size;
        self.pools.block_on(PoolKind::DiskIo, async {
            let _guard = self.locks.write(LockKind::Page).await;
            pages.compact_by_time(chunk_size, from, to)
        })?;
        self.save_manifest()
    }

    /// Idempotent shutdown: signals background workers, flushes every tier, joins the
    /// workers, and releases the lockfile.
    pub fn stop(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(mem) = &self.mem {
            mem.stop();
        }
        if let Some(dropper) = &self.dropper {
            dropper.stop();
        }

        let handles: Vec<TaskHandle<()>> = self.background.lock().drain(..).collect();
        self.pools.block_on(PoolKind::Common, async {
            for handle in handles {
                if let Err(e) = handle.join().await {
                    warn!(error = %e, "background worker did not shut down cleanly");
                }
            }
        });

        self.flush()?;
        let lockfile = self.settings.storage_path.join(LOCKFILE_NAME);
        let _ = std::fs::remove_file(lockfile);
        info!(path = ?self.settings.storage_path, "engine stopped");
        Ok(())
    }
}
