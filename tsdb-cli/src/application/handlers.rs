use std::path::PathBuf;
use std::str::FromStr;

use tsdb_core::{Engine, Measurement, QueryInterval, Result, Settings, Strategy, open_storage};

pub fn handle_init(
    path: PathBuf,
    strategy: String,
    wal_file_size: Option<u32>,
    chunk_size: Option<u32>,
    memory_limit: Option<u64>,
) -> Result<()> {
    let mut settings = Settings::default_for(&path);
    settings.strategy = Strategy::from_str(&strategy)?;
    if let Some(v) = wal_file_size {
        settings.wal_file_size = v;
    }
    if let Some(v) = chunk_size {
        settings.chunk_size = v;
    }
    if let Some(v) = memory_limit {
        settings.memory_limit = v;
    }
    let engine = Engine::open(settings)?;
    engine.stop()?;
    eprintln!("init: created {} (strategy={})", path.display(), strategy.to_uppercase());
    Ok(())
}

pub fn handle_put(path: PathBuf, id: u64, time: u64, value: f64, flag: u32) -> Result<()> {
    let engine = open_storage(&path)?;
    let status = engine.append(Measurement::new(id, time, value, flag))?;
    engine.stop()?;
    if let Some(err) = status.error {
        eprintln!("put: {err} (written={}, ignored={})", status.writed, status.ignored);
    } else {
        eprintln!("put: ok");
    }
    Ok(())
}

pub fn handle_query(path: PathBuf, id: u64, from: u64, to: u64, flag: u32) -> Result<()> {
    let engine = open_storage(&path)?;
    let points = engine.read_interval(QueryInterval { id, from, to, flag })?;
    for m in &points {
        println!("{}\t{}\t{}\t{}", m.id, m.time, m.value, m.flag);
    }
    eprintln!("query: {} points", points.len());
    engine.stop()
}

pub fn handle_point(path: PathBuf, id: u64, time: u64, flag: u32) -> Result<()> {
    let engine = open_storage(&path)?;
    let hits = engine.read_time_point(&[id], time, flag)?;
    match hits.get(&id) {
        Some(m) if !m.is_no_data() => println!("{}\t{}\t{}\t{}", m.id, m.time, m.value, m.flag),
        _ => eprintln!("point: no data at or before {time}"),
    }
    engine.stop()
}

pub fn handle_current(path: PathBuf, ids: Vec<u64>, flag: u32) -> Result<()> {
    let engine = open_storage(&path)?;
    let values = engine.current_value(&ids, flag);
    for id in &ids {
        match values.get(id) {
            Some(m) => println!("{}\t{}\t{}\t{}", m.id, m.time, m.value, m.flag),
            None => eprintln!("current: id {id} has no value"),
        }
    }
    engine.stop()
}

pub fn handle_describe(path: PathBuf) -> Result<()> {
    let engine = open_storage(&path)?;
    let d = engine.description();
    println!("strategy: {}", engine.strategy());
    println!("ids: {}", d.ids);
    println!("wal segments: {} open, {} closed", d.wal_segments_open, d.wal_segments_closed);
    println!("pages: {}", d.pages);
    match d.memstorage_chunks_capacity {
        Some(cap) => println!("memstorage chunks: {}/{}", d.memstorage_chunks_allocated, cap),
        None => println!("memstorage chunks: {}", d.memstorage_chunks_allocated),
    }
    engine.stop()
}

pub fn handle_fsck(path: PathBuf) -> Result<()> {
    let engine = open_storage(&path)?;
    let report = engine.fsck()?;
    println!("pages: {}  chunks_ok: {}  chunks_bad: {}", report.pages, report.chunks_ok, report.chunks_bad);
    engine.stop()
}

pub fn handle_erase_old(path: PathBuf, time: u64) -> Result<()> {
    let engine = open_storage(&path)?;
    engine.erase_old(time)?;
    eprintln!("erase-old: dropped everything before {time}");
    engine.stop()
}

pub fn handle_compact_to(path: PathBuf, n: u32) -> Result<()> {
    let engine = open_storage(&path)?;
    engine.compact_to(n)?;
    eprintln!("compact: merged pages down to {n}");
    engine.stop()
}

pub fn handle_compact_by_time(path: PathBuf, from: u64, to: u64) -> Result<()> {
    let engine = open_storage(&path)?;
    engine.compact_by_time(from, to)?;
    eprintln!("compact: merged pages overlapping [{from}, {to}]");
    engine.stop()
}
