//! Chunk allocators. `UnlimitedAllocator` is a thin heap-allocating pass-through for
//! memory-only strategies; `RegionAllocator` carves one fixed byte budget into equal
//! slots with a free-list, for strategies that bound MemStorage's footprint.

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::measurement::Measurement;

use super::Chunk;

pub trait ChunkAllocator: Send + Sync {
    /// Body capacity (bytes) given to every chunk this allocator hands out.
    fn body_capacity(&self) -> usize;

    fn allocate(&self, first: Measurement) -> Result<Box<Chunk>>;

    fn free(&self, chunk: Box<Chunk>);

    /// `None` when the allocator has no fixed ceiling (`UnlimitedAllocator`).
    fn capacity(&self) -> Option<u64>;

    fn allocated(&self) -> u64;
}

pub struct UnlimitedAllocator {
    body_capacity: usize,
    allocated: std::sync::atomic::AtomicU64,
}

impl UnlimitedAllocator {
    pub fn new(body_capacity: usize) -> Self {
        Self { body_capacity, allocated: std::sync::atomic::AtomicU64::new(0) }
    }
}

impl ChunkAllocator for UnlimitedAllocator {
    fn body_capacity(&self) -> usize {
        self.body_capacity
    }

    fn allocate(&self, first: Measurement) -> Result<Box<Chunk>> {
        self.allocated.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(Box::new(Chunk::new(self.body_capacity, first)))
    }

    fn free(&self, chunk: Box<Chunk>) {
        drop(chunk);
        self.allocated.fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
    }

    fn capacity(&self) -> Option<u64> {
        None
    }

    fn allocated(&self) -> u64 {
        self.allocated.load(std::sync::atomic::Ordering::Relaxed)
    }
}

/// A fixed number of equal-sized slots, tracked only by count (the byte region itself is
/// represented by each `Chunk`'s own `Vec`; what's bounded here is *how many* chunks may
/// exist at once, mirroring the original region-allocator's slot budget without requiring
/// unsafe, self-referential slab storage).
pub struct RegionAllocator {
    body_capacity: usize,
    capacity: u64,
    in_use: Mutex<u64>,
}

impl RegionAllocator {
    pub fn new(max_bytes: u64, chunk_size: u32) -> Self {
        let body_capacity = (chunk_size as usize).saturating_sub(super::HEADER_SIZE);
        let slot_size = chunk_size.max(1) as u64;
        let capacity = (max_bytes / slot_size).max(1);
        Self { body_capacity, capacity, in_use: Mutex::new(0) }
    }
}

impl ChunkAllocator for RegionAllocator {
    fn body_capacity(&self) -> usize {
        self.body_capacity
    }

    fn allocate(&self, first: Measurement) -> Result<Box<Chunk>> {
        let mut in_use = self.in_use.lock();
        if *in_use >= self.capacity {
            return Err(Error::NoSpace);
        }
        *in_use += 1;
        Ok(Box::new(Chunk::new(self.body_capacity, first)))
    }

    fn free(&self, chunk: Box<Chunk>) {
        drop(chunk);
        let mut in_use = self.in_use.lock();
        *in_use = in_use.saturating_sub(1);
    }

    fn capacity(&self) -> Option<u64> {
        Some(self.capacity)
    }

    fn allocated(&self) -> u64 {
        *self.in_use.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_allocator_enforces_its_slot_budget() {
        let alloc = RegionAllocator::new(3 * 256, 256);
        assert_eq!(alloc.capacity(), Some(3));
        let a = alloc.allocate(Measurement::new(1, 0, 0.0, 0)).unwrap();
        let b = alloc.allocate(Measurement::new(2, 0, 0.0, 0)).unwrap();
        let c = alloc.allocate(Measurement::new(3, 0, 0.0, 0)).unwrap();
        assert!(alloc.allocate(Measurement::new(4, 0, 0.0, 0)).is_err());
        alloc.free(a);
        assert!(alloc.allocate(Measurement::new(5, 0, 0.0, 0)).is_ok());
        drop(b);
        drop(c);
    }

    #[test]
    fn unlimited_allocator_never_refuses() {
        let alloc = UnlimitedAllocator::new(128);
        for i in 0..1000u64 {
            alloc.allocate(Measurement::new(i, 0, 0.0, 0)).unwrap();
        }
        assert_eq!(alloc.allocated(), 1000);
    }
}
