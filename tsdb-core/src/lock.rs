//! Named async locks guarding the two on-disk resource kinds a tier can touch.
//!
//! Lock ordering is fixed: whenever a task needs both, it acquires `Page` before `Wal`.
//! Nothing here enforces that order mechanically; it's a convention every caller in this
//! crate follows, the same way the original keeps a single documented acquisition order
//! instead of a lock hierarchy checker.

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LockKind {
    Page,
    Wal,
}

pub struct LockManager {
    page: RwLock<()>,
    wal: RwLock<()>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self { page: RwLock::new(()), wal: RwLock::new(()) }
    }

    fn lock_for(&self, kind: LockKind) -> &RwLock<()> {
        match kind {
            LockKind::Page => &self.page,
            LockKind::Wal => &self.wal,
        }
    }

    pub async fn read(&self, kind: LockKind) -> RwLockReadGuard<'_, ()> {
        self.lock_for(kind).read().await
    }

    pub async fn write(&self, kind: LockKind) -> RwLockWriteGuard<'_, ()> {
        self.lock_for(kind).write().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn readers_do_not_block_each_other() {
        let locks = LockManager::new();
        let a = locks.read(LockKind::Page).await;
        let b = locks.read(LockKind::Page).await;
        drop(a);
        drop(b);
    }

    #[tokio::test]
    async fn page_and_wal_are_independent() {
        let locks = LockManager::new();
        let _page = locks.write(LockKind::Page).await;
        let _wal = locks.write(LockKind::Wal).await;
    }
}
