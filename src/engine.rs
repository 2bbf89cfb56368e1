//! Engine — the storage façade: `open`, `close`, `incr`, `get_row`,
//! `sync`, `gc`.
//!
//! Lock hierarchy: root lock first, then (at most) one row lock, never
//! the reverse. `incr` takes the root lock only long enough to resolve
//! or create the row's handle, then drops it before taking the row's
//! write lock — the two sections in `incr_inner` below mirror that
//! split exactly.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockUpgradableReadGuard};

use crate::error::{EngineError, Result};
use crate::file_space::FileSpace;
use crate::meta::{MetaBlock, META_SIZE};
use crate::rmap::{RMap, INITIAL_RMAP_SIZE};

/// In-memory side-channel a RootIndex slot carries: a handle to its
/// RowIndex, resident or not. `None` only ever occurs for the instant
/// between claiming a fresh root slot and attaching its row (see
/// `Engine::incr_inner`); every USED root slot observed by a public API
/// call has a child.
pub(crate) type RowHandle = Arc<RwLock<RMap<()>>>;
type RootChild = Option<RowHandle>;
type RootIndex = RwLock<RMap<RootChild>>;

/// A point-in-time copy of one row's `(column, value)` entries, in slot
/// order. No ordering beyond that is guaranteed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowSnapshot {
    entries: Vec<(u32, u64)>,
}

impl RowSnapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, u64)> + '_ {
        self.entries.iter().copied()
    }

    pub fn value_of(&self, y: u32) -> Option<u64> {
        self.entries.iter().find(|(k, _)| *k == y).map(|(_, v)| *v)
    }
}

impl IntoIterator for RowSnapshot {
    type Item = (u32, u64);
    type IntoIter = std::vec::IntoIter<(u32, u64)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// The storage engine: a two-level open-addressed hash index over a
/// single append-oriented backing file.
pub struct Engine {
    file: File,
    file_space: FileSpace,
    root: RootIndex,
    poisoned: AtomicBool,
}

impl Engine {
    /// Open (or create) a matrix file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let len = file.metadata()?.len();

        let (file_space, root) = if len == 0 {
            tracing::info!(path = %path.display(), "creating new matrix file");
            let file_space = FileSpace::new(0);
            let meta_fpos = file_space.alloc(&file, META_SIZE)?;
            debug_assert_eq!(meta_fpos, 0, "meta block must be the first allocation");
            let root = RMap::<RootChild>::create(&file_space, &file, INITIAL_RMAP_SIZE)?;
            root.sync(&file)?;
            MetaBlock::write(&file, root.fpos)?;
            (file_space, root)
        } else {
            tracing::info!(path = %path.display(), "opening existing matrix file");
            let meta = MetaBlock::load(&file)?;
            let mut root = RMap::<RootChild>::load(&file, meta.root_fpos)?;
            root.unswap(&file)?;
            for pos in 0..root.size as usize {
                if root.slot_is_used(pos) {
                    let child_fpos = root.slot_value(pos);
                    let child = RMap::<()>::load(&file, child_fpos)?;
                    root.set_slot_child(pos, Some(Arc::new(RwLock::new(child))));
                }
            }
            let file_space = FileSpace::new(len);
            (file_space, root)
        };

        Ok(Self {
            file,
            file_space,
            root: RwLock::new(root),
            poisoned: AtomicBool::new(false),
        })
    }

    /// Flush dirty state and drop the handle.
    pub fn close(self) -> Result<()> {
        tracing::info!("closing matrix file");
        self.sync()
    }

    /// Increment cell `(x, y)` by `delta`.
    pub fn incr(&self, x: u32, y: u32, delta: u64) -> Result<()> {
        self.guard(|e| e.incr_inner(x, y, delta))
    }

    /// Resolve row `x`'s snapshot, unswapping it into memory first if
    /// necessary.
    pub fn get_row(&self, x: u32) -> Result<RowSnapshot> {
        self.guard(|e| e.get_row_inner(x))
    }

    /// Flush every dirty RMap to disk, then the MetaBlock. Idempotent: a
    /// second call with no intervening writes flushes nothing (every
    /// DIRTY bit was already cleared).
    pub fn sync(&self) -> Result<()> {
        self.guard(|e| e.sync_inner())
    }

    /// Swap every resident row out of memory.
    pub fn gc(&self) -> Result<()> {
        self.guard(|e| e.gc_inner())
    }

    /// Run `f`, failing fast if the engine is already poisoned and
    /// poisoning it if `f` returns an I/O or corruption error.
    fn guard<T>(&self, f: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        if self.poisoned.load(Ordering::Acquire) {
            return Err(EngineError::Poisoned);
        }
        let result = f(self);
        if let Err(e) = &result {
            if e.poisons() {
                tracing::error!(error = %e, "engine poisoned");
                self.poisoned.store(true, Ordering::Release);
            }
        }
        result
    }

    fn incr_inner(&self, x: u32, y: u32, delta: u64) -> Result<()> {
        if delta == 0 {
            return Ok(());
        }

        // Resolve or create x's root slot and its child under the root
        // lock, capturing the child's on-disk position before releasing
        // the root lock. The fast path takes only a plain read lock so
        // concurrent `incr` calls on disjoint (already-created) rows
        // never contend with each other.
        let found = {
            let root_read = self.root.read();
            let pos = root_read.probe(x);
            if root_read.slot_is_used(pos) && root_read.slot_key(pos) == x {
                root_read.mark_slot_dirty(pos);
                let child = root_read
                    .slot_child(pos)
                    .expect("used root slot always has a child");
                let old_fpos = root_read.slot_value(pos);
                Some((child, old_fpos))
            } else {
                None
            }
        };
        let (child, old_fpos) = if let Some(found) = found {
            found
        } else {
            let mut root_write = self.root.write();
            let pos = root_write.insert(&self.file_space, &self.file, x)?;
            if root_write.slot_child(pos).is_none() {
                let fresh = RMap::<()>::create(&self.file_space, &self.file, INITIAL_RMAP_SIZE)?;
                let fpos = fresh.fpos;
                root_write.set_slot_child(pos, Some(Arc::new(RwLock::new(fresh))));
                root_write.set_slot_value(pos, fpos);
            }
            root_write.mark_slot_dirty(pos);
            let child = root_write
                .slot_child(pos)
                .expect("child was just attached above");
            let old_fpos = root_write.slot_value(pos);
            (child, old_fpos)
        };

        // Unswap the row if needed, then insert/increment y.
        let new_fpos = {
            let mut row = child.write();
            if row.swapped {
                row.unswap(&self.file)?;
            }
            let pos = row.insert(&self.file_space, &self.file, y)?;
            let current = row.slot_value(pos);
            row.set_slot_value(pos, current.saturating_add(delta));
            row.fpos
        };

        // The row may have relocated on disk (its own insert resized
        // it) — back-write the new position into the root slot.
        if new_fpos != old_fpos {
            let mut root_write = self.root.write();
            let pos = root_write.probe(x);
            root_write.set_slot_value(pos, new_fpos);
        }

        Ok(())
    }

    fn get_row_inner(&self, x: u32) -> Result<RowSnapshot> {
        let child = {
            let root_read = self.root.read();
            let pos = root_read.probe(x);
            if root_read.slot_is_used(pos) && root_read.slot_key(pos) == x {
                root_read
                    .slot_child(pos)
                    .expect("used root slot always has a child")
            } else {
                return Err(EngineError::NotFound(x));
            }
        };

        // A reader that finds the row swapped out must upgrade to
        // unswap it. An upgradable guard avoids the release-then-
        // reacquire window where another thread could swap the row back
        // out (or mutate it) between the two lock acquisitions.
        let upgradable = child.upgradable_read();
        let entries: Vec<(u32, u64)> = if upgradable.swapped {
            let mut row = RwLockUpgradableReadGuard::upgrade(upgradable);
            row.unswap(&self.file)?;
            row.used_entries().collect()
        } else {
            upgradable.used_entries().collect()
        };

        Ok(RowSnapshot { entries })
    }

    fn sync_inner(&self) -> Result<()> {
        tracing::debug!("syncing matrix file");
        let root = self.root.read();
        let mut rows_flushed = 0u64;
        for pos in 0..root.size as usize {
            if !root.slot_is_used(pos) {
                continue;
            }
            if let Some(child) = root.slot_child(pos) {
                let row = child.read();
                if !row.swapped {
                    row.sync(&self.file)?;
                    rows_flushed += 1;
                }
            }
        }
        root.sync(&self.file)?;
        MetaBlock::write(&self.file, root.fpos)?;
        tracing::debug!(rows_flushed, "sync complete");
        Ok(())
    }

    fn gc_inner(&self) -> Result<()> {
        let root = self.root.read();
        for pos in 0..root.size as usize {
            if !root.slot_is_used(pos) {
                continue;
            }
            let Some(child) = root.slot_child(pos) else {
                continue;
            };
            if child.read().swapped {
                continue;
            }
            let mut row = child.write();
            // Re-check after acquiring the write lock: another thread
            // may have swapped this row out in between.
            if !row.swapped {
                tracing::debug!(row = root.slot_key(pos), "swapping row out of memory");
                row.swap(&self.file)?;
            }
        }
        Ok(())
    }
}
