//! FileSpace — monotonic byte allocator over the engine's single backing file.
//!
//! Growing the file means extending it with `set_len` and returning the
//! old length as the new region's offset. The cursor and the `set_len`
//! call are serialized together under one lock, so concurrent `alloc`
//! calls are linearizable and the file is never truncated back over a
//! region another thread just claimed.
//!
//! `free` is intentionally a no-op: nothing here requires space
//! reclamation yet. The signature is kept so a future free-list keyed
//! by size class can slot in without changing callers.

use std::fs::File;

use parking_lot::Mutex;

use crate::error::{EngineError, Result};

pub(crate) struct FileSpace {
    cursor: Mutex<u64>,
}

impl FileSpace {
    pub(crate) fn new(initial_len: u64) -> Self {
        Self {
            cursor: Mutex::new(initial_len),
        }
    }

    /// Reserve `n` bytes at the end of the file, extending it. Returns
    /// the offset at which the reserved region starts.
    pub(crate) fn alloc(&self, file: &File, n: u64) -> Result<u64> {
        let mut cursor = self.cursor.lock();
        let offset = *cursor;
        let new_len = offset + n;
        file.set_len(new_len)?;
        *cursor = new_len;
        Ok(offset)
    }

    /// Stub: space reclamation is deferred. A real free list keyed by
    /// size class would record `(offset, len)` here.
    pub(crate) fn free(&self, _offset: u64, _len: u64) {}

    #[cfg(test)]
    pub(crate) fn cursor(&self) -> u64 {
        *self.cursor.lock()
    }
}

/// Wraps a [`FileSpace::alloc`] failure as the retryable `AllocFailure`
/// kind rather than a generic `IoFailure` — a resize that cannot grow
/// the file must leave the RMap exactly at its pre-resize state (see
/// `rmap::resize`), which is what makes the failure retryable.
pub(crate) fn alloc_for_resize(space: &FileSpace, file: &File, n: u64) -> Result<u64> {
    space
        .alloc(file, n)
        .map_err(|e| EngineError::AllocFailure(e.to_string()))
}
