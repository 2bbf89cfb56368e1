//! Slot — the 16-byte on-disk entry and its in-memory counterpart.
//!
//! On disk a slot is exactly `{ flags_or_zero: u32, key: u32, value: u64 }`.
//! In memory we additionally carry a `child: C` side-channel rather than
//! overloading the on-disk field as both a file offset and a pointer.
//! `C` is `Option<Arc<RwLock<RowIndex>>>` for RootIndex slots and `()`
//! for RowIndex slots — a parallel in-memory array indexed identically
//! to the on-disk array, rather than a tagged union.
//!
//! `flags` lives in an `AtomicU32` rather than a plain `u32` because the
//! DIRTY bit is set and cleared by callers holding only a *read* lock on
//! the owning RMap (root slots are marked dirty by concurrent `incr`
//! calls that only ever take `root.read()`; `sync` clears DIRTY while
//! holding the same read lock). Clearing is a compare-and-swap loop so a
//! concurrent flag-set on the same slot is never lost.

use std::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;

pub(crate) const SLOT_SIZE: u64 = 16;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub(crate) struct SlotFlags: u32 {
        const USED  = 0b0000_0001;
        const DIRTY = 0b0000_0010;
    }
}

pub(crate) struct MemSlot<C> {
    pub key: u32,
    pub value: u64,
    flags: AtomicU32,
    pub child: C,
}

impl<C: Default> Default for MemSlot<C> {
    fn default() -> Self {
        Self {
            key: 0,
            value: 0,
            flags: AtomicU32::new(0),
            child: C::default(),
        }
    }
}

impl<C> MemSlot<C> {
    pub(crate) fn from_disk(key: u32, value: u64, flags: SlotFlags, child: C) -> Self {
        Self {
            key,
            value,
            flags: AtomicU32::new(flags.bits()),
            child,
        }
    }

    #[inline]
    pub(crate) fn flags(&self) -> SlotFlags {
        SlotFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn is_used(&self) -> bool {
        self.flags().contains(SlotFlags::USED)
    }

    #[inline]
    pub(crate) fn is_dirty(&self) -> bool {
        self.flags().contains(SlotFlags::DIRTY)
    }

    /// Set USED|DIRTY and reset value/child — used the instant a slot is
    /// claimed for a new key by `RMap::insert`.
    pub(crate) fn claim(&mut self, key: u32, child: C) {
        self.key = key;
        self.value = 0;
        self.child = child;
        self.flags
            .store((SlotFlags::USED | SlotFlags::DIRTY).bits(), Ordering::Release);
    }

    /// Set DIRTY without requiring exclusive access — callers may hold
    /// only a read lock on the owning RMap.
    #[inline]
    pub(crate) fn mark_dirty(&self) {
        self.flags.fetch_or(SlotFlags::DIRTY.bits(), Ordering::AcqRel);
    }

    /// Clear DIRTY without requiring exclusive access, preserving any
    /// other bit a concurrent `mark_dirty` may have just set.
    pub(crate) fn clear_dirty(&self) {
        loop {
            let cur = self.flags.load(Ordering::Acquire);
            let next = cur & !SlotFlags::DIRTY.bits();
            if cur == next {
                return;
            }
            if self
                .flags
                .compare_exchange_weak(cur, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
        }
    }
}
