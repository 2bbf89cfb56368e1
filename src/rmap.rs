//! RMap — generic open-addressed hash map from `u32` key to `u64` value,
//! persisted and swappable.
//!
//! Generic over a child side-channel `C`: the RootIndex instantiates
//! `RMap<RootChild>` (each slot additionally carries a handle to its
//! resident RowIndex, or `None`), the RowIndex instantiates `RMap<()>`
//! (no side-channel). Keeping the child a parallel in-memory array
//! means there is no on-disk pointer, and the on-disk slot layout is
//! identical for both levels.
//!
//! Probing is plain linear probing over `key % size` using the
//! identity hash — ids are assumed pre-distributed by the caller, so
//! this is a quality tradeoff rather than a correctness one.

use std::fs::File;
use std::os::unix::fs::FileExt;

use crate::error::{corrupt, Result};
use crate::file_space::{alloc_for_resize, FileSpace};
use crate::slot::{MemSlot, SlotFlags, SLOT_SIZE};

pub(crate) const RMAP_HEADER_SIZE: u64 = 16;
const RMAP_MAGIC_BYTE: u8 = 0x23;
pub(crate) const INITIAL_RMAP_SIZE: u64 = 16;

/// On-disk + in-memory footprint of an RMap with `size` slots.
pub(crate) fn bytes_for(size: u64) -> u64 {
    RMAP_HEADER_SIZE + SLOT_SIZE * size
}

pub(crate) struct RMap<C> {
    pub size: u64,
    pub used: u64,
    pub fpos: u64,
    pub swapped: bool,
    slots: Option<Vec<MemSlot<C>>>,
}

impl<C: Default> RMap<C> {
    /// Allocate a brand-new RMap of `size` slots and persist its header.
    /// `fpos` is always freshly allocated since this constructor is
    /// only used for first-time creation.
    pub(crate) fn create(file_space: &FileSpace, file: &File, size: u64) -> Result<Self> {
        let fpos = file_space.alloc(file, bytes_for(size))?;
        let slots = (0..size).map(|_| MemSlot::default()).collect();
        let rmap = Self {
            size,
            used: 0,
            fpos,
            swapped: false,
            slots: Some(slots),
        };
        Ok(rmap)
    }

    /// Read the 16-byte header at `fpos` and validate its magic. Slot
    /// data is not read — the RMap stays `swapped` until `unswap` is
    /// called.
    pub(crate) fn load(file: &File, fpos: u64) -> Result<Self> {
        let mut buf = [0u8; RMAP_HEADER_SIZE as usize];
        file.read_exact_at(&mut buf, fpos).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                corrupt(format!("rmap header truncated at fpos {fpos}"))
            } else {
                e.into()
            }
        })?;
        if buf[0..8] != [RMAP_MAGIC_BYTE; 8] {
            return Err(corrupt(format!("bad rmap magic at fpos {fpos}")));
        }
        let size = u64::from_le_bytes(buf[8..16].try_into().unwrap());
        Ok(Self {
            size,
            used: 0,
            fpos,
            swapped: true,
            slots: None,
        })
    }
}

impl<C: Default + Clone> RMap<C> {
    #[inline]
    fn resident_slots(&self) -> &[MemSlot<C>] {
        self.slots
            .as_deref()
            .expect("rmap must be unswapped before this operation")
    }

    #[inline]
    fn resident_slots_mut(&mut self) -> &mut [MemSlot<C>] {
        self.slots
            .as_deref_mut()
            .expect("rmap must be unswapped before this operation")
    }

    /// Linear probe for `key`: the first slot that is empty or holds
    /// `key` terminates the search.
    pub(crate) fn probe(&self, key: u32) -> usize {
        let slots = self.resident_slots();
        let size = self.size as usize;
        let mut pos = (key as u64 % self.size) as usize;
        for _ in 0..size {
            let slot = &slots[pos];
            if !slot.is_used() || slot.key == key {
                return pos;
            }
            pos = (pos + 1) % size;
        }
        pos
    }

    pub(crate) fn slot_key(&self, pos: usize) -> u32 {
        self.resident_slots()[pos].key
    }

    pub(crate) fn slot_value(&self, pos: usize) -> u64 {
        self.resident_slots()[pos].value
    }

    pub(crate) fn slot_is_used(&self, pos: usize) -> bool {
        self.resident_slots()[pos].is_used()
    }

    pub(crate) fn slot_child(&self, pos: usize) -> C {
        self.resident_slots()[pos].child.clone()
    }

    pub(crate) fn set_slot_value(&mut self, pos: usize, value: u64) {
        let slots = self.resident_slots_mut();
        slots[pos].value = value;
        slots[pos].mark_dirty();
    }

    pub(crate) fn set_slot_child(&mut self, pos: usize, child: C) {
        self.resident_slots_mut()[pos].child = child;
    }

    /// Mark a slot dirty without requiring exclusive access — callers
    /// may hold only a read lock on this RMap.
    pub(crate) fn mark_slot_dirty(&self, pos: usize) {
        self.resident_slots()[pos].mark_dirty();
    }

    /// Place `key` into the table, growing first if the load factor
    /// bound would otherwise be violated. Idempotent: an existing key's
    /// slot is returned unmodified. Returns the slot's index in the
    /// (possibly resized) table.
    pub(crate) fn insert(&mut self, file_space: &FileSpace, file: &File, key: u32) -> Result<usize> {
        if self.used > self.size / 2 {
            self.resize(file_space, file)?;
        }
        let pos = self.probe(key);
        let slots = self.resident_slots_mut();
        let slot = &mut slots[pos];
        if !slot.is_used() || slot.key != key {
            slot.claim(key, C::default());
            self.used += 1;
        }
        Ok(pos)
    }

    /// Double capacity, rehashing every occupied slot into a fresh
    /// in-memory block and a freshly-allocated on-disk region. The old
    /// on-disk region is "freed" (a no-op, see `FileSpace::free`). If
    /// the underlying file cannot be grown, the RMap is left exactly as
    /// it was (the allocation happens before any field is mutated).
    fn resize(&mut self, file_space: &FileSpace, file: &File) -> Result<()> {
        let old_size = self.size;
        let new_size = self.size * 2;
        tracing::debug!(old_size, new_size, fpos = self.fpos, "resizing rmap");
        let new_fpos = alloc_for_resize(file_space, file, bytes_for(new_size))?;

        let old_fpos = self.fpos;
        let old_slots = self
            .slots
            .take()
            .expect("rmap must be unswapped before resize");

        self.size = new_size;
        self.used = 0;
        self.fpos = new_fpos;
        self.slots = Some((0..new_size).map(|_| MemSlot::default()).collect());

        for old_slot in old_slots.into_iter() {
            if !old_slot.is_used() {
                continue;
            }
            let pos = self.place_rehashed(old_slot.key);
            let slots = self.resident_slots_mut();
            slots[pos].value = old_slot.value;
            slots[pos].child = old_slot.child;
        }

        file_space.free(old_fpos, bytes_for(old_size));
        Ok(())
    }

    /// Probe-and-claim used only during `resize`'s rehash: capacity is
    /// known sufficient (we just doubled it), so no load-factor check
    /// or recursive resize is needed.
    fn place_rehashed(&mut self, key: u32) -> usize {
        let pos = self.probe(key);
        let slots = self.resident_slots_mut();
        slots[pos].claim(key, C::default());
        self.used += 1;
        pos
    }

    /// Write the `(magic, size)` header, then every slot with
    /// `USED ∧ DIRTY`, clearing DIRTY as each is flushed. Callers need
    /// only a read lock: DIRTY is cleared atomically per-slot.
    pub(crate) fn sync(&self, file: &File) -> Result<()> {
        let slots = self.resident_slots();

        let mut header = [0u8; RMAP_HEADER_SIZE as usize];
        header[0..8].fill(RMAP_MAGIC_BYTE);
        header[8..16].copy_from_slice(&self.size.to_le_bytes());
        file.write_all_at(&header, self.fpos)?;

        for (i, slot) in slots.iter().enumerate() {
            if slot.is_used() && slot.is_dirty() {
                let mut buf = [0u8; SLOT_SIZE as usize];
                buf[4..8].copy_from_slice(&slot.key.to_le_bytes());
                buf[8..16].copy_from_slice(&slot.value.to_le_bytes());
                let off = self.fpos + RMAP_HEADER_SIZE + (i as u64) * SLOT_SIZE;
                file.write_all_at(&buf, off)?;
                slot.clear_dirty();
            }
        }
        Ok(())
    }

    /// Read `size` slots back from disk. A slot with a non-zero on-disk
    /// `value` is treated as USED, since this engine never leaves a
    /// freshly-inserted slot unincremented across a sync (every row
    /// insert is immediately followed by an increment in `Engine::incr`).
    pub(crate) fn unswap(&mut self, file: &File) -> Result<()> {
        let size = self.size as usize;
        let mut buf = vec![0u8; size * SLOT_SIZE as usize];
        file.read_exact_at(&mut buf, self.fpos + RMAP_HEADER_SIZE)?;

        let mut slots = Vec::with_capacity(size);
        let mut used = 0u64;
        for i in 0..size {
            let off = i * SLOT_SIZE as usize;
            let value = u64::from_le_bytes(buf[off + 8..off + 16].try_into().unwrap());
            let slot = if value != 0 {
                let key = u32::from_le_bytes(buf[off + 4..off + 8].try_into().unwrap());
                used += 1;
                MemSlot::from_disk(key, value, SlotFlags::USED, C::default())
            } else {
                MemSlot::default()
            };
            slots.push(slot);
        }

        self.used = used;
        self.slots = Some(slots);
        self.swapped = false;
        Ok(())
    }

    /// Flush then drop the in-memory slot array.
    pub(crate) fn swap(&mut self, file: &File) -> Result<()> {
        self.sync(file)?;
        self.swapped = true;
        self.slots = None;
        Ok(())
    }

    /// Iterate the `USED` slots in slot order — used by `Engine::get_row`
    /// to build a point-in-time snapshot.
    pub(crate) fn used_entries(&self) -> impl Iterator<Item = (u32, u64)> + '_ {
        self.resident_slots()
            .iter()
            .filter(|s| s.is_used())
            .map(|s| (s.key, s.value))
    }
}
