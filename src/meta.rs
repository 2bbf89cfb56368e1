//! MetaBlock — the fixed-size file header.
//!
//! Layout, all little-endian:
//! ```text
//! [0..8)    magic: 0x17 repeated
//! [8..16)   u64 fpos of the RootIndex
//! [16..64)  reserved, zero
//! ```

use std::fs::File;
use std::os::unix::fs::FileExt;

use crate::error::{corrupt, Result};

pub(crate) const META_SIZE: u64 = 64;
const META_MAGIC_BYTE: u8 = 0x17;

pub(crate) struct MetaBlock {
    pub root_fpos: u64,
}

impl MetaBlock {
    pub(crate) fn write(file: &File, root_fpos: u64) -> Result<()> {
        let mut buf = [0u8; META_SIZE as usize];
        buf[0..8].fill(META_MAGIC_BYTE);
        buf[8..16].copy_from_slice(&root_fpos.to_le_bytes());
        file.write_all_at(&buf, 0)?;
        Ok(())
    }

    pub(crate) fn load(file: &File) -> Result<Self> {
        let mut buf = [0u8; META_SIZE as usize];
        file.read_exact_at(&mut buf, 0).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                corrupt("meta block truncated")
            } else {
                e.into()
            }
        })?;
        if buf[0..8] != [META_MAGIC_BYTE; 8] {
            return Err(corrupt("bad meta block magic"));
        }
        let root_fpos = u64::from_le_bytes(buf[8..16].try_into().unwrap());
        Ok(Self { root_fpos })
    }
}
