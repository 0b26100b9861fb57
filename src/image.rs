//! Program memory image, storage plan and binary writer.
//!
//! The image is 64K plus one guard page so that emissions near the top
//! of memory can be length-checked after the fact. `STORE` directives
//! queue regions during the emission pass; after it completes each
//! region is written out as one file, optionally preceded by a 2-byte
//! little-endian load address.

use byteorder::{LittleEndian, WriteBytesExt};
use std::io::Write;
use std::path::Path;
use tracing::debug;

use crate::error::{AsmError, Result};
use crate::types::limits;

/// The 64K (+ guard) program memory image.
#[derive(Clone)]
pub struct MemoryImage {
    bytes: Vec<u8>,
}

impl MemoryImage {
    /// Create an image pre-filled with the given byte.
    pub fn new(fill: u8) -> Self {
        Self {
            bytes: vec![fill; limits::IMAGE_SIZE],
        }
    }

    /// Byte at an address (guard page included).
    pub fn get(&self, addr: usize) -> u8 {
        self.bytes[addr]
    }

    /// Write one byte.
    pub fn set(&mut self, addr: usize, value: u8) {
        self.bytes[addr] = value;
    }

    /// Write a run of bytes starting at `addr`.
    pub fn set_all(&mut self, addr: usize, data: &[u8]) {
        self.bytes[addr..addr + data.len()].copy_from_slice(data);
    }

    /// Borrow a region, clamped to the image size.
    pub fn slice(&self, start: usize, length: usize) -> &[u8] {
        let end = (start + length).min(self.bytes.len());
        &self.bytes[start.min(self.bytes.len())..end]
    }
}

impl std::fmt::Debug for MemoryImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryImage")
            .field("size", &self.bytes.len())
            .finish()
    }
}

/// One queued `STORE` region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEntry {
    /// First address of the region.
    pub start: u16,
    /// Region length in bytes.
    pub length: u32,
    /// Output file name.
    pub filename: String,
    /// Prefix the file with the little-endian load address.
    pub load_address: bool,
}

/// Ordered list of `STORE` regions.
#[derive(Debug, Default)]
pub struct StorePlan {
    entries: Vec<StoreEntry>,
}

impl StorePlan {
    /// Create an empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a region.
    pub fn push(&mut self, entry: StoreEntry) -> Result<()> {
        if self.entries.len() >= limits::MAX_STORES {
            return Err(AsmError::TooMany {
                what: "storage files",
                limit: limits::MAX_STORES,
            });
        }
        debug!(start = entry.start, length = entry.length, file = %entry.filename, "store queued");
        self.entries.push(entry);
        Ok(())
    }

    /// Queued regions in order.
    pub fn entries(&self) -> &[StoreEntry] {
        &self.entries
    }

    /// Number of queued regions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing was queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Write every queued region to disk. Relative file names are resolved
/// against `base_dir`. Returns the paths written.
pub fn write_binaries(
    image: &MemoryImage,
    plan: &StorePlan,
    base_dir: &Path,
) -> Result<Vec<String>> {
    let mut written = Vec::with_capacity(plan.len());
    for entry in plan.entries() {
        let path = {
            let p = Path::new(&entry.filename);
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                base_dir.join(p)
            }
        };
        let mut file = std::fs::File::create(&path)?;
        if entry.load_address {
            file.write_u16::<LittleEndian>(entry.start)?;
        }
        file.write_all(image.slice(entry.start as usize, entry.length as usize))?;
        debug!(path = %path.display(), "binary written");
        written.push(path.display().to_string());
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_fill_byte() {
        let image = MemoryImage::new(0xFF);
        assert_eq!(image.get(0), 0xFF);
        assert_eq!(image.get(0xFFFF), 0xFF);
        let image = MemoryImage::new(0);
        assert_eq!(image.get(0x8000), 0);
    }

    #[test]
    fn test_set_and_slice() {
        let mut image = MemoryImage::new(0);
        image.set_all(0x1000, &[0xA9, 0x42]);
        assert_eq!(image.slice(0x1000, 2), &[0xA9, 0x42]);
        assert_eq!(image.get(0x1002), 0);
    }

    #[test]
    fn test_guard_page() {
        let mut image = MemoryImage::new(0);
        // An emission at the very top of memory lands in the guard page
        // instead of panicking; the driver reports the overflow.
        image.set_all(0xFFFF, &[0x4C, 0x00, 0x10]);
        assert_eq!(image.get(0x10001), 0x10);
    }

    #[test]
    fn test_store_plan_limit() {
        let mut plan = StorePlan::new();
        for i in 0..limits::MAX_STORES {
            plan.push(StoreEntry {
                start: 0,
                length: 1,
                filename: format!("f{i}"),
                load_address: false,
            })
            .unwrap();
        }
        assert!(plan
            .push(StoreEntry {
                start: 0,
                length: 1,
                filename: "overflow".into(),
                load_address: false,
            })
            .is_err());
    }

    #[test]
    fn test_write_binaries() {
        let dir = tempfile::tempdir().unwrap();
        let mut image = MemoryImage::new(0);
        image.set_all(0x2000, &[1, 2, 3, 4]);
        let mut plan = StorePlan::new();
        plan.push(StoreEntry {
            start: 0x2000,
            length: 4,
            filename: "raw.bin".into(),
            load_address: false,
        })
        .unwrap();
        plan.push(StoreEntry {
            start: 0x2000,
            length: 4,
            filename: "prg.bin".into(),
            load_address: true,
        })
        .unwrap();

        let written = write_binaries(&image, &plan, dir.path()).unwrap();
        assert_eq!(written.len(), 2);
        let raw = std::fs::read(dir.path().join("raw.bin")).unwrap();
        assert_eq!(raw, vec![1, 2, 3, 4]);
        let prg = std::fs::read(dir.path().join("prg.bin")).unwrap();
        assert_eq!(prg, vec![0x00, 0x20, 1, 2, 3, 4]);
    }
}
