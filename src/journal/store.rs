// Backing stores for the per-sector status array

use std::fs::File;
use std::io;

/// Byte-per-sector storage behind a journal
pub trait SectorStatusStore: Send {
    /// Number of sectors tracked
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Status bytes of `[start, start + count)`, clamped to the store
    fn get_range(&self, start: u64, count: u64) -> &[u8];

    fn set_range(&mut self, start: u64, count: u64, value: u8);

    /// Schedule write-back without waiting for it
    fn flush_async(&self) -> io::Result<()>;

    /// Write back and wait
    fn flush(&self) -> io::Result<()>;
}

fn clamp(len: u64, start: u64, count: u64) -> (usize, usize) {
    let begin = start.min(len);
    let end = start.saturating_add(count).min(len);
    (begin as usize, end as usize)
}

/// Journal file mapped into memory
pub struct MmapStore {
    _file: File,
    map: memmap2::MmapMut,
}

impl MmapStore {
    pub fn new(file: File) -> io::Result<Self> {
        let map = unsafe { memmap2::MmapOptions::new().map_mut(&file)? };
        Ok(Self { _file: file, map })
    }
}

impl SectorStatusStore for MmapStore {
    fn len(&self) -> u64 {
        self.map.len() as u64
    }

    fn get_range(&self, start: u64, count: u64) -> &[u8] {
        let (begin, end) = clamp(self.len(), start, count);
        &self.map[begin..end]
    }

    fn set_range(&mut self, start: u64, count: u64, value: u8) {
        let (begin, end) = clamp(self.len(), start, count);
        self.map[begin..end].fill(value);
    }

    fn flush_async(&self) -> io::Result<()> {
        self.map.flush_async()
    }

    fn flush(&self) -> io::Result<()> {
        self.map.flush()
    }
}

/// Volatile store for runs without a journal file
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    bytes: Vec<u8>,
}

impl MemoryStore {
    pub fn new(sectors: u64) -> Self {
        Self {
            bytes: vec![0; sectors as usize],
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

impl SectorStatusStore for MemoryStore {
    fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn get_range(&self, start: u64, count: u64) -> &[u8] {
        let (begin, end) = clamp(self.len(), start, count);
        &self.bytes[begin..end]
    }

    fn set_range(&mut self, start: u64, count: u64, value: u8) {
        let (begin, end) = clamp(self.len(), start, count);
        self.bytes[begin..end].fill(value);
    }

    fn flush_async(&self) -> io::Result<()> {
        Ok(())
    }

    fn flush(&self) -> io::Result<()> {
        Ok(())
    }
}
