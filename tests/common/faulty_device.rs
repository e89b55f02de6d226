/// Fault-injecting block device for integration tests
///
/// Sector `n` holds the byte `pattern_byte(n)` in all 512 positions, so any
/// copied sector can be checked without keeping the source around. Reads
/// touching a bad range fail with the configured status.
use salvage_copy::options::Api;
use salvage_copy::{BlockAccessor, BlockOutcome, BlockStatus, SECTOR_SIZE};
use std::ops::Range;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn pattern_byte(lba: u64) -> u8 {
    (lba % 251) as u8
}

/// One read as seen by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)]
pub struct ReadRecord {
    pub lba: u64,
    pub sectors: u64,
    pub status: BlockStatus,
}

#[derive(Debug, Clone)]
pub struct FaultyDevice {
    sectors: u64,
    bad: Vec<Range<u64>>,
    failure: BlockStatus,
    reads: Arc<Mutex<Vec<ReadRecord>>>,
}

#[allow(dead_code)]
impl FaultyDevice {
    pub fn new(sectors: u64) -> Self {
        Self {
            sectors,
            bad: Vec::new(),
            failure: BlockStatus::Unc,
            reads: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_bad_range(mut self, range: Range<u64>) -> Self {
        self.bad.push(range);
        self
    }

    pub fn with_failure(mut self, status: BlockStatus) -> Self {
        self.failure = status;
        self
    }

    pub fn bad_ranges(&self) -> &[Range<u64>] {
        &self.bad
    }

    pub fn is_bad(&self, lba: u64) -> bool {
        self.bad.iter().any(|range| range.contains(&lba))
    }

    /// Shared log of every read, in order
    pub fn reads(&self) -> Arc<Mutex<Vec<ReadRecord>>> {
        Arc::clone(&self.reads)
    }

    fn hits_bad(&self, lba: u64, sectors: u64) -> bool {
        self.bad
            .iter()
            .any(|range| range.start < lba + sectors && lba < range.end)
    }
}

impl BlockAccessor for FaultyDevice {
    fn api(&self) -> Api {
        Api::Posix
    }

    fn capacity_sectors(&self) -> u64 {
        self.sectors
    }

    fn read(&mut self, lba: u64, buf: &mut [u8]) -> BlockOutcome {
        let sectors = buf.len() as u64 / SECTOR_SIZE;
        let status = if lba + sectors > self.sectors {
            BlockStatus::Idnf
        } else if self.hits_bad(lba, sectors) {
            self.failure
        } else {
            for (i, sector) in buf.chunks_mut(SECTOR_SIZE as usize).enumerate() {
                sector.fill(pattern_byte(lba + i as u64));
            }
            BlockStatus::Ok
        };

        if let Ok(mut reads) = self.reads.lock() {
            reads.push(ReadRecord {
                lba,
                sectors,
                status,
            });
        }
        let elapsed = if status.is_ok() {
            Duration::from_micros(150)
        } else {
            Duration::from_millis(30)
        };
        BlockOutcome::new(status, elapsed)
    }
}
