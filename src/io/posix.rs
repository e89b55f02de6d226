// Generic access path: positional reads through the kernel block layer

use super::{BlockAccessor, BlockOutcome, BlockStatus, RawDevice};
use crate::options::Api;
use crate::{SalvageResult, SECTOR_SIZE};
use std::path::Path;
use std::time::Instant;

pub struct PosixAccessor {
    device: RawDevice,
}

impl PosixAccessor {
    pub fn open(path: &Path) -> SalvageResult<Self> {
        Ok(Self {
            device: RawDevice::open_read(path)?,
        })
    }

    pub fn device(&self) -> &RawDevice {
        &self.device
    }
}

impl BlockAccessor for PosixAccessor {
    fn api(&self) -> Api {
        Api::Posix
    }

    fn capacity_sectors(&self) -> u64 {
        self.device.capacity_sectors()
    }

    fn prepare_for_copy(&mut self) {
        self.device.prepare_for_copy();
    }

    fn read(&mut self, lba: u64, buf: &mut [u8]) -> BlockOutcome {
        let start = Instant::now();
        let status = match self.device.read_at(buf, lba * SECTOR_SIZE) {
            Ok(n) if n == buf.len() => BlockStatus::Ok,
            Ok(n) => {
                tracing::debug!(lba, expected = buf.len(), got = n, "Short read");
                BlockStatus::Error
            }
            Err(e) => {
                tracing::debug!(lba, error = %e, "Read failed");
                BlockStatus::Error
            }
        };
        BlockOutcome::new(status, start.elapsed())
    }

    fn close(&mut self) -> SalvageResult<()> {
        self.device.restore_readahead();
        Ok(())
    }
}
