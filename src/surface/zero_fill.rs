// Zero fill: overwrite the whole device with zeros, block by block

use crate::io::{AlignedBuffer, BlockStatus, RawDevice};
use crate::procedure::{BlockReport, Procedure, ProcedureContext, Progress, Step};
use crate::{SalvageError, SalvageResult, BLOCK_SIZE, SECTORS_AT_ONCE, SECTOR_SIZE};
use std::time::Instant;

pub struct ZeroFill {
    device: RawDevice,
    buffer: AlignedBuffer,
    current_lba: u64,
    end_lba: u64,
    progress: Progress,
}

impl ZeroFill {
    pub fn open(ctx: &ProcedureContext) -> SalvageResult<Self> {
        Self::from_device(RawDevice::open_write(&ctx.device)?)
    }

    pub fn from_device(device: RawDevice) -> SalvageResult<Self> {
        let end_lba = device.capacity_sectors();
        if end_lba == 0 {
            return Err(SalvageError::invalid_option(
                "device",
                format!("{} has no sectors to fill", device.path().display()),
            ));
        }
        tracing::warn!(device = %device.path().display(), sectors = end_lba, "Filling device with zeros");

        Ok(Self {
            device,
            buffer: AlignedBuffer::page_aligned(BLOCK_SIZE)?,
            current_lba: 0,
            end_lba,
            progress: Progress::new(0, end_lba),
        })
    }
}

impl Procedure for ZeroFill {
    fn name(&self) -> &'static str {
        "zero_fill"
    }

    fn block_size(&self) -> usize {
        BLOCK_SIZE
    }

    fn perform(&mut self) -> SalvageResult<Step> {
        if self.current_lba >= self.end_lba {
            return Ok(Step::Complete);
        }
        let lba = self.current_lba;
        let sectors = SECTORS_AT_ONCE.min(self.end_lba - lba);
        let len = (sectors * SECTOR_SIZE) as usize;

        let start = Instant::now();
        let status = match self.device.write_at(&self.buffer.as_slice()[..len], lba * SECTOR_SIZE) {
            Ok(n) if n == len => BlockStatus::Ok,
            Ok(_) => BlockStatus::Error,
            Err(e) => {
                tracing::debug!(lba, error = %e, "Write failed");
                BlockStatus::Error
            }
        };
        let elapsed = start.elapsed();

        self.current_lba += sectors;
        self.progress.advance(sectors);
        Ok(Step::Continue(BlockReport::new(lba, sectors, status, elapsed)))
    }

    fn progress(&self) -> Progress {
        self.progress
    }

    fn close(&mut self) -> SalvageResult<()> {
        self.device.file().sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_overwrites_every_sector() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&vec![0xFFu8; 300 * SECTOR_SIZE as usize]).unwrap();
        file.flush().unwrap();

        let device = RawDevice::open_write(file.path()).unwrap();
        let mut fill = ZeroFill::from_device(device).unwrap();

        let mut blocks = 0;
        while let Step::Continue(report) = fill.perform().unwrap() {
            assert_eq!(report.status, BlockStatus::Ok);
            blocks += 1;
        }
        fill.close().unwrap();

        assert_eq!(blocks, 2);
        let data = std::fs::read(file.path()).unwrap();
        assert_eq!(data.len(), 300 * SECTOR_SIZE as usize);
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_empty_device_rejected() {
        let file = NamedTempFile::new().unwrap();
        let device = RawDevice::open_write(file.path()).unwrap();
        assert!(ZeroFill::from_device(device).is_err());
    }
}
