pub mod ata;
pub mod buffer;
pub mod device;
pub mod posix;


// Re-exports
pub use ata::AtaAccessor;
pub use buffer::AlignedBuffer;
pub use device::{DeviceInfo, RawDevice};
pub use posix::PosixAccessor;

use crate::options::Api;
use crate::{SalvageResult, SECTOR_SIZE};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Classification of a single block access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BlockStatus {
    Ok,
    /// Generic failure, including short transfers
    Error,
    Timeout,
    /// Uncorrectable data
    Unc,
    /// Address not found
    Idnf,
    /// Command aborted by the device
    Abrt,
    /// Address mark not found
    Amnf,
}

impl BlockStatus {
    pub const ALL: [BlockStatus; 7] = [
        BlockStatus::Ok,
        BlockStatus::Error,
        BlockStatus::Timeout,
        BlockStatus::Unc,
        BlockStatus::Idnf,
        BlockStatus::Abrt,
        BlockStatus::Amnf,
    ];

    pub fn is_ok(&self) -> bool {
        matches!(self, BlockStatus::Ok)
    }

    pub fn is_failure(&self) -> bool {
        !self.is_ok()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BlockStatus::Ok => "OK",
            BlockStatus::Error => "ERR",
            BlockStatus::Timeout => "TIMEOUT",
            BlockStatus::Unc => "UNC",
            BlockStatus::Idnf => "IDNF",
            BlockStatus::Abrt => "ABRT",
            BlockStatus::Amnf => "AMNF",
        }
    }
}

impl fmt::Display for BlockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status and duration of one accessor call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockOutcome {
    pub status: BlockStatus,
    pub elapsed: Duration,
}

impl BlockOutcome {
    pub fn new(status: BlockStatus, elapsed: Duration) -> Self {
        Self { status, elapsed }
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }
}

/// Access to the source device, one block per call.
///
/// Implementations never report partial success: a short transfer is
/// `BlockStatus::Error`.
pub trait BlockAccessor: Send {
    fn api(&self) -> Api;

    fn capacity_sectors(&self) -> u64;

    /// Flush caches and disable read-ahead before a copy
    fn prepare_for_copy(&mut self) {}

    /// Read `buf.len() / SECTOR_SIZE` sectors starting at `lba` into `buf`
    fn read(&mut self, lba: u64, buf: &mut [u8]) -> BlockOutcome;

    /// Check that `sectors` sectors at `lba` are readable; `scratch` may be
    /// used as the transfer target.
    fn verify(&mut self, lba: u64, sectors: u64, scratch: &mut [u8]) -> BlockOutcome {
        let len = (sectors * SECTOR_SIZE) as usize;
        let len = len.min(scratch.len());
        self.read(lba, &mut scratch[..len])
    }

    /// Undo `prepare_for_copy` and release the device
    fn close(&mut self) -> SalvageResult<()> {
        Ok(())
    }
}

/// Open `path` through the requested access path
pub fn open_accessor(path: &Path, api: Api) -> SalvageResult<Box<dyn BlockAccessor>> {
    let accessor: Box<dyn BlockAccessor> = match api {
        Api::Ata => Box::new(AtaAccessor::open(path)?),
        Api::Posix => Box::new(PosixAccessor::open(path)?),
    };
    tracing::debug!(
        device = %path.display(),
        api = %api,
        sectors = accessor.capacity_sectors(),
        "Source opened"
    );
    Ok(accessor)
}
