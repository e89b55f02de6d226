// Procedure harness - the block-by-block lifecycle shared by copy, read test
// and zero fill.
//
// A procedure is opened with an explicit context, performed one block at a
// time by a runner, and closed by whoever owns it after the runner stops.

pub mod runner;


pub use runner::{perform_loop, spawn_detached, DetachedRun, Event, Joined, RunOutcome};

use crate::io::{BlockStatus, DeviceInfo};
use crate::SalvageResult;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Size of the worker-to-renderer report queue
pub const REPORT_QUEUE_CAPACITY: usize = 4096;

/// What happened to one block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockReport {
    pub lba: u64,
    pub sectors: u64,
    pub status: BlockStatus,
    pub elapsed: Duration,
    /// Source read fine but the destination write did not
    pub write_failed: bool,
}

impl BlockReport {
    pub fn new(lba: u64, sectors: u64, status: BlockStatus, elapsed: Duration) -> Self {
        Self {
            lba,
            sectors,
            status,
            elapsed,
            write_failed: false,
        }
    }
}

/// Sectors processed out of sectors to process
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub done: u64,
    pub total: u64,
}

impl Progress {
    pub fn new(done: u64, total: u64) -> Self {
        Self { done, total }
    }

    pub fn advance(&mut self, sectors: u64) {
        self.done = (self.done + sectors).min(self.total);
    }

    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.done as f64 / self.total as f64
        }
    }

    pub fn is_complete(&self) -> bool {
        self.done >= self.total
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Block processed, keep going
    Continue(BlockReport),
    /// Block processed and the procedure gave up
    Abort(BlockReport),
    /// Nothing left to do
    Complete,
}

/// Cooperative stop flag, checked between blocks
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// Shared flag for signal handlers
    pub fn as_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }
}

/// Everything a procedure may learn about its environment at open time
#[derive(Debug, Clone)]
pub struct ProcedureContext {
    pub device: PathBuf,
    pub info: Option<DeviceInfo>,
    pub token: CancellationToken,
}

impl ProcedureContext {
    pub fn new(device: impl Into<PathBuf>) -> Self {
        Self {
            device: device.into(),
            info: None,
            token: CancellationToken::new(),
        }
    }

    /// Context with device information filled in
    pub fn probe(device: &Path) -> SalvageResult<Self> {
        let info = DeviceInfo::probe(device)?;
        Ok(Self {
            device: device.to_path_buf(),
            info: Some(info),
            token: CancellationToken::new(),
        })
    }

    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn ata_capable(&self) -> bool {
        self.info.as_ref().is_some_and(|info| info.ata_capable)
    }
}

pub trait Procedure: Send {
    fn name(&self) -> &'static str;

    /// Bytes per block
    fn block_size(&self) -> usize;

    fn perform(&mut self) -> SalvageResult<Step>;

    fn progress(&self) -> Progress;

    /// Release devices and files. Safe to call more than once.
    fn close(&mut self) -> SalvageResult<()>;
}

impl<P: Procedure + ?Sized> Procedure for Box<P> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn block_size(&self) -> usize {
        (**self).block_size()
    }

    fn perform(&mut self) -> SalvageResult<Step> {
        (**self).perform()
    }

    fn progress(&self) -> Progress {
        (**self).progress()
    }

    fn close(&mut self) -> SalvageResult<()> {
        (**self).close()
    }
}

/// Registered procedures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProcedureKind {
    ReadTest,
    ZeroFill,
    Copy,
}

impl ProcedureKind {
    pub const ALL: [ProcedureKind; 3] = [
        ProcedureKind::ReadTest,
        ProcedureKind::ZeroFill,
        ProcedureKind::Copy,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ProcedureKind::ReadTest => "read_test",
            ProcedureKind::ZeroFill => "zero_fill",
            ProcedureKind::Copy => "copy",
        }
    }

    pub fn long_name(&self) -> &'static str {
        match self {
            ProcedureKind::ReadTest => "Test device with reading",
            ProcedureKind::ZeroFill => "Fill device with zeros",
            ProcedureKind::Copy => "Copy device to file, working around defects",
        }
    }

    /// Overwrites the device it runs on
    pub fn is_destructive(&self) -> bool {
        matches!(self, ProcedureKind::ZeroFill)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}
