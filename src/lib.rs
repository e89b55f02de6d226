// Allow uppercase acronyms for industry-standard terms like ATA, LBA, UNC, IDNF
#![allow(clippy::upper_case_acronyms)]

//! Defect-aware imaging of failing block devices.
//!
//! The crate is organised bottom-up:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  procedure (runner, cancellation, reports)   │
//! └───────────────┬──────────────────────────────┘
//!                 │ drives
//!     ┌───────────┴────────────┬─────────────────┐
//!     ↓                        ↓                 ↓
//! ┌──────────┐          ┌────────────┐    ┌─────────────┐
//! │   copy   │          │ surface::  │    │ surface::   │
//! │          │          │ ReadTest   │    │ ZeroFill    │
//! └──┬───┬───┘          └─────┬──────┘    └──────┬──────┘
//!    │   │                    │                  │
//!    │   └──── strategy ── zones                 │
//!    │   └──── journal                           │
//!    └────────────────────── io (BlockAccessor) ─┘
//! ```
//!
//! Everything that touches the failing source goes through [`io::BlockAccessor`], so the
//! strategy, journal and copy logic can be exercised against in-memory fault models.

pub mod copy;
pub mod io;
pub mod journal;
pub mod options;
pub mod procedure;
pub mod strategy;
pub mod surface;
pub mod ui;
pub mod zones;

// Re-export the pieces a controller needs to drive a copy
pub use copy::{CopyProcedure, CopySummary};
pub use io::{BlockAccessor, BlockOutcome, BlockStatus};
pub use journal::{Journal, SectorStatus};
pub use options::{Api, CopyOptions, ReadTestOptions, StrategyKind};
pub use procedure::{
    BlockReport, CancellationToken, Procedure, ProcedureContext, ProcedureKind, Progress,
    RunOutcome, Step,
};
pub use strategy::{CopyTask, Direction, NextTask, ReadStrategy};
pub use zones::{Zone, ZoneTable};

use std::path::PathBuf;
use thiserror::Error;

/// Bytes per sector; every supported device is addressed in 512-byte units.
pub const SECTOR_SIZE: u64 = 512;

/// Sectors transferred by a single task.
pub const SECTORS_AT_ONCE: u64 = 256;

/// Transfer block size in bytes.
pub const BLOCK_SIZE: usize = (SECTORS_AT_ONCE * SECTOR_SIZE) as usize;

/// Zones larger than this (~500 MB) are probed in the middle before reading through defects.
pub const INDIVISIBLE_ZONE_SECTORS: u64 = 1_000_000;

/// Upper bound on the number of zones a table may grow to by splitting.
pub const MAX_ZONES: usize = 1000;

/// Default distance, in blocks, that the skip-fail strategies jump past a failure.
pub const DEFAULT_SKIP_BLOCKS: u64 = 5000;

#[derive(Error, Debug)]
pub enum SalvageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Access path not supported: {0}")]
    UnsupportedApi(String),

    #[error("Invalid option '{name}': {reason}")]
    InvalidOption { name: String, reason: String },

    #[error("Journal size mismatch: expected {expected} sectors, found {found}")]
    JournalSizeMismatch { expected: u64, found: u64 },

    #[error("Journal error: {0}")]
    Journal(String),

    #[error("Buffer allocation failed: {0}")]
    AllocationFailed(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Operation interrupted by user")]
    Interrupted,
}

impl SalvageError {
    pub fn invalid_option(name: impl Into<String>, reason: impl Into<String>) -> Self {
        SalvageError::InvalidOption {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Open-time failures that stop a procedure before it starts
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SalvageError::UnsupportedApi(_)
                | SalvageError::InvalidOption { .. }
                | SalvageError::JournalSizeMismatch { .. }
                | SalvageError::Config(_)
        )
    }
}

pub type SalvageResult<T> = Result<T, SalvageError>;

/// Round `lba` down to the start of its block.
pub fn align_down(lba: u64) -> u64 {
    lba - (lba % SECTORS_AT_ONCE)
}
