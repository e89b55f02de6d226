// Sector journal - persisted per-sector read outcome
//
// One byte per source sector: 0 unread, 1 read ok, 2 failed as part of a
// block read, 3 failed as a single-sector read. The file length equals the
// source capacity in sectors, so an interrupted copy can rebuild its zone
// table from the runs of unread sectors.

pub mod store;

pub use store::{MemoryStore, MmapStore, SectorStatusStore};

use crate::zones::{Zone, ZoneTable};
use crate::{SalvageError, SalvageResult};
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum SectorStatus {
    Unread = 0,
    ReadOk = 1,
    BlockReadError = 2,
    SectorReadError = 3,
}

impl SectorStatus {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(SectorStatus::Unread),
            1 => Some(SectorStatus::ReadOk),
            2 => Some(SectorStatus::BlockReadError),
            3 => Some(SectorStatus::SectorReadError),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            SectorStatus::BlockReadError | SectorStatus::SectorReadError
        )
    }

    /// Classification written for a finished read
    pub fn for_outcome(failed: bool, sectors: u64) -> Self {
        match (failed, sectors) {
            (false, _) => SectorStatus::ReadOk,
            (true, 1) => SectorStatus::SectorReadError,
            (true, _) => SectorStatus::BlockReadError,
        }
    }
}

/// Sector totals per classification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JournalCounts {
    pub unread: u64,
    pub read_ok: u64,
    pub failed: u64,
}

pub struct Journal {
    store: Box<dyn SectorStatusStore>,
    path: Option<PathBuf>,
    restored: bool,
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("path", &self.path)
            .field("sectors", &self.store.len())
            .field("restored", &self.restored)
            .finish()
    }
}

impl Journal {
    /// Map an existing journal of `total_sectors` entries, or create a
    /// zero-filled one.
    pub fn open_or_create(path: &Path, total_sectors: u64) -> SalvageResult<Self> {
        if total_sectors == 0 {
            return Err(SalvageError::Journal("source has no sectors".to_string()));
        }
        let existing = match std::fs::metadata(path) {
            Ok(meta) => Some(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(SalvageError::Open {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        if let Some(found) = existing {
            if found != total_sectors {
                return Err(SalvageError::JournalSizeMismatch {
                    expected: total_sectors,
                    found,
                });
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(existing.is_none())
            .open(path)
            .map_err(|source| SalvageError::Open {
                path: path.to_path_buf(),
                source,
            })?;

        if existing.is_none() {
            file.set_len(total_sectors)?;
            file.sync_all()?;
            tracing::info!(path = %path.display(), sectors = total_sectors, "Created journal");
        } else {
            tracing::info!(path = %path.display(), sectors = total_sectors, "Restoring from journal");
        }

        let store = MmapStore::new(file)
            .map_err(|e| SalvageError::Journal(format!("failed to map {}: {}", path.display(), e)))?;

        Ok(Self {
            store: Box::new(store),
            path: Some(path.to_path_buf()),
            restored: existing.is_some(),
        })
    }

    /// Journal that lives only as long as the process
    pub fn in_memory(total_sectors: u64) -> Self {
        Self::with_store(Box::new(MemoryStore::new(total_sectors)), false)
    }

    pub fn with_store(store: Box<dyn SectorStatusStore>, restored: bool) -> Self {
        Self {
            store,
            path: None,
            restored,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Opened from a previous run's file
    pub fn is_restored(&self) -> bool {
        self.restored
    }

    pub fn total_sectors(&self) -> u64 {
        self.store.len()
    }

    pub fn status(&self, lba: u64) -> Option<SectorStatus> {
        self.store
            .get_range(lba, 1)
            .first()
            .and_then(|&b| SectorStatus::from_byte(b))
    }

    /// Store the outcome of a read over `[lba, lba + sectors)`.
    /// Persistence problems are logged; the copy itself goes on.
    pub fn record(&mut self, lba: u64, sectors: u64, failed: bool) {
        let status = SectorStatus::for_outcome(failed, sectors);
        self.store.set_range(lba, sectors, status as u8);
        if let Err(e) = self.store.flush_async() {
            tracing::warn!(lba, error = %e, "Journal flush failed");
        }
    }

    /// Zone table of the unread runs inside `[start_lba, end_lba)`.
    ///
    /// A failed sector right next to a run marks that border defective.
    pub fn rebuild_zones(&self, start_lba: u64, end_lba: u64) -> ZoneTable {
        let end_lba = end_lba.min(self.store.len());
        if start_lba >= end_lba {
            return ZoneTable::default();
        }

        let bytes = self.store.get_range(start_lba, end_lba - start_lba);
        let mut zones = Vec::new();
        let mut run_start: Option<u64> = None;

        for (offset, &byte) in bytes.iter().enumerate() {
            let lba = start_lba + offset as u64;
            match (byte == SectorStatus::Unread as u8, run_start) {
                (true, None) => run_start = Some(lba),
                (false, Some(begin)) => {
                    zones.push(self.zone_with_flags(begin, lba));
                    run_start = None;
                }
                _ => {}
            }
        }
        if let Some(begin) = run_start {
            zones.push(self.zone_with_flags(begin, end_lba));
        }

        ZoneTable::from_zones(zones)
    }

    fn zone_with_flags(&self, begin: u64, end: u64) -> Zone {
        let failed_at = |lba: u64| self.status(lba).is_some_and(|s| s.is_failure());
        let begin_defective = begin > 0 && failed_at(begin - 1);
        let end_defective = failed_at(end);
        Zone::new(begin, end).with_defects(begin_defective, end_defective)
    }

    pub fn counts(&self, start_lba: u64, end_lba: u64) -> JournalCounts {
        let end_lba = end_lba.min(self.store.len());
        let mut counts = JournalCounts::default();
        if start_lba >= end_lba {
            return counts;
        }
        for &byte in self.store.get_range(start_lba, end_lba - start_lba) {
            match SectorStatus::from_byte(byte) {
                Some(SectorStatus::ReadOk) => counts.read_ok += 1,
                Some(s) if s.is_failure() => counts.failed += 1,
                _ => counts.unread += 1,
            }
        }
        counts
    }

    /// Flush synchronously and release the mapping
    pub fn close(self) -> SalvageResult<()> {
        self.store
            .flush()
            .map_err(|e| SalvageError::Journal(format!("final flush failed: {}", e)))
    }
}

/// Journal file for a source: `<name>.journal` in the working directory
pub fn default_journal_path(source: &Path) -> PathBuf {
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "source".to_string());
    PathBuf::from(format!("{}.journal", name))
}
