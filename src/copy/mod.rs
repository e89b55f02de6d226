// Copy procedure - defect-aware imaging of a source device into a file
//
// Every perform call asks the read strategy for one task, reads it from the
// source, writes good data to the same offset of the destination, journals
// the source-side classification and feeds it back into the zone table.

use crate::io::{self, AlignedBuffer, BlockAccessor, BlockStatus};
use crate::journal::{default_journal_path, Journal};
use crate::options::{CopyOptions, StrategyKind};
use crate::procedure::{BlockReport, Procedure, ProcedureContext, Progress, Step};
use crate::strategy::{NextTask, ReadStrategy, Verdict};
use crate::zones::ZoneTable;
use crate::{SalvageError, SalvageResult, BLOCK_SIZE, SECTOR_SIZE};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::time::Instant;

/// Snapshot of a copy's results so far
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CopySummary {
    pub strategy: StrategyKind,
    pub read_ok_sectors: u64,
    pub failed_sectors: u64,
    pub unresolved_sectors: u64,
    pub zones_remaining: usize,
    pub write_failures: u64,
    pub progress: Progress,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct Tally {
    read_ok: u64,
    failed: u64,
    write_failures: u64,
}

pub struct CopyProcedure {
    source: Box<dyn BlockAccessor>,
    destination: File,
    journal: Option<Journal>,
    strategy: ReadStrategy,
    table: ZoneTable,
    buffer: AlignedBuffer,
    start_lba: u64,
    end_lba: u64,
    progress: Progress,
    tally: Tally,
    started: Instant,
    finished: bool,
    closed: bool,
}

impl CopyProcedure {
    /// Open the source named by the context, the destination and, if enabled,
    /// the journal; then restore or start the zone table.
    pub fn open(ctx: &ProcedureContext, options: CopyOptions) -> SalvageResult<Self> {
        options.validate()?;
        let source = io::open_accessor(&ctx.device, options.api)?;

        let journal = if options.use_journal {
            let path = options
                .journal_file
                .clone()
                .unwrap_or_else(|| default_journal_path(&ctx.device));
            Some(Journal::open_or_create(&path, source.capacity_sectors())?)
        } else {
            None
        };

        // Earlier data stays in place when resuming
        let resuming = journal.as_ref().is_some_and(Journal::is_restored);
        let destination = open_destination(&options.dst_file, !resuming)?;

        Self::from_parts(source, destination, journal, options)
    }

    /// Assemble a copy from already opened parts
    pub fn from_parts(
        mut source: Box<dyn BlockAccessor>,
        destination: File,
        journal: Option<Journal>,
        options: CopyOptions,
    ) -> SalvageResult<Self> {
        let end_lba = source.capacity_sectors();
        let start_lba = options.start_lba;
        if start_lba >= end_lba {
            return Err(SalvageError::invalid_option(
                "start_lba",
                format!("{} is beyond the last sector {}", start_lba, end_lba),
            ));
        }

        let (table, tally) = match &journal {
            Some(journal) if journal.total_sectors() != end_lba => {
                return Err(SalvageError::JournalSizeMismatch {
                    expected: end_lba,
                    found: journal.total_sectors(),
                });
            }
            Some(journal) if journal.is_restored() => {
                let counts = journal.counts(start_lba, end_lba);
                let tally = Tally {
                    read_ok: counts.read_ok,
                    failed: counts.failed,
                    write_failures: 0,
                };
                (journal.rebuild_zones(start_lba, end_lba), tally)
            }
            _ => (ZoneTable::new(start_lba, end_lba), Tally::default()),
        };

        let total = end_lba - start_lba;
        let progress = Progress::new(total - table.unread_sectors(), total);
        if progress.done > 0 {
            tracing::info!(
                done = progress.done,
                total,
                zones = table.len(),
                "Resuming copy"
            );
        }

        let buffer = AlignedBuffer::page_aligned(BLOCK_SIZE)?;
        source.prepare_for_copy();

        Ok(Self {
            source,
            destination,
            journal,
            strategy: ReadStrategy::new(options.read_strategy, options.skip_blocks),
            table,
            buffer,
            start_lba,
            end_lba,
            progress,
            tally,
            started: Instant::now(),
            finished: false,
            closed: false,
        })
    }

    pub fn table(&self) -> &ZoneTable {
        &self.table
    }

    pub fn journal(&self) -> Option<&Journal> {
        self.journal.as_ref()
    }

    pub fn range(&self) -> (u64, u64) {
        (self.start_lba, self.end_lba)
    }

    pub fn summary(&self) -> CopySummary {
        CopySummary {
            strategy: self.strategy.kind(),
            read_ok_sectors: self.tally.read_ok,
            failed_sectors: self.tally.failed,
            unresolved_sectors: self.table.unread_sectors(),
            zones_remaining: self.table.len(),
            write_failures: self.tally.write_failures,
            progress: self.progress,
            elapsed_secs: self.started.elapsed().as_secs_f64(),
        }
    }

    fn finish(&mut self, next: NextTask) -> Step {
        if !self.finished {
            self.finished = true;
            match next {
                NextTask::Unresolved => tracing::warn!(
                    unresolved = self.table.unread_sectors(),
                    zones = self.table.len(),
                    "No zone can be worked on, leaving the rest unread"
                ),
                _ => tracing::info!(
                    ok = self.tally.read_ok,
                    failed = self.tally.failed,
                    "Copy finished"
                ),
            }
        }
        Step::Complete
    }
}

impl Procedure for CopyProcedure {
    fn name(&self) -> &'static str {
        "copy"
    }

    fn block_size(&self) -> usize {
        BLOCK_SIZE
    }

    fn perform(&mut self) -> SalvageResult<Step> {
        if self.closed {
            return Ok(Step::Complete);
        }
        let task = match self.strategy.next_task(&mut self.table) {
            NextTask::Read(task) => task,
            other => return Ok(self.finish(other)),
        };

        let len = (task.sectors * SECTOR_SIZE) as usize;
        let buf = &mut self.buffer.as_mut_slice()[..len];
        let outcome = self.source.read(task.lba, buf);
        let failed = outcome.status.is_failure();

        let mut write_failed = false;
        if !failed {
            if let Err(e) = self.destination.write_all_at(buf, task.lba * SECTOR_SIZE) {
                tracing::warn!(lba = task.lba, error = %e, "Destination write failed");
                write_failed = true;
            }
        }

        if let Some(journal) = self.journal.as_mut() {
            journal.record(task.lba, task.sectors, failed);
        }
        let verdict = self.strategy.apply_result(&mut self.table, &task, failed);
        self.progress.advance(task.sectors);

        if failed {
            self.tally.failed += task.sectors;
            tracing::debug!(lba = task.lba, status = %outcome.status, "Read failed");
        } else {
            self.tally.read_ok += task.sectors;
        }
        if write_failed {
            self.tally.write_failures += 1;
        }

        let report = BlockReport {
            lba: task.lba,
            sectors: task.sectors,
            status: if write_failed {
                BlockStatus::Error
            } else {
                outcome.status
            },
            elapsed: outcome.elapsed,
            write_failed,
        };
        Ok(match verdict {
            Verdict::Continue => Step::Continue(report),
            Verdict::Abort => Step::Abort(report),
        })
    }

    fn progress(&self) -> Progress {
        self.progress
    }

    fn close(&mut self) -> SalvageResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if let Err(e) = self.destination.sync_all() {
            tracing::warn!(error = %e, "Failed to sync destination");
        }
        if let Some(journal) = self.journal.take() {
            if let Err(e) = journal.close() {
                tracing::warn!(error = %e, "Journal not fully persisted");
            }
        }
        self.source.close()
    }
}

fn open_destination(path: &Path, truncate: bool) -> SalvageResult<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(truncate)
        .open(path)
        .map_err(|source| SalvageError::Open {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod copy_tests;
