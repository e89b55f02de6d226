// Copy procedure tests over an in-memory source with injected bad ranges

use super::*;
use crate::journal::{MemoryStore, SectorStatus};
use crate::options::Api;
use crate::io::BlockOutcome;
use std::time::Duration;
use tempfile::NamedTempFile;

/// In-memory source: sector `n` is filled with the byte `n as u8`
struct FakeSource {
    sectors: u64,
    bad: Vec<(u64, u64)>,
    reads: std::sync::Arc<std::sync::Mutex<Vec<u64>>>,
}

impl FakeSource {
    fn new(sectors: u64, bad: &[(u64, u64)]) -> Self {
        Self {
            sectors,
            bad: bad.to_vec(),
            reads: Default::default(),
        }
    }
}

impl BlockAccessor for FakeSource {
    fn api(&self) -> Api {
        Api::Posix
    }

    fn capacity_sectors(&self) -> u64 {
        self.sectors
    }

    fn read(&mut self, lba: u64, buf: &mut [u8]) -> BlockOutcome {
        self.reads.lock().unwrap().push(lba);
        let count = buf.len() as u64 / SECTOR_SIZE;
        let hit = self
            .bad
            .iter()
            .any(|&(begin, end)| lba < end && begin < lba + count);
        if hit || lba + count > self.sectors {
            return BlockOutcome::new(BlockStatus::Unc, Duration::from_micros(900));
        }
        for (i, chunk) in buf.chunks_mut(SECTOR_SIZE as usize).enumerate() {
            chunk.fill((lba + i as u64) as u8);
        }
        BlockOutcome::new(BlockStatus::Ok, Duration::from_micros(100))
    }
}

fn options(strategy: StrategyKind) -> CopyOptions {
    CopyOptions {
        read_strategy: strategy,
        dst_file: "unused.img".into(),
        skip_blocks: 4,
        ..CopyOptions::default()
    }
}

fn run_to_end(procedure: &mut CopyProcedure) -> Vec<Step> {
    let mut steps = Vec::new();
    loop {
        let step = procedure.perform().unwrap();
        steps.push(step);
        match step {
            Step::Continue(_) => {}
            _ => return steps,
        }
        assert!(steps.len() < 100_000);
    }
}

#[test]
fn test_clean_copy_matches_source() {
    let destination = NamedTempFile::new().unwrap();
    let mut procedure = CopyProcedure::from_parts(
        Box::new(FakeSource::new(2000, &[])),
        destination.reopen().unwrap(),
        Some(Journal::in_memory(2000)),
        options(StrategyKind::Smart),
    )
    .unwrap();

    let steps = run_to_end(&mut procedure);
    assert_eq!(steps.last(), Some(&Step::Complete));
    assert_eq!(procedure.progress(), Progress::new(2000, 2000));

    let summary = procedure.summary();
    assert_eq!(summary.read_ok_sectors, 2000);
    assert_eq!(summary.failed_sectors, 0);
    assert_eq!(summary.unresolved_sectors, 0);

    let journal = procedure.journal().unwrap();
    assert!((0..2000).all(|lba| journal.status(lba) == Some(SectorStatus::ReadOk)));
    procedure.close().unwrap();

    let image = std::fs::read(destination.path()).unwrap();
    assert_eq!(image.len(), 2000 * SECTOR_SIZE as usize);
    assert_eq!(image[1999 * SECTOR_SIZE as usize], (1999u64 as u8));
}

#[test]
fn test_plain_aborts_on_first_bad_block() {
    let destination = NamedTempFile::new().unwrap();
    let mut procedure = CopyProcedure::from_parts(
        Box::new(FakeSource::new(2000, &[(600, 601)])),
        destination.reopen().unwrap(),
        None,
        options(StrategyKind::Plain),
    )
    .unwrap();

    let steps = run_to_end(&mut procedure);
    assert_eq!(steps.len(), 3);
    match steps[2] {
        Step::Abort(report) => {
            assert_eq!(report.lba, 512);
            assert_eq!(report.status, BlockStatus::Unc);
        }
        other => panic!("expected abort, got {:?}", other),
    }
    assert_eq!(procedure.progress().done, 768);
}

#[test]
fn test_smart_copy_reads_around_defect() {
    let destination = NamedTempFile::new().unwrap();
    let source = FakeSource::new(4096, &[(1000, 1001)]);
    let reads = source.reads.clone();
    let mut procedure = CopyProcedure::from_parts(
        Box::new(source),
        destination.reopen().unwrap(),
        Some(Journal::in_memory(4096)),
        options(StrategyKind::Smart),
    )
    .unwrap();

    run_to_end(&mut procedure);
    let summary = procedure.summary();
    assert_eq!(summary.failed_sectors, 256);
    assert_eq!(summary.read_ok_sectors, 4096 - 256);

    // After the failure at block 768 the copy continues from the far end
    let reads = reads.lock().unwrap();
    let failure = reads.iter().position(|&lba| lba == 768).unwrap();
    assert_eq!(reads[failure + 1], 4096 - 256);

    let journal = procedure.journal().unwrap();
    assert_eq!(journal.status(1000), Some(SectorStatus::BlockReadError));
    assert_eq!(journal.status(767), Some(SectorStatus::ReadOk));
    assert_eq!(journal.status(1024), Some(SectorStatus::ReadOk));
}

#[test]
fn test_write_failure_is_reported_not_fatal() {
    let destination = NamedTempFile::new().unwrap();
    let read_only = File::open(destination.path()).unwrap();
    let mut procedure = CopyProcedure::from_parts(
        Box::new(FakeSource::new(512, &[])),
        read_only,
        Some(Journal::in_memory(512)),
        options(StrategyKind::Smart),
    )
    .unwrap();

    match procedure.perform().unwrap() {
        Step::Continue(report) => {
            assert!(report.write_failed);
            assert_eq!(report.status, BlockStatus::Error);
        }
        other => panic!("unexpected step {:?}", other),
    }
    // Source side still counts as read
    assert_eq!(
        procedure.journal().unwrap().status(0),
        Some(SectorStatus::ReadOk)
    );
    assert_eq!(procedure.table().unread_sectors(), 256);

    run_to_end(&mut procedure);
    assert_eq!(procedure.summary().write_failures, 2);
}

#[test]
fn test_start_lba_limits_range() {
    let destination = NamedTempFile::new().unwrap();
    let mut opts = options(StrategyKind::SmartNoReverse);
    opts.start_lba = 1024;
    let mut procedure = CopyProcedure::from_parts(
        Box::new(FakeSource::new(2048, &[])),
        destination.reopen().unwrap(),
        None,
        opts,
    )
    .unwrap();

    assert_eq!(procedure.range(), (1024, 2048));
    let steps = run_to_end(&mut procedure);
    assert_eq!(steps.len(), 5);
    match steps[0] {
        Step::Continue(report) => assert_eq!(report.lba, 1024),
        other => panic!("unexpected step {:?}", other),
    }
}

#[test]
fn test_start_lba_beyond_end_is_rejected() {
    let destination = NamedTempFile::new().unwrap();
    let mut opts = options(StrategyKind::Smart);
    opts.start_lba = 5000;
    let err = CopyProcedure::from_parts(
        Box::new(FakeSource::new(2048, &[])),
        destination.reopen().unwrap(),
        None,
        opts,
    )
    .err()
    .unwrap();
    assert!(err.is_configuration());
}

#[test]
fn test_journal_of_wrong_size_is_rejected() {
    let destination = NamedTempFile::new().unwrap();
    let err = CopyProcedure::from_parts(
        Box::new(FakeSource::new(2048, &[])),
        destination.reopen().unwrap(),
        Some(Journal::in_memory(1024)),
        options(StrategyKind::Smart),
    )
    .err()
    .unwrap();
    assert!(matches!(
        err,
        SalvageError::JournalSizeMismatch {
            expected: 2048,
            found: 1024
        }
    ));
}

#[test]
fn test_restored_journal_resumes_progress() {
    let mut bytes = vec![0u8; 2048];
    bytes[..1000].fill(SectorStatus::ReadOk as u8);
    bytes[1000..1256].fill(SectorStatus::BlockReadError as u8);
    let journal = Journal::with_store(Box::new(MemoryStore::from_bytes(bytes)), true);

    let destination = NamedTempFile::new().unwrap();
    let source = FakeSource::new(2048, &[]);
    let reads = source.reads.clone();
    let mut procedure = CopyProcedure::from_parts(
        Box::new(source),
        destination.reopen().unwrap(),
        Some(journal),
        options(StrategyKind::Smart),
    )
    .unwrap();

    assert_eq!(procedure.progress(), Progress::new(1256, 2048));
    assert_eq!(procedure.table().len(), 1);
    assert!(procedure.table().zones()[0].begin_defective);
    assert_eq!(procedure.summary().read_ok_sectors, 1000);
    assert_eq!(procedure.summary().failed_sectors, 256);

    run_to_end(&mut procedure);
    assert!(reads.lock().unwrap().iter().all(|&lba| lba >= 1256));
    assert!(procedure.progress().is_complete());
}

#[test]
fn test_skipfail_leaves_unresolved_zone() {
    let destination = NamedTempFile::new().unwrap();
    // Everything past sector 256 is unreadable
    let mut procedure = CopyProcedure::from_parts(
        Box::new(FakeSource::new(4096, &[(256, 4096)])),
        destination.reopen().unwrap(),
        None,
        options(StrategyKind::SkipFailNoReverse),
    )
    .unwrap();

    let steps = run_to_end(&mut procedure);
    assert_eq!(steps.last(), Some(&Step::Complete));
    let summary = procedure.summary();
    assert!(summary.unresolved_sectors > 0);
    assert_eq!(
        summary.read_ok_sectors + summary.failed_sectors + summary.unresolved_sectors,
        4096
    );

    // Complete is sticky
    assert_eq!(procedure.perform().unwrap(), Step::Complete);
}

#[test]
fn test_summary_serializes() {
    let destination = NamedTempFile::new().unwrap();
    let procedure = CopyProcedure::from_parts(
        Box::new(FakeSource::new(256, &[])),
        destination.reopen().unwrap(),
        None,
        options(StrategyKind::SkipFail),
    )
    .unwrap();

    let json = serde_json::to_value(procedure.summary()).unwrap();
    assert_eq!(json["strategy"], "skipfail");
    assert_eq!(json["progress"]["total"], 256);
}

#[test]
fn test_close_is_idempotent() {
    let destination = NamedTempFile::new().unwrap();
    let mut procedure = CopyProcedure::from_parts(
        Box::new(FakeSource::new(256, &[])),
        destination.reopen().unwrap(),
        Some(Journal::in_memory(256)),
        options(StrategyKind::Smart),
    )
    .unwrap();

    procedure.close().unwrap();
    procedure.close().unwrap();
    assert!(procedure.journal().is_none());
    assert_eq!(procedure.perform().unwrap(), Step::Complete);
}
