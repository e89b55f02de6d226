// Read strategies - decide which sectors to read next and react to outcomes
//
// Every strategy works off the same zone table. Per-strategy state lives in
// the enum payload; the copy procedure only ever sees `ReadStrategy`.

mod plain;
mod skipfail;
mod smart;

pub use crate::zones::Direction;
pub use skipfail::SkipFailState;
pub use smart::SmartState;

use crate::options::StrategyKind;
use crate::zones::ZoneTable;
use crate::SECTORS_AT_ONCE;
use serde::Serialize;

/// One read handed to the block accessor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CopyTask {
    pub lba: u64,
    pub sectors: u64,
    pub direction: Direction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextTask {
    Read(CopyTask),
    /// The zone table is empty
    Done,
    /// Zones remain but none of them can be worked on
    Unresolved,
}

/// What the caller should do after a result has been applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    Abort,
}

#[derive(Debug, Clone)]
pub enum ReadStrategy {
    Plain,
    Smart(SmartState),
    SkipFail(SkipFailState),
}

impl ReadStrategy {
    pub fn new(kind: StrategyKind, skip_blocks: u64) -> Self {
        match kind {
            StrategyKind::Plain => ReadStrategy::Plain,
            StrategyKind::Smart | StrategyKind::SmartNoReverse => {
                ReadStrategy::Smart(SmartState::new(kind.allows_reverse()))
            }
            StrategyKind::SkipFail | StrategyKind::SkipFailNoReverse => {
                ReadStrategy::SkipFail(SkipFailState::new(kind.allows_reverse(), skip_blocks))
            }
        }
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            ReadStrategy::Plain => StrategyKind::Plain,
            ReadStrategy::Smart(state) if state.reverse => StrategyKind::Smart,
            ReadStrategy::Smart(_) => StrategyKind::SmartNoReverse,
            ReadStrategy::SkipFail(state) if state.reverse => StrategyKind::SkipFail,
            ReadStrategy::SkipFail(_) => StrategyKind::SkipFailNoReverse,
        }
    }

    pub fn next_task(&mut self, table: &mut ZoneTable) -> NextTask {
        match self {
            ReadStrategy::Plain => plain::next_task(table),
            ReadStrategy::Smart(state) => state.next_task(table),
            ReadStrategy::SkipFail(state) => state.next_task(table),
        }
    }

    pub fn apply_result(&mut self, table: &mut ZoneTable, task: &CopyTask, failed: bool) -> Verdict {
        match self {
            ReadStrategy::Plain => plain::apply_result(table, task, failed),
            ReadStrategy::Smart(state) => {
                state.apply_result(table, task, failed);
                Verdict::Continue
            }
            ReadStrategy::SkipFail(state) => {
                state.apply_result(table, task, failed);
                Verdict::Continue
            }
        }
    }
}

/// Next span of the current zone, taken from the border the cursor points at
fn task_from_current(table: &ZoneTable) -> Option<CopyTask> {
    let cursor = table.current()?;
    let zone = table.get(cursor.index)?;
    let sectors = zone.len().min(SECTORS_AT_ONCE);
    let lba = match cursor.direction {
        Direction::Forward => zone.begin,
        Direction::Backward => zone.end - sectors,
    };
    Some(CopyTask {
        lba,
        sectors,
        direction: cursor.direction,
    })
}

fn select_task(table: &mut ZoneTable, index: usize, direction: Direction) -> NextTask {
    table.select(index, direction);
    match task_from_current(table) {
        Some(task) => NextTask::Read(task),
        None => NextTask::Unresolved,
    }
}

/// Consume the task's span from the border it was read from
fn common_update(table: &mut ZoneTable, task: &CopyTask, failed: bool) {
    let from_end = task.direction == Direction::Backward;
    let index = match table.current() {
        Some(cursor) if table.get(cursor.index).is_some_and(|z| z.contains(task.lba)) => {
            Some(cursor.index)
        }
        _ => table.iter().position(|z| z.contains(task.lba)),
    };
    if let Some(index) = index {
        table.shrink(index, task.sectors, from_end, failed);
    }
}
