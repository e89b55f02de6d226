// Plain: one forward sweep, the first failure ends the run

use super::{common_update, select_task, task_from_current, CopyTask, NextTask, Verdict};
use crate::zones::{Direction, ZoneTable};

pub(super) fn next_task(table: &mut ZoneTable) -> NextTask {
    if let Some(task) = task_from_current(table) {
        return NextTask::Read(task);
    }
    if table.is_empty() {
        return NextTask::Done;
    }
    select_task(table, 0, Direction::Forward)
}

pub(super) fn apply_result(table: &mut ZoneTable, task: &CopyTask, failed: bool) -> Verdict {
    common_update(table, task, failed);
    if failed {
        tracing::error!(lba = task.lba, sectors = task.sectors, "Read failed, aborting plain copy");
        Verdict::Abort
    } else {
        Verdict::Continue
    }
}
