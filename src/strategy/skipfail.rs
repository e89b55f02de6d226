// Skip-fail: jump a fixed distance past a failure instead of bisecting.
// Converges faster than smart on long contiguous bad runs.

use super::{common_update, select_task, task_from_current, CopyTask, NextTask};
use crate::zones::{Direction, ZoneTable};
use crate::{align_down, SECTORS_AT_ONCE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipFailState {
    pub(super) reverse: bool,
    skip_blocks: u64,
}

impl SkipFailState {
    pub fn new(reverse: bool, skip_blocks: u64) -> Self {
        Self {
            reverse,
            skip_blocks: skip_blocks.max(1),
        }
    }

    pub fn skip_sectors(&self) -> u64 {
        self.skip_blocks * SECTORS_AT_ONCE
    }

    pub(super) fn next_task(&mut self, table: &mut ZoneTable) -> NextTask {
        if let Some(task) = task_from_current(table) {
            return NextTask::Read(task);
        }
        if table.is_empty() {
            return NextTask::Done;
        }

        let last = table.len() - 1;
        let skip = self.skip_sectors();
        for index in 0..table.len() {
            let Some(zone) = table.get(index).copied() else {
                break;
            };
            if !zone.begin_defective {
                return select_task(table, index, Direction::Forward);
            }
            // The true end of the range is never read backwards
            if self.reverse && !zone.end_defective && index != last {
                return select_task(table, index, Direction::Backward);
            }
            if zone.len() > skip {
                let at = align_down(zone.begin + skip);
                if let Some(carved) = table.carve_at(index, at) {
                    tracing::debug!(begin = zone.begin, at, "Skipping past failure");
                    return if self.reverse {
                        select_task(table, index, Direction::Backward)
                    } else {
                        select_task(table, carved, Direction::Forward)
                    };
                }
            }
        }

        if table.is_at_capacity() {
            tracing::debug!(zones = table.len(), "Zone limit reached, sweeping forward");
            return select_task(table, 0, Direction::Forward);
        }
        NextTask::Unresolved
    }

    pub(super) fn apply_result(&mut self, table: &mut ZoneTable, task: &CopyTask, failed: bool) {
        common_update(table, task, failed);
        if failed {
            table.clear_current();
        }
    }
}
