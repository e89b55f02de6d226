// Smart: read around defects, probe the middle of large unknown zones,
// and only read through known-bad borders once nothing else is left.

use super::{common_update, select_task, task_from_current, CopyTask, NextTask};
use crate::zones::{Direction, ZoneTable};
use crate::{align_down, INDIVISIBLE_ZONE_SECTORS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmartState {
    pub(super) reverse: bool,
    /// Terminal stage: sweep forward through whatever is left
    fallback: bool,
}

impl SmartState {
    pub fn new(reverse: bool) -> Self {
        Self {
            reverse,
            fallback: false,
        }
    }

    pub fn in_fallback(&self) -> bool {
        self.fallback
    }

    pub(super) fn next_task(&mut self, table: &mut ZoneTable) -> NextTask {
        loop {
            if let Some(task) = task_from_current(table) {
                return NextTask::Read(task);
            }
            if table.is_empty() {
                return NextTask::Done;
            }
            if self.fallback {
                return select_task(table, 0, Direction::Forward);
            }
            if let Some((index, direction)) = self.clean_border(table) {
                return select_task(table, index, direction);
            }
            if self.split_largest(table) {
                continue;
            }

            tracing::info!(
                zones = table.len(),
                unread = table.unread_sectors(),
                "No clean borders left, reading through defects"
            );
            self.fallback = true;
        }
    }

    pub(super) fn apply_result(&mut self, table: &mut ZoneTable, task: &CopyTask, failed: bool) {
        common_update(table, task, failed);
        if failed && !self.fallback {
            table.clear_current();
        }
    }

    /// First zone with a clean begin; failing that, first with a clean end
    fn clean_border(&self, table: &ZoneTable) -> Option<(usize, Direction)> {
        if let Some(index) = table.iter().position(|z| !z.begin_defective) {
            return Some((index, Direction::Forward));
        }
        if self.reverse {
            if let Some(index) = table.iter().position(|z| !z.end_defective) {
                return Some((index, Direction::Backward));
            }
        }
        None
    }

    fn split_largest(&self, table: &mut ZoneTable) -> bool {
        let Some(index) = table.largest() else {
            return false;
        };
        let Some(zone) = table.get(index).copied() else {
            return false;
        };
        if zone.len() <= INDIVISIBLE_ZONE_SECTORS || table.is_at_capacity() {
            return false;
        }

        let at = align_down(zone.begin + zone.len() / 2);
        match table.split_at(index, at) {
            Some(_) => {
                tracing::debug!(
                    begin = zone.begin,
                    end = zone.end,
                    at,
                    zones = table.len(),
                    "Probing the middle of an enclosed zone"
                );
                true
            }
            None => false,
        }
    }
}
