// Zone table - the set of sectors that are neither read nor written off yet
//
// Zones are kept in an address-ordered Vec. The "current" zone is an index plus
// the direction it is being consumed in; every mutation that moves indices
// (split, removal) fixes the cursor up in the same call.

use crate::{MAX_ZONES, SECTORS_AT_ONCE};
use serde::Serialize;

/// Which border of a zone a task consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    /// Read upwards from `begin`
    Forward,
    /// Read downwards from `end`
    Backward,
}

/// Half-open range of unfinished sectors `[begin, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Zone {
    pub begin: u64,
    /// First sector beyond the zone
    pub end: u64,
    /// Last read touching `begin` failed
    pub begin_defective: bool,
    /// Last read touching `end` failed
    pub end_defective: bool,
}

impl Zone {
    pub fn new(begin: u64, end: u64) -> Self {
        Self {
            begin,
            end,
            begin_defective: false,
            end_defective: false,
        }
    }

    pub fn with_defects(mut self, begin_defective: bool, end_defective: bool) -> Self {
        self.begin_defective = begin_defective;
        self.end_defective = end_defective;
        self
    }

    pub fn len(&self) -> u64 {
        self.end - self.begin
    }

    pub fn is_empty(&self) -> bool {
        self.begin >= self.end
    }

    pub fn contains(&self, lba: u64) -> bool {
        self.begin <= lba && lba < self.end
    }

    /// Neither border is clean
    pub fn is_enclosed(&self) -> bool {
        self.begin_defective && self.end_defective
    }
}

/// Zone being consumed and the border it is consumed from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub index: usize,
    pub direction: Direction,
}

#[derive(Debug, Clone, Default)]
pub struct ZoneTable {
    zones: Vec<Zone>,
    current: Option<Cursor>,
}

impl ZoneTable {
    /// Table covering `[start_lba, end_lba)` with clean borders
    pub fn new(start_lba: u64, end_lba: u64) -> Self {
        let zones = if start_lba < end_lba {
            vec![Zone::new(start_lba, end_lba)]
        } else {
            Vec::new()
        };
        Self {
            zones,
            current: None,
        }
    }

    /// Build a table from zones that are already sorted and disjoint.
    /// Empty zones are dropped.
    pub fn from_zones(zones: Vec<Zone>) -> Self {
        let zones: Vec<Zone> = zones.into_iter().filter(|z| !z.is_empty()).collect();
        debug_assert!(zones.windows(2).all(|w| w[0].end <= w[1].begin));
        Self {
            zones,
            current: None,
        }
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Zone> {
        self.zones.get(index)
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn iter(&self) -> impl Iterator<Item = &Zone> {
        self.zones.iter()
    }

    /// Total sectors not yet finalized
    pub fn unread_sectors(&self) -> u64 {
        self.zones.iter().map(Zone::len).sum()
    }

    pub fn is_at_capacity(&self) -> bool {
        self.zones.len() >= MAX_ZONES
    }

    /// Index of the longest zone; the first one wins on ties
    pub fn largest(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (i, zone) in self.zones.iter().enumerate() {
            match best {
                Some(b) if self.zones[b].len() >= zone.len() => {}
                _ => best = Some(i),
            }
        }
        best
    }

    pub fn current(&self) -> Option<Cursor> {
        self.current
    }

    pub fn current_zone(&self) -> Option<&Zone> {
        self.current.and_then(|c| self.zones.get(c.index))
    }

    pub fn select(&mut self, index: usize, direction: Direction) {
        debug_assert!(index < self.zones.len());
        self.current = Some(Cursor { index, direction });
    }

    pub fn clear_current(&mut self) {
        self.current = None;
    }

    /// Split zone `index` at the block-aligned sector `at`.
    ///
    /// The leading piece keeps the original begin flag and gets a clean end, the
    /// trailing piece gets a clean begin and inherits the original end flag.
    /// Returns the index of the trailing piece, or `None` when `at` is not block
    /// aligned, either piece would not exceed one block, or the table is full.
    pub fn split_at(&mut self, index: usize, at: u64) -> Option<usize> {
        let zone = *self.zones.get(index)?;
        if at % SECTORS_AT_ONCE != 0 {
            return None;
        }
        if at <= zone.begin + SECTORS_AT_ONCE || at + SECTORS_AT_ONCE >= zone.end {
            return None;
        }
        self.divide(index, at)
    }

    /// Cut zone `index` at any interior sector, however short the pieces.
    /// Flags are handled as in `split_at`.
    pub fn carve_at(&mut self, index: usize, at: u64) -> Option<usize> {
        let zone = *self.zones.get(index)?;
        if at <= zone.begin || at >= zone.end {
            return None;
        }
        self.divide(index, at)
    }

    fn divide(&mut self, index: usize, at: u64) -> Option<usize> {
        if self.is_at_capacity() {
            return None;
        }
        let zone = *self.zones.get(index)?;
        let trailing = Zone {
            begin: at,
            end: zone.end,
            begin_defective: false,
            end_defective: zone.end_defective,
        };
        let leading = &mut self.zones[index];
        leading.end = at;
        leading.end_defective = false;
        self.zones.insert(index + 1, trailing);

        if let Some(cursor) = self.current.as_mut() {
            if cursor.index > index {
                cursor.index += 1;
            }
        }
        Some(index + 1)
    }

    /// Remove `sectors` from one border of zone `index` and record whether the
    /// read that consumed them failed. Returns `true` if the zone became empty
    /// and was removed.
    pub fn shrink(&mut self, index: usize, sectors: u64, from_end: bool, failed: bool) -> bool {
        let Some(zone) = self.zones.get_mut(index) else {
            return false;
        };
        let sectors = sectors.min(zone.len());
        if from_end {
            zone.end -= sectors;
            zone.end_defective = failed;
        } else {
            zone.begin += sectors;
            zone.begin_defective = failed;
        }

        if zone.is_empty() {
            self.remove(index);
            true
        } else {
            false
        }
    }

    fn remove(&mut self, index: usize) {
        self.zones.remove(index);
        self.current = match self.current {
            Some(c) if c.index == index => None,
            Some(c) if c.index > index => Some(Cursor {
                index: c.index - 1,
                ..c
            }),
            other => other,
        };
    }

    /// Sorted, disjoint and free of empty zones
    pub fn is_consistent(&self) -> bool {
        self.zones.iter().all(|z| z.begin < z.end)
            && self.zones.windows(2).all(|w| w[0].end <= w[1].begin)
            && self.current.map_or(true, |c| c.index < self.zones.len())
    }
}

#[cfg(test)]
mod zones_tests;
