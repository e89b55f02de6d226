// Tests for the zone table: construction, split, shrink, cursor bookkeeping
// and property tests for the disjointness/coverage invariants.

use super::*;
use proptest::prelude::*;

#[test]
fn test_new_table_covers_range() {
    let table = ZoneTable::new(100, 100_000);
    assert_eq!(table.len(), 1);
    assert_eq!(table.zones()[0], Zone::new(100, 100_000));
    assert_eq!(table.unread_sectors(), 99_900);
    assert!(table.current().is_none());
}

#[test]
fn test_empty_range_gives_empty_table() {
    assert!(ZoneTable::new(10, 10).is_empty());
    assert!(ZoneTable::new(20, 10).is_empty());
}

#[test]
fn test_split_at_midpoint() {
    let mut table = ZoneTable::new(100, 100_000);
    let zone = table.zones()[0];
    let at = crate::align_down(zone.begin + zone.len() / 2);
    assert_eq!(at, 49_920);

    let new_index = table.split_at(0, at).expect("split should succeed");
    assert_eq!(new_index, 1);

    let first = table.zones()[0];
    let second = table.zones()[1];
    assert_eq!((first.begin, first.end), (100, 49_920));
    assert_eq!((second.begin, second.end), (49_920, 100_000));
    assert!(!first.end_defective);
    assert!(!second.begin_defective);
    assert_eq!(table.unread_sectors(), 99_900);
}

#[test]
fn test_split_keeps_outer_flags() {
    let mut table =
        ZoneTable::from_zones(vec![Zone::new(0, 10 * SECTORS_AT_ONCE).with_defects(true, true)]);
    table.split_at(0, 4 * SECTORS_AT_ONCE).unwrap();

    assert!(table.zones()[0].begin_defective);
    assert!(!table.zones()[0].end_defective);
    assert!(!table.zones()[1].begin_defective);
    assert!(table.zones()[1].end_defective);
}

#[test]
fn test_split_rejects_unaligned_offset() {
    let mut table = ZoneTable::new(0, 10_000);
    assert!(table.split_at(0, 1000).is_none());
    assert_eq!(table.len(), 1);
}

#[test]
fn test_split_requires_pieces_longer_than_a_block() {
    let mut table = ZoneTable::new(0, 4 * SECTORS_AT_ONCE - 1);
    // Trailing piece would be 255 sectors
    assert!(table.split_at(0, 3 * SECTORS_AT_ONCE).is_none());
    // Leading piece would be exactly one block
    assert!(table.split_at(0, SECTORS_AT_ONCE).is_none());
    // Leading piece would be empty
    assert!(table.split_at(0, 0).is_none());
    assert!(table.split_at(0, 2 * SECTORS_AT_ONCE).is_some());
}

#[test]
fn test_carve_accepts_short_pieces() {
    let mut table = ZoneTable::from_zones(vec![Zone::new(356, 5 * SECTORS_AT_ONCE + 10)
        .with_defects(true, true)]);
    // Leading piece of 156 sectors
    assert_eq!(table.carve_at(0, 2 * SECTORS_AT_ONCE), Some(1));
    // Trailing piece of 10 sectors
    assert_eq!(table.carve_at(1, 5 * SECTORS_AT_ONCE), Some(2));

    let bounds: Vec<(u64, u64)> = table.iter().map(|z| (z.begin, z.end)).collect();
    assert_eq!(
        bounds,
        vec![(356, 512), (512, 1280), (1280, 1290)]
    );
    assert!(table.zones()[0].begin_defective);
    assert!(!table.zones()[1].begin_defective);
    assert!(table.zones()[2].end_defective);
    assert!(table.is_consistent());
}

#[test]
fn test_carve_rejects_borders_and_full_table() {
    let mut table = ZoneTable::new(100, 1000);
    assert!(table.carve_at(0, 100).is_none());
    assert!(table.carve_at(0, 1000).is_none());
    assert!(table.carve_at(0, 5000).is_none());

    let zones: Vec<Zone> = (0..MAX_ZONES as u64)
        .map(|i| Zone::new(i * 4096, i * 4096 + 2048))
        .collect();
    let mut full = ZoneTable::from_zones(zones);
    assert!(full.carve_at(0, 100).is_none());
}

#[test]
fn test_split_refused_at_capacity() {
    let zones: Vec<Zone> = (0..MAX_ZONES as u64)
        .map(|i| Zone::new(i * 4096, i * 4096 + 2048))
        .collect();
    let mut table = ZoneTable::from_zones(zones);
    assert!(table.is_at_capacity());
    assert!(table.split_at(0, 1024).is_none());
}

#[test]
fn test_split_shifts_cursor_behind_split_point() {
    let mut table = ZoneTable::from_zones(vec![
        Zone::new(0, 8 * SECTORS_AT_ONCE),
        Zone::new(10 * SECTORS_AT_ONCE, 12 * SECTORS_AT_ONCE),
    ]);
    table.select(1, Direction::Backward);
    table.split_at(0, 4 * SECTORS_AT_ONCE).unwrap();

    let cursor = table.current().unwrap();
    assert_eq!(cursor.index, 2);
    assert_eq!(cursor.direction, Direction::Backward);
    assert_eq!(table.current_zone().unwrap().begin, 10 * SECTORS_AT_ONCE);
}

#[test]
fn test_shrink_forward_sets_begin_flag() {
    let mut table = ZoneTable::new(0, 1000);
    assert!(!table.shrink(0, 256, false, true));
    let zone = table.zones()[0];
    assert_eq!(zone.begin, 256);
    assert!(zone.begin_defective);
    assert!(!zone.end_defective);

    table.shrink(0, 256, false, false);
    assert!(!table.zones()[0].begin_defective);
}

#[test]
fn test_shrink_backward_sets_end_flag() {
    let mut table = ZoneTable::new(0, 1000);
    table.shrink(0, 100, true, true);
    let zone = table.zones()[0];
    assert_eq!(zone.end, 900);
    assert!(zone.end_defective);
    assert!(!zone.begin_defective);
}

#[test]
fn test_shrink_to_empty_removes_zone_and_cursor() {
    let mut table = ZoneTable::from_zones(vec![Zone::new(0, 100), Zone::new(200, 300)]);
    table.select(0, Direction::Forward);
    assert!(table.shrink(0, 100, false, false));
    assert_eq!(table.len(), 1);
    assert!(table.current().is_none());
    assert_eq!(table.zones()[0].begin, 200);
}

#[test]
fn test_removal_shifts_cursor_down() {
    let mut table = ZoneTable::from_zones(vec![Zone::new(0, 100), Zone::new(200, 300)]);
    table.select(1, Direction::Forward);
    table.shrink(0, 100, true, false);
    let cursor = table.current().unwrap();
    assert_eq!(cursor.index, 0);
    assert_eq!(table.current_zone().unwrap().begin, 200);
}

#[test]
fn test_largest_prefers_first_on_tie() {
    let table = ZoneTable::from_zones(vec![
        Zone::new(0, 50),
        Zone::new(100, 200),
        Zone::new(300, 400),
    ]);
    assert_eq!(table.largest(), Some(1));
    assert_eq!(ZoneTable::default().largest(), None);
}

#[test]
fn test_from_zones_drops_empty() {
    let table = ZoneTable::from_zones(vec![Zone::new(0, 10), Zone::new(20, 20)]);
    assert_eq!(table.len(), 1);
}

#[derive(Debug, Clone)]
enum Op {
    Split { zone: usize, fraction: u8 },
    Shrink { zone: usize, sectors: u64, from_end: bool, failed: bool },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (any::<usize>(), any::<u8>()).prop_map(|(zone, fraction)| Op::Split { zone, fraction }),
        (any::<usize>(), 1u64..2048, any::<bool>(), any::<bool>()).prop_map(
            |(zone, sectors, from_end, failed)| Op::Shrink {
                zone,
                sectors,
                from_end,
                failed
            }
        ),
    ]
}

proptest! {
    #[test]
    fn prop_operations_keep_table_disjoint_and_covering(
        start in 0u64..10_000,
        length in 1u64..200_000,
        ops in proptest::collection::vec(op_strategy(), 0..64),
    ) {
        let end = start + length;
        let mut table = ZoneTable::new(start, end);
        let mut consumed = 0u64;

        for op in ops {
            if table.is_empty() {
                break;
            }
            match op {
                Op::Split { zone, fraction } => {
                    let index = zone % table.len();
                    let z = table.zones()[index];
                    let at = crate::align_down(z.begin + z.len() * fraction as u64 / 255);
                    table.split_at(index, at);
                }
                Op::Shrink { zone, sectors, from_end, failed } => {
                    let index = zone % table.len();
                    let taken = sectors.min(table.zones()[index].len());
                    table.shrink(index, sectors, from_end, failed);
                    consumed += taken;
                }
            }
            prop_assert!(table.is_consistent());
            prop_assert!(table.iter().all(|z| z.begin >= start && z.end <= end));
            prop_assert_eq!(table.unread_sectors() + consumed, length);
        }
    }
}
