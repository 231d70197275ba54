use super::*;
use proptest::prelude::*;
use tempfile::tempdir;

#[test]
fn write_then_read_back() {
    let mut page = Page::new("/tmp/unused", 0, PageNumber(1));
    page.write(42).unwrap();
    page.write(-7).unwrap();

    assert_eq!(page.num_slots(), 2);
    assert_eq!(page.read(0), Some(42));
    assert_eq!(page.read(1), Some(-7));
    assert_eq!(page.read(2), None);
    assert!(page.is_dirty());
}

#[test]
fn update_rewrites_in_place() {
    let mut page = Page::new("/tmp/unused", 0, PageNumber(1));
    page.write(1).unwrap();
    page.update(0, 99).unwrap();
    assert_eq!(page.read(0), Some(99));

    let err = page.update(1, 5).unwrap_err();
    assert!(matches!(err, DbError::NotFound(_)));
}

#[test]
fn page_holds_exactly_511_slots() {
    let mut page = Page::new("/tmp/unused", 0, PageNumber(1));
    for i in 0..SLOTS_PER_PAGE {
        assert!(page.has_capacity(), "slot {i} should fit");
        page.write(i as i64).unwrap();
    }
    assert!(!page.has_capacity());
    let err = page.write(0).unwrap_err();
    assert!(matches!(err, DbError::CapacityExceeded));
}

#[test]
fn disk_round_trip_is_big_endian() {
    let dir = tempdir().unwrap();
    let mut page = Page::new(dir.path(), 2, PageNumber(5));
    page.write(0x0102030405060708).unwrap();
    page.flush_to_disk().unwrap();
    assert!(!page.is_dirty());

    let bytes = std::fs::read(page_file(dir.path(), 2, PageNumber(5))).unwrap();
    assert_eq!(&bytes[..8], &[0, 0, 0, 0, 0, 0, 0, 1]);
    assert_eq!(&bytes[8..16], &[1, 2, 3, 4, 5, 6, 7, 8]);

    let loaded = Page::load(dir.path(), 2, PageNumber(5)).unwrap();
    assert_eq!(loaded.num_slots(), 1);
    assert_eq!(loaded.read(0), Some(0x0102030405060708));
}

#[test]
fn truncated_file_drops_missing_slots() {
    let dir = tempdir().unwrap();
    let mut page = Page::new(dir.path(), 0, PageNumber(1));
    page.write(10).unwrap();
    page.write(20).unwrap();
    page.write(30).unwrap();
    page.flush_to_disk().unwrap();

    // Cut the file after the second slot.
    let path = page_file(dir.path(), 0, PageNumber(1));
    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..24]).unwrap();

    let loaded = Page::load(dir.path(), 0, PageNumber(1)).unwrap();
    assert_eq!(loaded.num_slots(), 2);
    assert_eq!(loaded.read(0), Some(10));
    assert_eq!(loaded.read(1), Some(20));
    assert_eq!(loaded.read(2), None);
}

#[test]
fn absurd_slot_count_is_corruption() {
    let dir = tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("data")).unwrap();
    let path = page_file(dir.path(), 0, PageNumber(1));
    std::fs::write(&path, 10_000u64.to_be_bytes()).unwrap();

    let err = Page::load(dir.path(), 0, PageNumber(1)).unwrap_err();
    assert!(matches!(err, DbError::Corruption(_)));
}

#[test]
fn first_range_base_pages_are_one_through_sixteen() {
    let range = PageRange::first(6, 16);
    assert_eq!(range.base_page(0, 0), PageNumber(1));
    assert_eq!(range.base_page(0, 15), PageNumber(16));
    assert_eq!(range.base_page(5, 0), PageNumber(1));
    assert!(range.has_base_capacity());
}

#[test]
fn tail_pages_start_at_seventeen() {
    let mut range = PageRange::first(2, 16);
    let mut numbers = PageNumbers::new(2, 16);

    let (ordinal, slot) = range.allocate_tail_slot(&mut numbers);
    assert_eq!((ordinal, slot), (0, 0));
    assert_eq!(range.tail_page(0, 0), PageNumber(17));
    assert_eq!(range.tail_page(1, 0), PageNumber(17));

    // Fill the first tail page; the next allocation opens page 18.
    for _ in 1..SLOTS_PER_PAGE {
        range.allocate_tail_slot(&mut numbers);
    }
    let (ordinal, slot) = range.allocate_tail_slot(&mut numbers);
    assert_eq!((ordinal, slot), (1, 0));
    assert_eq!(range.tail_page(0, 1), PageNumber(18));
}

#[test]
fn base_slots_walk_pages_in_lockstep() {
    let mut range = PageRange::first(3, 2);
    for i in 0..SLOTS_PER_PAGE {
        assert_eq!(range.allocate_base_slot(), Some((0, i as u32)));
    }
    assert_eq!(range.allocate_base_slot(), Some((1, 0)));
    for _ in 1..SLOTS_PER_PAGE {
        range.allocate_base_slot().unwrap();
    }
    assert!(!range.has_base_capacity());
    assert_eq!(range.allocate_base_slot(), None);
}

#[test]
fn later_ranges_draw_from_the_allocator() {
    let mut numbers = PageNumbers::new(2, 16);
    let mut first = PageRange::first(2, 16);
    first.allocate_tail_slot(&mut numbers); // consumes page 17 in both columns

    let second = PageRange::next(2, 16, &mut numbers);
    assert_eq!(second.base_page(0, 0), PageNumber(18));
    assert_eq!(second.base_page(1, 0), PageNumber(18));
}

#[test]
fn clear_tails_resets_the_chain() {
    let mut range = PageRange::first(2, 16);
    let mut numbers = PageNumbers::new(2, 16);
    range.allocate_tail_slot(&mut numbers);
    assert_eq!(range.tail_pages(0).len(), 1);

    range.clear_tails();
    assert!(range.tail_pages(0).is_empty());
    let (ordinal, slot) = range.allocate_tail_slot(&mut numbers);
    assert_eq!((ordinal, slot), (0, 0));
    // Dropped page numbers are never reused.
    assert_eq!(range.tail_page(0, 0), PageNumber(18));
}

proptest! {
    #[test]
    fn slot_values_survive_the_disk(values in proptest::collection::vec(any::<i64>(), 1..64)) {
        let dir = tempdir().unwrap();
        let mut page = Page::new(dir.path(), 1, PageNumber(3));
        for v in &values {
            page.write(*v).unwrap();
        }
        page.flush_to_disk().unwrap();

        let loaded = Page::load(dir.path(), 1, PageNumber(3)).unwrap();
        prop_assert_eq!(loaded.num_slots(), values.len());
        for (i, v) in values.iter().enumerate() {
            prop_assert_eq!(loaded.read(i), Some(*v));
        }
    }
}
