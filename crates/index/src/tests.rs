use super::*;

#[test]
fn key_column_is_always_enabled() {
    let index = Index::new(5, 0);
    assert!(index.is_enabled(0));
    assert!(!index.is_enabled(1));
}

#[test]
fn put_then_lookup_both_directions() {
    let index = Index::new(3, 0);
    index.put(0, Rid(1), 100);
    index.put(0, Rid(2), 200);

    assert_eq!(index.value_by_rid(0, Rid(1)), Some(100));
    assert_eq!(index.rids_by_value(0, 200), vec![Rid(2)]);
    assert_eq!(index.rids_by_value(0, 300), Vec::<Rid>::new());
}

#[test]
fn put_moves_a_rid_between_values() {
    let index = Index::new(2, 0);
    index.put(0, Rid(1), 10);
    index.put(0, Rid(1), 20);

    assert_eq!(index.rids_by_value(0, 10), Vec::<Rid>::new());
    assert_eq!(index.rids_by_value(0, 20), vec![Rid(1)]);
    assert_eq!(index.value_by_rid(0, Rid(1)), Some(20));
}

#[test]
fn duplicate_values_collect_multiple_rids() {
    let index = Index::new(2, 0);
    index.create_index(1).unwrap();
    index.put(1, Rid(1), 7);
    index.put(1, Rid(2), 7);
    index.put(1, Rid(3), 8);

    assert_eq!(index.rids_by_value(1, 7), vec![Rid(1), Rid(2)]);
}

#[test]
fn range_scan_is_inclusive() {
    let index = Index::new(1, 0);
    for k in 0..10 {
        index.put(0, Rid(k + 1), k);
    }
    let rids = index.rids_in_range(0, 3, 6);
    assert_eq!(rids, vec![Rid(4), Rid(5), Rid(6), Rid(7)]);
}

#[test]
fn erase_removes_both_directions() {
    let index = Index::new(1, 0);
    index.put(0, Rid(1), 5);
    index.erase(0, Rid(1));

    assert_eq!(index.value_by_rid(0, Rid(1)), None);
    assert_eq!(index.rids_by_value(0, 5), Vec::<Rid>::new());
}

#[test]
fn erase_all_touches_every_enabled_column() {
    let index = Index::new(3, 0);
    index.create_index(2).unwrap();
    index.put(0, Rid(1), 5);
    index.put(2, Rid(1), 50);

    index.erase_all(Rid(1));
    assert_eq!(index.value_by_rid(0, Rid(1)), None);
    assert_eq!(index.value_by_rid(2, Rid(1)), None);
}

#[test]
fn disabled_columns_ignore_puts() {
    let index = Index::new(2, 0);
    index.put(1, Rid(1), 9);
    assert_eq!(index.value_by_rid(1, Rid(1)), None);
}

#[test]
fn dropping_the_key_index_is_refused() {
    let index = Index::new(2, 0);
    let err = index.drop_index(0).unwrap_err();
    assert!(matches!(err, DbError::Invariant(_)));

    index.create_index(1).unwrap();
    index.drop_index(1).unwrap();
    assert!(!index.is_enabled(1));
}

#[test]
fn rids_lists_everything_in_a_column() {
    let index = Index::new(1, 0);
    index.put(0, Rid(3), 1);
    index.put(0, Rid(1), 2);
    let mut rids = index.rids(0);
    rids.sort();
    assert_eq!(rids, vec![Rid(1), Rid(3)]);
}
