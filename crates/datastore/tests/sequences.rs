use basalt_datastore::{
    Database, Error, Options, Range, SequenceInfo, SortOrder, Value,
};
use basalt_kv::memory::MemoryEngine;
use pretty_assertions::assert_eq;

fn bounded_sequence(name: &str, min: i64, max: i64, cache: u64) -> SequenceInfo {
    SequenceInfo {
        name: name.into(),
        increment_by: 1,
        min,
        max,
        start: min,
        cache,
        cycle: false,
        owner: None,
    }
}

/// Reads the persisted lease straight out of the `__sequence` table.
fn persisted_lease(db: &Database, name: &str) -> Option<i64> {
    let tx = db.begin(false).unwrap();
    let table = tx.catalog().get_table("__sequence").unwrap();
    let key = basalt_datastore::Key::from_values(
        &[Value::Text(name.to_owned())],
        SortOrder::ASC,
    );
    let row = table.get(&tx, &key).unwrap();
    match row.get("seq").unwrap() {
        Some(Value::Bigint(lease)) => Some(lease),
        _ => None,
    }
}

#[test]
fn exhaustion_and_restart() {
    let engine = MemoryEngine::new();
    let db = Database::open(engine.clone(), Options::default()).unwrap();

    let mut tx = db.begin(true).unwrap();
    tx.catalog_writer()
        .unwrap()
        .create_sequence(bounded_sequence("s", 1, 3, 2))
        .unwrap();
    let sequence = tx.catalog().get_sequence("s").unwrap();
    assert_eq!(sequence.next(&mut tx).unwrap(), 1);
    assert_eq!(sequence.next(&mut tx).unwrap(), 2);
    assert_eq!(sequence.next(&mut tx).unwrap(), 3);
    match sequence.next(&mut tx).unwrap_err() {
        Error::SequenceExhausted(name) => assert_eq!(&*name, "s"),
        other => panic!("unexpected error {other}"),
    }
    tx.commit().unwrap();
    assert!(persisted_lease(&db, "s").unwrap() >= 3);

    // A restart resumes from the lease; the sequence stays exhausted.
    db.close().unwrap();
    let db = Database::open(engine, Options::default()).unwrap();
    let mut tx = db.begin(true).unwrap();
    let sequence = tx.catalog().get_sequence("s").unwrap();
    assert!(matches!(
        sequence.next(&mut tx).unwrap_err(),
        Error::SequenceExhausted(_)
    ));
}

#[test]
fn lease_is_an_upper_bound_on_served_values() {
    let engine = MemoryEngine::new();
    let db = Database::open(engine.clone(), Options::default()).unwrap();

    let mut tx = db.begin(true).unwrap();
    tx.catalog_writer()
        .unwrap()
        .create_sequence(bounded_sequence("s", 1, 1_000_000, 10))
        .unwrap();
    tx.commit().unwrap();

    let mut last = 0;
    for _ in 0..3 {
        let mut tx = db.begin(true).unwrap();
        let sequence = tx.catalog().get_sequence("s").unwrap();
        for _ in 0..7 {
            let value = sequence.next(&mut tx).unwrap();
            assert_eq!(value, last + 1);
            last = value;
        }
        tx.commit().unwrap();
        assert!(persisted_lease(&db, "s").unwrap() >= last);
    }

    // An unclean restart may skip values but never repeats one.
    db.close().unwrap();
    let db = Database::open(engine, Options::default()).unwrap();
    let mut tx = db.begin(true).unwrap();
    let sequence = tx.catalog().get_sequence("s").unwrap();
    assert!(sequence.next(&mut tx).unwrap() > last);
}

#[test]
fn values_survive_a_crash_without_repeating() {
    let engine = MemoryEngine::new();
    let db = Database::open(engine.clone(), Options::default()).unwrap();

    let mut tx = db.begin(true).unwrap();
    tx.catalog_writer()
        .unwrap()
        .create_sequence(bounded_sequence("s", 1, 1_000_000, 50))
        .unwrap();
    let sequence = tx.catalog().get_sequence("s").unwrap();
    let mut served = Vec::new();
    for _ in 0..5 {
        served.push(sequence.next(&mut tx).unwrap());
    }
    tx.commit().unwrap();

    // Simulate a crash: reopen the same store without a clean close.
    let db = Database::open(engine, Options::default()).unwrap();
    let mut tx = db.begin(true).unwrap();
    let sequence = tx.catalog().get_sequence("s").unwrap();
    let next = sequence.next(&mut tx).unwrap();
    assert!(next > *served.last().unwrap());
    // In exchange for the cached lease, at most cache - 1 values may be
    // skipped.
    assert!(next <= served.last().unwrap() + 50);
    let _ = db;
}

#[test]
fn rollback_invalidates_the_cached_lease() {
    let db = Database::open_memory().unwrap();
    let mut tx = db.begin(true).unwrap();
    tx.catalog_writer()
        .unwrap()
        .create_sequence(bounded_sequence("s", 1, 1_000_000, 10))
        .unwrap();
    tx.commit().unwrap();

    let mut served = Vec::new();
    for round in 0..4 {
        let mut tx = db.begin(true).unwrap();
        let sequence = tx.catalog().get_sequence("s").unwrap();
        let value = sequence.next(&mut tx).unwrap();
        assert!(served.last().map_or(true, |&last| value > last));
        served.push(value);
        if round % 2 == 0 {
            tx.rollback();
        } else {
            tx.commit().unwrap();
            // The persisted lease covers everything served so far, even
            // across the rolled-back rounds before it.
            assert!(persisted_lease(&db, "s").unwrap() >= value);
        }
    }
}

#[test]
fn cycling_wraps_to_the_opposite_bound() {
    let db = Database::open_memory().unwrap();
    let mut tx = db.begin(true).unwrap();
    let mut info = bounded_sequence("s", 1, 3, 1);
    info.cycle = true;
    tx.catalog_writer().unwrap().create_sequence(info).unwrap();
    let sequence = tx.catalog().get_sequence("s").unwrap();
    let values: Vec<i64> = (0..5).map(|_| sequence.next(&mut tx).unwrap()).collect();
    assert_eq!(values, vec![1, 2, 3, 1, 2]);
}

#[test]
fn descending_sequences() {
    let db = Database::open_memory().unwrap();
    let mut tx = db.begin(true).unwrap();
    let info = SequenceInfo {
        name: "down".into(),
        increment_by: -2,
        min: 0,
        max: 10,
        start: 10,
        cache: 3,
        cycle: false,
        owner: None,
    };
    tx.catalog_writer().unwrap().create_sequence(info).unwrap();
    let sequence = tx.catalog().get_sequence("down").unwrap();
    let values: Vec<i64> = (0..6).map(|_| sequence.next(&mut tx).unwrap()).collect();
    assert_eq!(values, vec![10, 8, 6, 4, 2, 0]);
    assert!(sequence.next(&mut tx).unwrap_err().is_sequence_exhausted());
}

#[test]
fn read_only_transactions_cannot_advance_sequences() {
    let db = Database::open_memory().unwrap();
    let mut tx = db.begin(true).unwrap();
    tx.catalog_writer()
        .unwrap()
        .create_sequence(bounded_sequence("s", 1, 100, 1))
        .unwrap();
    tx.commit().unwrap();

    let mut ro = db.begin(false).unwrap();
    let sequence = ro.catalog().get_sequence("s").unwrap();
    assert!(matches!(
        sequence.next(&mut ro).unwrap_err(),
        Error::ReadOnlyTransaction
    ));
}

#[test]
fn cache_zero_behaves_like_one() {
    let db = Database::open_memory().unwrap();
    let mut tx = db.begin(true).unwrap();
    tx.catalog_writer()
        .unwrap()
        .create_sequence(bounded_sequence("s", 1, 100, 0))
        .unwrap();
    assert_eq!(tx.catalog().get_sequence_info("s").unwrap().cache, 1);
    let sequence = tx.catalog().get_sequence("s").unwrap();
    assert_eq!(sequence.next(&mut tx).unwrap(), 1);
    assert_eq!(sequence.next(&mut tx).unwrap(), 2);
}

#[test]
fn dropped_sequences_are_gone_after_commit() {
    let db = Database::open_memory().unwrap();
    let mut tx = db.begin(true).unwrap();
    tx.catalog_writer()
        .unwrap()
        .create_sequence(bounded_sequence("s", 1, 100, 5))
        .unwrap();
    let sequence = tx.catalog().get_sequence("s").unwrap();
    sequence.next(&mut tx).unwrap();
    tx.commit().unwrap();

    let mut tx = db.begin(true).unwrap();
    tx.catalog_writer().unwrap().drop_sequence("s").unwrap();
    assert!(tx.catalog().get_sequence("s").is_err());
    tx.commit().unwrap();

    let tx = db.begin(false).unwrap();
    assert!(tx.catalog().get_sequence("s").is_err());
    // Its lease row is gone too.
    let table = tx.catalog().get_table("__sequence").unwrap();
    let key = basalt_datastore::Key::from_values(
        &[Value::Text("s".to_owned())],
        SortOrder::ASC,
    );
    assert!(!table.exists(&tx, &key).unwrap());
    drop(tx);

    // The name is free again, with a fresh position.
    let mut tx = db.begin(true).unwrap();
    tx.catalog_writer()
        .unwrap()
        .create_sequence(bounded_sequence("s", 1, 100, 5))
        .unwrap();
    let sequence = tx.catalog().get_sequence("s").unwrap();
    assert_eq!(sequence.next(&mut tx).unwrap(), 1);
}

#[test]
fn owned_sequences_cannot_be_dropped_directly() {
    let db = Database::open_memory().unwrap();
    let mut tx = db.begin(true).unwrap();
    let mut info = basalt_datastore::TableInfo::new("log");
    info.add_column("line", basalt_datastore::DataType::Text, false, None)
        .unwrap();
    tx.catalog_writer().unwrap().create_table(info).unwrap();

    let err = tx.catalog_writer().unwrap().drop_sequence("log_seq").unwrap_err();
    assert!(err.is_invalid_schema());

    // Dropping the table takes the sequence with it.
    tx.catalog_writer().unwrap().drop_table("log").unwrap();
    assert!(tx.catalog().get_sequence("log_seq").is_err());
}

#[test]
fn sequences_back_rowid_tables_across_restarts() {
    let engine = MemoryEngine::new();
    let db = Database::open(engine.clone(), Options::default()).unwrap();
    let mut tx = db.begin(true).unwrap();
    let mut info = basalt_datastore::TableInfo::new("log");
    info.add_column("line", basalt_datastore::DataType::Text, false, None)
        .unwrap();
    tx.catalog_writer().unwrap().create_table(info).unwrap();
    let table = tx.catalog().get_table("log").unwrap();
    for line in ["a", "b"] {
        table
            .insert(
                &mut tx,
                basalt_datastore::Row::Owned(basalt_datastore::OwnedRow::new().with("line", line)),
            )
            .unwrap();
    }
    tx.commit().unwrap();
    db.close().unwrap();

    let db = Database::open(engine, Options::default()).unwrap();
    let mut tx = db.begin(true).unwrap();
    let table = tx.catalog().get_table("log").unwrap();
    let (key, _) = table
        .insert(
            &mut tx,
            basalt_datastore::Row::Owned(basalt_datastore::OwnedRow::new().with("line", "c")),
        )
        .unwrap();
    // The new rowid is strictly beyond the committed ones.
    let rows = table.iter(&tx, &Range::all(), false).unwrap().count();
    assert_eq!(rows, 3);
    let rowid = key.decode(&[basalt_datastore::DataType::Bigint], SortOrder::ASC).unwrap();
    match rowid[0] {
        Value::Bigint(v) => assert!(v > 2),
        ref other => panic!("unexpected {other:?}"),
    }
}
