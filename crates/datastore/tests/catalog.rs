use basalt_datastore::{
    BinaryExpr, BinaryOp, ColumnRef, ColumnConstraint, Database, DataType, Error, IndexInfo,
    Literal, Options, OwnedRow, Range, Row, SequenceInfo, SortOrder, TableConstraint, TableInfo,
    Value,
};
use basalt_kv::memory::MemoryEngine;
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn keyed_table(name: &str) -> TableInfo {
    let mut info = TableInfo::new(name);
    info.add_column("a", DataType::Integer, false, None).unwrap();
    info.add_column("b", DataType::Text, false, None).unwrap();
    info.add_table_constraint(TableConstraint::primary_key(
        vec!["a".into()],
        SortOrder::ASC,
    ))
    .unwrap();
    info
}

fn logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn names_are_unique_across_relation_kinds() {
    logging();
    let db = Database::open_memory().unwrap();
    let mut tx = db.begin(true).unwrap();
    let mut writer = tx.catalog_writer().unwrap();
    writer.create_table(keyed_table("x")).unwrap();

    assert!(matches!(
        writer.create_table(keyed_table("x")).unwrap_err(),
        Error::AlreadyExists(_)
    ));
    assert!(matches!(
        writer.create_sequence(SequenceInfo::new("x")).unwrap_err(),
        Error::AlreadyExists(_)
    ));
    let mut index = IndexInfo::new("x", vec!["b".into()]);
    index.index_name = "x".into();
    assert!(matches!(
        writer.create_index(index).unwrap_err(),
        Error::AlreadyExists(_)
    ));

    // System names are reserved.
    assert!(writer.create_table(keyed_table("__mine")).unwrap_err().is_invalid_schema());
}

#[test]
fn readers_keep_their_catalog_snapshot() {
    let db = Database::open_memory().unwrap();

    let reader = db.begin(false).unwrap();

    let mut writer_tx = db.begin(true).unwrap();
    writer_tx
        .catalog_writer()
        .unwrap()
        .create_table(keyed_table("x"))
        .unwrap();
    let table = writer_tx.catalog().get_table("x").unwrap();
    table
        .insert(
            &mut writer_tx,
            Row::Owned(OwnedRow::new().with("a", 1).with("b", "v")),
        )
        .unwrap();
    writer_tx.commit().unwrap();

    // The reader's catalog predates the DDL...
    assert!(matches!(
        reader.catalog().get_table("x").unwrap_err(),
        Error::NotFound(_)
    ));
    // ...and so does its view of the __catalog table itself.
    let catalog_table = reader.catalog().get_table("__catalog").unwrap();
    let key = basalt_datastore::Key::from_values(
        &[Value::Text("x".to_owned())],
        SortOrder::ASC,
    );
    assert!(!catalog_table.exists(&reader, &key).unwrap());
    drop(reader);

    // A transaction begun after the commit sees everything.
    let fresh = db.begin(false).unwrap();
    let table = fresh.catalog().get_table("x").unwrap();
    assert_eq!(table.iter(&fresh, &Range::all(), false).unwrap().count(), 1);
    let catalog_table = fresh.catalog().get_table("__catalog").unwrap();
    assert!(catalog_table.exists(&fresh, &key).unwrap());
}

#[test]
fn rolled_back_ddl_leaves_no_trace() {
    let db = Database::open_memory().unwrap();
    let mut tx = db.begin(true).unwrap();
    tx.catalog_writer().unwrap().create_table(keyed_table("x")).unwrap();
    assert!(tx.catalog().get_table("x").is_ok());
    tx.rollback();

    let tx = db.begin(false).unwrap();
    assert!(tx.catalog().get_table("x").is_err());
    let catalog_table = tx.catalog().get_table("__catalog").unwrap();
    let key = basalt_datastore::Key::from_values(
        &[Value::Text("x".to_owned())],
        SortOrder::ASC,
    );
    assert!(!catalog_table.exists(&tx, &key).unwrap());
}

#[test]
fn drop_table_cascades_to_owned_relations_and_data() {
    logging();
    let db = Database::open_memory().unwrap();
    let mut tx = db.begin(true).unwrap();
    tx.catalog_writer().unwrap().create_table(keyed_table("t")).unwrap();
    let mut index = IndexInfo::new("t", vec!["b".into()]);
    index.index_name = "i".into();
    index.unique = true;
    index.owner = basalt_datastore::Owner::constraint("t", vec!["b".into()]);
    tx.catalog_writer().unwrap().create_index(index).unwrap();

    let table = tx.catalog().get_table("t").unwrap();
    let idx = tx.catalog().get_index("i").unwrap();
    let (key, _) = table
        .insert(&mut tx, Row::Owned(OwnedRow::new().with("a", 1).with("b", "v")))
        .unwrap();
    idx.set(&mut tx, &[Value::Text("v".into())], &key).unwrap();

    // A constraint-backed index cannot be dropped on its own.
    assert!(tx.catalog_writer().unwrap().drop_index("i").unwrap_err().is_invalid_schema());

    tx.catalog_writer().unwrap().drop_table("t").unwrap();
    assert!(tx.catalog().get_table("t").is_err());
    assert!(tx.catalog().get_index("i").is_err());
    tx.commit().unwrap();

    let tx = db.begin(false).unwrap();
    assert!(tx.catalog().get_table("t").is_err());
    assert!(tx.catalog().list_indexes(Some("t")).next().is_none());
}

#[test]
fn dropping_missing_relations_reports_not_found() {
    let db = Database::open_memory().unwrap();
    let mut tx = db.begin(true).unwrap();
    let mut writer = tx.catalog_writer().unwrap();
    assert!(matches!(writer.drop_table("nope").unwrap_err(), Error::NotFound(_)));
    assert!(matches!(writer.drop_index("nope").unwrap_err(), Error::NotFound(_)));
    assert!(matches!(writer.drop_sequence("nope").unwrap_err(), Error::NotFound(_)));
}

#[test]
fn system_tables_cannot_be_dropped_or_renamed() {
    let db = Database::open_memory().unwrap();
    let mut tx = db.begin(true).unwrap();
    let mut writer = tx.catalog_writer().unwrap();
    assert!(matches!(
        writer.drop_table("__catalog").unwrap_err(),
        Error::ReadOnlyTable
    ));
    assert!(matches!(
        writer.rename_table("__sequence", "seq2").unwrap_err(),
        Error::ReadOnlyTable
    ));
}

#[test]
fn rename_cascades_to_owner_references() {
    logging();
    let db = Database::open_memory().unwrap();
    let mut tx = db.begin(true).unwrap();
    // A rowid table owns its sequence; add an index on top.
    let mut info = TableInfo::new("old");
    info.add_column("v", DataType::Text, false, None).unwrap();
    tx.catalog_writer().unwrap().create_table(info).unwrap();
    let mut index = IndexInfo::new("old", vec!["v".into()]);
    index.index_name = "old_v".into();
    tx.catalog_writer().unwrap().create_index(index).unwrap();

    let table = tx.catalog().get_table("old").unwrap();
    table
        .insert(&mut tx, Row::Owned(OwnedRow::new().with("v", "kept")))
        .unwrap();

    tx.catalog_writer().unwrap().rename_table("old", "new").unwrap();
    assert!(tx.catalog().get_table("old").is_err());

    let renamed = tx.catalog().get_table_info("new").unwrap();
    assert_eq!(renamed.table_name, "new");
    assert_eq!(renamed.rowid_sequence_name.as_deref(), Some("old_seq"));

    let index = tx.catalog().get_index_info("old_v").unwrap();
    assert_eq!(index.owner.table_name, "new");
    let sequence = tx.catalog().get_sequence_info("old_seq").unwrap();
    assert_eq!(sequence.owner.as_ref().unwrap().table_name, "new");

    // Data moved with the name; the namespace never changed.
    let table = tx.catalog().get_table("new").unwrap();
    assert_eq!(table.iter(&tx, &Range::all(), false).unwrap().count(), 1);
    tx.commit().unwrap();

    // An empty target name is rejected eagerly.
    let mut tx = db.begin(true).unwrap();
    assert!(tx
        .catalog_writer()
        .unwrap()
        .rename_table("new", "")
        .unwrap_err()
        .is_invalid_schema());
}

#[test]
fn add_column_constraint_extends_the_schema() {
    let db = Database::open_memory().unwrap();
    let mut tx = db.begin(true).unwrap();
    tx.catalog_writer().unwrap().create_table(keyed_table("t")).unwrap();
    let table = tx.catalog().get_table("t").unwrap();
    let (key, _) = table
        .insert(&mut tx, Row::Owned(OwnedRow::new().with("a", 1).with("b", "x")))
        .unwrap();
    tx.commit().unwrap();

    let mut tx = db.begin(true).unwrap();
    tx.catalog_writer()
        .unwrap()
        .add_column_constraint(
            "t",
            Some(ColumnConstraint {
                position: 0,
                column: "c".into(),
                data_type: DataType::Bigint,
                not_null: false,
                default: None,
            }),
            vec![TableConstraint::unique(vec!["b".into()], SortOrder::ASC)],
        )
        .unwrap();

    let info = tx.catalog().get_table_info("t").unwrap();
    let appended = info.column_constraints.get("c").unwrap();
    assert_eq!(appended.position, 2);
    assert!(info
        .table_constraints
        .iter()
        .any(|c| c.name == "t_b_unique"));

    // Rows written under the old schema decode NULL for the new column.
    let table = tx.catalog().get_table("t").unwrap();
    let row = table.get(&tx, &key).unwrap();
    assert_eq!(row.get("c").unwrap(), Some(Value::Null));
    tx.commit().unwrap();
}

#[test]
fn not_null_column_without_default_surfaces_at_decode() {
    let db = Database::open_memory().unwrap();
    let mut tx = db.begin(true).unwrap();
    tx.catalog_writer().unwrap().create_table(keyed_table("t")).unwrap();
    let table = tx.catalog().get_table("t").unwrap();
    let (key, _) = table
        .insert(&mut tx, Row::Owned(OwnedRow::new().with("a", 1).with("b", "x")))
        .unwrap();

    tx.catalog_writer()
        .unwrap()
        .add_column_constraint(
            "t",
            Some(ColumnConstraint {
                position: 0,
                column: "strict".into(),
                data_type: DataType::Integer,
                not_null: true,
                default: None,
            }),
            vec![],
        )
        .unwrap();

    // The DDL is accepted; pre-existing rows fail lazily when the
    // column is read.
    let table = tx.catalog().get_table("t").unwrap();
    let row = table.get(&tx, &key).unwrap();
    assert!(matches!(
        row.get("strict").unwrap_err(),
        Error::Constraint(v) if v.kind == basalt_datastore::ConstraintKind::NotNull
    ));
    // Columns stored before the change still read fine.
    assert_eq!(row.get("a").unwrap(), Some(Value::Integer(1)));
}

#[test]
fn catalog_survives_reopen() {
    logging();
    let engine = MemoryEngine::new();
    let db = Database::open(engine.clone(), Options::default()).unwrap();
    let mut tx = db.begin(true).unwrap();

    let mut info = TableInfo::new("t");
    info.add_column("a", DataType::Integer, true, None).unwrap();
    info.add_column(
        "b",
        DataType::DoublePrecision,
        false,
        Some(Arc::new(Literal(Value::Double(2.5)))),
    )
    .unwrap();
    info.add_column("c", DataType::Bytea, false, None).unwrap();
    info.add_table_constraint(TableConstraint::primary_key(
        vec!["a".into()],
        SortOrder::ASC,
    ))
    .unwrap();
    info.add_table_constraint(TableConstraint::check(Arc::new(BinaryExpr::new(
        Arc::new(ColumnRef("a".into())),
        BinaryOp::Ge,
        Arc::new(Literal(Value::Bigint(0))),
    ))))
    .unwrap();
    tx.catalog_writer().unwrap().create_table(info).unwrap();

    let mut index = IndexInfo::new("t", vec!["b".into(), "a".into()]);
    index.index_name = "i".into();
    index.sort_order = SortOrder::ASC.with_desc(0);
    tx.catalog_writer().unwrap().create_index(index).unwrap();

    let mut sequence = SequenceInfo::new("s");
    sequence.increment_by = 7;
    sequence.max = 1_000;
    sequence.cache = 3;
    tx.catalog_writer().unwrap().create_sequence(sequence).unwrap();

    let table = tx.catalog().get_table("t").unwrap();
    table
        .insert(&mut tx, Row::Owned(OwnedRow::new().with("a", 4)))
        .unwrap();
    tx.commit().unwrap();

    let sql_before: Vec<String> = db
        .catalog()
        .list_tables()
        .map(|t| t.to_sql())
        .chain(db.catalog().list_indexes(None).map(|i| i.to_sql()))
        .chain(db.catalog().list_sequences().map(|s| s.to_sql()))
        .collect();
    let namespace_before = db.catalog().get_table_info("t").unwrap().store_namespace;
    db.close().unwrap();

    let db = Database::open(engine, Options::default()).unwrap();
    let sql_after: Vec<String> = db
        .catalog()
        .list_tables()
        .map(|t| t.to_sql())
        .chain(db.catalog().list_indexes(None).map(|i| i.to_sql()))
        .chain(db.catalog().list_sequences().map(|s| s.to_sql()))
        .collect();
    assert_eq!(sql_before, sql_after);
    assert_eq!(
        db.catalog().get_table_info("t").unwrap().store_namespace,
        namespace_before
    );

    // The reloaded schema still decodes the stored rows, defaults and
    // CHECK constraints included.
    let mut tx = db.begin(true).unwrap();
    let table = tx.catalog().get_table("t").unwrap();
    assert_eq!(table.iter(&tx, &Range::all(), false).unwrap().count(), 1);
    let (key, _) = table
        .insert(&mut tx, Row::Owned(OwnedRow::new().with("a", 9)))
        .unwrap();
    let row = table.get(&tx, &key).unwrap();
    assert_eq!(row.get("b").unwrap(), Some(Value::Double(2.5)));
    let err = table
        .insert(&mut tx, Row::Owned(OwnedRow::new().with("a", -1)))
        .unwrap_err();
    assert!(matches!(err, Error::Constraint(_)));
    tx.commit().unwrap();
}

#[test]
fn namespaces_are_never_reused_after_reopen() {
    let engine = MemoryEngine::new();
    let db = Database::open(engine.clone(), Options::default()).unwrap();
    let mut tx = db.begin(true).unwrap();
    tx.catalog_writer().unwrap().create_table(keyed_table("t1")).unwrap();
    tx.catalog_writer().unwrap().create_table(keyed_table("t2")).unwrap();
    let ns1 = tx.catalog().get_table_info("t1").unwrap().store_namespace;
    let ns2 = tx.catalog().get_table_info("t2").unwrap().store_namespace;
    assert!(ns2 > ns1);
    tx.commit().unwrap();
    db.close().unwrap();

    let db = Database::open(engine, Options::default()).unwrap();
    let mut tx = db.begin(true).unwrap();
    tx.catalog_writer().unwrap().create_table(keyed_table("t3")).unwrap();
    let ns3 = tx.catalog().get_table_info("t3").unwrap().store_namespace;
    assert!(ns3 > ns2);
}

#[test]
fn list_relations() {
    let db = Database::open_memory().unwrap();
    let mut tx = db.begin(true).unwrap();
    tx.catalog_writer().unwrap().create_table(keyed_table("t1")).unwrap();
    tx.catalog_writer().unwrap().create_table(keyed_table("t2")).unwrap();
    let mut index = IndexInfo::new("t1", vec!["b".into()]);
    index.index_name = "i1".into();
    tx.catalog_writer().unwrap().create_index(index).unwrap();

    let tables: Vec<&str> = tx
        .catalog()
        .list_tables()
        .map(|t| t.table_name.as_str())
        .collect();
    assert_eq!(tables, vec!["__catalog", "__sequence", "t1", "t2"]);

    assert_eq!(tx.catalog().list_indexes(Some("t1")).count(), 1);
    assert_eq!(tx.catalog().list_indexes(Some("t2")).count(), 0);
    assert_eq!(tx.catalog().list_indexes(None).count(), 1);
    // The namespace allocator is a relation like any other.
    assert!(tx
        .catalog()
        .list_sequences()
        .any(|s| s.name == "__store_seq"));
}
