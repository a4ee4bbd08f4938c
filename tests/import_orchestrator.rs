mod test_support;

use std::sync::atomic::AtomicBool;

use costbookd::db::table_row_count;
use costbookd::mapping::coerce_id;
use costbookd::{EntityKind, ImportOptions, ImportReport, Importer, RawValue};
use rusqlite::Connection;
use test_support::{
    open_workspace, row, temp_dir, utf8_config, write_dbf, write_sample_dataset, UNIT_FIELDS,
    WORK_FIELDS,
};

fn id(legacy: &str) -> i64 {
    coerce_id(&RawValue::Text(legacy.into())).expect("legacy id")
}

fn run(conn: &Connection, dir: &std::path::Path, options: ImportOptions<'_>) -> ImportReport {
    let cfg = utf8_config();
    let mut messages: Vec<(String, u8)> = Vec::new();
    let report = Importer::new(conn, &cfg).import_all(dir, &options, &mut |m: &str, p: u8| {
        messages.push((m.to_string(), p))
    });
    assert!(messages.iter().all(|(_, p)| *p <= 100));
    report
}

fn clear() -> ImportOptions<'static> {
    ImportOptions {
        clear_existing: true,
        ..ImportOptions::default()
    }
}

#[test]
fn full_import_succeeds_for_every_kind() {
    let (_ws, conn) = open_workspace("costbook-import-full");
    let src = temp_dir("costbook-import-full-src");
    write_sample_dataset(&src);

    let report = run(&conn, &src, clear());
    let outcomes = report.outcomes();
    for kind in EntityKind::IMPORT_ORDER {
        assert_eq!(outcomes.get(&kind), Some(&true), "{kind}: {:?}", report.summary(kind));
    }

    let units = report.summary(EntityKind::Units).expect("units summary");
    assert_eq!(units.read, 5);
    assert_eq!(units.collapsed, 2);
    assert_eq!(table_row_count(&conn, "units").expect("count"), 3);
    assert_eq!(table_row_count(&conn, "materials").expect("count"), 2);
    assert_eq!(table_row_count(&conn, "works").expect("count"), 3);
    assert_eq!(table_row_count(&conn, "specifications").expect("count"), 4);
    assert_eq!(table_row_count(&conn, "work_composition").expect("count"), 4);

    let comp = report.summary(EntityKind::Composition).expect("composition summary");
    assert_eq!(comp.read, 7);
    assert_eq!(comp.skipped, 2);
    assert_eq!(comp.dropped, 1);
    assert_eq!(comp.failed, 0);
}

#[test]
fn work_unit_with_leading_space_resolves_to_canonical_unit() {
    let (_ws, conn) = open_workspace("costbook-import-whitespace");
    let src = temp_dir("costbook-import-whitespace-src");
    write_sample_dataset(&src);
    run(&conn, &src, clear());

    let m2: i64 = conn
        .query_row("SELECT id FROM units WHERE name = 'm2'", [], |r| r.get(0))
        .expect("m2 unit");
    assert_eq!(m2, id("1"));
    let screed_unit: Option<i64> = conn
        .query_row("SELECT unit_id FROM works WHERE id = ?", [id("101")], |r| r.get(0))
        .expect("screed");
    assert_eq!(screed_unit, Some(m2));
    // Legacy key "3" was a duplicate " m2" row.
    let priming_unit: Option<i64> = conn
        .query_row("SELECT unit_id FROM works WHERE id = ?", [id("102")], |r| r.get(0))
        .expect("priming");
    assert_eq!(priming_unit, Some(m2));
}

#[test]
fn material_and_labor_components_are_tagged() {
    let (_ws, conn) = open_workspace("costbook-import-components");
    let src = temp_dir("costbook-import-components-src");
    write_sample_dataset(&src);
    run(&conn, &src, clear());

    let (kind, name, unit_id, price, material_id, rate): (String, String, Option<i64>, Option<f64>, Option<i64>, f64) = conn
        .query_row(
            "SELECT kind, name, unit_id, price, material_id, rate FROM specifications
             WHERE work_id = ? AND material_id IS NOT NULL",
            [id("101")],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?)),
        )
        .expect("material component");
    assert_eq!(kind, "Material");
    assert_eq!(name, "Cement M400");
    assert_eq!(unit_id, Some(id("4")));
    assert_eq!(price, Some(12.5));
    assert_eq!(material_id, Some(id("10")));
    assert!((rate - 18.5).abs() < 1e-9);

    let (kind, name, unit_id, price, material_id): (String, String, Option<i64>, Option<f64>, Option<i64>) = conn
        .query_row(
            "SELECT kind, name, unit_id, price, material_id FROM specifications
             WHERE work_id = ? AND kind = 'Labor'",
            [id("101")],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
        )
        .expect("labor component");
    assert_eq!(kind, "Labor");
    assert_eq!(name, "Plasterer labor");
    assert_eq!(unit_id, Some(id("5")));
    assert_eq!(price, Some(450.0));
    assert_eq!(material_id, None);

    let decimal_comma_rate: f64 = conn
        .query_row(
            "SELECT rate FROM work_composition WHERE work_id = ? AND material_id = ?",
            [id("102"), id("11")],
            |r| r.get(0),
        )
        .expect("primer link");
    assert!((decimal_comma_rate - 0.25).abs() < 1e-9);
}

#[test]
fn reimport_recreates_specifications_without_duplicating_cost_items() {
    let (_ws, conn) = open_workspace("costbook-import-rerun");
    let src = temp_dir("costbook-import-rerun-src");
    write_sample_dataset(&src);

    run(&conn, &src, clear());
    let cost_items = table_row_count(&conn, "cost_items").expect("count");
    assert_eq!(cost_items, 4);

    let report = run(&conn, &src, ImportOptions::default());
    assert!(report.outcomes().values().all(|ok| *ok));
    assert_eq!(table_row_count(&conn, "cost_items").expect("count"), cost_items);
    assert_eq!(table_row_count(&conn, "specifications").expect("count"), 4);
    assert_eq!(table_row_count(&conn, "work_composition").expect("count"), 4);
    assert_eq!(table_row_count(&conn, "units").expect("count"), 3);
}

#[test]
fn works_still_import_when_units_fail() {
    let (_ws, conn) = open_workspace("costbook-import-no-units");
    let src = temp_dir("costbook-import-no-units-src");
    write_sample_dataset(&src);
    std::fs::remove_file(src.join("UNITS.DBF")).expect("remove units table");

    let report = run(&conn, &src, clear());
    let outcomes = report.outcomes();
    assert_eq!(outcomes.get(&EntityKind::Units), Some(&false));
    assert_eq!(outcomes.get(&EntityKind::Works), Some(&true));
    assert!(report
        .summary(EntityKind::Units)
        .and_then(|s| s.error.as_deref())
        .unwrap_or("")
        .contains("not found"));

    let works = report.summary(EntityKind::Works).expect("works summary");
    // Two of the three works reference a unit.
    assert_eq!(works.unresolved_units, 2);
    assert_eq!(works.succeeded, 3);
    let with_unit: i64 = conn
        .query_row("SELECT COUNT(*) FROM works WHERE unit_id IS NOT NULL", [], |r| r.get(0))
        .expect("query");
    assert_eq!(with_unit, 0);
}

#[test]
fn limit_caps_records_per_kind() {
    let (_ws, conn) = open_workspace("costbook-import-limit");
    let src = temp_dir("costbook-import-limit-src");
    write_sample_dataset(&src);

    let report = run(
        &conn,
        &src,
        ImportOptions {
            clear_existing: true,
            limit: Some(1),
            cancel: None,
        },
    );
    for kind in EntityKind::IMPORT_ORDER {
        assert_eq!(report.summary(kind).map(|s| s.read), Some(1), "{kind}");
    }
    assert_eq!(table_row_count(&conn, "works").expect("count"), 1);
}

#[test]
fn cancellation_stops_before_the_next_kind() {
    let (_ws, conn) = open_workspace("costbook-import-cancel");
    let src = temp_dir("costbook-import-cancel-src");
    write_sample_dataset(&src);

    let cancel = AtomicBool::new(true);
    let report = run(
        &conn,
        &src,
        ImportOptions {
            clear_existing: true,
            limit: None,
            cancel: Some(&cancel),
        },
    );
    assert!(report.cancelled);
    assert!(report.kinds.is_empty());
    assert!(report.outcomes().values().all(|ok| !*ok));
}

#[test]
fn cyclic_legacy_parents_are_cut() {
    let (_ws, conn) = open_workspace("costbook-import-cycle");
    let src = temp_dir("costbook-import-cycle-src");
    write_dbf(&src.join("UNITS.DBF"), &UNIT_FIELDS, &[row(&["1", "m2"])]);
    write_dbf(
        &src.join("WORKS.DBF"),
        &WORK_FIELDS,
        &[
            row(&["A", "1", "Group A", "", "", "T", "C"]),
            row(&["B", "2", "Group B", "", "", "T", "A"]),
            row(&["C", "3", "Group C", "", "", "T", "B"]),
        ],
    );

    let report = run(&conn, &src, clear());
    assert_eq!(report.outcomes().get(&EntityKind::Works), Some(&true));
    let parent_of_c: Option<i64> = conn
        .query_row("SELECT parent_id FROM works WHERE id = ?", [id("C")], |r| r.get(0))
        .expect("C");
    assert_eq!(parent_of_c, None);
    let parent_of_b: Option<i64> = conn
        .query_row("SELECT parent_id FROM works WHERE id = ?", [id("B")], |r| r.get(0))
        .expect("B");
    assert_eq!(parent_of_b, Some(id("A")));
}

#[test]
fn each_run_is_recorded_with_file_fingerprints() {
    let (_ws, conn) = open_workspace("costbook-import-ledger");
    let src = temp_dir("costbook-import-ledger-src");
    write_sample_dataset(&src);

    let report = run(&conn, &src, clear());
    let run_id = report.run_id.clone().expect("run id");
    let finished: Option<String> = conn
        .query_row("SELECT finished_at FROM import_runs WHERE id = ?", [&run_id], |r| r.get(0))
        .expect("run row");
    assert!(finished.is_some());
    let files: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM import_run_files WHERE run_id = ? AND length(sha256) = 64",
            [&run_id],
            |r| r.get(0),
        )
        .expect("files");
    assert_eq!(files, 4);
}

fn unit_name_of_work(conn: &Connection, work: &str) -> Option<String> {
    conn.query_row(
        "SELECT u.name FROM works w LEFT JOIN units u ON u.id = w.unit_id WHERE w.id = ?",
        [id(work)],
        |r| r.get(0),
    )
    .expect("work row")
}

#[test]
fn renamed_unit_releases_its_old_name_on_update_runs() {
    let (_ws, conn) = open_workspace("costbook-import-unit-rename");
    conn.execute("INSERT INTO units(id, name) VALUES(1, 'kg')", [])
        .expect("seed unit");
    let src = temp_dir("costbook-import-unit-rename-src");
    write_dbf(&src.join("UNITS.DBF"), &UNIT_FIELDS, &[row(&["1", "m2"]), row(&["2", "kg"])]);
    write_dbf(
        &src.join("WORKS.DBF"),
        &WORK_FIELDS,
        &[row(&["A1", "01", "Bagged mix", "kg", "", "F", ""])],
    );

    let report = run(&conn, &src, ImportOptions::default());
    assert_eq!(report.outcomes().get(&EntityKind::Works), Some(&true));
    let units: Vec<(i64, String)> = conn
        .prepare("SELECT id, name FROM units ORDER BY id")
        .expect("prepare")
        .query_map([], |r| Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?)))
        .expect("query")
        .collect::<Result<_, _>>()
        .expect("rows");
    assert_eq!(units, vec![(1, "m2".to_string()), (2, "kg".to_string())]);
    assert_eq!(unit_name_of_work(&conn, "A1").as_deref(), Some("kg"));
}

#[test]
fn unit_that_fails_to_write_is_not_referenced() {
    let (_ws, conn) = open_workspace("costbook-import-unit-unwritten");
    conn.execute("INSERT INTO units(id, name) VALUES(1, 'kg')", [])
        .expect("seed unit");
    let src = temp_dir("costbook-import-unit-unwritten-src");
    // Unit 2 takes "kg" before unit 1 gives it up, so its insert fails.
    write_dbf(&src.join("UNITS.DBF"), &UNIT_FIELDS, &[row(&["2", "kg"]), row(&["1", "m2"])]);
    write_dbf(
        &src.join("WORKS.DBF"),
        &WORK_FIELDS,
        &[row(&["A1", "01", "Bagged mix", "kg", "", "F", ""])],
    );

    let report = run(&conn, &src, ImportOptions::default());
    let units = report.summary(EntityKind::Units).expect("units summary");
    assert_eq!(units.succeeded, 1);
    assert_eq!(units.failed, 1);

    let works = report.summary(EntityKind::Works).expect("works summary");
    assert_eq!(works.succeeded, 1);
    assert_eq!(works.failed, 0);
    assert_eq!(works.unresolved_units, 1);
    assert_eq!(unit_name_of_work(&conn, "A1"), None);
}

#[test]
fn blank_unit_names_are_dropped_and_left_unresolved() {
    let (_ws, conn) = open_workspace("costbook-import-blank-units");
    let src = temp_dir("costbook-import-blank-units-src");
    write_dbf(
        &src.join("UNITS.DBF"),
        &UNIT_FIELDS,
        &[row(&["1", "m2"]), row(&["2", ""]), row(&["3", ""])],
    );
    write_dbf(
        &src.join("WORKS.DBF"),
        &WORK_FIELDS,
        &[
            row(&["A1", "01", "Levelling", "3", "", "", ""]),
            row(&["A2", "02", "Screed", "m2", "", "F", ""]),
        ],
    );

    let report = run(&conn, &src, clear());
    let units = report.summary(EntityKind::Units).expect("units summary");
    assert_eq!(units.dropped, 2);
    assert_eq!(units.succeeded, 1);
    assert_eq!(units.failed, 0);

    let works = report.summary(EntityKind::Works).expect("works summary");
    assert_eq!(works.succeeded, 2);
    assert_eq!(works.failed, 0);
    assert_eq!(works.unresolved_units, 1);
    assert_eq!(unit_name_of_work(&conn, "A1"), None);
    assert_eq!(unit_name_of_work(&conn, "A2").as_deref(), Some("m2"));

    // A blank legacy flag stays unknown.
    let flag: Option<bool> = conn
        .query_row("SELECT is_group FROM works WHERE id = ?", [id("A1")], |r| r.get(0))
        .expect("flag");
    assert_eq!(flag, None);
}
