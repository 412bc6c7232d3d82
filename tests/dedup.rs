use rusqlite::{Connection, params};
use tabload::{
    dedup::{DedupOutcome, DuplicateResolver, FilterPredicate, KeyCount},
    error::{PipelineError, ResolveCause},
};

fn seeded(rows: &[(&str, Option<&str>)]) -> Connection {
    let conn = Connection::open_in_memory().expect("open");
    conn.execute(
        "CREATE TABLE samples (\"Category\" VARCHAR(255), \"Temporary Cabinet\" VARCHAR(255))",
        [],
    )
    .expect("create");
    for (category, cabinet) in rows {
        conn.execute(
            "INSERT INTO samples VALUES (?1, ?2)",
            params![category, cabinet],
        )
        .expect("insert");
    }
    conn
}

fn count(conn: &Connection, sql: &str) -> i64 {
    conn.query_row(sql, [], |row| row.get(0)).expect("count")
}

fn cabinet_resolver() -> DuplicateResolver {
    DuplicateResolver::new("Temporary Cabinet")
        .with_filter(Some(FilterPredicate::new("Category", "Available Cabinet")))
}

#[test]
fn surplus_rows_are_removed_until_each_key_is_unique() {
    let mut rows = vec![("available cabinet", Some("A")); 5];
    rows.push(("available cabinet", Some("B")));
    let mut conn = seeded(&rows);

    let report = cabinet_resolver()
        .resolve(&mut conn, "samples")
        .expect("resolve");
    assert_eq!(report.outcome, DedupOutcome::Resolved);
    assert_eq!(report.groups.len(), 1);
    assert_eq!(report.groups[0].key.as_deref(), Some("A"));
    assert_eq!(report.groups[0].count, 5);
    assert_eq!(report.total_deleted, 4);
    assert!(report.remaining.is_empty());
    assert_eq!(report.final_count, 2);
    assert_eq!(
        report.breakdown,
        vec![
            KeyCount {
                key: Some("A".into()),
                count: 1
            },
            KeyCount {
                key: Some("B".into()),
                count: 1
            },
        ]
    );
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM samples"), 2);
}

#[test]
fn second_run_is_a_no_op() {
    let mut conn = seeded(&[
        ("available cabinet", Some("A")),
        ("available cabinet", Some("A")),
        ("available cabinet", Some("B")),
    ]);
    let resolver = cabinet_resolver();
    let first = resolver.resolve(&mut conn, "samples").expect("first run");
    assert_eq!(first.total_deleted, 1);

    let second = resolver.resolve(&mut conn, "samples").expect("second run");
    assert_eq!(second.outcome, DedupOutcome::NothingToDo);
    assert_eq!(second.total_deleted, 0);
    assert!(second.groups.is_empty());
    assert_eq!(second.final_count, 2);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM samples"), 2);
}

#[test]
fn rows_outside_the_filter_are_untouched() {
    let mut conn = seeded(&[
        ("  AVAILABLE cabinet ", Some("A")),
        ("available cabinet", Some("A")),
        ("in use", Some("A")),
        ("in use", Some("A")),
        ("in use", Some("B")),
        ("in use", Some("B")),
    ]);
    let report = cabinet_resolver()
        .resolve(&mut conn, "samples")
        .expect("resolve");
    assert_eq!(report.total_deleted, 1);
    assert_eq!(report.final_count, 1);
    assert_eq!(
        count(&conn, "SELECT COUNT(*) FROM samples WHERE Category = 'in use'"),
        4
    );
}

#[test]
fn without_a_filter_every_row_is_grouped() {
    let mut conn = seeded(&[
        ("in use", Some("A")),
        ("available cabinet", Some("A")),
        ("in use", Some("B")),
    ]);
    let report = DuplicateResolver::new("Temporary Cabinet")
        .resolve(&mut conn, "samples")
        .expect("resolve");
    assert_eq!(report.total_deleted, 1);
    assert_eq!(report.final_count, 2);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM samples"), 2);
}

#[test]
fn dry_run_reports_without_deleting() {
    let mut conn = seeded(&[
        ("available cabinet", Some("A")),
        ("available cabinet", Some("A")),
        ("available cabinet", Some("A")),
    ]);
    let report = cabinet_resolver()
        .dry_run(true)
        .resolve(&mut conn, "samples")
        .expect("resolve");
    assert_eq!(report.outcome, DedupOutcome::DryRun);
    assert_eq!(report.total_deleted, 0);
    assert_eq!(report.groups[0].count, 3);
    assert_eq!(report.final_count, 3);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM samples"), 3);
}

#[test]
fn unknown_key_column_fails_before_deleting() {
    let mut conn = seeded(&[
        ("available cabinet", Some("A")),
        ("available cabinet", Some("A")),
    ]);
    let err = DuplicateResolver::new("Cabinet")
        .resolve(&mut conn, "samples")
        .expect_err("missing column");
    assert!(matches!(
        err,
        PipelineError::Resolve {
            cause: ResolveCause::MissingColumn(ref column),
            ..
        } if column == "Cabinet"
    ));
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM samples"), 2);
}

#[test]
fn failed_deletion_rolls_back_earlier_groups() {
    let mut rows = vec![("available cabinet", Some("A")); 3];
    rows.extend([("available cabinet", Some("B")); 2]);
    let mut conn = seeded(&rows);
    conn.execute_batch(
        "CREATE TRIGGER keep_b BEFORE DELETE ON samples
         WHEN OLD.\"Temporary Cabinet\" = 'B'
         BEGIN SELECT RAISE(ABORT, 'row is locked'); END;",
    )
    .expect("trigger");

    let err = cabinet_resolver()
        .resolve(&mut conn, "samples")
        .expect_err("deletion aborted");
    assert!(matches!(
        err,
        PipelineError::Resolve {
            cause: ResolveCause::Database(_),
            ..
        }
    ));
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM samples"), 5);
    assert_eq!(
        count(&conn, "SELECT COUNT(*) FROM samples WHERE \"Temporary Cabinet\" = 'A'"),
        3
    );
}
