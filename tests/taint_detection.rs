//! Taint detection over Postgres CSV logs.

mod common;

use sqltaint::error::{FuzzError, LogError};
use sqltaint::metrics::Metrics;
use sqltaint::taint::{Action, Candidate, QueryLog, TaintDetector};

fn copy_fixture(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("postgresql.csv");
    std::fs::copy(common::fixture("cities.csv"), &path).unwrap();
    path
}

fn candidates() -> Vec<Candidate> {
    vec![
        Candidate::new("city", "sunnyvale"),
        Candidate::new("body/name", "san jose"),
        Candidate::new("name", "fresno"),
        Candidate::new("missing", "nonexistent"),
    ]
}

#[tokio::test]
async fn test_fixture_findings() {
    let dir = tempfile::tempdir().unwrap();
    let path = copy_fixture(dir.path());
    let triage = dir.path().join("triage.jsonl");
    let mut detector = TaintDetector::new(QueryLog::new(&path).with_triage(&triage), Metrics::new().unwrap());

    let found = detector.check(&candidates()).await.unwrap();
    let sites: Vec<(&str, &str, &str, Action)> = found
        .iter()
        .map(|f| (f.param.as_str(), f.table.as_str(), f.column.as_str(), f.action))
        .collect();
    assert_eq!(
        sites,
        vec![
            ("city", "mytable", "city", Action::Select),
            ("body/name", "cities", "name", Action::Insert),
            ("name", "cities", "name", Action::Select),
        ]
    );
    assert!(found[2].query.contains("'fresno'"));

    let stats = detector.stats();
    assert_eq!(stats.statements, 3);
    assert_eq!(stats.tainted, 3);
    assert_eq!(stats.engine_failures, 0);

    // The ERROR row is triaged, not searched.
    let triaged = std::fs::read_to_string(&triage).unwrap();
    assert_eq!(triaged.lines().count(), 1);
    assert!(triaged.contains("syntax error"));
}

#[tokio::test]
async fn test_cursor_only_returns_new_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = copy_fixture(dir.path());
    let mut detector = TaintDetector::new(QueryLog::new(&path), Metrics::new().unwrap());

    assert_eq!(detector.check(&candidates()).await.unwrap().len(), 3);
    assert!(detector.check(&candidates()).await.unwrap().is_empty());
    assert_eq!(detector.stats().statements, 3);

    common::append_rows(
        &path,
        &[common::log_row(
            "2020-01-01 10:00:00.006 UTC",
            "LOG",
            "statement: UPDATE cities SET temp = 70 WHERE name = 'sunnyvale'",
        )],
    );
    let found = detector.check(&candidates()).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].table, "cities");
    assert_eq!(found[0].column, "name");
    assert_eq!(found[0].action, Action::Update);
    assert_eq!(detector.stats().statements, 4);
}

#[tokio::test]
async fn test_repeat_findings_reported_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("postgresql.csv");
    let mut detector = TaintDetector::new(QueryLog::new(&path), Metrics::new().unwrap());
    let statement = "statement: SELECT * FROM mytable WHERE city = 'sunnyvale';";
    let candidates = [Candidate::new("city", "sunnyvale")];

    common::append_rows(&path, &[common::log_row("2020-01-01 10:00:01.000 UTC", "LOG", statement)]);
    assert_eq!(detector.check(&candidates).await.unwrap().len(), 1);

    common::append_rows(&path, &[common::log_row("2020-01-01 10:00:02.000 UTC", "LOG", statement)]);
    assert!(detector.check(&candidates).await.unwrap().is_empty());

    assert_eq!(detector.findings().len(), 1);
    assert_eq!(detector.stats().tainted, 2);
}

#[tokio::test]
async fn test_seek_skips_stale_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = copy_fixture(dir.path());
    let mut detector = TaintDetector::new(QueryLog::new(&path), Metrics::new().unwrap());
    assert_eq!(detector.seek().await.unwrap(), 5);
    assert!(detector.check(&candidates()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_insert_without_columns_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("postgresql.csv");
    common::append_rows(
        &path,
        &[common::log_row(
            "2020-01-01 10:00:00.000 UTC",
            "LOG",
            "statement: INSERT INTO cities VALUES ('san jose', 67)",
        )],
    );
    let mut detector = TaintDetector::new(QueryLog::new(&path), Metrics::new().unwrap());
    let err = detector
        .check(&[Candidate::new("name", "san jose")])
        .await
        .unwrap_err();
    assert!(matches!(err, FuzzError::Locate { .. }));
}

#[tokio::test]
async fn test_repeated_rotation_escalates() {
    let dir = tempfile::tempdir().unwrap();
    let path = copy_fixture(dir.path());
    let mut detector = TaintDetector::new(QueryLog::new(&path).with_max_rotations(1), Metrics::new().unwrap());
    detector.seek().await.unwrap();

    let rotate = |ts: &str| {
        std::fs::write(&path, "").unwrap();
        common::append_rows(&path, &[common::log_row(ts, "LOG", "statement: SELECT 1")]);
    };

    rotate("2021-01-01 00:00:00.000 UTC");
    assert!(detector.check(&candidates()).await.is_ok());
    rotate("2021-01-01 00:00:01.000 UTC");
    let err = detector.check(&candidates()).await.unwrap_err();
    assert!(matches!(err, FuzzError::Log(LogError::Rotated { .. })));
}

#[tokio::test]
async fn test_statement_written_in_two_parts_is_found() {
    use std::io::Write;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("postgresql.csv");
    let mut detector = TaintDetector::new(QueryLog::new(&path), Metrics::new().unwrap());

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer
        .write_record(common::log_row(
            "2020-01-01 10:00:00.000 UTC",
            "LOG",
            "statement: SELECT * FROM users WHERE name = 'abcdef'",
        ))
        .unwrap();
    let row = writer.into_inner().unwrap();
    let (head, tail) = row.split_at(row.len() / 2);
    let mut append = |bytes: &[u8]| {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .unwrap();
        file.write_all(bytes).unwrap();
    };
    let candidates = [Candidate::new("name", "abcdef")];

    append(head);
    assert!(detector.check(&candidates).await.unwrap().is_empty());
    assert_eq!(detector.stats().statements, 0);

    append(tail);
    let found = detector.check(&candidates).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].table, "users");
    assert_eq!(found[0].column, "name");
}
