//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio::sync::Mutex;
use url::Url;

pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// A Postgres csvlog row with the given timestamp, severity and message.
pub fn log_row(timestamp: &str, severity: &str, message: &str) -> Vec<String> {
    let mut row = vec![String::new(); 23];
    row[0] = timestamp.to_string();
    row[11] = severity.to_string();
    row[12] = "00000".to_string();
    row[13] = message.to_string();
    row
}

pub fn append_rows(path: &Path, rows: &[Vec<String>]) {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    for row in rows {
        writer.write_record(row).unwrap();
    }
    writer.flush().unwrap();
}

#[derive(Clone)]
struct Target {
    log: Arc<PathBuf>,
    seq: Arc<AtomicU64>,
    lock: Arc<Mutex<()>>,
}

impl Target {
    async fn run(&self, statement: String) {
        let _guard = self.lock.lock().await;
        let n = self.seq.fetch_add(1, Ordering::SeqCst);
        let ts = format!("2024-05-01 12:00:{:02}.{:03} UTC", (n / 1000) % 60, n % 1000);
        append_rows(&self.log, &[log_row(&ts, "LOG", &format!("statement: {statement}"))]);
    }
}

#[derive(Deserialize)]
struct NewCity {
    name: String,
    temp: i64,
}

/// Serve an injectable cities API that logs to `log`.
///
/// Every statement the handlers "run" is appended to the log before the
/// response is sent.
pub async fn spawn_target(log: &Path) -> Url {
    let state = Target {
        log: Arc::new(log.to_path_buf()),
        seq: Arc::new(AtomicU64::new(0)),
        lock: Arc::new(Mutex::new(())),
    };
    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route(
            "/cities",
            post(|State(t): State<Target>, Json(c): Json<NewCity>| async move {
                t.run(format!(
                    "INSERT INTO cities (name, temp) VALUES ('{}', {})",
                    c.name, c.temp
                ))
                .await;
                StatusCode::CREATED
            }),
        )
        .route(
            "/cities/{name}",
            get(|State(t): State<Target>, UrlPath(name): UrlPath<String>| async move {
                t.run(format!("SELECT * FROM cities WHERE name = '{name}'")).await;
                StatusCode::OK
            })
            .delete(|State(t): State<Target>, UrlPath(name): UrlPath<String>| async move {
                t.run(format!("DELETE FROM cities WHERE name = '{name}'")).await;
                StatusCode::NO_CONTENT
            }),
        )
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Url::parse(&format!("http://{}", addr)).unwrap()
}
