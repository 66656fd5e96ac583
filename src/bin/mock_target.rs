//! Demo target for trying sqltaint locally.
//!
//! Serves a tiny cities API and appends every statement it "runs" to a
//! Postgres-style CSV log, concatenating request values straight into the
//! SQL text.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Debug, Parser)]
#[command(name = "mock_target", about = "Deliberately injectable demo API")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: SocketAddr,

    /// CSV query log to append to
    #[arg(long, default_value = "postgresql.csv")]
    log_path: PathBuf,
}

#[derive(Clone)]
struct AppState {
    log_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

#[derive(Debug, Deserialize)]
struct NewCity {
    name: String,
    temp: i64,
}

/// Postgres csvlog has 23 columns; only a handful are filled in.
const COLUMNS: usize = 23;

impl AppState {
    async fn log_statement(&self, statement: &str) -> std::io::Result<()> {
        let mut row = vec![String::new(); COLUMNS];
        row[0] = chrono::Utc::now()
            .format("%Y-%m-%d %H:%M:%S%.3f UTC")
            .to_string();
        row[1] = "cities".to_string();
        row[2] = "cities".to_string();
        row[11] = "LOG".to_string();
        row[12] = "00000".to_string();
        row[13] = format!("statement: {statement}");

        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(Vec::new());
        writer.write_record(&row).map_err(std::io::Error::other)?;
        let line = writer.into_inner().map_err(|e| std::io::Error::other(e.to_string()))?;

        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path.as_ref())
            .await?;
        file.write_all(&line).await?;
        file.flush().await
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let state = AppState {
        log_path: Arc::new(args.log_path),
        lock: Arc::new(Mutex::new(())),
    };
    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/cities", axum::routing::post(create_city))
        .route("/cities/{name}", get(show_city).delete(delete_city))
        .with_state(state);

    tracing::info!(addr = %args.listen, "Mock target listening");
    let listener = tokio::net::TcpListener::bind(args.listen).await.map_err(|e| {
        tracing::error!(addr = %args.listen, error = %e, "Failed to bind");
        e
    })?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn show_city(State(state): State<AppState>, Path(name): Path<String>) -> StatusCode {
    record(&state, &format!("SELECT * FROM cities WHERE name = '{name}'")).await
}

async fn delete_city(State(state): State<AppState>, Path(name): Path<String>) -> StatusCode {
    record(&state, &format!("DELETE FROM cities WHERE name = '{name}'")).await
}

async fn create_city(State(state): State<AppState>, Json(city): Json<NewCity>) -> StatusCode {
    let statement = format!(
        "INSERT INTO cities (name, temp) VALUES ('{}', {})",
        city.name, city.temp
    );
    match record(&state, &statement).await {
        StatusCode::OK => StatusCode::CREATED,
        other => other,
    }
}

async fn record(state: &AppState, statement: &str) -> StatusCode {
    match state.log_statement(statement).await {
        Ok(()) => {
            tracing::debug!(statement, "Logged");
            StatusCode::OK
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to write query log");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
