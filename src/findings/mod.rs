//! Findings persistence.
//!
//! A [`Finding`] is keyed by the run that produced it. Stores are
//! append-only; [`FindingStore::by_run`] returns at most [`PAGE_LIMIT`]
//! records in insertion order.

pub mod exceptions;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::taint::TaintedQuery;

pub use exceptions::{ExceptionsFile, ReportedException};

/// Most findings returned for one run.
pub const PAGE_LIMIT: usize = 100;

/// Classification label for a value that reached a SQL statement.
pub const SQL_TAINT_CLASS: &str = "SqlTaint";

/// One reported problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Finding {
    /// HTTP method of the request that triggered it
    pub verb: String,
    /// Route path template
    pub path: String,
    /// Classification label
    pub class: String,
    pub message: String,
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded_at: Option<DateTime<Utc>>,
}

impl Finding {
    /// Describe a tainted statement.
    pub fn from_taint(verb: &str, path: &str, run_id: &str, tainted: &TaintedQuery) -> Self {
        Self {
            verb: verb.to_string(),
            path: path.to_string(),
            class: SQL_TAINT_CLASS.to_string(),
            message: format!(
                "parameter `{}` reached {} on {}.{}: {}",
                tainted.param, tainted.action, tainted.table, tainted.column, tainted.query
            ),
            run_id: run_id.to_string(),
            recorded_at: Some(Utc::now()),
        }
    }
}

/// Append-only findings storage.
#[async_trait]
pub trait FindingStore: Send + Sync {
    /// Persist one finding.
    async fn record(&self, finding: Finding) -> Result<(), StoreError>;

    /// Findings for a run, oldest first, at most [`PAGE_LIMIT`].
    async fn by_run(&self, run_id: &str) -> Result<Vec<Finding>, StoreError>;
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    runs: DashMap<String, Vec<Finding>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FindingStore for MemoryStore {
    async fn record(&self, finding: Finding) -> Result<(), StoreError> {
        self.runs
            .entry(finding.run_id.clone())
            .or_default()
            .push(finding);
        Ok(())
    }

    async fn by_run(&self, run_id: &str) -> Result<Vec<Finding>, StoreError> {
        Ok(self
            .runs
            .get(run_id)
            .map(|f| f.iter().take(PAGE_LIMIT).cloned().collect())
            .unwrap_or_default())
    }
}

/// One JSON object per line in a file shared across runs.
#[derive(Debug)]
pub struct JsonlStore {
    path: PathBuf,
    write: Mutex<()>,
}

impl JsonlStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl FindingStore for JsonlStore {
    async fn record(&self, finding: Finding) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(&finding)?;
        line.push(b'\n');

        let _guard = self.write.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.io(e))?;
        file.write_all(&line).await.map_err(|e| self.io(e))?;
        file.flush().await.map_err(|e| self.io(e))
    }

    async fn by_run(&self, run_id: &str) -> Result<Vec<Finding>, StoreError> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io(e)),
        };

        let mut found = Vec::new();
        for (i, line) in data.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let finding: Finding =
                serde_json::from_str(line).map_err(|source| StoreError::Corrupt {
                    path: self.path.clone(),
                    line: i + 1,
                    source,
                })?;
            if finding.run_id == run_id {
                found.push(finding);
                if found.len() == PAGE_LIMIT {
                    break;
                }
            }
        }
        Ok(found)
    }
}
