//! Exceptions reported by an instrumented target.
//!
//! The target writes a single JSON object `{"Class": ..., "Message": ...}`
//! to a well-known file when a request raises an unhandled exception. The
//! fuzz loop takes it after each request and truncates the file.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::Finding;
use crate::error::StoreError;

/// An exception as written by the target.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReportedException {
    pub class: String,
    #[serde(default)]
    pub message: String,
}

impl ReportedException {
    pub fn into_finding(self, verb: &str, path: &str, run_id: &str) -> Finding {
        Finding {
            verb: verb.to_string(),
            path: path.to_string(),
            class: self.class,
            message: self.message,
            run_id: run_id.to_string(),
            recorded_at: Some(chrono::Utc::now()),
        }
    }
}

/// The exceptions file of one target.
#[derive(Debug, Clone)]
pub struct ExceptionsFile {
    path: PathBuf,
}

impl ExceptionsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the pending exception, if any, leaving the file empty.
    pub async fn take(&self) -> Result<Option<ReportedException>, StoreError> {
        let io = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io(e)),
        };
        if data.trim().is_empty() {
            return Ok(None);
        }

        tokio::fs::write(&self.path, b"").await.map_err(io)?;
        let exception = serde_json::from_str(&data).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            line: 1,
            source,
        })?;
        Ok(Some(exception))
    }
}
