//! Tailing the PostgreSQL CSV query log.
//!
//! PostgreSQL's `csvlog` destination writes one row per log event with a
//! fixed column layout. [`QueryLog`] re-reads the whole file on every cycle
//! and returns only the rows appended since the previous read, tracked by a
//! [`LogCursor`]. Error rows are excluded from taint matching and written to
//! an optional triage file as JSON lines.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{ItemError, LogError};

/// Column indices of the `csvlog` format.
pub mod columns {
    pub const LOG_TIME: usize = 0;
    pub const ERROR_SEVERITY: usize = 11;
    pub const SQL_STATE_CODE: usize = 12;
    pub const MESSAGE: usize = 13;
    pub const DETAIL: usize = 14;
    pub const HINT: usize = 15;
    pub const INTERNAL_QUERY: usize = 16;
    pub const CONTEXT: usize = 18;
    pub const QUERY: usize = 19;
}

/// Rows shorter than this lack a message and are skipped.
pub const REQUIRED_COLUMNS: usize = columns::MESSAGE + 1;

/// Consecutive rotations tolerated before reading fails.
pub const DEFAULT_MAX_ROTATIONS: u32 = 3;

const ERROR_SEVERITIES: [&str; 4] = ["ERROR", "WARNING", "FATAL", "PANIC"];

/// Emitted constantly by some provisioning setups; never worth triaging.
const IGNORED_MESSAGE: &str = r#"role "vagrant" does not exist"#;

/// One log event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LogRecord {
    pub log_time: String,
    pub error_severity: String,
    pub sql_state_code: String,
    pub message: String,
    pub detail: String,
    pub hint: String,
    pub internal_query: String,
    pub context: String,
    pub query: String,
}

impl LogRecord {
    /// Build a record from a CSV row. `row` is the 1-based row number.
    ///
    /// Fields are decoded as UTF-8, replacing invalid sequences.
    pub fn from_row(row: usize, fields: &csv::ByteRecord) -> Result<Self, ItemError> {
        if fields.len() < REQUIRED_COLUMNS {
            return Err(ItemError::ShortRow {
                row,
                columns: fields.len(),
                required: REQUIRED_COLUMNS,
            });
        }
        let col = |i: usize| field(fields, i);
        Ok(Self {
            log_time: col(columns::LOG_TIME),
            error_severity: col(columns::ERROR_SEVERITY),
            sql_state_code: col(columns::SQL_STATE_CODE),
            message: col(columns::MESSAGE),
            detail: col(columns::DETAIL),
            hint: col(columns::HINT),
            internal_query: col(columns::INTERNAL_QUERY),
            context: col(columns::CONTEXT),
            query: col(columns::QUERY),
        })
    }

    /// Whether the event reports a failure rather than a statement.
    pub fn is_error(&self) -> bool {
        ERROR_SEVERITIES
            .iter()
            .any(|s| self.error_severity.eq_ignore_ascii_case(s))
    }

    /// The executed statement, with bound parameters substituted.
    pub fn statement(&self) -> Option<String> {
        let statement = sanitize(&self.message)?;
        match self.detail.strip_prefix("parameters: ") {
            Some(params) => Some(bind_parameters(&statement, params)),
            None => Some(statement),
        }
    }
}

fn field(fields: &csv::ByteRecord, i: usize) -> String {
    fields
        .get(i)
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .unwrap_or_default()
}

/// Length of the prefix of `data` made of complete rows.
///
/// A row is complete once its terminating newline has been written. Newlines
/// inside quoted fields do not end a row.
fn complete_prefix(data: &[u8]) -> usize {
    let mut quoted = false;
    let mut end = 0;
    for (i, b) in data.iter().enumerate() {
        match b {
            b'"' => quoted = !quoted,
            b'\n' if !quoted => end = i + 1,
            _ => {}
        }
    }
    end
}

/// Extract statement text from a log message.
///
/// Accepts `statement: ...`, `execute <name>: ...` and the same two forms
/// after a `duration: N ms  ` prefix. Double quotes are removed so quoted
/// identifiers parse as plain ones.
pub fn sanitize(message: &str) -> Option<String> {
    let mut rest = message.trim_start();
    if let Some(after) = rest.strip_prefix("duration:") {
        rest = after.split_once("ms")?.1.trim_start();
    }
    let body = if let Some(after) = rest.strip_prefix("statement:") {
        after
    } else if rest.starts_with("execute ") {
        rest.split_once(':')?.1
    } else {
        return None;
    };
    let cleaned = body.replace('"', "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// Substitute `$N` placeholders with the values listed in a
/// `parameters: $1 = '...', $2 = ...` detail line.
pub fn bind_parameters(statement: &str, params: &str) -> String {
    let values = parse_parameters(params);
    if values.is_empty() {
        return statement.to_string();
    }

    let mut out = String::with_capacity(statement.len() + params.len());
    let mut chars = statement.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let start = i + 1;
        let mut end = start;
        while let Some(&(j, d)) = chars.peek() {
            if !d.is_ascii_digit() {
                break;
            }
            end = j + 1;
            chars.next();
        }
        let replacement = statement[start..end]
            .parse::<usize>()
            .ok()
            .and_then(|n| values.iter().find(|(k, _)| *k == n));
        match replacement {
            Some((_, v)) => out.push_str(v),
            None => out.push_str(&statement[i..end]),
        }
    }
    out
}

fn parse_parameters(params: &str) -> Vec<(usize, String)> {
    let mut values = Vec::new();
    let mut rest = params.trim();
    while let Some(after) = rest.strip_prefix('$') {
        let digits = after.bytes().take_while(u8::is_ascii_digit).count();
        let Ok(n) = after[..digits].parse::<usize>() else {
            break;
        };
        let Some(after) = after[digits..].trim_start().strip_prefix('=') else {
            break;
        };
        let after = after.trim_start();

        let (value, remaining) = if let Some(quoted) = after.strip_prefix('\'') {
            let mut end = None;
            let bytes = quoted.as_bytes();
            let mut k = 0;
            while k < bytes.len() {
                if bytes[k] == b'\'' {
                    if bytes.get(k + 1) == Some(&b'\'') {
                        k += 2;
                        continue;
                    }
                    end = Some(k);
                    break;
                }
                k += 1;
            }
            let Some(end) = end else { break };
            (format!("'{}'", &quoted[..end]), &quoted[end + 1..])
        } else {
            let end = after.find(',').unwrap_or(after.len());
            (after[..end].trim().to_string(), &after[end..])
        };

        values.push((n, value));
        rest = remaining.trim_start().trim_start_matches(',').trim_start();
    }
    values
}

/// Position in the log after the most recent read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogCursor {
    /// Timestamp of the last row returned
    pub timestamp: Option<String>,
    /// Rows consumed so far, including skipped ones
    pub consumed: usize,
}

/// Rows returned by one read.
#[derive(Debug, Clone, Default)]
pub struct LogBatch {
    /// Well-formed rows appended since the previous read
    pub records: Vec<LogRecord>,
    /// Rows that could not be used
    pub skipped: Vec<ItemError>,
    /// Whether the cursor had to be reset
    pub rotated: bool,
}

impl LogBatch {
    /// Statements from non-error rows, in log order.
    pub fn statements(&self) -> Vec<String> {
        self.records
            .iter()
            .filter(|r| !r.is_error())
            .filter_map(LogRecord::statement)
            .collect()
    }
}

/// A tailed query log.
#[derive(Debug)]
pub struct QueryLog {
    path: PathBuf,
    cursor: LogCursor,
    rotations: u32,
    max_rotations: u32,
    triage: Option<PathBuf>,
}

impl QueryLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cursor: LogCursor::default(),
            rotations: 0,
            max_rotations: DEFAULT_MAX_ROTATIONS,
            triage: None,
        }
    }

    pub fn with_max_rotations(mut self, max_rotations: u32) -> Self {
        self.max_rotations = max_rotations;
        self
    }

    /// Append error rows to `path` as JSON lines.
    pub fn with_triage(mut self, path: impl Into<PathBuf>) -> Self {
        self.triage = Some(path.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn cursor(&self) -> &LogCursor {
        &self.cursor
    }

    /// Skip every row currently in the log.
    pub async fn seek_to_end(&mut self) -> Result<usize, LogError> {
        let batch = self.read_new().await?;
        debug!(
            path = %self.path.display(),
            stale = batch.records.len() + batch.skipped.len(),
            "Seeked past stale log rows"
        );
        Ok(batch.records.len() + batch.skipped.len())
    }

    /// Read rows appended since the previous call and advance the cursor.
    ///
    /// If the row the cursor points at no longer exists, the log is treated
    /// as rotated and every current row is returned. Rotation that recurs
    /// more than the configured number of times in a row is an error.
    pub async fn read_new(&mut self) -> Result<LogBatch, LogError> {
        let rows = self.read_rows().await?;

        let boundary_ok = match (&self.cursor.timestamp, self.cursor.consumed) {
            (_, 0) => true,
            (None, consumed) => rows.len() >= consumed,
            (Some(ts), consumed) => rows
                .get(consumed - 1)
                .is_some_and(|(row_ts, _)| row_ts == ts),
        };

        let start = if boundary_ok {
            self.rotations = 0;
            self.cursor.consumed
        } else {
            self.rotations += 1;
            warn!(
                path = %self.path.display(),
                timestamp = ?self.cursor.timestamp,
                consumed = self.cursor.consumed,
                rotations = self.rotations,
                "Query log boundary vanished; assuming rotation"
            );
            if self.rotations > self.max_rotations {
                return Err(LogError::Rotated {
                    path: self.path.clone(),
                    count: self.rotations,
                    timestamp: self.cursor.timestamp.clone().unwrap_or_default(),
                });
            }
            self.cursor = LogCursor::default();
            0
        };

        let mut batch = LogBatch {
            rotated: !boundary_ok,
            ..LogBatch::default()
        };
        if let Some((ts, _)) = rows.last() {
            self.cursor.timestamp = Some(ts.clone());
        }
        self.cursor.consumed = rows.len();

        for (_, row) in rows.into_iter().skip(start) {
            match row {
                Ok(record) => batch.records.push(record),
                Err(e) => {
                    debug!(error = %e, "Skipping log row");
                    batch.skipped.push(e);
                }
            }
        }

        if let Some(path) = &self.triage {
            triage(path, &batch.records).await?;
        }
        Ok(batch)
    }

    async fn read_rows(&self) -> Result<Vec<(String, Result<LogRecord, ItemError>)>, LogError> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Query log does not exist yet");
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(LogError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        // A trailing row still being written is left for the next read.
        let complete = &data[..complete_prefix(&data)];
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(complete);

        let mut rows = Vec::new();
        for (i, result) in reader.byte_records().enumerate() {
            let fields = result.map_err(|source| LogError::Csv {
                path: self.path.clone(),
                source,
            })?;
            let ts = field(&fields, columns::LOG_TIME);
            rows.push((ts, LogRecord::from_row(i + 1, &fields)));
        }
        Ok(rows)
    }
}

async fn triage(path: &Path, records: &[LogRecord]) -> Result<(), LogError> {
    let mut out = Vec::new();
    for record in records {
        if !record.is_error() || record.message == IGNORED_MESSAGE {
            continue;
        }
        // Serializing a struct of strings cannot fail.
        if let Ok(line) = serde_json::to_vec(record) {
            out.extend_from_slice(&line);
            out.push(b'\n');
        }
    }
    if out.is_empty() {
        return Ok(());
    }

    let map_err = |source| LogError::Triage {
        path: path.to_path_buf(),
        source,
    };
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(map_err)?;
    file.write_all(&out).await.map_err(map_err)?;
    file.flush().await.map_err(map_err)
}
