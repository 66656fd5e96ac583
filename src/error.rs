//! Error taxonomy for the fuzzing engine.
//!
//! Errors fall into three classes:
//!
//! - **Configuration errors** ([`SpecError`], [`ConfigError`]): the input
//!   contract is unsupported. These terminate the process.
//! - **Transient I/O errors** ([`LogError`], [`ClientError`], [`StoreError`],
//!   [`CoverageError`]): surfaced to the caller as typed failures.
//! - **Item errors** ([`ItemError`]): a single recorded request or log row
//!   could not be used. The item is skipped and counted.

use std::path::PathBuf;
use thiserror::Error;

/// A specification document that cannot be fuzzed as written.
///
/// Every variant carries enough of the offending input to locate it in the
/// source document.
#[derive(Debug, Error)]
pub enum SpecError {
    /// The document could not be read from disk.
    #[error("failed to read specification {path}: {source}")]
    Io {
        /// Path that was read
        path: PathBuf,
        /// Underlying I/O failure
        source: std::io::Error,
    },

    /// The document is not valid JSON.
    #[error("specification is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A required field is absent.
    #[error("{location}: missing required field `{field}` in {fragment}")]
    MissingField {
        /// Where in the document (e.g. `GET /pet/{petId} param petId`)
        location: String,
        /// Name of the missing field
        field: &'static str,
        /// Offending JSON fragment
        fragment: String,
    },

    /// A `type` that is neither primitive, `object`, nor `array`.
    #[error("{location}: unsupported type `{kind}` in {fragment}")]
    UnsupportedType {
        /// Where in the document
        location: String,
        /// Declared type name
        kind: String,
        /// Offending JSON fragment
        fragment: String,
    },

    /// An object found where only primitives are permitted.
    #[error("{location}: objects are only allowed in body parameters, found in `{param_in}`")]
    ObjectOutsideBody {
        /// Where in the document
        location: String,
        /// Parameter location that carried the object
        param_in: String,
    },

    /// A `$ref` survived preprocessing.
    #[error("{location}: unexpanded $ref `{reference}`; expand references before loading")]
    UnexpandedRef {
        /// Where in the document
        location: String,
        /// The reference target
        reference: String,
    },

    /// An unknown parameter location.
    #[error("{location}: unknown parameter location `{param_in}`")]
    UnknownLocation {
        /// Where in the document
        location: String,
        /// The declared `in` value
        param_in: String,
    },

    /// A structurally invalid node (wrong JSON type for a field).
    #[error("{location}: malformed {what}: {fragment}")]
    Malformed {
        /// Where in the document
        location: String,
        /// What was expected
        what: &'static str,
        /// Offending JSON fragment
        fragment: String,
    },
}

/// Invalid runtime configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that was read
        path: PathBuf,
        /// Underlying I/O failure
        source: std::io::Error,
    },

    /// Config file is not valid YAML for the expected shape.
    #[error("failed to parse config file {path}: {details}")]
    Parse {
        /// Path that was read
        path: PathBuf,
        /// Parser message
        details: String,
    },

    /// A value failed validation.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Failure loading or converting a traffic recording.
#[derive(Debug, Error)]
pub enum HarError {
    /// Recording could not be read.
    #[error("failed to read recording {path}: {source}")]
    Io {
        /// Path that was read
        path: PathBuf,
        /// Underlying I/O failure
        source: std::io::Error,
    },

    /// Recording is not a valid HAR document.
    #[error("recording is not a valid HAR document: {0}")]
    Json(#[from] serde_json::Error),
}

/// A single item that was skipped without aborting the surrounding operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ItemError {
    /// A recorded entry carries a URL that cannot be parsed.
    #[error("entry {index}: invalid URL `{url}`: {details}")]
    InvalidUrl {
        /// Position in the recording
        index: usize,
        /// Raw URL
        url: String,
        /// Parser message
        details: String,
    },

    /// A recorded entry carries a method that is not a valid HTTP token.
    #[error("entry {index}: invalid method `{method}`")]
    InvalidMethod {
        /// Position in the recording
        index: usize,
        /// Raw method
        method: String,
    },

    /// No registered route matches the entry.
    #[error("entry {index}: no route for {method} {path}")]
    Unmatched {
        /// Position in the recording
        index: usize,
        /// Request method
        method: String,
        /// Request path
        path: String,
    },

    /// A log row lacks one of the required columns.
    #[error("log row {row}: only {columns} columns, need at least {required}")]
    ShortRow {
        /// Row number in the file
        row: usize,
        /// Columns present
        columns: usize,
        /// Columns required
        required: usize,
    },
}

/// Failure reading the database query log.
#[derive(Debug, Error)]
pub enum LogError {
    /// The log could not be opened or read.
    #[error("failed to read query log {path}: {source}")]
    Io {
        /// Log path
        path: PathBuf,
        /// Underlying I/O failure
        source: std::io::Error,
    },

    /// The CSV framing is broken.
    #[error("failed to parse query log {path}: {source}")]
    Csv {
        /// Log path
        path: PathBuf,
        /// Underlying CSV failure
        source: csv::Error,
    },

    /// The cursor boundary vanished too many times in a row.
    #[error("query log {path} rotated {count} times in a row; last seen timestamp `{timestamp}`")]
    Rotated {
        /// Log path
        path: PathBuf,
        /// Consecutive rotations observed
        count: u32,
        /// Timestamp the cursor was looking for
        timestamp: String,
    },

    /// Triage output could not be written.
    #[error("failed to write triage log {path}: {source}")]
    Triage {
        /// Triage path
        path: PathBuf,
        /// Underlying I/O failure
        source: std::io::Error,
    },
}

/// Failure locating a tainted value inside a statement.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LocateError {
    /// The SQL library could not parse the statement.
    #[error("sql parser rejected statement: {0}")]
    Library(String),

    /// The value appears in an INSERT's value list but no column list was
    /// declared, so the column cannot be resolved without a schema lookup.
    #[error("unhandled: insert into `{table}` with no columns provided")]
    InsertWithoutColumns {
        /// Target table
        table: String,
    },

    /// The value index has no corresponding declared column.
    #[error("insert into `{table}`: value index {index} exceeds {columns} declared columns")]
    ColumnIndex {
        /// Target table
        table: String,
        /// Index of the matched value
        index: usize,
        /// Number of declared columns
        columns: usize,
    },
}

impl LocateError {
    /// Errors that mean the detector cannot be trusted to continue.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LocateError::InsertWithoutColumns { .. })
    }
}

/// Failure talking to the target application.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The request could not be sent or the response not received.
    #[error("{method} {url} failed: {source}")]
    Send {
        /// Request method
        method: String,
        /// Request URL
        url: String,
        /// Transport failure
        source: reqwest::Error,
    },

    /// No response within the configured timeout.
    #[error("{method} {url} timed out after {timeout:?}")]
    Timeout {
        /// Request method
        method: String,
        /// Request URL
        url: String,
        /// Configured limit
        timeout: std::time::Duration,
    },

    /// A request could not be assembled.
    #[error("invalid request: {0}")]
    Build(String),

    /// The target never became ready.
    #[error("target at {url} not ready after {attempts} attempts")]
    NotReady {
        /// Health check URL
        url: String,
        /// Attempts made
        attempts: u32,
    },

    /// The run was cancelled while a request was in flight.
    #[error("cancelled")]
    Cancelled,
}

/// Failure reading the source coverage file.
#[derive(Debug, Error)]
pub enum CoverageError {
    /// The file could not be read.
    #[error("failed to read coverage file {path}: {source}")]
    Io {
        /// Coverage path
        path: PathBuf,
        /// Underlying I/O failure
        source: std::io::Error,
    },

    /// The file is not the expected JSON shape.
    #[error("malformed coverage file {path}: {source}")]
    Json {
        /// Coverage path
        path: PathBuf,
        /// Parser failure
        source: serde_json::Error,
    },
}

/// Failure persisting or reading findings.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store file I/O failed.
    #[error("findings store {path}: {source}")]
    Io {
        /// Store path
        path: PathBuf,
        /// Underlying I/O failure
        source: std::io::Error,
    },

    /// A stored record is corrupt.
    #[error("findings store {path} line {line}: {source}")]
    Corrupt {
        /// Store path
        path: PathBuf,
        /// 1-based line number
        line: usize,
        /// Parser failure
        source: serde_json::Error,
    },

    /// A record could not be serialized.
    #[error("failed to serialize finding: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Missing state in the request synthesizer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SynthesizeError {
    /// A required parameter has no mutated value; mutation must precede
    /// synthesis.
    #[error("missing mutated value for {location} parameter `{name}` on {method} {path}")]
    MissingValue {
        /// Route method
        method: String,
        /// Route path template
        path: String,
        /// Parameter location
        location: String,
        /// Parameter name
        name: String,
    },

    /// More than one body parameter on an operation.
    #[error("{method} {path}: more than one body parameter")]
    MultipleBodies {
        /// Route method
        method: String,
        /// Route path template
        path: String,
    },

    /// A header value could not be encoded.
    #[error("invalid header `{name}`: {details}")]
    Header {
        /// Header name
        name: String,
        /// Encoding failure
        details: String,
    },
}

/// Top-level error returned by the fuzzer and the binary.
#[derive(Debug, Error)]
pub enum FuzzError {
    /// Unsupported specification.
    #[error(transparent)]
    Spec(#[from] SpecError),

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Unusable recording.
    #[error(transparent)]
    Har(#[from] HarError),

    /// Query log failure.
    #[error(transparent)]
    Log(#[from] LogError),

    /// Statement locator failure that cannot be skipped.
    #[error("taint detector failure on statement `{query}`: {source}")]
    Locate {
        /// Statement that triggered it
        query: String,
        /// Locator failure
        source: LocateError,
    },

    /// Transport failure.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Request synthesis failure.
    #[error(transparent)]
    Synthesize(#[from] SynthesizeError),

    /// Findings store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Coverage feedback failure.
    #[error(transparent)]
    Coverage(#[from] CoverageError),

    /// Metrics registry failure.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl FuzzError {
    /// Whether the error belongs to the configuration class.
    pub fn is_config(&self) -> bool {
        matches!(self, FuzzError::Spec(_) | FuzzError::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_error_includes_fragment() {
        let err = SpecError::UnsupportedType {
            location: "POST /pet param body".to_string(),
            kind: "tuple".to_string(),
            fragment: r#"{"type":"tuple"}"#.to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("tuple"));
        assert!(msg.contains(r#"{"type":"tuple"}"#));
    }

    #[test]
    fn test_only_insert_without_columns_is_fatal() {
        assert!(
            LocateError::InsertWithoutColumns {
                table: "cities".to_string()
            }
            .is_fatal()
        );
        assert!(!LocateError::Library("bad".to_string()).is_fatal());
        assert!(
            !LocateError::ColumnIndex {
                table: "cities".to_string(),
                index: 3,
                columns: 2
            }
            .is_fatal()
        );
    }

    #[test]
    fn test_config_class() {
        let err: FuzzError = ConfigError::Invalid("rate must be positive".to_string()).into();
        assert!(err.is_config());
        let err: FuzzError = ClientError::Cancelled.into();
        assert!(!err.is_config());
    }
}
