//! SQL taint detection.
//!
//! After each fuzzed request the detector reads the statements the database
//! logged since the previous cycle and looks for the request's parameter
//! values inside them. A cheap substring check gates the expensive parse;
//! statements that pass are parsed once and searched for every candidate
//! that matched.
//!
//! Findings are deduplicated by (table, column, action) for the lifetime of
//! the detector, so the same injection point is reported once per run no
//! matter how many requests reach it.

pub mod locate;
pub mod pglog;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{FuzzError, LocateError, LogError};
use crate::metrics::Metrics;
use crate::route::{NodeId, value_text};

pub use locate::{Action, Site};
pub use pglog::{LogBatch, LogCursor, LogRecord, QueryLog};

/// Statement prefixes the SQL parser is known not to handle.
pub const PARSE_ALLOW_LIST: [&str; 3] = ["COPY", "CREATE TABLE", "COMMENT ON COLUMN"];

/// A fuzzed value to look for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Parameter (or leaf) that carried the value
    pub param: String,
    /// Value as it would appear in SQL text
    pub value: String,
}

impl Candidate {
    pub fn new(param: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            param: param.into(),
            value: value.into(),
        }
    }

    /// Candidates for a route's current leaf values. Empty values are
    /// dropped since they match every statement.
    pub fn from_values(values: &[(NodeId, Value)]) -> Vec<Self> {
        values
            .iter()
            .map(|(id, v)| Candidate::new(id.as_str(), value_text(v)))
            .filter(|c| !c.value.is_empty())
            .collect()
    }
}

/// A statement a fuzzed value reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaintedQuery {
    pub param: String,
    /// Statement text as logged
    pub query: String,
    pub table: String,
    pub column: String,
    pub action: Action,
}

/// Cumulative parser counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ParseStats {
    /// Statements handed to the parser
    pub statements: u64,
    /// Parse failures on known-unsupported statement shapes
    pub library_failures: u64,
    /// Any other failure
    pub engine_failures: u64,
    /// Matches found, before deduplication
    pub tainted: u64,
}

/// Search one statement for every candidate, without deduplication.
pub fn search(statement: &str, candidates: &[Candidate]) -> Result<Vec<TaintedQuery>, LocateError> {
    let matched = prefilter(statement, candidates);
    if matched.is_empty() {
        return Ok(Vec::new());
    }
    let parsed = locate::parse(statement)?;
    let mut found = Vec::new();
    for candidate in matched {
        for site in locate::locate(&parsed, &candidate.value)? {
            found.push(tainted(candidate, statement, site));
        }
    }
    Ok(found)
}

fn prefilter<'a>(statement: &str, candidates: &'a [Candidate]) -> Vec<&'a Candidate> {
    candidates
        .iter()
        .filter(|c| !c.value.is_empty() && statement.contains(c.value.as_str()))
        .collect()
}

fn tainted(candidate: &Candidate, statement: &str, site: Site) -> TaintedQuery {
    TaintedQuery {
        param: candidate.param.clone(),
        query: statement.to_string(),
        table: site.table,
        column: site.column,
        action: site.action,
    }
}

fn is_allow_listed(statement: &str) -> bool {
    let head = statement.trim_start().to_ascii_uppercase();
    PARSE_ALLOW_LIST.iter().any(|p| head.starts_with(p))
}

/// Stateful detector bound to one query log.
#[derive(Debug)]
pub struct TaintDetector {
    log: QueryLog,
    seen: HashSet<(String, String, Action)>,
    findings: Vec<TaintedQuery>,
    stats: ParseStats,
    metrics: Metrics,
}

impl TaintDetector {
    pub fn new(log: QueryLog, metrics: Metrics) -> Self {
        Self {
            log,
            seen: HashSet::new(),
            findings: Vec::new(),
            stats: ParseStats::default(),
            metrics,
        }
    }

    /// Skip everything already in the log.
    pub async fn seek(&mut self) -> Result<usize, LogError> {
        self.log.seek_to_end().await
    }

    /// Read newly logged statements and return the findings not reported
    /// before.
    pub async fn check(&mut self, candidates: &[Candidate]) -> Result<Vec<TaintedQuery>, FuzzError> {
        let batch = self.log.read_new().await?;
        let statements = batch.statements();
        debug!(
            rows = batch.records.len(),
            statements = statements.len(),
            candidates = candidates.len(),
            "Taint check"
        );
        self.scan(&statements, candidates)
    }

    /// Search already-extracted statements.
    ///
    /// Parse failures are counted and skipped. An `INSERT` without a column
    /// list that holds a candidate is the one failure that aborts the scan.
    pub fn scan(
        &mut self,
        statements: &[String],
        candidates: &[Candidate],
    ) -> Result<Vec<TaintedQuery>, FuzzError> {
        let mut new = Vec::new();

        for statement in statements {
            let matched = prefilter(statement, candidates);
            if matched.is_empty() {
                continue;
            }

            self.stats.statements += 1;
            self.metrics.statements_parsed.inc();
            let parsed = match locate::parse(statement) {
                Ok(parsed) => parsed,
                Err(e) => {
                    self.triage(statement, &e);
                    continue;
                }
            };

            for candidate in matched {
                let sites = match locate::locate(&parsed, &candidate.value) {
                    Ok(sites) => sites,
                    Err(e) if e.is_fatal() => {
                        return Err(FuzzError::Locate {
                            query: statement.clone(),
                            source: e,
                        });
                    }
                    Err(e) => {
                        self.triage(statement, &e);
                        continue;
                    }
                };

                for site in sites {
                    self.stats.tainted += 1;
                    let key = (site.table.clone(), site.column.clone(), site.action);
                    if !self.seen.insert(key) {
                        continue;
                    }
                    let finding = tainted(candidate, statement, site);
                    info!(
                        param = %finding.param,
                        table = %finding.table,
                        column = %finding.column,
                        action = %finding.action,
                        query = %finding.query,
                        "Tainted query"
                    );
                    self.findings.push(finding.clone());
                    new.push(finding);
                }
            }
        }
        Ok(new)
    }

    fn triage(&mut self, statement: &str, err: &LocateError) {
        if matches!(err, LocateError::Library(_)) && is_allow_listed(statement) {
            self.stats.library_failures += 1;
            self.metrics.parse_library_failures.inc();
            debug!(error = %err, "Known unsupported statement");
        } else {
            self.stats.engine_failures += 1;
            self.metrics.parse_engine_failures.inc();
            warn!(error = %err, statement = %statement, "Failed to search statement");
        }
    }

    pub fn stats(&self) -> ParseStats {
        self.stats
    }

    /// Every distinct finding so far, in discovery order.
    pub fn findings(&self) -> &[TaintedQuery] {
        &self.findings
    }

    pub fn log(&self) -> &QueryLog {
        &self.log
    }

    /// Log the cumulative counters.
    pub fn log_stats(&self) {
        info!(
            statements = self.stats.statements,
            library_failures = self.stats.library_failures,
            engine_failures = self.stats.engine_failures,
            tainted = self.stats.tainted,
            distinct = self.findings.len(),
            "Parser statistics"
        );
    }
}
