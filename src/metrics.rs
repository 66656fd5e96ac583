//! Prometheus counters for a fuzzing run.
//!
//! A [`Metrics`] context is constructed once and cloned into each component.
//! Counters are reference-counted internally, so clones share state.

use std::path::Path;

use prometheus::{IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

const NAMESPACE: &str = "sqltaint";

/// Counters shared by the client, detector and fuzz loop.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Responses received, by status code
    pub requests: IntCounterVec,
    /// Statements handed to the SQL parser
    pub statements_parsed: IntCounter,
    /// Statements the parser rejected that are known to be unsupported
    pub parse_library_failures: IntCounter,
    /// Statements the detector failed on unexpectedly
    pub parse_engine_failures: IntCounter,
    /// Distinct findings recorded
    pub findings: IntCounter,
    /// Recorded entries that could not be bound to a route
    pub corpus_skipped: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("requests_total", "HTTP responses received from the target")
                .namespace(NAMESPACE),
            &["status"],
        )?;
        let statements_parsed = counter("statements_parsed_total", "SQL statements parsed")?;
        let parse_library_failures = counter(
            "parse_library_failures_total",
            "Statements rejected by the SQL parser as a known limitation",
        )?;
        let parse_engine_failures = counter(
            "parse_engine_failures_total",
            "Statements the taint detector failed to handle",
        )?;
        let findings = counter("findings_total", "Distinct findings recorded")?;
        let corpus_skipped = counter(
            "corpus_skipped_total",
            "Recorded requests skipped during corpus translation",
        )?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(statements_parsed.clone()))?;
        registry.register(Box::new(parse_library_failures.clone()))?;
        registry.register(Box::new(parse_engine_failures.clone()))?;
        registry.register(Box::new(findings.clone()))?;
        registry.register(Box::new(corpus_skipped.clone()))?;

        Ok(Self {
            registry,
            requests,
            statements_parsed,
            parse_library_failures,
            parse_engine_failures,
            findings,
            corpus_skipped,
        })
    }

    /// Count one response.
    pub fn observe_status(&self, status: u16) {
        self.requests.with_label_values(&[&status.to_string()]).inc();
    }

    /// Render every counter in the text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }

    /// Write the text exposition to a file.
    pub async fn write_to(&self, path: &Path) -> Result<(), prometheus::Error> {
        let text = self.encode()?;
        tokio::fs::write(path, text)
            .await
            .map_err(prometheus::Error::Io)
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("findings", &self.findings.get())
            .field("statements_parsed", &self.statements_parsed.get())
            .finish_non_exhaustive()
    }
}

fn counter(name: &str, help: &str) -> Result<IntCounter, prometheus::Error> {
    IntCounter::with_opts(Opts::new(name, help).namespace(NAMESPACE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_contains_counters() {
        let metrics = Metrics::new().unwrap();
        metrics.observe_status(200);
        metrics.observe_status(200);
        metrics.observe_status(500);
        metrics.findings.inc();

        let text = metrics.encode().unwrap();
        assert!(text.contains(r#"sqltaint_requests_total{status="200"} 2"#));
        assert!(text.contains(r#"sqltaint_requests_total{status="500"} 1"#));
        assert!(text.contains("sqltaint_findings_total 1"));
        assert!(text.contains("sqltaint_statements_parsed_total 0"));
    }

    #[test]
    fn test_clones_share_state() {
        let metrics = Metrics::new().unwrap();
        let clone = metrics.clone();
        clone.statements_parsed.inc_by(3);
        assert_eq!(metrics.statements_parsed.get(), 3);
    }

    #[tokio::test]
    async fn test_write_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.prom");
        let metrics = Metrics::new().unwrap();
        metrics.corpus_skipped.inc();
        metrics.write_to(&path).await.unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("sqltaint_corpus_skipped_total 1"));
    }
}
