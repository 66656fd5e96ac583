//! The fuzz loop.
//!
//! One request is in flight at a time. Each iteration picks a route,
//! mutates its leaves, sends the synthesized request, waits for the
//! database to flush its log and then checks the newly logged statements
//! for the values just sent. The taint check for request N completes before
//! request N+1 is built, so every finding is attributed to the request that
//! caused it.
//!
//! A transport failure ends the run. Cancellation is checked at the top of
//! every iteration and raced against every network wait.

pub mod policy;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::FuzzClient;
use crate::config::Settings;
use crate::corpus::translate;
use crate::coverage::Coverage;
use crate::error::{ClientError, ConfigError, FuzzError};
use crate::findings::{ExceptionsFile, Finding, FindingStore, JsonlStore};
use crate::har::Har;
use crate::metrics::Metrics;
use crate::request::{HttpRequest, to_request};
use crate::route::RouteRegistry;
use crate::schema::ApiSpec;
use crate::taint::{Candidate, ParseStats, QueryLog, TaintDetector};

pub use policy::{Policy, PolicyKind};

/// What a run did, reported when it ends.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub run_id: String,
    /// Completed iterations
    pub iterations: u64,
    /// Responses received, including corpus replay and health probes
    pub requests: u64,
    pub statuses: BTreeMap<u16, u64>,
    /// Share of 2xx responses
    pub success_ratio: f64,
    /// Cumulative coverage percentage, when coverage feedback is enabled
    pub coverage: Option<f64>,
    pub parse: ParseStats,
    /// Distinct tainted (table, column, action) sites
    pub tainted: usize,
    /// Exceptions reported by the target
    pub exceptions: usize,
    /// The run ended because it was cancelled
    pub cancelled: bool,
}

impl RunSummary {
    pub fn log(&self) {
        for (status, count) in &self.statuses {
            info!(status, count, "Responses by status");
        }
        info!(
            run_id = %self.run_id,
            iterations = self.iterations,
            requests = self.requests,
            success_ratio = self.success_ratio,
            coverage = self.coverage,
            statements = self.parse.statements,
            library_failures = self.parse.library_failures,
            engine_failures = self.parse.engine_failures,
            tainted = self.tainted,
            exceptions = self.exceptions,
            cancelled = self.cancelled,
            "Run finished"
        );
    }
}

/// Drives one run against one target.
pub struct Fuzzer {
    registry: RouteRegistry,
    policy: Policy,
    client: FuzzClient,
    detector: TaintDetector,
    store: Arc<dyn FindingStore>,
    coverage: Option<Coverage>,
    exceptions: Option<ExceptionsFile>,
    metrics: Metrics,
    run_id: String,
    settle: Duration,
    max_iterations: Option<u64>,
    rng: StdRng,
    iterations: u64,
    exceptions_found: usize,
}

impl Fuzzer {
    pub fn new(
        registry: RouteRegistry,
        client: FuzzClient,
        detector: TaintDetector,
        store: Arc<dyn FindingStore>,
        metrics: Metrics,
        run_id: impl Into<String>,
    ) -> Self {
        let settle = client.timeouts().log_settle;
        Self {
            policy: Policy::new(PolicyKind::default(), registry.len()),
            registry,
            client,
            detector,
            store,
            coverage: None,
            exceptions: None,
            metrics,
            run_id: run_id.into(),
            settle,
            max_iterations: None,
            rng: StdRng::from_os_rng(),
            iterations: 0,
            exceptions_found: 0,
        }
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_coverage(mut self, coverage: Coverage) -> Self {
        self.coverage = Some(coverage);
        self
    }

    pub fn with_exceptions(mut self, exceptions: ExceptionsFile) -> Self {
        self.exceptions = Some(exceptions);
        self
    }

    pub fn with_max_iterations(mut self, max: u64) -> Self {
        self.max_iterations = Some(max);
        self
    }

    /// Make value generation and random route selection reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn registry(&self) -> &RouteRegistry {
        &self.registry
    }

    pub fn detector(&self) -> &TaintDetector {
        &self.detector
    }

    pub fn client(&self) -> &FuzzClient {
        &self.client
    }

    /// Send every recorded corpus request once, then skip the statements
    /// they logged.
    pub async fn replay_corpus(&mut self, cancel: &CancellationToken) -> Result<usize, FuzzError> {
        let mut sent = 0;
        for route in self.registry.iter() {
            for captured in route.corpus() {
                let resp = self.client.send(&HttpRequest::from(captured), cancel).await?;
                debug!(route = %route, status = resp.status.as_u16(), "Corpus request");
                sent += 1;
            }
        }
        let skipped = self.detector.seek().await?;
        info!(sent, skipped_rows = skipped, "Corpus replayed");
        Ok(sent)
    }

    /// Fuzz until cancelled or the iteration limit is reached.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<RunSummary, FuzzError> {
        if self.registry.is_empty() {
            return Err(ConfigError::Invalid("no routes to fuzz".to_string()).into());
        }
        info!(
            run_id = %self.run_id,
            routes = self.registry.len(),
            policy = %self.policy.kind(),
            focus = ?self.policy.focus(),
            "Fuzzing started"
        );

        let outcome = loop {
            if cancel.is_cancelled() {
                break Ok(true);
            }
            if self.max_iterations.is_some_and(|max| self.iterations >= max) {
                break Ok(false);
            }
            match self.step(cancel).await {
                Ok(()) => self.iterations += 1,
                Err(FuzzError::Client(ClientError::Cancelled)) => break Ok(true),
                Err(e) => break Err(e),
            }
        };

        self.detector.log_stats();
        match outcome {
            Ok(cancelled) => {
                let summary = self.summary(cancelled);
                summary.log();
                Ok(summary)
            }
            Err(e) => {
                self.summary(false).log();
                Err(e)
            }
        }
    }

    async fn step(&mut self, cancel: &CancellationToken) -> Result<(), FuzzError> {
        let gained = self.coverage.as_ref().is_some_and(Coverage::gained);
        let Some(id) = self.policy.pick(gained, &mut self.rng) else {
            return Err(ConfigError::Invalid("no routes to fuzz".to_string()).into());
        };
        let route = self
            .registry
            .get_mut(id)
            .ok_or_else(|| ConfigError::Invalid(format!("route {id} is not registered")))?;

        route.mutate(&mut self.rng);
        let request = to_request(route)?;
        let candidates = Candidate::from_values(&route.current_values());
        let verb = route.method().to_string();
        let path = route.path().to_string();

        let response = self.client.send(&request, cancel).await?;
        debug!(
            route = %id,
            verb = %verb,
            path = %path,
            status = response.status.as_u16(),
            candidates = candidates.len(),
            "Fuzzed"
        );

        if !self.settle.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(ClientError::Cancelled.into()),
                _ = tokio::time::sleep(self.settle) => {}
            }
        }

        for tainted in self.detector.check(&candidates).await? {
            let finding = Finding::from_taint(&verb, &path, &self.run_id, &tainted);
            self.store.record(finding).await?;
            self.metrics.findings.inc();
        }

        if let Some(coverage) = &mut self.coverage {
            coverage.update().await?;
        }

        if let Some(file) = &self.exceptions {
            if let Some(exception) = file.take().await? {
                warn!(
                    verb = %verb,
                    path = %path,
                    class = %exception.class,
                    message = %exception.message,
                    "Target raised an exception"
                );
                self.store
                    .record(exception.into_finding(&verb, &path, &self.run_id))
                    .await?;
                self.metrics.findings.inc();
                self.exceptions_found += 1;
            }
        }
        Ok(())
    }

    /// Counters so far.
    pub fn summary(&self, cancelled: bool) -> RunSummary {
        RunSummary {
            run_id: self.run_id.clone(),
            iterations: self.iterations,
            requests: self.client.total_requests(),
            statuses: self.client.status_counts(),
            success_ratio: self.client.success_ratio(),
            coverage: self.coverage.as_ref().map(|c| c.cumulative),
            parse: self.detector.stats(),
            tainted: self.detector.findings().len(),
            exceptions: self.exceptions_found,
            cancelled,
        }
    }
}

/// Set up every component from `settings` and fuzz.
///
/// Metrics are written to `settings.metrics_path` however the run ends.
pub async fn launch(settings: &Settings, cancel: &CancellationToken) -> Result<RunSummary, FuzzError> {
    let metrics = Metrics::new()?;
    let result = prepare_and_run(settings, &metrics, cancel).await;
    if let Some(path) = &settings.metrics_path {
        metrics.write_to(path).await?;
        debug!(path = %path.display(), "Metrics written");
    }
    result
}

async fn prepare_and_run(
    settings: &Settings,
    metrics: &Metrics,
    cancel: &CancellationToken,
) -> Result<RunSummary, FuzzError> {
    let spec = ApiSpec::load(&settings.spec)?;
    let mut registry = RouteRegistry::build(&spec, &settings.registry)?;
    info!(routes = registry.len(), "Routes registered");

    if let Some(path) = &settings.corpus {
        let har = Har::load(path)?;
        let corpus = translate(&registry, &har);
        metrics.corpus_skipped.inc_by(corpus.skipped().len() as u64);
        let routes = registry.seed(&corpus);
        info!(
            entries = corpus.len(),
            skipped = corpus.skipped().len(),
            routes,
            "Corpus loaded"
        );
    }

    let policy = match &settings.route {
        Some(selector) => {
            let route = registry
                .by_template(&selector.template, &selector.method)
                .ok_or_else(|| {
                    ConfigError::Invalid(format!(
                        "no registered route {} {}",
                        selector.method, selector.template
                    ))
                })?;
            Policy::focused(route.id())
        }
        None => Policy::new(settings.policy, registry.len()),
    };

    let mut client = FuzzClient::new(settings.target.clone(), settings.timeouts.clone(), metrics.clone())?;
    if let Some(rate) = settings.rate {
        client = client.with_rate_limit(rate);
    }
    if let Some(path) = &settings.health_path {
        client.wait_ready(path, cancel).await?;
    }
    if let Some(path) = &settings.login {
        let har = Har::load(path)?;
        client.replay(&har, cancel).await?;
    }

    let mut log = QueryLog::new(&settings.query_log).with_max_rotations(settings.max_rotations);
    if let Some(path) = &settings.triage_path {
        log = log.with_triage(path);
    }
    let detector = TaintDetector::new(log, metrics.clone());
    let store = Arc::new(JsonlStore::new(&settings.findings_path));

    let mut fuzzer = Fuzzer::new(
        registry,
        client,
        detector,
        store,
        metrics.clone(),
        settings.run_id.clone(),
    )
    .with_policy(policy);
    if let Some(path) = &settings.coverage_path {
        fuzzer = fuzzer.with_coverage(Coverage::new(path));
    }
    if let Some(path) = &settings.exceptions_path {
        fuzzer = fuzzer.with_exceptions(ExceptionsFile::new(path));
    }
    if let Some(max) = settings.max_iterations {
        fuzzer = fuzzer.with_max_iterations(max);
    }
    if let Some(seed) = settings.seed {
        fuzzer = fuzzer.with_seed(seed);
    }

    fuzzer.replay_corpus(cancel).await?;
    fuzzer.run(cancel).await
}
