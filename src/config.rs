//! Command line and file configuration.
//!
//! Every flag has a `SQLTAINT_*` environment fallback. Tuning that rarely
//! changes between runs (blacklist, history depth, rotation tolerance,
//! policy) can also come from a YAML file given with `--config`; explicit
//! flags win over the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use http::Method;
use serde::Deserialize;
use url::Url;

use crate::error::ConfigError;
use crate::fuzz::policy::PolicyKind;
use crate::route::{DEFAULT_BLACKLIST, DEFAULT_HISTORY_LIMIT, RegistryOptions};
use crate::taint::pglog::DEFAULT_MAX_ROTATIONS;
use crate::timeout::{DEFAULT_MAX_ATTEMPTS, TimeoutConfig};

/// Default findings store location.
pub const DEFAULT_FINDINGS_PATH: &str = "sqltaint-findings.jsonl";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "sqltaint", version, about = "Black-box API fuzzer with SQL taint detection")]
pub struct Cli {
    /// Log output format
    #[arg(long, env = "SQLTAINT_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty, global = true)]
    pub log_format: LogFormat,

    /// Findings store (JSON lines)
    #[arg(long, env = "SQLTAINT_FINDINGS_PATH", default_value = DEFAULT_FINDINGS_PATH, global = true)]
    pub findings_path: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fuzz a target until cancelled
    Fuzz(FuzzArgs),
    /// Print the findings of one run
    Findings {
        /// Run identifier
        #[arg(long, env = "SQLTAINT_RUN_ID")]
        run_id: String,
    },
}

#[derive(Debug, Clone, Args)]
pub struct FuzzArgs {
    /// API description (OpenAPI v2 JSON, references expanded)
    #[arg(long, env = "SQLTAINT_SPEC")]
    pub spec: PathBuf,

    /// Base URL of the target
    #[arg(long, env = "SQLTAINT_TARGET")]
    pub target: Url,

    /// Postgres CSV log written by the target's database
    #[arg(long, env = "SQLTAINT_QUERY_LOG")]
    pub query_log: PathBuf,

    /// Recorded traffic used to seed route corpora (HAR)
    #[arg(long, env = "SQLTAINT_CORPUS")]
    pub corpus: Option<PathBuf>,

    /// Recorded login traffic replayed before fuzzing (HAR)
    #[arg(long, env = "SQLTAINT_LOGIN")]
    pub login: Option<PathBuf>,

    /// YAML tuning file
    #[arg(long, env = "SQLTAINT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Run identifier; a random UUID when omitted
    #[arg(long, env = "SQLTAINT_RUN_ID")]
    pub run_id: Option<String>,

    /// Route selection policy
    #[arg(long, env = "SQLTAINT_POLICY", value_enum)]
    pub policy: Option<PolicyKind>,

    /// Fuzz only this route, e.g. "GET /pets/{id}"
    #[arg(long, env = "SQLTAINT_ROUTE")]
    pub route: Option<String>,

    /// Coverage file rewritten by the target after each request
    #[arg(long, env = "SQLTAINT_COVERAGE_PATH")]
    pub coverage_path: Option<PathBuf>,

    /// Exceptions file written by the target
    #[arg(long, env = "SQLTAINT_EXCEPTIONS_PATH")]
    pub exceptions_path: Option<PathBuf>,

    /// Where failed statements from the query log are written
    #[arg(long, env = "SQLTAINT_TRIAGE_PATH")]
    pub triage_path: Option<PathBuf>,

    /// Path polled until the target is ready
    #[arg(long, env = "SQLTAINT_HEALTH_PATH")]
    pub health_path: Option<String>,

    /// Prometheus text output written at the end of the run
    #[arg(long, env = "SQLTAINT_METRICS_PATH")]
    pub metrics_path: Option<PathBuf>,

    /// Stop after this many iterations
    #[arg(long, env = "SQLTAINT_MAX_ITERATIONS")]
    pub max_iterations: Option<u64>,

    /// Requests per second
    #[arg(long, env = "SQLTAINT_RATE")]
    pub rate: Option<f64>,

    /// Random seed for reproducible runs
    #[arg(long, env = "SQLTAINT_SEED")]
    pub seed: Option<u64>,

    /// Per-request deadline
    #[arg(long, env = "SQLTAINT_REQUEST_TIMEOUT", value_parser = humantime::parse_duration, default_value = "30s")]
    pub request_timeout: Duration,

    /// Interval between readiness probes
    #[arg(long, env = "SQLTAINT_POLL_INTERVAL", value_parser = humantime::parse_duration, default_value = "2s")]
    pub poll_interval: Duration,

    /// Readiness probes before giving up
    #[arg(long, env = "SQLTAINT_MAX_ATTEMPTS", default_value_t = DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: u32,

    /// Pause after each response before reading the query log
    #[arg(long, env = "SQLTAINT_LOG_SETTLE", value_parser = humantime::parse_duration, default_value = "100ms")]
    pub log_settle: Duration,
}

/// Contents of the `--config` file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub blacklist: Option<Vec<String>>,
    pub history_limit: Option<usize>,
    pub max_rotations: Option<u32>,
    pub policy: Option<PolicyKind>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&data).map_err(|details| ConfigError::Parse {
            path: path.to_path_buf(),
            details,
        })
    }

    pub fn from_yaml(data: &str) -> Result<Self, String> {
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yml::from_str(data).map_err(|e| e.to_string())
    }
}

/// A route named on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSelector {
    pub method: Method,
    pub template: String,
}

impl std::str::FromStr for RouteSelector {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::Invalid(format!("route must look like \"GET /path\", got {s:?}"));
        let (method, template) = s.trim().split_once(char::is_whitespace).ok_or_else(invalid)?;
        let template = template.trim();
        if !template.starts_with('/') {
            return Err(invalid());
        }
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes()).map_err(|_| invalid())?;
        Ok(Self {
            method,
            template: template.to_string(),
        })
    }
}

/// Everything a fuzz run needs, validated.
#[derive(Debug, Clone)]
pub struct Settings {
    pub spec: PathBuf,
    pub target: Url,
    pub query_log: PathBuf,
    pub corpus: Option<PathBuf>,
    pub login: Option<PathBuf>,
    pub findings_path: PathBuf,
    pub run_id: String,
    pub policy: PolicyKind,
    pub route: Option<RouteSelector>,
    pub registry: RegistryOptions,
    pub max_rotations: u32,
    pub coverage_path: Option<PathBuf>,
    pub exceptions_path: Option<PathBuf>,
    pub triage_path: Option<PathBuf>,
    pub health_path: Option<String>,
    pub metrics_path: Option<PathBuf>,
    pub max_iterations: Option<u64>,
    pub rate: Option<f64>,
    pub seed: Option<u64>,
    pub timeouts: TimeoutConfig,
}

impl Settings {
    /// Settings with defaults for everything but the required inputs.
    pub fn new(spec: impl Into<PathBuf>, target: Url, query_log: impl Into<PathBuf>) -> Self {
        Self {
            spec: spec.into(),
            target,
            query_log: query_log.into(),
            corpus: None,
            login: None,
            findings_path: PathBuf::from(DEFAULT_FINDINGS_PATH),
            run_id: uuid::Uuid::new_v4().to_string(),
            policy: PolicyKind::default(),
            route: None,
            registry: RegistryOptions::default(),
            max_rotations: DEFAULT_MAX_ROTATIONS,
            coverage_path: None,
            exceptions_path: None,
            triage_path: None,
            health_path: None,
            metrics_path: None,
            max_iterations: None,
            rate: None,
            seed: None,
            timeouts: TimeoutConfig::default(),
        }
    }

    /// Merge flags over the optional config file.
    pub fn resolve(args: FuzzArgs, findings_path: PathBuf) -> Result<Self, ConfigError> {
        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::merge(args, file, findings_path)
    }

    pub fn merge(args: FuzzArgs, file: FileConfig, findings_path: PathBuf) -> Result<Self, ConfigError> {
        let route = args.route.as_deref().map(str::parse).transpose()?;
        let registry = RegistryOptions {
            blacklist: file
                .blacklist
                .unwrap_or_else(|| DEFAULT_BLACKLIST.iter().map(|s| s.to_string()).collect()),
            history_limit: file.history_limit.unwrap_or(DEFAULT_HISTORY_LIMIT),
        };

        let mut settings = Self::new(args.spec, args.target, args.query_log);
        settings.corpus = args.corpus;
        settings.login = args.login;
        settings.findings_path = findings_path;
        if let Some(run_id) = args.run_id {
            settings.run_id = run_id;
        }
        settings.policy = args.policy.or(file.policy).unwrap_or_default();
        settings.route = route;
        settings.registry = registry;
        settings.max_rotations = file.max_rotations.unwrap_or(DEFAULT_MAX_ROTATIONS);
        settings.coverage_path = args.coverage_path;
        settings.exceptions_path = args.exceptions_path;
        settings.triage_path = args.triage_path;
        settings.health_path = args.health_path;
        settings.metrics_path = args.metrics_path;
        settings.max_iterations = args.max_iterations;
        settings.rate = args.rate;
        settings.seed = args.seed;
        settings.timeouts = TimeoutConfig {
            request_timeout: args.request_timeout,
            poll_interval: args.poll_interval,
            max_attempts: args.max_attempts,
            log_settle: args.log_settle,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.run_id.trim().is_empty() {
            return Err(ConfigError::Invalid("run id must not be empty".to_string()));
        }
        if let Some(rate) = self.rate {
            if !(rate.is_finite() && rate > 0.0) {
                return Err(ConfigError::Invalid(format!("rate must be positive, got {rate}")));
            }
        }
        if self.timeouts.request_timeout.is_zero() {
            return Err(ConfigError::Invalid("request timeout must be non-zero".to_string()));
        }
        if self.timeouts.max_attempts == 0 {
            return Err(ConfigError::Invalid("max attempts must be at least 1".to_string()));
        }
        if let Some(path) = &self.health_path {
            if !path.starts_with('/') {
                return Err(ConfigError::Invalid(format!(
                    "health path must start with '/', got {path:?}"
                )));
            }
        }
        Ok(())
    }
}
