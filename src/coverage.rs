//! Source coverage feedback.
//!
//! An instrumented target rewrites a JSON file after every request mapping
//! each source file to per-line hit counts, with `null` for lines that can
//! never run. [`Coverage`] folds each snapshot into a cumulative map and
//! reports how much new code the latest request reached.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::CoverageError;

/// Per-line hit counts; `None` marks an unreachable line.
pub type LineCounts = Vec<Option<u64>>;

/// Cumulative coverage state.
#[derive(Debug, Clone, Default)]
pub struct Coverage {
    path: PathBuf,
    map: BTreeMap<String, LineCounts>,
    /// Percentage of runnable lines first covered by the latest snapshot
    pub delta: f64,
    /// Percentage of runnable lines covered so far
    pub cumulative: f64,
}

impl Coverage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the latest snapshot and fold it in.
    pub async fn update(&mut self) -> Result<(), CoverageError> {
        let data = tokio::fs::read(&self.path)
            .await
            .map_err(|source| CoverageError::Io {
                path: self.path.clone(),
                source,
            })?;
        let snapshot: BTreeMap<String, LineCounts> =
            serde_json::from_slice(&data).map_err(|source| CoverageError::Json {
                path: self.path.clone(),
                source,
            })?;
        self.merge(snapshot);
        debug!(delta = self.delta, cumulative = self.cumulative, "Coverage updated");
        Ok(())
    }

    /// Fold a snapshot into the cumulative map and recompute percentages.
    pub fn merge(&mut self, snapshot: BTreeMap<String, LineCounts>) {
        let mut newly_covered = 0u64;

        for (file, lines) in snapshot {
            let known = self.map.entry(file).or_default();
            if known.len() < lines.len() {
                known.resize(lines.len(), None);
            }
            for (slot, line) in known.iter_mut().zip(lines) {
                let Some(hits) = line else { continue };
                let before = slot.unwrap_or(0);
                if before == 0 && hits > 0 {
                    newly_covered += 1;
                }
                *slot = Some(before.saturating_add(hits));
            }
        }

        let (runnable, covered) = self.totals();
        self.delta = percent(newly_covered, runnable);
        self.cumulative = percent(covered, runnable);
    }

    /// `(runnable, covered)` line totals.
    pub fn totals(&self) -> (u64, u64) {
        self.map
            .values()
            .flatten()
            .flatten()
            .fold((0, 0), |(runnable, covered), hits| {
                (runnable + 1, covered + u64::from(*hits > 0))
            })
    }

    /// Whether the latest snapshot reached anything new.
    pub fn gained(&self) -> bool {
        self.delta > 0.0
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}
