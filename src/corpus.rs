//! Seed corpus translation.
//!
//! A recording is translated entry by entry, in recording order. Entries
//! that cannot be parsed or have no matching route are skipped and reported;
//! translation itself never fails once the recording has been loaded.

use tracing::{debug, info};

use crate::error::ItemError;
use crate::har::{CapturedRequest, Har};
use crate::route::{RouteId, RouteRegistry};

/// A recorded request bound to its route.
#[derive(Debug, Clone, PartialEq)]
pub struct CorpusEntry {
    pub route: RouteId,
    pub request: CapturedRequest,
}

/// Translation result: matched entries in recording order plus the skips.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    entries: Vec<CorpusEntry>,
    skipped: Vec<ItemError>,
}

impl Corpus {
    pub fn entries(&self) -> &[CorpusEntry] {
        &self.entries
    }

    /// Entries that were not translated, with the reason.
    pub fn skipped(&self) -> &[ItemError] {
        &self.skipped
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Bind every recorded request to its route.
pub fn translate(registry: &RouteRegistry, har: &Har) -> Corpus {
    let mut corpus = Corpus::default();

    for item in har.requests() {
        let request = match item {
            Ok(r) => r,
            Err(e) => {
                info!(error = %e, "Skipping corpus entry");
                corpus.skipped.push(e);
                continue;
            }
        };

        match registry.find(request.path(), &request.method) {
            Some(route) => {
                debug!(index = request.index, route = %route, "Corpus entry matched");
                corpus.entries.push(CorpusEntry {
                    route: route.id(),
                    request,
                });
            }
            None => {
                let e = ItemError::Unmatched {
                    index: request.index,
                    method: request.method.to_string(),
                    path: request.path().to_string(),
                };
                info!(error = %e, "Skipping corpus entry");
                corpus.skipped.push(e);
            }
        }
    }

    info!(
        matched = corpus.entries.len(),
        skipped = corpus.skipped.len(),
        "Corpus translated"
    );
    corpus
}
