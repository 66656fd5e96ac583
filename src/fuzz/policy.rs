//! Route selection for the fuzz loop.
//!
//! A [`Policy`] hands out the next [`RouteId`] each iteration. The loop
//! tells it whether the previous request reached new source lines so a
//! coverage-guided policy can keep hammering a productive route.

use rand::Rng;
use serde::Deserialize;

use crate::route::RouteId;

/// How the next route is chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyKind {
    /// Each route in turn, wrapping around
    #[default]
    RoundRobin,
    /// Uniformly at random
    Random,
    /// Stay on a route while it keeps reaching new code
    CoverageGuided,
}

impl PolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyKind::RoundRobin => "round-robin",
            PolicyKind::Random => "random",
            PolicyKind::CoverageGuided => "coverage-guided",
        }
    }
}

impl std::fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Route selection state.
#[derive(Debug, Clone)]
pub struct Policy {
    kind: PolicyKind,
    routes: usize,
    cursor: usize,
    current: Option<usize>,
    focus: Option<RouteId>,
}

impl Policy {
    /// Select among `routes` registered routes.
    pub fn new(kind: PolicyKind, routes: usize) -> Self {
        Self {
            kind,
            routes,
            cursor: 0,
            current: None,
            focus: None,
        }
    }

    /// Always pick `route`.
    pub fn focused(route: RouteId) -> Self {
        Self {
            focus: Some(route),
            ..Self::new(PolicyKind::RoundRobin, 1)
        }
    }

    pub fn kind(&self) -> PolicyKind {
        self.kind
    }

    pub fn focus(&self) -> Option<RouteId> {
        self.focus
    }

    /// Next route to fuzz; `None` when there is nothing to pick from.
    ///
    /// `gained` reports whether the previous request reached new code.
    pub fn pick<R: Rng + ?Sized>(&mut self, gained: bool, rng: &mut R) -> Option<RouteId> {
        if let Some(route) = self.focus {
            return Some(route);
        }
        if self.routes == 0 {
            return None;
        }

        let index = match self.kind {
            PolicyKind::Random => rng.random_range(0..self.routes),
            PolicyKind::RoundRobin => self.advance(),
            PolicyKind::CoverageGuided => match self.current {
                Some(current) if gained => current,
                _ => self.advance(),
            },
        };
        self.current = Some(index);
        Some(RouteId(index))
    }

    fn advance(&mut self) -> usize {
        let index = self.cursor;
        self.cursor = (self.cursor + 1) % self.routes;
        index
    }
}
