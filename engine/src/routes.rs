//! Route table: ordered pattern→destination bindings with deterministic
//! ambiguity handling.
//!
//! Patterns are regular expressions compiled case-insensitive and
//! multiline-safe. Patterns need not be disjoint; when several match the
//! same path, resolution prefers the unique *direct* match (a pattern with
//! no capture groups beyond the implicit whole match) and otherwise refuses
//! to guess.

use regex::{Regex, RegexBuilder};

use waypoint_types::{DestinationId, NavigationError, RouteParams};

/// A single pattern→destination binding. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct RouteEntry {
    pattern: Regex,
    destination: DestinationId,
}

impl RouteEntry {
    pub fn new(pattern: &str, destination: DestinationId) -> Result<Self, NavigationError> {
        let compiled = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .multi_line(true)
            .build()
            .map_err(|e| NavigationError::InvalidRoutePattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            pattern: compiled,
            destination,
        })
    }

    #[must_use]
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    #[must_use]
    pub fn destination(&self) -> &DestinationId {
        &self.destination
    }

    /// True when the pattern captures nothing beyond the whole match.
    fn is_direct(&self) -> bool {
        self.pattern.captures_len() == 1
    }

    /// Extract named parameters for a path this entry matches. Group 0 is
    /// never emitted.
    fn bind(&self, path: &str) -> RouteParams {
        let mut params = RouteParams::new();
        if let Some(caps) = self.pattern.captures(path) {
            for name in self.pattern.capture_names().flatten() {
                if let Some(matched) = caps.name(name) {
                    params.insert(name, matched.as_str());
                }
            }
        }
        params
    }
}

/// Outcome of resolving a path against the table.
#[derive(Debug)]
pub enum RouteResolution {
    Match {
        destination: DestinationId,
        params: RouteParams,
    },
    NotFound,
    /// Several equally-specific patterns matched; the candidates are
    /// reported for diagnostics.
    Ambiguous { candidates: Vec<String> },
}

impl RouteResolution {
    #[must_use]
    pub fn is_match(&self) -> bool {
        matches!(self, RouteResolution::Match { .. })
    }
}

/// Ordered set of route bindings. The whole table is replaced (not merged)
/// on reload, so readers never observe a partial state.
#[derive(Debug, Default)]
pub struct RouteTable {
    entries: Vec<RouteEntry>,
}

impl RouteTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entire table.
    pub fn load(&mut self, entries: Vec<RouteEntry>) {
        self.entries = entries;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve `path` to a destination and its extracted parameters.
    #[must_use]
    pub fn resolve(&self, path: &str) -> RouteResolution {
        let matches: Vec<&RouteEntry> = self
            .entries
            .iter()
            .filter(|entry| entry.pattern.is_match(path))
            .collect();

        match matches.as_slice() {
            [] => {
                tracing::debug!(path, "no route matched");
                RouteResolution::NotFound
            }
            [only] => RouteResolution::Match {
                destination: only.destination.clone(),
                params: only.bind(path),
            },
            several => {
                // A parameterless pattern is the most specific; a unique one
                // breaks the tie deterministically.
                let direct: Vec<&&RouteEntry> =
                    several.iter().filter(|entry| entry.is_direct()).collect();
                if let [winner] = direct.as_slice() {
                    return RouteResolution::Match {
                        destination: winner.destination.clone(),
                        params: winner.bind(path),
                    };
                }
                let candidates: Vec<String> = several
                    .iter()
                    .map(|entry| entry.pattern().to_string())
                    .collect();
                tracing::warn!(path, ?candidates, "ambiguous route");
                RouteResolution::Ambiguous { candidates }
            }
        }
    }
}
