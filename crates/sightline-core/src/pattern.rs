//! Case-insensitive glob patterns for module and event-type filters.

use globset::{GlobBuilder, GlobMatcher};
use thiserror::Error;

/// A pattern failed to compile.
#[derive(Debug, Error)]
#[error("invalid pattern '{pattern}': {source}")]
pub struct PatternError {
    /// The offending pattern.
    pub pattern: String,
    /// Underlying glob error.
    #[source]
    pub source: globset::Error,
}

/// Compiled `*` / `?` glob matched against whole names, ignoring case.
#[derive(Clone, Debug)]
pub struct Pattern {
    raw: String,
    matcher: GlobMatcher,
}

impl Pattern {
    /// Compile `raw`. An empty pattern behaves like `*`.
    pub fn new(raw: &str) -> Result<Self, PatternError> {
        let effective = if raw.trim().is_empty() { "*" } else { raw };
        let matcher = GlobBuilder::new(effective)
            .case_insensitive(true)
            .literal_separator(false)
            .build()
            .map_err(|source| PatternError { pattern: raw.to_string(), source })?
            .compile_matcher();
        Ok(Self { raw: raw.to_string(), matcher })
    }

    /// Whether `name` matches.
    pub fn matches(&self, name: &str) -> bool {
        self.matcher.is_match(name)
    }

    /// The pattern as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn star_matches_everything() {
        let p = Pattern::new("*").unwrap();
        assert!(p.matches("Planner"));
        assert!(p.matches(""));
        assert!(p.matches("cognition/planner.v2"));
    }

    #[test]
    fn exact_name_ignores_case() {
        let p = Pattern::new("Planner").unwrap();
        assert!(p.matches("planner"));
        assert!(p.matches("PLANNER"));
        assert!(!p.matches("Planner2"));
        assert!(!p.matches("MetaPlanner"));
    }

    #[test]
    fn wildcards() {
        let p = Pattern::new("tool_*").unwrap();
        assert!(p.matches("tool_call"));
        assert!(!p.matches("decision"));
        let q = Pattern::new("data_???").unwrap();
        assert!(q.matches("data_out"));
        assert!(!q.matches("data_in"));
    }

    #[test]
    fn empty_pattern_matches_anything() {
        let p = Pattern::new("").unwrap();
        assert!(p.matches("anything"));
        assert_eq!(p.as_str(), "");
    }

    #[test]
    fn invalid_pattern_errors() {
        let err = Pattern::new("[unclosed").unwrap_err();
        assert_eq!(err.pattern, "[unclosed");
    }

    proptest! {
        #[test]
        fn literal_names_match_themselves(name in "[A-Za-z][A-Za-z0-9_.]{0,20}") {
            let p = Pattern::new(&name).unwrap();
            prop_assert!(p.matches(&name));
            prop_assert!(p.matches(&name.to_uppercase()));
        }
    }
}
