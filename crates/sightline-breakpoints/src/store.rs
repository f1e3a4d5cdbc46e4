//! JSON file persistence for the breakpoint set.
//!
//! The whole set is rewritten on every change: serialised to a sibling
//! temporary file, then renamed over the target.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::breakpoint::Breakpoint;
use crate::errors::{BreakpointError, Result};

const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct StoredSet {
    version: u32,
    saved_at: chrono::DateTime<chrono::Utc>,
    breakpoints: Vec<Breakpoint>,
}

/// Reads and writes the breakpoint file.
#[derive(Clone, Debug)]
pub struct BreakpointStore {
    path: PathBuf,
}

impl BreakpointStore {
    /// Store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the saved set. A missing file is an empty set.
    pub fn load(&self) -> Result<Vec<Breakpoint>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let stored: StoredSet = serde_json::from_str(&raw).map_err(|e| {
            BreakpointError::Persistence(format!("{}: {e}", self.path.display()))
        })?;
        if stored.version > FORMAT_VERSION {
            return Err(BreakpointError::Persistence(format!(
                "{}: unsupported format version {}",
                self.path.display(),
                stored.version
            )));
        }
        Ok(stored.breakpoints)
    }

    /// Replace the saved set.
    pub fn save(&self, breakpoints: &[Breakpoint]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let stored = StoredSet {
            version: FORMAT_VERSION,
            saved_at: chrono::Utc::now(),
            breakpoints: breakpoints.to_vec(),
        };
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&stored)?)?;
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), count = breakpoints.len(), "breakpoints saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breakpoint::BreakpointStatus;
    use assert_matches::assert_matches;
    use chrono::Utc;
    use sightline_core::BreakpointId;

    fn bp(name: &str) -> Breakpoint {
        Breakpoint {
            id: BreakpointId::new(),
            name: name.into(),
            description: "d".into(),
            module_pattern: "Planner".into(),
            event_type_pattern: "decision".into(),
            condition: "severity == \"error\"".into(),
            status: BreakpointStatus::Active,
            created_by: "ops".into(),
            created_at: Utc::now(),
            hit_count: 4,
            max_hits: Some(10),
            expires_at: Some(Utc::now()),
            enabled: true,
        }
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = BreakpointStore::new(dir.path().join("none.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn save_then_load_is_identical() {
        let dir = tempfile::tempdir().unwrap();
        let store = BreakpointStore::new(dir.path().join("config").join("breakpoints.json"));
        let set = vec![bp("a"), bp("b")];
        store.save(&set).unwrap();
        assert_eq!(store.load().unwrap(), set);
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn corrupt_file_is_a_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("breakpoints.json");
        fs::write(&path, "{ not json").unwrap();
        assert_matches!(BreakpointStore::new(path).load(), Err(BreakpointError::Persistence(_)));
    }

    #[test]
    fn newer_format_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("breakpoints.json");
        fs::write(&path, r#"{"version": 99, "saved_at": "2026-01-01T00:00:00Z", "breakpoints": []}"#).unwrap();
        assert_matches!(BreakpointStore::new(path).load(), Err(BreakpointError::Persistence(_)));
    }
}
