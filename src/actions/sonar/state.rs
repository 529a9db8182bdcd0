//! Per-working-copy record of the last successful analysis.
//!
//! The file lives inside the repository (default under `.git/`) and is keyed
//! by `<sonar_url>|<project_key>|<branch or 'default'>`. A missing or corrupt
//! file is treated as empty; write failures are logged and swallowed so the
//! scan result still reaches the caller.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// One recorded analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStateEntry {
    pub revision: String,
    pub status: String,
    #[serde(default)]
    pub analysis_url: Option<String>,
    #[serde(default)]
    pub ce_task_id: Option<String>,
    #[serde(default)]
    pub updated_at_epoch: i64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ScanState {
    #[serde(default)]
    pub scans: BTreeMap<String, ScanStateEntry>,
}

/// State key for one `(server, project, branch)` combination.
pub fn state_key(sonar_url: &str, project_key: &str, branch: Option<&str>) -> String {
    format!("{sonar_url}|{project_key}|{}", branch.unwrap_or("default"))
}

/// Load the whole state, treating missing or corrupt files as empty.
pub fn load_state(path: &Path) -> ScanState {
    let Ok(payload) = std::fs::read_to_string(path) else {
        return ScanState::default();
    };
    match serde_json::from_str(&payload) {
        Ok(state) => state,
        Err(error) => {
            debug!(path = %path.display(), %error, "ignoring unreadable scan state");
            ScanState::default()
        }
    }
}

/// Load one entry by key.
pub fn load_entry(path: &Path, key: &str) -> Option<ScanStateEntry> {
    load_state(path).scans.remove(key)
}

/// Read–merge–rewrite one entry. Failures are non-fatal.
pub fn record_entry(path: &Path, key: &str, entry: ScanStateEntry) {
    let mut state = load_state(path);
    state.scans.insert(key.to_string(), entry);

    if let Some(parent) = path.parent() {
        if let Err(error) = std::fs::create_dir_all(parent) {
            warn!(path = %path.display(), %error, "cannot create scan state directory");
            return;
        }
    }

    let payload = match serde_json::to_string_pretty(&state) {
        Ok(payload) => payload,
        Err(error) => {
            warn!(path = %path.display(), %error, "cannot serialize scan state");
            return;
        }
    };
    if let Err(error) = std::fs::write(path, payload) {
        warn!(path = %path.display(), %error, "cannot write scan state");
    }
}
