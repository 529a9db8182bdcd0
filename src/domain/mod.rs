//! Core domain entities shared by the scanner use case and the actions.
//!
//! These types are adapter-agnostic: the CLI, the tests, and any future
//! surface build on the same `Repository`/`RepoContext`/`ActionResult` shapes.

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde_json::{Map, Value};

/// Opaque identifier of a provider workspace scope (non-empty).
pub type WorkspaceId = String;

/// Repository metadata used by orchestration and actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    /// Human-readable repository name
    pub name: String,
    /// Stable slug used for local folder naming (path-safe)
    pub slug: String,
    /// Preferred clone URL (SSH when the provider exposes it)
    pub clone_url: String,
}

/// Mutable per-repository context passed through the action pipeline.
///
/// Actions read upstream state and may insert keys into `metadata` for
/// downstream actions. `local_path` is `<base_dir>/<slug>` and exists on
/// disk before any action executes.
#[derive(Debug)]
pub struct RepoContext {
    pub workspace_id: WorkspaceId,
    pub repository: Repository,
    pub local_path: PathBuf,
    /// Detected file extensions, ordered for deterministic serialization
    pub detected_extensions: BTreeSet<String>,
    /// Generic tagged-scalar bag for cross-action communication
    pub metadata: Map<String, Value>,
}

impl RepoContext {
    pub fn new(workspace_id: impl Into<WorkspaceId>, repository: Repository, local_path: PathBuf) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            repository,
            local_path,
            detected_extensions: BTreeSet::new(),
            metadata: Map::new(),
        }
    }
}

/// Standard result returned by each `Action::execute()` call.
///
/// `action_name` is filled by the pipeline with the action's declared name
/// when the action leaves it blank.
#[derive(Debug, Clone)]
pub struct ActionResult {
    pub action_name: String,
    pub success: bool,
    pub message: String,
    pub metadata: Map<String, Value>,
}

impl ActionResult {
    /// Successful result with a message
    pub fn ok(action_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            action_name: action_name.into(),
            success: true,
            message: message.into(),
            metadata: Map::new(),
        }
    }

    /// Failing result with a message
    pub fn failed(action_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            action_name: action_name.into(),
            success: false,
            message: message.into(),
            metadata: Map::new(),
        }
    }

    /// Attach one metadata entry, consuming and returning the result
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}
