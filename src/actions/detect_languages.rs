//! Detect configured file extensions inside a working copy.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::actions::Action;
use crate::constants::ACTION_DETECT_LANGUAGES;
use crate::domain::{ActionResult, RepoContext};
use crate::fsys::FileSystem;

/// Suffix scan over the working copy, writing the detected set into
/// `RepoContext::detected_extensions` for downstream actions.
#[derive(Debug)]
pub struct DetectLanguagesAction {
    extensions: BTreeSet<String>,
    filesystem: Arc<dyn FileSystem>,
}

impl DetectLanguagesAction {
    /// Build with allowed extensions, with or without leading dot
    /// (e.g. `[".py", "ts", ".java"]`). Input is normalized to lowercase
    /// dot-prefixed form and deduplicated.
    pub fn new<I, S>(extensions: I, filesystem: Arc<dyn FileSystem>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            extensions: normalize_extensions(extensions),
            filesystem,
        }
    }
}

#[async_trait]
impl Action for DetectLanguagesAction {
    fn name(&self) -> &str {
        ACTION_DETECT_LANGUAGES
    }

    async fn execute(&mut self, ctx: &mut RepoContext) -> ActionResult {
        if self.extensions.is_empty() {
            return ActionResult::failed(self.name(), "No extensions configured for language detection");
        }

        let mut detected = BTreeSet::new();
        for path in self.filesystem.list_files_recursive(&ctx.local_path) {
            // Never descend into git bookkeeping.
            if path.components().any(|c| c.as_os_str() == ".git") {
                continue;
            }
            let Some(suffix) = path.extension().and_then(|ext| ext.to_str()) else {
                continue;
            };
            let suffix = format!(".{}", suffix.to_lowercase());
            if self.extensions.contains(&suffix) {
                detected.insert(suffix);
            }
        }

        debug!(
            repo_slug = %ctx.repository.slug,
            count = detected.len(),
            "language detection finished"
        );

        let sorted: Vec<&String> = detected.iter().collect();
        let result = ActionResult::ok(self.name(), format!("Detected {} extensions", detected.len()))
            .with_metadata("extensions", json!(sorted));
        ctx.detected_extensions = detected;
        result
    }
}

fn normalize_extensions<I, S>(extensions: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    extensions
        .into_iter()
        .filter_map(|item| {
            let ext = item.as_ref().trim().to_lowercase();
            if ext.is_empty() {
                return None;
            }
            Some(if ext.starts_with('.') { ext } else { format!(".{ext}") })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    use crate::domain::Repository;
    use crate::fsys::LocalFileSystem;

    fn ctx_for(path: PathBuf) -> RepoContext {
        RepoContext::new(
            "wks",
            Repository {
                name: "Alpha".to_string(),
                slug: "alpha".to_string(),
                clone_url: "git@x:o/alpha.git".to_string(),
            },
            path,
        )
    }

    #[test]
    fn test_normalize_extensions() {
        let normalized = normalize_extensions(["py", ".TS", "  .js ", "", "py"]);
        assert_eq!(
            normalized,
            BTreeSet::from([".py".to_string(), ".ts".to_string(), ".js".to_string()])
        );
    }

    #[tokio::test]
    async fn test_execute_detects_and_skips_git_dir() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("src")).unwrap();
        fs::create_dir_all(tmp.path().join(".git/objects")).unwrap();
        fs::write(tmp.path().join("src/app.PY"), "print()").unwrap();
        fs::write(tmp.path().join("src/index.ts"), "export {}").unwrap();
        fs::write(tmp.path().join("src/notes.md"), "# notes").unwrap();
        fs::write(tmp.path().join(".git/objects/hook.py"), "ignored").unwrap();

        let mut action = DetectLanguagesAction::new([".py", ".ts"], Arc::new(LocalFileSystem));
        let mut ctx = ctx_for(tmp.path().to_path_buf());

        let result = action.execute(&mut ctx).await;
        assert!(result.success);
        assert_eq!(
            ctx.detected_extensions,
            BTreeSet::from([".py".to_string(), ".ts".to_string()])
        );
        assert_eq!(result.metadata["extensions"], serde_json::json!([".py", ".ts"]));
    }

    #[tokio::test]
    async fn test_execute_fails_without_configured_extensions() {
        let tmp = TempDir::new().unwrap();
        let mut action = DetectLanguagesAction::new(Vec::<String>::new(), Arc::new(LocalFileSystem));
        let mut ctx = ctx_for(tmp.path().to_path_buf());

        let result = action.execute(&mut ctx).await;
        assert!(!result.success);
    }
}
