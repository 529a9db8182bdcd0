//! Generate `sonar-project.properties` from detected languages.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::json;

use crate::actions::Action;
use crate::constants::{ACTION_GENERATE_SONAR_PROPERTIES, SONAR_PROPERTIES_FILENAME};
use crate::domain::{ActionResult, RepoContext};

/// Emit the Sonar project descriptor at the working-copy root.
///
/// Language priority when multiple extensions are detected:
/// Java (`.java`) > TypeScript (`.ts`) > JavaScript (`.js`) > Python (`.py`)
/// > generic.
#[derive(Debug)]
pub struct GenerateSonarPropertiesAction {
    overwrite: bool,
    java_binaries_path: String,
}

impl GenerateSonarPropertiesAction {
    pub fn new(overwrite: bool, java_binaries_path: impl Into<String>) -> Self {
        Self {
            overwrite,
            java_binaries_path: java_binaries_path.into(),
        }
    }

    fn build_content(&self, ctx: &RepoContext, language: &str) -> String {
        let project_key = sanitize_project_key(&format!("{}_{}", ctx.workspace_id, ctx.repository.slug));
        let mut lines = vec![
            format!("sonar.projectKey={project_key}"),
            format!("sonar.projectName={}", ctx.repository.name),
            "sonar.sources=.".to_string(),
            "sonar.sourceEncoding=UTF-8".to_string(),
        ];
        if language == "java" {
            lines.push(format!("sonar.java.binaries={}", self.java_binaries_path));
        }
        lines.join("\n") + "\n"
    }
}

#[async_trait]
impl Action for GenerateSonarPropertiesAction {
    fn name(&self) -> &str {
        ACTION_GENERATE_SONAR_PROPERTIES
    }

    async fn execute(&mut self, ctx: &mut RepoContext) -> ActionResult {
        let target_path = ctx.local_path.join(SONAR_PROPERTIES_FILENAME);

        if target_path.exists() && !self.overwrite {
            return ActionResult::ok(self.name(), "sonar-project.properties already exists, skipped")
                .with_metadata("path", json!(target_path.to_string_lossy()))
                .with_metadata("written", json!(false))
                .with_metadata("reason", json!("exists"));
        }

        let language = select_language(&ctx.detected_extensions);
        let content = self.build_content(ctx, language);
        if let Err(error) = std::fs::write(&target_path, content) {
            return ActionResult::failed(
                self.name(),
                format!("Cannot write {}: {error}", target_path.display()),
            );
        }

        ActionResult::ok(self.name(), "sonar-project.properties written")
            .with_metadata("path", json!(target_path.to_string_lossy()))
            .with_metadata("written", json!(true))
            .with_metadata("language_template", json!(language))
    }
}

fn select_language(extensions: &BTreeSet<String>) -> &'static str {
    if extensions.contains(".java") {
        "java"
    } else if extensions.contains(".ts") {
        "typescript"
    } else if extensions.contains(".js") {
        "javascript"
    } else if extensions.contains(".py") {
        "python"
    } else {
        "generic"
    }
}

/// Keep `[A-Za-z0-9_\-.:]`, replace everything else with `_`.
pub fn sanitize_project_key(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use crate::domain::Repository;

    fn ctx_for(tmp: &TempDir, extensions: &[&str]) -> RepoContext {
        let mut ctx = RepoContext::new(
            "wks",
            Repository {
                name: "Alpha Service".to_string(),
                slug: "alpha".to_string(),
                clone_url: "git@x:o/alpha.git".to_string(),
            },
            tmp.path().to_path_buf(),
        );
        ctx.detected_extensions = extensions.iter().map(|e| e.to_string()).collect();
        ctx
    }

    #[test]
    fn test_language_priority() {
        let set = |items: &[&str]| items.iter().map(|e| e.to_string()).collect::<BTreeSet<_>>();
        assert_eq!(select_language(&set(&[".py", ".ts", ".java"])), "java");
        assert_eq!(select_language(&set(&[".py", ".ts"])), "typescript");
        assert_eq!(select_language(&set(&[".js", ".py"])), "javascript");
        assert_eq!(select_language(&set(&[".py"])), "python");
        assert_eq!(select_language(&set(&[".go"])), "generic");
    }

    #[test]
    fn test_sanitize_project_key() {
        assert_eq!(sanitize_project_key("wks_alpha"), "wks_alpha");
        assert_eq!(sanitize_project_key("my team/repo#1"), "my_team_repo_1");
        assert_eq!(sanitize_project_key("a.b:c-d_e"), "a.b:c-d_e");
    }

    #[tokio::test]
    async fn test_writes_java_template_with_trailing_newline() {
        let tmp = TempDir::new().unwrap();
        let mut action = GenerateSonarPropertiesAction::new(false, "build/classes");
        let mut ctx = ctx_for(&tmp, &[".java", ".py"]);

        let result = action.execute(&mut ctx).await;
        assert!(result.success);

        let content = std::fs::read_to_string(tmp.path().join(SONAR_PROPERTIES_FILENAME)).unwrap();
        assert_eq!(
            content,
            "sonar.projectKey=wks_alpha\n\
             sonar.projectName=Alpha Service\n\
             sonar.sources=.\n\
             sonar.sourceEncoding=UTF-8\n\
             sonar.java.binaries=build/classes\n"
        );
    }

    #[tokio::test]
    async fn test_skips_existing_file_without_overwrite() {
        let tmp = TempDir::new().unwrap();
        let existing = tmp.path().join(SONAR_PROPERTIES_FILENAME);
        std::fs::write(&existing, "sonar.projectKey=handmade\n").unwrap();

        let mut action = GenerateSonarPropertiesAction::new(false, "target/classes");
        let mut ctx = ctx_for(&tmp, &[".py"]);

        let result = action.execute(&mut ctx).await;
        assert!(result.success);
        assert_eq!(result.metadata["written"], json!(false));
        assert_eq!(std::fs::read_to_string(&existing).unwrap(), "sonar.projectKey=handmade\n");
    }

    #[tokio::test]
    async fn test_overwrite_replaces_existing_file() {
        let tmp = TempDir::new().unwrap();
        let existing = tmp.path().join(SONAR_PROPERTIES_FILENAME);
        std::fs::write(&existing, "stale").unwrap();

        let mut action = GenerateSonarPropertiesAction::new(true, "target/classes");
        let mut ctx = ctx_for(&tmp, &[]);

        let result = action.execute(&mut ctx).await;
        assert!(result.success);
        assert_eq!(result.metadata["language_template"], json!("generic"));
        assert!(std::fs::read_to_string(&existing).unwrap().starts_with("sonar.projectKey=wks_alpha"));
    }
}
