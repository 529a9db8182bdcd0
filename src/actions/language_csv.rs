//! Persist detected repository languages into an accumulating CSV report.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::actions::Action;
use crate::constants::{ACTION_WRITE_LANGUAGE_CSV, EXTENSIONS_DELIMITER, LANGUAGE_REPORT_COLUMNS};
use crate::domain::{ActionResult, RepoContext};

/// One report row keyed by (workspace, repo_slug).
#[derive(Debug, Clone, PartialEq, Eq)]
struct ReportRow {
    workspace: String,
    repo_name: String,
    repo_slug: String,
    local_path: String,
    extensions: String,
}

/// Write one language summary row per repository into a configurable CSV.
///
/// Idempotency:
/// - default (`regenerate=false`): skip the write when (workspace, slug)
///   already has a row.
/// - `regenerate=true`: replace the existing row in place.
#[derive(Debug)]
pub struct WriteLanguageCsvAction {
    report_csv_path: PathBuf,
    regenerate: bool,
}

impl WriteLanguageCsvAction {
    pub fn new(report_csv_path: PathBuf, regenerate: bool) -> Self {
        Self {
            report_csv_path,
            regenerate,
        }
    }

    fn serialize_extensions(ctx: &RepoContext) -> String {
        ctx.detected_extensions
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(EXTENSIONS_DELIMITER)
    }

    fn read_rows(path: &Path) -> std::io::Result<Vec<ReportRow>> {
        if !path.exists() {
            return Ok(Vec::new());
        }

        let mut reader = csv::Reader::from_path(path)
            .map_err(|e| std::io::Error::other(format!("failed to open report: {e}")))?;
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| std::io::Error::other(format!("failed to read report row: {e}")))?;
            let field = |index: usize| record.get(index).unwrap_or_default().to_string();
            rows.push(ReportRow {
                workspace: field(0),
                repo_name: field(1),
                repo_slug: field(2),
                local_path: field(3),
                extensions: field(4),
            });
        }
        Ok(rows)
    }

    fn write_rows(path: &Path, rows: &[ReportRow]) -> std::io::Result<()> {
        let mut writer = csv::Writer::from_path(path)
            .map_err(|e| std::io::Error::other(format!("failed to open report for writing: {e}")))?;
        writer
            .write_record(LANGUAGE_REPORT_COLUMNS)
            .map_err(|e| std::io::Error::other(format!("failed to write report header: {e}")))?;
        for row in rows {
            writer
                .write_record([
                    row.workspace.as_str(),
                    row.repo_name.as_str(),
                    row.repo_slug.as_str(),
                    row.local_path.as_str(),
                    row.extensions.as_str(),
                ])
                .map_err(|e| std::io::Error::other(format!("failed to write report row: {e}")))?;
        }
        writer
            .flush()
            .map_err(|e| std::io::Error::other(format!("failed to flush report: {e}")))
    }
}

#[async_trait]
impl Action for WriteLanguageCsvAction {
    fn name(&self) -> &str {
        ACTION_WRITE_LANGUAGE_CSV
    }

    async fn execute(&mut self, ctx: &mut RepoContext) -> ActionResult {
        if let Some(parent) = self.report_csv_path.parent() {
            if let Err(error) = std::fs::create_dir_all(parent) {
                return ActionResult::failed(
                    self.name(),
                    format!("Cannot create report directory {}: {error}", parent.display()),
                );
            }
        }

        let target_row = ReportRow {
            workspace: ctx.workspace_id.clone(),
            repo_name: ctx.repository.name.clone(),
            repo_slug: ctx.repository.slug.clone(),
            local_path: ctx.local_path.to_string_lossy().into_owned(),
            extensions: Self::serialize_extensions(ctx),
        };

        let mut rows = match Self::read_rows(&self.report_csv_path) {
            Ok(rows) => rows,
            Err(error) => {
                return ActionResult::failed(
                    self.name(),
                    format!("Cannot read report {}: {error}", self.report_csv_path.display()),
                );
            }
        };

        let existing_index = rows
            .iter()
            .position(|row| row.workspace == target_row.workspace && row.repo_slug == target_row.repo_slug);

        if existing_index.is_some() && !self.regenerate {
            debug!(csv_path = %self.report_csv_path.display(), "CSV row already exists, skipped");
            return ActionResult::ok(self.name(), "CSV row already exists, skipped")
                .with_metadata("csv_path", json!(self.report_csv_path.to_string_lossy()))
                .with_metadata("row_written", json!(false))
                .with_metadata("regenerate", json!(false));
        }

        match existing_index {
            Some(index) => rows[index] = target_row,
            None => rows.push(target_row),
        }

        if let Err(error) = Self::write_rows(&self.report_csv_path, &rows) {
            return ActionResult::failed(
                self.name(),
                format!("Cannot write report {}: {error}", self.report_csv_path.display()),
            );
        }

        ActionResult::ok(self.name(), "CSV row written")
            .with_metadata("csv_path", json!(self.report_csv_path.to_string_lossy()))
            .with_metadata("row_written", json!(true))
            .with_metadata("regenerate", json!(self.regenerate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    use crate::domain::Repository;

    fn ctx_with_extensions(slug: &str, extensions: &[&str]) -> RepoContext {
        let mut ctx = RepoContext::new(
            "wks",
            Repository {
                name: slug.to_uppercase(),
                slug: slug.to_string(),
                clone_url: format!("git@x:o/{slug}.git"),
            },
            PathBuf::from(format!("/tmp/ws/{slug}")),
        );
        ctx.detected_extensions = extensions.iter().map(|e| e.to_string()).collect::<BTreeSet<_>>();
        ctx
    }

    #[tokio::test]
    async fn test_appends_rows_for_distinct_repositories() {
        let tmp = TempDir::new().unwrap();
        let csv_path = tmp.path().join("report/languages.csv");
        let mut action = WriteLanguageCsvAction::new(csv_path.clone(), false);

        action.execute(&mut ctx_with_extensions("alpha", &[".py"])).await;
        action.execute(&mut ctx_with_extensions("beta", &[".ts", ".js"])).await;

        let content = std::fs::read_to_string(&csv_path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "workspace,repo_name,repo_slug,local_path,extensions");
        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains("alpha"));
        assert!(lines[2].contains(".js;.ts"));
    }

    #[tokio::test]
    async fn test_idempotent_skip_without_regenerate() {
        let tmp = TempDir::new().unwrap();
        let csv_path = tmp.path().join("languages.csv");
        let mut action = WriteLanguageCsvAction::new(csv_path.clone(), false);

        let first = action.execute(&mut ctx_with_extensions("alpha", &[".py"])).await;
        assert_eq!(first.metadata["row_written"], json!(true));
        let bytes_after_first = std::fs::read(&csv_path).unwrap();

        // Second run with different detections but regenerate off: untouched.
        let second = action.execute(&mut ctx_with_extensions("alpha", &[".java"])).await;
        assert!(second.success);
        assert_eq!(second.metadata["row_written"], json!(false));
        assert_eq!(std::fs::read(&csv_path).unwrap(), bytes_after_first);
    }

    #[tokio::test]
    async fn test_regenerate_upserts_single_row() {
        let tmp = TempDir::new().unwrap();
        let csv_path = tmp.path().join("languages.csv");

        let mut action = WriteLanguageCsvAction::new(csv_path.clone(), true);
        action.execute(&mut ctx_with_extensions("alpha", &[".py"])).await;
        action.execute(&mut ctx_with_extensions("alpha", &[".java", ".ts"])).await;

        let content = std::fs::read_to_string(&csv_path).unwrap();
        let alpha_rows: Vec<&str> = content.lines().filter(|l| l.contains("alpha")).collect();
        assert_eq!(alpha_rows.len(), 1);
        assert!(alpha_rows[0].contains(".java;.ts"));
    }
}
