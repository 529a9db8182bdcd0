//! Human-readable run summary printed to stdout.

use colored::Colorize;

use crate::scanner::ScanExecutionSummary;

/// Print the end-of-run report, one block per repository.
pub fn print_summary(summary: &ScanExecutionSummary) {
    let mode = if summary.dry_run { "DRY-RUN" } else { "RUN" };
    println!("[{mode}] Workspace: {}", summary.workspace);
    println!("Base directory: {}", summary.base_dir.display());
    println!("Repositories discovered: {}", summary.repositories.len());
    println!(
        "Successful repositories: {}",
        summary.successful_repositories.to_string().green()
    );
    let failed = summary.failed_repositories.to_string();
    println!(
        "Failed repositories: {}",
        if summary.failed_repositories > 0 { failed.red() } else { failed.normal() }
    );

    for repository in &summary.repositories {
        let status = if repository.success { "ok".green() } else { "failed".red() };
        println!(
            "- {}: {} -> {} [{}]",
            repository.repo_slug,
            repository.sync_operation.as_str(),
            repository.local_path.display(),
            status
        );
        let actions = if repository.planned_actions.is_empty() {
            "(no actions configured)".to_string()
        } else {
            repository.planned_actions.join(", ")
        };
        println!("  planned actions: {actions}");
        if let Some(error) = &repository.error {
            println!("  error: {error}");
        }
    }
}
