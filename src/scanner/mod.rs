//! Workspace scan orchestration: list repositories, sync each working copy,
//! run the action pipeline, aggregate a run summary.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::actions::ActionPipeline;
use crate::domain::{ActionResult, RepoContext, Repository, WorkspaceId};
use crate::error::Result;
use crate::fsys::FileSystem;
use crate::git::GitClient;
use crate::provider::GitProvider;

/// Sync operation planned or executed for one repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOperation {
    Clone,
    Pull,
}

impl SyncOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clone => "clone",
            Self::Pull => "pull",
        }
    }
}

/// How to pick repositories when `max_repos` limits the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepoSelection {
    /// Keep the first N in provider order
    #[default]
    First,
    /// Seeded Fisher–Yates sample
    Random,
}

impl RepoSelection {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "first" => Some(Self::First),
            "random" => Some(Self::Random),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::First => "first",
            Self::Random => "random",
        }
    }
}

/// Options of one scanner run.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub dry_run: bool,
    pub only_repo_slug: Option<String>,
    pub max_repos: Option<usize>,
    pub repo_selection: RepoSelection,
    pub random_seed: Option<u64>,
    pub stop_on_error: bool,
}

/// Per-repository execution snapshot.
#[derive(Debug, Clone)]
pub struct RepositoryExecutionSummary {
    pub repo_slug: String,
    pub local_path: PathBuf,
    pub sync_operation: SyncOperation,
    pub dry_run: bool,
    pub planned_actions: Vec<String>,
    pub action_results: Vec<ActionResult>,
    pub success: bool,
    pub error: Option<String>,
}

/// Workspace-level execution summary for one scanner run.
#[derive(Debug, Clone)]
pub struct ScanExecutionSummary {
    pub workspace: WorkspaceId,
    pub base_dir: PathBuf,
    pub dry_run: bool,
    pub repositories: Vec<RepositoryExecutionSummary>,
    pub failed_repositories: usize,
    pub successful_repositories: usize,
}

impl ScanExecutionSummary {
    pub fn has_failures(&self) -> bool {
        self.failed_repositories > 0
    }
}

/// Core orchestration use case.
///
/// Responsibilities:
/// - list repositories from the provider
/// - determine and run the clone/pull operation per repository
/// - build a `RepoContext` and run the action pipeline
/// - support dry-run planning with no side effects
pub struct WorkspaceScanner {
    provider: Box<dyn GitProvider>,
    git: Box<dyn GitClient>,
    filesystem: Arc<dyn FileSystem>,
    pipeline: ActionPipeline,
}

impl WorkspaceScanner {
    pub fn new(
        provider: Box<dyn GitProvider>,
        git: Box<dyn GitClient>,
        filesystem: Arc<dyn FileSystem>,
        pipeline: ActionPipeline,
    ) -> Self {
        Self {
            provider,
            git,
            filesystem,
            pipeline,
        }
    }

    /// Execute one workspace scan/sync run.
    pub async fn execute(
        &mut self,
        workspace: &str,
        base_dir: &Path,
        options: &ScanOptions,
        cancel: &CancellationToken,
    ) -> Result<ScanExecutionSummary> {
        let mut repositories = self.provider.list_repositories(workspace).await?;
        info!(workspace, count = repositories.len(), "repositories listed");

        if let Some(slug) = &options.only_repo_slug {
            repositories.retain(|repository| &repository.slug == slug);
            info!(workspace, repo_slug = %slug, count = repositories.len(), "repository slug filter applied");
        }

        if options.max_repos.is_some_and(|max| repositories.len() > max) {
            repositories = apply_repo_limit(repositories, options);
            info!(
                workspace,
                max_repos = options.max_repos,
                selection = options.repo_selection.as_str(),
                random_seed = options.random_seed,
                count = repositories.len(),
                "repository limit applied"
            );
        }

        let planned_actions = self.pipeline.action_names();
        let mut summaries: Vec<RepositoryExecutionSummary> = Vec::with_capacity(repositories.len());

        if !options.dry_run {
            self.filesystem.ensure_directory(base_dir)?;
            info!(base_dir = %base_dir.display(), "base directory ensured");
        }

        for repository in &repositories {
            if cancel.is_cancelled() {
                warn!(workspace, "cancellation requested; stopping at repository boundary");
                break;
            }

            let local_path = base_dir.join(&repository.slug);
            let already_exists = self.filesystem.path_exists(&local_path);
            let sync_operation = if already_exists {
                SyncOperation::Pull
            } else {
                SyncOperation::Clone
            };

            info!(
                workspace,
                repo_slug = %repository.slug,
                local_path = %local_path.display(),
                sync_operation = sync_operation.as_str(),
                dry_run = options.dry_run,
                "repository processing started"
            );

            if options.dry_run {
                summaries.push(RepositoryExecutionSummary {
                    repo_slug: repository.slug.clone(),
                    local_path,
                    sync_operation,
                    dry_run: true,
                    planned_actions: planned_actions.clone(),
                    action_results: Vec::new(),
                    success: true,
                    error: None,
                });
                continue;
            }

            let sync_result = match sync_operation {
                SyncOperation::Pull => self.git.pull(&local_path).await,
                SyncOperation::Clone => {
                    let clone_url = self.provider.clone_url(repository);
                    self.git.clone_repo(&clone_url, &local_path).await
                }
            };

            match sync_result {
                Ok(()) => {
                    let mut ctx =
                        RepoContext::new(workspace, repository.clone(), local_path.clone());
                    let action_results = self.pipeline.run(&mut ctx, false).await;

                    let failed_actions: Vec<&str> = action_results
                        .iter()
                        .filter(|result| !result.success)
                        .map(|result| result.action_name.as_str())
                        .collect();
                    let repo_success = failed_actions.is_empty();
                    let repo_error = (!repo_success)
                        .then(|| format!("One or more actions failed: {}", failed_actions.join(", ")));

                    info!(
                        repo_slug = %repository.slug,
                        action_count = action_results.len(),
                        success = repo_success,
                        "repository actions completed"
                    );

                    summaries.push(RepositoryExecutionSummary {
                        repo_slug: repository.slug.clone(),
                        local_path,
                        sync_operation,
                        dry_run: false,
                        planned_actions: planned_actions.clone(),
                        action_results,
                        success: repo_success,
                        error: repo_error,
                    });

                    if !repo_success && options.stop_on_error {
                        error!(repo_slug = %repository.slug, "repository failed and stop_on_error is enabled");
                        break;
                    }
                }
                Err(sync_error) => {
                    let error_message = sync_error.to_string();
                    error!(repo_slug = %repository.slug, error = %error_message, "repository processing failed");
                    summaries.push(RepositoryExecutionSummary {
                        repo_slug: repository.slug.clone(),
                        local_path,
                        sync_operation,
                        dry_run: false,
                        planned_actions: planned_actions.clone(),
                        action_results: Vec::new(),
                        success: false,
                        error: Some(error_message),
                    });
                    if options.stop_on_error {
                        error!(repo_slug = %repository.slug, "stop_on_error triggered after repository failure");
                        break;
                    }
                }
            }
        }

        let failed_repositories = summaries.iter().filter(|summary| !summary.success).count();
        let successful_repositories = summaries.len() - failed_repositories;

        let summary = ScanExecutionSummary {
            workspace: workspace.to_string(),
            base_dir: base_dir.to_path_buf(),
            dry_run: options.dry_run,
            repositories: summaries,
            failed_repositories,
            successful_repositories,
        };

        info!(
            workspace,
            dry_run = options.dry_run,
            repo_count = summary.repositories.len(),
            successful_repositories,
            failed_repositories,
            "scanner execution completed"
        );

        Ok(summary)
    }
}

/// Apply the `max_repos` limit: provider-order prefix, or a seeded
/// Fisher–Yates sample (identical seed, identical subset and order).
fn apply_repo_limit(mut repositories: Vec<Repository>, options: &ScanOptions) -> Vec<Repository> {
    let Some(max_repos) = options.max_repos else {
        return repositories;
    };
    if repositories.len() <= max_repos {
        return repositories;
    }
    match options.repo_selection {
        RepoSelection::Random => {
            let mut rng = match options.random_seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            repositories.shuffle(&mut rng);
            repositories.truncate(max_repos);
        }
        RepoSelection::First => repositories.truncate(max_repos),
    }
    repositories
}
