//! CLI surface: flag parsing with env fallbacks, adapter wiring, exit codes.
//!
//! Exit codes: 0 on full success, 2 on usage/validation errors (clap's
//! default), 1 when the run summary contains any failed repository.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config;
use crate::constants::DEFAULT_BITBUCKET_TIMEOUT_SECONDS;
use crate::error::GitotekoError;
use crate::fsys::LocalFileSystem;
use crate::git::ShellGitClient;
use crate::output;
use crate::provider::{BitbucketAuth, BitbucketCloudProvider, GitProvider};
use crate::scanner::{RepoSelection, ScanOptions, WorkspaceScanner};

/// Hosted Git providers selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProviderKind {
    Bitbucket,
    Github,
    Gitlab,
}

/// Repository selection mode when limiting the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SelectionArg {
    First,
    Random,
}

impl From<SelectionArg> for RepoSelection {
    fn from(value: SelectionArg) -> Self {
        match value {
            SelectionArg::First => RepoSelection::First,
            SelectionArg::Random => RepoSelection::Random,
        }
    }
}

/// Scan a Git workspace and execute a pluggable action pipeline per repository
#[derive(Parser, Debug)]
#[command(name = "gitoteko")]
#[command(author, version = env!("CARGO_PKG_VERSION_FULL"), about, long_about = None)]
pub struct Cli {
    /// Git provider to use
    #[arg(long, env = "GIT_PROVIDER", value_enum)]
    pub provider: ProviderKind,

    /// Workspace identifier to scan
    #[arg(long, env = "GIT_WORKSPACE")]
    pub workspace: String,

    /// Local base directory for repositories
    #[arg(long, env = "BASE_DIR")]
    pub base_dir: String,

    /// Optional single repository slug filter
    #[arg(long, env = "GIT_REPO_SLUG")]
    pub repo_slug: Option<String>,

    /// Optional limit of repositories to process
    #[arg(long, env = "GIT_MAX_REPOS", value_parser = clap::value_parser!(u64).range(1..))]
    pub max_repos: Option<u64>,

    /// Repository selection mode when limiting
    #[arg(long, env = "GIT_REPO_SELECTION", value_enum, default_value = "first")]
    pub repo_selection: SelectionArg,

    /// Random seed used when --repo-selection=random
    #[arg(long, env = "GIT_RANDOM_SEED")]
    pub random_seed: Option<u64>,

    /// Plan the run without touching the filesystem or the network
    #[arg(long)]
    pub dry_run: bool,
}

/// Parse the CLI, wire the adapters, run one workspace scan.
pub async fn run(cancel: CancellationToken) -> Result<ExitCode> {
    let cli = Cli::parse();
    let env = config::snapshot_env();

    let base_dir = PathBuf::from(shellexpand::tilde(&cli.base_dir).into_owned());
    let stop_on_error = match config::env_value(&env, "GIT_STOP_ON_ERROR") {
        Some(raw) => match config::parse_bool(&raw, "GIT_STOP_ON_ERROR") {
            Ok(value) => value,
            Err(config_error) => return usage_error(config_error),
        },
        None => false,
    };

    info!(
        provider = ?cli.provider,
        workspace = %cli.workspace,
        base_dir = %base_dir.display(),
        dry_run = cli.dry_run,
        repo_slug = cli.repo_slug.as_deref(),
        max_repos = cli.max_repos,
        repo_selection = ?cli.repo_selection,
        random_seed = cli.random_seed,
        stop_on_error,
        "cli configuration resolved"
    );

    let provider = match build_provider(cli.provider, &env) {
        Ok(provider) => provider,
        Err(config_error) => return usage_error(config_error),
    };
    let pipeline = match config::build_action_pipeline(&base_dir, &env) {
        Ok(pipeline) => pipeline,
        Err(config_error) => return usage_error(config_error),
    };

    let mut scanner = WorkspaceScanner::new(
        provider,
        Box::new(ShellGitClient::new()),
        Arc::new(LocalFileSystem),
        pipeline,
    );

    let options = ScanOptions {
        dry_run: cli.dry_run,
        only_repo_slug: cli.repo_slug.clone(),
        max_repos: cli.max_repos.map(|value| value as usize),
        repo_selection: cli.repo_selection.into(),
        random_seed: cli.random_seed,
        stop_on_error,
    };

    let summary = match scanner
        .execute(&cli.workspace, &base_dir, &options, &cancel)
        .await
    {
        Ok(summary) => summary,
        Err(fatal) => {
            error!(error = %fatal, "scan execution failed");
            eprintln!("Error: {fatal}");
            return Ok(ExitCode::FAILURE);
        }
    };

    output::print_summary(&summary);
    if summary.has_failures() {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn usage_error(error: GitotekoError) -> Result<ExitCode> {
    eprintln!("Error: {error}");
    Ok(ExitCode::from(2))
}

fn build_provider(
    kind: ProviderKind,
    env: &std::collections::HashMap<String, String>,
) -> crate::error::Result<Box<dyn GitProvider>> {
    match kind {
        ProviderKind::Bitbucket => {
            let auth = BitbucketAuth::from_credentials(
                config::env_value(env, "BITBUCKET_TOKEN"),
                config::env_value(env, "BITBUCKET_USERNAME"),
                config::env_value(env, "BITBUCKET_APP_PASSWORD"),
            );
            let timeout_seconds = match config::env_value(env, "BITBUCKET_TIMEOUT_SECONDS") {
                Some(raw) => config::parse_f64_min(&raw, "BITBUCKET_TIMEOUT_SECONDS", 1.0)?,
                None => DEFAULT_BITBUCKET_TIMEOUT_SECONDS,
            };
            let provider = BitbucketCloudProvider::new(
                config::env_value(env, "BITBUCKET_API_BASE_URL"),
                auth,
                Duration::from_secs_f64(timeout_seconds),
            )?;
            Ok(Box::new(provider))
        }
        ProviderKind::Github | ProviderKind::Gitlab => Err(GitotekoError::config(format!(
            "Provider '{}' is not implemented yet",
            format!("{kind:?}").to_lowercase()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_minimal_flags() {
        let cli = Cli::try_parse_from([
            "gitoteko",
            "--provider",
            "bitbucket",
            "--workspace",
            "wks",
            "--base-dir",
            "/tmp/ws",
        ])
        .unwrap();
        assert_eq!(cli.provider, ProviderKind::Bitbucket);
        assert_eq!(cli.repo_selection, SelectionArg::First);
        assert!(!cli.dry_run);
    }

    #[test]
    fn test_max_repos_must_be_positive() {
        let parsed = Cli::try_parse_from([
            "gitoteko",
            "--provider",
            "bitbucket",
            "--workspace",
            "wks",
            "--base-dir",
            "/tmp/ws",
            "--max-repos",
            "0",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_unimplemented_providers_are_rejected() {
        let env = std::collections::HashMap::new();
        let err = build_provider(ProviderKind::Github, &env).unwrap_err();
        assert!(err.to_string().contains("not implemented"));
        let err = build_provider(ProviderKind::Gitlab, &env).unwrap_err();
        assert!(err.to_string().contains("not implemented"));
    }

    #[test]
    fn test_bitbucket_provider_builds_without_credentials() {
        let env = std::collections::HashMap::new();
        assert!(build_provider(ProviderKind::Bitbucket, &env).is_ok());
    }
}
