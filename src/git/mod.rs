//! Shell git client: clone-if-missing and fetch-and-fast-forward pull.
//!
//! All git invocations capture stdout+stderr and run under a bounded
//! timeout. A non-zero exit from a required command becomes a structured
//! `GitCommand` error carrying the full command line, working directory,
//! exit code, and the first non-empty output stream.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{error, info, warn};

use crate::constants::DEFAULT_GIT_TIMEOUT_SECONDS;
use crate::error::{GitotekoError, Result};

/// Local git operations used by orchestration (clone/pull).
#[async_trait]
pub trait GitClient: Send + Sync {
    /// Clone remote repository into local path. No-op when the path exists.
    async fn clone_repo(&self, clone_url: &str, local_path: &Path) -> Result<()>;

    /// Update an existing local repository to the remote primary branch.
    async fn pull(&self, local_path: &Path) -> Result<()>;
}

/// Captured output of one git invocation.
#[derive(Debug)]
pub struct GitCommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl GitCommandOutput {
    fn succeeded(&self) -> bool {
        self.exit_code == 0
    }

    fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// First non-empty stream, else a placeholder.
    fn details(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        "No command output".to_string()
    }
}

/// Git client shelling out to an external `git` executable.
pub struct ShellGitClient {
    git_executable: String,
    timeout: Duration,
}

impl Default for ShellGitClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellGitClient {
    pub fn new() -> Self {
        Self::with_options("git", Duration::from_secs_f64(DEFAULT_GIT_TIMEOUT_SECONDS))
    }

    pub fn with_options(git_executable: impl Into<String>, timeout: Duration) -> Self {
        Self {
            git_executable: git_executable.into(),
            timeout,
        }
    }

    /// Run git and capture output; a non-zero exit is reported in the
    /// returned value, not as an error.
    async fn run_git(&self, args: &[&str], cwd: &Path) -> Result<GitCommandOutput> {
        run_captured(&self.git_executable, args, cwd, self.timeout).await
    }

    /// Run git and fail on non-zero exit with a structured error.
    async fn run_git_checked(&self, args: &[&str], cwd: &Path) -> Result<GitCommandOutput> {
        let output = self.run_git(args, cwd).await?;
        if output.succeeded() {
            return Ok(output);
        }

        let command = render_command(&self.git_executable, args);
        let details = output.details();
        error!(
            command = %command,
            cwd = %cwd.display(),
            exit_code = output.exit_code,
            details = %details,
            "git command failed"
        );
        Err(GitotekoError::GitCommand {
            command,
            cwd: cwd.to_path_buf(),
            exit_code: output.exit_code,
            details,
        })
    }

    async fn has_upstream(&self, cwd: &Path) -> Result<bool> {
        let output = self
            .run_git(&["rev-parse", "--abbrev-ref", "--symbolic-full-name", "@{u}"], cwd)
            .await?;
        Ok(output.succeeded())
    }

    async fn current_branch(&self, cwd: &Path) -> Result<Option<String>> {
        let output = self.run_git(&["rev-parse", "--abbrev-ref", "HEAD"], cwd).await?;
        if !output.succeeded() {
            return Ok(None);
        }
        let branch = output.stdout_trimmed();
        Ok((!branch.is_empty()).then(|| branch.to_string()))
    }

    async fn default_remote_branch(&self, cwd: &Path) -> Result<Option<String>> {
        let output = self
            .run_git(&["symbolic-ref", "--short", "refs/remotes/origin/HEAD"], cwd)
            .await?;
        if !output.succeeded() {
            return Ok(None);
        }
        Ok(output
            .stdout_trimmed()
            .strip_prefix("origin/")
            .map(|branch| branch.to_string()))
    }

    async fn refresh_remote_head(&self, cwd: &Path) -> Result<()> {
        let output = self.run_git(&["remote", "set-head", "origin", "-a"], cwd).await?;
        if !output.succeeded() {
            info!(
                cwd = %cwd.display(),
                "unable to refresh origin HEAD; continuing with current refs"
            );
        }
        Ok(())
    }

    async fn remote_branch_exists(&self, cwd: &Path, branch: &str) -> Result<bool> {
        let gitref = format!("refs/remotes/origin/{branch}");
        let output = self.run_git(&["show-ref", "--verify", &gitref], cwd).await?;
        Ok(output.succeeded())
    }

    async fn local_branch_exists(&self, cwd: &Path, branch: &str) -> Result<bool> {
        let gitref = format!("refs/heads/{branch}");
        let output = self.run_git(&["show-ref", "--verify", &gitref], cwd).await?;
        Ok(output.succeeded())
    }

    /// Preference order: remote default HEAD, `master`, `main`, current.
    /// The first candidate existing as `origin/<branch>` wins.
    async fn resolve_primary_branch(
        &self,
        cwd: &Path,
        current_branch: Option<&str>,
    ) -> Result<Option<String>> {
        let mut candidates: Vec<String> = Vec::new();
        if let Some(default_branch) = self.default_remote_branch(cwd).await? {
            candidates.push(default_branch);
        }
        candidates.push("master".to_string());
        candidates.push("main".to_string());
        if let Some(current) = current_branch {
            if current != "HEAD" {
                candidates.push(current.to_string());
            }
        }

        let mut seen: Vec<&str> = Vec::new();
        for branch in &candidates {
            if seen.contains(&branch.as_str()) {
                continue;
            }
            seen.push(branch);
            if self.remote_branch_exists(cwd, branch).await? {
                return Ok(Some(branch.clone()));
            }
        }
        Ok(None)
    }

    async fn checkout_branch(&self, cwd: &Path, branch: &str) -> Result<()> {
        if self.local_branch_exists(cwd, branch).await? {
            self.run_git_checked(&["checkout", branch], cwd).await?;
            return Ok(());
        }
        let track = format!("origin/{branch}");
        self.run_git_checked(&["checkout", "-b", branch, "--track", &track], cwd)
            .await?;
        Ok(())
    }

    async fn set_upstream(&self, cwd: &Path, branch: &str) -> Result<()> {
        if !self.remote_branch_exists(cwd, branch).await? {
            return Ok(());
        }
        let upstream = format!("origin/{branch}");
        self.run_git_checked(&["branch", "--set-upstream-to", &upstream, branch], cwd)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl GitClient for ShellGitClient {
    async fn clone_repo(&self, clone_url: &str, local_path: &Path) -> Result<()> {
        if local_path.exists() {
            info!(local_path = %local_path.display(), "clone skipped: path already exists");
            return Ok(());
        }

        let parent = local_path
            .parent()
            .ok_or_else(|| GitotekoError::git(format!("clone target has no parent: {}", local_path.display())))?;
        std::fs::create_dir_all(parent)
            .map_err(|e| GitotekoError::io(parent, format!("failed to create directory: {e}")))?;

        info!(clone_url, local_path = %local_path.display(), "cloning repository");
        let path_str = local_path.to_string_lossy().into_owned();
        self.run_git_checked(&["clone", clone_url, &path_str], parent).await?;
        info!(local_path = %local_path.display(), "clone completed");
        Ok(())
    }

    async fn pull(&self, local_path: &Path) -> Result<()> {
        if !local_path.exists() {
            return Err(GitotekoError::git(format!(
                "Cannot pull repository: path does not exist: {}",
                local_path.display()
            )));
        }
        if !local_path.join(".git").exists() {
            return Err(GitotekoError::git(format!(
                "Cannot pull repository: not a git repository: {}",
                local_path.display()
            )));
        }

        info!(local_path = %local_path.display(), "pulling repository");

        self.run_git_checked(&["fetch", "--prune", "origin"], local_path).await?;
        self.refresh_remote_head(local_path).await?;

        let mut current_branch = self.current_branch(local_path).await?;
        let primary_branch = self
            .resolve_primary_branch(local_path, current_branch.as_deref())
            .await?;

        if let Some(primary) = &primary_branch {
            if current_branch.as_deref() != Some(primary.as_str()) {
                info!(
                    local_path = %local_path.display(),
                    from_branch = current_branch.as_deref().unwrap_or("HEAD"),
                    to_branch = %primary,
                    "switching to repository primary branch before pull"
                );
                self.checkout_branch(local_path, primary).await?;
                current_branch = Some(primary.clone());
            }

            if !self.has_upstream(local_path).await? {
                self.set_upstream(local_path, primary).await?;
            }
        }

        if self.has_upstream(local_path).await? {
            self.run_git_checked(&["pull", "--ff-only"], local_path).await?;
        } else {
            let default_branch = self.default_remote_branch(local_path).await?;
            warn!(
                local_path = %local_path.display(),
                current_branch = current_branch.as_deref().unwrap_or(""),
                default_branch = default_branch.as_deref().unwrap_or(""),
                "repository has no upstream tracking; applying fallback pull strategy"
            );

            let current_on_remote = match current_branch.as_deref() {
                Some(branch) if branch != "HEAD" => self.remote_branch_exists(local_path, branch).await?,
                _ => false,
            };

            if current_on_remote {
                let branch = current_branch.as_deref().unwrap_or_default().to_string();
                self.run_git_checked(&["pull", "--ff-only", "origin", &branch], local_path)
                    .await?;
            } else if let Some(branch) = default_branch {
                self.run_git_checked(&["pull", "--ff-only", "origin", &branch], local_path)
                    .await?;
            } else if self.remote_branch_exists(local_path, "main").await? {
                self.run_git_checked(&["pull", "--ff-only", "origin", "main"], local_path)
                    .await?;
            } else if self.remote_branch_exists(local_path, "master").await? {
                self.run_git_checked(&["pull", "--ff-only", "origin", "master"], local_path)
                    .await?;
            } else {
                return Err(GitotekoError::git(format!(
                    "Cannot pull repository: no upstream and no resolvable remote default branch: {}",
                    local_path.display()
                )));
            }
        }

        info!(local_path = %local_path.display(), "pull completed");
        Ok(())
    }
}

fn render_command(executable: &str, args: &[&str]) -> String {
    let mut command = String::from(executable);
    for arg in args {
        command.push(' ');
        command.push_str(arg);
    }
    command
}

async fn run_captured(
    executable: &str,
    args: &[&str],
    cwd: &Path,
    timeout: Duration,
) -> Result<GitCommandOutput> {
    let command_line = render_command(executable, args);
    let future = Command::new(executable)
        .args(args)
        .current_dir(cwd)
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(timeout, future).await {
        Ok(Ok(output)) => output,
        Ok(Err(error)) if error.kind() == std::io::ErrorKind::NotFound => {
            return Err(GitotekoError::git(format!(
                "Git executable '{executable}' was not found in PATH"
            )));
        }
        Ok(Err(error)) => {
            return Err(GitotekoError::git(format!(
                "Failed to spawn git command '{command_line}': {error}"
            )));
        }
        Err(_) => {
            return Err(GitotekoError::git(format!(
                "Git command timed out after {}s: {command_line}",
                timeout.as_secs_f64()
            )));
        }
    };

    Ok(GitCommandOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Read-only queries used by the Sonar action. All failures collapse to
/// `None` so callers can degrade instead of aborting the repository.
pub async fn query_head_revision(repo_path: &Path) -> Option<String> {
    query_trimmed(repo_path, &["rev-parse", "HEAD"]).await
}

pub async fn query_current_branch(repo_path: &Path) -> Option<String> {
    query_trimmed(repo_path, &["rev-parse", "--abbrev-ref", "HEAD"]).await
}

pub async fn query_remote_default_branch(repo_path: &Path) -> Option<String> {
    let value = query_trimmed(repo_path, &["symbolic-ref", "--short", "refs/remotes/origin/HEAD"]).await?;
    value.strip_prefix("origin/").map(|branch| branch.to_string())
}

async fn query_trimmed(repo_path: &Path, args: &[&str]) -> Option<String> {
    let output = run_captured("git", args, repo_path, Duration::from_secs(30))
        .await
        .ok()?;
    if !output.succeeded() {
        return None;
    }
    let value = output.stdout_trimmed();
    (!value.is_empty()).then(|| value.to_string())
}
