//! SonarScanner invocation behind a trait so the scan action stays testable.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::constants::{DEFAULT_SONAR_SCANNER_EXECUTABLE, DEFAULT_SONAR_SCANNER_TIMEOUT_SECONDS};
use crate::error::{GitotekoError, Result};

/// Captured output of one scanner run.
#[derive(Debug, Clone)]
pub struct ScannerInvocation {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Contract for executing SonarScanner against one working copy.
#[async_trait]
pub trait SonarScannerRunner: Send + Sync + std::fmt::Debug {
    async fn run(
        &self,
        repo_path: &Path,
        sonar_url: &str,
        token: &str,
        branch_name: Option<&str>,
    ) -> Result<ScannerInvocation>;
}

/// Run `sonar-scanner` through a subprocess.
#[derive(Debug)]
pub struct ShellSonarScanner {
    executable: String,
    timeout: Duration,
}

impl Default for ShellSonarScanner {
    fn default() -> Self {
        Self::new(
            DEFAULT_SONAR_SCANNER_EXECUTABLE,
            Duration::from_secs_f64(DEFAULT_SONAR_SCANNER_TIMEOUT_SECONDS),
        )
    }
}

impl ShellSonarScanner {
    pub fn new(executable: impl Into<String>, timeout: Duration) -> Self {
        Self {
            executable: executable.into(),
            timeout,
        }
    }
}

#[async_trait]
impl SonarScannerRunner for ShellSonarScanner {
    async fn run(
        &self,
        repo_path: &Path,
        sonar_url: &str,
        token: &str,
        branch_name: Option<&str>,
    ) -> Result<ScannerInvocation> {
        let mut args = vec![
            format!("-Dsonar.host.url={sonar_url}"),
            format!("-Dsonar.token={token}"),
        ];
        // `main` is the server default; passing it would force branch analysis
        // on editions that reject the parameter.
        if let Some(branch) = branch_name.filter(|b| *b != "main") {
            args.push(format!("-Dsonar.branch.name={branch}"));
        }

        let future = Command::new(&self.executable)
            .args(&args)
            .current_dir(repo_path)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, future).await {
            Ok(Ok(output)) => output,
            Ok(Err(error)) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(GitotekoError::sonar(format!(
                    "SonarScanner executable '{}' was not found in PATH",
                    self.executable
                )));
            }
            Ok(Err(error)) => {
                return Err(GitotekoError::sonar(format!(
                    "Failed to spawn SonarScanner in {}: {error}",
                    repo_path.display()
                )));
            }
            Err(_) => {
                return Err(GitotekoError::sonar(format!(
                    "SonarScanner timed out after {}s in {}",
                    self.timeout.as_secs_f64(),
                    repo_path.display()
                )));
            }
        };

        Ok(ScannerInvocation {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_executable_is_reported() {
        let tmp = TempDir::new().unwrap();
        let scanner = ShellSonarScanner::new("definitely-not-a-sonar-scanner", Duration::from_secs(5));
        let err = scanner
            .run(tmp.path(), "https://sonar.example", "tok", None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("was not found in PATH"));
    }
}
