//! Sonar analysis submission for one repository.
//!
//! Three execution modes: `local` spawns `sonar-scanner` and (in sync mode)
//! polls the compute-engine task; `cloud` only queries the quality-gate
//! endpoint; `ci` triggers a provider CI pipeline and optionally verifies it
//! contains a Sonar step. A per-working-copy state file makes re-runs on an
//! unchanged revision free.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::actions::sonar_properties::sanitize_project_key;
use crate::actions::Action;
use crate::config::{env_truthy, env_value};
use crate::constants::{
    ACTION_RUN_SONAR_SCAN, DEFAULT_SONAR_POLL_INTERVAL_SECONDS, DEFAULT_SONAR_STATE_FILE,
    DEFAULT_SONAR_WAIT_TIMEOUT_SECONDS, MIN_SONAR_POLL_INTERVAL_SECONDS,
    MIN_SONAR_WAIT_TIMEOUT_SECONDS,
};
use crate::domain::{ActionResult, RepoContext};
use crate::git::{query_current_branch, query_head_revision, query_remote_default_branch};

pub mod ci;
pub mod runner;
pub mod state;

pub use runner::{ScannerInvocation, ShellSonarScanner, SonarScannerRunner};

/// How the analysis is submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Spawn `sonar-scanner` locally
    Local,
    /// Only query the server-side quality gate
    Cloud,
    /// Trigger a provider CI pipeline
    Ci,
}

impl ExecutionMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "local" => Some(Self::Local),
            "cloud" => Some(Self::Cloud),
            "ci" => Some(Self::Ci),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Cloud => "cloud",
            Self::Ci => "ci",
        }
    }
}

/// Whether to wait for compute-engine processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    Sync,
    Async,
}

impl WaitMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "sync" => Some(Self::Sync),
            "async" => Some(Self::Async),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Async => "async",
        }
    }
}

/// Tunables of the scan action. Poll interval and wait budget are clamped to
/// sane lower bounds at construction.
#[derive(Debug, Clone)]
pub struct SonarScanOptions {
    pub execution_mode: ExecutionMode,
    pub wait_mode: WaitMode,
    pub sonar_url: Option<String>,
    pub sonar_token: Option<String>,
    pub submission_delay: Duration,
    pub poll_interval: Duration,
    pub wait_timeout: Duration,
    pub skip_unchanged: bool,
    pub force_scan: bool,
    pub state_file_relative_path: String,
}

impl Default for SonarScanOptions {
    fn default() -> Self {
        Self {
            execution_mode: ExecutionMode::Local,
            wait_mode: WaitMode::Sync,
            sonar_url: None,
            sonar_token: None,
            submission_delay: Duration::ZERO,
            poll_interval: Duration::from_secs_f64(DEFAULT_SONAR_POLL_INTERVAL_SECONDS),
            wait_timeout: Duration::from_secs_f64(DEFAULT_SONAR_WAIT_TIMEOUT_SECONDS),
            skip_unchanged: true,
            force_scan: false,
            state_file_relative_path: DEFAULT_SONAR_STATE_FILE.to_string(),
        }
    }
}

/// Terminal CE-task statuses.
const CE_TERMINAL_STATUSES: [&str; 3] = ["SUCCESS", "FAILED", "CANCELED"];

/// Outcome of one mode dispatch, merged into the final `ActionResult`.
struct ModeOutcome {
    success: bool,
    message: String,
    final_status: String,
    analysis_url: Option<String>,
    ce_task_id: Option<String>,
    extra: Map<String, Value>,
}

impl ModeOutcome {
    fn failure(message: impl Into<String>, final_status: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            final_status: final_status.into(),
            analysis_url: None,
            ce_task_id: None,
            extra: Map::new(),
        }
    }
}

/// Execute Sonar analysis for one repository context.
///
/// Configuration precedence for the server coordinates:
/// 1. Explicit options (`sonar_url`, `sonar_token`)
/// 2. `SONARQUBE_URL` then `SONAR_HOST_URL`
/// 3. `SONARQUBE_TOKEN` then `SONAR_TOKEN`
#[derive(Debug)]
pub struct RunSonarScanAction {
    scanner: Box<dyn SonarScannerRunner>,
    http: reqwest::Client,
    options: SonarScanOptions,
    env: HashMap<String, String>,
    analysis_url_re: Regex,
    ce_task_re: Regex,
    last_submission: Option<Instant>,
}

impl RunSonarScanAction {
    pub fn new(
        scanner: Box<dyn SonarScannerRunner>,
        mut options: SonarScanOptions,
        env: HashMap<String, String>,
    ) -> Self {
        options.poll_interval = options
            .poll_interval
            .max(Duration::from_secs_f64(MIN_SONAR_POLL_INTERVAL_SECONDS));
        options.wait_timeout = options
            .wait_timeout
            .max(Duration::from_secs_f64(MIN_SONAR_WAIT_TIMEOUT_SECONDS));
        if options.state_file_relative_path.trim().is_empty() {
            options.state_file_relative_path = DEFAULT_SONAR_STATE_FILE.to_string();
        }

        Self {
            scanner,
            http: reqwest::Client::new(),
            options,
            env,
            analysis_url_re: Regex::new(r"https?://\S*dashboard\?id=\S+").expect("static regex"),
            ce_task_re: Regex::new(r"https?://\S*/api/ce/task\?id=([A-Za-z0-9\-]+)")
                .expect("static regex"),
            last_submission: None,
        }
    }

    fn resolve_sonar_url(&self) -> Option<String> {
        self.options
            .sonar_url
            .clone()
            .or_else(|| env_value(&self.env, "SONARQUBE_URL"))
            .or_else(|| env_value(&self.env, "SONAR_HOST_URL"))
            .map(|url| url.trim_end_matches('/').to_string())
    }

    fn resolve_sonar_token(&self) -> Option<String> {
        self.options
            .sonar_token
            .clone()
            .or_else(|| env_value(&self.env, "SONARQUBE_TOKEN"))
            .or_else(|| env_value(&self.env, "SONAR_TOKEN"))
    }

    fn extract_analysis_url(&self, text: &str) -> Option<String> {
        self.analysis_url_re.find(text).map(|m| m.as_str().to_string())
    }

    fn extract_ce_task_id(&self, text: &str) -> Option<String> {
        self.ce_task_re
            .captures(text)
            .and_then(|captures| captures.get(1))
            .map(|m| m.as_str().to_string())
    }

    /// Current branch, falling back to the remote default when HEAD is
    /// detached.
    async fn resolve_branch(&self, repo_path: &Path) -> Option<String> {
        match query_current_branch(repo_path).await {
            Some(branch) if branch != "HEAD" => Some(branch),
            _ => query_remote_default_branch(repo_path).await,
        }
    }

    async fn throttle_submission_if_needed(&self) {
        let delay = self.options.submission_delay;
        if delay.is_zero() {
            return;
        }
        let Some(last) = self.last_submission else { return };

        let elapsed = last.elapsed();
        if elapsed < delay {
            let remaining = delay - elapsed;
            debug!(remaining_ms = remaining.as_millis() as u64, "throttling sonar submission");
            tokio::time::sleep(remaining).await;
        }
    }

    async fn run_local(
        &mut self,
        ctx: &RepoContext,
        sonar_url: &str,
        token: &str,
        branch_name: Option<&str>,
    ) -> ModeOutcome {
        let invocation = match self
            .scanner
            .run(&ctx.local_path, sonar_url, token, branch_name)
            .await
        {
            Ok(invocation) => invocation,
            Err(error) => return ModeOutcome::failure(error.to_string(), "FAILED"),
        };
        self.last_submission = Some(Instant::now());

        let analysis_url = self
            .extract_analysis_url(&invocation.stdout)
            .or_else(|| self.extract_analysis_url(&invocation.stderr));
        let ce_task_id = self
            .extract_ce_task_id(&invocation.stdout)
            .or_else(|| self.extract_ce_task_id(&invocation.stderr));

        let mut success = invocation.exit_code == 0;
        let mut message = if success {
            "Sonar scan completed".to_string()
        } else {
            "Sonar scan failed".to_string()
        };
        let mut final_status = "FAILED".to_string();
        let mut extra = Map::new();
        extra.insert("exit_code".to_string(), json!(invocation.exit_code));

        if success && self.options.wait_mode == WaitMode::Sync {
            match &ce_task_id {
                None => {
                    success = false;
                    message = "Sonar scan submitted but CE task id was not found".to_string();
                }
                Some(task_id) => {
                    let wait = self.wait_for_ce_task(sonar_url, token, task_id).await;
                    extra.insert("ce_task_status".to_string(), json!(wait.status));
                    extra.insert(
                        "ce_task_url".to_string(),
                        json!(format!("{sonar_url}/api/ce/task?id={task_id}")),
                    );
                    if let Some(analysis_id) = &wait.analysis_id {
                        extra.insert("ce_analysis_id".to_string(), json!(analysis_id));
                    }
                    if let Some(error_message) = &wait.error_message {
                        extra.insert("ce_error_message".to_string(), json!(error_message));
                    }
                    if let Some(poll_error) = &wait.poll_error {
                        extra.insert("ce_poll_error".to_string(), json!(poll_error));
                    }

                    match wait.status.as_str() {
                        "SUCCESS" => {
                            message = "Sonar scan completed and processed".to_string();
                            final_status = "SUCCESS".to_string();
                        }
                        "TIMEOUT" => {
                            success = false;
                            message = "Sonar scan submitted but CE processing wait timed out".to_string();
                            final_status = "TIMEOUT".to_string();
                        }
                        other => {
                            success = false;
                            let status = if other.is_empty() { "UNKNOWN" } else { other };
                            message =
                                format!("Sonar scan submitted but CE processing ended with status {status}");
                            final_status = status.to_string();
                        }
                    }
                }
            }
        } else if success {
            final_status = "SUBMITTED".to_string();
        }

        ModeOutcome {
            success,
            message,
            final_status,
            analysis_url,
            ce_task_id,
            extra,
        }
    }

    /// Poll `/api/ce/task` until a terminal status or the wait budget runs
    /// out. Transient HTTP errors do not abort polling.
    async fn wait_for_ce_task(&self, sonar_url: &str, token: &str, ce_task_id: &str) -> CeWaitResult {
        let deadline = Instant::now() + self.options.wait_timeout;
        let mut last_error: Option<String> = None;

        while Instant::now() < deadline {
            match self.fetch_ce_task(sonar_url, token, ce_task_id).await {
                Ok(task) => {
                    let status = task
                        .get("status")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    if CE_TERMINAL_STATUSES.contains(&status.as_str()) {
                        return CeWaitResult {
                            status,
                            analysis_id: task
                                .get("analysisId")
                                .and_then(Value::as_str)
                                .map(|v| v.to_string()),
                            error_message: task
                                .get("errorMessage")
                                .and_then(Value::as_str)
                                .map(|v| v.to_string()),
                            poll_error: None,
                        };
                    }
                    debug!(ce_task_id, status = %status, "CE task still processing");
                }
                Err(error) => {
                    debug!(ce_task_id, %error, "transient CE poll error");
                    last_error = Some(error);
                }
            }
            tokio::time::sleep(self.options.poll_interval).await;
        }

        CeWaitResult {
            status: "TIMEOUT".to_string(),
            analysis_id: None,
            error_message: None,
            poll_error: last_error,
        }
    }

    async fn fetch_ce_task(
        &self,
        sonar_url: &str,
        token: &str,
        ce_task_id: &str,
    ) -> std::result::Result<Value, String> {
        let url = format!("{sonar_url}/api/ce/task");
        let response = self
            .http
            .get(&url)
            .query(&[("id", ce_task_id)])
            .basic_auth(token, Some(""))
            .header("Accept", "application/json")
            .timeout(self.options.poll_interval + Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| format!("Unable to query Sonar CE task: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("Sonar CE task API returned HTTP {status}"));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| format!("Invalid JSON response from Sonar CE task API: {e}"))?;
        match payload.get("task") {
            Some(task @ Value::Object(_)) => Ok(task.clone()),
            _ => Err("Unexpected Sonar CE task API response: missing task object".to_string()),
        }
    }

    /// `cloud` mode: no scanner run, just the server-side quality gate.
    async fn check_quality_gate(&self, sonar_url: &str, token: &str, project_key: &str) -> ModeOutcome {
        let url = format!("{sonar_url}/api/qualitygates/project_status");
        let response = self
            .http
            .get(&url)
            .query(&[("projectKey", project_key)])
            .basic_auth(token, Some(""))
            .header("Accept", "application/json")
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(error) => {
                return ModeOutcome::failure(
                    format!("Unable to query Sonar quality gate: {error}"),
                    "FAILED",
                );
            }
        };

        let http_status = response.status();
        if http_status == reqwest::StatusCode::NOT_FOUND {
            // SonarCloud projects without the endpoint: not a failure.
            let mut outcome = ModeOutcome {
                success: true,
                message: "Quality gate endpoint unavailable, status check skipped".to_string(),
                final_status: "SKIPPED_STATUS_CHECK".to_string(),
                analysis_url: None,
                ce_task_id: None,
                extra: Map::new(),
            };
            outcome
                .extra
                .insert("endpoint_error".to_string(), json!("quality gate endpoint returned 404"));
            return outcome;
        }
        if !http_status.is_success() {
            return ModeOutcome::failure(
                format!("Sonar quality gate API returned HTTP {http_status}"),
                "FAILED",
            );
        }

        let payload: Value = match response.json().await {
            Ok(payload) => payload,
            Err(error) => {
                return ModeOutcome::failure(
                    format!("Invalid JSON response from Sonar quality gate API: {error}"),
                    "FAILED",
                );
            }
        };

        let gate_status = payload
            .get("projectStatus")
            .and_then(|project| project.get("status"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let conditions = payload
            .get("projectStatus")
            .and_then(|project| project.get("conditions"))
            .cloned()
            .unwrap_or(Value::Null);

        let mut extra = Map::new();
        extra.insert("quality_gate_status".to_string(), json!(gate_status));
        extra.insert("quality_gate_conditions".to_string(), conditions);

        match gate_status.as_str() {
            "OK" | "NONE" => ModeOutcome {
                success: true,
                message: "Quality gate passed".to_string(),
                final_status: "SUCCESS".to_string(),
                analysis_url: None,
                ce_task_id: None,
                extra,
            },
            "ERROR" => {
                let mut outcome = ModeOutcome::failure("Quality gate failed", "ERROR");
                outcome.extra = extra;
                outcome
            }
            other => {
                let status = if other.is_empty() { "UNKNOWN" } else { other };
                let mut outcome = ModeOutcome::failure(
                    format!("Quality gate returned unexpected status {status}"),
                    status,
                );
                outcome.extra = extra;
                outcome
            }
        }
    }

    async fn run_ci(
        &mut self,
        ctx: &RepoContext,
        sonar_url: &str,
        token: &str,
        project_key: &str,
    ) -> ModeOutcome {
        let ci_outcome = ci::trigger_sonar_pipeline(
            &self.env,
            &ctx.workspace_id,
            &ctx.repository.slug,
            project_key,
            sonar_url,
            token,
        )
        .await;
        self.last_submission = Some(Instant::now());

        let mut extra = Map::new();
        if let Some(uuid) = &ci_outcome.pipeline_uuid {
            extra.insert("pipeline_uuid".to_string(), json!(uuid));
        }
        if let Some(pipeline_state) = &ci_outcome.pipeline_state {
            extra.insert("pipeline_state".to_string(), json!(pipeline_state));
        }
        if let Some(pipeline_url) = &ci_outcome.pipeline_url {
            extra.insert("pipeline_url".to_string(), json!(pipeline_url));
        }
        if let Some(ref_name) = &ci_outcome.ref_name {
            extra.insert("pipeline_ref_name".to_string(), json!(ref_name));
        }
        if let Some(selector) = &ci_outcome.selector {
            extra.insert("pipeline_selector".to_string(), json!(selector));
        }
        if let Some(detected) = ci_outcome.sonar_step_detected {
            extra.insert("sonar_step_detected".to_string(), json!(detected));
        }

        ModeOutcome {
            success: ci_outcome.success,
            final_status: if ci_outcome.success { "SUBMITTED" } else { "FAILED" }.to_string(),
            message: ci_outcome.message,
            analysis_url: None,
            ce_task_id: None,
            extra,
        }
    }

    fn state_file_path(&self, ctx: &RepoContext) -> PathBuf {
        ctx.local_path.join(&self.options.state_file_relative_path)
    }
}

/// Parsed terminal (or timed-out) CE wait.
struct CeWaitResult {
    status: String,
    analysis_id: Option<String>,
    error_message: Option<String>,
    poll_error: Option<String>,
}

#[async_trait]
impl Action for RunSonarScanAction {
    fn name(&self) -> &str {
        ACTION_RUN_SONAR_SCAN
    }

    async fn execute(&mut self, ctx: &mut RepoContext) -> ActionResult {
        let Some(sonar_url) = self.resolve_sonar_url() else {
            return ActionResult::failed(self.name(), "Missing Sonar URL (SONARQUBE_URL or SONAR_HOST_URL)");
        };
        let Some(sonar_token) = self.resolve_sonar_token() else {
            return ActionResult::failed(self.name(), "Missing Sonar token (SONARQUBE_TOKEN or SONAR_TOKEN)");
        };

        let project_key =
            sanitize_project_key(&format!("{}_{}", ctx.workspace_id, ctx.repository.slug));
        let branch = self.resolve_branch(&ctx.local_path).await;
        let scanner_branch = if env_truthy(&self.env, "SONAR_ENABLE_BRANCH_ANALYSIS") {
            branch.clone()
        } else {
            None
        };
        let revision = query_head_revision(&ctx.local_path).await;

        let state_path = self.state_file_path(ctx);
        let key = state::state_key(&sonar_url, &project_key, scanner_branch.as_deref());

        if self.options.skip_unchanged && !self.options.force_scan {
            if let Some(revision) = &revision {
                if let Some(entry) = state::load_entry(&state_path, &key) {
                    if &entry.revision == revision && entry.status == "SUCCESS" {
                        info!(
                            repo_slug = %ctx.repository.slug,
                            project_key = %project_key,
                            revision = %revision,
                            "Sonar scan skipped (repository unchanged)"
                        );
                        return ActionResult::ok(self.name(), "Sonar scan skipped (repository unchanged)")
                            .with_metadata("repo_slug", json!(ctx.repository.slug))
                            .with_metadata("project_key", json!(project_key))
                            .with_metadata("revision", json!(revision))
                            .with_metadata("reason", json!("unchanged"))
                            .with_metadata("wait_mode", json!(self.options.wait_mode.as_str()));
                    }
                }
            }
        }

        self.throttle_submission_if_needed().await;

        let outcome = match self.options.execution_mode {
            ExecutionMode::Local => {
                self.run_local(ctx, &sonar_url, &sonar_token, scanner_branch.as_deref())
                    .await
            }
            ExecutionMode::Cloud => self.check_quality_gate(&sonar_url, &sonar_token, &project_key).await,
            ExecutionMode::Ci => self.run_ci(ctx, &sonar_url, &sonar_token, &project_key).await,
        };

        if outcome.success {
            if let Some(revision) = &revision {
                state::record_entry(
                    &state_path,
                    &key,
                    state::ScanStateEntry {
                        revision: revision.clone(),
                        status: outcome.final_status.clone(),
                        analysis_url: outcome.analysis_url.clone(),
                        ce_task_id: outcome.ce_task_id.clone(),
                        updated_at_epoch: chrono::Utc::now().timestamp(),
                    },
                );
            }
        }

        if !outcome.success {
            warn!(
                repo_slug = %ctx.repository.slug,
                final_status = %outcome.final_status,
                message = %outcome.message,
                "sonar scan did not succeed"
            );
        }

        let mut result = if outcome.success {
            ActionResult::ok(self.name(), outcome.message)
        } else {
            ActionResult::failed(self.name(), outcome.message)
        };
        result = result
            .with_metadata("repo_slug", json!(ctx.repository.slug))
            .with_metadata("project_key", json!(project_key))
            .with_metadata("revision", json!(revision))
            .with_metadata("execution_mode", json!(self.options.execution_mode.as_str()))
            .with_metadata("wait_mode", json!(self.options.wait_mode.as_str()))
            .with_metadata("analysis_url", json!(outcome.analysis_url))
            .with_metadata("ce_task_id", json!(outcome.ce_task_id))
            .with_metadata("final_status", json!(outcome.final_status))
            .with_metadata("skip_unchanged", json!(self.options.skip_unchanged))
            .with_metadata("force_scan", json!(self.options.force_scan));
        for (metadata_key, metadata_value) in outcome.extra {
            result.metadata.insert(metadata_key, metadata_value);
        }
        result
    }
}
