//! CI-based Sonar analysis: trigger a provider pipeline and optionally
//! verify that it contains a Sonar step.
//!
//! Only Bitbucket Pipelines is defined. The sonar-step check is a textual
//! heuristic: any step whose JSON mentions "sonar" counts as a match.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

use crate::config::{env_truthy, env_value, parse_f64_min};
use crate::constants::DEFAULT_BITBUCKET_TIMEOUT_SECONDS;
use crate::provider::{BitbucketAuth, BitbucketPipelines, PipelineVariable};

/// Outcome of one pipeline trigger (and optional verification).
#[derive(Debug, Clone, Default)]
pub struct CiOutcome {
    pub success: bool,
    pub message: String,
    pub ref_name: Option<String>,
    pub selector: Option<String>,
    pub pipeline_uuid: Option<String>,
    pub pipeline_state: Option<String>,
    pub pipeline_url: Option<String>,
    pub sonar_step_detected: Option<bool>,
}

impl CiOutcome {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            ..Self::default()
        }
    }
}

/// Trigger the configured CI pipeline for one repository and, when enabled,
/// verify a Sonar step ran — retrying once through the fallback selector.
pub async fn trigger_sonar_pipeline(
    env: &HashMap<String, String>,
    workspace: &str,
    repo_slug: &str,
    project_key: &str,
    sonar_url: &str,
    sonar_token: &str,
) -> CiOutcome {
    let ci_provider = env_value(env, "SONAR_CI_PROVIDER").unwrap_or_else(|| "bitbucket".to_string());
    if ci_provider != "bitbucket" {
        return CiOutcome::failure(format!(
            "CI provider '{ci_provider}' is not supported for Sonar pipelines"
        ));
    }

    let auth = BitbucketAuth::from_credentials(
        env_value(env, "BITBUCKET_TOKEN"),
        env_value(env, "BITBUCKET_USERNAME"),
        env_value(env, "BITBUCKET_APP_PASSWORD"),
    );
    let timeout_seconds = match env_value(env, "BITBUCKET_TIMEOUT_SECONDS") {
        Some(raw) => match parse_f64_min(&raw, "BITBUCKET_TIMEOUT_SECONDS", 1.0) {
            Ok(value) => value,
            Err(error) => return CiOutcome::failure(error.to_string()),
        },
        None => DEFAULT_BITBUCKET_TIMEOUT_SECONDS,
    };
    let pipelines = match BitbucketPipelines::new(
        env_value(env, "BITBUCKET_API_BASE_URL"),
        auth,
        Duration::from_secs_f64(timeout_seconds),
    ) {
        Ok(pipelines) => pipelines,
        Err(error) => return CiOutcome::failure(error.to_string()),
    };

    let ref_name = match env_value(env, "SONAR_CI_REF_NAME") {
        Some(ref_name) => ref_name,
        None => match pipelines.main_branch(workspace, repo_slug).await {
            Ok(Some(branch)) => branch,
            Ok(None) => {
                return CiOutcome::failure(format!(
                    "Cannot resolve a pipeline ref for {workspace}/{repo_slug}: repository has no main branch"
                ));
            }
            Err(error) => return CiOutcome::failure(error.to_string()),
        },
    };

    let mut variables = vec![PipelineVariable {
        key: "SONAR_PROJECT_KEY".to_string(),
        value: project_key.to_string(),
        secured: false,
    }];
    if env_truthy(env, "SONAR_CI_FORWARD_SONAR_ENV") {
        variables.push(PipelineVariable {
            key: "SONAR_HOST_URL".to_string(),
            value: sonar_url.to_string(),
            secured: false,
        });
        variables.push(PipelineVariable {
            key: "SONAR_TOKEN".to_string(),
            value: sonar_token.to_string(),
            secured: true,
        });
    }

    let selector = env_value(env, "SONAR_CI_PIPELINE_SELECTOR");
    let verify = env_truthy(env, "SONAR_CI_VERIFY_SONAR_STEP");

    let mut outcome = trigger_once(
        &pipelines,
        workspace,
        repo_slug,
        &ref_name,
        selector.as_deref(),
        &variables,
        verify,
    )
    .await;

    // No Sonar step on the default selector: retry once through the
    // dedicated fallback selector when one is configured.
    if verify && outcome.success && outcome.sonar_step_detected == Some(false) {
        let fallback = env_value(env, "SONAR_CI_SONAR_SELECTOR").filter(|f| Some(f) != selector.as_ref());
        if let Some(fallback) = fallback {
            info!(
                workspace,
                repo_slug,
                selector = %fallback,
                "no sonar step detected; re-triggering with fallback selector"
            );
            outcome = trigger_once(
                &pipelines,
                workspace,
                repo_slug,
                &ref_name,
                Some(&fallback),
                &variables,
                verify,
            )
            .await;
        }
    }

    if verify && outcome.success && outcome.sonar_step_detected == Some(false) {
        outcome.success = false;
        outcome.message = "Pipeline triggered but no Sonar step was detected".to_string();
    }

    outcome
}

async fn trigger_once(
    pipelines: &BitbucketPipelines,
    workspace: &str,
    repo_slug: &str,
    ref_name: &str,
    selector: Option<&str>,
    variables: &[PipelineVariable],
    verify: bool,
) -> CiOutcome {
    let triggered = match pipelines
        .trigger_pipeline(workspace, repo_slug, ref_name, selector, variables)
        .await
    {
        Ok(triggered) => triggered,
        Err(error) => return CiOutcome::failure(error.to_string()),
    };

    let pipeline_url = triggered.build_number.map(|build| {
        format!("https://bitbucket.org/{workspace}/{repo_slug}/pipelines/results/{build}")
    });

    let mut outcome = CiOutcome {
        success: true,
        message: "CI pipeline triggered".to_string(),
        ref_name: Some(ref_name.to_string()),
        selector: selector.map(|s| s.to_string()),
        pipeline_uuid: triggered.uuid.clone(),
        pipeline_state: triggered.state,
        pipeline_url,
        sonar_step_detected: None,
    };

    if !verify {
        return outcome;
    }

    let Some(uuid) = triggered.uuid else {
        warn!(workspace, repo_slug, "pipeline trigger returned no uuid; cannot verify sonar step");
        outcome.sonar_step_detected = Some(false);
        return outcome;
    };

    match pipelines.pipeline_steps(workspace, repo_slug, &uuid).await {
        Ok(steps) => {
            outcome.sonar_step_detected = Some(steps.iter().any(step_mentions_sonar));
        }
        Err(error) => {
            outcome.success = false;
            outcome.message = format!("Cannot inspect pipeline steps: {error}");
        }
    }
    outcome
}

/// Textual heuristic over the raw step payload.
fn step_mentions_sonar(step: &Value) -> bool {
    step.to_string().to_lowercase().contains("sonar")
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn env_with(server: &MockServer, extra: &[(&str, &str)]) -> HashMap<String, String> {
        let mut env = HashMap::from([
            ("BITBUCKET_API_BASE_URL".to_string(), server.base_url()),
            ("BITBUCKET_TOKEN".to_string(), "tok".to_string()),
        ]);
        for (key, value) in extra {
            env.insert(key.to_string(), value.to_string());
        }
        env
    }

    #[test]
    fn test_step_mentions_sonar() {
        assert!(step_mentions_sonar(&json!({"name": "Run SonarQube analysis"})));
        assert!(step_mentions_sonar(&json!({"script": ["sonar-scanner"]})));
        assert!(!step_mentions_sonar(&json!({"name": "unit tests"})));
    }

    #[tokio::test]
    async fn test_trigger_resolves_main_branch_and_verifies_step() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/repositories/wks/alpha");
            then.status(200).json_body(json!({"mainbranch": {"name": "develop"}}));
        });
        let trigger = server.mock(|when, then| {
            when.method(POST).path("/repositories/wks/alpha/pipelines/");
            then.status(201).json_body(json!({
                "uuid": "p1",
                "state": {"name": "PENDING"},
                "build_number": 12
            }));
        });
        server.mock(|when, then| {
            when.method(GET).path("/repositories/wks/alpha/pipelines/p1/steps/");
            then.status(200).json_body(json!({
                "values": [{"name": "Build"}, {"name": "Sonar scan", "script": ["sonar-scanner"]}]
            }));
        });

        let env = env_with(&server, &[("SONAR_CI_VERIFY_SONAR_STEP", "true")]);
        let outcome =
            trigger_sonar_pipeline(&env, "wks", "alpha", "wks_alpha", "https://s", "token").await;

        trigger.assert();
        assert!(outcome.success, "{}", outcome.message);
        assert_eq!(outcome.ref_name.as_deref(), Some("develop"));
        assert_eq!(outcome.sonar_step_detected, Some(true));
        assert_eq!(
            outcome.pipeline_url.as_deref(),
            Some("https://bitbucket.org/wks/alpha/pipelines/results/12")
        );
    }

    #[tokio::test]
    async fn test_fallback_selector_retriggers_then_fails_without_sonar_step() {
        let server = MockServer::start();
        let trigger = server.mock(|when, then| {
            when.method(POST).path("/repositories/wks/alpha/pipelines/");
            then.status(201).json_body(json!({
                "uuid": "p2",
                "state": {"name": "PENDING"},
                "build_number": 13
            }));
        });
        server.mock(|when, then| {
            when.method(GET).path("/repositories/wks/alpha/pipelines/p2/steps/");
            then.status(200).json_body(json!({"values": [{"name": "Deploy"}]}));
        });

        let env = env_with(
            &server,
            &[
                ("SONAR_CI_VERIFY_SONAR_STEP", "1"),
                ("SONAR_CI_REF_NAME", "main"),
                ("SONAR_CI_SONAR_SELECTOR", "sonar-only"),
            ],
        );
        let outcome =
            trigger_sonar_pipeline(&env, "wks", "alpha", "wks_alpha", "https://s", "token").await;

        // Default run plus one fallback retry, both without a sonar step.
        trigger.assert_hits(2);
        assert!(!outcome.success);
        assert_eq!(outcome.sonar_step_detected, Some(false));
        assert_eq!(outcome.selector.as_deref(), Some("sonar-only"));
    }

    #[tokio::test]
    async fn test_unsupported_ci_provider_fails() {
        let env = HashMap::from([("SONAR_CI_PROVIDER".to_string(), "jenkins".to_string())]);
        let outcome =
            trigger_sonar_pipeline(&env, "wks", "alpha", "wks_alpha", "https://s", "token").await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("jenkins"));
    }
}
