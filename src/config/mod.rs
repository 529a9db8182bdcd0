//! Environment-driven configuration.
//!
//! The process environment is read once at the CLI boundary into a plain
//! map; everything downstream (pipeline builder, Sonar action) receives that
//! snapshot instead of reading globals, which keeps late rebinding out and
//! tests deterministic.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::actions::sonar::{ExecutionMode, ShellSonarScanner, SonarScanOptions, WaitMode};
use crate::actions::{
    Action, ActionPipeline, DetectLanguagesAction, GenerateSonarPropertiesAction,
    RunSonarScanAction, WriteLanguageCsvAction,
};
use crate::constants::{
    ACTION_DETECT_LANGUAGES, ACTION_GENERATE_SONAR_PROPERTIES, ACTION_RUN_SONAR_SCAN,
    ACTION_WRITE_LANGUAGE_CSV, DEFAULT_JAVA_BINARIES_PATH, DEFAULT_LANGUAGE_EXTENSIONS,
    DEFAULT_LANGUAGE_REPORT_FILE, DEFAULT_SONAR_POLL_INTERVAL_SECONDS,
    DEFAULT_SONAR_SCANNER_EXECUTABLE, DEFAULT_SONAR_SCANNER_TIMEOUT_SECONDS,
    DEFAULT_SONAR_STATE_FILE, DEFAULT_SONAR_WAIT_TIMEOUT_SECONDS, MIN_SONAR_POLL_INTERVAL_SECONDS,
    MIN_SONAR_WAIT_TIMEOUT_SECONDS,
};
use crate::error::{GitotekoError, Result};
use crate::fsys::LocalFileSystem;

/// Snapshot the process environment into an owned map.
pub fn snapshot_env() -> HashMap<String, String> {
    std::env::vars().collect()
}

/// Trimmed, non-empty env value.
pub fn env_value(env: &HashMap<String, String>, key: &str) -> Option<String> {
    env.get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(|value| value.to_string())
}

/// Loose truthiness used for feature toggles (`1`, `true`, `yes`, `on`).
pub fn env_truthy(env: &HashMap<String, String>, key: &str) -> bool {
    matches!(
        env_value(env, key).map(|v| v.to_lowercase()).as_deref(),
        Some("1") | Some("true") | Some("yes") | Some("on")
    )
}

/// Strict boolean parsing for explicitly set options.
pub fn parse_bool(value: &str, name: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(GitotekoError::config(format!("{name} must be a boolean (true/false)"))),
    }
}

/// Numeric parsing with a lower bound.
pub fn parse_f64_min(value: &str, name: &str, minimum: f64) -> Result<f64> {
    let parsed: f64 = value
        .trim()
        .parse()
        .map_err(|_| GitotekoError::config(format!("{name} must be a number")))?;
    if parsed < minimum {
        return Err(GitotekoError::config(format!("{name} must be >= {minimum}")));
    }
    Ok(parsed)
}

fn env_bool(env: &HashMap<String, String>, key: &str, default: bool) -> Result<bool> {
    match env_value(env, key) {
        Some(raw) => parse_bool(&raw, key),
        None => Ok(default),
    }
}

fn env_f64_min(env: &HashMap<String, String>, key: &str, default: f64, minimum: f64) -> Result<f64> {
    match env_value(env, key) {
        Some(raw) => parse_f64_min(&raw, key, minimum),
        None => Ok(default),
    }
}

/// Build the action pipeline enabled through `GIT_ACTIONS`.
///
/// An unset or empty `GIT_ACTIONS` yields an empty pipeline: the run then
/// only synchronizes working copies.
pub fn build_action_pipeline(base_dir: &Path, env: &HashMap<String, String>) -> Result<ActionPipeline> {
    let Some(raw_actions) = env_value(env, "GIT_ACTIONS") else {
        return Ok(ActionPipeline::new(Vec::new()));
    };

    let mut actions: Vec<Box<dyn Action>> = Vec::new();
    for action_name in raw_actions
        .split(',')
        .map(|item| item.trim().to_lowercase())
        .filter(|item| !item.is_empty())
    {
        match action_name.as_str() {
            ACTION_DETECT_LANGUAGES => {
                let raw_extensions = env_value(env, "LANGUAGE_DETECTION_EXTENSIONS")
                    .unwrap_or_else(|| DEFAULT_LANGUAGE_EXTENSIONS.to_string());
                let extensions: Vec<String> = raw_extensions
                    .split(',')
                    .map(|item| item.trim().to_string())
                    .filter(|item| !item.is_empty())
                    .collect();
                actions.push(Box::new(DetectLanguagesAction::new(
                    extensions,
                    Arc::new(LocalFileSystem),
                )));
            }
            ACTION_WRITE_LANGUAGE_CSV => {
                let csv_path = match env_value(env, "LANGUAGE_REPORT_CSV") {
                    Some(raw) => PathBuf::from(shellexpand::tilde(&raw).into_owned()),
                    None => base_dir.join(DEFAULT_LANGUAGE_REPORT_FILE),
                };
                let regenerate = env_bool(env, "LANGUAGE_REPORT_REGENERATE", false)?;
                actions.push(Box::new(WriteLanguageCsvAction::new(csv_path, regenerate)));
            }
            ACTION_GENERATE_SONAR_PROPERTIES => {
                let overwrite = env_bool(env, "SONAR_PROPERTIES_OVERWRITE", false)?;
                let java_binaries_path = env_value(env, "SONAR_JAVA_BINARIES_PATH")
                    .unwrap_or_else(|| DEFAULT_JAVA_BINARIES_PATH.to_string());
                actions.push(Box::new(GenerateSonarPropertiesAction::new(
                    overwrite,
                    java_binaries_path,
                )));
            }
            ACTION_RUN_SONAR_SCAN => {
                actions.push(Box::new(build_sonar_scan_action(env)?));
            }
            other => {
                return Err(GitotekoError::config(format!(
                    "Unknown action in GIT_ACTIONS: '{other}'. Allowed values: \
                     {ACTION_DETECT_LANGUAGES}, {ACTION_WRITE_LANGUAGE_CSV}, \
                     {ACTION_GENERATE_SONAR_PROPERTIES}, {ACTION_RUN_SONAR_SCAN}"
                )));
            }
        }
    }

    Ok(ActionPipeline::new(actions))
}

fn build_sonar_scan_action(env: &HashMap<String, String>) -> Result<RunSonarScanAction> {
    let execution_mode = match env_value(env, "SONAR_EXECUTION_MODE") {
        Some(raw) => ExecutionMode::parse(&raw).ok_or_else(|| {
            GitotekoError::config("SONAR_EXECUTION_MODE must be one of: local, cloud, ci")
        })?,
        None => ExecutionMode::Local,
    };
    let wait_mode = match env_value(env, "SONAR_WAIT_MODE") {
        Some(raw) => WaitMode::parse(&raw)
            .ok_or_else(|| GitotekoError::config("SONAR_WAIT_MODE must be one of: sync, async"))?,
        None => WaitMode::Sync,
    };

    let scanner_executable = env_value(env, "SONAR_SCANNER_EXECUTABLE")
        .unwrap_or_else(|| DEFAULT_SONAR_SCANNER_EXECUTABLE.to_string());
    let scanner_timeout = env_f64_min(
        env,
        "SONAR_SCANNER_TIMEOUT_SECONDS",
        DEFAULT_SONAR_SCANNER_TIMEOUT_SECONDS,
        1.0,
    )?;

    let options = SonarScanOptions {
        execution_mode,
        wait_mode,
        sonar_url: None,
        sonar_token: None,
        submission_delay: Duration::from_secs_f64(env_f64_min(
            env,
            "SONAR_SUBMISSION_DELAY_SECONDS",
            0.0,
            0.0,
        )?),
        poll_interval: Duration::from_secs_f64(env_f64_min(
            env,
            "SONAR_SYNC_POLL_INTERVAL_SECONDS",
            DEFAULT_SONAR_POLL_INTERVAL_SECONDS,
            MIN_SONAR_POLL_INTERVAL_SECONDS,
        )?),
        wait_timeout: Duration::from_secs_f64(env_f64_min(
            env,
            "SONAR_SYNC_TIMEOUT_SECONDS",
            DEFAULT_SONAR_WAIT_TIMEOUT_SECONDS,
            MIN_SONAR_WAIT_TIMEOUT_SECONDS,
        )?),
        skip_unchanged: env_bool(env, "SONAR_SKIP_UNCHANGED", true)?,
        force_scan: env_bool(env, "SONAR_FORCE_SCAN", false)?,
        state_file_relative_path: env_value(env, "SONAR_STATE_FILE")
            .unwrap_or_else(|| DEFAULT_SONAR_STATE_FILE.to_string()),
    };

    let scanner = ShellSonarScanner::new(scanner_executable, Duration::from_secs_f64(scanner_timeout));
    Ok(RunSonarScanAction::new(Box::new(scanner), options, env.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn env_of(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("true", "X").unwrap());
        assert!(parse_bool("YES", "X").unwrap());
        assert!(!parse_bool("off", "X").unwrap());
        assert!(parse_bool("maybe", "X").is_err());
    }

    #[test]
    fn test_parse_f64_min() {
        assert_eq!(parse_f64_min("2.5", "X", 1.0).unwrap(), 2.5);
        assert!(parse_f64_min("0.5", "X", 1.0).is_err());
        assert!(parse_f64_min("abc", "X", 1.0).is_err());
    }

    #[test]
    fn test_env_truthy() {
        let env = env_of(&[("A", "1"), ("B", "On"), ("C", "false"), ("D", "  ")]);
        assert!(env_truthy(&env, "A"));
        assert!(env_truthy(&env, "B"));
        assert!(!env_truthy(&env, "C"));
        assert!(!env_truthy(&env, "D"));
        assert!(!env_truthy(&env, "MISSING"));
    }

    #[test]
    fn test_empty_git_actions_yields_empty_pipeline() {
        let pipeline = build_action_pipeline(Path::new("/tmp/ws"), &HashMap::new()).unwrap();
        assert!(pipeline.is_empty());
    }

    #[test]
    fn test_build_pipeline_in_configured_order() {
        let env = env_of(&[(
            "GIT_ACTIONS",
            "detect-languages, write-language-csv,generate-sonar-properties,run-sonar-scan",
        )]);
        let pipeline = build_action_pipeline(Path::new("/tmp/ws"), &env).unwrap();
        assert_eq!(
            pipeline.action_names(),
            vec![
                "detect-languages".to_string(),
                "write-language-csv".to_string(),
                "generate-sonar-properties".to_string(),
                "run-sonar-scan".to_string(),
            ]
        );
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        let env = env_of(&[("GIT_ACTIONS", "detect-languages,frobnicate")]);
        let err = build_action_pipeline(Path::new("/tmp/ws"), &env).unwrap_err();
        assert!(err.to_string().contains("frobnicate"));
    }

    #[test]
    fn test_invalid_wait_mode_is_rejected() {
        let env = env_of(&[("GIT_ACTIONS", "run-sonar-scan"), ("SONAR_WAIT_MODE", "later")]);
        let err = build_action_pipeline(Path::new("/tmp/ws"), &env).unwrap_err();
        assert!(err.to_string().contains("SONAR_WAIT_MODE"));
    }

    #[test]
    fn test_invalid_poll_interval_is_rejected() {
        let env = env_of(&[
            ("GIT_ACTIONS", "run-sonar-scan"),
            ("SONAR_SYNC_POLL_INTERVAL_SECONDS", "0.01"),
        ]);
        let err = build_action_pipeline(Path::new("/tmp/ws"), &env).unwrap_err();
        assert!(err.to_string().contains("SONAR_SYNC_POLL_INTERVAL_SECONDS"));
    }
}
