//! Pluggable per-repository actions and their ordered pipeline.
//!
//! Actions must not fail the repository for expected conditions; they return
//! a failing `ActionResult` instead. The scanner treats the git sync, not
//! the pipeline, as the crash path for one repository.

use async_trait::async_trait;

use crate::domain::{ActionResult, RepoContext};

pub mod detect_languages;
pub mod language_csv;
pub mod sonar;
pub mod sonar_properties;

pub use detect_languages::DetectLanguagesAction;
pub use language_csv::WriteLanguageCsvAction;
pub use sonar::RunSonarScanAction;
pub use sonar_properties::GenerateSonarPropertiesAction;

/// Pluggable repository action interface.
///
/// Implementers read required state from `RepoContext`, update it for
/// downstream actions when needed, and describe the outcome in the returned
/// `ActionResult`.
#[async_trait]
pub trait Action: Send + std::fmt::Debug {
    /// Stable action name used in summaries and logging.
    fn name(&self) -> &str;

    /// Execute action logic for a single repository.
    async fn execute(&mut self, ctx: &mut RepoContext) -> ActionResult;
}

/// Ordered sequence of actions executed per repository.
#[derive(Debug)]
pub struct ActionPipeline {
    actions: Vec<Box<dyn Action>>,
}

impl ActionPipeline {
    pub fn new(actions: Vec<Box<dyn Action>>) -> Self {
        Self { actions }
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Ordered names of the configured actions.
    pub fn action_names(&self) -> Vec<String> {
        self.actions.iter().map(|action| action.name().to_string()).collect()
    }

    /// Run configured actions in order against one repository context.
    ///
    /// With `fail_fast`, remaining actions are skipped after the first
    /// failing result.
    pub async fn run(&mut self, ctx: &mut RepoContext, fail_fast: bool) -> Vec<ActionResult> {
        let mut results = Vec::with_capacity(self.actions.len());
        for action in &mut self.actions {
            let mut result = action.execute(ctx).await;
            if result.action_name.is_empty() {
                result.action_name = action.name().to_string();
            }
            let failed = !result.success;
            results.push(result);
            if fail_fast && failed {
                break;
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use crate::domain::Repository;

    #[derive(Debug)]
    struct StubAction {
        declared_name: &'static str,
        succeed: bool,
        blank_name: bool,
    }

    #[async_trait]
    impl Action for StubAction {
        fn name(&self) -> &str {
            self.declared_name
        }

        async fn execute(&mut self, ctx: &mut RepoContext) -> ActionResult {
            ctx.metadata.insert(
                format!("visited_{}", self.declared_name),
                serde_json::json!(true),
            );
            let name = if self.blank_name { "" } else { self.declared_name };
            if self.succeed {
                ActionResult::ok(name, "done")
            } else {
                ActionResult::failed(name, "broken")
            }
        }
    }

    fn ctx() -> RepoContext {
        RepoContext::new(
            "wks",
            Repository {
                name: "Alpha".to_string(),
                slug: "alpha".to_string(),
                clone_url: "git@x:o/alpha.git".to_string(),
            },
            PathBuf::from("/tmp/ws/alpha"),
        )
    }

    #[tokio::test]
    async fn test_run_executes_in_order_and_shares_context() {
        let mut pipeline = ActionPipeline::new(vec![
            Box::new(StubAction { declared_name: "first", succeed: true, blank_name: false }),
            Box::new(StubAction { declared_name: "second", succeed: true, blank_name: false }),
        ]);
        let mut ctx = ctx();

        let results = pipeline.run(&mut ctx, false).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].action_name, "first");
        assert_eq!(results[1].action_name, "second");
        assert!(ctx.metadata.contains_key("visited_first"));
        assert!(ctx.metadata.contains_key("visited_second"));
    }

    #[tokio::test]
    async fn test_run_fail_fast_skips_remaining() {
        let mut pipeline = ActionPipeline::new(vec![
            Box::new(StubAction { declared_name: "first", succeed: false, blank_name: false }),
            Box::new(StubAction { declared_name: "second", succeed: true, blank_name: false }),
        ]);
        let mut ctx = ctx();

        let results = pipeline.run(&mut ctx, true).await;
        assert_eq!(results.len(), 1);
        assert!(!ctx.metadata.contains_key("visited_second"));
    }

    #[tokio::test]
    async fn test_run_continues_past_failure_without_fail_fast() {
        let mut pipeline = ActionPipeline::new(vec![
            Box::new(StubAction { declared_name: "first", succeed: false, blank_name: false }),
            Box::new(StubAction { declared_name: "second", succeed: true, blank_name: false }),
        ]);
        let mut ctx = ctx();

        let results = pipeline.run(&mut ctx, false).await;
        assert_eq!(results.len(), 2);
        assert!(!results[0].success);
        assert!(results[1].success);
    }

    #[tokio::test]
    async fn test_run_fills_blank_action_name() {
        let mut pipeline = ActionPipeline::new(vec![Box::new(StubAction {
            declared_name: "anonymous",
            succeed: true,
            blank_name: true,
        })]);
        let mut ctx = ctx();

        let results = pipeline.run(&mut ctx, false).await;
        assert_eq!(results[0].action_name, "anonymous");
    }
}
