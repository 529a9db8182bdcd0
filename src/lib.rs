pub mod actions;
pub mod cli;
pub mod config;
pub mod constants;
pub mod domain;
pub mod error;
pub mod fsys;
pub mod git;
pub mod logger;
pub mod output;
pub mod provider;
pub mod scanner;

// Re-export commonly used types
pub use actions::{Action, ActionPipeline};
pub use domain::{ActionResult, RepoContext, Repository, WorkspaceId};
pub use error::{GitotekoError, Result as GtResult};
pub use scanner::{
    RepoSelection, RepositoryExecutionSummary, ScanExecutionSummary, ScanOptions, SyncOperation,
    WorkspaceScanner,
};
