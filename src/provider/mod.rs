//! Repository discovery providers.
//!
//! Only Bitbucket Cloud is implemented; the CLI rejects the other provider
//! choices until their clients exist.

use async_trait::async_trait;

use crate::domain::Repository;
use crate::error::Result;

pub mod bitbucket;

pub use bitbucket::{BitbucketAuth, BitbucketCloudProvider, BitbucketPipelines, PipelineVariable};

/// Repository discovery provider (Bitbucket/GitHub/GitLab adapters).
#[async_trait]
pub trait GitProvider: Send + Sync + std::fmt::Debug {
    /// List all repositories visible in the given workspace scope.
    async fn list_repositories(&self, workspace: &str) -> Result<Vec<Repository>>;

    /// Return preferred clone URL for the repository (typically SSH).
    fn clone_url(&self, repository: &Repository) -> String;
}
