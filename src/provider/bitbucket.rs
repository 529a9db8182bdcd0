//! Bitbucket Cloud REST 2.0 adapter: paginated repository listing plus the
//! Pipelines endpoints used by the Sonar CI mode.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::constants::DEFAULT_BITBUCKET_API_BASE_URL;
use crate::domain::Repository;
use crate::error::{GitotekoError, Result};
use crate::provider::GitProvider;

/// Authentication for Bitbucket Cloud calls.
///
/// Bearer token wins over Basic (username + app password); anonymous is
/// accepted for public workspaces.
#[derive(Debug, Clone)]
pub enum BitbucketAuth {
    Bearer(String),
    Basic { username: String, app_password: String },
    Anonymous,
}

impl BitbucketAuth {
    /// Resolve auth from optional credentials, preferring the token.
    pub fn from_credentials(
        token: Option<String>,
        username: Option<String>,
        app_password: Option<String>,
    ) -> Self {
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            return Self::Bearer(token);
        }
        if let (Some(username), Some(app_password)) = (username, app_password) {
            if !username.is_empty() && !app_password.is_empty() {
                return Self::Basic { username, app_password };
            }
        }
        Self::Anonymous
    }

    fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Self::Bearer(token) => request.bearer_auth(token),
            Self::Basic { username, app_password } => {
                request.basic_auth(username, Some(app_password))
            }
            Self::Anonymous => request,
        }
    }
}

/// Paginated repository listing against Bitbucket Cloud.
#[derive(Debug)]
pub struct BitbucketCloudProvider {
    client: reqwest::Client,
    api_base_url: String,
    auth: BitbucketAuth,
}

impl BitbucketCloudProvider {
    pub fn new(api_base_url: Option<String>, auth: BitbucketAuth, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("gitoteko/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| GitotekoError::provider(format!("failed to build HTTP client: {e}")))?;
        let api_base_url = api_base_url
            .unwrap_or_else(|| DEFAULT_BITBUCKET_API_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            client,
            api_base_url,
            auth,
        })
    }

}

#[async_trait]
impl GitProvider for BitbucketCloudProvider {
    async fn list_repositories(&self, workspace: &str) -> Result<Vec<Repository>> {
        let mut next_url = Some(format!("{}/repositories/{workspace}", self.api_base_url));
        let mut repositories = Vec::new();

        while let Some(url) = next_url.take() {
            debug!(url = %url, "fetching repository page");
            let payload = get_json(&self.client, &self.auth, &url).await?;

            match payload.get("values") {
                None | Some(Value::Null) => {}
                Some(Value::Array(items)) => {
                    for item in items {
                        // Non-object entries are skipped, not fatal.
                        let Value::Object(_) = item else { continue };
                        if let Some(repository) = map_repository(item) {
                            repositories.push(repository);
                        }
                    }
                }
                Some(_) => {
                    return Err(GitotekoError::provider(
                        "Unexpected Bitbucket API payload: 'values' must be a list",
                    ));
                }
            }

            next_url = payload
                .get("next")
                .and_then(Value::as_str)
                .filter(|next| !next.is_empty())
                .map(|next| next.to_string());
        }

        info!(workspace, count = repositories.len(), "repositories listed");
        Ok(repositories)
    }

    fn clone_url(&self, repository: &Repository) -> String {
        repository.clone_url.clone()
    }
}

/// Map one payload entry into a `Repository`, or drop it when no stable
/// slug or clone URL can be determined.
fn map_repository(payload: &Value) -> Option<Repository> {
    let slug = payload.get("slug").and_then(Value::as_str)?.trim();
    if slug.is_empty() {
        return None;
    }

    let name = payload
        .get("name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(slug);

    let clone_url = extract_ssh_clone_url(payload).or_else(|| fallback_ssh_url(payload, slug))?;

    Some(Repository {
        name: name.to_string(),
        slug: slug.to_string(),
        clone_url,
    })
}

fn extract_ssh_clone_url(payload: &Value) -> Option<String> {
    let clone_links = payload.get("links")?.get("clone")?.as_array()?;
    for link in clone_links {
        if link.get("name").and_then(Value::as_str) != Some("ssh") {
            continue;
        }
        if let Some(href) = link.get("href").and_then(Value::as_str) {
            let href = href.trim();
            if !href.is_empty() {
                return Some(href.to_string());
            }
        }
    }
    None
}

fn fallback_ssh_url(payload: &Value, slug: &str) -> Option<String> {
    if let Some(full_name) = payload.get("full_name").and_then(Value::as_str) {
        if full_name.contains('/') {
            return Some(format!("git@bitbucket.org:{full_name}.git"));
        }
    }

    let workspace_slug = payload
        .get("workspace")
        .and_then(|workspace| workspace.get("slug"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())?;
    Some(format!("git@bitbucket.org:{workspace_slug}/{slug}.git"))
}

/// One pipeline variable forwarded on trigger.
#[derive(Debug, Clone)]
pub struct PipelineVariable {
    pub key: String,
    pub value: String,
    pub secured: bool,
}

/// Pipeline returned by the trigger endpoint.
#[derive(Debug, Clone)]
pub struct TriggeredPipeline {
    pub uuid: Option<String>,
    pub state: Option<String>,
    pub build_number: Option<u64>,
}

/// Bitbucket Pipelines endpoints used to drive CI-based Sonar analysis.
pub struct BitbucketPipelines {
    client: reqwest::Client,
    api_base_url: String,
    auth: BitbucketAuth,
}

impl BitbucketPipelines {
    pub fn new(api_base_url: Option<String>, auth: BitbucketAuth, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("gitoteko/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| GitotekoError::provider(format!("failed to build HTTP client: {e}")))?;
        let api_base_url = api_base_url
            .unwrap_or_else(|| DEFAULT_BITBUCKET_API_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            client,
            api_base_url,
            auth,
        })
    }

    /// Read `mainbranch.name` from the repository resource.
    pub async fn main_branch(&self, workspace: &str, slug: &str) -> Result<Option<String>> {
        let url = format!("{}/repositories/{workspace}/{slug}", self.api_base_url);
        let payload = get_json(&self.client, &self.auth, &url).await?;
        Ok(payload
            .get("mainbranch")
            .and_then(|branch| branch.get("name"))
            .and_then(Value::as_str)
            .map(|name| name.to_string()))
    }

    /// Trigger a branch pipeline, optionally through a custom selector.
    pub async fn trigger_pipeline(
        &self,
        workspace: &str,
        slug: &str,
        ref_name: &str,
        selector_pattern: Option<&str>,
        variables: &[PipelineVariable],
    ) -> Result<TriggeredPipeline> {
        let mut target = json!({
            "type": "pipeline_ref_target",
            "ref_type": "branch",
            "ref_name": ref_name,
        });
        if let Some(pattern) = selector_pattern {
            target["selector"] = json!({ "type": "custom", "pattern": pattern });
        }

        let variables: Vec<Value> = variables
            .iter()
            .map(|variable| {
                json!({
                    "key": variable.key,
                    "value": variable.value,
                    "secured": variable.secured,
                })
            })
            .collect();

        let url = format!("{}/repositories/{workspace}/{slug}/pipelines/", self.api_base_url);
        let body = json!({ "target": target, "variables": variables });

        let request = self
            .auth
            .apply(self.client.post(&url))
            .header("Accept", "application/json")
            .json(&body);
        let response = request
            .send()
            .await
            .map_err(|e| GitotekoError::provider(format!("Bitbucket pipeline trigger failed for URL: {url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GitotekoError::provider(format!(
                "Bitbucket pipeline trigger failed with HTTP {status} for URL: {url}"
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| GitotekoError::provider(format!("Invalid JSON from Bitbucket pipeline trigger: {e}")))?;

        Ok(TriggeredPipeline {
            uuid: payload.get("uuid").and_then(Value::as_str).map(|v| v.to_string()),
            state: payload
                .get("state")
                .and_then(|state| state.get("name"))
                .and_then(Value::as_str)
                .map(|v| v.to_string()),
            build_number: payload.get("build_number").and_then(Value::as_u64),
        })
    }

    /// List the steps of one pipeline (single page is enough for the
    /// sonar-step inspection).
    pub async fn pipeline_steps(&self, workspace: &str, slug: &str, pipeline_uuid: &str) -> Result<Vec<Value>> {
        let url = format!(
            "{}/repositories/{workspace}/{slug}/pipelines/{pipeline_uuid}/steps/",
            self.api_base_url
        );
        let payload = get_json(&self.client, &self.auth, &url).await?;
        match payload.get("values") {
            Some(Value::Array(items)) => Ok(items.clone()),
            _ => Ok(Vec::new()),
        }
    }
}

/// Authenticated GET returning the parsed JSON body; non-2xx is fatal.
async fn get_json(client: &reqwest::Client, auth: &BitbucketAuth, url: &str) -> Result<Value> {
    let request = auth.apply(client.get(url)).header("Accept", "application/json");
    let response = request
        .send()
        .await
        .map_err(|e| GitotekoError::provider(format!("Bitbucket API request failed for URL: {url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(GitotekoError::provider(format!(
            "Bitbucket API request failed with HTTP {status} for URL: {url}"
        )));
    }

    response
        .json::<Value>()
        .await
        .map_err(|e| GitotekoError::provider(format!("Invalid JSON received from Bitbucket API for URL: {url}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use pretty_assertions::assert_eq;

    fn provider_for(server: &MockServer) -> BitbucketCloudProvider {
        BitbucketCloudProvider::new(
            Some(server.base_url()),
            BitbucketAuth::Anonymous,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_list_repositories_follows_pagination() {
        let server = MockServer::start();

        let page2_url = format!("{}/repositories/wks/page2", server.base_url());
        server.mock(|when, then| {
            when.method(GET).path("/repositories/wks/page2");
            then.status(200).json_body(json!({
                "values": [
                    {
                        "slug": "beta",
                        "name": "Beta",
                        "full_name": "wks/beta"
                    }
                ]
            }));
        });
        server.mock(|when, then| {
            when.method(GET).path("/repositories/wks");
            then.status(200).json_body(json!({
                "values": [
                    {
                        "slug": "alpha",
                        "name": "Alpha",
                        "links": {
                            "clone": [
                                {"name": "https", "href": "https://bitbucket.org/wks/alpha.git"},
                                {"name": "ssh", "href": "git@bitbucket.org:wks/alpha.git"}
                            ]
                        }
                    },
                    42,
                    {"name": "no slug here"}
                ],
                "next": page2_url
            }));
        });

        let repositories = provider_for(&server).list_repositories("wks").await.unwrap();

        assert_eq!(repositories.len(), 2);
        assert_eq!(repositories[0].slug, "alpha");
        assert_eq!(repositories[0].clone_url, "git@bitbucket.org:wks/alpha.git");
        // SSH link missing: synthesized from full_name.
        assert_eq!(repositories[1].slug, "beta");
        assert_eq!(repositories[1].clone_url, "git@bitbucket.org:wks/beta.git");
    }

    #[tokio::test]
    async fn test_list_repositories_rejects_non_list_values() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/repositories/wks");
            then.status(200).json_body(json!({"values": "nope"}));
        });

        let err = provider_for(&server).list_repositories("wks").await.unwrap_err();
        assert!(err.to_string().contains("'values' must be a list"));
    }

    #[tokio::test]
    async fn test_list_repositories_http_error_is_fatal() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/repositories/wks");
            then.status(500).body("boom");
        });

        let err = provider_for(&server).list_repositories("wks").await.unwrap_err();
        assert!(err.to_string().contains("HTTP 500"));
    }

    #[tokio::test]
    async fn test_bearer_token_sent() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/repositories/wks")
                .header("authorization", "Bearer secret");
            then.status(200).json_body(json!({"values": []}));
        });

        let provider = BitbucketCloudProvider::new(
            Some(server.base_url()),
            BitbucketAuth::Bearer("secret".to_string()),
            Duration::from_secs(5),
        )
        .unwrap();
        provider.list_repositories("wks").await.unwrap();
        mock.assert();
    }

    #[test]
    fn test_auth_from_credentials_prefers_bearer() {
        let auth = BitbucketAuth::from_credentials(
            Some("tok".to_string()),
            Some("user".to_string()),
            Some("pass".to_string()),
        );
        assert!(matches!(auth, BitbucketAuth::Bearer(_)));

        let auth = BitbucketAuth::from_credentials(None, Some("user".to_string()), Some("pass".to_string()));
        assert!(matches!(auth, BitbucketAuth::Basic { .. }));

        let auth = BitbucketAuth::from_credentials(None, Some("user".to_string()), None);
        assert!(matches!(auth, BitbucketAuth::Anonymous));
    }

    #[test]
    fn test_map_repository_requires_clone_url() {
        // No links, no full_name, no workspace slug: entry is dropped.
        assert_eq!(map_repository(&json!({"slug": "alpha"})), None);

        let mapped = map_repository(&json!({
            "slug": "alpha",
            "workspace": {"slug": "wks"}
        }))
        .unwrap();
        assert_eq!(mapped.clone_url, "git@bitbucket.org:wks/alpha.git");
        // Blank name falls back to the slug.
        assert_eq!(mapped.name, "alpha");
    }

    #[tokio::test]
    async fn test_trigger_pipeline_posts_target_and_variables() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/repositories/wks/alpha/pipelines/")
                .json_body_partial(
                    r#"{"target": {"type": "pipeline_ref_target", "ref_type": "branch", "ref_name": "main"}}"#,
                );
            then.status(201).json_body(json!({
                "uuid": "{pipe-1}",
                "state": {"name": "PENDING"},
                "build_number": 7
            }));
        });

        let pipelines = BitbucketPipelines::new(
            Some(server.base_url()),
            BitbucketAuth::Anonymous,
            Duration::from_secs(5),
        )
        .unwrap();
        let triggered = pipelines
            .trigger_pipeline(
                "wks",
                "alpha",
                "main",
                None,
                &[PipelineVariable {
                    key: "SONAR_PROJECT_KEY".to_string(),
                    value: "wks_alpha".to_string(),
                    secured: false,
                }],
            )
            .await
            .unwrap();

        mock.assert();
        assert_eq!(triggered.uuid.as_deref(), Some("{pipe-1}"));
        assert_eq!(triggered.state.as_deref(), Some("PENDING"));
        assert_eq!(triggered.build_number, Some(7));
    }
}
