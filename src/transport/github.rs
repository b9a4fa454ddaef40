//! GitHub REST transport
//!
//! drives the git data endpoints (`/git/blobs`, `/git/trees`,
//! `/git/commits`, `/git/refs`) plus the repository metadata endpoints.
//! no client or rate-limit state is global: everything lives on the
//! [`GithubStore`] instance handed to the deployer.

use std::fmt;

use async_trait::async_trait;
use base64::Engine;
use parking_lot::Mutex;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::hash::ObjectId;
use crate::transport::{RemoteStore, RepositoryInfo};
use crate::types::{CommitSpec, RepoFullName, TreeSpec, Visibility};

const ACCEPT: &str = "application/vnd.github+json";
const API_VERSION: &str = "2022-11-28";

/// opaque access token; never printed
#[derive(Clone)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// last rate-limit window reported by the host
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimit {
    pub remaining: u64,
    /// unix seconds at which the window resets
    pub reset: u64,
}

/// remote store backed by the GitHub REST API
pub struct GithubStore {
    client: reqwest::Client,
    api: Url,
    credential: Credential,
    rate_limit: Mutex<Option<RateLimit>>,
}

impl GithubStore {
    pub fn new(config: &ApiConfig, credential: Credential) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(std::time::Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;

        Ok(Self {
            client,
            api: api_base(&config.base_url)?,
            credential,
            rate_limit: Mutex::new(None),
        })
    }

    /// last observed rate-limit window
    pub fn rate_limit(&self) -> Option<RateLimit> {
        *self.rate_limit.lock()
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let url = self.api.join(path)?;
        Ok(self.request_url(method, url))
    }

    fn request_url(&self, method: Method, url: Url) -> RequestBuilder {
        self
            .client
            .request(method, url)
            .bearer_auth(self.credential.expose())
            .header(reqwest::header::ACCEPT, ACCEPT)
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    async fn send(&self, operation: &'static str, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await.map_err(|e| Error::Transport {
            status: e.status().map(|s| s.as_u16()),
            message: format!("{}: {}", operation, e),
        })?;

        if let Some(limit) = read_rate_limit(&response) {
            *self.rate_limit.lock() = Some(limit);
        }
        tracing::debug!(operation, status = response.status().as_u16(), "github response");
        Ok(response)
    }

    /// turn a non-success response into a transport error
    async fn failure(&self, operation: &'static str, response: Response) -> Error {
        let status = response.status();
        let message = error_message(response).await;
        Error::Transport {
            status: Some(status.as_u16()),
            message: describe_failure(operation, status, &message, self.rate_limit()),
        }
    }

    async fn create_object<B: Serialize + ?Sized>(
        &self,
        operation: &'static str,
        path: &str,
        body: &B,
    ) -> Result<ObjectId> {
        let response = self
            .send(operation, self.request(Method::POST, path)?.json(body))
            .await?;
        if !response.status().is_success() {
            return Err(self.failure(operation, response).await);
        }
        let created: ShaResponse = response.json().await?;
        ObjectId::parse(&created.sha)
    }
}

fn api_base(base_url: &str) -> Result<Url> {
    // Url::join drops the last path segment unless the base ends in '/'
    let mut base = base_url.trim_end_matches('/').to_string();
    base.push('/');
    Ok(Url::parse(&base)?)
}

/// `<api>/repos/<owner>/<name>/git/<kind>/heads/<branch>` with every
/// branch segment percent-encoded
fn branch_url(api: &Url, repo: &RepoFullName, kind: &str, branch: &str) -> Result<Url> {
    let mut url = api.join(&repo_path(repo, &format!("git/{}/heads", kind)))?;
    url.path_segments_mut()
        .map_err(|_| Error::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
        .extend(branch.split('/'));
    Ok(url)
}

fn describe_failure(
    operation: &str,
    status: StatusCode,
    message: &str,
    rate_limit: Option<RateLimit>,
) -> String {
    let mut text = format!("{}: {}", operation, message);
    if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
        if let Some(limit) = rate_limit {
            text.push_str(&format!(
                " (rate limit remaining {}, resets at {})",
                limit.remaining, limit.reset
            ));
        }
    }
    // the git data endpoints refuse object writes until a first commit exists
    if status == StatusCode::CONFLICT && message.to_ascii_lowercase().contains("is empty") {
        text.push_str(
            " (the host cannot store objects in a repository without commits; \
             push an initial commit first)",
        );
    }
    text
}

fn read_rate_limit(response: &Response) -> Option<RateLimit> {
    let header = |name: &str| -> Option<u64> {
        response.headers().get(name)?.to_str().ok()?.parse().ok()
    };
    Some(RateLimit {
        remaining: header("x-ratelimit-remaining")?,
        reset: header("x-ratelimit-reset")?,
    })
}

async fn error_message(response: Response) -> String {
    let status = response.status();
    match response.text().await {
        Ok(body) => match serde_json::from_str::<ErrorBody>(&body) {
            Ok(parsed) => parsed.message,
            Err(_) if body.is_empty() => status.to_string(),
            Err(_) => body,
        },
        Err(_) => status.to_string(),
    }
}

fn repo_path(repo: &RepoFullName, rest: &str) -> String {
    format!("repos/{}/{}/{}", repo.owner(), repo.name(), rest)
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ShaResponse {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RepoResponse {
    full_name: String,
    default_branch: Option<String>,
    html_url: String,
}

impl RepoResponse {
    fn into_info(self, fallback_branch: &str) -> Result<RepositoryInfo> {
        Ok(RepositoryInfo {
            full_name: self.full_name.parse()?,
            default_branch: self
                .default_branch
                .unwrap_or_else(|| fallback_branch.to_string()),
            html_url: self.html_url,
        })
    }
}

#[derive(Debug, Serialize)]
struct CreateRepoRequest<'a> {
    name: &'a str,
    private: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    auto_init: bool,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct BlobRequest {
    content: String,
    encoding: &'static str,
}

impl BlobRequest {
    /// text goes as utf-8, anything else base64
    fn new(content: &[u8]) -> Self {
        match std::str::from_utf8(content) {
            Ok(text) => Self {
                content: text.to_string(),
                encoding: "utf-8",
            },
            Err(_) => Self {
                content: base64::engine::general_purpose::STANDARD.encode(content),
                encoding: "base64",
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct TreeItem<'a> {
    path: &'a str,
    mode: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
    sha: &'a str,
}

#[derive(Debug, Serialize)]
struct TreeRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    base_tree: Option<&'a str>,
    tree: Vec<TreeItem<'a>>,
}

impl<'a> TreeRequest<'a> {
    fn new(spec: &'a TreeSpec) -> Self {
        Self {
            base_tree: spec.base.as_ref().map(|b| b.as_str()),
            tree: spec
                .entries
                .iter()
                .map(|e| TreeItem {
                    path: e.path.as_str(),
                    mode: e.mode.as_git_mode(),
                    kind: "blob",
                    sha: e.id.as_str(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct CommitRequest<'a> {
    message: &'a str,
    tree: &'a str,
    parents: Vec<&'a str>,
}

impl<'a> CommitRequest<'a> {
    fn new(spec: &'a CommitSpec) -> Self {
        Self {
            message: &spec.message,
            tree: spec.tree.as_str(),
            parents: spec.parent.iter().map(|p| p.as_str()).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    tree: ShaResponse,
}

#[derive(Debug, Deserialize)]
struct RefResponse {
    object: ShaResponse,
}

#[derive(Debug, Serialize)]
struct CreateRefRequest<'a> {
    #[serde(rename = "ref")]
    name: String,
    sha: &'a str,
}

#[derive(Debug, Serialize)]
struct UpdateRefRequest<'a> {
    sha: &'a str,
    force: bool,
}

#[async_trait]
impl RemoteStore for GithubStore {
    async fn authenticated_owner(&self) -> Result<String> {
        let response = self
            .send("authenticated_owner", self.request(Method::GET, "user")?)
            .await?;
        if !response.status().is_success() {
            return Err(self.failure("authenticated_owner", response).await);
        }
        let user: UserResponse = response.json().await?;
        Ok(user.login)
    }

    async fn repository(&self, full_name: &RepoFullName) -> Result<Option<RepositoryInfo>> {
        let path = format!("repos/{}/{}", full_name.owner(), full_name.name());
        let response = self
            .send("repository", self.request(Method::GET, &path)?)
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(self.failure("repository", response).await);
        }
        let repo: RepoResponse = response.json().await?;
        repo.into_info(crate::config::DEFAULT_BRANCH).map(Some)
    }

    async fn create_repository(
        &self,
        name: &str,
        visibility: Visibility,
        description: Option<&str>,
    ) -> Result<RepositoryInfo> {
        let body = CreateRepoRequest {
            name,
            private: visibility.is_private(),
            description,
            auto_init: false,
        };
        let response = self
            .send(
                "create_repository",
                self.request(Method::POST, "user/repos")?.json(&body),
            )
            .await?;
        if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            let message = error_message(response).await;
            tracing::debug!(%message, "repository creation rejected");
            return Err(Error::NameConflict(name.to_string()));
        }
        if !response.status().is_success() {
            return Err(self.failure("create_repository", response).await);
        }
        let repo: RepoResponse = response.json().await?;
        repo.into_info(crate::config::DEFAULT_BRANCH)
    }

    async fn read_ref(&self, repo: &RepoFullName, branch: &str) -> Result<Option<ObjectId>> {
        let url = branch_url(&self.api, repo, "ref", branch)?;
        let response = self
            .send("read_ref", self.request_url(Method::GET, url))
            .await?;
        // 409 is what an empty repository answers
        if matches!(
            response.status(),
            StatusCode::NOT_FOUND | StatusCode::CONFLICT
        ) {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(self.failure("read_ref", response).await);
        }
        let found: RefResponse = response.json().await?;
        ObjectId::parse(&found.object.sha).map(Some)
    }

    async fn commit_tree(&self, repo: &RepoFullName, commit: &ObjectId) -> Result<ObjectId> {
        let path = repo_path(repo, &format!("git/commits/{}", commit));
        let response = self
            .send("commit_tree", self.request(Method::GET, &path)?)
            .await?;
        if !response.status().is_success() {
            return Err(self.failure("commit_tree", response).await);
        }
        let found: CommitResponse = response.json().await?;
        ObjectId::parse(&found.tree.sha)
    }

    async fn create_blob(&self, repo: &RepoFullName, content: &[u8]) -> Result<ObjectId> {
        let body = BlobRequest::new(content);
        self.create_object("create_blob", &repo_path(repo, "git/blobs"), &body)
            .await
    }

    async fn create_tree(&self, repo: &RepoFullName, spec: &TreeSpec) -> Result<ObjectId> {
        let body = TreeRequest::new(spec);
        self.create_object("create_tree", &repo_path(repo, "git/trees"), &body)
            .await
    }

    async fn create_commit(&self, repo: &RepoFullName, spec: &CommitSpec) -> Result<ObjectId> {
        let body = CommitRequest::new(spec);
        self.create_object("create_commit", &repo_path(repo, "git/commits"), &body)
            .await
    }

    async fn create_ref(
        &self,
        repo: &RepoFullName,
        branch: &str,
        target: &ObjectId,
    ) -> Result<()> {
        let body = CreateRefRequest {
            name: format!("refs/heads/{}", branch),
            sha: target.as_str(),
        };
        let response = self
            .send(
                "create_ref",
                self.request(Method::POST, &repo_path(repo, "git/refs"))?
                    .json(&body),
            )
            .await?;
        if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            let message = error_message(response).await;
            if message.to_ascii_lowercase().contains("already exists") {
                return Err(Error::RefAlreadyExists {
                    branch: branch.to_string(),
                });
            }
            return Err(Error::Transport {
                status: Some(422),
                message: format!("create_ref: {}", message),
            });
        }
        if !response.status().is_success() {
            return Err(self.failure("create_ref", response).await);
        }
        Ok(())
    }

    /// the REST endpoint has no compare-and-swap; `force: false` makes it
    /// fast-forward only instead. `target`'s single parent is `expected`,
    /// so the host accepts the move only while the branch still sits at
    /// `expected`.
    async fn update_ref(
        &self,
        repo: &RepoFullName,
        branch: &str,
        target: &ObjectId,
        expected: &ObjectId,
    ) -> Result<()> {
        let body = UpdateRefRequest {
            sha: target.as_str(),
            force: false,
        };
        let url = branch_url(&self.api, repo, "refs", branch)?;
        let response = self
            .send("update_ref", self.request_url(Method::PATCH, url).json(&body))
            .await?;
        if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            let message = error_message(response).await;
            if message.to_ascii_lowercase().contains("fast forward") {
                return Err(Error::FastForwardConflict {
                    branch: branch.to_string(),
                    expected: expected.clone(),
                });
            }
            return Err(Error::Transport {
                status: Some(422),
                message: format!("update_ref: {}", message),
            });
        }
        if !response.status().is_success() {
            return Err(self.failure("update_ref", response).await);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::compute_blob_id;
    use crate::types::{FileMode, RelativePath, TreeEntry};

    #[test]
    fn test_credential_debug_is_redacted() {
        let c = Credential::new("ghp_secret");
        assert_eq!(format!("{:?}", c), "Credential(***)");
    }

    #[test]
    fn test_api_base_keeps_prefix() {
        let base = api_base("https://ghe.example.com/api/v3").unwrap();
        let url = base.join("repos/user/hub/git/blobs").unwrap();
        assert_eq!(url.as_str(), "https://ghe.example.com/api/v3/repos/user/hub/git/blobs");

        let base = api_base("https://api.github.com/").unwrap();
        assert_eq!(base.join("user").unwrap().as_str(), "https://api.github.com/user");
    }

    #[test]
    fn test_repo_path() {
        let repo: RepoFullName = "user/hub".parse().unwrap();
        assert_eq!(
            repo_path(&repo, "git/ref/heads/main"),
            "repos/user/hub/git/ref/heads/main"
        );
    }

    #[test]
    fn test_blob_request_encoding() {
        let text = BlobRequest::new("# Hi".as_bytes());
        assert_eq!(text.encoding, "utf-8");
        assert_eq!(text.content, "# Hi");

        let binary = BlobRequest::new(&[0xff, 0x00, 0x89]);
        assert_eq!(binary.encoding, "base64");
        assert_eq!(binary.content, "/wCJ");
    }

    #[test]
    fn test_tree_request_shape() {
        let id = compute_blob_id(b"x");
        let spec = TreeSpec::layered(
            compute_blob_id(b"base"),
            vec![TreeEntry::new(
                RelativePath::parse("skills/demo/run.sh").unwrap(),
                FileMode::Executable,
                id.clone(),
            )],
        );
        let json = serde_json::to_value(TreeRequest::new(&spec)).unwrap();
        assert_eq!(json["base_tree"], compute_blob_id(b"base").as_str());
        assert_eq!(json["tree"][0]["path"], "skills/demo/run.sh");
        assert_eq!(json["tree"][0]["mode"], "100755");
        assert_eq!(json["tree"][0]["type"], "blob");
        assert_eq!(json["tree"][0]["sha"], id.as_str());

        let snapshot = TreeSpec::snapshot(vec![]);
        let json = serde_json::to_value(TreeRequest::new(&snapshot)).unwrap();
        assert!(json.get("base_tree").is_none());
    }

    #[test]
    fn test_commit_request_parents() {
        let tree = compute_blob_id(b"tree");
        let root = CommitSpec::new(tree.clone(), None, "msg");
        let json = serde_json::to_value(CommitRequest::new(&root)).unwrap();
        assert_eq!(json["parents"], serde_json::json!([]));

        let parent = compute_blob_id(b"parent");
        let child = CommitSpec::new(tree, Some(parent.clone()), "msg");
        let json = serde_json::to_value(CommitRequest::new(&child)).unwrap();
        assert_eq!(json["parents"], serde_json::json!([parent.as_str()]));
    }

    #[test]
    fn test_update_ref_never_forces() {
        let body = UpdateRefRequest {
            sha: "abc",
            force: false,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["force"], false);
    }

    #[test]
    fn test_branch_url_encodes_segments() {
        let api = api_base("https://api.github.com").unwrap();
        let repo: RepoFullName = "user/hub".parse().unwrap();

        let url = branch_url(&api, &repo, "ref", "feat/x").unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.github.com/repos/user/hub/git/ref/heads/feat/x"
        );

        let url = branch_url(&api, &repo, "refs", "feat#1/50%").unwrap();
        assert_eq!(url.fragment(), None);
        assert_eq!(
            url.as_str(),
            "https://api.github.com/repos/user/hub/git/refs/heads/feat%231/50%25"
        );
    }

    #[test]
    fn test_describe_empty_repository_failure() {
        let text = describe_failure(
            "create_blob",
            StatusCode::CONFLICT,
            "Git Repository is empty.",
            None,
        );
        assert!(text.starts_with("create_blob: Git Repository is empty."));
        assert!(text.contains("without commits"));

        let other = describe_failure("create_blob", StatusCode::CONFLICT, "conflict", None);
        assert_eq!(other, "create_blob: conflict");
    }

    #[test]
    fn test_describe_rate_limited_failure() {
        let limit = RateLimit {
            remaining: 0,
            reset: 1700000000,
        };
        let text = describe_failure("create_tree", StatusCode::FORBIDDEN, "limited", Some(limit));
        assert_eq!(
            text,
            "create_tree: limited (rate limit remaining 0, resets at 1700000000)"
        );
        let text = describe_failure("create_tree", StatusCode::NOT_FOUND, "gone", Some(limit));
        assert_eq!(text, "create_tree: gone");
    }

    #[test]
    fn test_repo_response_into_info() {
        let raw = r#"{"full_name":"user/demo","default_branch":null,"html_url":"https://github.com/user/demo"}"#;
        let repo: RepoResponse = serde_json::from_str(raw).unwrap();
        let info = repo.into_info("main").unwrap();
        assert_eq!(info.full_name.to_string(), "user/demo");
        assert_eq!(info.default_branch, "main");
    }
}
