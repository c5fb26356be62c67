//! Typed access to the GitHub repository and Git data endpoints.
//!
//! Only the handful of endpoints the storage adapter needs are covered:
//! repositories, references, commits, trees and blobs.

use crate::config::GithubConfig;
use crate::error::{GithubError, GithubResult};
use crate::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

const ACCEPT: &str = "application/vnd.github.v3+json";
const API_VERSION: &str = "2022-11-28";

/// Mode of a regular, non-executable file in a Git tree.
pub const FILE_MODE: &str = "100644";

/// Owner and name of a repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepositoryId {
    /// Owner login.
    pub owner: String,
    /// Repository name.
    pub name: String,
}

impl RepositoryId {
    /// Creates a repository id.
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    fn path(&self) -> String {
        format!("/repos/{}/{}", self.owner, self.name)
    }
}

impl fmt::Display for RepositoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// A pointer to a Git object.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ObjectRef {
    /// Object SHA.
    pub sha: String,
}

/// A Git reference.
#[derive(Debug, Clone, Deserialize)]
pub struct Reference {
    /// Fully qualified name, e.g. `refs/heads/master`.
    #[serde(rename = "ref", default)]
    pub name: String,
    /// The commit the reference points at.
    pub object: ObjectRef,
}

/// A Git commit.
#[derive(Debug, Clone, Deserialize)]
pub struct Commit {
    /// Commit SHA.
    pub sha: String,
    /// Root tree.
    pub tree: ObjectRef,
    /// Parent commits.
    #[serde(default)]
    pub parents: Vec<ObjectRef>,
    /// Commit message.
    #[serde(default)]
    pub message: String,
}

/// One entry of a Git tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    /// Path relative to the tree.
    pub path: String,
    /// File mode.
    pub mode: String,
    /// `blob`, `tree` or `commit`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Object SHA.
    pub sha: String,
}

impl TreeEntry {
    /// Creates a regular file entry.
    pub fn file(path: impl Into<String>, blob_sha: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: FILE_MODE.to_string(),
            kind: "blob".to_string(),
            sha: blob_sha.into(),
        }
    }

    /// Returns true for blob entries.
    pub fn is_blob(&self) -> bool {
        self.kind == "blob"
    }
}

/// A Git tree listing.
#[derive(Debug, Clone, Deserialize)]
pub struct Tree {
    /// Tree SHA.
    pub sha: String,
    /// Entries.
    #[serde(default)]
    pub tree: Vec<TreeEntry>,
    /// Set by GitHub when the listing was cut short.
    #[serde(default)]
    pub truncated: bool,
}

impl Tree {
    /// Finds an entry by path.
    pub fn find(&self, path: &str) -> Option<&TreeEntry> {
        self.tree.iter().find(|entry| entry.path == path)
    }
}

/// A Git blob.
#[derive(Debug, Clone, Deserialize)]
pub struct Blob {
    /// Content, in `encoding`.
    pub content: String,
    /// `base64` or `utf-8`.
    pub encoding: String,
}

/// A repository.
#[derive(Debug, Clone, Deserialize)]
pub struct Repository {
    /// Name.
    pub name: String,
    /// `owner/name`.
    #[serde(default)]
    pub full_name: String,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// Whether the repository is private.
    #[serde(default)]
    pub private: bool,
    /// Default branch.
    #[serde(default)]
    pub default_branch: Option<String>,
}

/// Parameters for creating a repository.
#[derive(Debug, Clone, Serialize)]
pub struct NewRepository {
    /// Name.
    pub name: String,
    /// Description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the repository is private.
    pub private: bool,
    /// Whether GitHub creates an initial commit.
    pub auto_init: bool,
}

impl NewRepository {
    /// A private repository with an initial commit.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            private: true,
            auto_init: true,
        }
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Result of [`GithubApi::ensure_repository`].
#[derive(Debug, Clone)]
pub struct EnsuredRepository {
    /// The existing or newly created repository.
    pub repository: Repository,
    /// Whether it was created.
    pub created: bool,
}

impl EnsuredRepository {
    /// Returns the default branch, if GitHub reported one.
    pub fn default_branch(&self) -> Option<&str> {
        self.repository.default_branch.as_deref()
    }
}

/// Result of moving a reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefUpdate {
    /// The reference now points at the given commit.
    Updated(String),
    /// GitHub refused the move (422 or 409), most often because the branch
    /// is no longer at the new commit's parent.
    Refused(String),
}

#[derive(Serialize)]
struct NewBlob<'a> {
    content: &'a str,
    encoding: &'a str,
}

#[derive(Serialize)]
struct NewTree<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    base_tree: Option<&'a str>,
    tree: &'a [TreeEntry],
}

#[derive(Serialize)]
struct NewCommit<'a> {
    message: &'a str,
    tree: &'a str,
    parents: &'a [&'a str],
}

#[derive(Serialize)]
struct RefPatch<'a> {
    sha: &'a str,
    force: bool,
}

#[derive(Deserialize)]
struct Created {
    sha: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// GitHub REST client over an [`HttpClient`].
pub struct GithubApi<C> {
    client: C,
    api_url: String,
    token: String,
    user_agent: String,
}

impl<C> fmt::Debug for GithubApi<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GithubApi")
            .field("api_url", &self.api_url)
            .field("user_agent", &self.user_agent)
            .finish_non_exhaustive()
    }
}

impl<C: HttpClient> GithubApi<C> {
    /// Creates a client using the endpoint, token and user agent of `config`.
    pub fn new(client: C, config: &GithubConfig) -> Self {
        Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            user_agent: config.user_agent.clone(),
        }
    }

    /// Returns the underlying HTTP client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Fetches a repository.
    pub async fn get_repository(&self, repo: &RepositoryId) -> GithubResult<Repository> {
        self.get(&repo.path()).await
    }

    /// Creates a repository owned by the authenticated user.
    pub async fn create_repository(&self, params: &NewRepository) -> GithubResult<Repository> {
        self.send_json(HttpMethod::Post, "/user/repos", params).await
    }

    /// Creates the repository if it does not exist.
    pub async fn ensure_repository(
        &self,
        repo: &RepositoryId,
        params: &NewRepository,
    ) -> GithubResult<EnsuredRepository> {
        match self.get_repository(repo).await {
            Ok(repository) => Ok(EnsuredRepository {
                repository,
                created: false,
            }),
            Err(err) if err.is_not_found() => {
                let repository = self.create_repository(params).await?;
                info!(
                    repository = %repository.full_name,
                    default_branch = ?repository.default_branch,
                    "created repository"
                );
                Ok(EnsuredRepository {
                    repository,
                    created: true,
                })
            }
            Err(err) => Err(err),
        }
    }

    /// Fetches a branch head.
    pub async fn get_reference(
        &self,
        repo: &RepositoryId,
        branch: &str,
    ) -> GithubResult<Reference> {
        self.get(&format!("{}/git/ref/heads/{branch}", repo.path())).await
    }

    /// Fetches a commit.
    pub async fn get_commit(&self, repo: &RepositoryId, sha: &str) -> GithubResult<Commit> {
        self.get(&format!("{}/git/commits/{sha}", repo.path())).await
    }

    /// Fetches a tree (non-recursive).
    pub async fn get_tree(&self, repo: &RepositoryId, sha: &str) -> GithubResult<Tree> {
        self.get(&format!("{}/git/trees/{sha}", repo.path())).await
    }

    /// Fetches a blob.
    pub async fn get_blob(&self, repo: &RepositoryId, sha: &str) -> GithubResult<Blob> {
        self.get(&format!("{}/git/blobs/{sha}", repo.path())).await
    }

    /// Uploads base64 content as a blob and returns its SHA.
    pub async fn create_blob(&self, repo: &RepositoryId, content: &str) -> GithubResult<String> {
        let body = NewBlob {
            content,
            encoding: "base64",
        };
        let created: Created = self
            .send_json(HttpMethod::Post, &format!("{}/git/blobs", repo.path()), &body)
            .await?;
        Ok(created.sha)
    }

    /// Creates a tree from `base_tree` with `entries` added or replaced.
    pub async fn create_tree(
        &self,
        repo: &RepositoryId,
        base_tree: Option<&str>,
        entries: &[TreeEntry],
    ) -> GithubResult<Tree> {
        let body = NewTree {
            base_tree,
            tree: entries,
        };
        self.send_json(HttpMethod::Post, &format!("{}/git/trees", repo.path()), &body)
            .await
    }

    /// Creates a commit.
    pub async fn create_commit(
        &self,
        repo: &RepositoryId,
        message: &str,
        tree: &str,
        parents: &[&str],
    ) -> GithubResult<Commit> {
        let body = NewCommit {
            message,
            tree,
            parents,
        };
        self.send_json(HttpMethod::Post, &format!("{}/git/commits", repo.path()), &body)
            .await
    }

    /// Moves a branch to `sha` without forcing.
    ///
    /// A 422 or 409 answer is [`RefUpdate::Refused`] with GitHub's message.
    pub async fn update_reference(
        &self,
        repo: &RepositoryId,
        branch: &str,
        sha: &str,
    ) -> GithubResult<RefUpdate> {
        let body = RefPatch { sha, force: false };
        let path = format!("{}/git/refs/heads/{branch}", repo.path());
        match self
            .send_json::<_, Reference>(HttpMethod::Patch, &path, &body)
            .await
        {
            Ok(reference) => Ok(RefUpdate::Updated(reference.object.sha)),
            Err(GithubError::Api {
                status: 409 | 422,
                message,
            }) => Ok(RefUpdate::Refused(message)),
            Err(err) => Err(err),
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> GithubResult<T> {
        let response = self.execute(HttpMethod::Get, path, None).await?;
        decode(&response)
    }

    async fn send_json<B, T>(&self, method: HttpMethod, path: &str, body: &B) -> GithubResult<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let bytes = serde_json::to_vec(body).map_err(|e| GithubError::Encode(e.to_string()))?;
        let response = self.execute(method, path, Some(bytes)).await?;
        decode(&response)
    }

    async fn execute(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> GithubResult<HttpResponse> {
        let mut request = HttpRequest::new(method, format!("{}{path}", self.api_url))
            .with_header("Accept", ACCEPT)
            .with_header("User-Agent", self.user_agent.as_str())
            .with_header("X-GitHub-Api-Version", API_VERSION);
        if !self.token.is_empty() {
            request = request.with_header("Authorization", format!("token {}", self.token));
        }
        if let Some(body) = body {
            request = request
                .with_header("Content-Type", "application/json")
                .with_body(body);
        }

        debug!(method = method.as_str(), path, "GitHub request");
        let response = self
            .client
            .send(request)
            .await
            .map_err(GithubError::Transport)?;
        debug!(status = response.status, path, "GitHub response");

        if response.is_success() {
            Ok(response)
        } else {
            Err(api_error(&response))
        }
    }
}

fn decode<T: DeserializeOwned>(response: &HttpResponse) -> GithubResult<T> {
    serde_json::from_slice(&response.body).map_err(|e| GithubError::Decode(e.to_string()))
}

fn api_error(response: &HttpResponse) -> GithubError {
    let message = serde_json::from_slice::<ErrorBody>(&response.body)
        .ok()
        .and_then(|body| body.message)
        .unwrap_or_else(|| format!("HTTP {}", response.status));
    GithubError::Api {
        status: response.status,
        message,
    }
}
