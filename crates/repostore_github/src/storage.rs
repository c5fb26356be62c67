//! [`Storage`] implementation over a GitHub branch.
//!
//! A state is a single top-level file on a branch. The version is the head
//! commit together with its root tree. A push writes a blob, a tree based on
//! the version's tree and a commit whose only parent is the version's
//! commit, then moves the branch without forcing. When GitHub refuses that
//! move the head is read again: a head that advanced past the version is a
//! stale rejection, an unchanged head means the refusal has another cause and
//! is reported as an error.

use crate::api::{GithubApi, RefUpdate, RepositoryId, TreeEntry};
use crate::codec;
use crate::config::GithubConfig;
use crate::error::{GithubError, GithubResult};
use crate::http::{HttpClient, ReqwestClient};
use async_trait::async_trait;
use repostore_engine::{PushOutcome, Snapshot, Storage, StorageResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::marker::PhantomData;
use tracing::{debug, info, warn};

/// Version of a GitHub-stored state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GithubVersion {
    /// Head commit.
    pub commit_sha: String,
    /// Root tree of the head commit.
    pub tree_sha: String,
}

impl fmt::Display for GithubVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.commit_sha.get(..7).unwrap_or(&self.commit_sha);
        f.write_str(short)
    }
}

/// Stores a JSON-serializable state in a file on a GitHub branch.
pub struct GithubStorage<St, C = ReqwestClient> {
    api: GithubApi<C>,
    repository: RepositoryId,
    reference: String,
    filename: String,
    commit_message: String,
    max_payload_bytes: usize,
    _state: PhantomData<fn() -> St>,
}

impl<St> GithubStorage<St, ReqwestClient> {
    /// Creates a storage talking to GitHub over the network.
    pub fn connect(config: &GithubConfig) -> GithubResult<Self> {
        let client = ReqwestClient::new(config.timeout)?;
        Self::new(client, config)
    }
}

impl<St, C: HttpClient> GithubStorage<St, C> {
    /// Creates a storage over the given HTTP client.
    ///
    /// Fails with [`GithubError::InvalidConfig`] unless `config` names a
    /// top-level file.
    pub fn new(client: C, config: &GithubConfig) -> GithubResult<Self> {
        config.validate()?;
        Ok(Self {
            api: GithubApi::new(client, config),
            repository: RepositoryId::new(config.owner.as_str(), config.repository.as_str()),
            reference: config.reference.clone(),
            filename: config.filename.clone(),
            commit_message: config.commit_message_for(),
            max_payload_bytes: config.max_payload_bytes,
            _state: PhantomData,
        })
    }

    /// Returns the API client.
    pub fn api(&self) -> &GithubApi<C> {
        &self.api
    }

    /// Returns the repository.
    pub fn repository(&self) -> &RepositoryId {
        &self.repository
    }
}

impl<St, C> GithubStorage<St, C>
where
    St: Serialize + DeserializeOwned + Send + 'static,
    C: HttpClient,
{
    async fn fetch(&self, default_state: St) -> GithubResult<Snapshot<St, GithubVersion>> {
        let head = self
            .api
            .get_reference(&self.repository, &self.reference)
            .await?;
        let commit = self.api.get_commit(&self.repository, &head.object.sha).await?;
        let tree = self.api.get_tree(&self.repository, &commit.tree.sha).await?;
        if tree.truncated {
            return Err(GithubError::TooManyFiles);
        }

        let version = GithubVersion {
            commit_sha: commit.sha,
            tree_sha: commit.tree.sha,
        };

        let state = match tree.find(&self.filename) {
            None => {
                debug!(file = %self.filename, %version, "state file absent");
                default_state
            }
            Some(entry) if !entry.is_blob() => {
                return Err(GithubError::Decode(format!(
                    "{} is a {}, not a file",
                    entry.path, entry.kind
                )));
            }
            Some(entry) => {
                let blob = self.api.get_blob(&self.repository, &entry.sha).await?;
                codec::decode_blob(&blob)?
            }
        };

        debug!(repository = %self.repository, %version, "pulled");
        Ok(Snapshot::new(state, version))
    }

    async fn commit(
        &self,
        state: St,
        base: GithubVersion,
    ) -> GithubResult<PushOutcome<St, GithubVersion>> {
        let content = codec::encode_payload(&state, self.max_payload_bytes)?;

        let blob_sha = self.api.create_blob(&self.repository, &content).await?;
        let tree = self
            .api
            .create_tree(
                &self.repository,
                Some(&base.tree_sha),
                &[TreeEntry::file(self.filename.as_str(), blob_sha)],
            )
            .await?;
        if tree.truncated {
            return Err(GithubError::TooManyFiles);
        }
        let commit = self
            .api
            .create_commit(
                &self.repository,
                &self.commit_message,
                &tree.sha,
                &[base.commit_sha.as_str()],
            )
            .await?;

        match self
            .api
            .update_reference(&self.repository, &self.reference, &commit.sha)
            .await?
        {
            RefUpdate::Updated(_) => {
                let version = GithubVersion {
                    commit_sha: commit.sha,
                    tree_sha: tree.sha,
                };
                info!(repository = %self.repository, base = %base, %version, "pushed");
                Ok(PushOutcome::Accepted(Snapshot::new(state, version)))
            }
            RefUpdate::Refused(message) => self.classify_refusal(&base, message).await,
        }
    }

    async fn classify_refusal(
        &self,
        base: &GithubVersion,
        message: String,
    ) -> GithubResult<PushOutcome<St, GithubVersion>> {
        let head = self
            .api
            .get_reference(&self.repository, &self.reference)
            .await?;
        if head.object.sha == base.commit_sha {
            warn!(repository = %self.repository, %base, %message, "reference update refused");
            return Err(GithubError::RefUpdateRefused(message));
        }
        debug!(repository = %self.repository, %base, %message, "push rejected as stale");
        Ok(PushOutcome::Rejected)
    }
}

#[async_trait]
impl<St, C> Storage<St> for GithubStorage<St, C>
where
    St: Serialize + DeserializeOwned + Send + 'static,
    C: HttpClient,
{
    type Version = GithubVersion;

    async fn pull(&self, default_state: St) -> StorageResult<Snapshot<St, GithubVersion>> {
        Ok(self.fetch(default_state).await?)
    }

    async fn push(
        &self,
        state: St,
        base_version: GithubVersion,
    ) -> StorageResult<PushOutcome<St, GithubVersion>> {
        Ok(self.commit(state, base_version).await?)
    }
}

impl<St, C> fmt::Debug for GithubStorage<St, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GithubStorage")
            .field("repository", &self.repository)
            .field("reference", &self.reference)
            .field("filename", &self.filename)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_display_is_short_sha() {
        let version = GithubVersion {
            commit_sha: "0123456789abcdef".into(),
            tree_sha: "fedcba".into(),
        };
        assert_eq!(version.to_string(), "0123456");

        let short = GithubVersion {
            commit_sha: "abc".into(),
            tree_sha: String::new(),
        };
        assert_eq!(short.to_string(), "abc");
    }
}
