//! CLI command implementations.

pub mod document;
pub mod get;
pub mod set;
pub mod unset;

use document::{Document, Edit};
use repostore_engine::{AsyncStore, Storage, StoreResult};
use repostore_github::{
    GithubApi, GithubConfig, GithubStorage, NewRepository, RepositoryId, ReqwestClient,
    DEFAULT_REFERENCE,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Where the document lives.
pub struct Target {
    /// Repository, branch and file.
    pub config: GithubConfig,
    /// Branch given on the command line.
    pub branch: Option<String>,
    /// Create the repository when it is missing.
    pub create_repo: bool,
}

/// Command failures that are not storage errors.
#[derive(Error, Debug)]
pub enum CommandError {
    /// The document has no such key.
    #[error("key {0:?} not found")]
    KeyNotFound(String),
}

/// Connects to the target and applies `edits` to its document.
pub async fn edit(
    target: &Target,
    edits: Vec<Edit>,
) -> Result<Document, Box<dyn std::error::Error>> {
    target.config.validate()?;
    let client = Arc::new(ReqwestClient::new(target.config.timeout)?);
    let mut config = target.config.clone();

    if target.create_repo {
        let api = GithubApi::new(Arc::clone(&client), &config);
        let repository = RepositoryId::new(config.owner.as_str(), config.repository.as_str());
        let params = NewRepository::new(config.repository.as_str())
            .with_description(format!("{} managed by repostore", config.filename));
        let ensured = api.ensure_repository(&repository, &params).await?;
        if ensured.created {
            println!("✓ Created repository {repository}");
        }
        config.reference = branch_for(target.branch.as_deref(), ensured.default_branch());
        info!(branch = %config.reference, "using branch");
    }

    let storage = Arc::new(GithubStorage::<Document, _>::new(client, &config)?);
    Ok(reconcile(storage, edits).await?)
}

/// Picks the branch to edit: the requested one, else the repository's
/// default branch, else [`DEFAULT_REFERENCE`].
fn branch_for(requested: Option<&str>, default_branch: Option<&str>) -> String {
    requested
        .or(default_branch)
        .unwrap_or(DEFAULT_REFERENCE)
        .to_string()
}

/// Runs one store over `storage` until `edits` are persisted.
pub async fn reconcile<S>(storage: Arc<S>, edits: Vec<Edit>) -> StoreResult<Document>
where
    S: Storage<Document> + 'static,
{
    let store = AsyncStore::spawn(
        document::apply,
        Document::new(),
        Some(storage),
        Document::new(),
    );
    for edit in edits {
        store.dispatch(edit);
    }

    let document = store.settled().await?;
    let stats = store.stats();
    info!(
        pulls = stats.pulls,
        pushes = stats.pushes,
        rejections = stats.rejections,
        "document settled"
    );
    Ok(document)
}

/// Prints a JSON value.
pub fn print(value: &serde_json::Value) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
