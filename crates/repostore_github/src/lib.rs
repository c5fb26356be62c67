//! # repostore GitHub adapter
//!
//! Stores a reducer-owned state as a JSON file on a GitHub branch, using the
//! Git data API as a compare-and-swap store.
//!
//! ## Storage Layout
//!
//! | Concept         | GitHub object                              |
//! |-----------------|--------------------------------------------|
//! | State           | Top-level file, base64 JSON blob           |
//! | Version         | Head commit SHA and its root tree SHA      |
//! | Compare-and-swap| Non-forced reference update                |
//! | Stale rejection | Refused reference update, head has moved   |
//!
//! ## Example
//!
//! ```rust,no_run
//! use repostore_engine::AsyncStore;
//! use repostore_github::{GithubConfig, GithubStorage};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = GithubConfig::new("token", "octocat", "notes", "notes.json");
//! let storage = Arc::new(GithubStorage::<Vec<String>>::connect(&config)?);
//! let store = AsyncStore::spawn(
//!     |mut notes: Vec<String>, note: &String| {
//!         notes.push(note.clone());
//!         notes
//!     },
//!     Vec::new(),
//!     Some(storage),
//!     Vec::new(),
//! );
//! store.dispatch("buy milk".to_string());
//! let notes = store.settled().await?;
//! # let _ = notes;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod api;
mod codec;
mod config;
mod error;
mod http;
mod storage;

pub use api::{
    Blob, Commit, EnsuredRepository, GithubApi, NewRepository, ObjectRef, Reference, RefUpdate,
    Repository, RepositoryId, Tree, TreeEntry, FILE_MODE,
};
pub use codec::{decode_blob, decode_payload, encode_payload};
pub use config::{GithubConfig, DEFAULT_API_URL, DEFAULT_MAX_PAYLOAD_BYTES, DEFAULT_REFERENCE};
pub use error::{GithubError, GithubResult};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, ReqwestClient};
pub use storage::{GithubStorage, GithubVersion};
