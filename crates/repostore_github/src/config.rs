//! Configuration for the GitHub storage adapter.

use crate::error::{GithubError, GithubResult};
use std::fmt;
use std::time::Duration;

/// Default GitHub REST API endpoint.
pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// Default branch holding the state file.
pub const DEFAULT_REFERENCE: &str = "master";

/// Default upper bound on the encoded JSON document (1 MiB).
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Configuration for a GitHub-backed store.
///
/// The access token lives here and is handed to the adapter explicitly;
/// nothing reads it from the process environment.
#[derive(Clone)]
pub struct GithubConfig {
    /// API base URL, without a trailing slash.
    pub api_url: String,
    /// OAuth or personal access token.
    pub token: String,
    /// Repository owner (user or organization login).
    pub owner: String,
    /// Repository name.
    pub repository: String,
    /// Branch name, without the `heads/` prefix.
    pub reference: String,
    /// Top-level file that holds the state. Must not contain `/`.
    pub filename: String,
    /// Commit message override.
    pub commit_message: Option<String>,
    /// `User-Agent` header (GitHub rejects requests without one).
    pub user_agent: String,
    /// Request timeout.
    pub timeout: Duration,
    /// Maximum size of the encoded JSON document.
    pub max_payload_bytes: usize,
}

impl GithubConfig {
    /// Creates a new configuration.
    pub fn new(
        token: impl Into<String>,
        owner: impl Into<String>,
        repository: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            token: token.into(),
            owner: owner.into(),
            repository: repository.into(),
            reference: DEFAULT_REFERENCE.to_string(),
            filename: filename.into(),
            commit_message: None,
            user_agent: concat!("repostore/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout: Duration::from_secs(30),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }

    /// Sets the API base URL.
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets the branch.
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = reference.into();
        self
    }

    /// Sets the commit message used for every push.
    pub fn with_commit_message(mut self, message: impl Into<String>) -> Self {
        self.commit_message = Some(message.into());
        self
    }

    /// Sets the `User-Agent` header.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the payload bound.
    pub fn with_max_payload_bytes(mut self, limit: usize) -> Self {
        self.max_payload_bytes = limit;
        self
    }

    /// Checks that the configuration addresses a single top-level file.
    ///
    /// Pushes write one entry into the root tree, so a nested path would be
    /// created as a file GitHub never resolves on pull.
    pub fn validate(&self) -> GithubResult<()> {
        let required = [
            ("owner", &self.owner),
            ("repository", &self.repository),
            ("reference", &self.reference),
            ("filename", &self.filename),
        ];
        if let Some((field, _)) = required.iter().find(|(_, value)| value.is_empty()) {
            return Err(GithubError::InvalidConfig(format!("{field} is empty")));
        }
        if self.filename.contains('/') || self.filename == "." || self.filename == ".." {
            return Err(GithubError::InvalidConfig(format!(
                "filename {:?} is not a top-level file",
                self.filename
            )));
        }
        Ok(())
    }

    /// Returns the commit message for a push.
    pub fn commit_message_for(&self) -> String {
        self.commit_message
            .clone()
            .unwrap_or_else(|| format!("Update \"{}\"", self.filename))
    }
}

impl fmt::Debug for GithubConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GithubConfig")
            .field("api_url", &self.api_url)
            .field("token", &"<redacted>")
            .field("owner", &self.owner)
            .field("repository", &self.repository)
            .field("reference", &self.reference)
            .field("filename", &self.filename)
            .field("commit_message", &self.commit_message)
            .field("user_agent", &self.user_agent)
            .field("timeout", &self.timeout)
            .field("max_payload_bytes", &self.max_payload_bytes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = GithubConfig::new("secret", "octocat", "notes", "notes.json");
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.reference, "master");
        assert_eq!(config.max_payload_bytes, 1024 * 1024);
        assert_eq!(config.commit_message_for(), "Update \"notes.json\"");
        assert!(config.user_agent.starts_with("repostore/"));
    }

    #[test]
    fn config_builder() {
        let config = GithubConfig::new("secret", "octocat", "notes", "notes.json")
            .with_api_url("https://github.example.com/api/v3/")
            .with_reference("main")
            .with_commit_message("sync")
            .with_timeout(Duration::from_secs(5))
            .with_max_payload_bytes(64);

        assert_eq!(config.api_url, "https://github.example.com/api/v3");
        assert_eq!(config.reference, "main");
        assert_eq!(config.commit_message_for(), "sync");
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.max_payload_bytes, 64);
    }

    #[test]
    fn nested_or_empty_paths_are_invalid() {
        let config = GithubConfig::new("secret", "octocat", "notes", "notes.json");
        assert!(config.validate().is_ok());

        for filename in ["data/state.json", "/state.json", "state.json/", "..", ""] {
            let config = GithubConfig::new("secret", "octocat", "notes", filename);
            assert!(
                matches!(config.validate(), Err(GithubError::InvalidConfig(_))),
                "{filename:?} accepted"
            );
        }

        let err = GithubConfig::new("secret", "octocat", "notes", "notes.json")
            .with_reference("")
            .validate()
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid configuration: reference is empty");
    }

    #[test]
    fn debug_redacts_token() {
        let config = GithubConfig::new("ghp_supersecret", "octocat", "notes", "notes.json");
        let debug = format!("{config:?}");
        assert!(!debug.contains("ghp_supersecret"));
        assert!(debug.contains("<redacted>"));
    }
}
