//! Integration tests for the GitHub storage against an in-memory fake of
//! the Git data API.

use repostore_engine::{AsyncStore, PushOutcome, ReadyState, Storage, StorageError, StoreError};
use repostore_github::{
    GithubConfig, GithubError, GithubStorage, GithubVersion, HttpMethod, NewRepository,
};
use std::sync::Arc;

mod fake {
    use async_trait::async_trait;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use parking_lot::Mutex;
    use repostore_github::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
    use serde_json::{json, Value};
    use sha2::{Digest, Sha256};
    use std::collections::{BTreeMap, HashMap};

    pub const BASE: &str = "https://api.github.test";
    pub const OWNER: &str = "octocat";
    pub const REPO: &str = "notes";
    pub const TOKEN: &str = "secret";

    struct FakeCommit {
        tree: String,
        parents: Vec<String>,
    }

    #[derive(Default)]
    struct FakeState {
        repo_exists: bool,
        default_branch: String,
        refs: HashMap<String, String>,
        commits: HashMap<String, FakeCommit>,
        trees: HashMap<String, BTreeMap<String, String>>,
        blobs: HashMap<String, Vec<u8>>,
        truncate_trees: bool,
        fail_next: Option<(u16, String)>,
        refuse_ref_updates: Option<String>,
        requests: Vec<(HttpMethod, String)>,
        counter: u64,
    }

    impl FakeState {
        fn object_id(&mut self, kind: &str, content: &[u8]) -> String {
            self.counter += 1;
            let mut hasher = Sha256::new();
            hasher.update(kind.as_bytes());
            hasher.update(self.counter.to_le_bytes());
            hasher.update(content);
            format!("{:x}", hasher.finalize())[..40].to_string()
        }

        fn add_blob(&mut self, content: &[u8]) -> String {
            let sha = self.object_id("blob", content);
            self.blobs.insert(sha.clone(), content.to_vec());
            sha
        }

        fn add_tree(&mut self, entries: BTreeMap<String, String>) -> String {
            let sha = self.object_id("tree", format!("{entries:?}").as_bytes());
            self.trees.insert(sha.clone(), entries);
            sha
        }

        fn add_commit(&mut self, tree: String, parents: Vec<String>) -> String {
            let sha = self.object_id("commit", format!("{tree}{parents:?}").as_bytes());
            self.commits.insert(sha.clone(), FakeCommit { tree, parents });
            sha
        }

        fn init_repository(&mut self, branch: &str) {
            let readme = self.add_blob(b"# notes\n");
            let tree = self.add_tree(BTreeMap::from([("README.md".to_string(), readme)]));
            let commit = self.add_commit(tree, Vec::new());
            self.refs.insert(branch.to_string(), commit);
            self.default_branch = branch.to_string();
            self.repo_exists = true;
        }

        fn repository_json(&self) -> Value {
            json!({
                "name": REPO,
                "full_name": format!("{OWNER}/{REPO}"),
                "default_branch": self.default_branch,
            })
        }

        fn is_ancestor(&self, ancestor: &str, descendant: &str) -> bool {
            let mut pending = vec![descendant.to_string()];
            while let Some(sha) = pending.pop() {
                if sha == ancestor {
                    return true;
                }
                if let Some(commit) = self.commits.get(&sha) {
                    pending.extend(commit.parents.iter().cloned());
                }
            }
            false
        }

        fn tree_json(&self, sha: &str) -> Value {
            let entries: Vec<Value> = self.trees[sha]
                .iter()
                .map(|(path, blob)| {
                    json!({"path": path, "mode": "100644", "type": "blob", "sha": blob})
                })
                .collect();
            json!({"sha": sha, "tree": entries, "truncated": self.truncate_trees})
        }

        fn handle(&mut self, request: &HttpRequest) -> (u16, Value) {
            let path = request.url.strip_prefix(BASE).unwrap_or(&request.url);
            self.requests.push((request.method, path.to_string()));

            if let Some((status, message)) = self.fail_next.take() {
                return (status, json!({ "message": message }));
            }
            let expected = format!("token {TOKEN}");
            if request.header("authorization") != Some(expected.as_str()) {
                return (401, json!({"message": "Bad credentials"}));
            }

            let body: Value = request
                .body
                .as_deref()
                .map(|bytes| serde_json::from_slice(bytes).unwrap())
                .unwrap_or(Value::Null);
            let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
            let not_found = (404, json!({"message": "Not Found"}));

            match (request.method, segments.as_slice()) {
                (HttpMethod::Post, ["user", "repos"]) => {
                    // Auto-initialised repositories start on `main`.
                    self.init_repository("main");
                    (201, self.repository_json())
                }
                (_, ["repos", owner, repo, ..]) if *owner != OWNER || *repo != REPO => not_found,
                (_, ["repos", ..]) if !self.repo_exists => not_found,
                (HttpMethod::Get, ["repos", _, _]) => (200, self.repository_json()),
                (HttpMethod::Get, ["repos", _, _, "git", "ref", "heads", branch]) => {
                    match self.refs.get(*branch) {
                        Some(sha) => (
                            200,
                            json!({"ref": format!("refs/heads/{branch}"), "object": {"sha": sha}}),
                        ),
                        None => not_found,
                    }
                }
                (HttpMethod::Patch, ["repos", _, _, "git", "refs", "heads", branch]) => {
                    let sha = body["sha"].as_str().unwrap_or_default().to_string();
                    let Some(head) = self.refs.get(*branch).cloned() else {
                        return (422, json!({"message": "Reference does not exist"}));
                    };
                    if !self.commits.contains_key(&sha) {
                        return (422, json!({"message": "Object does not exist"}));
                    }
                    if let Some(message) = &self.refuse_ref_updates {
                        return (422, json!({ "message": message }));
                    }
                    if !self.is_ancestor(&head, &sha) {
                        return (422, json!({"message": "Update is not a fast forward"}));
                    }
                    self.refs.insert(branch.to_string(), sha.clone());
                    (
                        200,
                        json!({"ref": format!("refs/heads/{branch}"), "object": {"sha": sha}}),
                    )
                }
                (HttpMethod::Get, ["repos", _, _, "git", "commits", sha]) => {
                    match self.commits.get(*sha) {
                        Some(commit) => {
                            let parents: Vec<Value> =
                                commit.parents.iter().map(|p| json!({"sha": p})).collect();
                            (
                                200,
                                json!({
                                    "sha": sha,
                                    "tree": {"sha": commit.tree},
                                    "parents": parents,
                                    "message": "commit",
                                }),
                            )
                        }
                        None => not_found,
                    }
                }
                (HttpMethod::Post, ["repos", _, _, "git", "commits"]) => {
                    let tree = body["tree"].as_str().unwrap_or_default().to_string();
                    let parents: Vec<String> = body["parents"]
                        .as_array()
                        .map(|parents| {
                            parents
                                .iter()
                                .filter_map(|p| p.as_str().map(str::to_string))
                                .collect()
                        })
                        .unwrap_or_default();
                    let sha = self.add_commit(tree.clone(), parents);
                    (201, json!({"sha": sha, "tree": {"sha": tree}}))
                }
                (HttpMethod::Get, ["repos", _, _, "git", "trees", sha]) => {
                    if self.trees.contains_key(*sha) {
                        (200, self.tree_json(sha))
                    } else {
                        not_found
                    }
                }
                (HttpMethod::Post, ["repos", _, _, "git", "trees"]) => {
                    let mut entries = body["base_tree"]
                        .as_str()
                        .and_then(|base| self.trees.get(base).cloned())
                        .unwrap_or_default();
                    for entry in body["tree"].as_array().into_iter().flatten() {
                        let path = entry["path"].as_str().unwrap_or_default().to_string();
                        let sha = entry["sha"].as_str().unwrap_or_default().to_string();
                        entries.insert(path, sha);
                    }
                    let sha = self.add_tree(entries);
                    let truncated = std::mem::replace(&mut self.truncate_trees, false);
                    let tree = self.tree_json(&sha);
                    self.truncate_trees = truncated;
                    (201, tree)
                }
                (HttpMethod::Get, ["repos", _, _, "git", "blobs", sha]) => {
                    match self.blobs.get(*sha) {
                        Some(content) => {
                            let encoded = STANDARD.encode(content);
                            let wrapped: String = encoded
                                .as_bytes()
                                .chunks(60)
                                .map(|line| format!("{}\n", String::from_utf8_lossy(line)))
                                .collect();
                            (200, json!({"sha": sha, "content": wrapped, "encoding": "base64"}))
                        }
                        None => not_found,
                    }
                }
                (HttpMethod::Post, ["repos", _, _, "git", "blobs"]) => {
                    let content = body["content"].as_str().unwrap_or_default();
                    let Ok(bytes) = STANDARD.decode(content) else {
                        return (422, json!({"message": "Invalid base64"}));
                    };
                    let sha = self.add_blob(&bytes);
                    (201, json!({"sha": sha}))
                }
                _ => not_found,
            }
        }
    }

    /// In-memory GitHub serving one repository.
    pub struct FakeGithub {
        state: Mutex<FakeState>,
    }

    impl FakeGithub {
        pub fn new() -> Self {
            let github = Self::without_repository();
            github.state.lock().init_repository("master");
            github
        }

        pub fn without_repository() -> Self {
            Self {
                state: Mutex::new(FakeState::default()),
            }
        }

        pub fn head(&self, branch: &str) -> Option<String> {
            self.state.lock().refs.get(branch).cloned()
        }

        /// Paths in the head tree of `branch`.
        pub fn paths(&self, branch: &str) -> Vec<String> {
            let state = self.state.lock();
            let head = &state.refs[branch];
            let tree = &state.commits[head].tree;
            state.trees[tree].keys().cloned().collect()
        }

        pub fn file(&self, branch: &str, path: &str) -> Option<Value> {
            let state = self.state.lock();
            let head = state.refs.get(branch)?;
            let tree = &state.commits[head].tree;
            let blob = state.trees[tree].get(path)?;
            serde_json::from_slice(&state.blobs[blob]).ok()
        }

        /// Commits `content` as another client would.
        pub fn write_concurrently(&self, branch: &str, path: &str, content: &str) -> String {
            let mut state = self.state.lock();
            let head = state.refs[branch].clone();
            let base_tree = state.commits[&head].tree.clone();
            let mut entries = state.trees[&base_tree].clone();
            let blob = state.add_blob(content.as_bytes());
            entries.insert(path.to_string(), blob);
            let tree = state.add_tree(entries);
            let commit = state.add_commit(tree, vec![head]);
            state.refs.insert(branch.to_string(), commit.clone());
            commit
        }

        pub fn truncate_trees(&self) {
            self.state.lock().truncate_trees = true;
        }

        /// Answers every reference update with 422 and `message`, leaving
        /// the branch where it is.
        pub fn refuse_ref_updates(&self, message: &str) {
            self.state.lock().refuse_ref_updates = Some(message.to_string());
        }

        pub fn fail_next(&self, status: u16, message: &str) {
            self.state.lock().fail_next = Some((status, message.to_string()));
        }

        pub fn count(&self, method: HttpMethod, suffix: &str) -> usize {
            self.state
                .lock()
                .requests
                .iter()
                .filter(|(m, path)| *m == method && path.ends_with(suffix))
                .count()
        }
    }

    #[async_trait]
    impl HttpClient for FakeGithub {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, String> {
            let (status, body) = self.state.lock().handle(&request);
            let body = serde_json::to_vec(&body).map_err(|e| e.to_string())?;
            Ok(HttpResponse::new(status, body))
        }
    }
}

use fake::FakeGithub;

type Notes = Vec<String>;
type NoteStorage = GithubStorage<Notes, Arc<FakeGithub>>;

fn config() -> GithubConfig {
    GithubConfig::new(fake::TOKEN, fake::OWNER, fake::REPO, "notes.json").with_api_url(fake::BASE)
}

fn storage(github: &Arc<FakeGithub>) -> NoteStorage {
    GithubStorage::new(Arc::clone(github), &config()).unwrap()
}

fn notes(items: &[&str]) -> Notes {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn pull_without_file_returns_default() {
    let github = Arc::new(FakeGithub::new());
    let storage = storage(&github);

    let snapshot = storage.pull(notes(&["default"])).await.unwrap();
    assert_eq!(snapshot.state, notes(&["default"]));
    assert_eq!(Some(snapshot.version.commit_sha), github.head("master"));
    assert_eq!(github.count(HttpMethod::Get, "/git/blobs"), 0);
}

#[tokio::test]
async fn push_then_pull_round_trip() {
    let github = Arc::new(FakeGithub::new());
    let storage = storage(&github);

    let base = storage.pull(Notes::new()).await.unwrap().version;
    let outcome = storage
        .push(notes(&["milk", "eggs"]), base.clone())
        .await
        .unwrap();
    let accepted = outcome.into_snapshot().unwrap();

    assert_ne!(accepted.version, base);
    assert_eq!(Some(accepted.version.commit_sha.clone()), github.head("master"));
    assert_eq!(
        github.file("master", "notes.json"),
        Some(serde_json::json!(["milk", "eggs"]))
    );
    assert_eq!(github.paths("master"), vec!["README.md", "notes.json"]);

    let pulled = storage.pull(Notes::new()).await.unwrap();
    assert_eq!(pulled.state, notes(&["milk", "eggs"]));
    assert_eq!(pulled.version, accepted.version);
}

#[tokio::test]
async fn push_from_stale_version_is_rejected() {
    let github = Arc::new(FakeGithub::new());
    let storage = storage(&github);

    let base = storage.pull(Notes::new()).await.unwrap().version;
    let first = storage.push(notes(&["a"]), base.clone()).await.unwrap();
    let head = github.head("master");

    let second = storage.push(notes(&["b"]), base).await.unwrap();
    assert!(!first.is_rejected());
    assert!(second.is_rejected());
    assert_eq!(github.head("master"), head);
    assert_eq!(github.file("master", "notes.json"), Some(serde_json::json!(["a"])));
}

#[tokio::test]
async fn concurrent_writer_causes_rejection() {
    let github = Arc::new(FakeGithub::new());
    let storage = storage(&github);

    let base = storage.pull(Notes::new()).await.unwrap().version;
    let other = github.write_concurrently("master", "notes.json", r#"["theirs"]"#);

    let outcome = storage.push(notes(&["mine"]), base).await.unwrap();
    assert!(matches!(outcome, PushOutcome::Rejected));
    assert_eq!(github.head("master"), Some(other));

    let fresh = storage.pull(Notes::new()).await.unwrap();
    assert_eq!(fresh.state, notes(&["theirs"]));
}

#[tokio::test]
async fn refused_update_on_unmoved_branch_is_an_error() {
    let github = Arc::new(FakeGithub::new());
    let storage = storage(&github);

    let base = storage.pull(Notes::new()).await.unwrap().version;
    let head = github.head("master");
    github.refuse_ref_updates("Required status check \"ci\" is expected.");

    let err = storage.push(notes(&["a"]), base).await.unwrap_err();
    assert!(matches!(
        err,
        StorageError::Protocol(ref m) if m.contains("Required status check")
    ));
    assert!(!err.is_retryable());
    assert_eq!(github.head("master"), head);
    // One read for the pull, one to tell a moved head from a refusal.
    assert_eq!(github.count(HttpMethod::Get, "/git/ref/heads/master"), 2);
}

#[tokio::test]
async fn store_fails_instead_of_retrying_refused_updates() {
    let github = Arc::new(FakeGithub::new());
    github.refuse_ref_updates("Protected branch update failed");
    let append = |mut notes: Notes, note: &String| {
        notes.push(note.clone());
        notes
    };

    let storage = Arc::new(storage(&github));
    let store = AsyncStore::spawn(append, Notes::new(), Some(storage), Notes::new());
    assert_eq!(store.settled().await.unwrap(), Notes::new());

    store.dispatch("milk".to_string());
    let err = store.settled().await.unwrap_err();
    assert!(matches!(err, StoreError::Push(StorageError::Protocol(_))));

    assert_eq!(github.count(HttpMethod::Patch, "/git/refs/heads/master"), 1);
    assert_eq!(github.count(HttpMethod::Post, "/git/commits"), 1);
    assert_eq!(store.stats().rejections, 0);
    assert_eq!(store.state(), notes(&["milk"]));
}

#[tokio::test]
async fn nested_filename_is_refused_before_any_request() {
    let github = Arc::new(FakeGithub::new());
    let nested = GithubConfig::new(fake::TOKEN, fake::OWNER, fake::REPO, "data/notes.json")
        .with_api_url(fake::BASE);

    let err = GithubStorage::<Notes, _>::new(Arc::clone(&github), &nested).unwrap_err();
    assert!(matches!(err, GithubError::InvalidConfig(_)));
    assert!(matches!(
        GithubStorage::<Notes>::connect(&nested),
        Err(GithubError::InvalidConfig(_))
    ));
    assert_eq!(github.count(HttpMethod::Get, ""), 0);
    assert_eq!(github.paths("master"), vec!["README.md"]);
}

#[tokio::test]
async fn truncated_tree_is_too_many_files() {
    let github = Arc::new(FakeGithub::new());
    github.truncate_trees();

    let err = storage(&github).pull(Notes::new()).await.unwrap_err();
    assert!(matches!(err, StorageError::TooManyFiles));
}

#[tokio::test]
async fn oversized_state_is_not_uploaded() {
    let github = Arc::new(FakeGithub::new());
    let storage: NoteStorage =
        GithubStorage::new(Arc::clone(&github), &config().with_max_payload_bytes(8)).unwrap();

    let base = storage.pull(Notes::new()).await.unwrap().version;
    let err = storage
        .push(notes(&["far too long"]), base)
        .await
        .unwrap_err();

    assert!(matches!(err, StorageError::PayloadTooLarge { limit: 8, .. }));
    assert_eq!(github.count(HttpMethod::Post, "/git/blobs"), 0);
}

#[tokio::test]
async fn api_failures_are_classified() {
    let github = Arc::new(FakeGithub::new());

    let wrong_token = config();
    let wrong_token = GithubConfig {
        token: "wrong".into(),
        ..wrong_token
    };
    let unauthorized: NoteStorage = GithubStorage::new(Arc::clone(&github), &wrong_token).unwrap();
    assert!(matches!(
        unauthorized.pull(Notes::new()).await.unwrap_err(),
        StorageError::AuthenticationFailed(ref m) if m == "Bad credentials"
    ));

    github.fail_next(403, "API rate limit exceeded for user ID 1.");
    let err = storage(&github).pull(Notes::new()).await.unwrap_err();
    assert!(matches!(err, StorageError::RateLimited(_)));
    assert!(err.is_retryable());

    let missing_branch: NoteStorage =
        GithubStorage::new(Arc::clone(&github), &config().with_reference("gh-pages")).unwrap();
    assert!(matches!(
        missing_branch.pull(Notes::new()).await.unwrap_err(),
        StorageError::NotFound(_)
    ));
}

#[tokio::test]
async fn ensure_repository_before_first_pull() {
    let github = Arc::new(FakeGithub::without_repository());
    let storage = storage(&github);

    assert!(matches!(
        storage.pull(Notes::new()).await.unwrap_err(),
        StorageError::NotFound(_)
    ));

    let ensured = storage
        .api()
        .ensure_repository(storage.repository(), &NewRepository::new(fake::REPO))
        .await
        .unwrap();
    assert!(ensured.created);
    assert_eq!(ensured.default_branch(), Some("main"));

    // The configured branch does not exist in the new repository.
    assert!(matches!(
        storage.pull(Notes::new()).await.unwrap_err(),
        StorageError::NotFound(_)
    ));

    let on_default: NoteStorage =
        GithubStorage::new(Arc::clone(&github), &config().with_reference("main")).unwrap();
    let snapshot = on_default.pull(notes(&["fresh"])).await.unwrap();
    assert_eq!(snapshot.state, notes(&["fresh"]));

    let again = storage
        .api()
        .ensure_repository(storage.repository(), &NewRepository::new(fake::REPO))
        .await
        .unwrap();
    assert!(!again.created);
    assert_eq!(again.default_branch(), Some("main"));
    assert_eq!(github.count(HttpMethod::Post, "/user/repos"), 1);
}

#[tokio::test]
async fn undecodable_file_is_codec_error() {
    let github = Arc::new(FakeGithub::new());
    github.write_concurrently("master", "notes.json", "{\"not\": \"a list\"}");

    let err = storage(&github).pull(Notes::new()).await.unwrap_err();
    assert!(matches!(err, StorageError::Codec(_)));
}

#[tokio::test]
async fn store_reconciles_through_github() {
    let github = Arc::new(FakeGithub::new());
    let storage = Arc::new(storage(&github));
    let append = |mut notes: Notes, note: &String| {
        notes.push(note.clone());
        notes
    };

    let store = AsyncStore::spawn(append, Notes::new(), Some(storage), Notes::new());
    assert_eq!(store.settled().await.unwrap(), Notes::new());

    store.dispatch("milk".to_string());
    assert_eq!(store.settled().await.unwrap(), notes(&["milk"]));

    github.write_concurrently("master", "notes.json", r#"["milk","bread"]"#);
    store.dispatch("eggs".to_string());
    assert_eq!(store.ready_state(), ReadyState::Synchronizing);

    assert_eq!(store.settled().await.unwrap(), notes(&["milk", "bread", "eggs"]));
    assert_eq!(
        github.file("master", "notes.json"),
        Some(serde_json::json!(["milk", "bread", "eggs"]))
    );

    let stats = store.stats();
    assert_eq!(stats.rejections, 1);
    assert_eq!(stats.pushes, 2);
}

#[test]
fn github_error_converts_to_storage_error() {
    let err: StorageError = GithubError::Api {
        status: 500,
        message: "boom".into(),
    }
    .into();
    assert!(matches!(err, StorageError::Protocol(_)));

    let version = GithubVersion {
        commit_sha: "c".repeat(40),
        tree_sha: "t".repeat(40),
    };
    assert_eq!(version.to_string().len(), 7);
}
