//! Versioned storage adapter contract.

use crate::error::{StorageError, StorageResult};
use crate::snapshot::{PushOutcome, Snapshot};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use tokio::sync::{oneshot, watch};

/// A content-addressed, ref-pointer backing store seen as snapshots.
///
/// This trait abstracts the backend, allowing for different implementations
/// (GitHub, in-memory, scripted for testing, etc.).
#[async_trait]
pub trait Storage<St>: Send + Sync
where
    St: Send + 'static,
{
    /// Opaque version token. Only the adapter interprets it.
    type Version: Clone + fmt::Debug + Send + Sync + 'static;

    /// Fetches the head version and its state.
    ///
    /// Returns `default_state` paired with the head version if nothing has
    /// ever been stored.
    async fn pull(&self, default_state: St) -> StorageResult<Snapshot<St, Self::Version>>;

    /// Attempts to advance the store from `base_version` to a new version
    /// holding `state`.
    ///
    /// Returns [`PushOutcome::Rejected`] when `base_version` is no longer the
    /// head. Every other failure is an error.
    async fn push(
        &self,
        state: St,
        base_version: Self::Version,
    ) -> StorageResult<PushOutcome<St, Self::Version>>;
}

/// An in-memory compare-and-swap store.
///
/// Versions are a counter starting at 0 for the empty store.
#[derive(Debug)]
pub struct MemoryStorage<St> {
    inner: Mutex<MemoryInner<St>>,
}

#[derive(Debug)]
struct MemoryInner<St> {
    state: Option<St>,
    version: u64,
    pulls: usize,
    pushes: usize,
}

impl<St: Clone> MemoryStorage<St> {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                state: None,
                version: 0,
                pulls: 0,
                pushes: 0,
            }),
        }
    }

    /// Creates a store already holding `state` at version 1.
    pub fn with_state(state: St) -> Self {
        let storage = Self::new();
        storage.write_concurrently(state);
        storage
    }

    /// Writes `state` as another writer would, advancing the head.
    pub fn write_concurrently(&self, state: St) -> u64 {
        let mut inner = self.inner.lock();
        inner.state = Some(state);
        inner.version += 1;
        inner.version
    }

    /// Returns the stored state and head version.
    pub fn current(&self) -> (Option<St>, u64) {
        let inner = self.inner.lock();
        (inner.state.clone(), inner.version)
    }

    /// Number of pulls served.
    pub fn pull_count(&self) -> usize {
        self.inner.lock().pulls
    }

    /// Number of pushes received, accepted or not.
    pub fn push_count(&self) -> usize {
        self.inner.lock().pushes
    }
}

impl<St: Clone> Default for MemoryStorage<St> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<St> Storage<St> for MemoryStorage<St>
where
    St: Clone + Send + Sync + 'static,
{
    type Version = u64;

    async fn pull(&self, default_state: St) -> StorageResult<Snapshot<St, u64>> {
        let mut inner = self.inner.lock();
        inner.pulls += 1;
        let state = inner.state.clone().unwrap_or(default_state);
        Ok(Snapshot::new(state, inner.version))
    }

    async fn push(&self, state: St, base_version: u64) -> StorageResult<PushOutcome<St, u64>> {
        let mut inner = self.inner.lock();
        inner.pushes += 1;
        if base_version != inner.version {
            return Ok(PushOutcome::Rejected);
        }
        inner.version += 1;
        inner.state = Some(state.clone());
        Ok(PushOutcome::Accepted(Snapshot::new(state, inner.version)))
    }
}

/// Reply handle for one scripted pull.
pub struct PendingPull<St, V> {
    sender: oneshot::Sender<StorageResult<Snapshot<St, V>>>,
}

impl<St, V> PendingPull<St, V> {
    /// Resolves the pull with a snapshot.
    pub fn resolve(self, state: St, version: V) {
        let _ = self.sender.send(Ok(Snapshot::new(state, version)));
    }

    /// Fails the pull.
    pub fn fail(self, error: StorageError) {
        let _ = self.sender.send(Err(error));
    }
}

/// Reply handle for one scripted push.
pub struct PendingPush<St, V> {
    sender: oneshot::Sender<StorageResult<PushOutcome<St, V>>>,
}

impl<St, V> PendingPush<St, V> {
    /// Accepts the push, returning the given snapshot.
    pub fn accept(self, state: St, version: V) {
        let _ = self
            .sender
            .send(Ok(PushOutcome::Accepted(Snapshot::new(state, version))));
    }

    /// Refuses the push as stale.
    pub fn reject_stale(self) {
        let _ = self.sender.send(Ok(PushOutcome::Rejected));
    }

    /// Fails the push with a hard error.
    pub fn fail(self, error: StorageError) {
        let _ = self.sender.send(Err(error));
    }
}

type PullReceiver<St, V> = oneshot::Receiver<StorageResult<Snapshot<St, V>>>;
type PushReceiver<St, V> = oneshot::Receiver<StorageResult<PushOutcome<St, V>>>;

/// A storage whose replies are supplied by the test, one call at a time.
///
/// Each [`expect_pull`](Self::expect_pull) / [`expect_push`](Self::expect_push)
/// queues a reply slot. Calls consume slots in order and stay pending until
/// the returned handle is resolved. A call with no slot queued fails with a
/// protocol error.
pub struct ScriptedStorage<St, V> {
    pull_replies: Mutex<VecDeque<PullReceiver<St, V>>>,
    push_replies: Mutex<VecDeque<PushReceiver<St, V>>>,
    pull_calls: Mutex<Vec<St>>,
    push_calls: Mutex<Vec<(St, V)>>,
    calls: watch::Sender<(usize, usize)>,
}

impl<St: Clone, V: Clone> ScriptedStorage<St, V> {
    /// Creates a storage with no replies queued.
    pub fn new() -> Self {
        let (calls, _) = watch::channel((0, 0));
        Self {
            pull_replies: Mutex::new(VecDeque::new()),
            push_replies: Mutex::new(VecDeque::new()),
            pull_calls: Mutex::new(Vec::new()),
            push_calls: Mutex::new(Vec::new()),
            calls,
        }
    }

    /// Queues the reply slot for the next unanswered pull.
    pub fn expect_pull(&self) -> PendingPull<St, V> {
        let (sender, receiver) = oneshot::channel();
        self.pull_replies.lock().push_back(receiver);
        PendingPull { sender }
    }

    /// Queues the reply slot for the next unanswered push.
    pub fn expect_push(&self) -> PendingPush<St, V> {
        let (sender, receiver) = oneshot::channel();
        self.push_replies.lock().push_back(receiver);
        PendingPush { sender }
    }

    /// Default states passed to every pull so far.
    pub fn pull_calls(&self) -> Vec<St> {
        self.pull_calls.lock().clone()
    }

    /// `(state, base_version)` pairs passed to every push so far.
    pub fn push_calls(&self) -> Vec<(St, V)> {
        self.push_calls.lock().clone()
    }

    /// Waits until at least `pulls` pulls and `pushes` pushes have been made.
    pub async fn wait_for_calls(&self, pulls: usize, pushes: usize) {
        let mut receiver = self.calls.subscribe();
        let _ = receiver
            .wait_for(|&(p, q)| p >= pulls && q >= pushes)
            .await;
    }

    fn record(&self, pull: bool) {
        self.calls.send_modify(|(pulls, pushes)| {
            if pull {
                *pulls += 1;
            } else {
                *pushes += 1;
            }
        });
    }
}

impl<St: Clone, V: Clone> Default for ScriptedStorage<St, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<St, V> Storage<St> for ScriptedStorage<St, V>
where
    St: Clone + Send + Sync + 'static,
    V: Clone + fmt::Debug + Send + Sync + 'static,
{
    type Version = V;

    async fn pull(&self, default_state: St) -> StorageResult<Snapshot<St, V>> {
        self.pull_calls.lock().push(default_state);
        let reply = self.pull_replies.lock().pop_front();
        self.record(true);
        match reply {
            Some(receiver) => receiver
                .await
                .map_err(|_| StorageError::Protocol("scripted pull reply dropped".into()))?,
            None => Err(StorageError::Protocol("no scripted pull reply".into())),
        }
    }

    async fn push(&self, state: St, base_version: V) -> StorageResult<PushOutcome<St, V>> {
        self.push_calls.lock().push((state, base_version));
        let reply = self.push_replies.lock().pop_front();
        self.record(false);
        match reply {
            Some(receiver) => receiver
                .await
                .map_err(|_| StorageError::Protocol("scripted push reply dropped".into()))?,
            None => Err(StorageError::Protocol("no scripted push reply".into())),
        }
    }
}
