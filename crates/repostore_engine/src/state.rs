//! Reconciliation state machine.
//!
//! [`Reconciler`] holds the snapshot and both action queues and decides what
//! the store does next. It performs no I/O: the driver asks for the next
//! [`Command`], runs it against a storage adapter, and feeds the result back
//! through [`Reconciler::pull_completed`] or [`Reconciler::push_completed`].

use crate::error::{StorageResult, StoreError, StoreResult};
use crate::reducer::{fold, Reducer};
use crate::snapshot::{PushOutcome, Snapshot};
use std::fmt;
use std::marker::PhantomData;

/// Readiness of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadyState {
    /// No snapshot has arrived yet.
    Initializing,
    /// A snapshot is present and actions are queued or in flight.
    Synchronizing,
    /// A snapshot is present and nothing is pending.
    Idle,
}

impl ReadyState {
    /// Returns true once a snapshot has been loaded.
    pub fn has_snapshot(&self) -> bool {
        !matches!(self, ReadyState::Initializing)
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReadyState::Initializing => "initializing",
            ReadyState::Synchronizing => "synchronizing",
            ReadyState::Idle => "idle",
        };
        f.write_str(name)
    }
}

/// A storage call the driver must perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<St, V> {
    /// Pull the head, falling back to `default_state`.
    Pull {
        /// State to use when nothing is stored yet.
        default_state: St,
    },
    /// Push `state` on top of `base_version`.
    Push {
        /// Snapshot state with the in-flight actions folded in.
        state: St,
        /// Version the push is based on.
        base_version: V,
    },
}

/// Observable state of a store.
#[derive(Debug, Clone)]
pub struct StoreView<St> {
    /// Readiness.
    pub ready_state: ReadyState,
    /// Best-known state, including every queued action.
    pub state: St,
    /// Fatal error, once one has occurred.
    pub error: Option<StoreError>,
}

impl<St> StoreView<St> {
    /// Creates a view with no error.
    pub fn new(ready_state: ReadyState, state: St) -> Self {
        Self {
            ready_state,
            state,
            error: None,
        }
    }
}

// Errors compare by message.
impl<St: PartialEq> PartialEq for StoreView<St> {
    fn eq(&self, other: &Self) -> bool {
        self.ready_state == other.ready_state
            && self.state == other.state
            && self.error.as_ref().map(ToString::to_string)
                == other.error.as_ref().map(ToString::to_string)
    }
}

/// Counters describing the work a store has done.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Pulls completed successfully.
    pub pulls: u64,
    /// Pushes accepted by the storage.
    pub pushes: u64,
    /// Pushes refused as stale.
    pub rejections: u64,
    /// Actions carried by accepted pushes.
    pub actions_pushed: u64,
    /// Last fatal error message.
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PullKind {
    Initial,
    AfterRejection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// No storage configured; never leaves this phase.
    Detached,
    /// A pull is wanted but not yet issued.
    PullRequested(PullKind),
    Pulling(PullKind),
    Pushing,
    /// Nothing outstanding.
    Ready,
    Failed,
}

/// The reconciliation state machine.
pub struct Reconciler<St, A, V, R> {
    reducer: R,
    default_state: St,
    initial_state: St,
    snapshot: Option<Snapshot<St, V>>,
    unpushed: Vec<A>,
    pushed: Vec<A>,
    phase: Phase,
    failure: Option<StoreError>,
    stats: SyncStats,
    _action: PhantomData<fn(A)>,
}

impl<St, A, V, R> Reconciler<St, A, V, R>
where
    St: Clone,
    V: Clone + fmt::Debug,
    R: Reducer<St, A>,
{
    /// Creates a state machine.
    ///
    /// With `remote == false` no storage is configured: the machine stays
    /// [`ReadyState::Initializing`] and never issues a command, but still
    /// folds dispatched actions into `initial_state`.
    pub fn new(reducer: R, default_state: St, initial_state: St, remote: bool) -> Self {
        let phase = if remote {
            Phase::PullRequested(PullKind::Initial)
        } else {
            Phase::Detached
        };
        Self {
            reducer,
            default_state,
            initial_state,
            snapshot: None,
            unpushed: Vec::new(),
            pushed: Vec::new(),
            phase,
            failure: None,
            stats: SyncStats::default(),
            _action: PhantomData,
        }
    }

    /// Appends an action to the unpushed queue.
    pub fn dispatch(&mut self, action: A) {
        self.unpushed.push(action);
    }

    /// Returns the next storage call to perform, if any.
    ///
    /// Never returns a command while another one is outstanding.
    pub fn next_command(&mut self) -> Option<Command<St, V>> {
        match self.phase {
            Phase::PullRequested(kind) => {
                self.phase = Phase::Pulling(kind);
                tracing::debug!(?kind, "requesting pull");
                Some(Command::Pull {
                    default_state: self.default_state.clone(),
                })
            }
            Phase::Ready if !self.unpushed.is_empty() => {
                let snapshot = self.snapshot.as_ref()?;
                self.pushed = std::mem::take(&mut self.unpushed);
                let state = fold(&self.reducer, snapshot.state.clone(), &self.pushed);
                let base_version = snapshot.version.clone();
                self.phase = Phase::Pushing;
                tracing::debug!(
                    actions = self.pushed.len(),
                    ?base_version,
                    "pushing queued actions"
                );
                Some(Command::Push {
                    state,
                    base_version,
                })
            }
            _ => None,
        }
    }

    /// Feeds back the result of a [`Command::Pull`].
    pub fn pull_completed(
        &mut self,
        result: StorageResult<Snapshot<St, V>>,
    ) -> StoreResult<()> {
        let kind = match self.phase {
            Phase::Failed => return Ok(()),
            Phase::Pulling(kind) => kind,
            _ => return Err(StoreError::UnexpectedCompletion("pull")),
        };

        let snapshot = match result {
            Ok(snapshot) => snapshot,
            Err(e) => return Err(self.fail(StoreError::Pull(e))),
        };

        tracing::info!(version = ?snapshot.version, "adopted pulled snapshot");
        self.snapshot = Some(snapshot);
        self.stats.pulls += 1;

        if kind == PullKind::AfterRejection {
            // Rejected actions go back ahead of anything dispatched since.
            let mut requeued = std::mem::take(&mut self.pushed);
            requeued.append(&mut self.unpushed);
            self.unpushed = requeued;
        }

        self.phase = Phase::Ready;
        Ok(())
    }

    /// Feeds back the result of a [`Command::Push`].
    pub fn push_completed(
        &mut self,
        result: StorageResult<PushOutcome<St, V>>,
    ) -> StoreResult<()> {
        match self.phase {
            Phase::Failed => return Ok(()),
            Phase::Pushing => {}
            _ => return Err(StoreError::UnexpectedCompletion("push")),
        }

        match result {
            Ok(PushOutcome::Accepted(snapshot)) => {
                tracing::info!(version = ?snapshot.version, "push accepted");
                self.stats.pushes += 1;
                self.stats.actions_pushed += self.pushed.len() as u64;
                self.snapshot = Some(snapshot);
                self.pushed.clear();
                self.phase = Phase::Ready;
                Ok(())
            }
            Ok(PushOutcome::Rejected) => {
                tracing::debug!(
                    actions = self.pushed.len(),
                    "push rejected as stale, pulling again"
                );
                self.stats.rejections += 1;
                self.phase = Phase::PullRequested(PullKind::AfterRejection);
                Ok(())
            }
            Err(e) => Err(self.fail(StoreError::Push(e))),
        }
    }

    /// Stops the machine after the reducer panicked.
    ///
    /// Unlike a storage failure this never folds again: the queues are
    /// frozen and later dispatches should be discarded by the caller.
    pub fn terminate(&mut self) {
        if self.is_terminated() {
            return;
        }
        tracing::warn!("reducer panicked, store terminated");
        self.phase = Phase::Failed;
        self.stats.last_error = Some(StoreError::Terminated.to_string());
        self.failure = Some(StoreError::Terminated);
    }

    /// Returns true after [`terminate`](Self::terminate).
    pub fn is_terminated(&self) -> bool {
        matches!(self.failure, Some(StoreError::Terminated))
    }

    fn fail(&mut self, error: StoreError) -> StoreError {
        tracing::warn!(%error, "store failed");
        self.phase = Phase::Failed;
        self.stats.last_error = Some(error.to_string());
        self.failure = Some(error.clone());
        error
    }

    /// Returns the readiness.
    pub fn ready_state(&self) -> ReadyState {
        if self.snapshot.is_none() {
            ReadyState::Initializing
        } else if self.pushed.len() + self.unpushed.len() > 0 {
            ReadyState::Synchronizing
        } else {
            ReadyState::Idle
        }
    }

    /// Returns the best-known state: the snapshot state (or the initial
    /// state before any snapshot) with in-flight then unpushed actions folded in.
    pub fn state(&self) -> St {
        let base = self
            .snapshot
            .as_ref()
            .map(|snapshot| snapshot.state.clone())
            .unwrap_or_else(|| self.initial_state.clone());
        let state = fold(&self.reducer, base, &self.pushed);
        fold(&self.reducer, state, &self.unpushed)
    }

    /// Returns readiness and state together.
    pub fn view(&self) -> StoreView<St> {
        StoreView {
            ready_state: self.ready_state(),
            state: self.state(),
            error: self.failure.clone(),
        }
    }

    /// Returns the fatal error, if one occurred.
    pub fn failure(&self) -> Option<&StoreError> {
        self.failure.as_ref()
    }

    /// Returns the latest snapshot.
    pub fn snapshot(&self) -> Option<&Snapshot<St, V>> {
        self.snapshot.as_ref()
    }

    /// Actions not yet sent.
    pub fn unpushed(&self) -> &[A] {
        &self.unpushed
    }

    /// Actions currently being sent.
    pub fn pushed(&self) -> &[A] {
        &self.pushed
    }

    /// Returns true if a storage call is outstanding.
    pub fn is_busy(&self) -> bool {
        matches!(self.phase, Phase::Pulling(_) | Phase::Pushing)
    }

    /// Returns true once a fatal error has been reported.
    pub fn is_failed(&self) -> bool {
        self.phase == Phase::Failed
    }

    /// Returns the stats.
    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }
}
