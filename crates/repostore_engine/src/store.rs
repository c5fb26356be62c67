//! Async store driver.
//!
//! [`AsyncStore`] shares a [`Reconciler`] with a single spawned task that
//! performs the storage calls it asks for.
//!
//! # Blocking Lock Usage
//!
//! The reconciler sits behind a `parking_lot::Mutex` because:
//! 1. Every critical section is a queue operation plus a reducer fold
//! 2. The lock is never held across `.await` points
//! 3. [`AsyncStore::dispatch`] must stay synchronous

use crate::error::{StoreError, StoreResult};
use crate::reducer::Reducer;
use crate::state::{Command, ReadyState, Reconciler, StoreView, SyncStats};
use crate::storage::Storage;
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

struct Shared<St, A, V, R> {
    reconciler: Mutex<Reconciler<St, A, V, R>>,
    view: watch::Sender<StoreView<St>>,
    wake: Notify,
}

impl<St, A, V, R> Shared<St, A, V, R>
where
    St: Clone,
    V: Clone + std::fmt::Debug,
    R: Reducer<St, A>,
{
    /// Publishes the reconciler's view, terminating it if the reducer panics.
    fn publish(&self, reconciler: &mut Reconciler<St, A, V, R>) {
        if reconciler.is_terminated() {
            return;
        }
        match panic::catch_unwind(AssertUnwindSafe(|| reconciler.view())) {
            Ok(view) => {
                self.view.send_replace(view);
            }
            Err(_) => self.terminate(reconciler),
        }
    }

    fn terminate(&self, reconciler: &mut Reconciler<St, A, V, R>) {
        reconciler.terminate();
        mark_terminated(&self.view);
    }
}

/// Publishes [`StoreError::Terminated`] unless a fatal error is already shown.
///
/// Only the published view is touched since the reducer may be what panicked.
fn mark_terminated<St>(view: &watch::Sender<StoreView<St>>) {
    view.send_if_modified(|view| {
        if view.error.is_some() {
            return false;
        }
        view.error = Some(StoreError::Terminated);
        true
    });
}

/// A reducer-driven state container synchronised with a [`Storage`].
///
/// Dispatched actions are visible in [`state`](Self::state) immediately and
/// are pushed in dispatch order. Dropping the store abandons whatever storage
/// call is in flight.
///
/// # Example
///
/// ```
/// use repostore_engine::{AsyncStore, MemoryStorage, ReadyState};
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let storage = Arc::new(MemoryStorage::with_state(String::from("a")));
/// let reducer = |state: String, action: &char| format!("{state}{action}");
/// let store = AsyncStore::spawn(reducer, String::new(), Some(storage), String::new());
///
/// store.dispatch('b');
/// assert_eq!(store.state(), "b");
///
/// assert_eq!(store.settled().await.unwrap(), "ab");
/// assert_eq!(store.ready_state(), ReadyState::Idle);
/// # }
/// ```
pub struct AsyncStore<St, A, R, S>
where
    St: Send + 'static,
    S: Storage<St>,
{
    shared: Arc<Shared<St, A, S::Version, R>>,
    task: Option<JoinHandle<()>>,
}

impl<St, A, R, S> AsyncStore<St, A, R, S>
where
    St: Clone + Send + Sync + 'static,
    A: Send + 'static,
    R: Reducer<St, A>,
    S: Storage<St> + 'static,
{
    /// Creates a store and, when `storage` is present, starts pulling.
    ///
    /// Without storage the store stays [`ReadyState::Initializing`] and only
    /// folds dispatched actions into `initial_state`. With storage this must
    /// be called inside a tokio runtime.
    pub fn spawn(
        reducer: R,
        default_state: St,
        storage: Option<Arc<S>>,
        initial_state: St,
    ) -> Self {
        let reconciler =
            Reconciler::new(reducer, default_state, initial_state, storage.is_some());
        let (view, _) = watch::channel(reconciler.view());
        let shared = Arc::new(Shared {
            reconciler: Mutex::new(reconciler),
            view,
            wake: Notify::new(),
        });

        let task = storage.map(|storage| tokio::spawn(drive(Arc::clone(&shared), storage)));

        Self { shared, task }
    }

    /// Queues an action. Never blocks on I/O and never panics.
    ///
    /// If the reducer panics while folding the action the store terminates:
    /// [`failure`](Self::failure) reports [`StoreError::Terminated`] and later
    /// actions are discarded.
    pub fn dispatch(&self, action: A) {
        {
            let mut reconciler = self.shared.reconciler.lock();
            if reconciler.is_terminated() {
                tracing::debug!("action discarded by terminated store");
                return;
            }
            reconciler.dispatch(action);
            self.shared.publish(&mut reconciler);
        }
        self.shared.wake.notify_one();
    }

    /// Returns readiness, state and any fatal error.
    pub fn view(&self) -> StoreView<St> {
        self.shared.view.borrow().clone()
    }

    /// Returns the readiness.
    pub fn ready_state(&self) -> ReadyState {
        self.shared.view.borrow().ready_state
    }

    /// Returns the best-known state.
    pub fn state(&self) -> St {
        self.shared.view.borrow().state.clone()
    }

    /// Returns the fatal error, if one occurred.
    pub fn failure(&self) -> Option<StoreError> {
        self.shared.view.borrow().error.clone()
    }

    /// Returns the stats.
    pub fn stats(&self) -> SyncStats {
        self.shared.reconciler.lock().stats().clone()
    }

    /// Subscribes to every change of the view.
    pub fn subscribe(&self) -> watch::Receiver<StoreView<St>> {
        self.shared.view.subscribe()
    }

    /// Waits until the store is idle, returning its state, or until it fails.
    ///
    /// A store without storage never becomes idle.
    pub async fn settled(&self) -> StoreResult<St> {
        let mut receiver = self.subscribe();
        let view = receiver
            .wait_for(|view| view.error.is_some() || view.ready_state == ReadyState::Idle)
            .await
            .map_err(|_| StoreError::Terminated)?;
        match &view.error {
            Some(error) => Err(error.clone()),
            None => Ok(view.state.clone()),
        }
    }

    /// Stops the driver task. In-flight results are discarded.
    pub fn shutdown(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl<St, A, R, S> Drop for AsyncStore<St, A, R, S>
where
    St: Send + 'static,
    S: Storage<St>,
{
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Marks the view terminated if the driver ends without a reported error.
struct TerminationGuard<'a, St> {
    view: &'a watch::Sender<StoreView<St>>,
}

impl<St> Drop for TerminationGuard<'_, St> {
    fn drop(&mut self) {
        mark_terminated(self.view);
    }
}

async fn drive<St, A, R, S>(shared: Arc<Shared<St, A, S::Version, R>>, storage: Arc<S>)
where
    St: Clone + Send + Sync + 'static,
    A: Send + 'static,
    R: Reducer<St, A>,
    S: Storage<St> + 'static,
{
    let _guard = TerminationGuard { view: &shared.view };

    loop {
        let command = {
            let mut reconciler = shared.reconciler.lock();
            if reconciler.is_failed() {
                return;
            }
            let next = panic::catch_unwind(AssertUnwindSafe(|| reconciler.next_command()));
            let command = match next {
                Ok(command) => command,
                Err(_) => {
                    shared.terminate(&mut reconciler);
                    return;
                }
            };
            if command.is_some() {
                shared.publish(&mut reconciler);
            }
            command
        };

        let completed = match command {
            Some(Command::Pull { default_state }) => {
                let result = storage.pull(default_state).await;
                let mut reconciler = shared.reconciler.lock();
                let completed = reconciler.pull_completed(result);
                shared.publish(&mut reconciler);
                completed
            }
            Some(Command::Push {
                state,
                base_version,
            }) => {
                let result = storage.push(state, base_version).await;
                let mut reconciler = shared.reconciler.lock();
                let completed = reconciler.push_completed(result);
                shared.publish(&mut reconciler);
                completed
            }
            None => {
                shared.wake.notified().await;
                Ok(())
            }
        };

        if let Err(error) = completed {
            tracing::debug!(%error, "store driver stopped");
            return;
        }
    }
}
