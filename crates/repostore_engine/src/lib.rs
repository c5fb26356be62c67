//! # repostore engine
//!
//! Optimistic reconciliation of reducer-owned state against a versioned
//! backing store.
//!
//! This crate provides:
//! - Snapshot and push outcome types
//! - The reducer seam
//! - The storage adapter contract, with in-memory and scripted adapters
//! - The reconciliation state machine (initializing → synchronizing ↔ idle)
//! - An async store that drives the state machine against a storage
//!
//! ## Model
//!
//! Dispatched actions are queued and folded into the displayed state at
//! once. When a snapshot is available the queue is pushed on top of the
//! snapshot's version:
//! 1. Accepted: the returned snapshot replaces the current one
//! 2. Rejected as stale: the store is pulled again and the actions are
//!    replayed on top of the fresh snapshot
//! 3. Any other failure is fatal for the store
//!
//! ## Key Invariants
//!
//! - `state = fold(fold(snapshot, pushed), unpushed)` at every observable point
//! - Actions are applied in dispatch order, across any number of rejections
//! - At most one storage call is outstanding
//! - Readiness never returns to initializing once a snapshot has loaded

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod reducer;
mod snapshot;
mod state;
mod storage;
mod store;

pub use error::{StorageError, StorageResult, StoreError, StoreResult};
pub use reducer::{fold, Reducer};
pub use snapshot::{PushOutcome, Snapshot};
pub use state::{Command, ReadyState, Reconciler, StoreView, SyncStats};
pub use storage::{MemoryStorage, PendingPull, PendingPush, ScriptedStorage, Storage};
pub use store::AsyncStore;
