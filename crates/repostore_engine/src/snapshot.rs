//! Snapshot and push outcome types.

/// A state value paired with the store version it was read from or written at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot<St, V> {
    /// The state.
    pub state: St,
    /// The opaque version token.
    pub version: V,
}

impl<St, V> Snapshot<St, V> {
    /// Creates a new snapshot.
    pub fn new(state: St, version: V) -> Self {
        Self { state, version }
    }
}

/// Result of a push that did not fail outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome<St, V> {
    /// The store advanced to a new version containing the pushed state.
    Accepted(Snapshot<St, V>),
    /// The base version is no longer the head; the caller lost a race.
    Rejected,
}

impl<St, V> PushOutcome<St, V> {
    /// Returns true if the push was refused as stale.
    pub fn is_rejected(&self) -> bool {
        matches!(self, PushOutcome::Rejected)
    }

    /// Returns the accepted snapshot, if any.
    pub fn into_snapshot(self) -> Option<Snapshot<St, V>> {
        match self {
            PushOutcome::Accepted(snapshot) => Some(snapshot),
            PushOutcome::Rejected => None,
        }
    }
}
