//! Reducer seam.

/// A pure function folding an action into a prior state.
///
/// Reducers must not panic for any action the caller dispatches; a panic
/// tears down the store driver.
pub trait Reducer<St, A>: Send + Sync + 'static {
    /// Applies one action to a state.
    fn reduce(&self, state: St, action: &A) -> St;
}

impl<St, A, F> Reducer<St, A> for F
where
    F: Fn(St, &A) -> St + Send + Sync + 'static,
{
    fn reduce(&self, state: St, action: &A) -> St {
        self(state, action)
    }
}

/// Folds `actions` into `state` in order.
pub fn fold<'a, St, A, R, I>(reducer: &R, state: St, actions: I) -> St
where
    R: Reducer<St, A> + ?Sized,
    A: 'a,
    I: IntoIterator<Item = &'a A>,
{
    actions
        .into_iter()
        .fold(state, |state, action| reducer.reduce(state, action))
}
