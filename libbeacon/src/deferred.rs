//! A settle-once result handle.
//!
//! [`Deferred`] is a cloneable handle to a value that will be produced later, by someone else. Every clone shares the
//! same state, so the party that stores a handle (e.g. a correlation table keyed by request id) and the party that
//! waits on it observe the same outcome.
//!
//! The handle moves from `Pending` to exactly one of `Resolved` or `Rejected`. The first settlement wins; any later
//! call to [`Deferred::resolve`] or [`Deferred::reject`] is a no-op and returns `false`.

use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Settlement<T, E> {
    Pending,
    Resolved(T),
    Rejected(E),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredStatus {
    Pending,
    Resolved,
    Rejected,
}

pub struct Deferred<T, E> {
    state: Arc<watch::Sender<Settlement<T, E>>>,
}

impl<T, E> Clone for Deferred<T, E> {
    fn clone(&self) -> Self {
        Self { state: Arc::clone(&self.state) }
    }
}

impl<T: Clone, E: Clone> Default for Deferred<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Debug for Deferred<T, E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let status = match &*self.state.borrow() {
            Settlement::Pending => DeferredStatus::Pending,
            Settlement::Resolved(_) => DeferredStatus::Resolved,
            Settlement::Rejected(_) => DeferredStatus::Rejected,
        };
        write!(f, "Deferred({status:?})")
    }
}

impl<T: Clone, E: Clone> Deferred<T, E> {
    /// Creates a new, pending handle.
    pub fn new() -> Self {
        let (state, _) = watch::channel(Settlement::Pending);
        Self { state: Arc::new(state) }
    }

    /// Creates a handle that is already resolved with `value`.
    pub fn resolved(value: T) -> Self {
        let (state, _) = watch::channel(Settlement::Resolved(value));
        Self { state: Arc::new(state) }
    }

    /// Creates a handle that is already rejected with `err`.
    pub fn rejected(err: E) -> Self {
        let (state, _) = watch::channel(Settlement::Rejected(err));
        Self { state: Arc::new(state) }
    }

    /// Resolves the handle. Returns `false`, leaving the handle untouched, if it was already settled.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(Settlement::Resolved(value))
    }

    /// Rejects the handle. Returns `false`, leaving the handle untouched, if it was already settled.
    pub fn reject(&self, err: E) -> bool {
        self.settle(Settlement::Rejected(err))
    }

    fn settle(&self, outcome: Settlement<T, E>) -> bool {
        self.state.send_if_modified(move |current| match current {
            Settlement::Pending => {
                *current = outcome;
                true
            }
            _ => false,
        })
    }

    pub fn status(&self) -> DeferredStatus {
        match &*self.state.borrow() {
            Settlement::Pending => DeferredStatus::Pending,
            Settlement::Resolved(_) => DeferredStatus::Resolved,
            Settlement::Rejected(_) => DeferredStatus::Rejected,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status() == DeferredStatus::Pending
    }

    pub fn is_resolved(&self) -> bool {
        self.status() == DeferredStatus::Resolved
    }

    pub fn is_rejected(&self) -> bool {
        self.status() == DeferredStatus::Rejected
    }

    pub fn is_settled(&self) -> bool {
        !self.is_pending()
    }

    /// The settled outcome, or `None` while the handle is still pending.
    pub fn result(&self) -> Option<Result<T, E>> {
        match &*self.state.borrow() {
            Settlement::Pending => None,
            Settlement::Resolved(v) => Some(Ok(v.clone())),
            Settlement::Rejected(e) => Some(Err(e.clone())),
        }
    }

    /// Waits until the handle is settled and returns the outcome. Returns immediately if it is already settled.
    pub async fn wait(&self) -> Result<T, E> {
        let mut rx = self.state.subscribe();
        loop {
            if let Some(result) = self.result() {
                return result;
            }
            // `self` owns the sender, so this only wakes up on a settlement.
            let _ = rx.changed().await;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    #[test]
    fn new_handle_is_pending() {
        let d = Deferred::<u32, String>::new();
        assert_eq!(d.status(), DeferredStatus::Pending);
        assert!(d.is_pending());
        assert!(!d.is_settled());
        assert!(d.result().is_none());
    }

    #[test]
    fn first_settlement_wins() {
        let d = Deferred::<u32, String>::new();
        assert!(d.resolve(1));
        assert!(!d.resolve(2));
        assert!(!d.reject("nope".into()));
        assert!(d.is_resolved());
        assert_eq!(d.result(), Some(Ok(1)));

        let d = Deferred::<u32, String>::new();
        assert!(d.reject("first".into()));
        assert!(!d.resolve(5));
        assert!(d.is_rejected());
        assert_eq!(d.result(), Some(Err("first".to_string())));
    }

    #[test]
    fn pre_settled_handles() {
        let d = Deferred::<u32, String>::resolved(7);
        assert!(d.is_settled());
        assert!(!d.reject("late".into()));
        assert_eq!(d.result(), Some(Ok(7)));
        let d = Deferred::<u32, String>::rejected("err".into());
        assert!(d.is_rejected());
    }

    #[test]
    fn clones_share_state() {
        let d = Deferred::<u32, String>::new();
        let other = d.clone();
        other.resolve(42);
        assert_eq!(d.result(), Some(Ok(42)));
        assert_eq!(format!("{d:?}"), "Deferred(Resolved)");
    }

    #[tokio::test]
    async fn resolving_without_a_value() {
        let d = Deferred::<(), String>::new();
        assert!(d.resolve(()));
        assert_eq!(d.wait().await, Ok(()));
    }

    #[tokio::test]
    async fn wait_returns_the_settlement_from_another_task() {
        let d = Deferred::<String, String>::new();
        let settler = d.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            settler.resolve("done".into());
        });
        let result = d.wait().await;
        assert_eq!(result, Ok("done".to_string()));
        // Waiting again returns the frozen result.
        assert_eq!(d.wait().await, Ok("done".to_string()));
    }
}
