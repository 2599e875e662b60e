//! Ending a session that cannot be renewed

use std::{fmt, sync::Arc};

use crate::CredentialStore;

/// Where the application goes once the session has ended
///
/// In a UI this navigates to the sign-in screen. Implemented for any
/// `Fn()` closure.
pub trait EntryPoint: Send + Sync {
    /// Sends the user to the unauthenticated entry point
    fn enter_unauthenticated(&self);
}

impl<F> EntryPoint for F
where
    F: Fn() + Send + Sync,
{
    fn enter_unauthenticated(&self) {
        self()
    }
}

/// An entry point that does nothing, for headless use
#[derive(Clone, Copy, Debug, Default)]
pub struct NoEntryPoint;

impl EntryPoint for NoEntryPoint {
    fn enter_unauthenticated(&self) {}
}

/// Tears down the session when renewal is impossible
///
/// Termination is idempotent: the store is cleared every time, but the entry
/// point is only entered when a live session was actually torn down.
#[derive(Clone)]
pub struct SessionTerminator {
    store: CredentialStore,
    entry_point: Arc<dyn EntryPoint>,
}

impl SessionTerminator {
    /// Constructs a terminator over the given store
    pub fn new(store: CredentialStore, entry_point: Arc<dyn EntryPoint>) -> Self {
        Self { store, entry_point }
    }

    /// Ends the session
    ///
    /// Returns `true` if this call ended a live session.
    pub fn terminate(&self, reason: &str) -> bool {
        if self.store.clear() {
            tracing::warn!(reason, "session terminated, re-authentication required");
            self.entry_point.enter_unauthenticated();
            true
        } else {
            tracing::debug!(reason, "session already terminated");
            false
        }
    }

    /// The store this terminator clears
    pub fn store(&self) -> &CredentialStore {
        &self.store
    }
}

impl fmt::Debug for SessionTerminator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SessionTerminator")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use aliri_clock::UnixTime;
    use tracing_test::traced_test;

    use super::*;
    use crate::testing::CredentialMinter;

    fn counting_terminator() -> (SessionTerminator, Arc<AtomicUsize>) {
        let entries = Arc::new(AtomicUsize::new(0));
        let counter = entries.clone();
        let store = CredentialStore::in_memory();
        store.set(&CredentialMinter::default().pair("user-1", UnixTime(1_700_000_000)));

        let terminator = SessionTerminator::new(
            store,
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        (terminator, entries)
    }

    #[test]
    fn terminating_clears_store_and_enters_once() {
        let (terminator, entries) = counting_terminator();

        assert!(terminator.terminate("refresh rejected"));

        assert!(terminator.store().snapshot().is_empty());
        assert_eq!(entries.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[traced_test]
    fn repeated_termination_enters_only_once() {
        let (terminator, entries) = counting_terminator();

        assert!(terminator.terminate("refresh rejected"));
        assert!(!terminator.terminate("refresh rejected"));
        assert!(!terminator.clone().terminate("refresh rejected"));

        assert!(terminator.store().snapshot().is_empty());
        assert_eq!(entries.load(Ordering::SeqCst), 1);
        assert!(logs_contain("session already terminated"));
    }

    #[test]
    fn new_session_can_be_terminated_again() {
        let (terminator, entries) = counting_terminator();
        terminator.terminate("refresh rejected");

        terminator
            .store()
            .set(&CredentialMinter::default().pair("user-1", UnixTime(1_700_000_100)));
        terminator.terminate("refresh rejected");

        assert_eq!(entries.load(Ordering::SeqCst), 2);
    }
}
