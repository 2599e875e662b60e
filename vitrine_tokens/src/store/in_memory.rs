//! An in-memory session persistence layer

use std::sync::{Arc, Mutex, PoisonError};

use super::{PersistError, PersistedSession, SessionPersistence};

/// Keeps the session in memory only
///
/// Clones share the same slots, so a test can reopen a store over a clone to
/// observe what would have survived a restart.
#[derive(Clone, Default, Debug)]
pub struct InMemorySessionPersistence {
    session: Arc<Mutex<PersistedSession>>,
}

impl InMemorySessionPersistence {
    /// Constructs a new, empty, in-memory persistence layer
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionPersistence for InMemorySessionPersistence {
    fn load(&self) -> Result<PersistedSession, PersistError> {
        Ok(self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, session: &PersistedSession) -> Result<(), PersistError> {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = session.clone();
        Ok(())
    }

    fn erase(&self) -> Result<(), PersistError> {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = PersistedSession::default();
        Ok(())
    }
}
