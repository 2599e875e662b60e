//! The credential store
//!
//! The store is the single source of truth for which credentials the session
//! currently holds. Reads are served from an in-process snapshot, so they are
//! synchronous and never touch the disk. Writes replace the snapshot and are
//! pushed through to a [`SessionPersistence`] so the session survives a
//! restart.

use std::{
    error, fmt, io,
    sync::{Arc, Mutex, PoisonError},
};

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    AccessToken, AccessTokenRef, CredentialKind, Email, RefreshToken, RefreshTokenRef, Role,
    UserId, Username,
};

pub mod file;
pub mod in_memory;

pub use file::FileSessionPersistence;
pub use in_memory::InMemorySessionPersistence;

/// The access and refresh credentials held for a session
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CredentialPair {
    access: AccessToken,
    refresh: RefreshToken,
}

impl CredentialPair {
    /// Pairs an access credential with its refresh credential
    pub fn new(access: AccessToken, refresh: RefreshToken) -> Self {
        Self { access, refresh }
    }

    /// The access credential
    #[inline]
    pub fn access(&self) -> &AccessTokenRef {
        &self.access
    }

    /// The refresh credential
    #[inline]
    pub fn refresh(&self) -> &RefreshTokenRef {
        &self.refresh
    }

    /// Splits the pair into its members
    pub fn into_parts(self) -> (AccessToken, RefreshToken) {
        (self.access, self.refresh)
    }
}

/// The signed-in user, as reported by the backend
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Account identifier
    pub id: UserId,
    /// Login name
    pub username: Username,
    /// Contact address
    pub email: Email,
    /// The user's role in the CMS
    pub role: Role,
}

/// The persisted slots of a session
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSession {
    /// The access credential slot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<AccessToken>,

    /// The refresh credential slot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<RefreshToken>,

    /// The cached user profile slot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserProfile>,
}

impl PersistedSession {
    /// Whether every slot is empty
    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none() && self.user.is_none()
    }
}

/// An error reading or writing persisted session state
#[derive(Debug, Error)]
pub enum PersistError {
    /// The underlying storage could not be accessed
    #[error("unable to access session storage")]
    Io(#[from] io::Error),

    /// The stored session could not be parsed or serialized
    #[error("session storage holds malformed data")]
    Format(#[from] serde_json::Error),
}

/// Durable storage for session slots
pub trait SessionPersistence: Send + Sync {
    /// Reads the persisted session, returning an empty session if nothing is stored
    fn load(&self) -> Result<PersistedSession, PersistError>;

    /// Replaces the persisted session
    fn save(&self, session: &PersistedSession) -> Result<(), PersistError>;

    /// Removes every persisted slot
    fn erase(&self) -> Result<(), PersistError>;
}

struct Inner {
    current: ArcSwap<PersistedSession>,
    persistence: Mutex<Box<dyn SessionPersistence>>,
}

/// A shared handle to the current session's credentials
///
/// Cloning the store is cheap; all clones observe the same state.
#[derive(Clone)]
pub struct CredentialStore {
    inner: Arc<Inner>,
}

impl CredentialStore {
    /// Opens a store over `persistence`, restoring any persisted session
    ///
    /// If the persisted session cannot be read, the store starts out empty.
    pub fn open(persistence: impl SessionPersistence + 'static) -> Self {
        let initial = match persistence.load() {
            Ok(session) => {
                tracing::debug!(
                    has_access_token = session.access_token.is_some(),
                    has_refresh_token = session.refresh_token.is_some(),
                    "restored persisted session"
                );
                session
            }
            Err(error) => {
                tracing::warn!(
                    error = (&error as &dyn error::Error),
                    "unable to restore persisted session, starting signed out"
                );
                PersistedSession::default()
            }
        };

        Self {
            inner: Arc::new(Inner {
                current: ArcSwap::from_pointee(initial),
                persistence: Mutex::new(Box::new(persistence)),
            }),
        }
    }

    /// Opens a store that only lives as long as the process
    pub fn in_memory() -> Self {
        Self::open(InMemorySessionPersistence::new())
    }

    /// Gets the stored credential of the given kind
    pub fn get(&self, kind: CredentialKind) -> Option<String> {
        let current = self.inner.current.load();
        match kind {
            CredentialKind::Access => current.access_token.as_ref().map(|t| t.as_str().to_owned()),
            CredentialKind::Refresh => current
                .refresh_token
                .as_ref()
                .map(|t| t.as_str().to_owned()),
        }
    }

    /// Gets the stored access credential
    pub fn access_token(&self) -> Option<AccessToken> {
        self.inner.current.load().access_token.clone()
    }

    /// Gets the stored refresh credential
    pub fn refresh_token(&self) -> Option<RefreshToken> {
        self.inner.current.load().refresh_token.clone()
    }

    /// Gets the cached user profile
    pub fn profile(&self) -> Option<UserProfile> {
        self.inner.current.load().user.clone()
    }

    /// Gets a snapshot of every slot
    pub fn snapshot(&self) -> Arc<PersistedSession> {
        self.inner.current.load_full()
    }

    /// Stores a credential pair, replacing both members together
    pub fn set(&self, pair: &CredentialPair) {
        self.update(|session| {
            session.access_token = Some(pair.access.clone());
            session.refresh_token = Some(pair.refresh.clone());
        });
        tracing::trace!("stored new credential pair");
    }

    /// Caches the signed-in user's profile
    pub fn set_profile(&self, profile: UserProfile) {
        self.update(|session| session.user = Some(profile));
    }

    /// Removes both credentials and the cached profile
    ///
    /// Returns `true` if the store held anything beforehand. Persisted state
    /// is erased either way, including state that could not be restored.
    pub fn clear(&self) -> bool {
        let persistence = self
            .inner
            .persistence
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let previous = self
            .inner
            .current
            .swap(Arc::new(PersistedSession::default()));

        if let Err(error) = persistence.erase() {
            tracing::warn!(
                error = (&error as &dyn error::Error),
                "unable to erase persisted session"
            );
        }

        !previous.is_empty()
    }

    fn update(&self, f: impl FnOnce(&mut PersistedSession)) {
        let persistence = self
            .inner
            .persistence
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let mut next = PersistedSession::clone(&self.inner.current.load());
        f(&mut next);

        if let Err(error) = persistence.save(&next) {
            tracing::warn!(
                error = (&error as &dyn error::Error),
                "unable to persist session, it will not survive a restart"
            );
        }

        self.inner.current.store(Arc::new(next));
    }
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let current = self.inner.current.load();
        f.debug_struct("CredentialStore")
            .field("access_token", &current.access_token)
            .field("refresh_token", &current.refresh_token)
            .field("user", &current.user)
            .finish()
    }
}
