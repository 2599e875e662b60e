//! Credential lifecycle management for the Vitrine CMS client
//!
//! This crate holds everything about a signed-in session that does not depend
//! on how requests reach the backend:
//!
//! * [`CredentialCodec`] decodes the JWT credentials issued by the backend and
//!   decides whether they are still usable, allowing for a skew buffer so that a
//!   credential about to expire is not sent.
//! * [`CredentialStore`] holds the current access and refresh credentials and
//!   the signed-in user's profile, optionally persisting them to disk.
//! * [`RefreshCoordinator`] ensures that no matter how many requests discover
//!   an expired credential at once, only one renewal is sent to the backend.
//! * [`SessionTerminator`] tears the session down once it can no longer be
//!   renewed, and sends the user back to sign in.
//!
//! ```
//! use std::sync::Arc;
//! use vitrine_tokens::{CredentialKind, CredentialStore, NoEntryPoint, SessionTerminator};
//!
//! let store = CredentialStore::in_memory();
//! assert!(store.get(CredentialKind::Access).is_none());
//!
//! let terminator = SessionTerminator::new(store.clone(), Arc::new(NoEntryPoint));
//! assert!(!terminator.terminate("nothing to end"));
//! ```
//!
//! The HTTP side of the session lives in `vitrine_reqwest`.
//!
//! # Features
//!
//! * `test-util`: Exposes the [`testing`] module, which mints signed credentials
//!   for use in tests.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod braids;
pub mod codec;
pub mod coordinator;
pub mod store;
mod terminate;
#[cfg(any(test, feature = "test-util"))]
#[cfg_attr(docsrs, doc(cfg(feature = "test-util")))]
pub mod testing;

pub use braids::*;
pub use codec::{
    CredentialClaims, CredentialCodec, CredentialKind, DecodeError, InvalidCredential,
    DEFAULT_SKEW_BUFFER,
};
pub use coordinator::{FreshCredentialSource, RefreshCoordinator, RefreshFailure, RenewCredentials};
pub use store::{
    CredentialPair, CredentialStore, PersistError, PersistedSession, SessionPersistence,
    UserProfile,
};
pub use terminate::{EntryPoint, NoEntryPoint, SessionTerminator};
