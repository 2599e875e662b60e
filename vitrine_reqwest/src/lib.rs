//! Session-aware HTTP for the Vitrine CMS client
//!
//! A [`Session`] wires a [`CredentialStore`][vitrine_tokens::CredentialStore]
//! to the CMS authentication endpoints and hands out a
//! [`ClientWithMiddleware`](reqwest_middleware::ClientWithMiddleware) whose
//! calls are authenticated automatically.
//!
//! ```
//! use vitrine_reqwest::{Session, SessionConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SessionConfig::new("https://cms.example.com/api/".parse()?);
//! let session = Session::builder(config)
//!     .with_entry_point(|| println!("please sign in again"))
//!     .build()?;
//!
//! let req = session
//!     .client()
//!     .get("https://cms.example.com/api/playlists");
//! # async move { req
//!     .send()
//!     .await
//!     .unwrap();
//! # };
//! # Ok(())
//! # }
//! ```
//!
//! When the backend rejects a call with `401` or `403`, the session renews its
//! credentials and retries the call once. However many calls are rejected at
//! the same time, only one renewal is sent. If the renewal itself is refused,
//! the session is cleared and the entry point is invoked so the user can sign
//! in again.
//!
//! The pieces can also be used individually. [`SessionMiddleware`] can be
//! placed in any middleware stack, and restricted with a custom predicate to
//! decide which requests see the credential.
//!
//! ```
//! use vitrine_reqwest::{SameOrigin, SessionConfig, SessionMiddleware};
//! use vitrine_tokens::{CredentialStore, NoEntryPoint, SessionTerminator};
//! use predicates::prelude::PredicateBooleanExt;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let endpoints = SessionConfig::new("https://cms.example.com/api/".parse()?).endpoints()?;
//! let terminator = SessionTerminator::new(CredentialStore::in_memory(), Arc::new(NoEntryPoint));
//!
//! let middleware = SessionMiddleware::new(terminator, endpoints.clone())
//!     .with_predicate(SameOrigin::new(&endpoints.base).and(predicates::function::function(
//!         |req: &reqwest::Request| !req.url().path().starts_with("/api/public/"),
//!     )));
//! # drop(middleware);
//! # Ok(())
//! # }
//! ```

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

pub mod config;
pub mod gateway;
pub mod middleware;
mod session;
#[cfg(test)]
mod test_backend;

pub use config::{AuthEndpoints, ConfigError, EndpointPaths, SessionConfig};
pub use gateway::{AuthGateway, GatewayError, Registration};
pub use middleware::{RetryMarker, SameOrigin, SessionError, SessionMiddleware};
pub use session::{Session, SessionBuilder};
