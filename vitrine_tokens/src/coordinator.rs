//! Single-flight credential renewal
//!
//! When an access credential is rejected, every request that was using it
//! fails at roughly the same time. Each of those requests needs a renewed
//! credential, but the backend must only be asked once. The
//! [`RefreshCoordinator`] holds at most one pending renewal; callers that
//! arrive while it is pending attach to it instead of starting their own, and
//! all of them observe the same outcome.
//!
//! The pending renewal clears itself from the coordinator as it settles,
//! before any waiter resumes. A caller that observes the outcome and then
//! needs another renewal therefore starts a new one rather than reusing a
//! stale result.

use std::{
    error, fmt,
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use thiserror::Error;

use crate::{AccessToken, CredentialPair, RefreshTokenRef, SessionTerminator};

/// A source of renewed credentials
#[async_trait]
pub trait RenewCredentials: Send + Sync {
    /// The error type returned in the event that renewal fails
    type Error: error::Error + Send + Sync + 'static;

    /// Exchanges a refresh credential for a new credential pair
    async fn renew(&self, refresh_token: &RefreshTokenRef) -> Result<CredentialPair, Self::Error>;
}

#[async_trait]
impl<T> RenewCredentials for Arc<T>
where
    T: RenewCredentials + ?Sized,
{
    type Error = T::Error;

    async fn renew(&self, refresh_token: &RefreshTokenRef) -> Result<CredentialPair, Self::Error> {
        (**self).renew(refresh_token).await
    }
}

/// A source of access credentials that are fresh enough to retry a rejected call
#[async_trait]
pub trait FreshCredentialSource: Send + Sync {
    /// Obtains a renewed access credential
    async fn fresh_credential(&self) -> Result<AccessToken, RefreshFailure>;
}

/// A renewal attempt failed
///
/// Every caller waiting on the same renewal receives a clone of the same
/// failure.
#[derive(Clone, Debug, Error)]
pub enum RefreshFailure {
    /// There was no refresh credential to renew with
    #[error("no refresh credential is stored")]
    NoRefreshCredential,

    /// The renewal source reported an error
    #[error("credential renewal failed")]
    Renewal(#[source] Arc<dyn error::Error + Send + Sync>),
}

type PendingRenewal = Shared<BoxFuture<'static, Result<AccessToken, RefreshFailure>>>;

struct Inner<R> {
    renewer: R,
    terminator: SessionTerminator,
    pending: Mutex<Option<PendingRenewal>>,
}

/// Coordinates renewal so that at most one is ever in flight
pub struct RefreshCoordinator<R> {
    inner: Arc<Inner<R>>,
}

impl<R> Clone for RefreshCoordinator<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R> RefreshCoordinator<R> {
    /// Constructs a coordinator renewing through `renewer`
    ///
    /// The refresh credential is read from the terminator's store at the start
    /// of each renewal. If none is stored, the session is terminated without
    /// contacting the renewer. A renewal that fails for any reason also
    /// terminates the session.
    pub fn new(renewer: R, terminator: SessionTerminator) -> Self {
        Self {
            inner: Arc::new(Inner {
                renewer,
                terminator,
                pending: Mutex::new(None),
            }),
        }
    }

    /// Whether a renewal is currently in flight
    pub fn is_renewing(&self) -> bool {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl<R> RefreshCoordinator<R>
where
    R: RenewCredentials + 'static,
{
    /// Obtains a renewed access credential
    ///
    /// Starts a renewal if none is in flight, otherwise waits for the one that
    /// is. Failures are not retried; the session is terminated instead.
    pub async fn ensure_fresh_credential(&self) -> Result<AccessToken, RefreshFailure> {
        let renewal = {
            let mut pending = self
                .inner
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            match &*pending {
                Some(renewal) => {
                    tracing::debug!("joining in-flight credential renewal");
                    renewal.clone()
                }
                None => {
                    tracing::debug!("starting credential renewal");
                    let renewal = renew(Arc::clone(&self.inner)).boxed().shared();
                    *pending = Some(renewal.clone());
                    renewal
                }
            }
        };

        renewal.await
    }
}

async fn renew<R>(inner: Arc<Inner<R>>) -> Result<AccessToken, RefreshFailure>
where
    R: RenewCredentials,
{
    let result = inner.perform_renewal().await;

    inner
        .pending
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();

    result
}

impl<R> Inner<R>
where
    R: RenewCredentials,
{
    async fn perform_renewal(&self) -> Result<AccessToken, RefreshFailure> {
        let Some(refresh_token) = self.terminator.store().refresh_token() else {
            self.terminator.terminate("no refresh credential available");
            return Err(RefreshFailure::NoRefreshCredential);
        };

        match self.renewer.renew(&refresh_token).await {
            Ok(pair) => {
                tracing::info!("renewed credentials");
                let (access, _) = pair.into_parts();
                Ok(access)
            }
            Err(error) => {
                tracing::warn!(
                    error = (&error as &dyn error::Error),
                    "credential renewal failed"
                );
                self.terminator.terminate("credential renewal failed");
                Err(RefreshFailure::Renewal(Arc::new(error)))
            }
        }
    }
}

#[async_trait]
impl<R> FreshCredentialSource for RefreshCoordinator<R>
where
    R: RenewCredentials + 'static,
{
    async fn fresh_credential(&self) -> Result<AccessToken, RefreshFailure> {
        self.ensure_fresh_credential().await
    }
}

impl<R> fmt::Debug for RefreshCoordinator<R> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("renewing", &self.is_renewing())
            .field("terminator", &self.inner.terminator)
            .finish_non_exhaustive()
    }
}
