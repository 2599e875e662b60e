//! Middleware that keeps outgoing requests authenticated
//!
//! [`SessionMiddleware`] handles both sides of a call:
//!
//! * Before sending, it attaches the stored access credential as a bearer
//!   token, unless the request already carries an `Authorization` header or
//!   the predicate says the destination should not see it.
//! * After receiving, a `401` or `403` on a call it authenticated leads to one
//!   renewal through a [`FreshCredentialSource`] and one retry with the renewed
//!   credential. A failure of the refresh endpoint itself ends the session.
//!
//! A retried call is marked with a [`RetryMarker`] in the request extensions;
//! a marked call is never retried again.

use std::{error, fmt, sync::Arc};

use bytes::{BufMut, BytesMut};
use predicates::{prelude::*, reflection};
use reqwest::{header, Request, Response, StatusCode, Url};
use reqwest_middleware::{Middleware, Next, Result};
use thiserror::Error;
use vitrine_tokens::{
    AccessTokenRef, CredentialStore, FreshCredentialSource, RefreshFailure, SessionTerminator,
};

use crate::config::AuthEndpoints;

/// An error raised by the session middleware
///
/// Surfaced to callers as [`reqwest_middleware::Error::Middleware`].
#[derive(Debug, Error)]
pub enum SessionError {
    /// The access credential was rejected and could not be renewed
    #[error("access credential was rejected and could not be renewed")]
    Renewal(#[from] RefreshFailure),

    /// The renewed access credential cannot be sent as a header
    #[error("access credential is not a valid header value")]
    InvalidCredentialHeader(#[from] header::InvalidHeaderValue),
}

/// Records that a call has already been retried after renewal
///
/// Carried in the request extensions. A call whose marker is set is never
/// retried again; a further rejection is returned to the caller unchanged.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RetryMarker(pub bool);

impl RetryMarker {
    /// A marker for a call that has already been retried
    pub const RETRIED: Self = Self(true);

    /// Whether the call has been retried
    #[inline]
    pub fn is_retried(self) -> bool {
        self.0
    }
}

/// A middleware that attaches, renews, and retries session credentials
pub struct SessionMiddleware<P = SameOrigin> {
    store: CredentialStore,
    terminator: SessionTerminator,
    endpoints: AuthEndpoints,
    renewal: Option<Arc<dyn FreshCredentialSource>>,
    predicate: P,
}

impl SessionMiddleware<SameOrigin> {
    /// Constructs a middleware for the API described by `endpoints`
    ///
    /// Without a renewal source, rejected calls are returned as-is. By default
    /// credentials are only attached to requests with the same origin as the
    /// API base URL. To change this, provide a custom predicate with
    /// [`with_predicate()`][Self::with_predicate()].
    pub fn new(terminator: SessionTerminator, endpoints: AuthEndpoints) -> Self {
        Self {
            store: terminator.store().clone(),
            predicate: SameOrigin::new(&endpoints.base),
            terminator,
            endpoints,
            renewal: None,
        }
    }
}

impl<P> SessionMiddleware<P> {
    /// Replaces the default predicate with a custom predicate
    pub fn with_predicate<Q>(self, predicate: Q) -> SessionMiddleware<Q> {
        SessionMiddleware {
            store: self.store,
            terminator: self.terminator,
            endpoints: self.endpoints,
            renewal: self.renewal,
            predicate,
        }
    }

    /// Renews rejected credentials through `renewal` and retries once
    pub fn with_renewal(self, renewal: Arc<dyn FreshCredentialSource>) -> Self {
        Self {
            renewal: Some(renewal),
            ..self
        }
    }

    fn end_session_after_failed_refresh(&self, outcome: &Result<Response>) {
        match outcome {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => {
                tracing::debug!(
                    response.status = resp.status().as_u16(),
                    "refresh endpoint rejected the refresh credential"
                );
                self.terminator.terminate("refresh credential rejected");
            }
            Err(error) => {
                tracing::debug!(
                    error = (error as &dyn error::Error),
                    "refresh endpoint could not be reached"
                );
                self.terminator.terminate("refresh endpoint unreachable");
            }
        }
    }
}

fn bearer_value(token: &AccessTokenRef) -> std::result::Result<header::HeaderValue, header::InvalidHeaderValue> {
    let mut header_value = BytesMut::with_capacity(token.as_str().len() + 7);
    header_value.put_slice(b"Bearer ");
    header_value.put_slice(token.as_str().as_bytes());
    let mut value = header::HeaderValue::from_maybe_shared(header_value.freeze())?;
    value.set_sensitive(true);
    Ok(value)
}

fn is_rejection(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}

#[async_trait::async_trait]
impl<P> Middleware for SessionMiddleware<P>
where
    P: Predicate<Request> + Send + Sync + 'static,
{
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        let managed =
            self.predicate.eval(&req) && !req.headers().contains_key(header::AUTHORIZATION);

        if managed {
            if let Some(token) = self.store.access_token() {
                match bearer_value(&token) {
                    Ok(value) => {
                        req.headers_mut().insert(header::AUTHORIZATION, value);
                        tracing::trace!(url = %req.url(), "attached access credential");
                    }
                    Err(error) => tracing::warn!(
                        error = (&error as &dyn error::Error),
                        "stored access credential is not a valid header value, sending without it"
                    ),
                }
            }
        }

        if self.endpoints.is_refresh(req.url()) {
            let outcome = next.run(req, extensions).await;
            self.end_session_after_failed_refresh(&outcome);
            return outcome;
        }

        let renewal = match &self.renewal {
            Some(renewal) if managed => renewal,
            _ => return next.run(req, extensions).await,
        };

        let retry = req.try_clone();
        let resp = next.clone().run(req, extensions).await?;

        if !is_rejection(resp.status()) {
            return Ok(resp);
        }

        if extensions
            .get::<RetryMarker>()
            .map_or(false, |marker| marker.is_retried())
        {
            tracing::debug!(
                response.status = resp.status().as_u16(),
                "call was already retried, returning rejection"
            );
            return Ok(resp);
        }

        let Some(mut retry) = retry else {
            tracing::debug!("request body cannot be replayed, returning rejection");
            return Ok(resp);
        };

        tracing::debug!(
            response.status = resp.status().as_u16(),
            "access credential rejected, renewing"
        );
        extensions.insert(RetryMarker::RETRIED);

        let token = renewal
            .fresh_credential()
            .await
            .map_err(|error| reqwest_middleware::Error::middleware(SessionError::from(error)))?;
        let value = bearer_value(&token)
            .map_err(|error| reqwest_middleware::Error::middleware(SessionError::from(error)))?;
        retry.headers_mut().insert(header::AUTHORIZATION, value);

        tracing::trace!(url = %retry.url(), "retrying with renewed access credential");
        next.run(retry, extensions).await
    }
}

impl<P: fmt::Debug> fmt::Debug for SessionMiddleware<P> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SessionMiddleware")
            .field("store", &self.store)
            .field("refresh_endpoint", &self.endpoints.refresh.as_str())
            .field("renews", &self.renewal.is_some())
            .field("predicate", &self.predicate)
            .finish()
    }
}

/// Only attach credentials to requests with the same origin as the API
///
/// Keeps credentials away from object storage and third-party hosts.
#[derive(Clone, Debug)]
pub struct SameOrigin {
    base: Url,
}

impl SameOrigin {
    /// Construct a new predicate matching the origin of `base`
    pub fn new(base: &Url) -> Self {
        Self { base: base.clone() }
    }
}

impl Predicate<Request> for SameOrigin {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url().origin() == self.base.origin()
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case<'_>> {
        let result = self.eval(req);
        if result != expected {
            Some(
                reflection::Case::new(Some(self), result).add_product(reflection::Product::new(
                    "origin",
                    req.url().origin().ascii_serialization(),
                )),
            )
        } else {
            None
        }
    }
}

impl reflection::PredicateReflection for SameOrigin {}
impl fmt::Display for SameOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("origin == ")?;
        f.write_str(&self.base.origin().ascii_serialization())
    }
}
