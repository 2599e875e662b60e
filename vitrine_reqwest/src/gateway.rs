//! Network operations against the authentication endpoints

use std::{error, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{StatusCode, Url};
use reqwest_middleware::ClientWithMiddleware;
use serde::Serialize;
use thiserror::Error;
use vitrine_tokens::{
    CredentialCodec, CredentialKind, CredentialPair, CredentialStore, EmailRef, PasswordRef,
    RefreshTokenRef, RenewCredentials, UserProfile,
};

use crate::config::AuthEndpoints;

pub mod dto;

pub use dto::Registration;

/// An error while talking to the authentication endpoints
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The request could not be sent
    #[error("error sending request to authentication endpoint")]
    RequestSend(#[source] reqwest_middleware::Error),

    /// The endpoint answered with an error status
    #[error("authentication endpoint rejected the request with {status}: {body}")]
    Rejected {
        /// The status returned
        status: StatusCode,
        /// The body of the error
        body: String,
    },

    /// The response could not be read
    #[error("error reading response body")]
    BodyRead(#[source] reqwest::Error),

    /// The response did not contain the expected credentials
    #[error("error deserializing credentials from response")]
    CredentialsBody(#[from] serde_json::Error),
}

impl GatewayError {
    /// The status the endpoint answered with, if it answered at all
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Rejected { status, .. } => Some(*status),
            Self::RequestSend(reqwest_middleware::Error::Reqwest(error)) | Self::BodyRead(error) => {
                error.status()
            }
            Self::RequestSend(_) | Self::CredentialsBody(_) => None,
        }
    }
}

/// Performs register, login, refresh, and logout, recording the results in a [`CredentialStore`]
///
/// The client handed to the gateway must not attempt credential renewal
/// itself. Construct it with a [`SessionMiddleware`][crate::SessionMiddleware]
/// that has no renewal source, so that a failed refresh ends the session
/// instead of recursing.
#[derive(Clone, Debug)]
pub struct AuthGateway {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    client: ClientWithMiddleware,
    endpoints: AuthEndpoints,
    store: CredentialStore,
    codec: CredentialCodec,
}

impl AuthGateway {
    /// Constructs a gateway
    pub fn new(
        client: ClientWithMiddleware,
        endpoints: AuthEndpoints,
        store: CredentialStore,
        codec: CredentialCodec,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                endpoints,
                store,
                codec,
            }),
        }
    }

    /// Creates an account and signs in to it
    #[tracing::instrument(err, skip(self, registration), fields(username = %registration.username))]
    pub async fn register(&self, registration: &Registration) -> Result<CredentialPair, GatewayError> {
        self.exchange(&self.inner.endpoints.register, registration)
            .await
    }

    /// Signs in with an email address and password
    #[tracing::instrument(err, skip(self, password))]
    pub async fn login(
        &self,
        email: &EmailRef,
        password: &PasswordRef,
    ) -> Result<CredentialPair, GatewayError> {
        self.exchange(
            &self.inner.endpoints.login,
            &dto::LoginRequest { email, password },
        )
        .await
    }

    /// Exchanges a refresh credential for a new credential pair
    ///
    /// Failures are reported as-is; no retry is attempted.
    #[tracing::instrument(err, skip_all)]
    pub async fn refresh(
        &self,
        refresh_token: &RefreshTokenRef,
    ) -> Result<CredentialPair, GatewayError> {
        self.exchange(
            &self.inner.endpoints.refresh,
            &dto::RefreshRequest { refresh_token },
        )
        .await
    }

    /// Signs out
    ///
    /// The backend is told to revoke the current credentials when both are
    /// held. The store is cleared regardless of whether that call succeeds.
    #[tracing::instrument(skip(self))]
    pub async fn logout(&self) -> Result<(), GatewayError> {
        let session = self.inner.store.snapshot();

        let result = match (&session.access_token, &session.refresh_token) {
            (Some(access_token), Some(refresh_token)) => self
                .post(
                    &self.inner.endpoints.logout,
                    &dto::LogoutRequest {
                        access_token,
                        refresh_token,
                    },
                )
                .await
                .map(drop),
            _ => {
                tracing::debug!("no credentials held, skipping revocation");
                Ok(())
            }
        };

        self.inner.store.clear();

        match &result {
            Ok(()) => tracing::info!("signed out"),
            Err(error) => tracing::warn!(
                error = (error as &dyn error::Error),
                "unable to revoke credentials, signed out locally"
            ),
        }

        result
    }

    /// Whether a usable access credential is held
    pub fn is_authenticated(&self) -> bool {
        self.inner
            .store
            .access_token()
            .map_or(false, |token| {
                self.inner
                    .codec
                    .validate(token.as_str(), CredentialKind::Access)
                    .is_ok()
            })
    }

    /// Whether the held access credential is missing, undecodable, or within the skew buffer of expiry
    pub fn is_access_token_expired(&self) -> bool {
        self.inner
            .store
            .access_token()
            .map_or(true, |token| self.inner.codec.is_expired(token.as_str()))
    }

    /// The signed-in user, as last reported by the backend
    pub fn current_user(&self) -> Option<UserProfile> {
        self.inner.store.profile()
    }

    /// The store this gateway records credentials in
    pub fn store(&self) -> &CredentialStore {
        &self.inner.store
    }

    async fn exchange<B>(&self, url: &Url, body: &B) -> Result<CredentialPair, GatewayError>
    where
        B: Serialize + ?Sized,
    {
        let body = self.post(url, body).await?;
        let response: dto::AuthResponse = serde_json::from_slice(&body)?;
        let (pair, user) = response.into_parts();

        self.inner.store.set(&pair);
        if let Some(user) = user {
            tracing::debug!(user.id = %user.id, user.role = %user.role, "cached user profile");
            self.inner.store.set_profile(user);
        }

        tracing::info!("received new credentials");
        Ok(pair)
    }

    async fn post<B>(&self, url: &Url, body: &B) -> Result<Bytes, GatewayError>
    where
        B: Serialize + ?Sized,
    {
        tracing::trace!(%url, "calling authentication endpoint");

        let resp = self
            .inner
            .client
            .post(url.clone())
            .json(body)
            .send()
            .await
            .map_err(GatewayError::RequestSend)?;

        let status = resp.status();
        tracing::debug!(
            response.status = status.as_u16(),
            "received response from authentication endpoint"
        );

        let body = resp.bytes().await.map_err(GatewayError::BodyRead)?;

        if !status.is_success() {
            return Err(GatewayError::Rejected {
                status,
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        Ok(body)
    }
}

#[async_trait]
impl RenewCredentials for AuthGateway {
    type Error = GatewayError;

    async fn renew(&self, refresh_token: &RefreshTokenRef) -> Result<CredentialPair, GatewayError> {
        self.refresh(refresh_token).await
    }
}
