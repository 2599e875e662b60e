//! Wiring a complete session together

use std::{fmt, sync::Arc};

use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, Middleware};
use vitrine_tokens::{
    store::FileSessionPersistence, CredentialPair, CredentialStore, EmailRef, EntryPoint,
    NoEntryPoint, PasswordRef, RefreshCoordinator, SessionTerminator, UserProfile,
};

use crate::{
    config::{AuthEndpoints, ConfigError, SessionConfig},
    gateway::{AuthGateway, GatewayError, Registration},
    middleware::SessionMiddleware,
};

/// A signed-in (or signed-out) session against the CMS API
///
/// Hands out a [`ClientWithMiddleware`] for calls to the API. Calls made
/// through it carry the current access credential, and are renewed and
/// retried once if that credential is rejected.
#[derive(Clone, Debug)]
pub struct Session {
    endpoints: AuthEndpoints,
    terminator: SessionTerminator,
    gateway: AuthGateway,
    coordinator: RefreshCoordinator<AuthGateway>,
    client: ClientWithMiddleware,
}

impl Session {
    /// Starts building a session from `config`
    pub fn builder(config: SessionConfig) -> SessionBuilder {
        SessionBuilder {
            config,
            entry_point: Arc::new(NoEntryPoint),
            store: None,
            http: None,
            middleware: Vec::new(),
        }
    }

    /// The client to make API calls with
    pub fn client(&self) -> &ClientWithMiddleware {
        &self.client
    }

    /// The authentication endpoints
    pub fn gateway(&self) -> &AuthGateway {
        &self.gateway
    }

    /// The coordinator through which rejected credentials are renewed
    pub fn coordinator(&self) -> &RefreshCoordinator<AuthGateway> {
        &self.coordinator
    }

    /// The store holding this session's credentials
    pub fn store(&self) -> &CredentialStore {
        self.terminator.store()
    }

    /// Ends the session when it can no longer be renewed
    pub fn terminator(&self) -> &SessionTerminator {
        &self.terminator
    }

    /// The resolved authentication endpoints
    pub fn endpoints(&self) -> &AuthEndpoints {
        &self.endpoints
    }

    /// Signs in with an email address and password
    pub async fn login(
        &self,
        email: &EmailRef,
        password: &PasswordRef,
    ) -> Result<CredentialPair, GatewayError> {
        self.gateway.login(email, password).await
    }

    /// Creates an account and signs in to it
    pub async fn register(&self, registration: &Registration) -> Result<CredentialPair, GatewayError> {
        self.gateway.register(registration).await
    }

    /// Signs out, clearing the store even if the backend cannot be reached
    pub async fn logout(&self) -> Result<(), GatewayError> {
        self.gateway.logout().await
    }

    /// Whether a usable access credential is held
    pub fn is_authenticated(&self) -> bool {
        self.gateway.is_authenticated()
    }

    /// The signed-in user, as last reported by the backend
    pub fn current_user(&self) -> Option<UserProfile> {
        self.gateway.current_user()
    }
}

/// Builder for a [`Session`]
pub struct SessionBuilder {
    config: SessionConfig,
    entry_point: Arc<dyn EntryPoint>,
    store: Option<CredentialStore>,
    http: Option<reqwest::Client>,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl SessionBuilder {
    /// Sets where the application goes once the session has ended
    pub fn with_entry_point(self, entry_point: impl EntryPoint + 'static) -> Self {
        Self {
            entry_point: Arc::new(entry_point),
            ..self
        }
    }

    /// Uses an existing store instead of the one implied by the configuration
    pub fn with_store(self, store: CredentialStore) -> Self {
        Self {
            store: Some(store),
            ..self
        }
    }

    /// Uses an existing HTTP client
    ///
    /// The configured request timeout is not applied to a client supplied
    /// this way.
    pub fn with_http_client(self, http: reqwest::Client) -> Self {
        Self {
            http: Some(http),
            ..self
        }
    }

    /// Adds middleware that runs after session handling, closer to the network
    ///
    /// Applies to both API calls and calls to the authentication endpoints.
    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Builds the session
    ///
    /// If the configuration names a session file, any session persisted there
    /// is restored.
    pub fn build(self) -> Result<Session, ConfigError> {
        let endpoints = self.config.endpoints()?;

        let store = match (self.store, &self.config.session_file) {
            (Some(store), _) => store,
            (None, Some(path)) => CredentialStore::open(FileSessionPersistence::new(path.clone())),
            (None, None) => CredentialStore::in_memory(),
        };

        let http = match self.http {
            Some(http) => http,
            None => reqwest::Client::builder()
                .timeout(self.config.request_timeout())
                .build()
                .map_err(ConfigError::HttpClient)?,
        };

        let terminator = SessionTerminator::new(store.clone(), self.entry_point);

        let stack = |session_middleware: SessionMiddleware| {
            self.middleware.iter().fold(
                ClientBuilder::new(http.clone()).with(session_middleware),
                |builder, middleware| builder.with_arc(Arc::clone(middleware)),
            )
        };

        let auth_client = stack(SessionMiddleware::new(terminator.clone(), endpoints.clone())).build();
        let gateway = AuthGateway::new(auth_client, endpoints.clone(), store, self.config.codec());

        let coordinator = RefreshCoordinator::new(gateway.clone(), terminator.clone());
        let client = stack(
            SessionMiddleware::new(terminator.clone(), endpoints.clone())
                .with_renewal(Arc::new(coordinator.clone())),
        )
        .build();

        tracing::debug!(
            api_base_url = %endpoints.base,
            restored = !gateway.store().snapshot().is_empty(),
            "session ready"
        );

        Ok(Session {
            endpoints,
            terminator,
            gateway,
            coordinator,
            client,
        })
    }
}

impl fmt::Debug for SessionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SessionBuilder")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("middleware", &self.middleware.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use color_eyre::Result;
    use reqwest::StatusCode;
    use vitrine_tokens::{Email, Password, RefreshFailure};

    use super::*;
    use crate::{
        middleware::SessionError,
        test_backend::{FakeBackend, BASE_URL},
    };

    fn config() -> SessionConfig {
        SessionConfig::new(BASE_URL.parse().expect("valid base URL"))
    }

    fn build(backend: &Arc<FakeBackend>, config: SessionConfig) -> Result<Session> {
        Ok(Session::builder(config)
            .with_middleware(backend.clone())
            .build()?)
    }

    #[tokio::test]
    async fn login_then_call_the_api() -> Result<()> {
        let backend = Arc::new(FakeBackend::new());
        let session = build(&backend, config())?;

        session
            .login(
                &Email::from_static("ada@example.com"),
                &Password::from_static("hunter2"),
            )
            .await?;
        let resp = session
            .client()
            .get(format!("{BASE_URL}content"))
            .send()
            .await?;

        assert!(session.is_authenticated());
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn signed_out_calls_are_not_renewed() -> Result<()> {
        let backend = Arc::new(FakeBackend::new());
        let session = build(&backend, config())?;
        backend.seed_accepted(session.store());

        session.logout().await?;
        let result = session
            .client()
            .get(format!("{BASE_URL}content"))
            .send()
            .await;

        let error = result.expect_err("no credentials to renew with");
        let session_error = match &error {
            reqwest_middleware::Error::Middleware(error) => error.downcast_ref::<SessionError>(),
            reqwest_middleware::Error::Reqwest(_) => None,
        };
        assert!(matches!(
            session_error,
            Some(SessionError::Renewal(RefreshFailure::NoRefreshCredential))
        ));
        assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 0);
        assert!(session.current_user().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn session_file_restores_across_builds() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = config().with_session_file(dir.path().join("session.json"));
        let backend = Arc::new(FakeBackend::new());

        let first = build(&backend, config.clone())?;
        first
            .login(
                &Email::from_static("ada@example.com"),
                &Password::from_static("hunter2"),
            )
            .await?;

        let second = build(&backend, config)?;

        assert!(second.is_authenticated());
        assert_eq!(
            second.current_user().map(|u| u.email),
            Some(Email::from_static("ada@example.com"))
        );
        Ok(())
    }

    #[test]
    fn invalid_base_url_is_reported() {
        let config = SessionConfig::new("data:text/plain,hello".parse().expect("valid URL"));
        let result = Session::builder(config).build();
        assert!(matches!(result, Err(ConfigError::CannotBeABase(_))));
    }
}
