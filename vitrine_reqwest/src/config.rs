//! Session configuration

use std::{path::PathBuf, time::Duration};

use aliri::jwt;
use aliri_clock::DurationSecs;
use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;
use vitrine_tokens::CredentialCodec;

/// An error in the session configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration document could not be parsed
    #[error("unable to parse session configuration")]
    Parse(#[from] serde_json::Error),

    /// The API base URL cannot have paths joined onto it
    #[error("API base URL `{0}` cannot be used as a base")]
    CannotBeABase(Url),

    /// An endpoint path does not form a valid URL
    #[error("invalid path `{path}` for the {endpoint} endpoint")]
    InvalidEndpoint {
        /// Which endpoint was misconfigured
        endpoint: &'static str,
        /// The configured path
        path: String,
        /// The reason the path was rejected
        #[source]
        source: url::ParseError,
    },

    /// The HTTP client could not be constructed
    #[error("unable to construct HTTP client")]
    HttpClient(#[source] reqwest::Error),
}

/// Paths of the authentication endpoints, relative to the API base URL
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EndpointPaths {
    /// Account creation
    pub register: String,
    /// Sign in with email and password
    pub login: String,
    /// Credential renewal
    pub refresh: String,
    /// Sign out
    pub logout: String,
}

impl Default for EndpointPaths {
    fn default() -> Self {
        Self {
            register: "auth/register".into(),
            login: "auth/login".into(),
            refresh: "auth/refresh".into(),
            logout: "auth/logout".into(),
        }
    }
}

/// Absolute URLs of the authentication endpoints
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthEndpoints {
    /// The API base URL every endpoint is resolved against
    pub base: Url,
    /// Account creation
    pub register: Url,
    /// Sign in with email and password
    pub login: Url,
    /// Credential renewal
    pub refresh: Url,
    /// Sign out
    pub logout: Url,
}

impl AuthEndpoints {
    /// Whether `url` addresses the credential renewal endpoint
    ///
    /// Query and fragment are ignored.
    pub fn is_refresh(&self, url: &Url) -> bool {
        url.origin() == self.refresh.origin() && url.path() == self.refresh.path()
    }
}

/// Settings for a signed-in session
#[derive(Clone, Debug, Deserialize)]
pub struct SessionConfig {
    /// Root of the CMS API
    pub api_base_url: Url,

    /// Paths of the authentication endpoints
    #[serde(default)]
    pub endpoints: EndpointPaths,

    /// Per-request timeout, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Issuer credentials must come from
    #[serde(default = "default_issuer")]
    pub issuer: jwt::Issuer,

    /// Audience of access credentials
    #[serde(default = "default_access_audience")]
    pub access_audience: jwt::Audience,

    /// Audience of refresh credentials
    #[serde(default = "default_refresh_audience")]
    pub refresh_audience: jwt::Audience,

    /// Seconds before expiry at which an access credential is treated as expired
    #[serde(default = "default_skew_buffer_secs")]
    pub skew_buffer_secs: u64,

    /// Where to persist the session between runs
    ///
    /// When absent, the session is kept in memory only.
    #[serde(default)]
    pub session_file: Option<PathBuf>,
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_issuer() -> jwt::Issuer {
    jwt::Issuer::from_static("vitrine-api")
}

fn default_access_audience() -> jwt::Audience {
    jwt::Audience::from_static("vitrine-client")
}

fn default_refresh_audience() -> jwt::Audience {
    jwt::Audience::from_static("vitrine-refresh")
}

fn default_skew_buffer_secs() -> u64 {
    vitrine_tokens::DEFAULT_SKEW_BUFFER.0
}

impl SessionConfig {
    /// Constructs a configuration for the API at `api_base_url` with defaults for everything else
    pub fn new(api_base_url: Url) -> Self {
        Self {
            api_base_url,
            endpoints: EndpointPaths::default(),
            request_timeout_secs: default_request_timeout_secs(),
            issuer: default_issuer(),
            access_audience: default_access_audience(),
            refresh_audience: default_refresh_audience(),
            skew_buffer_secs: default_skew_buffer_secs(),
            session_file: None,
        }
    }

    /// Parses a configuration from JSON
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Sets the per-request timeout
    pub fn with_request_timeout(self, timeout: Duration) -> Self {
        Self {
            request_timeout_secs: timeout.as_secs(),
            ..self
        }
    }

    /// Sets the issuer and audiences that credentials must carry
    pub fn with_identity(
        self,
        issuer: jwt::Issuer,
        access_audience: jwt::Audience,
        refresh_audience: jwt::Audience,
    ) -> Self {
        Self {
            issuer,
            access_audience,
            refresh_audience,
            ..self
        }
    }

    /// Sets the margin before expiry at which credentials stop being presented
    pub fn with_skew_buffer(self, skew_buffer: DurationSecs) -> Self {
        Self {
            skew_buffer_secs: skew_buffer.0,
            ..self
        }
    }

    /// Persists the session to `path`
    pub fn with_session_file(self, path: impl Into<PathBuf>) -> Self {
        Self {
            session_file: Some(path.into()),
            ..self
        }
    }

    /// The per-request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// A codec judging credentials against this configuration
    pub fn codec(&self) -> CredentialCodec {
        CredentialCodec::new(
            self.issuer.clone(),
            self.access_audience.clone(),
            self.refresh_audience.clone(),
        )
        .with_skew_buffer(DurationSecs(self.skew_buffer_secs))
    }

    /// Resolves the endpoint paths against the API base URL
    ///
    /// A base URL without a trailing slash is treated as a directory, so
    /// `https://cms.example.com/api` and `https://cms.example.com/api/` resolve
    /// the same way.
    pub fn endpoints(&self) -> Result<AuthEndpoints, ConfigError> {
        if self.api_base_url.cannot_be_a_base() {
            return Err(ConfigError::CannotBeABase(self.api_base_url.clone()));
        }

        let mut base = self.api_base_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let join = |endpoint: &'static str, path: &str| {
            base.join(path.trim_start_matches('/'))
                .map_err(|source| ConfigError::InvalidEndpoint {
                    endpoint,
                    path: path.to_owned(),
                    source,
                })
        };

        Ok(AuthEndpoints {
            register: join("register", &self.endpoints.register)?,
            login: join("login", &self.endpoints.login)?,
            refresh: join("refresh", &self.endpoints.refresh)?,
            logout: join("logout", &self.endpoints.logout)?,
            base,
        })
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;

    use super::*;

    #[test]
    fn minimal_document_uses_defaults() -> Result<()> {
        let config = SessionConfig::from_json(r#"{ "api_base_url": "https://cms.example.com/api" }"#)?;

        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.skew_buffer_secs, 30);
        assert_eq!(config.issuer.as_str(), "vitrine-api");
        assert_eq!(config.endpoints, EndpointPaths::default());
        assert!(config.session_file.is_none());
        Ok(())
    }

    #[test]
    fn overrides_are_honored() -> Result<()> {
        let config = SessionConfig::from_json(
            r#"{
                "api_base_url": "https://cms.example.com/",
                "endpoints": { "refresh": "session/renew" },
                "request_timeout_secs": 3,
                "skew_buffer_secs": 45,
                "session_file": "/tmp/session.json"
            }"#,
        )?;

        let endpoints = config.endpoints()?;
        assert_eq!(
            endpoints.refresh.as_str(),
            "https://cms.example.com/session/renew"
        );
        assert_eq!(endpoints.login.as_str(), "https://cms.example.com/auth/login");
        assert_eq!(config.codec().skew_buffer(), DurationSecs(45));
        assert_eq!(config.request_timeout(), Duration::from_secs(3));
        Ok(())
    }

    #[test]
    fn missing_base_url_is_rejected() {
        let result = SessionConfig::from_json("{}");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    mod endpoints {
        use super::*;

        #[test]
        fn base_without_trailing_slash_keeps_its_path() -> Result<()> {
            let config = SessionConfig::new("https://cms.example.com/api".parse()?);
            let endpoints = config.endpoints()?;

            assert_eq!(
                endpoints.login.as_str(),
                "https://cms.example.com/api/auth/login"
            );
            assert_eq!(endpoints.base.as_str(), "https://cms.example.com/api/");
            Ok(())
        }

        #[test]
        fn refresh_endpoint_is_recognized_ignoring_query() -> Result<()> {
            let endpoints = SessionConfig::new("https://cms.example.com/api/".parse()?).endpoints()?;

            assert!(endpoints.is_refresh(&"https://cms.example.com/api/auth/refresh?x=1".parse()?));
            assert!(!endpoints.is_refresh(&"https://cms.example.com/api/auth/login".parse()?));
            assert!(!endpoints.is_refresh(&"https://other.example.com/api/auth/refresh".parse()?));
            Ok(())
        }

        #[test]
        fn opaque_base_url_is_rejected() -> Result<()> {
            let config = SessionConfig::new("mailto:cms@example.com".parse()?);
            assert!(matches!(
                config.endpoints(),
                Err(ConfigError::CannotBeABase(_))
            ));
            Ok(())
        }
    }
}
