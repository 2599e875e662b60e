//! An in-process stand-in for the CMS API

use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc, Mutex,
};

use aliri_clock::{Clock, System, UnixTime};
use reqwest::{header, Request, Response, StatusCode};
use reqwest_middleware::{ClientBuilder, Middleware, Next, Result};
use tokio::sync::watch;
use vitrine_tokens::{
    testing::CredentialMinter, CredentialPair, CredentialStore, EntryPoint, SessionTerminator,
};

use crate::{config::SessionConfig, AuthGateway, Session, SessionMiddleware};

pub(crate) const BASE_URL: &str = "https://cms.example.com/api/";
const API_HOST: &str = "cms.example.com";

#[derive(Debug, thiserror::Error)]
#[error("connection refused")]
struct Unreachable;

#[derive(Debug)]
struct Seen {
    path: String,
    authorization: Option<String>,
}

/// Serves auth endpoints and a protected API, short-circuiting the middleware stack
pub(crate) struct FakeBackend {
    minter: CredentialMinter,
    issued: AtomicU64,
    accepted: Mutex<Option<String>>,
    rejections: watch::Sender<usize>,
    seen: Mutex<Vec<Seen>>,
    pub refresh_calls: AtomicUsize,
    refresh_after_rejections: usize,
    refresh_status: StatusCode,
    refresh_body: Option<&'static str>,
    refresh_unreachable: bool,
    login_status: StatusCode,
    logout_status: StatusCode,
    always_reject: Option<StatusCode>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            minter: CredentialMinter::default(),
            issued: AtomicU64::new(0),
            accepted: Mutex::new(None),
            rejections: watch::channel(0).0,
            seen: Mutex::new(Vec::new()),
            refresh_calls: AtomicUsize::new(0),
            refresh_after_rejections: 0,
            refresh_status: StatusCode::OK,
            refresh_body: None,
            refresh_unreachable: false,
            login_status: StatusCode::OK,
            logout_status: StatusCode::NO_CONTENT,
            always_reject: None,
        }
    }

    pub fn refresh_fails_with(self, status: StatusCode) -> Self {
        Self {
            refresh_status: status,
            ..self
        }
    }

    /// Answers refresh calls with `body` instead of a new credential pair
    pub fn refresh_answers_with_body(self, body: &'static str) -> Self {
        Self {
            refresh_body: Some(body),
            ..self
        }
    }

    /// Fails refresh calls as though the backend could not be reached
    pub fn refresh_unreachable(self) -> Self {
        Self {
            refresh_unreachable: true,
            ..self
        }
    }

    /// Holds refresh responses until this many API calls have been rejected
    pub fn refresh_waits_for_rejections(self, count: usize) -> Self {
        Self {
            refresh_after_rejections: count,
            ..self
        }
    }

    pub fn login_fails_with(self, status: StatusCode) -> Self {
        Self {
            login_status: status,
            ..self
        }
    }

    pub fn logout_fails_with(self, status: StatusCode) -> Self {
        Self {
            logout_status: status,
            ..self
        }
    }

    /// Rejects every API call, whatever credential it carries
    pub fn always_rejects_with(self, status: StatusCode) -> Self {
        Self {
            always_reject: Some(status),
            ..self
        }
    }

    /// Stores a pair whose access credential the API no longer accepts
    pub fn seed(&self, store: &CredentialStore) -> CredentialPair {
        let pair = self.mint();
        store.set(&pair);
        pair
    }

    /// Stores a pair whose access credential the API accepts
    pub fn seed_accepted(&self, store: &CredentialStore) -> CredentialPair {
        let pair = self.seed(store);
        self.accept(&pair);
        pair
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.path.ends_with(path))
            .count()
    }

    pub fn last_authorization(&self, path: &str) -> Option<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|s| s.path.ends_with(path))
            .and_then(|s| s.authorization.clone())
    }

    fn mint(&self) -> CredentialPair {
        let offset = self.issued.fetch_add(1, Ordering::SeqCst);
        let now = System.now();
        self.minter.pair("user-1", UnixTime(now.0 + offset))
    }

    fn accept(&self, pair: &CredentialPair) {
        *self.accepted.lock().unwrap() = Some(format!("Bearer {}", pair.access().as_str()));
    }

    fn issue(&self) -> Response {
        let pair = self.mint();
        self.accept(&pair);

        let body = serde_json::json!({
            "accessToken": pair.access().as_str(),
            "refreshToken": pair.refresh().as_str(),
            "user": {
                "id": "42",
                "username": "ada",
                "email": "ada@example.com",
                "role": "editor",
            },
        });

        respond(StatusCode::OK, body.to_string())
    }

    fn reject(&self, status: StatusCode) -> Response {
        self.rejections.send_modify(|count| *count += 1);
        respond(status, r#"{"message":"unauthorized"}"#)
    }

    async fn refresh(&self) -> Result<Response> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);

        let target = self.refresh_after_rejections;
        let mut rejections = self.rejections.subscribe();
        let _ = rejections.wait_for(|count| *count >= target).await;

        if self.refresh_unreachable {
            return Err(reqwest_middleware::Error::middleware(Unreachable));
        }

        let resp = match (self.refresh_status.is_success(), self.refresh_body) {
            (true, Some(body)) => respond(self.refresh_status, body),
            (true, None) => self.issue(),
            (false, _) => respond(self.refresh_status, r#"{"message":"invalid refresh token"}"#),
        };
        Ok(resp)
    }

    fn api(&self, authorization: Option<&str>) -> Response {
        if let Some(status) = self.always_reject {
            return self.reject(status);
        }

        let accepted = self.accepted.lock().unwrap().clone();
        match (authorization, accepted) {
            (Some(presented), Some(accepted)) if presented == accepted => {
                respond(StatusCode::OK, r#"{"items":[]}"#)
            }
            _ => self.reject(StatusCode::UNAUTHORIZED),
        }
    }
}

fn respond(status: StatusCode, body: impl Into<String>) -> Response {
    http::Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.into())
        .unwrap()
        .into()
}

#[async_trait::async_trait]
impl Middleware for FakeBackend {
    async fn handle(
        &self,
        req: Request,
        _: &mut http::Extensions,
        _: Next<'_>,
    ) -> Result<Response> {
        let path = req.url().path().to_owned();
        let authorization = req
            .headers()
            .get(header::AUTHORIZATION)
            .map(|v| v.to_str().unwrap().to_owned());

        self.seen.lock().unwrap().push(Seen {
            path: path.clone(),
            authorization: authorization.clone(),
        });

        if req.url().host_str() != Some(API_HOST) {
            return Ok(respond(StatusCode::OK, ""));
        }

        let resp = if path.ends_with("auth/login") || path.ends_with("auth/register") {
            if self.login_status.is_success() {
                self.issue()
            } else {
                respond(self.login_status, r#"{"message":"bad credentials"}"#)
            }
        } else if path.ends_with("auth/refresh") {
            self.refresh().await?
        } else if path.ends_with("auth/logout") {
            respond(self.logout_status, "")
        } else if path.ends_with("missing") {
            respond(StatusCode::NOT_FOUND, "")
        } else {
            self.api(authorization.as_deref())
        };

        Ok(resp)
    }
}

pub(crate) fn counting_entry_point() -> (Arc<dyn EntryPoint>, Arc<AtomicUsize>) {
    let entries = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&entries);
    let entry_point: Arc<dyn EntryPoint> = Arc::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    (entry_point, entries)
}

fn config() -> SessionConfig {
    SessionConfig::new(BASE_URL.parse().unwrap())
}

/// A bare gateway over the fake backend, without renewal
pub(crate) fn gateway_for(
    backend: &Arc<FakeBackend>,
    entry_point: Arc<dyn EntryPoint>,
) -> (AuthGateway, SessionTerminator) {
    let config = config();
    let endpoints = config.endpoints().unwrap();
    let store = CredentialStore::in_memory();
    let terminator = SessionTerminator::new(store.clone(), entry_point);

    let client = ClientBuilder::new(reqwest::Client::new())
        .with(SessionMiddleware::new(terminator.clone(), endpoints.clone()))
        .with_arc(backend.clone())
        .build();

    (
        AuthGateway::new(client, endpoints, store, config.codec()),
        terminator,
    )
}

/// A complete session over the fake backend, counting visits to the entry point
pub(crate) fn session_for(backend: &Arc<FakeBackend>) -> (Session, Arc<AtomicUsize>) {
    let entries = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&entries);

    let session = Session::builder(config())
        .with_entry_point(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .with_middleware(backend.clone())
        .build()
        .unwrap();

    (session, entries)
}
