//! Helpers for minting signed credentials in tests
//!
//! Credentials minted here are real HS256 JWTs, signed with a throwaway
//! shared secret, so they exercise the same decoding paths as credentials
//! issued by the backend.

use aliri::{jwa, jwt, Jwk, Jwt};
use aliri_base64::Base64UrlRef;
use aliri_clock::{DurationSecs, UnixTime};

use crate::{
    AccessToken, CredentialClaims, CredentialCodec, CredentialKind, CredentialPair, RefreshToken,
    Role,
};

/// Issuer expected by [`CredentialMinter::codec()`]
pub const TEST_ISSUER: &str = "vitrine-api";
/// Audience of access credentials minted by default
pub const TEST_ACCESS_AUDIENCE: &str = "vitrine-client";
/// Audience of refresh credentials minted by default
pub const TEST_REFRESH_AUDIENCE: &str = "vitrine-refresh";

const SHARED_SECRET: &[u8] = b"vitrine-test-secret";

/// Lifetime of access credentials minted by [`CredentialMinter::pair()`]
pub const ACCESS_LIFETIME: DurationSecs = DurationSecs(15 * 60);
/// Lifetime of refresh credentials minted by [`CredentialMinter::pair()`]
pub const REFRESH_LIFETIME: DurationSecs = DurationSecs(7 * 24 * 60 * 60);

/// Mints credentials the way the backend would
#[derive(Clone, Debug)]
pub struct CredentialMinter {
    key: Jwk,
    issuer: jwt::Issuer,
}

impl Default for CredentialMinter {
    fn default() -> Self {
        let secret = Base64UrlRef::from_slice(SHARED_SECRET).to_owned();
        let key = Jwk::from(jwa::Hmac::new(secret)).with_algorithm(jwa::Algorithm::HS256);

        Self {
            key,
            issuer: jwt::Issuer::from_static(TEST_ISSUER),
        }
    }
}

impl CredentialMinter {
    /// Mints credentials claiming a different issuer
    ///
    /// The codec returned by [`codec()`][Self::codec()] keeps expecting
    /// [`TEST_ISSUER`].
    pub fn with_issuer(self, issuer: &str) -> Self {
        Self {
            issuer: jwt::Issuer::new(issuer.to_owned()),
            ..self
        }
    }

    /// A codec that accepts credentials minted with the defaults
    pub fn codec(&self) -> CredentialCodec {
        CredentialCodec::new(
            jwt::Issuer::from_static(TEST_ISSUER),
            jwt::Audience::from_static(TEST_ACCESS_AUDIENCE),
            jwt::Audience::from_static(TEST_REFRESH_AUDIENCE),
        )
    }

    /// Signs arbitrary claims
    pub fn sign(&self, claims: &CredentialClaims) -> Jwt {
        let headers = jwt::BasicHeaders::new(jwa::Algorithm::HS256);
        Jwt::try_from_parts_with_signature(&headers, claims, &self.key)
            .expect("HMAC signing with a fixed key does not fail")
    }

    /// Mints an access credential for `subject` with the `editor` role
    pub fn access(&self, subject: &str, expiry: UnixTime) -> AccessToken {
        let claims = CredentialClaims::new(
            CredentialKind::Access,
            jwt::Subject::new(subject.to_owned()),
            self.issuer.clone(),
            jwt::Audience::from_static(TEST_ACCESS_AUDIENCE),
            expiry,
        )
        .with_role(Role::from_static("editor"));

        AccessToken::new(self.sign(&claims).as_str().to_owned())
    }

    /// Mints a refresh credential for `subject`
    pub fn refresh(&self, subject: &str, expiry: UnixTime) -> RefreshToken {
        let claims = CredentialClaims::new(
            CredentialKind::Refresh,
            jwt::Subject::new(subject.to_owned()),
            self.issuer.clone(),
            jwt::Audience::from_static(TEST_REFRESH_AUDIENCE),
            expiry,
        );

        RefreshToken::new(self.sign(&claims).as_str().to_owned())
    }

    /// Mints a fresh credential pair issued at `now`
    pub fn pair(&self, subject: &str, now: UnixTime) -> CredentialPair {
        CredentialPair::new(
            self.access(subject, UnixTime(now.0 + ACCESS_LIFETIME.0)),
            self.refresh(subject, UnixTime(now.0 + REFRESH_LIFETIME.0)),
        )
    }
}
