//! Decoding and structural validation of bearer credentials
//!
//! Credentials are JWTs issued by the CMS backend. The client never holds the
//! backend's signing key, so the codec does not verify signatures. Instead it
//! inspects the payload to decide whether a credential is worth presenting:
//! it must be of the expected kind, come from the expected issuer, target the
//! audience for that kind, and not be about to expire.
//!
//! ```
//! use aliri::jwt;
//! use aliri_clock::UnixTime;
//! use vitrine_tokens::{CredentialCodec, CredentialKind, InvalidCredential};
//!
//! let codec = CredentialCodec::new(
//!     jwt::Issuer::from_static("vitrine-api"),
//!     jwt::Audience::from_static("vitrine-client"),
//!     jwt::Audience::from_static("vitrine-refresh"),
//! );
//!
//! let result = codec.validate_at("not-a-jwt", CredentialKind::Access, UnixTime(0));
//! assert!(matches!(result, Err(InvalidCredential::Malformed(_))));
//! ```

use std::fmt;

use aliri::{jwt, JwtRef};
use aliri_base64::Base64Url;
use aliri_clock::{Clock, DurationSecs, System, UnixTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Role, RoleRef};

/// Margin subtracted from a credential's expiry to absorb clock differences
/// between the client and the backend
pub const DEFAULT_SKEW_BUFFER: DurationSecs = DurationSecs(30);

/// The purpose a credential was issued for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialKind {
    /// Presented on API calls
    Access,
    /// Exchanged for a new credential pair
    Refresh,
}

impl CredentialKind {
    /// The discriminant carried in the credential's `type` claim
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The decoded payload of a credential
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[must_use]
pub struct CredentialClaims {
    sub: jwt::Subject,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    roles: Vec<Role>,
    #[serde(rename = "type")]
    kind: CredentialKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iat: Option<UnixTime>,
    exp: UnixTime,
    iss: jwt::Issuer,
    aud: jwt::Audiences,
}

impl CredentialClaims {
    /// Constructs a new set of claims without any roles
    pub fn new(
        kind: CredentialKind,
        subject: impl Into<jwt::Subject>,
        issuer: impl Into<jwt::Issuer>,
        audience: impl Into<jwt::Audiences>,
        expiry: UnixTime,
    ) -> Self {
        Self {
            sub: subject.into(),
            roles: Vec::new(),
            kind,
            iat: None,
            exp: expiry,
            iss: issuer.into(),
            aud: audience.into(),
        }
    }

    /// Sets the time the credential was issued
    pub fn with_issued_at(self, issued: UnixTime) -> Self {
        Self {
            iat: Some(issued),
            ..self
        }
    }

    /// Adds a role to the credential
    pub fn with_role(mut self, role: impl Into<Role>) -> Self {
        self.roles.push(role.into());
        self
    }

    /// The user the credential was issued to
    pub fn subject(&self) -> &jwt::SubjectRef {
        &self.sub
    }

    /// The roles granted by an access credential
    pub fn roles(&self) -> impl Iterator<Item = &RoleRef> {
        self.roles.iter().map(AsRef::as_ref)
    }

    /// The purpose the credential was issued for
    pub fn kind(&self) -> CredentialKind {
        self.kind
    }

    /// When the credential was issued, if stated
    pub fn issued_at(&self) -> Option<UnixTime> {
        self.iat
    }

    /// When the credential expires
    pub fn expiry(&self) -> UnixTime {
        self.exp
    }

    /// The backend identity that issued the credential
    pub fn issuer(&self) -> &jwt::IssuerRef {
        &self.iss
    }

    /// The audiences the credential is intended for
    pub fn audiences(&self) -> &jwt::Audiences {
        &self.aud
    }
}

impl jwt::CoreClaims for CredentialClaims {
    fn nbf(&self) -> Option<UnixTime> {
        None
    }

    fn exp(&self) -> Option<UnixTime> {
        Some(self.exp)
    }

    fn aud(&self) -> &jwt::Audiences {
        &self.aud
    }

    fn iss(&self) -> Option<&jwt::IssuerRef> {
        Some(&self.iss)
    }

    fn sub(&self) -> Option<&jwt::SubjectRef> {
        Some(&self.sub)
    }
}

/// A credential could not be decoded
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The credential does not have a header, payload, and signature section,
    /// or its header does not name a signing algorithm
    #[error("credential is not a well-formed JWT")]
    Structure(#[source] aliri::error::JwtVerifyError),

    /// The payload section is not base64url
    #[error("credential payload is not valid base64url")]
    PayloadEncoding(#[source] aliri_base64::InvalidBase64Data),

    /// The payload is missing claims or holds claims of the wrong shape
    #[error("credential payload does not hold the expected claims")]
    Claims(#[source] serde_json::Error),
}

/// The reason a credential was judged invalid
///
/// Checks are applied in the order the variants are declared; the first
/// failing check is reported.
#[derive(Debug, Error)]
pub enum InvalidCredential {
    /// The credential could not be decoded
    #[error("malformed credential")]
    Malformed(#[from] DecodeError),

    /// The credential was issued for another purpose
    #[error("expected {expected} credential, found {found} credential")]
    WrongType {
        /// The kind that was asked for
        expected: CredentialKind,
        /// The kind stated in the credential
        found: CredentialKind,
    },

    /// The credential was not issued by the backend
    #[error("credential issued by an unexpected issuer")]
    WrongIssuer,

    /// The credential targets an audience other than the one for its kind
    #[error("credential intended for a different audience")]
    WrongAudience,

    /// The credential expires within the skew buffer or has already expired
    #[error("credential expired")]
    Expired,
}

/// Decodes the payload of a credential without judging it
pub fn decode(token: &str) -> Result<CredentialClaims, DecodeError> {
    let decomposed = JwtRef::from_str(token)
        .decompose::<jwt::BasicHeaders>()
        .map_err(DecodeError::Structure)?;

    let payload = Base64Url::from_encoded(decomposed.untrusted_payload())
        .map_err(DecodeError::PayloadEncoding)?;

    serde_json::from_slice(payload.as_slice()).map_err(DecodeError::Claims)
}

/// Judges credentials against the backend's identity and the current time
#[derive(Clone, Debug)]
pub struct CredentialCodec<C = System> {
    issuer: jwt::Issuer,
    access_audience: jwt::Audience,
    refresh_audience: jwt::Audience,
    skew_buffer: DurationSecs,
    clock: C,
}

impl CredentialCodec<System> {
    /// Constructs a codec expecting credentials from `issuer`
    ///
    /// Access credentials must target `access_audience` and refresh credentials
    /// must target `refresh_audience`. Uses the default 30 second skew buffer and
    /// the system clock.
    pub fn new(
        issuer: jwt::Issuer,
        access_audience: jwt::Audience,
        refresh_audience: jwt::Audience,
    ) -> Self {
        Self {
            issuer,
            access_audience,
            refresh_audience,
            skew_buffer: DEFAULT_SKEW_BUFFER,
            clock: System,
        }
    }
}

impl<C> CredentialCodec<C> {
    /// Sets the margin before expiry at which a credential stops being presented
    pub fn with_skew_buffer(self, skew_buffer: DurationSecs) -> Self {
        Self {
            skew_buffer,
            ..self
        }
    }

    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> CredentialCodec<D> {
        CredentialCodec {
            issuer: self.issuer,
            access_audience: self.access_audience,
            refresh_audience: self.refresh_audience,
            skew_buffer: self.skew_buffer,
            clock,
        }
    }

    /// The issuer credentials must come from
    pub fn issuer(&self) -> &jwt::IssuerRef {
        &self.issuer
    }

    /// The audience a credential of the given kind must target
    pub fn audience_for(&self, kind: CredentialKind) -> &jwt::AudienceRef {
        match kind {
            CredentialKind::Access => &self.access_audience,
            CredentialKind::Refresh => &self.refresh_audience,
        }
    }

    /// The margin applied before expiry
    pub fn skew_buffer(&self) -> DurationSecs {
        self.skew_buffer
    }

    /// Decodes the payload of a credential without judging it
    pub fn decode(&self, token: &str) -> Result<CredentialClaims, DecodeError> {
        decode(token)
    }

    /// Validates a credential as of the provided time
    pub fn validate_at(
        &self,
        token: &str,
        expected: CredentialKind,
        now: UnixTime,
    ) -> Result<CredentialClaims, InvalidCredential> {
        let claims = decode(token)?;

        if claims.kind != expected {
            return Err(InvalidCredential::WrongType {
                expected,
                found: claims.kind,
            });
        }

        if claims.iss != self.issuer {
            return Err(InvalidCredential::WrongIssuer);
        }

        let audience = self.audience_for(expected);
        if !claims.aud.iter().any(|a| a == audience) {
            return Err(InvalidCredential::WrongAudience);
        }

        if !self.is_live_at(claims.exp, now) {
            return Err(InvalidCredential::Expired);
        }

        Ok(claims)
    }

    /// Whether a credential expiring at `expiry` may still be presented at `now`
    fn is_live_at(&self, expiry: UnixTime, now: UnixTime) -> bool {
        now.0.saturating_add(self.skew_buffer.0) < expiry.0
    }
}

impl<C: Clock> CredentialCodec<C> {
    /// Validates a credential against the current time
    pub fn validate(
        &self,
        token: &str,
        expected: CredentialKind,
    ) -> Result<CredentialClaims, InvalidCredential> {
        self.validate_at(token, expected, self.clock.now())
    }

    /// Whether a credential is unusable because of its age
    ///
    /// Undecodable credentials are treated as expired. Issuer, audience, and
    /// kind are not considered.
    pub fn is_expired(&self, token: &str) -> bool {
        match decode(token) {
            Ok(claims) => !self.is_live_at(claims.exp, self.clock.now()),
            Err(_) => true,
        }
    }
}
