//! Wire formats of the authentication endpoints

use serde::{Deserialize, Serialize};
use vitrine_tokens::{
    AccessToken, AccessTokenRef, CredentialPair, Email, EmailRef, Password, PasswordRef,
    RefreshToken, RefreshTokenRef, UserProfile, Username,
};

/// Details for creating an account
#[derive(Clone, Debug, Serialize)]
pub struct Registration {
    /// Desired login name
    pub username: Username,
    /// Contact address, also used to sign in
    pub email: Email,
    /// Desired password
    pub password: Password,
}

#[derive(Debug, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub email: &'a EmailRef,
    pub password: &'a PasswordRef,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RefreshRequest<'a> {
    pub refresh_token: &'a RefreshTokenRef,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LogoutRequest<'a> {
    pub access_token: &'a AccessTokenRef,
    pub refresh_token: &'a RefreshTokenRef,
}

/// The body returned by a successful register, login, or refresh
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AuthResponse {
    pub access_token: AccessToken,
    pub refresh_token: RefreshToken,
    #[serde(default)]
    pub user: Option<UserProfile>,
}

impl AuthResponse {
    pub fn into_parts(self) -> (CredentialPair, Option<UserProfile>) {
        (
            CredentialPair::new(self.access_token, self.refresh_token),
            self.user,
        )
    }
}
