use std::sync::Arc;

use chrono::Utc;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use shared::{domain::UserId, protocol::LoginRequest};
use storage::LocalStore;
use tracing::{info, warn};

use crate::{error::AuthError, transport::HttpTransport};

/// Claims the client reads out of the backend's bearer token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

impl TokenClaims {
    pub fn subject(&self) -> Option<&UserId> {
        self.sub.as_ref().or(self.user_id.as_ref())
    }
}

/// Reads the token payload. The signature is the backend's business; the
/// client only needs the claims.
pub fn decode_claims(token: &str) -> Option<TokenClaims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    match decode::<TokenClaims>(token, &DecodingKey::from_secret(&[]), &validation) {
        Ok(data) => Some(data.claims),
        Err(err) => {
            warn!(error = %err, "auth: token could not be decoded");
            None
        }
    }
}

/// An undecodable token counts as expired; a token without `exp` does not.
pub fn is_token_expired(token: &str) -> bool {
    match decode_claims(token) {
        Some(claims) => claims
            .exp
            .is_some_and(|exp| exp < Utc::now().timestamp()),
        None => true,
    }
}

pub struct AuthSession {
    store: LocalStore,
    http: Arc<HttpTransport>,
}

impl AuthSession {
    pub fn new(store: LocalStore, http: Arc<HttpTransport>) -> Self {
        Self { store, http }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<TokenClaims, AuthError> {
        let (email, password) = (email.trim(), password.trim());
        if email.is_empty() || password.is_empty() {
            return Err(AuthError::MissingCredentials);
        }

        let token = self
            .http
            .login(&LoginRequest {
                email: email.to_string(),
                password: password.to_string(),
            })
            .await?;
        if token.trim().is_empty() {
            return Err(AuthError::MissingToken);
        }

        self.store.set_auth_token(&token).await?;
        let claims = decode_claims(&token).unwrap_or_default();
        self.store.set_user_data(&claims).await?;
        self.http.set_token(Some(token)).await;
        info!(user_id = ?claims.subject(), "auth: signed in");
        Ok(claims)
    }

    /// Picks up a previously stored token. An expired token is cleared.
    pub async fn restore(&self) -> Result<Option<TokenClaims>, AuthError> {
        let Some(token) = self.store.auth_token().await? else {
            return Ok(None);
        };
        if is_token_expired(&token) {
            info!("auth: stored token expired; signing out");
            self.sign_out().await?;
            return Ok(None);
        }
        let claims = decode_claims(&token).unwrap_or_default();
        self.http.set_token(Some(token)).await;
        Ok(Some(claims))
    }

    pub async fn current_user_id(&self) -> Result<Option<UserId>, AuthError> {
        Ok(self
            .restore()
            .await?
            .and_then(|claims| claims.subject().cloned()))
    }

    pub async fn sign_out(&self) -> Result<(), AuthError> {
        self.store.clear_session().await?;
        self.http.set_token(None).await;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/auth_tests.rs"]
mod tests;
