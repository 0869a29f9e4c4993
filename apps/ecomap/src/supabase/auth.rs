use super::ensure_success;
use crate::error::GatewayError;
use crate::session::Identity;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::RwLock;

const EXPIRY_LEEWAY_SECONDS: i64 = 30;
const DEFAULT_TOKEN_TTL_SECONDS: i64 = 3600;

#[derive(Debug, Clone, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: Identity,
}

#[derive(Debug, Clone)]
struct AuthSession {
    access_token: String,
    refresh_token: String,
    expires_at: DateTime<Utc>,
    user: Identity,
}

impl AuthSession {
    fn from_token(token: TokenResponse, now: DateTime<Utc>) -> Self {
        let expires_at = token
            .expires_at
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .unwrap_or_else(|| {
                now + ChronoDuration::seconds(
                    token.expires_in.unwrap_or(DEFAULT_TOKEN_TTL_SECONDS),
                )
            });
        Self {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at,
            user: token.user,
        }
    }

    fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - ChronoDuration::seconds(EXPIRY_LEEWAY_SECONDS) <= now
    }
}

#[derive(Error, Debug)]
pub enum SignInError {
    #[error("invalid email or password")]
    InvalidCredentials,

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignUpOutcome {
    SignedIn(Identity),
    /// The account exists but the address must be confirmed before signing in.
    ConfirmationSent,
}

/// Holds the signed-in session and talks to the auth endpoints. Shared with
/// the realtime listener so every (re)join uses a current token.
pub(super) struct AuthClient {
    http: Client,
    base_url: String,
    anon_key: String,
    session: RwLock<Option<AuthSession>>,
}

impl AuthClient {
    pub(super) fn new(http: Client, base_url: String, anon_key: String) -> Self {
        Self {
            http,
            base_url,
            anon_key,
            session: RwLock::new(None),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Attaches the project key and the caller's bearer (user token when signed in).
    pub(super) fn authorize(
        &self,
        request: RequestBuilder,
        access_token: Option<&str>,
    ) -> RequestBuilder {
        let bearer = access_token.unwrap_or(self.anon_key.as_str());
        request
            .header("apikey", self.anon_key.as_str())
            .bearer_auth(bearer)
    }

    pub(super) async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Identity, SignInError> {
        let response = self
            .authorize(
                self.http
                    .post(self.endpoint("/auth/v1/token"))
                    .query(&[("grant_type", "password")]),
                None,
            )
            .json(&json!({ "email": email.trim(), "password": password }))
            .send()
            .await
            .map_err(GatewayError::from)?;
        let response = match ensure_success(response).await {
            Ok(response) => response,
            Err(GatewayError::Backend { status, .. }) if status == 400 || status == 401 => {
                return Err(SignInError::InvalidCredentials);
            }
            Err(err) => return Err(err.into()),
        };
        let token = response
            .json::<TokenResponse>()
            .await
            .map_err(GatewayError::from)?;
        let identity = self.store_session(token).await;
        tracing::info!(user_id = %identity.id, "signed in");
        Ok(identity)
    }

    pub(super) async fn sign_up(
        &self,
        email: &str,
        password: &str,
    ) -> Result<SignUpOutcome, GatewayError> {
        let response = self
            .authorize(self.http.post(self.endpoint("/auth/v1/signup")), None)
            .json(&json!({ "email": email.trim(), "password": password }))
            .send()
            .await?;
        let body = ensure_success(response).await?.json::<Value>().await?;
        if body.get("access_token").is_some() {
            let token: TokenResponse = serde_json::from_value(body)?;
            return Ok(SignUpOutcome::SignedIn(self.store_session(token).await));
        }
        Ok(SignUpOutcome::ConfirmationSent)
    }

    async fn store_session(&self, token: TokenResponse) -> Identity {
        let session = AuthSession::from_token(token, Utc::now());
        let identity = session.user.clone();
        *self.session.write().await = Some(session);
        identity
    }

    pub(super) async fn clear_session(&self) -> Option<String> {
        self.session
            .write()
            .await
            .take()
            .map(|session| session.access_token)
    }

    /// Current access token, refreshed first when it is about to expire.
    pub(super) async fn access_token(&self) -> Result<Option<String>, GatewayError> {
        let refresh_token = {
            let guard = self.session.read().await;
            match guard.as_ref() {
                None => return Ok(None),
                Some(session) if !session.needs_refresh(Utc::now()) => {
                    return Ok(Some(session.access_token.clone()));
                }
                Some(session) => session.refresh_token.clone(),
            }
        };

        let response = self
            .authorize(
                self.http
                    .post(self.endpoint("/auth/v1/token"))
                    .query(&[("grant_type", "refresh_token")]),
                None,
            )
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await?;
        match ensure_success(response).await {
            Ok(response) => {
                let token = response.json::<TokenResponse>().await?;
                let access_token = token.access_token.clone();
                self.store_session(token).await;
                tracing::debug!("refreshed access token");
                Ok(Some(access_token))
            }
            Err(err @ GatewayError::Backend { .. }) => {
                tracing::warn!(error = %err, "session refresh rejected; signing out locally");
                self.session.write().await.take();
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Token for the realtime channel: the user's access token, else the anon key.
    pub(super) async fn realtime_token(&self) -> Result<String, GatewayError> {
        Ok(self
            .access_token()
            .await?
            .unwrap_or_else(|| self.anon_key.clone()))
    }

    pub(super) async fn fetch_user(&self, access_token: &str) -> Result<Identity, GatewayError> {
        let response = self
            .authorize(self.http.get(self.endpoint("/auth/v1/user")), Some(access_token))
            .send()
            .await?;
        Ok(ensure_success(response).await?.json::<Identity>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn token(expires_in: Option<i64>, expires_at: Option<i64>) -> TokenResponse {
        TokenResponse {
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
            expires_in,
            expires_at,
            user: Identity {
                id: Uuid::new_v4(),
                email: None,
            },
        }
    }

    #[test]
    fn expiry_prefers_absolute_timestamp() {
        let now = Utc::now();
        let absolute = (now + ChronoDuration::seconds(600)).timestamp();
        let session = AuthSession::from_token(token(Some(10), Some(absolute)), now);
        assert_eq!(session.expires_at.timestamp(), absolute);
        assert!(!session.needs_refresh(now));
    }

    #[test]
    fn refreshes_inside_leeway_window() {
        let now = Utc::now();
        let session = AuthSession::from_token(token(Some(EXPIRY_LEEWAY_SECONDS - 1), None), now);
        assert!(session.needs_refresh(now));

        let fresh = AuthSession::from_token(token(None, None), now);
        assert!(!fresh.needs_refresh(now));
        assert!(fresh.needs_refresh(now + ChronoDuration::seconds(DEFAULT_TOKEN_TTL_SECONDS)));
    }

    #[test]
    fn decodes_password_grant_response() {
        let body = r#"{
            "access_token": "a",
            "token_type": "bearer",
            "expires_in": 3600,
            "expires_at": 1900000000,
            "refresh_token": "r",
            "user": {"id": "6f1b0a5e-2d1c-4d7e-9a43-1f0c2b3d4e5f", "email": "ola@example.com", "role": "authenticated"}
        }"#;
        let parsed: TokenResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.user.email.as_deref(), Some("ola@example.com"));
        assert_eq!(parsed.expires_at, Some(1_900_000_000));
    }
}
