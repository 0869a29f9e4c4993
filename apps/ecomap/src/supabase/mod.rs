mod auth;
mod realtime;

pub use auth::{SignInError, SignUpOutcome};

use crate::config::Config;
use crate::error::GatewayError;
use crate::gateway::{InsertSubscription, ReportGateway};
use crate::report::{NewReport, Report, REPORT_COLUMNS};
use crate::session::Identity;
use async_trait::async_trait;
use auth::AuthClient;
use bytes::Bytes;
use realtime::RealtimeSettings;
use reqwest::{Client, Response};
use serde_json::Value;
use std::sync::Arc;

/// Gateway speaking the Supabase REST, storage, auth and realtime protocols.
pub struct SupabaseGateway {
    base_url: String,
    reports_table: String,
    http: Client,
    auth: Arc<AuthClient>,
    realtime: RealtimeSettings,
}

impl SupabaseGateway {
    pub fn new(config: &Config) -> Result<Self, GatewayError> {
        let http = Client::builder().timeout(config.http_timeout()).build()?;
        let base_url = config.supabase_url.trim_end_matches('/').to_string();
        let realtime = RealtimeSettings {
            websocket_url: realtime::websocket_url(&base_url, &config.supabase_anon_key)?,
            heartbeat: config.realtime_heartbeat(),
            reconnect_delay: config.realtime_reconnect_delay(),
        };
        let auth = AuthClient::new(
            http.clone(),
            base_url.clone(),
            config.supabase_anon_key.clone(),
        );
        Ok(Self {
            base_url,
            reports_table: config.reports_table.clone(),
            http,
            auth: Arc::new(auth),
            realtime,
        })
    }

    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Identity, SignInError> {
        self.auth.sign_in_with_password(email, password).await
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, GatewayError> {
        self.auth.sign_up(email, password).await
    }

    pub fn public_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/storage/v1/object/public/{}/{}", self.base_url, bucket, key)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl ReportGateway for SupabaseGateway {
    async fn current_user(&self) -> Result<Option<Identity>, GatewayError> {
        let Some(token) = self.auth.access_token().await? else {
            return Ok(None);
        };
        match self.auth.fetch_user(&token).await {
            Ok(identity) => Ok(Some(identity)),
            Err(err) if err.is_unauthorized() => {
                tracing::info!("stored session rejected by backend; clearing");
                self.auth.clear_session().await;
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    async fn sign_out(&self) -> Result<(), GatewayError> {
        let Some(access_token) = self.auth.clear_session().await else {
            return Ok(());
        };
        let response = self
            .auth
            .authorize(
                self.http.post(self.endpoint("/auth/v1/logout")),
                Some(access_token.as_str()),
            )
            .send()
            .await?;
        ensure_success(response).await.map(|_| ())
    }

    async fn list_reports(&self) -> Result<Vec<Report>, GatewayError> {
        let token = self.auth.access_token().await?;
        let url = self.endpoint(&format!("/rest/v1/{}", self.reports_table));
        let response = self
            .auth
            .authorize(self.http.get(url), token.as_deref())
            .query(&[("select", REPORT_COLUMNS)])
            .send()
            .await?;
        let response = ensure_success(response).await?;
        Ok(response.json::<Vec<Report>>().await?)
    }

    async fn insert_report(&self, report: NewReport) -> Result<Report, GatewayError> {
        let token = self.auth.access_token().await?;
        let url = self.endpoint(&format!("/rest/v1/{}", self.reports_table));
        let response = self
            .auth
            .authorize(self.http.post(url), token.as_deref())
            .header("Prefer", "return=representation")
            .json(&report)
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let mut rows = response.json::<Vec<Report>>().await?;
        if rows.is_empty() {
            return Err(GatewayError::Decode(
                "insert returned no representation".to_string(),
            ));
        }
        Ok(rows.swap_remove(0))
    }

    async fn upload_object(
        &self,
        bucket: &str,
        key: &str,
        bytes: Bytes,
        content_type: Option<&str>,
    ) -> Result<String, GatewayError> {
        let token = self.auth.access_token().await?;
        let url = self.endpoint(&format!("/storage/v1/object/{bucket}/{key}"));
        let response = self
            .auth
            .authorize(self.http.post(url), token.as_deref())
            .header(
                reqwest::header::CONTENT_TYPE,
                content_type.unwrap_or("application/octet-stream"),
            )
            .header("x-upsert", "false")
            .body(bytes)
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(self.public_url(bucket, key))
    }

    async fn subscribe_inserts(&self, table: &str) -> Result<InsertSubscription, GatewayError> {
        Ok(realtime::spawn_insert_listener(
            self.realtime.clone(),
            table.to_string(),
            self.auth.clone(),
        ))
    }
}

async fn ensure_success(response: Response) -> Result<Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = extract_error_message(&body).unwrap_or_else(|| body.trim().to_string());
    tracing::debug!(status = %status, message = %message, "backend request rejected");
    Err(GatewayError::Backend {
        status: status.as_u16(),
        message,
    })
}

fn extract_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["message", "msg", "error_description", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
}
