use crate::models::TokenResponse;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use thiserror::Error;

const MANAGEMENT_RESOURCE: &str = "https://management.azure.com";
const USAGES_API_VERSION: &str = "2021-09-01";

/// Issued tokens live for an hour; refresh this many minutes before the
/// lifespan elapses so no request rides an expiring credential.
const TOKEN_LIFESPAN_MINS: i64 = 60;
const REFRESH_MARGIN_MINS: i64 = 5;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("token endpoint returned {status}: {body}")]
    Rejected {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("token response missing a usable token: {0}")]
    Malformed(#[source] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("usage request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("usage response missing the `value` field")]
    UnexpectedPayload { body: String },
}

/// A live credential plus the moment it was issued.
#[derive(Debug, Clone)]
pub struct Session {
    token_type: String,
    access_token: String,
    issued_at: DateTime<Utc>,
}

impl Session {
    pub fn new(token: TokenResponse, issued_at: DateTime<Utc>) -> Self {
        Self {
            token_type: token.token_type,
            access_token: token.access_token,
            issued_at,
        }
    }

    /// True once the credential is within the safety margin of its
    /// lifespan.
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        now >= self.issued_at + Duration::minutes(TOKEN_LIFESPAN_MINS - REFRESH_MARGIN_MINS)
    }

    pub fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

#[async_trait]
pub trait UsageApi: Send + Sync {
    /// Exchange client credentials for a fresh session.
    async fn exchange_token(&self) -> Result<Session, AuthError>;

    /// Fetch the current usage payload, returning the `value` array
    /// verbatim.
    async fn fetch_usage(&self, session: &Session) -> Result<Value, FetchError>;
}

/// Client for the Azure management plane: the AAD token endpoint and the
/// container-instance usages endpoint for one subscription and region.
pub struct AzureClient {
    http: reqwest::Client,
    token_url: String,
    usage_url: String,
    client_id: String,
    client_secret: String,
}

impl AzureClient {
    pub fn new(
        tenant_id: &str,
        client_id: String,
        client_secret: String,
        subscription_id: &str,
        region: &str,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            token_url: format!("https://login.microsoftonline.com/{tenant_id}/oauth2/token"),
            usage_url: format!(
                "{MANAGEMENT_RESOURCE}/subscriptions/{subscription_id}\
                 /providers/Microsoft.ContainerInstance/locations/{region}\
                 /usages?api-version={USAGES_API_VERSION}"
            ),
            client_id,
            client_secret,
        }
    }
}

#[async_trait]
impl UsageApi for AzureClient {
    async fn exchange_token(&self) -> Result<Session, AuthError> {
        tracing::info!("Requesting auth token");

        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("resource", MANAGEMENT_RESOURCE),
            ])
            .send()
            .await?;

        let status = response.status();
        tracing::info!(%status, "Auth token result");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Rejected { status, body });
        }

        let body = response.text().await?;
        let token: TokenResponse = serde_json::from_str(&body).map_err(AuthError::Malformed)?;

        Ok(Session::new(token, Utc::now()))
    }

    async fn fetch_usage(&self, session: &Session) -> Result<Value, FetchError> {
        let response = self
            .http
            .get(&self.usage_url)
            .header("Authorization", session.authorization())
            .send()
            .await?;

        let mut body: Value = response.json().await?;

        match body.get_mut("value") {
            Some(value) => Ok(value.take()),
            None => Err(FetchError::UnexpectedPayload {
                body: body.to_string(),
            }),
        }
    }
}
