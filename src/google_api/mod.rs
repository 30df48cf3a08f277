//! Google OAuth2 token plumbing shared by the calendar client.
//!
//! Tokens are provisioned externally (JSON blobs in the environment, written
//! by Google's Python OAuth tooling) and refreshed in memory; nothing is
//! written back to disk.

pub mod calendar;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// OAuth2 token payload, field-compatible with what Python's
/// `google.oauth2.credentials.Credentials.to_json()` writes. Both `token`
/// and `access_token` are accepted on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleToken {
    #[serde(alias = "access_token")]
    pub token: String,
    /// Long-lived; used to mint new access tokens.
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    /// Access-token expiry (ISO 8601).
    #[serde(default)]
    pub expiry: Option<String>,
}

/// OAuth2 client credentials (Web application type).
#[derive(Debug, Clone, Deserialize)]
pub struct ClientCredentials {
    pub web: WebAppCredentials,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebAppCredentials {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

#[derive(Debug, Error)]
pub enum GoogleApiError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("token expired or revoked")]
    AuthExpired,
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Check if a token is expired based on its expiry field.
///
/// No expiry or an unparsable one counts as expired so a refresh is tried.
/// 60 seconds of skew keeps a token from dying mid-request.
pub fn is_token_expired(token: &GoogleToken) -> bool {
    match &token.expiry {
        None => true,
        Some(expiry_str) => {
            // Python writes "2025-01-10T12:00:00.000000Z" or similar.
            match chrono::DateTime::parse_from_rfc3339(&expiry_str.replace('Z', "+00:00"))
                .or_else(|_| chrono::DateTime::parse_from_rfc3339(expiry_str))
            {
                Ok(expiry) => expiry <= chrono::Utc::now() + chrono::Duration::seconds(60),
                Err(_) => true,
            }
        }
    }
}

/// Mint a fresh access token through the token endpoint.
///
/// Returns an updated token with the new access token and expiry. Callers
/// serialize refreshes; see `GoogleCalendar::access_token`.
pub async fn refresh_access_token(
    client: &reqwest::Client,
    creds: &WebAppCredentials,
    token: &GoogleToken,
) -> Result<GoogleToken, GoogleApiError> {
    let refresh_token = token
        .refresh_token
        .as_deref()
        .ok_or(GoogleApiError::AuthExpired)?;

    let mut form = vec![
        ("client_id", creds.client_id.as_str()),
        ("refresh_token", refresh_token),
        ("grant_type", "refresh_token"),
    ];
    if let Some(secret) = creds.client_secret.as_deref() {
        form.push(("client_secret", secret));
    }

    let resp = client.post(&creds.token_uri).form(&form).send().await?;
    let status = resp.status();
    let body_text = resp.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(map_refresh_error(status.as_u16(), &body_text));
    }
    let body: serde_json::Value = serde_json::from_str(&body_text)?;

    let access_token = body["access_token"]
        .as_str()
        .ok_or_else(|| GoogleApiError::RefreshFailed("no access_token in response".to_string()))?;
    let expires_in = body["expires_in"].as_u64().unwrap_or(3600);
    let expiry = chrono::Utc::now() + chrono::Duration::seconds(expires_in as i64);

    let mut refreshed = token.clone();
    refreshed.token = access_token.to_string();
    refreshed.expiry = Some(expiry.to_rfc3339());
    Ok(refreshed)
}

fn map_refresh_error(status: u16, body: &str) -> GoogleApiError {
    let lowered = body.to_lowercase();
    if (status == 400 || status == 401)
        && (lowered.contains("invalid_grant") || lowered.contains("token has been expired"))
    {
        return GoogleApiError::AuthExpired;
    }
    GoogleApiError::RefreshFailed(format!("HTTP {status}: {body}"))
}
