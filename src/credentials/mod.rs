//! OAuth credential lifecycle for agent accounts.
//!
//! The agent authenticates with an OAuth access/refresh token pair stored in
//! a credentials JSON file (`~/.claude/.credentials.json` by default). Access
//! tokens are short-lived; before dispatching work this module checks the
//! remaining validity and, when it falls below a refresh margin, exchanges
//! the refresh token for a new pair and persists it back. Refresh tokens are
//! single-use, so the rotated token must always be written to disk.
//!
//! The exchange is a single HTTP attempt: no retries, no backoff. A non-2xx
//! response surfaces the status and body. Reads and writes of the file are
//! not atomic; concurrent refreshes of the same file race.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::CredentialsError;

/// OAuth token endpoint used for refresh exchanges.
pub const DEFAULT_TOKEN_URL: &str = "https://console.anthropic.com/v1/oauth/token";

/// OAuth client id the agent tooling registers refresh grants under.
pub const DEFAULT_CLIENT_ID: &str = "9d1c250a-e61b-44d9-88ed-5944d1962f5e";

/// Default refresh margin: refresh when less than this much validity remains.
pub const DEFAULT_REFRESH_MARGIN_SECS: i64 = 600;

/// Resolves the default credentials file path.
///
/// Honors `CLAUDE_CONFIG_DIR` when set, otherwise `$HOME/.claude`.
pub fn default_credentials_path() -> PathBuf {
    let config_dir = std::env::var("CLAUDE_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            Path::new(&home).join(".claude")
        });
    config_dir.join(".credentials.json")
}

/// The OAuth token pair as stored on disk (camelCase JSON).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OauthCredentials {
    /// Short-lived bearer token.
    pub access_token: String,
    /// Single-use token exchanged for the next pair.
    pub refresh_token: String,
    /// Access token expiry as epoch milliseconds.
    pub expires_at: i64,
    /// Granted scopes, if recorded.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
    /// Fields we do not interpret but must round-trip on save.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl OauthCredentials {
    /// Expiry timestamp as a UTC datetime.
    pub fn expires_at_utc(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.expires_at)
            .single()
            .unwrap_or_else(Utc::now)
    }

    /// Seconds of validity remaining at `now` (negative once expired).
    pub fn remaining_validity_secs(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now.timestamp_millis()) / 1000
    }

    /// True when remaining validity is below the refresh margin.
    pub fn needs_refresh(&self, now: DateTime<Utc>, margin_secs: i64) -> bool {
        self.remaining_validity_secs(now) < margin_secs
    }
}

/// On-disk credentials file: the OAuth pair nested under `claudeAiOauth`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsFile {
    pub claude_ai_oauth: OauthCredentials,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Load/save wrapper around a credentials file path.
#[derive(Debug, Clone)]
pub struct CredentialsStore {
    path: PathBuf,
}

impl CredentialsStore {
    /// Creates a store for the given credentials file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Creates a store for the default credentials location.
    pub fn default_location() -> Self {
        Self::new(default_credentials_path())
    }

    /// Path of the underlying credentials file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads and validates the credentials file.
    ///
    /// Fails loudly when the file is absent, unparseable, or holds no
    /// refresh token; every caller needs a usable pair.
    pub fn load(&self) -> Result<CredentialsFile, CredentialsError> {
        if !self.path.exists() {
            return Err(CredentialsError::NotFound(self.path.clone()));
        }
        let content = std::fs::read_to_string(&self.path)?;
        let file: CredentialsFile = serde_json::from_str(&content)?;
        if file.claude_ai_oauth.refresh_token.is_empty() {
            return Err(CredentialsError::MissingRefreshToken(self.path.clone()));
        }
        Ok(file)
    }

    /// Persists the credentials file.
    ///
    /// Plain truncate-and-write; concurrent writers race (see module docs).
    pub fn save(&self, file: &CredentialsFile) -> Result<(), CredentialsError> {
        let json = serde_json::to_string_pretty(file)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    grant_type: &'static str,
    refresh_token: &'a str,
    client_id: &'a str,
}

#[derive(Deserialize)]
struct RefreshResponse {
    access_token: String,
    refresh_token: String,
    /// Validity of the new access token in seconds.
    expires_in: i64,
}

/// Performs OAuth refresh exchanges against the token endpoint.
pub struct TokenRefresher {
    token_url: String,
    client_id: String,
    margin_secs: i64,
    http_client: Client,
}

impl Default for TokenRefresher {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenRefresher {
    /// Creates a refresher with the production endpoint and default margin.
    pub fn new() -> Self {
        Self {
            token_url: DEFAULT_TOKEN_URL.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            margin_secs: DEFAULT_REFRESH_MARGIN_SECS,
            http_client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("Failed to build HTTP client"),
        }
    }

    /// Overrides the token endpoint (tests point this at a local server).
    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    /// Overrides the OAuth client id.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Overrides the refresh margin in seconds.
    pub fn with_margin_secs(mut self, margin_secs: i64) -> Self {
        self.margin_secs = margin_secs;
        self
    }

    /// Refresh margin in seconds.
    pub fn margin_secs(&self) -> i64 {
        self.margin_secs
    }

    /// Unconditionally exchanges the stored refresh token for a new pair
    /// and persists it back through `store`.
    ///
    /// Single attempt. A non-2xx response is returned as
    /// [`CredentialsError::RefreshRejected`] with the response body.
    pub async fn refresh(
        &self,
        store: &CredentialsStore,
    ) -> Result<OauthCredentials, CredentialsError> {
        let mut file = store.load()?;

        let request = RefreshRequest {
            grant_type: "refresh_token",
            refresh_token: &file.claude_ai_oauth.refresh_token,
            client_id: &self.client_id,
        };

        debug!(url = %self.token_url, path = %store.path().display(), "Exchanging refresh token");
        let response = self
            .http_client
            .post(&self.token_url)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CredentialsError::RefreshRejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: RefreshResponse = response.json().await?;
        let expires_at = Utc::now().timestamp_millis() + parsed.expires_in * 1000;

        file.claude_ai_oauth.access_token = parsed.access_token;
        // single-use: the rotated refresh token must reach disk
        file.claude_ai_oauth.refresh_token = parsed.refresh_token;
        file.claude_ai_oauth.expires_at = expires_at;
        store.save(&file)?;

        info!(
            path = %store.path().display(),
            expires_at = %file.claude_ai_oauth.expires_at_utc(),
            "Refreshed OAuth token"
        );
        Ok(file.claude_ai_oauth)
    }

    /// Token-health check: refreshes only when remaining validity is below
    /// the margin. Returns `true` if a refresh was performed.
    ///
    /// Invariant: a successful refresh must leave the expiry strictly beyond
    /// `now + margin`, otherwise the exchange is reported as failed.
    pub async fn ensure_fresh(&self, store: &CredentialsStore) -> Result<bool, CredentialsError> {
        let now = Utc::now();
        let file = store.load()?;
        if !file.claude_ai_oauth.needs_refresh(now, self.margin_secs) {
            debug!(
                path = %store.path().display(),
                remaining_secs = file.claude_ai_oauth.remaining_validity_secs(now),
                "Access token still valid"
            );
            return Ok(false);
        }

        info!(
            path = %store.path().display(),
            remaining_secs = file.claude_ai_oauth.remaining_validity_secs(now),
            margin_secs = self.margin_secs,
            "Access token inside refresh margin, refreshing"
        );
        let refreshed = self.refresh(store).await?;

        if refreshed.remaining_validity_secs(now) <= self.margin_secs {
            return Err(CredentialsError::StaleAfterRefresh {
                expires_at: refreshed.expires_at,
                margin_secs: self.margin_secs,
            });
        }
        Ok(true)
    }
}
