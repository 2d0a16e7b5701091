use std::{
    path::Path,
    time::{Duration, Instant},
};

use anyhow::Context;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use tokio::sync::Mutex;

use crate::GceError;

pub const COMPUTE_SCOPE: &str = "https://www.googleapis.com/auth/compute";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_TTL_SECS: i64 = 3600;
// Refresh this long before the server-reported expiry.
const REFRESH_SKEW: Duration = Duration::from_secs(60);

/// The subset of a Google service-account key file we need.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read(path)
            .with_context(|| format!("read credentials file {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("parse credentials file {}", path.display()))
    }

    pub fn from_json(raw: &[u8]) -> anyhow::Result<Self> {
        let key: Self = serde_json::from_slice(raw)?;
        if key.client_email.trim().is_empty() {
            anyhow::bail!("client_email is empty");
        }
        if key.private_key.trim().is_empty() {
            anyhow::bail!("private_key is empty");
        }
        Ok(key)
    }
}

#[derive(Debug, serde::Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, serde::Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// OAuth2 access tokens for a service account (JWT bearer grant).
pub struct TokenSource {
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    scope: String,
    http: reqwest::Client,
    cache: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSource")
            .field("client_email", &self.key.client_email)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl TokenSource {
    pub fn new(key: ServiceAccountKey, http: reqwest::Client) -> anyhow::Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .context("service account private_key is not a valid RSA PEM")?;
        Ok(Self {
            key,
            encoding_key,
            scope: COMPUTE_SCOPE.to_string(),
            http,
            cache: Mutex::new(None),
        })
    }

    pub fn client_email(&self) -> &str {
        &self.key.client_email
    }

    /// Returns a cached token, or exchanges a fresh assertion when it is about to expire.
    pub async fn access_token(&self) -> anyhow::Result<String> {
        let mut cache = self.cache.lock().await;
        if let Some(hit) = cache.as_ref().filter(|c| Instant::now() < c.refresh_at) {
            return Ok(hit.value.clone());
        }

        let fresh = self.fetch().await?;
        let value = fresh.value.clone();
        *cache = Some(fresh);
        Ok(value)
    }

    fn assertion(&self, now_unix: i64) -> anyhow::Result<String> {
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: &self.scope,
            aud: &self.key.token_uri,
            iat: now_unix,
            exp: now_unix + ASSERTION_TTL_SECS,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .context("sign token assertion")
    }

    async fn fetch(&self) -> anyhow::Result<CachedToken> {
        let assertion = self.assertion(chrono::Utc::now().timestamp())?;

        let resp = self
            .http
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .context("request oauth token")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GceError::Auth {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let token = resp
            .json::<TokenResponse>()
            .await
            .context("parse oauth token response")?;

        let ttl = Duration::from_secs(token.expires_in.unwrap_or(ASSERTION_TTL_SECS as u64));
        tracing::debug!(ttl_secs = ttl.as_secs(), "obtained compute access token");

        Ok(CachedToken {
            value: token.access_token,
            refresh_at: Instant::now() + ttl.saturating_sub(REFRESH_SKEW),
        })
    }
}

#[cfg(test)]
pub(crate) fn test_key(token_uri: &str) -> ServiceAccountKey {
    ServiceAccountKey {
        client_email: "bot@craft-1234.iam.gserviceaccount.com".to_string(),
        private_key: include_str!("../testdata/service_account_key.pem").to_string(),
        token_uri: token_uri.to_string(),
    }
}
