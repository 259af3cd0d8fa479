//! Credential resolution and access tokens for the BigQuery client.
//!
//! Credentials are resolved once, when the client is built:
//! 1. an explicit key-file path, else `GOOGLE_APPLICATION_CREDENTIALS`
//! 2. otherwise ambient sources: `GOOGLE_OAUTH_ACCESS_TOKEN`, then the GCE
//!    metadata server
//!
//! `authorized_user` key files are exchanged for access tokens with the OAuth
//! refresh-token grant. `service_account` key files sign an RS256 JWT assertion
//! with their private key and exchange it at the key file's `token_uri`, so the
//! pipeline always runs as the identity the key file names.

use crate::config::CREDENTIALS_ENV;
use crate::error::{Error, Result, body_snippet};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Environment variable holding a pre-minted OAuth access token
pub const ACCESS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

/// Tokens are refreshed this long before they expire
const EXPIRY_MARGIN_SECS: i64 = 60;

/// OAuth scope requested for service account tokens
pub const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime of a signed assertion; Google accepts at most one hour
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Contents of a Google credentials key file
#[derive(Clone, Debug, Deserialize)]
pub struct KeyFile {
    /// Credential type ("service_account" or "authorized_user")
    #[serde(rename = "type")]
    pub kind: String,
    /// Project the credentials belong to
    #[serde(default)]
    pub project_id: Option<String>,
    /// Project billed for quota (authorized_user files)
    #[serde(default)]
    pub quota_project_id: Option<String>,
    /// Service account email
    #[serde(default)]
    pub client_email: Option<String>,
    /// OAuth client id
    #[serde(default)]
    pub client_id: Option<String>,
    /// OAuth client secret (authorized_user files)
    #[serde(default)]
    pub client_secret: Option<String>,
    /// OAuth refresh token (authorized_user files)
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// PEM-encoded RSA private key (service_account files)
    #[serde(default)]
    pub private_key: Option<String>,
    /// Identifier of `private_key`, sent as the JWT `kid`
    #[serde(default)]
    pub private_key_id: Option<String>,
    /// Token endpoint the key file was issued for
    #[serde(default)]
    pub token_uri: Option<String>,
}

impl KeyFile {
    /// Read and parse a key file
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file is missing, unreadable, or not a key file.
    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(
                format!("cannot read credentials file {}: {e}", path.display()),
                "credentials_path",
            )
        })?;
        serde_json::from_str(&content).map_err(|e| {
            Error::config(
                format!("invalid credentials file {}: {e}", path.display()),
                "credentials_path",
            )
        })
    }

    /// Project encoded in the key file, if any
    pub fn project(&self) -> Option<&str> {
        self.project_id
            .as_deref()
            .or(self.quota_project_id.as_deref())
    }
}

#[derive(Clone, PartialEq, Eq)]
enum TokenSource {
    Static(String),
    RefreshToken {
        client_id: String,
        client_secret: String,
        refresh_token: String,
    },
    ServiceAccount {
        client_email: String,
        private_key: String,
        private_key_id: Option<String>,
        token_uri: Option<String>,
    },
    MetadataServer,
}

/// Resolved credentials, immutable for the process lifetime
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    source: TokenSource,
    project_id: Option<String>,
    key_file: Option<PathBuf>,
}

impl Credentials {
    /// Resolve credentials from an explicit key file or the environment
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a key file is named but cannot be used.
    pub fn resolve(explicit_path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var_os(CREDENTIALS_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        match explicit_path.map(Path::to_path_buf).or(env_path) {
            Some(path) => Self::from_key_file(&path),
            None => Ok(Self::ambient()),
        }
    }

    /// Credentials backed by a key file
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file cannot be read, is not valid JSON,
    /// has an unsupported type, or lacks the fields its type requires.
    pub fn from_key_file(path: &Path) -> Result<Self> {
        let key = KeyFile::read(path)?;
        let project_id = key.project().map(str::to_string);

        let field = |value: Option<String>, name: &str| {
            value.filter(|v| !v.is_empty()).ok_or_else(|| {
                Error::config(
                    format!("credentials file {} is missing '{name}'", path.display()),
                    "credentials_path",
                )
            })
        };

        let source = match key.kind.as_str() {
            "authorized_user" => TokenSource::RefreshToken {
                client_id: field(key.client_id, "client_id")?,
                client_secret: field(key.client_secret, "client_secret")?,
                refresh_token: field(key.refresh_token, "refresh_token")?,
            },
            "service_account" => {
                let private_key = field(key.private_key, "private_key")?;
                EncodingKey::from_rsa_pem(private_key.as_bytes()).map_err(|e| {
                    Error::config(
                        format!("invalid private_key in {}: {e}", path.display()),
                        "credentials_path",
                    )
                })?;
                TokenSource::ServiceAccount {
                    client_email: field(key.client_email, "client_email")?,
                    private_key,
                    private_key_id: key.private_key_id,
                    token_uri: key.token_uri.filter(|v| !v.is_empty()),
                }
            }
            other => {
                return Err(Error::config(
                    format!(
                        "unsupported credentials type '{other}' in {}",
                        path.display()
                    ),
                    "credentials_path",
                ));
            }
        };

        info!(path = %path.display(), kind = %key.kind, "loaded credentials key file");
        Ok(Self {
            source,
            project_id,
            key_file: Some(path.to_path_buf()),
        })
    }

    /// Credentials from the ambient environment
    pub fn ambient() -> Self {
        Self {
            source: ambient_source(),
            project_id: None,
            key_file: None,
        }
    }

    /// Credentials that always present the given access token
    pub fn static_token(token: impl Into<String>) -> Self {
        Self {
            source: TokenSource::Static(token.into()),
            project_id: None,
            key_file: None,
        }
    }

    /// Project encoded in the key file, if any
    pub fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }

    /// Key file these credentials were read from, if any
    pub fn key_file(&self) -> Option<&Path> {
        self.key_file.as_deref()
    }
}

// Secrets stay out of logs
impl std::fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenSource::Static(_) => f.write_str("Static(<redacted>)"),
            TokenSource::RefreshToken { client_id, .. } => f
                .debug_struct("RefreshToken")
                .field("client_id", client_id)
                .finish_non_exhaustive(),
            TokenSource::ServiceAccount { client_email, .. } => f
                .debug_struct("ServiceAccount")
                .field("client_email", client_email)
                .finish_non_exhaustive(),
            TokenSource::MetadataServer => f.write_str("MetadataServer"),
        }
    }
}

fn ambient_source() -> TokenSource {
    match std::env::var(ACCESS_TOKEN_ENV) {
        Ok(token) if !token.trim().is_empty() => TokenSource::Static(token.trim().to_string()),
        _ => TokenSource::MetadataServer,
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

/// Sign the JWT-bearer assertion a service account trades for an access token
fn sign_assertion(
    client_email: &str,
    private_key: &str,
    private_key_id: Option<&str>,
    audience: &str,
    now: DateTime<Utc>,
) -> Result<String> {
    let key = EncodingKey::from_rsa_pem(private_key.as_bytes())
        .map_err(|e| Error::Auth(format!("invalid service account key: {e}")))?;
    let mut header = Header::new(Algorithm::RS256);
    header.kid = private_key_id.map(str::to_string);

    let iat = now.timestamp();
    let claims = AssertionClaims {
        iss: client_email,
        scope: BIGQUERY_SCOPE,
        aud: audience,
        iat,
        exp: iat + ASSERTION_LIFETIME_SECS,
    };
    jsonwebtoken::encode(&header, &claims, &key)
        .map_err(|e| Error::Auth(format!("cannot sign service account assertion: {e}")))
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for CachedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedToken")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .is_none_or(|at| now + ChronoDuration::seconds(EXPIRY_MARGIN_SECS) < at)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Hands out access tokens for resolved credentials, caching until near expiry
#[derive(Debug)]
pub struct TokenProvider {
    credentials: Credentials,
    http_client: reqwest::Client,
    token_uri: String,
    metadata_url: String,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    /// Create a provider for `credentials`
    pub fn new(
        credentials: Credentials,
        http_client: reqwest::Client,
        token_uri: impl Into<String>,
        metadata_url: impl Into<String>,
    ) -> Self {
        Self {
            credentials,
            http_client,
            token_uri: token_uri.into(),
            metadata_url: metadata_url.into(),
            cached: Mutex::new(None),
        }
    }

    /// Credentials this provider serves
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Current access token, fetching a new one if the cached token is stale
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] if the token endpoint refuses the request.
    pub async fn access_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(Utc::now())) {
            return Ok(token.token.clone());
        }

        let fresh = self.fetch_token().await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }

    async fn fetch_token(&self) -> Result<CachedToken> {
        let request = match &self.credentials.source {
            TokenSource::Static(token) => {
                return Ok(CachedToken {
                    token: token.clone(),
                    expires_at: None,
                });
            }
            TokenSource::RefreshToken {
                client_id,
                client_secret,
                refresh_token,
            } => {
                debug!(token_uri = %self.token_uri, "exchanging refresh token");
                self.http_client.post(&self.token_uri).form(&[
                    ("grant_type", "refresh_token"),
                    ("client_id", client_id.as_str()),
                    ("client_secret", client_secret.as_str()),
                    ("refresh_token", refresh_token.as_str()),
                ])
            }
            TokenSource::ServiceAccount {
                client_email,
                private_key,
                private_key_id,
                token_uri,
            } => {
                let token_uri = token_uri.as_deref().unwrap_or(&self.token_uri);
                let assertion = sign_assertion(
                    client_email,
                    private_key,
                    private_key_id.as_deref(),
                    token_uri,
                    Utc::now(),
                )?;
                debug!(token_uri = %token_uri, client_email = %client_email, "exchanging service account assertion");
                self.http_client
                    .post(token_uri)
                    .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            }
            TokenSource::MetadataServer => {
                let url = format!(
                    "{}/instance/service-accounts/default/token",
                    self.metadata_url.trim_end_matches('/')
                );
                debug!(url = %url, "requesting token from metadata server");
                self.http_client
                    .get(url)
                    .header("Metadata-Flavor", "Google")
            }
        };

        let response = request
            .send()
            .await
            .map_err(|e| Error::Auth(format!("token request failed: {e}")))?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::Auth(format!(
                "token endpoint returned HTTP {}: {}",
                status.as_u16(),
                body_snippet(&body)
            )));
        }

        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| Error::Auth(format!("invalid token response: {e}")))?;
        Ok(CachedToken {
            token: parsed.access_token,
            expires_at: parsed
                .expires_in
                .map(|secs| Utc::now() + ChronoDuration::seconds(secs)),
        })
    }
}
