//! Google Cloud Storage over the JSON API.
//!
//! Uses the blocking reqwest client, so it must only be driven from
//! blocking contexts (CLI commands or `spawn_blocking`).
//!
//! Access tokens come from, in order: `GOOGLE_OAUTH_ACCESS_TOKEN`, a
//! credential file (`service_account` keys are exchanged through an RS256
//! signed assertion, `authorized_user` files through their refresh token),
//! or the instance metadata server (Cloud Run / GCE).

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use super::ObjectStore;
use crate::error::{Error, Result};

const API_BASE: &str = "https://storage.googleapis.com/storage/v1";
const UPLOAD_BASE: &str = "https://storage.googleapis.com/upload/storage/v1";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
const ACCESS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";
const STORAGE_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_write";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
/// Lifetime of a signed assertion; Google rejects anything over an hour
const ASSERTION_TTL_SECS: i64 = 3600;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CredentialFile {
    AuthorizedUser {
        client_id: String,
        client_secret: String,
        refresh_token: String,
    },
    ServiceAccount {
        client_email: String,
        private_key: String,
        #[serde(default)]
        token_uri: Option<String>,
    },
}

/// Claims of the JWT a service account trades for an access token
#[derive(Debug, Serialize, Deserialize)]
struct AssertionClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

/// A service-account key able to sign token assertions
#[derive(Clone)]
struct ServiceAccount {
    client_email: String,
    token_uri: String,
    key: EncodingKey,
}

impl ServiceAccount {
    /// RS256-signed assertion valid from `now` for an hour
    fn assertion(&self, now: i64) -> Result<String> {
        let claims = AssertionClaims {
            iss: self.client_email.clone(),
            scope: STORAGE_SCOPE.to_string(),
            aud: self.token_uri.clone(),
            iat: now,
            exp: now + ASSERTION_TTL_SECS,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.key)
            .map_err(|e| Error::Cloud(format!("failed to sign token assertion: {}", e)))
    }
}

impl std::fmt::Debug for ServiceAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccount")
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
enum TokenSource {
    Static(String),
    ServiceAccount(ServiceAccount),
    AuthorizedUser {
        client_id: String,
        client_secret: String,
        refresh_token: String,
    },
    Metadata,
}

impl TokenSource {
    fn resolve(credentials: Option<&Path>) -> Result<Self> {
        if let Ok(token) = std::env::var(ACCESS_TOKEN_ENV) {
            if !token.trim().is_empty() {
                return Ok(Self::Static(token));
            }
        }

        let Some(path) = credentials else {
            return Ok(Self::Metadata);
        };

        let raw = std::fs::read_to_string(path)?;
        match serde_json::from_str::<CredentialFile>(&raw)? {
            CredentialFile::AuthorizedUser {
                client_id,
                client_secret,
                refresh_token,
            } => Ok(Self::AuthorizedUser {
                client_id,
                client_secret,
                refresh_token,
            }),
            CredentialFile::ServiceAccount {
                client_email,
                private_key,
                token_uri,
            } => {
                let key = EncodingKey::from_rsa_pem(private_key.as_bytes()).map_err(|e| {
                    Error::Config(format!(
                        "service account key in {} is not a valid RSA key: {}",
                        path.display(),
                        e
                    ))
                })?;
                debug!("using service account {}", client_email);
                Ok(Self::ServiceAccount(ServiceAccount {
                    client_email,
                    token_uri: token_uri.unwrap_or_else(|| TOKEN_URL.to_string()),
                    key,
                }))
            }
        }
    }

    fn fetch(&self, client: &Client) -> Result<String> {
        let response = match self {
            Self::Static(token) => return Ok(token.clone()),
            Self::ServiceAccount(account) => {
                let assertion = account.assertion(chrono::Utc::now().timestamp())?;
                client
                    .post(&account.token_uri)
                    .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
                    .send()
            }
            Self::AuthorizedUser {
                client_id,
                client_secret,
                refresh_token,
            } => client
                .post(TOKEN_URL)
                .form(&[
                    ("client_id", client_id.as_str()),
                    ("client_secret", client_secret.as_str()),
                    ("refresh_token", refresh_token.as_str()),
                    ("grant_type", "refresh_token"),
                ])
                .send(),
            Self::Metadata => client
                .get(METADATA_TOKEN_URL)
                .header("Metadata-Flavor", "Google")
                .send(),
        }
        .map_err(|e| Error::Cloud(format!("failed to obtain access token: {}", e)))?;

        let token: TokenResponse = response.error_for_status()?.json()?;
        Ok(token.access_token)
    }
}

pub struct GcsStore {
    bucket: String,
    client: Client,
    token: String,
}

impl GcsStore {
    /// Resolve credentials and fetch an access token up front
    pub fn connect(bucket: &str, credentials: Option<&Path>) -> Result<Self> {
        let client = Client::new();
        let token = TokenSource::resolve(credentials)?.fetch(&client)?;
        Ok(Self {
            bucket: bucket.to_string(),
            client,
            token,
        })
    }
}

fn upload_url(bucket: &str, key: &str) -> String {
    format!(
        "{}/b/{}/o?uploadType=media&name={}",
        UPLOAD_BASE,
        urlencoding::encode(bucket),
        urlencoding::encode(key)
    )
}

fn download_url(bucket: &str, key: &str) -> String {
    format!(
        "{}/b/{}/o/{}?alt=media",
        API_BASE,
        urlencoding::encode(bucket),
        urlencoding::encode(key)
    )
}

impl ObjectStore for GcsStore {
    fn put(&self, key: &str, data: Vec<u8>) -> Result<()> {
        debug!("uploading gs://{}/{} ({} bytes)", self.bucket, key, data.len());
        let response = self
            .client
            .post(upload_url(&self.bucket, key))
            .bearer_auth(&self.token)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()?;

        if !response.status().is_success() {
            return Err(Error::Cloud(format!(
                "upload of gs://{}/{} failed with status {}",
                self.bucket,
                key,
                response.status()
            )));
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        debug!("downloading gs://{}/{}", self.bucket, key);
        let response = self
            .client
            .get(download_url(&self.bucket, key))
            .bearer_auth(&self.token)
            .send()?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.bytes()?.to_vec())),
            status => Err(Error::Cloud(format!(
                "download of gs://{}/{} failed with status {}",
                self.bucket, key, status
            ))),
        }
    }
}
