//! Google Drive v3 upload adapter.
//!
//! Authentication accepts either a service-account key or an
//! authorized-user refresh token. Access tokens are cached and refreshed
//! shortly before they expire. Uploads use resumable sessions so an
//! interrupted transfer continues from the last byte the server confirmed.

use crate::config::{DriveSettings, ENV_CREDENTIALS};
use crate::error::ConfigError;
use crate::pipeline::Uploader;
use crate::{logok, logw};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use rand::Rng;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";
const FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
const UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";
const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const FILE_FIELDS: &str = "id,name,mimeType,trashed,webViewLink";

// Drive requires chunks in multiples of 256 KiB.
const CHUNK_SIZE: usize = 32 * 256 * 1024;
const MAX_CHUNK_ATTEMPTS: u32 = 5;
#[cfg(not(test))]
const BACKOFF_BASE_MS: u64 = 500;
#[cfg(test)]
const BACKOFF_BASE_MS: u64 = 5;
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;
const JWT_LIFETIME_SECS: i64 = 3600;

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// Credentials blob from `GDRIVE_CREDENTIALS`.
#[derive(Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credentials {
    ServiceAccount {
        client_email: String,
        private_key: String,
        #[serde(default = "default_token_uri")]
        token_uri: String,
    },
    AuthorizedUser {
        client_id: String,
        client_secret: String,
        refresh_token: String,
        #[serde(default = "default_token_uri")]
        token_uri: String,
    },
}

impl Credentials {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn token_uri(&self) -> &str {
        match self {
            Credentials::ServiceAccount { token_uri, .. } => token_uri,
            Credentials::AuthorizedUser { token_uri, .. } => token_uri,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::ServiceAccount { client_email, .. } => f
                .debug_struct("ServiceAccount")
                .field("client_email", client_email)
                .finish_non_exhaustive(),
            Credentials::AuthorizedUser { client_id, .. } => f
                .debug_struct("AuthorizedUser")
                .field("client_id", client_id)
                .finish_non_exhaustive(),
        }
    }
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + ChronoDuration::seconds(TOKEN_REFRESH_MARGIN_SECS) < self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Serialize)]
struct JwtClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

async fn fetch_token(client: &Client, credentials: &Credentials) -> Result<AccessToken> {
    let now = Utc::now();
    let token_uri = credentials.token_uri();

    let form: Vec<(&str, String)> = match credentials {
        Credentials::ServiceAccount {
            client_email,
            private_key,
            ..
        } => {
            let key = EncodingKey::from_rsa_pem(private_key.as_bytes()).map_err(|err| {
                ConfigError::InvalidCredentials {
                    var: ENV_CREDENTIALS,
                    reason: format!("private_key: {err}"),
                }
            })?;
            let claims = JwtClaims {
                iss: client_email,
                scope: DRIVE_SCOPE,
                aud: token_uri,
                iat: now.timestamp(),
                exp: now.timestamp() + JWT_LIFETIME_SECS,
            };
            let assertion = encode(&Header::new(Algorithm::RS256), &claims, &key)
                .context("Failed to sign service account assertion")?;
            vec![
                (
                    "grant_type",
                    "urn:ietf:params:oauth:grant-type:jwt-bearer".to_string(),
                ),
                ("assertion", assertion),
            ]
        }
        Credentials::AuthorizedUser {
            client_id,
            client_secret,
            refresh_token,
            ..
        } => vec![
            ("grant_type", "refresh_token".to_string()),
            ("client_id", client_id.clone()),
            ("client_secret", client_secret.clone()),
            ("refresh_token", refresh_token.clone()),
        ],
    };

    let resp = client
        .post(token_uri)
        .form(&form)
        .timeout(Duration::from_secs(60))
        .send()
        .await
        .context("Token request failed")?;

    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(ConfigError::CredentialsRejected {
            endpoint: token_uri.to_string(),
            status: status.as_u16(),
            body: body.chars().take(400).collect(),
        }
        .into());
    }

    let token: TokenResponse =
        serde_json::from_str(&body).context("Failed to parse token response")?;
    let expires_in = token.expires_in.unwrap_or(JWT_LIFETIME_SECS);
    debug!(expires_in, "drive access token issued");

    Ok(AccessToken {
        value: token.access_token,
        expires_at: now + ChronoDuration::seconds(expires_in),
    })
}

/// Metadata of a Drive object, as returned by `files.get` / `files.create`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub trashed: bool,
    #[serde(default)]
    pub web_view_link: Option<String>,
}

impl DriveFile {
    pub fn is_active_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME && !self.trashed
    }
}

/// Destination folder used for every upload of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub id: String,
    pub name: String,
    pub view_url: String,
}

impl UploadedFile {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let id = id.into();
        let view_url = view_url(&id);
        Self {
            id,
            name: name.into(),
            view_url,
        }
    }
}

pub fn view_url(file_id: &str) -> String {
    format!("https://drive.google.com/file/d/{}/view", file_id)
}

#[async_trait]
pub trait FolderApi: Send + Sync {
    /// `Ok(None)` when no object with `id` exists.
    async fn get_folder(&self, id: &str) -> Result<Option<DriveFile>>;

    async fn create_folder(&self, name: &str) -> Result<DriveFile>;
}

/// Reuses `folder_id` when it names an active folder, otherwise creates `folder_name`.
///
/// With `create_missing` off no lookup happens and the supplied id (if any)
/// is trusted as-is.
pub async fn resolve_or_create_folder(
    api: &dyn FolderApi,
    folder_id: Option<&str>,
    folder_name: &str,
    create_missing: bool,
) -> Result<Option<FolderRef>> {
    if !create_missing {
        return Ok(folder_id.map(|id| FolderRef {
            id: id.to_string(),
            name: id.to_string(),
        }));
    }

    if let Some(id) = folder_id {
        match api.get_folder(id).await {
            Ok(Some(file)) if file.is_active_folder() => {
                return Ok(Some(FolderRef {
                    id: file.id,
                    name: file.name,
                }));
            }
            Ok(Some(file)) => logw(format!(
                "Drive object {} is not an active folder (mimeType={}, trashed={})",
                id, file.mime_type, file.trashed
            )),
            Ok(None) => logw(format!("Drive folder {} not found", id)),
            Err(err) => logw(format!("Drive folder lookup failed for {}: {:#}", id, err)),
        }
    }

    let created = api
        .create_folder(folder_name)
        .await
        .with_context(|| format!("Failed to create Drive folder '{}'", folder_name))?;
    logok(format!("Created Drive folder '{}' ({})", created.name, created.id));

    Ok(Some(FolderRef {
        id: created.id,
        name: created.name,
    }))
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(OsStr::to_str)
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("mp4") => "video/mp4",
        Some("mp3") => "audio/mpeg",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

/// Next byte to send, from a `Range: bytes=0-N` header.
fn next_offset_from_range(range: Option<&str>) -> u64 {
    range
        .and_then(|r| r.trim().strip_prefix("bytes="))
        .and_then(|r| r.split('-').nth(1))
        .and_then(|end| end.trim().parse::<u64>().ok())
        .map(|end| end + 1)
        .unwrap_or(0)
}

/// `files/<id>` with the id percent-encoded as a single path segment.
fn file_url(id: &str) -> Result<Url> {
    let mut url = Url::parse(FILES_URL)?;
    url.path_segments_mut()
        .map_err(|_| anyhow::anyhow!("{} cannot take path segments", FILES_URL))?
        .push(id);
    Ok(url)
}

enum ChunkOutcome {
    Done(DriveFile),
    Resume(u64),
}

async fn backoff(attempt: u32) {
    let jitter = rand::thread_rng().gen_range(0..BACKOFF_BASE_MS / 2);
    let delay = BACKOFF_BASE_MS * 2u64.saturating_pow(attempt.saturating_sub(1)) + jitter;
    tokio::time::sleep(Duration::from_millis(delay)).await;
}

pub struct DriveClient {
    client: Client,
    credentials: Credentials,
    token: Mutex<Option<AccessToken>>,
}

impl DriveClient {
    /// Exchanges `credentials` for an access token; rejected credentials fail here.
    pub async fn authenticate(client: Client, credentials: Credentials) -> Result<Self> {
        let token = fetch_token(&client, &credentials).await?;
        Ok(Self {
            client,
            credentials,
            token: Mutex::new(Some(token)),
        })
    }

    async fn bearer(&self) -> Result<String> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            if token.is_fresh(Utc::now()) {
                return Ok(token.value.clone());
            }
        }

        debug!("refreshing drive access token");
        let token = fetch_token(&self.client, &self.credentials).await?;
        let value = token.value.clone();
        *guard = Some(token);
        Ok(value)
    }

    async fn start_session(
        &self,
        name: &str,
        parent: Option<&FolderRef>,
        mime: &str,
        total: u64,
    ) -> Result<String> {
        let mut metadata = serde_json::json!({ "name": name, "mimeType": mime });
        if let Some(parent) = parent {
            metadata["parents"] = serde_json::json!([parent.id]);
        }

        let resp = self
            .client
            .post(UPLOAD_URL)
            .query(&[
                ("uploadType", "resumable"),
                ("supportsAllDrives", "true"),
                ("fields", FILE_FIELDS),
            ])
            .bearer_auth(self.bearer().await?)
            .header("X-Upload-Content-Type", mime)
            .header("X-Upload-Content-Length", total.to_string())
            .json(&metadata)
            .send()
            .await
            .context("Drive upload session request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!(
                "Drive upload session HTTP {}: {}",
                status.as_u16(),
                body.chars().take(400).collect::<String>()
            );
        }

        resp.headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .context("Drive upload session response has no Location header")
    }

    async fn handle_chunk_response(resp: reqwest::Response) -> Result<ChunkOutcome> {
        let status = resp.status();
        if status == StatusCode::PERMANENT_REDIRECT {
            let range = resp
                .headers()
                .get(reqwest::header::RANGE)
                .and_then(|v| v.to_str().ok());
            return Ok(ChunkOutcome::Resume(next_offset_from_range(range)));
        }
        if status.is_success() {
            let file: DriveFile = resp
                .json()
                .await
                .context("Failed to parse Drive upload response")?;
            return Ok(ChunkOutcome::Done(file));
        }

        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!(
            "Drive chunk upload HTTP {}: {}",
            status.as_u16(),
            body.chars().take(400).collect::<String>()
        )
    }

    async fn put_chunk(
        &self,
        session: &str,
        chunk: &[u8],
        offset: u64,
        total: u64,
    ) -> Result<ChunkOutcome> {
        let last = offset + chunk.len() as u64 - 1;
        let resp = self
            .client
            .put(session)
            .header("Content-Range", format!("bytes {}-{}/{}", offset, last, total))
            .body(chunk.to_vec())
            .timeout(Duration::from_secs(300))
            .send()
            .await
            .context("Drive chunk upload failed")?;
        Self::handle_chunk_response(resp).await
    }

    async fn query_offset(&self, session: &str, total: u64) -> Result<ChunkOutcome> {
        let resp = self
            .client
            .put(session)
            .header("Content-Range", format!("bytes */{}", total))
            .header("Content-Length", "0")
            .timeout(Duration::from_secs(60))
            .send()
            .await
            .context("Drive upload status query failed")?;
        Self::handle_chunk_response(resp).await
    }

    /// Sends `data` to an open resumable session.
    ///
    /// Each request sent from the loop counts as one attempt at the current
    /// offset. Status queries made to recover from a transport error do not.
    async fn send_resumable(&self, session: &str, data: &[u8]) -> Result<DriveFile> {
        let total = data.len() as u64;
        let mut offset = 0u64;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let sent = if offset >= total {
                self.query_offset(session, total).await
            } else {
                let end = (offset + CHUNK_SIZE as u64).min(total);
                let chunk = &data[offset as usize..end as usize];
                self.put_chunk(session, chunk, offset, total).await
            };
            let outcome = match sent {
                Ok(outcome) => outcome,
                Err(err) => {
                    if attempts >= MAX_CHUNK_ATTEMPTS {
                        return Err(err.context(format!(
                            "Drive upload gave up after {} attempts",
                            attempts
                        )));
                    }
                    logw(format!(
                        "Upload interrupted at byte {}/{} ({:#}); resuming",
                        offset, total, err
                    ));
                    backoff(attempts).await;
                    match self.query_offset(session, total).await {
                        Ok(outcome) => outcome,
                        Err(err) => {
                            debug!(error = ?err, "upload status query failed");
                            continue;
                        }
                    }
                }
            };

            match outcome {
                ChunkOutcome::Done(file) => return Ok(file),
                ChunkOutcome::Resume(next) if next > offset => {
                    attempts = 0;
                    offset = next.min(total);
                }
                ChunkOutcome::Resume(_) if attempts >= MAX_CHUNK_ATTEMPTS => {
                    anyhow::bail!("Drive upload stalled at byte {}/{}", offset, total);
                }
                ChunkOutcome::Resume(next) => offset = next,
            }
        }
    }

    /// Uploads `path` under `parent` (drive root when `None`).
    pub async fn upload_file(
        &self,
        parent: Option<&FolderRef>,
        path: &Path,
    ) -> Result<UploadedFile> {
        let name = path
            .file_name()
            .and_then(OsStr::to_str)
            .with_context(|| format!("Upload path has no file name: {}", path.display()))?
            .to_string();
        let data = fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if data.is_empty() {
            anyhow::bail!("Refusing to upload empty file {}", path.display());
        }

        let mime = mime_for(path);
        let session = self
            .start_session(&name, parent, mime, data.len() as u64)
            .await?;
        let file = self.send_resumable(&session, &data).await?;

        let name = if file.name.is_empty() { name } else { file.name };
        let mut uploaded = UploadedFile::new(file.id, name);
        if let Some(link) = file.web_view_link {
            uploaded.view_url = link;
        }
        Ok(uploaded)
    }
}

#[async_trait]
impl FolderApi for DriveClient {
    async fn get_folder(&self, id: &str) -> Result<Option<DriveFile>> {
        let resp = self
            .client
            .get(file_url(id)?)
            .query(&[("fields", FILE_FIELDS), ("supportsAllDrives", "true")])
            .bearer_auth(self.bearer().await?)
            .timeout(Duration::from_secs(60))
            .send()
            .await
            .context("Drive folder lookup failed")?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            anyhow::bail!("Drive folder lookup HTTP {}", status.as_u16());
        }

        let file = resp
            .json()
            .await
            .context("Failed to parse Drive folder metadata")?;
        Ok(Some(file))
    }

    async fn create_folder(&self, name: &str) -> Result<DriveFile> {
        let resp = self
            .client
            .post(FILES_URL)
            .query(&[("fields", FILE_FIELDS), ("supportsAllDrives", "true")])
            .bearer_auth(self.bearer().await?)
            .json(&serde_json::json!({ "name": name, "mimeType": FOLDER_MIME }))
            .timeout(Duration::from_secs(60))
            .send()
            .await
            .context("Drive folder create failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!(
                "Drive folder create HTTP {}: {}",
                status.as_u16(),
                body.chars().take(400).collect::<String>()
            );
        }

        resp.json()
            .await
            .context("Failed to parse created folder metadata")
    }
}

/// `Uploader` backed by Google Drive.
pub struct DriveUploader {
    client: DriveClient,
    settings: DriveSettings,
}

impl DriveUploader {
    pub async fn connect(client: Client, settings: &DriveSettings) -> Result<Self> {
        let credentials = settings
            .credentials
            .clone()
            .ok_or(ConfigError::MissingVar(ENV_CREDENTIALS))?;
        let client = DriveClient::authenticate(client, credentials).await?;
        logok("Authenticated with Google Drive");

        Ok(Self {
            client,
            settings: settings.clone(),
        })
    }
}

#[async_trait]
impl Uploader for DriveUploader {
    async fn resolve_folder(&self) -> Result<Option<FolderRef>> {
        resolve_or_create_folder(
            &self.client,
            self.settings.folder_id.as_deref(),
            &self.settings.folder_name,
            self.settings.create_missing_folder,
        )
        .await
    }

    async fn upload(&self, folder: Option<&FolderRef>, path: &Path) -> Result<UploadedFile> {
        self.client.upload_file(folder, path).await
    }
}
