//! HTTP client for the backup server.

use crate::config::ConsoleConfig;
use crate::destinations::{BackendModule, TestOutcome};
use crate::errors::{ConsoleError, Result};
use crate::filters::{FileTreeNode, FilterGroupCatalog};
use crate::logging::RedactedUrl;
use crate::status::{ProgressState, PushEvent, PushStream, ServerState, StatusApi};
use async_trait::async_trait;
use futures_util::stream::{self, Stream, StreamExt};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Supplies the bearer credential. Storage and renewal live elsewhere.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> Result<Option<String>>;
    /// Called once after a 401; returns the credential to retry with.
    async fn refresh(&self) -> Result<Option<String>>;
}

/// A fixed token, or none.
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: Option<String>) -> Self {
        Self(token)
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn token(&self) -> Result<Option<String>> {
        Ok(self.0.clone())
    }

    async fn refresh(&self) -> Result<Option<String>> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BackupEntry {
    backup: BackupSummary,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BackupSummary {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SystemInfo {
    #[serde(default)]
    backend_modules: Vec<BackendModule>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BackupFiles {
    #[serde(default)]
    files: Vec<BackupFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BackupFile {
    path: String,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(alias = "Error", alias = "Message", default)]
    error: Option<String>,
}

#[derive(Clone)]
pub struct ServerClient {
    http: reqwest::Client,
    base: String,
    request_timeout: Duration,
    tokens: Arc<dyn TokenSource>,
}

impl ServerClient {
    pub fn new(config: &ConsoleConfig, tokens: Arc<dyn TokenSource>) -> Result<Self> {
        // No client-wide timeout: the push stream stays open indefinitely.
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|err| ConsoleError::Config(format!("http client: {}", err)))?;
        Ok(Self {
            http,
            base: config.server_url.trim_end_matches('/').to_string(),
            request_timeout: config.request_timeout(),
            tokens,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Sends a request built by `build`. A 401 refreshes the credential and
    /// retries once; the retry flag belongs to this call only.
    async fn send(
        &self,
        endpoint: &str,
        build: impl Fn(&reqwest::Client) -> RequestBuilder + Send + Sync,
    ) -> Result<Response> {
        let mut token = self.tokens.token().await?;
        let mut refreshed = false;
        loop {
            let mut request = build(&self.http);
            if let Some(token) = &token {
                request = request.bearer_auth(token);
            }
            let response = request.send().await?;
            if response.status() == StatusCode::UNAUTHORIZED && !refreshed {
                debug!("client: unauthorized endpoint={} refreshing credential", endpoint);
                refreshed = true;
                token = self.tokens.refresh().await?;
                continue;
            }
            return Ok(response);
        }
    }

    async fn send_ok(
        &self,
        endpoint: &str,
        build: impl Fn(&reqwest::Client) -> RequestBuilder + Send + Sync,
    ) -> Result<Response> {
        let response = self.send(endpoint, build).await?;
        if !response.status().is_success() {
            return Err(ConsoleError::Http {
                status: response.status().as_u16(),
                endpoint: endpoint.to_string(),
            });
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, endpoint: &str, query: &[(&str, String)]) -> Result<T> {
        let url = self.url(endpoint);
        let timeout = self.request_timeout;
        let response = self
            .send_ok(endpoint, |http| http.get(&url).query(query).timeout(timeout))
            .await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    pub async fn fetch_server_state(&self, last_event_id: Option<i64>, hold: Duration) -> Result<ServerState> {
        let mut query = Vec::new();
        if let Some(id) = last_event_id {
            query.push(("lasteventid", id.to_string()));
            query.push(("longpoll", "true".to_string()));
            query.push(("duration", format!("{}s", hold.as_secs())));
        }
        self.get_json("/api/v1/serverstate", &query).await
    }

    pub async fn fetch_progress_state(&self) -> Result<ProgressState> {
        self.get_json("/api/v1/progressstate", &[]).await
    }

    pub async fn backups(&self) -> Result<Vec<BackupSummary>> {
        let entries: Vec<BackupEntry> = self.get_json("/api/v1/backups", &[]).await?;
        Ok(entries.into_iter().map(|entry| entry.backup).collect())
    }

    pub async fn backend_modules(&self) -> Result<Vec<BackendModule>> {
        let info: SystemInfo = self.get_json("/api/v1/systeminfo", &[]).await?;
        Ok(info.backend_modules)
    }

    pub async fn filter_groups(&self) -> Result<FilterGroupCatalog> {
        self.get_json("/api/v1/systeminfo/filtergroups", &[]).await
    }

    /// Local file system listing below `path`.
    pub async fn list_path(&self, path: &str) -> Result<Vec<FileTreeNode>> {
        let endpoint = "/api/v1/filesystem";
        let url = self.url(endpoint);
        let timeout = self.request_timeout;
        let body = serde_json::json!({ "path": path, "onlyfolders": false, "showhidden": true });
        let response = self
            .send_ok(endpoint, |http| http.post(&url).json(&body).timeout(timeout))
            .await?;
        Ok(serde_json::from_slice(&response.bytes().await?)?)
    }

    /// Contents of a backup version below `prefix`.
    pub async fn list_backup_path(&self, backup_id: &str, time: &str, prefix: &str) -> Result<Vec<FileTreeNode>> {
        let endpoint = format!("/api/v1/backup/{}/files", backup_id);
        let query = [
            ("prefix-only", "false".to_string()),
            ("folder-contents", "true".to_string()),
            ("time", time.to_string()),
            ("filter", prefix.to_string()),
        ];
        let listing: BackupFiles = self.get_json(&endpoint, &query).await?;
        Ok(listing
            .files
            .into_iter()
            .map(|file| {
                if file.path.ends_with('/') || file.path.ends_with('\\') {
                    FileTreeNode::folder(&file.path)
                } else {
                    FileTreeNode::file(&file.path)
                }
            })
            .collect())
    }

    /// Asks the server to connect to `target_url`.
    pub async fn test_destination(&self, target_url: &str) -> Result<TestOutcome> {
        let endpoint = "/api/v1/remoteoperation/test";
        let url = self.url(endpoint);
        let timeout = self.request_timeout;
        let body = serde_json::json!({ "path": target_url });
        debug!("client: testing destination url={}", RedactedUrl(target_url));
        let response = self
            .send(endpoint, |http| http.post(&url).json(&body).timeout(timeout))
            .await?;
        if response.status().is_success() {
            return Ok(TestOutcome::Success);
        }
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .ok()
            .and_then(|body| body.error)
            .unwrap_or(text);
        if message.trim().is_empty() {
            return Err(ConsoleError::Http {
                status: status.as_u16(),
                endpoint: endpoint.to_string(),
            });
        }
        Ok(TestOutcome::from_message(&message))
    }

    /// Opens the server-sent event stream of status frames.
    pub async fn open_event_stream(&self) -> Result<PushStream> {
        let endpoint = "/notifications";
        let url = self.url(endpoint);
        let response = self
            .send_ok(endpoint, |http| {
                http.request(Method::GET, &url)
                    .header(reqwest::header::ACCEPT, "text/event-stream")
            })
            .await?;
        Ok(decode_event_stream(Box::pin(response.bytes_stream())).boxed())
    }
}

#[async_trait]
impl StatusApi for ServerClient {
    async fn server_state(&self, last_event_id: Option<i64>, hold: Duration) -> Result<ServerState> {
        self.fetch_server_state(last_event_id, hold).await
    }

    async fn progress_state(&self) -> Result<ProgressState> {
        self.fetch_progress_state().await
    }

    async fn backup_names(&self) -> Result<HashMap<String, String>> {
        Ok(self
            .backups()
            .await?
            .into_iter()
            .map(|backup| (backup.id, backup.name))
            .collect())
    }

    async fn subscribe(&self) -> Result<PushStream> {
        self.open_event_stream().await
    }
}

/// Largest event-stream frame accepted before the stream is dropped.
pub const MAX_FRAME_BYTES: usize = 1 << 20;

/// Splits an event-stream body into frames and decodes their `data` lines.
/// Comment and keep-alive frames are skipped, undecodable frames are logged
/// and skipped; transport errors end the stream after being yielded. So does
/// a frame that grows past [`MAX_FRAME_BYTES`] without terminating.
pub fn decode_event_stream<S, B, E>(source: S) -> impl Stream<Item = Result<PushEvent>>
where
    S: Stream<Item = std::result::Result<B, E>> + Send + Unpin,
    B: AsRef<[u8]> + Send,
    E: Into<ConsoleError> + Send,
{
    stream::unfold(Some((source, Vec::new())), |state| async move {
        let (mut source, mut buffer) = state?;
        loop {
            while let Some(frame) = take_frame(&mut buffer) {
                if let Some(event) = decode_frame(&frame) {
                    return Some((Ok(event), Some((source, buffer))));
                }
            }
            if buffer.len() > MAX_FRAME_BYTES {
                warn!("client: push frame exceeds limit bytes={}", buffer.len());
                let err = ConsoleError::Transport(format!("push frame exceeds {} bytes", MAX_FRAME_BYTES));
                return Some((Err(err), None));
            }
            match source.next().await {
                Some(Ok(chunk)) => buffer.extend(chunk.as_ref().iter().filter(|b| **b != b'\r')),
                Some(Err(err)) => return Some((Err(err.into()), None)),
                None => return None,
            }
        }
    })
}

fn take_frame(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let end = buffer.windows(2).position(|pair| pair == b"\n\n")?;
    let frame = buffer[..end].to_vec();
    buffer.drain(..end + 2);
    Some(frame)
}

fn decode_frame(frame: &[u8]) -> Option<PushEvent> {
    let text = String::from_utf8_lossy(frame);
    let data: Vec<&str> = text
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|value| value.strip_prefix(' ').unwrap_or(value))
        .collect();
    if data.is_empty() {
        return None;
    }
    match PushEvent::from_json(&data.join("\n")) {
        Ok(event) => event,
        Err(err) => {
            warn!("client: undecodable push frame err={}", err);
            None
        }
    }
}
