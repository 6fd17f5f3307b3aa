//! Firebase over its REST surfaces: Realtime Database, Cloud Storage and the
//! Identity Toolkit.

use super::tree;
use super::{BlobStore, DocumentStore, IdentityProvider, Session};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(300);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const STORAGE_ENDPOINT: &str = "https://firebasestorage.googleapis.com/v0/b";
const IDENTITY_ENDPOINT: &str = "https://identitytoolkit.googleapis.com/v1/";

fn build_client() -> Result<Client> {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")
}

async fn ensure_success(response: Response, what: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(anyhow!("{} failed: HTTP {}: {}", what, status, body.trim()))
}

/// Realtime Database REST client. Paths map to `{database}/{path}.json`.
pub struct RealtimeDatabase {
    client: Client,
    base: Url,
    auth: RwLock<Option<String>>,
}

impl RealtimeDatabase {
    pub fn new(database_url: &str) -> Result<Self> {
        let mut base = database_url.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base = Url::parse(&base)
            .with_context(|| format!("Invalid database URL: {}", database_url))?;

        Ok(Self {
            client: build_client()?,
            base,
            auth: RwLock::new(None),
        })
    }

    /// Sets the ID token sent with every request.
    pub fn set_auth(&self, token: Option<String>) {
        *self.auth.write() = token;
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        let relative = format!("{}.json", tree::segments(path).join("/"));
        let mut url = self
            .base
            .join(&relative)
            .with_context(|| format!("Invalid database path: {}", path))?;
        if let Some(token) = self.auth.read().as_deref() {
            url.query_pairs_mut().append_pair("auth", token);
        }
        Ok(url)
    }
}

#[derive(Debug, Deserialize)]
struct PushResponse {
    name: String,
}

#[async_trait]
impl DocumentStore for RealtimeDatabase {
    async fn read(&self, path: &str) -> Result<Option<Value>> {
        let response = self
            .client
            .get(self.endpoint(path)?)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .with_context(|| format!("Failed to read {}", path))?;
        let value: Value = ensure_success(response, "Read")
            .await?
            .json()
            .await
            .context("Failed to parse database response")?;

        Ok(match value {
            Value::Null => None,
            value => Some(value),
        })
    }

    async fn write(&self, path: &str, value: Value) -> Result<()> {
        let response = self
            .client
            .put(self.endpoint(path)?)
            .timeout(REQUEST_TIMEOUT)
            .json(&value)
            .send()
            .await
            .with_context(|| format!("Failed to write {}", path))?;
        ensure_success(response, "Write").await?;
        Ok(())
    }

    async fn update(&self, path: &str, fields: Value) -> Result<()> {
        if !fields.is_object() {
            bail!("Update of {} expects an object, got {}", path, fields);
        }
        let response = self
            .client
            .patch(self.endpoint(path)?)
            .timeout(REQUEST_TIMEOUT)
            .json(&fields)
            .send()
            .await
            .with_context(|| format!("Failed to update {}", path))?;
        ensure_success(response, "Update").await?;
        Ok(())
    }

    async fn append(&self, path: &str, value: Value) -> Result<String> {
        let response = self
            .client
            .post(self.endpoint(path)?)
            .timeout(REQUEST_TIMEOUT)
            .json(&value)
            .send()
            .await
            .with_context(|| format!("Failed to append to {}", path))?;
        let pushed: PushResponse = ensure_success(response, "Append")
            .await?
            .json()
            .await
            .context("Failed to parse push response")?;
        debug!("Appended {}/{}", path, pushed.name);
        Ok(pushed.name)
    }

    async fn remove(&self, path: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.endpoint(path)?)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .with_context(|| format!("Failed to remove {}", path))?;
        ensure_success(response, "Remove").await?;
        Ok(())
    }

    async fn subscribe(&self, path: &str) -> Result<watch::Receiver<Option<Value>>> {
        let initial = self.read(path).await?;
        let (tx, rx) = watch::channel(initial);

        let response = self
            .client
            .get(self.endpoint(path)?)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .with_context(|| format!("Failed to subscribe to {}", path))?;
        let response = ensure_success(response, "Subscribe").await?;

        info!("Streaming changes for {}", path);
        tokio::spawn(stream_events(response, tx, path.to_string()));
        Ok(rx)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SseEvent {
    event: String,
    data: String,
}

fn parse_sse_event(block: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data = Vec::new();

    for line in block.lines() {
        if let Some(value) = line.strip_prefix("event:") {
            event = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            data.push(value.trim_start());
        }
    }

    event.map(|event| SseEvent {
        event,
        data: data.join("\n"),
    })
}

#[derive(Debug, PartialEq, Eq)]
enum StreamUpdate {
    Changed,
    Ignored,
    Closed,
}

#[derive(Debug, Deserialize)]
struct EventPayload {
    path: String,
    data: Value,
}

fn apply_event(current: &mut Value, event: &SseEvent) -> Result<StreamUpdate> {
    match event.event.as_str() {
        "put" => {
            let payload: EventPayload =
                serde_json::from_str(&event.data).context("Malformed put event")?;
            tree::set(current, &payload.path, payload.data);
            Ok(StreamUpdate::Changed)
        }
        "patch" => {
            let payload: EventPayload =
                serde_json::from_str(&event.data).context("Malformed patch event")?;
            let Value::Object(fields) = payload.data else {
                bail!("Patch event without an object payload");
            };
            tree::update(current, &payload.path, &fields);
            Ok(StreamUpdate::Changed)
        }
        "cancel" | "auth_revoked" => Ok(StreamUpdate::Closed),
        _ => Ok(StreamUpdate::Ignored),
    }
}

async fn stream_events(mut response: Response, tx: watch::Sender<Option<Value>>, path: String) {
    let mut buffer: Vec<u8> = Vec::new();
    let mut current = tx.borrow().clone().unwrap_or(Value::Null);

    loop {
        let chunk = tokio::select! {
            _ = tx.closed() => {
                debug!("Last subscriber for {} went away", path);
                return;
            }
            chunk = response.chunk() => chunk,
        };

        match chunk {
            Ok(Some(bytes)) => buffer.extend_from_slice(&bytes),
            Ok(None) => {
                debug!("Event stream for {} ended", path);
                return;
            }
            Err(e) => {
                warn!("Event stream for {} failed: {}", path, e);
                return;
            }
        }

        while let Some(end) = buffer.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = buffer.drain(..end + 2).collect();
            let Some(event) = parse_sse_event(&String::from_utf8_lossy(&block)) else {
                continue;
            };

            match apply_event(&mut current, &event) {
                Ok(StreamUpdate::Changed) => {
                    let next = match &current {
                        Value::Null => None,
                        value => Some(value.clone()),
                    };
                    tx.send_replace(next);
                }
                Ok(StreamUpdate::Ignored) => {}
                Ok(StreamUpdate::Closed) => {
                    warn!("Server closed event stream for {}: {}", path, event.event);
                    return;
                }
                Err(e) => warn!("Skipping event for {}: {}", path, e),
            }
        }
    }
}

/// Cloud Storage for Firebase over its REST API.
pub struct CloudStorage {
    client: Client,
    endpoint: Url,
    auth: RwLock<Option<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    #[serde(default)]
    download_tokens: Option<String>,
}

impl CloudStorage {
    pub fn new(bucket: &str) -> Result<Self> {
        Self::with_endpoint(STORAGE_ENDPOINT, bucket)
    }

    pub fn with_endpoint(endpoint: &str, bucket: &str) -> Result<Self> {
        let endpoint = Url::parse(&format!("{}/{}/o", endpoint.trim_end_matches('/'), bucket))
            .with_context(|| format!("Invalid storage bucket: {}", bucket))?;
        Ok(Self {
            client: build_client()?,
            endpoint,
            auth: RwLock::new(None),
        })
    }

    pub fn set_auth(&self, token: Option<String>) {
        *self.auth.write() = token;
    }

    /// Object URL with the whole path as one percent-encoded segment.
    fn object_url(&self, path: &str) -> Result<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("Storage endpoint cannot hold a path"))?
            .push(path);
        Ok(url)
    }

    fn upload_url(&self, path: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("name", path);
        url
    }

    fn download_url(&self, path: &str, token: Option<&str>) -> Result<Url> {
        let mut url = self.object_url(path)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("alt", "media");
            if let Some(token) = token {
                query.append_pair("token", token);
            }
        }
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth.read().as_deref() {
            Some(token) => request.header(AUTHORIZATION, format!("Firebase {}", token)),
            None => request,
        }
    }
}

#[async_trait]
impl BlobStore for CloudStorage {
    async fn put(&self, path: &str, data: Vec<u8>, content_type: &str) -> Result<String> {
        let size = data.len();
        let request = self
            .client
            .post(self.upload_url(path))
            .timeout(UPLOAD_TIMEOUT)
            .header(CONTENT_TYPE, content_type)
            .body(data);

        let response = self
            .authorize(request)
            .send()
            .await
            .with_context(|| format!("Failed to upload {}", path))?;
        let uploaded: UploadResponse = ensure_success(response, "Upload")
            .await?
            .json()
            .await
            .context("Failed to parse upload response")?;

        let token = uploaded
            .download_tokens
            .as_deref()
            .and_then(|tokens| tokens.split(',').next())
            .filter(|token| !token.is_empty());
        let url = self.download_url(path, token)?;

        info!("Uploaded {} ({} bytes)", path, size);
        Ok(url.to_string())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let request = self
            .client
            .delete(self.object_url(path)?)
            .timeout(REQUEST_TIMEOUT);
        let response = self
            .authorize(request)
            .send()
            .await
            .with_context(|| format!("Failed to delete {}", path))?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!("{} was already gone", path);
            return Ok(());
        }
        ensure_success(response, "Delete").await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthResponse {
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
}

impl From<AuthResponse> for Session {
    fn from(response: AuthResponse) -> Self {
        Session {
            user_id: response.local_id,
            email: response.email,
            display_name: response.display_name.filter(|name| !name.is_empty()),
            id_token: response.id_token,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Pulls the error code out of an Identity Toolkit error body.
fn error_message(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .map(|body| body.error.message)
}

/// Email/password accounts through the Identity Toolkit REST API.
pub struct IdentityToolkit {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl IdentityToolkit {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_endpoint(IDENTITY_ENDPOINT, api_key)
    }

    pub fn with_endpoint(endpoint: &str, api_key: impl Into<String>) -> Result<Self> {
        let mut endpoint = endpoint.to_string();
        if !endpoint.ends_with('/') {
            endpoint.push('/');
        }
        Ok(Self {
            client: build_client()?,
            api_key: api_key.into(),
            endpoint,
        })
    }

    fn method_url(&self, method: &str) -> Result<Url> {
        let mut url = Url::parse(&format!("{}accounts:{}", self.endpoint, method))
            .with_context(|| format!("Invalid identity endpoint for {}", method))?;
        url.query_pairs_mut().append_pair("key", &self.api_key);
        Ok(url)
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: Value) -> Result<T> {
        let response = self
            .client
            .post(self.method_url(method)?)
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to call accounts:{}", method))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = error_message(&body).unwrap_or_else(|| format!("HTTP {}", status));
            bail!("accounts:{} failed: {}", method, message);
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse accounts:{} response", method))
    }
}

#[async_trait]
impl IdentityProvider for IdentityToolkit {
    async fn sign_in_with_email(&self, email: &str, password: &str) -> Result<Session> {
        let response: AuthResponse = self
            .call(
                "signInWithPassword",
                json!({ "email": email, "password": password, "returnSecureToken": true }),
            )
            .await?;
        Ok(response.into())
    }

    async fn sign_up_with_email(&self, email: &str, password: &str) -> Result<Session> {
        let response: AuthResponse = self
            .call(
                "signUp",
                json!({ "email": email, "password": password, "returnSecureToken": true }),
            )
            .await?;
        Ok(response.into())
    }

    async fn update_display_name(&self, session: &Session, name: &str) -> Result<()> {
        let token = session
            .id_token
            .as_deref()
            .ok_or_else(|| anyhow!("Session for {} has no ID token", session.user_id))?;
        let _: Value = self
            .call(
                "update",
                json!({ "idToken": token, "displayName": name, "returnSecureToken": false }),
            )
            .await?;
        Ok(())
    }

    async fn sign_out(&self, session: &Session) -> Result<()> {
        // ID tokens are stateless; forgetting the session is all there is to do
        debug!("Dropping ID token for {}", session.user_id);
        Ok(())
    }
}
