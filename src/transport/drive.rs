//! Google Drive transport (spec §4.4): a two-file append log in the
//! user's Drive `appDataFolder`, synchronized with ETag-based
//! compare-and-swap and an OAuth desktop-app refresh-token flow.

use crate::constants::{DRIVE_CAS_MAX_RETRIES, DRIVE_LOG_C2S, DRIVE_LOG_S2C, DRIVE_POLL_INTERVAL};
use crate::session::envelope::{Envelope, Role};
use crate::transport::{Transport, TransportError};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";
const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

/// Base URLs, overridable for tests (a `wiremock::MockServer` in place
/// of the real Drive/OAuth endpoints). Defaults to Google's real hosts.
#[derive(Debug, Clone)]
struct DriveEndpoints {
    api_base: String,
    upload_base: String,
    token_endpoint: String,
}

impl Default for DriveEndpoints {
    fn default() -> Self {
        Self {
            api_base: DRIVE_API_BASE.to_string(),
            upload_base: DRIVE_UPLOAD_BASE.to_string(),
            token_endpoint: TOKEN_ENDPOINT.to_string(),
        }
    }
}

/// OAuth client identity, loaded from the `--drive-client-secrets` JSON
/// file (the format Google's "Desktop app" OAuth client download uses).
#[derive(Debug, Deserialize)]
struct ClientSecrets {
    installed: InstalledSecrets,
}

#[derive(Debug, Deserialize)]
struct InstalledSecrets {
    client_id: String,
    client_secret: String,
}

/// Persisted refresh/access token pair (spec §4.4: stored at
/// `~/.config/clipssh/drive-token.json`, 0600, file-locked during
/// refresh).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredToken {
    refresh_token: String,
    access_token: String,
    /// Unix timestamp the access token expires at.
    expires_at: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    #[serde(default)]
    refresh_token: Option<String>,
}

struct TokenStore {
    path: PathBuf,
    token: StoredToken,
}

impl TokenStore {
    fn load(path: &Path) -> Result<Self, TransportError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TransportError::TransportSetup(format!("failed to read drive token at {}: {e}", path.display())))?;
        let token: StoredToken =
            serde_json::from_str(&content).map_err(|e| TransportError::TransportSetup(format!("malformed drive token file: {e}")))?;
        Ok(Self { path: path.to_path_buf(), token })
    }

    /// Write-lock the token file for the duration of a refresh by
    /// holding an exclusively-created sibling `.lock` file; best-effort
    /// mutual exclusion against a second clipssh process on the same
    /// machine, not a distributed lock.
    fn save_locked(&self) -> Result<(), TransportError> {
        let lock_path = self.path.with_extension("json.lock");
        let _lock = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
            .map_err(|e| TransportError::TransportBroken(format!("drive token store busy: {e}")))?;

        let content = serde_json::to_string_pretty(&self.token).map_err(|e| TransportError::Encoding(format!("failed to encode drive token: {e}")))?;
        std::fs::write(&self.path, content).map_err(|e| TransportError::TransportBroken(format!("failed to persist drive token: {e}")))?;
        #[cfg(unix)]
        std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| TransportError::TransportBroken(format!("failed to chmod drive token: {e}")))?;

        let _ = std::fs::remove_file(&lock_path);
        Ok(())
    }
}

/// Tunable Drive transport parameters.
#[derive(Debug, Clone)]
pub struct DriveTransportConfig {
    pub client_secrets_path: PathBuf,
    pub token_path: PathBuf,
    pub poll_interval: Duration,
}

impl DriveTransportConfig {
    #[must_use]
    pub fn new(client_secrets_path: PathBuf, token_path: PathBuf) -> Self {
        Self {
            client_secrets_path,
            token_path,
            poll_interval: DRIVE_POLL_INTERVAL,
        }
    }
}

pub struct DriveTransport {
    client: reqwest::Client,
    secrets: ClientSecrets,
    token_store: TokenStore,
    config: DriveTransportConfig,
    endpoints: DriveEndpoints,
    send_file: &'static str,
    recv_file: &'static str,
    send_file_id: Option<String>,
    recv_file_id: Option<String>,
    recv_offset: usize,
    recv_size: usize,
}

impl DriveTransport {
    pub async fn open(role: Role, config: DriveTransportConfig) -> Result<Self, TransportError> {
        Self::open_with_endpoints(role, config, DriveEndpoints::default()).await
    }

    async fn open_with_endpoints(role: Role, config: DriveTransportConfig, endpoints: DriveEndpoints) -> Result<Self, TransportError> {
        let secrets_json = std::fs::read_to_string(&config.client_secrets_path)
            .map_err(|e| TransportError::TransportSetup(format!("failed to read drive client secrets: {e}")))?;
        let secrets: ClientSecrets =
            serde_json::from_str(&secrets_json).map_err(|e| TransportError::TransportSetup(format!("malformed drive client secrets: {e}")))?;

        if !config.token_path.exists() {
            return Err(TransportError::TransportSetup(format!(
                "no drive token at {}; run the OAuth desktop flow once to authorize clipssh",
                config.token_path.display()
            )));
        }
        let token_store = TokenStore::load(&config.token_path)?;

        let (send_file, recv_file) = match role {
            Role::Client => (DRIVE_LOG_C2S, DRIVE_LOG_S2C),
            Role::Server => (DRIVE_LOG_S2C, DRIVE_LOG_C2S),
        };

        let mut transport = Self {
            client: reqwest::Client::new(),
            secrets,
            token_store,
            config,
            endpoints,
            send_file,
            recv_file,
            send_file_id: None,
            recv_file_id: None,
            recv_offset: 0,
            recv_size: 0,
        };
        transport.ensure_fresh_token().await?;
        transport.send_file_id = Some(transport.find_or_create_file(transport.send_file).await?);
        transport.recv_file_id = Some(transport.find_or_create_file(transport.recv_file).await?);
        Ok(transport)
    }

    async fn ensure_fresh_token(&mut self) -> Result<(), TransportError> {
        if self.token_store.token.expires_at > chrono::Utc::now().timestamp() + 60 {
            return Ok(());
        }

        let response = self
            .client
            .post(&self.endpoints.token_endpoint)
            .form(&[
                ("client_id", self.secrets.installed.client_id.as_str()),
                ("client_secret", self.secrets.installed.client_secret.as_str()),
                ("refresh_token", self.token_store.token.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| TransportError::TransportBroken(format!("drive token refresh request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(TransportError::TransportBroken(format!("drive token refresh failed: HTTP {}", response.status())));
        }
        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Encoding(format!("malformed drive token refresh response: {e}")))?;

        self.token_store.token.access_token = body.access_token;
        self.token_store.token.expires_at = chrono::Utc::now().timestamp() + body.expires_in;
        if let Some(refresh_token) = body.refresh_token {
            self.token_store.token.refresh_token = refresh_token;
        }
        self.token_store.save_locked()?;
        Ok(())
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.token_store.token.access_token)
    }

    /// Find `name` in `appDataFolder`, creating an empty file if absent.
    async fn find_or_create_file(&self, name: &str) -> Result<String, TransportError> {
        let api_base = &self.endpoints.api_base;
        let list_url = format!("{api_base}/files?spaces=appDataFolder&q=name%20%3D%20'{name}'&fields=files(id,name)");
        let response = self
            .client
            .get(&list_url)
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| TransportError::TransportBroken(format!("drive files.list failed: {e}")))?;
        let list: DriveFileList = response
            .json()
            .await
            .map_err(|e| TransportError::Encoding(format!("malformed drive files.list response: {e}")))?;

        if let Some(file) = list.files.into_iter().next() {
            return Ok(file.id);
        }

        let metadata = serde_json::json!({ "name": name, "parents": ["appDataFolder"] });
        let response = self
            .client
            .post(format!("{}/files", self.endpoints.api_base))
            .header("Authorization", self.auth_header())
            .json(&metadata)
            .send()
            .await
            .map_err(|e| TransportError::TransportBroken(format!("drive files.create failed: {e}")))?;
        let created: DriveFile = response
            .json()
            .await
            .map_err(|e| TransportError::Encoding(format!("malformed drive files.create response: {e}")))?;
        Ok(created.id)
    }

    /// Fetch a file's current content and ETag.
    async fn get_file(&self, file_id: &str) -> Result<(String, String), TransportError> {
        let response = self
            .client
            .get(format!("{}/files/{file_id}?alt=media", self.endpoints.api_base))
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| TransportError::TransportBroken(format!("drive files.get failed: {e}")))?;
        let etag = response
            .headers()
            .get("ETag")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::TransportBroken(format!("failed to read drive file body: {e}")))?;
        Ok((body, etag))
    }

    /// Append `line` to `file_id`, retrying on ETag precondition failure
    /// (spec §4.4: `files.get` + `files.update` with `If-Match`
    /// approximating compare-and-swap).
    async fn append_line(&self, file_id: &str, line: &str) -> Result<(), TransportError> {
        for _ in 0..DRIVE_CAS_MAX_RETRIES {
            let (existing, etag) = self.get_file(file_id).await?;
            let mut updated = existing;
            updated.push_str(line);
            updated.push('\n');

            let response = self
                .client
                .patch(format!("{}/files/{file_id}?uploadType=media", self.endpoints.upload_base))
                .header("Authorization", self.auth_header())
                .header("If-Match", etag)
                .body(updated)
                .send()
                .await
                .map_err(|e| TransportError::TransportBroken(format!("drive files.update failed: {e}")))?;

            if response.status().as_u16() == 412 {
                continue; // another writer raced us; refetch and retry
            }
            if !response.status().is_success() {
                return Err(TransportError::TransportBroken(format!("drive files.update failed: HTTP {}", response.status())));
            }
            return Ok(());
        }
        Err(TransportError::TransportBroken(format!("drive CAS append did not converge after {DRIVE_CAS_MAX_RETRIES} retries")))
    }
}

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: String,
}

#[derive(Debug, Deserialize)]
struct DriveFileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[async_trait]
impl Transport for DriveTransport {
    async fn send(&mut self, envelope: &Envelope) -> Result<(), TransportError> {
        self.ensure_fresh_token().await?;
        let json = envelope
            .encode()
            .map_err(|e| TransportError::Encoding(format!("failed to encode envelope: {e}")))?;
        let line = STANDARD.encode(json);
        let file_id = self.send_file_id.clone().expect("send_file_id set in open");
        self.append_line(&file_id, &line).await
    }

    async fn recv(&mut self, timeout: Duration) -> Result<Envelope, TransportError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if tokio::time::Instant::now() >= deadline {
                return Err(TransportError::Timeout("drive: no new log lines observed".into()));
            }
            self.ensure_fresh_token().await?;
            let file_id = self.recv_file_id.clone().expect("recv_file_id set in open");
            let (content, _etag) = self.get_file(&file_id).await?;

            if content.len() < self.recv_size {
                // Truncation (spec §4.4): the log was rotated or reset.
                self.recv_offset = 0;
            }
            self.recv_size = content.len();

            if content.len() > self.recv_offset {
                let new_bytes = &content[self.recv_offset..];
                self.recv_offset = content.len();
                for line in new_bytes.lines() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match STANDARD.decode(line.trim()).ok().and_then(|bytes| String::from_utf8(bytes).ok()) {
                        Some(json) => match Envelope::decode(&json) {
                            Ok(envelope) => return Ok(envelope),
                            Err(e) => log::debug!("clipssh: dropped malformed drive log line: {e}"),
                        },
                        None => log::debug!("clipssh: dropped non-base64 drive log line"),
                    }
                }
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    async fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::envelope::{Kind, Protocol};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    #[test]
    fn role_selects_disjoint_log_files() {
        let (client_send, client_recv) = (DRIVE_LOG_C2S, DRIVE_LOG_S2C);
        let (server_send, server_recv) = (DRIVE_LOG_S2C, DRIVE_LOG_C2S);
        assert_ne!(client_send, client_recv);
        assert_eq!(client_send, server_recv);
        assert_eq!(server_send, client_recv);
    }

    fn write_fixture_files(dir: &Path) -> (PathBuf, PathBuf) {
        let secrets_path = dir.join("secrets.json");
        std::fs::write(&secrets_path, r#"{"installed":{"client_id":"id","client_secret":"secret"}}"#).unwrap();

        let token_path = dir.join("token.json");
        let token = StoredToken {
            refresh_token: "rt".to_string(),
            access_token: "at".to_string(),
            expires_at: chrono::Utc::now().timestamp() + 3600,
        };
        std::fs::write(&token_path, serde_json::to_string(&token).unwrap()).unwrap();
        (secrets_path, token_path)
    }

    /// `files.get` responder: first call returns ETag `etag-1` over an
    /// empty file, every subsequent call returns `etag-2` — simulating
    /// another writer's append landing between our `files.get` and
    /// `files.update` (spec §4.4 CAS).
    struct SequencedGetFile {
        calls: Arc<AtomicUsize>,
    }

    impl Respond for SequencedGetFile {
        fn respond(&self, _request: &Request) -> ResponseTemplate {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == 0 {
                ResponseTemplate::new(200).insert_header("ETag", "etag-1").set_body_string("")
            } else {
                ResponseTemplate::new(200).insert_header("ETag", "etag-2").set_body_string("racing-writer-line\n")
            }
        }
    }

    /// `files.update` responder: rejects the stale ETag with 412 once
    /// (the precondition-failure path §4.4 describes), then accepts.
    struct PreconditionOnceThenAccept;

    impl Respond for PreconditionOnceThenAccept {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let if_match = request.headers.get("If-Match").and_then(|v| v.to_str().ok()).unwrap_or_default();
            if if_match == "etag-1" {
                ResponseTemplate::new(412)
            } else {
                ResponseTemplate::new(200)
            }
        }
    }

    /// S6: a `files.update` that loses the ETag race once still
    /// converges after one retry, and never surfaces the 412 to the
    /// caller.
    #[tokio::test]
    async fn append_line_retries_past_a_single_precondition_failure() {
        let server = MockServer::start().await;
        let tmp = tempfile::tempdir().unwrap();
        let (secrets_path, token_path) = write_fixture_files(tmp.path());

        Mock::given(method("GET"))
            .and(path("/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "files": [{ "id": "file123", "name": DRIVE_LOG_C2S }] })))
            .mount(&server)
            .await;

        let get_calls = Arc::new(AtomicUsize::new(0));
        Mock::given(method("GET"))
            .and(path("/files/file123"))
            .respond_with(SequencedGetFile { calls: get_calls.clone() })
            .mount(&server)
            .await;

        Mock::given(method("PATCH")).and(path("/files/file123")).respond_with(PreconditionOnceThenAccept).mount(&server).await;

        let config = DriveTransportConfig::new(secrets_path, token_path);
        let endpoints = DriveEndpoints { api_base: server.uri(), upload_base: server.uri(), token_endpoint: server.uri() };
        let transport = DriveTransport::open_with_endpoints(Role::Client, config, endpoints).await.unwrap();

        let result = transport.append_line("file123", "bmV3LWxpbmU=").await;
        assert!(result.is_ok(), "CAS append must converge after one 412 retry: {result:?}");
        assert_eq!(get_calls.load(Ordering::SeqCst), 2, "expected exactly one retry round (two files.get calls)");
    }

    /// `send()` drives the same CAS path end to end: encode, base64,
    /// append — and must not surface the transient 412 to its caller.
    #[tokio::test]
    async fn send_envelope_succeeds_despite_a_racing_writer() {
        let server = MockServer::start().await;
        let tmp = tempfile::tempdir().unwrap();
        let (secrets_path, token_path) = write_fixture_files(tmp.path());

        Mock::given(method("GET"))
            .and(path("/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "files": [{ "id": "file123", "name": DRIVE_LOG_C2S }] })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/files/file123"))
            .respond_with(SequencedGetFile { calls: Arc::new(AtomicUsize::new(0)) })
            .mount(&server)
            .await;
        Mock::given(method("PATCH")).and(path("/files/file123")).respond_with(PreconditionOnceThenAccept).mount(&server).await;

        let config = DriveTransportConfig::new(secrets_path, token_path);
        let endpoints = DriveEndpoints { api_base: server.uri(), upload_base: server.uri(), token_endpoint: server.uri() };
        let mut transport = DriveTransport::open_with_endpoints(Role::Client, config, endpoints).await.unwrap();

        let envelope = Envelope::new(Protocol::ClipsshV1, Kind::Cmd { text: "echo hi".to_string() }, "sess-1".to_string(), 0, Role::Client);
        transport.send(&envelope).await.unwrap();
    }
}
