//! HTTP + WebSocket implementation of [`SandboxProvider`].
//!
//! Control-plane calls (create/write/close) go over plain HTTPS via
//! `reqwest`; command execution is streamed over a WebSocket so stdout and
//! stderr can be collected incrementally rather than buffered entirely
//! provider-side before the response is sent.

use crate::{CommandOutput, ProviderError, SandboxId, SandboxProvider};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::Message;
use url::Url;

/// Client for a remote sandbox-provider API.
pub struct HttpSandboxProvider {
    http: reqwest::Client,
    http_base: Url,
    ws_base: Url,
    api_key: String,
}

#[derive(Serialize)]
struct CreateSandboxRequest {}

#[derive(Deserialize)]
struct CreateSandboxResponse {
    id: uuid::Uuid,
}

#[derive(Serialize)]
struct WriteFileRequest<'a> {
    path: &'a str,
    #[serde(with = "base64_bytes")]
    content_base64: &'a [u8],
}

#[derive(Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
enum ExecRequest<'a> {
    Shell { cmd: &'a str },
    Native { language: &'a str, code: &'a str },
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ExecFrame {
    Stdout { data: String },
    Stderr { data: String },
    Exit { code: i32 },
}

mod base64_bytes {
    use serde::Serializer;

    pub fn serialize<S: Serializer>(bytes: &&[u8], serializer: S) -> Result<S::Ok, S::Error> {
        use base64::Engine;
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }
}

impl HttpSandboxProvider {
    /// `http_base` is the REST control-plane origin (e.g.
    /// `https://sandboxes.example.com`); `ws_base` is the matching WebSocket
    /// origin (e.g. `wss://sandboxes.example.com`) used for exec streaming.
    pub fn new(http_base: Url, ws_base: Url, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            http_base,
            ws_base,
            api_key: api_key.into(),
        }
    }

    async fn exec(&self, id: SandboxId, req: ExecRequest<'_>) -> Result<CommandOutput, ProviderError> {
        let mut url = self
            .ws_base
            .join(&format!("sandboxes/{id}/exec"))
            .map_err(|e| ProviderError::Request(e.to_string()))?;
        url.query_pairs_mut().append_pair("api_key", &self.api_key);

        let (mut stream, _) = tokio_tungstenite::connect_async(url.as_str()).await.map_err(|e| {
            tracing::warn!(error = %e, %id, "sandbox provider exec websocket connect failed");
            ProviderError::Request(e.to_string())
        })?;

        let payload =
            serde_json::to_string(&req).map_err(|e| ProviderError::Request(e.to_string()))?;
        stream
            .send(Message::Text(payload))
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        let mut output = CommandOutput::default();
        loop {
            let msg = stream
                .next()
                .await
                .ok_or_else(|| {
                    tracing::warn!(%id, "sandbox provider exec stream ended without an exit frame");
                    ProviderError::Disconnected
                })?
                .map_err(|e| ProviderError::Request(e.to_string()))?;

            let text = match msg {
                Message::Text(t) => t,
                Message::Close(_) => {
                    tracing::warn!(%id, "sandbox provider closed the exec stream mid-run");
                    return Err(ProviderError::Disconnected);
                }
                _ => continue,
            };

            match serde_json::from_str::<ExecFrame>(&text) {
                Ok(ExecFrame::Stdout { data }) => output.stdout.push_str(&data),
                Ok(ExecFrame::Stderr { data }) => output.stderr.push_str(&data),
                Ok(ExecFrame::Exit { code }) => {
                    output.exit_code = code;
                    break;
                }
                Err(e) => return Err(ProviderError::Request(e.to_string())),
            }
        }

        Ok(output)
    }
}

#[async_trait]
impl SandboxProvider for HttpSandboxProvider {
    async fn create(&self) -> Result<SandboxId, ProviderError> {
        let url = self
            .http_base
            .join("sandboxes")
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&CreateSandboxRequest {})
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            tracing::warn!(%status, "sandbox provider refused to create a sandbox");
            return Err(ProviderError::Status(status.to_string()));
        }

        let body: CreateSandboxResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        Ok(SandboxId(body.id))
    }

    async fn write_file(&self, id: SandboxId, path: &str, content: &[u8]) -> Result<(), ProviderError> {
        let url = self
            .http_base
            .join(&format!("sandboxes/{id}/files"))
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        let resp = self
            .http
            .put(url)
            .bearer_auth(&self.api_key)
            .json(&WriteFileRequest {
                path,
                content_base64: content,
            })
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            tracing::warn!(%status, %id, %path, "sandbox provider rejected a file write");
            return Err(ProviderError::Status(status.to_string()));
        }
        Ok(())
    }

    async fn run_shell(&self, id: SandboxId, cmd: &str) -> Result<CommandOutput, ProviderError> {
        self.exec(id, ExecRequest::Shell { cmd }).await
    }

    async fn run_native_interpreter(
        &self,
        id: SandboxId,
        language: &str,
        code: &str,
    ) -> Result<CommandOutput, ProviderError> {
        self.exec(id, ExecRequest::Native { language, code }).await
    }

    async fn close(&self, id: SandboxId) -> Result<(), ProviderError> {
        let url = self
            .http_base
            .join(&format!("sandboxes/{id}"))
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        let resp = self
            .http
            .delete(url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            tracing::warn!(%status, %id, "sandbox provider rejected a close request");
            return Err(ProviderError::Status(status.to_string()));
        }
        Ok(())
    }
}
