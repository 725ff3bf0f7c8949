//! HTTP client for a remote mesh generation engine.
//!
//! Protocol: `POST {base}/generate` submits a request and returns a remote job id;
//! `GET {base}/status/{id}` is then polled until the remote job is `completed`
//! or `failed`. Progress from each poll is forwarded to the caller. The finished
//! model is downloaded from its `model_url`, resolved against the base URL when
//! relative.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};
use url::Url;

use cadmesh_shared::{AppConfig, CadMeshError, EngineError, Result};

use crate::{EngineOutput, EngineRequest, MeshEngine, ProgressSink};

/// User-Agent string for engine requests.
const USER_AGENT: &str = concat!("CadMesh/", env!("CARGO_PKG_VERSION"));

/// Per-request HTTP timeout; the overall deadline is enforced by the adapter.
const REQUEST_TIMEOUT_SECS: u64 = 600;

// ---------------------------------------------------------------------------
// Protocol types
// ---------------------------------------------------------------------------

/// Reply to `POST /generate`.
#[derive(Debug, Deserialize)]
struct SubmitReply {
    #[serde(default)]
    success: bool,
    job_id: Option<String>,
    error: Option<String>,
}

/// Reply to `GET /status/{id}`.
#[derive(Debug, Deserialize)]
struct StatusReply {
    #[serde(default)]
    success: bool,
    status: Option<String>,
    progress: Option<f64>,
    result: Option<EngineOutput>,
    error: Option<String>,
    partial_output: Option<String>,
}

/// Error body the engine sends with 4xx replies.
#[derive(Debug, Deserialize)]
struct ErrorReply {
    error: String,
}

// ---------------------------------------------------------------------------
// HttpMeshEngine
// ---------------------------------------------------------------------------

/// Mesh engine reached over HTTP.
pub struct HttpMeshEngine {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
    poll_interval: Duration,
}

impl HttpMeshEngine {
    pub fn new(base_url: Url, api_key: Option<String>, poll_interval: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| CadMeshError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            api_key,
            poll_interval,
        })
    }

    /// Build from the `[engine]` section, reading the API key from its env var.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Self::new(
            config.engine.base_url.clone(),
            config.engine_api_key(),
            Duration::from_millis(config.engine.poll_interval_ms),
        )
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url.as_str().trim_end_matches('/'))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn submit(&self, request: &EngineRequest) -> std::result::Result<String, EngineError> {
        let url = self.endpoint("generate");
        let response = self
            .authorize(self.client.post(&url).json(request))
            .send()
            .await
            .map_err(|e| EngineError::Transport(format!("{url}: {e}")))?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNPROCESSABLE_ENTITY {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorReply>(&body)
                .map(|r| r.error)
                .unwrap_or(body);
            return Err(EngineError::InvalidOptions(message));
        }
        if !status.is_success() {
            return Err(EngineError::Transport(format!("{url}: HTTP {status}")));
        }

        let reply: SubmitReply = response
            .json()
            .await
            .map_err(|e| EngineError::Protocol(format!("invalid submit reply: {e}")))?;

        if !reply.success {
            return Err(EngineError::InvalidOptions(
                reply
                    .error
                    .unwrap_or_else(|| "engine rejected the request".into()),
            ));
        }

        reply
            .job_id
            .ok_or_else(|| EngineError::Protocol("submit reply has no job_id".into()))
    }

    async fn poll(&self, remote_id: &str) -> std::result::Result<StatusReply, EngineError> {
        let url = self.endpoint(&format!("status/{remote_id}"));
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| EngineError::Transport(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::Transport(format!("{url}: HTTP {status}")));
        }

        response
            .json()
            .await
            .map_err(|e| EngineError::Protocol(format!("invalid status reply: {e}")))
    }

    fn model_url(&self, model_url: &str) -> std::result::Result<Url, EngineError> {
        match Url::parse(model_url) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => self
                .base_url
                .join(model_url)
                .map_err(|e| EngineError::Protocol(format!("bad model_url {model_url:?}: {e}"))),
            Err(e) => Err(EngineError::Protocol(format!("bad model_url {model_url:?}: {e}"))),
        }
    }

    /// Write the response body to `path` chunk by chunk, returning the byte count.
    async fn stream_to(
        &self,
        mut response: Response,
        url: &Url,
        path: &Path,
    ) -> std::result::Result<u64, EngineError> {
        let store_err = |e: std::io::Error| EngineError::Store(format!("{}: {e}", path.display()));

        let mut file = tokio::fs::File::create(path).await.map_err(store_err)?;
        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| EngineError::Transport(format!("{url}: {e}")))?
        {
            file.write_all(&chunk).await.map_err(store_err)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(store_err)?;
        Ok(written)
    }
}

/// Sibling path the download is written to before it is renamed into place.
fn partial_path(dest: &Path) -> PathBuf {
    let mut name = OsString::from(dest.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}

#[async_trait]
impl MeshEngine for HttpMeshEngine {
    #[instrument(skip_all, fields(base_url = %self.base_url, model_id = %request.model_id))]
    async fn generate(
        &self,
        request: &EngineRequest,
        progress: &dyn ProgressSink,
    ) -> std::result::Result<EngineOutput, EngineError> {
        let remote_id = self.submit(request).await?;
        info!(%remote_id, "engine accepted generation request");

        loop {
            let reply = self.poll(&remote_id).await?;
            if !reply.success {
                return Err(EngineError::Protocol(
                    reply
                        .error
                        .unwrap_or_else(|| format!("status lookup for {remote_id} failed")),
                ));
            }

            match reply.status.as_deref() {
                Some("completed") => {
                    return reply.result.ok_or_else(|| {
                        EngineError::Protocol("completed status without a result".into())
                    });
                }
                Some("failed") => {
                    return Err(EngineError::Generation {
                        message: reply
                            .error
                            .unwrap_or_else(|| "engine reported failure without detail".into()),
                        partial_output: reply.partial_output,
                    });
                }
                Some("pending") | Some("processing") => {
                    if let Some(p) = reply.progress {
                        debug!(%remote_id, progress = p, "engine progress");
                        progress.report(p.clamp(0.0, 100.0) as u8);
                    }
                }
                other => {
                    return Err(EngineError::Protocol(format!(
                        "unknown engine status {other:?}"
                    )));
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    #[instrument(skip_all, fields(model_url = %output.model_url))]
    async fn retrieve(
        &self,
        output: &EngineOutput,
        dest: &Path,
    ) -> std::result::Result<(), EngineError> {
        let url = self.model_url(&output.model_url)?;
        let response = self
            .authorize(self.client.get(url.clone()))
            .send()
            .await
            .map_err(|e| EngineError::Transport(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::Transport(format!("{url}: HTTP {status}")));
        }

        let partial = partial_path(dest);
        let bytes = match self.stream_to(response, &url, &partial).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(e);
            }
        };
        tokio::fs::rename(&partial, dest)
            .await
            .map_err(|e| EngineError::Store(format!("{}: {e}", dest.display())))?;

        info!(bytes, dest = %dest.display(), "model downloaded");
        Ok(())
    }

    fn name(&self) -> &str {
        "http"
    }
}
