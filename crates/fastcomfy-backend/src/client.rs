//! HTTP client for backend nodes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use fastcomfy_core::{PromptId, ResolvedJob, TenantToken};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::errors::BackendError;
use crate::node::BackendNode;

/// Maximum number of response-body bytes quoted in errors.
const ERROR_BODY_LIMIT: usize = 512;

#[derive(Serialize)]
struct SubmitRequest<'a> {
    prompt: &'a ResolvedJob,
    client_id: &'a TenantToken,
}

/// Body of a submission response.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct SubmitResponse {
    /// Correlation id.
    pub prompt_id: Option<PromptId>,
    /// Per-node validation errors.
    pub node_errors: Map<String, Value>,
    /// Queue position.
    pub number: Option<i64>,
}

#[derive(Deserialize)]
struct QueueResponse {
    exec_info: ExecInfo,
}

#[derive(Deserialize)]
struct ExecInfo {
    queue_remaining: u64,
}

/// Timeouts for backend requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientTimeouts {
    /// Job submission.
    pub submit: Duration,
    /// Queue-depth query.
    pub queue_query: Duration,
    /// Artifact download.
    pub download: Duration,
}

impl Default for ClientTimeouts {
    fn default() -> Self {
        Self {
            submit: Duration::from_secs(30),
            queue_query: Duration::from_secs(5),
            download: Duration::from_secs(120),
        }
    }
}

/// Shared HTTP client for all backend nodes.
#[derive(Clone, Debug)]
pub struct BackendClient {
    http: reqwest::Client,
    timeouts: ClientTimeouts,
}

impl Default for BackendClient {
    fn default() -> Self {
        Self::new(ClientTimeouts::default())
    }
}

impl BackendClient {
    /// Create a client with the given timeouts.
    pub fn new(timeouts: ClientTimeouts) -> Self {
        Self {
            http: reqwest::Client::new(),
            timeouts,
        }
    }

    /// Submit a resolved job. `client_id` routes its events to the tenant's
    /// sessions.
    ///
    /// A failure may still carry the correlation id if the backend assigned
    /// one; see [`BackendError::prompt_id`].
    pub async fn submit(
        &self,
        node: &BackendNode,
        job: &ResolvedJob,
        client_id: &TenantToken,
    ) -> Result<PromptId, BackendError> {
        let url = node.prompt_url();
        let resp = self
            .http
            .post(&url)
            .timeout(self.timeouts.submit)
            .json(&SubmitRequest {
                prompt: job,
                client_id,
            })
            .send()
            .await
            .map_err(|source| BackendError::Http {
                url: url.clone(),
                source,
            })?;

        let status = resp.status();
        let body = resp.text().await.map_err(|source| BackendError::Http {
            url: url.clone(),
            source,
        })?;
        let parsed = serde_json::from_str::<SubmitResponse>(&body);

        if !status.is_success() {
            return Err(BackendError::Status {
                url,
                status: status.as_u16(),
                prompt_id: parsed.ok().and_then(|r| r.prompt_id),
                body: truncate(&body),
            });
        }

        let parsed = parsed.map_err(|e| BackendError::MalformedResponse {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        let Some(prompt_id) = parsed.prompt_id.filter(|id| !id.is_empty()) else {
            return Err(BackendError::MalformedResponse {
                url,
                reason: "missing prompt_id".into(),
            });
        };
        if !parsed.node_errors.is_empty() {
            return Err(BackendError::NodeErrors {
                prompt_id,
                errors: truncate(&Value::Object(parsed.node_errors).to_string()),
            });
        }

        info!(node = %node, prompt_id = %prompt_id, number = ?parsed.number, "prompt submitted");
        Ok(prompt_id)
    }

    /// Current queue depth reported by `node`.
    pub async fn queue_depth(&self, node: &BackendNode) -> Result<u64, BackendError> {
        let url = node.prompt_url();
        let resp = self
            .http
            .get(&url)
            .timeout(self.timeouts.queue_query)
            .send()
            .await
            .map_err(|source| BackendError::Http {
                url: url.clone(),
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                url,
                status: status.as_u16(),
                body: truncate(&body),
                prompt_id: None,
            });
        }

        let parsed: QueueResponse =
            resp.json().await.map_err(|e| BackendError::MalformedResponse {
                url: url.clone(),
                reason: e.to_string(),
            })?;
        debug!(node = %node, depth = parsed.exec_info.queue_remaining, "queue depth");
        Ok(parsed.exec_info.queue_remaining)
    }

    /// Download `file_url` into `dir`, returning the local path.
    ///
    /// The local name is the `filename` query parameter, prefixed with the
    /// flattened `subfolder` when there is one, so outputs with the same file
    /// name in different subfolders stay apart. Without a `filename`
    /// parameter the last path segment is used.
    pub async fn download(&self, file_url: &str, dir: &Path) -> Result<PathBuf, BackendError> {
        let name = local_name(file_url).ok_or_else(|| BackendError::MalformedResponse {
            url: file_url.to_owned(),
            reason: "cannot derive a file name".into(),
        })?;
        let path = dir.join(name);

        let resp = self
            .http
            .get(file_url)
            .timeout(self.timeouts.download)
            .send()
            .await
            .map_err(|source| BackendError::Http {
                url: file_url.to_owned(),
                source,
            })?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                url: file_url.to_owned(),
                status: status.as_u16(),
                body: truncate(&body),
                prompt_id: None,
            });
        }

        let io_err = |source| BackendError::Io {
            path: path.display().to_string(),
            source,
        };
        tokio::fs::create_dir_all(dir).await.map_err(io_err)?;
        let mut file = tokio::fs::File::create(&path).await.map_err(io_err)?;
        let mut body = resp.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|source| BackendError::Http {
                url: file_url.to_owned(),
                source,
            })?;
            file.write_all(&chunk).await.map_err(io_err)?;
        }
        file.flush().await.map_err(io_err)?;
        debug!(url = file_url, path = %path.display(), "artifact downloaded");
        Ok(path)
    }
}

fn local_name(file_url: &str) -> Option<String> {
    let url = url::Url::parse(file_url).ok()?;
    let query = |key: &str| {
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    };
    let name = query("filename").or_else(|| {
        url.path_segments()
            .and_then(|mut segments| segments.next_back().map(str::to_owned))
    })?;
    // keep only the final component so a crafted name cannot escape `dir`
    let name = Path::new(&name).file_name()?.to_str()?.to_owned();
    if name.is_empty() {
        return None;
    }

    let subfolder = query("subfolder").unwrap_or_default();
    let parts: Vec<&str> = subfolder
        .split(['/', '\\'])
        .filter(|part| !matches!(*part, "" | "." | ".."))
        .collect();
    Some(if parts.is_empty() {
        name
    } else {
        format!("{}_{name}", parts.join("_"))
    })
}

fn truncate(body: &str) -> String {
    if body.len() <= ERROR_BODY_LIMIT {
        return body.to_owned();
    }
    let mut end = ERROR_BODY_LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}
