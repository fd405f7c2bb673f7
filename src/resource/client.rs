//! Content-store client.
//!
//! [`ContentClient`] is the seam the resource manager publishes through;
//! [`HyperdriveClient`] speaks the JSON RPC of a local hyperdrive daemon.

use std::path::PathBuf;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::config::CoreConfig;
use crate::error::ClientError;

/// Client identifier announced to peers.
pub const CLIENT_ID: &str = "hyperg";
/// Protocol version announced to peers.
pub const CLIENT_VERSION: f64 = 1.0;

/// Address of a content-store peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddress {
    pub host: String,
    pub port: u16,
}

impl PeerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl std::str::FromStr for PeerAddress {
    type Err = String;

    /// Parses `host:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("expected host:port, got '{s}'"))?;
        if host.is_empty() {
            return Err(format!("missing host in '{s}'"));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| format!("invalid port in '{s}': {e}"))?;
        Ok(Self::new(host, port))
    }
}

/// Connection options passed along with content-store commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientOptions {
    pub client_id: String,
    pub version: f64,
    #[serde(default)]
    pub options: Map<String, Value>,
}

impl ClientOptions {
    /// Peers listed in the options, skipping malformed entries.
    pub fn peers(&self) -> Vec<PeerAddress> {
        self.options
            .get("peers")
            .and_then(|peers| serde_json::from_value(peers.clone()).ok())
            .unwrap_or_default()
    }
}

/// A content-addressed store that publishes files under one hash.
#[async_trait]
pub trait ContentClient: Send + Sync {
    /// Publishes `files` and returns their content hash.
    ///
    /// # Arguments
    ///
    /// * `files` - Absolute path mapped to its relative name, in publish order
    /// * `id` - Identifier of the owning task
    /// * `options` - Connection options, if any
    /// * `correlation_id` - Tags every attempt of the same logical call
    async fn add(
        &self,
        files: &[(PathBuf, String)],
        id: &str,
        options: Option<&ClientOptions>,
        correlation_id: &str,
    ) -> Result<String, ClientError>;
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    hash: Option<String>,
    error: Option<String>,
}

/// JSON RPC client of a local hyperdrive daemon.
#[derive(Debug, Clone)]
pub struct HyperdriveClient {
    client: Client,
    url: String,
}

impl HyperdriveClient {
    /// Creates a client for the daemon at `base_url` (e.g. `http://127.0.0.1:3292`).
    pub fn new(base_url: impl Into<String>, timeout: std::time::Duration) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: format!("{}/api", base_url.into().trim_end_matches('/')),
        })
    }

    /// Creates a client for the daemon configured in `config`.
    pub fn from_config(config: &CoreConfig) -> Result<Self, ClientError> {
        Self::new(config.hyperdrive_url(), config.request_timeout)
    }

    /// Endpoint all commands are posted to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Builds connection options for `node_id` announcing `peers`.
    ///
    /// `extra` entries are merged into the options; `peers` wins on conflict.
    pub fn build_options(
        node_id: &str,
        peers: &[PeerAddress],
        extra: Map<String, Value>,
    ) -> ClientOptions {
        let mut options = extra;
        options.insert("node_id".to_string(), Value::String(node_id.to_string()));
        options.insert("peers".to_string(), json!(peers));

        ClientOptions {
            client_id: CLIENT_ID.to_string(),
            version: CLIENT_VERSION,
            options,
        }
    }

    async fn command(&self, body: &Value, correlation_id: &str) -> Result<UploadResponse, ClientError> {
        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("X-Correlation-Id", correlation_id)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let status = status.as_u16();
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());

            return Err(if status >= 500 {
                ClientError::Server { status, message }
            } else {
                ClientError::Rejected { status, message }
            });
        }

        response
            .json::<UploadResponse>()
            .await
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }
}

/// Request body of the `upload` command.
fn upload_body(files: &[(PathBuf, String)], id: &str, options: Option<&ClientOptions>) -> Value {
    let files: Map<String, Value> = files
        .iter()
        .map(|(path, name)| {
            (
                path.to_string_lossy().into_owned(),
                Value::String(name.clone()),
            )
        })
        .collect();

    let mut body = json!({
        "command": "upload",
        "id": id,
        "files": files,
    });
    if let Some(options) = options {
        body["client_options"] = json!(options);
    }
    body
}

#[async_trait]
impl ContentClient for HyperdriveClient {
    async fn add(
        &self,
        files: &[(PathBuf, String)],
        id: &str,
        options: Option<&ClientOptions>,
        correlation_id: &str,
    ) -> Result<String, ClientError> {
        let body = upload_body(files, id, options);
        let response = self.command(&body, correlation_id).await?;

        match (response.hash, response.error) {
            (Some(hash), _) if !hash.is_empty() => Ok(hash),
            (_, Some(error)) => Err(ClientError::Rejected {
                status: 200,
                message: error,
            }),
            _ => Err(ClientError::InvalidResponse(
                "upload response carries no hash".to_string(),
            )),
        }
    }
}
