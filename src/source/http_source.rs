use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::Client;
use tracing::{debug, warn};

use super::traits::{RemoteResponse, RemoteSource};
use crate::error::{EngineError, Result};

const CONNECT_TIMEOUT_SECS: u64 = 15;
const REQUEST_TIMEOUT_SECS: u64 = 600;

const USER_AGENT_VALUE: &str = concat!("module-loader-engine/", env!("CARGO_PKG_VERSION"));

/// [`RemoteSource`] backed by a shared reqwest client.
pub struct HttpSource {
    client: Client,
}

impl HttpSource {
    pub fn new() -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Default for HttpSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteSource for HttpSource {
    async fn get(&self, url: &str) -> Result<RemoteResponse> {
        let resp = self
            .client
            .get(url)
            .header(USER_AGENT, USER_AGENT_VALUE)
            .send()
            .await
            .map_err(|e| {
                warn!("http get failed url={} error={}", url, e);
                EngineError::download(url, e)
            })?;

        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = resp.bytes().await.map_err(|e| {
            warn!("http body read failed url={} error={}", url, e);
            EngineError::download(url, e)
        })?;

        debug!("http get url={} status={} bytes={}", url, status, body.len());

        Ok(RemoteResponse {
            status,
            content_type,
            body,
        })
    }
}
