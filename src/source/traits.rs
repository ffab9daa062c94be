use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// A fully buffered network response.
#[derive(Debug, Clone)]
pub struct RemoteResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl RemoteResponse {
    /// Only HTTP 200 counts as a successful download.
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// GET `url`. Transport failures are `DownloadFailed`; every status,
    /// including errors, is returned to the caller to judge.
    async fn get(&self, url: &str) -> Result<RemoteResponse>;
}
