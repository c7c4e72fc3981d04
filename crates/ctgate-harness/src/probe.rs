//! HTTP probe seam.

use std::time::Duration;

use async_trait::async_trait;
use ctgate_core::{HarnessError, HarnessResult};

/// Status and body of one HTTP probe. Lives for a single assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status: u16,
    pub body: String,
}

impl ProbeResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Issues GET requests against the container's published port.
#[async_trait]
pub trait HttpProbe: Send + Sync {
    /// GET `path`. Transport failures are errors; any HTTP status is a
    /// response.
    async fn get(&self, path: &str) -> HarnessResult<ProbeResponse>;
}

/// reqwest-backed probe.
pub struct ReqwestProbe {
    base_url: String,
    client: reqwest::Client,
}

impl ReqwestProbe {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> HarnessResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("ctgate/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| HarnessError::Probe(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl HttpProbe for ReqwestProbe {
    async fn get(&self, path: &str) -> HarnessResult<ProbeResponse> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| HarnessError::Probe(format!("GET {}: {}", url, e)))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| HarnessError::Probe(format!("GET {}: reading body: {}", url, e)))?;
        Ok(ProbeResponse { status, body })
    }
}
