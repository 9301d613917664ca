use std::time::Duration;

use anyhow::Context;
use serde::Serialize;
use surge_instruments::{OperationRecord, OperationRecorder};
use url::Url;

use crate::response::HttpResponse;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Limit on the whole exchange, from sending the request to reading the last body byte.
    pub timeout: Duration,
    /// Keep at most this many bytes of each response body. The rest of the body is discarded and
    /// the response is marked as truncated. Unlimited when not set.
    pub max_body_bytes: Option<usize>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_body_bytes: None,
        }
    }
}

/// An HTTP client that reports every request it makes to an [OperationRecorder].
///
/// Create one per virtual user, in `setup_user`, from the user's recorder so that requests are
/// attributed to the right iteration. Cloning is cheap and clones share the connection pool and
/// the recorder.
#[derive(Debug, Clone)]
pub struct HttpClientInstrumented {
    inner: reqwest::Client,
    base_url: Url,
    recorder: OperationRecorder,
    max_body_bytes: Option<usize>,
}

impl HttpClientInstrumented {
    pub fn new(base_url: &str, recorder: OperationRecorder) -> anyhow::Result<Self> {
        Self::with_config(base_url, recorder, HttpClientConfig::default())
    }

    pub fn with_config(
        base_url: &str,
        recorder: OperationRecorder,
        config: HttpClientConfig,
    ) -> anyhow::Result<Self> {
        let base_url =
            Url::parse(base_url).with_context(|| format!("Invalid target URL: {}", base_url))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("Target URL cannot be used as a base: {}", base_url);
        }

        let inner = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            inner,
            base_url,
            recorder,
            max_body_bytes: config.max_body_bytes,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn get(&self, operation_id: &str, path: &str) -> anyhow::Result<HttpResponse> {
        let url = self.url(path)?;
        Ok(self.send(operation_id, self.inner.get(url)).await)
    }

    /// POST `body` as JSON.
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        operation_id: &str,
        path: &str,
        body: &T,
    ) -> anyhow::Result<HttpResponse> {
        let url = self.url(path)?;
        Ok(self.send(operation_id, self.inner.post(url).json(body)).await)
    }

    fn url(&self, path: &str) -> anyhow::Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("Invalid path for {}: {}", self.base_url, path))
    }

    /// Transport errors are folded into the response so that checks still run against it and the
    /// request is counted as failed.
    async fn send(&self, operation_id: &str, request: reqwest::RequestBuilder) -> HttpResponse {
        let record = OperationRecord::new(operation_id);

        let response = match self.exchange(request).await {
            Ok(response) => response,
            Err(e) => {
                log::debug!("Request {} failed: {}", operation_id, e);
                HttpResponse::transport_error(e.to_string())
            }
        };

        let mut record = record.with_attr("status", response.status());
        record.finish(!response.is_success());
        self.recorder.record(record);

        response
    }

    async fn exchange(&self, request: reqwest::RequestBuilder) -> reqwest::Result<HttpResponse> {
        let mut response = request.send().await?;
        let status = response.status().as_u16();

        let mut body = Vec::new();
        let mut truncated = false;
        while let Some(chunk) = response.chunk().await? {
            match self.max_body_bytes {
                Some(max) if body.len() + chunk.len() > max => {
                    let keep = max - body.len();
                    body.extend_from_slice(&chunk[..keep]);
                    truncated = true;
                    break;
                }
                _ => body.extend_from_slice(&chunk),
            }
        }

        Ok(HttpResponse::new(status, body, truncated))
    }
}
