use std::borrow::Cow;

use anyhow::Context;
use serde::de::DeserializeOwned;

/// A response read by [crate::prelude::HttpClientInstrumented].
///
/// A request that failed before a response was received, such as a refused connection or a
/// timeout, is still represented as a response. It has status 0 and carries the transport error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    status: u16,
    body: Vec<u8>,
    truncated: bool,
    error: Option<String>,
}

impl HttpResponse {
    pub fn new(status: u16, body: Vec<u8>, truncated: bool) -> Self {
        Self {
            status,
            body,
            truncated,
            error: None,
        }
    }

    pub(crate) fn transport_error(error: String) -> Self {
        Self {
            status: 0,
            body: Vec::new(),
            truncated: false,
            error: Some(error),
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn json<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        serde_json::from_slice(&self.body).context("Response body is not the expected JSON")
    }

    /// The body was cut at the client's `max_body_bytes`.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Statuses 200 to 399 are successful. Anything else, including a transport error, is a
    /// failed request.
    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status)
    }
}
