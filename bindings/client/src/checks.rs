use surge_instruments::Check;

use crate::response::HttpResponse;

/// Passes when the response has exactly this status.
#[derive(Debug, Clone)]
pub struct StatusIs {
    name: String,
    status: u16,
}

impl StatusIs {
    pub fn new(name: impl Into<String>, status: u16) -> Self {
        Self {
            name: name.into(),
            status,
        }
    }
}

impl Check<HttpResponse> for StatusIs {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, response: &HttpResponse) -> anyhow::Result<bool> {
        Ok(response.status() == self.status)
    }
}

/// Passes when the response body contains a substring.
///
/// Only the bytes the client kept are searched, see `max_body_bytes`.
#[derive(Debug, Clone)]
pub struct BodyContains {
    name: String,
    needle: String,
}

impl BodyContains {
    pub fn new(name: impl Into<String>, needle: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            needle: needle.into(),
        }
    }
}

impl Check<HttpResponse> for BodyContains {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, response: &HttpResponse) -> anyhow::Result<bool> {
        let needle = self.needle.as_bytes();
        if needle.is_empty() {
            return Ok(true);
        }

        let found = response.body().windows(needle.len()).any(|w| w == needle);
        if !found && response.is_truncated() {
            log::debug!(
                "[{}] searched a truncated body of {} bytes",
                self.name,
                response.body().len()
            );
        }
        Ok(found)
    }
}
