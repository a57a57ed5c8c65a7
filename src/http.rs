//! Blocking HTTP plumbing shared by the embedding and language-model
//! providers: lazy client construction and mapping of HTTP failures onto
//! [`ProviderError`].
//!
//! Providers run on blocking threads (`tokio::task::spawn_blocking`), so
//! the `reqwest::blocking` client is built on first use there rather than
//! on the async runtime.

use std::sync::OnceLock;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder};
use reqwest::StatusCode;

use docqa_core::ProviderError;

/// A `reqwest::blocking::Client` built on first use.
pub struct LazyClient {
    timeout: Duration,
    client: OnceLock<Client>,
}

impl LazyClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            client: OnceLock::new(),
        }
    }

    pub fn get(&self) -> Result<&Client, ProviderError> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| ProviderError::Unavailable(format!("failed to build HTTP client: {}", e)))?;
        Ok(self.client.get_or_init(|| client))
    }
}

/// Send `request` once and return the parsed JSON body of a 2xx response.
pub fn send_json(request: RequestBuilder, label: &str) -> Result<serde_json::Value, ProviderError> {
    let response = request.send().map_err(|e| transport_error(label, e))?;
    let status = response.status();
    if status.is_success() {
        return response
            .json::<serde_json::Value>()
            .map_err(|e| ProviderError::Malformed(format!("{} returned invalid JSON: {}", label, e)));
    }
    let body = response.text().unwrap_or_default();
    Err(status_error(label, status, &body))
}

/// Like [`send_json`], retrying transient failures up to `max_retries`
/// times with exponential backoff (1s, 2s, 4s, ... capped at 2^5 s).
pub fn send_json_with_retry(
    build: impl Fn() -> RequestBuilder,
    label: &str,
    max_retries: u32,
) -> Result<serde_json::Value, ProviderError> {
    let mut attempt: u32 = 0;
    loop {
        match send_json(build(), label) {
            Err(e) if e.is_transient() && attempt < max_retries => {
                attempt += 1;
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::warn!(%label, attempt, ?delay, error = %e, "transient provider error, retrying");
                std::thread::sleep(delay);
            }
            other => return other,
        }
    }
}

pub fn status_error(label: &str, status: StatusCode, body: &str) -> ProviderError {
    let msg = format!("{} error {}: {}", label, status, truncate(body, 500));
    match status.as_u16() {
        429 => ProviderError::RateLimited(msg),
        401 | 403 => ProviderError::Auth(msg),
        408 => ProviderError::Timeout(msg),
        s if s >= 500 => ProviderError::Unavailable(msg),
        _ => ProviderError::Rejected(msg),
    }
}

fn transport_error(label: &str, e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(format!("{}: {}", label, e))
    } else {
        ProviderError::Unavailable(format!("{} connection error: {}", label, e))
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((i, _)) => format!("{}...", &s[..i]),
        None => s.to_string(),
    }
}
