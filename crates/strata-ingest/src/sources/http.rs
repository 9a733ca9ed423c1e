//! JSON-over-HTTP client shared by every source
//!
//! Retries on 429/500/502/503/504 and on transport errors, with exponential
//! backoff `retry_delay * 2^(attempt-1)`. Any other failure status is final.

use reqwest::{header, Client, StatusCode, Url};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::HttpConfig;
use crate::error::{IngestError, Result};

/// Build `base` + path segments, percent-encoding each segment.
///
/// An empty trailing segment produces a trailing slash.
pub fn endpoint(base: &str, segments: &[&str]) -> Result<Url> {
    let mut url = Url::parse(base)
        .map_err(|e| IngestError::config(format!("invalid base URL '{}': {}", base, e)))?;
    url.path_segments_mut()
        .map_err(|_| IngestError::config(format!("base URL '{}' cannot carry a path", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

pub fn is_retryable(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    config: HttpConfig,
    source: &'static str,
}

impl HttpClient {
    pub fn new(source: &'static str, config: &HttpConfig) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            config: config.clone(),
            source,
        })
    }

    pub fn source(&self) -> &'static str {
        self.source
    }

    /// GET a JSON document, retrying transient failures
    pub async fn get_json(&self, url: Url, query: &[(&str, &str)]) -> Result<Value> {
        let attempts = self.config.max_retries.max(1);

        for attempt in 1..=attempts {
            let backoff = self.config.retry_delay() * 2u32.saturating_pow(attempt - 1);

            match self.client.get(url.clone()).query(query).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(source = self.source, url = %url, attempt, "Request succeeded");
                    return response.json::<Value>().await.map_err(|e| {
                        IngestError::source_unavailable(
                            self.source,
                            format!("invalid JSON from {}: {}", url, e),
                        )
                    });
                }
                Ok(response) => {
                    let status = response.status();
                    if is_retryable(status) && attempt < attempts {
                        warn!(
                            source = self.source,
                            status = status.as_u16(),
                            attempt,
                            max_attempts = attempts,
                            backoff_ms = backoff.as_millis() as u64,
                            "Retryable status, backing off"
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    return Err(IngestError::source_unavailable(
                        self.source,
                        format!(
                            "GET {} returned {} after {} attempt(s)",
                            url, status, attempt
                        ),
                    ));
                }
                Err(e) => {
                    if attempt < attempts {
                        warn!(
                            source = self.source,
                            error = %e,
                            attempt,
                            max_attempts = attempts,
                            backoff_ms = backoff.as_millis() as u64,
                            "Transport error, backing off"
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    return Err(IngestError::source_unavailable(
                        self.source,
                        format!("GET {} failed after {} attempt(s): {}", url, attempt, e),
                    ));
                }
            }
        }

        Err(IngestError::source_unavailable(
            self.source,
            format!("GET {} was never attempted", url),
        ))
    }
}
