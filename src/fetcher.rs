//! Transport seam for fetching payloads
//!
//! The pipeline only sees the [`Fetcher`] trait, so tests and hosts can inject their
//! own transport. [`HttpFetcher`] is the production implementation over reqwest.

use crate::config::HttpConfig;
use crate::error::{Error, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

/// Callback invoked as bytes arrive: `(received, expected_total)`
pub type OnProgress<'a> = &'a (dyn Fn(u64, Option<u64>) + Send + Sync);

/// Something that can retrieve the bytes behind a locator
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch the whole payload at `locator`
    ///
    /// Implementations report transfer progress through `on_progress` and return
    /// errors that classify correctly through [`Error::class`].
    async fn fetch(&self, locator: &Url, on_progress: OnProgress<'_>) -> Result<Vec<u8>>;
}

/// Production [`Fetcher`] over HTTP(S)
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Build a client with the configured user agent, headers and timeout
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                Error::config(
                    "http.headers",
                    format!("invalid header name '{}': {}", name, e),
                )
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                Error::config(
                    "http.headers",
                    format!("invalid value for header '{}': {}", name.as_str(), e),
                )
            })?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Wrap an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, locator: &Url, on_progress: OnProgress<'_>) -> Result<Vec<u8>> {
        let mut response = self.client.get(locator.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                url: locator.to_string(),
            });
        }

        // Soft 404 pages come back as 200 with an HTML body
        if let Some(content_type) = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            && content_type.trim_start().starts_with("text/html")
        {
            return Err(Error::MalformedResponse(format!(
                "{} returned {} instead of an image",
                locator, content_type
            )));
        }

        let expected = response.content_length();
        let mut body = Vec::with_capacity(expected.unwrap_or(0).min(16 * 1024 * 1024) as usize);
        on_progress(0, expected);

        while let Some(chunk) = response.chunk().await? {
            body.extend_from_slice(&chunk);
            on_progress(body.len() as u64, expected);
        }

        if let Some(expected) = expected
            && body.len() as u64 != expected
        {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "body ended after {} of {} bytes from {}",
                    body.len(),
                    expected,
                    locator
                ),
            )));
        }

        if body.is_empty() {
            return Err(Error::MalformedResponse(format!(
                "{} returned an empty body",
                locator
            )));
        }

        tracing::trace!(url = %locator, bytes = body.len(), "Fetched payload");
        Ok(body)
    }
}
