//! Bounded-time HTTP fetching for AIA, OCSP and CRL sources.

use crate::domain::constants::{DEFAULT_NETWORK_TIMEOUT_SECS, USER_AGENT};
use crate::infra::error::{SigningError, SigningResult};
use async_trait::async_trait;
use std::time::Duration;

/// Network access used by chain repair and revocation collection.
///
/// A failing or timed-out source is reported as an error and skipped by the
/// caller; nothing here is fatal to signing.
#[async_trait]
pub trait NetworkFetcher: Send + Sync {
    /// GET `url` and return the body.
    ///
    /// # Errors
    ///
    /// Returns error on transport failure, timeout or non-success status.
    async fn get(&self, url: &str) -> SigningResult<Vec<u8>>;

    /// POST `body` with the given content type and return the response body.
    ///
    /// # Errors
    ///
    /// Returns error on transport failure, timeout or non-success status.
    async fn post(&self, url: &str, content_type: &str, body: &[u8]) -> SigningResult<Vec<u8>>;
}

/// `reqwest` implementation with a per-request timeout.
pub struct HttpFetcher {
    http: reqwest::Client,
}

impl HttpFetcher {
    /// # Errors
    ///
    /// Returns error if the TLS backend cannot be initialised.
    pub fn new(timeout: Duration) -> SigningResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| SigningError::NetworkError(format!("HTTP client build failed: {e}")))?;
        Ok(Self { http })
    }

    /// # Errors
    ///
    /// Returns error if the TLS backend cannot be initialised.
    pub fn with_default_timeout() -> SigningResult<Self> {
        Self::new(Duration::from_secs(DEFAULT_NETWORK_TIMEOUT_SECS))
    }

    async fn read(resp: reqwest::Response, url: &str) -> SigningResult<Vec<u8>> {
        if !resp.status().is_success() {
            return Err(SigningError::NetworkError(format!(
                "HTTP {} from {url}",
                resp.status()
            )));
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

#[async_trait]
impl NetworkFetcher for HttpFetcher {
    async fn get(&self, url: &str) -> SigningResult<Vec<u8>> {
        log::debug!("GET {url}");
        let resp = self.http.get(url).send().await?;
        Self::read(resp, url).await
    }

    async fn post(&self, url: &str, content_type: &str, body: &[u8]) -> SigningResult<Vec<u8>> {
        log::debug!("POST {url} ({} bytes)", body.len());
        let resp = self
            .http
            .post(url)
            .header("Content-Type", content_type)
            .body(body.to_vec())
            .send()
            .await?;
        Self::read(resp, url).await
    }
}

/// Fetcher that fails every request; used when network access is disabled.
pub struct OfflineFetcher;

#[async_trait]
impl NetworkFetcher for OfflineFetcher {
    async fn get(&self, url: &str) -> SigningResult<Vec<u8>> {
        Err(SigningError::NetworkError(format!("offline: {url}")))
    }

    async fn post(&self, url: &str, _content_type: &str, _body: &[u8]) -> SigningResult<Vec<u8>> {
        Err(SigningError::NetworkError(format!("offline: {url}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn offline_fetcher_always_fails() {
        let fetcher = OfflineFetcher;
        assert!(fetcher.get("http://example.invalid/ca.crt").await.is_err());
        assert!(fetcher
            .post("http://example.invalid/ocsp", "application/ocsp-request", b"x")
            .await
            .is_err());
    }

    #[test]
    fn http_fetcher_builds() {
        assert!(HttpFetcher::new(Duration::from_millis(500)).is_ok());
    }
}
