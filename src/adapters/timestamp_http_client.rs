//! RFC 3161 transport: posts a `TimeStampReq` to the configured TSA and
//! hands back whatever `TimeStampResp` body comes back. Parsing and token
//! checks live in `services::timestamp`.
//!
//! Servers are tried in order (primary first); each gets
//! `retries_per_server` attempts before the next one is asked.

use crate::domain::constants::USER_AGENT;
use crate::domain::types::TimestampUrl;
use crate::infra::error::{SigningError, SigningResult};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::fmt;
use std::time::Duration;

const QUERY_MEDIA_TYPE: &str = "application/timestamp-query";
const REPLY_MEDIA_TYPE: &str = "application/timestamp-reply";

/// HTTP basic credentials for a TSA account.
#[derive(Clone)]
pub struct TsaCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for TsaCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TsaCredentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct TimestampHttpConfig {
    pub primary: TimestampUrl,
    pub fallbacks: Vec<TimestampUrl>,
    pub credentials: Option<TsaCredentials>,
    pub timeout: Duration,
    pub retries_per_server: usize,
    pub retry_delay: Duration,
}

impl TimestampHttpConfig {
    #[must_use]
    pub fn new(primary: TimestampUrl, timeout: Duration) -> Self {
        Self {
            primary,
            fallbacks: Vec::new(),
            credentials: None,
            timeout,
            retries_per_server: 1,
            retry_delay: Duration::from_millis(500),
        }
    }

    #[must_use]
    pub fn with_credentials(mut self, credentials: Option<TsaCredentials>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Primary then fallbacks, duplicates removed.
    pub fn endpoints(&self) -> impl Iterator<Item = &TimestampUrl> + '_ {
        let mut seen: Vec<&str> = Vec::new();
        std::iter::once(&self.primary)
            .chain(&self.fallbacks)
            .filter(move |url| {
                if seen.contains(&url.as_str()) {
                    false
                } else {
                    seen.push(url.as_str());
                    true
                }
            })
    }
}

pub struct TimestampHttpClient {
    cfg: TimestampHttpConfig,
    http: reqwest::Client,
}

impl TimestampHttpClient {
    /// # Errors
    ///
    /// Fails when the TLS backend cannot be initialised.
    pub fn new(cfg: TimestampHttpConfig) -> SigningResult<Self> {
        reqwest::Client::builder()
            .timeout(cfg.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map(|http| Self { cfg, http })
            .map_err(|e| SigningError::TimestampError(format!("cannot build TSA client: {e}")))
    }

    #[must_use]
    pub fn config(&self) -> &TimestampHttpConfig {
        &self.cfg
    }

    /// Exchange `query` (a DER `TimeStampReq`) for a response body.
    ///
    /// # Errors
    ///
    /// The error of the last attempt once every server has been exhausted.
    pub async fn post_request(&self, query: &[u8]) -> SigningResult<Vec<u8>> {
        let per_server = self.cfg.retries_per_server.max(1);
        let mut failure = None;
        for endpoint in self.cfg.endpoints() {
            for attempt in 1..=per_server {
                if attempt > 1 {
                    tokio::time::sleep(self.cfg.retry_delay).await;
                }
                log::debug!("TSA request to {endpoint} ({attempt}/{per_server})");
                match self.exchange(endpoint, query).await {
                    Ok(body) => {
                        log::info!("Timestamp response received from {endpoint}");
                        return Ok(body);
                    }
                    Err(e) => {
                        log::warn!("TSA {endpoint} attempt {attempt} failed: {e}");
                        failure = Some(e);
                    }
                }
            }
        }
        Err(failure.unwrap_or_else(|| SigningError::TimestampError("no TSA configured".into())))
    }

    async fn exchange(&self, endpoint: &TimestampUrl, query: &[u8]) -> SigningResult<Vec<u8>> {
        let mut builder = self
            .http
            .post(endpoint.as_str())
            .header(CONTENT_TYPE, QUERY_MEDIA_TYPE)
            .header(ACCEPT, REPLY_MEDIA_TYPE)
            .body(query.to_vec());
        if let Some(creds) = &self.cfg.credentials {
            builder = builder.basic_auth(&creds.username, Some(&creds.password));
        }
        let response = builder
            .send()
            .await
            .map_err(|e| SigningError::TimestampError(format!("{endpoint} unreachable: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(SigningError::TimestampError(format!(
                "{endpoint} rejected the TSA credentials"
            )));
        }
        if !status.is_success() {
            return Err(SigningError::TimestampError(format!("{endpoint} answered {status}")));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| SigningError::TimestampError(format!("reading {endpoint} reply: {e}")))?;
        if body.is_empty() {
            return Err(SigningError::TimestampError(format!("{endpoint} sent an empty reply")));
        }
        Ok(body.to_vec())
    }
}
