//! Type-safe wrappers using new-type pattern
//!
//! Validated inputs (PIN, timestamp URL) and the request/artifact records
//! exchanged between the orchestrator and its callers.

use crate::infra::error::{SigningError, SigningResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Token user PIN. Never logged, never cached beyond a login call.
#[derive(Clone)]
pub struct TokenPin(String);

impl TokenPin {
    /// Create a new PIN after validation
    pub fn new(pin: impl AsRef<str>) -> SigningResult<Self> {
        let pin = pin.as_ref();
        if pin.trim().is_empty() {
            return Err(SigningError::InvalidInput("PIN is empty".to_string()));
        }
        if pin.len() > 64 {
            return Err(SigningError::InvalidInput(format!(
                "PIN too long: {} characters (maximum 64)",
                pin.len()
            )));
        }
        Ok(TokenPin(pin.to_string()))
    }

    /// Get the PIN as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for TokenPin {
    type Err = SigningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for TokenPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[PIN REDACTED]")
    }
}

impl fmt::Debug for TokenPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TokenPin").field(&"[REDACTED]").finish()
    }
}

/// Type-safe wrapper for RFC 3161 timestamp authority URLs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimestampUrl(String);

impl TimestampUrl {
    /// Create a new `TimestampUrl` after validation
    pub fn new(url: impl AsRef<str>) -> SigningResult<Self> {
        let url = url.as_ref().trim();
        Self::validate_url(url)?;
        Ok(TimestampUrl(url.to_string()))
    }

    /// Get the URL as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate_url(url: &str) -> SigningResult<()> {
        let Some(rest) = url
            .strip_prefix("https://")
            .or_else(|| url.strip_prefix("http://"))
        else {
            return Err(SigningError::ValidationError(format!(
                "Timestamp URL must start with http:// or https://, got: {url}"
            )));
        };

        if rest.is_empty() || rest.starts_with('/') {
            return Err(SigningError::ValidationError(format!(
                "Timestamp URL has no host: {url}"
            )));
        }

        for pattern in ["javascript:", "file:", "data:"] {
            if url.contains(pattern) {
                return Err(SigningError::ValidationError(format!(
                    "Timestamp URL contains suspicious pattern '{pattern}': {url}"
                )));
            }
        }

        Ok(())
    }
}

impl TryFrom<String> for TimestampUrl {
    type Error = SigningError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TimestampUrl> for String {
    fn from(value: TimestampUrl) -> Self {
        value.0
    }
}

impl FromStr for TimestampUrl {
    type Err = SigningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for TimestampUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable input of one signing operation.
#[derive(Debug, Clone)]
pub struct SignatureRequest {
    pub document: Vec<u8>,
    pub pin: TokenPin,
    pub slot_index: usize,
    pub force_fresh_login: bool,
}

impl SignatureRequest {
    pub fn new(document: Vec<u8>, pin: TokenPin, slot_index: usize) -> Self {
        Self {
            document,
            pin,
            slot_index,
            force_fresh_login: false,
        }
    }

    #[must_use]
    pub fn with_force_fresh_login(mut self, force: bool) -> Self {
        self.force_fresh_login = force;
        self
    }
}

/// PAdES baseline level actually produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PadesProfile {
    #[serde(rename = "B")]
    BaselineB,
    #[serde(rename = "T")]
    BaselineT,
    #[serde(rename = "LT")]
    BaselineLt,
}

impl PadesProfile {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            PadesProfile::BaselineB => "B",
            PadesProfile::BaselineT => "T",
            PadesProfile::BaselineLt => "LT",
        }
    }
}

impl fmt::Display for PadesProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PAdES-{}", self.as_str())
    }
}

/// Output of a signing operation.
#[derive(Debug, Clone)]
pub struct SignedArtifact {
    pub bytes: Vec<u8>,
    pub output_path: PathBuf,
    pub signer_name: String,
    pub timestamp_applied: bool,
    pub profile: Option<PadesProfile>,
}

/// PDF signing options supplied per request.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PdfSignOptions {
    pub page_number: Option<i64>,
    pub x: Option<f32>,
    pub y: Option<f32>,
    pub width: Option<f32>,
    pub height: Option<f32>,
    pub signature_field_name: Option<String>,
    pub signer_display_name: Option<String>,
    pub reason: Option<String>,
    pub location: Option<String>,
    pub file_name: Option<String>,
    pub margin: Option<f32>,
    pub enable_timestamp: Option<bool>,
    pub tsa_url: Option<String>,
    pub tsa_username: Option<String>,
    pub tsa_password: Option<String>,
    pub auto_setup_trust_chain: Option<bool>,
    pub try_install_trust_to_local_machine: Option<bool>,
    pub configure_viewer_integration: Option<bool>,
}

impl fmt::Debug for PdfSignOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PdfSignOptions")
            .field("page_number", &self.page_number)
            .field("x", &self.x)
            .field("y", &self.y)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("signature_field_name", &self.signature_field_name)
            .field("file_name", &self.file_name)
            .field("enable_timestamp", &self.enable_timestamp)
            .field("tsa_url", &self.tsa_url)
            .field("tsa_username", &self.tsa_username)
            .field("tsa_password", &self.tsa_password.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

/// Token as reported by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub label: String,
    pub serial: String,
}

/// Device listing entry exposed to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub slot_id: usize,
    pub label: String,
    pub serial_masked: String,
    pub subject_name: String,
    pub national_id: Option<String>,
}
