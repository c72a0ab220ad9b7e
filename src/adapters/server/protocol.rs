//! JSON messages of the local signing API.
//!
//! Field names are camelCase on the wire. Documents travel as base64,
//! optionally wrapped in a `data:` URL.

use crate::domain::types::{DeviceInfo, PdfSignOptions, SignedArtifact};
use crate::infra::error::{ErrorKind, SigningError, SigningResult};
use base64::Engine;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// RFC 3339, UTC.
    pub timestamp: String,
}

pub type DevicesResponse = Vec<DeviceInfo>;

/// Query of `GET /get-subject`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectQuery {
    pub slot_index: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectResponse {
    pub subject: String,
}

#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignXmlRequest {
    pub xml_content: String,
    pub slot_index: Option<usize>,
    #[serde(default)]
    pub pin: String,
    /// Store the payload base64 encoded instead of signing it.
    #[serde(default)]
    pub use_raw_xml: bool,
    #[serde(default)]
    pub force_fresh_login: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignXmlResponse {
    pub signed_xml: String,
    pub signed_file_content: String,
    pub file_path: String,
    pub status: String,
}

#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignPdfRequest {
    pub pdf_base64: String,
    pub slot_index: Option<usize>,
    #[serde(default)]
    pub pin: String,
    #[serde(default)]
    pub force_fresh_login: bool,
    /// Older clients send `addTimestamp`.
    #[serde(default)]
    pub add_timestamp: Option<bool>,
    #[serde(flatten)]
    pub options: PdfSignOptions,
}

impl SignPdfRequest {
    /// Options with `addTimestamp` folded into `enableTimestamp`.
    #[must_use]
    pub fn effective_options(&self) -> PdfSignOptions {
        let mut options = self.options.clone();
        if options.enable_timestamp.is_none() {
            options.enable_timestamp = self.add_timestamp;
        }
        options
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignPdfResponse {
    pub signed_pdf_base64: String,
    pub file_path: String,
    pub signer_name: String,
    pub timestamp_applied: bool,
    pub profile: Option<String>,
    pub status: String,
}

impl SignPdfResponse {
    #[must_use]
    pub fn from_artifact(artifact: &SignedArtifact) -> Self {
        Self {
            signed_pdf_base64: base64::engine::general_purpose::STANDARD.encode(&artifact.bytes),
            file_path: artifact.output_path.display().to_string(),
            signer_name: artifact.signer_name.clone(),
            timestamp_applied: artifact.timestamp_applied,
            profile: artifact.profile.map(|p| p.to_string()),
            status: "PAdES signature created".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustSetupRequest {
    pub slot_index: Option<usize>,
    #[serde(default = "default_apply_changes")]
    pub apply_changes: bool,
}

fn default_apply_changes() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatePdfRequest {
    pub pdf_base64: String,
}

/// Machine-readable error codes.
pub mod error_codes {
    pub const PIN_INCORRECT: &str = "PIN_INCORRECT";
    pub const PIN_LOCKED: &str = "PIN_LOCKED";
    /// Session kept failing; reseat the token.
    pub const SESSION_UNRECOVERABLE: &str = "SESSION_UNRECOVERABLE";
    pub const INVALID_INPUT: &str = "INVALID_INPUT";
    pub const SIGNING_FAILED: &str = "SIGNING_FAILED";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error_code: String,
    pub message: String,
}

impl ErrorResponse {
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_code: code.into(),
            message: message.into(),
        }
    }
}

impl From<&SigningError> for ErrorResponse {
    fn from(error: &SigningError) -> Self {
        let code = match error.kind() {
            ErrorKind::PinIncorrect => error_codes::PIN_INCORRECT,
            ErrorKind::PinLocked => error_codes::PIN_LOCKED,
            ErrorKind::SessionInvalid | ErrorKind::HardwareUnavailable => {
                error_codes::SESSION_UNRECOVERABLE
            }
            ErrorKind::Validation => error_codes::INVALID_INPUT,
            _ => error_codes::SIGNING_FAILED,
        };
        Self::new(code, error.to_string())
    }
}

/// Decode a base64 document, accepting a `data:...;base64,` prefix and
/// embedded whitespace.
pub fn decode_document(encoded: &str) -> SigningResult<Vec<u8>> {
    let mut payload = encoded.trim();
    if payload.len() >= 5 && payload[..5].eq_ignore_ascii_case("data:") {
        if let Some(comma) = payload.find(',') {
            payload = &payload[comma + 1..];
        }
    }
    let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if compact.is_empty() {
        return Err(SigningError::InvalidInput("document is empty".into()));
    }
    base64::engine::general_purpose::STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| SigningError::InvalidInput(format!("invalid base64 document: {e}")))
}

/// [`decode_document`] plus a `%PDF` magic check.
pub fn decode_pdf(encoded: &str) -> SigningResult<Vec<u8>> {
    let bytes = decode_document(encoded)?;
    if bytes.len() < 5 || !bytes.starts_with(b"%PDF") {
        return Err(SigningError::InvalidInput(
            "submitted content does not look like a PDF".into(),
        ));
    }
    Ok(bytes)
}
