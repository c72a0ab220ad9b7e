//! Error types for token signing operations.
//! Error taxonomy, result alias and retry classification.

use thiserror::Error;

/// Result type for signing operations
pub type SigningResult<T> = Result<T, SigningError>;

/// Coarse error classification inspected by the orchestrator to decide
/// between retry, abort and warn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    PinIncorrect,
    PinLocked,
    SessionInvalid,
    HardwareUnavailable,
    Validation,
    ChainDegraded,
    Assembly,
    Other,
}

/// Comprehensive error types for signing operations
#[derive(Error, Debug, miette::Diagnostic)]
pub enum SigningError {
    #[error("PIN incorrect. Check the PIN of your signature card.")]
    #[diagnostic(code(esign::pin_incorrect))]
    PinIncorrect,

    #[error("PIN locked. Contact your certificate provider to unblock the card.")]
    #[diagnostic(code(esign::pin_locked))]
    PinLocked,

    #[error("Token session invalid: {0}")]
    SessionInvalid(String),

    #[error("Hardware session unrecoverable after {attempts} attempts; remove and reinsert the token, then retry with a fresh login ({last_error})")]
    #[diagnostic(code(esign::session_unrecoverable))]
    SessionUnrecoverable { attempts: u32, last_error: String },

    #[error("Hardware unavailable: {0}")]
    HardwareUnavailable(String),

    #[error("Token error: {0}")]
    TokenError(String),

    #[error("Invalid slot index {requested}: {available} slot(s) with a token present")]
    InvalidSlot { requested: usize, available: usize },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Trust chain degraded: {0}")]
    ChainDegraded(String),

    #[error("Certificate error: {0}")]
    CertificateError(String),

    #[error("Invalid certificate format: {0}")]
    InvalidCertificate(String),

    #[error("Signature creation error: {0}")]
    SignatureError(String),

    #[error("Timestamp error: {0}")]
    TimestampError(String),

    #[error("Cryptographic error: {0}")]
    CryptographicError(String),

    #[error("XML error: {0}")]
    XmlError(String),

    #[error("PDF error: {0}")]
    PdfError(String),

    #[error("ASN.1 encoding/decoding error: {0}")]
    Asn1Error(String),

    #[error("CMS structure error: {0}")]
    CmsError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl SigningError {
    /// Classify this error for retry/abort/warn decisions.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            SigningError::PinIncorrect => ErrorKind::PinIncorrect,
            SigningError::PinLocked => ErrorKind::PinLocked,
            SigningError::SessionInvalid(_) => ErrorKind::SessionInvalid,
            SigningError::SessionUnrecoverable { .. } | SigningError::HardwareUnavailable(_) => {
                ErrorKind::HardwareUnavailable
            }
            SigningError::InvalidSlot { .. }
            | SigningError::InvalidInput(_)
            | SigningError::ConfigurationError(_) => ErrorKind::Validation,
            SigningError::ChainDegraded(_) => ErrorKind::ChainDegraded,
            SigningError::XmlError(_)
            | SigningError::PdfError(_)
            | SigningError::Asn1Error(_)
            | SigningError::CmsError(_) => ErrorKind::Assembly,
            _ => ErrorKind::Other,
        }
    }

    /// Only session-invalid errors are worth reopening the session for.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::SessionInvalid
    }

    /// PIN failures must never be retried; another attempt could lock the card.
    #[must_use]
    pub fn is_pin_failure(&self) -> bool {
        matches!(self.kind(), ErrorKind::PinIncorrect | ErrorKind::PinLocked)
    }
}

/// Driver messages that indicate the session or object handle went away.
#[must_use]
pub fn message_indicates_invalid_session(message: &str) -> bool {
    let m = message.to_ascii_lowercase();
    (m.contains("session") && (m.contains("invalid") || m.contains("closed")))
        || (m.contains("handle") && m.contains("invalid"))
        || m.contains("device removed")
        || m.contains("token not present")
        || m.contains("token not recognized")
}

impl From<cryptoki::error::Error> for SigningError {
    fn from(error: cryptoki::error::Error) -> Self {
        use cryptoki::error::{Error, RvError};
        match error {
            Error::Pkcs11(RvError::PinIncorrect, _) => SigningError::PinIncorrect,
            Error::Pkcs11(RvError::PinLocked, _) => SigningError::PinLocked,
            Error::Pkcs11(
                RvError::SessionHandleInvalid
                | RvError::SessionClosed
                | RvError::TokenNotRecognized
                | RvError::TokenNotPresent
                | RvError::DeviceRemoved,
                _,
            ) => SigningError::SessionInvalid(error.to_string()),
            Error::Pkcs11(RvError::DeviceError | RvError::DeviceMemory, _) => {
                SigningError::HardwareUnavailable(error.to_string())
            }
            other => {
                let message = other.to_string();
                if message_indicates_invalid_session(&message) {
                    SigningError::SessionInvalid(message)
                } else {
                    SigningError::TokenError(message)
                }
            }
        }
    }
}

impl From<der::Error> for SigningError {
    fn from(error: der::Error) -> Self {
        SigningError::Asn1Error(error.to_string())
    }
}

impl From<reqwest::Error> for SigningError {
    fn from(error: reqwest::Error) -> Self {
        SigningError::NetworkError(error.to_string())
    }
}

impl From<openssl::error::ErrorStack> for SigningError {
    fn from(error: openssl::error::ErrorStack) -> Self {
        SigningError::CryptographicError(error.to_string())
    }
}

impl From<roxmltree::Error> for SigningError {
    fn from(error: roxmltree::Error) -> Self {
        SigningError::XmlError(error.to_string())
    }
}

impl From<quick_xml::Error> for SigningError {
    fn from(error: quick_xml::Error) -> Self {
        SigningError::XmlError(error.to_string())
    }
}

impl From<lopdf::Error> for SigningError {
    fn from(error: lopdf::Error) -> Self {
        SigningError::PdfError(error.to_string())
    }
}

impl From<std::io::Error> for SigningError {
    fn from(error: std::io::Error) -> Self {
        SigningError::IoError(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = SigningError::TokenError("Test error".to_string());
        assert_eq!(error.to_string(), "Token error: Test error");

        let error = SigningError::InvalidSlot {
            requested: 5,
            available: 2,
        };
        assert!(error.to_string().contains("Invalid slot index 5"));
    }

    #[test]
    fn pin_errors_are_fatal_not_retryable() {
        for error in [SigningError::PinIncorrect, SigningError::PinLocked] {
            assert!(error.is_pin_failure());
            assert!(!error.is_retryable());
        }
        assert_ne!(
            SigningError::PinIncorrect.to_string(),
            SigningError::PinLocked.to_string()
        );
    }

    #[test]
    fn session_invalid_is_the_only_retryable_kind() {
        assert!(SigningError::SessionInvalid("gone".into()).is_retryable());
        assert!(!SigningError::HardwareUnavailable("x".into()).is_retryable());
        assert!(!SigningError::NetworkError("x".into()).is_retryable());
        assert_eq!(
            SigningError::SessionUnrecoverable {
                attempts: 3,
                last_error: "x".into()
            }
            .kind(),
            ErrorKind::HardwareUnavailable
        );
    }

    #[test]
    fn classifies_driver_messages() {
        assert!(message_indicates_invalid_session("Session handle invalid"));
        assert!(message_indicates_invalid_session("the session was closed"));
        assert!(message_indicates_invalid_session("object handle invalid"));
        assert!(!message_indicates_invalid_session("general failure"));
    }

    #[test]
    fn maps_cryptoki_return_values() {
        use cryptoki::context::Function;
        use cryptoki::error::{Error, RvError};

        let err: SigningError = Error::Pkcs11(RvError::PinLocked, Function::Login).into();
        assert_eq!(err.kind(), ErrorKind::PinLocked);
        let err: SigningError = Error::Pkcs11(RvError::UserAlreadyLoggedIn, Function::Login).into();
        assert_eq!(err.kind(), ErrorKind::Other);
        let err: SigningError =
            Error::Pkcs11(RvError::SessionHandleInvalid, Function::Sign).into();
        assert!(err.is_retryable());
    }
}
