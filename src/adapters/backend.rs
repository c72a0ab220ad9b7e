//! Token backend trait.
//!
//! The signing engine never touches PKCS#11 types directly: sessions and
//! objects are referred to by opaque handles that the backend resolves in
//! its own arena. A handle is only meaningful to the backend that issued it
//! and dies with its session.

use crate::domain::types::{TokenInfo, TokenPin};
use crate::infra::error::SigningResult;

/// Opaque reference to an open session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(u64);

impl SessionHandle {
    #[must_use]
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Opaque reference to a token object within one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectHandle(u64);

impl ObjectHandle {
    #[must_use]
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Session access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    ReadOnly,
    ReadWrite,
}

/// Certificate object (`CKO_CERTIFICATE`).
#[derive(Debug, Clone)]
pub struct CertificateObject {
    /// `CKA_ID`
    pub id: Vec<u8>,
    /// `CKA_VALUE`, DER
    pub der: Vec<u8>,
}

/// RSA private key object (`CKO_PRIVATE_KEY`, `CKK_RSA`).
#[derive(Debug, Clone)]
pub struct PrivateKeyObject {
    pub handle: ObjectHandle,
    /// `CKA_ID`
    pub id: Vec<u8>,
}

/// Hardware token operations.
///
/// Implementations need not be reentrant: the session pool serializes every
/// call behind one process-wide gate.
pub trait TokenBackend: Send + Sync {
    /// Number of slots with a token present.
    ///
    /// # Errors
    ///
    /// Returns error if the driver cannot enumerate slots.
    fn slot_count(&self) -> SigningResult<usize>;

    /// Label and serial of the token in the given slot.
    ///
    /// # Errors
    ///
    /// Returns error if the slot is invalid or the token cannot be queried.
    fn token_info(&self, slot_index: usize) -> SigningResult<TokenInfo>;

    /// Open a session on the slot.
    ///
    /// # Errors
    ///
    /// Returns error if the slot is invalid or the session cannot be opened.
    fn open_session(&self, slot_index: usize, mode: SessionMode) -> SigningResult<SessionHandle>;

    /// Log in as the normal user. Already logged in is success.
    ///
    /// # Errors
    ///
    /// `PinIncorrect` / `PinLocked` for PIN failures, `SessionInvalid` when
    /// the session went away.
    fn login(&self, session: SessionHandle, pin: &TokenPin) -> SigningResult<()>;

    /// Log out (best effort) and close. Unknown handles are ignored.
    ///
    /// # Errors
    ///
    /// Returns error only when the driver rejects the close itself.
    fn close_session(&self, session: SessionHandle) -> SigningResult<()>;

    /// All certificate objects visible to the session.
    ///
    /// # Errors
    ///
    /// Returns error if object search or attribute reads fail.
    fn list_certificates(&self, session: SessionHandle) -> SigningResult<Vec<CertificateObject>>;

    /// All RSA private keys visible to the session (requires login).
    ///
    /// # Errors
    ///
    /// Returns error if object search or attribute reads fail.
    fn list_private_keys(&self, session: SessionHandle) -> SigningResult<Vec<PrivateKeyObject>>;

    /// Raw `CKM_RSA_PKCS` signature over `data` (a DigestInfo).
    ///
    /// # Errors
    ///
    /// Returns error if the key handle is stale or the token refuses.
    fn sign(&self, session: SessionHandle, key: ObjectHandle, data: &[u8]) -> SigningResult<Vec<u8>>;
}
