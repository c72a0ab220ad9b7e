//! Private-key oracle seam between document builders and the token.

use crate::adapters::backend::{ObjectHandle, SessionHandle};
use crate::domain::crypto::{create_sha256_digest_info, sha256};
use crate::infra::error::SigningResult;
use crate::services::token_session::TokenSessionPool;

/// Produces raw RSA PKCS#1 v1.5 signatures over a DigestInfo.
pub trait DigestSigner: Send + Sync {
    /// # Errors
    ///
    /// Returns error if the key holder refuses or the session went away.
    fn sign_digest_info(&self, digest_info: &[u8]) -> SigningResult<Vec<u8>>;

    /// Hash `data` with SHA-256, wrap it in a DigestInfo and sign.
    fn sign_sha256(&self, data: &[u8]) -> SigningResult<Vec<u8>> {
        let digest_info = create_sha256_digest_info(&sha256(data))?;
        self.sign_digest_info(&digest_info)
    }
}

/// Signs through a logged-in token session.
pub struct TokenSigner<'a> {
    pool: &'a TokenSessionPool,
    session: SessionHandle,
    key: ObjectHandle,
}

impl<'a> TokenSigner<'a> {
    #[must_use]
    pub fn new(pool: &'a TokenSessionPool, session: SessionHandle, key: ObjectHandle) -> Self {
        Self { pool, session, key }
    }
}

impl DigestSigner for TokenSigner<'_> {
    fn sign_digest_info(&self, digest_info: &[u8]) -> SigningResult<Vec<u8>> {
        self.pool.sign(self.session, self.key, digest_info)
    }
}
