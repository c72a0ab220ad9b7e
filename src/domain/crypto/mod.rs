//! Foundational cryptographic domain types.
//!
//! Provides the parsed certificate view used across selection, chain
//! building and document signing, plus the SHA-256 DigestInfo encoding that
//! raw RSA PKCS#1 v1.5 token signing expects.

mod cert;
mod digest_info;

pub use cert::{dn_equals, decimal_from_be_bytes, CertificateInfo, KeyUsageBits};
pub use digest_info::{create_sha256_digest_info, sha256};
