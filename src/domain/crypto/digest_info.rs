//! SHA-256 DigestInfo construction for `CKM_RSA_PKCS` signing.

use crate::domain::constants::SHA256_DIGEST_LEN;
use crate::infra::error::{SigningError, SigningResult};
use der::asn1::{AnyRef, ObjectIdentifier, OctetString};
use der::{Encode, Sequence};
use sha2::{Digest, Sha256};
use spki::AlgorithmIdentifier;

#[derive(Sequence)]
struct DigestInfo<'a> {
    digest_algorithm: AlgorithmIdentifier<AnyRef<'a>>,
    digest: OctetString,
}

#[must_use]
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// DigestInfo ::= SEQUENCE { sha256 WITH NULL parameters, OCTET STRING hash }.
pub fn create_sha256_digest_info(hash: &[u8]) -> SigningResult<Vec<u8>> {
    if hash.len() != SHA256_DIGEST_LEN {
        return Err(SigningError::CryptographicError(format!(
            "SHA-256 digest must be {SHA256_DIGEST_LEN} bytes, got {}",
            hash.len()
        )));
    }
    let oid = ObjectIdentifier::new("2.16.840.1.101.3.4.2.1")
        .map_err(|e| SigningError::CryptographicError(format!("Invalid SHA-256 OID: {e}")))?;
    let info = DigestInfo {
        digest_algorithm: AlgorithmIdentifier {
            oid,
            parameters: Some(AnyRef::NULL),
        },
        digest: OctetString::new(hash)?,
    };
    Ok(info.to_der()?)
}
