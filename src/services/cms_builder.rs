//! CMS `SignedData` builder for detached CAdES signatures.
//!
//! The container is assembled from DER fragments. Signed attributes are
//! content-type, message-digest and signing-certificate-v2; the signer is
//! identified by issuer and serial number.

use crate::domain::asn1;
use crate::domain::constants::{
    ASN1_CONTEXT_0_CONSTRUCTED, ASN1_CONTEXT_1_CONSTRUCTED, ASN1_NULL, ASN1_SET_TAG, OID_CONTENT_TYPE,
    OID_DATA, OID_MESSAGE_DIGEST, OID_RSA_ENCRYPTION, OID_SHA256, OID_SIGNED_DATA,
    OID_SIGNING_CERTIFICATE_V2, OID_TIMESTAMP_TOKEN, SHA256_DIGEST_LEN,
};
use crate::domain::crypto::CertificateInfo;
use crate::infra::error::{SigningError, SigningResult};

/// `[0] EXPLICIT` wrapper of a `GeneralName` directoryName.
const GENERAL_NAME_DIRECTORY: u8 = 0xA4;

/// Encoded signed attributes.
#[derive(Debug, Clone)]
pub struct SignedAttributes {
    /// Universal SET encoding; this is what gets hashed and signed.
    set_der: Vec<u8>,
}

impl SignedAttributes {
    #[must_use]
    pub fn as_set_der(&self) -> &[u8] {
        &self.set_der
    }

    /// `[0] IMPLICIT` form embedded in `SignerInfo`.
    #[must_use]
    pub fn implicit_der(&self) -> Vec<u8> {
        let mut out = self.set_der.clone();
        out[0] = ASN1_CONTEXT_0_CONSTRUCTED;
        out
    }
}

fn attribute(oid: &[u8], value: &[u8]) -> Vec<u8> {
    asn1::sequence(&[&asn1::oid(oid), &asn1::set_of(vec![value.to_vec()])])
}

fn sha256_algorithm() -> Vec<u8> {
    asn1::sequence(&[&asn1::oid(OID_SHA256), ASN1_NULL])
}

/// Builder for one signer over detached content.
pub struct CmsBuilderService {
    signer: CertificateInfo,
    chain: Vec<CertificateInfo>,
}

impl CmsBuilderService {
    /// `chain` may or may not repeat the signer; duplicates are dropped.
    #[must_use]
    pub fn new(signer: CertificateInfo, chain: Vec<CertificateInfo>) -> Self {
        Self { signer, chain }
    }

    fn issuer_and_serial(&self) -> SigningResult<Vec<u8>> {
        Ok(asn1::sequence(&[
            &self.signer.issuer_der()?,
            &self.signer.serial_der()?,
        ]))
    }

    /// `SigningCertificateV2` with a SHA-256 `ESSCertIDv2` (default
    /// algorithm, so the identifier is omitted).
    fn signing_certificate_v2(&self) -> SigningResult<Vec<u8>> {
        let general_names = asn1::sequence(&[&asn1::tlv(
            GENERAL_NAME_DIRECTORY,
            &self.signer.issuer_der()?,
        )]);
        let issuer_serial = asn1::sequence(&[&general_names, &self.signer.serial_der()?]);
        let cert_id = asn1::sequence(&[&asn1::octet_string(&self.signer.sha256()), &issuer_serial]);
        Ok(asn1::sequence(&[&asn1::sequence(&[&cert_id])]))
    }

    /// Signed attributes over a SHA-256 document digest.
    pub fn signed_attributes(&self, message_digest: &[u8]) -> SigningResult<SignedAttributes> {
        if message_digest.len() != SHA256_DIGEST_LEN {
            return Err(SigningError::CmsError(format!(
                "message digest must be {SHA256_DIGEST_LEN} bytes, got {}",
                message_digest.len()
            )));
        }
        let attrs = vec![
            attribute(OID_CONTENT_TYPE, &asn1::oid(OID_DATA)),
            attribute(OID_MESSAGE_DIGEST, &asn1::octet_string(message_digest)),
            attribute(OID_SIGNING_CERTIFICATE_V2, &self.signing_certificate_v2()?),
        ];
        Ok(SignedAttributes {
            set_der: asn1::set_of(attrs),
        })
    }

    /// `id-aa-timeStampToken` attribute for the unsigned attributes.
    #[must_use]
    pub fn timestamp_attribute(token_der: &[u8]) -> Vec<u8> {
        attribute(OID_TIMESTAMP_TOKEN, token_der)
    }

    fn certificates(&self) -> Vec<u8> {
        let mut seen = std::collections::HashSet::new();
        let mut certs = Vec::new();
        for cert in std::iter::once(&self.signer).chain(self.chain.iter()) {
            if seen.insert(cert.thumbprint().to_string()) {
                certs.push(cert.der().to_vec());
            }
        }
        let mut set = asn1::set_of(certs);
        set[0] = ASN1_CONTEXT_0_CONSTRUCTED;
        set
    }

    /// Complete `ContentInfo`. `unsigned_attributes` are already encoded
    /// `Attribute` values.
    pub fn build(
        &self,
        signed_attributes: &SignedAttributes,
        signature: &[u8],
        unsigned_attributes: &[Vec<u8>],
    ) -> SigningResult<Vec<u8>> {
        if signature.is_empty() {
            return Err(SigningError::CmsError("empty signature value".into()));
        }
        let rsa = asn1::sequence(&[&asn1::oid(OID_RSA_ENCRYPTION), ASN1_NULL]);
        let mut signer_info = vec![
            asn1::small_integer(1),
            self.issuer_and_serial()?,
            sha256_algorithm(),
            signed_attributes.implicit_der(),
            rsa,
            asn1::octet_string(signature),
        ];
        if !unsigned_attributes.is_empty() {
            let mut unsigned = asn1::set_of(unsigned_attributes.to_vec());
            unsigned[0] = ASN1_CONTEXT_1_CONSTRUCTED;
            signer_info.push(unsigned);
        }
        let signer_info_refs: Vec<&[u8]> = signer_info.iter().map(Vec::as_slice).collect();
        let signer_info = asn1::sequence(&signer_info_refs);

        let signed_data = asn1::sequence(&[
            &asn1::small_integer(1),
            &asn1::set_of(vec![sha256_algorithm()]),
            &asn1::sequence(&[&asn1::oid(OID_DATA)]),
            &self.certificates(),
            &asn1::tlv(ASN1_SET_TAG, &signer_info),
        ]);
        let content_info = asn1::sequence(&[
            &asn1::oid(OID_SIGNED_DATA),
            &asn1::context(ASN1_CONTEXT_0_CONSTRUCTED, &signed_data),
        ]);
        log::debug!("CMS SignedData assembled: {} bytes", content_info.len());
        Ok(content_info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn implicit_form_only_changes_the_tag() {
        let attrs = SignedAttributes {
            set_der: asn1::set_of(vec![attribute(OID_CONTENT_TYPE, &asn1::oid(OID_DATA))]),
        };
        let implicit = attrs.implicit_der();
        assert_eq!(attrs.as_set_der()[0], ASN1_SET_TAG);
        assert_eq!(implicit[0], ASN1_CONTEXT_0_CONSTRUCTED);
        assert_eq!(&implicit[1..], &attrs.as_set_der()[1..]);
    }

    #[test]
    fn timestamp_attribute_wraps_token() {
        let attr = CmsBuilderService::timestamp_attribute(&[0x30, 0x00]);
        let fields = asn1::read_children(asn1::read_tlv(&attr).unwrap().content).unwrap();
        assert_eq!(fields[0].content, OID_TIMESTAMP_TOKEN);
        assert_eq!(fields[1].content, &[0x30, 0x00]);
    }
}
