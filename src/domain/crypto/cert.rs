//! Parsed X.509 certificate view.
//!
//! Wraps the DER bytes together with an `x509-cert` decode and exposes the
//! handful of fields the selector, chain builder and signature builders need.

use crate::domain::constants::{
    OID_AD_CA_ISSUERS, OID_AD_OCSP, OID_EXT_AUTHORITY_INFO_ACCESS, OID_EXT_AUTHORITY_KEY_ID,
    OID_EXT_CRL_DISTRIBUTION_POINTS, OID_EXT_KEY_USAGE, OID_EXT_SUBJECT_KEY_ID,
};
use crate::infra::error::{SigningError, SigningResult};
use der::{Decode, Encode};
use openssl::bn::BigNum;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::SystemTime;
use x509_cert::ext::pkix::name::{DistributionPointName, GeneralName};
use x509_cert::ext::pkix::{
    AuthorityInfoAccessSyntax, AuthorityKeyIdentifier, CrlDistributionPoints, KeyUsage,
    SubjectKeyIdentifier,
};
use x509_cert::Certificate;

/// Key usage bits relevant for signing certificate selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyUsageBits {
    pub digital_signature: bool,
    pub non_repudiation: bool,
    pub key_encipherment: bool,
}

/// X.509 certificate with cached identity fields.
#[derive(Clone)]
pub struct CertificateInfo {
    der: Vec<u8>,
    cert: Certificate,
    thumbprint: String,
    subject: String,
    issuer: String,
}

impl CertificateInfo {
    /// Parse a DER certificate.
    pub fn from_der(der: &[u8]) -> SigningResult<Self> {
        let cert = Certificate::from_der(der)
            .map_err(|e| SigningError::InvalidCertificate(format!("DER decode failed: {e}")))?;
        let subject = cert.tbs_certificate.subject.to_string();
        let issuer = cert.tbs_certificate.issuer.to_string();
        let thumbprint = hex::encode_upper(Sha1::digest(der));
        Ok(Self {
            der: der.to_vec(),
            cert,
            thumbprint,
            subject,
            issuer,
        })
    }

    /// Parse DER, or PEM when the payload carries a PEM armor.
    pub fn from_der_or_pem(bytes: &[u8]) -> SigningResult<Self> {
        if bytes.starts_with(b"-----BEGIN") {
            let x509 = openssl::x509::X509::from_pem(bytes)?;
            return Self::from_der(&x509.to_der()?);
        }
        Self::from_der(bytes)
    }

    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Upper-case hex SHA-1 of the DER encoding.
    #[must_use]
    pub fn thumbprint(&self) -> &str {
        &self.thumbprint
    }

    #[must_use]
    pub fn sha256(&self) -> [u8; 32] {
        Sha256::digest(&self.der).into()
    }

    /// RFC 4514 subject string, most specific RDN first.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// DER encoding of the issuer Name.
    pub fn issuer_der(&self) -> SigningResult<Vec<u8>> {
        Ok(self.cert.tbs_certificate.issuer.to_der()?)
    }

    /// DER encoding of the serial number INTEGER.
    pub fn serial_der(&self) -> SigningResult<Vec<u8>> {
        Ok(self.cert.tbs_certificate.serial_number.to_der()?)
    }

    #[must_use]
    pub fn serial_hex(&self) -> String {
        hex::encode_upper(self.cert.tbs_certificate.serial_number.as_bytes())
    }

    /// Serial number as an unsigned decimal string.
    pub fn serial_decimal(&self) -> SigningResult<String> {
        decimal_from_be_bytes(self.cert.tbs_certificate.serial_number.as_bytes())
    }

    /// Subject common name if present.
    #[must_use]
    pub fn common_name(&self) -> Option<String> {
        let x509 = openssl::x509::X509::from_der(&self.der).ok()?;
        let entry = x509
            .subject_name()
            .entries_by_nid(openssl::nid::Nid::COMMONNAME)
            .next()?;
        let value = entry.data().as_utf8().ok()?.to_string();
        (!value.trim().is_empty()).then_some(value)
    }

    #[must_use]
    pub fn is_self_issued(&self) -> bool {
        dn_equals(&self.subject, &self.issuer)
    }

    #[must_use]
    pub fn is_time_valid_at(&self, at: SystemTime) -> bool {
        let validity = &self.cert.tbs_certificate.validity;
        validity.not_before.to_system_time() <= at && at <= validity.not_after.to_system_time()
    }

    #[must_use]
    pub fn is_time_valid(&self) -> bool {
        self.is_time_valid_at(SystemTime::now())
    }

    #[must_use]
    pub fn has_extension(&self, oid: &str) -> bool {
        self.extension_value(oid).is_some()
    }

    fn extension_value(&self, oid: &str) -> Option<&[u8]> {
        self.cert
            .tbs_certificate
            .extensions
            .as_ref()?
            .iter()
            .find(|ext| ext.extn_id.to_string() == oid)
            .map(|ext| ext.extn_value.as_bytes())
    }

    /// `None` when the certificate has no KeyUsage extension.
    #[must_use]
    pub fn key_usage(&self) -> Option<KeyUsageBits> {
        let raw = self.extension_value(OID_EXT_KEY_USAGE)?;
        match KeyUsage::from_der(raw) {
            Ok(ku) => Some(KeyUsageBits {
                digital_signature: ku.digital_signature(),
                non_repudiation: ku.non_repudiation(),
                key_encipherment: ku.key_encipherment(),
            }),
            Err(e) => {
                log::debug!("unreadable KeyUsage on {}: {e}", self.thumbprint);
                Some(KeyUsageBits::default())
            }
        }
    }

    #[must_use]
    pub fn subject_key_id(&self) -> Option<Vec<u8>> {
        let raw = self.extension_value(OID_EXT_SUBJECT_KEY_ID)?;
        SubjectKeyIdentifier::from_der(raw)
            .ok()
            .map(|ski| ski.0.as_bytes().to_vec())
    }

    #[must_use]
    pub fn authority_key_id(&self) -> Option<Vec<u8>> {
        let raw = self.extension_value(OID_EXT_AUTHORITY_KEY_ID)?;
        AuthorityKeyIdentifier::from_der(raw)
            .ok()?
            .key_identifier
            .map(|kid| kid.as_bytes().to_vec())
    }

    fn access_urls(&self, method: &str) -> Vec<String> {
        let Some(raw) = self.extension_value(OID_EXT_AUTHORITY_INFO_ACCESS) else {
            return Vec::new();
        };
        let Ok(aia) = AuthorityInfoAccessSyntax::from_der(raw) else {
            log::debug!("unreadable AIA extension on {}", self.thumbprint);
            return Vec::new();
        };
        aia.0
            .iter()
            .filter(|ad| ad.access_method.to_string() == method)
            .filter_map(|ad| match &ad.access_location {
                GeneralName::UniformResourceIdentifier(uri) => Some(uri.to_string()),
                _ => None,
            })
            .filter(|url| is_http_url(url))
            .collect()
    }

    /// http/https caIssuers URLs from the AIA extension.
    #[must_use]
    pub fn ca_issuer_urls(&self) -> Vec<String> {
        self.access_urls(OID_AD_CA_ISSUERS)
    }

    #[must_use]
    pub fn ocsp_urls(&self) -> Vec<String> {
        self.access_urls(OID_AD_OCSP)
    }

    #[must_use]
    pub fn crl_urls(&self) -> Vec<String> {
        let Some(raw) = self.extension_value(OID_EXT_CRL_DISTRIBUTION_POINTS) else {
            return Vec::new();
        };
        let Ok(points) = CrlDistributionPoints::from_der(raw) else {
            return Vec::new();
        };
        let mut urls = Vec::new();
        for point in &points.0 {
            if let Some(DistributionPointName::FullName(names)) = &point.distribution_point {
                for name in names {
                    if let GeneralName::UniformResourceIdentifier(uri) = name {
                        let url = uri.to_string();
                        if is_http_url(&url) {
                            urls.push(url);
                        }
                    }
                }
            }
        }
        urls
    }
}

impl fmt::Debug for CertificateInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateInfo")
            .field("subject", &self.subject)
            .field("thumbprint", &self.thumbprint)
            .field("len", &self.der.len())
            .finish()
    }
}

fn is_http_url(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Distinguished name comparison ignoring whitespace and ASCII case.
#[must_use]
pub fn dn_equals(a: &str, b: &str) -> bool {
    let normalize = |s: &str| -> String {
        s.chars()
            .filter(|c| !c.is_whitespace())
            .flat_map(char::to_lowercase)
            .collect()
    };
    normalize(a) == normalize(b)
}

/// Convert an unsigned big-endian integer to decimal.
pub fn decimal_from_be_bytes(bytes: &[u8]) -> SigningResult<String> {
    let value = BigNum::from_slice(bytes)?;
    Ok(value.to_dec_str()?.to_string())
}
