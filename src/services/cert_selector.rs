//! Signing certificate selection.
//!
//! Token certificates are paired with private keys through `CKA_ID` and
//! ranked by how well they suit qualified electronic signatures.

use crate::adapters::backend::{CertificateObject, ObjectHandle, PrivateKeyObject, SessionHandle};
use crate::domain::constants::{OID_EXT_CERTIFICATE_POLICIES, OID_EXT_QC_STATEMENTS};
use crate::domain::crypto::CertificateInfo;
use crate::infra::error::{SigningError, SigningResult};
use crate::services::token_session::TokenSessionPool;
use std::time::SystemTime;

/// Certificate chosen for signing together with its key on the token.
#[derive(Debug, Clone)]
pub struct SigningCertificate {
    pub certificate: CertificateInfo,
    pub key: ObjectHandle,
    pub key_id_hex: String,
}

/// Suitability score at `at`. Higher is better.
#[must_use]
pub fn score_certificate_at(cert: &CertificateInfo, at: SystemTime) -> i32 {
    let mut score = if cert.is_time_valid_at(at) { 50 } else { -200 };
    match cert.key_usage() {
        Some(ku) => {
            if ku.digital_signature {
                score += 60;
            }
            if ku.non_repudiation {
                score += 80;
            }
            if ku.key_encipherment {
                score -= 5;
            }
        }
        None => score += 5,
    }
    if cert.has_extension(OID_EXT_QC_STATEMENTS) {
        score += 20;
    }
    if cert.has_extension(OID_EXT_CERTIFICATE_POLICIES) {
        score += 5;
    }
    score
}

#[must_use]
pub fn score_certificate(cert: &CertificateInfo) -> i32 {
    score_certificate_at(cert, SystemTime::now())
}

/// Best certificate by score; the first one wins ties.
#[must_use]
pub fn best_certificate(certs: &[CertificateInfo]) -> Option<&CertificateInfo> {
    let mut best: Option<(&CertificateInfo, i32)> = None;
    for cert in certs {
        let score = score_certificate(cert);
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((cert, score));
        }
    }
    best.map(|(cert, _)| cert)
}

/// Parse token certificate objects, skipping unreadable ones.
#[must_use]
pub fn parse_certificates(objects: &[CertificateObject]) -> Vec<(CertificateInfo, String)> {
    objects
        .iter()
        .filter_map(|obj| match CertificateInfo::from_der(&obj.der) {
            Ok(cert) => Some((cert, hex::encode_upper(&obj.id))),
            Err(e) => {
                log::warn!("Ignoring unreadable token certificate: {e}");
                None
            }
        })
        .collect()
}

/// Pick the certificate and key to sign with.
///
/// # Errors
///
/// `CertificateError` when the token holds no certificate or no RSA key.
pub fn select_from(
    certificates: &[CertificateObject],
    keys: &[PrivateKeyObject],
) -> SigningResult<SigningCertificate> {
    let parsed = parse_certificates(certificates);
    if parsed.is_empty() {
        return Err(SigningError::CertificateError(
            "no certificate found on the token".into(),
        ));
    }
    let Some(first_key) = keys.first() else {
        return Err(SigningError::CertificateError(
            "no private key found on the token".into(),
        ));
    };

    let single_key = keys.len() == 1;
    let mut best: Option<(usize, &PrivateKeyObject, i32)> = None;
    for (index, (cert, id_hex)) in parsed.iter().enumerate() {
        let key = if single_key {
            Some(first_key)
        } else {
            keys.iter().find(|k| hex::encode_upper(&k.id) == *id_hex)
        };
        let Some(key) = key else { continue };
        let score = score_certificate(cert);
        log::debug!("candidate {} scored {score}", cert.subject());
        if best.map_or(true, |(_, _, s)| score > s) {
            best = Some((index, key, score));
        }
    }

    let (index, key) = match best {
        Some((index, key, _)) => (index, key),
        None => {
            log::warn!("No certificate matches a private key by CKA_ID; using the first of each");
            (0, first_key)
        }
    };
    let (certificate, _) = parsed[index].clone();
    log::info!("Selected signing certificate {}", certificate.subject());
    Ok(SigningCertificate {
        certificate,
        key: key.handle,
        key_id_hex: hex::encode_upper(&key.id),
    })
}

/// Enumerate the session's certificates and keys and pick the signer.
pub fn select_signing_certificate(
    pool: &TokenSessionPool,
    session: SessionHandle,
) -> SigningResult<SigningCertificate> {
    let certificates = pool.list_certificates(session)?;
    let keys = pool.list_private_keys(session)?;
    log::debug!(
        "Token exposes {} certificate(s) and {} RSA key(s)",
        certificates.len(),
        keys.len()
    );
    select_from(&certificates, &keys)
}

/// All parseable certificates visible to the session.
pub fn token_certificates(
    pool: &TokenSessionPool,
    session: SessionHandle,
) -> SigningResult<Vec<CertificateInfo>> {
    let objects = pool.list_certificates(session)?;
    Ok(parse_certificates(&objects)
        .into_iter()
        .map(|(cert, _)| cert)
        .collect())
}

/// Certificate-only selection over a read-only session, no login.
pub fn select_best_certificate(
    pool: &TokenSessionPool,
    session: SessionHandle,
) -> SigningResult<CertificateInfo> {
    let certs = token_certificates(pool, session)?;
    best_certificate(&certs)
        .cloned()
        .ok_or_else(|| SigningError::CertificateError("no certificate found on the token".into()))
}
