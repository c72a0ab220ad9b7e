//! Revocation material for long-term validation (OCSP responses and CRLs).

use crate::adapters::net::NetworkFetcher;
use crate::domain::crypto::CertificateInfo;
use crate::infra::error::{SigningError, SigningResult};
use crate::services::trust_chain::issuer_matches;
use openssl::hash::MessageDigest;
use openssl::ocsp::{OcspCertId, OcspRequest, OcspResponse, OcspResponseStatus};
use openssl::x509::{X509Crl, X509};
use std::sync::Arc;

/// DER blobs destined for the document security store.
#[derive(Debug, Clone, Default)]
pub struct RevocationData {
    pub certs: Vec<Vec<u8>>,
    /// Complete `OCSPResponse` encodings.
    pub ocsps: Vec<Vec<u8>>,
    pub crls: Vec<Vec<u8>>,
}

impl RevocationData {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ocsps.is_empty() && self.crls.is_empty()
    }
}

pub struct RevocationCollector {
    fetcher: Arc<dyn NetworkFetcher>,
}

fn ocsp_request(cert: &CertificateInfo, issuer: &CertificateInfo) -> SigningResult<Vec<u8>> {
    let subject = X509::from_der(cert.der())?;
    let issuer = X509::from_der(issuer.der())?;
    let id = OcspCertId::from_cert(MessageDigest::sha1(), &subject, &issuer)?;
    let mut request = OcspRequest::new()?;
    request.add_id(id)?;
    Ok(request.to_der()?)
}

fn check_ocsp_response(der: &[u8]) -> SigningResult<()> {
    let response = OcspResponse::from_der(der)?;
    if response.status() != OcspResponseStatus::SUCCESSFUL {
        return Err(SigningError::NetworkError(format!(
            "OCSP responder returned status {:?}",
            response.status()
        )));
    }
    Ok(())
}

fn normalize_crl(payload: &[u8]) -> SigningResult<Vec<u8>> {
    let crl = X509Crl::from_der(payload).or_else(|_| X509Crl::from_pem(payload))?;
    Ok(crl.to_der()?)
}

impl RevocationCollector {
    #[must_use]
    pub fn new(fetcher: Arc<dyn NetworkFetcher>) -> Self {
        Self { fetcher }
    }

    async fn fetch_ocsp(&self, cert: &CertificateInfo, issuer: &CertificateInfo) -> Option<Vec<u8>> {
        let request = match ocsp_request(cert, issuer) {
            Ok(r) => r,
            Err(e) => {
                log::debug!("OCSP request for {} not built: {e}", cert.subject());
                return None;
            }
        };
        for url in cert.ocsp_urls() {
            match self
                .fetcher
                .post(&url, "application/ocsp-request", &request)
                .await
                .and_then(|body| check_ocsp_response(&body).map(|()| body))
            {
                Ok(body) => return Some(body),
                Err(e) => log::warn!("OCSP {url} failed: {e}"),
            }
        }
        None
    }

    async fn fetch_crl(&self, cert: &CertificateInfo) -> Option<Vec<u8>> {
        for url in cert.crl_urls() {
            match self.fetcher.get(&url).await.and_then(|body| normalize_crl(&body)) {
                Ok(crl) => return Some(crl),
                Err(e) => log::warn!("CRL {url} failed: {e}"),
            }
        }
        None
    }

    /// Revocation evidence for every non-root certificate of `chain`.
    ///
    /// # Errors
    ///
    /// Fails when any certificate lacks an issuer in the chain or neither
    /// OCSP nor CRL could be obtained for it.
    pub async fn collect(&self, chain: &[CertificateInfo]) -> SigningResult<RevocationData> {
        let mut data = RevocationData {
            certs: chain.iter().map(|c| c.der().to_vec()).collect(),
            ..Default::default()
        };
        for cert in chain.iter().filter(|c| !c.is_self_issued()) {
            let issuer = chain
                .iter()
                .find(|c| c.thumbprint() != cert.thumbprint() && issuer_matches(cert, c))
                .ok_or_else(|| {
                    SigningError::ChainDegraded(format!("issuer of {} unavailable", cert.subject()))
                })?;
            if let Some(ocsp) = self.fetch_ocsp(cert, issuer).await {
                data.ocsps.push(ocsp);
                continue;
            }
            if let Some(crl) = self.fetch_crl(cert).await {
                if !data.crls.contains(&crl) {
                    data.crls.push(crl);
                }
                continue;
            }
            return Err(SigningError::ChainDegraded(format!(
                "no revocation data for {}",
                cert.subject()
            )));
        }
        log::info!(
            "Collected {} OCSP response(s) and {} CRL(s)",
            data.ocsps.len(),
            data.crls.len()
        );
        Ok(data)
    }
}
