//! Verification of PDF signatures already present in a document.
//!
//! Each signature field is checked for ByteRange coverage, CMS integrity
//! over the signed bytes (detached content, no chain check inside CMS) and
//! a path from the signer to a locally trusted root.

use crate::adapters::trust_store::{CertificateStore, StoreLocation, StoreName};
use crate::domain::asn1::der_object_len;
use crate::domain::crypto::CertificateInfo;
use crate::domain::pdf::{covers_whole_document, extract_signed_bytes};
use crate::infra::error::{SigningError, SigningResult};
use crate::services::trust_chain::verify_path;
use lopdf::{Dictionary, Document, Object, ObjectId};
use openssl::pkcs7::{Pkcs7, Pkcs7Flags};
use openssl::stack::Stack;
use openssl::x509::store::X509StoreBuilder;
use openssl::x509::X509;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

const NO_SIGNATURES: &str = "No signature fields found in the PDF.";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureCheck {
    pub field_name: String,
    pub signer_subject: String,
    pub signer_thumbprint: String,
    pub covers_whole_document: bool,
    pub integrity_valid: bool,
    pub trusted_chain: bool,
    pub chain_status: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PdfValidationReport {
    pub success: bool,
    pub message: String,
    pub signature_count: usize,
    pub cryptographically_valid_count: usize,
    pub trusted_chain_count: usize,
    pub signatures: Vec<SignatureCheck>,
}

impl PdfValidationReport {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            ..Self::default()
        }
    }

    fn summarize(&mut self) {
        self.signature_count = self.signatures.len();
        self.cryptographically_valid_count =
            self.signatures.iter().filter(|s| s.integrity_valid).count();
        self.trusted_chain_count = self.signatures.iter().filter(|s| s.trusted_chain).count();
        self.success = true;
        self.message = if self.signature_count == 0 {
            NO_SIGNATURES.to_string()
        } else if self.trusted_chain_count == self.signature_count {
            "All signatures chain to a trusted root.".to_string()
        } else if self.cryptographically_valid_count == self.signature_count {
            "Signatures are mathematically valid, but some chains are not trusted.".to_string()
        } else {
            "Some signatures could not be verified.".to_string()
        };
    }
}

/// Field value decoded from a PDF text string.
fn decode_text(bytes: &[u8]) -> String {
    if let Some(utf16) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = utf16
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    String::from_utf8_lossy(bytes).to_string()
}

struct SignatureEntry {
    field_name: String,
    byte_range: [i64; 4],
    contents: Vec<u8>,
}

fn signature_dictionary<'a>(doc: &'a Document, field: &'a Dictionary) -> Option<&'a Dictionary> {
    match field.get(b"V").ok()? {
        Object::Reference(id) => doc.get_dictionary(*id).ok(),
        Object::Dictionary(dict) => Some(dict),
        _ => None,
    }
}

fn parse_entry(field_name: String, sig: &Dictionary) -> SigningResult<SignatureEntry> {
    let values = sig.get(b"ByteRange")?.as_array()?;
    let mut byte_range = [0i64; 4];
    if values.len() != 4 {
        return Err(SigningError::PdfError(format!(
            "ByteRange of {field_name} has {} entries",
            values.len()
        )));
    }
    for (slot, value) in byte_range.iter_mut().zip(values) {
        *slot = value.as_i64()?;
    }
    let contents = match sig.get(b"Contents")? {
        Object::String(bytes, _) => bytes.clone(),
        _ => return Err(SigningError::PdfError(format!("{field_name} has no /Contents string"))),
    };
    Ok(SignatureEntry {
        field_name,
        byte_range,
        contents,
    })
}

/// Signature fields of the document, each signature dictionary once.
fn signature_entries(doc: &Document) -> Vec<SigningResult<SignatureEntry>> {
    let mut seen: HashSet<ObjectId> = HashSet::new();
    let mut entries = Vec::new();
    for object in doc.objects.values() {
        let Ok(field) = object.as_dict() else { continue };
        let is_sig_field = matches!(field.get(b"FT"), Ok(Object::Name(name)) if name == b"Sig");
        if !is_sig_field {
            continue;
        }
        if let Ok(Object::Reference(id)) = field.get(b"V") {
            if !seen.insert(*id) {
                continue;
            }
        }
        let Some(sig) = signature_dictionary(doc, field) else {
            continue;
        };
        let field_name = match field.get(b"T") {
            Ok(Object::String(bytes, _)) => decode_text(bytes),
            _ => String::new(),
        };
        entries.push(parse_entry(field_name, sig));
    }
    entries
}

pub struct PdfSignatureValidator {
    store: Arc<dyn CertificateStore>,
}

impl PdfSignatureValidator {
    #[must_use]
    pub fn new(store: Arc<dyn CertificateStore>) -> Self {
        Self { store }
    }

    /// Never fails: parse problems are reported in the returned summary.
    #[must_use]
    pub fn validate(&self, pdf: &[u8]) -> PdfValidationReport {
        if pdf.is_empty() {
            return PdfValidationReport::failed("PDF content is empty.");
        }
        let doc = match Document::load_mem(pdf) {
            Ok(doc) => doc,
            Err(e) => {
                log::warn!("PDF validation could not parse the document: {e}");
                return PdfValidationReport::failed(e.to_string());
            }
        };

        let mut report = PdfValidationReport::default();
        for entry in signature_entries(&doc) {
            match entry.and_then(|entry| self.check(pdf, entry)) {
                Ok(check) => report.signatures.push(check),
                Err(e) => {
                    log::warn!("Signature could not be evaluated: {e}");
                    report.signatures.push(SignatureCheck {
                        chain_status: e.to_string(),
                        ..SignatureCheck::default()
                    });
                }
            }
        }
        report.summarize();
        log::info!(
            "Validated {} signature(s): {} intact, {} trusted",
            report.signature_count,
            report.cryptographically_valid_count,
            report.trusted_chain_count
        );
        report
    }

    fn check(&self, pdf: &[u8], entry: SignatureEntry) -> SigningResult<SignatureCheck> {
        let mut check = SignatureCheck {
            field_name: entry.field_name,
            covers_whole_document: covers_whole_document(&entry.byte_range, pdf.len()),
            ..SignatureCheck::default()
        };
        let signed_bytes = extract_signed_bytes(pdf, &entry.byte_range)?;
        let cms_len = der_object_len(&entry.contents)?;
        let pkcs7 = Pkcs7::from_der(&entry.contents[..cms_len])?;

        let empty_certs = Stack::<X509>::new()?;
        let empty_store = X509StoreBuilder::new()?.build();
        check.integrity_valid = pkcs7
            .verify(
                &empty_certs,
                &empty_store,
                Some(&signed_bytes),
                None,
                Pkcs7Flags::NOVERIFY | Pkcs7Flags::BINARY,
            )
            .is_ok();

        let embedded: Vec<CertificateInfo> = pkcs7
            .signed()
            .and_then(|signed| signed.certificates())
            .map(|certs| {
                certs
                    .iter()
                    .filter_map(|c| c.to_der().ok())
                    .filter_map(|der| CertificateInfo::from_der(&der).ok())
                    .collect()
            })
            .unwrap_or_default();
        let signer = pkcs7
            .signers(&empty_certs, Pkcs7Flags::empty())
            .ok()
            .and_then(|signers| signers.iter().next().and_then(|x| x.to_der().ok()))
            .and_then(|der| CertificateInfo::from_der(&der).ok());

        let Some(signer) = signer else {
            check.chain_status = "Signer certificate could not be read.".to_string();
            return Ok(check);
        };
        check.signer_subject = signer.subject().to_string();
        check.signer_thumbprint = signer.thumbprint().to_string();

        let roots = self.store.trusted_roots();
        let mut intermediates: Vec<CertificateInfo> = embedded
            .into_iter()
            .filter(|c| c.thumbprint() != signer.thumbprint())
            .collect();
        for location in StoreLocation::ALL {
            intermediates.extend(
                self.store
                    .certificates(location, StoreName::CertificateAuthority)
                    .unwrap_or_default(),
            );
        }
        let verification = verify_path(&signer, &roots, &intermediates, false)?;
        check.trusted_chain = verification.valid;
        check.chain_status = verification.status;
        Ok(check)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::trust_store::FileTrustStore;
    use crate::domain::types::PdfSignOptions;
    use crate::services::pades::{PadesInputs, PdfSignatureBuilder};
    use crate::testutil::{sample_pdf, self_signed, KeySigner};
    use tempfile::TempDir;

    fn validator(dir: &TempDir) -> (PdfSignatureValidator, Arc<FileTrustStore>) {
        let store = Arc::new(FileTrustStore::new(dir.path()).with_elevated(false));
        (PdfSignatureValidator::new(store.clone()), store)
    }

    #[test]
    fn unsigned_pdf_reports_no_signatures() {
        let dir = TempDir::new().unwrap();
        let (validator, _) = validator(&dir);
        let report = validator.validate(&sample_pdf(1));
        assert!(report.success);
        assert_eq!(report.signature_count, 0);
        assert_eq!(report.message, NO_SIGNATURES);
    }

    #[test]
    fn garbage_is_a_failed_report() {
        let dir = TempDir::new().unwrap();
        let (validator, _) = validator(&dir);
        assert!(!validator.validate(b"not a pdf").success);
        assert!(!validator.validate(b"").success);
    }

    #[tokio::test]
    async fn signed_pdf_is_intact_and_trusted_once_root_installed() {
        let dir = TempDir::new().unwrap();
        let (validator, store) = validator(&dir);
        let (cert, key) = self_signed("Validation Signer");
        let signer = KeySigner::new(key);
        let chain = vec![cert.clone()];
        let outcome = PdfSignatureBuilder::default()
            .sign(
                &sample_pdf(1),
                &PdfSignOptions::default(),
                PadesInputs {
                    certificate: &cert,
                    chain: &chain,
                    signer: &signer,
                    timestamp: None,
                    revocation: None,
                },
            )
            .await
            .unwrap();

        let report = validator.validate(&outcome.bytes);
        assert_eq!(report.signature_count, 1);
        let check = &report.signatures[0];
        assert!(check.integrity_valid);
        assert!(check.covers_whole_document);
        assert!(!check.trusted_chain);
        assert_eq!(check.signer_thumbprint, cert.thumbprint());
        assert_eq!(check.field_name, outcome.field_name);

        store
            .add(StoreLocation::CurrentUser, StoreName::Root, &cert)
            .unwrap();
        let report = validator.validate(&outcome.bytes);
        assert!(report.signatures[0].trusted_chain);
        assert_eq!(report.signatures[0].chain_status, "OK");
        assert_eq!(report.trusted_chain_count, 1);
    }

    #[tokio::test]
    async fn appended_bytes_break_whole_document_coverage() {
        let dir = TempDir::new().unwrap();
        let (validator, _) = validator(&dir);
        let (cert, key) = self_signed("Coverage");
        let signer = KeySigner::new(key);
        let chain = vec![cert.clone()];
        let mut bytes = PdfSignatureBuilder::default()
            .sign(
                &sample_pdf(1),
                &PdfSignOptions::default(),
                PadesInputs {
                    certificate: &cert,
                    chain: &chain,
                    signer: &signer,
                    timestamp: None,
                    revocation: None,
                },
            )
            .await
            .unwrap()
            .bytes;
        bytes.extend_from_slice(b"\n% trailing comment\n");
        let report = validator.validate(&bytes);
        assert_eq!(report.signature_count, 1);
        assert!(!report.signatures[0].covers_whole_document);
        assert!(report.signatures[0].integrity_valid);
    }
}
