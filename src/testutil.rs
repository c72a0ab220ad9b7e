//! Fixtures shared by unit tests: throwaway RSA certificates, an in-memory
//! signer and small generated PDFs.

use crate::domain::crypto::CertificateInfo;
use crate::infra::error::SigningResult;
use crate::services::signer::DigestSigner;
use lopdf::{dictionary, Document, Object, Stream};
use openssl::asn1::{Asn1Integer, Asn1Time};
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::rsa::{Padding, Rsa};
use openssl::x509::extension::KeyUsage;
use openssl::x509::{X509Builder, X509NameBuilder};

/// Self-signed RSA-2048 certificate usable for signatures.
pub(crate) fn self_signed(common_name: &str) -> (CertificateInfo, PKey<Private>) {
    let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("C", "TR").unwrap();
    name.append_entry_by_text("CN", common_name).unwrap();
    let name = name.build();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    let serial = Asn1Integer::from_bn(&BigNum::from_u32(4242).unwrap()).unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
    builder.set_not_after(&Asn1Time::days_from_now(30).unwrap()).unwrap();
    builder
        .append_extension(
            KeyUsage::new()
                .critical()
                .digital_signature()
                .non_repudiation()
                .build()
                .unwrap(),
        )
        .unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();
    let der = builder.build().to_der().unwrap();
    (CertificateInfo::from_der(&der).unwrap(), key)
}

/// Raw PKCS#1 v1.5 signer over a DigestInfo, like `CKM_RSA_PKCS`.
pub(crate) struct KeySigner {
    key: PKey<Private>,
}

impl KeySigner {
    pub(crate) fn new(key: PKey<Private>) -> Self {
        Self { key }
    }
}

impl DigestSigner for KeySigner {
    fn sign_digest_info(&self, digest_info: &[u8]) -> SigningResult<Vec<u8>> {
        let rsa = self.key.rsa()?;
        let mut out = vec![0u8; rsa.size() as usize];
        let len = rsa.private_encrypt(digest_info, &mut out, Padding::PKCS1)?;
        out.truncate(len);
        Ok(out)
    }
}

/// PDF with `pages` empty A4 pages.
pub(crate) fn sample_pdf(pages: u32) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids = Vec::new();
    for _ in 0..pages {
        let content = doc.add_object(Stream::new(dictionary! {}, b"BT ET".to_vec()));
        let page = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(595),
                Object::Integer(842),
            ],
        });
        kids.push(Object::Reference(page));
    }
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => i64::from(pages),
        }),
    );
    let catalog = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog);
    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}
