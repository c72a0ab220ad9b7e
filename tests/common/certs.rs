//! Throwaway PKI for integration tests: a root, an intermediate and end
//! entity certificates with configurable key usage and validity.

use openssl::asn1::{Asn1Integer, Asn1Time};
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use esign_agent::domain::asn1;
use esign_agent::domain::constants::{ASN1_NULL, ASN1_UTC_TIME_TAG};
use openssl::nid::Nid;
use openssl::sign::Signer;
use openssl::x509::extension::{
    AuthorityKeyIdentifier, BasicConstraints, KeyUsage, SubjectKeyIdentifier,
};
use openssl::x509::{X509Builder, X509Extension, X509Name, X509NameBuilder, X509NameRef, X509};
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_SERIAL: AtomicU32 = AtomicU32::new(1000);

const DAY_SECS: i64 = 86_400;

/// sha256WithRSAEncryption
const OID_SHA256_WITH_RSA: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x01, 0x0B];

/// Where relying parties find the issuer and the revocation list.
#[derive(Debug, Clone, Copy, Default)]
pub struct Urls<'a> {
    pub ca_issuers: Option<&'a str>,
    pub crl: Option<&'a str>,
}

/// Key usage bits of a generated end entity certificate.
#[derive(Debug, Clone, Copy)]
pub enum Usage {
    /// digitalSignature + nonRepudiation
    Qualified,
    /// digitalSignature only
    Signing,
    /// keyEncipherment only
    Encryption,
}

/// Certificate plus the private key that belongs to it.
pub struct Issued {
    pub cert: X509,
    pub key: PKey<Private>,
}

impl Issued {
    pub fn der(&self) -> Vec<u8> {
        self.cert.to_der().unwrap()
    }
}

fn rsa_key() -> PKey<Private> {
    PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap()
}

fn name(common_name: &str, serial_number: Option<&str>) -> X509Name {
    let mut builder = X509NameBuilder::new().unwrap();
    builder.append_entry_by_text("C", "TR").unwrap();
    builder.append_entry_by_text("O", "Test Kamu SM").unwrap();
    if let Some(serial) = serial_number {
        builder.append_entry_by_text("serialNumber", serial).unwrap();
    }
    builder.append_entry_by_text("CN", common_name).unwrap();
    builder.build()
}

fn time(offset_days: i64) -> Asn1Time {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64;
    Asn1Time::from_unix(now + offset_days * DAY_SECS).unwrap()
}

fn builder(subject: &X509NameRef, issuer: &X509NameRef, key: &PKey<Private>, valid: (i64, i64)) -> X509Builder {
    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(NEXT_SERIAL.fetch_add(1, Ordering::Relaxed)).unwrap();
    builder
        .set_serial_number(&Asn1Integer::from_bn(&serial).unwrap())
        .unwrap();
    builder.set_subject_name(subject).unwrap();
    builder.set_issuer_name(issuer).unwrap();
    builder.set_pubkey(key).unwrap();
    builder.set_not_before(&time(valid.0)).unwrap();
    builder.set_not_after(&time(valid.1)).unwrap();
    builder
}

/// Self-signed root CA.
pub fn root_ca(common_name: &str) -> Issued {
    let key = rsa_key();
    let subject = name(common_name, None);
    let mut b = builder(&subject, &subject, &key, (-1, 3650));
    b.append_extension(BasicConstraints::new().critical().ca().build().unwrap())
        .unwrap();
    b.append_extension(KeyUsage::new().critical().key_cert_sign().crl_sign().build().unwrap())
        .unwrap();
    let ski = SubjectKeyIdentifier::new()
        .build(&b.x509v3_context(None, None))
        .unwrap();
    b.append_extension(ski).unwrap();
    b.sign(&key, MessageDigest::sha256()).unwrap();
    Issued {
        cert: b.build(),
        key,
    }
}

/// Intermediate CA issued by `issuer`.
pub fn intermediate_ca(issuer: &Issued, common_name: &str) -> Issued {
    intermediate_ca_with(issuer, common_name, Urls::default())
}

pub fn intermediate_ca_with(issuer: &Issued, common_name: &str, urls: Urls<'_>) -> Issued {
    let key = rsa_key();
    let subject = name(common_name, None);
    let mut b = builder(&subject, issuer.cert.subject_name(), &key, (-1, 1825));
    b.append_extension(BasicConstraints::new().critical().ca().pathlen(0).build().unwrap())
        .unwrap();
    b.append_extension(KeyUsage::new().critical().key_cert_sign().crl_sign().build().unwrap())
        .unwrap();
    add_key_identifiers(&mut b, &issuer.cert);
    add_urls(&mut b, &issuer.cert, urls);
    b.sign(&issuer.key, MessageDigest::sha256()).unwrap();
    Issued {
        cert: b.build(),
        key,
    }
}

/// End entity certificate. `valid` is (not-before, not-after) in days from now.
pub fn end_entity(
    issuer: &Issued,
    common_name: &str,
    national_id: Option<&str>,
    usage: Usage,
    valid: (i64, i64),
) -> Issued {
    end_entity_with(issuer, common_name, national_id, usage, valid, Urls::default())
}

pub fn end_entity_with(
    issuer: &Issued,
    common_name: &str,
    national_id: Option<&str>,
    usage: Usage,
    valid: (i64, i64),
    urls: Urls<'_>,
) -> Issued {
    let key = rsa_key();
    let serial = national_id.map(|id| format!("TR{id}"));
    let subject = name(common_name, serial.as_deref());
    let mut b = builder(&subject, issuer.cert.subject_name(), &key, valid);
    let mut ku = KeyUsage::new();
    ku.critical();
    match usage {
        Usage::Qualified => {
            ku.digital_signature().non_repudiation();
        }
        Usage::Signing => {
            ku.digital_signature();
        }
        Usage::Encryption => {
            ku.key_encipherment();
        }
    }
    b.append_extension(ku.build().unwrap()).unwrap();
    add_key_identifiers(&mut b, &issuer.cert);
    add_urls(&mut b, &issuer.cert, urls);
    b.sign(&issuer.key, MessageDigest::sha256()).unwrap();
    Issued {
        cert: b.build(),
        key,
    }
}

fn add_key_identifiers(b: &mut X509Builder, issuer: &X509) {
    let ski = SubjectKeyIdentifier::new()
        .build(&b.x509v3_context(Some(issuer), None))
        .unwrap();
    let aki = AuthorityKeyIdentifier::new()
        .keyid(true)
        .build(&b.x509v3_context(Some(issuer), None))
        .unwrap();
    b.append_extension(ski).unwrap();
    b.append_extension(aki).unwrap();
}

#[allow(deprecated)]
fn add_urls(b: &mut X509Builder, issuer: &X509, urls: Urls<'_>) {
    let mut extensions = Vec::new();
    {
        let ctx = b.x509v3_context(Some(issuer), None);
        if let Some(url) = urls.ca_issuers {
            let value = format!("caIssuers;URI:{url}");
            extensions.push(X509Extension::new_nid(None, Some(&ctx), Nid::INFO_ACCESS, &value).unwrap());
        }
        if let Some(url) = urls.crl {
            let value = format!("URI:{url}");
            extensions.push(
                X509Extension::new_nid(None, Some(&ctx), Nid::CRL_DISTRIBUTION_POINTS, &value).unwrap(),
            );
        }
    }
    for extension in extensions {
        b.append_extension(extension).unwrap();
    }
}

fn utc_time(offset_days: i64) -> Vec<u8> {
    let at = chrono::Utc::now() + chrono::Duration::days(offset_days);
    asn1::tlv(ASN1_UTC_TIME_TAG, at.format("%y%m%d%H%M%SZ").to_string().as_bytes())
}

/// Empty v2 CRL signed by `issuer`, DER encoded.
pub fn empty_crl(issuer: &Issued) -> Vec<u8> {
    let algorithm = asn1::sequence(&[&asn1::oid(OID_SHA256_WITH_RSA), ASN1_NULL]);
    let issuer_name = issuer.cert.subject_name().to_der().unwrap();
    let tbs = asn1::sequence(&[
        &asn1::small_integer(1),
        &algorithm,
        &issuer_name,
        &utc_time(-1),
        &utc_time(30),
    ]);
    let mut signer = Signer::new(MessageDigest::sha256(), &issuer.key).unwrap();
    signer.update(&tbs).unwrap();
    let mut bits = vec![0u8];
    bits.extend(signer.sign_to_vec().unwrap());
    asn1::sequence(&[&tbs, &algorithm, &asn1::tlv(0x03, &bits)])
}

/// Root, intermediate and a qualified signer below them.
pub struct Pki {
    pub root: Issued,
    pub intermediate: Issued,
    pub signer: Issued,
}

pub fn pki(signer_name: &str, national_id: Option<&str>) -> Pki {
    let root = root_ca("Test Root CA");
    let intermediate = intermediate_ca(&root, "Test Signing CA");
    let signer = end_entity(&intermediate, signer_name, national_id, Usage::Qualified, (-1, 365));
    Pki {
        root,
        intermediate,
        signer,
    }
}

pub const SIGNING_CA_URL: &str = "http://aia.test.kamusm/signing-ca.crt";
pub const SIGNING_CA_CRL_URL: &str = "http://crl.test.kamusm/signing-ca.crl";
pub const ROOT_CRL_URL: &str = "http://crl.test.kamusm/root.crl";

/// Like [`pki`], with AIA and CRL distribution points on the intermediate
/// and the signer.
pub fn pki_with_urls(signer_name: &str, national_id: Option<&str>) -> Pki {
    let root = root_ca("Test Root CA");
    let intermediate = intermediate_ca_with(
        &root,
        "Test Signing CA",
        Urls {
            ca_issuers: None,
            crl: Some(ROOT_CRL_URL),
        },
    );
    let signer = end_entity_with(
        &intermediate,
        signer_name,
        national_id,
        Usage::Qualified,
        (-1, 365),
        Urls {
            ca_issuers: Some(SIGNING_CA_URL),
            crl: Some(SIGNING_CA_CRL_URL),
        },
    );
    Pki {
        root,
        intermediate,
        signer,
    }
}
