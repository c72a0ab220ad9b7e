//! XAdES-BES enveloping signature over an XML payload.
//!
//! The payload travels base64 encoded inside a `ds:Object`; the signature
//! covers that object and the `xades:SignedProperties`. The document is
//! rendered three times with the same layout: once to digest the signed
//! properties and the data object, once to digest `SignedInfo`, and once
//! with the signature value in place. Neither digested fragment depends on
//! the values filled in later, so every pass canonicalizes identically.

use crate::domain::constants::{
    BASE64_ENCODING_URI, C14N_EXCLUSIVE_URI, C14N_INCLUSIVE_URI, RSA_SHA256_URI,
    SHA256_DIGEST_URI, SIGNED_PROPERTIES_TYPE_URI, XADES_NS, XMLDSIG_NS, XML_PAYLOAD_MIME_TYPE,
};
use crate::domain::crypto::{sha256, CertificateInfo};
use crate::domain::xml::{canonicalize_element_by_id, canonicalize_node, find_element, C14nMode};
use crate::infra::error::{SigningError, SigningResult};
use crate::services::signer::DigestSigner;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Local, Timelike};
use openssl::hash::MessageDigest;
use openssl::sign::Verifier;
use openssl::x509::X509;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use roxmltree::Document;

const ID_HEX_LEN: usize = 24;

/// Element identifiers of one signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XadesIds {
    pub signature: String,
    pub signed_properties: String,
    pub signed_properties_ref: String,
    pub data_ref: String,
    pub signature_value: String,
    pub qualifying_object: String,
    pub data_object: String,
}

fn fresh_id(prefix: &str) -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}{}", &hex[..ID_HEX_LEN])
}

impl XadesIds {
    #[must_use]
    pub fn generate() -> Self {
        Self {
            signature: fresh_id("Signature-Id-"),
            signed_properties: fresh_id("Signed-Properties-Id-"),
            signed_properties_ref: fresh_id("Reference-Id-"),
            data_ref: fresh_id("Reference-Id-"),
            signature_value: fresh_id("Signature-Value-Id-"),
            qualifying_object: fresh_id("Object-Id-"),
            data_object: fresh_id("Object-Id-"),
        }
    }
}

/// `yyyy-MM-ddTHH:mm:ss.fffffff±hh:mm`.
#[must_use]
pub fn format_signing_time(at: DateTime<Local>) -> String {
    let ticks = at.nanosecond() % 1_000_000_000 / 100;
    format!(
        "{}.{ticks:07}{}",
        at.format("%Y-%m-%dT%H:%M:%S"),
        at.format("%:z")
    )
}

/// Signer-independent inputs of the rendered document.
struct Content<'a> {
    ids: &'a XadesIds,
    signing_time: &'a str,
    certificate_b64: String,
    certificate_digest_b64: String,
    issuer_name: String,
    serial_number: String,
    payload_b64: String,
}

/// Values computed between passes.
#[derive(Default)]
struct Computed {
    signed_properties_digest: String,
    data_digest: String,
    signature_value: String,
}

struct Renderer {
    writer: Writer<Vec<u8>>,
}

impl Renderer {
    fn new() -> Self {
        Self {
            writer: Writer::new(Vec::new()),
        }
    }

    fn start(&mut self, name: &str, attrs: &[(&str, &str)]) -> SigningResult<()> {
        let element = BytesStart::new(name).with_attributes(attrs.iter().copied());
        self.writer.write_event(Event::Start(element))?;
        Ok(())
    }

    fn end(&mut self, name: &str) -> SigningResult<()> {
        self.writer.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(())
    }

    fn leaf(&mut self, name: &str, attrs: &[(&str, &str)], text: &str) -> SigningResult<()> {
        self.start(name, attrs)?;
        if !text.is_empty() {
            self.writer.write_event(Event::Text(BytesText::new(text)))?;
        }
        self.end(name)
    }

    fn digest_method(&mut self) -> SigningResult<()> {
        self.leaf("ds:DigestMethod", &[("Algorithm", SHA256_DIGEST_URI)], "")
    }

    fn finish(self) -> SigningResult<String> {
        String::from_utf8(self.writer.into_inner())
            .map_err(|e| SigningError::XmlError(format!("rendered XML is not UTF-8: {e}")))
    }
}

fn render(content: &Content<'_>, computed: &Computed) -> SigningResult<String> {
    let ids = content.ids;
    let sp_uri = format!("#{}", ids.signed_properties);
    let data_uri = format!("#{}", ids.data_object);
    let target = format!("#{}", ids.signature);
    let object_reference = format!("#{}", ids.data_ref);

    let mut r = Renderer::new();
    r.writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    r.start(
        "ds:Signature",
        &[("xmlns:ds", XMLDSIG_NS), ("Id", ids.signature.as_str())],
    )?;

    r.start("ds:SignedInfo", &[])?;
    r.leaf("ds:CanonicalizationMethod", &[("Algorithm", C14N_INCLUSIVE_URI)], "")?;
    r.leaf("ds:SignatureMethod", &[("Algorithm", RSA_SHA256_URI)], "")?;
    r.start(
        "ds:Reference",
        &[
            ("Id", ids.signed_properties_ref.as_str()),
            ("URI", sp_uri.as_str()),
            ("Type", SIGNED_PROPERTIES_TYPE_URI),
        ],
    )?;
    r.start("ds:Transforms", &[])?;
    r.leaf("ds:Transform", &[("Algorithm", C14N_EXCLUSIVE_URI)], "")?;
    r.end("ds:Transforms")?;
    r.digest_method()?;
    r.leaf("ds:DigestValue", &[], &computed.signed_properties_digest)?;
    r.end("ds:Reference")?;
    r.start("ds:Reference", &[("Id", ids.data_ref.as_str()), ("URI", data_uri.as_str())])?;
    r.digest_method()?;
    r.leaf("ds:DigestValue", &[], &computed.data_digest)?;
    r.end("ds:Reference")?;
    r.end("ds:SignedInfo")?;

    r.leaf(
        "ds:SignatureValue",
        &[("Id", ids.signature_value.as_str())],
        &computed.signature_value,
    )?;

    r.start("ds:KeyInfo", &[])?;
    r.start("ds:X509Data", &[])?;
    r.leaf("ds:X509Certificate", &[], &content.certificate_b64)?;
    r.end("ds:X509Data")?;
    r.end("ds:KeyInfo")?;

    r.start("ds:Object", &[("Id", ids.qualifying_object.as_str())])?;
    r.start(
        "xades:QualifyingProperties",
        &[("xmlns:xades", XADES_NS), ("Target", target.as_str())],
    )?;
    r.start("xades:SignedProperties", &[("Id", ids.signed_properties.as_str())])?;
    r.start("xades:SignedSignatureProperties", &[])?;
    r.leaf("xades:SigningTime", &[], content.signing_time)?;
    r.start("xades:SigningCertificate", &[])?;
    r.start("xades:Cert", &[])?;
    r.start("xades:CertDigest", &[])?;
    r.digest_method()?;
    r.leaf("ds:DigestValue", &[], &content.certificate_digest_b64)?;
    r.end("xades:CertDigest")?;
    r.start("xades:IssuerSerial", &[])?;
    r.leaf("ds:X509IssuerName", &[], &content.issuer_name)?;
    r.leaf("ds:X509SerialNumber", &[], &content.serial_number)?;
    r.end("xades:IssuerSerial")?;
    r.end("xades:Cert")?;
    r.end("xades:SigningCertificate")?;
    r.end("xades:SignedSignatureProperties")?;
    r.start("xades:SignedDataObjectProperties", &[])?;
    r.start(
        "xades:DataObjectFormat",
        &[("ObjectReference", object_reference.as_str())],
    )?;
    r.leaf("xades:MimeType", &[], XML_PAYLOAD_MIME_TYPE)?;
    r.end("xades:DataObjectFormat")?;
    r.end("xades:SignedDataObjectProperties")?;
    r.end("xades:SignedProperties")?;
    r.end("xades:QualifyingProperties")?;
    r.end("ds:Object")?;

    r.leaf(
        "ds:Object",
        &[("Id", ids.data_object.as_str()), ("Encoding", BASE64_ENCODING_URI)],
        &content.payload_b64,
    )?;
    r.end("ds:Signature")?;
    r.finish()
}

const RAW_LINE_WIDTH: usize = 76;

/// Unsigned transport form: base64 of the UTF-8 payload in 76-column
/// lines separated by CRLF.
#[must_use]
pub fn raw_payload_base64(payload: &str) -> String {
    let encoded = BASE64.encode(payload.as_bytes());
    encoded
        .as_bytes()
        .chunks(RAW_LINE_WIDTH)
        .map(|line| String::from_utf8_lossy(line).into_owned())
        .collect::<Vec<_>>()
        .join("\r\n")
}

fn canonical_signed_info(xml: &str) -> SigningResult<String> {
    let doc = Document::parse(xml)?;
    let node = find_element(&doc, XMLDSIG_NS, "SignedInfo")
        .ok_or_else(|| SigningError::XmlError("SignedInfo missing".into()))?;
    Ok(canonicalize_node(node, C14nMode::Inclusive))
}

/// Sign `payload` with fresh identifiers and the current local time.
///
/// # Errors
///
/// Returns error if the payload is empty, canonicalization fails or the
/// signer refuses.
pub fn sign_xml(
    payload: &str,
    certificate: &CertificateInfo,
    signer: &dyn DigestSigner,
) -> SigningResult<String> {
    sign_xml_with(
        payload,
        certificate,
        signer,
        &XadesIds::generate(),
        &format_signing_time(Local::now()),
    )
}

/// Deterministic form of [`sign_xml`].
pub fn sign_xml_with(
    payload: &str,
    certificate: &CertificateInfo,
    signer: &dyn DigestSigner,
    ids: &XadesIds,
    signing_time: &str,
) -> SigningResult<String> {
    if payload.trim().is_empty() {
        return Err(SigningError::InvalidInput("XML payload is empty".into()));
    }
    let content = Content {
        ids,
        signing_time,
        certificate_b64: BASE64.encode(certificate.der()),
        certificate_digest_b64: BASE64.encode(certificate.sha256()),
        issuer_name: certificate.issuer().replace(", ", ","),
        serial_number: certificate.serial_decimal()?,
        payload_b64: BASE64.encode(payload.as_bytes()),
    };

    let mut computed = Computed::default();
    let draft = render(&content, &computed)?;
    let signed_properties =
        canonicalize_element_by_id(&draft, &ids.signed_properties, C14nMode::Exclusive)?;
    let data_object = canonicalize_element_by_id(&draft, &ids.data_object, C14nMode::Inclusive)?;
    computed.signed_properties_digest = BASE64.encode(sha256(signed_properties.as_bytes()));
    computed.data_digest = BASE64.encode(sha256(data_object.as_bytes()));

    let digested = render(&content, &computed)?;
    let signed_info = canonical_signed_info(&digested)?;
    let signature = signer.sign_sha256(signed_info.as_bytes())?;
    computed.signature_value = BASE64.encode(signature);

    let signed = render(&content, &computed)?;
    log::info!(
        "XAdES-BES signature {} created for {}",
        ids.signature,
        certificate.subject()
    );
    Ok(signed)
}

fn reference_digest(doc: &Document<'_>, uri: &str) -> SigningResult<Vec<u8>> {
    let reference = doc
        .descendants()
        .find(|n| {
            n.is_element()
                && n.tag_name().name() == "Reference"
                && n.tag_name().namespace() == Some(XMLDSIG_NS)
                && n.attribute("URI") == Some(uri)
        })
        .ok_or_else(|| SigningError::ValidationError(format!("no reference to {uri}")))?;
    let value = reference
        .children()
        .find(|n| n.is_element() && n.tag_name().name() == "DigestValue")
        .and_then(|n| n.text())
        .ok_or_else(|| SigningError::ValidationError(format!("reference {uri} has no digest")))?;
    BASE64
        .decode(value.trim())
        .map_err(|e| SigningError::ValidationError(format!("digest of {uri} is not base64: {e}")))
}

fn element_text<'a>(doc: &'a Document<'_>, local: &str) -> SigningResult<&'a str> {
    find_element(doc, XMLDSIG_NS, local)
        .and_then(|n| n.text())
        .ok_or_else(|| SigningError::ValidationError(format!("{local} missing")))
}

/// Check both reference digests and the RSA signature over `SignedInfo`
/// against the embedded certificate. Returns `Ok(false)` on mismatch.
///
/// # Errors
///
/// Returns error when the document lacks the expected structure.
pub fn verify_signature(xml: &str) -> SigningResult<bool> {
    let doc = Document::parse(xml)?;
    let signed_properties = doc
        .descendants()
        .find(|n| {
            n.is_element()
                && n.tag_name().name() == "SignedProperties"
                && n.tag_name().namespace() == Some(XADES_NS)
        })
        .ok_or_else(|| SigningError::ValidationError("SignedProperties missing".into()))?;
    let data_object = doc
        .descendants()
        .find(|n| n.is_element() && n.attribute("Encoding") == Some(BASE64_ENCODING_URI))
        .ok_or_else(|| SigningError::ValidationError("data object missing".into()))?;

    let sp_id = signed_properties.attribute("Id").unwrap_or_default();
    let data_id = data_object.attribute("Id").unwrap_or_default();
    let sp_digest = sha256(canonicalize_node(signed_properties, C14nMode::Exclusive).as_bytes());
    let data_digest = sha256(canonicalize_node(data_object, C14nMode::Inclusive).as_bytes());
    if reference_digest(&doc, &format!("#{sp_id}"))? != sp_digest
        || reference_digest(&doc, &format!("#{data_id}"))? != data_digest
    {
        log::warn!("XAdES reference digest mismatch");
        return Ok(false);
    }

    let decode = |text: &str| {
        let compact: String = text.split_whitespace().collect();
        BASE64
            .decode(compact)
            .map_err(|e| SigningError::ValidationError(format!("invalid base64: {e}")))
    };
    let certificate = X509::from_der(&decode(element_text(&doc, "X509Certificate")?)?)?;
    let signature = decode(element_text(&doc, "SignatureValue")?)?;
    let signed_info = canonical_signed_info(xml)?;

    let key = certificate.public_key()?;
    let mut verifier = Verifier::new(MessageDigest::sha256(), &key)?;
    verifier.update(signed_info.as_bytes())?;
    Ok(verifier.verify(&signature)?)
}
