//! PAdES signing of PDF documents (baseline B, T and LT).
//!
//! Preparation appends one incremental update holding the signature
//! dictionary, the widget with its appearance, the page and the AcroForm.
//! The CMS container is then written into the reserved `/Contents` gap.
//! Long-term validation material goes into a second update as a `/DSS`.

use crate::domain::constants::{
    DEFAULT_PDF_FILE_BASE, DEFAULT_PDF_LOCATION, DEFAULT_PDF_REASON,
    DEFAULT_SIGNATURE_RESERVED_BYTES, MAX_FIELD_NAME_LEN, PDF_CREATOR_NAME,
};
use crate::domain::crypto::{sha256, CertificateInfo};
use crate::domain::national_id::extract_national_id;
use crate::domain::pdf::{
    byte_range_placeholder, card_xobject, extract_signed_bytes, patch_byte_range, pdf_date,
    resolve_page_number, resolve_placement, sanitize_field_name, serialize, text_string,
    AppearanceText, ByteRangeCalculator, IncrementalWriter, SignaturePlacement,
};
use crate::domain::types::{PadesProfile, PdfSignOptions};
use crate::infra::error::{SigningError, SigningResult};
use crate::services::cms_builder::CmsBuilderService;
use crate::services::revocation::{RevocationCollector, RevocationData};
use crate::services::signer::DigestSigner;
use crate::services::timestamp::TimestampAuthority;
use chrono::{DateTime, Local};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use std::path::Path;

/// Annotation flags: Print | Locked.
const WIDGET_FLAGS: i64 = 132;
/// SignaturesExist | AppendOnly.
const SIG_FLAGS: i64 = 3;
const PARENT_DEPTH_LIMIT: usize = 32;
/// A4 portrait, used when no MediaBox is reachable.
const FALLBACK_PAGE_SIZE: (f32, f32) = (595.0, 842.0);
const HEADER_SEARCH_WINDOW: usize = 1024;

/// State carried from the signature update into a later DSS update.
#[derive(Debug, Clone)]
struct UpdateContext {
    trailer: Dictionary,
    root_id: ObjectId,
    catalog: Dictionary,
    next_object: u32,
}

/// Document with a reserved signature gap and a patched ByteRange.
#[derive(Debug, Clone)]
pub struct PreparedPdf {
    bytes: Vec<u8>,
    calculator: ByteRangeCalculator,
    contents_offset: usize,
    byte_range: [i64; 4],
    digest: [u8; 32],
    field_name: String,
    placement: SignaturePlacement,
    update: UpdateContext,
}

impl PreparedPdf {
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// SHA-256 over the two ByteRange segments.
    #[must_use]
    pub fn digest(&self) -> &[u8; 32] {
        &self.digest
    }

    #[must_use]
    pub fn byte_range(&self) -> [i64; 4] {
        self.byte_range
    }

    #[must_use]
    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    #[must_use]
    pub fn placement(&self) -> SignaturePlacement {
        self.placement
    }
}

/// Result of [`PdfSignatureBuilder::sign`].
#[derive(Debug, Clone)]
pub struct PdfSignOutcome {
    pub bytes: Vec<u8>,
    pub profile: PadesProfile,
    pub timestamp_applied: bool,
    pub field_name: String,
}

/// Per-signature collaborators.
pub struct PadesInputs<'a> {
    pub certificate: &'a CertificateInfo,
    /// Chain embedded in the CMS certificate set.
    pub chain: &'a [CertificateInfo],
    pub signer: &'a dyn DigestSigner,
    /// `None` yields a baseline B signature.
    pub timestamp: Option<&'a dyn TimestampAuthority>,
    /// `None` stops at baseline T.
    pub revocation: Option<&'a RevocationCollector>,
}

/// Text shown as the signer: explicit option, then CN, then full subject.
#[must_use]
pub fn signer_display_name(options: &PdfSignOptions, certificate: &CertificateInfo) -> String {
    options
        .signer_display_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .or_else(|| certificate.common_name())
        .unwrap_or_else(|| certificate.subject().to_string())
}

/// `{base}-{yyyyMMddHHmmssfff}.pdf` with `base` taken from the requested
/// file name.
#[must_use]
pub fn signed_pdf_file_name(requested: Option<&str>, now: DateTime<Local>) -> String {
    let stem = requested
        .and_then(|name| Path::new(name).file_stem())
        .and_then(|stem| stem.to_str())
        .map(str::trim)
        .filter(|stem| !stem.is_empty())
        .unwrap_or(DEFAULT_PDF_FILE_BASE);
    let base: String = stem
        .chars()
        .map(|c| {
            if c.is_control() || matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') {
                '_'
            } else {
                c
            }
        })
        .collect();
    format!("{base}-{}.pdf", now.format("%Y%m%d%H%M%S%3f"))
}

fn resolve<'a>(doc: &'a Document, object: &'a Object) -> SigningResult<&'a Object> {
    match object {
        Object::Reference(id) => Ok(doc.get_object(*id)?),
        other => Ok(other),
    }
}

fn resolved_array(doc: &Document, dict: &Dictionary, key: &[u8]) -> SigningResult<Vec<Object>> {
    match dict.get(key) {
        Ok(object) => Ok(resolve(doc, object)?.as_array()?.clone()),
        Err(_) => Ok(Vec::new()),
    }
}

/// Width and height of a page, following inherited `/MediaBox`.
fn page_size(doc: &Document, page_id: ObjectId) -> SigningResult<(f32, f32)> {
    let mut current = page_id;
    for _ in 0..PARENT_DEPTH_LIMIT {
        let dict = doc.get_dictionary(current)?;
        if let Ok(media_box) = dict.get(b"MediaBox") {
            let values = resolve(doc, media_box)?
                .as_array()?
                .iter()
                .map(|v| resolve(doc, v).and_then(|v| Ok(v.as_float()?)))
                .collect::<SigningResult<Vec<f32>>>()?;
            if let [llx, lly, urx, ury] = values[..] {
                return Ok(((urx - llx).abs(), (ury - lly).abs()));
            }
            return Err(SigningError::PdfError("malformed MediaBox".into()));
        }
        match dict.get(b"Parent").and_then(Object::as_reference) {
            Ok(parent) => current = parent,
            Err(_) => break,
        }
    }
    log::warn!("Page {page_id:?} has no MediaBox, assuming A4");
    Ok(FALLBACK_PAGE_SIZE)
}

fn next_object_number(doc: &Document) -> u32 {
    let by_objects = doc.objects.keys().map(|(n, _)| *n).max().unwrap_or(0);
    let by_size = doc
        .trailer
        .get(b"Size")
        .and_then(Object::as_i64)
        .ok()
        .and_then(|size| u32::try_from(size - 1).ok())
        .unwrap_or(0);
    doc.max_id.max(by_objects).max(by_size) + 1
}

fn write_streams(writer: &mut IncrementalWriter, next: &mut u32, blobs: &[Vec<u8>]) -> Vec<Object> {
    blobs
        .iter()
        .map(|blob| {
            let id = (*next, 0);
            *next += 1;
            writer.write_object(id, &Object::Stream(Stream::new(Dictionary::new(), blob.clone())));
            Object::Reference(id)
        })
        .collect()
}

fn rect_object(rect: [f32; 4]) -> Object {
    Object::Array(rect.iter().map(|v| Object::Real(*v)).collect())
}

pub struct PdfSignatureBuilder {
    reserved_bytes: usize,
    default_reason: String,
    default_location: String,
}

impl Default for PdfSignatureBuilder {
    fn default() -> Self {
        Self {
            reserved_bytes: DEFAULT_SIGNATURE_RESERVED_BYTES,
            default_reason: DEFAULT_PDF_REASON.to_string(),
            default_location: DEFAULT_PDF_LOCATION.to_string(),
        }
    }
}

impl PdfSignatureBuilder {
    #[must_use]
    pub fn new(default_reason: impl Into<String>, default_location: impl Into<String>) -> Self {
        Self {
            default_reason: default_reason.into(),
            default_location: default_location.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_reserved_bytes(mut self, bytes: usize) -> Self {
        self.reserved_bytes = bytes;
        self
    }

    /// Append the signature update and compute the document digest.
    ///
    /// # Errors
    ///
    /// Returns error for non-PDF input, encrypted documents, documents
    /// without pages, or a broken object structure.
    pub fn prepare(
        &self,
        pdf: &[u8],
        options: &PdfSignOptions,
        certificate: &CertificateInfo,
        timestamp_enabled: bool,
        now: DateTime<Local>,
    ) -> SigningResult<PreparedPdf> {
        let header_window = &pdf[..pdf.len().min(HEADER_SEARCH_WINDOW)];
        if !header_window.windows(4).any(|w| w == b"%PDF") {
            return Err(SigningError::InvalidInput("document is not a PDF".into()));
        }
        let doc = Document::load_mem(pdf)?;
        if doc.trailer.has(b"Encrypt") {
            return Err(SigningError::PdfError("encrypted PDFs are not supported".into()));
        }
        let pages = doc.get_pages();
        let page_count = u32::try_from(pages.len())
            .map_err(|_| SigningError::PdfError("page count out of range".into()))?;
        if page_count == 0 {
            return Err(SigningError::PdfError("document has no pages".into()));
        }
        let page_number = resolve_page_number(options.page_number, page_count);
        let page_id = *pages
            .get(&page_number)
            .ok_or_else(|| SigningError::PdfError(format!("page {page_number} not found")))?;
        let (page_width, page_height) = page_size(&doc, page_id)?;
        let placement = resolve_placement(options, page_number, page_width, page_height);

        let field_name = sanitize_field_name(
            &options
                .signature_field_name
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("Signature_{}", now.format("%Y%m%d%H%M%S%3f"))),
            MAX_FIELD_NAME_LEN,
        );
        let display_name = signer_display_name(options, certificate);
        let reason = options.reason.as_deref().unwrap_or(&self.default_reason);
        let location = options.location.as_deref().unwrap_or(&self.default_location);

        let root_id = doc.trailer.get(b"Root")?.as_reference()?;
        let mut catalog = doc.get_dictionary(root_id)?.clone();
        let next = next_object_number(&doc);
        let sig_id = (next, 0);
        let appearance_id = (next + 1, 0);
        let widget_id = (next + 2, 0);

        let existing_form = catalog.get(b"AcroForm").ok().cloned();
        let (acroform_id, mut acroform) = match existing_form {
            Some(Object::Reference(id)) => (id, doc.get_dictionary(id)?.clone()),
            Some(Object::Dictionary(dict)) => ((next + 3, 0), dict),
            _ => ((next + 3, 0), Dictionary::new()),
        };
        let mut fields = resolved_array(&doc, &acroform, b"Fields")?;
        fields.push(Object::Reference(widget_id));
        acroform.set("Fields", fields);
        acroform.set("SigFlags", SIG_FLAGS);
        catalog.set("AcroForm", Object::Reference(acroform_id));

        let mut page = doc.get_dictionary(page_id)?.clone();
        let mut annots = resolved_array(&doc, &page, b"Annots")?;
        annots.push(Object::Reference(widget_id));
        page.set("Annots", annots);

        let calculator = ByteRangeCalculator::new(self.reserved_bytes);
        let mut details = Dictionary::new();
        details.set("M", Object::string_literal(pdf_date(&now)));
        details.set("Name", text_string(&display_name));
        details.set("Reason", text_string(reason));
        details.set("Location", text_string(location));
        details.set(
            "Prop_Build",
            dictionary! {
                "App" => dictionary! { "Name" => Object::Name(PDF_CREATOR_NAME.as_bytes().to_vec()) },
            },
        );
        let mut sig_body =
            b"<< /Type /Sig /Filter /Adobe.PPKLite /SubFilter /ETSI.CAdES.detached /ByteRange ".to_vec();
        let byte_range_rel = sig_body.len();
        sig_body.extend_from_slice(byte_range_placeholder().as_bytes());
        sig_body.extend_from_slice(b" /Contents ");
        let contents_rel = sig_body.len();
        sig_body.extend_from_slice(calculator.generate_placeholder().as_bytes());
        let mut tail = Vec::new();
        serialize(&Object::Dictionary(details), &mut tail);
        // " /M (...) ... >>" continues the same dictionary.
        sig_body.extend_from_slice(&tail[2..]);

        let appearance = card_xobject(
            &AppearanceText {
                signer_name: display_name.clone(),
                national_id: extract_national_id(certificate.subject()),
                signing_date: now.format("%d.%m.%Y %H:%M:%S %:z").to_string(),
                timestamp_enabled,
            },
            placement.width,
            placement.height,
        );
        let widget = dictionary! {
            "Type" => "Annot",
            "Subtype" => "Widget",
            "FT" => "Sig",
            "T" => text_string(&field_name),
            "V" => sig_id,
            "F" => WIDGET_FLAGS,
            "P" => page_id,
            "Rect" => rect_object(placement.rect()),
            "AP" => dictionary! { "N" => appearance_id },
        };

        let mut writer = IncrementalWriter::new(pdf)?;
        let sig_start = writer.write_raw_object(sig_id, &sig_body);
        writer.write_object(appearance_id, &Object::Stream(appearance));
        writer.write_object(widget_id, &Object::Dictionary(widget));
        writer.write_object(page_id, &Object::Dictionary(page));
        writer.write_object(acroform_id, &Object::Dictionary(acroform));
        writer.write_object(root_id, &Object::Dictionary(catalog.clone()));
        let size = next + 4;
        let next_object = size + u32::from(writer.appends_xref_stream());
        let mut bytes = writer.finish(&doc.trailer, size);

        let contents_offset = sig_start + contents_rel;
        let byte_range = calculator.calculate_byte_range(bytes.len(), contents_offset);
        patch_byte_range(&mut bytes, sig_start + byte_range_rel, &byte_range)?;
        let digest = sha256(&extract_signed_bytes(&bytes, &byte_range)?);
        log::debug!(
            "Prepared signature field {field_name} on page {page_number}, ByteRange {byte_range:?}"
        );

        Ok(PreparedPdf {
            bytes,
            calculator,
            contents_offset,
            byte_range,
            digest,
            field_name,
            placement,
            update: UpdateContext {
                trailer: doc.trailer.clone(),
                root_id,
                catalog,
                next_object,
            },
        })
    }

    /// Write the CMS container into the reserved gap.
    pub fn complete(prepared: &PreparedPdf, cms: &[u8]) -> SigningResult<Vec<u8>> {
        let mut bytes = prepared.bytes.clone();
        prepared
            .calculator
            .insert_signature(&mut bytes, prepared.contents_offset, cms)?;
        Ok(bytes)
    }

    /// Second incremental update with the document security store.
    fn append_dss(signed: &[u8], update: &UpdateContext, data: &RevocationData) -> SigningResult<Vec<u8>> {
        let mut writer = IncrementalWriter::new(signed)?;
        let mut next = update.next_object;
        let certs = write_streams(&mut writer, &mut next, &data.certs);
        let ocsps = write_streams(&mut writer, &mut next, &data.ocsps);
        let crls = write_streams(&mut writer, &mut next, &data.crls);

        let mut dss = Dictionary::new();
        dss.set("Type", Object::Name(b"DSS".to_vec()));
        for (key, refs) in [("Certs", certs), ("OCSPs", ocsps), ("CRLs", crls)] {
            if !refs.is_empty() {
                dss.set(key, refs);
            }
        }
        let dss_id = (next, 0);
        next += 1;
        writer.write_object(dss_id, &Object::Dictionary(dss));

        let mut catalog = update.catalog.clone();
        catalog.set("DSS", Object::Reference(dss_id));
        writer.write_object(update.root_id, &Object::Dictionary(catalog));
        Ok(writer.finish(&update.trailer, next))
    }

    /// LT upgrade of a PAdES-T document; a failed DSS write keeps T.
    fn with_long_term_material(
        signed: Vec<u8>,
        update: &UpdateContext,
        data: &RevocationData,
    ) -> (Vec<u8>, PadesProfile) {
        match Self::append_dss(&signed, update, data) {
            Ok(bytes) => (bytes, PadesProfile::BaselineLt),
            Err(e) => {
                log::warn!("DSS update failed, keeping PAdES-T: {e}");
                (signed, PadesProfile::BaselineT)
            }
        }
    }

    /// Complete signing flow with profile degradation LT -> T -> B.
    ///
    /// # Errors
    ///
    /// Preparation, token signing and CMS assembly failures are returned;
    /// timestamp and revocation failures only lower the profile.
    pub async fn sign(
        &self,
        pdf: &[u8],
        options: &PdfSignOptions,
        inputs: PadesInputs<'_>,
    ) -> SigningResult<PdfSignOutcome> {
        let prepared = self.prepare(
            pdf,
            options,
            inputs.certificate,
            inputs.timestamp.is_some(),
            Local::now(),
        )?;
        let cms = CmsBuilderService::new(inputs.certificate.clone(), inputs.chain.to_vec());
        let attributes = cms.signed_attributes(prepared.digest())?;
        let signature = inputs.signer.sign_sha256(attributes.as_set_der())?;

        let mut unsigned = Vec::new();
        let mut profile = PadesProfile::BaselineB;
        if let Some(tsa) = inputs.timestamp {
            match tsa.timestamp(&signature).await {
                Ok(token) => {
                    unsigned.push(CmsBuilderService::timestamp_attribute(token.der()));
                    profile = PadesProfile::BaselineT;
                }
                Err(e) => log::warn!("Timestamp unavailable, continuing without it: {e}"),
            }
        }
        let container = cms.build(&attributes, &signature, &unsigned)?;
        let mut bytes = Self::complete(&prepared, &container)?;

        if profile == PadesProfile::BaselineT {
            if let Some(collector) = inputs.revocation {
                match collector.collect(inputs.chain).await {
                    Ok(data) if !data.is_empty() => {
                        (bytes, profile) =
                            Self::with_long_term_material(bytes, &prepared.update, &data);
                    }
                    Ok(_) => log::warn!("No revocation data for the chain, keeping PAdES-T"),
                    Err(e) => log::warn!("LT material unavailable, keeping PAdES-T: {e}"),
                }
            }
        }

        log::info!("{profile} signature written to field {}", prepared.field_name);
        Ok(PdfSignOutcome {
            bytes,
            profile,
            timestamp_applied: profile != PadesProfile::BaselineB,
            field_name: prepared.field_name,
        })
    }
}
