//! Shared fixtures for the integration tests.
#![allow(dead_code)]

pub mod certs;
pub mod mock_backend;

use async_trait::async_trait;
use esign_agent::adapters::net::{NetworkFetcher, OfflineFetcher};
use esign_agent::adapters::trust_store::{FileTrustStore, FileViewerIntegration};
use esign_agent::domain::asn1;
use esign_agent::domain::constants::{
    ASN1_CONTEXT_0_CONSTRUCTED, ASN1_GENERALIZED_TIME_TAG, ASN1_NULL, OID_SHA256,
    OID_SIGNED_DATA, OID_TST_INFO, OID_DATA,
};
use esign_agent::domain::crypto::sha256;
use esign_agent::services::{RevocationCollector, TimestampAuthority, TimestampToken};
use esign_agent::{
    AgentConfiguration, SignatureRequest, SigningError, SigningOrchestrator, SigningResult,
    TokenPin, TokenSessionPool, TrustChainBuilder,
};
use lopdf::{dictionary, Document, Object, Stream};
use mock_backend::{MockToken, MockTokenBackend};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const PIN: &str = "123456";
pub const NATIONAL_ID: &str = "12345678901";

/// Orchestrator over a mock token with file stores in a temp directory.
pub struct Harness {
    pub backend: Arc<MockTokenBackend>,
    pub orchestrator: SigningOrchestrator,
    pub pki: certs::Pki,
    pub dir: TempDir,
}

impl Harness {
    pub fn output_dir(&self) -> PathBuf {
        self.dir.path().join("out")
    }

    pub fn trust_root(&self) -> PathBuf {
        self.dir.path().join("trust")
    }

    /// Backend, temp directory and a shareable orchestrator.
    pub fn into_shared(self) -> (Arc<MockTokenBackend>, TempDir, Arc<SigningOrchestrator>) {
        (self.backend, self.dir, Arc::new(self.orchestrator))
    }

    pub fn with_revocation_from(self, fetcher: Arc<dyn NetworkFetcher>) -> Self {
        Self {
            orchestrator: self.orchestrator.with_revocation(RevocationCollector::new(fetcher)),
            ..self
        }
    }

    pub fn with_tsa(self, tsa: Arc<dyn TimestampAuthority>) -> Self {
        Self {
            orchestrator: self.orchestrator.with_timestamp_authority(tsa),
            ..self
        }
    }
}

/// Test configuration: no backoff, no post-sign trust setup.
pub fn test_config(dir: &TempDir) -> AgentConfiguration {
    let mut config = AgentConfiguration::default();
    config.output_directory = dir.path().join("out");
    config.retry.xml_backoff_step_ms = 0;
    config.retry.pdf_backoff_step_ms = 0;
    config.pdf.auto_setup_trust_chain = false;
    config.pdf.try_install_trust_to_local_machine = false;
    config.trust.store_root = Some(dir.path().join("trust"));
    config.trust.viewer_settings_file = Some(dir.path().join("viewer.toml"));
    config
}

/// Token carrying the signer certificate, its key and the intermediate.
pub fn signer_token(pki: &certs::Pki) -> MockToken {
    MockToken::new("AKIS", "2217000012345678")
        .with_key_pair(&[0x01], pki.signer.der(), pki.signer.key.clone())
        .with_certificate(pki.intermediate.der())
}

pub fn harness_with(tokens: impl FnOnce(&certs::Pki) -> Vec<MockToken>, tweak: impl FnOnce(&mut AgentConfiguration)) -> Harness {
    harness_over(
        certs::pki("AYSE YILMAZ", Some(NATIONAL_ID)),
        Arc::new(OfflineFetcher),
        tokens,
        tweak,
    )
}

/// Harness over a given PKI whose chain repair goes through `fetcher`.
pub fn harness_over(
    pki: certs::Pki,
    fetcher: Arc<dyn NetworkFetcher>,
    tokens: impl FnOnce(&certs::Pki) -> Vec<MockToken>,
    tweak: impl FnOnce(&mut AgentConfiguration),
) -> Harness {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(MockTokenBackend::new(tokens(&pki)));
    let mut config = test_config(&dir);
    tweak(&mut config);

    let trust = TrustChainBuilder::new(
        Arc::new(FileTrustStore::new(dir.path().join("trust")).with_elevated(false)),
        fetcher,
        Arc::new(FileViewerIntegration::new(dir.path().join("viewer.toml"))),
    );
    let pool = Arc::new(TokenSessionPool::new(backend.clone()));
    let orchestrator = SigningOrchestrator::new(pool, trust, config);
    Harness {
        backend,
        orchestrator,
        pki,
        dir,
    }
}

pub fn harness() -> Harness {
    harness_with(|pki| vec![signer_token(pki)], |_| {})
}

pub fn request(document: &[u8], slot: usize) -> SignatureRequest {
    SignatureRequest::new(document.to_vec(), TokenPin::new(PIN).unwrap(), slot)
}

pub const SAMPLE_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ereceteBilgisi xmlns="http://saglik.gov.tr/erecete"><tesisKodu>11069041</tesisKodu><receteTarihi>14.10.2026</receteTarihi><hastaAdi>Çağrı Öztürk</hastaAdi></ereceteBilgisi>"#;

/// PDF with `pages` empty A4 pages.
pub fn sample_pdf(pages: u32) -> Vec<u8> {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();
    let kids: Vec<Object> = (0..pages)
        .map(|_| {
            let content = doc.add_object(Stream::new(dictionary! {}, b"BT ET".to_vec()));
            Object::Reference(doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content,
                "MediaBox" => vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(595),
                    Object::Integer(842),
                ],
            }))
        })
        .collect();
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

/// Unsigned token shaped like a TSA grant over `data`.
pub fn token_over(data: &[u8]) -> Vec<u8> {
    let algorithm = asn1::sequence(&[&asn1::oid(OID_SHA256), ASN1_NULL]);
    let imprint = asn1::sequence(&[&algorithm, &asn1::octet_string(&sha256(data))]);
    let tst_info = asn1::sequence(&[
        &asn1::small_integer(1),
        &asn1::oid(OID_DATA),
        &imprint,
        &asn1::small_integer(9),
        &asn1::tlv(ASN1_GENERALIZED_TIME_TAG, b"20261014090000Z"),
    ]);
    let econtent = asn1::context(ASN1_CONTEXT_0_CONSTRUCTED, &asn1::octet_string(&tst_info));
    let encap = asn1::sequence(&[&asn1::oid(OID_TST_INFO), &econtent]);
    let signed_data = asn1::sequence(&[
        &asn1::small_integer(3),
        &asn1::set_of(vec![algorithm.clone()]),
        &encap,
        &asn1::set_of(Vec::new()),
    ]);
    asn1::sequence(&[
        &asn1::oid(OID_SIGNED_DATA),
        &asn1::context(ASN1_CONTEXT_0_CONSTRUCTED, &signed_data),
    ])
}

/// TSA that grants every request.
#[derive(Default)]
pub struct GrantingTsa {
    pub calls: AtomicUsize,
}

#[async_trait]
impl TimestampAuthority for GrantingTsa {
    async fn timestamp(&self, data: &[u8]) -> SigningResult<TimestampToken> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        TimestampToken::from_der(token_over(data))
    }
}

/// TSA that is never reachable.
pub struct UnreachableTsa;

#[async_trait]
impl TimestampAuthority for UnreachableTsa {
    async fn timestamp(&self, _data: &[u8]) -> SigningResult<TimestampToken> {
        Err(SigningError::TimestampError("connection refused".into()))
    }
}

/// Serves fixed bodies by URL and records every request.
#[derive(Default)]
pub struct StubFetcher {
    bodies: HashMap<String, Vec<u8>>,
    pub requested: Mutex<Vec<String>>,
}

impl StubFetcher {
    pub fn serving(mut self, url: &str, body: Vec<u8>) -> Self {
        self.bodies.insert(url.to_string(), body);
        self
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl NetworkFetcher for StubFetcher {
    async fn get(&self, url: &str) -> SigningResult<Vec<u8>> {
        self.requested.lock().unwrap().push(url.to_string());
        self.bodies
            .get(url)
            .cloned()
            .ok_or_else(|| SigningError::NetworkError(format!("404 for {url}")))
    }

    async fn post(&self, url: &str, _content_type: &str, _body: &[u8]) -> SigningResult<Vec<u8>> {
        self.requested.lock().unwrap().push(url.to_string());
        Err(SigningError::NetworkError(format!("no responder at {url}")))
    }
}
