//! End-to-end signing through the orchestrator against a mock token.

mod common;

use base64::Engine;
use common::certs::{
    empty_crl, end_entity, pki_with_urls, Pki, Usage, ROOT_CRL_URL, SIGNING_CA_CRL_URL,
};
use common::mock_backend::{LoginBehavior, MockToken};
use common::{
    harness, harness_over, harness_with, request, sample_pdf, signer_token, GrantingTsa,
    StubFetcher, UnreachableTsa, NATIONAL_ID, SAMPLE_XML,
};
use lopdf::Document;
use esign_agent::services::xades::verify_signature;
use esign_agent::{PadesProfile, PdfSignOptions, SigningError};
use std::sync::atomic::Ordering;
use std::sync::Arc;

#[tokio::test]
async fn xml_signature_is_written_and_verifies() {
    let h = harness();
    let outcome = h
        .orchestrator
        .sign_xml(&request(SAMPLE_XML.as_bytes(), 0), false)
        .await
        .expect("XAdES signing should succeed");

    assert!(verify_signature(&outcome.content).unwrap());
    assert_eq!(outcome.artifact.signer_name, "AYSE YILMAZ");
    assert!(outcome.artifact.profile.is_none());

    let signed_path = &outcome.artifact.output_path;
    assert_eq!(signed_path.extension().unwrap(), "xsig");
    assert!(signed_path.starts_with(h.output_dir()));
    assert_eq!(std::fs::read_to_string(signed_path).unwrap(), outcome.content);

    let original = outcome.original_path.expect("original XML is kept");
    assert!(original.file_name().unwrap().to_string_lossy().starts_with("erecete-"));
    assert_eq!(std::fs::read_to_string(original).unwrap(), SAMPLE_XML);
    assert_eq!(h.backend.sign_count(), 1);
}

#[tokio::test]
async fn raw_mode_stores_base64_without_touching_the_token() {
    let h = harness();
    let outcome = h
        .orchestrator
        .sign_xml(&request(SAMPLE_XML.as_bytes(), 0), true)
        .await
        .unwrap();

    assert_eq!(h.backend.open_count(), 0);
    assert!(outcome.original_path.is_none());
    assert_eq!(outcome.artifact.output_path.extension().unwrap(), "b64");
    assert!(outcome.content.lines().all(|line| line.trim_end_matches('\r').len() <= 76));

    let compact: String = outcome.content.split("\r\n").collect();
    let decoded = base64::engine::general_purpose::STANDARD.decode(compact).unwrap();
    assert_eq!(decoded, SAMPLE_XML.as_bytes());
}

#[tokio::test]
async fn empty_xml_is_rejected_before_any_file_is_written() {
    let h = harness();
    let err = h
        .orchestrator
        .sign_xml(&request(b"   ", 0), false)
        .await
        .unwrap_err();
    assert!(matches!(err, SigningError::InvalidInput(_)));
    assert!(!h.output_dir().exists());
}

#[tokio::test]
async fn session_is_reused_until_a_fresh_login_is_forced() {
    let h = harness();
    let req = request(SAMPLE_XML.as_bytes(), 0);
    h.orchestrator.sign_xml(&req, false).await.unwrap();
    h.orchestrator.sign_xml(&req, false).await.unwrap();
    assert_eq!(h.backend.open_count(), 1);
    assert_eq!(h.backend.login_count(), 1);

    let fresh = req.clone().with_force_fresh_login(true);
    h.orchestrator.sign_xml(&fresh, false).await.unwrap();
    assert_eq!(h.backend.open_count(), 2);
    assert_eq!(h.backend.open_sessions(), 1);
}

#[tokio::test]
async fn lost_sessions_are_reopened_and_signing_recovers() {
    let h = harness();
    h.backend.lose_sessions_on_sign(2);
    let outcome = h
        .orchestrator
        .sign_xml(&request(SAMPLE_XML.as_bytes(), 0), false)
        .await
        .expect("third attempt succeeds");

    assert!(verify_signature(&outcome.content).unwrap());
    assert_eq!(h.backend.sign_count(), 3);
    assert_eq!(h.backend.open_count(), 3);
    assert_eq!(h.backend.open_sessions(), 1);
}

#[tokio::test]
async fn retries_stop_after_three_attempts() {
    let h = harness();
    h.backend.lose_sessions_on_sign(usize::MAX);
    let err = h
        .orchestrator
        .sign_pdf(&request(&sample_pdf(1), 0), &PdfSignOptions::default())
        .await
        .unwrap_err();

    match err {
        SigningError::SessionUnrecoverable { attempts, last_error } => {
            assert_eq!(attempts, 3);
            assert!(last_error.contains("CKR_SESSION_HANDLE_INVALID"));
        }
        other => panic!("expected SessionUnrecoverable, got {other:?}"),
    }
    assert_eq!(h.backend.sign_count(), 3);
    assert_eq!(h.backend.open_count(), 3);
    assert_eq!(h.backend.open_sessions(), 0);
}

#[tokio::test]
async fn out_of_range_slot_fails_without_opening_a_session() {
    let h = harness_with(
        |pki| vec![signer_token(pki), MockToken::new("Empty", "0001")],
        |_| {},
    );
    let err = h
        .orchestrator
        .sign_xml(&request(SAMPLE_XML.as_bytes(), 5), false)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SigningError::InvalidSlot {
            requested: 5,
            available: 2
        }
    ));
    assert_eq!(h.backend.open_count(), 0);
}

#[tokio::test]
async fn locked_pin_is_never_retried() {
    let h = harness();
    h.backend.set_login(LoginBehavior::Locked);
    let err = h
        .orchestrator
        .sign_pdf(&request(&sample_pdf(1), 0), &PdfSignOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, SigningError::PinLocked));
    assert_eq!(h.backend.login_count(), 1);
    assert_eq!(h.backend.open_sessions(), 0);
}

#[tokio::test]
async fn incorrect_pin_is_reported_after_one_login() {
    let h = harness();
    h.backend.set_login(LoginBehavior::Incorrect);
    let err = h
        .orchestrator
        .sign_xml(&request(SAMPLE_XML.as_bytes(), 0), false)
        .await
        .unwrap_err();

    assert!(matches!(err, SigningError::PinIncorrect));
    assert_eq!(h.backend.login_count(), 1);
    assert_eq!(h.backend.sign_count(), 0);
}

#[tokio::test]
async fn qualified_certificate_is_preferred_over_encryption_certificate() {
    let h = harness_with(
        |pki| {
            let encryption = end_entity(&pki.intermediate, "AYSE YILMAZ ENC", None, Usage::Encryption, (-1, 365));
            vec![MockToken::new("AKIS", "2217000012345678")
                .with_key_pair(&[0x02], encryption.der(), encryption.key.clone())
                .with_key_pair(&[0x01], pki.signer.der(), pki.signer.key.clone())]
        },
        |_| {},
    );
    let outcome = h
        .orchestrator
        .sign_xml(&request(SAMPLE_XML.as_bytes(), 0), false)
        .await
        .unwrap();
    assert_eq!(outcome.artifact.signer_name, "AYSE YILMAZ");
    assert!(verify_signature(&outcome.content).unwrap());
}

#[tokio::test]
async fn pdf_signature_is_intact_and_covers_the_document() {
    let h = harness();
    let original = sample_pdf(2);
    let artifact = h
        .orchestrator
        .sign_pdf(&request(&original, 0), &PdfSignOptions::default())
        .await
        .expect("PAdES signing should succeed");

    assert_eq!(artifact.profile, Some(PadesProfile::BaselineB));
    assert!(!artifact.timestamp_applied);
    assert!(artifact.bytes.starts_with(&original));
    assert_eq!(std::fs::read(&artifact.output_path).unwrap(), artifact.bytes);
    let name = artifact.output_path.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("signed-document-") && name.ends_with(".pdf"));

    let report = h.orchestrator.validate_pdf(&artifact.bytes);
    assert!(report.success);
    assert_eq!(report.signature_count, 1);
    assert_eq!(report.cryptographically_valid_count, 1);
    let check = &report.signatures[0];
    assert!(check.covers_whole_document);
    assert!(check.integrity_valid);
    assert!(check.signer_subject.contains("AYSE YILMAZ"));
    assert!(!check.trusted_chain);
}

#[tokio::test]
async fn tampered_pdf_fails_integrity() {
    let h = harness();
    let artifact = h
        .orchestrator
        .sign_pdf(&request(&sample_pdf(1), 0), &PdfSignOptions::default())
        .await
        .unwrap();

    let mut tampered = artifact.bytes.clone();
    let at = tampered
        .windows(5)
        .position(|w| w == b"BT ET")
        .expect("page content present");
    tampered[at] = b'X';
    let report = h.orchestrator.validate_pdf(&tampered);
    assert_eq!(report.signature_count, 1);
    assert_eq!(report.cryptographically_valid_count, 0);
}

#[tokio::test]
async fn granted_timestamp_yields_pades_t() {
    let tsa = Arc::new(GrantingTsa::default());
    let h = harness().with_tsa(tsa.clone());
    let options = PdfSignOptions {
        enable_timestamp: Some(true),
        file_name: Some("rapor.pdf".into()),
        ..PdfSignOptions::default()
    };
    let artifact = h
        .orchestrator
        .sign_pdf(&request(&sample_pdf(1), 0), &options)
        .await
        .unwrap();

    assert_eq!(artifact.profile, Some(PadesProfile::BaselineT));
    assert!(artifact.timestamp_applied);
    assert_eq!(tsa.calls.load(Ordering::SeqCst), 1);
    assert!(artifact
        .output_path
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("rapor-"));
    assert_eq!(h.orchestrator.validate_pdf(&artifact.bytes).cryptographically_valid_count, 1);
}

#[tokio::test]
async fn unreachable_tsa_degrades_to_pades_b() {
    let h = harness().with_tsa(Arc::new(UnreachableTsa));
    let options = PdfSignOptions {
        enable_timestamp: Some(true),
        ..PdfSignOptions::default()
    };
    let artifact = h
        .orchestrator
        .sign_pdf(&request(&sample_pdf(1), 0), &options)
        .await
        .expect("signing continues without a timestamp");

    assert_eq!(artifact.profile, Some(PadesProfile::BaselineB));
    assert!(!artifact.timestamp_applied);
}

#[tokio::test]
async fn timestamp_authority_is_unused_when_disabled() {
    let tsa = Arc::new(GrantingTsa::default());
    let h = harness().with_tsa(tsa.clone());
    let artifact = h
        .orchestrator
        .sign_pdf(&request(&sample_pdf(1), 0), &PdfSignOptions::default())
        .await
        .unwrap();
    assert_eq!(artifact.profile, Some(PadesProfile::BaselineB));
    assert_eq!(tsa.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn non_pdf_input_never_reaches_the_token() {
    let h = harness();
    let err = h
        .orchestrator
        .sign_pdf(&request(b"hello world", 0), &PdfSignOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SigningError::InvalidInput(_)));
    assert_eq!(h.backend.open_count(), 0);
}

#[tokio::test]
async fn concurrent_requests_on_one_slot_share_a_session() {
    let h = Arc::new(harness());
    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let h = h.clone();
            tokio::spawn(async move {
                h.orchestrator
                    .sign_xml(&request(SAMPLE_XML.as_bytes(), 0), false)
                    .await
                    .map(|o| o.content)
            })
        })
        .collect();
    for task in tasks {
        let signed = task.await.unwrap().unwrap();
        assert!(verify_signature(&signed).unwrap());
    }
    assert_eq!(h.backend.login_count(), 1);
    assert_eq!(h.backend.sign_count(), 4);
}

fn timestamped() -> PdfSignOptions {
    PdfSignOptions {
        enable_timestamp: Some(true),
        ..PdfSignOptions::default()
    }
}

/// Harness whose card holds the whole chain and whose fetcher is `fetcher`.
fn long_term_harness(pki: Pki, fetcher: Arc<StubFetcher>) -> common::Harness {
    harness_over(
        pki,
        fetcher.clone(),
        |pki| vec![signer_token(pki).with_certificate(pki.root.der())],
        |_| {},
    )
    .with_revocation_from(fetcher)
    .with_tsa(Arc::new(GrantingTsa::default()))
}

#[tokio::test]
async fn crls_for_the_chain_yield_pades_lt_with_dss() {
    let pki = pki_with_urls("AYSE YILMAZ", Some(NATIONAL_ID));
    let fetcher = Arc::new(
        StubFetcher::default()
            .serving(SIGNING_CA_CRL_URL, empty_crl(&pki.intermediate))
            .serving(ROOT_CRL_URL, empty_crl(&pki.root)),
    );
    let h = long_term_harness(pki, fetcher.clone());

    let artifact = h
        .orchestrator
        .sign_pdf(&request(&sample_pdf(1), 0), &timestamped())
        .await
        .unwrap();
    assert_eq!(artifact.profile, Some(PadesProfile::BaselineLt));
    assert!(artifact.timestamp_applied);
    assert!(fetcher.requested().contains(&SIGNING_CA_CRL_URL.to_string()));

    let doc = Document::load_mem(&artifact.bytes).unwrap();
    let root = doc.trailer.get(b"Root").unwrap().as_reference().unwrap();
    let dss_id = doc
        .get_dictionary(root)
        .unwrap()
        .get(b"DSS")
        .expect("catalog references the DSS")
        .as_reference()
        .unwrap();
    let dss = doc.get_dictionary(dss_id).unwrap();
    assert_eq!(dss.get(b"CRLs").unwrap().as_array().unwrap().len(), 2);
    assert_eq!(dss.get(b"Certs").unwrap().as_array().unwrap().len(), 3);
    assert!(dss.get(b"OCSPs").is_err());
}

#[tokio::test]
async fn missing_revocation_data_keeps_pades_t() {
    let pki = pki_with_urls("AYSE YILMAZ", Some(NATIONAL_ID));
    let fetcher = Arc::new(StubFetcher::default());
    let h = long_term_harness(pki, fetcher.clone());

    let artifact = h
        .orchestrator
        .sign_pdf(&request(&sample_pdf(1), 0), &timestamped())
        .await
        .unwrap();
    assert_eq!(artifact.profile, Some(PadesProfile::BaselineT));
    assert!(fetcher.requested().contains(&SIGNING_CA_CRL_URL.to_string()));

    let doc = Document::load_mem(&artifact.bytes).unwrap();
    let root = doc.trailer.get(b"Root").unwrap().as_reference().unwrap();
    assert!(doc.get_dictionary(root).unwrap().get(b"DSS").is_err());
    assert!(h.orchestrator.validate_pdf(&artifact.bytes).signatures[0].integrity_valid);
}
