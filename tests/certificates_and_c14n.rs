//! Certificate ranking, chain candidate handling and canonicalization.

mod common;

use common::certs::{end_entity, intermediate_ca, root_ca, Usage};
use esign_agent::domain::national_id::{extract_national_id, mask_national_id};
use esign_agent::domain::xml::{canonicalize, C14nMode};
use esign_agent::services::cert_selector::{best_certificate, score_certificate};
use esign_agent::services::trust_chain::{issuer_matches, parse_certificate_bundle};
use esign_agent::services::CandidateSet;
use esign_agent::CertificateInfo;

fn info(der: Vec<u8>) -> CertificateInfo {
    CertificateInfo::from_der(&der).unwrap()
}

#[test]
fn scores_rank_qualified_over_signing_over_encryption() {
    let root = root_ca("Score Root");
    let qualified = info(end_entity(&root, "Q", None, Usage::Qualified, (-1, 30)).der());
    let signing = info(end_entity(&root, "S", None, Usage::Signing, (-1, 30)).der());
    let encryption = info(end_entity(&root, "E", None, Usage::Encryption, (-1, 30)).der());
    let expired = info(end_entity(&root, "X", None, Usage::Qualified, (-60, -1)).der());

    assert!(score_certificate(&qualified) > score_certificate(&signing));
    assert!(score_certificate(&signing) > score_certificate(&encryption));
    assert!(score_certificate(&encryption) > score_certificate(&expired));

    let mixed = vec![encryption.clone(), expired, qualified.clone(), signing];
    assert_eq!(best_certificate(&mixed).unwrap().thumbprint(), qualified.thumbprint());
    assert!(best_certificate(&[]).is_none());
}

#[test]
fn candidates_are_unique_by_thumbprint_and_ordered_by_issuer() {
    let root = root_ca("Chain Root");
    let intermediate = intermediate_ca(&root, "Chain Sub CA");
    let leaf = end_entity(&intermediate, "Leaf", None, Usage::Qualified, (-1, 30));
    let (root, intermediate, leaf) = (info(root.der()), info(intermediate.der()), info(leaf.der()));

    let mut set = CandidateSet::new();
    assert!(set.insert(root.clone()));
    assert!(set.insert(leaf.clone()));
    assert!(set.insert(intermediate.clone()));
    assert!(!set.insert(root.clone()));
    assert!(!set.insert(CertificateInfo::from_der(leaf.der()).unwrap()));
    assert_eq!(set.len(), 3);

    let order: Vec<String> = set
        .into_ordered_chain(&leaf)
        .iter()
        .map(|c| c.thumbprint().to_string())
        .collect();
    assert_eq!(
        order,
        vec![
            leaf.thumbprint().to_string(),
            intermediate.thumbprint().to_string(),
            root.thumbprint().to_string()
        ]
    );
    assert!(issuer_matches(&leaf, &intermediate));
    assert!(!issuer_matches(&leaf, &root));
}

#[test]
fn certificate_bundles_accept_der_and_pem() {
    let root = root_ca("Bundle Root");
    let sub = intermediate_ca(&root, "Bundle Sub");
    assert_eq!(parse_certificate_bundle(&root.der()).len(), 1);

    let mut pem = root.cert.to_pem().unwrap();
    pem.extend(sub.cert.to_pem().unwrap());
    assert_eq!(parse_certificate_bundle(&pem).len(), 2);
    assert!(parse_certificate_bundle(b"<html>not found</html>").is_empty());
}

#[test]
fn national_ids_come_from_subject_attributes() {
    assert_eq!(
        extract_national_id("C=TR, SERIALNUMBER=TR12345678901, CN=AYSE YILMAZ").as_deref(),
        Some("12345678901")
    );
    assert_eq!(
        extract_national_id("CN=ALI VELI, UID=98765432109").as_deref(),
        Some("98765432109")
    );
    assert!(extract_national_id("CN=Test User, O=Example").is_none());
    assert!(extract_national_id("").is_none());
    assert_eq!(mask_national_id("12345678901"), "123****8901");
}

const NAMESPACED: &str = r#"<?xml version="1.0"?>
<a:root xmlns:a="urn:a" xmlns:b="urn:b" z="1" a:y="2">
  <b:child   attr='x &amp; "y"'>text &lt; more</b:child>
  <empty/>
</a:root>"#;

#[test]
fn canonical_form_is_a_fixed_point() {
    for mode in [C14nMode::Inclusive, C14nMode::Exclusive] {
        let once = canonicalize(NAMESPACED, mode).unwrap();
        let twice = canonicalize(&once, mode).unwrap();
        assert_eq!(once, twice, "{mode:?}");
        assert!(once.contains("<empty></empty>"));
        assert!(!once.starts_with("<?xml"));
    }
}

#[test]
fn inclusive_and_exclusive_differ_on_unused_namespaces() {
    let xml = r#"<r xmlns:u="urn:unused"><c>v</c></r>"#;
    let inclusive = canonicalize(xml, C14nMode::Inclusive).unwrap();
    let exclusive = canonicalize(xml, C14nMode::Exclusive).unwrap();
    assert_eq!(inclusive, r#"<r xmlns:u="urn:unused"><c>v</c></r>"#);
    assert_eq!(exclusive, "<r><c>v</c></r>");
}
