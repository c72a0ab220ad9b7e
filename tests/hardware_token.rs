//! Tests against a real PKCS#11 token.
//!
//! Require `--features hardware-tests`, `ESIGN_PKCS11_MODULE` pointing at
//! the vendor driver and `ESIGN_TEST_PIN` holding the card's PIN:
//!
//! ```text
//! ESIGN_PKCS11_MODULE=/usr/lib/libakisp11.so ESIGN_TEST_PIN=... \
//!     cargo test --features hardware-tests --test hardware_token -- --test-threads=1
//! ```
#![cfg(feature = "hardware-tests")]

use esign_agent::services::xades::verify_signature;
use esign_agent::{AgentConfiguration, SignatureRequest, SigningOrchestrator, TokenPin};
use tempfile::TempDir;

fn orchestrator(dir: &TempDir) -> SigningOrchestrator {
    let mut config = AgentConfiguration::default();
    config.output_directory = dir.path().join("out");
    config.pdf.auto_setup_trust_chain = false;
    config.trust.store_root = Some(dir.path().join("trust"));
    config.trust.viewer_settings_file = Some(dir.path().join("viewer.toml"));
    SigningOrchestrator::from_config(config).expect("ESIGN_PKCS11_MODULE must name a loadable driver")
}

fn pin() -> TokenPin {
    let pin = std::env::var("ESIGN_TEST_PIN").expect("ESIGN_TEST_PIN must be set");
    TokenPin::new(pin).unwrap()
}

#[tokio::test]
async fn lists_at_least_one_token() {
    let dir = TempDir::new().unwrap();
    let devices = orchestrator(&dir).list_devices().await.unwrap();
    assert!(!devices.is_empty(), "no token present");
    for device in &devices {
        println!("[{}] {}", device.slot_id, device.label);
    }
}

#[tokio::test]
async fn signs_and_verifies_xml_on_slot_zero() {
    let dir = TempDir::new().unwrap();
    let xml = "<?xml version=\"1.0\" encoding=\"UTF-8\"?><test>hardware</test>";
    let request = SignatureRequest::new(xml.as_bytes().to_vec(), pin(), 0);
    let outcome = orchestrator(&dir).sign_xml(&request, false).await.unwrap();
    assert!(verify_signature(&outcome.content).unwrap());
}
