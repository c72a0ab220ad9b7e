//! Service layer module root.
//! Token access, certificate and chain handling, and the document signers.

pub mod cert_selector;
pub mod cms_builder;
pub mod devices;
pub mod pades;
pub mod pdf_validation;
pub mod revocation;
pub mod signer;
pub mod timestamp;
pub mod token_session;
pub mod trust_chain;
pub mod xades;

pub use cert_selector::{best_certificate, select_signing_certificate, SigningCertificate};
pub use cms_builder::CmsBuilderService;
pub use pades::{PadesInputs, PdfSignOutcome, PdfSignatureBuilder};
pub use pdf_validation::{PdfSignatureValidator, PdfValidationReport, SignatureCheck};
pub use revocation::{RevocationCollector, RevocationData};
pub use signer::{DigestSigner, TokenSigner};
pub use timestamp::{TimestampAuthority, TimestampService, TimestampToken};
pub use token_session::{SlotGuard, TokenSession, TokenSessionPool};
pub use trust_chain::{CandidateSet, ReadinessLevel, TrustChainBuilder, TrustSetupReport};
