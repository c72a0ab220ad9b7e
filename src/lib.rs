//! esign-agent library
//!
//! Local signing agent for PKCS#11 smart cards. Produces XAdES-BES signed
//! XML and PAdES (B, T, LT) signed PDF documents, discovers and installs the
//! signer's trust chain and validates PDF signatures.
//!
//! Layers, leaf first:
//! - `domain`: ASN.1, certificates, XML canonicalization, PDF primitives
//! - `adapters`: PKCS#11 backend, HTTP fetchers, trust stores, HTTP API
//! - `services`: session pool, certificate selection, chain building, signers
//! - `pipelines`: the signing orchestrator

pub mod adapters;
pub mod domain;
pub mod infra;
pub mod pipelines;
pub mod services;

#[cfg(test)]
mod testutil;

pub use adapters::backend::{
    CertificateObject, ObjectHandle, PrivateKeyObject, SessionHandle, SessionMode, TokenBackend,
};
pub use domain::crypto::CertificateInfo;
pub use domain::types::{
    DeviceInfo, PadesProfile, PdfSignOptions, SignatureRequest, SignedArtifact, TimestampUrl,
    TokenInfo, TokenPin,
};
pub use infra::config::{AgentConfiguration, ConfigManager, ExportFormat};
pub use infra::error::{ErrorKind, SigningError, SigningResult};
pub use pipelines::{RetryPolicy, SigningOrchestrator, XmlSignOutcome};
pub use services::token_session::TokenSessionPool;
pub use services::trust_chain::{TrustChainBuilder, TrustSetupReport};
