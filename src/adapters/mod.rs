//! Adapter layer modules for external system integration.
//!
//! - PKCS#11 token access behind the `TokenBackend` trait
//! - HTTP fetching for AIA, OCSP, CRL and timestamp authorities
//! - File-backed certificate trust stores and viewer settings
//! - The local HTTP API

pub mod backend;
pub mod net;
pub mod pkcs11;
pub mod server;
pub mod timestamp_http_client;
pub mod trust_store;
