//! Domain layer: protocol constants, ASN.1 and certificate primitives,
//! XML canonicalization and PDF structure helpers. No I/O.

pub mod asn1;
pub mod constants;
pub mod crypto;
pub mod national_id;
pub mod pdf;
pub mod types;
pub mod xml;
