//! Local HTTP API used by browser front ends.

pub mod protocol;
pub mod routes;

pub use protocol::{decode_document, decode_pdf, error_codes, ErrorResponse};
pub use routes::{is_valid_origin, routes};
