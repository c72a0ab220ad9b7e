//! Infrastructure layer for cross-cutting concerns.
//!
//! - Configuration persistence and validation
//! - Error taxonomy and result types

pub mod config;
pub mod error;
