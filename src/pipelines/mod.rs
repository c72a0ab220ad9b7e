//! Workflow pipelines orchestrating the services.

pub mod orchestrator;

pub use orchestrator::{RetryPolicy, SigningOrchestrator, XmlSignOutcome};
