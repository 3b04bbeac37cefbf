//! Adapters for services outside the job's control.

pub mod http_session;

pub use http_session::{HttpSessionGenerator, classify_failure};
