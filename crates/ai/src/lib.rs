//! `adprompt-ai`
//!
//! **Responsibility:** the text-generation boundary.
//!
//! This crate is intentionally storage- and runtime-agnostic:
//! - It renders the instruction prompt for a work item.
//! - It judges raw model output and extracts the JSON artifact.
//! - It declares the generator collaborator and its structured error kinds.
//!
//! Retries, pacing and persistence belong to the infra runners.

pub mod generator;
pub mod prompt;
pub mod validate;

pub use generator::{GenerationError, GenerationErrorKind, TextGenerator};
pub use prompt::{PromptTemplate, RenderError, DEFAULT_ECHO_MARKER, DEFAULT_TEMPLATE, TITLE_PLACEHOLDER};
pub use validate::{clean_response, Rejection, ResponseValidator, ValidatedOutput};
