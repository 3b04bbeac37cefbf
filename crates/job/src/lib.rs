//! The `adprompt-job` binary: argument parsing and the run lifecycle.

pub mod app;
pub mod cli;
