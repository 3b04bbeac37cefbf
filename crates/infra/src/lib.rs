//! Infrastructure layer: record store, generation runners, config, external clients.

pub mod ai;
pub mod config;
pub mod external;
pub mod jobs;
pub mod work_store;

#[cfg(test)]
mod testing;
