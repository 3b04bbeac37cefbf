//! Product work items awaiting a generated video-ad prompt.
//!
//! This crate models the catalog rows the job claims and the artifact it writes
//! back, as plain data with no IO, no HTTP and no storage.

pub mod work_item;

pub use work_item::{
    ClaimState, GenerationResult, GenerationState, ItemFlags, WorkItem, PART1_KEY, PART2_KEY,
};
