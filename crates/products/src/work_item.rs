use serde::{Deserialize, Serialize};

use adprompt_core::WorkItemId;

/// JSON key of the first prompt segment.
pub const PART1_KEY: &str = "part1_prompt";

/// JSON key of the second prompt segment.
pub const PART2_KEY: &str = "part2_prompt";

/// A claimable unit of work: one product row needing a generated prompt.
///
/// This is the pre-claim snapshot returned by the store. `title` feeds the
/// prompt; `payload` (e.g. an image reference) is carried through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    id: WorkItemId,
    title: Option<String>,
    payload: Option<String>,
}

impl WorkItem {
    pub fn new(id: WorkItemId, title: Option<String>, payload: Option<String>) -> Self {
        Self { id, title, payload }
    }

    pub fn with_title(id: WorkItemId, title: impl Into<String>) -> Self {
        Self::new(id, Some(title.into()), None)
    }

    pub fn id_typed(&self) -> WorkItemId {
        self.id
    }

    /// The title, or `None` when absent or blank.
    pub fn title(&self) -> Option<&str> {
        self.title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
    }

    pub fn payload(&self) -> Option<&str> {
        self.payload.as_deref()
    }
}

/// Claim flag of a row.
///
/// Stored as a nullable boolean: NULL = unclaimed, TRUE = claimed,
/// FALSE = claim failed (only written by the `MarkFailed` exhaustion policy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimState {
    Unclaimed,
    Claimed,
    Failed,
}

impl ClaimState {
    pub fn from_flag(flag: Option<bool>) -> Self {
        match flag {
            None => Self::Unclaimed,
            Some(true) => Self::Claimed,
            Some(false) => Self::Failed,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Self::Unclaimed => None,
            Self::Claimed => Some(true),
            Self::Failed => Some(false),
        }
    }
}

/// Whether a row already carries a generated result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationState {
    Pending,
    Completed,
}

impl GenerationState {
    /// Inferred from the result column: populated means completed.
    pub fn from_result(result: Option<&str>) -> Self {
        match result {
            Some(_) => Self::Completed,
            None => Self::Pending,
        }
    }
}

/// The gating state of a row, as seen by the claim predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemFlags {
    pub generation: GenerationState,
    /// Precondition flag set by the upstream stage (e.g. image processed).
    pub upstream_ready: bool,
    pub claim: ClaimState,
}

impl ItemFlags {
    /// Eligible iff pending, upstream-ready and unclaimed.
    pub fn is_claimable(&self) -> bool {
        self.generation == GenerationState::Pending
            && self.upstream_ready
            && self.claim == ClaimState::Unclaimed
    }
}

/// The two-part video-ad prompt produced for one item.
///
/// Only the JSON shape is enforced; the per-part length and style contract
/// lives in the instruction template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationResult {
    #[serde(rename = "part1_prompt")]
    pub part1: String,
    #[serde(rename = "part2_prompt")]
    pub part2: String,
}
