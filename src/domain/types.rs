use serde::{Deserialize, Serialize};

use super::blog::BlogStatus;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentCategories {
    pub spam: bool,
    pub hate: bool,
    pub inappropriate: bool,
    pub violence: bool,
}

/// What the content analyzer reported for one piece of text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentAnalysis {
    pub flagged: bool,
    pub categories: ContentCategories,
    pub confidence: f64,
    #[serde(default)]
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModerationDecision {
    pub status: BlogStatus,
    pub reasons: Vec<String>,
}

impl ModerationDecision {
    pub fn pending() -> Self {
        Self {
            status: BlogStatus::Pending,
            reasons: Vec::new(),
        }
    }

    pub fn is_rejected(&self) -> bool {
        self.status == BlogStatus::Rejected
    }

    /// The value stored in `blogs.moderation_notes`.
    pub fn notes(&self) -> String {
        self.reasons.join(", ")
    }
}

/// Content handed to the engine. `blog_id` lets the similarity scorer leave
/// the blog itself out of the comparison corpus.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub blog_id: Option<i64>,
    pub content: &'a str,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QueueSnapshot {
    pub high_priority: usize,
    pub normal_priority: usize,
    pub in_flight: usize,
}
