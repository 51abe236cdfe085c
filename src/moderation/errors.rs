use std::time::Duration;

use thiserror::Error;

use crate::{ai::GeminiError, db::PersistenceError};

use super::retry::Retryable;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("content analysis request failed: {0}")]
    Upstream(#[from] GeminiError),
    #[error("content analysis response was malformed: {0}")]
    Malformed(String),
    #[error("content analysis timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum SimilarityError {
    #[error("failed to load comparison corpus: {0}")]
    Corpus(#[source] PersistenceError),
    #[error("similarity request failed: {0}")]
    Upstream(#[from] GeminiError),
    #[error("similarity reply is not a number: {0:?}")]
    NonNumeric(String),
    #[error("similarity score {0} is outside [0, 1]")]
    OutOfRange(f64),
    #[error("similarity check timed out after {0:?}")]
    Timeout(Duration),
}

/// Raised by the decision engine when either collaborator fails.
#[derive(Debug, Error)]
pub enum ModerationError {
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error(transparent)]
    Similarity(#[from] SimilarityError),
}

impl ModerationError {
    /// Whether a later pass could succeed on the same content.
    pub fn is_transient(&self) -> bool {
        match self {
            ModerationError::Analysis(err) => err.is_transient(),
            ModerationError::Similarity(err) => err.is_transient(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("blog {0} has no content to moderate")]
    EmptyContent(i64),
    #[error("approval of blog {blog_id} blocked: {}", .reasons.join(", "))]
    ApprovalBlocked { blog_id: i64, reasons: Vec<String> },
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
    #[error(transparent)]
    Moderation(#[from] ModerationError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}
