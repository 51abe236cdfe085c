pub mod blog;
pub mod types;

pub use blog::{Blog, BlogStatus, StatusCounts};
pub use types::{Candidate, ContentAnalysis, ContentCategories, ModerationDecision, QueueSnapshot};
