use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlogStatus {
    Pending,
    Approved,
    Rejected,
}

impl BlogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlogStatus::Pending => "pending",
            BlogStatus::Approved => "approved",
            BlogStatus::Rejected => "rejected",
        }
    }

    /// Only `pending -> approved | rejected` is a legal transition.
    pub fn can_transition_to(&self, next: BlogStatus) -> bool {
        matches!(
            (self, next),
            (BlogStatus::Pending, BlogStatus::Approved) | (BlogStatus::Pending, BlogStatus::Rejected)
        )
    }
}

impl fmt::Display for BlogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlogStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(BlogStatus::Pending),
            "approved" => Ok(BlogStatus::Approved),
            "rejected" => Ok(BlogStatus::Rejected),
            other => Err(format!("unknown blog status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Blog {
    pub id: i64,
    pub user_id: String,
    pub title: String,
    pub content: String,
    pub status: BlogStatus,
    pub moderation_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub auto_moderated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StatusCounts {
    pub pending: i64,
    pub approved: i64,
    pub rejected: i64,
}
