//! Abuse-report model and the one-way review state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reasons a reader can pick when reporting a comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportReason {
    Spam,
    Harassment,
    Inappropriate,
    Misinformation,
    Other,
}

impl ReportReason {
    /// Wire value used in store rows and RPC arguments.
    pub fn as_str(self) -> &'static str {
        match self {
            ReportReason::Spam => "spam",
            ReportReason::Harassment => "harassment",
            ReportReason::Inappropriate => "inappropriate",
            ReportReason::Misinformation => "misinformation",
            ReportReason::Other => "other",
        }
    }
}

/// Review state of a report. Transitions are one-way; nothing ever returns
/// to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Pending,
    Reviewed,
    Resolved,
    Dismissed,
}

impl ReportStatus {
    /// Wire value used in store rows and RPC arguments.
    pub fn as_str(self) -> &'static str {
        match self {
            ReportStatus::Pending => "pending",
            ReportStatus::Reviewed => "reviewed",
            ReportStatus::Resolved => "resolved",
            ReportStatus::Dismissed => "dismissed",
        }
    }
}

/// Report row as stored. Reports are never deleted; the reporter may be
/// absent on rows the store accepted anonymously.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentReport {
    pub id: String,
    pub comment_id: String,
    #[serde(default)]
    pub reporter_id: Option<String>,
    pub reason: ReportReason,
    #[serde(default)]
    pub description: Option<String>,
    pub status: ReportStatus,
    #[serde(default)]
    pub reviewed_by: Option<String>,
    #[serde(default)]
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Validate a review transition before any remote call is issued.
pub fn validate_transition(current: ReportStatus, next: ReportStatus) -> anyhow::Result<()> {
    let is_valid = matches!(
        (current, next),
        (
            ReportStatus::Pending,
            ReportStatus::Reviewed | ReportStatus::Resolved | ReportStatus::Dismissed
        ) | (
            ReportStatus::Reviewed,
            ReportStatus::Resolved | ReportStatus::Dismissed
        )
    );

    if is_valid {
        Ok(())
    } else {
        anyhow::bail!(
            "invalid report transition: {} -> {}",
            current.as_str(),
            next.as_str()
        )
    }
}
