//! Domain model shared between the Newsdesk backend and its tests.
//!
//! The hosted store owns every entity; the types here mirror its rows and
//! the view models the portal renders from them.

pub mod comment_feed;
pub mod comment_tree;
pub mod moderation;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Portal roles recognized on author sub-records.
///
/// Raw rows carry the role as a free-form string; it is decided into this
/// sum type exactly once, at the transform boundary. Anything the portal
/// does not recognize becomes [`AuthorRole::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorRole {
    Member,
    Author,
    Editor,
    Admin,
    Unknown,
}

impl AuthorRole {
    /// Decide a raw role string. Unrecognized or missing values map to
    /// `Unknown`, never to an error.
    pub fn from_raw(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("member") => AuthorRole::Member,
            Some("author") => AuthorRole::Author,
            Some("editor") => AuthorRole::Editor,
            Some("admin") => AuthorRole::Admin,
            _ => AuthorRole::Unknown,
        }
    }

    /// Moderation screens are restricted to these roles.
    pub fn is_moderator(self) -> bool {
        matches!(self, AuthorRole::Editor | AuthorRole::Admin)
    }
}

/// Author sub-record exactly as the store returns it on a joined select.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawAuthor {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

/// Comment row as fetched from the store, author join included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentRow {
    pub id: String,
    pub article_id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub author_id: String,
    pub body: String,
    #[serde(default)]
    pub like_count: i64,
    #[serde(default = "default_approved")]
    pub approved: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub author: Option<RawAuthor>,
}

fn default_approved() -> bool {
    true
}

/// Normalized author shape the portal renders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentAuthor {
    pub id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub role: AuthorRole,
}

/// A comment after the transform boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub article_id: String,
    pub parent_id: Option<String>,
    pub author: CommentAuthor,
    pub body: String,
    pub like_count: i64,
    pub approved: bool,
    pub created_at: DateTime<Utc>,
}

/// One root comment plus its replies, creation-time ascending on both
/// levels. Replies are never themselves replied to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentThread {
    pub root: Comment,
    pub replies: Vec<Comment>,
}

/// Like marker row. The (comment, user) pair is the identity and existence
/// means "liked"; rows are created and removed exclusively by the store's
/// toggle procedure, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentLikeRow {
    pub comment_id: String,
    pub user_id: String,
}

/// Minimal user record, lazily provisioned on first comment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRow {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

/// Article fields the comment subsystem needs (slug for deep links).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleRef {
    pub id: String,
    pub slug: String,
    pub title: String,
}

/// Notification row, created as a side effect of replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub recipient_id: String,
    pub kind: String,
    pub title: String,
    pub message: String,
    pub link: String,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Input for a notification about to be dispatched.
#[derive(Debug, Clone, Serialize)]
pub struct NewNotification {
    pub recipient_id: String,
    pub kind: String,
    pub title: String,
    pub message: String,
    pub link: String,
    pub metadata: serde_json::Value,
}
