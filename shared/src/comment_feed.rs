//! Serialized state updates for one article's live comment view.
//!
//! Two independent sources mutate the rendered list: responses to the
//! reader's own mutations and pushed change-feed events. Both are expressed
//! as a [`CommentFeedEvent`] and applied through a single reducer, so the
//! view state has exactly one writer and the two sources cannot interleave
//! mid-update.

use serde::{Deserialize, Serialize};

use crate::{Comment, CommentThread};

/// One state update for an article's comment view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommentFeedEvent {
    /// A comment appeared: created locally or pushed by the change feed.
    Inserted { comment: Comment },
    /// A comment disappeared: deleted by its author or by moderation.
    Removed { id: String },
}

/// The reduced view state: the same two-level tree the page renders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommentFeedState {
    threads: Vec<CommentThread>,
}

impl CommentFeedState {
    /// Seed from an assembled tree (the page's initial fetch).
    pub fn from_threads(threads: Vec<CommentThread>) -> Self {
        Self { threads }
    }

    /// Current view state.
    pub fn threads(&self) -> &[CommentThread] {
        &self.threads
    }

    /// Apply one event. Returns whether the state changed, so callers can
    /// skip re-broadcasting no-ops.
    pub fn apply(&mut self, event: &CommentFeedEvent) -> bool {
        match event {
            CommentFeedEvent::Inserted { comment } => self.insert(comment),
            CommentFeedEvent::Removed { id } => self.remove(id),
        }
    }

    fn insert(&mut self, comment: &Comment) -> bool {
        // A mutation response can race its own change-feed echo; the second
        // arrival of the same id is a no-op.
        if self.contains(&comment.id) {
            return false;
        }

        match comment.parent_id.as_deref() {
            None => {
                let position = self
                    .threads
                    .iter()
                    .position(|thread| thread.root.created_at > comment.created_at)
                    .unwrap_or(self.threads.len());
                self.threads.insert(
                    position,
                    CommentThread {
                        root: comment.clone(),
                        replies: Vec::new(),
                    },
                );
                true
            },
            Some(parent_id) => {
                let Some(thread) = self
                    .threads
                    .iter_mut()
                    .find(|thread| thread.root.id == parent_id)
                else {
                    // Same rule as assembly: replies without a visible
                    // parent are dropped, never promoted to root.
                    tracing::debug!(comment_id = %comment.id, "dropping feed reply without parent");
                    return false;
                };
                let position = thread
                    .replies
                    .iter()
                    .position(|reply| reply.created_at > comment.created_at)
                    .unwrap_or(thread.replies.len());
                thread.replies.insert(position, comment.clone());
                true
            },
        }
    }

    /// Remove by id from the root list and from every reply list. Removing
    /// a root drops its whole thread, mirroring the store-side cascade.
    fn remove(&mut self, id: &str) -> bool {
        let before = self.len();
        self.threads.retain(|thread| thread.root.id != id);
        for thread in &mut self.threads {
            thread.replies.retain(|reply| reply.id != id);
        }
        self.len() != before
    }

    fn contains(&self, id: &str) -> bool {
        self.threads.iter().any(|thread| {
            thread.root.id == id || thread.replies.iter().any(|reply| reply.id == id)
        })
    }

    fn len(&self) -> usize {
        self.threads
            .iter()
            .map(|thread| 1 + thread.replies.len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{CommentFeedEvent, CommentFeedState};
    use crate::{AuthorRole, Comment, CommentAuthor, CommentThread};

    fn comment(id: &str, parent: Option<&str>, minute: u32) -> Comment {
        Comment {
            id: id.to_string(),
            article_id: "article-1".to_string(),
            parent_id: parent.map(str::to_string),
            author: CommentAuthor {
                id: format!("user-{id}"),
                display_name: format!("user-{id}"),
                avatar_url: None,
                role: AuthorRole::Member,
            },
            body: "text".to_string(),
            like_count: 0,
            approved: true,
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap(),
        }
    }

    fn seeded() -> CommentFeedState {
        CommentFeedState::from_threads(vec![CommentThread {
            root: comment("c1", None, 10),
            replies: vec![comment("r1", Some("c1"), 15)],
        }])
    }

    #[test]
    fn inserts_root_in_creation_order() {
        let mut state = seeded();
        assert!(state.apply(&CommentFeedEvent::Inserted {
            comment: comment("c0", None, 5),
        }));
        let ids: Vec<&str> = state.threads().iter().map(|t| t.root.id.as_str()).collect();
        assert_eq!(ids, vec!["c0", "c1"]);
    }

    #[test]
    fn inserts_reply_under_its_root() {
        let mut state = seeded();
        assert!(state.apply(&CommentFeedEvent::Inserted {
            comment: comment("r0", Some("c1"), 12),
        }));
        let ids: Vec<&str> = state.threads()[0]
            .replies
            .iter()
            .map(|r| r.id.as_str())
            .collect();
        assert_eq!(ids, vec!["r0", "r1"]);
    }

    #[test]
    fn duplicate_insert_is_a_noop() {
        let mut state = seeded();
        let event = CommentFeedEvent::Inserted {
            comment: comment("c2", None, 20),
        };
        assert!(state.apply(&event));
        assert!(!state.apply(&event));
        assert_eq!(state.threads().len(), 2);
    }

    #[test]
    fn reply_without_visible_parent_is_dropped() {
        let mut state = seeded();
        assert!(!state.apply(&CommentFeedEvent::Inserted {
            comment: comment("ghost", Some("missing"), 30),
        }));
        assert_eq!(state.threads().len(), 1);
    }

    #[test]
    fn removal_splices_replies_out_of_their_thread() {
        let mut state = seeded();
        assert!(state.apply(&CommentFeedEvent::Removed {
            id: "r1".to_string(),
        }));
        assert!(state.threads()[0].replies.is_empty());
        assert_eq!(state.threads().len(), 1);
    }

    #[test]
    fn removing_a_root_drops_the_whole_thread() {
        let mut state = seeded();
        assert!(state.apply(&CommentFeedEvent::Removed {
            id: "c1".to_string(),
        }));
        assert!(state.threads().is_empty());
    }

    #[test]
    fn removing_an_unknown_id_changes_nothing() {
        let mut state = seeded();
        assert!(!state.apply(&CommentFeedEvent::Removed {
            id: "nope".to_string(),
        }));
        assert_eq!(state.threads().len(), 1);
    }
}
