//! Flat comment rows -> two-level thread tree.
//!
//! The store returns an unordered, flat set of rows for one article. The
//! portal renders roots with a flat reply list under each, so assembly here
//! is the single place that orders rows, attaches replies, and normalizes
//! the joined author projection.

use std::collections::HashMap;

use crate::{AuthorRole, Comment, CommentAuthor, CommentRow, CommentThread, RawAuthor};

/// Normalize the optional joined author sub-record into the stable shape
/// the portal renders. A missing sub-record yields a placeholder author
/// keyed on the row's author id; it is not an error and not retried.
pub fn normalize_author(author_id: &str, raw: Option<RawAuthor>) -> CommentAuthor {
    match raw {
        Some(raw) => {
            let role = AuthorRole::from_raw(raw.role.as_deref());
            let display_name = raw
                .display_name
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| placeholder_name(&raw.id));
            CommentAuthor {
                id: raw.id,
                display_name,
                avatar_url: raw.avatar_url,
                role,
            }
        },
        None => CommentAuthor {
            id: author_id.to_string(),
            display_name: placeholder_name(author_id),
            avatar_url: None,
            role: AuthorRole::Unknown,
        },
    }
}

fn placeholder_name(author_id: &str) -> String {
    let short: String = author_id.chars().take(6).collect();
    format!("reader-{short}")
}

/// Transform one raw row into the rendered comment shape.
pub fn into_comment(row: CommentRow) -> Comment {
    let author = normalize_author(&row.author_id, row.author);
    Comment {
        id: row.id,
        article_id: row.article_id,
        parent_id: row.parent_id,
        author,
        body: row.body,
        like_count: row.like_count,
        approved: row.approved,
        created_at: row.created_at,
    }
}

/// Assemble the two-level tree for one article.
///
/// Roots are ordered by creation time ascending, as is each root's reply
/// list (ties broken by id so assembly is deterministic). A reply whose
/// declared parent is absent from the input set is dropped; it is never
/// promoted to root.
pub fn assemble_tree(rows: Vec<CommentRow>) -> Vec<CommentThread> {
    let mut roots = Vec::new();
    let mut replies = Vec::new();
    for row in rows.into_iter().map(into_comment) {
        if row.parent_id.is_some() {
            replies.push(row);
        } else {
            roots.push(row);
        }
    }

    roots.sort_by(|left, right| {
        left.created_at
            .cmp(&right.created_at)
            .then_with(|| left.id.cmp(&right.id))
    });
    replies.sort_by(|left, right| {
        left.created_at
            .cmp(&right.created_at)
            .then_with(|| left.id.cmp(&right.id))
    });

    let index_by_root: HashMap<String, usize> = roots
        .iter()
        .enumerate()
        .map(|(index, root)| (root.id.clone(), index))
        .collect();

    let mut threads: Vec<CommentThread> = roots
        .into_iter()
        .map(|root| CommentThread {
            root,
            replies: Vec::new(),
        })
        .collect();

    for reply in replies {
        let Some(parent_id) = reply.parent_id.as_deref() else {
            continue;
        };
        match index_by_root.get(parent_id) {
            Some(&index) => threads[index].replies.push(reply),
            // Parent not in the fetched set: drop silently, defined edge case.
            None => tracing::debug!(comment_id = %reply.id, "dropping reply without parent"),
        }
    }

    threads
}
