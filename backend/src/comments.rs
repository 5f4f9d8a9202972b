//! Comment reads and reader-facing mutations.
//!
//! The store owns the rows; everything here is fetch/mutate plus the
//! best-effort side effects around creation (profile provisioning, reply
//! notifications). None of the side effects can fail a comment write.

use anyhow::Result;
use newsdesk_shared::{
    comment_feed::CommentFeedEvent, comment_tree, ArticleRef, Comment, CommentLikeRow, CommentRow,
    CommentThread, NewNotification, ProfileRow,
};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    auth::Session,
    notifications,
    store::{eq, in_list, order, select, StoreClient},
};

/// Projection used whenever comments are rendered: the row plus the joined
/// author sub-record.
const COMMENT_SELECT: &str = "*,author:profiles(id,display_name,avatar_url,role)";

/// Fetch and assemble the visible comment tree for one article.
pub async fn list_article_comments(
    store: &StoreClient,
    article_id: &str,
) -> Result<Vec<CommentThread>> {
    let rows: Vec<CommentRow> = store
        .select_rows(
            "comments",
            &[
                eq("article_id", article_id),
                eq("approved", "true"),
                select(COMMENT_SELECT),
                order("created_at.asc"),
            ],
        )
        .await?;
    Ok(comment_tree::assemble_tree(rows))
}

/// Which of the given comments the caller has liked, for rendering the
/// toggle state. The rows themselves are created and removed only by the
/// store's toggle procedure.
pub async fn liked_comment_ids(
    store: &StoreClient,
    user_id: &str,
    comment_ids: &[String],
) -> Result<Vec<String>> {
    if comment_ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows: Vec<CommentLikeRow> = store
        .select_rows(
            "comment_likes",
            &[eq("user_id", user_id), in_list("comment_id", comment_ids)],
        )
        .await?;
    Ok(rows.into_iter().map(|row| row.comment_id).collect())
}

/// Fetch one comment with its author projection.
pub async fn fetch_comment(store: &StoreClient, comment_id: &str) -> Result<Option<Comment>> {
    let row = store
        .select_one::<CommentRow>("comments", &[eq("id", comment_id), select(COMMENT_SELECT)])
        .await?;
    Ok(row.map(comment_tree::into_comment))
}

/// Input for a new comment or reply.
#[derive(Debug, Clone)]
pub struct NewCommentInput {
    pub article_id: String,
    pub author_id: String,
    pub body: String,
    pub parent_id: Option<String>,
}

/// Create a comment. Returns `None` without touching the store when the
/// claimed author does not match the session, or when the store refuses
/// the write. New comments are auto-approved; there is no pre-moderation
/// queue.
pub async fn create_comment(
    store: &StoreClient,
    session: &Session,
    input: NewCommentInput,
) -> Result<Option<Comment>> {
    if session.user_id != input.author_id {
        tracing::warn!(
            session_user = %session.user_id,
            claimed_author = %input.author_id,
            "comment author mismatch, rejected before mutation"
        );
        return Ok(None);
    }
    let body = input.body.trim().to_string();
    if body.is_empty() {
        tracing::warn!(user = %session.user_id, "empty comment body rejected");
        return Ok(None);
    }

    ensure_profile(store, &session.user_id).await;

    let row = serde_json::json!({
        "id": Uuid::new_v4().to_string(),
        "article_id": input.article_id,
        "parent_id": input.parent_id,
        "author_id": input.author_id,
        "body": body,
        "approved": true,
    });
    let Some(inserted) = store
        .insert_returning::<CommentRow, _>("comments", &row)
        .await?
    else {
        return Ok(None);
    };

    // Re-read with the author join so the caller gets the same projection
    // the list endpoint renders.
    let comment = match fetch_comment(store, &inserted.id).await {
        Ok(Some(comment)) => comment,
        Ok(None) | Err(_) => comment_tree::into_comment(inserted),
    };

    if let Some(parent_id) = comment.parent_id.clone() {
        notify_parent_author(store, &comment, &parent_id).await;
    }

    Ok(Some(comment))
}

/// Toggle the caller's like on a comment. The whole transition lives in one
/// remote procedure that reports the resulting state, so there is no
/// check-then-write race on this side. A failed call surfaces as "no
/// change".
pub async fn toggle_like(store: &StoreClient, session: &Session, comment_id: &str) -> Option<bool> {
    let args = serde_json::json!({
        "comment_id": comment_id,
        "user_id": session.user_id,
    });
    match store.rpc::<bool, _>("toggle-comment-like", &args).await {
        Ok(Some(liked)) => Some(liked),
        Ok(None) => None,
        Err(err) => {
            tracing::warn!("like toggle failed for {comment_id}: {err:#}");
            None
        },
    }
}

/// Privileged cascading delete, bypassing per-row authorization. Likes and
/// reports attached to the comment go with it, server-side.
pub async fn admin_delete_comment(store: &StoreClient, comment_id: &str) -> Result<bool> {
    let args = serde_json::json!({ "comment_id": comment_id });
    let result = store
        .rpc_privileged::<serde_json::Value, _>("admin-delete-comment", &args)
        .await?;
    Ok(result.is_some())
}

/// Build the feed event a freshly created comment produces.
pub fn created_event(comment: &Comment) -> CommentFeedEvent {
    CommentFeedEvent::Inserted {
        comment: comment.clone(),
    }
}

/// Provision a minimal profile on first comment. Best-effort: the store may
/// already have created the row through a trigger, and a failure here never
/// blocks the comment itself.
async fn ensure_profile(store: &StoreClient, user_id: &str) {
    match store
        .select_one::<ProfileRow>("profiles", &[eq("id", user_id)])
        .await
    {
        Ok(Some(_)) => {},
        Ok(None) => {
            let profile = serde_json::json!({
                "id": user_id,
                "display_name": derive_display_name(user_id),
                "role": "member",
            });
            if let Err(err) = store
                .insert_returning::<ProfileRow, _>("profiles", &profile)
                .await
            {
                tracing::warn!("profile provisioning failed for {user_id}: {err:#}");
            }
        },
        Err(err) => tracing::warn!("profile lookup failed for {user_id}: {err:#}"),
    }
}

/// Deterministic display name for a profile provisioned without one.
fn derive_display_name(user_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("Reader-{}", &digest[..6])
}

/// Dispatch the reply notification when the parent comment belongs to
/// someone else. Never fails the surrounding creation.
async fn notify_parent_author(store: &StoreClient, reply: &Comment, parent_id: &str) {
    let parent = match store
        .select_one::<CommentRow>("comments", &[eq("id", parent_id)])
        .await
    {
        Ok(Some(parent)) => parent,
        Ok(None) => {
            tracing::warn!(%parent_id, "reply parent vanished before notification");
            return;
        },
        Err(err) => {
            tracing::warn!("reply parent lookup failed for {parent_id}: {err:#}");
            return;
        },
    };

    if parent.author_id == reply.author.id {
        return;
    }

    let article = article_ref(store, &reply.article_id).await;
    let (slug, title) = match &article {
        Some(article) => (article.slug.clone(), article.title.clone()),
        None => (reply.article_id.clone(), reply.article_id.clone()),
    };

    let notification = NewNotification {
        recipient_id: parent.author_id.clone(),
        kind: "reply".to_string(),
        title: "New reply to your comment".to_string(),
        message: format!("{} replied on \"{title}\"", reply.author.display_name),
        link: format!("/articles/{slug}#comment-{}", reply.id),
        metadata: serde_json::json!({
            "article_id": reply.article_id,
            "comment_id": reply.id,
            "parent_comment_id": parent_id,
        }),
    };

    match notifications::dispatch(store, &notification).await {
        Some(path) => tracing::debug!(?path, comment_id = %reply.id, "reply notification delivered"),
        None => tracing::warn!(comment_id = %reply.id, "reply notification dropped"),
    }
}

async fn article_ref(store: &StoreClient, article_id: &str) -> Option<ArticleRef> {
    match store
        .select_one::<ArticleRef>("articles", &[eq("id", article_id), select("id,slug,title")])
        .await
    {
        Ok(article) => article,
        Err(err) => {
            tracing::warn!("article lookup failed for {article_id}: {err:#}");
            None
        },
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::{create_comment, derive_display_name, liked_comment_ids, toggle_like, NewCommentInput};
    use crate::auth::Session;
    use crate::config::AppConfig;
    use crate::store::StoreClient;

    fn test_client(base: &str) -> StoreClient {
        StoreClient::new(&AppConfig {
            store_url: base.to_string(),
            anon_key: "anon-key".to_string(),
            service_key: "service-key".to_string(),
            bind_addr: "127.0.0.1".to_string(),
            port: "0".to_string(),
            avatar_bucket: "avatars".to_string(),
            media_bucket: "media".to_string(),
            thumbnail_bucket: "article-thumbnails".to_string(),
        })
        .expect("client")
    }

    fn session(user_id: &str) -> Session {
        Session {
            user_id: user_id.to_string(),
            token: "token".to_string(),
        }
    }

    fn comment_json(id: &str, parent: Option<&str>, author: &str) -> serde_json::Value {
        json!({
            "id": id,
            "article_id": "a1",
            "parent_id": parent,
            "author_id": author,
            "body": "Nice point",
            "like_count": 0,
            "approved": true,
            "created_at": "2024-05-01T12:00:00Z",
            "author": {
                "id": author,
                "display_name": format!("name-{author}"),
                "avatar_url": null,
                "role": "member"
            }
        })
    }

    #[tokio::test]
    async fn author_mismatch_is_rejected_before_any_remote_call() {
        let server = MockServer::start().await;
        let store = test_client(&server.uri());

        let created = create_comment(
            &store,
            &session("u1"),
            NewCommentInput {
                article_id: "a1".to_string(),
                author_id: "someone-else".to_string(),
                body: "hello".to_string(),
                parent_id: None,
            },
        )
        .await
        .expect("call");

        assert!(created.is_none());
        let requests = server.received_requests().await.unwrap_or_default();
        assert!(requests.is_empty(), "no request may reach the store");
    }

    #[tokio::test]
    async fn reply_to_another_author_creates_exactly_one_notification() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/profiles"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "id": "u2", "display_name": "name-u2", "role": "member"
            }])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/comments"))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(json!([comment_json("r1", Some("c1"), "u2")])),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/comments"))
            .and(query_param("id", "eq.r1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([comment_json("r1", Some("c1"), "u2")])),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/comments"))
            .and(query_param("id", "eq.c1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([comment_json("c1", None, "u1")])),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/articles"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "id": "a1", "slug": "hello-world", "title": "Hello World"
            }])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/create-notification"))
            .and(body_partial_json(json!({
                "user_id": "u1",
                "type": "reply",
                "link": "/articles/hello-world#comment-r1"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "n1" })))
            .expect(1)
            .mount(&server)
            .await;

        let store = test_client(&server.uri());
        let created = create_comment(
            &store,
            &session("u2"),
            NewCommentInput {
                article_id: "a1".to_string(),
                author_id: "u2".to_string(),
                body: "Nice point".to_string(),
                parent_id: Some("c1".to_string()),
            },
        )
        .await
        .expect("call")
        .expect("created");

        assert_eq!(created.id, "r1");
        assert_eq!(created.parent_id.as_deref(), Some("c1"));
        server.verify().await;
    }

    #[tokio::test]
    async fn reply_to_own_comment_creates_no_notification() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/profiles"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "id": "u1", "display_name": "name-u1", "role": "member"
            }])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/comments"))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(json!([comment_json("r2", Some("c1"), "u1")])),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/comments"))
            .and(query_param("id", "eq.r2"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([comment_json("r2", Some("c1"), "u1")])),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/comments"))
            .and(query_param("id", "eq.c1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([comment_json("c1", None, "u1")])),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/create-notification"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "n1" })))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/notifications"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
            .expect(0)
            .mount(&server)
            .await;

        let store = test_client(&server.uri());
        let created = create_comment(
            &store,
            &session("u1"),
            NewCommentInput {
                article_id: "a1".to_string(),
                author_id: "u1".to_string(),
                body: "Adding to my own point".to_string(),
                parent_id: Some("c1".to_string()),
            },
        )
        .await
        .expect("call");

        assert!(created.is_some());
        server.verify().await;
    }

    #[tokio::test]
    async fn notification_failure_never_fails_the_comment() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/profiles"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": "u2" }])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/comments"))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(json!([comment_json("r1", Some("c1"), "u2")])),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/comments"))
            .and(query_param("id", "eq.r1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([comment_json("r1", Some("c1"), "u2")])),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/comments"))
            .and(query_param("id", "eq.c1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([comment_json("c1", None, "u1")])),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/articles"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;
        // Both delivery paths down: privileged procedure and direct insert.
        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/create-notification"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/notifications"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let store = test_client(&server.uri());
        let created = create_comment(
            &store,
            &session("u2"),
            NewCommentInput {
                article_id: "a1".to_string(),
                author_id: "u2".to_string(),
                body: "Nice point".to_string(),
                parent_id: Some("c1".to_string()),
            },
        )
        .await
        .expect("call");

        assert!(created.is_some(), "comment creation must survive");
    }

    #[tokio::test]
    async fn toggling_twice_returns_to_the_original_state() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/toggle-comment-like"))
            .and(body_partial_json(json!({ "comment_id": "c1", "user_id": "u1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(true)))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/toggle-comment-like"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(false)))
            .mount(&server)
            .await;

        let store = test_client(&server.uri());
        let caller = session("u1");
        let first = toggle_like(&store, &caller, "c1").await;
        let second = toggle_like(&store, &caller, "c1").await;
        assert_eq!(first, Some(true));
        assert_eq!(second, Some(false));
    }

    #[tokio::test]
    async fn failed_toggle_surfaces_as_no_change() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/toggle-comment-like"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let store = test_client(&server.uri());
        assert_eq!(toggle_like(&store, &session("u1"), "c1").await, None);
    }

    #[tokio::test]
    async fn liked_state_is_read_per_caller() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/comment_likes"))
            .and(query_param("user_id", "eq.u1"))
            .and(query_param("comment_id", "in.(c1,c2)"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "comment_id": "c2", "user_id": "u1" }
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let store = test_client(&server.uri());
        let liked = liked_comment_ids(&store, "u1", &["c1".to_string(), "c2".to_string()])
            .await
            .expect("call");
        assert_eq!(liked, vec!["c2".to_string()]);
        server.verify().await;
    }

    #[tokio::test]
    async fn liked_state_skips_the_store_for_an_empty_tree() {
        let server = MockServer::start().await;
        let store = test_client(&server.uri());
        let liked = liked_comment_ids(&store, "u1", &[]).await.expect("call");
        assert!(liked.is_empty());
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }

    #[test]
    fn derived_display_names_are_stable() {
        assert_eq!(derive_display_name("u1"), derive_display_name("u1"));
        assert_ne!(derive_display_name("u1"), derive_display_name("u2"));
        assert!(derive_display_name("u1").starts_with("Reader-"));
    }
}
