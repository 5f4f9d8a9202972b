//! API handlers for the comment & moderation surface.

use std::convert::Infallible;

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures_util::Stream;
use newsdesk_shared::moderation::{CommentReport, ReportReason, ReportStatus};
use newsdesk_shared::{comment_feed::CommentFeedEvent, Comment, CommentThread, Notification};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{
    auth::{Moderator, Session},
    comments::{self, NewCommentInput},
    moderation_service::{self, ReviewAction},
    notifications,
    state::AppState,
    store::eq,
};

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

#[derive(Debug, Serialize)]
pub struct CommentTreeResponse {
    pub comments: Vec<CommentThread>,
    pub total: usize,
    /// Ids the caller has liked; empty for anonymous readers.
    pub liked_comment_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateCommentRequest {
    pub author_id: String,
    pub body: String,
    #[serde(default)]
    pub parent_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LikeResponse {
    pub comment_id: String,
    pub liked: bool,
}

#[derive(Debug, Deserialize)]
pub struct ReportRequest {
    pub reason: ReportReason,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReportResponse {
    pub report: CommentReport,
    pub delivered_via: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    #[serde(default)]
    pub status: Option<ReportStatus>,
}

#[derive(Debug, Serialize)]
pub struct ReportListResponse {
    pub reports: Vec<CommentReport>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct ReviewResponse {
    pub report: CommentReport,
    pub comment_deleted: bool,
}

#[derive(Debug, Serialize)]
pub struct NotificationListResponse {
    pub notifications: Vec<Notification>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct AvatarResponse {
    pub avatar_url: String,
}

type HandlerError = (StatusCode, Json<ErrorResponse>);

pub async fn list_comments(
    State(state): State<AppState>,
    Path(article_id): Path<String>,
    session: Option<Session>,
) -> Result<Json<CommentTreeResponse>, HandlerError> {
    let comments = comments::list_article_comments(&state.store, &article_id)
        .await
        .map_err(|err| internal_error("Failed to fetch comments", err))?;
    let total = comments.iter().map(|thread| 1 + thread.replies.len()).sum();

    let liked_comment_ids = match &session {
        Some(session) => {
            let ids: Vec<String> = comments
                .iter()
                .flat_map(|thread| {
                    std::iter::once(thread.root.id.clone())
                        .chain(thread.replies.iter().map(|reply| reply.id.clone()))
                })
                .collect();
            comments::liked_comment_ids(&state.store, &session.user_id, &ids)
                .await
                .unwrap_or_else(|err| {
                    tracing::warn!("liked-state lookup failed: {err:#}");
                    Vec::new()
                })
        },
        None => Vec::new(),
    };

    Ok(Json(CommentTreeResponse {
        comments,
        total,
        liked_comment_ids,
    }))
}

pub async fn create_comment(
    State(state): State<AppState>,
    Path(article_id): Path<String>,
    session: Session,
    Json(request): Json<CreateCommentRequest>,
) -> Result<(StatusCode, Json<Comment>), HandlerError> {
    let input = NewCommentInput {
        article_id,
        author_id: request.author_id,
        body: request.body,
        parent_id: request.parent_id,
    };
    match comments::create_comment(&state.store, &session, input).await {
        Ok(Some(comment)) => {
            state
                .feeds
                .publish(&comment.article_id, comments::created_event(&comment))
                .await;
            Ok((StatusCode::CREATED, Json(comment)))
        },
        Ok(None) => Err(failure(StatusCode::FORBIDDEN, "Comment was not accepted")),
        Err(err) => Err(internal_error("Failed to create comment", err)),
    }
}

pub async fn toggle_like(
    State(state): State<AppState>,
    Path(comment_id): Path<String>,
    session: Session,
) -> Result<Json<LikeResponse>, HandlerError> {
    match comments::toggle_like(&state.store, &session, &comment_id).await {
        Some(liked) => Ok(Json(LikeResponse { comment_id, liked })),
        None => Err(failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Like was not recorded",
        )),
    }
}

pub async fn report_comment(
    State(state): State<AppState>,
    Path(comment_id): Path<String>,
    session: Session,
    Json(request): Json<ReportRequest>,
) -> Result<(StatusCode, Json<ReportResponse>), HandlerError> {
    match moderation_service::report_comment(
        &state.store,
        &session,
        &comment_id,
        request.reason,
        request.description,
    )
    .await
    {
        Ok(Some((report, path))) => Ok((
            StatusCode::CREATED,
            Json(ReportResponse {
                report,
                delivered_via: match path {
                    notifications::DeliveryPath::Privileged => "privileged",
                    notifications::DeliveryPath::Direct => "direct",
                },
            }),
        )),
        Ok(None) => Err(failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Report was not recorded",
        )),
        Err(err) => Err(internal_error("Failed to report comment", err)),
    }
}

pub async fn delete_comment(
    State(state): State<AppState>,
    Path(comment_id): Path<String>,
    _moderator: Moderator,
) -> Result<StatusCode, HandlerError> {
    let comment = comments::fetch_comment(&state.store, &comment_id)
        .await
        .map_err(|err| internal_error("Failed to fetch comment", err))?;
    let Some(comment) = comment else {
        return Err(failure(StatusCode::NOT_FOUND, "Comment not found"));
    };

    let deleted = comments::admin_delete_comment(&state.store, &comment_id)
        .await
        .map_err(|err| internal_error("Failed to delete comment", err))?;
    if !deleted {
        return Err(failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Comment was not deleted",
        ));
    }

    state
        .feeds
        .publish(
            &comment.article_id,
            CommentFeedEvent::Removed { id: comment.id },
        )
        .await;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_reports(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
    _moderator: Moderator,
) -> Result<Json<ReportListResponse>, HandlerError> {
    let reports = moderation_service::list_reports(&state.store, query.status)
        .await
        .map_err(|err| internal_error("Failed to fetch reports", err))?;
    let total = reports.len();

    Ok(Json(ReportListResponse { reports, total }))
}

pub async fn review_report(
    State(state): State<AppState>,
    Path(report_id): Path<String>,
    moderator: Moderator,
    Json(action): Json<ReviewAction>,
) -> Result<Json<ReviewResponse>, HandlerError> {
    match moderation_service::review_report(
        &state.store,
        &moderator.session.user_id,
        &report_id,
        action,
    )
    .await
    {
        Ok(Some(outcome)) => {
            let comment_deleted = outcome.deleted_comment.is_some();
            if let Some(comment) = outcome.deleted_comment {
                state
                    .feeds
                    .publish(
                        &comment.article_id,
                        CommentFeedEvent::Removed { id: comment.id },
                    )
                    .await;
            }
            Ok(Json(ReviewResponse {
                report: outcome.report,
                comment_deleted,
            }))
        },
        Ok(None) => Err(failure(
            StatusCode::NOT_FOUND,
            "Report not found or already settled",
        )),
        Err(err) => Err(internal_error("Failed to review report", err)),
    }
}

pub async fn comments_live(
    State(state): State<AppState>,
    Path(article_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, HandlerError> {
    let subscription = state
        .feeds
        .clone()
        .subscribe(&state.store, &article_id)
        .await
        .map_err(|err| internal_error("Failed to open live feed", err))?;

    let stream = async_stream::stream! {
        let mut subscription = subscription;
        loop {
            match subscription.recv().await {
                Ok(event) => match Event::default().event("comment").json_data(&event) {
                    Ok(sse_event) => yield Ok::<Event, Infallible>(sse_event),
                    Err(err) => tracing::warn!("failed to encode feed event: {err}"),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "live feed subscriber lagged");
                },
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

pub async fn list_notifications(
    State(state): State<AppState>,
    session: Session,
) -> Result<Json<NotificationListResponse>, HandlerError> {
    let notifications = notifications::list_for(&state.store, &session.user_id)
        .await
        .map_err(|err| internal_error("Failed to fetch notifications", err))?;
    let total = notifications.len();

    Ok(Json(NotificationListResponse {
        notifications,
        total,
    }))
}

pub async fn mark_notification_read(
    State(state): State<AppState>,
    Path(notification_id): Path<String>,
    session: Session,
) -> Result<StatusCode, HandlerError> {
    let updated = notifications::mark_read(&state.store, &session.user_id, &notification_id)
        .await
        .map_err(|err| internal_error("Failed to update notification", err))?;
    if updated {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(failure(StatusCode::NOT_FOUND, "Notification not found"))
    }
}

pub async fn upload_avatar(
    State(state): State<AppState>,
    session: Session,
    mut multipart: Multipart,
) -> Result<Json<AvatarResponse>, HandlerError> {
    let mut upload = None;
    while let Some(field) = multipart.next_field().await.map_err(|err| {
        tracing::warn!("invalid avatar upload: {err}");
        failure(StatusCode::BAD_REQUEST, "Invalid upload")
    })? {
        if field.name() != Some("file") {
            continue;
        }
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let extension = field
            .file_name()
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_else(|| "bin".to_string());
        let bytes = field.bytes().await.map_err(|err| {
            tracing::warn!("failed to read avatar upload: {err}");
            failure(StatusCode::BAD_REQUEST, "Invalid upload")
        })?;
        upload = Some((bytes, content_type, extension));
        break;
    }
    let Some((bytes, content_type, extension)) = upload else {
        return Err(failure(StatusCode::BAD_REQUEST, "Missing file field"));
    };

    let object_path = format!("{}/{}.{extension}", session.user_id, Uuid::new_v4());
    let url = state
        .store
        .upload_object(&state.config.avatar_bucket, &object_path, bytes, &content_type)
        .await
        .map_err(|err| internal_error("Failed to store avatar", err))?;
    let Some(avatar_url) = url else {
        return Err(failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Avatar was not stored",
        ));
    };

    // Point the profile at the new object; the page re-reads the profile
    // anyway, so a failed patch is logged rather than fatal.
    if let Err(err) = state
        .store
        .patch_rows(
            "profiles",
            &[eq("id", &session.user_id)],
            &serde_json::json!({ "avatar_url": avatar_url }),
        )
        .await
    {
        tracing::warn!("avatar profile patch failed for {}: {err:#}", session.user_id);
    }

    Ok(Json(AvatarResponse { avatar_url }))
}

fn internal_error(message: &str, err: anyhow::Error) -> HandlerError {
    tracing::error!("{message}: {err:#}");
    failure(StatusCode::INTERNAL_SERVER_ERROR, message)
}

fn failure(status: StatusCode, message: &str) -> HandlerError {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
            code: status.as_u16(),
        }),
    )
}
