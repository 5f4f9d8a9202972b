//! Abuse reporting and the moderator review workflow.
//!
//! Reports go through the same two-stage delivery as notifications: the
//! privileged `report-comment` procedure (which may emit its own
//! notification) first, then a plain insert without that side effect.
//! Review transitions are validated locally before any remote call, and
//! resolve-with-delete is two remote calls that are deliberately not
//! atomic: a failure between them leaves the report resolved and the
//! comment standing.

use anyhow::Result;
use chrono::Utc;
use newsdesk_shared::moderation::{
    validate_transition, CommentReport, ReportReason, ReportStatus,
};
use newsdesk_shared::Comment;
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    auth::Session,
    comments,
    notifications::DeliveryPath,
    store::{eq, order, StoreClient},
};

/// What a moderator decided for one report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ReviewAction {
    Resolve {
        #[serde(default)]
        delete_comment: bool,
    },
    Dismiss,
}

/// Result of a review: the updated report, plus the comment that was
/// deleted alongside it, when the action asked for that and it succeeded.
#[derive(Debug, Clone)]
pub struct ReviewOutcome {
    pub report: CommentReport,
    pub deleted_comment: Option<Comment>,
}

/// File a report against a comment. Returns the stored report and the
/// delivery path that carried it; `None` when the store refused both
/// paths.
pub async fn report_comment(
    store: &StoreClient,
    session: &Session,
    comment_id: &str,
    reason: ReportReason,
    description: Option<String>,
) -> Result<Option<(CommentReport, DeliveryPath)>> {
    let description = description
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty());

    let args = serde_json::json!({
        "comment_id": comment_id,
        "reporter_id": session.user_id,
        "reason": reason.as_str(),
        "description": description,
    });
    match store
        .rpc_privileged::<CommentReport, _>("report-comment", &args)
        .await
    {
        Ok(Some(report)) => return Ok(Some((report, DeliveryPath::Privileged))),
        Ok(None) => tracing::warn!("report-comment refused, trying direct insert"),
        Err(err) => tracing::warn!("report-comment failed, trying direct insert: {err:#}"),
    }

    // Reduced-privilege path: the row lands, the procedure's notification
    // side effect does not.
    let row = serde_json::json!({
        "id": Uuid::new_v4().to_string(),
        "comment_id": comment_id,
        "reporter_id": session.user_id,
        "reason": reason.as_str(),
        "description": description,
        "status": ReportStatus::Pending.as_str(),
    });
    let inserted = store
        .insert_returning::<CommentReport, _>("comment_reports", &row)
        .await?;
    Ok(inserted.map(|report| (report, DeliveryPath::Direct)))
}

/// The moderation queue, newest first, optionally narrowed to one status.
pub async fn list_reports(
    store: &StoreClient,
    status: Option<ReportStatus>,
) -> Result<Vec<CommentReport>> {
    let mut query = vec![order("created_at.desc")];
    if let Some(status) = status {
        query.push(eq("status", status.as_str()));
    }
    store.select_rows("comment_reports", &query).await
}

/// Apply a moderator's decision. Returns `None` when the report is missing
/// or the transition is not allowed (reviews are one-way; nothing returns
/// to pending).
pub async fn review_report(
    store: &StoreClient,
    moderator_id: &str,
    report_id: &str,
    action: ReviewAction,
) -> Result<Option<ReviewOutcome>> {
    let Some(report) = store
        .select_one::<CommentReport>("comment_reports", &[eq("id", report_id)])
        .await?
    else {
        return Ok(None);
    };

    let next = match action {
        ReviewAction::Resolve { .. } => ReportStatus::Resolved,
        ReviewAction::Dismiss => ReportStatus::Dismissed,
    };
    if let Err(err) = validate_transition(report.status, next) {
        tracing::warn!(%report_id, "review rejected: {err}");
        return Ok(None);
    }

    let Some(updated) = update_status(store, report_id, next, moderator_id).await? else {
        return Ok(None);
    };

    let mut deleted_comment = None;
    if matches!(
        action,
        ReviewAction::Resolve {
            delete_comment: true
        }
    ) {
        // Second remote call, issued only after the status update landed.
        // If it fails the report stays resolved and the comment stays up;
        // that inconsistency is documented, not retried.
        deleted_comment = delete_reported_comment(store, &report.comment_id).await;
    }

    Ok(Some(ReviewOutcome {
        report: updated,
        deleted_comment,
    }))
}

async fn update_status(
    store: &StoreClient,
    report_id: &str,
    next: ReportStatus,
    reviewer_id: &str,
) -> Result<Option<CommentReport>> {
    let args = serde_json::json!({
        "report_id": report_id,
        "status": next.as_str(),
        "reviewer_id": reviewer_id,
    });
    match store
        .rpc_privileged::<CommentReport, _>("update-report-status", &args)
        .await
    {
        Ok(Some(report)) => return Ok(Some(report)),
        Ok(None) => tracing::warn!("update-report-status refused, trying direct update"),
        Err(err) => tracing::warn!("update-report-status failed, trying direct update: {err:#}"),
    }

    let patch = serde_json::json!({
        "status": next.as_str(),
        "reviewed_by": reviewer_id,
        "reviewed_at": Utc::now(),
    });
    if store
        .patch_rows("comment_reports", &[eq("id", report_id)], &patch)
        .await?
    {
        store
            .select_one("comment_reports", &[eq("id", report_id)])
            .await
    } else {
        Ok(None)
    }
}

async fn delete_reported_comment(store: &StoreClient, comment_id: &str) -> Option<Comment> {
    let comment = match comments::fetch_comment(store, comment_id).await {
        Ok(comment) => comment,
        Err(err) => {
            tracing::warn!("reported comment lookup failed for {comment_id}: {err:#}");
            None
        },
    };

    match comments::admin_delete_comment(store, comment_id).await {
        Ok(true) => comment,
        Ok(false) => {
            tracing::warn!(%comment_id, "comment survived resolve-with-delete");
            None
        },
        Err(err) => {
            tracing::warn!("comment delete after resolve failed for {comment_id}: {err:#}");
            None
        },
    }
}
