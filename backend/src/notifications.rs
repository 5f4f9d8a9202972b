//! Notification dispatch and the recipient-facing inbox.
//!
//! Dispatch is a two-stage delivery: the privileged `create-notification`
//! procedure first, then a reduced-privilege direct insert when that path
//! is down. Which path carried the write is recorded so callers and tests
//! can tell them apart. Losing both paths is logged and absorbed; no
//! notification is ever worth failing its surrounding operation.

use anyhow::Result;
use newsdesk_shared::{NewNotification, Notification};
use uuid::Uuid;

use crate::store::{eq, order, StoreClient};

/// Which delivery path carried a privileged write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPath {
    /// The privileged remote procedure.
    Privileged,
    /// The reduced-privilege direct table operation.
    Direct,
}

/// Deliver one notification. `None` means both paths failed.
pub async fn dispatch(store: &StoreClient, notification: &NewNotification) -> Option<DeliveryPath> {
    let args = serde_json::json!({
        "user_id": notification.recipient_id,
        "type": notification.kind,
        "title": notification.title,
        "message": notification.message,
        "link": notification.link,
        "metadata": notification.metadata,
    });
    match store
        .rpc_privileged::<serde_json::Value, _>("create-notification", &args)
        .await
    {
        Ok(Some(_)) => return Some(DeliveryPath::Privileged),
        Ok(None) => {
            tracing::warn!("create-notification refused, trying direct insert");
        },
        Err(err) => {
            tracing::warn!("create-notification failed, trying direct insert: {err:#}");
        },
    }

    let row = serde_json::json!({
        "id": Uuid::new_v4().to_string(),
        "recipient_id": notification.recipient_id,
        "kind": notification.kind,
        "title": notification.title,
        "message": notification.message,
        "link": notification.link,
        "read": false,
        "metadata": notification.metadata,
    });
    match store
        .insert_returning::<Notification, _>("notifications", &row)
        .await
    {
        Ok(Some(_)) => Some(DeliveryPath::Direct),
        Ok(None) => None,
        Err(err) => {
            tracing::warn!("direct notification insert failed: {err:#}");
            None
        },
    }
}

/// The recipient's inbox, newest first.
pub async fn list_for(store: &StoreClient, recipient_id: &str) -> Result<Vec<Notification>> {
    store
        .select_rows(
            "notifications",
            &[eq("recipient_id", recipient_id), order("created_at.desc")],
        )
        .await
}

/// Mark one of the recipient's notifications read. Scoped to the recipient
/// so nobody clears someone else's inbox.
pub async fn mark_read(
    store: &StoreClient,
    recipient_id: &str,
    notification_id: &str,
) -> Result<bool> {
    store
        .patch_rows(
            "notifications",
            &[eq("id", notification_id), eq("recipient_id", recipient_id)],
            &serde_json::json!({ "read": true }),
        )
        .await
}
