//! Change-feed subscription against the hosted store.
//!
//! One subscription per watched article, on the topic
//! `comments:{article_id}` filtered to the `comments` table. The feed is a
//! server-sent-event stream of `{eventType, new, old}` records. Inserts are
//! re-fetched as single rows (the change payload has no author join) and
//! funneled into the article's feed channel together with deletes. There is
//! no reconnect or backfill: when the stream drops, the live view stops
//! updating until the page resubscribes.

use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use newsdesk_shared::comment_feed::CommentFeedEvent;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::{comments, store::StoreClient};

/// One record off the change feed.
#[derive(Debug, Clone, Deserialize)]
pub struct ChangeRecord {
    #[serde(rename = "eventType")]
    pub event_type: String,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub new: Option<Value>,
    #[serde(default)]
    pub old: Option<Value>,
}

/// Parse one feed payload; anything unparseable is skipped, not fatal.
pub fn parse_change_record(data: &str) -> Option<ChangeRecord> {
    match serde_json::from_str::<ChangeRecord>(data) {
        Ok(record) => Some(record),
        Err(err) => {
            tracing::debug!("skipping unparseable change event: {err}");
            None
        },
    }
}

/// Consume the change feed for one article until it ends or the feed
/// channel closes.
pub(crate) async fn run_comment_listener(
    store: StoreClient,
    article_id: String,
    events: mpsc::Sender<CommentFeedEvent>,
) {
    let url = format!("{}/realtime/v1/subscribe", store.base_url());
    let response = match store
        .http()
        .get(url)
        .header("apikey", store.anon_key())
        .query(&[
            ("topic", format!("comments:{article_id}")),
            ("table", "comments".to_string()),
        ])
        .send()
        .await
    {
        Ok(response) if response.status().is_success() => response,
        Ok(response) => {
            tracing::warn!(status = %response.status(), %article_id, "change feed refused");
            return;
        },
        Err(err) => {
            tracing::warn!(%article_id, "change feed connection failed: {err:#}");
            return;
        },
    };

    let mut stream = response.bytes_stream().eventsource();
    while let Some(event) = stream.next().await {
        let event = match event {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(%article_id, "change feed stream error: {err}");
                break;
            },
        };
        let Some(record) = parse_change_record(&event.data) else {
            continue;
        };
        if record.table.as_deref().is_some_and(|table| table != "comments") {
            continue;
        }

        match record.event_type.as_str() {
            "INSERT" => {
                let Some(id) = row_id(record.new.as_ref()) else {
                    continue;
                };
                match comments::fetch_comment(&store, &id).await {
                    Ok(Some(comment)) if comment.article_id == article_id => {
                        if events
                            .send(CommentFeedEvent::Inserted { comment })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    },
                    Ok(_) => {},
                    Err(err) => {
                        tracing::warn!("change feed re-fetch failed for {id}: {err:#}");
                    },
                }
            },
            "DELETE" => {
                let Some(id) = row_id(record.old.as_ref()) else {
                    continue;
                };
                if events.send(CommentFeedEvent::Removed { id }).await.is_err() {
                    break;
                }
            },
            _ => {},
        }
    }

    tracing::info!(%article_id, "change feed ended");
}

fn row_id(row: Option<&Value>) -> Option<String> {
    row.and_then(|row| row.get("id"))
        .and_then(Value::as_str)
        .map(str::to_string)
}
