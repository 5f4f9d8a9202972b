//! Per-article live comment feeds.
//!
//! Every mutation of an article's rendered comment list goes through one
//! mpsc channel consumed by one task: user-initiated mutation responses
//! (via [`FeedRegistry::publish`]) and change-feed pushes (via the
//! listener) alike. The consumer applies the event to the reduced state
//! and re-broadcasts it to connected pages, so the two event sources can
//! never interleave mid-update.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use anyhow::Result;
use dashmap::{mapref::entry::Entry, DashMap};
use newsdesk_shared::comment_feed::{CommentFeedEvent, CommentFeedState};
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};

use crate::{comments, realtime, store::StoreClient};

const FEED_CHANNEL_CAPACITY: usize = 128;
const BROADCAST_CAPACITY: usize = 64;

/// All live feeds, keyed by article id.
pub struct FeedRegistry {
    feeds: DashMap<String, FeedHandle>,
}

struct FeedHandle {
    events: mpsc::Sender<CommentFeedEvent>,
    broadcast: broadcast::Sender<CommentFeedEvent>,
    subscribers: Arc<AtomicUsize>,
    worker: JoinHandle<()>,
    listener: JoinHandle<()>,
}

/// One page's hold on an article feed. Dropping it releases the feed;
/// the last drop tears down the upstream subscription.
pub struct FeedSubscription {
    events: broadcast::Receiver<CommentFeedEvent>,
    article_id: String,
    registry: Arc<FeedRegistry>,
}

impl FeedSubscription {
    /// Next applied event. `Lagged` means this page missed updates the
    /// broadcast buffer already dropped.
    pub async fn recv(&mut self) -> Result<CommentFeedEvent, broadcast::error::RecvError> {
        self.events.recv().await
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.registry.release(&self.article_id);
    }
}

impl Default for FeedRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedRegistry {
    pub fn new() -> Self {
        Self {
            feeds: DashMap::new(),
        }
    }

    /// Number of articles with a live feed right now.
    pub fn active_feeds(&self) -> usize {
        self.feeds.len()
    }

    /// Funnel a mutation-side event into the article's feed, if one is
    /// live. Pages that are not being watched have no state to update.
    pub async fn publish(&self, article_id: &str, event: CommentFeedEvent) {
        let sender = self
            .feeds
            .get(article_id)
            .map(|handle| handle.events.clone());
        if let Some(sender) = sender {
            if sender.send(event).await.is_err() {
                tracing::warn!(%article_id, "live feed worker is gone");
            }
        }
    }

    /// Join (or start) the live feed for one article. A new feed seeds its
    /// state from a fresh fetch, then spawns the single-writer worker and
    /// the upstream change-feed listener.
    pub async fn subscribe(
        self: Arc<Self>,
        store: &StoreClient,
        article_id: &str,
    ) -> Result<FeedSubscription> {
        let existing = self.feeds.get(article_id).map(|handle| {
            handle.subscribers.fetch_add(1, Ordering::SeqCst);
            handle.broadcast.subscribe()
        });
        if let Some(events) = existing {
            return Ok(FeedSubscription {
                events,
                article_id: article_id.to_string(),
                registry: self,
            });
        }

        let threads = comments::list_article_comments(store, article_id).await?;
        let state = CommentFeedState::from_threads(threads);
        let (events_tx, events_rx) = mpsc::channel(FEED_CHANNEL_CAPACITY);
        let (broadcast_tx, broadcast_rx) = broadcast::channel(BROADCAST_CAPACITY);
        let worker = tokio::spawn(run_feed_worker(state, events_rx, broadcast_tx.clone()));
        let listener = tokio::spawn(realtime::run_comment_listener(
            store.clone(),
            article_id.to_string(),
            events_tx.clone(),
        ));
        let handle = FeedHandle {
            events: events_tx,
            broadcast: broadcast_tx,
            subscribers: Arc::new(AtomicUsize::new(1)),
            worker,
            listener,
        };

        let events = match self.feeds.entry(article_id.to_string()) {
            Entry::Occupied(existing) => {
                // Lost a startup race; join the winner and drop ours.
                handle.worker.abort();
                handle.listener.abort();
                existing.get().subscribers.fetch_add(1, Ordering::SeqCst);
                existing.get().broadcast.subscribe()
            },
            Entry::Vacant(vacant) => {
                vacant.insert(handle);
                broadcast_rx
            },
        };

        Ok(FeedSubscription {
            events,
            article_id: article_id.to_string(),
            registry: self,
        })
    }

    fn release(&self, article_id: &str) {
        let last = self
            .feeds
            .get(article_id)
            .map(|handle| handle.subscribers.fetch_sub(1, Ordering::SeqCst) == 1)
            .unwrap_or(false);
        if last {
            if let Some((_, handle)) = self.feeds.remove(article_id) {
                handle.worker.abort();
                handle.listener.abort();
                tracing::debug!(%article_id, "live feed torn down");
            }
        }
    }
}

async fn run_feed_worker(
    mut state: CommentFeedState,
    mut events: mpsc::Receiver<CommentFeedEvent>,
    broadcast: broadcast::Sender<CommentFeedEvent>,
) {
    while let Some(event) = events.recv().await {
        if state.apply(&event) {
            // A send error only means nobody is listening right now.
            let _ = broadcast.send(event);
        }
    }
}
