use std::sync::Arc;

use anyhow::Result;

use crate::{config::AppConfig, feed::FeedRegistry, store::StoreClient};

/// Shared handles every handler needs.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: StoreClient,
    pub feeds: Arc<FeedRegistry>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Result<Self> {
        let store = StoreClient::new(&config)?;
        Ok(Self {
            config: Arc::new(config),
            store,
            feeds: Arc::new(FeedRegistry::new()),
        })
    }
}
