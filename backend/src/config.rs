use std::env;

use anyhow::{Context, Result};
use url::Url;

const DEFAULT_AVATAR_BUCKET: &str = "avatars";
const DEFAULT_MEDIA_BUCKET: &str = "media";
const DEFAULT_THUMBNAIL_BUCKET: &str = "article-thumbnails";

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Base URL of the hosted store, e.g. `https://project.example.co`.
    pub store_url: String,
    /// Public (anon) API key, sent on every request.
    pub anon_key: String,
    /// Service-role key for privileged remote procedures.
    pub service_key: String,
    pub bind_addr: String,
    pub port: String,
    pub avatar_bucket: String,
    pub media_bucket: String,
    pub thumbnail_bucket: String,
}

impl AppConfig {
    /// Read configuration from the environment. The store URL and both keys
    /// are required; everything else has a default.
    pub fn from_env() -> Result<Self> {
        let store_url = env::var("NEWSDESK_STORE_URL")
            .context("NEWSDESK_STORE_URL is required")?
            .trim()
            .trim_end_matches('/')
            .to_string();
        if store_url.is_empty() {
            anyhow::bail!("NEWSDESK_STORE_URL must not be empty");
        }
        Url::parse(&store_url)
            .with_context(|| format!("invalid NEWSDESK_STORE_URL: {store_url}"))?;
        let anon_key = required_env("NEWSDESK_ANON_KEY")?;
        let service_key = required_env("NEWSDESK_SERVICE_KEY")?;

        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT").unwrap_or_else(|_| "3000".to_string());
        let avatar_bucket = optional_env("NEWSDESK_AVATAR_BUCKET", DEFAULT_AVATAR_BUCKET);
        let media_bucket = optional_env("NEWSDESK_MEDIA_BUCKET", DEFAULT_MEDIA_BUCKET);
        let thumbnail_bucket = optional_env("NEWSDESK_THUMBNAIL_BUCKET", DEFAULT_THUMBNAIL_BUCKET);

        Ok(Self {
            store_url,
            anon_key,
            service_key,
            bind_addr,
            port,
            avatar_bucket,
            media_bucket,
            thumbnail_bucket,
        })
    }
}

fn required_env(key: &str) -> Result<String> {
    let value = env::var(key).with_context(|| format!("{key} is required"))?;
    let value = value.trim().to_string();
    if value.is_empty() {
        anyhow::bail!("{key} must not be empty");
    }
    Ok(value)
}

fn optional_env(key: &str, default_value: &str) -> String {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default_value.to_string())
}
