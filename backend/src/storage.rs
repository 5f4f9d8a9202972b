//! Object storage buckets on the hosted store.
//!
//! The buckets are plain HTTP: upload yields a public URL, list walks a
//! prefix, remove takes a batch of paths. The backend performs these with
//! the service key on behalf of the signed-in caller.

use anyhow::{Context, Result};
use bytes::Bytes;
use reqwest::{header::CONTENT_TYPE, Method};
use serde::Deserialize;

use crate::store::{guard, StoreClient};

/// One object as returned by a bucket listing.
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectEntry {
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl StoreClient {
    /// Upload bytes to `bucket/path` and return the object's public URL.
    /// `None` means the store refused the write.
    pub async fn upload_object(
        &self,
        bucket: &str,
        path: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<Option<String>> {
        let encoded = encode_object_path(path);
        let url = format!("{}/storage/v1/object/{bucket}/{encoded}", self.base_url());
        let response = self
            .request(Method::POST, url, true)
            .header(CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .with_context(|| format!("failed to upload object to bucket {bucket}"))?;

        match guard(response, "upload", bucket).await? {
            Some(_) => Ok(Some(format!(
                "{}/storage/v1/object/public/{bucket}/{encoded}",
                self.base_url()
            ))),
            None => Ok(None),
        }
    }

    /// List objects under a prefix. Denials come back as an empty list.
    pub async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectEntry>> {
        let url = format!("{}/storage/v1/object/list/{bucket}", self.base_url());
        let body = serde_json::json!({ "prefix": prefix, "limit": 1000 });
        let response = self
            .request(Method::POST, url, true)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("failed to list bucket {bucket}"))?;

        match guard(response, "list", bucket).await? {
            Some(response) => response
                .json::<Vec<ObjectEntry>>()
                .await
                .with_context(|| format!("failed to decode listing of bucket {bucket}")),
            None => Ok(Vec::new()),
        }
    }

    /// Remove a batch of objects. `false` means the store refused.
    pub async fn remove_objects(&self, bucket: &str, paths: &[String]) -> Result<bool> {
        let url = format!("{}/storage/v1/object/{bucket}", self.base_url());
        let body = serde_json::json!({ "prefixes": paths });
        let response = self
            .request(Method::DELETE, url, true)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("failed to remove objects from bucket {bucket}"))?;
        Ok(guard(response, "remove", bucket).await?.is_some())
    }
}

fn encode_object_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::encode_object_path;
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

    #[test]
    fn object_paths_keep_slashes_and_encode_segments() {
        assert_eq!(encode_object_path("u1/pic one.png"), "u1/pic%20one.png");
    }

    #[tokio::test]
    async fn upload_returns_the_public_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/storage/v1/object/avatars/u1/a.png"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let url = client
            .upload_object("avatars", "u1/a.png", bytes::Bytes::from_static(b"img"), "image/png")
            .await
            .expect("upload")
            .expect("url");
        assert_eq!(
            url,
            format!("{}/storage/v1/object/public/avatars/u1/a.png", server.uri())
        );
    }

    #[tokio::test]
    async fn listing_walks_the_prefix() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/storage/v1/object/list/media"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "name": "2024/cover.jpg" },
                { "name": "2024/inline.png" }
            ])))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let entries = client.list_objects("media", "2024/").await.expect("list");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "2024/cover.jpg");
    }

    #[tokio::test]
    async fn removal_sends_the_whole_batch() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/storage/v1/object/media"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let removed = client
            .remove_objects("media", &["2024/cover.jpg".to_string(), "2024/inline.png".to_string()])
            .await
            .expect("remove");
        assert!(removed);
        server.verify().await;
    }

    #[tokio::test]
    async fn refused_upload_is_no_data_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/storage/v1/object/avatars/u1/a.png"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let url = client
            .upload_object("avatars", "u1/a.png", bytes::Bytes::from_static(b"img"), "image/png")
            .await
            .expect("upload call");
        assert!(url.is_none());
    }
}
