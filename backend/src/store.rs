//! HTTP client for the hosted store.
//!
//! Every entity lives in the external service; this client speaks its row
//! API (`/rest/v1/{table}` with query-string filters), its remote
//! procedures (`/rest/v1/rpc/{function}`), and its auth endpoint. Row-level
//! security denials and missing rows are both mapped to "no data" and
//! logged; they are never a distinct user-facing error. Nothing is retried
//! and no timeout is configured; failures surface through the client's own
//! error channel.

use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::config::AppConfig;

/// Identity of the caller as verified by the hosted auth endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Shared handle on the hosted store.
#[derive(Clone)]
pub struct StoreClient {
    inner: Arc<Inner>,
}

struct Inner {
    base_url: String,
    anon_key: String,
    service_key: String,
    client: reqwest::Client,
}

/// Equality filter in the store's query-string syntax.
pub fn eq(column: &str, value: &str) -> (String, String) {
    (column.to_string(), format!("eq.{value}"))
}

/// Membership filter (`column=in.(a,b,c)`) in the store's query syntax.
pub fn in_list(column: &str, values: &[String]) -> (String, String) {
    (column.to_string(), format!("in.({})", values.join(",")))
}

/// Column projection, including embedded joins.
pub fn select(projection: &str) -> (String, String) {
    ("select".to_string(), projection.to_string())
}

/// Ascending/descending sort.
pub fn order(clause: &str) -> (String, String) {
    ("order".to_string(), clause.to_string())
}

impl StoreClient {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("failed to build store http client")?;
        Ok(Self {
            inner: Arc::new(Inner {
                base_url: config.store_url.clone(),
                anon_key: config.anon_key.clone(),
                service_key: config.service_key.clone(),
                client,
            }),
        })
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.inner.client
    }

    pub(crate) fn anon_key(&self) -> &str {
        &self.inner.anon_key
    }

    pub(crate) fn service_key(&self) -> &str {
        &self.inner.service_key
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.inner.base_url)
    }

    fn rpc_url(&self, function: &str) -> String {
        format!("{}/rest/v1/rpc/{function}", self.inner.base_url)
    }

    pub(crate) fn request(&self, method: Method, url: String, privileged: bool) -> RequestBuilder {
        let key = if privileged {
            &self.inner.service_key
        } else {
            &self.inner.anon_key
        };
        self.inner
            .client
            .request(method, url)
            .header("apikey", &self.inner.anon_key)
            .bearer_auth(key)
    }

    /// Fetch all rows matching the filters.
    pub async fn select_rows<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(String, String)],
    ) -> Result<Vec<T>> {
        let response = self
            .request(Method::GET, self.rest_url(table), false)
            .query(query)
            .send()
            .await
            .with_context(|| format!("failed to query table {table}"))?;

        match guard(response, "select", table).await? {
            Some(response) => response
                .json::<Vec<T>>()
                .await
                .with_context(|| format!("failed to decode rows from {table}")),
            None => Ok(Vec::new()),
        }
    }

    /// Fetch at most one row matching the filters.
    pub async fn select_one<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(String, String)],
    ) -> Result<Option<T>> {
        let mut query = query.to_vec();
        query.push(("limit".to_string(), "1".to_string()));
        let rows = self.select_rows(table, &query).await?;
        Ok(rows.into_iter().next())
    }

    /// Insert one row and read back its representation. Returns `None` when
    /// row security rejected the write.
    pub async fn insert_returning<T: DeserializeOwned, B: Serialize>(
        &self,
        table: &str,
        body: &B,
    ) -> Result<Option<T>> {
        let response = self
            .request(Method::POST, self.rest_url(table), false)
            .header("Prefer", "return=representation")
            .json(body)
            .send()
            .await
            .with_context(|| format!("failed to insert into {table}"))?;

        match guard(response, "insert", table).await? {
            Some(response) => {
                let mut rows: Vec<T> = response
                    .json()
                    .await
                    .with_context(|| format!("failed to decode inserted row from {table}"))?;
                Ok(if rows.is_empty() {
                    None
                } else {
                    Some(rows.remove(0))
                })
            },
            None => Ok(None),
        }
    }

    /// Patch rows matching the filters. `false` means the store refused or
    /// found nothing.
    pub async fn patch_rows<B: Serialize>(
        &self,
        table: &str,
        query: &[(String, String)],
        body: &B,
    ) -> Result<bool> {
        let response = self
            .request(Method::PATCH, self.rest_url(table), false)
            .query(query)
            .json(body)
            .send()
            .await
            .with_context(|| format!("failed to update table {table}"))?;
        Ok(guard(response, "update", table).await?.is_some())
    }

    /// Invoke a remote procedure with the caller-level key.
    pub async fn rpc<T: DeserializeOwned, B: Serialize>(
        &self,
        function: &str,
        args: &B,
    ) -> Result<Option<T>> {
        self.rpc_with_privilege(function, args, false).await
    }

    /// Invoke a remote procedure with the service-role key. Used for the
    /// store's privileged routines that bypass per-row authorization.
    pub async fn rpc_privileged<T: DeserializeOwned, B: Serialize>(
        &self,
        function: &str,
        args: &B,
    ) -> Result<Option<T>> {
        self.rpc_with_privilege(function, args, true).await
    }

    async fn rpc_with_privilege<T: DeserializeOwned, B: Serialize>(
        &self,
        function: &str,
        args: &B,
        privileged: bool,
    ) -> Result<Option<T>> {
        let response = self
            .request(Method::POST, self.rpc_url(function), privileged)
            .json(args)
            .send()
            .await
            .with_context(|| format!("failed to call procedure {function}"))?;

        match guard(response, "rpc", function).await? {
            Some(response) => response
                .json::<T>()
                .await
                .map(Some)
                .with_context(|| format!("failed to decode result of {function}")),
            None => Ok(None),
        }
    }

    /// Verify a presented bearer token against the hosted auth endpoint.
    /// Session management itself is delegated; this only reads back the
    /// identity the provider associates with the token.
    pub async fn authed_user(&self, bearer_token: &str) -> Result<Option<AuthUser>> {
        let url = format!("{}/auth/v1/user", self.inner.base_url);
        let response = self
            .inner
            .client
            .get(url)
            .header("apikey", &self.inner.anon_key)
            .bearer_auth(bearer_token)
            .send()
            .await
            .context("failed to call auth endpoint")?;

        match guard(response, "auth", "user").await? {
            Some(response) => response
                .json::<AuthUser>()
                .await
                .map(Some)
                .context("failed to decode auth user"),
            None => Ok(None),
        }
    }
}

/// Map a store response to data / no-data / error per the portal's error
/// taxonomy: 404 and row-security denials are "no data" (logged), anything
/// else non-2xx is a hard failure with a body snippet.
pub(crate) async fn guard(
    response: Response,
    action: &str,
    target: &str,
) -> Result<Option<Response>> {
    let status = response.status();
    if status.is_success() {
        return Ok(Some(response));
    }
    if status == StatusCode::NOT_FOUND
        || status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
    {
        tracing::warn!(%status, action, target, "store returned no data");
        return Ok(None);
    }
    let body = response.text().await.unwrap_or_default();
    anyhow::bail!(
        "store {action} on {target} failed with {status}: {}",
        compact_body(&body)
    )
}

fn compact_body(raw: &str) -> String {
    let compact = raw.trim();
    if compact.chars().count() <= 400 {
        return compact.to_string();
    }
    let head: String = compact.chars().take(400).collect();
    format!("{head}...(truncated)")
}

#[cfg(test)]
mod tests {
    use super::{compact_body, eq, order, select};

    #[test]
    fn eq_filter_uses_store_syntax() {
        assert_eq!(
            eq("article_id", "a-1"),
            ("article_id".to_string(), "eq.a-1".to_string())
        );
    }

    #[test]
    fn select_and_order_build_plain_pairs() {
        assert_eq!(select("*").0, "select");
        assert_eq!(order("created_at.asc").1, "created_at.asc");
    }

    #[test]
    fn in_list_joins_values_in_store_syntax() {
        let (column, value) = super::in_list(
            "comment_id",
            &["c1".to_string(), "c2".to_string()],
        );
        assert_eq!(column, "comment_id");
        assert_eq!(value, "in.(c1,c2)");
    }

    #[test]
    fn long_error_bodies_are_truncated() {
        let long = "x".repeat(1000);
        let compacted = compact_body(&long);
        assert!(compacted.ends_with("...(truncated)"));
        assert!(compacted.chars().count() < 450);
    }
}
