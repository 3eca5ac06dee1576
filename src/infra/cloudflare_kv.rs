//! Cloudflare Workers KV over its REST API.
//!
//! KV refuses expirations shorter than 60 seconds, so short-lived entries are
//! stored for at least that long; freshness is still decided by the entry's
//! own `_cachedAt`/`_ttl` stamp.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Response, StatusCode, Url};
use tracing::debug;

use crate::cache::kv::{KvError, KvStore};
use crate::config::CloudflareSettings;
use crate::infra::error::InfraError;

const MIN_EXPIRATION_TTL_SECS: u64 = 60;

pub struct CloudflareKv {
    http: Client,
    api_base: Url,
    account_id: String,
    namespace_id: String,
    api_token: String,
}

impl CloudflareKv {
    pub fn new(settings: &CloudflareSettings, user_agent: &str) -> Result<Self, InfraError> {
        let http = Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(InfraError::http_client)?;
        Ok(Self {
            http,
            api_base: settings.api_base.clone(),
            account_id: settings.account_id.clone(),
            namespace_id: settings.namespace_id.clone(),
            api_token: settings.api_token.clone(),
        })
    }

    fn value_url(&self, key: &str) -> Result<Url, KvError> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| KvError::InvalidKey(key.to_string()))?
            .pop_if_empty()
            .extend([
                "accounts",
                self.account_id.as_str(),
                "storage",
                "kv",
                "namespaces",
                self.namespace_id.as_str(),
                "values",
                key,
            ]);
        Ok(url)
    }

    async fn failure(response: Response) -> KvError {
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        KvError::Status { status, message }
    }
}

#[async_trait]
impl KvStore for CloudflareKv {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, KvError> {
        let response = self
            .http
            .get(self.value_url(key)?)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(KvError::transport)?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response
                .bytes()
                .await
                .map(Some)
                .map_err(KvError::transport),
            _ => Err(Self::failure(response).await),
        }
    }

    async fn put(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), KvError> {
        let expiration_ttl = ttl.as_secs().max(MIN_EXPIRATION_TTL_SECS);
        let mut url = self.value_url(key)?;
        url.query_pairs_mut()
            .append_pair("expiration_ttl", &expiration_ttl.to_string());

        let response = self
            .http
            .put(url)
            .bearer_auth(&self.api_token)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(value)
            .send()
            .await
            .map_err(KvError::transport)?;

        if !response.status().is_success() {
            return Err(Self::failure(response).await);
        }
        debug!(key, expiration_ttl, "Stored value in Cloudflare KV");
        Ok(())
    }

    /// KV deletes are idempotent and do not say whether a value existed, so
    /// presence is checked first.
    async fn delete(&self, key: &str) -> Result<bool, KvError> {
        let existed = self.get(key).await?.is_some();

        let response = self
            .http
            .delete(self.value_url(key)?)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(KvError::transport)?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(existed),
            _ => Err(Self::failure(response).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;

    use super::*;

    const VALUES: &str = "/client/v4/accounts/acct/storage/kv/namespaces/ns/values";

    fn store(server: &MockServer) -> CloudflareKv {
        let settings = CloudflareSettings {
            api_base: Url::parse(&server.url("/client/v4/")).expect("base"),
            account_id: "acct".to_string(),
            namespace_id: "ns".to_string(),
            api_token: "cf-token".to_string(),
        };
        CloudflareKv::new(&settings, "marginalia-test").expect("store")
    }

    #[tokio::test]
    async fn get_reads_raw_value_and_maps_404_to_none() {
        let server = MockServer::start_async().await;
        let hit = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path(format!("{VALUES}/present"))
                    .header("authorization", "Bearer cf-token");
                then.status(200).body(r#"{"discussionId":null}"#);
            })
            .await;
        let miss = server
            .mock_async(|when, then| {
                when.method(GET).path(format!("{VALUES}/absent"));
                then.status(404)
                    .body(r#"{"success":false,"errors":[{"code":10009}]}"#);
            })
            .await;

        let kv = store(&server);
        let value = kv.get("present").await.expect("get");
        assert_eq!(value.as_deref(), Some(br#"{"discussionId":null}"#.as_slice()));
        assert!(kv.get("absent").await.expect("get").is_none());

        hit.assert_async().await;
        miss.assert_async().await;
    }

    #[tokio::test]
    async fn put_raises_short_ttls_to_the_kv_minimum() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path(format!("{VALUES}/short"))
                    .query_param("expiration_ttl", "60")
                    .body("payload");
                then.status(200).body(r#"{"success":true}"#);
            })
            .await;

        let kv = store(&server);
        kv.put("short", Bytes::from_static(b"payload"), Duration::from_secs(5))
            .await
            .expect("put");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn server_errors_surface_as_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(PUT).path(format!("{VALUES}/broken"));
                then.status(500).body("boom");
            })
            .await;

        let kv = store(&server);
        let err = kv
            .put("broken", Bytes::from_static(b"x"), Duration::from_secs(300))
            .await
            .expect_err("500 should fail");
        assert!(matches!(err, KvError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn delete_reports_prior_presence() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path(format!("{VALUES}/gone"));
                then.status(404);
            })
            .await;
        let removed = server
            .mock_async(|when, then| {
                when.method(DELETE).path(format!("{VALUES}/gone"));
                then.status(200).body(r#"{"success":true}"#);
            })
            .await;

        let kv = store(&server);
        assert!(!kv.delete("gone").await.expect("delete"));
        removed.assert_async().await;
    }
}
