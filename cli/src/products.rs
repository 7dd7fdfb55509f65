use reqwest::Method;
use std::collections::HashMap;
use tracing::debug;

use crate::agent_types::ProductRecord;
use crate::error::Result;
use crate::http_client::{decode_json, encode_segment, Client};

/// Last-known product records, keyed by uid.
///
/// Entries are dropped with [`ProductCache::invalidate`] whenever a mutating
/// request is sent for that uid.
#[derive(Debug, Default)]
pub struct ProductCache {
    records: HashMap<String, ProductRecord>,
}

impl ProductCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached record, or a fresh `GET /game/{uid}`. Any non-200 means the
    /// agent does not know the product, which is not an error.
    pub async fn get(&mut self, client: &Client, uid: &str) -> Result<Option<ProductRecord>> {
        if let Some(record) = self.records.get(uid) {
            return Ok(Some(record.clone()));
        }

        let path = format!("/game/{}", encode_segment(uid));
        let (status, bytes) = client.send(Method::GET, &path, None).await?;
        if status.as_u16() != 200 {
            debug!(uid, %status, "product unknown to agent");
            return Ok(None);
        }

        let record = ProductRecord::from_value(uid, decode_json(&path, &bytes)?);
        self.records.insert(uid.to_string(), record.clone());
        Ok(Some(record))
    }

    pub async fn is_initialized(&mut self, client: &Client, uid: &str) -> Result<bool> {
        Ok(self.get(client, uid).await?.is_some())
    }

    pub async fn is_installed(&mut self, client: &Client, uid: &str) -> Result<bool> {
        Ok(self
            .get(client, uid)
            .await?
            .map(|r| r.installed)
            .unwrap_or(false))
    }

    pub async fn has_pending_update(&mut self, client: &Client, uid: &str) -> Result<bool> {
        Ok(self
            .get(client, uid)
            .await?
            .map(|r| r.has_pending_update())
            .unwrap_or(false))
    }

    pub fn invalidate(&mut self, uid: &str) {
        if self.records.remove(uid).is_some() {
            debug!(uid, "dropped cached product record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::AgentEndpoint;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client(server: &MockServer) -> Client {
        Client::new(
            &AgentEndpoint {
                host: server.host(),
                port: server.port(),
            },
            None,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn unknown_product_resolves_to_absent() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/game/nope");
                then.status(404).body("not found");
            })
            .await;

        let client = client(&server);
        let mut cache = ProductCache::new();
        assert_eq!(cache.get(&client, "nope").await.unwrap(), None);
        assert!(!cache.is_initialized(&client, "nope").await.unwrap());
        assert!(!cache.is_installed(&client, "nope").await.unwrap());
        assert!(!cache.has_pending_update(&client, "nope").await.unwrap());
    }

    #[tokio::test]
    async fn records_are_served_from_cache_until_invalidated() {
        let server = MockServer::start_async().await;
        let game = server
            .mock_async(|when, then| {
                when.method(GET).path("/game/d3");
                then.status(200).json_body(json!({
                    "installed": true,
                    "download_complete": false,
                    "install_dir": "C:/Games/Diablo III"
                }));
            })
            .await;

        let client = client(&server);
        let mut cache = ProductCache::new();
        assert!(cache.is_installed(&client, "d3").await.unwrap());
        assert!(cache.has_pending_update(&client, "d3").await.unwrap());
        game.assert_hits_async(1).await;

        cache.invalidate("d3");
        assert!(cache.is_initialized(&client, "d3").await.unwrap());
        game.assert_hits_async(2).await;
    }

    #[tokio::test]
    async fn absent_products_are_not_cached() {
        let server = MockServer::start_async().await;
        let game = server
            .mock_async(|when, then| {
                when.method(GET).path("/game/wow_enus");
                then.status(404);
            })
            .await;

        let client = client(&server);
        let mut cache = ProductCache::new();
        assert!(!cache.is_initialized(&client, "wow_enus").await.unwrap());
        assert!(!cache.is_initialized(&client, "wow_enus").await.unwrap());
        game.assert_hits_async(2).await;
    }
}
