use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::config::SinkConfig;
use crate::traits::{PublishSink, SentinelResult};

const SOURCE_TAG: &str = "csi-sentinel";
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    new_blob: Option<BlobRef>,
    already_certified: Option<BlobRef>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlobRef {
    blob_id: Option<String>,
}

impl PublishResponse {
    fn blob_id(self) -> Option<String> {
        self.new_blob
            .and_then(|b| b.blob_id)
            .or_else(|| self.already_certified.and_then(|b| b.blob_id))
    }
}

/// Publishes records as Walrus blobs
pub struct WalrusSink {
    client: reqwest::Client,
    publisher_url: String,
    aggregator_url: String,
    epochs: u32,
    network: String,
}

impl WalrusSink {
    pub fn new(config: &SinkConfig) -> SentinelResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            publisher_url: config.publisher_url.trim_end_matches('/').to_string(),
            aggregator_url: config.aggregator_url.trim_end_matches('/').to_string(),
            epochs: config.epochs,
            network: config.network.clone(),
        })
    }

    fn envelope(&self, record: Value, kind: &str) -> Value {
        json!({
            "type": kind,
            "data": record,
            "system_metadata": {
                "source": SOURCE_TAG,
                "timestamp": Utc::now().to_rfc3339(),
                "network": self.network,
            }
        })
    }

    async fn try_publish(&self, record: Value, kind: &str) -> SentinelResult<Option<String>> {
        let url = format!("{}/v1/blobs", self.publisher_url);
        let body = serde_json::to_vec(&self.envelope(record, kind))?;

        let response = self
            .client
            .put(&url)
            .query(&[("epochs", self.epochs)])
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK && status != reqwest::StatusCode::CREATED {
            let text = response.text().await.unwrap_or_default();
            error!("Failed to publish {} blob: {} - {}", kind, status, text);
            return Ok(None);
        }

        let parsed: PublishResponse = response.json().await?;
        Ok(parsed.blob_id())
    }
}

#[async_trait]
impl PublishSink for WalrusSink {
    async fn publish(&self, record: Value, kind: &str) -> Option<String> {
        match self.try_publish(record, kind).await {
            Ok(Some(blob_id)) => {
                info!("Published {} blob: {}", kind, blob_id);
                Some(blob_id)
            }
            Ok(None) => None,
            Err(e) => {
                error!("Blob publication error: {}", e);
                None
            }
        }
    }

    async fn retrieve(&self, external_id: &str) -> Option<Value> {
        let url = format!("{}/v1/blobs/{}", self.aggregator_url, external_id);
        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                error!("Blob read error: {}", e);
                return None;
            }
        };

        if !response.status().is_success() {
            error!("Failed to read blob {}: {}", external_id, response.status());
            return None;
        }

        match response.json::<Value>().await {
            Ok(value) => Some(value),
            Err(e) => {
                error!("Blob {} is not valid JSON: {}", external_id, e);
                None
            }
        }
    }
}

/// Sink used when durable publication is switched off
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledSink;

#[async_trait]
impl PublishSink for DisabledSink {
    async fn publish(&self, _record: Value, kind: &str) -> Option<String> {
        debug!("Sink disabled, not publishing {}", kind);
        None
    }

    async fn retrieve(&self, _external_id: &str) -> Option<Value> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(value: Value) -> Option<String> {
        serde_json::from_value::<PublishResponse>(value)
            .unwrap()
            .blob_id()
    }

    #[test]
    fn test_blob_id_from_new_blob() {
        assert_eq!(
            parse(json!({"newBlob": {"blobId": "abc"}})),
            Some("abc".to_string())
        );
    }

    #[test]
    fn test_blob_id_from_already_certified() {
        assert_eq!(
            parse(json!({"alreadyCertified": {"blobId": "xyz", "endEpoch": 9}})),
            Some("xyz".to_string())
        );
    }

    #[test]
    fn test_blob_id_missing() {
        assert_eq!(parse(json!({"unexpected": true})), None);
    }

    #[test]
    fn test_envelope_shape() {
        let sink = WalrusSink::new(&SinkConfig::default()).unwrap();
        let envelope = sink.envelope(json!({"label": "Fall"}), "event");
        assert_eq!(envelope["type"], "event");
        assert_eq!(envelope["data"]["label"], "Fall");
        assert_eq!(envelope["system_metadata"]["source"], SOURCE_TAG);
        assert_eq!(envelope["system_metadata"]["network"], "testnet");
    }

    #[tokio::test]
    async fn test_unreachable_publisher_yields_none() {
        let config = SinkConfig {
            publisher_url: "http://127.0.0.1:9/".to_string(),
            aggregator_url: "http://127.0.0.1:9".to_string(),
            ..SinkConfig::default()
        };
        let sink = WalrusSink::new(&config).unwrap();
        assert_eq!(sink.publish(json!({}), "event").await, None);
        assert_eq!(sink.retrieve("abc").await, None);
    }

    #[tokio::test]
    async fn test_disabled_sink() {
        assert_eq!(DisabledSink.publish(json!({}), "event").await, None);
        assert_eq!(DisabledSink.retrieve("abc").await, None);
    }
}
