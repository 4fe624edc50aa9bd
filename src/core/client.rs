//! Single-flight translation client

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

use crate::core::config::TranslatorConfig;
use crate::core::errors::{Result, TranslationError};
use crate::core::models::TranslationRequest;

/// The remote translation primitive
#[async_trait]
pub trait TranslationEndpoint: Send + Sync {
    /// Fetch the raw response envelope for `text`
    async fn fetch(&self, text: &str) -> Result<serde_json::Value>;
}

/// `translate_a/single` style HTTP endpoint
#[derive(Debug, Clone)]
pub struct HttpEndpoint {
    client: reqwest::Client,
    config: Arc<TranslatorConfig>,
}

impl HttpEndpoint {
    pub fn new(config: Arc<TranslatorConfig>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .pool_idle_timeout(Some(Duration::from_secs(30)))
            .build()?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl TranslationEndpoint for HttpEndpoint {
    async fn fetch(&self, text: &str) -> Result<serde_json::Value> {
        let response = self
            .client
            .get(&self.config.api_endpoint)
            .query(&[
                ("client", "gtx"),
                ("sl", self.config.source_lang.as_str()),
                ("tl", self.config.target_lang.as_str()),
                ("dt", "t"),
                ("q", text),
            ])
            .send()
            .await
            .map_err(|e| TranslationError::NetworkError {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(TranslationError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|e| TranslationError::InvalidResponseError {
                message: e.to_string(),
            })
    }
}

/// First translated segment of a `[[["translated", "source", ...], ...], ...]` envelope
pub fn extract_translation(envelope: &serde_json::Value) -> Option<&str> {
    envelope.get(0)?.get(0)?.get(0)?.as_str()
}

/// Translation client that keeps at most one request in flight
///
/// Every call supersedes the previous one: the older call resolves to
/// [`TranslationError::Aborted`] and its response is never handed out.
pub struct TranslationClient {
    endpoint: Arc<dyn TranslationEndpoint>,
    in_flight: Mutex<Option<TranslationRequest>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for TranslationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslationClient")
            .field("in_flight", &self.in_flight_id())
            .finish()
    }
}

impl TranslationClient {
    /// Create a client over any endpoint
    pub fn new(endpoint: Arc<dyn TranslationEndpoint>) -> Self {
        Self {
            endpoint,
            in_flight: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a client talking HTTP with the given configuration
    pub fn from_config(config: Arc<TranslatorConfig>) -> Result<Self> {
        Ok(Self::new(Arc::new(HttpEndpoint::new(config)?)))
    }

    fn slot(&self) -> MutexGuard<'_, Option<TranslationRequest>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Id of the outstanding request, if any
    pub fn in_flight_id(&self) -> Option<u64> {
        self.slot().as_ref().map(|r| r.id)
    }

    /// Cancel the outstanding request, if any
    pub fn abort(&self) {
        if let Some(request) = self.slot().take() {
            debug!("Aborting translation request {}", request.id);
            request.token.cancel();
        }
    }

    /// Translate `text`, falling back to the original on any failure
    /// other than cancellation.
    pub async fn translate(&self, text: &str) -> Result<String> {
        let request = self.supersede(text);

        let response = tokio::select! {
            biased;
            _ = request.token.cancelled() => None,
            response = self.endpoint.fetch(&request.text) => Some(response),
        };
        self.release(request.id);

        let response = match response {
            Some(response) if !request.token.is_cancelled() => response,
            _ => {
                debug!("Translation request {} aborted", request.id);
                return Err(TranslationError::Aborted);
            }
        };

        match response {
            Ok(envelope) => match extract_translation(&envelope) {
                Some(translation) => Ok(translation.to_string()),
                None => {
                    warn!("Translation response had no usable segment, keeping original");
                    Ok(text.to_string())
                }
            },
            Err(TranslationError::Aborted) => Err(TranslationError::Aborted),
            Err(e) => {
                warn!("Translation unavailable, keeping original: {}", e);
                Ok(text.to_string())
            }
        }
    }

    /// Install a new request, cancelling whatever was outstanding
    fn supersede(&self, text: &str) -> TranslationRequest {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = TranslationRequest::new(id, text);
        let previous = self.slot().replace(request.clone());
        if let Some(previous) = previous {
            debug!("Request {} superseded by {}", previous.id, id);
            previous.token.cancel();
        }
        request
    }

    fn release(&self, id: u64) {
        let mut slot = self.slot();
        if slot.as_ref().map(|r| r.id) == Some(id) {
            *slot = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedEndpoint;
    use serde_json::json;

    #[test]
    fn test_extract_translation() {
        let value = json!([[["xin chào", "こんにちは", null, null, 10]], null, "ja"]);
        assert_eq!(extract_translation(&value), Some("xin chào"));
        assert_eq!(extract_translation(&json!({"error": "nope"})), None);
        assert_eq!(extract_translation(&json!([[]])), None);
        assert_eq!(extract_translation(&json!([[[42]]])), None);
    }

    #[tokio::test]
    async fn test_translate_success() {
        let endpoint = ScriptedEndpoint::new().with("こんにちは", "xin chào").build();
        let client = TranslationClient::new(endpoint.clone());

        let result = client.translate("こんにちは").await;
        assert_eq!(tokio_test::assert_ok!(result), "xin chào");
        assert_eq!(endpoint.calls(), vec!["こんにちは".to_string()]);
        assert_eq!(client.in_flight_id(), None);
    }

    #[tokio::test]
    async fn test_malformed_payload_returns_original() {
        let endpoint = ScriptedEndpoint::new()
            .with_raw("壊れた", json!({"sentences": []}))
            .build();
        let client = TranslationClient::new(endpoint);

        assert_eq!(client.translate("壊れた").await.unwrap(), "壊れた");
    }

    #[tokio::test]
    async fn test_network_failure_returns_original() {
        let endpoint = ScriptedEndpoint::new().failing("東京").build();
        let client = TranslationClient::new(endpoint);

        assert_eq!(client.translate("東京").await.unwrap(), "東京");
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_request_supersedes_first() {
        let endpoint = ScriptedEndpoint::new()
            .with("一", "một")
            .with("二", "hai")
            .with_latency(Duration::from_millis(100))
            .build();
        let client = Arc::new(TranslationClient::new(endpoint.clone()));

        let first = tokio::spawn({
            let client = client.clone();
            async move { client.translate("一").await }
        });
        tokio::task::yield_now().await;
        assert!(client.in_flight_id().is_some());

        let second = client.translate("二").await.unwrap();
        assert_eq!(second, "hai");

        let first = first.await.unwrap();
        assert!(matches!(first, Err(TranslationError::Aborted)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_cancels_outstanding_request() {
        let endpoint = ScriptedEndpoint::new()
            .with("猫", "mèo")
            .with_latency(Duration::from_secs(5))
            .build();
        let client = Arc::new(TranslationClient::new(endpoint));

        let pending = tokio::spawn({
            let client = client.clone();
            async move { client.translate("猫").await }
        });
        tokio::task::yield_now().await;
        client.abort();

        assert!(pending.await.unwrap().unwrap_err().is_aborted());
        assert_eq!(client.in_flight_id(), None);
    }

    #[test]
    fn test_http_endpoint_creation() {
        let config = Arc::new(TranslatorConfig::default());
        assert!(TranslationClient::from_config(config).is_ok());
    }
}
