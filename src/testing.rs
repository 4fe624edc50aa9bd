//! Test doubles shared by unit tests

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::core::client::TranslationEndpoint;
use crate::core::errors::{Result, TranslationError};

/// Wrap a translation in the endpoint's envelope shape
pub fn envelope(translation: &str) -> Value {
    json!([[[translation, "", null, null, 10]], null, "ja"])
}

#[derive(Clone)]
enum Scripted {
    Reply(Value),
    Fail,
}

/// In-memory endpoint with canned replies
///
/// Unknown texts are answered with `vi:<text>`.
#[derive(Default)]
pub struct ScriptedEndpoint {
    replies: HashMap<String, Scripted>,
    latency: Duration,
    calls: Mutex<Vec<String>>,
}

impl ScriptedEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, text: &str, translation: &str) -> Self {
        self.replies
            .insert(text.to_string(), Scripted::Reply(envelope(translation)));
        self
    }

    pub fn with_raw(mut self, text: &str, value: Value) -> Self {
        self.replies.insert(text.to_string(), Scripted::Reply(value));
        self
    }

    pub fn failing(mut self, text: &str) -> Self {
        self.replies.insert(text.to_string(), Scripted::Fail);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Texts requested so far, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TranslationEndpoint for ScriptedEndpoint {
    async fn fetch(&self, text: &str) -> Result<Value> {
        self.calls.lock().unwrap().push(text.to_string());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match self.replies.get(text) {
            Some(Scripted::Reply(value)) => Ok(value.clone()),
            Some(Scripted::Fail) => Err(TranslationError::NetworkError {
                message: "connection refused".to_string(),
            }),
            None => Ok(envelope(&format!("vi:{}", text))),
        }
    }
}
