//! Live page sessions hosted by the HTTP service

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::core::client::{TranslationClient, TranslationEndpoint};
use crate::core::config::TranslatorConfig;
use crate::core::errors::Result;
use crate::core::models::ControlMessage;
use crate::engine::scheduler::Scheduler;
use crate::processors::html::parse_document;

/// What happened to an activation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// The start message was delivered
    Dispatched,
    /// A previous activation is still being delivered
    Busy,
    /// The page is gone
    Closed,
}

/// Host-side activation control
///
/// Rapid repeated activations are dropped while one is being delivered.
#[derive(Debug)]
pub struct ActivationTrigger {
    busy: AtomicBool,
    messages: mpsc::Sender<ControlMessage>,
}

impl ActivationTrigger {
    pub fn new(messages: mpsc::Sender<ControlMessage>) -> Self {
        Self {
            busy: AtomicBool::new(false),
            messages,
        }
    }

    pub async fn activate(&self) -> Activation {
        if self.busy.swap(true, Ordering::SeqCst) {
            debug!("Activation already in progress, ignoring");
            return Activation::Busy;
        }
        // Released on every exit, including a dropped future
        let _busy = BusyGuard(&self.busy);

        match self.messages.send(ControlMessage::StartTranslation).await {
            Ok(()) => Activation::Dispatched,
            Err(_) => Activation::Closed,
        }
    }
}

struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// One hosted document with its scheduler
#[derive(Debug)]
pub struct PageSession {
    pub id: String,
    pub created_at: DateTime<Utc>,
    scheduler: Arc<Scheduler>,
    trigger: ActivationTrigger,
}

impl PageSession {
    /// Load `html` and wire a scheduler to it. Translation waits for activation.
    pub fn open(
        id: String,
        html: &str,
        url: &str,
        config: Arc<TranslatorConfig>,
        endpoint: Arc<dyn TranslationEndpoint>,
    ) -> Result<Self> {
        let document = parse_document(html, url);
        let client = Arc::new(TranslationClient::new(endpoint));
        let scheduler = Scheduler::spawn(config, document, client)?;

        let (tx, mut rx) = mpsc::channel(1);
        let receiver = scheduler.clone();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                receiver.handle_message(message);
            }
        });

        Ok(Self {
            id,
            created_at: Utc::now(),
            scheduler,
            trigger: ActivationTrigger::new(tx),
        })
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub async fn activate(&self) -> Activation {
        self.trigger.activate().await
    }
}

impl Drop for PageSession {
    fn drop(&mut self) {
        self.scheduler.shutdown();
    }
}

/// Sessions keyed by id
pub struct SessionStore {
    config: Arc<TranslatorConfig>,
    endpoint: Arc<dyn TranslationEndpoint>,
    pages: RwLock<HashMap<String, Arc<PageSession>>>,
    next_id: AtomicU64,
}

impl SessionStore {
    pub fn new(config: Arc<TranslatorConfig>, endpoint: Arc<dyn TranslationEndpoint>) -> Self {
        Self {
            config,
            endpoint,
            pages: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn endpoint(&self) -> &Arc<dyn TranslationEndpoint> {
        &self.endpoint
    }

    pub fn create(&self, html: &str, url: &str) -> Result<Arc<PageSession>> {
        let id = format!("page-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let session = Arc::new(PageSession::open(
            id.clone(),
            html,
            url,
            self.config.clone(),
            self.endpoint.clone(),
        )?);
        self.pages
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), session.clone());
        info!("Opened session {} for {}", id, url);
        Ok(session)
    }

    pub fn get(&self, id: &str) -> Option<Arc<PageSession>> {
        self.pages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Remove a session and stop its scheduler
    pub fn close(&self, id: &str) -> bool {
        let removed = self
            .pages
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        match removed {
            Some(session) => {
                session.scheduler().shutdown();
                info!("Closed session {}", id);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.pages.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
