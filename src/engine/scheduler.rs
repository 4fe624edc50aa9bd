//! Lifecycle orchestration for one live document

use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::client::TranslationClient;
use crate::core::config::TranslatorConfig;
use crate::core::errors::Result;
use crate::core::models::{ControlMessage, NavigationEvent, WalkStats};
use crate::core::state::{StateSnapshot, SystemState};
use crate::dom::{Document, NodeId};
use crate::engine::classifier::TextClassifier;
use crate::engine::navigation::{NavigationMonitor, ResetTarget};
use crate::engine::walker::TreeWalker;
use crate::engine::watcher::{MutationWatcher, WatcherHandle};

/// Result of [`Scheduler::start`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// The document is already initialized
    AlreadyRunning,
    /// A navigation interrupted the initial pass
    Aborted,
    /// Initial pass finished and the watcher is attached
    Completed(WalkStats),
}

/// Externally visible scheduler state
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    #[serde(flatten)]
    pub state: StateSnapshot,
    pub watcher_attached: bool,
    pub observers: usize,
    pub request_in_flight: bool,
}

/// Owns [`SystemState`] and drives the walker, watcher and navigation monitor
///
/// Only the scheduler mutates state. The navigation monitor holds a weak
/// reference back, so dropping the last `Arc<Scheduler>` stops it.
pub struct Scheduler {
    me: Weak<Scheduler>,
    document: Arc<Document>,
    state: Arc<SystemState>,
    client: Arc<TranslationClient>,
    walker: Arc<TreeWalker>,
    watcher: Mutex<Option<WatcherHandle>>,
    start_task: Mutex<Option<JoinHandle<()>>>,
    navigation: mpsc::UnboundedSender<NavigationEvent>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("document", &self.document)
            .field("state", &self.state)
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Scheduler {
    /// Wire up the components and start the navigation monitor.
    /// Translation itself begins with [`Scheduler::start`].
    pub fn spawn(
        config: Arc<TranslatorConfig>,
        document: Arc<Document>,
        client: Arc<TranslationClient>,
    ) -> Result<Arc<Self>> {
        let classifier = Arc::new(TextClassifier::new(&config)?);
        let walker = Arc::new(TreeWalker::new(
            document.clone(),
            client.clone(),
            classifier,
            config.fragment_delay(),
        ));
        let state = Arc::new(SystemState::new(document.location()));
        let (navigation, events) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let scheduler = Arc::new_cyclic(|me| Scheduler {
            me: me.clone(),
            document: document.clone(),
            state: state.clone(),
            client,
            walker,
            watcher: Mutex::new(None),
            start_task: Mutex::new(None),
            navigation,
            shutdown: shutdown.clone(),
        });

        let monitor = NavigationMonitor::new(document, state, &config);
        let target = Arc::downgrade(&scheduler) as Weak<dyn ResetTarget>;
        tokio::spawn(monitor.run(events, target, shutdown));

        Ok(scheduler)
    }

    pub fn document(&self) -> &Arc<Document> {
        &self.document
    }

    pub fn state(&self) -> &Arc<SystemState> {
        &self.state
    }

    /// Translate the whole body, then watch it for insertions
    pub async fn start(&self) -> Result<StartOutcome> {
        if !self.state.try_initialize() {
            debug!("Translation already initialized, ignoring start");
            return Ok(StartOutcome::AlreadyRunning);
        }

        let token = self.state.walk_token();
        let root = self.document.body().unwrap_or(NodeId::ROOT);
        info!("Starting translation of {}", self.document.location());

        let stats = match self.walker.visit(root, &token).await {
            Ok(stats) => stats,
            Err(e) if e.is_aborted() => {
                info!("Initial pass aborted by navigation");
                return Ok(StartOutcome::Aborted);
            }
            Err(e) => return Err(e),
        };

        if !self.attach_watcher(root, &token) {
            info!("Navigation started after the initial pass, watcher not attached");
            return Ok(StartOutcome::Aborted);
        }

        info!(
            "Initial pass done: {} translated, {} unchanged, {} failed across {} elements",
            stats.translated, stats.unchanged, stats.failed, stats.elements
        );
        Ok(StartOutcome::Completed(stats))
    }

    /// Forward a navigation observed by the host
    pub fn notify_navigation(&self, event: NavigationEvent) {
        self.document.set_location(event.url.clone());
        if self.navigation.send(event).is_err() {
            warn!("Navigation monitor is not running, event dropped");
        }
    }

    /// Message-style entry point; starts in the background
    pub fn handle_message(&self, message: ControlMessage) {
        match message {
            ControlMessage::StartTranslation => self.spawn_start(),
        }
    }

    /// Stop the monitor and all in-flight work
    pub fn shutdown(&self) {
        info!("Shutting down translation for {}", self.document.location());
        self.shutdown.cancel();
        self.state.cancel_all();
        self.client.abort();
        if let Some(task) = lock(&self.start_task).take() {
            task.abort();
        }
        self.detach_watcher();
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            state: self.state.snapshot(),
            watcher_attached: lock(&self.watcher)
                .as_ref()
                .map(WatcherHandle::is_observing)
                .unwrap_or(false),
            observers: self.document.observer_count(),
            request_in_flight: self.client.in_flight_id().is_some(),
        }
    }

    fn spawn_start(&self) {
        if self.shutdown.is_cancelled() {
            debug!("Scheduler shut down, not starting");
            return;
        }
        let Some(scheduler) = self.me.upgrade() else {
            return;
        };
        let task = tokio::spawn(async move {
            match scheduler.start().await {
                Ok(outcome) => debug!("Start finished: {:?}", outcome),
                Err(e) => error!("Translation pass failed: {}", e),
            }
        });
        *lock(&self.start_task) = Some(task);
    }

    /// Attach a fresh watcher unless `token` already fired.
    /// Checked under the watcher lock, which the reset path also takes.
    fn attach_watcher(&self, root: NodeId, token: &CancellationToken) -> bool {
        let mut slot = lock(&self.watcher);
        if token.is_cancelled() {
            return false;
        }
        if let Some(previous) = slot.take() {
            previous.detach();
        }
        *slot = Some(MutationWatcher::spawn(
            self.walker.clone(),
            self.state.clone(),
            root,
        ));
        true
    }

    fn detach_watcher(&self) {
        if let Some(watcher) = lock(&self.watcher).take() {
            watcher.detach();
            debug!("Mutation watcher detached");
        }
    }
}

impl ResetTarget for Scheduler {
    fn begin_reset(&self, event: &NavigationEvent) {
        // Flag first: an attach racing with us either sees the cancelled
        // token or finishes before we take the watcher lock
        self.state.begin_navigation();
        self.client.abort();
        self.detach_watcher();
        debug!("Reset started by {} to {}", event.source, event.url);
    }

    fn complete_reset(&self) {
        self.state.finish_navigation();
        self.spawn_start();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::NavigationSource;
    use crate::processors::html::{parse_document, replace_content};
    use crate::testing::ScriptedEndpoint;
    use std::time::Duration;
    use tokio_test::assert_ok;

    fn scheduler(html: &str, endpoint: Arc<ScriptedEndpoint>) -> Arc<Scheduler> {
        let config = Arc::new(TranslatorConfig::default());
        let document = parse_document(html, "https://example.jp/a");
        let client = Arc::new(TranslationClient::new(endpoint));
        Scheduler::spawn(config, document, client).unwrap()
    }

    fn body_text(scheduler: &Scheduler) -> String {
        let document = scheduler.document();
        let body = document.body().unwrap();
        document.read(|t| t.text_content(body))
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_translates_body_then_watches() {
        let endpoint = ScriptedEndpoint::new().with("こんにちは", "Xin chào").build();
        let s = scheduler(
            "<body><div><p>こんにちは</p><script>code</script></div></body>",
            endpoint.clone(),
        );

        let outcome = assert_ok!(s.start().await);
        let StartOutcome::Completed(stats) = outcome else {
            panic!("unexpected outcome {:?}", outcome);
        };
        assert_eq!(stats.translated, 1);
        assert_eq!(body_text(&s), "Xin chàocode");
        assert_eq!(endpoint.calls(), vec!["こんにちは"]);

        let status = s.status();
        assert!(status.state.initialized);
        assert!(status.watcher_attached);
        assert_eq!(status.observers, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent() {
        let endpoint = ScriptedEndpoint::new().build();
        let s = scheduler("<body><p>一</p></body>", endpoint.clone());

        assert!(matches!(s.start().await.unwrap(), StartOutcome::Completed(_)));
        assert_eq!(s.start().await.unwrap(), StartOutcome::AlreadyRunning);
        s.handle_message(ControlMessage::StartTranslation);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(endpoint.calls(), vec!["一"]);
        assert_eq!(s.document().observer_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_message_starts_in_background() {
        let endpoint = ScriptedEndpoint::new().build();
        let s = scheduler("<body><p>猫</p></body>", endpoint);

        s.handle_message(ControlMessage::StartTranslation);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(body_text(&s), "vi:猫");
        assert!(s.status().watcher_attached);
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigation_mid_walk_stops_stale_writes() {
        let endpoint = ScriptedEndpoint::new()
            .with_latency(Duration::from_millis(100))
            .build();
        let s = scheduler("<body><p>一</p><p>二</p><p>三</p></body>", endpoint.clone());

        let start = tokio::spawn({
            let s = s.clone();
            async move { s.start().await }
        });
        tokio::time::sleep(Duration::from_millis(120)).await;

        s.notify_navigation(NavigationEvent::new(
            NavigationSource::PushState,
            "https://example.jp/b",
        ));
        // Page content swapped by the host
        let body = s.document().body().unwrap();
        replace_content(s.document(), body, "<p>新しいページ</p>").unwrap();

        assert_eq!(start.await.unwrap().unwrap(), StartOutcome::Aborted);
        let status = s.status();
        assert!(status.state.navigation_in_progress);
        assert!(!status.watcher_attached);
        assert_eq!(status.observers, 0);

        // Settle delay elapses, the new page is translated from scratch
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(body_text(&s), "vi:新しいページ");
        let status = s.status();
        assert_eq!(status.state.resets, 1);
        assert_eq!(status.state.last_observed_url, "https://example.jp/b");
        assert_eq!(status.observers, 1);
        assert!(!endpoint.calls().contains(&"三".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_navigations_collapse_into_one_reset() {
        let endpoint = ScriptedEndpoint::new().build();
        let s = scheduler("<body><p>一</p></body>", endpoint);
        s.start().await.unwrap();

        s.notify_navigation(NavigationEvent::new(
            NavigationSource::PushState,
            "https://example.jp/b",
        ));
        tokio::time::sleep(Duration::from_millis(100)).await;
        s.notify_navigation(NavigationEvent::new(
            NavigationSource::PopState,
            "https://example.jp/c",
        ));
        tokio::time::sleep(Duration::from_millis(1000)).await;

        let status = s.status();
        assert_eq!(status.state.resets, 1);
        assert_eq!(status.state.last_observed_url, "https://example.jp/c");
        assert!(!status.state.navigation_in_progress);
        assert_eq!(status.observers, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inserted_content_after_start_is_translated() {
        let endpoint = ScriptedEndpoint::new().build();
        let s = scheduler("<body></body>", endpoint);
        s.start().await.unwrap();

        let body = s.document().body().unwrap();
        crate::processors::html::append_fragment(s.document(), body, "<p>追加</p>").unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(body_text(&s), "vi:追加");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_detaches_everything() {
        let endpoint = ScriptedEndpoint::new().build();
        let s = scheduler("<body><p>一</p></body>", endpoint.clone());
        s.start().await.unwrap();

        s.shutdown();
        assert_eq!(s.document().observer_count(), 0);

        s.handle_message(ControlMessage::StartTranslation);
        s.notify_navigation(NavigationEvent::new(
            NavigationSource::PushState,
            "https://example.jp/b",
        ));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(s.status().state.resets, 0);
        assert_eq!(endpoint.calls(), vec!["一"]);
    }
}
