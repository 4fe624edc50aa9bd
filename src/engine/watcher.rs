//! Translation of content inserted after the initial pass
//!
//! The watcher is a two-state machine. While **Observing** it holds a
//! mutation subscription on the document body. A batch that inserts elements
//! moves it to **Suspended**: the subscription is dropped first, so the
//! watcher's own text writes are never delivered back to it, then each
//! inserted element gets a [`TreeWalker`] pass. Afterwards it subscribes
//! again, unless a navigation started in the meantime; the scheduler's reset
//! path owns re-attachment in that case.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::core::models::WalkStats;
use crate::core::state::SystemState;
use crate::dom::{Document, MutationRecord, MutationSubscription, NodeId, ObserveOptions, ObserverId};
use crate::engine::walker::TreeWalker;

enum WatcherPhase {
    Observing(MutationSubscription),
    Suspended,
}

/// Shared between the running watcher and its handle
#[derive(Debug, Default)]
struct AttachSlot {
    observer: Option<ObserverId>,
    closed: bool,
}

pub struct MutationWatcher {
    document: Arc<Document>,
    walker: Arc<TreeWalker>,
    state: Arc<SystemState>,
    root: NodeId,
    slot: Arc<Mutex<AttachSlot>>,
    phase: WatcherPhase,
}

/// Owner's handle on a running watcher
#[derive(Debug)]
pub struct WatcherHandle {
    document: Arc<Document>,
    slot: Arc<Mutex<AttachSlot>>,
    task: JoinHandle<WalkStats>,
}

fn lock(slot: &Mutex<AttachSlot>) -> MutexGuard<'_, AttachSlot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MutationWatcher {
    /// Subscribe on `root` immediately and process batches in a background task
    pub fn spawn(walker: Arc<TreeWalker>, state: Arc<SystemState>, root: NodeId) -> WatcherHandle {
        let document = walker.document().clone();
        let slot = Arc::new(Mutex::new(AttachSlot::default()));
        let mut watcher = MutationWatcher {
            document: document.clone(),
            walker,
            state,
            root,
            slot: slot.clone(),
            phase: WatcherPhase::Suspended,
        };
        watcher.resume();

        let task = tokio::spawn(watcher.run());
        WatcherHandle {
            document,
            slot,
            task,
        }
    }

    async fn run(mut self) -> WalkStats {
        let mut total = WalkStats::default();
        loop {
            let WatcherPhase::Observing(subscription) = &mut self.phase else {
                break;
            };
            let Some(batch) = subscription.next_batch().await else {
                debug!("Mutation subscription closed");
                break;
            };

            let added = self.added_elements(&batch);
            if added.is_empty() {
                continue;
            }

            self.suspend();
            debug!("Processing {} inserted elements", added.len());

            let token = self.state.walk_token();
            for element in added {
                if token.is_cancelled() {
                    break;
                }
                match self.walker.visit(element, &token).await {
                    Ok(stats) => total.merge(&stats),
                    Err(e) if e.is_aborted() => {
                        debug!("Watcher pass aborted by navigation");
                        break;
                    }
                    Err(e) => error!("Watcher pass over {} failed: {}", element, e),
                }
            }

            if token.is_cancelled() || self.state.is_navigating() {
                info!("Navigation in progress, watcher stays detached");
                break;
            }
            if !self.resume() {
                break;
            }
        }
        total
    }

    /// Inserted elements that are still part of the document, in arrival
    /// order. An element inside another inserted element is covered by that
    /// element's pass and dropped.
    fn added_elements(&self, batch: &[MutationRecord]) -> Vec<NodeId> {
        self.document.read(|tree| {
            let mut added: Vec<NodeId> = Vec::new();
            for node in batch.iter().flat_map(|record| record.added_nodes()) {
                if tree.is_element(*node) && tree.is_connected(*node) && !added.contains(node) {
                    added.push(*node);
                }
            }
            let roots: Vec<NodeId> = added
                .iter()
                .copied()
                .filter(|node| {
                    !added
                        .iter()
                        .any(|other| other != node && tree.contains(*other, *node))
                })
                .collect();
            roots
        })
    }

    /// Observing -> Suspended
    fn suspend(&mut self) {
        let mut slot = lock(&self.slot);
        slot.observer = None;
        // Dropping the subscription disconnects it
        self.phase = WatcherPhase::Suspended;
    }

    /// Suspended -> Observing. False once the owner has detached us.
    fn resume(&mut self) -> bool {
        let mut slot = lock(&self.slot);
        if slot.closed {
            return false;
        }
        let subscription = self
            .document
            .observe(self.root, ObserveOptions::content_changes());
        slot.observer = Some(subscription.id());
        self.phase = WatcherPhase::Observing(subscription);
        true
    }
}

impl WatcherHandle {
    /// Whether the watcher currently holds a subscription
    pub fn is_observing(&self) -> bool {
        lock(&self.slot).observer.is_some()
    }

    /// Disconnect now and stop the task; the watcher can never re-attach
    pub fn detach(&self) {
        let mut slot = lock(&self.slot);
        slot.closed = true;
        if let Some(id) = slot.observer.take() {
            self.document.disconnect(id);
        }
        self.task.abort();
    }

    /// Wait for the watcher task to end, returning what it translated
    pub async fn join(self) -> WalkStats {
        self.task.await.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::client::TranslationClient;
    use crate::core::config::TranslatorConfig;
    use crate::engine::classifier::TextClassifier;
    use crate::processors::html::{append_fragment, parse_document};
    use crate::testing::ScriptedEndpoint;
    use std::time::Duration;

    struct Fixture {
        document: Arc<Document>,
        state: Arc<SystemState>,
        walker: Arc<TreeWalker>,
        endpoint: Arc<ScriptedEndpoint>,
        body: NodeId,
    }

    fn fixture(html: &str, endpoint: Arc<ScriptedEndpoint>) -> Fixture {
        let config = TranslatorConfig::default();
        let document = parse_document(html, "https://example.jp/");
        let walker = Arc::new(TreeWalker::new(
            document.clone(),
            Arc::new(TranslationClient::new(endpoint.clone())),
            Arc::new(TextClassifier::new(&config).unwrap()),
            config.fragment_delay(),
        ));
        let body = document.body().unwrap();
        Fixture {
            state: Arc::new(SystemState::new(document.location())),
            document,
            walker,
            endpoint,
            body,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_translates_inserted_elements_and_reattaches() {
        let f = fixture("<body></body>", ScriptedEndpoint::new().build());
        let handle = MutationWatcher::spawn(f.walker.clone(), f.state.clone(), f.body);
        assert_eq!(f.document.observer_count(), 1);

        append_fragment(&f.document, f.body, "<div><p>新着</p></div>").unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(f.document.read(|t| t.text_content(f.body)), "vi:新着");
        assert_eq!(f.endpoint.calls(), vec!["新着"]);
        assert!(handle.is_observing());
        assert_eq!(f.document.observer_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_own_writes_do_not_retrigger() {
        // Translation keeps Japanese characters; a feedback loop would re-request it
        let endpoint = ScriptedEndpoint::new().with("山田", "Ông 山田").build();
        let f = fixture("<body></body>", endpoint);
        let _handle = MutationWatcher::spawn(f.walker.clone(), f.state.clone(), f.body);

        append_fragment(&f.document, f.body, "<span>山田</span>").unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(f.endpoint.calls(), vec!["山田"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nested_insertions_in_one_batch_are_walked_once() {
        // Unchanged result leaves the container unmarked, so only the walk count limits requests
        let endpoint = ScriptedEndpoint::new().with("同じ", "同じ").build();
        let f = fixture("<body></body>", endpoint);
        let _handle = MutationWatcher::spawn(f.walker.clone(), f.state.clone(), f.body);

        let div = f.document.create_element("div");
        let p = f.document.create_element("p");
        let text = f.document.create_text("同じ");
        f.document.append_child(p, text).unwrap();
        f.document.append_child(f.body, div).unwrap();
        f.document.append_child(div, p).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(f.endpoint.calls(), vec!["同じ"]);
        assert_eq!(f.document.observer_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_text_only_insertions_are_ignored() {
        let f = fixture("<body><p>x</p></body>", ScriptedEndpoint::new().build());
        let _handle = MutationWatcher::spawn(f.walker.clone(), f.state.clone(), f.body);

        let text = f.document.create_text("テキスト");
        f.document.append_child(f.body, text).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(f.endpoint.calls().is_empty());
        assert_eq!(f.document.observer_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigation_mid_pass_leaves_watcher_detached() {
        let endpoint = ScriptedEndpoint::new()
            .with_latency(Duration::from_millis(100))
            .build();
        let f = fixture("<body></body>", endpoint);
        let handle = MutationWatcher::spawn(f.walker.clone(), f.state.clone(), f.body);

        append_fragment(&f.document, f.body, "<p>一</p><p>二</p>").unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(f.document.observer_count(), 0);

        f.state.begin_navigation();
        let stats = handle.join().await;

        assert_eq!(stats.translated, 0);
        assert_eq!(f.document.observer_count(), 0);
        assert_eq!(f.document.read(|t| t.text_content(f.body)), "一二");
    }

    #[tokio::test(start_paused = true)]
    async fn test_detach_disconnects_synchronously() {
        let f = fixture("<body></body>", ScriptedEndpoint::new().build());
        let handle = MutationWatcher::spawn(f.walker.clone(), f.state.clone(), f.body);
        assert_eq!(f.document.observer_count(), 1);

        handle.detach();
        assert_eq!(f.document.observer_count(), 0);
        assert!(!handle.is_observing());

        append_fragment(&f.document, f.body, "<p>無視</p>").unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(f.endpoint.calls().is_empty());
    }
}
