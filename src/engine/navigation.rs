//! Detection of in-place page replacement

use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::config::TranslatorConfig;
use crate::core::models::{NavigationEvent, NavigationSource};
use crate::core::state::SystemState;
use crate::dom::Document;

/// Receiver of the reset sequence
pub trait ResetTarget: Send + Sync {
    /// Stop all in-flight work. Called for every detection, including
    /// ones that arrive while a previous reset is still settling.
    fn begin_reset(&self, event: &NavigationEvent);

    /// The settle delay elapsed with no further detection
    fn complete_reset(&self);
}

/// Watches for navigation and drives [`ResetTarget`]
///
/// Detections come from the event channel (history push/replace, back/forward
/// forwarded by the host) and from polling the document location.
pub struct NavigationMonitor {
    document: Arc<Document>,
    state: Arc<SystemState>,
    settle_delay: Duration,
    poll_interval: Duration,
}

impl NavigationMonitor {
    pub fn new(document: Arc<Document>, state: Arc<SystemState>, config: &TranslatorConfig) -> Self {
        Self {
            document,
            state,
            settle_delay: config.settle_delay(),
            poll_interval: config.url_poll_interval(),
        }
    }

    fn poll(&self) -> Option<NavigationEvent> {
        let url = self.document.location();
        if self.state.record_url(&url) {
            Some(NavigationEvent::new(NavigationSource::UrlPoll, url))
        } else {
            None
        }
    }

    /// Run until `shutdown` fires, the channel closes or the target is gone
    pub async fn run(
        self,
        mut events: mpsc::UnboundedReceiver<NavigationEvent>,
        target: Weak<dyn ResetTarget>,
        shutdown: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut settle_deadline: Option<Instant> = None;

        loop {
            if target.strong_count() == 0 {
                break;
            }

            let detected = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => {
                        self.state.record_url(&event.url);
                        Some(event)
                    }
                    None => break,
                },
                _ = ticker.tick() => self.poll(),
                _ = settle(settle_deadline), if settle_deadline.is_some() => {
                    settle_deadline = None;
                    let Some(target) = target.upgrade() else { break };
                    info!("Page settled, restarting translation");
                    target.complete_reset();
                    None
                }
            };

            if let Some(event) = detected {
                let Some(target) = target.upgrade() else { break };
                if settle_deadline.is_some() {
                    debug!("Navigation during settle delay, re-arming ({})", event.source);
                } else {
                    info!("Navigation detected via {}: {}", event.source, event.url);
                }
                target.begin_reset(&event);
                settle_deadline = Some(Instant::now() + self.settle_delay);
            }
        }

        debug!("Navigation monitor stopped");
    }
}

async fn settle(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
