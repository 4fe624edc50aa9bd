//! Process-wide lifecycle state shared by every component
//!
//! Query methods are public; mutators are crate-private and only the
//! scheduler calls them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct Navigation {
    in_progress: bool,
    /// Cancelled when a navigation starts, replaced when it completes
    token: CancellationToken,
    last_url: String,
    last_reset: Option<DateTime<Utc>>,
}

/// Lifecycle flags and the cooperative cancellation signal
#[derive(Debug)]
pub struct SystemState {
    initialized: AtomicBool,
    resets: AtomicU64,
    navigation: Mutex<Navigation>,
}

/// Point-in-time copy of [`SystemState`]
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub initialized: bool,
    pub navigation_in_progress: bool,
    pub last_observed_url: String,
    pub resets: u64,
    pub last_reset: Option<DateTime<Utc>>,
}

impl SystemState {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            initialized: AtomicBool::new(false),
            resets: AtomicU64::new(0),
            navigation: Mutex::new(Navigation {
                in_progress: false,
                token: CancellationToken::new(),
                last_url: url.into(),
                last_reset: None,
            }),
        }
    }

    fn navigation(&self) -> MutexGuard<'_, Navigation> {
        self.navigation.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn is_navigating(&self) -> bool {
        self.navigation().in_progress
    }

    /// Token for work started now; it fires when the next navigation begins.
    /// While a navigation is in progress the returned token is already cancelled.
    pub fn walk_token(&self) -> CancellationToken {
        self.navigation().token.clone()
    }

    pub fn last_url(&self) -> String {
        self.navigation().last_url.clone()
    }

    /// Number of completed navigation resets
    pub fn reset_count(&self) -> u64 {
        self.resets.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let navigation = self.navigation();
        StateSnapshot {
            initialized: self.is_initialized(),
            navigation_in_progress: navigation.in_progress,
            last_observed_url: navigation.last_url.clone(),
            resets: self.reset_count(),
            last_reset: navigation.last_reset,
        }
    }

    /// Claim initialization; false when already initialized
    pub(crate) fn try_initialize(&self) -> bool {
        self.initialized
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Record the latest URL; returns true when it differs from the previous one
    pub(crate) fn record_url(&self, url: &str) -> bool {
        let mut navigation = self.navigation();
        if navigation.last_url == url {
            return false;
        }
        navigation.last_url = url.to_string();
        true
    }

    /// Raise the navigation flag and fire the current walk token
    pub(crate) fn begin_navigation(&self) {
        let mut navigation = self.navigation();
        navigation.in_progress = true;
        navigation.token.cancel();
    }

    /// Back to a clean slate with a fresh token
    pub(crate) fn finish_navigation(&self) {
        let mut navigation = self.navigation();
        self.initialized.store(false, Ordering::SeqCst);
        navigation.in_progress = false;
        navigation.token = CancellationToken::new();
        navigation.last_reset = Some(Utc::now());
        self.resets.fetch_add(1, Ordering::SeqCst);
    }

    /// Fire the current token without starting a navigation (shutdown)
    pub(crate) fn cancel_all(&self) {
        self.navigation().token.cancel();
    }
}
