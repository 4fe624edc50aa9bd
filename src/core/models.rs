//! Core data models for translation

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_util::sync::CancellationToken;

use crate::dom::NodeId;

/// A leaf text unit observed during a walk
///
/// Recomputed on every visit and never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextFragment {
    pub node: NodeId,
    pub content: String,
    pub needs_translation: bool,
}

impl TextFragment {
    /// Content without surrounding whitespace, the part sent for translation
    pub fn trimmed(&self) -> &str {
        self.content.trim()
    }

    /// Rebuild the node text around a translation, keeping the original
    /// leading and trailing whitespace
    pub fn with_translation(&self, translation: &str) -> String {
        let start = self.content.len() - self.content.trim_start().len();
        let end = self.content.trim_end().len();
        if start >= end {
            return translation.to_string();
        }
        format!(
            "{}{}{}",
            &self.content[..start],
            translation,
            &self.content[end..]
        )
    }
}

/// A single network translation attempt
///
/// Created right before the call, resolved or aborted, then dropped.
#[derive(Debug, Clone)]
pub struct TranslationRequest {
    pub id: u64,
    pub text: String,
    pub token: CancellationToken,
}

impl TranslationRequest {
    pub fn new(id: u64, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
            token: CancellationToken::new(),
        }
    }
}

/// What happened to one fragment during a walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentOutcome {
    /// Text was replaced and the container marked
    Translated,
    /// Translation came back empty or identical
    Unchanged,
    /// Not eligible for translation
    Skipped,
    /// Contained failure, original text kept
    Failed,
}

/// Counters for a single walk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WalkStats {
    pub elements: usize,
    pub translated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl WalkStats {
    pub fn record(&mut self, outcome: FragmentOutcome) {
        match outcome {
            FragmentOutcome::Translated => self.translated += 1,
            FragmentOutcome::Unchanged => self.unchanged += 1,
            FragmentOutcome::Skipped => self.skipped += 1,
            FragmentOutcome::Failed => self.failed += 1,
        }
    }

    pub fn merge(&mut self, other: &WalkStats) {
        self.elements += other.elements;
        self.translated += other.translated;
        self.unchanged += other.unchanged;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// Where a navigation was detected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationSource {
    /// Location changed between two polls
    UrlPoll,
    /// `history.pushState`
    PushState,
    /// `history.replaceState`
    ReplaceState,
    /// Browser back/forward
    PopState,
}

impl fmt::Display for NavigationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NavigationSource::UrlPoll => write!(f, "url-poll"),
            NavigationSource::PushState => write!(f, "push-state"),
            NavigationSource::ReplaceState => write!(f, "replace-state"),
            NavigationSource::PopState => write!(f, "pop-state"),
        }
    }
}

/// Normalized navigation notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationEvent {
    pub source: NavigationSource,
    pub url: String,
}

impl NavigationEvent {
    pub fn new(source: NavigationSource, url: impl Into<String>) -> Self {
        Self {
            source,
            url: url.into(),
        }
    }
}

/// Messages accepted from the activation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ControlMessage {
    StartTranslation,
}
