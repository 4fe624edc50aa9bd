//! Depth-first translation pass over a subtree

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::client::TranslationClient;
use crate::core::errors::{Result, TranslationError};
use crate::core::models::{FragmentOutcome, TextFragment, WalkStats};
use crate::dom::{Document, NodeId};
use crate::engine::classifier::TextClassifier;

/// Walks a live subtree and translates eligible text in place
#[derive(Debug)]
pub struct TreeWalker {
    document: Arc<Document>,
    client: Arc<TranslationClient>,
    classifier: Arc<TextClassifier>,
    fragment_delay: Duration,
}

impl TreeWalker {
    pub fn new(
        document: Arc<Document>,
        client: Arc<TranslationClient>,
        classifier: Arc<TextClassifier>,
        fragment_delay: Duration,
    ) -> Self {
        Self {
            document,
            client,
            classifier,
            fragment_delay,
        }
    }

    pub fn document(&self) -> &Arc<Document> {
        &self.document
    }

    /// Visit `root` in pre-order: an element's own text first, then its
    /// element children in source order.
    ///
    /// Returns [`TranslationError::Aborted`] as soon as `token` fires; every
    /// other failure is contained to its fragment.
    pub async fn visit(&self, root: NodeId, token: &CancellationToken) -> Result<WalkStats> {
        let mut stats = WalkStats::default();
        let mut stack = vec![root];

        while let Some(element) = stack.pop() {
            if token.is_cancelled() {
                return Err(TranslationError::Aborted);
            }

            let Some((texts, elements)) = self.document.read(|tree| {
                let container = tree.is_element(element) || element == tree.root();
                if !container || !tree.is_connected(element) {
                    return None;
                }
                let children = tree.children(element);
                let texts: Vec<NodeId> = children.iter().copied().filter(|c| tree.is_text(*c)).collect();
                let elements: Vec<NodeId> = children.iter().copied().filter(|c| tree.is_element(*c)).collect();
                Some((texts, elements))
            }) else {
                debug!("Skipping {}: not an attached container", element);
                continue;
            };
            stats.elements += 1;

            for text in texts {
                if token.is_cancelled() {
                    return Err(TranslationError::Aborted);
                }
                let outcome = self.translate_node(text, token).await?;
                stats.record(outcome);
                if outcome != FragmentOutcome::Skipped {
                    self.pause(token).await?;
                }
            }

            stack.extend(elements.into_iter().rev());
        }

        Ok(stats)
    }

    async fn translate_node(&self, node: NodeId, token: &CancellationToken) -> Result<FragmentOutcome> {
        let fragment = self.document.read(|tree| {
            if tree.is_connected(node) {
                self.classifier.fragment(tree, node)
            } else {
                None
            }
        });
        let Some(fragment) = fragment.filter(|f| f.needs_translation) else {
            return Ok(FragmentOutcome::Skipped);
        };

        let translation = match self.client.translate(fragment.trimmed()).await {
            Ok(translation) => translation,
            Err(TranslationError::Aborted) => return Err(TranslationError::Aborted),
            Err(e) => {
                warn!("Failed to translate {}: {}", node, e);
                return Ok(FragmentOutcome::Failed);
            }
        };

        // A result that lands after navigation belongs to the old page
        if token.is_cancelled() {
            return Err(TranslationError::Aborted);
        }

        let translation = translation.trim();
        if translation.is_empty() || translation == fragment.trimmed() {
            return Ok(FragmentOutcome::Unchanged);
        }

        match self.apply(&fragment, translation) {
            Ok(()) => Ok(FragmentOutcome::Translated),
            Err(e) => {
                warn!("Could not write translation into {}: {}", node, e);
                Ok(FragmentOutcome::Failed)
            }
        }
    }

    fn apply(&self, fragment: &TextFragment, translation: &str) -> Result<()> {
        self.document
            .set_text(fragment.node, fragment.with_translation(translation))?;
        if let Some(container) = self.document.read(|tree| tree.parent(fragment.node)) {
            self.document
                .set_attribute(container, self.classifier.marker_attribute(), "true")?;
        }
        Ok(())
    }

    async fn pause(&self, token: &CancellationToken) -> Result<()> {
        if self.fragment_delay.is_zero() {
            tokio::task::yield_now().await;
            return Ok(());
        }
        tokio::select! {
            _ = token.cancelled() => Err(TranslationError::Aborted),
            _ = tokio::time::sleep(self.fragment_delay) => Ok(()),
        }
    }
}
