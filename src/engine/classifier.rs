//! Eligibility of text fragments

use regex::Regex;
use std::collections::HashSet;

use crate::core::config::{ScriptRange, TranslatorConfig};
use crate::core::errors::{Result, TranslationError};
use crate::core::models::TextFragment;
use crate::dom::{NodeId, Tree};

/// Pure predicate deciding whether a text node should be translated
#[derive(Debug, Clone)]
pub struct TextClassifier {
    script: Regex,
    excluded_tags: HashSet<String>,
    marker_attribute: String,
}

impl TextClassifier {
    pub fn new(config: &TranslatorConfig) -> Result<Self> {
        Ok(Self {
            script: script_matcher(&config.script_ranges)?,
            excluded_tags: config
                .excluded_tags
                .iter()
                .map(|t| t.to_ascii_lowercase())
                .collect(),
            marker_attribute: config.marker_attribute.clone(),
        })
    }

    pub fn marker_attribute(&self) -> &str {
        &self.marker_attribute
    }

    /// Whether `text` contains at least one source-script character
    pub fn contains_source_script(&self, text: &str) -> bool {
        self.script.is_match(text)
    }

    /// Whether the text node `node` needs translation
    pub fn is_eligible(&self, tree: &Tree, node: NodeId) -> bool {
        let Some(text) = tree.text(node) else {
            return false;
        };
        let text = text.trim();
        if text.is_empty() {
            return false;
        }

        // A marked ancestor means the subtree was already translated
        let blocked = tree.ancestors(node).any(|ancestor| {
            tree.has_attribute(ancestor, &self.marker_attribute)
                || tree
                    .tag_name(ancestor)
                    .map(|tag| self.excluded_tags.contains(tag))
                    .unwrap_or(false)
        });
        if blocked {
            return false;
        }

        self.contains_source_script(text)
    }

    /// Capture the current state of a text node
    pub fn fragment(&self, tree: &Tree, node: NodeId) -> Option<TextFragment> {
        let content = tree.text(node)?.to_string();
        Some(TextFragment {
            node,
            needs_translation: self.is_eligible(tree, node),
            content,
        })
    }
}

/// Compile the configured ranges into one character class
fn script_matcher(ranges: &[ScriptRange]) -> Result<Regex> {
    let mut class = String::from("[");
    for range in ranges {
        let (start, end) = range.as_chars().ok_or_else(|| TranslationError::ConfigError {
            message: format!("invalid script range {:?}", range),
        })?;
        class.push_str(&format!("\\x{{{:x}}}-\\x{{{:x}}}", start as u32, end as u32));
    }
    class.push(']');

    Regex::new(&class).map_err(|e| TranslationError::ConfigError {
        message: format!("script ranges do not form a valid class: {}", e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Document;

    fn classifier() -> TextClassifier {
        TextClassifier::new(&TranslatorConfig::default()).unwrap()
    }

    #[test]
    fn test_script_detection() {
        let c = classifier();
        assert!(c.contains_source_script("こんにちは"));
        assert!(c.contains_source_script("カタカナ"));
        assert!(c.contains_source_script("漢字"));
        assert!(c.contains_source_script("Price：１００円"));
        assert!(!c.contains_source_script("hello world"));
        assert!(!c.contains_source_script("xin chào"));
        assert!(!c.contains_source_script(""));
    }

    #[test]
    fn test_eligibility_rules() {
        let c = classifier();
        let document = Document::with_body("about:blank");
        let body = document.body().unwrap();

        let p = document.create_element("p");
        let japanese = document.create_text("  こんにちは ");
        let english = document.create_text("hello");
        let blank = document.create_text("   \n ");
        document.append_child(body, p).unwrap();
        document.append_child(p, japanese).unwrap();
        document.append_child(p, english).unwrap();
        document.append_child(p, blank).unwrap();

        document.read(|tree| {
            assert!(c.is_eligible(tree, japanese));
            assert!(!c.is_eligible(tree, english));
            assert!(!c.is_eligible(tree, blank));
            assert!(!c.is_eligible(tree, p));
        });
    }

    #[test]
    fn test_excluded_ancestors() {
        let c = classifier();
        let document = Document::with_body("about:blank");
        let body = document.body().unwrap();

        let pre = document.create_element("pre");
        let span = document.create_element("span");
        let text = document.create_text("日本語");
        document.append_child(body, pre).unwrap();
        document.append_child(pre, span).unwrap();
        document.append_child(span, text).unwrap();

        let script = document.create_element("SCRIPT");
        let code = document.create_text("const s = '日本';");
        document.append_child(body, script).unwrap();
        document.append_child(script, code).unwrap();

        document.read(|tree| {
            assert!(!c.is_eligible(tree, text));
            assert!(!c.is_eligible(tree, code));
        });
    }

    #[test]
    fn test_marked_ancestor_blocks_nested_text() {
        let c = classifier();
        let document = Document::with_body("about:blank");
        let body = document.body().unwrap();

        let div = document.create_element("div");
        let own = document.create_text("田中さん");
        let inner = document.create_element("p");
        let nested = document.create_text("山田さん");
        document.append_child(body, div).unwrap();
        document.append_child(div, own).unwrap();
        document.append_child(div, inner).unwrap();
        document.append_child(inner, nested).unwrap();
        document
            .set_attribute(div, c.marker_attribute(), "true")
            .unwrap();

        document.read(|tree| {
            assert!(!c.is_eligible(tree, own));
            assert!(!c.is_eligible(tree, nested));
        });

        document.remove_attribute(div, c.marker_attribute()).unwrap();
        document.read(|tree| {
            assert!(c.is_eligible(tree, own));
            assert!(c.is_eligible(tree, nested));
        });
    }

    #[test]
    fn test_fragment_capture() {
        let c = classifier();
        let document = Document::with_body("about:blank");
        let body = document.body().unwrap();
        let text = document.create_text("ねこ");
        document.append_child(body, text).unwrap();

        let fragment = document.read(|tree| c.fragment(tree, text)).unwrap();
        assert_eq!(fragment.content, "ねこ");
        assert!(fragment.needs_translation);
        assert!(document.read(|tree| c.fragment(tree, body)).is_none());
    }

    #[test]
    fn test_custom_ranges() {
        let config = TranslatorConfig {
            script_ranges: vec![ScriptRange {
                start: 0xac00,
                end: 0xd7af,
            }],
            ..Default::default()
        };
        let c = TextClassifier::new(&config).unwrap();
        assert!(c.contains_source_script("안녕하세요"));
        assert!(!c.contains_source_script("こんにちは"));
    }
}
