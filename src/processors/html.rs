//! HTML loading and serialization for live documents

use html5ever::interface::QualName;
use html5ever::serialize::{Serialize, SerializeOpts, Serializer, TraversalScope};
use html5ever::tendril::TendrilSink;
use html5ever::{namespace_url, ns, LocalName};
use markup5ever_rcdom::{Handle, NodeData as RcNodeData, RcDom};
use std::io;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::dom::{Document, DomError, NodeData, NodeId, Tree};

/// Parse a full HTML document into a live document
pub fn parse_document(html: &str, url: &str) -> Arc<Document> {
    let dom = parse(html);
    let document = Document::new(url);
    for child in dom.document.children.borrow().iter() {
        if let Some(node) = import(&document, child) {
            // Detached nodes under the document node; cannot fail
            let _ = document.append_child(NodeId::ROOT, node);
        }
    }

    if document.body().is_none() {
        let body = document.create_element("body");
        let parent = document
            .read(|tree| tree.find_element("html"))
            .unwrap_or(NodeId::ROOT);
        let _ = document.append_child(parent, body);
    }

    debug!(
        "Parsed document for {} with {} nodes",
        url,
        document.read(|tree| tree.len())
    );
    document
}

/// Parse `html` as body content and append the resulting nodes to `parent`.
/// Each top-level node is built detached and reported as one insertion.
pub fn append_fragment(
    document: &Arc<Document>,
    parent: NodeId,
    html: &str,
) -> Result<Vec<NodeId>, DomError> {
    let nodes = import_body(document, html);
    for node in &nodes {
        document.append_child(parent, *node)?;
    }
    Ok(nodes)
}

/// Parse `html` as body content and swap it in for the current children of `parent`
pub fn replace_content(
    document: &Arc<Document>,
    parent: NodeId,
    html: &str,
) -> Result<Vec<NodeId>, DomError> {
    let nodes = import_body(document, html);
    document.replace_children(parent, &nodes)?;
    Ok(nodes)
}

fn parse(html: &str) -> RcDom {
    html5ever::parse_document(RcDom::default(), Default::default()).one(html)
}

fn import_body(document: &Arc<Document>, html: &str) -> Vec<NodeId> {
    let dom = parse(html);
    let Some(body) = find_body(&dom.document) else {
        return Vec::new();
    };
    let nodes = body
        .children
        .borrow()
        .iter()
        .filter_map(|child| import(document, child))
        .collect();
    nodes
}

fn find_body(handle: &Handle) -> Option<Handle> {
    if let RcNodeData::Element { ref name, .. } = handle.data {
        if &*name.local == "body" {
            return Some(handle.clone());
        }
    }
    let found = handle.children.borrow().iter().find_map(find_body);
    found
}

/// Copy an rcdom subtree into the arena as detached nodes
fn import(document: &Document, handle: &Handle) -> Option<NodeId> {
    let root = create(document, handle)?;
    let mut stack = vec![(handle.clone(), root)];
    while let Some((source, target)) = stack.pop() {
        for child in source.children.borrow().iter() {
            if let Some(node) = create(document, child) {
                // Fresh detached nodes; linking them cannot fail
                let _ = document.append_child(target, node);
                stack.push((child.clone(), node));
            }
        }
    }
    Some(root)
}

fn create(document: &Document, handle: &Handle) -> Option<NodeId> {
    match handle.data {
        RcNodeData::Element {
            ref name,
            ref attrs,
            ..
        } => {
            let node = document.create_element(&name.local);
            for attr in attrs.borrow().iter() {
                let _ = document.set_attribute(node, &attr.name.local, &attr.value);
            }
            Some(node)
        }
        RcNodeData::Text { ref contents } => Some(document.create_text(contents.borrow().to_string())),
        RcNodeData::Comment { ref contents } => Some(document.create_comment(contents.to_string())),
        _ => None,
    }
}

/// Arena subtree in the shape html5ever's serializer walks
struct Subtree<'a> {
    tree: &'a Tree,
    root: NodeId,
}

impl Serialize for Subtree<'_> {
    fn serialize<S: Serializer>(&self, serializer: &mut S, traversal_scope: TraversalScope) -> io::Result<()> {
        match traversal_scope {
            TraversalScope::IncludeNode => write_node(self.tree, self.root, serializer),
            TraversalScope::ChildrenOnly(_) => {
                if self.root == NodeId::ROOT && self.tree.find_element("html").is_some() {
                    serializer.write_doctype("html")?;
                }
                for child in self.tree.children(self.root) {
                    write_node(self.tree, *child, serializer)?;
                }
                Ok(())
            }
        }
    }
}

fn write_node<S: Serializer>(tree: &Tree, id: NodeId, serializer: &mut S) -> io::Result<()> {
    match tree.data(id) {
        Some(NodeData::Element { name, attrs }) => {
            let name = QualName::new(None, ns!(html), LocalName::from(name.as_str()));
            let attrs: Vec<(QualName, &str)> = attrs
                .iter()
                .map(|attr| {
                    let name = QualName::new(None, ns!(), LocalName::from(attr.name.as_str()));
                    (name, attr.value.as_str())
                })
                .collect();
            serializer.start_elem(name.clone(), attrs.iter().map(|(name, value)| (name, *value)))?;
            for child in tree.children(id) {
                write_node(tree, *child, serializer)?;
            }
            serializer.end_elem(name)
        }
        Some(NodeData::Text(text)) => serializer.write_text(text),
        Some(NodeData::Comment(text)) => serializer.write_comment(text),
        Some(NodeData::Document) | None => Ok(()),
    }
}

/// Render the current document state as HTML
pub fn serialize(document: &Document) -> String {
    document.read(|tree| {
        let mut buf: Vec<u8> = Vec::new();
        let subtree = Subtree {
            tree,
            root: NodeId::ROOT,
        };
        if let Err(e) = html5ever::serialize::serialize(&mut buf, &subtree, SerializeOpts::default()) {
            warn!("Failed to serialize document: {}", e);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{MutationRecord, ObserveOptions};

    #[test]
    fn test_parse_builds_arena() {
        let document = parse_document(
            r#"<!DOCTYPE html><html><head><title>題</title></head><body><p class="a">こんにちは<b>世界</b></p></body></html>"#,
            "https://example.jp/",
        );

        let p = document.read(|t| t.find_element("p")).unwrap();
        document.read(|tree| {
            assert_eq!(tree.attribute(p, "class"), Some("a"));
            assert_eq!(tree.text_content(p), "こんにちは世界");
            assert!(tree.is_connected(p));
        });
        assert_eq!(document.location(), "https://example.jp/");
    }

    #[test]
    fn test_serialize_round_trip() {
        let html = r#"<!DOCTYPE html><html><head><script>if (a < b) {}</script></head><body><p title="&quot;q&quot;">a &amp; b<br>c</p><!--note--></body></html>"#;
        let document = parse_document(html, "about:blank");
        assert_eq!(serialize(&document), html);
    }

    #[test]
    fn test_serialize_keeps_raw_text_elements() {
        let html = r#"<!DOCTYPE html><html><head><style>p > b {}</style></head><body><noscript><p>a</p></noscript><iframe><b>x</b></iframe><xmp><i>y</i></xmp><img src="a.png"></body></html>"#;
        let document = parse_document(html, "about:blank");
        assert_eq!(serialize(&document), html);
    }

    #[test]
    fn test_serialize_escapes_translated_text() {
        let document = parse_document("<body><p>x</p></body>", "about:blank");
        let text = document.read(|t| t.children(t.find_element("p").unwrap())[0]);
        document.set_text(text, "a < b & \"c\"").unwrap();
        assert!(serialize(&document).contains("<p>a &lt; b &amp; \"c\"</p>"));
    }

    #[test]
    fn test_parse_without_body_markup_still_has_body() {
        let document = parse_document("just text", "about:blank");
        let body = document.body().unwrap();
        assert_eq!(document.read(|t| t.text_content(body)), "just text");
    }

    #[tokio::test]
    async fn test_append_fragment_reports_each_top_level_node() {
        let document = parse_document("<body></body>", "about:blank");
        let body = document.body().unwrap();
        let mut subscription = document.observe(body, ObserveOptions::content_changes());

        let added = append_fragment(&document, body, "<div><p>新しい</p></div>text<span>x</span>").unwrap();
        assert_eq!(added.len(), 3);

        let batch = subscription.next_batch().await.unwrap();
        assert_eq!(batch.len(), 3);
        assert!(batch
            .iter()
            .all(|r| matches!(r, MutationRecord::ChildList { target, .. } if *target == body)));
        assert_eq!(
            document.read(|t| t.text_content(body)),
            "新しいtextx"
        );
    }

    #[test]
    fn test_replace_content() {
        let document = parse_document("<body><p>古い</p></body>", "about:blank");
        let body = document.body().unwrap();
        replace_content(&document, body, "<main>新しい</main>").unwrap();
        assert_eq!(
            serialize(&document),
            "<!DOCTYPE html><html><head></head><body><main>新しい</main></body></html>"
        );
    }
}
