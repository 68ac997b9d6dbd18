//! Recursive resource tree walker.
//!
//! A [`TreeSource`] lists one container at a time and classifies each raw
//! item once. [`TreeWalker`] turns that into a nested [`ResourceNode`] tree,
//! issuing exactly one listing request per container it expands.

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::collections::HashSet;
use tracing::{warn, Instrument, Span};

use integrator_common::{ResourceNode, Result};

/// One page of a container listing.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    /// Raw items in service order.
    pub items: Vec<Value>,
    /// Continuation link when the service has more pages.
    pub next_link: Option<String>,
}

impl Listing {
    pub fn new(items: Vec<Value>) -> Self {
        Self {
            items,
            next_link: None,
        }
    }
}

/// Shape of a listed item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    /// Item that can have children, listed through `children_ref`.
    Container {
        name: String,
        id: String,
        children_ref: String,
    },
    Leaf {
        name: String,
        id: String,
    },
}

/// A hierarchical service that can be walked.
#[async_trait]
pub trait TreeSource: Send + Sync {
    /// Short name used in log records.
    fn name(&self) -> &str;

    /// Reference of the top-level listing.
    fn root_ref(&self) -> String;

    /// List the first page of children under `reference`.
    async fn list(&self, token: &str, reference: &str) -> Result<Listing>;

    /// Classify a raw item, or `None` when it has no usable id or name.
    fn classify(&self, raw: &Value) -> Option<Classified>;
}

/// Outcome of a walk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalkResult {
    /// Top-level nodes in service order.
    pub nodes: Vec<ResourceNode>,
    /// The start listing had more pages than were walked.
    pub truncated: bool,
}

/// Walk limits.
#[derive(Debug, Clone, Copy, Default)]
pub struct WalkOptions {
    /// Deepest level whose containers are expanded; top-level items are
    /// level 1. `None` walks everything.
    pub max_depth: Option<usize>,
}

/// Builds resource trees from a [`TreeSource`].
pub struct TreeWalker<S> {
    source: S,
    options: WalkOptions,
    span: Span,
}

impl<S: TreeSource> TreeWalker<S> {
    pub fn new(source: S) -> Self {
        let span = tracing::info_span!("tree_walker", source = source.name());
        Self {
            source,
            options: WalkOptions::default(),
            span,
        }
    }

    pub fn with_options(mut self, options: WalkOptions) -> Self {
        self.options = options;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Walk from `start`, or from the source's root when `None`.
    ///
    /// Never fails: a container whose listing fails gets no children, and a
    /// failing start listing yields an empty tree. Truncation below the top
    /// level is flagged on the container nodes themselves.
    pub async fn walk(&self, token: &str, start: Option<&str>) -> WalkResult {
        let reference = start
            .map(str::to_string)
            .unwrap_or_else(|| self.source.root_ref());
        let mut visited = HashSet::new();

        let (nodes, truncated) = self
            .expand(token, reference.clone(), 1, &mut visited)
            .instrument(self.span.clone())
            .await;

        tracing::info!(
            parent: &self.span,
            operation = "walk",
            subject = %reference,
            "Walked {} nodes{}",
            nodes.iter().map(ResourceNode::count).sum::<usize>(),
            if truncated { " (top level truncated)" } else { "" }
        );
        WalkResult { nodes, truncated }
    }

    /// List `reference` and recurse into its containers.
    ///
    /// `level` is the depth of the items being listed. Returns the nodes and
    /// whether the listing had a continuation link.
    fn expand<'a>(
        &'a self,
        token: &'a str,
        reference: String,
        level: usize,
        visited: &'a mut HashSet<String>,
    ) -> BoxFuture<'a, (Vec<ResourceNode>, bool)> {
        async move {
            visited.insert(reference.clone());

            let listing = match self.source.list(token, &reference).await {
                Ok(listing) => listing,
                Err(e) => {
                    warn!(
                        operation = "list",
                        subject = %reference,
                        "Listing failed, recording no children: {}",
                        e
                    );
                    return (Vec::new(), false);
                }
            };

            let truncated = listing.next_link.is_some();
            if truncated {
                warn!(
                    operation = "list",
                    subject = %reference,
                    "More items available; only the first page was walked"
                );
            }

            let mut nodes = Vec::with_capacity(listing.items.len());
            for raw in &listing.items {
                match self.source.classify(raw) {
                    Some(Classified::Leaf { name, id }) => nodes.push(ResourceNode::leaf(name, id)),
                    Some(Classified::Container {
                        name,
                        id,
                        children_ref,
                    }) => {
                        if visited.contains(&children_ref) {
                            warn!(
                                operation = "walk",
                                subject = %children_ref,
                                "Container already visited, not descending"
                            );
                            nodes.push(ResourceNode::container(name, id, Vec::new()));
                        } else if self.options.max_depth.is_some_and(|max| level >= max) {
                            nodes.push(ResourceNode::container(name, id, Vec::new()));
                        } else {
                            let (children, child_truncated) =
                                self.expand(token, children_ref, level + 1, &mut *visited).await;
                            let mut node = ResourceNode::container(name, id, children);
                            node.truncated = child_truncated;
                            nodes.push(node);
                        }
                    }
                    None => {
                        warn!(
                            operation = "classify",
                            subject = %reference,
                            "Skipping item without id or name"
                        );
                    }
                }
            }

            (nodes, truncated)
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTreeSource;
    use integrator_common::ResourceKind;
    use serde_json::json;

    fn folder(id: &str, name: &str) -> Value {
        json!({"id": id, "name": name, "folder": {"childCount": 1}})
    }

    fn file(id: &str, name: &str) -> Value {
        json!({"id": id, "name": name, "file": {}})
    }

    #[tokio::test]
    async fn test_three_level_tree() {
        let source = MemoryTreeSource::new()
            .with_listing("root", vec![folder("a", "A"), file("b", "b.txt")])
            .with_listing("a", vec![folder("c", "C")])
            .with_listing("c", vec![file("d", "d.txt")]);
        let walker = TreeWalker::new(source);

        let tree = walker.walk("token", None).await.nodes;

        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].name, "A");
        assert_eq!(tree[0].kind, ResourceKind::Container);
        assert_eq!(tree[1].name, "b.txt");
        assert_eq!(tree[1].kind, ResourceKind::Leaf);
        assert!(tree[1].children.is_none());

        let c = tree[0].child("C").unwrap();
        assert_eq!(c.children().len(), 1);
        assert_eq!(c.children()[0].name, "d.txt");
        assert_eq!(c.children()[0].id, "d");

        // One listing per container.
        assert_eq!(walker.source().calls(), vec!["root", "a", "c"]);
    }

    #[tokio::test]
    async fn test_start_reference() {
        let source = MemoryTreeSource::new()
            .with_listing("root", vec![folder("a", "A")])
            .with_listing("a", vec![file("x", "x.txt")]);
        let walker = TreeWalker::new(source);

        let tree = walker.walk("token", Some("a")).await.nodes;

        assert_eq!(tree, vec![ResourceNode::leaf("x.txt", "x")]);
        assert_eq!(walker.source().calls(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_failed_listing_yields_empty_children() {
        let source = MemoryTreeSource::new()
            .with_listing("root", vec![folder("a", "A"), folder("b", "B")])
            .with_failure("a")
            .with_listing("b", vec![file("y", "y.txt")]);
        let walker = TreeWalker::new(source);

        let tree = walker.walk("token", None).await.nodes;

        assert_eq!(tree.len(), 2);
        assert!(tree[0].is_container());
        assert!(tree[0].children().is_empty());
        assert_eq!(tree[1].children().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_start_listing() {
        let walker = TreeWalker::new(MemoryTreeSource::new().with_failure("root"));

        let result = walker.walk("token", None).await;

        assert!(result.nodes.is_empty());
        assert!(!result.truncated);
    }

    #[tokio::test]
    async fn test_empty_container() {
        let source = MemoryTreeSource::new()
            .with_listing("root", vec![folder("a", "Empty")])
            .with_listing("a", vec![]);
        let walker = TreeWalker::new(source);

        let tree = walker.walk("token", None).await.nodes;

        assert_eq!(tree[0].children, Some(Vec::new()));
    }

    #[tokio::test]
    async fn test_order_and_duplicate_names_preserved() {
        let source = MemoryTreeSource::new().with_listing(
            "root",
            vec![file("1", "z.txt"), file("2", "a.txt"), file("3", "a.txt")],
        );
        let walker = TreeWalker::new(source);

        let tree = walker.walk("token", None).await.nodes;

        let ids: Vec<_> = tree.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_cycle_is_not_followed() {
        let source = MemoryTreeSource::new()
            .with_listing("root", vec![folder("a", "A")])
            .with_listing("a", vec![folder("b", "B")])
            .with_listing("b", vec![folder("a", "A again")]);
        let walker = TreeWalker::new(source);

        let tree = walker.walk("token", None).await.nodes;

        let b = tree[0].child("B").unwrap();
        let again = b.child("A again").unwrap();
        assert!(again.children().is_empty());
        assert_eq!(walker.source().calls(), vec!["root", "a", "b"]);
    }

    #[tokio::test]
    async fn test_truncated_listing_is_flagged() {
        let source = MemoryTreeSource::new()
            .with_listing("root", vec![folder("a", "A")])
            .with_paged_listing(
                "a",
                vec![file("1", "one.txt")],
                "https://graph.microsoft.com/v1.0/me/drive/items/a/children?$skiptoken=x",
            );
        let walker = TreeWalker::new(source);

        let tree = walker.walk("token", None).await.nodes;

        assert!(tree[0].truncated);
        assert_eq!(tree[0].children().len(), 1);
    }

    #[tokio::test]
    async fn test_truncated_start_listing_is_reported() {
        let source = MemoryTreeSource::new()
            .with_paged_listing(
                "root",
                vec![file("1", "one.txt")],
                "https://graph.microsoft.com/v1.0/me/drive/root/children?$skiptoken=x",
            );
        let walker = TreeWalker::new(source);

        let result = walker.walk("token", None).await;

        assert!(result.truncated);
        assert_eq!(result.nodes, vec![ResourceNode::leaf("one.txt", "1")]);
    }

    #[tokio::test]
    async fn test_complete_start_listing_is_not_truncated() {
        let source = MemoryTreeSource::new()
            .with_listing("root", vec![folder("a", "A")])
            .with_paged_listing("a", vec![file("1", "one.txt")], "next");
        let walker = TreeWalker::new(source);

        let result = walker.walk("token", None).await;

        assert!(!result.truncated);
        assert!(result.nodes[0].truncated);
    }

    #[tokio::test]
    async fn test_unclassifiable_items_skipped() {
        let source = MemoryTreeSource::new().with_listing(
            "root",
            vec![json!({"name": "no id"}), file("1", "ok.txt")],
        );
        let walker = TreeWalker::new(source);

        let tree = walker.walk("token", None).await.nodes;

        assert_eq!(tree, vec![ResourceNode::leaf("ok.txt", "1")]);
    }

    #[tokio::test]
    async fn test_max_depth() {
        let source = MemoryTreeSource::new()
            .with_listing("root", vec![folder("a", "A")])
            .with_listing("a", vec![folder("b", "B")])
            .with_listing("b", vec![file("c", "c.txt")]);
        let walker = TreeWalker::new(source).with_options(WalkOptions { max_depth: Some(2) });

        let tree = walker.walk("token", None).await.nodes;

        let b = tree[0].child("B").unwrap();
        assert!(b.is_container());
        assert!(b.children().is_empty());
        assert_eq!(walker.source().calls(), vec!["root", "a"]);
    }
}
