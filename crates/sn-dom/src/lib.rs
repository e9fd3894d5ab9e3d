//! DOM tree data structures.
//!
//! Both the live page and every fetched document are `Document` arenas. Detaching
//! a node only unlinks it; `remove` frees the subtree and recycles its slots.
//! Every `NodeId` carries the generation of its slot, so an id of a freed node
//! never resolves again, even after the slot has been reused.

pub mod selector;
pub mod serialize;

use sn_core::NavError;
use sn_core::NavResult;
use std::collections::HashMap;
use std::fmt;

pub use selector::SelectorList;

/// ID used to address nodes in the DOM arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: usize,
    generation: u32,
}

impl NodeId {
    /// Arena slot. Slots of removed nodes are reused.
    pub fn index(self) -> usize {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.index, self.generation)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Document,
    Element(ElementData),
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementData {
    /// Lowercased tag name.
    pub tag: String,
    /// Attributes in source order; names are lowercased.
    pub attrs: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    kind: NodeKind,
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Arena-backed document tree.
#[derive(Debug, Clone)]
pub struct Document {
    slots: Vec<Slot>,
    free: Vec<usize>,
}

/// Result of copying a subtree from another document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedSubtree {
    pub root: NodeId,
    mapping: HashMap<NodeId, NodeId>,
}

impl ImportedSubtree {
    /// Maps a node of the source document to its copy.
    pub fn get(&self, source: NodeId) -> Option<NodeId> {
        self.mapping.get(&source).copied()
    }

    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }
}

/// Walks from a node's parent up to the document root.
pub struct Ancestors<'a> {
    document: &'a Document,
    next: Option<NodeId>,
}

impl Iterator for Ancestors<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = self.document.parent(current);
        Some(current)
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        Self {
            slots: vec![Slot {
                generation: 0,
                node: Some(Node {
                    parent: None,
                    children: Vec::new(),
                    kind: NodeKind::Document,
                }),
            }],
            free: Vec::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId {
            index: 0,
            generation: 0,
        }
    }

    /// Nodes currently allocated, connected or not.
    pub fn node_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Arena slots, including free ones waiting for reuse.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    pub fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.node(id).map(|node| &node.kind)
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        self.slots
            .get(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.slots
            .get_mut(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.create_element_with_attrs(tag, Vec::new())
    }

    pub fn create_element_with_attrs(&mut self, tag: &str, attrs: Vec<(String, String)>) -> NodeId {
        let attrs = attrs
            .into_iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value))
            .collect();
        self.push_node(NodeKind::Element(ElementData {
            tag: tag.to_ascii_lowercase(),
            attrs,
        }))
    }

    pub fn create_text(&mut self, text: impl Into<String>) -> NodeId {
        self.push_node(NodeKind::Text(text.into()))
    }

    pub fn create_comment(&mut self, text: impl Into<String>) -> NodeId {
        self.push_node(NodeKind::Comment(text.into()))
    }

    fn push_node(&mut self, kind: NodeKind) -> NodeId {
        let node = Node {
            parent: None,
            children: Vec::new(),
            kind,
        };
        if let Some(index) = self.free.pop() {
            if let Some(slot) = self.slots.get_mut(index) {
                slot.node = Some(node);
                return NodeId {
                    index,
                    generation: slot.generation,
                };
            }
        }

        let id = NodeId {
            index: self.slots.len(),
            generation: 0,
        };
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        id
    }

    /// Frees `id` and its descendants without touching its parent's child list.
    fn free_subtree(&mut self, id: NodeId) -> usize {
        let mut freed = 0_usize;
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(slot) = self.slots.get_mut(current.index) else {
                continue;
            };
            if slot.generation != current.generation {
                continue;
            }
            let Some(node) = slot.node.take() else {
                continue;
            };
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(current.index);
            stack.extend(node.children);
            freed += 1;
        }
        freed
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|node| node.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id)
            .map(|node| node.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
        Ancestors {
            document: self,
            next: self.parent(id),
        }
    }

    pub fn element(&self, id: NodeId) -> Option<&ElementData> {
        match self.kind(id) {
            Some(NodeKind::Element(element)) => Some(element),
            _ => None,
        }
    }

    fn element_mut(&mut self, id: NodeId) -> NavResult<&mut ElementData> {
        match self.node_mut(id).map(|node| &mut node.kind) {
            Some(NodeKind::Element(element)) => Ok(element),
            Some(_) => Err(NavError::new(
                "dom.node.not_element",
                format!("node {id} is not an element"),
            )),
            None => Err(unknown_node(id)),
        }
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        self.element(id).is_some()
    }

    pub fn tag_name(&self, id: NodeId) -> Option<&str> {
        self.element(id).map(|element| element.tag.as_str())
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id)?
            .attrs
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) -> NavResult<()> {
        let element = self.element_mut(id)?;
        let lowered = name.to_ascii_lowercase();
        match element.attrs.iter_mut().find(|(key, _)| *key == lowered) {
            Some((_, existing)) => {
                value.clone_into(existing);
            }
            None => element.attrs.push((lowered, value.to_owned())),
        }
        Ok(())
    }

    /// Returns whether the attribute was present.
    pub fn remove_attr(&mut self, id: NodeId, name: &str) -> NavResult<bool> {
        let element = self.element_mut(id)?;
        let before = element.attrs.len();
        element.attrs.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
        Ok(element.attrs.len() != before)
    }

    /// Concatenated text of all descendant text nodes, in document order.
    pub fn text_content(&self, id: NodeId) -> String {
        match self.kind(id) {
            Some(NodeKind::Text(text)) => text.clone(),
            Some(NodeKind::Comment(_)) | None => String::new(),
            Some(NodeKind::Document | NodeKind::Element(_)) => {
                let mut out = String::new();
                for descendant in self.descendants(id) {
                    if let Some(NodeKind::Text(text)) = self.kind(descendant) {
                        out.push_str(text);
                    }
                }
                out
            }
        }
    }

    /// Replaces every child of an element with a single text node. The old
    /// children are freed.
    pub fn set_text_content(&mut self, id: NodeId, value: &str) -> NavResult<()> {
        self.element_mut(id)?;
        let children = self
            .node_mut(id)
            .map(|node| std::mem::take(&mut node.children))
            .unwrap_or_default();
        for child in children {
            self.free_subtree(child);
        }
        if !value.is_empty() {
            let text = self.create_text(value);
            self.link(id, text, None);
        }
        Ok(())
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> NavResult<()> {
        self.check_insertion(parent, child)?;
        self.unlink(child);
        self.link(parent, child, None);
        Ok(())
    }

    pub fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        reference: NodeId,
    ) -> NavResult<()> {
        self.check_insertion(parent, child)?;
        if self.parent(reference) != Some(parent) {
            return Err(NavError::new(
                "dom.insert.reference_invalid",
                "insertBefore reference is not a direct child",
            ));
        }
        if child == reference {
            return Ok(());
        }

        self.unlink(child);
        let index = self
            .children(parent)
            .iter()
            .position(|id| *id == reference);
        self.link(parent, child, index);
        Ok(())
    }

    /// Unlinks a node from its parent. Detached nodes are left untouched.
    pub fn detach(&mut self, id: NodeId) -> NavResult<()> {
        if !self.contains(id) {
            return Err(unknown_node(id));
        }
        if id == self.root() {
            return Err(NavError::new(
                "dom.detach.root",
                "cannot detach the document node",
            ));
        }
        self.unlink(id);
        Ok(())
    }

    /// Detaches `id` and frees it together with its descendants.
    ///
    /// Returns the number of nodes freed. Ids of freed nodes stop resolving.
    pub fn remove(&mut self, id: NodeId) -> NavResult<usize> {
        self.detach(id)?;
        Ok(self.free_subtree(id))
    }

    /// Puts `replacement` where `target` is and detaches `target`.
    pub fn replace_with(&mut self, target: NodeId, replacement: NodeId) -> NavResult<()> {
        let Some(parent) = self.parent(target) else {
            return Err(NavError::new(
                "dom.replace.detached_target",
                format!("node {target} has no parent to replace it in"),
            ));
        };
        if target == replacement {
            return Ok(());
        }
        self.insert_before(parent, replacement, target)?;
        self.unlink(target);
        Ok(())
    }

    /// True when the node is reachable from the document root.
    pub fn is_connected(&self, id: NodeId) -> bool {
        if !self.contains(id) {
            return false;
        }
        id == self.root() || self.ancestors(id).any(|ancestor| ancestor == self.root())
    }

    /// Pre-order descendants of `scope`, excluding `scope` itself.
    pub fn descendants(&self, scope: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(scope).iter().rev().copied().collect();
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.children(current).iter().rev().copied());
        }
        out
    }

    pub fn first_element_by_tag(&self, tag: &str) -> Option<NodeId> {
        self.descendants(self.root())
            .into_iter()
            .find(|id| self.tag_name(*id).is_some_and(|name| name.eq_ignore_ascii_case(tag)))
    }

    pub fn document_element(&self) -> Option<NodeId> {
        self.children(self.root())
            .iter()
            .copied()
            .find(|id| self.is_element(*id))
    }

    pub fn head(&self) -> Option<NodeId> {
        self.first_element_by_tag("head")
    }

    pub fn body(&self) -> Option<NodeId> {
        self.first_element_by_tag("body")
    }

    /// Whitespace-collapsed text of the first `<title>`.
    pub fn title(&self) -> String {
        self.first_element_by_tag("title")
            .map(|id| {
                self.text_content(id)
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default()
    }

    /// Connected elements matching `selectors`, in document order.
    pub fn query_selector_all(&self, selectors: &SelectorList) -> Vec<NodeId> {
        self.query_selector_all_within(self.root(), selectors)
    }

    /// Descendants of `scope` matching `selectors`, in document order.
    ///
    /// Ancestors above `scope` still take part in combinator matching, so
    /// querying `a` within `main` equals querying `main a` when `main` is unique.
    pub fn query_selector_all_within(&self, scope: NodeId, selectors: &SelectorList) -> Vec<NodeId> {
        self.descendants(scope)
            .into_iter()
            .filter(|id| selectors.matches(self, *id))
            .collect()
    }

    pub fn query_selector(&self, selectors: &SelectorList) -> Option<NodeId> {
        self.descendants(self.root())
            .into_iter()
            .find(|id| selectors.matches(self, *id))
    }

    /// Parses `selector` and runs `query_selector_all`.
    pub fn select(&self, selector: &str) -> NavResult<Vec<NodeId>> {
        let selectors = SelectorList::parse(selector)?;
        Ok(self.query_selector_all(&selectors))
    }

    pub fn matches(&self, id: NodeId, selectors: &SelectorList) -> bool {
        selectors.matches(self, id)
    }

    /// Nearest inclusive ancestor matching `selectors`.
    pub fn closest(&self, id: NodeId, selectors: &SelectorList) -> Option<NodeId> {
        std::iter::once(id)
            .chain(self.ancestors(id))
            .find(|candidate| selectors.matches(self, *candidate))
    }

    /// Deep-copies `source_root` of `source` into this arena as a detached subtree.
    pub fn import_subtree(
        &mut self,
        source: &Document,
        source_root: NodeId,
    ) -> NavResult<ImportedSubtree> {
        let Some(kind) = source.kind(source_root) else {
            return Err(unknown_node(source_root));
        };
        if matches!(kind, NodeKind::Document) {
            return Err(NavError::new(
                "dom.import.document_node",
                "cannot import a document node",
            ));
        }

        let mut mapping = HashMap::new();
        let root = self.push_node(kind.clone());
        mapping.insert(source_root, root);

        let mut stack = vec![(source_root, root)];
        while let Some((source_parent, copy_parent)) = stack.pop() {
            for source_child in source.children(source_parent) {
                let Some(child_kind) = source.kind(*source_child) else {
                    continue;
                };
                let copy = self.push_node(child_kind.clone());
                self.link(copy_parent, copy, None);
                mapping.insert(*source_child, copy);
                stack.push((*source_child, copy));
            }
        }

        Ok(ImportedSubtree { root, mapping })
    }

    fn check_insertion(&self, parent: NodeId, child: NodeId) -> NavResult<()> {
        if !self.contains(parent) {
            return Err(unknown_node(parent));
        }
        if !self.contains(child) {
            return Err(unknown_node(child));
        }
        if matches!(
            self.kind(parent),
            Some(NodeKind::Text(_) | NodeKind::Comment(_))
        ) {
            return Err(NavError::new(
                "dom.insert.parent_invalid",
                "text and comment nodes cannot have children",
            ));
        }
        if child == self.root() || child == parent {
            return Err(NavError::new(
                "dom.insert.child_invalid",
                "invalid node for insertion",
            ));
        }
        if self.ancestors(parent).any(|ancestor| ancestor == child) {
            return Err(NavError::new(
                "dom.insert.cycle",
                "insertion would create a cycle",
            ));
        }
        Ok(())
    }

    fn unlink(&mut self, id: NodeId) {
        let Some(parent) = self.node_mut(id).and_then(|node| node.parent.take()) else {
            return;
        };
        if let Some(parent) = self.node_mut(parent) {
            parent.children.retain(|child| *child != id);
        }
    }

    fn link(&mut self, parent: NodeId, child: NodeId, index: Option<usize>) {
        if let Some(node) = self.node_mut(child) {
            node.parent = Some(parent);
        }
        let Some(parent) = self.node_mut(parent) else {
            return;
        };
        match index {
            Some(index) if index <= parent.children.len() => parent.children.insert(index, child),
            _ => parent.children.push(child),
        }
    }
}

fn unknown_node(id: NodeId) -> NavError {
    NavError::new(
        "dom.node.unknown",
        format!("node {id} does not belong to this document"),
    )
}
