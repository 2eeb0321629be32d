//! Arena document tree with structural-change events.
//!
//! Nodes live in a flat arena addressed by [`NodeId`]; a detached node keeps
//! its slot so ids stay stable for the lifetime of one proposal view. Every
//! mutation records a [`ChangeEvent`] that downstream passes drain in
//! batches, replacing a host-level mutation observer.

use std::collections::HashSet;

/// ID used to address nodes in the arena.
pub type NodeId = usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
        children: Vec<NodeId>,
    },
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub parent: Option<NodeId>,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Inserted,
    Removed,
    TextChanged,
    AttrChanged,
}

/// One structural mutation, as observed by the reconciliation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeEvent {
    pub node: NodeId,
    pub kind: ChangeKind,
}

/// Mutable document tree for one proposal view.
#[derive(Debug, Clone)]
pub struct DomTree {
    nodes: Vec<Node>,
    root: NodeId,
    changes: Vec<ChangeEvent>,
}

impl Default for DomTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DomTree {
    pub fn new() -> Self {
        let root = Node {
            parent: None,
            kind: NodeKind::Element {
                tag: "document".to_owned(),
                attrs: Vec::new(),
                children: Vec::new(),
            },
        };
        Self {
            nodes: vec![root],
            root: 0,
            changes: Vec::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id].kind
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id).and_then(|node| node.parent)
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.nodes[id].kind, NodeKind::Element { .. })
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        match &self.nodes[id].kind {
            NodeKind::Element { tag, .. } => Some(tag.as_str()),
            NodeKind::Text(_) => None,
        }
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        match &self.nodes[id].kind {
            NodeKind::Text(text) => Some(text.as_str()),
            NodeKind::Element { .. } => None,
        }
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        match &self.nodes[id].kind {
            NodeKind::Element { children, .. } => children.as_slice(),
            NodeKind::Text(_) => &[],
        }
    }

    pub fn attrs(&self, id: NodeId) -> &[(String, String)] {
        match &self.nodes[id].kind {
            NodeKind::Element { attrs, .. } => attrs.as_slice(),
            NodeKind::Text(_) => &[],
        }
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.attrs(id)
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.create_element_with_attrs(tag, Vec::new())
    }

    pub fn create_element_with_attrs(
        &mut self,
        tag: &str,
        attrs: Vec<(String, String)>,
    ) -> NodeId {
        self.push_node(Node {
            parent: None,
            kind: NodeKind::Element {
                tag: tag.to_ascii_lowercase(),
                attrs,
                children: Vec::new(),
            },
        })
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push_node(Node {
            parent: None,
            kind: NodeKind::Text(text.to_owned()),
        })
    }

    fn push_node(&mut self, node: Node) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(node);
        id
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        let len = self.children(parent).len();
        self.insert_child(parent, len, child);
    }

    pub fn insert_child(&mut self, parent: NodeId, index: usize, child: NodeId) {
        self.detach_quiet(child);
        if let NodeKind::Element { children, .. } = &mut self.nodes[parent].kind {
            let index = index.min(children.len());
            children.insert(index, child);
            self.nodes[child].parent = Some(parent);
            self.record(child, ChangeKind::Inserted);
        }
    }

    /// Detaches a node from its parent; the arena slot is kept.
    pub fn detach(&mut self, id: NodeId) {
        if self.detach_quiet(id) {
            self.record(id, ChangeKind::Removed);
        }
    }

    fn detach_quiet(&mut self, id: NodeId) -> bool {
        let Some(parent) = self.nodes[id].parent.take() else {
            return false;
        };
        if let NodeKind::Element { children, .. } = &mut self.nodes[parent].kind {
            children.retain(|child| *child != id);
        }
        true
    }

    pub fn set_text(&mut self, id: NodeId, text: &str) {
        if let NodeKind::Text(current) = &mut self.nodes[id].kind {
            if current != text {
                *current = text.to_owned();
                self.record(id, ChangeKind::TextChanged);
            }
        }
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) {
        if let NodeKind::Element { attrs, .. } = &mut self.nodes[id].kind {
            match attrs.iter_mut().find(|(key, _)| key == name) {
                Some((_, current)) if current == value => return,
                Some((_, current)) => *current = value.to_owned(),
                None => attrs.push((name.to_owned(), value.to_owned())),
            }
            self.record(id, ChangeKind::AttrChanged);
        }
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) {
        if let NodeKind::Element { attrs, .. } = &mut self.nodes[id].kind {
            let before = attrs.len();
            attrs.retain(|(key, _)| key != name);
            if attrs.len() != before {
                self.record(id, ChangeKind::AttrChanged);
            }
        }
    }

    /// Replaces a single text child on an element, creating it when missing.
    ///
    /// Used for total-display nodes whose only content is the formatted sum.
    pub fn set_sole_text_child(&mut self, element: NodeId, text: &str) {
        let existing = self
            .children(element)
            .iter()
            .copied()
            .find(|child| self.text(*child).is_some());
        match existing {
            Some(child) => self.set_text(child, text),
            None => {
                let child = self.create_text(text);
                self.append_child(element, child);
            }
        }
    }

    /// Moves `children[start..end]` of `parent` into a fresh wrapper element
    /// inserted at `start`. Original markup is preserved, only re-parented.
    pub fn wrap_child_range(
        &mut self,
        parent: NodeId,
        start: usize,
        end: usize,
        wrapper_tag: &str,
        wrapper_attrs: Vec<(String, String)>,
    ) -> Option<NodeId> {
        let child_count = self.children(parent).len();
        if start >= end || end > child_count {
            return None;
        }
        let moved = self.children(parent)[start..end].to_vec();
        let wrapper = self.create_element_with_attrs(wrapper_tag, wrapper_attrs);
        for child in &moved {
            self.detach_quiet(*child);
        }
        self.insert_child(parent, start, wrapper);
        for child in moved {
            self.append_child(wrapper, child);
        }
        Some(wrapper)
    }

    /// Splits a text node at `at`; the tail becomes the next sibling.
    /// Returns the tail, or `None` when the split would be empty on either
    /// side or `at` is not a char boundary.
    pub fn split_text(&mut self, id: NodeId, at: usize) -> Option<NodeId> {
        let content = self.text(id)?.to_owned();
        if at == 0 || at >= content.len() || !content.is_char_boundary(at) {
            return None;
        }
        let parent = self.parent(id)?;
        let index = self.index_in_parent(id)?;
        self.set_text(id, &content[..at]);
        let tail = self.create_text(&content[at..]);
        self.insert_child(parent, index + 1, tail);
        Some(tail)
    }

    /// Splits a text node around `[start, end)` byte offsets and wraps the
    /// middle piece in a new element. Offsets must be char boundaries.
    pub fn wrap_text_range(
        &mut self,
        text_id: NodeId,
        start: usize,
        end: usize,
        wrapper_tag: &str,
        wrapper_attrs: Vec<(String, String)>,
    ) -> Option<NodeId> {
        let content = self.text(text_id)?.to_owned();
        if start >= end
            || end > content.len()
            || !content.is_char_boundary(start)
            || !content.is_char_boundary(end)
        {
            return None;
        }
        let parent = self.parent(text_id)?;
        let index = self.index_in_parent(text_id)?;

        let before = &content[..start];
        let middle = &content[start..end];
        let after = &content[end..];

        self.set_text(text_id, before);
        let wrapper = self.create_element_with_attrs(wrapper_tag, wrapper_attrs);
        let middle_id = self.create_text(middle);
        self.append_child(wrapper, middle_id);
        self.insert_child(parent, index + 1, wrapper);
        if !after.is_empty() {
            let after_id = self.create_text(after);
            self.insert_child(parent, index + 2, after_id);
        }
        if before.is_empty() {
            self.detach(text_id);
        }
        Some(wrapper)
    }

    pub fn index_in_parent(&self, id: NodeId) -> Option<usize> {
        let parent = self.parent(id)?;
        self.children(parent).iter().position(|child| *child == id)
    }

    /// Pre-order walk of the subtree rooted at `id`.
    pub fn walk(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current);
            for child in self.children(current).iter().rev() {
                stack.push(*child);
            }
        }
        out
    }

    pub fn find_first(&self, from: NodeId, tag: &str) -> Option<NodeId> {
        self.walk(from)
            .into_iter()
            .find(|id| self.tag(*id).is_some_and(|t| t.eq_ignore_ascii_case(tag)))
    }

    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = self.parent(id);
        while let Some(node) = current {
            out.push(node);
            current = self.parent(node);
        }
        out
    }

    pub fn is_descendant_of(&self, id: NodeId, ancestor: NodeId) -> bool {
        let mut current = self.parent(id);
        while let Some(node) = current {
            if node == ancestor {
                return true;
            }
            current = self.parent(node);
        }
        false
    }

    pub fn nearest_common_ancestor(&self, ids: &[NodeId]) -> Option<NodeId> {
        let first = *ids.first()?;
        let mut chain = vec![first];
        chain.extend(self.ancestors(first));
        for id in &ids[1..] {
            let mut lineage = vec![*id];
            lineage.extend(self.ancestors(*id));
            let lineage: HashSet<NodeId> = lineage.into_iter().collect();
            chain.retain(|candidate| lineage.contains(candidate));
        }
        chain.first().copied()
    }

    /// Aggregated text of the subtree, skipping script/style content.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        match &self.nodes[id].kind {
            NodeKind::Text(text) => out.push_str(text),
            NodeKind::Element { tag, children, .. } => {
                if matches!(tag.as_str(), "script" | "style" | "noscript") {
                    return;
                }
                for child in children {
                    self.collect_text(*child, out);
                }
            }
        }
    }

    pub fn take_changes(&mut self) -> Vec<ChangeEvent> {
        std::mem::take(&mut self.changes)
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    fn record(&mut self, node: NodeId, kind: ChangeKind) {
        self.changes.push(ChangeEvent { node, kind });
    }
}

/// Processed-set keyed by node identity.
///
/// Replaces attribute-presence visited markers: a node is "done" when its id
/// is in the set, independent of what the document text looks like.
#[derive(Debug, Clone, Default)]
pub struct NodeSet {
    inner: HashSet<NodeId>,
}

impl NodeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when the node was already present.
    pub fn insert(&mut self, id: NodeId) -> bool {
        self.inner.insert(id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.inner.contains(&id)
    }

    pub fn remove(&mut self, id: NodeId) {
        self.inner.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::ChangeKind;
    use super::DomTree;
    use super::NodeSet;

    fn sample_tree() -> (DomTree, super::NodeId, super::NodeId) {
        let mut tree = DomTree::new();
        let table = tree.create_element("table");
        let row = tree.create_element("tr");
        let cell = tree.create_element("td");
        let text = tree.create_text("Asphalt shingles $3,600.00");
        tree.append_child(cell, text);
        tree.append_child(row, cell);
        tree.append_child(table, row);
        let root = tree.root();
        tree.append_child(root, table);
        (tree, table, text)
    }

    #[test]
    fn text_content_aggregates_nested_runs() {
        let (mut tree, table, _) = sample_tree();
        let row = tree.children(table)[0];
        let cell = tree.children(row)[0];
        let extra = tree.create_text(" installed");
        tree.append_child(cell, extra);
        assert_eq!(
            tree.text_content(table),
            "Asphalt shingles $3,600.00 installed"
        );
    }

    #[test]
    fn text_content_skips_script_and_style() {
        let mut tree = DomTree::new();
        let root = tree.root();
        let script = tree.create_element("script");
        let code = tree.create_text("var x = 1;");
        tree.append_child(script, code);
        tree.append_child(root, script);
        let text = tree.create_text("visible");
        tree.append_child(root, text);
        assert_eq!(tree.text_content(root), "visible");
    }

    #[test]
    fn mutations_record_change_events() {
        let (mut tree, _, text) = sample_tree();
        tree.take_changes();
        tree.set_text(text, "updated");
        tree.set_text(text, "updated");
        let changes = tree.take_changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::TextChanged);
        assert!(!tree.has_pending_changes());
    }

    #[test]
    fn set_attr_is_quiet_when_value_unchanged() {
        let (mut tree, table, _) = sample_tree();
        tree.take_changes();
        tree.set_attr(table, "data-section", "roofing.asphalt");
        tree.set_attr(table, "data-section", "roofing.asphalt");
        assert_eq!(tree.take_changes().len(), 1);
    }

    #[test]
    fn wrap_text_range_splits_and_preserves_surroundings() {
        let (mut tree, table, text) = sample_tree();
        let wrapper = tree.wrap_text_range(
            text,
            17,
            26,
            "span",
            vec![("data-amount".to_owned(), "3600.00".to_owned())],
        );
        assert!(wrapper.is_some());
        assert_eq!(tree.text_content(table), "Asphalt shingles $3,600.00");
        let wrapper = wrapper.unwrap_or_default();
        assert_eq!(tree.text_content(wrapper), "$3,600.00");
        assert_eq!(tree.attr(wrapper, "data-amount"), Some("3600.00"));
    }

    #[test]
    fn split_text_moves_the_tail_to_a_sibling() {
        let (mut tree, _, text) = sample_tree();
        let parent = tree.parent(text).unwrap_or_default();
        let tail = tree.split_text(text, 17);
        assert!(tail.is_some());
        let tail = tail.unwrap_or_default();
        assert_eq!(tree.text(text), Some("Asphalt shingles "));
        assert_eq!(tree.text(tail), Some("$3,600.00"));
        assert_eq!(tree.children(parent), &[text, tail]);

        assert!(tree.split_text(text, 0).is_none());
        assert!(tree.split_text(text, 999).is_none());
    }

    #[test]
    fn wrap_text_range_rejects_bad_offsets() {
        let (mut tree, _, text) = sample_tree();
        assert!(tree.wrap_text_range(text, 5, 5, "span", Vec::new()).is_none());
        assert!(tree.wrap_text_range(text, 5, 999, "span", Vec::new()).is_none());
    }

    #[test]
    fn wrap_child_range_keeps_document_order() {
        let mut tree = DomTree::new();
        let root = tree.root();
        let a = tree.create_text("$");
        let b = tree.create_element("b");
        let digits = tree.create_text("3,600.00");
        tree.append_child(b, digits);
        let c = tree.create_text(" total");
        tree.append_child(root, a);
        tree.append_child(root, b);
        tree.append_child(root, c);

        let wrapper = tree.wrap_child_range(root, 0, 2, "span", Vec::new());
        assert!(wrapper.is_some());
        assert_eq!(tree.text_content(root), "$3,600.00 total");
        assert_eq!(tree.children(root).len(), 2);
    }

    #[test]
    fn nearest_common_ancestor_finds_enclosing_block() {
        let (tree, table, text) = sample_tree();
        let row = tree.children(table)[0];
        let cell = tree.children(row)[0];
        assert_eq!(tree.nearest_common_ancestor(&[text, cell]), Some(cell));
        assert_eq!(tree.nearest_common_ancestor(&[text, row]), Some(row));
    }

    #[test]
    fn detached_nodes_keep_their_slots() {
        let (mut tree, table, text) = sample_tree();
        let count = tree.node_count();
        tree.detach(table);
        assert_eq!(tree.node_count(), count);
        assert_eq!(tree.text(text), Some("Asphalt shingles $3,600.00"));
        assert!(!tree.is_descendant_of(text, tree.root()));
    }

    #[test]
    fn node_set_reports_first_insert_only() {
        let mut set = NodeSet::new();
        assert!(set.insert(4));
        assert!(!set.insert(4));
        assert!(set.contains(4));
        assert_eq!(set.len(), 1);
    }
}
