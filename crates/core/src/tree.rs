//! Arena-backed configuration trees
//!
//! A [`Tree`] is an arena of nodes indexed by integer handles ([`NodeId`]).
//! Parent/child relations are index edges; detaching a subtree unlinks it
//! without freeing; reclamation happens in bulk when the tree is dropped or
//! cleared at datastore scope. This makes snapshots cheap (a snapshot is a
//! deep copy of the live portion) and removes lifetime concerns from edit
//! composition.
//!
//! Nodes carry a qualified name, an optional textual body, keyed attributes,
//! and ordered children. The transient edit-operation annotation used during
//! edit composition is stored as the `operation` attribute and stripped once
//! an edit has been applied.

use crate::error::{Result, RpcError};
use crate::qname::QName;

/// Attribute carrying the per-node edit operation annotation
pub const OPERATION_ATTR: &str = "operation";

// =============================================================================
// EditOp
// =============================================================================

/// Edit operation, per NETCONF edit-config semantics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EditOp {
    /// Recursively union the subtree into the target
    Merge,
    /// Wholly replace the target subtree
    Replace,
    /// Create; fails with `data-exists` if the node already exists
    Create,
    /// Delete; fails with `data-missing` if the node is absent
    Delete,
    /// Delete, silent on absence
    Remove,
    /// Structural placeholder; no effect except descent
    None,
}

impl EditOp {
    /// Canonical string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            EditOp::Merge => "merge",
            EditOp::Replace => "replace",
            EditOp::Create => "create",
            EditOp::Delete => "delete",
            EditOp::Remove => "remove",
            EditOp::None => "none",
        }
    }

    /// Parse from the wire representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "merge" => Some(EditOp::Merge),
            "replace" => Some(EditOp::Replace),
            "create" => Some(EditOp::Create),
            "delete" => Some(EditOp::Delete),
            "remove" => Some(EditOp::Remove),
            "none" => Some(EditOp::None),
            _ => Option::None,
        }
    }
}

impl std::fmt::Display for EditOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Tree
// =============================================================================

/// Handle to a node within a [`Tree`] arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
struct Node {
    name: QName,
    body: Option<String>,
    attrs: Vec<(String, String)>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Schema-typed configuration tree
///
/// The root element is conventionally named `config` for datastore content;
/// parsed RPC documents keep whatever root the document had.
#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Default for Tree {
    fn default() -> Self {
        Tree::new()
    }
}

impl Tree {
    /// Create an empty tree with a `config` root
    pub fn new() -> Self {
        Tree::with_root(QName::local("config"))
    }

    /// Create an empty tree with the given root element
    pub fn with_root(name: QName) -> Self {
        Tree {
            nodes: vec![Node {
                name,
                body: None,
                attrs: Vec::new(),
                parent: None,
                children: Vec::new(),
            }],
            root: NodeId(0),
        }
    }

    /// Root node handle
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// True when the root has no children
    pub fn is_empty(&self) -> bool {
        self.nodes[self.root.index()].children.is_empty()
    }

    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    /// Qualified name of a node
    pub fn name(&self, id: NodeId) -> &QName {
        &self.node(id).name
    }

    /// Textual body of a node, if any
    pub fn body(&self, id: NodeId) -> Option<&str> {
        self.node(id).body.as_deref()
    }

    /// Set or clear the textual body
    pub fn set_body(&mut self, id: NodeId, body: Option<String>) {
        self.node_mut(id).body = body;
    }

    /// Attribute value by name
    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.node(id)
            .attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// All attributes of a node
    pub fn attrs(&self, id: NodeId) -> &[(String, String)] {
        &self.node(id).attrs
    }

    /// Set an attribute, replacing any previous value
    pub fn set_attr(&mut self, id: NodeId, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        let attrs = &mut self.node_mut(id).attrs;
        if let Some(slot) = attrs.iter_mut().find(|(k, _)| *k == name) {
            slot.1 = value;
        } else {
            attrs.push((name, value));
        }
    }

    /// Remove an attribute
    pub fn remove_attr(&mut self, id: NodeId, name: &str) {
        self.node_mut(id).attrs.retain(|(k, _)| k != name);
    }

    /// Edit-operation annotation of a node
    ///
    /// Reads the `operation` attribute (optionally prefixed). An
    /// unparseable value is reported as `bad-attribute` by [`Tree::operation_checked`];
    /// this accessor treats it as absent.
    pub fn operation(&self, id: NodeId) -> Option<EditOp> {
        self.operation_attr(id).and_then(EditOp::parse)
    }

    /// Edit-operation annotation, rejecting unparseable values
    pub fn operation_checked(&self, id: NodeId) -> Result<Option<EditOp>> {
        match self.operation_attr(id) {
            Option::None => Ok(Option::None),
            Some(raw) => match EditOp::parse(raw) {
                Some(op) => Ok(Some(op)),
                Option::None => Err(RpcError::new(
                    crate::error::ErrorType::Protocol,
                    crate::error::ErrorTag::BadAttribute,
                )
                .with_message(format!("Bad operation attribute: {}", raw))
                .with_info("bad-attribute", OPERATION_ATTR)),
            },
        }
    }

    fn operation_attr(&self, id: NodeId) -> Option<&str> {
        self.node(id).attrs.iter().find_map(|(k, v)| {
            let local = k.rsplit(':').next().unwrap_or(k);
            (local == OPERATION_ATTR).then_some(v.as_str())
        })
    }

    /// Set the edit-operation annotation
    pub fn set_operation(&mut self, id: NodeId, op: EditOp) {
        self.set_attr(id, OPERATION_ATTR, op.as_str());
    }

    /// Strip every edit-operation annotation in the subtree rooted at `id`
    ///
    /// Called after an edit has been applied; the annotation is transient.
    pub fn strip_operations(&mut self, id: NodeId) {
        for n in self.descendants(id) {
            self.node_mut(n).attrs.retain(|(k, _)| {
                let local = k.rsplit(':').next().unwrap_or(k);
                local != OPERATION_ATTR
            });
        }
    }

    /// Ordered child handles of a node
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    /// Number of children
    pub fn child_count(&self, id: NodeId) -> usize {
        self.node(id).children.len()
    }

    /// Parent handle, `None` for the root
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    /// Append a new child element
    ///
    /// # Panics
    ///
    /// Panics if the arena exceeds `u32::MAX` nodes.
    pub fn add_child(&mut self, parent: NodeId, name: QName) -> NodeId {
        let id = NodeId(u32::try_from(self.nodes.len()).expect("tree arena overflow"));
        self.nodes.push(Node {
            name,
            body: None,
            attrs: Vec::new(),
            parent: Some(parent),
            children: Vec::new(),
        });
        self.node_mut(parent).children.push(id);
        id
    }

    /// Unlink a subtree from its parent
    ///
    /// The nodes stay in the arena until bulk reclaim; they are simply no
    /// longer reachable from the root.
    pub fn detach(&mut self, id: NodeId) {
        if let Some(p) = self.node(id).parent {
            self.node_mut(p).children.retain(|&c| c != id);
            self.node_mut(id).parent = None;
        }
    }

    /// Remove all children of the root and reclaim the arena
    pub fn clear(&mut self) {
        self.nodes.truncate(1);
        self.nodes[0].children.clear();
        self.nodes[0].body = None;
    }

    /// First child matching `name`
    pub fn find_child(&self, parent: NodeId, name: &QName) -> Option<NodeId> {
        self.node(parent)
            .children
            .iter()
            .copied()
            .find(|&c| self.node(c).name.matches(name))
    }

    /// All children matching `name`
    pub fn find_children(&self, parent: NodeId, name: &QName) -> Vec<NodeId> {
        self.node(parent)
            .children
            .iter()
            .copied()
            .filter(|&c| self.node(c).name.matches(name))
            .collect()
    }

    /// Bodies of the named key leaves under a list entry
    ///
    /// Order follows `keys`; a missing key leaf yields `None` in its slot.
    pub fn key_values(&self, id: NodeId, keys: &[String]) -> Vec<Option<String>> {
        keys.iter()
            .map(|k| {
                self.find_child(id, &QName::local(k.clone()))
                    .and_then(|c| self.body(c).map(str::to_string))
            })
            .collect()
    }

    /// Find the child of `parent` that corresponds to `src_id` in `src`
    ///
    /// List entries (non-empty `keys`) are matched by their key-leaf values;
    /// leaf-list entries (`match_body`) by body; everything else by name
    /// alone.
    pub fn match_child(
        &self,
        parent: NodeId,
        src: &Tree,
        src_id: NodeId,
        keys: &[String],
        match_body: bool,
    ) -> Option<NodeId> {
        let name = src.name(src_id);
        if !keys.is_empty() {
            let want = src.key_values(src_id, keys);
            return self
                .find_children(parent, name)
                .into_iter()
                .find(|&c| self.key_values(c, keys) == want);
        }
        if match_body {
            let want = src.body(src_id);
            return self
                .find_children(parent, name)
                .into_iter()
                .find(|&c| self.body(c) == want);
        }
        self.find_child(parent, name)
    }

    /// Deep-copy a subtree from another tree, appended under `parent`
    pub fn graft(&mut self, parent: NodeId, src: &Tree, src_id: NodeId) -> NodeId {
        let id = self.add_child(parent, src.name(src_id).clone());
        self.node_mut(id).body = src.node(src_id).body.clone();
        self.node_mut(id).attrs = src.node(src_id).attrs.clone();
        for &c in src.children(src_id) {
            self.graft(id, src, c);
        }
        id
    }

    /// Extract a copy of the subtree rooted at `id` as its own tree
    pub fn subtree(&self, id: NodeId) -> Tree {
        let mut out = Tree::with_root(self.name(id).clone());
        out.nodes[0].body = self.node(id).body.clone();
        out.nodes[0].attrs = self.node(id).attrs.clone();
        for &c in self.children(id) {
            out.graft(out.root, self, c);
        }
        out
    }

    /// Preorder handles of the subtree rooted at `id` (inclusive)
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            out.push(n);
            for &c in self.children(n).iter().rev() {
                stack.push(c);
            }
        }
        out
    }

    /// Instance path of a node, e.g. `/system/hostname`
    ///
    /// The root element is not part of the path.
    pub fn path_to(&self, id: NodeId) -> String {
        let mut parts = Vec::new();
        let mut cur = id;
        while let Some(p) = self.parent(cur) {
            parts.push(self.name(cur).to_string());
            cur = p;
        }
        if parts.is_empty() {
            return "/".to_string();
        }
        parts.reverse();
        format!("/{}", parts.join("/"))
    }

    // =========================================================================
    // Canonical comparison
    // =========================================================================

    /// Content equality up to canonical form
    ///
    /// Container child order is not significant; the relative order of
    /// same-named siblings (list entries) is. Attribute order is not
    /// significant.
    pub fn content_eq(&self, other: &Tree) -> bool {
        self.node_eq(self.root, other, other.root)
    }

    fn node_eq(&self, a: NodeId, other: &Tree, b: NodeId) -> bool {
        let na = self.node(a);
        let nb = other.node(b);
        if na.name != nb.name || na.body != nb.body {
            return false;
        }
        let mut attrs_a = na.attrs.clone();
        let mut attrs_b = nb.attrs.clone();
        attrs_a.sort();
        attrs_b.sort();
        if attrs_a != attrs_b {
            return false;
        }
        if na.children.len() != nb.children.len() {
            return false;
        }
        let mut ca = na.children.clone();
        let mut cb = nb.children.clone();
        // Stable by-name sort: normalizes container order, keeps the
        // relative order of same-named list entries.
        ca.sort_by_key(|&c| self.node(c).name.to_string());
        cb.sort_by_key(|&c| other.node(c).name.to_string());
        ca.iter()
            .zip(cb.iter())
            .all(|(&x, &y)| self.node_eq(x, other, y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(tree: &mut Tree, parent: NodeId, name: &str, body: &str) -> NodeId {
        let id = tree.add_child(parent, QName::local(name));
        tree.set_body(id, Some(body.to_string()));
        id
    }

    #[test]
    fn test_build_and_navigate() {
        let mut t = Tree::new();
        let root = t.root();
        let sys = t.add_child(root, QName::local("system"));
        leaf(&mut t, sys, "hostname", "edge-1");

        assert_eq!(t.child_count(root), 1);
        let found = t.find_child(sys, &QName::local("hostname")).unwrap();
        assert_eq!(t.body(found), Some("edge-1"));
        assert_eq!(t.path_to(found), "/system/hostname");
        assert_eq!(t.parent(sys), Some(root));
    }

    #[test]
    fn test_detach_unlinks() {
        let mut t = Tree::new();
        let root = t.root();
        let a = t.add_child(root, QName::local("a"));
        t.detach(a);
        assert!(t.is_empty());
        assert_eq!(t.parent(a), None);
    }

    #[test]
    fn test_operation_annotation() {
        let mut t = Tree::new();
        let root = t.root();
        let a = t.add_child(root, QName::local("a"));
        t.set_operation(a, EditOp::Delete);
        assert_eq!(t.operation(a), Some(EditOp::Delete));

        t.strip_operations(root);
        assert_eq!(t.operation(a), None);
        assert!(t.attrs(a).is_empty());
    }

    #[test]
    fn test_operation_prefixed_attr() {
        let mut t = Tree::new();
        let root = t.root();
        let a = t.add_child(root, QName::local("a"));
        t.set_attr(a, "nc:operation", "replace");
        assert_eq!(t.operation(a), Some(EditOp::Replace));
    }

    #[test]
    fn test_operation_checked_rejects_garbage() {
        let mut t = Tree::new();
        let root = t.root();
        let a = t.add_child(root, QName::local("a"));
        t.set_attr(a, "operation", "explode");
        assert!(t.operation_checked(a).is_err());
    }

    #[test]
    fn test_graft_and_subtree() {
        let mut src = Tree::new();
        let sys = src.add_child(src.root(), QName::local("system"));
        leaf(&mut src, sys, "hostname", "edge-1");

        let mut dst = Tree::new();
        let droot = dst.root();
        dst.graft(droot, &src, sys);

        let sub = dst.subtree(dst.find_child(droot, &QName::local("system")).unwrap());
        assert_eq!(sub.name(sub.root()).local, "system");
        let h = sub.find_child(sub.root(), &QName::local("hostname")).unwrap();
        assert_eq!(sub.body(h), Some("edge-1"));
    }

    #[test]
    fn test_match_child_by_keys() {
        let mut t = Tree::new();
        let root = t.root();
        let e1 = t.add_child(root, QName::local("iface"));
        leaf(&mut t, e1, "name", "eth0");
        let e2 = t.add_child(root, QName::local("iface"));
        leaf(&mut t, e2, "name", "eth1");

        let mut probe = Tree::new();
        let p = probe.add_child(probe.root(), QName::local("iface"));
        leaf(&mut probe, p, "name", "eth1");

        let keys = vec!["name".to_string()];
        let hit = t.match_child(root, &probe, p, &keys, false);
        assert_eq!(hit, Some(e2));
    }

    #[test]
    fn test_match_child_by_body() {
        let mut t = Tree::new();
        let root = t.root();
        leaf(&mut t, root, "dns", "10.0.0.1");
        let b = leaf(&mut t, root, "dns", "10.0.0.2");

        let mut probe = Tree::new();
        let probe_root = probe.root();
        let p = leaf(&mut probe, probe_root, "dns", "10.0.0.2");

        let hit = t.match_child(root, &probe, p, &[], true);
        assert_eq!(hit, Some(b));
    }

    #[test]
    fn test_content_eq_container_order_insignificant() {
        let mut a = Tree::new();
        let a_root = a.root();
        leaf(&mut a, a_root, "x", "1");
        leaf(&mut a, a_root, "y", "2");

        let mut b = Tree::new();
        let b_root = b.root();
        leaf(&mut b, b_root, "y", "2");
        leaf(&mut b, b_root, "x", "1");

        assert!(a.content_eq(&b));
    }

    #[test]
    fn test_content_eq_list_order_significant() {
        let mut a = Tree::new();
        let a_root = a.root();
        leaf(&mut a, a_root, "member", "one");
        leaf(&mut a, a_root, "member", "two");

        let mut b = Tree::new();
        let b_root = b.root();
        leaf(&mut b, b_root, "member", "two");
        leaf(&mut b, b_root, "member", "one");

        assert!(!a.content_eq(&b));
    }

    #[test]
    fn test_clear_reclaims() {
        let mut t = Tree::new();
        let a = t.add_child(t.root(), QName::local("a"));
        t.add_child(a, QName::local("b"));
        t.clear();
        assert!(t.is_empty());
        assert_eq!(t.nodes.len(), 1);
    }
}
