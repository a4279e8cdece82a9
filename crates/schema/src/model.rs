//! Schema model
//!
//! The YANG parser is a collaborator, not part of this crate; what lives
//! here is the parser's *output*: the schema tree the validator and the
//! edit machinery consult. Specs are built programmatically through the
//! constructors below (typically by generated code or by the embedding
//! application at startup).
//!
//! Every node in a populated datastore must resolve to a [`SchemaNode`] in
//! the active spec, except freely-typed `rpc-error` payloads. A spec built
//! with [`SchemaSpec::any`] suspends that invariant for deployments that
//! load no model.

use trellis_core::{Path, QName};

/// Type of a leaf or leaf-list value
#[derive(Debug, Clone)]
pub enum LeafType {
    /// String with optional XSD-style pattern and length bounds
    String {
        /// Anchored regex the value must match
        pattern: Option<std::string::String>,
        /// Inclusive length bounds
        length: Option<(u64, u64)>,
    },
    /// Signed 64-bit integer with optional inclusive range
    Int64 {
        /// Inclusive value bounds
        range: Option<(i64, i64)>,
    },
    /// Unsigned 64-bit integer with optional inclusive range
    Uint64 {
        /// Inclusive value bounds
        range: Option<(u64, u64)>,
    },
    /// `true` / `false`
    Boolean,
    /// Closed set of named values
    Enumeration(Vec<std::string::String>),
    /// Value must exist in the node set addressed by the target path
    Leafref {
        /// Absolute instance path of the referred leaf
        target: Path,
    },
    /// Presence leaf with no value
    Empty,
}

impl LeafType {
    /// Unconstrained string
    pub fn string() -> Self {
        LeafType::String {
            pattern: None,
            length: None,
        }
    }

    /// String constrained by an anchored regex pattern
    pub fn string_pattern(pattern: impl Into<std::string::String>) -> Self {
        LeafType::String {
            pattern: Some(pattern.into()),
            length: None,
        }
    }

    /// Signed integer within an inclusive range
    pub fn int_range(lo: i64, hi: i64) -> Self {
        LeafType::Int64 {
            range: Some((lo, hi)),
        }
    }

    /// Unsigned integer within an inclusive range
    pub fn uint_range(lo: u64, hi: u64) -> Self {
        LeafType::Uint64 {
            range: Some((lo, hi)),
        }
    }

    /// Enumeration over the given values
    pub fn enumeration<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<std::string::String>,
    {
        LeafType::Enumeration(values.into_iter().map(Into::into).collect())
    }
}

/// Restricted predicate for `when` and `must` expressions
///
/// The dialect is deliberately small: existence of a node set, or equality
/// of the first matching body against a literal. Paths are absolute from
/// the datastore root.
#[derive(Debug, Clone)]
pub enum Predicate {
    /// True when the path matches at least one node
    Exists(Path),
    /// True when some matching node's body equals the literal
    Equals(Path, std::string::String),
}

/// A `must` constraint with its optional error message
#[derive(Debug, Clone)]
pub struct Must {
    /// Condition that every instance must satisfy
    pub expr: Predicate,
    /// Message reported when the condition fails
    pub message: Option<std::string::String>,
}

/// Structural kind of a schema node
#[derive(Debug, Clone)]
pub enum SchemaKind {
    /// Interior node with named children
    Container,
    /// Keyed list
    List {
        /// Key leaf names, in declared order
        keys: Vec<std::string::String>,
        /// Additional `unique` tuples (leaf names)
        unique: Vec<Vec<std::string::String>>,
    },
    /// Single leaf
    Leaf(LeafType),
    /// Leaf-list; entries are identified by value
    LeafList(LeafType),
}

/// One node of the schema tree
#[derive(Debug, Clone)]
pub struct SchemaNode {
    /// Qualified name this node matches
    pub name: QName,
    /// Structural kind
    pub kind: SchemaKind,
    /// Presence is required in a valid tree
    pub mandatory: bool,
    /// `config false` marks state data, which may not appear in config stores
    pub config: bool,
    /// Conditional presence
    pub when: Option<Predicate>,
    /// Constraints every instance must satisfy
    pub must: Vec<Must>,
    /// Child schema nodes (containers and lists)
    pub children: Vec<SchemaNode>,
}

impl SchemaNode {
    fn new(name: &str, kind: SchemaKind) -> Self {
        SchemaNode {
            name: QName::parse(name),
            kind,
            mandatory: false,
            config: true,
            when: None,
            must: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Container node
    pub fn container(name: &str) -> Self {
        SchemaNode::new(name, SchemaKind::Container)
    }

    /// List node with the given key leaves
    pub fn list<I, S>(name: &str, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<std::string::String>,
    {
        SchemaNode::new(
            name,
            SchemaKind::List {
                keys: keys.into_iter().map(Into::into).collect(),
                unique: Vec::new(),
            },
        )
    }

    /// Leaf node
    pub fn leaf(name: &str, typ: LeafType) -> Self {
        SchemaNode::new(name, SchemaKind::Leaf(typ))
    }

    /// Leaf-list node
    pub fn leaf_list(name: &str, typ: LeafType) -> Self {
        SchemaNode::new(name, SchemaKind::LeafList(typ))
    }

    /// Append a child schema node
    pub fn child(mut self, node: SchemaNode) -> Self {
        self.children.push(node);
        self
    }

    /// Mark the node mandatory
    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    /// Mark the node as state data (`config false`)
    pub fn state(mut self) -> Self {
        self.config = false;
        self
    }

    /// Attach a `when` condition
    pub fn when(mut self, pred: Predicate) -> Self {
        self.when = Some(pred);
        self
    }

    /// Attach a `must` constraint
    pub fn must(mut self, expr: Predicate, message: Option<&str>) -> Self {
        self.must.push(Must {
            expr,
            message: message.map(str::to_string),
        });
        self
    }

    /// Attach a `unique` tuple (lists only; no-op otherwise)
    pub fn unique<I, S>(mut self, leaves: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<std::string::String>,
    {
        if let SchemaKind::List { unique, .. } = &mut self.kind {
            unique.push(leaves.into_iter().map(Into::into).collect());
        }
        self
    }

    /// Child schema node matching `name`
    pub fn find_child(&self, name: &QName) -> Option<&SchemaNode> {
        self.children.iter().find(|c| c.name.matches(name))
    }

    /// Key leaf names, empty for non-lists
    pub fn keys(&self) -> &[std::string::String] {
        match &self.kind {
            SchemaKind::List { keys, .. } => keys,
            _ => &[],
        }
    }

    /// True for leaf-lists (entries identified by value)
    pub fn is_leaf_list(&self) -> bool {
        matches!(self.kind, SchemaKind::LeafList(_))
    }
}

/// An extension statement carried by the model
///
/// The engine hands these to plugin `extension` hooks at registration time;
/// the core attaches no semantics of its own.
#[derive(Debug, Clone)]
pub struct Extension {
    /// Extension keyword
    pub name: QName,
    /// Extension argument, if any
    pub argument: Option<std::string::String>,
}

/// The active schema specification
#[derive(Debug, Clone, Default)]
pub struct SchemaSpec {
    roots: Vec<SchemaNode>,
    extensions: Vec<Extension>,
    allow_unknown: bool,
}

impl SchemaSpec {
    /// Empty strict spec: every element must resolve
    pub fn new() -> Self {
        SchemaSpec::default()
    }

    /// Wildcard spec: unknown elements are accepted unchecked
    ///
    /// Used when no model has been loaded; structural rules that need
    /// schema knowledge (list keys, types) are not enforced for unknown
    /// nodes.
    pub fn any() -> Self {
        SchemaSpec {
            allow_unknown: true,
            ..SchemaSpec::default()
        }
    }

    /// Add a top-level schema node
    pub fn root(mut self, node: SchemaNode) -> Self {
        self.roots.push(node);
        self
    }

    /// Record an extension statement
    pub fn extension(mut self, name: &str, argument: Option<&str>) -> Self {
        self.extensions.push(Extension {
            name: QName::parse(name),
            argument: argument.map(str::to_string),
        });
        self
    }

    /// Whether unknown elements are accepted
    pub fn allows_unknown(&self) -> bool {
        self.allow_unknown
    }

    /// Top-level schema nodes
    pub fn roots(&self) -> &[SchemaNode] {
        &self.roots
    }

    /// Extension statements carried by the model
    pub fn extensions(&self) -> &[Extension] {
        &self.extensions
    }

    /// Resolve a child in a schema context
    ///
    /// `parent` of `None` means the datastore root.
    pub fn child_of<'a>(
        &'a self,
        parent: Option<&'a SchemaNode>,
        name: &QName,
    ) -> Option<&'a SchemaNode> {
        match parent {
            Some(p) => p.find_child(name),
            None => self.roots.iter().find(|r| r.name.matches(name)),
        }
    }

    /// Key leaf names for the list element `name` in context `parent`
    ///
    /// Empty when the element is not a list or is unknown.
    pub fn keys_of(&self, parent: Option<&SchemaNode>, name: &QName) -> Vec<std::string::String> {
        self.child_of(parent, name)
            .map(|n| n.keys().to_vec())
            .unwrap_or_default()
    }
}
