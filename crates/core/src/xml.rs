//! XML projection of configuration trees
//!
//! The persisted form of a datastore is an XML document; this module is the
//! pair of pure projection functions between [`Tree`] and that form. XML is
//! the only representation required to round-trip (load → serialize equals
//! what was written); the JSON projection in [`crate::json`] is one-way.
//!
//! The grammar accepted is the subset the system emits: elements with
//! attributes, character data, comments, and an optional XML declaration.
//! Mixed content is not modeled: an element carries either a body or child
//! elements; surrounding whitespace is insignificant.

use crate::error::{Result, RpcError};
use crate::qname::QName;
use crate::tree::{NodeId, Tree};

/// Escape character data for element bodies
pub fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// Escape character data for attribute values (double-quoted)
pub fn escape_attr(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

// =============================================================================
// Serialization
// =============================================================================

/// Serialize a whole tree, compact
pub fn to_string(tree: &Tree) -> String {
    let mut out = String::new();
    write_node(tree, tree.root(), &mut out, None, 0, false);
    out
}

/// Serialize a whole tree with two-space indentation
pub fn to_string_pretty(tree: &Tree) -> String {
    let mut out = String::new();
    write_node(tree, tree.root(), &mut out, None, 0, true);
    out.push('\n');
    out
}

/// Serialize the subtree rooted at `id`, compact
pub fn fragment_to_string(tree: &Tree, id: NodeId) -> String {
    let mut out = String::new();
    write_node(tree, id, &mut out, None, 0, false);
    out
}

/// Canonical serialization
///
/// Attribute order and container child order are normalized (stable sort by
/// name); the relative order of same-named siblings is preserved. Two trees
/// are content-equal exactly when their canonical forms are byte-equal.
pub fn canonical(tree: &Tree) -> String {
    let mut out = String::new();
    write_node(tree, tree.root(), &mut out, Some(&sort_canonical), 0, false);
    out
}

type ChildOrder = dyn Fn(&Tree, &[NodeId]) -> Vec<NodeId>;

fn sort_canonical(tree: &Tree, children: &[NodeId]) -> Vec<NodeId> {
    let mut out = children.to_vec();
    out.sort_by_key(|&c| tree.name(c).to_string());
    out
}

fn write_node(
    tree: &Tree,
    id: NodeId,
    out: &mut String,
    order: Option<&ChildOrder>,
    depth: usize,
    pretty: bool,
) {
    let indent = |out: &mut String, depth: usize| {
        if pretty {
            if !out.is_empty() {
                out.push('\n');
            }
            for _ in 0..depth {
                out.push_str("  ");
            }
        }
    };
    indent(out, depth);
    out.push('<');
    out.push_str(&tree.name(id).to_string());
    let mut attrs = tree.attrs(id).to_vec();
    if order.is_some() {
        attrs.sort();
    }
    for (k, v) in &attrs {
        out.push(' ');
        out.push_str(k);
        out.push_str("=\"");
        out.push_str(&escape_attr(v));
        out.push('"');
    }
    let children = match order {
        Some(f) => f(tree, tree.children(id)),
        None => tree.children(id).to_vec(),
    };
    if children.is_empty() && tree.body(id).is_none() {
        out.push_str("/>");
        return;
    }
    out.push('>');
    if let Some(body) = tree.body(id) {
        out.push_str(&escape_text(body));
    }
    for c in children {
        write_node(tree, c, out, order, depth + 1, pretty);
    }
    if !tree.children(id).is_empty() {
        indent(out, depth);
    }
    out.push_str("</");
    out.push_str(&tree.name(id).to_string());
    out.push('>');
}

// =============================================================================
// Parsing
// =============================================================================

/// Parse an XML document into a tree
///
/// The document root becomes the tree root. Fails with `malformed-message`
/// on grammar violations.
pub fn parse(input: &str) -> Result<Tree> {
    let mut p = Parser::new(input);
    p.prolog();
    let (name, attrs, self_closing) = p.open_tag()?;
    let mut tree = Tree::with_root(QName::parse(&name));
    let root = tree.root();
    for (k, v) in attrs {
        tree.set_attr(root, k, v);
    }
    if !self_closing {
        p.content(&mut tree, root, &name)?;
    }
    p.trailing()?;
    Ok(tree)
}

struct Parser<'a> {
    s: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Parser {
            s: input.as_bytes(),
            pos: 0,
        }
    }

    fn err(&self, msg: &str) -> RpcError {
        RpcError::malformed_message(format!("XML parse error at byte {}: {}", self.pos, msg))
    }

    fn peek(&self) -> Option<u8> {
        self.s.get(self.pos).copied()
    }

    fn starts_with(&self, pat: &str) -> bool {
        self.s[self.pos..].starts_with(pat.as_bytes())
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\r' | b'\n')) {
            self.pos += 1;
        }
    }

    fn skip_until(&mut self, pat: &str) -> bool {
        while self.pos < self.s.len() {
            if self.starts_with(pat) {
                self.pos += pat.len();
                return true;
            }
            self.pos += 1;
        }
        false
    }

    /// Skip the XML declaration, processing instructions and comments
    fn prolog(&mut self) {
        loop {
            self.skip_ws();
            if self.starts_with("<?") {
                self.skip_until("?>");
            } else if self.starts_with("<!--") {
                self.skip_until("-->");
            } else {
                return;
            }
        }
    }

    fn trailing(&mut self) -> Result<()> {
        self.skip_ws();
        if self.pos != self.s.len() {
            return Err(self.err("trailing content after document element"));
        }
        Ok(())
    }

    fn name_char(c: u8) -> bool {
        c.is_ascii_alphanumeric() || matches!(c, b'-' | b'_' | b'.' | b':')
    }

    fn read_name(&mut self) -> Result<String> {
        let start = self.pos;
        while self.peek().map(Self::name_char).unwrap_or(false) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.err("expected name"));
        }
        Ok(String::from_utf8_lossy(&self.s[start..self.pos]).into_owned())
    }

    /// Parse `<name attr="v" ...>` or `<name .../>`
    fn open_tag(&mut self) -> Result<(String, Vec<(String, String)>, bool)> {
        if self.peek() != Some(b'<') {
            return Err(self.err("expected start tag"));
        }
        self.pos += 1;
        let name = self.read_name()?;
        let mut attrs = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                Some(b'>') => {
                    self.pos += 1;
                    return Ok((name, attrs, false));
                }
                Some(b'/') => {
                    self.pos += 1;
                    if self.peek() != Some(b'>') {
                        return Err(self.err("expected '>' after '/'"));
                    }
                    self.pos += 1;
                    return Ok((name, attrs, true));
                }
                Some(_) => {
                    let aname = self.read_name()?;
                    self.skip_ws();
                    if self.peek() != Some(b'=') {
                        return Err(self.err("expected '=' in attribute"));
                    }
                    self.pos += 1;
                    self.skip_ws();
                    let quote = match self.peek() {
                        Some(q @ (b'"' | b'\'')) => q,
                        _ => return Err(self.err("expected quoted attribute value")),
                    };
                    self.pos += 1;
                    let start = self.pos;
                    while self.peek().map(|c| c != quote).unwrap_or(false) {
                        self.pos += 1;
                    }
                    if self.peek() != Some(quote) {
                        return Err(self.err("unterminated attribute value"));
                    }
                    let raw = String::from_utf8_lossy(&self.s[start..self.pos]).into_owned();
                    self.pos += 1;
                    attrs.push((aname, unescape(&raw)?));
                }
                None => return Err(self.err("unterminated start tag")),
            }
        }
    }

    /// Parse element content up to and including the matching close tag
    fn content(&mut self, tree: &mut Tree, id: NodeId, open_name: &str) -> Result<()> {
        let mut text = String::new();
        loop {
            let start = self.pos;
            while self.peek().map(|c| c != b'<').unwrap_or(false) {
                self.pos += 1;
            }
            if self.pos > start {
                text.push_str(&unescape(&String::from_utf8_lossy(
                    &self.s[start..self.pos],
                ))?);
            }
            if self.peek().is_none() {
                return Err(self.err("unterminated element"));
            }
            if self.starts_with("<!--") {
                if !self.skip_until("-->") {
                    return Err(self.err("unterminated comment"));
                }
                continue;
            }
            if self.starts_with("</") {
                self.pos += 2;
                let close = self.read_name()?;
                if close != open_name {
                    return Err(self.err(&format!(
                        "mismatched close tag: expected </{}>, got </{}>",
                        open_name, close
                    )));
                }
                self.skip_ws();
                if self.peek() != Some(b'>') {
                    return Err(self.err("expected '>' in close tag"));
                }
                self.pos += 1;
                break;
            }
            let (name, attrs, self_closing) = self.open_tag()?;
            let child = tree.add_child(id, QName::parse(&name));
            for (k, v) in attrs {
                tree.set_attr(child, k, v);
            }
            if !self_closing {
                self.content(tree, child, &name)?;
            }
        }
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            tree.set_body(id, Some(trimmed.to_string()));
        }
        Ok(())
    }
}

fn unescape(s: &str) -> Result<String> {
    if !s.contains('&') {
        return Ok(s.to_string());
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(i) = rest.find('&') {
        out.push_str(&rest[..i]);
        rest = &rest[i..];
        let semi = rest.find(';').ok_or_else(|| {
            RpcError::malformed_message("unterminated entity reference".to_string())
        })?;
        let entity = &rest[1..semi];
        match entity {
            "amp" => out.push('&'),
            "lt" => out.push('<'),
            "gt" => out.push('>'),
            "quot" => out.push('"'),
            "apos" => out.push('\''),
            _ => {
                let cp = entity
                    .strip_prefix("#x")
                    .and_then(|h| u32::from_str_radix(h, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|d| d.parse().ok()))
                    .and_then(char::from_u32)
                    .ok_or_else(|| {
                        RpcError::malformed_message(format!("unknown entity: &{};", entity))
                    })?;
                out.push(cp);
            }
        }
        rest = &rest[semi + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
