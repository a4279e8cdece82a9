//! Instance path addressing
//!
//! A restricted instance-path dialect used for `get-config` filters and for
//! the `error-path` field of error records: `/a/b[name='x']/c`. Steps match
//! element names; bracketed predicates match key-leaf bodies. This is the
//! subset of XPath the datastore operations need; full XPath evaluation is
//! out of scope.

use crate::error::{Result, RpcError};
use crate::qname::QName;
use crate::tree::{NodeId, Tree};

/// One step of an instance path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Element name to match
    pub name: QName,
    /// Key predicates: child leaf name → required body
    pub preds: Vec<(String, String)>,
}

/// A parsed instance path
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Path {
    /// Steps from the datastore root
    pub steps: Vec<Step>,
}

impl Path {
    /// The root path, matching the whole datastore
    pub fn root() -> Self {
        Path::default()
    }

    /// True when this path addresses the datastore root
    pub fn is_root(&self) -> bool {
        self.steps.is_empty()
    }

    /// Parse a path expression
    ///
    /// Accepts `/a/b[k='v']/c`; a leading slash is optional, `/` alone is
    /// the root path.
    pub fn parse(input: &str) -> Result<Self> {
        let s = input.trim();
        let s = s.strip_prefix('/').unwrap_or(s);
        if s.is_empty() {
            return Ok(Path::root());
        }
        let mut steps = Vec::new();
        for seg in split_segments(s)? {
            steps.push(parse_step(&seg)?);
        }
        Ok(Path { steps })
    }
}

impl std::fmt::Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.steps.is_empty() {
            return write!(f, "/");
        }
        for step in &self.steps {
            write!(f, "/{}", step.name)?;
            for (k, v) in &step.preds {
                write!(f, "[{}='{}']", k, v)?;
            }
        }
        Ok(())
    }
}

/// Split on `/` outside predicate brackets
fn split_segments(s: &str) -> Result<Vec<String>> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut cur = String::new();
    for c in s.chars() {
        match c {
            '[' => {
                depth += 1;
                cur.push(c);
            }
            ']' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| RpcError::invalid_value("unbalanced ']' in path"))?;
                cur.push(c);
            }
            '/' if depth == 0 => {
                out.push(std::mem::take(&mut cur));
            }
            _ => cur.push(c),
        }
    }
    if depth != 0 {
        return Err(RpcError::invalid_value("unbalanced '[' in path"));
    }
    out.push(cur);
    if out.iter().any(String::is_empty) {
        return Err(RpcError::invalid_value("empty step in path"));
    }
    Ok(out)
}

fn parse_step(seg: &str) -> Result<Step> {
    let (name, rest) = match seg.find('[') {
        Some(i) => (&seg[..i], &seg[i..]),
        None => (seg, ""),
    };
    if name.is_empty() {
        return Err(RpcError::invalid_value("empty element name in path"));
    }
    let mut preds = Vec::new();
    let mut rest = rest;
    while !rest.is_empty() {
        let end = rest
            .find(']')
            .ok_or_else(|| RpcError::invalid_value("unterminated predicate in path"))?;
        let inner = &rest[1..end];
        let (k, v) = inner
            .split_once('=')
            .ok_or_else(|| RpcError::invalid_value(format!("bad predicate: [{}]", inner)))?;
        let v = v.trim();
        let v = v
            .strip_prefix('\'')
            .and_then(|v| v.strip_suffix('\''))
            .or_else(|| v.strip_prefix('"').and_then(|v| v.strip_suffix('"')))
            .ok_or_else(|| RpcError::invalid_value(format!("unquoted predicate value: {}", v)))?;
        preds.push((k.trim().to_string(), v.to_string()));
        rest = &rest[end + 1..];
    }
    Ok(Step {
        name: QName::parse(name),
        preds,
    })
}

/// Resolve a path against a tree, returning every matching node
///
/// An empty result is not an error; the caller decides whether absence
/// matters.
pub fn resolve(tree: &Tree, path: &Path) -> Vec<NodeId> {
    let mut frontier = vec![tree.root()];
    for step in &path.steps {
        let mut next = Vec::new();
        for node in frontier {
            for &c in tree.children(node) {
                if !tree.name(c).matches(&step.name) {
                    continue;
                }
                let hit = step.preds.iter().all(|(k, v)| {
                    tree.find_child(c, &QName::local(k.clone()))
                        .and_then(|leaf| tree.body(leaf))
                        == Some(v.as_str())
                });
                if hit {
                    next.push(c);
                }
            }
        }
        frontier = next;
        if frontier.is_empty() {
            break;
        }
    }
    frontier
}
