//! Qualified element names
//!
//! Every tree node is identified by a module-qualified name. The module part
//! is the YANG module prefix the element was parsed with; unprefixed
//! elements inherit resolution from their schema context.

use std::fmt;

/// A module-qualified element name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QName {
    /// YANG module prefix, if the element was qualified
    pub module: Option<String>,
    /// Local element name
    pub local: String,
}

impl QName {
    /// Create an unqualified name
    pub fn local(name: impl Into<String>) -> Self {
        QName {
            module: None,
            local: name.into(),
        }
    }

    /// Create a module-qualified name
    pub fn qualified(module: impl Into<String>, name: impl Into<String>) -> Self {
        QName {
            module: Some(module.into()),
            local: name.into(),
        }
    }

    /// Parse `prefix:name` or bare `name`
    pub fn parse(s: &str) -> Self {
        match s.split_once(':') {
            Some((module, local)) if !module.is_empty() => QName::qualified(module, local),
            _ => QName::local(s),
        }
    }

    /// True when `other` addresses the same element
    ///
    /// An unqualified name matches any module; qualified names must agree.
    pub fn matches(&self, other: &QName) -> bool {
        if self.local != other.local {
            return false;
        }
        match (&self.module, &other.module) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.module {
            Some(m) => write!(f, "{}:{}", m, self.local),
            None => write!(f, "{}", self.local),
        }
    }
}
