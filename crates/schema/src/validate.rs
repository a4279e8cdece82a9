//! Structural validation
//!
//! Applies the YANG-derived constraints of a [`SchemaSpec`] to a
//! configuration tree: unknown elements, value types, ranges, patterns,
//! mandatory nodes, list keys, `unique` tuples, leafref targets, and
//! `when`/`must` predicates. Validation is pure (the tree is never
//! mutated) and returns either `Ok` or a non-empty list of error records.
//!
//! Freely-typed `rpc-error` payloads are exempt from schema resolution.

use crate::model::{LeafType, Predicate, SchemaKind, SchemaNode, SchemaSpec};
use regex::Regex;
use trellis_core::{path, NodeId, QName, RpcError, Tree};

/// Validate `tree` against `spec`
///
/// Returns every violation found, not just the first.
pub fn validate(spec: &SchemaSpec, tree: &Tree) -> Result<(), Vec<RpcError>> {
    let mut w = Walker {
        spec,
        tree,
        errs: Vec::new(),
    };
    w.level(tree.root(), None);
    if w.errs.is_empty() {
        Ok(())
    } else {
        Err(w.errs)
    }
}

struct Walker<'a> {
    spec: &'a SchemaSpec,
    tree: &'a Tree,
    errs: Vec<RpcError>,
}

impl<'a> Walker<'a> {
    /// Validate all children of `parent` in schema context `schema`
    fn level(&mut self, parent: NodeId, schema: Option<&'a SchemaNode>) {
        for &c in self.tree.children(parent) {
            let name = self.tree.name(c);
            if name.local == "rpc-error" {
                continue;
            }
            match self.spec.child_of(schema, name) {
                Some(s) => self.node(c, s),
                None if self.spec.allows_unknown() => self.unknown_descend(c),
                None => {
                    self.errs.push(
                        RpcError::unknown_element(name.to_string())
                            .with_path(self.tree.path_to(c)),
                    );
                }
            }
        }
        self.check_unique(parent, schema);
        self.check_mandatory(parent, schema);
    }

    /// Descend through nodes the wildcard spec accepts unchecked
    fn unknown_descend(&mut self, id: NodeId) {
        for &c in self.tree.children(id) {
            self.unknown_descend(c);
        }
    }

    fn node(&mut self, id: NodeId, schema: &'a SchemaNode) {
        let npath = self.tree.path_to(id);
        if !schema.config {
            self.errs.push(
                RpcError::invalid_value(format!(
                    "state data not allowed in configuration: {}",
                    schema.name
                ))
                .with_path(npath),
            );
            return;
        }
        if let Some(when) = &schema.when {
            if !self.eval(when) {
                self.errs.push(
                    RpcError::unknown_element(schema.name.to_string())
                        .with_message(format!(
                            "Element {} present but its when condition is not satisfied",
                            schema.name
                        ))
                        .with_path(npath),
                );
                return;
            }
        }
        for must in &schema.must {
            if !self.eval(&must.expr) {
                let msg = must
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("must condition failed for {}", schema.name));
                self.errs.push(
                    RpcError::operation_failed(msg)
                        .with_path(npath.clone())
                        .with_info("error-app-tag", "must-violation"),
                );
            }
        }
        match &schema.kind {
            SchemaKind::Leaf(typ) | SchemaKind::LeafList(typ) => {
                if self.tree.child_count(id) != 0 {
                    self.errs.push(
                        RpcError::bad_element(
                            schema.name.to_string(),
                            format!("Leaf {} must not have child elements", schema.name),
                        )
                        .with_path(npath),
                    );
                    return;
                }
                self.leaf_value(id, typ);
            }
            SchemaKind::Container => {
                self.level(id, Some(schema));
            }
            SchemaKind::List { keys, .. } => {
                for key in keys {
                    let present = self
                        .tree
                        .find_child(id, &QName::local(key.clone()))
                        .and_then(|k| self.tree.body(k))
                        .is_some();
                    if !present {
                        self.errs.push(
                            RpcError::missing_element(key.clone()).with_path(self.tree.path_to(id)),
                        );
                    }
                }
                self.level(id, Some(schema));
            }
        }
    }

    fn leaf_value(&mut self, id: NodeId, typ: &LeafType) {
        let body = self.tree.body(id);
        let path = self.tree.path_to(id);
        let value = body.unwrap_or("");
        let err = match typ {
            LeafType::Empty => body
                .is_some()
                .then(|| RpcError::invalid_value("empty leaf must not carry a value")),
            LeafType::Boolean => (!matches!(value, "true" | "false"))
                .then(|| RpcError::invalid_value(format!("not a boolean: {}", value))),
            LeafType::Enumeration(allowed) => (!allowed.iter().any(|a| a == value)).then(|| {
                RpcError::invalid_value(format!(
                    "{} is not one of {}",
                    value,
                    allowed.join(", ")
                ))
            }),
            LeafType::Int64 { range } => match value.parse::<i64>() {
                Err(_) => Some(RpcError::invalid_value(format!("not an integer: {}", value))),
                Ok(n) => range
                    .filter(|(lo, hi)| n < *lo || n > *hi)
                    .map(|(lo, hi)| {
                        RpcError::invalid_value(format!("{} out of range {}..{}", n, lo, hi))
                    }),
            },
            LeafType::Uint64 { range } => match value.parse::<u64>() {
                Err(_) => Some(RpcError::invalid_value(format!(
                    "not an unsigned integer: {}",
                    value
                ))),
                Ok(n) => range
                    .filter(|(lo, hi)| n < *lo || n > *hi)
                    .map(|(lo, hi)| {
                        RpcError::invalid_value(format!("{} out of range {}..{}", n, lo, hi))
                    }),
            },
            LeafType::String { pattern, length } => {
                let len = value.chars().count() as u64;
                if let Some((lo, hi)) = length.filter(|(lo, hi)| len < *lo || len > *hi) {
                    Some(RpcError::invalid_value(format!(
                        "length {} out of range {}..{}",
                        len, lo, hi
                    )))
                } else if let Some(pat) = pattern {
                    match Regex::new(&format!("^(?:{})$", pat)) {
                        Err(e) => Some(RpcError::operation_failed(format!(
                            "unusable schema pattern: {}",
                            e
                        ))),
                        Ok(re) if !re.is_match(value) => Some(RpcError::invalid_value(format!(
                            "{} does not match pattern {}",
                            value, pat
                        ))),
                        Ok(_) => None,
                    }
                } else {
                    None
                }
            }
            LeafType::Leafref { target } => {
                let found = path::resolve(self.tree, target)
                    .into_iter()
                    .any(|n| self.tree.body(n) == Some(value));
                (!found).then(|| {
                    RpcError::new(
                        trellis_core::ErrorType::Application,
                        trellis_core::ErrorTag::DataMissing,
                    )
                    .with_message(format!("leafref target not found: {} = {}", target, value))
                })
            }
        };
        if let Some(e) = err {
            self.errs.push(e.with_path(path));
        }
    }

    /// Key-tuple and `unique`-tuple uniqueness among siblings
    fn check_unique(&mut self, parent: NodeId, schema: Option<&'a SchemaNode>) {
        let schema_children: &[SchemaNode] = match schema {
            Some(s) => &s.children,
            None => self.spec.roots(),
        };
        for sc in schema_children {
            let entries = self.tree.find_children(parent, &sc.name);
            if entries.len() < 2 {
                continue;
            }
            match &sc.kind {
                SchemaKind::List { keys, unique } => {
                    let mut checks: Vec<Vec<std::string::String>> = vec![keys.clone()];
                    checks.extend(unique.iter().cloned());
                    for leaves in &checks {
                        let mut seen = Vec::new();
                        for &e in &entries {
                            let tuple: Vec<std::string::String> = self
                                .tree
                                .key_values(e, leaves)
                                .into_iter()
                                .map(|v| v.unwrap_or_default())
                                .collect();
                            if seen.contains(&tuple) {
                                self.errs.push(
                                    RpcError::operation_failed(format!(
                                        "data not unique in list {}",
                                        sc.name
                                    ))
                                    .with_path(self.tree.path_to(e))
                                    .with_info("non-unique", leaves.join(" ")),
                                );
                            } else {
                                seen.push(tuple);
                            }
                        }
                    }
                }
                SchemaKind::LeafList(_) => {
                    let mut seen = Vec::new();
                    for &e in &entries {
                        let body = self.tree.body(e).unwrap_or("").to_string();
                        if seen.contains(&body) {
                            self.errs.push(
                                RpcError::operation_failed(format!(
                                    "duplicate value in leaf-list {}: {}",
                                    sc.name, body
                                ))
                                .with_path(self.tree.path_to(e)),
                            );
                        } else {
                            seen.push(body);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    /// Mandatory presence among schema children of this level
    fn check_mandatory(&mut self, parent: NodeId, schema: Option<&'a SchemaNode>) {
        let schema_children: &[SchemaNode] = match schema {
            Some(s) => &s.children,
            None => self.spec.roots(),
        };
        for sc in schema_children {
            if !sc.mandatory || !sc.config {
                continue;
            }
            // A node suppressed by its when condition is not required.
            if sc.when.as_ref().map(|w| self.eval(w)).unwrap_or(true)
                && self.tree.find_child(parent, &sc.name).is_none()
            {
                self.errs.push(
                    RpcError::missing_element(sc.name.to_string())
                        .with_path(self.tree.path_to(parent)),
                );
            }
        }
    }

    fn eval(&self, pred: &Predicate) -> bool {
        match pred {
            Predicate::Exists(p) => !path::resolve(self.tree, p).is_empty(),
            Predicate::Equals(p, lit) => path::resolve(self.tree, p)
                .into_iter()
                .any(|n| self.tree.body(n) == Some(lit.as_str())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LeafType, SchemaNode, SchemaSpec};
    use trellis_core::{xml, ErrorTag, Path};

    fn iface_spec() -> SchemaSpec {
        SchemaSpec::new().root(
            SchemaNode::container("ifaces").child(
                SchemaNode::list("iface", ["name"])
                    .child(SchemaNode::leaf("name", LeafType::string()))
                    .child(SchemaNode::leaf("mtu", LeafType::uint_range(68, 65535)))
                    .child(SchemaNode::leaf(
                        "speed",
                        LeafType::enumeration(["10m", "100m", "1g"]),
                    )),
            ),
        )
    }

    fn check(spec: &SchemaSpec, src: &str) -> Result<(), Vec<RpcError>> {
        validate(spec, &xml::parse(src).unwrap())
    }

    #[test]
    fn test_valid_tree() {
        let spec = iface_spec();
        check(
            &spec,
            "<config><ifaces><iface><name>eth0</name><mtu>1500</mtu></iface></ifaces></config>",
        )
        .unwrap();
    }

    #[test]
    fn test_unknown_element_rejected() {
        let errs = check(&iface_spec(), "<config><bogus>1</bogus></config>").unwrap_err();
        assert_eq!(errs[0].tag, ErrorTag::UnknownElement);
        assert_eq!(errs[0].path.as_deref(), Some("/bogus"));
    }

    #[test]
    fn test_wildcard_accepts_anything() {
        check(&SchemaSpec::any(), "<config><bogus><x>1</x></bogus></config>").unwrap();
    }

    #[test]
    fn test_range_violation() {
        let errs = check(
            &iface_spec(),
            "<config><ifaces><iface><name>eth0</name><mtu>12</mtu></iface></ifaces></config>",
        )
        .unwrap_err();
        assert_eq!(errs[0].tag, ErrorTag::InvalidValue);
        assert!(errs[0].message.as_deref().unwrap().contains("out of range"));
    }

    #[test]
    fn test_not_an_integer() {
        let errs = check(
            &iface_spec(),
            "<config><ifaces><iface><name>eth0</name><mtu>big</mtu></iface></ifaces></config>",
        )
        .unwrap_err();
        assert_eq!(errs[0].tag, ErrorTag::InvalidValue);
    }

    #[test]
    fn test_enumeration() {
        let errs = check(
            &iface_spec(),
            "<config><ifaces><iface><name>e</name><speed>2g</speed></iface></ifaces></config>",
        )
        .unwrap_err();
        assert!(errs[0].message.as_deref().unwrap().contains("is not one of"));
    }

    #[test]
    fn test_missing_list_key() {
        let errs = check(
            &iface_spec(),
            "<config><ifaces><iface><mtu>1500</mtu></iface></ifaces></config>",
        )
        .unwrap_err();
        assert_eq!(errs[0].tag, ErrorTag::MissingElement);
    }

    #[test]
    fn test_duplicate_list_keys() {
        let errs = check(
            &iface_spec(),
            "<config><ifaces>\
             <iface><name>eth0</name></iface>\
             <iface><name>eth0</name></iface>\
             </ifaces></config>",
        )
        .unwrap_err();
        assert_eq!(errs[0].tag, ErrorTag::OperationFailed);
        assert!(errs[0].message.as_deref().unwrap().contains("not unique"));
    }

    #[test]
    fn test_mandatory_leaf() {
        let spec = SchemaSpec::new().root(
            SchemaNode::container("system")
                .child(SchemaNode::leaf("hostname", LeafType::string()).mandatory()),
        );
        let errs = check(&spec, "<config><system/></config>").unwrap_err();
        assert_eq!(errs[0].tag, ErrorTag::MissingElement);
        check(&spec, "<config><system><hostname>h</hostname></system></config>").unwrap();
    }

    #[test]
    fn test_pattern() {
        let spec = SchemaSpec::new().root(SchemaNode::leaf(
            "id",
            LeafType::string_pattern("[a-z]+[0-9]*"),
        ));
        check(&spec, "<config><id>abc12</id></config>").unwrap();
        let errs = check(&spec, "<config><id>12abc</id></config>").unwrap_err();
        assert_eq!(errs[0].tag, ErrorTag::InvalidValue);
    }

    #[test]
    fn test_boolean() {
        let spec = SchemaSpec::new().root(SchemaNode::leaf("on", LeafType::Boolean));
        check(&spec, "<config><on>true</on></config>").unwrap();
        assert!(check(&spec, "<config><on>yes</on></config>").is_err());
    }

    #[test]
    fn test_leafref() {
        let spec = SchemaSpec::new()
            .root(
                SchemaNode::container("ifaces").child(
                    SchemaNode::list("iface", ["name"])
                        .child(SchemaNode::leaf("name", LeafType::string())),
                ),
            )
            .root(SchemaNode::leaf(
                "uplink",
                LeafType::Leafref {
                    target: Path::parse("/ifaces/iface/name").unwrap(),
                },
            ));
        let good = "<config><ifaces><iface><name>eth0</name></iface></ifaces>\
                    <uplink>eth0</uplink></config>";
        check(&spec, good).unwrap();

        let bad = "<config><ifaces><iface><name>eth0</name></iface></ifaces>\
                   <uplink>eth9</uplink></config>";
        let errs = check(&spec, bad).unwrap_err();
        assert_eq!(errs[0].tag, ErrorTag::DataMissing);
    }

    #[test]
    fn test_when_condition() {
        let spec = SchemaSpec::new()
            .root(SchemaNode::leaf("mode", LeafType::string()))
            .root(
                SchemaNode::leaf("tunnel-id", LeafType::string()).when(Predicate::Equals(
                    Path::parse("/mode").unwrap(),
                    "tunnel".to_string(),
                )),
            );
        check(
            &spec,
            "<config><mode>tunnel</mode><tunnel-id>t1</tunnel-id></config>",
        )
        .unwrap();
        let errs = check(
            &spec,
            "<config><mode>plain</mode><tunnel-id>t1</tunnel-id></config>",
        )
        .unwrap_err();
        assert_eq!(errs[0].tag, ErrorTag::UnknownElement);
    }

    #[test]
    fn test_must_condition() {
        let spec = SchemaSpec::new().root(
            SchemaNode::container("vlan")
                .child(SchemaNode::leaf("id", LeafType::uint_range(1, 4094)))
                .must(
                    Predicate::Exists(Path::parse("/vlan/id").unwrap()),
                    Some("vlan requires an id"),
                ),
        );
        check(&spec, "<config><vlan><id>10</id></vlan></config>").unwrap();
        let errs = check(&spec, "<config><vlan/></config>").unwrap_err();
        assert!(errs[0]
            .message
            .as_deref()
            .unwrap()
            .contains("vlan requires an id"));
    }

    #[test]
    fn test_state_data_rejected() {
        let spec = SchemaSpec::new()
            .root(SchemaNode::leaf("counters", LeafType::string()).state());
        let errs = check(&spec, "<config><counters>5</counters></config>").unwrap_err();
        assert!(errs[0].message.as_deref().unwrap().contains("state data"));
    }

    #[test]
    fn test_rpc_error_payload_exempt() {
        let spec = SchemaSpec::new();
        check(
            &spec,
            "<config><rpc-error><error-tag>invalid-value</error-tag></rpc-error></config>",
        )
        .unwrap();
    }

    #[test]
    fn test_multiple_errors_reported() {
        let errs = check(
            &iface_spec(),
            "<config><bogus/><ifaces><iface><mtu>5</mtu></iface></ifaces></config>",
        )
        .unwrap_err();
        assert!(errs.len() >= 3); // unknown element, missing key, range
    }
}
