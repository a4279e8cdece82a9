//! NETCONF edit-config application
//!
//! Applies an edit subtree to a target tree under a default operation,
//! honoring per-node `operation` annotations. Semantics follow NETCONF
//! edit-config:
//!
//! - *merge*: recursive union; leaves in the edit overwrite leaves in the
//!   target; list entries are matched by their schema-declared keys,
//!   leaf-list entries by value
//! - *replace*: the edit subtree wholly replaces the target subtree
//! - *create*: fails with `data-exists` when the addressed node exists
//! - *delete*: fails with `data-missing` when the addressed node is absent
//! - *remove*: like delete, silent on absence
//! - *none*: structural placeholder, no effect except descent
//!
//! The operation annotation is transient: it is stripped from the target
//! once the edit has been applied.

use trellis_core::{EditOp, NodeId, Result, RpcError, Tree};
use trellis_schema::{SchemaNode, SchemaSpec};

/// Apply `edit` to `target` with the given default operation
///
/// Both trees are rooted at `config`; the edit's root children are applied
/// against the target root. On error the target may hold a partial edit;
/// callers stage edits in a scratch or candidate store, never directly in
/// `running`.
pub fn apply(target: &mut Tree, edit: &Tree, default_op: EditOp, spec: &SchemaSpec) -> Result<()> {
    let troot = target.root();
    for &c in edit.children(edit.root()).to_vec().iter() {
        apply_node(target, troot, edit, c, default_op, spec, None)?;
    }
    let troot = target.root();
    target.strip_operations(troot);
    Ok(())
}

fn apply_node(
    target: &mut Tree,
    tparent: NodeId,
    edit: &Tree,
    enode: NodeId,
    inherited: EditOp,
    spec: &SchemaSpec,
    schema_parent: Option<&SchemaNode>,
) -> Result<()> {
    let op = edit
        .operation_checked(enode)?
        .unwrap_or(inherited);
    let name = edit.name(enode).clone();
    let schema = spec.child_of(schema_parent, &name);
    let keys: Vec<String> = schema.map(|s| s.keys().to_vec()).unwrap_or_default();
    let by_body = schema.map(|s| s.is_leaf_list()).unwrap_or(false)
        || (keys.is_empty() && edit.body(enode).is_some() && edit.child_count(enode) == 0
            && sibling_count(edit, enode) > 1);
    let existing = target.match_child(tparent, edit, enode, &keys, by_body);

    match op {
        EditOp::Create => {
            if existing.is_some() {
                return Err(RpcError::data_exists(name.to_string())
                    .with_path(edit.path_to(enode)));
            }
            graft_clean(target, tparent, edit, enode);
        }
        EditOp::Replace => {
            if let Some(old) = existing {
                target.detach(old);
            }
            graft_clean(target, tparent, edit, enode);
        }
        EditOp::Merge => match existing {
            None => {
                graft_clean(target, tparent, edit, enode);
            }
            Some(tnode) => {
                if let Some(body) = edit.body(enode) {
                    target.set_body(tnode, Some(body.to_string()));
                }
                for (k, v) in edit.attrs(enode).to_vec() {
                    target.set_attr(tnode, k, v);
                }
                for &ec in edit.children(enode).to_vec().iter() {
                    apply_node(target, tnode, edit, ec, EditOp::Merge, spec, schema)?;
                }
            }
        },
        EditOp::Delete => match existing {
            Some(tnode) => target.detach(tnode),
            None => {
                return Err(RpcError::data_missing(name.to_string())
                    .with_path(edit.path_to(enode)));
            }
        },
        EditOp::Remove => {
            if let Some(tnode) = existing {
                target.detach(tnode);
            }
        }
        EditOp::None => {
            // Descend without effect. A missing interior node is created
            // provisionally so descendants can act, and dropped again if
            // the descent produced nothing.
            let (tnode, provisional) = match existing {
                Some(t) => (t, false),
                None => (target.add_child(tparent, name), true),
            };
            for &ec in edit.children(enode).to_vec().iter() {
                apply_node(target, tnode, edit, ec, EditOp::None, spec, schema)?;
            }
            if provisional && target.child_count(tnode) == 0 && target.body(tnode).is_none() {
                target.detach(tnode);
            }
        }
    }
    Ok(())
}

fn sibling_count(edit: &Tree, enode: NodeId) -> usize {
    match edit.parent(enode) {
        Some(p) => edit.find_children(p, edit.name(enode)).len(),
        None => 1,
    }
}

/// Graft an edit subtree into the target and strip transient annotations
fn graft_clean(target: &mut Tree, parent: NodeId, edit: &Tree, enode: NodeId) {
    let id = target.graft(parent, edit, enode);
    target.strip_operations(id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::{xml, ErrorTag, QName};
    use trellis_schema::{LeafType, SchemaNode};

    fn iface_spec() -> SchemaSpec {
        SchemaSpec::any().root(
            SchemaNode::container("ifaces").child(
                SchemaNode::list("iface", ["name"])
                    .child(SchemaNode::leaf("name", LeafType::string()))
                    .child(SchemaNode::leaf("mtu", LeafType::string()))
                    .child(SchemaNode::leaf_list("addr", LeafType::string())),
            ),
        )
    }

    fn tree(src: &str) -> Tree {
        xml::parse(src).unwrap()
    }

    #[test]
    fn test_merge_into_empty() {
        let mut t = Tree::new();
        let edit = tree("<config><system><host>h1</host></system></config>");
        apply(&mut t, &edit, EditOp::Merge, &SchemaSpec::any()).unwrap();
        assert!(t.content_eq(&edit));
    }

    #[test]
    fn test_merge_overwrites_leaf() {
        let mut t = tree("<config><system><host>old</host><domain>d</domain></system></config>");
        let edit = tree("<config><system><host>new</host></system></config>");
        apply(&mut t, &edit, EditOp::Merge, &SchemaSpec::any()).unwrap();
        let want = tree("<config><system><host>new</host><domain>d</domain></system></config>");
        assert!(t.content_eq(&want));
    }

    #[test]
    fn test_merge_idempotent() {
        let spec = iface_spec();
        let mut t = Tree::new();
        let edit = tree(
            "<config><ifaces><iface><name>eth0</name><mtu>1500</mtu></iface></ifaces></config>",
        );
        apply(&mut t, &edit, EditOp::Merge, &spec).unwrap();
        let once = t.clone();
        apply(&mut t, &edit, EditOp::Merge, &spec).unwrap();
        assert!(t.content_eq(&once));
    }

    #[test]
    fn test_merge_matches_list_by_key() {
        let spec = iface_spec();
        let mut t = tree(
            "<config><ifaces>\
             <iface><name>eth0</name><mtu>1500</mtu></iface>\
             <iface><name>eth1</name><mtu>1500</mtu></iface>\
             </ifaces></config>",
        );
        let edit = tree(
            "<config><ifaces><iface><name>eth1</name><mtu>9000</mtu></iface></ifaces></config>",
        );
        apply(&mut t, &edit, EditOp::Merge, &spec).unwrap();
        let want = tree(
            "<config><ifaces>\
             <iface><name>eth0</name><mtu>1500</mtu></iface>\
             <iface><name>eth1</name><mtu>9000</mtu></iface>\
             </ifaces></config>",
        );
        assert!(t.content_eq(&want));
    }

    #[test]
    fn test_merge_leaf_list_by_value() {
        let spec = iface_spec();
        let mut t = tree(
            "<config><ifaces><iface><name>e</name>\
             <addr>10.0.0.1</addr></iface></ifaces></config>",
        );
        let edit = tree(
            "<config><ifaces><iface><name>e</name>\
             <addr>10.0.0.1</addr><addr>10.0.0.2</addr></iface></ifaces></config>",
        );
        apply(&mut t, &edit, EditOp::Merge, &spec).unwrap();
        let iface = t
            .find_child(t.root(), &QName::local("ifaces"))
            .and_then(|i| t.find_child(i, &QName::local("iface")))
            .unwrap();
        assert_eq!(t.find_children(iface, &QName::local("addr")).len(), 2);
    }

    #[test]
    fn test_replace_substitutes_subtree() {
        let spec = iface_spec();
        let mut t = tree(
            "<config><ifaces><iface><name>eth0</name><mtu>1500</mtu></iface></ifaces></config>",
        );
        let edit = tree("<config><ifaces><iface><name>eth1</name></iface></ifaces></config>");
        apply(&mut t, &edit, EditOp::Replace, &spec).unwrap();
        let want = tree("<config><ifaces><iface><name>eth1</name></iface></ifaces></config>");
        assert!(t.content_eq(&want));
    }

    #[test]
    fn test_create_fails_on_existing() {
        let mut t = tree("<config><a>1</a></config>");
        let edit = tree("<config><a>2</a></config>");
        let err = apply(&mut t, &edit, EditOp::Create, &SchemaSpec::any()).unwrap_err();
        assert_eq!(err.tag, ErrorTag::DataExists);
    }

    #[test]
    fn test_create_inserts_when_absent() {
        let mut t = Tree::new();
        let edit = tree("<config><a>1</a></config>");
        apply(&mut t, &edit, EditOp::Create, &SchemaSpec::any()).unwrap();
        assert!(t.content_eq(&edit));
    }

    #[test]
    fn test_delete_fails_on_absent() {
        let mut t = Tree::new();
        let edit = tree("<config><a/></config>");
        let err = apply(&mut t, &edit, EditOp::Delete, &SchemaSpec::any()).unwrap_err();
        assert_eq!(err.tag, ErrorTag::DataMissing);
    }

    #[test]
    fn test_remove_silent_on_absent() {
        let mut t = Tree::new();
        let edit = tree("<config><a/></config>");
        apply(&mut t, &edit, EditOp::Remove, &SchemaSpec::any()).unwrap();
        assert!(t.is_empty());
    }

    #[test]
    fn test_per_node_operation_overrides_default() {
        let mut t = tree("<config><system><host>h</host><domain>d</domain></system></config>");
        let edit = tree(
            r#"<config><system><domain operation="remove"/></system></config>"#,
        );
        apply(&mut t, &edit, EditOp::Merge, &SchemaSpec::any()).unwrap();
        let want = tree("<config><system><host>h</host></system></config>");
        assert!(t.content_eq(&want));
    }

    #[test]
    fn test_none_descends_without_effect() {
        let mut t = tree("<config><system><host>h</host></system></config>");
        let edit = tree(
            r#"<config><system><host operation="delete"/></system></config>"#,
        );
        apply(&mut t, &edit, EditOp::None, &SchemaSpec::any()).unwrap();
        let want = tree("<config><system/></config>");
        assert!(t.content_eq(&want));
    }

    #[test]
    fn test_none_on_missing_creates_nothing() {
        let mut t = Tree::new();
        let edit = tree("<config><system><host>h</host></system></config>");
        apply(&mut t, &edit, EditOp::None, &SchemaSpec::any()).unwrap();
        assert!(t.is_empty());
    }

    #[test]
    fn test_annotations_stripped_after_apply() {
        let mut t = Tree::new();
        let edit = tree(r#"<config><a operation="merge">1</a></config>"#);
        apply(&mut t, &edit, EditOp::Merge, &SchemaSpec::any()).unwrap();
        let a = t.find_child(t.root(), &QName::local("a")).unwrap();
        assert!(t.attrs(a).is_empty());
    }

    #[test]
    fn test_bad_operation_attribute_rejected() {
        let mut t = Tree::new();
        let edit = tree(r#"<config><a operation="explode">1</a></config>"#);
        let err = apply(&mut t, &edit, EditOp::Merge, &SchemaSpec::any()).unwrap_err();
        assert_eq!(err.tag, ErrorTag::BadAttribute);
    }
}
