//! JSON projection of configuration trees
//!
//! One-way projection used by the RESTCONF mapping and the `get-config`
//! JSON output. Only XML round-trips (it is the persisted form); JSON is a
//! view.
//!
//! The mapping follows the usual YANG-JSON conventions: an element with
//! children becomes an object, repeated sibling names become an array, a
//! leaf becomes its body string, and an empty leaf becomes `null`. Bodies
//! are emitted as strings; schema-typed numeric emission is the caller's
//! concern.

use crate::tree::{NodeId, Tree};
use serde_json::{Map, Value};

/// Project the subtree rooted at `id` to a JSON value
pub fn node_to_value(tree: &Tree, id: NodeId) -> Value {
    if tree.children(id).is_empty() {
        return match tree.body(id) {
            Some(b) => Value::String(b.to_string()),
            None => Value::Null,
        };
    }
    let mut map: Map<String, Value> = Map::new();
    for &c in tree.children(id) {
        let key = tree.name(c).to_string();
        let val = node_to_value(tree, c);
        match map.get_mut(&key) {
            None => {
                map.insert(key, val);
            }
            Some(Value::Array(arr)) => arr.push(val),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, val]);
            }
        }
    }
    Value::Object(map)
}

/// Project a whole tree to a JSON value keyed by its root element name
pub fn to_value(tree: &Tree) -> Value {
    let mut map = Map::new();
    map.insert(
        tree.name(tree.root()).to_string(),
        node_to_value(tree, tree.root()),
    );
    Value::Object(map)
}
