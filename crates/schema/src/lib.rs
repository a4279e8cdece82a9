//! Schema model and structural validator for Trellis
//!
//! The schema crate carries the YANG-derived model ([`SchemaSpec`],
//! [`SchemaNode`], [`LeafType`]) and the pure validator
//! ([`validate::validate`]) that applies it to configuration trees.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod model;
pub mod validate;

pub use model::{Extension, LeafType, Must, Predicate, SchemaKind, SchemaNode, SchemaSpec};
pub use validate::validate;
