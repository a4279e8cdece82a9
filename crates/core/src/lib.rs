//! Core types for Trellis
//!
//! This crate defines the foundational types used throughout the system:
//! - QName: module-qualified element names
//! - Tree / NodeId: arena-backed configuration trees
//! - EditOp: NETCONF edit-config operations
//! - RpcError / ErrorTag: structured error records, the single error currency
//! - xml / json: projection functions to the two wire representations
//! - Path: restricted instance-path addressing

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod json;
pub mod path;
pub mod qname;
pub mod tree;
pub mod xml;

pub use error::{ErrorSeverity, ErrorTag, ErrorType, Result, RpcError};
pub use path::{Path, Step};
pub use qname::QName;
pub use tree::{EditOp, NodeId, Tree, OPERATION_ATTR};
