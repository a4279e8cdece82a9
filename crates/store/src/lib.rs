//! Named configuration datastores for Trellis
//!
//! This crate owns component-level storage concerns:
//! - [`StoreSet`]: the named datastore set with NETCONF edit semantics
//! - [`edit`]: merge/replace/create/delete/remove application
//! - [`persist`]: atomic on-disk files, one per datastore
//! - [`LockTable`]: advisory per-datastore session locks

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod datastore;
pub mod edit;
pub mod lock;
pub mod persist;

pub use datastore::{DbState, StoreSet, CANDIDATE, FAILSAFE, RUNNING, STARTUP, TMP};
pub use lock::LockTable;
