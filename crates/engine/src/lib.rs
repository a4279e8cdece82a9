//! Transaction engine for Trellis
//!
//! The engine crate composes the datastore set, the schema validator and
//! the application plugin registry into the commit pipeline:
//! - [`Engine`]: the explicit engine value (no process-wide globals)
//! - [`Plugin`] / [`PluginRegistry`]: ordered application callbacks
//! - [`Transaction`] / [`TreeDiff`]: one commit attempt and its diff
//! - [`startup`]: the once-at-boot orchestrator with the failsafe path

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod commit;
pub mod engine;
pub mod plugin;
pub mod startup;
pub mod transaction;

pub use commit::TxnResult;
pub use engine::{Engine, EngineBuilder, EngineOptions};
pub use plugin::{AuthDecision, AuthRequest, Plugin, PluginRegistry};
pub use startup::{StartupMode, StartupStatus};
pub use transaction::{DiffEntry, DiffKind, Phase, Transaction, TreeDiff, TxnOutcome};
