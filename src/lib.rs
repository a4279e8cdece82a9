//! # Trellis
//!
//! A YANG-modeled network configuration engine: named datastores,
//! schema-validated edits, and transactional commits with rollback.
//!
//! Trellis maintains a set of named configuration datastores (`running`,
//! `candidate`, `startup`, `failsafe`, plus scratch stores), validates edits
//! against a YANG-derived schema, and promotes a validated candidate to the
//! active running state through a multi-phase commit pipeline that fans out
//! to registered application plugins.
//!
//! # Quick Start
//!
//! ```no_run
//! use trellis::{Engine, EngineOptions, SchemaSpec, EditOp, xml};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let opts = EngineOptions::new("./datastores");
//!     let engine = Engine::builder(SchemaSpec::any())
//!         .options(opts)
//!         .build()?;
//!
//!     // Stage an edit in the candidate datastore...
//!     let edit = xml::parse("<config><hostname>edge-1</hostname></config>")?;
//!     engine.db_put("candidate", EditOp::Merge, &edit, Some("admin"))?;
//!
//!     // ...and commit it to running.
//!     engine.candidate_commit("candidate", "running").map_err(|errs| {
//!         format!("commit failed: {}", errs[0])
//!     })?;
//!     Ok(())
//! }
//! ```
//!
//! # Datastores
//!
//! | Store | Purpose |
//! |-------|---------|
//! | `running` | Active configuration; mutated only by a successful commit |
//! | `candidate` | Mutable staging copy for edits |
//! | `startup` | Persisted boot configuration |
//! | `failsafe` | Known-good configuration committed when startup fails |
//! | `tmp` | Scratch store used by the startup orchestrator |
//!
//! # Architecture
//!
//! The [`Engine`] value is the main entry point; it owns the store set, the
//! schema, the plugin registry, and the process-wide transaction lock. The
//! backend daemon (`trellisd`, in `trellis-backend`) multiplexes client
//! sessions over a local socket and routes NETCONF-style RPCs to the engine.
//!
//! Internal crates (store, schema) are re-exported selectively; only the
//! surface in this crate is stable.

pub use trellis_core::{
    xml, EditOp, ErrorSeverity, ErrorTag, ErrorType, Path, QName, Result, RpcError, Tree,
};
pub use trellis_engine::{
    startup, Engine, EngineBuilder, EngineOptions, Phase, Plugin, StartupMode, StartupStatus,
    Transaction, TxnOutcome, TxnResult,
};
pub use trellis_schema::{LeafType, SchemaNode, SchemaSpec};
pub use trellis_store::{DbState, CANDIDATE, FAILSAFE, RUNNING, STARTUP, TMP};
