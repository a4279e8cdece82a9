//! The engine value
//!
//! [`Engine`] is the explicit handle passed to every operation: it owns the
//! datastore set, the active schema, the plugin registry, the advisory lock
//! table, and the process-wide transaction lock. There is no process-wide
//! global; the dispatcher and RPC handlers hold a shared reference, and
//! signal handlers receive the engine through a registered hook.

use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::warn;

use trellis_core::{EditOp, Path, Result, Tree};
use trellis_schema::SchemaSpec;
use trellis_store::{DbState, LockTable, StoreSet};

use crate::plugin::{Plugin, PluginRegistry};

/// Marker file consulted at startup after a failed revert
const FAILSAFE_PENDING_FILE: &str = "failsafe_pending";

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Directory holding the persisted datastore files
    pub dir: PathBuf,
    /// Dispatcher acquires/releases datastore locks implicitly around edits
    pub autolock: bool,
    /// Soft wall-clock budget for a single plugin callback
    pub callback_timeout: Duration,
}

impl EngineOptions {
    /// Options with defaults: autolock on, 60s callback timeout
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        EngineOptions {
            dir: dir.into(),
            autolock: true,
            callback_timeout: Duration::from_secs(60),
        }
    }

    /// Set the autolock mode
    pub fn autolock(mut self, on: bool) -> Self {
        self.autolock = on;
        self
    }

    /// Set the callback timeout
    pub fn callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }
}

/// The datastore transaction engine
pub struct Engine {
    pub(crate) stores: RwLock<StoreSet>,
    pub(crate) plugins: PluginRegistry,
    pub(crate) txn_lock: Mutex<()>,
    pub(crate) txn_seq: AtomicU64,
    locks: LockTable,
    spec: SchemaSpec,
    opts: EngineOptions,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("dir", &self.opts.dir)
            .field("plugins", &self.plugins.names())
            .finish()
    }
}

impl Engine {
    /// Start building an engine over the given schema
    pub fn builder(spec: SchemaSpec) -> EngineBuilder {
        EngineBuilder {
            spec,
            opts: EngineOptions::new("."),
            plugins: PluginRegistry::new(),
        }
    }

    /// Engine configuration
    pub fn options(&self) -> &EngineOptions {
        &self.opts
    }

    /// The active schema specification
    pub fn spec(&self) -> &SchemaSpec {
        &self.spec
    }

    /// Advisory datastore lock table
    pub fn locks(&self) -> &LockTable {
        &self.locks
    }

    /// Registered plugins
    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    // =========================================================================
    // Datastore operations
    // =========================================================================

    /// Read a fragment of a datastore
    pub fn db_get(&self, name: &str, filter: &Path) -> Result<Tree> {
        self.stores.read().get(name, filter)
    }

    /// Apply an edit to a datastore
    pub fn db_put(
        &self,
        name: &str,
        op: EditOp,
        edit: &Tree,
        user: Option<&str>,
    ) -> Result<()> {
        self.stores.write().put(name, op, edit, user, &self.spec)
    }

    /// Atomic full-tree copy between datastores
    pub fn db_copy(&self, src: &str, dst: &str) -> Result<()> {
        self.stores.write().copy(src, dst)
    }

    /// Create an empty datastore
    pub fn db_create(&self, name: &str) -> Result<()> {
        self.stores.write().create(name)
    }

    /// Delete a datastore
    pub fn db_delete(&self, name: &str) -> Result<()> {
        self.stores.write().delete(name)
    }

    /// Truncate a datastore to empty, creating it when absent
    pub fn db_reset(&self, name: &str) -> Result<()> {
        self.stores.write().reset(name)
    }

    /// True when the datastore exists
    pub fn db_exists(&self, name: &str) -> bool {
        self.stores.read().exists(name)
    }

    /// Lifecycle state of a datastore
    pub fn db_state(&self, name: &str) -> DbState {
        self.stores.read().state(name)
    }

    /// Run every plugin `reset` hook against a datastore
    ///
    /// Plugins contribute their baseline configuration; the result is
    /// persisted. Used by the startup orchestrator on the scratch store.
    pub fn run_reset_hooks(&self, name: &str) -> Result<()> {
        self.stores
            .write()
            .modify(name, |tree| self.plugins.run_reset(tree))
    }

    // =========================================================================
    // Failsafe-recovery marker
    // =========================================================================

    /// Mark the process for failsafe recovery on next start
    ///
    /// Written when a revert itself fails; the startup orchestrator
    /// consults and clears it. Best-effort: a marker that cannot be
    /// written is logged, since this is already a failure path.
    pub fn mark_failsafe_pending(&self) {
        let path = self.opts.dir.join(FAILSAFE_PENDING_FILE);
        if let Err(e) = std::fs::write(&path, b"1\n") {
            warn!(error = %e, path = %path.display(), "could not write failsafe-pending marker");
        }
    }

    /// Consume the failsafe-recovery marker, returning whether it was set
    pub fn take_failsafe_pending(&self) -> bool {
        let path = self.opts.dir.join(FAILSAFE_PENDING_FILE);
        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(error = %e, "could not clear failsafe-pending marker");
            }
            true
        } else {
            false
        }
    }
}

/// Builder for [`Engine`]
pub struct EngineBuilder {
    spec: SchemaSpec,
    opts: EngineOptions,
    plugins: PluginRegistry,
}

impl EngineBuilder {
    /// Set engine options
    pub fn options(mut self, opts: EngineOptions) -> Self {
        self.opts = opts;
        self
    }

    /// Register a plugin; registration order is invocation order
    pub fn plugin(mut self, plugin: Box<dyn Plugin>) -> Self {
        self.plugins.register(plugin);
        self
    }

    /// Open the datastore directory and finish the engine
    ///
    /// Extension statements carried by the schema are handed to every
    /// plugin's `extension` hook here, before any datastore operation.
    pub fn build(self) -> Result<Engine> {
        let stores = StoreSet::open(&self.opts.dir)?;
        for ext in self.spec.extensions() {
            for plugin in self.plugins.iter() {
                plugin.extension(ext)?;
            }
        }
        Ok(Engine {
            stores: RwLock::new(stores),
            plugins: self.plugins,
            txn_lock: Mutex::new(()),
            txn_seq: AtomicU64::new(0),
            locks: LockTable::new(),
            spec: self.spec,
            opts: self.opts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::xml;

    fn engine(dir: &std::path::Path) -> Engine {
        Engine::builder(SchemaSpec::any())
            .options(EngineOptions::new(dir))
            .build()
            .unwrap()
    }

    #[test]
    fn test_store_ops_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let e = engine(dir.path());
        e.db_create("candidate").unwrap();
        let edit = xml::parse("<config><a>1</a></config>").unwrap();
        e.db_put("candidate", EditOp::Merge, &edit, Some("admin"))
            .unwrap();
        assert_eq!(e.db_state("candidate"), DbState::Populated);
        let got = e.db_get("candidate", &Path::root()).unwrap();
        assert!(got.content_eq(&edit));
    }

    #[test]
    fn test_failsafe_marker() {
        let dir = tempfile::tempdir().unwrap();
        let e = engine(dir.path());
        assert!(!e.take_failsafe_pending());
        e.mark_failsafe_pending();
        assert!(e.take_failsafe_pending());
        assert!(!e.take_failsafe_pending());
    }
}
