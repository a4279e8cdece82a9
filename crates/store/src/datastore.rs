//! The named datastore set
//!
//! A [`StoreSet`] owns every named datastore of a running system: the
//! in-memory trees, their lifecycle states, and the coupling to the
//! persistence layer. Every mutating operation persists before returning,
//! so the on-disk state always reflects the last completed operation.
//!
//! Datastore names are drawn from the well-known set below plus
//! implementation-reserved working names; the store layer accepts any valid
//! name and leaves policy to the dispatcher.

use std::collections::HashMap;
use std::path::{Path as FsPath, PathBuf};

use tracing::debug;
use trellis_core::{path, EditOp, Path, Result, RpcError, Tree};
use trellis_schema::SchemaSpec;

use crate::edit;
use crate::persist;

/// The active configuration; mutated only by a successful commit
pub const RUNNING: &str = "running";
/// Mutable staging copy for edits
pub const CANDIDATE: &str = "candidate";
/// Persisted boot configuration
pub const STARTUP: &str = "startup";
/// Known-good configuration used when startup fails
pub const FAILSAFE: &str = "failsafe";
/// Scratch store used by the startup orchestrator
pub const TMP: &str = "tmp";

/// Lifecycle state of a named datastore
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbState {
    /// No such store (no file, no tree)
    Absent,
    /// Store exists but holds no configuration
    Empty,
    /// Store holds configuration
    Populated,
}

/// The set of named datastores backed by one directory
#[derive(Debug)]
pub struct StoreSet {
    dir: PathBuf,
    stores: HashMap<String, Tree>,
}

impl StoreSet {
    /// Open the store set over `dir`
    ///
    /// Removes temp files from interrupted stores, then loads every
    /// persisted datastore found in the directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let removed = persist::cleanup_temp_files(&dir)?;
        if removed > 0 {
            debug!(removed, "removed stale datastore temp files");
        }
        let mut stores = HashMap::new();
        for name in persist::list(&dir)? {
            if let Some(tree) = persist::load(&dir, &name)? {
                stores.insert(name, tree);
            }
        }
        Ok(StoreSet { dir, stores })
    }

    /// Directory holding the persisted files
    pub fn dir(&self) -> &FsPath {
        &self.dir
    }

    /// Lifecycle state of `name`
    pub fn state(&self, name: &str) -> DbState {
        match self.stores.get(name) {
            None => DbState::Absent,
            Some(t) if t.is_empty() => DbState::Empty,
            Some(_) => DbState::Populated,
        }
    }

    /// True when the store exists (empty or populated)
    pub fn exists(&self, name: &str) -> bool {
        self.stores.contains_key(name)
    }

    /// Create an empty datastore
    ///
    /// Fails with `data-exists` when the store is already present.
    pub fn create(&mut self, name: &str) -> Result<()> {
        persist::check_name(name)?;
        if self.stores.contains_key(name) {
            return Err(RpcError::data_exists(name));
        }
        let tree = Tree::new();
        persist::store(&self.dir, name, &tree)?;
        self.stores.insert(name.to_string(), tree);
        Ok(())
    }

    /// Delete a datastore, in memory and on disk
    ///
    /// Silent when the store is absent.
    pub fn delete(&mut self, name: &str) -> Result<()> {
        persist::check_name(name)?;
        self.stores.remove(name);
        persist::remove(&self.dir, name)
    }

    /// Truncate a datastore to empty, keeping it present
    ///
    /// Creates the store when absent.
    pub fn reset(&mut self, name: &str) -> Result<()> {
        persist::check_name(name)?;
        let tree = Tree::new();
        persist::store(&self.dir, name, &tree)?;
        self.stores.insert(name.to_string(), tree);
        Ok(())
    }

    /// Borrow the tree of a datastore
    pub fn tree(&self, name: &str) -> Option<&Tree> {
        self.stores.get(name)
    }

    /// Read a fragment of a datastore
    ///
    /// Returns a `config`-rooted tree holding a copy of every node the path
    /// matches. A path that matches nothing yields an empty result; an
    /// absent datastore fails with `missing-element`.
    pub fn get(&self, name: &str, filter: &Path) -> Result<Tree> {
        let tree = self
            .stores
            .get(name)
            .ok_or_else(|| RpcError::missing_element(name))?;
        if filter.is_root() {
            return Ok(tree.clone());
        }
        let mut out = Tree::new();
        let root = out.root();
        for hit in path::resolve(tree, filter) {
            out.graft(root, tree, hit);
        }
        Ok(out)
    }

    /// Apply an edit to a datastore
    ///
    /// The edit is a `config`-rooted subtree; `op` is the default operation,
    /// overridden per node by `operation` annotations. The result is
    /// persisted before returning.
    pub fn put(
        &mut self,
        name: &str,
        op: EditOp,
        edit_tree: &Tree,
        user: Option<&str>,
        spec: &SchemaSpec,
    ) -> Result<()> {
        let tree = self
            .stores
            .get_mut(name)
            .ok_or_else(|| RpcError::missing_element(name))?;
        edit::apply(tree, edit_tree, op, spec)?;
        persist::store(&self.dir, name, tree)?;
        debug!(db = name, op = %op, user = user.unwrap_or("-"), "datastore edit applied");
        Ok(())
    }

    /// Atomic full-tree copy; previous contents of `dst` are discarded
    ///
    /// `dst` is created when absent. Fails with `missing-element` when the
    /// source is absent.
    pub fn copy(&mut self, src: &str, dst: &str) -> Result<()> {
        persist::check_name(dst)?;
        let tree = self
            .stores
            .get(src)
            .ok_or_else(|| RpcError::missing_element(src))?
            .clone();
        persist::store(&self.dir, dst, &tree)?;
        self.stores.insert(dst.to_string(), tree);
        Ok(())
    }

    /// Replace the whole tree of `name` and persist
    ///
    /// Engine-internal: used by commit to install the new running tree.
    pub fn install(&mut self, name: &str, tree: Tree) -> Result<()> {
        persist::check_name(name)?;
        persist::store(&self.dir, name, &tree)?;
        self.stores.insert(name.to_string(), tree);
        Ok(())
    }

    /// Mutate a datastore tree in place and persist the result
    ///
    /// The closure's error aborts the operation before anything reaches
    /// disk; the in-memory tree may then hold a partial mutation, so
    /// callers use scratch stores for fallible mutations.
    pub fn modify<F>(&mut self, name: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut Tree) -> Result<()>,
    {
        let tree = self
            .stores
            .get_mut(name)
            .ok_or_else(|| RpcError::missing_element(name))?;
        f(tree)?;
        persist::store(&self.dir, name, tree)
    }
}
