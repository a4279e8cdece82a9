//! Plugin registry
//!
//! Applications extend the engine through an ordered sequence of capability
//! records: each registered [`Plugin`] implements the subset of phase hooks
//! it cares about (every hook has a no-op default). Forward phases invoke
//! plugins in registration order; revert runs in reverse registration
//! order, so each plugin sees its resources torn down after its dependents.
//!
//! Plugins do not own any datastore; the registry only dispatches.

use trellis_core::{Result, RpcError, Tree};
use trellis_schema::Extension;

use crate::transaction::Transaction;

/// Decision of an `auth` hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    /// This plugin has no opinion; ask the next one
    Ignore,
    /// Request is authenticated and authorized
    Permit,
    /// Request is denied
    Deny,
}

/// An incoming request presented to `auth` hooks
#[derive(Debug, Clone)]
pub struct AuthRequest {
    /// Session issuing the request
    pub session: u32,
    /// Operation name, e.g. `edit-config`
    pub operation: String,
    /// Authenticated user, when the transport provided one
    pub user: Option<String>,
}

/// Application callback surface
///
/// All hooks are optional. Validate-phase hooks receive the transaction
/// mutably (they may refine the diff); commit-phase hooks see it frozen.
pub trait Plugin: Send + Sync {
    /// Name used in log lines and error details
    fn name(&self) -> &str;

    /// Contribute baseline configuration during startup reset
    fn reset(&self, _db: &mut Tree) -> Result<()> {
        Ok(())
    }

    /// First validation pass over a transaction
    fn pre_validate(&self, _txn: &mut Transaction) -> Result<()> {
        Ok(())
    }

    /// Application-level validation of a transaction
    fn validate(&self, _txn: &mut Transaction) -> Result<()> {
        Ok(())
    }

    /// Apply the transaction to application state
    fn commit(&self, _txn: &Transaction) -> Result<()> {
        Ok(())
    }

    /// Post-commit completion; failures are logged, never reverted
    fn commit_done(&self, _txn: &Transaction) -> Result<()> {
        Ok(())
    }

    /// Undo a previously-succeeded `commit` for this transaction
    fn revert(&self, _txn: &Transaction, _reason: &str) -> Result<()> {
        Ok(())
    }

    /// Observe an extension statement carried by the schema
    fn extension(&self, _ext: &Extension) -> Result<()> {
        Ok(())
    }

    /// Authenticate/authorize an incoming request
    fn auth(&self, _request: &AuthRequest) -> Result<AuthDecision> {
        Ok(AuthDecision::Ignore)
    }
}

/// Ordered sequence of registered plugins
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Box<dyn Plugin>>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.names())
            .finish()
    }
}

impl PluginRegistry {
    /// Empty registry
    pub fn new() -> Self {
        PluginRegistry::default()
    }

    /// Register a plugin; registration order is invocation order
    pub fn register(&mut self, plugin: Box<dyn Plugin>) {
        self.plugins.push(plugin);
    }

    /// Number of registered plugins
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// True when no plugin is registered
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Registered plugin names, in order
    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    /// Plugins in registration order
    pub fn iter(&self) -> impl Iterator<Item = &dyn Plugin> {
        self.plugins.iter().map(|p| p.as_ref())
    }

    /// The first `count` plugins in reverse registration order
    ///
    /// Used by revert: only callbacks that already succeeded are unwound.
    pub fn iter_rev(&self, count: usize) -> impl Iterator<Item = &dyn Plugin> {
        self.plugins[..count].iter().rev().map(|p| p.as_ref())
    }

    /// Run every `reset` hook against a datastore tree, in order
    pub fn run_reset(&self, db: &mut Tree) -> Result<()> {
        for plugin in self.iter() {
            plugin.reset(db)?;
        }
        Ok(())
    }

    /// Ask `auth` hooks about a request; the first decision wins
    ///
    /// With no opinionated plugin the request is permitted (authentication
    /// is delegated; an engine without auth plugins is open).
    pub fn authorize(&self, request: &AuthRequest) -> Result<()> {
        for plugin in self.iter() {
            match plugin.auth(request)? {
                AuthDecision::Ignore => continue,
                AuthDecision::Permit => return Ok(()),
                AuthDecision::Deny => {
                    return Err(RpcError::access_denied(format!(
                        "request {} denied",
                        request.operation
                    )))
                }
            }
        }
        Ok(())
    }
}
