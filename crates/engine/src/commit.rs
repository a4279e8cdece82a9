//! The commit pipeline
//!
//! Drives a source→target transaction through the phase sequence:
//!
//! 1. **Init**: take the transaction lock, snapshot the target, compute
//!    the diff; an empty diff short-circuits to ok.
//! 2. **Pre-validate**: plugin `pre_validate` hooks.
//! 3. **Structural validate**: the schema validator over the candidate.
//! 4. **Application validate**: plugin `validate` hooks.
//! 5. **Commit**: swap the target in memory, run `commit` hooks in
//!    registration order. On any failure, unwind the hooks that succeeded
//!    in reverse order with reason `abort`, restore the original target,
//!    and fail.
//! 6. **Commit-done**: best-effort `commit_done` hooks, then persist.
//! 7. **Finalize**: release the lock.
//!
//! A failure in any validate phase leaves every datastore untouched. A
//! revert that itself fails marks the process for failsafe recovery on the
//! next start. Each callback runs under the engine's soft timeout:
//! overrunning it counts as that callback failing.

use std::sync::atomic::Ordering;
use std::time::Instant;

use tracing::{debug, info, warn};

use trellis_core::{Result, RpcError};
use trellis_schema::validate;
use trellis_store::RUNNING;

use crate::engine::Engine;
use crate::transaction::{Phase, Transaction, TreeDiff, TxnOutcome};

/// Result of a transactional engine operation
///
/// Validation reports every violation, so the error arm carries one or
/// more records.
pub type TxnResult = std::result::Result<(), Vec<RpcError>>;

impl Engine {
    /// Commit the source datastore into the target
    ///
    /// Concurrent commits are rejected with `in-use` while a transaction
    /// holds the lock; they never observe partial state.
    pub fn candidate_commit(&self, source: &str, target: &str) -> TxnResult {
        let guard = self
            .txn_lock
            .try_lock()
            .ok_or_else(|| vec![RpcError::in_use("a transaction is already in progress")])?;
        let result = self.commit_locked(source, target);
        drop(guard);
        result
    }

    /// Validate a source datastore against the running target, no commit
    ///
    /// Runs the pre-validate, structural-validate and validate phases with
    /// the same semantics as a commit, then stops.
    pub fn validate_db(&self, source: &str) -> TxnResult {
        let guard = self
            .txn_lock
            .try_lock()
            .ok_or_else(|| vec![RpcError::in_use("a transaction is already in progress")])?;
        let result = (|| {
            let mut txn = self.begin(source, RUNNING)?;
            txn.phase = Phase::Validate;
            self.validate_phases(&mut txn)?;
            txn.outcome = TxnOutcome::Ok;
            txn.phase = Phase::End;
            Ok(())
        })();
        drop(guard);
        result
    }

    /// Init: snapshot source and target, compute the diff
    fn begin(&self, source: &str, target: &str) -> std::result::Result<Transaction, Vec<RpcError>> {
        let (candidate, original) = {
            let stores = self.stores.read();
            let candidate = stores
                .tree(source)
                .cloned()
                .ok_or_else(|| vec![RpcError::missing_element(source)])?;
            let original = stores.tree(target).cloned().unwrap_or_default();
            (candidate, original)
        };
        let diff = TreeDiff::compute(self.spec(), &original, &candidate);
        let id = self.txn_seq.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Transaction::new(id, source, target, candidate, original, diff))
    }

    fn commit_locked(&self, source: &str, target: &str) -> TxnResult {
        let mut txn = self.begin(source, target)?;
        if txn.diff().is_empty() {
            debug!(source, target, "commit short-circuit: empty diff");
            return Ok(());
        }

        txn.phase = Phase::Validate;
        self.validate_phases(&mut txn)?;

        // The diff is frozen from here on: commit and revert observe the
        // same set of changes.
        txn.freeze_diff();
        txn.phase = Phase::Commit;

        let mut succeeded = 0usize;
        let mut failure: Option<RpcError> = None;
        for plugin in self.plugins.iter() {
            match self.timed(plugin.name(), Phase::Commit, || plugin.commit(&txn)) {
                Ok(()) => succeeded += 1,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        // The target is swapped only once every commit callback has
        // succeeded; readers holding no lock never observe the in-flight
        // tree, and a failed commit leaves memory and disk untouched.
        if failure.is_none() {
            if let Err(e) = self
                .stores
                .write()
                .install(target, txn.candidate.clone())
            {
                failure = Some(e);
            }
        }

        if let Some(err) = failure {
            txn.phase = Phase::Revert;
            warn!(
                txn = txn.id,
                source,
                target,
                error = %err,
                "commit failed, reverting"
            );
            let mut revert_failed = false;
            for plugin in self.plugins.iter_rev(succeeded) {
                if let Err(re) =
                    self.timed(plugin.name(), Phase::Revert, || plugin.revert(&txn, "abort"))
                {
                    tracing::error!(plugin = plugin.name(), error = %re, "revert failed");
                    revert_failed = true;
                }
            }
            if revert_failed {
                // The application state is now unknown; recover through
                // failsafe on the next start.
                self.mark_failsafe_pending();
            }
            txn.outcome = TxnOutcome::Failed;
            txn.phase = Phase::End;
            return Err(vec![err]);
        }

        txn.phase = Phase::CommitDone;
        for plugin in self.plugins.iter() {
            if let Err(e) =
                self.timed(plugin.name(), Phase::CommitDone, || plugin.commit_done(&txn))
            {
                warn!(plugin = plugin.name(), error = %e, "commit-done callback failed (ignored)");
            }
        }

        txn.outcome = TxnOutcome::Ok;
        txn.phase = Phase::End;
        info!(txn = txn.id, source, target, "transaction committed");
        Ok(())
    }

    /// Phases 2–4: pre-validate hooks, structural validate, validate hooks
    ///
    /// Any failure sets outcome `invalid`; no datastore has been touched.
    fn validate_phases(&self, txn: &mut Transaction) -> TxnResult {
        for plugin in self.plugins.iter() {
            let res = self.timed(plugin.name(), Phase::Validate, || plugin.pre_validate(txn));
            if let Err(e) = res {
                txn.outcome = TxnOutcome::Invalid;
                return Err(vec![e]);
            }
        }
        if let Err(errs) = validate(self.spec(), &txn.candidate) {
            txn.outcome = TxnOutcome::Invalid;
            return Err(errs);
        }
        for plugin in self.plugins.iter() {
            let res = self.timed(plugin.name(), Phase::Validate, || plugin.validate(txn));
            if let Err(e) = res {
                txn.outcome = TxnOutcome::Invalid;
                return Err(vec![e]);
            }
        }
        Ok(())
    }

    /// Run a callback under the soft timeout
    ///
    /// The callback cannot be preempted; an overrun is detected on return
    /// and reported as a failure of that callback.
    fn timed(
        &self,
        plugin: &str,
        phase: Phase,
        f: impl FnOnce() -> Result<()>,
    ) -> Result<()> {
        let start = Instant::now();
        let result = f();
        let elapsed = start.elapsed();
        if elapsed > self.options().callback_timeout {
            warn!(plugin, phase = %phase, ?elapsed, "callback exceeded soft timeout");
            return Err(RpcError::operation_failed(format!(
                "callback of plugin {} in phase {} exceeded {:?} timeout",
                plugin,
                phase,
                self.options().callback_timeout
            ))
            .with_info("plugin", plugin));
        }
        result.map_err(|e| e.with_info("plugin", plugin))
    }
}
