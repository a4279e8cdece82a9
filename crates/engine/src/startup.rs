//! Startup orchestration
//!
//! Runs once at process start and brings the system from the persisted
//! on-disk state to a validated running state:
//!
//! ```text
//!    [persisted startup present?] --no--> create empty startup
//!                  |yes
//!                  v
//!        load startup into memory
//!                  v
//!            validate + commit  -----failure----> FAILSAFE
//!                  |ok
//!                  v
//!      merge extra-xml file + plugin-reset output
//!      into a tmp datastore, validate, merge into running
//!                  |ok                          |fail
//!                  v                            v
//!               READY                        FAILSAFE
//! ```
//!
//! The FAILSAFE path backs up `running` to `tmp`, resets `running` and
//! commits the failsafe store through the full pipeline; commit callbacks
//! never see a tree the validator rejected. If the failsafe commit fails
//! the backup is restored and startup is fatal; if no failsafe store
//! exists, startup is fatal.

use std::path::Path as FsPath;

use tracing::{info, warn};

use trellis_core::{xml, EditOp, Path, Result, RpcError};
use trellis_store::{DbState, FAILSAFE, RUNNING, STARTUP, TMP};

use crate::commit::TxnResult;
use crate::engine::Engine;

/// Startup mode selected on the daemon command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupMode {
    /// Touch nothing; leave running as persisted
    None,
    /// Reset running to empty, skip loading startup
    Init,
    /// Commit the startup datastore into running
    Startup,
    /// Re-commit running's own content (triggers application callbacks)
    Running,
    /// Go directly to the failsafe configuration
    Failsafe,
}

impl StartupMode {
    /// Canonical string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            StartupMode::None => "none",
            StartupMode::Init => "init",
            StartupMode::Startup => "startup",
            StartupMode::Running => "running",
            StartupMode::Failsafe => "failsafe",
        }
    }

    /// Parse a mode name
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(StartupMode::None),
            "init" => Some(StartupMode::Init),
            "startup" => Some(StartupMode::Startup),
            "running" => Some(StartupMode::Running),
            "failsafe" => Some(StartupMode::Failsafe),
            _ => None,
        }
    }
}

impl std::fmt::Display for StartupMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How startup concluded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupStatus {
    /// Running holds the validated configuration
    Ready,
    /// Startup failed; running holds the failsafe configuration
    ReadyFailsafe,
}

/// Result of a non-fatal startup stage
enum StageCheck {
    Ok,
    Invalid(Vec<RpcError>),
}

impl From<TxnResult> for StageCheck {
    fn from(r: TxnResult) -> Self {
        match r {
            Ok(()) => StageCheck::Ok,
            Err(errs) => StageCheck::Invalid(errs),
        }
    }
}

/// Bring the system up
///
/// A returned error is fatal: the daemon exits non-zero. Validation
/// failures are not fatal here; they route to the failsafe path.
pub fn run(
    engine: &Engine,
    mode: StartupMode,
    extra_xml: Option<&FsPath>,
) -> Result<StartupStatus> {
    let mode = if engine.take_failsafe_pending() {
        warn!("previous run left a failed revert; forcing failsafe startup");
        StartupMode::Failsafe
    } else {
        mode
    };

    // The dispatcher serves running from the first request on.
    if !engine.db_exists(RUNNING) {
        engine.db_create(RUNNING)?;
    }

    let mut fallback: Option<Vec<RpcError>> = None;
    match mode {
        StartupMode::None => return Ok(StartupStatus::Ready),
        StartupMode::Failsafe => {
            failsafe(engine)?;
            return Ok(StartupStatus::ReadyFailsafe);
        }
        StartupMode::Init => {
            engine.db_reset(RUNNING)?;
        }
        StartupMode::Startup => {
            if let StageCheck::Invalid(errs) = mode_startup(engine, STARTUP)? {
                fallback = Some(errs);
            }
        }
        StartupMode::Running => {
            // Commit running's own content through the pipeline, using a
            // backup in tmp as the commit source.
            engine.db_copy(RUNNING, TMP)?;
            engine.db_reset(RUNNING)?;
            if let StageCheck::Invalid(errs) =
                StageCheck::from(engine.candidate_commit(TMP, RUNNING))
            {
                fallback = Some(errs);
            }
        }
    }

    if fallback.is_none() {
        match extraxml(engine, extra_xml)? {
            StageCheck::Ok => {}
            StageCheck::Invalid(errs) => fallback = Some(errs),
        }
    }

    match fallback {
        None => {
            info!(mode = %mode, "startup complete");
            Ok(StartupStatus::Ready)
        }
        Some(errs) => {
            for e in &errs {
                warn!(error = %e, "startup validation failed");
            }
            failsafe(engine)?;
            Ok(StartupStatus::ReadyFailsafe)
        }
    }
}

/// Commit the startup datastore into running
///
/// Creates the startup store empty when absent.
fn mode_startup(engine: &Engine, db: &str) -> Result<StageCheck> {
    if db == RUNNING {
        return Err(RpcError::operation_failed(format!(
            "Invalid startup datastore: {}",
            db
        )));
    }
    if !engine.db_exists(db) {
        engine.db_create(db)?;
    }
    Ok(StageCheck::from(engine.candidate_commit(db, RUNNING)))
}

/// Load extra XML via file and/or reset hooks, and merge into running
///
/// The extra configuration is staged in `tmp`, validated there, and merged
/// into running *without* running commit callbacks. Application state can
/// therefore diverge from running for this content; that is deliberate.
fn extraxml(engine: &Engine, file: Option<&FsPath>) -> Result<StageCheck> {
    engine.db_reset(TMP)?;
    engine.run_reset_hooks(TMP)?;
    if let Some(path) = file {
        let text = std::fs::read_to_string(path).map_err(|e| {
            RpcError::operation_failed(format!("open({}): {}", path.display(), e))
        })?;
        let tree = xml::parse(&text)?;
        if let Err(e) = engine.db_put(TMP, EditOp::Merge, &tree, None) {
            engine.db_delete(TMP)?;
            return Ok(StageCheck::Invalid(vec![e]));
        }
    }
    // Nothing to merge: skip validation entirely.
    if engine.db_state(TMP) != DbState::Populated {
        engine.db_delete(TMP)?;
        return Ok(StageCheck::Ok);
    }
    if let Err(errs) = engine.validate_db(TMP) {
        engine.db_delete(TMP)?;
        return Ok(StageCheck::Invalid(errs));
    }
    let staged = engine.db_get(TMP, &Path::root())?;
    let merged = engine.db_put(RUNNING, EditOp::Merge, &staged, None);
    engine.db_delete(TMP)?;
    match merged {
        Ok(()) => Ok(StageCheck::Ok),
        Err(e) => Ok(StageCheck::Invalid(vec![e])),
    }
}

/// Reset running and commit the failsafe store; fatal when impossible
fn failsafe(engine: &Engine) -> Result<()> {
    if !engine.db_exists(FAILSAFE) {
        return Err(RpcError::operation_failed(
            "Startup failed and no failsafe datastore found, exiting",
        ));
    }
    // Back up running for restore-on-error.
    engine.db_copy(RUNNING, TMP)?;
    engine.db_reset(RUNNING)?;
    match engine.candidate_commit(FAILSAFE, RUNNING) {
        Ok(()) => {
            info!("Startup failed, failsafe datastore loaded");
            Ok(())
        }
        Err(errs) => {
            engine.db_copy(TMP, RUNNING)?;
            Err(RpcError::operation_failed(format!(
                "Startup failed, failsafe datastore validation failed: {}",
                errs[0]
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineOptions;
    use crate::plugin::Plugin;
    use crate::transaction::Transaction;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use trellis_core::QName;
    use trellis_schema::{LeafType, SchemaNode, SchemaSpec};

    fn foo_spec() -> SchemaSpec {
        SchemaSpec::new().root(SchemaNode::leaf("foo", LeafType::uint_range(0, 100)))
    }

    fn engine_at(dir: &std::path::Path, spec: SchemaSpec) -> Engine {
        Engine::builder(spec)
            .options(EngineOptions::new(dir))
            .build()
            .unwrap()
    }

    fn write_db(dir: &std::path::Path, name: &str, content: &str) {
        std::fs::write(dir.join(format!("{}_db", name)), content).unwrap();
    }

    fn running_xml(engine: &Engine) -> String {
        xml::canonical(&engine.db_get(RUNNING, &Path::root()).unwrap())
    }

    #[test]
    fn test_startup_empty() {
        let dir = tempfile::tempdir().unwrap();
        let e = engine_at(dir.path(), foo_spec());
        let status = run(&e, StartupMode::Startup, None).unwrap();
        assert_eq!(status, StartupStatus::Ready);
        assert_eq!(e.db_state(STARTUP), DbState::Empty);
        assert_eq!(e.db_state(RUNNING), DbState::Empty);
    }

    #[test]
    fn test_startup_valid() {
        let dir = tempfile::tempdir().unwrap();
        write_db(dir.path(), STARTUP, "<config><foo>1</foo></config>");
        let e = engine_at(dir.path(), foo_spec());
        let status = run(&e, StartupMode::Startup, None).unwrap();
        assert_eq!(status, StartupStatus::Ready);
        let startup = e.db_get(STARTUP, &Path::root()).unwrap();
        let running = e.db_get(RUNNING, &Path::root()).unwrap();
        assert!(startup.content_eq(&running));
        assert_eq!(e.db_state(RUNNING), DbState::Populated);
    }

    #[test]
    fn test_startup_invalid_falls_back_to_failsafe() {
        let dir = tempfile::tempdir().unwrap();
        write_db(dir.path(), STARTUP, "<config><foo>999</foo></config>");
        write_db(dir.path(), FAILSAFE, "<config><foo>0</foo></config>");
        let e = engine_at(dir.path(), foo_spec());
        let status = run(&e, StartupMode::Startup, None).unwrap();
        assert_eq!(status, StartupStatus::ReadyFailsafe);
        let failsafe = e.db_get(FAILSAFE, &Path::root()).unwrap();
        let running = e.db_get(RUNNING, &Path::root()).unwrap();
        assert!(failsafe.content_eq(&running));
    }

    #[test]
    fn test_startup_invalid_without_failsafe_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_db(dir.path(), STARTUP, "<config><foo>999</foo></config>");
        let e = engine_at(dir.path(), foo_spec());
        let err = run(&e, StartupMode::Startup, None).unwrap_err();
        assert!(err
            .message
            .as_deref()
            .unwrap()
            .contains("no failsafe datastore"));
    }

    #[test]
    fn test_failsafe_commit_failure_restores_backup_and_is_fatal() {
        struct Saboteur;
        impl Plugin for Saboteur {
            fn name(&self) -> &str {
                "saboteur"
            }
            fn commit(&self, _txn: &Transaction) -> trellis_core::Result<()> {
                Err(RpcError::operation_failed("refusing everything"))
            }
        }
        let dir = tempfile::tempdir().unwrap();
        write_db(dir.path(), RUNNING, "<config><foo>5</foo></config>");
        write_db(dir.path(), STARTUP, "<config><foo>999</foo></config>");
        write_db(dir.path(), FAILSAFE, "<config><foo>0</foo></config>");
        let e = Engine::builder(foo_spec())
            .options(EngineOptions::new(dir.path()))
            .plugin(Box::new(Saboteur))
            .build()
            .unwrap();
        let before = running_xml(&e);
        assert!(run(&e, StartupMode::Startup, None).is_err());
        assert_eq!(running_xml(&e), before);
    }

    #[test]
    fn test_mode_none_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        write_db(dir.path(), RUNNING, "<config><foo>5</foo></config>");
        let e = engine_at(dir.path(), foo_spec());
        let before = running_xml(&e);
        assert_eq!(run(&e, StartupMode::None, None).unwrap(), StartupStatus::Ready);
        assert_eq!(running_xml(&e), before);
    }

    #[test]
    fn test_mode_init_resets_running() {
        let dir = tempfile::tempdir().unwrap();
        write_db(dir.path(), RUNNING, "<config><foo>5</foo></config>");
        let e = engine_at(dir.path(), foo_spec());
        run(&e, StartupMode::Init, None).unwrap();
        assert_eq!(e.db_state(RUNNING), DbState::Empty);
    }

    #[test]
    fn test_mode_running_recommits_running() {
        let commits = Arc::new(AtomicU32::new(0));
        struct Counter(Arc<AtomicU32>);
        impl Plugin for Counter {
            fn name(&self) -> &str {
                "counter"
            }
            fn commit(&self, _txn: &Transaction) -> trellis_core::Result<()> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
        let dir = tempfile::tempdir().unwrap();
        write_db(dir.path(), RUNNING, "<config><foo>5</foo></config>");
        let e = Engine::builder(foo_spec())
            .options(EngineOptions::new(dir.path()))
            .plugin(Box::new(Counter(commits.clone())))
            .build()
            .unwrap();
        let before = running_xml(&e);
        run(&e, StartupMode::Running, None).unwrap();
        assert_eq!(running_xml(&e), before);
        assert_eq!(commits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_extra_xml_merged_without_commit_callbacks() {
        let commits = Arc::new(AtomicU32::new(0));
        struct Counter(Arc<AtomicU32>);
        impl Plugin for Counter {
            fn name(&self) -> &str {
                "counter"
            }
            fn commit(&self, _txn: &Transaction) -> trellis_core::Result<()> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
        let dir = tempfile::tempdir().unwrap();
        let extra = dir.path().join("extra.xml");
        std::fs::write(&extra, "<config><foo>7</foo></config>").unwrap();
        let e = Engine::builder(foo_spec())
            .options(EngineOptions::new(dir.path()))
            .plugin(Box::new(Counter(commits.clone())))
            .build()
            .unwrap();
        let status = run(&e, StartupMode::Startup, Some(&extra)).unwrap();
        assert_eq!(status, StartupStatus::Ready);
        // Extra XML landed in running but no commit callback observed it
        // (the startup commit had an empty diff).
        let running = e.db_get(RUNNING, &Path::root()).unwrap();
        let want = xml::parse("<config><foo>7</foo></config>").unwrap();
        assert!(running.content_eq(&want));
        assert_eq!(commits.load(Ordering::SeqCst), 0);
        assert!(!e.db_exists(TMP));
    }

    #[test]
    fn test_plugin_reset_output_merged() {
        struct Baseline;
        impl Plugin for Baseline {
            fn name(&self) -> &str {
                "baseline"
            }
            fn reset(&self, db: &mut trellis_core::Tree) -> trellis_core::Result<()> {
                let id = db.add_child(db.root(), QName::local("foo"));
                db.set_body(id, Some("42".to_string()));
                Ok(())
            }
        }
        let dir = tempfile::tempdir().unwrap();
        let e = Engine::builder(foo_spec())
            .options(EngineOptions::new(dir.path()))
            .plugin(Box::new(Baseline))
            .build()
            .unwrap();
        run(&e, StartupMode::Startup, None).unwrap();
        let running = e.db_get(RUNNING, &Path::root()).unwrap();
        let want = xml::parse("<config><foo>42</foo></config>").unwrap();
        assert!(running.content_eq(&want));
    }

    #[test]
    fn test_invalid_extra_xml_falls_back_to_failsafe() {
        let dir = tempfile::tempdir().unwrap();
        write_db(dir.path(), FAILSAFE, "<config><foo>0</foo></config>");
        let extra = dir.path().join("extra.xml");
        std::fs::write(&extra, "<config><foo>999</foo></config>").unwrap();
        let e = engine_at(dir.path(), foo_spec());
        let status = run(&e, StartupMode::Startup, Some(&extra)).unwrap();
        assert_eq!(status, StartupStatus::ReadyFailsafe);
        let want = xml::parse("<config><foo>0</foo></config>").unwrap();
        assert!(e.db_get(RUNNING, &Path::root()).unwrap().content_eq(&want));
    }

    #[test]
    fn test_failsafe_pending_marker_forces_failsafe() {
        let dir = tempfile::tempdir().unwrap();
        write_db(dir.path(), STARTUP, "<config><foo>1</foo></config>");
        write_db(dir.path(), FAILSAFE, "<config><foo>0</foo></config>");
        let e = engine_at(dir.path(), foo_spec());
        e.mark_failsafe_pending();
        let status = run(&e, StartupMode::Startup, None).unwrap();
        assert_eq!(status, StartupStatus::ReadyFailsafe);
        let want = xml::parse("<config><foo>0</foo></config>").unwrap();
        assert!(e.db_get(RUNNING, &Path::root()).unwrap().content_eq(&want));
    }

    #[test]
    fn test_mode_parse_round_trip() {
        for mode in [
            StartupMode::None,
            StartupMode::Init,
            StartupMode::Startup,
            StartupMode::Running,
            StartupMode::Failsafe,
        ] {
            assert_eq!(StartupMode::parse(mode.as_str()), Some(mode));
        }
        assert_eq!(StartupMode::parse("bogus"), None);
    }
}
