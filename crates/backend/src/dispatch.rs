//! Request dispatch and session management
//!
//! The dispatcher multiplexes client sessions over the engine: it parses
//! framed requests, runs the auth hooks, enforces the lock discipline, maps
//! each operation onto engine calls, and formats replies. Sessions carry an
//! id, a privileged flag, their held locks (in the engine's lock table) and
//! their active subscriptions.
//!
//! Lock discipline: with autolock off, `edit-config` requires the caller to
//! hold the target's lock; with autolock on, the dispatcher acquires and
//! releases it around the edit. Either way, a datastore locked by another
//! session fails with `in-use`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use trellis_core::{EditOp, RpcError, Tree};
use trellis_engine::{AuthRequest, Engine};
use trellis_store::{CANDIDATE, RUNNING};

use crate::rpc::{self, RpcRequest};

/// Datastore names a client may address
const CLIENT_DBS: &[&str] = &["running", "candidate", "startup", "failsafe"];

/// What the connection loop should do after a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    /// Keep serving this session
    Continue,
    /// The session is over; close the connection
    Close,
}

#[derive(Debug)]
struct Session {
    user: Option<String>,
    privileged: bool,
    subscriptions: Vec<String>,
    /// Queued notification documents, drained by the connection loop
    outbox: Vec<String>,
    /// Set by kill-session; the connection loop closes on sight
    killed: bool,
}

/// Routes requests from sessions to the engine
pub struct Dispatcher {
    engine: Arc<Engine>,
    sessions: DashMap<u32, Session>,
    next_sid: AtomicU32,
    debug_level: AtomicU32,
}

impl Dispatcher {
    /// Create a dispatcher over an engine
    pub fn new(engine: Arc<Engine>) -> Self {
        Dispatcher {
            engine,
            sessions: DashMap::new(),
            next_sid: AtomicU32::new(1),
            debug_level: AtomicU32::new(0),
        }
    }

    /// The engine behind this dispatcher
    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Current backend debug level (adjustable via the `debug` RPC)
    pub fn debug_level(&self) -> u32 {
        self.debug_level.load(Ordering::SeqCst)
    }

    /// Register a new session
    pub fn open_session(&self, user: Option<String>, privileged: bool) -> u32 {
        let sid = self.next_sid.fetch_add(1, Ordering::SeqCst);
        self.sessions.insert(
            sid,
            Session {
                user,
                privileged,
                subscriptions: Vec::new(),
                outbox: Vec::new(),
                killed: false,
            },
        );
        info!(session = sid, privileged, "session opened");
        sid
    }

    /// Tear down a session: release its locks, drop its subscriptions
    pub fn close_session(&self, sid: u32) {
        let released = self.engine.locks().release_session(sid);
        for db in &released {
            debug!(session = sid, db = db.as_str(), "lock released on close");
        }
        self.sessions.remove(&sid);
        info!(session = sid, "session closed");
    }

    /// True when the session was killed by a privileged peer
    pub fn is_killed(&self, sid: u32) -> bool {
        self.sessions.get(&sid).map(|s| s.killed).unwrap_or(true)
    }

    /// Drain queued notifications for a session
    pub fn take_outbox(&self, sid: u32) -> Vec<String> {
        self.sessions
            .get_mut(&sid)
            .map(|mut s| std::mem::take(&mut s.outbox))
            .unwrap_or_default()
    }

    /// Queue a notification to every session subscribed to `stream`
    pub fn notify(&self, stream: &str, event_time: &str, event: &Tree) {
        let doc = rpc::notification(event_time, event);
        for mut entry in self.sessions.iter_mut() {
            if entry.subscriptions.iter().any(|s| s == stream) {
                entry.outbox.push(doc.clone());
            }
        }
    }

    /// Handle one framed request, returning the reply document
    pub fn handle(&self, sid: u32, text: &str) -> (String, SessionAction) {
        let msg = match rpc::parse_request(text) {
            Ok(msg) => msg,
            Err(e) => return (rpc::reply_errors(None, &[e]), SessionAction::Continue),
        };
        let mid = msg.message_id.clone();
        let mid = mid.as_deref();

        // Pluggable authenticator: first decision wins, deny is final.
        let auth = AuthRequest {
            session: sid,
            operation: msg.request.operation().to_string(),
            user: self.sessions.get(&sid).and_then(|s| s.user.clone()),
        };
        if let Err(e) = self.engine.plugins().authorize(&auth) {
            return (rpc::reply_errors(mid, &[e]), SessionAction::Continue);
        }

        match self.dispatch(sid, msg.request) {
            Ok(Reply::Ok) => (rpc::reply_ok(mid), SessionAction::Continue),
            Ok(Reply::Data(tree)) => (rpc::reply_data(mid, &tree), SessionAction::Continue),
            Ok(Reply::Closing) => (rpc::reply_ok(mid), SessionAction::Close),
            Err(errs) => (rpc::reply_errors(mid, &errs), SessionAction::Continue),
        }
    }

    fn dispatch(&self, sid: u32, request: RpcRequest) -> Result<Reply, Vec<RpcError>> {
        match request {
            RpcRequest::GetConfig { source, filter } => {
                check_client_db(&source)?;
                let tree = self
                    .engine
                    .db_get(&source, &filter.unwrap_or_default())
                    .map_err(one)?;
                Ok(Reply::Data(tree))
            }
            RpcRequest::EditConfig {
                target,
                default_op,
                payload,
            } => {
                check_client_db(&target)?;
                self.edit(sid, &target, default_op, &payload).map_err(one)?;
                Ok(Reply::Ok)
            }
            RpcRequest::CopyConfig { source, target } => {
                check_client_db(&source)?;
                check_client_db(&target)?;
                self.engine
                    .locks()
                    .check_edit(&target, sid, false)
                    .map_err(one)?;
                self.engine.db_copy(&source, &target).map_err(one)?;
                Ok(Reply::Ok)
            }
            RpcRequest::DeleteConfig { target } => {
                check_client_db(&target)?;
                if target == RUNNING {
                    return Err(one(RpcError::invalid_value(
                        "the running datastore cannot be deleted",
                    )));
                }
                self.engine
                    .locks()
                    .check_edit(&target, sid, false)
                    .map_err(one)?;
                self.engine.db_delete(&target).map_err(one)?;
                Ok(Reply::Ok)
            }
            RpcRequest::Validate { source } => {
                check_client_db(&source)?;
                self.engine.validate_db(&source)?;
                Ok(Reply::Ok)
            }
            RpcRequest::Commit => {
                self.engine.candidate_commit(CANDIDATE, RUNNING)?;
                Ok(Reply::Ok)
            }
            RpcRequest::DiscardChanges => {
                self.engine
                    .locks()
                    .check_edit(CANDIDATE, sid, false)
                    .map_err(one)?;
                self.engine.db_copy(RUNNING, CANDIDATE).map_err(one)?;
                Ok(Reply::Ok)
            }
            RpcRequest::Lock { target } => {
                check_client_db(&target)?;
                self.engine.locks().lock(&target, sid).map_err(one)?;
                Ok(Reply::Ok)
            }
            RpcRequest::Unlock { target } => {
                check_client_db(&target)?;
                self.engine.locks().unlock(&target, sid).map_err(one)?;
                Ok(Reply::Ok)
            }
            RpcRequest::CloseSession => Ok(Reply::Closing),
            RpcRequest::KillSession { session } => {
                self.kill_session(sid, session).map_err(one)?;
                Ok(Reply::Ok)
            }
            RpcRequest::CreateSubscription { stream, .. } => {
                match self.sessions.get_mut(&sid) {
                    Some(mut s) => s.subscriptions.push(stream),
                    None => return Err(one(RpcError::operation_failed("unknown session"))),
                }
                Ok(Reply::Ok)
            }
            RpcRequest::Debug { level } => {
                self.debug_level.store(level, Ordering::SeqCst);
                info!(level, "debug level changed");
                Ok(Reply::Ok)
            }
        }
    }

    /// Edit under the lock discipline
    fn edit(
        &self,
        sid: u32,
        target: &str,
        default_op: EditOp,
        payload: &Tree,
    ) -> trellis_core::Result<()> {
        let locks = self.engine.locks();
        let autolock = self.engine.options().autolock;
        let user = self.sessions.get(&sid).and_then(|s| s.user.clone());

        if autolock {
            locks.check_edit(target, sid, false)?;
            let acquired = locks.holder(target).is_none();
            if acquired {
                locks.lock(target, sid)?;
            }
            let result = self
                .engine
                .db_put(target, default_op, payload, user.as_deref());
            if acquired {
                // Release even when the edit failed.
                if let Err(e) = locks.unlock(target, sid) {
                    warn!(session = sid, db = target, error = %e, "autolock release failed");
                }
            }
            result
        } else {
            locks.check_edit(target, sid, true)?;
            self.engine
                .db_put(target, default_op, payload, user.as_deref())
        }
    }

    /// Privileged termination of another session
    fn kill_session(&self, sid: u32, victim: u32) -> trellis_core::Result<()> {
        let privileged = self
            .sessions
            .get(&sid)
            .map(|s| s.privileged)
            .unwrap_or(false);
        if !privileged {
            return Err(RpcError::access_denied(
                "kill-session requires a privileged session",
            ));
        }
        if victim == sid {
            return Err(RpcError::invalid_value("cannot kill own session"));
        }
        let Some(mut entry) = self.sessions.get_mut(&victim) else {
            return Err(RpcError::invalid_value(format!(
                "no such session: {}",
                victim
            )));
        };
        entry.killed = true;
        drop(entry);
        let released = self.engine.locks().release_session(victim);
        for db in &released {
            debug!(victim, db = db.as_str(), "lock revoked by kill-session");
        }
        info!(session = sid, victim, "session killed");
        Ok(())
    }
}

fn check_client_db(name: &str) -> Result<(), Vec<RpcError>> {
    if CLIENT_DBS.contains(&name) {
        Ok(())
    } else {
        Err(one(RpcError::invalid_value(format!(
            "no such datastore: {}",
            name
        ))))
    }
}

fn one(e: RpcError) -> Vec<RpcError> {
    vec![e]
}

/// Successful dispatch results
enum Reply {
    Ok,
    Data(Tree),
    Closing,
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::ErrorTag;
    use trellis_engine::EngineOptions;
    use trellis_schema::SchemaSpec;

    fn dispatcher(autolock: bool) -> (tempfile::TempDir, Dispatcher) {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::builder(SchemaSpec::any())
            .options(EngineOptions::new(dir.path()).autolock(autolock))
            .build()
            .unwrap();
        engine.db_create(RUNNING).unwrap();
        engine.db_create(CANDIDATE).unwrap();
        (dir, Dispatcher::new(Arc::new(engine)))
    }

    fn expect_ok(d: &Dispatcher, sid: u32, req: &str) {
        let (reply, _) = d.handle(sid, req);
        assert!(reply.contains("<ok/>"), "expected ok, got: {}", reply);
    }

    fn expect_error(d: &Dispatcher, sid: u32, req: &str, tag: ErrorTag) {
        let (reply, _) = d.handle(sid, req);
        assert!(
            reply.contains(&format!("<error-tag>{}</error-tag>", tag)),
            "expected {}, got: {}",
            tag,
            reply
        );
    }

    #[test]
    fn test_edit_and_get_round_trip() {
        let (_t, d) = dispatcher(true);
        let sid = d.open_session(None, false);
        expect_ok(
            &d,
            sid,
            r#"<rpc message-id="1"><edit-config><target><candidate/></target>
               <config><system><host>h1</host></system></config></edit-config></rpc>"#,
        );
        let (reply, _) = d.handle(
            sid,
            r#"<rpc message-id="2"><get-config><source><candidate/></source></get-config></rpc>"#,
        );
        assert!(reply.contains("<data><system><host>h1</host></system></data>"));
    }

    #[test]
    fn test_lock_contention_yields_in_use() {
        let (_t, d) = dispatcher(true);
        let s1 = d.open_session(None, false);
        let s2 = d.open_session(None, false);
        expect_ok(&d, s1, "<rpc><lock><target><candidate/></target></lock></rpc>");
        // S2's edit on the locked candidate fails with in-use; S1 unaffected.
        expect_error(
            &d,
            s2,
            r#"<rpc><edit-config><target><candidate/></target>
               <config><a>1</a></config></edit-config></rpc>"#,
            ErrorTag::InUse,
        );
        expect_ok(
            &d,
            s1,
            r#"<rpc><edit-config><target><candidate/></target>
               <config><a>1</a></config></edit-config></rpc>"#,
        );
    }

    #[test]
    fn test_lock_denied_reports_holder() {
        let (_t, d) = dispatcher(true);
        let s1 = d.open_session(None, false);
        let s2 = d.open_session(None, false);
        expect_ok(&d, s1, "<rpc><lock><target><candidate/></target></lock></rpc>");
        let (reply, _) = d.handle(s2, "<rpc><lock><target><candidate/></target></lock></rpc>");
        assert!(reply.contains("<error-tag>lock-denied</error-tag>"));
        assert!(reply.contains(&format!("<session-id>{}</session-id>", s1)));
    }

    #[test]
    fn test_autolock_off_requires_lock() {
        let (_t, d) = dispatcher(false);
        let sid = d.open_session(None, false);
        expect_error(
            &d,
            sid,
            r#"<rpc><edit-config><target><candidate/></target>
               <config><a>1</a></config></edit-config></rpc>"#,
            ErrorTag::OperationFailed,
        );
        expect_ok(&d, sid, "<rpc><lock><target><candidate/></target></lock></rpc>");
        expect_ok(
            &d,
            sid,
            r#"<rpc><edit-config><target><candidate/></target>
               <config><a>1</a></config></edit-config></rpc>"#,
        );
    }

    #[test]
    fn test_commit_flow() {
        let (_t, d) = dispatcher(true);
        let sid = d.open_session(None, false);
        expect_ok(
            &d,
            sid,
            r#"<rpc><edit-config><target><candidate/></target>
               <config><a>1</a></config></edit-config></rpc>"#,
        );
        expect_ok(&d, sid, "<rpc><commit/></rpc>");
        let (reply, _) = d.handle(
            sid,
            "<rpc><get-config><source><running/></source></get-config></rpc>",
        );
        assert!(reply.contains("<a>1</a>"));
    }

    #[test]
    fn test_discard_changes_restores_candidate() {
        let (_t, d) = dispatcher(true);
        let sid = d.open_session(None, false);
        expect_ok(
            &d,
            sid,
            r#"<rpc><edit-config><target><candidate/></target>
               <config><junk>x</junk></config></edit-config></rpc>"#,
        );
        expect_ok(&d, sid, "<rpc><discard-changes/></rpc>");
        let (reply, _) = d.handle(
            sid,
            "<rpc><get-config><source><candidate/></source></get-config></rpc>",
        );
        assert!(reply.contains("<data/>"));
    }

    #[test]
    fn test_close_session_releases_locks() {
        let (_t, d) = dispatcher(true);
        let s1 = d.open_session(None, false);
        let s2 = d.open_session(None, false);
        expect_ok(&d, s1, "<rpc><lock><target><candidate/></target></lock></rpc>");
        let (reply, action) = d.handle(s1, "<rpc><close-session/></rpc>");
        assert!(reply.contains("<ok/>"));
        assert_eq!(action, SessionAction::Close);
        d.close_session(s1);
        expect_ok(&d, s2, "<rpc><lock><target><candidate/></target></lock></rpc>");
    }

    #[test]
    fn test_kill_session_requires_privilege() {
        let (_t, d) = dispatcher(true);
        let s1 = d.open_session(None, false);
        let s2 = d.open_session(None, false);
        let (reply, _) = d.handle(
            s1,
            &format!("<rpc><kill-session><session-id>{}</session-id></kill-session></rpc>", s2),
        );
        assert!(reply.contains("<error-tag>access-denied</error-tag>"));
    }

    #[test]
    fn test_kill_session_revokes_locks() {
        let (_t, d) = dispatcher(true);
        let admin = d.open_session(Some("root".to_string()), true);
        let victim = d.open_session(None, false);
        expect_ok(&d, victim, "<rpc><lock><target><candidate/></target></lock></rpc>");
        expect_ok(
            &d,
            admin,
            &format!(
                "<rpc><kill-session><session-id>{}</session-id></kill-session></rpc>",
                victim
            ),
        );
        assert!(d.is_killed(victim));
        assert_eq!(d.engine().locks().holder(CANDIDATE), None);
    }

    #[test]
    fn test_subscription_receives_notifications() {
        let (_t, d) = dispatcher(true);
        let sid = d.open_session(None, false);
        expect_ok(
            &d,
            sid,
            "<rpc><create-subscription><stream>NETCONF</stream></create-subscription></rpc>",
        );
        let event = trellis_core::xml::parse("<config-change><db>running</db></config-change>")
            .unwrap();
        d.notify("NETCONF", "2024-03-01T00:00:00Z", &event);
        let out = d.take_outbox(sid);
        assert_eq!(out.len(), 1);
        assert!(out[0].contains("<config-change>"));
        assert!(d.take_outbox(sid).is_empty());
    }

    #[test]
    fn test_unknown_datastore_rejected() {
        let (_t, d) = dispatcher(true);
        let sid = d.open_session(None, false);
        expect_error(
            &d,
            sid,
            "<rpc><get-config><source><bogus/></source></get-config></rpc>",
            ErrorTag::InvalidValue,
        );
    }

    #[test]
    fn test_delete_running_rejected() {
        let (_t, d) = dispatcher(true);
        let sid = d.open_session(None, false);
        expect_error(
            &d,
            sid,
            "<rpc><delete-config><target><running/></target></delete-config></rpc>",
            ErrorTag::InvalidValue,
        );
    }

    #[test]
    fn test_malformed_request_reports_error() {
        let (_t, d) = dispatcher(true);
        let sid = d.open_session(None, false);
        let (reply, action) = d.handle(sid, "<rpc><get-config></rpc>");
        assert!(reply.contains("<error-tag>malformed-message</error-tag>"));
        assert_eq!(action, SessionAction::Continue);
    }

    #[test]
    fn test_debug_level_adjustable() {
        let (_t, d) = dispatcher(true);
        let sid = d.open_session(None, false);
        assert_eq!(d.debug_level(), 0);
        expect_ok(&d, sid, "<rpc><debug><level>2</level></debug></rpc>");
        assert_eq!(d.debug_level(), 2);
    }
}
