//! RPC message parsing and reply formatting
//!
//! Incoming messages are `<rpc>` documents carrying exactly one operation
//! element; replies are `<rpc-reply>` with `<ok/>`, a `<data>` payload, or
//! one or more `<rpc-error>` elements. Notification streams emit
//! `<notification>` documents framed identically.

use trellis_core::{xml, EditOp, NodeId, Path, QName, Result, RpcError, Tree};

/// A parsed operation request
#[derive(Debug, Clone)]
pub enum RpcRequest {
    /// Read configuration from a datastore
    GetConfig {
        /// Source datastore
        source: String,
        /// Optional path filter
        filter: Option<Path>,
    },
    /// Edit a datastore
    EditConfig {
        /// Target datastore
        target: String,
        /// Default operation for un-annotated nodes
        default_op: EditOp,
        /// The `config` payload
        payload: Tree,
    },
    /// Full-tree copy between datastores
    CopyConfig {
        /// Source datastore
        source: String,
        /// Target datastore
        target: String,
    },
    /// Delete a datastore
    DeleteConfig {
        /// Target datastore
        target: String,
    },
    /// Validate a datastore without committing
    Validate {
        /// Source datastore
        source: String,
    },
    /// Commit candidate to running
    Commit,
    /// Discard candidate edits
    DiscardChanges,
    /// Acquire the advisory lock on a datastore
    Lock {
        /// Target datastore
        target: String,
    },
    /// Release the advisory lock on a datastore
    Unlock {
        /// Target datastore
        target: String,
    },
    /// Close this session
    CloseSession,
    /// Terminate another session (privileged)
    KillSession {
        /// Victim session id
        session: u32,
    },
    /// Subscribe to a notification stream
    CreateSubscription {
        /// Stream name
        stream: String,
        /// Optional filter expression
        filter: Option<String>,
        /// Optional replay start time
        start: Option<String>,
        /// Optional stop time
        stop: Option<String>,
    },
    /// Adjust the backend debug level
    Debug {
        /// New level
        level: u32,
    },
}

impl RpcRequest {
    /// Operation name as it appears on the wire
    pub fn operation(&self) -> &'static str {
        match self {
            RpcRequest::GetConfig { .. } => "get-config",
            RpcRequest::EditConfig { .. } => "edit-config",
            RpcRequest::CopyConfig { .. } => "copy-config",
            RpcRequest::DeleteConfig { .. } => "delete-config",
            RpcRequest::Validate { .. } => "validate",
            RpcRequest::Commit => "commit",
            RpcRequest::DiscardChanges => "discard-changes",
            RpcRequest::Lock { .. } => "lock",
            RpcRequest::Unlock { .. } => "unlock",
            RpcRequest::CloseSession => "close-session",
            RpcRequest::KillSession { .. } => "kill-session",
            RpcRequest::CreateSubscription { .. } => "create-subscription",
            RpcRequest::Debug { .. } => "debug",
        }
    }
}

/// A parsed `<rpc>` envelope
#[derive(Debug, Clone)]
pub struct RpcMessage {
    /// `message-id` attribute, echoed in the reply
    pub message_id: Option<String>,
    /// The operation
    pub request: RpcRequest,
}

/// Parse an incoming `<rpc>` document
pub fn parse_request(text: &str) -> Result<RpcMessage> {
    let tree = xml::parse(text)?;
    let root = tree.root();
    if tree.name(root).local != "rpc" {
        return Err(RpcError::malformed_message(format!(
            "expected <rpc>, got <{}>",
            tree.name(root)
        )));
    }
    let message_id = tree.attr(root, "message-id").map(str::to_string);
    let op = *tree
        .children(root)
        .first()
        .ok_or_else(|| RpcError::malformed_message("<rpc> carries no operation"))?;
    let request = parse_operation(&tree, op)?;
    Ok(RpcMessage {
        message_id,
        request,
    })
}

fn parse_operation(tree: &Tree, op: NodeId) -> Result<RpcRequest> {
    match tree.name(op).local.as_str() {
        "get-config" => Ok(RpcRequest::GetConfig {
            source: db_name(tree, op, "source")?,
            filter: filter_path(tree, op)?,
        }),
        "edit-config" => {
            let target = db_name(tree, op, "target")?;
            let default_op = match child_body(tree, op, "default-operation") {
                None => EditOp::Merge,
                Some(s) => EditOp::parse(s).ok_or_else(|| {
                    RpcError::bad_element(
                        "default-operation",
                        format!("bad default-operation: {}", s),
                    )
                })?,
            };
            let config = tree
                .find_child(op, &QName::local("config"))
                .ok_or_else(|| RpcError::missing_element("config"))?;
            Ok(RpcRequest::EditConfig {
                target,
                default_op,
                payload: tree.subtree(config),
            })
        }
        "copy-config" => Ok(RpcRequest::CopyConfig {
            source: db_name(tree, op, "source")?,
            target: db_name(tree, op, "target")?,
        }),
        "delete-config" => Ok(RpcRequest::DeleteConfig {
            target: db_name(tree, op, "target")?,
        }),
        "validate" => Ok(RpcRequest::Validate {
            source: db_name(tree, op, "source")?,
        }),
        "commit" => Ok(RpcRequest::Commit),
        "discard-changes" => Ok(RpcRequest::DiscardChanges),
        "lock" => Ok(RpcRequest::Lock {
            target: db_name(tree, op, "target")?,
        }),
        "unlock" => Ok(RpcRequest::Unlock {
            target: db_name(tree, op, "target")?,
        }),
        "close-session" => Ok(RpcRequest::CloseSession),
        "kill-session" => {
            let id = child_body(tree, op, "session-id")
                .ok_or_else(|| RpcError::missing_element("session-id"))?;
            let session = id.parse().map_err(|_| {
                RpcError::bad_element("session-id", format!("bad session-id: {}", id))
            })?;
            Ok(RpcRequest::KillSession { session })
        }
        "create-subscription" => Ok(RpcRequest::CreateSubscription {
            stream: child_body(tree, op, "stream")
                .unwrap_or("NETCONF")
                .to_string(),
            filter: child_body(tree, op, "filter").map(str::to_string),
            start: child_body(tree, op, "startTime").map(str::to_string),
            stop: child_body(tree, op, "stopTime").map(str::to_string),
        }),
        "debug" => {
            let level = child_body(tree, op, "level")
                .ok_or_else(|| RpcError::missing_element("level"))?;
            let level = level
                .parse()
                .map_err(|_| RpcError::bad_element("level", format!("bad level: {}", level)))?;
            Ok(RpcRequest::Debug { level })
        }
        other => Err(RpcError::operation_not_supported(format!(
            "unknown operation: {}",
            other
        ))),
    }
}

/// Extract the datastore named inside `<source>` / `<target>`
fn db_name(tree: &Tree, op: NodeId, which: &str) -> Result<String> {
    let holder = tree
        .find_child(op, &QName::local(which))
        .ok_or_else(|| RpcError::missing_element(which))?;
    let db = tree
        .children(holder)
        .first()
        .ok_or_else(|| RpcError::missing_element(format!("{} datastore", which)))?;
    let name = &tree.name(*db).local;
    if name == "url" {
        return Err(RpcError::operation_not_supported(
            "url datastores are not supported",
        ));
    }
    Ok(name.clone())
}

fn child_body<'a>(tree: &'a Tree, op: NodeId, name: &str) -> Option<&'a str> {
    tree.find_child(op, &QName::local(name))
        .and_then(|c| tree.body(c))
}

fn filter_path(tree: &Tree, op: NodeId) -> Result<Option<Path>> {
    let Some(filter) = tree.find_child(op, &QName::local("filter")) else {
        return Ok(None);
    };
    match tree.attr(filter, "select") {
        Some(select) => Ok(Some(Path::parse(select)?)),
        None => Ok(None),
    }
}

// =============================================================================
// Reply formatting
// =============================================================================

fn reply_root(message_id: Option<&str>) -> Tree {
    let mut t = Tree::with_root(QName::local("rpc-reply"));
    if let Some(id) = message_id {
        let root = t.root();
        t.set_attr(root, "message-id", id);
    }
    t
}

/// Format `<rpc-reply><ok/></rpc-reply>`
pub fn reply_ok(message_id: Option<&str>) -> String {
    let mut t = reply_root(message_id);
    let root = t.root();
    t.add_child(root, QName::local("ok"));
    xml::to_string(&t)
}

/// Format a `<data>` reply carrying the children of a `config` tree
pub fn reply_data(message_id: Option<&str>, data: &Tree) -> String {
    let mut t = reply_root(message_id);
    let root = t.root();
    let holder = t.add_child(root, QName::local("data"));
    for &c in data.children(data.root()) {
        t.graft(holder, data, c);
    }
    xml::to_string(&t)
}

/// Format one or more `<rpc-error>` elements
pub fn reply_errors(message_id: Option<&str>, errors: &[RpcError]) -> String {
    let mut t = reply_root(message_id);
    let root = t.root();
    for err in errors {
        let e = t.add_child(root, QName::local("rpc-error"));
        let ty = t.add_child(e, QName::local("error-type"));
        t.set_body(ty, Some(err.error_type.as_str().to_string()));
        let tag = t.add_child(e, QName::local("error-tag"));
        t.set_body(tag, Some(err.tag.as_str().to_string()));
        let sev = t.add_child(e, QName::local("error-severity"));
        t.set_body(sev, Some(err.severity.as_str().to_string()));
        if let Some(path) = &err.path {
            let p = t.add_child(e, QName::local("error-path"));
            t.set_body(p, Some(path.clone()));
        }
        if let Some(message) = &err.message {
            let m = t.add_child(e, QName::local("error-message"));
            t.set_body(m, Some(message.clone()));
        }
        if !err.info.is_empty() {
            let info = t.add_child(e, QName::local("error-info"));
            for (name, body) in &err.info {
                let i = t.add_child(info, QName::local(name.clone()));
                t.set_body(i, Some(body.clone()));
            }
        }
    }
    xml::to_string(&t)
}

/// Format a `<notification>` document
pub fn notification(event_time: &str, event: &Tree) -> String {
    let mut t = Tree::with_root(QName::local("notification"));
    let root = t.root();
    let et = t.add_child(root, QName::local("eventTime"));
    t.set_body(et, Some(event_time.to_string()));
    t.graft(root, event, event.root());
    xml::to_string(&t)
}
