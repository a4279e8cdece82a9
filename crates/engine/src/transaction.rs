//! Transactions and diffs
//!
//! A [`Transaction`] represents one commit attempt: source and target
//! datastore names, the candidate tree, a snapshot of the target taken at
//! init, the computed diff, the current phase, and the outcome. At most one
//! transaction exists in the process at any time (the engine serializes
//! commits with its process-wide transaction lock) and the value is
//! destroyed once commit-done or revert completes.
//!
//! The diff is mutable while the transaction is in the validate phase (a
//! validate callback may refine it for callbacks that run later) and frozen
//! from the commit phase on: every commit and revert callback observes the
//! same diff.

use trellis_core::{NodeId, QName, Tree};
use trellis_schema::SchemaSpec;

/// Phase of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Snapshot and diff computation
    Init,
    /// Pre-validate, structural validate and validate callbacks
    Validate,
    /// Commit callbacks running forward
    Commit,
    /// Best-effort completion callbacks
    CommitDone,
    /// Commit callbacks being unwound after a failure
    Revert,
    /// Terminal
    End,
}

impl Phase {
    /// Canonical string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Init => "init",
            Phase::Validate => "validate",
            Phase::Commit => "commit",
            Phase::CommitDone => "commit-done",
            Phase::Revert => "revert",
            Phase::End => "end",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnOutcome {
    /// Still in flight
    Pending,
    /// Committed (or empty diff)
    Ok,
    /// Rejected during a validate phase; target untouched
    Invalid,
    /// Failed during commit; target restored
    Failed,
}

impl TxnOutcome {
    /// Canonical string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            TxnOutcome::Pending => "pending",
            TxnOutcome::Ok => "ok",
            TxnOutcome::Invalid => "invalid",
            TxnOutcome::Failed => "failed",
        }
    }
}

/// Kind of a diff entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffKind {
    /// Present in the candidate, absent in the original
    Added,
    /// Present in the original, absent in the candidate
    Removed,
    /// Leaf present in both with different bodies
    Changed,
}

/// One element of a transaction diff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffEntry {
    /// Added, removed or changed
    pub kind: DiffKind,
    /// Instance path, with list keys, e.g. `/ifaces/iface[name='eth0']/mtu`
    pub path: String,
    /// Qualified name of the affected element
    pub element: QName,
    /// New body for changed leaves
    pub value: Option<String>,
}

/// The set of added, removed and changed nodes between two trees
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeDiff {
    /// Entries in tree order
    pub entries: Vec<DiffEntry>,
}

impl TreeDiff {
    /// True when the trees were identical
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries of one kind
    pub fn of_kind(&self, kind: DiffKind) -> impl Iterator<Item = &DiffEntry> {
        self.entries.iter().filter(move |e| e.kind == kind)
    }

    /// Compute the diff from `orig` to `cand`
    ///
    /// List entries are paired by their schema-declared keys, leaf-lists by
    /// value; an unpaired subtree contributes a single entry for its root.
    pub fn compute(spec: &SchemaSpec, orig: &Tree, cand: &Tree) -> TreeDiff {
        let mut diff = TreeDiff::default();
        diff_level(
            spec,
            orig,
            orig.root(),
            cand,
            cand.root(),
            None,
            "",
            &mut diff.entries,
        );
        diff
    }
}

#[allow(clippy::too_many_arguments)]
fn diff_level(
    spec: &SchemaSpec,
    orig: &Tree,
    onode: NodeId,
    cand: &Tree,
    cnode: NodeId,
    schema: Option<&trellis_schema::SchemaNode>,
    prefix: &str,
    out: &mut Vec<DiffEntry>,
) {
    let mut matched_orig: Vec<NodeId> = Vec::new();
    for &cc in cand.children(cnode) {
        let name = cand.name(cc);
        let child_schema = spec.child_of(schema, name);
        let keys: Vec<String> = child_schema.map(|s| s.keys().to_vec()).unwrap_or_default();
        // Leaf-lists pair by value. Without schema, duplicated siblings
        // are treated as a leaf-list; a singleton leaf pairs by name so a
        // body edit shows up as Changed, not as Removed plus Added.
        let by_body = match child_schema {
            Some(s) => s.is_leaf_list(),
            None => {
                cand.body(cc).is_some()
                    && cand.child_count(cc) == 0
                    && cand.find_children(cnode, name).len() > 1
            }
        };
        let step = step_string(cand, cc, &keys);
        let path = format!("{}/{}", prefix, step);
        match orig.match_child(onode, cand, cc, &keys, by_body) {
            Some(oc) if !matched_orig.contains(&oc) => {
                matched_orig.push(oc);
                if orig.body(oc) != cand.body(cc) {
                    out.push(DiffEntry {
                        kind: DiffKind::Changed,
                        path: path.clone(),
                        element: name.clone(),
                        value: cand.body(cc).map(str::to_string),
                    });
                }
                diff_level(spec, orig, oc, cand, cc, child_schema, &path, out);
            }
            _ => {
                out.push(DiffEntry {
                    kind: DiffKind::Added,
                    path,
                    element: name.clone(),
                    value: cand.body(cc).map(str::to_string),
                });
            }
        }
    }
    for &oc in orig.children(onode) {
        if matched_orig.contains(&oc) {
            continue;
        }
        let name = orig.name(oc);
        let child_schema = spec.child_of(schema, name);
        let keys: Vec<String> = child_schema.map(|s| s.keys().to_vec()).unwrap_or_default();
        let step = step_string(orig, oc, &keys);
        out.push(DiffEntry {
            kind: DiffKind::Removed,
            path: format!("{}/{}", prefix, step),
            element: name.clone(),
            value: None,
        });
    }
}

fn step_string(tree: &Tree, id: NodeId, keys: &[String]) -> String {
    let mut s = tree.name(id).to_string();
    for (key, value) in keys.iter().zip(tree.key_values(id, keys)) {
        s.push_str(&format!("[{}='{}']", key, value.unwrap_or_default()));
    }
    s
}

/// One commit attempt
///
/// Created by the engine at init, handed to plugin callbacks phase by
/// phase, destroyed after commit-done or revert.
#[derive(Debug)]
pub struct Transaction {
    /// Process-unique transaction id
    pub id: u64,
    /// Source datastore name
    pub source: String,
    /// Target datastore name (normally `running`)
    pub target: String,
    /// The candidate tree being committed
    pub candidate: Tree,
    /// Snapshot of the target taken at init
    pub original: Tree,
    /// Current phase
    pub phase: Phase,
    /// Current outcome
    pub outcome: TxnOutcome,
    diff: TreeDiff,
    diff_frozen: bool,
}

impl Transaction {
    /// Create a transaction in the init phase
    pub fn new(id: u64, source: &str, target: &str, candidate: Tree, original: Tree, diff: TreeDiff) -> Self {
        Transaction {
            id,
            source: source.to_string(),
            target: target.to_string(),
            candidate,
            original,
            phase: Phase::Init,
            outcome: TxnOutcome::Pending,
            diff,
            diff_frozen: false,
        }
    }

    /// The transaction diff
    pub fn diff(&self) -> &TreeDiff {
        &self.diff
    }

    /// Mutable access to the diff, `None` once frozen
    ///
    /// Validate callbacks may refine the diff; later validate callbacks
    /// observe the change. From the commit phase on the diff is frozen.
    pub fn diff_mut(&mut self) -> Option<&mut TreeDiff> {
        if self.diff_frozen {
            None
        } else {
            Some(&mut self.diff)
        }
    }

    /// Freeze the diff at the end of validate
    pub(crate) fn freeze_diff(&mut self) {
        self.diff_frozen = true;
    }
}
