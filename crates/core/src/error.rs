//! Error records for Trellis
//!
//! Every failure in the system is expressed as an [`RpcError`], a structured
//! record modeled on the NETCONF `<rpc-error>` element. Error records are the
//! sole currency between the engine and its callers; no other error channel
//! is exposed.
//!
//! ## Error Model
//!
//! An error record carries:
//!
//! | Field | Meaning |
//! |-------|---------|
//! | `error_type` | Layer that detected the failure (transport/rpc/protocol/application) |
//! | `tag` | Closed-set classification symbol ([`ErrorTag`]) |
//! | `severity` | `error` or `warning` |
//! | `path` | Optional instance path of the offending node |
//! | `message` | Optional human-readable message |
//! | `info` | Optional structured detail elements |
//!
//! The tag set is frozen: it is the canonical wire representation and maps
//! 1:1 onto the NETCONF error-tag vocabulary. Internal unexpected conditions
//! are reported as `operation-failed` with an internal message; they never
//! leak implementation identifiers.
//!
//! ## Usage
//!
//! ```
//! use trellis_core::{RpcError, ErrorTag};
//!
//! let err = RpcError::data_exists("interface");
//! assert_eq!(err.tag, ErrorTag::DataExists);
//! assert!(err.to_string().contains("data-exists"));
//! ```

use std::io;
use thiserror::Error;

/// Result type alias for Trellis operations
pub type Result<T> = std::result::Result<T, RpcError>;

// =============================================================================
// ErrorType - Protocol layer that detected the failure
// =============================================================================

/// Protocol layer in which an error originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorType {
    /// Secure transport layer
    Transport,
    /// RPC layer (framing, message structure)
    Rpc,
    /// Protocol operation layer
    Protocol,
    /// Application / data-model layer
    Application,
}

impl ErrorType {
    /// Canonical string representation for wire encoding
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::Transport => "transport",
            ErrorType::Rpc => "rpc",
            ErrorType::Protocol => "protocol",
            ErrorType::Application => "application",
        }
    }

    /// Parse from the wire representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "transport" => Some(ErrorType::Transport),
            "rpc" => Some(ErrorType::Rpc),
            "protocol" => Some(ErrorType::Protocol),
            "application" => Some(ErrorType::Application),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// ErrorTag - Canonical closed-set error classification (frozen)
// =============================================================================

/// Closed set of error classification tags
///
/// These are the stable wire representation of all Trellis errors and follow
/// the NETCONF error-tag vocabulary. They are frozen and will not change
/// without a major version bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorTag {
    /// Request requires a resource that is already in use
    InUse,
    /// A value is not correct for the node type
    InvalidValue,
    /// Request or response is too large to handle
    TooBig,
    /// A required attribute is missing
    MissingAttribute,
    /// An attribute value is not correct
    BadAttribute,
    /// An unexpected attribute is present
    UnknownAttribute,
    /// A required element is missing
    MissingElement,
    /// An element value is not correct
    BadElement,
    /// An unexpected element is present
    UnknownElement,
    /// An unexpected namespace is present
    UnknownNamespace,
    /// Access to the requested resource is denied
    AccessDenied,
    /// Requested lock is held by another session
    LockDenied,
    /// Insufficient resources to complete the request
    ResourceDenied,
    /// Rollback of a failed commit itself failed
    RollbackFailed,
    /// Node to be created already exists
    DataExists,
    /// Node to be deleted does not exist
    DataMissing,
    /// Operation is not supported by this implementation
    OperationNotSupported,
    /// Operation failed for a reason not covered by another tag
    OperationFailed,
    /// Some but not all of the requested operations completed
    PartialOperation,
    /// Message could not be parsed
    MalformedMessage,
}

impl ErrorTag {
    /// Canonical string representation for wire encoding
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorTag::InUse => "in-use",
            ErrorTag::InvalidValue => "invalid-value",
            ErrorTag::TooBig => "too-big",
            ErrorTag::MissingAttribute => "missing-attribute",
            ErrorTag::BadAttribute => "bad-attribute",
            ErrorTag::UnknownAttribute => "unknown-attribute",
            ErrorTag::MissingElement => "missing-element",
            ErrorTag::BadElement => "bad-element",
            ErrorTag::UnknownElement => "unknown-element",
            ErrorTag::UnknownNamespace => "unknown-namespace",
            ErrorTag::AccessDenied => "access-denied",
            ErrorTag::LockDenied => "lock-denied",
            ErrorTag::ResourceDenied => "resource-denied",
            ErrorTag::RollbackFailed => "rollback-failed",
            ErrorTag::DataExists => "data-exists",
            ErrorTag::DataMissing => "data-missing",
            ErrorTag::OperationNotSupported => "operation-not-supported",
            ErrorTag::OperationFailed => "operation-failed",
            ErrorTag::PartialOperation => "partial-operation",
            ErrorTag::MalformedMessage => "malformed-message",
        }
    }

    /// Parse an error tag from its string representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in-use" => Some(ErrorTag::InUse),
            "invalid-value" => Some(ErrorTag::InvalidValue),
            "too-big" => Some(ErrorTag::TooBig),
            "missing-attribute" => Some(ErrorTag::MissingAttribute),
            "bad-attribute" => Some(ErrorTag::BadAttribute),
            "unknown-attribute" => Some(ErrorTag::UnknownAttribute),
            "missing-element" => Some(ErrorTag::MissingElement),
            "bad-element" => Some(ErrorTag::BadElement),
            "unknown-element" => Some(ErrorTag::UnknownElement),
            "unknown-namespace" => Some(ErrorTag::UnknownNamespace),
            "access-denied" => Some(ErrorTag::AccessDenied),
            "lock-denied" => Some(ErrorTag::LockDenied),
            "resource-denied" => Some(ErrorTag::ResourceDenied),
            "rollback-failed" => Some(ErrorTag::RollbackFailed),
            "data-exists" => Some(ErrorTag::DataExists),
            "data-missing" => Some(ErrorTag::DataMissing),
            "operation-not-supported" => Some(ErrorTag::OperationNotSupported),
            "operation-failed" => Some(ErrorTag::OperationFailed),
            "partial-operation" => Some(ErrorTag::PartialOperation),
            "malformed-message" => Some(ErrorTag::MalformedMessage),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// ErrorSeverity
// =============================================================================

/// Severity of an error record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorSeverity {
    /// The request failed
    Error,
    /// The request completed with a caveat
    Warning,
}

impl ErrorSeverity {
    /// Canonical string representation for wire encoding
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Error => "error",
            ErrorSeverity::Warning => "warning",
        }
    }
}

impl std::fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// RpcError - The unified error record
// =============================================================================

/// Structured error record, the single error currency of the system
///
/// Maps 1:1 onto a NETCONF `<rpc-error>` element. Constructed through the
/// tag-specific constructors below, which fill in the conventional
/// type/severity pairing for each tag.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{error_type} {tag}: {}", .message.as_deref().unwrap_or("(no message)"))]
pub struct RpcError {
    /// Layer that detected the failure
    pub error_type: ErrorType,
    /// Closed-set classification tag
    pub tag: ErrorTag,
    /// Severity of the record
    pub severity: ErrorSeverity,
    /// Instance path of the offending node, if known
    pub path: Option<String>,
    /// Human-readable message
    pub message: Option<String>,
    /// Structured detail elements, as (name, body) pairs
    pub info: Vec<(String, String)>,
}

impl RpcError {
    /// Create an error record with explicit type and tag
    pub fn new(error_type: ErrorType, tag: ErrorTag) -> Self {
        RpcError {
            error_type,
            tag,
            severity: ErrorSeverity::Error,
            path: None,
            message: None,
            info: Vec::new(),
        }
    }

    /// Attach a human-readable message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attach the instance path of the offending node
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Attach a structured detail element
    pub fn with_info(mut self, name: impl Into<String>, body: impl Into<String>) -> Self {
        self.info.push((name.into(), body.into()));
        self
    }

    /// Downgrade the record to warning severity
    pub fn as_warning(mut self) -> Self {
        self.severity = ErrorSeverity::Warning;
        self
    }

    // =========================================================================
    // Tag-specific constructors
    // =========================================================================

    /// `in-use`: the requested resource is held by another session
    pub fn in_use(message: impl Into<String>) -> Self {
        RpcError::new(ErrorType::Protocol, ErrorTag::InUse).with_message(message)
    }

    /// `invalid-value`: a value is not correct for the node type
    pub fn invalid_value(message: impl Into<String>) -> Self {
        RpcError::new(ErrorType::Application, ErrorTag::InvalidValue).with_message(message)
    }

    /// `missing-element`: a required element is absent
    ///
    /// The element name is recorded as a `bad-element` info detail, per the
    /// NETCONF convention.
    pub fn missing_element(element: impl Into<String>) -> Self {
        let element = element.into();
        RpcError::new(ErrorType::Application, ErrorTag::MissingElement)
            .with_message(format!("Missing element: {}", element))
            .with_info("bad-element", element)
    }

    /// `bad-element`: an element value is not correct
    pub fn bad_element(element: impl Into<String>, message: impl Into<String>) -> Self {
        RpcError::new(ErrorType::Application, ErrorTag::BadElement)
            .with_message(message)
            .with_info("bad-element", element)
    }

    /// `unknown-element`: an unexpected element is present
    pub fn unknown_element(element: impl Into<String>) -> Self {
        let element = element.into();
        RpcError::new(ErrorType::Application, ErrorTag::UnknownElement)
            .with_message(format!("Unknown element: {}", element))
            .with_info("bad-element", element)
    }

    /// `access-denied`: the authenticator or an auth plugin rejected the request
    pub fn access_denied(message: impl Into<String>) -> Self {
        RpcError::new(ErrorType::Application, ErrorTag::AccessDenied).with_message(message)
    }

    /// `lock-denied`: the lock is held by another session
    ///
    /// Records the holding session as the `session-id` info detail.
    pub fn lock_denied(message: impl Into<String>, holder: u32) -> Self {
        RpcError::new(ErrorType::Protocol, ErrorTag::LockDenied)
            .with_message(message)
            .with_info("session-id", holder.to_string())
    }

    /// `data-exists`: node to be created already exists
    pub fn data_exists(element: impl Into<String>) -> Self {
        let element = element.into();
        RpcError::new(ErrorType::Application, ErrorTag::DataExists)
            .with_message(format!(
                "Data already exists; cannot create new resource: {}",
                element
            ))
            .with_info("bad-element", element)
    }

    /// `data-missing`: node to be deleted does not exist
    pub fn data_missing(element: impl Into<String>) -> Self {
        let element = element.into();
        RpcError::new(ErrorType::Application, ErrorTag::DataMissing)
            .with_message(format!(
                "Data does not exist; cannot delete resource: {}",
                element
            ))
            .with_info("bad-element", element)
    }

    /// `operation-not-supported`: the operation is outside this implementation
    pub fn operation_not_supported(message: impl Into<String>) -> Self {
        RpcError::new(ErrorType::Protocol, ErrorTag::OperationNotSupported).with_message(message)
    }

    /// `operation-failed`: catch-all failure
    pub fn operation_failed(message: impl Into<String>) -> Self {
        RpcError::new(ErrorType::Application, ErrorTag::OperationFailed).with_message(message)
    }

    /// `rollback-failed`: revert of a failed commit itself failed
    pub fn rollback_failed(message: impl Into<String>) -> Self {
        RpcError::new(ErrorType::Protocol, ErrorTag::RollbackFailed).with_message(message)
    }

    /// `malformed-message`: the request could not be parsed
    pub fn malformed_message(message: impl Into<String>) -> Self {
        RpcError::new(ErrorType::Rpc, ErrorTag::MalformedMessage).with_message(message)
    }

    // =========================================================================
    // Classification
    // =========================================================================

    /// True if the record indicates a resource currently held elsewhere
    ///
    /// Such failures are retryable once the holder releases.
    pub fn is_busy(&self) -> bool {
        matches!(self.tag, ErrorTag::InUse | ErrorTag::LockDenied)
    }

    /// True if the record indicates invalid input that a retry cannot fix
    pub fn is_validation(&self) -> bool {
        matches!(
            self.tag,
            ErrorTag::InvalidValue
                | ErrorTag::MissingElement
                | ErrorTag::BadElement
                | ErrorTag::UnknownElement
                | ErrorTag::BadAttribute
                | ErrorTag::MissingAttribute
                | ErrorTag::UnknownAttribute
                | ErrorTag::UnknownNamespace
        )
    }
}

impl From<io::Error> for RpcError {
    fn from(e: io::Error) -> Self {
        RpcError::operation_failed(format!("I/O error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_round_trip() {
        let tags = [
            ErrorTag::InUse,
            ErrorTag::InvalidValue,
            ErrorTag::MissingElement,
            ErrorTag::BadElement,
            ErrorTag::AccessDenied,
            ErrorTag::LockDenied,
            ErrorTag::DataExists,
            ErrorTag::DataMissing,
            ErrorTag::OperationNotSupported,
            ErrorTag::OperationFailed,
            ErrorTag::PartialOperation,
            ErrorTag::MalformedMessage,
        ];
        for tag in tags {
            assert_eq!(ErrorTag::parse(tag.as_str()), Some(tag));
        }
        assert_eq!(ErrorTag::parse("no-such-tag"), None);
    }

    #[test]
    fn test_constructor_conventions() {
        let err = RpcError::data_exists("interface");
        assert_eq!(err.tag, ErrorTag::DataExists);
        assert_eq!(err.error_type, ErrorType::Application);
        assert_eq!(err.severity, ErrorSeverity::Error);
        assert_eq!(err.info[0].0, "bad-element");
        assert_eq!(err.info[0].1, "interface");

        let err = RpcError::lock_denied("lock held", 7);
        assert_eq!(err.tag, ErrorTag::LockDenied);
        assert_eq!(err.info[0], ("session-id".to_string(), "7".to_string()));
    }

    #[test]
    fn test_display_contains_tag() {
        let err = RpcError::in_use("another commit is in progress");
        let msg = err.to_string();
        assert!(msg.contains("in-use"));
        assert!(msg.contains("another commit is in progress"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err: RpcError = io_err.into();
        assert_eq!(err.tag, ErrorTag::OperationFailed);
        assert!(err.message.unwrap().contains("access denied"));
    }

    #[test]
    fn test_classification() {
        assert!(RpcError::in_use("x").is_busy());
        assert!(RpcError::lock_denied("x", 1).is_busy());
        assert!(!RpcError::operation_failed("x").is_busy());
        assert!(RpcError::invalid_value("x").is_validation());
        assert!(!RpcError::data_exists("x").is_validation());
    }

    #[test]
    fn test_warning_severity() {
        let warn = RpcError::operation_failed("slow callback").as_warning();
        assert_eq!(warn.severity, ErrorSeverity::Warning);
        assert_eq!(warn.severity.as_str(), "warning");
    }
}
