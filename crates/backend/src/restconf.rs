//! RESTCONF mapping
//!
//! The HTTP gateway itself is a collaborator; what lives here is the pure
//! mapping it consumes: error-tag → HTTP status translation, media
//! negotiation, method → engine-operation mapping, the well-known
//! host-meta body, and the `ietf-restconf:errors` error body rendering.

use serde_json::{json, Value};
use trellis_core::{ErrorTag, RpcError};

/// Marker message used to distinguish unauthenticated from unauthorized
///
/// NETCONF has only `access-denied`; RESTCONF splits it into 401 (not
/// authenticated) and 403 (not authorized). An error carrying exactly this
/// message maps to 401.
pub const UNAUTHORIZED_MSG: &str = "The requested URL was unauthorized";

/// Body served at `/.well-known/host-meta`
pub const HOST_META: &str = "<XRD xmlns=\"http://docs.oasis-open.org/ns/xri/xrd-1.0\">\
<Link rel=\"restconf\" href=\"/restconf\"/></XRD>";

/// Translate an error record to an HTTP status code
pub fn err2code(err: &RpcError) -> u16 {
    match err.tag {
        ErrorTag::InvalidValue => 400,
        ErrorTag::MissingAttribute => 400,
        ErrorTag::BadAttribute => 400,
        ErrorTag::UnknownAttribute => 400,
        ErrorTag::MissingElement => 400,
        ErrorTag::BadElement => 400,
        ErrorTag::UnknownElement => 400,
        ErrorTag::UnknownNamespace => 400,
        ErrorTag::MalformedMessage => 400,
        ErrorTag::AccessDenied => {
            if err.message.as_deref() == Some(UNAUTHORIZED_MSG) {
                401
            } else {
                403
            }
        }
        ErrorTag::LockDenied => 409,
        ErrorTag::ResourceDenied => 409,
        ErrorTag::InUse => 409,
        ErrorTag::DataExists => 409,
        ErrorTag::DataMissing => 409,
        ErrorTag::OperationNotSupported => 405,
        ErrorTag::TooBig => 413,
        ErrorTag::RollbackFailed => 500,
        ErrorTag::PartialOperation => 500,
        ErrorTag::OperationFailed => 500,
    }
}

/// RESTCONF media types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Media {
    /// `application/yang-data+xml`
    Xml,
    /// `application/yang-data+json`
    Json,
}

impl Media {
    /// MIME string of this media type
    pub fn as_str(&self) -> &'static str {
        match self {
            Media::Xml => "application/yang-data+xml",
            Media::Json => "application/yang-data+json",
        }
    }

    /// Parse a MIME string, accepting the plain xml/json aliases
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "application/yang-data+xml" | "application/xml" | "text/xml" => Some(Media::Xml),
            "application/yang-data+json" | "application/json" => Some(Media::Json),
            _ => None,
        }
    }
}

/// Negotiate the response media from an `Accept` header
///
/// A missing header or `*/*` defaults to JSON. `Err(415)` means none of
/// the requested types is supported.
pub fn negotiate_accept(accept: Option<&str>) -> Result<Media, u16> {
    let Some(accept) = accept else {
        return Ok(Media::Json);
    };
    for part in accept.split(',') {
        let mime = part.split(';').next().unwrap_or("").trim();
        if mime == "*/*" || mime == "application/*" {
            return Ok(Media::Json);
        }
        if let Some(media) = Media::parse(mime) {
            return Ok(media);
        }
    }
    Err(415)
}

/// Check a request `Content-Type` for a body-carrying method
///
/// `Err(415)` when the type is missing or unsupported.
pub fn check_content_type(content_type: Option<&str>) -> Result<Media, u16> {
    content_type
        .and_then(|ct| Media::parse(ct.split(';').next().unwrap_or("")))
        .ok_or(415)
}

/// HTTP methods the gateway maps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Read
    Get,
    /// Replace
    Put,
    /// Create (under `/data`) or invoke (under `/operations`)
    Post,
    /// Merge
    Patch,
    /// Delete
    Delete,
}

/// Engine operation a request maps onto
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayOp {
    /// `get-config`
    GetConfig,
    /// `edit-config` with replace
    EditReplace,
    /// `edit-config` with create
    EditCreate,
    /// `edit-config` with merge
    EditMerge,
    /// `edit-config` with delete
    EditDelete,
    /// Named RPC under `/operations/<name>`
    NamedRpc,
}

/// Map method × resource class to the engine operation
///
/// `Err(405)` carries the `Allow` header value for the resource class.
pub fn map_method(method: Method, under_operations: bool) -> Result<GatewayOp, &'static str> {
    if under_operations {
        return match method {
            Method::Post => Ok(GatewayOp::NamedRpc),
            _ => Err("POST"),
        };
    }
    match method {
        Method::Get => Ok(GatewayOp::GetConfig),
        Method::Put => Ok(GatewayOp::EditReplace),
        Method::Post => Ok(GatewayOp::EditCreate),
        Method::Patch => Ok(GatewayOp::EditMerge),
        Method::Delete => Ok(GatewayOp::EditDelete),
    }
}

/// Render the `ietf-restconf:errors` JSON error body
pub fn errors_json(errors: &[RpcError]) -> Value {
    let list: Vec<Value> = errors
        .iter()
        .map(|e| {
            let mut obj = json!({
                "error-type": e.error_type.as_str(),
                "error-tag": e.tag.as_str(),
            });
            if let Some(path) = &e.path {
                obj["error-path"] = json!(path);
            }
            if let Some(message) = &e.message {
                obj["error-message"] = json!(message);
            }
            if !e.info.is_empty() {
                let mut info = serde_json::Map::new();
                for (k, v) in &e.info {
                    info.insert(k.clone(), json!(v));
                }
                obj["error-info"] = Value::Object(info);
            }
            obj
        })
        .collect();
    json!({ "ietf-restconf:errors": { "error": list } })
}

/// Render the `errors` XML error body
pub fn errors_xml(errors: &[RpcError]) -> String {
    let mut out =
        String::from("<errors xmlns=\"urn:ietf:params:xml:ns:yang:ietf-restconf\">");
    for e in errors {
        out.push_str("<error>");
        out.push_str(&format!("<error-type>{}</error-type>", e.error_type));
        out.push_str(&format!("<error-tag>{}</error-tag>", e.tag));
        if let Some(path) = &e.path {
            out.push_str(&format!(
                "<error-path>{}</error-path>",
                trellis_core::xml::escape_text(path)
            ));
        }
        if let Some(message) = &e.message {
            out.push_str(&format!(
                "<error-message>{}</error-message>",
                trellis_core::xml::escape_text(message)
            ));
        }
        out.push_str("</error>");
    }
    out.push_str("</errors>");
    out
}
