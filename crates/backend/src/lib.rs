//! Backend daemon library for Trellis
//!
//! Hosts everything between the local socket and the engine:
//! - [`proto`]: message framing (length-prefixed or legacy sentinel)
//! - [`rpc`]: `<rpc>` parsing and `<rpc-reply>` formatting
//! - [`Dispatcher`]: session table, lock discipline, request routing
//! - [`restconf`]: the pure mapping consumed by the HTTP gateway
//! - [`config`]: daemon configuration file
//!
//! The daemon binary (`trellisd`) lives in `src/main.rs`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod dispatch;
pub mod proto;
pub mod restconf;
pub mod rpc;
pub mod server;

pub use config::{BackendConfig, SocketSpec};
pub use dispatch::{Dispatcher, SessionAction};
pub use proto::FrameMode;
pub use rpc::{RpcMessage, RpcRequest};
