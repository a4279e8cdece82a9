//! Connection serving
//!
//! One session per connection: frames are read, dispatched and replied to
//! in arrival order; queued notifications are flushed after each reply. A
//! session ends when the peer closes, when `close-session` is handled, or
//! when a privileged peer kills it.

use std::io::{Read, Write};
use std::sync::Arc;

use tracing::warn;

use crate::dispatch::{Dispatcher, SessionAction};
use crate::proto::{self, FrameMode};

/// Serve one connection until it ends
///
/// A disconnect during a request does not cancel it: the request runs to
/// its terminal state and the undeliverable reply is logged and discarded.
pub fn serve_conn<S: Read + Write>(
    dispatcher: &Arc<Dispatcher>,
    stream: &mut S,
    framing: FrameMode,
    privileged: bool,
) {
    let sid = dispatcher.open_session(None, privileged);
    loop {
        if dispatcher.is_killed(sid) {
            break;
        }
        let msg = match proto::read_frame(stream, framing) {
            Ok(Some(msg)) => msg,
            Ok(None) => break,
            Err(e) => {
                warn!(session = sid, error = %e, "unreadable frame, closing session");
                break;
            }
        };
        let (reply, action) = dispatcher.handle(sid, &msg);
        if let Err(e) = proto::write_frame(stream, framing, &reply) {
            warn!(session = sid, error = %e, reply = reply.as_str(), "reply discarded");
            break;
        }
        for doc in dispatcher.take_outbox(sid) {
            if let Err(e) = proto::write_frame(stream, framing, &doc) {
                warn!(session = sid, error = %e, "notification discarded");
                break;
            }
        }
        if action == SessionAction::Close {
            break;
        }
    }
    dispatcher.close_session(sid);
}
