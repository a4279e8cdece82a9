//! Wire framing
//!
//! Messages are XML documents framed on the local socket in one of two
//! modes: a 4-byte big-endian length prefix (the default), or the legacy
//! sentinel mode where each message is terminated by `]]>]]>`. Replies and
//! notifications are framed identically to requests.

use std::io::{Read, Write};

use trellis_core::{Result, RpcError};

/// Legacy end-of-message sentinel
pub const SENTINEL: &str = "]]>]]>";

/// Upper bound on a single framed message
const MAX_FRAME: usize = 32 * 1024 * 1024;

/// Framing mode of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameMode {
    /// 4-byte big-endian length prefix
    Length,
    /// Legacy `]]>]]>`-terminated messages
    Sentinel,
}

/// Write one framed message
pub fn write_frame<W: Write>(w: &mut W, mode: FrameMode, msg: &str) -> Result<()> {
    match mode {
        FrameMode::Length => {
            let len = u32::try_from(msg.len())
                .map_err(|_| RpcError::new(
                    trellis_core::ErrorType::Rpc,
                    trellis_core::ErrorTag::TooBig,
                ))?;
            w.write_all(&len.to_be_bytes())?;
            w.write_all(msg.as_bytes())?;
        }
        FrameMode::Sentinel => {
            w.write_all(msg.as_bytes())?;
            w.write_all(SENTINEL.as_bytes())?;
        }
    }
    w.flush()?;
    Ok(())
}

/// Read one framed message
///
/// Returns `Ok(None)` on a clean end of stream (peer closed between
/// messages); a stream that ends mid-message is `malformed-message`.
pub fn read_frame<R: Read>(r: &mut R, mode: FrameMode) -> Result<Option<String>> {
    match mode {
        FrameMode::Length => read_length_frame(r),
        FrameMode::Sentinel => read_sentinel_frame(r),
    }
}

fn read_length_frame<R: Read>(r: &mut R) -> Result<Option<String>> {
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < 4 {
        let n = r.read(&mut len_buf[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(RpcError::malformed_message("stream ended inside frame header"));
        }
        filled += n;
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME {
        return Err(RpcError::new(
            trellis_core::ErrorType::Rpc,
            trellis_core::ErrorTag::TooBig,
        )
        .with_message(format!("frame of {} bytes exceeds limit", len)));
    }
    let mut payload = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let n = r.read(&mut payload[filled..])?;
        if n == 0 {
            return Err(RpcError::malformed_message("stream ended inside frame body"));
        }
        filled += n;
    }
    String::from_utf8(payload)
        .map(Some)
        .map_err(|_| RpcError::malformed_message("frame is not valid UTF-8"))
}

fn read_sentinel_frame<R: Read>(r: &mut R) -> Result<Option<String>> {
    let sentinel = SENTINEL.as_bytes();
    let mut buf: Vec<u8> = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = r.read(&mut byte)?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(RpcError::malformed_message("stream ended before sentinel"));
        }
        buf.push(byte[0]);
        if buf.len() > MAX_FRAME {
            return Err(RpcError::new(
                trellis_core::ErrorType::Rpc,
                trellis_core::ErrorTag::TooBig,
            ));
        }
        if buf.ends_with(sentinel) {
            buf.truncate(buf.len() - sentinel.len());
            return String::from_utf8(buf)
                .map(Some)
                .map_err(|_| RpcError::malformed_message("frame is not valid UTF-8"));
        }
    }
}
