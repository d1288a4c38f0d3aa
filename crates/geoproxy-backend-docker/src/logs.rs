//! Demultiplexing for the Docker attached-log stream
//!
//! Containers without a TTY return logs as framed records: an 8-byte
//! header (stream type, three zero bytes, big-endian payload length)
//! followed by the payload.

/// Extract stdout and stderr payloads from a multiplexed log stream.
/// Trailing partial frames are dropped.
pub(crate) fn demux_log_stream(data: &[u8]) -> String {
    let mut out = Vec::new();
    let mut rest = data;
    while rest.len() >= 8 {
        let len = u32::from_be_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
        let end = 8 + len;
        if rest.len() < end {
            break;
        }
        out.extend_from_slice(&rest[8..end]);
        rest = &rest[end..];
    }
    String::from_utf8_lossy(&out).into_owned()
}
