//! Incremental line framer for the newline-delimited device protocol.
//!
//! Devices emit `\n`-terminated UTF-8 frames, but the transport hands us
//! arbitrary byte chunks: a read may end mid-line, or carry several lines at
//! once. This framer buffers partial data and yields each complete line
//! exactly once, regardless of how the chunks were split.
use bytes::{Buf, BytesMut};

/// Upper bound on a single line; a device stuck spewing bytes without a
/// terminator must not grow the buffer forever.
const MAX_LINE_LEN: usize = 16 * 1024;

/// Accumulates raw chunks and splits them into complete lines.
///
/// A trailing `\r` is stripped (CRLF devices), and lines that are empty after
/// stripping are dropped, matching the firmware's treatment of blank input.
#[derive(Debug)]
pub struct LineFramer {
    buf: BytesMut,
}

impl LineFramer {
    pub fn new() -> Self {
        Self { buf: BytesMut::with_capacity(1024) }
    }

    /// Feed a raw chunk, returning every line completed by it.
    ///
    /// Bytes after the last `\n` are retained for the next push. Invalid
    /// UTF-8 is replaced rather than rejected; the device is untrusted.
    pub fn push(&mut self, data: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(data);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line = self.buf.split_to(pos + 1);
            line.truncate(line.len() - 1); // drop '\n'
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            if !line.is_empty() {
                lines.push(String::from_utf8_lossy(&line).into_owned());
            }
        }
        // Runaway unterminated line: discard and resync at the next newline.
        if self.buf.len() > MAX_LINE_LEN {
            let dropped = self.buf.len();
            self.buf.advance(dropped);
            log::warn!("dropped {} unterminated bytes (line overflow)", dropped);
        }
        lines
    }

    /// Bytes of the current partial line, if any.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }

    /// Drop any buffered partial line (used when the stream restarts).
    pub fn reset(&mut self) {
        self.buf.clear();
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_multiple_lines_in_one_chunk() {
        let mut framer = LineFramer::new();
        let lines = framer.push(b"hello\nworld\n");
        assert_eq!(lines, vec!["hello", "world"]);
        assert_eq!(framer.pending_len(), 0);
    }

    #[test]
    fn retains_partial_line_across_pushes() {
        let mut framer = LineFramer::new();
        assert!(framer.push(b"hel").is_empty());
        let lines = framer.push(b"lo\nwor");
        assert_eq!(lines, vec!["hello"]);
        assert_eq!(framer.push(b"ld\n"), vec!["world"]);
    }

    #[test]
    fn strips_carriage_return() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.push(b"ok\r\n"), vec!["ok"]);
    }

    #[test]
    fn skips_blank_lines() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.push(b"\r\n\na\n"), vec!["a"]);
    }

    #[test]
    fn lossy_on_invalid_utf8() {
        let mut framer = LineFramer::new();
        let lines = framer.push(&[b'a', 0xFF, b'b', b'\n']);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with('a') && lines[0].ends_with('b'));
    }

    #[test]
    fn overflow_discards_unterminated_run() {
        let mut framer = LineFramer::new();
        let big = vec![b'x'; MAX_LINE_LEN + 10];
        assert!(framer.push(&big).is_empty());
        assert_eq!(framer.pending_len(), 0);
        // stream resyncs on the next terminated line
        assert_eq!(framer.push(b"ok\n"), vec!["ok"]);
    }
}
