//! Splits raw transport bytes into event blocks.

use bytes::{Buf, BytesMut};
use tracing::debug;

/// Longest recognised delimiter (`\r\n\r\n`).
const MAX_DELIMITER_LEN: usize = 4;

/// Accumulates body bytes and yields complete event blocks.
///
/// A block ends at the earliest `\n\n`, `\r\r` or `\r\n\r\n`. Bytes after the
/// last delimiter are kept until the next [`feed`](Self::feed), so a delimiter
/// split across two reads is still recognised.
#[derive(Debug, Default)]
pub struct ByteFramer {
    buffer: BytesMut,
    // Positions before this offset cannot start a delimiter.
    scan_from: usize,
}

impl ByteFramer {
    /// Create an empty framer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and return every block completed by them, in order.
    ///
    /// Blocks that are not valid UTF-8 are dropped.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut blocks = Vec::new();
        while let Some((start, len)) = find_delimiter(&self.buffer[self.scan_from..]) {
            let end = self.scan_from + start;
            let block = self.buffer.split_to(end).freeze();
            self.buffer.advance(len);
            self.scan_from = 0;

            match std::str::from_utf8(&block) {
                Ok(text) => blocks.push(text.to_string()),
                Err(err) => {
                    debug!(error = %err, len = block.len(), "Dropping undecodable event block")
                }
            }
        }

        self.scan_from = self.buffer.len().saturating_sub(MAX_DELIMITER_LEN - 1);
        blocks
    }

    /// Discard any buffered partial block.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.scan_from = 0;
    }

    /// Number of bytes waiting for a delimiter.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

/// Finds the earliest delimiter in `bytes`, returning `(start, len)`.
fn find_delimiter(bytes: &[u8]) -> Option<(usize, usize)> {
    for pos in memchr::memchr2_iter(b'\n', b'\r', bytes) {
        let rest = &bytes[pos..];
        match rest {
            [b'\n', b'\n', ..] => return Some((pos, 2)),
            [b'\r', b'\r', ..] => return Some((pos, 2)),
            [b'\r', b'\n', b'\r', b'\n', ..] => return Some((pos, 4)),
            _ => {}
        }
    }
    None
}
