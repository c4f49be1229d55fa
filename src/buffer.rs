//! Seekable output byte buffer.
//!
//! The buffer holds the in-progress formatted text. Its cursor mirrors the
//! tree traversal: whenever the engine is looking at a node, the cursor sits
//! on the first byte of that node's window. Rules mutate the buffer through
//! [`FmtBuffer::replace_bytes`] only.

use std::io::{self, Write};

#[derive(Debug, Default)]
pub struct FmtBuffer {
    buf: Vec<u8>,
    pos: usize,
}

impl FmtBuffer {
    pub fn new() -> FmtBuffer {
        FmtBuffer::default()
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Move the cursor. Seeking past the end is a programmer error.
    pub fn set_position(&mut self, pos: usize) {
        assert!(pos <= self.buf.len(), "cursor {pos} past end {}", self.buf.len());
        self.pos = pos;
    }

    pub fn advance(&mut self, n: usize) {
        self.set_position(self.pos + n);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// The `n` bytes at the cursor, without advancing.
    pub fn peek(&self, n: usize) -> &[u8] {
        assert!(self.pos + n <= self.buf.len(), "peek past end of buffer");
        &self.buf[self.pos..self.pos + n]
    }

    /// Replace the `size` bytes at the cursor with `bytes`, shifting the
    /// tail by the length difference. The cursor does not move. Returns the
    /// number of bytes written.
    pub fn replace_bytes(&mut self, bytes: &[u8], size: usize) -> usize {
        assert!(
            self.pos + size <= self.buf.len(),
            "replace_bytes window {}..{} past end {}",
            self.pos,
            self.pos + size,
            self.buf.len()
        );
        if bytes.len() == size {
            self.buf[self.pos..self.pos + size].copy_from_slice(bytes);
        } else {
            self.buf
                .splice(self.pos..self.pos + size, bytes.iter().copied());
        }
        bytes.len()
    }

    pub fn truncate(&mut self, len: usize) {
        self.buf.truncate(len);
        self.pos = self.pos.min(len);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

impl Write for FmtBuffer {
    /// Overwrite-at-cursor semantics, like a file: bytes past the end grow
    /// the buffer, and the cursor advances.
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let end = self.pos + data.len();
        if self.pos == self.buf.len() {
            self.buf.extend_from_slice(data);
        } else if end <= self.buf.len() {
            self.buf[self.pos..end].copy_from_slice(data);
        } else {
            let overlap = self.buf.len() - self.pos;
            self.buf[self.pos..].copy_from_slice(&data[..overlap]);
            self.buf.extend_from_slice(&data[overlap..]);
        }
        self.pos = end;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(bytes: &[u8]) -> FmtBuffer {
        let mut io = FmtBuffer::new();
        io.write_all(bytes).unwrap();
        io.set_position(0);
        io
    }

    #[test]
    fn same_size_replace_leaves_tail_untouched() {
        let mut io = seeded(b"0xAB + 1");
        let written = io.replace_bytes(b"0xab", 4);
        assert_eq!(written, 4);
        assert_eq!(io.as_slice(), b"0xab + 1");
        assert_eq!(io.position(), 0);
    }

    #[test]
    fn growing_replace_shifts_tail_right() {
        let mut io = seeded(b"a=1\nrest");
        io.advance(1);
        io.replace_bytes(b" = ", 1);
        assert_eq!(io.as_slice(), b"a = 1\nrest");
        assert_eq!(io.position(), 1);
        assert_eq!(io.len(), 10);
    }

    #[test]
    fn shrinking_replace_shifts_tail_left() {
        let mut io = seeded(b"1  :  3, tail");
        io.advance(1);
        io.replace_bytes(b":", 5);
        assert_eq!(io.as_slice(), b"1:3, tail");
    }

    #[test]
    fn write_overwrites_then_extends() {
        let mut io = seeded(b"abcd");
        io.set_position(2);
        io.write_all(b"XYZ").unwrap();
        assert_eq!(io.as_slice(), b"abXYZ");
        assert_eq!(io.position(), 5);
    }

    #[test]
    fn truncate_clamps_cursor() {
        let mut io = seeded(b"hello");
        io.set_position(5);
        io.truncate(2);
        assert_eq!(io.position(), 2);
        assert_eq!(io.as_slice(), b"he");
    }
}
