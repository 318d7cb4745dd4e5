//! Streaming netascii translation.
//!
//! Netascii (RFC 764) canonicalises line endings on the wire: a line break
//! is always `CR LF`, and a carriage return that is not part of a line
//! break travels as `CR NUL`. The translators here sit between the local
//! file and the session and stream, never holding more than one block plus
//! a few carry bytes, so arbitrarily large files translate in constant
//! memory.
//!
//! Two quirks are kept deliberately for compatibility with existing
//! implementations:
//!
//! - `LF CR` in a local file is treated as two independent characters: the
//!   LF becomes `CR LF` and the CR, if not followed by an LF, becomes
//!   `CR NUL`.
//! - On the writing side, a wire `CR` followed by anything other than `LF`
//!   or `NUL` drops the CR and keeps the following byte. This is not the
//!   exact inverse of the reading side; strictly conforming peers never
//!   produce such a sequence.

use std::collections::VecDeque;
use std::io::{self, Read, Write};

pub const NUL: u8 = 0x00;
pub const LF: u8 = 0x0A;
pub const CR: u8 = 0x0D;

/// Line terminator written to disk for a wire `CR LF`.
#[cfg(windows)]
pub const HOST_LINE_ENDING: &[u8] = b"\r\n";
/// Line terminator written to disk for a wire `CR LF`.
#[cfg(not(windows))]
pub const HOST_LINE_ENDING: &[u8] = b"\n";

const RAW_CHUNK: usize = 512;

/// Translates local bytes into netascii, one block at a time.
///
/// Because a local `LF` expands to two wire bytes, a translated block can
/// run past the requested size; the excess is carried in a small spill
/// queue and emitted first on the next call. A `CR` whose follower has not
/// been read yet is carried as a one-byte pushback.
#[derive(Debug)]
pub struct NetasciiReader<R> {
    inner: R,
    /// Raw input chunk and the cursor into it.
    chunk: [u8; RAW_CHUNK],
    chunk_len: usize,
    chunk_pos: usize,
    /// A raw byte pulled to look past a CR and handed back unconsumed.
    pushback: Option<u8>,
    /// Translated bytes beyond the previous block boundary.
    spill: VecDeque<u8>,
    eof: bool,
}

impl<R: Read> NetasciiReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            chunk: [0; RAW_CHUNK],
            chunk_len: 0,
            chunk_pos: 0,
            pushback: None,
            spill: VecDeque::new(),
            eof: false,
        }
    }

    /// Pull the next raw input byte, or `None` at end of input.
    fn pull(&mut self) -> io::Result<Option<u8>> {
        if let Some(byte) = self.pushback.take() {
            return Ok(Some(byte));
        }
        while self.chunk_pos == self.chunk_len {
            if self.eof {
                return Ok(None);
            }
            let n = self.inner.read(&mut self.chunk)?;
            if n == 0 {
                self.eof = true;
                return Ok(None);
            }
            self.chunk_len = n;
            self.chunk_pos = 0;
        }
        let byte = self.chunk[self.chunk_pos];
        self.chunk_pos += 1;
        Ok(Some(byte))
    }

    /// Produce the next block of at most `want` translated bytes.
    ///
    /// Returns `None` once the input is exhausted and no carried bytes
    /// remain. A returned block shorter than `want` means the same: the
    /// following call will yield `None`.
    pub fn read_block(&mut self, want: usize) -> io::Result<Option<Vec<u8>>> {
        let mut out = Vec::with_capacity(want + 2);

        while out.len() < want {
            if let Some(byte) = self.spill.pop_front() {
                out.push(byte);
                continue;
            }
            let Some(byte) = self.pull()? else {
                break;
            };
            match byte {
                LF => {
                    out.push(CR);
                    out.push(LF);
                }
                CR => match self.pull()? {
                    Some(LF) => {
                        out.push(CR);
                        out.push(LF);
                    }
                    Some(other) => {
                        // Lone CR; the follower is translated on its own.
                        out.push(CR);
                        out.push(NUL);
                        self.pushback = Some(other);
                    }
                    None => {
                        // CR deferred until EOF resolves it.
                        out.push(CR);
                        out.push(NUL);
                    }
                },
                other => out.push(other),
            }
        }

        // A two-byte expansion can overshoot the block by one byte.
        while out.len() > want {
            let Some(extra) = out.pop() else { break };
            self.spill.push_front(extra);
        }

        if out.is_empty() { Ok(None) } else { Ok(Some(out)) }
    }
}

/// Translates netascii back into local bytes as blocks are written.
///
/// A trailing `CR` in a block cannot be interpreted until the next block
/// arrives, so it is carried over; [`NetasciiWriter::finish`] flushes a
/// still-deferred CR verbatim.
#[derive(Debug)]
pub struct NetasciiWriter<W> {
    inner: W,
    /// Deferred CR awaiting the first byte of the next block.
    carry: Option<u8>,
    line_ending: Vec<u8>,
}

impl<W: Write> NetasciiWriter<W> {
    /// Wrap `inner`, materialising wire line breaks as `line_ending`.
    pub fn new(inner: W, line_ending: &[u8]) -> Self {
        Self {
            inner,
            carry: None,
            line_ending: line_ending.to_vec(),
        }
    }

    /// Translate and write one received block.
    pub fn write_block(&mut self, data: &[u8]) -> io::Result<()> {
        let mut input = Vec::with_capacity(data.len() + 1);
        if let Some(carried) = self.carry.take() {
            input.push(carried);
        }
        input.extend_from_slice(data);

        let mut out = Vec::with_capacity(input.len() + self.line_ending.len());
        let mut i = 0;
        while i < input.len() {
            let byte = input[i];
            if byte != CR {
                out.push(byte);
                i += 1;
                continue;
            }
            if i + 1 == input.len() {
                self.carry = Some(byte);
                break;
            }
            match input[i + 1] {
                LF => out.extend_from_slice(&self.line_ending),
                NUL => out.push(CR),
                // CR before anything else is dropped; see the module docs.
                other => out.push(other),
            }
            i += 2;
        }

        self.inner.write_all(&out)
    }

    /// Flush a deferred trailing CR and the underlying stream.
    ///
    /// Must be called once the final block has been written.
    pub fn finish(&mut self) -> io::Result<()> {
        if let Some(carried) = self.carry.take() {
            self.inner.write_all(&[carried])?;
        }
        self.inner.flush()
    }
}
