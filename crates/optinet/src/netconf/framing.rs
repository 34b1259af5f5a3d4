// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! NETCONF message framing (RFC 6242).
//!
//! Two framings exist on the wire:
//!
//! ```text
//! base:1.0   <rpc>...</rpc>]]>]]>
//! base:1.1   \n#<len>\n<bytes>...\n#<len>\n<bytes>\n##\n
//! ```
//!
//! Hello messages always use end-of-message framing. Chunked framing is
//! switched on once both peers advertise `base:1.1`.

use std::io::{self, Read};

/// End-of-message delimiter for base:1.0 framing.
pub const EOM_DELIMITER: &[u8] = b"]]>]]>";

/// Default maximum message size (32 MB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 32 * 1024 * 1024;

// RFC 6242 caps chunk-size at 4294967295, i.e. 10 digits.
const MAX_CHUNK_DIGITS: usize = 10;

const READ_BLOCK: usize = 8192;

/// Framing in use on a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    EndOfMessage,
    Chunked,
}

/// Blocking NETCONF frame codec.
///
/// Bytes read past the end of one message stay buffered for the next call.
/// Each read resumes where the previous one stopped: completed chunks move
/// out of the buffer, and the end-of-message search skips bytes already
/// scanned.
#[derive(Debug)]
pub struct FrameCodec {
    framing: Framing,
    buffer: Vec<u8>,
    // Buffer prefix known to hold no end-of-message delimiter.
    scanned: usize,
    // Chunks of the message being reassembled.
    partial: Vec<u8>,
    max_size: usize,
    frames_decoded: u64,
}

impl FrameCodec {
    pub fn new(max_size: usize) -> Self {
        Self {
            framing: Framing::EndOfMessage,
            buffer: Vec::with_capacity(READ_BLOCK),
            scanned: 0,
            partial: Vec::new(),
            max_size,
            frames_decoded: 0,
        }
    }

    pub fn with_default_max() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE)
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    pub fn set_framing(&mut self, framing: Framing) {
        self.framing = framing;
        self.scanned = 0;
        self.partial.clear();
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    /// Frame a message for the current framing.
    pub fn encode(&self, payload: &[u8]) -> Vec<u8> {
        match self.framing {
            Framing::EndOfMessage => {
                let mut frame = Vec::with_capacity(payload.len() + EOM_DELIMITER.len());
                frame.extend_from_slice(payload);
                frame.extend_from_slice(EOM_DELIMITER);
                frame
            }
            Framing::Chunked => {
                let header = format!("\n#{}\n", payload.len());
                let mut frame = Vec::with_capacity(header.len() + payload.len() + 4);
                frame.extend_from_slice(header.as_bytes());
                frame.extend_from_slice(payload);
                frame.extend_from_slice(b"\n##\n");
                frame
            }
        }
    }

    /// Read one complete message, blocking until it arrives.
    pub fn read_message<R: Read + ?Sized>(&mut self, reader: &mut R) -> io::Result<Vec<u8>> {
        let mut block = [0u8; READ_BLOCK];
        loop {
            if let Some(message) = self.try_extract()? {
                self.frames_decoded += 1;
                return Ok(message);
            }

            let n = reader.read(&mut block)?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed",
                ));
            }
            self.buffer.extend_from_slice(&block[..n]);
        }
    }

    fn try_extract(&mut self) -> io::Result<Option<Vec<u8>>> {
        match self.framing {
            Framing::EndOfMessage => self.take_eom(),
            Framing::Chunked => {
                let taken = self.take_chunks();
                if taken.is_err() {
                    self.partial.clear();
                }
                taken
            }
        }
    }

    fn take_eom(&mut self) -> io::Result<Option<Vec<u8>>> {
        // The delimiter may straddle the previous scan boundary.
        let from = self.scanned.saturating_sub(EOM_DELIMITER.len() - 1);
        let Some(offset) = find(&self.buffer[from..], EOM_DELIMITER) else {
            if self.buffer.len() > self.max_size + EOM_DELIMITER.len() {
                return Err(too_large(self.buffer.len(), self.max_size));
            }
            self.scanned = self.buffer.len();
            return Ok(None);
        };
        let pos = from + offset;
        let message = trim_ascii(&self.buffer[..pos]).to_vec();
        self.buffer.drain(..pos + EOM_DELIMITER.len());
        self.scanned = 0;
        Ok(Some(message))
    }

    // Moves every complete chunk from the buffer into `partial`. Returns the
    // message once the end-of-chunks marker arrives, None when more input is
    // needed.
    fn take_chunks(&mut self) -> io::Result<Option<Vec<u8>>> {
        loop {
            let buf = &self.buffer;
            if buf.len() < 2 {
                return Ok(None);
            }
            if &buf[..2] != b"\n#" {
                return Err(invalid("expected chunk header"));
            }

            if buf.len() < 3 {
                return Ok(None);
            }
            if buf[2] == b'#' {
                match buf.get(3) {
                    None => return Ok(None),
                    Some(b'\n') => {}
                    Some(_) => return Err(invalid("malformed end-of-chunks marker")),
                }
                self.buffer.drain(..4);
                return Ok(Some(std::mem::take(&mut self.partial)));
            }

            let mut i = 2;
            while i < buf.len() && buf[i].is_ascii_digit() {
                i += 1;
                if i - 2 > MAX_CHUNK_DIGITS {
                    return Err(invalid("chunk size too long"));
                }
            }
            if i >= buf.len() {
                return Ok(None);
            }
            if buf[i] != b'\n' || i == 2 {
                return Err(invalid("malformed chunk size"));
            }

            let size: usize = std::str::from_utf8(&buf[2..i])
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|&n| n > 0)
                .ok_or_else(|| invalid("invalid chunk size"))?;
            i += 1;

            if self.partial.len() + size > self.max_size {
                return Err(too_large(self.partial.len() + size, self.max_size));
            }
            if buf.len() < i + size {
                return Ok(None);
            }
            self.partial.extend_from_slice(&buf[i..i + size]);
            self.buffer.drain(..i + size);
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |p| p + 1);
    &bytes[start..end]
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

fn too_large(size: usize, max: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("message too large: {} bytes (max {})", size, max),
    )
}
