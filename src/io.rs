// SPDX-License-Identifier: Apache-2.0

//! Byte stream adapters.
//!
//! The parser's reader and the emitter consume this narrow interface rather
//! than `std::io` directly, so a host can interpose its own source or sink
//! (for instance a cancelling adapter whose `read` returns 0 to make the
//! parser stop with an unexpected-EOF error).

use std::fs::{File, OpenOptions};
use std::io::{Read as _, Seek as _, SeekFrom, Write as _};

/// Access mode for [`Stream::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    Append,
}

/// Origin for [`Stream::seek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekWhence {
    Beg,
    Cur,
    End,
}

/// A byte stream.
///
/// # Contract
/// - `read` returning 0 **must** mean true end of stream; a later non-zero
///   read after a 0 violates the contract.
/// - `write` returns the number of bytes accepted; a short write is treated
///   by callers as data loss, not retried.
pub trait Stream {
    fn open(&mut self, target: &str, mode: OpenMode) -> bool;
    fn is_open(&self) -> bool;
    fn close(&mut self);
    fn seek(&mut self, offset: i64, whence: SeekWhence);
    /// Current position, or -1 if unavailable.
    fn tell(&mut self) -> i64;
    fn read(&mut self, buf: &mut [u8]) -> usize;
    fn write(&mut self, buf: &[u8]) -> usize;
    /// Copy out the full current contents without disturbing the position.
    fn dump(&mut self) -> Vec<u8>;
}

impl Stream for Box<dyn Stream> {
    fn open(&mut self, target: &str, mode: OpenMode) -> bool {
        (**self).open(target, mode)
    }
    fn is_open(&self) -> bool {
        (**self).is_open()
    }
    fn close(&mut self) {
        (**self).close()
    }
    fn seek(&mut self, offset: i64, whence: SeekWhence) {
        (**self).seek(offset, whence)
    }
    fn tell(&mut self) -> i64 {
        (**self).tell()
    }
    fn read(&mut self, buf: &mut [u8]) -> usize {
        (**self).read(buf)
    }
    fn write(&mut self, buf: &[u8]) -> usize {
        (**self).write(buf)
    }
    fn dump(&mut self) -> Vec<u8> {
        (**self).dump()
    }
}

/// Stream over the platform file API.
#[derive(Debug, Default)]
pub struct FileStream {
    file: Option<File>,
}

impl FileStream {
    pub fn new() -> Self {
        Self { file: None }
    }
}

impl Stream for FileStream {
    fn open(&mut self, target: &str, mode: OpenMode) -> bool {
        if self.is_open() {
            self.close();
        }
        let opened = match mode {
            OpenMode::Read => OpenOptions::new().read(true).open(target),
            OpenMode::Write => OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(target),
            OpenMode::Append => OpenOptions::new().append(true).create(true).open(target),
        };
        self.file = opened.ok();
        self.is_open()
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn close(&mut self) {
        self.file = None;
    }

    fn seek(&mut self, offset: i64, whence: SeekWhence) {
        if let Some(f) = self.file.as_mut() {
            let from = match whence {
                SeekWhence::Beg => SeekFrom::Start(offset.max(0) as u64),
                SeekWhence::Cur => SeekFrom::Current(offset),
                SeekWhence::End => SeekFrom::End(offset),
            };
            let _ = f.seek(from);
        }
    }

    fn tell(&mut self) -> i64 {
        match self.file.as_mut() {
            Some(f) => f.stream_position().map(|p| p as i64).unwrap_or(-1),
            None => -1,
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        match self.file.as_mut() {
            Some(f) => f.read(buf).unwrap_or(0),
            None => 0,
        }
    }

    fn write(&mut self, buf: &[u8]) -> usize {
        match self.file.as_mut() {
            Some(f) => f.write(buf).unwrap_or(0),
            None => 0,
        }
    }

    fn dump(&mut self) -> Vec<u8> {
        let backup = self.tell();
        self.seek(0, SeekWhence::End);
        let len = self.tell().max(0) as usize;
        self.seek(0, SeekWhence::Beg);
        let mut out = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let n = self.read(&mut out[filled..]);
            if n == 0 {
                break;
            }
            filled += n;
        }
        out.truncate(filled);
        self.seek(backup.max(0), SeekWhence::Beg);
        out
    }
}

/// Stream over an in-memory byte buffer.
#[derive(Debug, Default)]
pub struct StringStream {
    buf: Vec<u8>,
    pos: usize,
    open: bool,
}

impl StringStream {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Stream for StringStream {
    fn open(&mut self, target: &str, mode: OpenMode) -> bool {
        if self.is_open() {
            self.close();
        }
        match mode {
            OpenMode::Read => {
                self.buf = target.as_bytes().to_vec();
                self.pos = 0;
            }
            OpenMode::Write => {
                self.buf = Vec::new();
                self.pos = 0;
            }
            OpenMode::Append => {
                self.buf = target.as_bytes().to_vec();
                self.pos = self.buf.len();
            }
        }
        self.open = true;
        true
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) {
        self.buf.clear();
        self.pos = 0;
        self.open = false;
    }

    fn seek(&mut self, offset: i64, whence: SeekWhence) {
        let base = match whence {
            SeekWhence::Beg => 0i64,
            SeekWhence::Cur => self.pos as i64,
            SeekWhence::End => self.buf.len() as i64,
        };
        self.pos = (base + offset).clamp(0, self.buf.len() as i64) as usize;
    }

    fn tell(&mut self) -> i64 {
        self.pos as i64
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        if !self.open {
            return 0;
        }
        let avail = self.buf.len().saturating_sub(self.pos);
        let n = avail.min(buf.len());
        buf[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        n
    }

    fn write(&mut self, buf: &[u8]) -> usize {
        if !self.open {
            return 0;
        }
        let overlap = (self.buf.len() - self.pos).min(buf.len());
        self.buf[self.pos..self.pos + overlap].copy_from_slice(&buf[..overlap]);
        self.buf.extend_from_slice(&buf[overlap..]);
        self.pos += buf.len();
        buf.len()
    }

    fn dump(&mut self) -> Vec<u8> {
        self.buf.clone()
    }
}
