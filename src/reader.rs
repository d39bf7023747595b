// SPDX-License-Identifier: Apache-2.0

//! Buffered scan reader.
//!
//! A sliding window over a [`Stream`] with the bookkeeping a hand-written
//! parser needs: current byte, bounded lookahead, line/column/offset
//! accounting, bulk skips, and keyword comparison without consuming input.
//!
//! After every operation either the cursor sits on a valid byte or the last
//! refill returned false (end of stream). A few sentinel bytes past the
//! window's end are kept as a `...` marker so error snippets show a
//! truncated lookahead without extra bounds work.

use crate::io::Stream;
use crate::settings::ParseSettings;

/// Smallest usable window; tinier windows cannot hold a keyword plus
/// lookahead.
pub const MIN_BUFFER_SIZE: usize = 32;

const SENTINEL: &[u8; 4] = b"...\0";

/// Sliding window over a byte stream.
pub struct ScanReader<'s, S: Stream> {
    stream: &'s mut S,
    buf: Box<[u8]>,
    cap: usize,
    cur: usize,
    end: usize,
    line: usize,
    col: usize,
    offset: usize,
    warnings: usize,
    settings: ParseSettings,
}

impl<'s, S: Stream> ScanReader<'s, S> {
    pub fn new(stream: &'s mut S, settings: ParseSettings) -> Self {
        let cap = settings.stream_buffer_size.max(MIN_BUFFER_SIZE);
        let mut rd = Self {
            stream,
            buf: vec![0u8; cap + SENTINEL.len()].into_boxed_slice(),
            cap,
            cur: 0,
            end: 0,
            line: 1,
            col: 1,
            offset: 0,
            warnings: 0,
            settings,
        };
        if rd.stream.is_open() {
            rd.refill();
        } else {
            rd.mark_end();
        }
        rd
    }

    /// 1-based line of the cursor.
    pub fn line(&self) -> usize {
        self.line
    }

    /// 1-based column of the cursor.
    pub fn col(&self) -> usize {
        self.col
    }

    /// Bytes consumed so far.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn settings(&self) -> &ParseSettings {
        &self.settings
    }

    /// Bump and return the warning counter.
    pub fn count_warning(&mut self) -> usize {
        self.warnings += 1;
        self.warnings
    }

    pub fn warnings(&self) -> usize {
        self.warnings
    }

    /// True once the stream and the window are both exhausted.
    pub fn eof(&self) -> bool {
        self.end == 0
    }

    /// Peek the cursor byte; `None` at end of stream.
    pub fn current(&self) -> Option<u8> {
        if self.cur < self.end {
            Some(self.buf[self.cur])
        } else {
            None
        }
    }

    /// The bytes currently visible from the cursor.
    pub fn lookahead(&self) -> &[u8] {
        &self.buf[self.cur..self.end]
    }

    /// Up to 15 bytes of lookahead for error messages; runs into the `...`
    /// sentinel when the window is nearly empty.
    pub fn lookahead_snippet(&self) -> String {
        let end = (self.cur + 15).min(self.end + SENTINEL.len() - 1);
        String::from_utf8_lossy(&self.buf[self.cur..end]).into_owned()
    }

    /// Consume one byte, updating line/column/offset.
    pub fn advance(&mut self) {
        let c = match self.current() {
            Some(c) => c,
            None => return,
        };
        self.cur += 1;
        self.offset += 1;
        if self.cur == self.end {
            self.refill();
        }
        match c {
            b'\t' => self.col += self.settings.indent_width,
            b'\r' => {
                // A CR LF pair counts as a single newline, on the LF.
                if self.current() != Some(b'\n') {
                    self.line += 1;
                    self.col = 1;
                }
            }
            b'\n' => {
                self.line += 1;
                self.col = 1;
            }
            _ => self.col += 1,
        }
    }

    /// Consume `k` bytes, refilling as needed; stops early at end of stream.
    pub fn advance_n(&mut self, k: usize) {
        for _ in 0..k {
            if self.current().is_none() {
                break;
            }
            self.advance();
        }
    }

    /// Consume bytes while `pred` holds.
    pub fn skip_while(&mut self, pred: impl Fn(u8) -> bool) {
        while let Some(c) = self.current() {
            if !pred(c) {
                break;
            }
            self.advance();
        }
    }

    /// Consume bytes up to (not including) the next `stop` byte.
    pub fn skip_until(&mut self, stop: u8) {
        self.skip_while(|c| c != stop);
    }

    /// Consume bytes while they belong to `set`.
    pub fn skip_while_in(&mut self, set: &[u8]) {
        self.skip_while(|c| set.contains(&c));
    }

    /// Slide the window and read more. Returns false only when the
    /// underlying stream is exhausted.
    pub fn refill(&mut self) -> bool {
        let rest = self.end - self.cur;
        if self.cur > 0 && rest > 0 {
            self.buf.copy_within(self.cur..self.end, 0);
        }
        let read = self.stream.read(&mut self.buf[rest..self.cap]);
        self.cur = 0;
        self.end = rest + read;
        self.mark_end();
        read != 0
    }

    /// Refill if needed; true iff at least `k` bytes are visible.
    pub fn has_at_least(&mut self, k: usize) -> bool {
        self.end - self.cur >= k || {
            self.refill();
            self.end - self.cur >= k
        }
    }

    /// Compare without consuming. The keyword must fit the window, or the
    /// reader could never see it contiguously; that is a fatal misuse.
    pub fn equals_keyword(&mut self, kw: &[u8]) -> bool {
        if kw.len() >= self.cap {
            panic!(
                "buffer size `{}` of the scan reader is less than keyword `{}` size `{}`",
                self.cap,
                String::from_utf8_lossy(kw),
                kw.len()
            );
        }
        self.has_at_least(kw.len()) && &self.buf[self.cur..self.cur + kw.len()] == kw
    }

    /// [`Self::equals_keyword`], then consume the keyword on a match.
    pub fn try_match(&mut self, kw: &[u8]) -> bool {
        if kw.len() == 1 {
            if self.current() == Some(kw[0]) {
                self.advance();
                return true;
            }
            return false;
        }
        if self.equals_keyword(kw) {
            self.advance_n(kw.len());
            return true;
        }
        false
    }

    /// Skip one `beg ... end` block if the input starts with `beg`.
    /// Returns false when the closing keyword is missing before EOF.
    pub fn skip_block(&mut self, beg: &[u8], end: &[u8]) -> bool {
        if !self.equals_keyword(beg) {
            return true;
        }
        self.advance_n(beg.len());

        while self.current().is_some() {
            self.skip_until(end[0]);
            if self.equals_keyword(end) {
                break;
            }
            // A first-byte match that is not the full closer.
            if self.current().is_some() {
                self.advance();
            }
        }

        if self.current().is_none() {
            return false;
        }
        self.advance_n(end.len());
        true
    }

    fn mark_end(&mut self) {
        self.buf[self.end..self.end + SENTINEL.len()].copy_from_slice(SENTINEL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{OpenMode, StringStream};

    fn reader_over(text: &str, settings: ParseSettings) -> (StringStream, ParseSettings) {
        let mut s = StringStream::new();
        s.open(text, OpenMode::Read);
        (s, settings)
    }

    fn tiny() -> ParseSettings {
        ParseSettings {
            stream_buffer_size: 32,
            ..ParseSettings::default()
        }
    }

    #[test]
    fn test_current_and_advance() {
        let (mut s, cfg) = reader_over("abc", ParseSettings::default());
        let mut rd = ScanReader::new(&mut s, cfg);
        assert_eq!(rd.current(), Some(b'a'));
        rd.advance();
        assert_eq!(rd.current(), Some(b'b'));
        rd.advance();
        rd.advance();
        assert_eq!(rd.current(), None);
        assert!(rd.eof());
        assert_eq!(rd.offset(), 3);
    }

    #[test]
    fn test_position_accounting() {
        let (mut s, cfg) = reader_over("ab\ncd\r\nef\tg", ParseSettings::default());
        let mut rd = ScanReader::new(&mut s, cfg);
        assert_eq!((rd.line(), rd.col()), (1, 1));
        rd.advance_n(2); // a b
        assert_eq!((rd.line(), rd.col()), (1, 3));
        rd.advance(); // \n
        assert_eq!((rd.line(), rd.col()), (2, 1));
        rd.advance_n(2); // c d
        rd.advance(); // \r of \r\n pair: no newline yet
        assert_eq!((rd.line(), rd.col()), (2, 3));
        rd.advance(); // \n completes the pair
        assert_eq!((rd.line(), rd.col()), (3, 1));
        rd.advance_n(2); // e f
        rd.advance(); // \t advances by indent_width
        assert_eq!((rd.line(), rd.col()), (3, 3 + 4));
    }

    #[test]
    fn test_lone_cr_is_newline() {
        let (mut s, cfg) = reader_over("a\rb", ParseSettings::default());
        let mut rd = ScanReader::new(&mut s, cfg);
        rd.advance_n(2);
        assert_eq!((rd.line(), rd.col()), (2, 1));
    }

    #[test]
    fn test_eof_position_after_trailing_newline() {
        let (mut s, cfg) = reader_over("one\ntwo\n", ParseSettings::default());
        let mut rd = ScanReader::new(&mut s, cfg);
        while rd.current().is_some() {
            rd.advance();
        }
        assert_eq!((rd.line(), rd.col()), (3, 1));
    }

    #[test]
    fn test_refill_across_tiny_window() {
        let text = "x".repeat(100) + "END";
        let (mut s, cfg) = reader_over(&text, tiny());
        let mut rd = ScanReader::new(&mut s, cfg);
        rd.skip_while(|c| c == b'x');
        assert!(rd.try_match(b"END"));
        assert!(rd.eof());
        assert_eq!(rd.offset(), 103);
    }

    #[test]
    fn test_keyword_across_refill_boundary() {
        // Place the keyword so it straddles the first window.
        let text = "y".repeat(30) + "keyword rest";
        let (mut s, cfg) = reader_over(&text, tiny());
        let mut rd = ScanReader::new(&mut s, cfg);
        rd.skip_while(|c| c == b'y');
        assert!(rd.equals_keyword(b"keyword"));
        assert!(rd.try_match(b"keyword"));
        assert_eq!(rd.current(), Some(b' '));
    }

    #[test]
    fn test_try_match_no_consume_on_miss() {
        let (mut s, cfg) = reader_over("falsx", ParseSettings::default());
        let mut rd = ScanReader::new(&mut s, cfg);
        assert!(!rd.try_match(b"false"));
        assert_eq!(rd.current(), Some(b'f'));
        assert_eq!(rd.offset(), 0);
    }

    #[test]
    #[should_panic(expected = "keyword")]
    fn test_oversized_keyword_is_fatal() {
        let (mut s, cfg) = reader_over("data", tiny());
        let mut rd = ScanReader::new(&mut s, cfg);
        let kw = vec![b'k'; 64];
        rd.equals_keyword(&kw);
    }

    #[test]
    fn test_skip_block_comment() {
        let (mut s, cfg) = reader_over("/* a * lone star */tail", ParseSettings::default());
        let mut rd = ScanReader::new(&mut s, cfg);
        assert!(rd.skip_block(b"/*", b"*/"));
        assert!(rd.equals_keyword(b"tail"));
    }

    #[test]
    fn test_skip_block_unterminated() {
        let (mut s, cfg) = reader_over("/* never closed", ParseSettings::default());
        let mut rd = ScanReader::new(&mut s, cfg);
        assert!(!rd.skip_block(b"/*", b"*/"));
        assert!(rd.current().is_none());
    }

    #[test]
    fn test_skip_block_not_present() {
        let (mut s, cfg) = reader_over("plain", ParseSettings::default());
        let mut rd = ScanReader::new(&mut s, cfg);
        assert!(rd.skip_block(b"/*", b"*/"));
        assert_eq!(rd.current(), Some(b'p'));
    }

    #[test]
    fn test_skip_while_in() {
        let (mut s, cfg) = reader_over(" \t\r\nvalue", ParseSettings::default());
        let mut rd = ScanReader::new(&mut s, cfg);
        rd.skip_while_in(b" \t\r\n");
        assert!(rd.equals_keyword(b"value"));
    }

    #[test]
    fn test_snippet_shows_sentinel_near_eof() {
        let (mut s, cfg) = reader_over("ab", ParseSettings::default());
        let rd = ScanReader::new(&mut s, cfg);
        assert_eq!(rd.lookahead_snippet(), "ab...");
    }

    #[test]
    fn test_warning_counter() {
        let (mut s, cfg) = reader_over("", ParseSettings::default());
        let mut rd = ScanReader::new(&mut s, cfg);
        assert_eq!(rd.count_warning(), 1);
        assert_eq!(rd.count_warning(), 2);
        assert_eq!(rd.warnings(), 2);
    }
}
