// SPDX-License-Identifier: Apache-2.0

//! Recursive-descent JSON parser.
//!
//! Grammar per RFC 7159, with three deliberate deviations:
//!
//! - `true` / `false` are coerced to the integers `1` / `0` with a warning
//!   (the tree has no boolean tag);
//! - `//` and `/* */` comments are accepted when
//!   [`ParseSettings::enable_json_comment`] is set;
//! - `\uXXXX` escapes are preserved verbatim (the six literal bytes) with a
//!   warning, never decoded.
//!
//! Each production consumes its construct plus any trailing whitespace and
//! comments, and reports position-qualified errors on mismatch. Stack depth
//! equals nesting depth; errors unwind through `Result` and `?`.

use crate::error::ParseError;
use crate::io::Stream;
use crate::node::{Node, Pair, Tag};
use crate::reader::ScanReader;
use crate::settings::ParseSettings;
use crate::tree::Tree;

type PResult = Result<(), ParseError>;

fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r')
}

fn is_digit(b: u8) -> bool {
    b.is_ascii_digit()
}

fn is_alpha(b: u8) -> bool {
    b.is_ascii_alphabetic()
}

fn is_hex(b: u8) -> bool {
    b.is_ascii_hexdigit()
}

/// Control bytes are never legal unescaped inside a string.
fn is_ctrl(b: u8) -> bool {
    b < 0x20 || b == 0x7F
}

/****************************************************************************
 * builder
 ***************************************************************************/

/// Construction callbacks invoked by the productions; owns a stack of node
/// pointers into the tree plus a scratch buffer for string payloads.
///
/// The pointer discipline keeps every stacked pointer valid: a container's
/// buffer only reallocates when a new child slot is appended, and by then
/// every pointer into its previous last slot has been popped.
struct Builder<'t> {
    pool: &'t mut crate::arena::Pool,
    nstack: Vec<*mut Node>,
    scratch: Vec<u8>,
}

impl<'t> Builder<'t> {
    fn new(tree: &'t mut Tree) -> Self {
        let (root, pool) = tree.split_mut();
        Self {
            pool,
            nstack: vec![root as *mut Node],
            scratch: Vec::new(),
        }
    }

    fn top(&self) -> *mut Node {
        *self.nstack.last().expect("builder stack underflow")
    }

    fn map_begin(&mut self) {
        unsafe {
            (*self.top()).construct_as(Tag::Map, self.pool);
        }
    }

    /// Append an empty pair and expose its two slots: the value first, then
    /// the key, so the next two completed productions fill key then value.
    fn map_key(&mut self) {
        unsafe {
            let top = self.top();
            let mut dummy = Pair::new();
            (*top)
                .map_push_move(&mut dummy, self.pool)
                .expect("builder map node lost its tag");
            let pair = (*top).map_last_ptr().expect("empty map after push");
            self.nstack.push(&mut (*pair).val);
            self.nstack.push(&mut (*pair).key);
        }
    }

    /// Marker only; the value slot is already on top of the stack.
    fn map_value(&mut self) {}

    fn map_end(&mut self) {
        self.nstack.pop();
    }

    fn seq_begin(&mut self) {
        unsafe {
            (*self.top()).construct_as(Tag::Seq, self.pool);
        }
    }

    fn seq_value(&mut self) {
        unsafe {
            let top = self.top();
            let mut dummy = Node::new();
            (*top)
                .seq_push_move(&mut dummy, self.pool)
                .expect("builder seq node lost its tag");
            let slot = (*top).seq_last_ptr().expect("empty seq after push");
            self.nstack.push(slot);
        }
    }

    fn seq_end(&mut self) {
        self.nstack.pop();
    }

    fn str_begin(&mut self) {
        self.scratch.clear();
    }

    fn on_char(&mut self, b: u8) {
        self.scratch.push(b);
    }

    fn str_end(&mut self) {
        unsafe {
            (*self.top()).set_str(&self.scratch, self.pool);
        }
        self.scratch.clear();
        self.nstack.pop();
    }

    fn on_int(&mut self, v: i64) {
        unsafe {
            (*self.top()).set_i64(v, self.pool);
        }
        self.nstack.pop();
    }

    fn on_dbl(&mut self, v: f64) {
        unsafe {
            (*self.top()).set_f64(v, self.pool);
        }
        self.nstack.pop();
    }

    fn on_null(&mut self) {
        // The slot was constructed Null; leave it.
        self.nstack.pop();
    }
}

/****************************************************************************
 * diagnostics
 ***************************************************************************/

fn got_text<S: Stream>(inp: &ScanReader<S>) -> String {
    if inp.eof() {
        "End Of File".to_string()
    } else {
        inp.lookahead_snippet()
    }
}

fn expect_err<S: Stream>(inp: &ScanReader<S>, expected: &str, hint: &str) -> ParseError {
    ParseError::at(
        format!(
            "expecting `{expected}` but got `{}` [{hint}]",
            got_text(inp)
        ),
        inp.line(),
        inp.col(),
    )
}

fn opt_err<S: Stream>(inp: &ScanReader<S>, option: &str, status: &str) -> ParseError {
    ParseError::at(
        format!(
            "option `{option}` is `{status}`, but got `{}`",
            got_text(inp)
        ),
        inp.line(),
        inp.col(),
    )
}

/// Apply the warning policy: drop, promote to an error, or log the first
/// `warning_maximum` verbatim and collapse the rest to a single `...`.
fn warn<S: Stream>(inp: &mut ScanReader<S>, message: &str) -> PResult {
    let settings = *inp.settings();
    if !settings.enable_warning_message {
        return Ok(());
    }
    if settings.treat_warning_as_error {
        return Err(ParseError::at(message.to_string(), inp.line(), inp.col()));
    }
    let used = inp.count_warning();
    if used == settings.warning_maximum + 1 {
        log::warn!("parsing warning: ...");
    } else if used <= settings.warning_maximum {
        log::warn!(
            "parsing warning: {message}, at({}, {})",
            inp.line(),
            inp.col()
        );
    }
    Ok(())
}

/****************************************************************************
 * productions
 ***************************************************************************/

fn skip_comments<S: Stream>(inp: &mut ScanReader<S>) -> PResult {
    if inp.current() != Some(b'/') {
        return Ok(());
    }
    if !inp.settings().enable_json_comment {
        return Err(opt_err(inp, "ENABLE_JSON_COMMENT", "FALSE"));
    }
    // Greedy: alternate block comments, line comments and whitespace until
    // nothing moves.
    let mut offset = usize::MAX;
    while offset != inp.offset() {
        offset = inp.offset();
        if !inp.skip_block(b"/*", b"*/") {
            return Err(expect_err(inp, "*/", "Comment"));
        }
        inp.skip_block(b"//", b"\n");
        inp.skip_while(is_space);
    }
    Ok(())
}

fn parse_object<S: Stream>(inp: &mut ScanReader<S>, b: &mut Builder) -> PResult {
    if !inp.try_match(b"{") {
        return Err(expect_err(inp, "{", "JSON object"));
    }
    inp.skip_while(is_space);
    skip_comments(inp)?;

    b.map_begin();

    if inp.try_match(b"}") {
        b.map_end();
        inp.skip_while(is_space);
        return skip_comments(inp);
    }

    loop {
        b.map_key();
        parse_string(inp, b)?;
        skip_comments(inp)?;

        if !inp.try_match(b":") {
            return Err(expect_err(inp, ":", "JSON pair"));
        }
        inp.skip_while(is_space);
        skip_comments(inp)?;

        b.map_value();
        parse_value(inp, b)?;

        let more = if inp.try_match(b",") {
            true
        } else if inp.try_match(b"}") {
            false
        } else {
            return Err(expect_err(inp, ",` or `}", "JSON object"));
        };
        inp.skip_while(is_space);
        skip_comments(inp)?;
        if !more {
            break;
        }
    }

    b.map_end();
    Ok(())
}

fn parse_array<S: Stream>(inp: &mut ScanReader<S>, b: &mut Builder) -> PResult {
    if !inp.try_match(b"[") {
        return Err(expect_err(inp, "[", "JSON array"));
    }
    inp.skip_while(is_space);
    skip_comments(inp)?;

    b.seq_begin();

    if inp.try_match(b"]") {
        b.seq_end();
        inp.skip_while(is_space);
        return skip_comments(inp);
    }

    loop {
        b.seq_value();
        parse_value(inp, b)?;
        skip_comments(inp)?;

        let more = if inp.try_match(b",") {
            true
        } else if inp.try_match(b"]") {
            false
        } else {
            return Err(expect_err(inp, ",` or `]", "JSON array"));
        };
        inp.skip_while(is_space);
        skip_comments(inp)?;
        if !more {
            break;
        }
    }

    b.seq_end();
    Ok(())
}

fn parse_value<S: Stream>(inp: &mut ScanReader<S>, b: &mut Builder) -> PResult {
    match inp.current() {
        Some(b'"') => parse_string(inp, b)?,
        Some(b'{') => parse_object(inp, b)?,
        Some(b'[') => parse_array(inp, b)?,
        Some(c) if is_digit(c) || c == b'-' => parse_number(inp, b)?,
        Some(c) if is_alpha(c) => parse_keyword(inp, b)?,
        _ => return Err(expect_err(inp, "value", "JSON value")),
    }
    inp.skip_while(is_space);
    skip_comments(inp)
}

fn parse_keyword<S: Stream>(inp: &mut ScanReader<S>, b: &mut Builder) -> PResult {
    if inp.try_match(b"true") {
        warn(
            inp,
            "JSON value 'true' is not supported and will be treated as int 1",
        )?;
        b.on_int(1);
    } else if inp.try_match(b"false") {
        warn(
            inp,
            "JSON value 'false' is not supported and will be treated as int 0",
        )?;
        b.on_int(0);
    } else if inp.try_match(b"null") {
        b.on_null();
    } else {
        return Err(expect_err(inp, "KEYWORD", "JSON value"));
    }
    inp.skip_while(is_space);
    Ok(())
}

fn unescape(b: u8) -> Option<u8> {
    match b {
        b'\\' | b'\'' | b'"' => Some(b),
        b'n' => Some(b'\n'),
        b'r' => Some(b'\r'),
        b't' => Some(b'\t'),
        b'b' => Some(0x08),
        b'f' => Some(0x0C),
        _ => None,
    }
}

fn parse_string<S: Stream>(inp: &mut ScanReader<S>, b: &mut Builder) -> PResult {
    if !inp.try_match(b"\"") {
        return Err(expect_err(inp, "\"", "JSON string"));
    }
    b.str_begin();

    loop {
        let c = match inp.current() {
            Some(c) => c,
            None => return Err(expect_err(inp, "\"", "JSON string")),
        };
        if c == b'\\' {
            inp.advance();
            let e = match inp.current() {
                Some(e) => e,
                None => return Err(expect_err(inp, "ESCAPED CHARACTER", "JSON char")),
            };
            if let Some(decoded) = unescape(e) {
                b.on_char(decoded);
            } else if e == b'u' {
                warn(inp, "`\\uXXXX` is not implemented and will be preserved")?;
                b.on_char(b'\\');
                b.on_char(b'u');
                for _ in 0..4 {
                    inp.advance();
                    match inp.current() {
                        Some(h) if is_hex(h) => b.on_char(h),
                        _ => return Err(expect_err(inp, "DIGIT(HEX)", "\\uXXXX")),
                    }
                }
            } else {
                return Err(expect_err(inp, "ESCAPED CHARACTER", "JSON char"));
            }
        } else if c == b'"' {
            inp.advance();
            break;
        } else {
            if is_ctrl(c) {
                return Err(expect_err(inp, "CHAR", "JSON char"));
            }
            b.on_char(c);
        }
        inp.advance();
    }

    b.str_end();
    inp.skip_while(is_space);
    Ok(())
}

fn parse_number<S: Stream>(inp: &mut ScanReader<S>, b: &mut Builder) -> PResult {
    const U64_DIGITS10: u32 = 19;
    const F64_DIGITS10: u32 = 15;
    const F64_MAX_EXP10: i64 = 308;
    const F64_MIN_EXP10: i64 = -307;
    // Decimal digits of the largest double exponent, plus one.
    const EXP_MAX_LEN: u32 = 3;

    let mut integral: u64 = 0;
    let mut integral_len: u32 = 0;
    let mut fractional: u64 = 0;
    let mut fractional_len: u32 = 0;
    let mut exponent: i64 = 0;
    let mut exponent_len: u32 = 0;

    let negative = inp.try_match(b"-");

    match inp.current() {
        Some(b'0') => {
            inp.advance();
            integral_len += 1;
        }
        Some(c) if is_digit(c) => {
            while let Some(d) = inp.current() {
                if !is_digit(d) {
                    break;
                }
                integral = integral.wrapping_mul(10).wrapping_add((d - b'0') as u64);
                integral_len += 1;
                inp.advance();
            }
        }
        _ => return Err(expect_err(inp, "DIGIT", "JSON number")),
    }

    if inp.current() == Some(b'.') {
        inp.advance();
        while let Some(d) = inp.current() {
            if !is_digit(d) {
                break;
            }
            fractional = fractional.wrapping_mul(10).wrapping_add((d - b'0') as u64);
            fractional_len += 1;
            inp.advance();
        }
    }

    if matches!(inp.current(), Some(b'e') | Some(b'E')) {
        inp.advance();
        let mut exp_negative = false;
        if matches!(inp.current(), Some(b'-') | Some(b'+')) {
            exp_negative = inp.current() == Some(b'-');
            inp.advance();
        }
        while let Some(d) = inp.current() {
            if !is_digit(d) {
                break;
            }
            exponent = exponent.saturating_mul(10).saturating_add((d - b'0') as i64);
            exponent_len += 1;
            inp.advance();
        }
        if exp_negative {
            exponent = -exponent;
        }
        if exponent_len == 0 {
            return Err(expect_err(inp, "DIGIT", "JSON number"));
        }
    }

    if fractional_len > 0 || exponent_len > 0 {
        if fractional_len + integral_len >= F64_DIGITS10 + 5 {
            warn(inp, "`double` precision may be lost")?;
        }
        if exponent_len > EXP_MAX_LEN
            || exponent <= F64_MIN_EXP10
            || exponent >= F64_MAX_EXP10
        {
            warn(inp, "too big for `double` type")?;
        }

        let mut val = 0.0f64;
        if integral != 0 {
            val = integral as f64;
        }
        if fractional_len != 0 {
            val += fractional as f64 / 10f64.powi(fractional_len as i32);
        }
        if exponent_len != 0 {
            val *= 10f64.powi(exponent as i32);
        }
        if negative {
            val = -val;
        }
        b.on_dbl(val);
    } else {
        if integral_len > U64_DIGITS10 {
            warn(inp, "too big for `uint64`")?;
            b.on_int(if negative { i64::MIN } else { i64::MAX });
        } else if integral & 0x8000_0000_0000_0000 != 0 {
            // The unsigned value has the high bit set; saturate rather than
            // risk signed overflow.
            b.on_int(if negative { i64::MIN } else { i64::MAX });
        } else if negative {
            b.on_int(-(integral as i64));
        } else {
            b.on_int(integral as i64);
        }
    }

    inp.skip_while(is_space);
    Ok(())
}

/****************************************************************************
 * driver
 ***************************************************************************/

/// Parse one JSON document from `stream` into `tree`'s root.
///
/// The tree is cleared first. On error the tree may hold a partial
/// document; callers that must not observe one should clear it again (the
/// façade does).
pub fn parse_json<S: Stream>(
    stream: &mut S,
    tree: &mut Tree,
    settings: &ParseSettings,
) -> Result<(), ParseError> {
    tree.clear();
    let mut inp = ScanReader::new(stream, *settings);
    let mut builder = Builder::new(tree);

    inp.skip_while(is_space);
    skip_comments(&mut inp)?;
    parse_value(&mut inp, &mut builder)?;
    log::debug!(
        "document parsed: {} bytes consumed, {} warnings",
        inp.offset(),
        inp.warnings()
    );
    Ok(())
}
