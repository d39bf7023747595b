// SPDX-License-Identifier: Apache-2.0

//! Emitter state machine.
//!
//! A pushdown automaton that turns typed [`WriteEvent`]s into well-formed
//! JSON on an output [`Stream`]. The stack bottom carries a `Nil` sentinel;
//! the document starts in `Val`. Opening delimiters are written lazily on
//! the first write inside a container, which is what makes `{}` and `[]`
//! come out right without buffering.
//!
//! Events a state does not accept are rejected with
//! [`Error::StateRejected`] and write nothing. Dropping the emitter closes
//! any still-open containers (a dangling key is completed with `null`) and
//! closes the stream.

use crate::error::Error;
use crate::io::Stream;

/// A typed write event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WriteEvent<'a> {
    Int(i64),
    Dbl(f64),
    Str(&'a [u8]),
    BegSeq,
    BegMap,
    EndSeq,
    EndMap,
}

impl WriteEvent<'_> {
    fn name(&self) -> &'static str {
        match self {
            WriteEvent::Int(_) => "int",
            WriteEvent::Dbl(_) => "double",
            WriteEvent::Str(_) => "string",
            WriteEvent::BegSeq => "begin-sequence",
            WriteEvent::BegMap => "begin-map",
            WriteEvent::EndSeq => "end-sequence",
            WriteEvent::EndMap => "end-map",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Stack bottom; the document is complete.
    Nil,
    /// Expecting the document value.
    Val,
    /// Inside a sequence, expecting a value or the close.
    SeqVal,
    /// Inside a map, expecting a key or the close.
    MapKey,
    /// Inside a map, expecting the value for the pending key.
    MapVal,
}

impl State {
    fn name(self) -> &'static str {
        match self {
            State::Nil => "nil",
            State::Val => "value",
            State::SeqVal => "sequence-value",
            State::MapKey => "map-key",
            State::MapVal => "map-value",
        }
    }
}

/// JSON emitter over an owned output stream.
///
/// The stream belongs to the emitter for the whole write session; it is
/// closed when the emitter drops. [`JsonEmitter::finish`] closes the
/// document instead and hands the still-open stream back.
pub struct JsonEmitter<S: Stream> {
    stack: Vec<State>,
    stream: Option<S>,
    /// Set while the innermost container has produced no output yet; its
    /// opening delimiter is still pending.
    container_empty: bool,
}

impl<S: Stream> JsonEmitter<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stack: vec![State::Nil, State::Val],
            stream: Some(stream),
            container_empty: true,
        }
    }

    /// Feed one event through the transition table.
    pub fn emit(&mut self, event: WriteEvent<'_>) -> Result<(), Error> {
        use State::*;
        use WriteEvent::*;

        match (self.top(), event) {
            (Val, Int(v)) => {
                self.out_int(v);
                self.pop();
            }
            (Val, Dbl(v)) => {
                self.out_dbl(v);
                self.pop();
            }
            (Val, Str(s)) => {
                self.out_str(s);
                self.pop();
            }
            (Val, BegSeq) => self.change(SeqVal),
            (Val, BegMap) => self.change(MapKey),

            (SeqVal, Int(v)) => self.out_int(v),
            (SeqVal, Dbl(v)) => self.out_dbl(v),
            (SeqVal, Str(s)) => self.out_str(s),
            (SeqVal, BegSeq) => self.push(SeqVal),
            (SeqVal, BegMap) => self.push(MapKey),
            (SeqVal, EndSeq) => self.pop(),

            (MapKey, Str(s)) => {
                self.out_str(s);
                self.change(MapVal);
            }
            (MapKey, EndMap) => self.pop(),

            (MapVal, Int(v)) => {
                self.out_int(v);
                self.change(MapKey);
            }
            (MapVal, Dbl(v)) => {
                self.out_dbl(v);
                self.change(MapKey);
            }
            (MapVal, Str(s)) => {
                self.out_str(s);
                self.change(MapKey);
            }
            (MapVal, BegSeq) => {
                self.change(MapKey);
                self.push(SeqVal);
            }
            (MapVal, BegMap) => {
                self.change(MapKey);
                self.push(MapKey);
            }

            (state, event) => {
                return Err(Error::StateRejected {
                    state: state.name(),
                    event: event.name(),
                })
            }
        }
        Ok(())
    }

    /// True once the document value is complete and no event is accepted
    /// any more.
    pub fn done(&self) -> bool {
        self.top() == State::Nil
    }

    /// Close any open containers (completing a dangling key with `null`)
    /// and return the stream, still open, for the caller to inspect.
    pub fn finish(mut self) -> S {
        self.close_containers();
        self.stream.take().expect("stream already taken")
    }

    fn top(&self) -> State {
        *self.stack.last().expect("emitter stack underflow")
    }

    fn change(&mut self, state: State) {
        *self.stack.last_mut().expect("emitter stack underflow") = state;
    }

    /// Separator logic shared by every value write: open the pending
    /// container delimiter, or separate from the previous element.
    fn lead_value(&mut self) {
        if self.container_empty {
            self.container_empty = false;
            match self.top() {
                State::SeqVal => self.write(b"["),
                State::MapKey => self.write(b"{"),
                _ => {}
            }
        } else if self.top() == State::MapVal {
            self.write(b": ");
        } else {
            self.write(b",");
        }
    }

    fn push(&mut self, state: State) {
        if self.container_empty {
            self.container_empty = false;
            match self.top() {
                State::SeqVal => self.write(b"["),
                State::MapKey => self.write(b"{"),
                _ => {}
            }
        } else if self.top() == State::MapKey {
            // The pending key was already written; this container is its
            // value.
            self.write(b": ");
        } else {
            self.write(b",");
        }
        self.stack.push(state);
        self.container_empty = true;
    }

    fn pop(&mut self) {
        if self.container_empty {
            self.container_empty = false;
            match self.top() {
                State::SeqVal => self.write(b"["),
                State::MapKey => self.write(b"{"),
                _ => {}
            }
        }
        match self.top() {
            State::SeqVal => self.write(b"]"),
            State::MapKey => self.write(b"}"),
            _ => {}
        }
        self.stack.pop();
    }

    fn out_int(&mut self, val: i64) {
        self.lead_value();
        let text = val.to_string();
        self.write(text.as_bytes());
    }

    fn out_dbl(&mut self, val: f64) {
        self.lead_value();
        let text = format_double(val);
        self.write(text.as_bytes());
    }

    fn out_str(&mut self, val: &[u8]) {
        self.lead_value();
        self.write(b"\"");
        let mut plain_from = 0;
        for (i, &b) in val.iter().enumerate() {
            let escape: Option<&[u8]> = match b {
                b'\\' => Some(b"\\\\"),
                b'"' => Some(b"\\\""),
                b'\n' => Some(b"\\n"),
                b'\r' => Some(b"\\r"),
                b'\t' => Some(b"\\t"),
                0x08 => Some(b"\\b"),
                0x0C => Some(b"\\f"),
                _ => None,
            };
            if let Some(esc) = escape {
                if plain_from < i {
                    self.write(&val[plain_from..i]);
                }
                self.write(esc);
                plain_from = i + 1;
            }
        }
        if plain_from < val.len() {
            self.write(&val[plain_from..]);
        }
        self.write(b"\"");
    }

    fn out_null(&mut self) {
        self.lead_value();
        self.write(b"null");
    }

    fn write(&mut self, bytes: &[u8]) {
        if let Some(stream) = self.stream.as_mut() {
            let _ = stream.write(bytes);
        }
    }

    fn close_containers(&mut self) {
        loop {
            match self.top() {
                State::SeqVal => self.pop(),
                State::MapKey => self.pop(),
                State::MapVal => {
                    // A key without a value; complete the pair.
                    self.out_null();
                    self.change(State::MapKey);
                }
                _ => break,
            }
        }
    }
}

impl<S: Stream> Drop for JsonEmitter<S> {
    fn drop(&mut self) {
        if self.stream.is_some() {
            self.close_containers();
            if let Some(mut stream) = self.stream.take() {
                stream.close();
            }
        }
    }
}

/// Locale-independent double rendering.
///
/// Integral values that fit `i64` render as `<int>.0`; everything else uses
/// scientific form capped at 16 significant digits, with trailing
/// fractional zeros trimmed. Specials follow the storage format's spelling,
/// not IEEE's.
fn format_double(val: f64) -> String {
    if val.is_nan() {
        return ".Nan".to_string();
    }
    if val.is_infinite() {
        return if val < 0.0 { "-.Inf" } else { ".Inf" }.to_string();
    }
    let as_int = val as i64;
    if as_int as f64 == val {
        return format!("{as_int}.0");
    }
    let text = format!("{val:.15e}");
    match text.split_once('e') {
        Some((mantissa, exp)) => {
            let mantissa = mantissa.trim_end_matches('0').trim_end_matches('.');
            format!("{mantissa}e{exp}")
        }
        None => text,
    }
}
