// SPDX-License-Identifier: Apache-2.0

//! Error types.
//!
//! Every recoverable failure surfaces as a value of [`Error`]; only a
//! corrupted memory pool (detected by the checked allocator) is fatal and
//! panics, because continuing would operate on trashed bookkeeping.

use crate::node::Tag;

/// A grammar violation or disallowed construct, qualified with the source
/// position where the parser stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    message: String,
    line: usize,
    col: usize,
}

impl ParseError {
    pub(crate) fn at(message: String, line: usize, col: usize) -> Self {
        Self { message, line, col }
    }

    /// 1-based line of the offending input.
    pub fn line(&self) -> usize {
        self.line
    }

    /// 1-based column of the offending input.
    pub fn col(&self) -> usize {
        self.col
    }

    /// The message without the trailing position.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl core::fmt::Display for ParseError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}, at({}, {})", self.message, self.line, self.col)
    }
}

impl std::error::Error for ParseError {}

/// Errors reported by the library.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Null or malformed argument at an API boundary.
    ArgumentInvalid(String),
    /// A stream failed to open, read or write.
    IoFailed(String),
    /// Mode or format code not recognised, or format undeterminable.
    FormatUnknown(String),
    /// Position-qualified grammar violation.
    Parse(ParseError),
    /// The document uses a feature forbidden by the settings.
    OptionError(String),
    /// Typed access on a node of the wrong tag, or an index/key miss.
    TagMismatch(String),
    /// The emitter rejected an event in its current state.
    StateRejected {
        state: &'static str,
        event: &'static str,
    },
}

impl Error {
    pub(crate) fn tag_mismatch(expected: Tag, found: Tag) -> Self {
        Error::TagMismatch(format!(
            "expect node type `{}`, but got `{}`",
            expected.as_str(),
            found.as_str()
        ))
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::ArgumentInvalid(msg) => write!(f, "invalid argument: {msg}"),
            Error::IoFailed(msg) => write!(f, "i/o failed: {msg}"),
            Error::FormatUnknown(msg) => write!(f, "unknown format: {msg}"),
            Error::Parse(e) => write!(f, "parse error: {e}"),
            Error::OptionError(msg) => write!(f, "option error: {msg}"),
            Error::TagMismatch(msg) => write!(f, "{msg}"),
            Error::StateRejected { state, event } => {
                write!(f, "event `{event}` is not accepted in state `{state}`")
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Error::Parse(e)
    }
}
