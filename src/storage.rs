// SPDX-License-Identifier: Apache-2.0

//! The storage façade.
//!
//! [`FileStorage`] interprets a `query` + mode + format triple, opens the
//! right stream, and drives either the parser (read) or the emitter
//! (write). [`FileNode`] is the borrowed, typed view used to navigate a
//! parsed document.
//!
//! A query is treated as literal document text (memory mode) when the
//! `MEMORY` mode bit is set, when it contains a CR or LF, or when it is
//! longer than a path could plausibly be. A filename containing an embedded
//! newline therefore cannot be distinguished from inline text; that
//! limitation is inherited from the query syntax itself.

use core::fmt;

use crate::emitter::{JsonEmitter, WriteEvent};
use crate::error::Error;
use crate::io::{FileStream, OpenMode, Stream, StringStream};
use crate::json_parser::parse_json;
use crate::node::{Node, Tag};
use crate::settings::ParseSettings;
use crate::tree::Tree;

/// Longest query still treated as a file path.
const PATH_MAX_LENGTH: usize = 256;
/// Window inspected for format signatures in memory mode.
const SNIFF_WINDOW: usize = 1024;

/// Access mode bits. Combine with `|`: `Mode::READ | Mode::MEMORY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mode(pub u8);

impl Mode {
    pub const READ: Mode = Mode(0);
    pub const WRITE: Mode = Mode(1);
    pub const APPEND: Mode = Mode(2);
    /// Treat the query as literal document text.
    pub const MEMORY: Mode = Mode(4);

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl core::ops::BitOr for Mode {
    type Output = Mode;
    fn bitor(self, rhs: Mode) -> Mode {
        Mode(self.0 | rhs.0)
    }
}

/// Document format. `Auto` resolves from the path suffix or, in memory
/// mode, from a signature in the first bytes of the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Auto = 0,
    Xml = 1,
    Yaml = 2,
    Json = 3,
}

struct QueryPlan {
    target: String,
    access: u8,
    format: Format,
    memory: bool,
    enable_base64: bool,
}

fn contains_seq(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

fn analyze_query(query: &str, mode: Mode, format: Format) -> QueryPlan {
    let memory_bit = mode.0 & Mode::MEMORY.0 != 0;
    let access = mode.0 & !Mode::MEMORY.0;
    let mut fmt = format;

    let bytes = query.as_bytes();
    if memory_bit
        || bytes.len() > PATH_MAX_LENGTH
        || bytes.iter().any(|&b| b == b'\n' || b == b'\r')
    {
        let head = &bytes[..bytes.len().min(SNIFF_WINDOW)];
        if fmt == Format::Auto {
            if contains_seq(head, b"<?xml") {
                fmt = Format::Xml;
            } else if contains_seq(head, b"%YAML") {
                fmt = Format::Yaml;
            } else if contains_seq(head, b"{") {
                fmt = Format::Json;
            }
        }
        return QueryPlan {
            target: query.to_string(),
            access,
            format: fmt,
            memory: true,
            enable_base64: false,
        };
    }

    let (path, opts) = match query.split_once('?') {
        Some((p, o)) => (p, Some(o)),
        None => (query, None),
    };

    let mut enable_base64 = false;
    if let Some(opts) = opts {
        for opt in opts.split('&') {
            if opt.is_empty() {
                continue;
            }
            let (key, val) = match opt.split_once('=') {
                Some((k, v)) => (k, v),
                None => (opt, ""),
            };
            if val.is_empty() && key == "base64" {
                enable_base64 = true;
            } else {
                log::warn!("unknown option `{opt}` in query `{query}`");
            }
        }
    }

    if fmt == Format::Auto {
        if let Some(dot) = path.rfind('.') {
            fmt = match &path[dot..] {
                ".yml" | ".yaml" => Format::Yaml,
                ".xml" => Format::Xml,
                ".json" => Format::Json,
                _ => Format::Auto,
            };
        }
    }

    QueryPlan {
        target: path.to_string(),
        access,
        format: fmt,
        memory: false,
        enable_base64,
    }
}

/// Owns one parsed [`Tree`] (read side) or one [`JsonEmitter`] (write
/// side); never both.
pub struct FileStorage {
    tree: Tree,
    emitter: Option<JsonEmitter<Box<dyn Stream>>>,
    settings: ParseSettings,
    enable_base64: bool,
}

impl FileStorage {
    pub fn new() -> Self {
        Self {
            tree: Tree::new(),
            emitter: None,
            settings: ParseSettings::default(),
            enable_base64: false,
        }
    }

    /// Replace the parser settings used by subsequent [`FileStorage::open`]
    /// calls.
    pub fn set_parse_settings(&mut self, settings: ParseSettings) {
        self.settings = settings;
    }

    /// Whether the query requested base64 payloads. Parsed and surfaced,
    /// but not consulted until binary payload support is specified.
    pub fn base64_requested(&self) -> bool {
        self.enable_base64
    }

    /// Open `query` for reading or writing.
    ///
    /// Reading parses the whole document into the owned tree before
    /// returning; on a parse error the tree is left cleared. Writing (and
    /// appending, which the façade treats identically) installs an emitter
    /// over the opened stream.
    pub fn open(&mut self, query: &str, mode: Mode, format: Format) -> Result<(), Error> {
        if self.is_open() {
            self.release();
        }

        let plan = analyze_query(query, mode, format);
        self.enable_base64 = plan.enable_base64;

        if plan.format == Format::Auto {
            return Err(Error::FormatUnknown(
                "unable to determine the document format".to_string(),
            ));
        }
        let open_mode = match plan.access {
            0 => OpenMode::Read,
            1 => OpenMode::Write,
            2 => OpenMode::Append,
            m => return Err(Error::ArgumentInvalid(format!("mode `{m}` is invalid"))),
        };

        let mut stream: Box<dyn Stream> = if plan.memory {
            Box::new(StringStream::new())
        } else {
            Box::new(FileStream::new())
        };
        if !stream.open(&plan.target, open_mode) {
            let shown = if plan.memory { "<memory>" } else { plan.target.as_str() };
            return Err(Error::IoFailed(format!("failed to open `{shown}`")));
        }

        match open_mode {
            OpenMode::Read => {
                let parsed = match plan.format {
                    Format::Json => parse_json(&mut stream, &mut self.tree, &self.settings),
                    Format::Xml => {
                        return Err(Error::FormatUnknown(
                            "the XML reader is reserved and not implemented".to_string(),
                        ))
                    }
                    Format::Yaml => {
                        return Err(Error::FormatUnknown(
                            "the YAML reader is reserved and not implemented".to_string(),
                        ))
                    }
                    Format::Auto => unreachable!("format resolved above"),
                };
                if let Err(e) = parsed {
                    self.tree.clear();
                    return Err(e.into());
                }
            }
            OpenMode::Write | OpenMode::Append => {
                if plan.format != Format::Json {
                    return Err(Error::FormatUnknown(
                        "only JSON emission is supported".to_string(),
                    ));
                }
                self.emitter = Some(JsonEmitter::new(stream));
            }
        }
        Ok(())
    }

    /// True while a parsed document or an active emitter is held.
    pub fn is_open(&self) -> bool {
        !self.tree.is_empty() || self.emitter.is_some()
    }

    /// Tear down the tree and the emitter. Dropping the emitter closes any
    /// open containers and the output stream.
    pub fn release(&mut self) {
        self.tree.clear();
        self.emitter = None;
    }

    /// View of the document root. Empty when nothing is parsed.
    pub fn root(&self) -> FileNode<'_> {
        FileNode {
            node: self.tree.root(),
        }
    }

    pub fn write_i64(&mut self, val: i64) -> Result<&mut Self, Error> {
        self.emit(WriteEvent::Int(val))
    }

    pub fn write_f64(&mut self, val: f64) -> Result<&mut Self, Error> {
        self.emit(WriteEvent::Dbl(val))
    }

    /// Write a string value. The single-byte strings `[`, `]`, `{` and `}`
    /// are structural events, not text.
    pub fn write_str(&mut self, val: &str) -> Result<&mut Self, Error> {
        let event = match val {
            "[" => WriteEvent::BegSeq,
            "]" => WriteEvent::EndSeq,
            "{" => WriteEvent::BegMap,
            "}" => WriteEvent::EndMap,
            text => WriteEvent::Str(text.as_bytes()),
        };
        self.emit(event)
    }

    fn emit(&mut self, event: WriteEvent<'_>) -> Result<&mut Self, Error> {
        match self.emitter.as_mut() {
            Some(fsm) => {
                fsm.emit(event)?;
                Ok(self)
            }
            None => Err(Error::ArgumentInvalid(
                "storage is not open for writing".to_string(),
            )),
        }
    }
}

impl Default for FileStorage {
    fn default() -> Self {
        Self::new()
    }
}

/// Borrowed, typed view of one tree node.
///
/// Views are plain borrows: any mutation of the owning storage invalidates
/// them at compile time, so navigation can never dangle.
#[derive(Clone, Copy, Debug)]
pub struct FileNode<'s> {
    node: &'s Node,
}

impl<'s> FileNode<'s> {
    pub fn tag(&self) -> Tag {
        self.node.tag()
    }

    /// True for a `Null` node (including the root of an unopened storage).
    pub fn empty(&self) -> bool {
        self.node.is_null()
    }

    /// Element count for containers, 0 for scalars.
    pub fn size(&self) -> usize {
        match self.node.tag() {
            Tag::Seq => self.node.seq_size().unwrap_or(0) as usize,
            Tag::Map => self.node.map_size().unwrap_or(0) as usize,
            _ => 0,
        }
    }

    /// Sequence element by index.
    pub fn at(&self, index: usize) -> Result<FileNode<'s>, Error> {
        if self.node.tag() != Tag::Seq {
            return Err(Error::tag_mismatch(Tag::Seq, self.node.tag()));
        }
        match self.node.seq_at(index as u32) {
            Some(child) => Ok(FileNode { node: child }),
            None => Err(Error::TagMismatch(format!("index `{index}` is out of range"))),
        }
    }

    /// Map value by string key; first match in insertion order.
    pub fn key(&self, name: &str) -> Result<FileNode<'s>, Error> {
        if self.node.tag() != Tag::Map {
            return Err(Error::tag_mismatch(Tag::Map, self.node.tag()));
        }
        match self.node.map_find_bytes(name.as_bytes()) {
            Some(pair) => Ok(FileNode { node: &pair.val }),
            None => Err(Error::TagMismatch(format!("key `{name}` is invalid"))),
        }
    }

    pub fn as_i64(&self) -> Result<i64, Error> {
        self.node.i64()
    }

    pub fn as_f64(&self) -> Result<f64, Error> {
        self.node.f64()
    }

    pub fn as_bytes(&self) -> Result<&'s [u8], Error> {
        self.node.str_bytes()
    }

    pub fn as_str(&self) -> Result<&'s str, Error> {
        let bytes = self.node.str_bytes()?;
        core::str::from_utf8(bytes)
            .map_err(|_| Error::ArgumentInvalid("string is not valid UTF-8".to_string()))
    }
}

fn write_tab(f: &mut fmt::Formatter<'_>, level: usize) -> fmt::Result {
    for _ in 0..level * 2 {
        write!(f, " ")?;
    }
    Ok(())
}

fn write_escaped(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    let mut plain_from = 0;
    for (i, &b) in bytes.iter().enumerate() {
        let escape = match b {
            b'\n' => "\\n",
            b'\r' => "\\r",
            b'\t' => "\\t",
            0x08 => "\\b",
            0x0C => "\\f",
            _ => continue,
        };
        if plain_from < i {
            f.write_str(&String::from_utf8_lossy(&bytes[plain_from..i]))?;
        }
        f.write_str(escape)?;
        plain_from = i + 1;
    }
    if plain_from < bytes.len() {
        f.write_str(&String::from_utf8_lossy(&bytes[plain_from..]))?;
    }
    Ok(())
}

fn fmt_node(f: &mut fmt::Formatter<'_>, node: &Node, level: usize, tab: usize) -> fmt::Result {
    write_tab(f, tab)?;
    match node.tag() {
        Tag::Null => write!(f, "<NULL>"),
        Tag::I64 => write!(f, "{}", node.i64().map_err(|_| fmt::Error)?),
        Tag::F64 => write!(f, "{}", node.f64().map_err(|_| fmt::Error)?),
        Tag::Str => {
            write!(f, "\"")?;
            write_escaped(f, node.str_bytes().map_err(|_| fmt::Error)?)?;
            write!(f, "\"")
        }
        Tag::Seq => {
            write!(f, "[")?;
            let size = node.seq_size().map_err(|_| fmt::Error)?;
            for i in 0..size {
                write!(f, "{}", if i == 0 { "\n" } else { ",\n" })?;
                let child = node.seq_at(i).ok_or(fmt::Error)?;
                fmt_node(f, child, level + 1, level + 1)?;
            }
            writeln!(f)?;
            write_tab(f, level)?;
            write!(f, "]")
        }
        Tag::Map => {
            write!(f, "{{")?;
            let size = node.map_size().map_err(|_| fmt::Error)?;
            for i in 0..size {
                write!(f, "{}", if i == 0 { "\n" } else { ",\n" })?;
                let pair = node.map_at(i).ok_or(fmt::Error)?;
                fmt_node(f, &pair.key, level + 1, level + 1)?;
                write!(f, ": ")?;
                fmt_node(f, &pair.val, level + 1, 0)?;
            }
            writeln!(f)?;
            write_tab(f, level)?;
            write!(f, "}}")
        }
    }
}

impl fmt::Display for FileNode<'_> {
    /// Indented rendering of the subtree, for diagnostics.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_node(f, self.node, 0, 0)
    }
}
