//! A document-tree persistence library.
//!
//! `doctree` parses a textual document (JSON today, with XML/YAML reserved)
//! into an in-memory tree of typed variant nodes, exposes that tree through a
//! navigable façade, and emits a new document from caller-driven write events
//! through a streaming state machine.
//!
//! ## Main Types
//!
//! - [`FileStorage`] - The façade: opens a file or in-memory document, owns
//!   the parsed [`Tree`] or the write-side [`JsonEmitter`]
//! - [`FileNode`] - Borrowed, typed view into a parsed tree
//! - [`Tree`] / [`Node`] - The variant-node value model, backed by a
//!   per-tree memory pool with Fibonacci-sized capacity buckets
//! - [`JsonEmitter`] - Pushdown automaton turning [`WriteEvent`]s into JSON
//!
//! ## Quick Start
//!
//! ```rust
//! use doctree::{FileStorage, Mode, Format};
//!
//! let mut fs = FileStorage::new();
//! fs.open(r#"{"name": [1, 2.5]}"#, Mode::READ | Mode::MEMORY, Format::Auto)
//!     .expect("parse error");
//!
//! let root = fs.root();
//! let first = root.key("name").unwrap().at(0).unwrap();
//! assert_eq!(first.as_i64().unwrap(), 1);
//! ```
//!
//! Storage for every string, sequence and map buffer comes from the owning
//! tree's [`Pool`], which serves blocks whose capacities follow the Fibonacci
//! sequence (growth factor ~1.618 wastes less memory than doubling for the
//! small containers a configuration document typically holds).

// SPDX-License-Identifier: Apache-2.0

mod fibonacci;

mod arena;
pub use arena::Pool;

mod node;
pub use node::{Node, Pair, Tag, SMALL_STR_CAP};

mod tree;
pub use tree::Tree;

mod io;
pub use io::{FileStream, OpenMode, SeekWhence, Stream, StringStream};

mod settings;
pub use settings::ParseSettings;

mod error;
pub use error::{Error, ParseError};

mod reader;
pub use reader::ScanReader;

mod json_parser;
pub use json_parser::parse_json;

mod emitter;
pub use emitter::{JsonEmitter, WriteEvent};

mod storage;
pub use storage::{FileNode, FileStorage, Format, Mode};
