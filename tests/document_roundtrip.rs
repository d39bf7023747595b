// SPDX-License-Identifier: Apache-2.0

//! End-to-end document flows: parse into a tree, re-emit the tree through
//! write events, parse the emission again, and require structural equality.
//! Emission is an information-preserving right inverse of parsing modulo
//! whitespace, comments and the `true`/`false` -> int coercion.

use doctree::{
    parse_json, JsonEmitter, Node, OpenMode, ParseSettings, Stream, StringStream, Tag, Tree,
    WriteEvent,
};

fn parse_text(text: &str) -> Tree {
    let mut stream = StringStream::new();
    stream.open(text, OpenMode::Read);
    let mut tree = Tree::new();
    parse_json(&mut stream, &mut tree, &ParseSettings::default())
        .unwrap_or_else(|e| panic!("parse failed on {text:?}: {e}"));
    tree
}

fn emit_node(node: &Node, e: &mut JsonEmitter<StringStream>) {
    match node.tag() {
        Tag::Null => panic!("the event set has no null; keep nulls out of round-trip corpora"),
        Tag::I64 => e.emit(WriteEvent::Int(node.i64().unwrap())).unwrap(),
        Tag::F64 => e.emit(WriteEvent::Dbl(node.f64().unwrap())).unwrap(),
        Tag::Str => e.emit(WriteEvent::Str(node.str_bytes().unwrap())).unwrap(),
        Tag::Seq => {
            e.emit(WriteEvent::BegSeq).unwrap();
            for i in 0..node.seq_size().unwrap() {
                emit_node(node.seq_at(i).unwrap(), e);
            }
            e.emit(WriteEvent::EndSeq).unwrap();
        }
        Tag::Map => {
            e.emit(WriteEvent::BegMap).unwrap();
            for i in 0..node.map_size().unwrap() {
                let pair = node.map_at(i).unwrap();
                e.emit(WriteEvent::Str(pair.key.str_bytes().unwrap())).unwrap();
                emit_node(&pair.val, e);
            }
            e.emit(WriteEvent::EndMap).unwrap();
        }
    }
}

fn emit_tree(tree: &Tree) -> String {
    let mut stream = StringStream::new();
    stream.open("", OpenMode::Write);
    let mut e = JsonEmitter::new(stream);
    emit_node(tree.root(), &mut e);
    let mut stream = e.finish();
    String::from_utf8(stream.dump()).unwrap()
}

fn assert_round_trip(text: &str) {
    let first = parse_text(text);
    let emitted = emit_tree(&first);
    let second = parse_text(&emitted);
    assert!(
        first.root().equal(second.root()),
        "round trip changed the tree for {text:?}; emitted {emitted:?}"
    );
    // And the emission itself is stable.
    let emitted_again = emit_tree(&second);
    assert_eq!(emitted, emitted_again);
}

#[test]
fn test_round_trip_corpus() {
    for text in [
        "{}",
        "[]",
        "0",
        "\"\"",
        r#"{"a":[1,2.5,-3]}"#,
        r#"{"k1": 1,"k2": [2,3]}"#,
        r#"[[],[],[[]]]"#,
        r#"{"outer": {"inner": {"leaf": "value"}}}"#,
        r#"["escape \n \t \" \\ mix", "plain"]"#,
        r#"[0.5, -0.25, 1e3, -2.5e2, 123456789, -42]"#,
        r#"{"dup": 1, "dup": 2}"#,
        "[\"a longer string that certainly does not fit inline storage\"]",
    ] {
        assert_round_trip(text);
    }
}

#[test]
fn test_round_trip_preserves_unicode_escapes() {
    // `\uXXXX` is kept as the literal six bytes; emission escapes the
    // backslash, and the next parse restores the same payload.
    let tree = parse_text("\"pre \\u0041 post\"");
    assert_eq!(tree.root().str_bytes().unwrap(), b"pre \\u0041 post" as &[u8]);
    let emitted = emit_tree(&tree);
    let again = parse_text(&emitted);
    assert!(tree.root().equal(again.root()));
}

#[test]
fn test_comments_and_booleans_coerce() {
    let tree = parse_text("[/* x */ true, false, null, //tail\n 0]");
    let root = tree.root();
    assert_eq!(root.seq_size().unwrap(), 4);
    assert_eq!(root.seq_at(0).unwrap().i64().unwrap(), 1);
    assert_eq!(root.seq_at(1).unwrap().i64().unwrap(), 0);
    assert_eq!(root.seq_at(2).unwrap().tag(), Tag::Null);
    assert_eq!(root.seq_at(3).unwrap().i64().unwrap(), 0);
}

#[test]
fn test_emitted_output_reparses_with_same_parser() {
    // Drive the emitter directly with an arbitrary accepted event trace and
    // check the bytes parse.
    let mut stream = StringStream::new();
    stream.open("", OpenMode::Write);
    let mut e = JsonEmitter::new(stream);
    e.emit(WriteEvent::BegMap).unwrap();
    e.emit(WriteEvent::Str(b"list")).unwrap();
    e.emit(WriteEvent::BegSeq).unwrap();
    for i in 0..10 {
        e.emit(WriteEvent::Int(i)).unwrap();
    }
    e.emit(WriteEvent::EndSeq).unwrap();
    e.emit(WriteEvent::Str(b"pi")).unwrap();
    e.emit(WriteEvent::Dbl(3.25)).unwrap();
    e.emit(WriteEvent::EndMap).unwrap();
    let mut stream = e.finish();
    let text = String::from_utf8(stream.dump()).unwrap();

    let tree = parse_text(&text);
    let root = tree.root();
    assert_eq!(root.map_size().unwrap(), 2);
    assert_eq!(
        root.map_find_bytes(b"list").unwrap().val.seq_size().unwrap(),
        10
    );
    assert_eq!(root.map_find_bytes(b"pi").unwrap().val.f64().unwrap(), 3.25);
}

#[test]
fn test_large_document_stress() {
    let mut body = String::from("{");
    for i in 0..500 {
        if i > 0 {
            body.push(',');
        }
        // `.0` doubles recompose exactly on reparse; finer fractions are
        // covered by the hand-checked corpus above.
        body.push_str(&format!(
            "\"key-{i}\": {{\"idx\": {i}, \"dbl\": {i}.0, \"text\": \"row number {i} body\"}}"
        ));
    }
    body.push('}');

    let tree = parse_text(&body);
    assert_eq!(tree.root().map_size().unwrap(), 500);
    assert_round_trip(&body);
}

#[test]
fn test_small_buffer_matches_default_buffer() {
    let text = r#"{"a": [1, 2.5, "with \"escapes\" inside"], "b": {"c": -3}}"#;
    let small = {
        let mut stream = StringStream::new();
        stream.open(text, OpenMode::Read);
        let mut tree = Tree::new();
        let settings = ParseSettings {
            stream_buffer_size: 32,
            ..ParseSettings::default()
        };
        parse_json(&mut stream, &mut tree, &settings).unwrap();
        tree
    };
    let default = parse_text(text);
    assert!(small.root().equal(default.root()));
}
