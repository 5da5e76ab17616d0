use std::fmt::Write;

use specimen_types::{Mapping, Node, Opaque, OpaqueKind, Scalar, Sequence, Snapshot, Text};

/// Appended whenever a preview had to drop content.
pub const TRUNCATION_GLYPH: char = '…';

/// Single-line summary of `snapshot`, at most `max_chars` chars plus one
/// [`TRUNCATION_GLYPH`] when anything was cut.
///
/// A root string is shown as-is; everything nested is shown in a compact
/// literal syntax (`{a: 1, b: [1, 2, 3]}`).
pub fn preview_text(snapshot: &Snapshot, max_chars: usize) -> String {
    let mut raw = String::new();
    let mut cut = false;
    match snapshot.root() {
        Node::Scalar(Scalar::Str(text)) => {
            raw.push_str(&text.value);
            cut = text.is_truncated();
        }
        node => write_inline(node, &mut raw),
    }

    let collapsed = collapse_whitespace(&raw);
    let mut out: String = collapsed.chars().take(max_chars).collect();
    if cut || collapsed.chars().count() > max_chars {
        out.push(TRUNCATION_GLYPH);
    }
    out
}

/// Trims the ends and turns every whitespace run into one space.
pub fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for word in text.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}

fn write_inline(node: &Node, out: &mut String) {
    match node {
        Node::Scalar(scalar) => write_scalar(scalar, out),
        Node::Sequence(seq) => write_sequence(seq, out),
        Node::Mapping(map) => write_mapping(map, out),
        Node::Opaque(opaque) => write_opaque(opaque, out),
    }
}

fn write_scalar(scalar: &Scalar, out: &mut String) {
    match scalar {
        Scalar::Null => out.push_str("null"),
        Scalar::Bool(value) => {
            let _ = write!(out, "{value}");
        }
        Scalar::Int(value) => {
            let _ = write!(out, "{value}");
        }
        Scalar::UInt(value) => {
            let _ = write!(out, "{value}");
        }
        Scalar::Float(value) => {
            let _ = write!(out, "{value}");
        }
        Scalar::Str(text) => write_quoted(text, out),
        Scalar::Bytes { bytes, total_len } => {
            out.push_str("b\"");
            out.push_str(&String::from_utf8_lossy(bytes));
            if bytes.len() < *total_len {
                out.push(TRUNCATION_GLYPH);
            }
            out.push('"');
        }
    }
}

fn write_quoted(text: &Text, out: &mut String) {
    out.push('"');
    out.push_str(&text.value);
    if text.is_truncated() {
        out.push(TRUNCATION_GLYPH);
    }
    out.push('"');
}

fn write_more(shown: usize, omitted: usize, out: &mut String) {
    if omitted > 0 {
        if shown > 0 {
            out.push_str(", ");
        }
        out.push(TRUNCATION_GLYPH);
    }
}

fn write_sequence(seq: &Sequence, out: &mut String) {
    let (open, close) = match seq.type_name.as_deref() {
        Some("tuple") => ('(', ')'),
        Some(name) => {
            out.push_str(name);
            ('[', ']')
        }
        None => ('[', ']'),
    };
    out.push(open);
    for (index, item) in seq.items.iter().enumerate() {
        if index > 0 {
            out.push_str(", ");
        }
        write_inline(item, out);
    }
    write_more(seq.items.len(), seq.omitted, out);
    out.push(close);
}

fn write_mapping(map: &Mapping, out: &mut String) {
    if let Some(name) = &map.type_name {
        out.push_str(name);
        out.push(' ');
    }
    out.push('{');
    for (index, entry) in map.entries.iter().enumerate() {
        if index > 0 {
            out.push_str(", ");
        }
        match &entry.key {
            Node::Scalar(Scalar::Str(key)) => out.push_str(&key.value),
            key => write_inline(key, out),
        }
        out.push_str(": ");
        write_inline(&entry.value, out);
    }
    write_more(map.entries.len(), map.omitted, out);
    out.push('}');
}

fn write_opaque(opaque: &Opaque, out: &mut String) {
    match opaque.kind {
        OpaqueKind::Circular => out.push_str("*CIRCULAR*"),
        OpaqueKind::Unavailable => out.push_str("*UNAVAILABLE*"),
        OpaqueKind::Unsupported => {
            let _ = write!(out, "<{}>", opaque.type_name);
        }
        OpaqueKind::Depth => match opaque.type_name.as_str() {
            "array" => out.push_str("[…]"),
            "map" => out.push_str("{…}"),
            name => {
                let _ = write!(out, "{name} {{…}}");
            }
        },
    }
}
