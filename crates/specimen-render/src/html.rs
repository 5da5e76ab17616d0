use std::fmt::Write;

use specimen_types::{Entry, Mapping, Node, Opaque, OpaqueKind, Scalar, Sequence, Snapshot, Text};

use crate::preview::TRUNCATION_GLYPH;
use crate::sanitize::strip_active_content;

/// Stored in place of a rendering that could not be produced.
pub const UNAVAILABLE_HTML: &str = r#"<div class="sv-dump"><span class="sv-opaque sv-unavailable">unavailable</span></div>"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// Only the root container starts open; a viewer expands the rest.
    Compact,
    /// Every container starts open.
    Expanded,
}

/// Compact rendering for interactive viewers.
pub fn render_full(snapshot: &Snapshot) -> String {
    render(snapshot, RenderMode::Compact)
}

/// Fully open rendering for raw-HTML insertion. Never contains `<script>`
/// or `<style>` blocks.
pub fn render_expanded(snapshot: &Snapshot) -> String {
    strip_active_content(&render(snapshot, RenderMode::Expanded))
}

pub fn render(snapshot: &Snapshot, mode: RenderMode) -> String {
    let mut out = String::from(r#"<div class="sv-dump">"#);
    Html { out: &mut out, mode }.node(snapshot.root(), 0);
    out.push_str("</div>");
    out
}

struct Html<'a> {
    out: &'a mut String,
    mode: RenderMode,
}

impl Html<'_> {
    fn node(&mut self, node: &Node, level: usize) {
        match node {
            Node::Scalar(scalar) => self.scalar(scalar),
            Node::Sequence(seq) => self.sequence(seq, level),
            Node::Mapping(map) => self.mapping(map, level),
            Node::Opaque(opaque) => self.opaque(opaque),
        }
    }

    fn scalar(&mut self, scalar: &Scalar) {
        match scalar {
            Scalar::Null => self.out.push_str(r#"<span class="sv-null">null</span>"#),
            Scalar::Bool(value) => {
                let _ = write!(self.out, r#"<span class="sv-bool">{value}</span>"#);
            }
            Scalar::Int(value) => {
                let _ = write!(self.out, r#"<span class="sv-num">{value}</span>"#);
            }
            Scalar::UInt(value) => {
                let _ = write!(self.out, r#"<span class="sv-num">{value}</span>"#);
            }
            Scalar::Float(value) => {
                let _ = write!(self.out, r#"<span class="sv-num">{value}</span>"#);
            }
            Scalar::Str(text) => self.text("sv-str", text),
            Scalar::Bytes { bytes, total_len } => {
                let _ = write!(
                    self.out,
                    r#"<span class="sv-bytes" title="{total_len} bytes">"#
                );
                escape_into(&String::from_utf8_lossy(bytes), self.out);
                self.out.push_str("</span>");
                if bytes.len() < *total_len {
                    self.cut_marker();
                }
            }
        }
    }

    fn text(&mut self, class: &str, text: &Text) {
        if text.is_truncated() {
            let _ = write!(
                self.out,
                r#"<span class="{class}" title="{} chars">"#,
                text.total_chars
            );
        } else {
            let _ = write!(self.out, r#"<span class="{class}">"#);
        }
        escape_into(&text.value, self.out);
        self.out.push_str("</span>");
        if text.is_truncated() {
            self.cut_marker();
        }
    }

    fn cut_marker(&mut self) {
        let _ = write!(self.out, r#"<span class="sv-cut">{TRUNCATION_GLYPH}</span>"#);
    }

    fn open_container(&mut self, class: &str, label: &str, count: usize, level: usize) {
        let open = match self.mode {
            RenderMode::Expanded => true,
            RenderMode::Compact => level == 0,
        };
        let _ = write!(
            self.out,
            r#"<details class="{class}"{}><summary><span class="sv-type">"#,
            if open { " open" } else { "" }
        );
        escape_into(label, self.out);
        let _ = write!(
            self.out,
            r#"</span> <span class="sv-count">{count}</span></summary>"#
        );
    }

    fn empty(&mut self, class: &str, label: &str) {
        let _ = write!(self.out, r#"<span class="{class} sv-empty"><span class="sv-type">"#);
        escape_into(label, self.out);
        self.out.push_str("</span> empty</span>");
    }

    fn more(&mut self, omitted: usize) {
        if omitted > 0 {
            let _ = write!(
                self.out,
                r#"<li class="sv-more">{TRUNCATION_GLYPH} {omitted} more</li>"#
            );
        }
    }

    fn sequence(&mut self, seq: &Sequence, level: usize) {
        let label = seq.type_name.as_deref().unwrap_or("array");
        if seq.items.is_empty() && seq.omitted == 0 {
            self.empty("sv-seq", label);
            return;
        }
        self.open_container("sv-seq", label, seq.items.len() + seq.omitted, level);
        self.out.push_str(r#"<ol class="sv-items">"#);
        for (index, item) in seq.items.iter().enumerate() {
            let _ = write!(
                self.out,
                r#"<li><span class="sv-index">{index}</span><span class="sv-sep">: </span>"#
            );
            self.node(item, level + 1);
            self.out.push_str("</li>");
        }
        self.more(seq.omitted);
        self.out.push_str("</ol></details>");
    }

    fn mapping(&mut self, map: &Mapping, level: usize) {
        let label = map.type_name.as_deref().unwrap_or("map");
        if map.entries.is_empty() && map.omitted == 0 {
            self.empty("sv-map", label);
            return;
        }
        self.open_container("sv-map", label, map.entries.len() + map.omitted, level);
        self.out.push_str(r#"<ul class="sv-entries">"#);
        for Entry { key, value } in &map.entries {
            self.out.push_str("<li>");
            match key {
                Node::Scalar(Scalar::Str(text)) => self.text("sv-key", text),
                other => {
                    self.out.push_str(r#"<span class="sv-key">"#);
                    self.node(other, level + 1);
                    self.out.push_str("</span>");
                }
            }
            self.out.push_str(r#"<span class="sv-sep">: </span>"#);
            self.node(value, level + 1);
            self.out.push_str("</li>");
        }
        self.more(map.omitted);
        self.out.push_str("</ul></details>");
    }

    fn opaque(&mut self, opaque: &Opaque) {
        let (class, title) = match opaque.kind {
            OpaqueKind::Circular => {
                self.out.push_str(
                    r#"<span class="sv-opaque sv-circular" title="already shown above">*CIRCULAR*</span>"#,
                );
                return;
            }
            OpaqueKind::Depth => ("sv-depth", "nested too deep"),
            OpaqueKind::Unsupported => ("sv-unsupported", "not captured"),
            OpaqueKind::Unavailable => ("sv-unavailable", "could not be read"),
        };
        let _ = write!(
            self.out,
            r#"<span class="sv-opaque {class}" title="{title}">"#
        );
        escape_into(&opaque.type_name, self.out);
        if opaque.kind == OpaqueKind::Depth {
            let _ = write!(self.out, " {TRUNCATION_GLYPH}");
        }
        self.out.push_str("</span>");
    }
}

fn escape_into(text: &str, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use specimen_capture::capture;
    use specimen_types::Limits;

    use super::*;
    use crate::sanitize::contains_active_content;

    fn full<T: specimen_capture::Inspect + ?Sized>(value: &T) -> Snapshot {
        capture(value, Limits::FULL)
    }

    #[test]
    fn scalars_render_as_spans() {
        insta::assert_snapshot!(
            render_full(&full(&42u8)),
            @r#"<div class="sv-dump"><span class="sv-num">42</span></div>"#
        );
        insta::assert_snapshot!(
            render_full(&full(&Option::<u8>::None)),
            @r#"<div class="sv-dump"><span class="sv-null">null</span></div>"#
        );
    }

    #[test]
    fn compact_opens_only_the_root() {
        let value = serde_json::json!({"a": [1]});
        let html = render_full(&full(&value));
        assert!(html.starts_with(r#"<div class="sv-dump"><details class="sv-map" open>"#));
        assert!(html.contains(r#"<details class="sv-seq"><summary>"#));
    }

    #[test]
    fn expanded_opens_every_container() {
        let value = serde_json::json!({"a": [1, [2, [3]]]});
        let html = render_expanded(&full(&value));
        assert_eq!(html.matches("<details").count(), 4);
        assert_eq!(html.matches("<details class=\"sv-seq\" open>").count(), 3);
    }

    #[test]
    fn empty_containers_say_so() {
        let empty: Vec<u8> = Vec::new();
        insta::assert_snapshot!(
            render_full(&full(&empty)),
            @r#"<div class="sv-dump"><span class="sv-seq sv-empty"><span class="sv-type">array</span> empty</span></div>"#
        );
        let map: BTreeMap<String, u8> = BTreeMap::new();
        assert!(render_expanded(&full(&map)).contains("sv-empty"));
    }

    #[test]
    fn text_is_escaped() {
        let html = render_expanded(&full("<script>alert('x')</script>"));
        assert!(!contains_active_content(&html));
        assert!(html.contains("&lt;script&gt;alert(&#39;x&#39;)&lt;/script&gt;"));
    }

    #[test]
    fn invalid_utf8_bytes_are_substituted() {
        let snapshot = Snapshot::new(Node::Scalar(Scalar::Bytes {
            bytes: vec![b'o', b'k', 0xff],
            total_len: 3,
        }));
        let html = render_full(&snapshot);
        assert!(html.contains("ok\u{fffd}"));
    }

    #[test]
    fn truncation_is_visible() {
        let limits = Limits {
            max_items: 2,
            max_string: 3,
            ..Limits::FULL
        };
        let html = render_full(&capture(&vec!["abcdef"; 5], limits));
        assert!(html.contains(r#"<span class="sv-count">5</span>"#));
        assert!(html.contains(r#"<li class="sv-more">… 3 more</li>"#));
        assert!(html.contains(r#"<span class="sv-str" title="6 chars">abc</span><span class="sv-cut">…</span>"#));
    }
}
