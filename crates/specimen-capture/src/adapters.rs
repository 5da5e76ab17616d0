use std::fmt::{self, Write};

use specimen_types::{Node, Scalar, Text};

use crate::{Inspect, Inspector};

/// Captures a value through its `Debug` output, cut at the string cap.
///
/// Formatting is aborted as soon as the cap is exceeded, so a huge `Debug`
/// impl costs no more than `max_string` chars, or `max_key_string` when the
/// value is a map key.
pub struct Debugged<'a, T: ?Sized>(pub &'a T);

impl<T: fmt::Debug + ?Sized> Inspect for Debugged<'_, T> {
    fn inspect(&self, cx: Inspector<'_>) -> Node {
        bounded_text(cx.string_cap(), |out| write!(out, "{:?}", self.0))
    }
}

/// A caller-declared opaque value, rendered by its type name only.
pub struct OpaqueValue<'a>(pub &'a str);

impl Inspect for OpaqueValue<'_> {
    fn inspect(&self, cx: Inspector<'_>) -> Node {
        cx.opaque(self.0)
    }
}

/// Formats into a string of at most `max_chars` chars. When output was
/// dropped, `total_chars` is a lower bound (kept + 1).
pub(crate) fn bounded_text(
    max_chars: usize,
    format: impl FnOnce(&mut BoundedWriter) -> fmt::Result,
) -> Node {
    let mut out = BoundedWriter {
        buf: String::new(),
        chars: 0,
        max_chars,
        overflowed: false,
    };
    let _ = format(&mut out);
    let total_chars = out.chars + usize::from(out.overflowed);
    Node::Scalar(Scalar::Str(Text {
        value: out.buf,
        total_chars,
    }))
}

pub(crate) struct BoundedWriter {
    buf: String,
    chars: usize,
    max_chars: usize,
    overflowed: bool,
}

impl Write for BoundedWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for ch in s.chars() {
            if self.chars == self.max_chars {
                self.overflowed = true;
                return Err(fmt::Error);
            }
            self.buf.push(ch);
            self.chars += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use specimen_types::{Limits, OpaqueKind};

    use super::*;
    use crate::capture;

    #[derive(Debug)]
    #[allow(dead_code)]
    struct Config {
        name: &'static str,
        retries: u32,
    }

    #[test]
    fn debug_output_is_captured_as_text() {
        let config = Config {
            name: "primary",
            retries: 3,
        };
        let snapshot = capture(&Debugged(&config), Limits::FULL);
        let Node::Scalar(Scalar::Str(text)) = snapshot.root() else {
            panic!("expected text, got {:?}", snapshot.root());
        };
        assert_eq!(text.value, r#"Config { name: "primary", retries: 3 }"#);
        assert!(!text.is_truncated());
    }

    #[test]
    fn debug_output_stops_at_the_string_cap() {
        let huge = vec![7u8; 1_000_000];
        let limits = Limits {
            max_string: 16,
            ..Limits::FULL
        };
        let snapshot = capture(&Debugged(&huge), limits);
        let Node::Scalar(Scalar::Str(text)) = snapshot.root() else {
            panic!("expected text, got {:?}", snapshot.root());
        };
        assert_eq!(text.value, "[7, 7, 7, 7, 7, ");
        assert!(text.is_truncated());
    }

    struct Labels(Vec<(String, u8)>);

    impl Inspect for Labels {
        fn inspect(&self, cx: Inspector<'_>) -> Node {
            cx.map(
                Some("Labels"),
                self.0.iter().map(|(name, value)| (Debugged(name), *value)),
            )
        }
    }

    #[test]
    fn debug_keys_use_the_key_string_cap() {
        let labels = Labels(vec![("region-eu-west".to_owned(), 1)]);
        let limits = Limits {
            max_string: 100,
            max_key_string: 5,
            ..Limits::FULL
        };
        let snapshot = capture(&labels, limits);
        let Node::Mapping(map) = snapshot.root() else {
            panic!("expected mapping, got {:?}", snapshot.root());
        };
        let Node::Scalar(Scalar::Str(key)) = &map.entries[0].key else {
            panic!("expected text key, got {:?}", map.entries[0].key);
        };
        assert_eq!(key.value, "\"regi");
        assert!(key.is_truncated());
    }

    #[test]
    fn opaque_value_keeps_only_its_type_name() {
        let snapshot = capture(&OpaqueValue("PgConnection"), Limits::FULL);
        let opaque = snapshot.root().as_opaque().expect("opaque root");
        assert_eq!(opaque.kind, OpaqueKind::Unsupported);
        assert_eq!(opaque.type_name, "PgConnection");
    }
}
