//! Bounded cloning of live values into [`Snapshot`]s.
//!
//! A value describes itself through [`Inspect`]; the [`Inspector`] it is
//! handed enforces the depth, item and string caps and breaks cycles through
//! shared pointers. Cloning never fails: any subtree that cannot be read
//! becomes an opaque node and the rest of the snapshot survives.

use std::any::type_name;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};

use specimen_types::{Entry, Limits, Mapping, Node, OpaqueKind, Scalar, Sequence, Snapshot, Text};

mod adapters;
mod impls;
mod serialize;

pub use adapters::{Debugged, OpaqueValue};
pub use serialize::Serialized;

/// A value that can describe itself to an [`Inspector`].
///
/// Implementations should build their node through the inspector's helpers so
/// that limits and cycle tracking apply.
pub trait Inspect {
    fn inspect(&self, cx: Inspector<'_>) -> Node;
}

/// Clones `value` into a snapshot bounded by `limits`.
///
/// Cycle tracking is local to this call.
pub fn capture<T: Inspect + ?Sized>(value: &T, limits: Limits) -> Snapshot {
    let mut state = CloneState {
        limits,
        visited: HashSet::new(),
    };
    let cx = Inspector {
        state: &mut state,
        depth: 0,
        key: false,
    };
    Snapshot::new(guarded(cx, short_type_name(type_name::<T>()), |cx| {
        value.inspect(cx)
    }))
}

struct CloneState {
    limits: Limits,
    visited: HashSet<usize>,
}

/// Cursor handed to [`Inspect::inspect`]: knows how deep it is, which limits
/// apply and which shared values were already visited.
pub struct Inspector<'a> {
    state: &'a mut CloneState,
    depth: usize,
    key: bool,
}

impl<'a> Inspector<'a> {
    pub fn limits(&self) -> Limits {
        self.state.limits
    }

    /// Nesting level of the node being built; the root is at 0.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Whether this inspector builds a mapping key.
    pub fn is_key(&self) -> bool {
        self.key
    }

    pub fn null(self) -> Node {
        Node::null()
    }

    pub fn bool(self, value: bool) -> Node {
        Node::Scalar(Scalar::Bool(value))
    }

    pub fn int(self, value: i64) -> Node {
        Node::Scalar(Scalar::Int(value))
    }

    pub fn uint(self, value: u64) -> Node {
        Node::Scalar(Scalar::UInt(value))
    }

    pub fn float(self, value: f64) -> Node {
        Node::Scalar(Scalar::Float(value))
    }

    pub fn str(self, value: &str) -> Node {
        let max = self.string_cap();
        Node::Scalar(Scalar::Str(Text::cut(value, max)))
    }

    pub fn bytes(self, value: &[u8]) -> Node {
        let max = self.string_cap();
        Node::Scalar(Scalar::Bytes {
            bytes: value[..value.len().min(max)].to_vec(),
            total_len: value.len(),
        })
    }

    /// A resource-like value that is shown by type name only.
    pub fn opaque(self, type_name: &str) -> Node {
        Node::opaque(OpaqueKind::Unsupported, type_name)
    }

    /// A value that exists but could not be read right now.
    pub fn unavailable(self, type_name: &str) -> Node {
        Node::opaque(OpaqueKind::Unavailable, type_name)
    }

    /// Builds a sequence from `items`, keeping at most `max_items` of them.
    pub fn seq<I>(mut self, type_name: Option<&str>, items: I) -> Node
    where
        I: IntoIterator,
        I::Item: Inspect,
    {
        if self.below_depth_cap() {
            return Node::opaque(OpaqueKind::Depth, type_name.unwrap_or("array"));
        }
        let max_items = self.state.limits.max_items;
        let mut iter = items.into_iter();
        let mut nodes = Vec::with_capacity(iter.size_hint().0.min(max_items).min(1024));
        for item in iter.by_ref().take(max_items) {
            nodes.push(self.child_of(&item, false));
        }
        Node::Sequence(Sequence {
            type_name: type_name.map(str::to_string),
            items: nodes,
            omitted: count_rest(iter, max_items),
        })
    }

    /// Builds a mapping from `(key, value)` pairs, keeping at most
    /// `max_items` entries. Keys use the key string cap.
    pub fn map<I, K, V>(mut self, type_name: Option<&str>, entries: I) -> Node
    where
        I: IntoIterator<Item = (K, V)>,
        K: Inspect,
        V: Inspect,
    {
        if self.below_depth_cap() {
            return Node::opaque(OpaqueKind::Depth, type_name.unwrap_or("map"));
        }
        let max_items = self.state.limits.max_items;
        let mut iter = entries.into_iter();
        let mut kept = Vec::with_capacity(iter.size_hint().0.min(max_items).min(1024));
        for (key, value) in iter.by_ref().take(max_items) {
            let key = self.child_of(&key, true);
            let value = self.child_of(&value, false);
            kept.push(Entry { key, value });
        }
        Node::Mapping(Mapping {
            type_name: type_name.map(str::to_string),
            entries: kept,
            omitted: count_rest(iter, max_items),
        })
    }

    /// Starts a named record (struct-like mapping), in the manner of
    /// [`std::fmt::Formatter::debug_struct`].
    ///
    /// ```
    /// # use specimen_capture::{Inspect, Inspector};
    /// # use specimen_types::Node;
    /// struct Point { x: i32, y: i32 }
    ///
    /// impl Inspect for Point {
    ///     fn inspect(&self, cx: Inspector<'_>) -> Node {
    ///         cx.record("Point").field("x", &self.x).field("y", &self.y).finish()
    ///     }
    /// }
    /// ```
    pub fn record(self, type_name: &str) -> Record<'a> {
        let collapsed = self.below_depth_cap();
        Record {
            cx: self,
            type_name: type_name.to_string(),
            entries: Vec::new(),
            omitted: 0,
            collapsed,
        }
    }

    /// Inspects a value reachable through shared ownership.
    ///
    /// `ptr` identifies the shared allocation. The first visit calls
    /// `inspect`; any later visit within the same clone yields a circular
    /// marker instead of descending again.
    pub fn shared(
        self,
        ptr: *const (),
        type_name: &str,
        inspect: impl FnOnce(Inspector<'_>) -> Node,
    ) -> Node {
        if !self.state.visited.insert(ptr as usize) {
            return Node::opaque(OpaqueKind::Circular, type_name);
        }
        inspect(self)
    }

    pub(crate) fn string_cap(&self) -> usize {
        if self.key {
            self.state.limits.max_key_string
        } else {
            self.state.limits.max_string
        }
    }

    fn below_depth_cap(&self) -> bool {
        self.depth >= self.state.limits.max_depth
    }

    pub(crate) fn child(&mut self, key: bool) -> Inspector<'_> {
        Inspector {
            state: &mut *self.state,
            depth: self.depth + 1,
            key,
        }
    }

    fn child_of<T: Inspect + ?Sized>(&mut self, value: &T, key: bool) -> Node {
        let cx = self.child(key);
        guarded(cx, short_type_name(type_name::<T>()), |cx| value.inspect(cx))
    }
}

/// Builder returned by [`Inspector::record`].
pub struct Record<'a> {
    cx: Inspector<'a>,
    type_name: String,
    entries: Vec<Entry>,
    omitted: usize,
    collapsed: bool,
}

impl Record<'_> {
    pub fn field(mut self, name: &str, value: &dyn Inspect) -> Self {
        if self.collapsed {
            return self;
        }
        let limits = self.cx.state.limits;
        if self.entries.len() >= limits.max_items {
            self.omitted += 1;
            return self;
        }
        let value = self.cx.child_of(value, false);
        self.entries.push(Entry {
            key: Node::Scalar(Scalar::Str(Text::cut(name, limits.max_key_string))),
            value,
        });
        self
    }

    pub fn finish(self) -> Node {
        if self.collapsed {
            return Node::opaque(OpaqueKind::Depth, self.type_name);
        }
        Node::Mapping(Mapping {
            type_name: Some(self.type_name),
            entries: self.entries,
            omitted: self.omitted,
        })
    }
}

/// Runs `build`, turning a panic into an unavailable node for this subtree.
pub(crate) fn guarded(
    cx: Inspector<'_>,
    type_name: String,
    build: impl FnOnce(Inspector<'_>) -> Node,
) -> Node {
    match panic::catch_unwind(AssertUnwindSafe(|| build(cx))) {
        Ok(node) => node,
        Err(_) => Node::opaque(OpaqueKind::Unavailable, type_name),
    }
}

/// Counts what is left in `iter` without inspecting it. Exact when the
/// iterator knows its length, otherwise counting stops after `budget` more.
fn count_rest<I: Iterator>(iter: I, budget: usize) -> usize {
    match iter.size_hint() {
        (lower, Some(upper)) if lower == upper => lower,
        _ => iter.take(budget).count(),
    }
}

/// Drops module paths from a type name: `alloc::vec::Vec<alloc::string::String>`
/// becomes `Vec<String>`.
pub fn short_type_name(full: &str) -> String {
    let mut out = String::with_capacity(full.len());
    let mut segment_start = 0;
    let mut chars = full.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == ':' && chars.peek() == Some(&':') {
            chars.next();
            out.truncate(segment_start);
            continue;
        }
        out.push(ch);
        if !(ch.is_alphanumeric() || ch == '_') {
            segment_start = out.len();
        }
    }
    out
}
