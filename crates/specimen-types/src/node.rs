/// One node of a snapshot tree.
///
/// Nodes own plain data only; nothing here can reach back into the value the
/// snapshot was taken from.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Scalar(Scalar),
    Sequence(Sequence),
    Mapping(Mapping),
    Opaque(Opaque),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(Text),
    /// Raw bytes; decoded lossily when rendered.
    Bytes { bytes: Vec<u8>, total_len: usize },
}

/// A possibly cut string. `total_chars` is the length of the source string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Text {
    pub value: String,
    pub total_chars: usize,
}

impl Text {
    /// Keeps at most `max_chars` chars of `source`.
    pub fn cut(source: &str, max_chars: usize) -> Self {
        let (value, total_chars) = match source.char_indices().nth(max_chars) {
            None => (source.to_string(), source.chars().count()),
            Some((byte_end, _)) => (
                source[..byte_end].to_string(),
                max_chars + source[byte_end..].chars().count(),
            ),
        };
        Self { value, total_chars }
    }

    pub fn is_truncated(&self) -> bool {
        self.value.chars().count() < self.total_chars
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sequence {
    pub type_name: Option<String>,
    pub items: Vec<Node>,
    /// Children that existed on the source but were dropped by the item cap.
    pub omitted: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mapping {
    /// Set for named records (structs); `None` for plain maps.
    pub type_name: Option<String>,
    pub entries: Vec<Entry>,
    pub omitted: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub key: Node,
    pub value: Node,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpaqueKind {
    /// The container sat below the depth cap.
    Depth,
    /// The value was already visited during this clone.
    Circular,
    /// Resource-like or otherwise uncloneable value.
    Unsupported,
    /// Reading the value failed (lock held elsewhere, inspect panicked, ...).
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opaque {
    pub kind: OpaqueKind,
    pub type_name: String,
}

impl Node {
    pub fn null() -> Self {
        Node::Scalar(Scalar::Null)
    }

    pub fn text(value: impl Into<String>) -> Self {
        let value = value.into();
        let total_chars = value.chars().count();
        Node::Scalar(Scalar::Str(Text { value, total_chars }))
    }

    pub fn opaque(kind: OpaqueKind, type_name: impl Into<String>) -> Self {
        Node::Opaque(Opaque {
            kind,
            type_name: type_name.into(),
        })
    }

    /// Container nesting below this node: 0 for leaves, 1 for a flat
    /// container, and so on.
    pub fn depth(&self) -> usize {
        match self {
            Node::Scalar(_) | Node::Opaque(_) => 0,
            Node::Sequence(seq) => 1 + seq.items.iter().map(Node::depth).max().unwrap_or(0),
            Node::Mapping(map) => {
                1 + map
                    .entries
                    .iter()
                    .map(|entry| entry.key.depth().max(entry.value.depth()))
                    .max()
                    .unwrap_or(0)
            }
        }
    }

    /// Visits this node and every descendant, parents first.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Node)) {
        visit(self);
        match self {
            Node::Scalar(_) | Node::Opaque(_) => {}
            Node::Sequence(seq) => seq.items.iter().for_each(|item| item.walk(visit)),
            Node::Mapping(map) => map.entries.iter().for_each(|entry| {
                entry.key.walk(visit);
                entry.value.walk(visit);
            }),
        }
    }

    pub fn as_opaque(&self) -> Option<&Opaque> {
        match self {
            Node::Opaque(opaque) => Some(opaque),
            _ => None,
        }
    }
}

/// Immutable, bounded copy of a value. Produced once by the cloner.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    root: Node,
}

impl Snapshot {
    pub fn new(root: Node) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn depth(&self) -> usize {
        self.root.depth()
    }

    /// Counts opaque nodes of `kind` anywhere in the tree.
    pub fn count_opaque(&self, kind: OpaqueKind) -> usize {
        let mut count = 0;
        self.root.walk(&mut |node| {
            if node.as_opaque().is_some_and(|opaque| opaque.kind == kind) {
                count += 1;
            }
        });
        count
    }
}
