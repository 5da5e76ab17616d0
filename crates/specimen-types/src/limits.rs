/// Bounds applied while cloning a value into a [`Snapshot`](crate::Snapshot).
///
/// These caps are also the cost bound of a clone: no traversal touches more
/// than `max_items` children per container or more than `max_depth` levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Containers nested deeper than this collapse into an opaque node.
    pub max_depth: usize,
    /// Children kept per sequence or mapping.
    pub max_items: usize,
    /// Chars kept per string value.
    pub max_string: usize,
    /// Chars kept per mapping key.
    pub max_key_string: usize,
}

impl Limits {
    pub const FULL: Limits = Limits {
        max_depth: 5,
        max_items: 100_000,
        max_string: 100_000,
        max_key_string: 2_000,
    };

    pub const PREVIEW: Limits = Limits {
        max_depth: 2,
        max_items: 8,
        max_string: 80,
        max_key_string: 80,
    };
}

impl Default for Limits {
    fn default() -> Self {
        Self::FULL
    }
}
