//! Turns [`Snapshot`](specimen_types::Snapshot)s into text.
//!
//! - [`preview_text`]: a deterministic single-line summary.
//! - [`render_full`] / [`render_expanded`]: nested HTML built from
//!   `<details>` elements, never carrying `<script>` or `<style>` content.

mod html;
mod preview;
mod sanitize;

pub use html::{RenderMode, UNAVAILABLE_HTML, render, render_expanded, render_full};
pub use preview::{TRUNCATION_GLYPH, collapse_whitespace, preview_text};
pub use sanitize::{contains_active_content, strip_active_content};
