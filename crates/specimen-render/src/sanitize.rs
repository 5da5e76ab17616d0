const ACTIVE_TAGS: [&str; 2] = ["script", "style"];

/// Removes every `<script …>…</script>` and `<style …>…</style>` block,
/// matching tag names case-insensitively. An unterminated block is removed
/// through the end of the input.
pub fn strip_active_content(html: &str) -> String {
    let mut current = strip_once(html);
    // Removing a block can splice a new opening tag together
    // (`<scr<style></style>ipt>`); every pass shrinks the text.
    while contains_active_content(&current) {
        current = strip_once(&current);
    }
    current
}

pub fn contains_active_content(html: &str) -> bool {
    let lower = html.to_ascii_lowercase();
    ACTIVE_TAGS
        .iter()
        .any(|tag| lower.contains(&format!("<{tag}")))
}

fn strip_once(html: &str) -> String {
    // ASCII lowercasing keeps byte offsets identical to `html`.
    let lower = html.to_ascii_lowercase();
    let mut out = String::with_capacity(html.len());
    let mut pos = 0;
    while let Some((start, tag)) = next_block(&lower, pos) {
        out.push_str(&html[pos..start]);
        pos = block_end(&lower, start, tag);
    }
    out.push_str(&html[pos..]);
    out
}

fn next_block(lower: &str, from: usize) -> Option<(usize, &'static str)> {
    ACTIVE_TAGS
        .iter()
        .filter_map(|tag| {
            lower[from..]
                .find(&format!("<{tag}"))
                .map(|offset| (from + offset, *tag))
        })
        .min_by_key(|(start, _)| *start)
}

fn block_end(lower: &str, start: usize, tag: &str) -> usize {
    let close = format!("</{tag}");
    let Some(offset) = lower[start..].find(&close) else {
        return lower.len();
    };
    let close_start = start + offset;
    match lower[close_start..].find('>') {
        Some(gt) => close_start + gt + 1,
        None => lower.len(),
    }
}
