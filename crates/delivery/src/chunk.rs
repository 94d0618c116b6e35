//! Text chunking against a channel's length limit.
//!
//! Split points are chosen in preference order: paragraph break, line
//! break, sentence boundary, word boundary, and only then a hard cut at
//! the limit. When the channel flags markup-safe chunking, a boundary is
//! never placed inside an atomic markup token (inline/fenced code span or
//! link).

/// Split `text` into ordered chunks of at most `max_len` bytes.
///
/// Text no longer than the limit yields exactly one chunk. Concatenating
/// the chunks reproduces the input up to the separator whitespace consumed
/// at each split point.
#[must_use]
pub fn chunk_text(text: &str, max_len: usize, markup_safe: bool) -> Vec<String> {
    if max_len == 0 || text.is_empty() {
        return Vec::new();
    }
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let mut window = remaining.floor_char_boundary(max_len);
        if window == 0 {
            // A single character wider than the limit; emit it whole.
            window = remaining
                .chars()
                .next()
                .map(char::len_utf8)
                .unwrap_or(remaining.len());
        }

        let mut split_at = preferred_split(&remaining[..window]).unwrap_or(window);
        if markup_safe {
            split_at = avoid_atomic_tokens(remaining, split_at, window);
        }
        if split_at == 0 {
            split_at = window;
        }

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start_matches('\n');
        if let Some(stripped) = remaining.strip_prefix(' ') {
            remaining = stripped;
        }
    }

    chunks.retain(|c| !c.trim().is_empty());
    chunks
}

/// Best split position within `slice`, by boundary preference.
fn preferred_split(slice: &str) -> Option<usize> {
    if let Some(idx) = slice.rfind("\n\n") {
        return Some(idx);
    }
    if let Some(idx) = slice.rfind('\n') {
        return Some(idx);
    }
    // Sentence boundary: split after the punctuation, keeping it.
    let sentence = [". ", "! ", "? "]
        .iter()
        .filter_map(|p| slice.rfind(p))
        .max();
    if let Some(idx) = sentence {
        return Some(idx + 1);
    }
    slice.rfind(' ')
}

/// Move `split_at` out of any atomic markup token it would cut through.
fn avoid_atomic_tokens(text: &str, split_at: usize, window: usize) -> usize {
    for (start, end) in atomic_spans(text) {
        if start >= window {
            break;
        }
        if split_at > start && split_at < end {
            if start > 0 {
                return start;
            }
            // Token starts the text; split after it when that still fits,
            // otherwise give up and cut at the window.
            return if end <= window { end } else { window };
        }
    }
    split_at
}

/// Byte ranges of atomic markup tokens: code spans (backtick-delimited,
/// any fence length) and `[label](url)` links.
fn atomic_spans(text: &str) -> Vec<(usize, usize)> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'`' => {
                let run_start = i;
                while i < bytes.len() && bytes[i] == b'`' {
                    i += 1;
                }
                let fence = &text[run_start..i];
                match text[i..].find(fence) {
                    Some(rel) => {
                        let end = i + rel + fence.len();
                        spans.push((run_start, end));
                        i = end;
                    },
                    // Unclosed fence is plain text, not an atomic token.
                    None => {},
                }
            },
            b'[' => {
                let open = i;
                if let Some(close_rel) = text[i..].find(']') {
                    let close = i + close_rel;
                    if text[close + 1..].starts_with('(') {
                        if let Some(paren_rel) = text[close + 1..].find(')') {
                            let end = close + 1 + paren_rel + 1;
                            spans.push((open, end));
                            i = end;
                            continue;
                        }
                    }
                }
                i += 1;
            },
            _ => {
                // Advance one full character.
                let step = text[i..].chars().next().map(char::len_utf8).unwrap_or(1);
                i += step;
            },
        }
    }

    spans
}
