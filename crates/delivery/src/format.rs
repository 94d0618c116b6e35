//! Canonical markup translation.
//!
//! Agent output is canonical markdown. Each channel declares the dialect
//! it accepts; unsupported constructs are stripped or substituted, never
//! left malformed. Code spans are lifted out before inline processing so
//! their contents are never rewritten.

use trellis_common::MarkupDialect;

/// Render canonical markdown for the given channel dialect.
#[must_use]
pub fn render_markup(text: &str, dialect: MarkupDialect) -> String {
    match dialect {
        MarkupDialect::Markdown => text.to_string(),
        MarkupDialect::Html => render_html(text),
        MarkupDialect::Plain => render_plain(text),
    }
}

/// Markdown to the HTML subset most chat platforms accept:
/// `<b> <i> <s> <code> <pre> <a>`.
fn render_html(md: &str) -> String {
    let mut out = String::with_capacity(md.len());
    for piece in split_code_spans(md) {
        match piece {
            Piece::Fenced(body) => {
                out.push_str("<pre>");
                out.push_str(&escape_html(body));
                out.push_str("</pre>");
            },
            Piece::Code(body) => {
                out.push_str("<code>");
                out.push_str(&escape_html(body));
                out.push_str("</code>");
            },
            Piece::Text(body) => {
                let mut html = escape_html(body);
                html = replace_links(&html, |label, url| {
                    format!("<a href=\"{url}\">{label}</a>")
                });
                html = replace_paired(&html, "**", "<b>", "</b>");
                html = replace_paired(&html, "~~", "<s>", "</s>");
                html = replace_paired(&html, "*", "<i>", "</i>");
                html = replace_paired(&html, "_", "<i>", "</i>");
                out.push_str(&html);
            },
        }
    }
    out
}

/// Markdown stripped to plain text. Links keep their target so no
/// information is silently dropped.
fn render_plain(md: &str) -> String {
    let mut out = String::with_capacity(md.len());
    for piece in split_code_spans(md) {
        match piece {
            Piece::Fenced(body) | Piece::Code(body) => out.push_str(body),
            Piece::Text(body) => {
                let mut text = replace_links(body, |label, url| format!("{label} ({url})"));
                text = replace_paired(&text, "**", "", "");
                text = replace_paired(&text, "~~", "", "");
                text = replace_paired(&text, "*", "", "");
                text = replace_paired(&text, "_", "", "");
                out.push_str(&text);
            },
        }
    }
    out
}

enum Piece<'a> {
    Text(&'a str),
    Code(&'a str),
    Fenced(&'a str),
}

/// Split into alternating text and code pieces. Unclosed fences fall back
/// to plain text so output is never malformed.
fn split_code_spans(md: &str) -> Vec<Piece<'_>> {
    let mut pieces = Vec::new();
    let mut rest = md;

    while let Some(start) = rest.find('`') {
        let fence_len = rest[start..].chars().take_while(|&c| c == '`').count();
        let fence = &rest[start..start + fence_len];
        match rest[start + fence_len..].find(fence) {
            Some(rel) => {
                if start > 0 {
                    pieces.push(Piece::Text(&rest[..start]));
                }
                let body = &rest[start + fence_len..start + fence_len + rel];
                if fence_len >= 3 {
                    pieces.push(Piece::Fenced(body.trim_matches('\n')));
                } else {
                    pieces.push(Piece::Code(body));
                }
                rest = &rest[start + fence_len + rel + fence_len..];
            },
            None => {
                // Unclosed: emit the fence literally and move past it.
                pieces.push(Piece::Text(&rest[..start + fence_len]));
                rest = &rest[start + fence_len..];
            },
        }
    }
    if !rest.is_empty() {
        pieces.push(Piece::Text(rest));
    }
    pieces
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Replace `[label](url)` occurrences using `render`.
fn replace_links(text: &str, render: impl Fn(&str, &str) -> String) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find('[') {
        let Some(close_rel) = rest[open..].find("](") else {
            break;
        };
        let close = open + close_rel;
        let Some(end_rel) = rest[close + 2..].find(')') else {
            break;
        };
        let end = close + 2 + end_rel;

        out.push_str(&rest[..open]);
        out.push_str(&render(&rest[open + 1..close], &rest[close + 2..end]));
        rest = &rest[end + 1..];
    }

    out.push_str(rest);
    out
}

/// Replace balanced pairs of `delim` with open/close tags. An odd
/// trailing delimiter is left literal rather than producing a dangling
/// tag.
fn replace_paired(text: &str, delim: &str, open: &str, close: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find(delim) {
        let after = &rest[start + delim.len()..];
        match after.find(delim) {
            Some(end) if end > 0 => {
                out.push_str(&rest[..start]);
                out.push_str(open);
                out.push_str(&after[..end]);
                out.push_str(close);
                rest = &after[end + delim.len()..];
            },
            _ => {
                // No balanced closer; keep the delimiter literal.
                out.push_str(&rest[..start + delim.len()]);
                rest = after;
            },
        }
    }

    out.push_str(rest);
    out
}
