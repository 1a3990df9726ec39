//! Normalisation of natively extracted page text.
//!
//! pdfium returns text exactly as laid out: CRLF line breaks, runs of spaces
//! used for justification, soft hyphens and zero-width characters left by
//! the producer. Downstream extraction models read the assembled document,
//! so each page is cleaned with a few deterministic rules before it is
//! stored.
//!
//! ## Rule Order
//!
//! Line endings are normalised first so every later rule only sees `\n`.
//! Hyphenated breaks are joined before whitespace is collapsed so the
//! `-\n` pattern is still intact.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply every normalisation rule, in order:
///
/// 1. CRLF / CR → LF
/// 2. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 3. Join words hyphenated across a line break
/// 4. Collapse runs of spaces, tabs and NBSPs to one space
/// 5. Trim trailing whitespace per line
/// 6. Collapse 3+ line breaks to one blank line
/// 7. Trim the whole page
pub fn normalize_page_text(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = join_hyphenated_breaks(&s);
    let s = collapse_inline_whitespace(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    s.trim().to_string()
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 3: Join hyphenated line breaks ──────────────────────────────────────

static RE_HYPHEN_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\p{L})-[ \t]*\n[ \t]*(\p{Ll})").unwrap());

fn join_hyphenated_breaks(input: &str) -> String {
    RE_HYPHEN_BREAK.replace_all(input, "$1$2").to_string()
}

// ── Rule 4: Collapse inline whitespace ───────────────────────────────────────

static RE_INLINE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\u{00A0}]{2,}|\t").unwrap());

fn collapse_inline_whitespace(input: &str) -> String {
    RE_INLINE_WS.replace_all(input, " ").to_string()
}

// ── Rule 5: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 6: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}
