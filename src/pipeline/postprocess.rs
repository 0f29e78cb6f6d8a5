//! Post-processing: deterministic text cleanup.
//!
//! Two entry points:
//!
//! * [`format_text_block`] shapes native text elements into prose Markdown
//!   (short all-caps lines and short lines ending in `:` become headings).
//! * [`clean_vlm_output`] removes the quirks vision models add to their
//!   answers: outer code fences, CRLF line endings, invisible Unicode and
//!   links to images that do not exist.
//!
//! [`extract_json_object`] digs the JSON payload out of a model reply that
//! wraps it in fences or chatter.

use once_cell::sync::Lazy;
use regex::Regex;

/// Longest line, in words, still treated as a heading.
const MAX_HEADING_WORDS: usize = 8;

/// Format a native text element as prose Markdown.
///
/// Lines are trimmed; blank lines are kept so paragraph breaks survive.
pub fn format_text_block(text: &str) -> String {
    text.trim()
        .lines()
        .map(|line| {
            let line = line.trim();
            let words = line.split_whitespace().count();
            if line.is_empty() || line.starts_with('#') {
                line.to_string()
            } else if is_all_caps(line) && words <= MAX_HEADING_WORDS {
                format!("## {}", title_case(line))
            } else if line.ends_with(':') && words <= MAX_HEADING_WORDS {
                format!("### {}", line)
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Clean a vision-model prose answer.
///
/// Rules, in order: strip outer fences, normalise line endings, trim
/// trailing whitespace, collapse blank-line runs, drop placeholder image
/// links, strip invisible Unicode, trim the ends.
pub fn clean_vlm_output(input: &str) -> String {
    let s = strip_code_fences(input);
    let s = normalise_line_endings(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = remove_hallucinated_images(&s);
    let s = remove_invisible_chars(&s);
    s.trim().to_string()
}

/// Return the outermost `{ … }` span of a model reply, fences removed.
pub fn extract_json_object(raw: &str) -> Option<String> {
    let s = remove_invisible_chars(&strip_code_fences(raw));
    let start = s.find('{')?;
    let end = s.rfind('}')?;
    (end > start).then(|| s[start..=end].to_string())
}

// ── Headings ────────────────────────────────────────────────────────────────

fn is_all_caps(line: &str) -> bool {
    line.chars().any(char::is_alphabetic) && !line.chars().any(char::is_lowercase)
}

fn title_case(line: &str) -> String {
    line.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

// ── Fences ──────────────────────────────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z0-9_+-]*[ \t]*\r?\n(.*?)\r?\n?```\s*$").unwrap());

/// Strip one pair of outer code fences (```json, ```mermaid, ``` …).
pub fn strip_code_fences(input: &str) -> String {
    let trimmed = input.trim();
    match RE_OUTER_FENCES.captures(trimmed) {
        Some(caps) => caps[1].to_string(),
        None => trimmed.to_string(),
    }
}

// ── Whitespace ──────────────────────────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        ['\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}'],
        "",
    )
}

// ── Image links ─────────────────────────────────────────────────────────────
//
// A picture transcription has no image files to point at, so any link that is
// not an absolute http(s) URL on a real host is replaced by its alt text.

static RE_IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)]*)\)").unwrap());

const PLACEHOLDER_HOSTS: &[&str] = &[
    "example.com",
    "placeholder.com",
    "dummyimage.com",
    "lorempixel.com",
    "picsum.photos",
    "placehold.it",
];

fn is_placeholder_url(url: &str) -> bool {
    let u = url.trim();
    if !u.starts_with("http://") && !u.starts_with("https://") {
        return true;
    }
    PLACEHOLDER_HOSTS.iter().any(|d| u.contains(d))
}

fn remove_hallucinated_images(input: &str) -> String {
    RE_IMAGE
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let alt = caps[1].trim();
            if !is_placeholder_url(&caps[2]) {
                caps[0].to_string()
            } else if alt.is_empty() {
                String::new()
            } else {
                format!("*{}*", alt)
            }
        })
        .to_string()
}
