//! Optional clean-up of model-generated Markdown (`--clean`).
//!
//! Off by default: the export renders the model response verbatim. When a
//! caller enables [`crate::config::ExportConfig::clean_markdown`], four
//! deterministic passes run in this order:
//!
//! 1. Strip an outer ```` ```markdown ```` / ```` ``` ```` fence wrapping the
//!    whole response (models add one despite being told not to)
//! 2. Normalise line endings (CRLF / CR → LF)
//! 3. Remove invisible Unicode (zero-width spaces, BOM, soft hyphens)
//! 4. End with exactly one newline
//!
//! Fence stripping runs first so the fence test sees the raw response; the
//! final-newline pass runs last so nothing re-introduces trailing blanks.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all clean-up passes.
pub fn clean_markdown(input: &str) -> String {
    let s = strip_outer_fence(input);
    let s = normalise_line_endings(&s);
    let s = remove_invisible_chars(&s);
    ensure_final_newline(&s)
}

static RE_OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?[ \t]*\r?\n(.*?)\r?\n```\s*$").unwrap());

fn strip_outer_fence(input: &str) -> String {
    match RE_OUTER_FENCE.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        ['\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FEFF}', '\u{00AD}'],
        "",
    )
}

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_end();
    if trimmed.is_empty() {
        String::from("\n")
    } else {
        format!("{trimmed}\n")
    }
}
