//! Cleans raw model completions down to one candidate query line.

use regex::Regex;
use std::sync::OnceLock;

fn fenced_block() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```.*?```").expect("valid fence pattern"))
}

fn enumerated_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+\.\.\s*").expect("valid prefix pattern"))
}

fn whitespace_run() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid whitespace pattern"))
}

fn leading_colons() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[:\s]+").expect("valid colon pattern"))
}

fn clean_once(text: &str) -> String {
    let text = text.trim();
    let text = fenced_block().replace_all(text, "");
    let text = enumerated_prefix().replace(&text, "");
    let text = whitespace_run().replace_all(&text, " ");
    let text = text.strip_prefix('.').unwrap_or(&text);
    let text = leading_colons().replace(text, "");
    text.trim().to_string()
}

/// Reduce a raw completion to a single candidate query line.
///
/// Removes fenced code blocks, a leading `N..` enumeration, newlines and
/// whitespace runs, a leading period and any leading colon/space run.
///
/// Each cleaning pass can expose a new prefix (`". 1..x"` only becomes
/// `"1..x"` after the period goes), so passes repeat until the text stops
/// changing. Every pass either shortens the text or leaves only single
/// spaces behind, which bounds the loop and makes the function idempotent.
pub fn sanitize(raw: &str) -> String {
    let mut current = clean_once(raw);
    loop {
        let next = clean_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}
