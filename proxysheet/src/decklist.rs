//! Line tokenizer for text decklists.
//!
//! Each non-empty line is read as `[quantity] name [(set|[set]) ...]`. A
//! bracketed or trailing 2-6 character code is a language if it appears in
//! [`LANGUAGE_CODES`], otherwise a set code. Comment lines (`//`, `#`) and the
//! section headers `Deck`, `Decklist` and `Sideboard` are skipped. Anything
//! after a `$` or a tab (price columns, collector numbers) is ignored.

use std::sync::OnceLock;

use regex::Regex;

use crate::card::DecklistEntry;

/// Language codes the catalog understands.
pub const LANGUAGE_CODES: [&str; 17] = [
    "en", "es", "fr", "de", "it", "pt", "ja", "ko", "ru", "zhs", "zht", "he", "la", "grc", "ar",
    "sa", "ph",
];

const SECTION_HEADERS: [&str; 3] = ["deck", "decklist", "sideboard"];

/// Captures:
/// - Group 1: quantity (may be empty)
/// - Group 2: name, up to the first bracket, `$` or tab
/// - Group 3: set or language code
fn line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*(\d*)\s*([^\(\[\$\t]*)[\s\(\[]*([\dA-Za-z]{2,6})?")
            .expect("decklist line pattern is valid")
    })
}

/// Whether `code` is a known language code (case-insensitive).
pub fn is_language_code(code: &str) -> bool {
    let lower = code.to_ascii_lowercase();
    LANGUAGE_CODES.contains(&lower.as_str())
}

/// Tokenize one line. `None` for blanks, comments and headers.
pub fn parse_line(line: &str) -> Option<DecklistEntry> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with("//") || trimmed.starts_with('#') {
        return None;
    }

    let caps = line_pattern().captures(trimmed)?;

    let quantity = caps
        .get(1)
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .unwrap_or(1);

    let name = caps.get(2)?.as_str().trim();
    if name.is_empty() || SECTION_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
        return None;
    }

    let mut entry = DecklistEntry::new(quantity, name);
    if let Some(code) = caps.get(3) {
        let code = code.as_str();
        entry = if is_language_code(code) {
            entry.with_language(code)
        } else {
            entry.with_set(code)
        };
    }

    Some(entry)
}

/// Tokenize a whole decklist, recording 1-based source lines.
pub fn parse_decklist(text: &str) -> Vec<DecklistEntry> {
    text.lines()
        .enumerate()
        .filter_map(|(index, line)| {
            parse_line(line).map(|entry| entry.with_source_line(index as u32 + 1))
        })
        .collect()
}
