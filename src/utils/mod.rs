//! Common utilities and helper functions
//!
//! This module provides shared utilities used across the application.

pub mod error;
pub mod retry;

/// Normalize an author handle: trim whitespace and strip leading `@`
pub fn normalize_handle(handle: &str) -> String {
    handle.trim().trim_start_matches('@').trim().to_string()
}

/// Normalize a list of handles, dropping empties and duplicates (first seen wins)
pub fn normalize_handles<S: AsRef<str>>(handles: &[S]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(handles.len());
    for handle in handles {
        let normalized = normalize_handle(handle.as_ref());
        if !normalized.is_empty() && !out.contains(&normalized) {
            out.push(normalized);
        }
    }
    out
}

/// Split a comma separated list, trimming entries and dropping empties
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Truncate text to at most `max_chars` characters, ending with `...` when cut
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    if max_chars < 3 {
        return text.chars().take(max_chars).collect();
    }
    let keep = max_chars - 3;
    let truncated: String = text.chars().take(keep).collect();
    format!("{truncated}...")
}

/// Escape text for Telegram's HTML parse mode
pub fn escape_html(text: &str) -> String {
    html_escape::encode_text(text).into_owned()
}

/// Count characters (not bytes)
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}
