//! Utility functions for Zero services.

use once_cell::sync::Lazy;
use regex::Regex;

/// Truncate a string to at most `max_chars` characters, appending "..." if truncated.
///
/// Cuts on character boundaries, so multi-byte UTF-8 input is safe.
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => {
            let truncated = &s[..idx];
            format!("{}...", truncated.trim_end())
        }
        None => s.to_string(),
    }
}

/// Keep the last `max_chars` characters of a string, prefixing "..." if cut.
///
/// Used for stderr tails, where the end of the output carries the traceback.
pub fn tail_with_ellipsis(s: &str, max_chars: usize) -> String {
    let total = s.chars().count();
    if total <= max_chars {
        return s.to_string();
    }
    let skip = total - max_chars;
    match s.char_indices().nth(skip) {
        Some((idx, _)) => format!("...{}", &s[idx..]),
        None => s.to_string(),
    }
}

static SECRET_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"(?i)(api[_-]?key|apikey)[=:]\s*[^\s&]{8,}", "$1=***REDACTED***"),
        (r"(?i)(token|secret)([=:])\s*[^\s&]{8,}", "$1$2***REDACTED***"),
        (r"(?i)(apca-api-(?:key-id|secret-key))\s*:\s*\S+", "$1: ***REDACTED***"),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
    .collect()
});

/// Sanitize a string for safe logging (redact credentials in URLs and headers).
pub fn sanitize_for_log(s: &str) -> String {
    let mut result = s.to_string();
    for (re, replacement) in SECRET_PATTERNS.iter() {
        result = re.replace_all(&result, *replacement).to_string();
    }
    result
}

/// Format bytes as human-readable size.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
