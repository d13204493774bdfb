//! SQL text normalization and row-cap injection.

use std::borrow::Cow;

const LIMIT_TOKEN: &str = " LIMIT ";

/// Trims the statement and drops a single trailing `;`.
pub fn normalize(query: &str) -> &str {
    let trimmed = query.trim();
    let trimmed = if ends_with_semicolon(trimmed) {
        &trimmed[..trimmed.len() - 1]
    } else {
        trimmed
    };
    trimmed.trim()
}

pub fn ends_with_semicolon(query: &str) -> bool {
    query.trim().ends_with(';')
}

/// Removes `/* */` blocks, then `--` line tails. Line count is preserved.
///
/// The closing marker is searched from the opening marker itself, so `/*/` closes
/// immediately. An unterminated block drops everything from its opening marker on.
pub fn strip_comments(query: &str) -> String {
    let mut result = query.to_string();
    while let Some(start) = result.find("/*") {
        match result[start..].find("*/") {
            Some(offset) => {
                let end = start + offset + 2;
                result.replace_range(start..end, " ");
            }
            None => {
                result.truncate(start);
                break;
            }
        }
    }

    result
        .split('\n')
        .map(|line| match line.find("--") {
            Some(idx) => &line[..idx],
            None => line,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Space-delimited `LIMIT` outside comments. String literals are not excluded.
pub fn contains_limit_clause(query: &str) -> bool {
    strip_comments(query).to_uppercase().contains(LIMIT_TOKEN)
}

/// Appends `LIMIT cap` unless the cap is zero or the query already limits itself.
pub fn apply_row_cap(query: &str, cap: u64) -> Cow<'_, str> {
    if cap == 0 || contains_limit_clause(query) {
        return Cow::Borrowed(query);
    }
    Cow::Owned(format!("{query} LIMIT {cap}"))
}
