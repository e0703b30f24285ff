//! Cell values: normalisation and escaping

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

/// Canonical text of a JSON value
///
/// - missing or `null` → empty
/// - strings → trimmed; RFC 3339 timestamps are rewritten in UTC with a `Z` suffix
/// - numbers → shortest round-trip form (`1e3` becomes `1000.0`, `7` stays `7`)
/// - booleans → `true` / `false`
/// - objects and arrays → compact JSON
pub fn format_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => normalize_text(s),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(other) => other.to_string(),
    }
}

fn normalize_text(s: &str) -> String {
    let trimmed = s.trim();
    match DateTime::parse_from_rfc3339(trimmed) {
        Ok(ts) => ts
            .with_timezone(&Utc)
            .to_rfc3339_opts(SecondsFormat::AutoSi, true),
        Err(_) => trimmed.to_string(),
    }
}

/// Quote one cell
///
/// Line breaks become a single space (a CRLF pair counts as one break), inner
/// quotes are doubled and the result is always wrapped in quotes, so the
/// delimiter needs no special treatment.
pub fn escape_cell(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push(' ');
            }
            '\n' => out.push(' '),
            '"' => out.push_str("\"\""),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Join already-escaped cells into one line terminated by `\n`
pub fn join_cells<S: AsRef<str>>(cells: &[S], delimiter: char) -> String {
    let mut line = String::new();
    for (i, cell) in cells.iter().enumerate() {
        if i > 0 {
            line.push(delimiter);
        }
        line.push_str(cell.as_ref());
    }
    line.push('\n');
    line
}
