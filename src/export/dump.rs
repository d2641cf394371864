//! Row-insert statement parsing
//!
//! The export file is a list of `REPLACE INTO `prefix_table` VALUES (...);`
//! lines. Each line becomes one row of [`SqlValue`]s grouped by the
//! unprefixed table name. Lines that do not parse are skipped.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Rows of every table found in a dump, keyed by unprefixed table name
pub type RawDump = BTreeMap<String, Vec<Vec<SqlValue>>>;

/// One column value of an exported row
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl SqlValue {
    /// Coerces an unquoted token: `NULL`, then integer, then float, then text
    fn from_token(token: &str) -> SqlValue {
        if token.eq_ignore_ascii_case("NULL") {
            return SqlValue::Null;
        }
        if let Ok(i) = token.parse::<i64>() {
            return SqlValue::Int(i);
        }
        if let Ok(f) = token.parse::<f64>() {
            return SqlValue::Float(f);
        }
        SqlValue::Text(token.to_string())
    }

    fn from_json(value: serde_json::Value) -> SqlValue {
        match value {
            serde_json::Value::Null => SqlValue::Null,
            serde_json::Value::Bool(b) => SqlValue::Int(i64::from(b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::Int(i),
                None => n.as_f64().map(SqlValue::Float).unwrap_or(SqlValue::Null),
            },
            serde_json::Value::String(s) => SqlValue::Text(s),
            other => SqlValue::Text(other.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Reads the value as an integer, accepting numeric text
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Int(i) => Some(*i),
            SqlValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            SqlValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Reads the value as an identifier; zero, empty and NULL mean "absent"
    pub fn as_id(&self) -> Option<String> {
        match self {
            SqlValue::Null => None,
            SqlValue::Text(s) => {
                let s = s.trim();
                (!s.is_empty() && s != "0").then(|| s.to_string())
            }
            other => other.as_i64().filter(|i| *i != 0).map(|i| i.to_string()),
        }
    }
}

fn replace_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^REPLACE INTO `\w+?_(\w+)` VALUES\s*\((.+)\);?\s*$")
            .expect("valid REPLACE INTO regex")
    })
}

/// Parses a whole dump file
///
/// # Returns
///
/// Every parsed row, grouped by unprefixed table name (`ibf_posts` → `posts`).
/// An input without any recognisable statement yields an empty map.
pub fn parse_sql_dump(sql: &str) -> RawDump {
    let mut dump = RawDump::new();

    for line in sql.lines() {
        let line = line.trim();
        if !line.starts_with("REPLACE") {
            continue;
        }

        let Some(captures) = replace_regex().captures(line) else {
            continue;
        };
        let (Some(table), Some(values)) = (captures.get(1), captures.get(2)) else {
            continue;
        };

        if let Some(row) = parse_values(values.as_str()) {
            dump.entry(table.as_str().to_string())
                .or_default()
                .push(row.into_iter().map(decode_value).collect());
        }
    }

    dump
}

/// Parses the inside of a `VALUES (...)` list
///
/// Tries a structured array parse first; exports with single-quoted strings or
/// `\'` escapes fall through to the manual scanner.
pub fn parse_values(values: &str) -> Option<Vec<SqlValue>> {
    if let Ok(parsed) = serde_json::from_str::<Vec<serde_json::Value>>(&format!("[{}]", values)) {
        return Some(parsed.into_iter().map(SqlValue::from_json).collect());
    }
    scan_values(values)
}

/// Manual scanner for comma-separated SQL literals
///
/// Handles `'...'` and `"..."` strings containing commas and backslash-escaped
/// quotes. Returns None for an unterminated string.
fn scan_values(values: &str) -> Option<Vec<SqlValue>> {
    let mut row = Vec::new();
    let mut token = String::new();
    let mut quote: Option<char> = None;
    let mut quoted = false;
    let mut chars = values.chars();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => match c {
                '\\' => match chars.next() {
                    Some('n') => token.push('\n'),
                    Some('r') => token.push('\r'),
                    Some('t') => token.push('\t'),
                    Some('0') => {}
                    Some(other) => token.push(other),
                    None => return None,
                },
                c if c == q => quote = None,
                c => token.push(c),
            },
            None => match c {
                '\'' | '"' => {
                    if token.trim().is_empty() {
                        token.clear();
                    }
                    quote = Some(c);
                    quoted = true;
                }
                c if quoted && c.is_whitespace() => {}
                ',' => {
                    row.push(finish_token(&token, quoted));
                    token.clear();
                    quoted = false;
                }
                c => token.push(c),
            },
        }
    }

    if quote.is_some() {
        return None;
    }
    row.push(finish_token(&token, quoted));
    Some(row)
}

fn finish_token(token: &str, quoted: bool) -> SqlValue {
    if quoted {
        SqlValue::Text(token.to_string())
    } else {
        SqlValue::from_token(token.trim())
    }
}

/// Decodes the HTML entities the export applies to text columns
fn decode_value(value: SqlValue) -> SqlValue {
    match value {
        SqlValue::Text(s) if s.contains('&') => SqlValue::Text(decode_entities(&s)),
        other => other,
    }
}

pub fn decode_entities(text: &str) -> String {
    text.replace("&quot;", "\"")
        .replace("&#039;", "'")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
