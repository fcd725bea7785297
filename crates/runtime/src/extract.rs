//! SQL block extraction and response predicates

use std::sync::LazyLock;

use regex::Regex;

/// Fenced code block with an optional language tag.
static FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```([A-Za-z0-9_+-]*)[ \t]*\r?\n?(.*?)```").expect("fence pattern is valid")
});

/// Language tags that mark a fence as SQL.
const SQL_TAGS: &[&str] = &["sql", "mysql", "postgresql", "postgres", "pgsql", "snowflake", "redshift"];

/// Statements an untagged fence may start with and still count as SQL.
const SQL_KEYWORDS: &[&str] = &[
    "SELECT", "WITH", "INSERT", "UPDATE", "DELETE", "CREATE", "ALTER", "DROP", "EXPLAIN", "SHOW",
    "DESCRIBE", "DESC", "MERGE", "TRUNCATE", "REPLACE", "CALL",
];

/// Statements the read-only guard lets through.
const READ_ONLY_KEYWORDS: &[&str] = &["SELECT", "WITH", "EXPLAIN", "SHOW", "DESCRIBE", "DESC"];

/// Phrases with which the model declares its answer complete.
const COMPLETION_PHRASES: &[&str] = &[
    "this is the final",
    "final query",
    "final sql",
    "query is complete",
    "this completes",
];

/// Every SQL block in `text`, in order of appearance, trimmed.
pub fn extract_sql_blocks(text: &str) -> Vec<String> {
    FENCE
        .captures_iter(text)
        .filter_map(|caps| {
            let tag = caps.get(1).map_or("", |m| m.as_str());
            let body = caps.get(2).map_or("", |m| m.as_str()).trim();
            if body.is_empty() {
                return None;
            }
            let is_sql = if tag.is_empty() {
                first_keyword(body).is_some_and(|kw| SQL_KEYWORDS.contains(&kw.as_str()))
            } else {
                SQL_TAGS.iter().any(|t| t.eq_ignore_ascii_case(tag))
            };
            is_sql.then(|| body.to_string())
        })
        .collect()
}

/// The block the agent acts on: the last one in the response.
pub fn last_sql_block(text: &str) -> Option<String> {
    extract_sql_blocks(text).pop()
}

/// Whether the model said its SQL is the final answer.
pub fn is_explicitly_final(text: &str) -> bool {
    let lower = text.to_lowercase();
    COMPLETION_PHRASES.iter().any(|p| lower.contains(p))
}

/// Form used for duplicate detection: surrounding whitespace only, inner layout is kept.
pub fn normalize_sql(sql: &str) -> String {
    sql.trim().to_string()
}

/// Every statement must start with a read-only keyword.
pub fn is_read_only(sql: &str) -> bool {
    let stripped = strip_comments(sql);
    let mut statements = stripped
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .peekable();

    if statements.peek().is_none() {
        return false;
    }
    statements.all(|stmt| {
        first_keyword(stmt).is_some_and(|kw| READ_ONLY_KEYWORDS.contains(&kw.as_str()))
    })
}

fn first_keyword(sql: &str) -> Option<String> {
    let body = strip_comments(sql);
    let word: String = body
        .trim_start_matches(|c: char| c.is_whitespace() || c == '(')
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    (!word.is_empty()).then(|| word.to_ascii_uppercase())
}

fn strip_comments(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut rest = sql;
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix("--") {
            rest = after.find('\n').map_or("", |i| &after[i..]);
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.find("*/").map_or("", |i| &after[i + 2..]);
            out.push(' ');
        } else {
            let mut chars = rest.chars();
            if let Some(c) = chars.next() {
                out.push(c);
            }
            rest = chars.as_str();
        }
    }
    out
}
