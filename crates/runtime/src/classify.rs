//! Failure classification for execution observations
//!
//! Decides whether regenerating SQL can possibly fix a failed execution.

use std::sync::LazyLock;

use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Syntax errors, unknown columns, bad joins: the model can fix these.
    Retryable,
    Connection,
    Timeout,
    AccessDenied,
    ObjectNotFound,
    NotebookNotFound,
    /// MySQL driver state error; the session must be reset first.
    UnreadResult,
}

impl FailureClass {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureClass::Retryable)
    }

    pub fn describe(&self) -> &'static str {
        match self {
            FailureClass::Retryable => "retryable SQL error",
            FailureClass::Connection => "database connection error",
            FailureClass::Timeout => "query timeout",
            FailureClass::AccessDenied => "access denied",
            FailureClass::ObjectNotFound => "database object not found",
            FailureClass::NotebookNotFound => "notebook not found",
            FailureClass::UnreadResult => "unread result on connection",
        }
    }
}

const CONNECTION_PATTERNS: &[&str] = &[
    "connection refused",
    "connection error",
    "connection reset",
    "could not connect",
    "can't connect",
    "cannot connect",
    "unable to connect",
    "lost connection",
    "server has gone away",
    "database connection not found",
];

const ACCESS_PATTERNS: &[&str] = &[
    "access denied",
    "permission denied",
    "authentication failed",
    "password authentication failed",
    "insufficient privileges",
];

/// Timeouts reported by drivers and the query service, matched as phrases so a
/// column or alias named `timeout` is not mistaken for one.
static TIMEOUT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\btimed out\b|\b(statement|query|lock wait|connect|read) timeout\b|\btimeout (exceeded|expired|acquiring)\b|maximum (statement )?execution time exceeded",
    )
    .expect("timeout pattern is valid")
});

/// Quoted fragments: echoed SQL, identifiers, user names. The opening quote
/// must not follow a letter so contractions like `can't` survive.
static QUOTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(^|[^\w])('[^'\n]*'|"[^"\n]*"|`[^`\n]*`)"#).expect("quote pattern is valid")
});

/// Whole databases, schemas or tables that are missing. A missing column is
/// deliberately not matched: that is a typo the model can correct.
static OBJECT_NOT_FOUND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)unknown database|database not found|(database|schema|table|relation)\b[^\n]*?\b(doesn't|does not) exist",
    )
    .expect("object pattern is valid")
});

/// Classify the text of a failing tool result.
pub fn classify_failure(content: &str) -> FailureClass {
    // 引号内是数据库回显的 SQL 片段，不参与关键字匹配
    let unquoted = QUOTED.replace_all(content, "$1''");
    let lower = unquoted.to_lowercase();
    let has = |patterns: &[&str]| patterns.iter().any(|p| lower.contains(p));

    if lower.contains("notebook not found") {
        FailureClass::NotebookNotFound
    } else if lower.contains("unread result found") {
        FailureClass::UnreadResult
    } else if has(ACCESS_PATTERNS) {
        FailureClass::AccessDenied
    } else if has(CONNECTION_PATTERNS) {
        FailureClass::Connection
    } else if TIMEOUT.is_match(&unquoted) {
        FailureClass::Timeout
    } else if OBJECT_NOT_FOUND.is_match(content) {
        FailureClass::ObjectNotFound
    } else {
        FailureClass::Retryable
    }
}
