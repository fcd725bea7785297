//! Execution observations fed back to the model

use datasage_core::{FAILURE_MARKER, QueryError, QueryErrorKind, QueryResult};

/// Longest rendering of a single sample row.
const MAX_ROW_CHARS: usize = 500;

/// Compact success summary: counts, column names and a few sample rows.
pub fn summarize_success(result: &QueryResult, sample_rows: usize, max_chars: usize) -> String {
    if !result.has_result_set() {
        return truncate_chars(
            &format!(
                "Statement executed successfully. {} rows affected.",
                result.row_count
            ),
            max_chars,
        );
    }

    let mut summary = format!(
        "Query executed successfully. Returned {} rows with {} columns.",
        result.row_count,
        result.column_count()
    );

    if result.row_count > 0 {
        summary.push_str(&format!("\n\nColumns: {}", result.columns.join(", ")));

        let shown = sample_rows.min(result.rows.len());
        if shown > 0 {
            summary.push_str(&format!("\n\nSample results (first {} rows):", shown));
            for (i, row) in result.rows.iter().take(shown).enumerate() {
                let rendered = serde_json::to_string(row).unwrap_or_else(|_| format!("{:?}", row));
                summary.push_str(&format!(
                    "\nRow {}: {}",
                    i + 1,
                    truncate_chars(&rendered, MAX_ROW_CHARS)
                ));
            }
        }

        let remaining = result.row_count.saturating_sub(shown as u64);
        if remaining > 0 {
            summary.push_str(&format!("\n... and {} more rows.", remaining));
        }
    }

    truncate_chars(&summary, max_chars)
}

/// Failure summary, always starting with the failure marker.
pub fn summarize_failure(error: &QueryError, max_chars: usize) -> String {
    let detail = match error.kind {
        QueryErrorKind::Connection => format!("connection error: {}", error.message),
        _ => error.message.clone(),
    };
    let budget = max_chars.saturating_sub(FAILURE_MARKER.len() + 1);
    format!("{} {}", FAILURE_MARKER, truncate_chars(detail.trim(), budget))
}

/// Cut to at most `max` characters, marking the cut with `...`.
pub fn truncate_chars(content: &str, max: usize) -> String {
    let trimmed = content.trim();
    if trimmed.chars().count() <= max {
        return trimmed.to_string();
    }
    let mut out = trimmed.chars().take(max.saturating_sub(3)).collect::<String>();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn customers(n: usize) -> QueryResult {
        let rows = (1..=n)
            .map(|i| {
                json!({"id": i, "name": format!("Customer {i}")})
                    .as_object()
                    .cloned()
                    .unwrap()
            })
            .collect();
        QueryResult::new(vec!["id".into(), "name".into()], rows, 0.05)
    }

    #[test]
    fn test_success_summary_format() {
        let summary = summarize_success(&customers(5), 3, 4000);
        let lines: Vec<&str> = summary.lines().collect();
        assert_eq!(lines[0], "Query executed successfully. Returned 5 rows with 2 columns.");
        assert_eq!(lines[2], "Columns: id, name");
        assert_eq!(lines[4], "Sample results (first 3 rows):");
        assert_eq!(lines[5], r#"Row 1: {"id":1,"name":"Customer 1"}"#);
        assert_eq!(lines.last().copied(), Some("... and 2 more rows."));
    }

    #[test]
    fn test_success_summary_without_rows() {
        let summary = summarize_success(&customers(0), 3, 4000);
        assert_eq!(summary, "Query executed successfully. Returned 0 rows with 2 columns.");
    }

    #[test]
    fn test_small_result_has_no_remainder_line() {
        let summary = summarize_success(&customers(2), 3, 4000);
        assert!(summary.contains("Sample results (first 2 rows):"));
        assert!(!summary.contains("more rows"));
    }

    #[test]
    fn test_statement_without_result_set() {
        let summary = summarize_success(&QueryResult::affected(4, 0.0), 3, 4000);
        assert_eq!(summary, "Statement executed successfully. 4 rows affected.");
    }

    #[test]
    fn test_summary_is_bounded() {
        let summary = summarize_success(&customers(100), 10, 200);
        assert!(summary.chars().count() <= 200);
        assert!(summary.ends_with("..."));
    }

    #[test]
    fn test_failure_summary() {
        let err = QueryError::execution("You have an error in your SQL syntax");
        assert_eq!(
            summarize_failure(&err, 4000),
            "SQL execution failed: You have an error in your SQL syntax"
        );

        let err = QueryError::connection("Connection refused");
        assert_eq!(
            summarize_failure(&err, 4000),
            "SQL execution failed: connection error: Connection refused"
        );

        let long = QueryError::execution("x".repeat(10_000));
        let summary = summarize_failure(&long, 300);
        assert!(summary.starts_with(FAILURE_MARKER));
        assert!(summary.chars().count() <= 300);
    }
}
