//! Terminal rendering for query results and conversations

use comfy_table::presets::ASCII_FULL_CONDENSED;
use comfy_table::{Table, TableComponent};
use datasage_core::{ChatRole, Conversation, QueryResult};
use datasage_persistence::ConversationSummary;
use datasage_runtime::AgentResponse;
use serde_json::Value;

/// Widest a single table cell may get before it is cut.
const MAX_CELL_WIDTH: usize = 40;

fn cell(value: Option<&Value>) -> String {
    let text = match value {
        None | Some(Value::Null) => "NULL".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };
    let text = text.replace(['\n', '\r'], " ");
    if text.chars().count() > MAX_CELL_WIDTH {
        let mut cut: String = text.chars().take(MAX_CELL_WIDTH - 3).collect();
        cut.push_str("...");
        cut
    } else {
        text
    }
}

/// ASCII table with `+---+` borders.
pub fn render_table(result: &QueryResult) -> String {
    if !result.has_result_set() {
        return format!("{} rows affected ({:.3}s)\n", result.row_count, result.elapsed_seconds);
    }

    let mut table = Table::new();
    table.load_preset(ASCII_FULL_CONDENSED);
    // 表头分隔线与边框一致
    table.set_style(TableComponent::HeaderLines, '-');
    table.set_style(TableComponent::LeftHeaderIntersection, '+');
    table.set_style(TableComponent::MiddleHeaderIntersections, '+');
    table.set_style(TableComponent::RightHeaderIntersection, '+');
    table.set_header(result.columns.iter().cloned());
    for row in &result.rows {
        table.add_row(result.columns.iter().map(|c| cell(row.get(c))));
    }

    format!(
        "{}\n{} rows ({:.3}s)\n",
        table, result.row_count, result.elapsed_seconds
    )
}

pub fn render_json<T: serde::Serialize>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(value)
}

/// Outcome of an `ask` run for people
pub fn render_response(response: &AgentResponse) -> String {
    let mut out = String::new();
    match &response.final_sql {
        Some(sql) => out.push_str(&format!("{}\n", sql)),
        None => out.push_str("No SQL query could be produced.\n"),
    }
    if let Some(warning) = &response.warning {
        out.push_str(&format!("warning: {}\n", warning));
    }
    out.push_str(&format!(
        "[{} iterations, {}, conversation {}]\n",
        response.iterations_used,
        response.stop_reason.as_str(),
        response.conversation_id
    ));
    out
}

pub fn render_conversation(conversation: &Conversation) -> String {
    let mut out = String::new();
    for message in conversation {
        let label = match message.role {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
            ChatRole::ToolResult if message.is_failure() => "result (failed)",
            ChatRole::ToolResult => "result",
            ChatRole::System => "system",
        };
        out.push_str(&format!("── {} ──\n{}\n\n", label, message.content.trim()));
    }
    out
}

pub fn render_summaries(summaries: &[ConversationSummary]) -> String {
    if summaries.is_empty() {
        return "No conversations.\n".to_string();
    }
    summaries
        .iter()
        .map(|s| {
            format!(
                "{}  {}  {} ({} messages)\n    {}\n",
                s.id,
                s.updated_at.format("%Y-%m-%d %H:%M"),
                s.title,
                s.message_count,
                s.last_message_preview.replace('\n', " ")
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use datasage_core::ChatMessage;
    use serde_json::json;

    fn result() -> QueryResult {
        let rows = vec![
            json!({"id": 1, "name": "Ada", "email": null}),
            json!({"id": 22, "name": "Grace Hopper", "email": "grace@example.com"}),
        ]
        .into_iter()
        .map(|v| v.as_object().cloned().unwrap())
        .collect();
        QueryResult::new(
            vec!["id".to_string(), "name".to_string(), "email".to_string()],
            rows,
            0.25,
        )
    }

    #[test]
    fn test_table_layout() {
        let table = render_table(&result());
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "+----+--------------+-------------------+");
        assert_eq!(lines[1], "| id | name         | email             |");
        assert_eq!(lines[3], "| 1  | Ada          | NULL              |");
        assert_eq!(lines[4], "| 22 | Grace Hopper | grace@example.com |");
        assert_eq!(lines[5], lines[0]);
        assert_eq!(lines[6], "2 rows (0.250s)");
    }

    #[test]
    fn test_long_cells_are_cut() {
        let mut r = result();
        r.rows[0].insert("name".to_string(), json!("x".repeat(100)));
        let table = render_table(&r);
        assert!(table.contains(&format!("{}...", "x".repeat(37))));
    }

    #[test]
    fn test_empty_result_keeps_header() {
        let r = QueryResult::new(vec!["total".to_string()], vec![], 0.0);
        let table = render_table(&r);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "+-------+");
        assert_eq!(lines[1], "| total |");
        assert_eq!(lines[lines.len() - 2], "+-------+");
        assert_eq!(lines[lines.len() - 1], "0 rows (0.000s)");
    }

    #[test]
    fn test_dml_result() {
        let r = QueryResult::affected(3, 0.5);
        assert_eq!(render_table(&r), "3 rows affected (0.500s)\n");
    }

    #[test]
    fn test_conversation_labels() {
        let conversation = Conversation::from(vec![
            ChatMessage::user("count customers"),
            ChatMessage::tool_failure("SQL execution failed: boom"),
        ]);
        let text = render_conversation(&conversation);
        assert!(text.contains("── user ──\ncount customers"));
        assert!(text.contains("── result (failed) ──"));
    }
}
