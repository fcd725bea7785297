//! Query results and executor errors

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// One result row keyed by column name
pub type SqlRow = Map<String, Value>;

/// Normalized result of one SQL execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<SqlRow>,
    /// Rows returned, or rows affected for statements without a result set
    pub row_count: u64,
    pub elapsed_seconds: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryErrorKind {
    /// The database rejected or failed the statement
    Execution,
    /// Could not reach or authenticate against the database
    Connection,
    Timeout,
    /// Blocked before execution by the read-only guard
    ReadOnly,
    /// The executor answered with something that is not a result
    Protocol,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub message: String,
}

impl QueryError {
    pub fn new(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::Execution, message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::Connection, message)
    }

    pub fn timeout(seconds: u64) -> Self {
        Self::new(
            QueryErrorKind::Timeout,
            format!("Query timed out after {} seconds", seconds),
        )
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::Protocol, message)
    }
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<SqlRow>, elapsed_seconds: f64) -> Self {
        let row_count = rows.len() as u64;
        Self {
            columns,
            rows,
            row_count,
            elapsed_seconds,
        }
    }

    /// Result of a statement that returns no rows.
    pub fn affected(row_count: u64, elapsed_seconds: f64) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            row_count,
            elapsed_seconds,
        }
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn has_result_set(&self) -> bool {
        !self.columns.is_empty()
    }

    /// Normalize an executor payload into a `QueryResult`.
    ///
    /// Accepted shapes:
    /// - `{"columns": [...], "rows": [{...}, ...]}` (row objects)
    /// - `{"columns": [...], "rows": [[...], ...]}` (positional rows)
    /// - `{"columns": [...], "data": [[col0 values], [col1 values], ...]}` (column-major)
    /// - `{"rowCount": n, "time": t}` (statements without a result set)
    /// - `{"error": "..."}` becomes an execution error
    pub fn from_payload(payload: &Value) -> Result<Self, QueryError> {
        let obj = payload
            .as_object()
            .ok_or_else(|| QueryError::protocol("result payload is not a JSON object"))?;

        if let Some(error) = obj.get("error").filter(|e| !e.is_null()) {
            let message = match error {
                Value::String(s) => s.clone(),
                other => other
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| other.to_string()),
            };
            return Err(QueryError::execution(message));
        }

        let elapsed = ["time", "elapsed_seconds", "elapsed"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_f64))
            .unwrap_or(0.0);
        let explicit_count = ["rowCount", "row_count"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_u64));

        let mut columns: Vec<String> = match obj.get("columns") {
            Some(Value::Array(cols)) => cols.iter().map(column_name).collect(),
            Some(_) => return Err(QueryError::protocol("`columns` must be an array")),
            None => Vec::new(),
        };

        if let Some(rows) = obj.get("rows") {
            let rows = rows
                .as_array()
                .ok_or_else(|| QueryError::protocol("`rows` must be an array"))?;
            let rows = rows
                .iter()
                .map(|row| row_from_value(row, &mut columns))
                .collect::<Result<Vec<_>, _>>()?;
            let mut result = QueryResult::new(columns, rows, elapsed);
            if let Some(count) = explicit_count {
                result.row_count = result.row_count.max(count);
            }
            return Ok(result);
        }

        if let Some(data) = obj.get("data") {
            let data = data
                .as_array()
                .ok_or_else(|| QueryError::protocol("`data` must be an array"))?;
            let rows = rows_from_column_major(data, &columns)?;
            return Ok(QueryResult::new(columns, rows, elapsed));
        }

        match explicit_count {
            Some(count) => Ok(QueryResult::affected(count, elapsed)),
            None => Err(QueryError::protocol(
                "result payload has neither `rows`, `data` nor `rowCount`",
            )),
        }
    }
}

fn column_name(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        // {"name": "id", "type": "int"} style column descriptors
        other => other
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| other.to_string()),
    }
}

fn row_from_value(row: &Value, columns: &mut Vec<String>) -> Result<SqlRow, QueryError> {
    match row {
        Value::Object(map) => {
            // Payloads without a column list take the first row's key order.
            if columns.is_empty() {
                columns.extend(map.keys().cloned());
            }
            Ok(map.clone())
        }
        Value::Array(values) => {
            if values.len() != columns.len() {
                return Err(QueryError::protocol(format!(
                    "row has {} values but {} columns were declared",
                    values.len(),
                    columns.len()
                )));
            }
            Ok(columns.iter().cloned().zip(values.iter().cloned()).collect())
        }
        other => Err(QueryError::protocol(format!(
            "unsupported row value: {}",
            other
        ))),
    }
}

fn rows_from_column_major(data: &[Value], columns: &[String]) -> Result<Vec<SqlRow>, QueryError> {
    if data.len() != columns.len() {
        return Err(QueryError::protocol(format!(
            "`data` has {} column arrays but {} columns were declared",
            data.len(),
            columns.len()
        )));
    }

    let series: Vec<&Vec<Value>> = data
        .iter()
        .map(|c| {
            c.as_array()
                .ok_or_else(|| QueryError::protocol("`data` entries must be arrays"))
        })
        .collect::<Result<_, _>>()?;

    let height = series.first().map(|c| c.len()).unwrap_or(0);
    if series.iter().any(|c| c.len() != height) {
        return Err(QueryError::protocol("`data` column arrays differ in length"));
    }

    Ok((0..height)
        .map(|i| {
            columns
                .iter()
                .zip(&series)
                .map(|(name, values)| (name.clone(), values[i].clone()))
                .collect()
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_row_objects() {
        let payload = json!({
            "columns": ["id", "name"],
            "rows": [{"id": 1, "name": "Ada"}, {"id": 2, "name": "Grace"}],
            "time": 0.25
        });
        let result = QueryResult::from_payload(&payload).unwrap();
        assert_eq!(result.columns, vec!["id", "name"]);
        assert_eq!(result.row_count, 2);
        assert_eq!(result.rows[1]["name"], "Grace");
        assert_eq!(result.elapsed_seconds, 0.25);
    }

    #[test]
    fn test_rows_without_columns_take_first_row_keys() {
        let payload = json!({"rows": [{"total": 5}]});
        let result = QueryResult::from_payload(&payload).unwrap();
        assert_eq!(result.columns, vec!["total"]);
        assert_eq!(result.row_count, 1);
    }

    #[test]
    fn test_rows_without_columns_keep_wire_order() {
        let payload: Value =
            serde_json::from_str(r#"{"rows": [{"name": "a", "id": 1, "city": null}]}"#).unwrap();
        let result = QueryResult::from_payload(&payload).unwrap();
        assert_eq!(result.columns, vec!["name", "id", "city"]);
        let keys: Vec<&String> = result.rows[0].keys().collect();
        assert_eq!(keys, vec!["name", "id", "city"]);
    }

    #[test]
    fn test_positional_rows() {
        let payload = json!({
            "columns": [{"name": "id", "type": "int"}, {"name": "city"}],
            "rows": [[1, "Oslo"], [2, null]]
        });
        let result = QueryResult::from_payload(&payload).unwrap();
        assert_eq!(result.columns, vec!["id", "city"]);
        assert_eq!(result.rows[0]["city"], "Oslo");
        assert!(result.rows[1]["city"].is_null());
    }

    #[test]
    fn test_column_major_data() {
        let payload = json!({
            "columns": ["id", "name"],
            "data": [[1, 2, 3], ["a", "b", "c"]],
            "time": 1.5
        });
        let result = QueryResult::from_payload(&payload).unwrap();
        assert_eq!(result.row_count, 3);
        assert_eq!(result.rows[2]["id"], 3);
        assert_eq!(result.rows[2]["name"], "c");
    }

    #[test]
    fn test_dml_shape() {
        let payload = json!({"rowCount": 7, "time": 0.01});
        let result = QueryResult::from_payload(&payload).unwrap();
        assert!(!result.has_result_set());
        assert_eq!(result.row_count, 7);
    }

    #[test]
    fn test_error_payload() {
        let err = QueryResult::from_payload(&json!({"error": "Unknown column 'nme'"})).unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::Execution);
        assert_eq!(err.message, "Unknown column 'nme'");

        let err = QueryResult::from_payload(&json!({"error": {"message": "denied"}})).unwrap_err();
        assert_eq!(err.message, "denied");
    }

    #[test]
    fn test_malformed_payloads() {
        assert_eq!(
            QueryResult::from_payload(&json!([1, 2])).unwrap_err().kind,
            QueryErrorKind::Protocol
        );
        assert_eq!(
            QueryResult::from_payload(&json!({"columns": ["a"]})).unwrap_err().kind,
            QueryErrorKind::Protocol
        );
        assert_eq!(
            QueryResult::from_payload(&json!({"columns": ["a", "b"], "data": [[1]]}))
                .unwrap_err()
                .kind,
            QueryErrorKind::Protocol
        );
        assert_eq!(
            QueryResult::from_payload(&json!({"columns": ["a"], "rows": [[1, 2]]}))
                .unwrap_err()
                .kind,
            QueryErrorKind::Protocol
        );
    }
}
