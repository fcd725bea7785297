//! Database schema model and prompt formatting

use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Upper bound for the schema block placed in a prompt.
pub const MAX_SCHEMA_PROMPT_CHARS: usize = 60_000;

/// `schemas -> tables -> columns`, as returned by a schema provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatabaseSchema {
    pub schemas: Vec<SchemaInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaInfo {
    pub name: String,
    #[serde(default)]
    pub tables: Vec<TableInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    #[serde(rename = "type", default = "default_table_type")]
    pub table_type: String,
    #[serde(default, alias = "rowCount", alias = "row_count")]
    pub row_estimate: Option<i64>,
    #[serde(default)]
    pub columns: Vec<ColumnInfo>,
}

fn default_table_type() -> String {
    "BASE TABLE".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type", alias = "data_type")]
    pub data_type: String,
    /// Index marker as reported by the engine (`PRI`, `UNI`, `MUL`, ...)
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

/// Schemas and tables a request wants the model to focus on
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaScope {
    #[serde(default)]
    pub schemas: Vec<String>,
    /// Bare `table` or qualified `schema.table` names
    #[serde(default)]
    pub tables: Vec<String>,
}

impl SchemaScope {
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty() && self.tables.is_empty()
    }

    fn includes_schema(&self, schema: &str) -> bool {
        if self.schemas.is_empty() {
            // Table hints alone still restrict by table; keep schemas that own one.
            return true;
        }
        self.schemas.iter().any(|s| s.eq_ignore_ascii_case(schema))
    }

    fn includes_table(&self, schema: &str, table: &str) -> bool {
        if self.tables.is_empty() {
            return true;
        }
        self.tables.iter().any(|hint| match hint.split_once('.') {
            Some((s, t)) => s.eq_ignore_ascii_case(schema) && t.eq_ignore_ascii_case(table),
            None => hint.eq_ignore_ascii_case(table),
        })
    }
}

impl DatabaseSchema {
    pub fn is_empty(&self) -> bool {
        self.schemas.iter().all(|s| s.tables.is_empty())
    }

    pub fn table_count(&self) -> usize {
        self.schemas.iter().map(|s| s.tables.len()).sum()
    }

    /// Restrict to the scope's schemas and tables. An empty scope, or one
    /// that matches nothing, leaves the schema untouched.
    pub fn scoped(&self, scope: &SchemaScope) -> DatabaseSchema {
        if scope.is_empty() {
            return self.clone();
        }

        let schemas: Vec<SchemaInfo> = self
            .schemas
            .iter()
            .filter(|s| scope.includes_schema(&s.name))
            .map(|s| SchemaInfo {
                name: s.name.clone(),
                tables: s
                    .tables
                    .iter()
                    .filter(|t| scope.includes_table(&s.name, &t.name))
                    .cloned()
                    .collect(),
            })
            .filter(|s| !s.tables.is_empty())
            .collect();

        if schemas.is_empty() {
            tracing::warn!(?scope, "Schema scope matched no tables, using full schema");
            return self.clone();
        }
        DatabaseSchema { schemas }
    }

    /// Render the schema as one text block for the system prompt.
    pub fn format_for_prompt(&self, scope: Option<&SchemaScope>) -> String {
        self.format_bounded(scope, MAX_SCHEMA_PROMPT_CHARS)
    }

    pub fn format_bounded(&self, scope: Option<&SchemaScope>, max_chars: usize) -> String {
        let schema = match scope {
            Some(scope) => self.scoped(scope),
            None => self.clone(),
        };

        if schema.is_empty() {
            return "No schema information available.".to_string();
        }

        let total = schema.table_count();
        let mut out = String::new();
        let mut written = 0usize;

        'outer: for info in &schema.schemas {
            if info.tables.is_empty() {
                continue;
            }
            let header = format!("Schema: {}\n", info.name);
            if out.len() + header.len() > max_chars {
                break;
            }
            out.push_str(&header);

            for table in &info.tables {
                let block = format_table(table);
                if out.len() + block.len() > max_chars && written > 0 {
                    break 'outer;
                }
                out.push_str(&block);
                written += 1;
            }
        }

        if written < total {
            let _ = writeln!(out, "... ({} more tables omitted)", total - written);
        }
        out.trim_end().to_string()
    }
}

fn format_table(table: &TableInfo) -> String {
    let mut block = String::new();
    let _ = write!(block, "  Table: {}", table.name);
    match (table.table_type.as_str(), table.row_estimate) {
        ("BASE TABLE", Some(rows)) => {
            let _ = write!(block, " (~{} rows)", rows);
        }
        ("BASE TABLE", None) => {}
        (kind, Some(rows)) => {
            let _ = write!(block, " ({}, ~{} rows)", kind, rows);
        }
        (kind, None) => {
            let _ = write!(block, " ({})", kind);
        }
    }
    block.push('\n');

    for column in &table.columns {
        let _ = write!(block, "    - {} {}", column.name, column.data_type);
        if let Some(key) = column.key.as_deref().filter(|k| !k.is_empty()) {
            let _ = write!(block, " [{}]", key);
        }
        if !column.nullable {
            block.push_str(" NOT NULL");
        }
        block.push('\n');
    }
    block
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, data_type: &str, key: Option<&str>, nullable: bool) -> ColumnInfo {
        ColumnInfo {
            name: name.to_string(),
            data_type: data_type.to_string(),
            key: key.map(str::to_string),
            nullable,
        }
    }

    fn table(name: &str, columns: Vec<ColumnInfo>) -> TableInfo {
        TableInfo {
            name: name.to_string(),
            table_type: default_table_type(),
            row_estimate: None,
            columns,
        }
    }

    fn sample() -> DatabaseSchema {
        DatabaseSchema {
            schemas: vec![
                SchemaInfo {
                    name: "shop".to_string(),
                    tables: vec![
                        table(
                            "customers",
                            vec![
                                column("id", "int", Some("PRI"), false),
                                column("name", "varchar(255)", None, true),
                            ],
                        ),
                        table("orders", vec![column("id", "int", Some("PRI"), false)]),
                    ],
                },
                SchemaInfo {
                    name: "audit".to_string(),
                    tables: vec![table("events", vec![column("at", "datetime", None, true)])],
                },
            ],
        }
    }

    #[test]
    fn test_format_full_schema() {
        let text = sample().format_for_prompt(None);
        assert!(text.starts_with("Schema: shop\n  Table: customers\n"));
        assert!(text.contains("    - id int [PRI] NOT NULL"));
        assert!(text.contains("    - name varchar(255)\n"));
        assert!(text.contains("Schema: audit"));
        assert!(!text.contains("omitted"));
    }

    #[test]
    fn test_scope_by_schema_and_qualified_table() {
        let scope = SchemaScope {
            schemas: vec!["SHOP".to_string()],
            tables: vec!["shop.orders".to_string()],
        };
        let text = sample().format_for_prompt(Some(&scope));
        assert!(text.contains("Table: orders"));
        assert!(!text.contains("customers"));
        assert!(!text.contains("audit"));
    }

    #[test]
    fn test_scope_by_bare_table_spans_schemas() {
        let scope = SchemaScope {
            schemas: vec![],
            tables: vec!["events".to_string()],
        };
        let scoped = sample().scoped(&scope);
        assert_eq!(scoped.table_count(), 1);
        assert_eq!(scoped.schemas[0].name, "audit");
    }

    #[test]
    fn test_scope_matching_nothing_keeps_everything() {
        let scope = SchemaScope {
            schemas: vec!["missing".to_string()],
            tables: vec![],
        };
        assert_eq!(sample().scoped(&scope).table_count(), 3);
    }

    #[test]
    fn test_bounded_output_notes_omitted_tables() {
        let text = sample().format_bounded(None, 80);
        assert!(text.contains("Table: customers"));
        assert!(text.ends_with("more tables omitted)"));
    }

    #[test]
    fn test_empty_schema() {
        assert_eq!(
            DatabaseSchema::default().format_for_prompt(None),
            "No schema information available."
        );
    }

    #[test]
    fn test_parse_provider_payload() {
        let json = r#"[
            {"name": "public", "tables": [
                {"name": "users", "type": "VIEW", "rowCount": 12,
                 "columns": [{"name": "id", "type": "integer", "key": "PRI", "nullable": false}]}
            ]}
        ]"#;
        let schema: DatabaseSchema = serde_json::from_str(json).unwrap();
        assert_eq!(schema.table_count(), 1);
        let text = schema.format_for_prompt(None);
        assert!(text.contains("Table: users (VIEW, ~12 rows)"));
    }
}
