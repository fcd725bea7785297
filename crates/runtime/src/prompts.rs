//! System prompt for SQL generation

use datasage_core::{EngineType, SchemaScope};

/// Everything the system prompt is built from.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub schema_text: &'a str,
    pub user_request: &'a str,
    pub engine: EngineType,
    pub iteration: u32,
    pub scope: Option<&'a SchemaScope>,
}

/// Dialect notes: identifier quoting, pagination, NULL handling, functions.
pub fn dialect_notes(engine: EngineType) -> &'static str {
    match engine {
        EngineType::MySql => {
            "**MySQL notes:**
- Quote identifiers that contain spaces or clash with reserved words with backticks (`)
- Paginate with LIMIT n or LIMIT n OFFSET m
- Dates: NOW(), CURDATE(), DATE_ADD(), DATE_SUB(), STR_TO_DATE()
- Strings: CONCAT(), SUBSTRING(), LENGTH(), UPPER(), LOWER()
- NULL handling: IFNULL() or COALESCE()
- Booleans are TRUE/FALSE or 1/0
- Every non-aggregated column in the select list must appear in GROUP BY"
        }
        EngineType::PostgreSql => {
            "**PostgreSQL notes:**
- Quoted identifiers are case-sensitive: wrap mixed-case names or names with spaces or special characters in double quotes (\"Order_id\", \"Customer ID\")
- Qualify tables as schema.table (or \"schema\".\"table\")
- Paginate with LIMIT and OFFSET
- Dates: NOW(), CURRENT_DATE, DATE_TRUNC(), EXTRACT()
- Strings: CONCAT(), SUBSTRING(), LENGTH(), UPPER(), LOWER()
- NULL handling: COALESCE()
- CTEs, window functions, JSON/JSONB operators and arrays are available"
        }
        EngineType::Redshift => {
            "**Amazon Redshift notes:**
- Use double quotes for case-sensitive identifiers
- Paginate with LIMIT (PostgreSQL style)
- Dates: GETDATE(), DATEADD(), DATEDIFF(), TO_DATE()
- Strings: CONCAT(), SUBSTRING(), LEN(), UPPER(), LOWER()
- NULL handling: NVL() or COALESCE()
- Window functions are supported; there is no AUTO_INCREMENT (IDENTITY columns instead)"
        }
        EngineType::Snowflake => {
            "**Snowflake notes:**
- Unquoted identifiers are case-insensitive; quoted ones are not
- Paginate with LIMIT
- Dates: CURRENT_TIMESTAMP(), DATEADD(), DATEDIFF(), TO_DATE()
- Strings: CONCAT(), SUBSTRING(), LENGTH(), UPPER(), LOWER()
- NULL handling: NVL() or COALESCE()
- Semi-structured data lives in VARIANT, ARRAY and OBJECT columns"
        }
        EngineType::Generic => {
            "**Standard SQL notes:**
- Prefer ANSI SQL-92/99 syntax
- Row limiting syntax varies by database; LIMIT is the common form
- Strings: CONCAT(), SUBSTRING(), UPPER(), LOWER()
- NULL handling: COALESCE()"
        }
    }
}

/// Build the system prompt for one generation call.
pub fn build_system_prompt(ctx: &PromptContext<'_>) -> String {
    let db = ctx.engine.display_name();
    let mut prompt = format!(
        "You are an expert SQL generation assistant. You turn natural-language requests into \
accurate SQL for the database described below.

**Database Type:** {db}

**Database Schema:**
{schema}
",
        schema = ctx.schema_text.trim(),
    );

    if let Some(scope) = ctx.scope.filter(|s| !s.is_empty()) {
        prompt.push_str("\n**Focus:** The user asked to concentrate on");
        if !scope.schemas.is_empty() {
            prompt.push_str(&format!(" schemas: {}", scope.schemas.join(", ")));
            if !scope.tables.is_empty() {
                prompt.push(';');
            }
        }
        if !scope.tables.is_empty() {
            prompt.push_str(&format!(" tables: {}", scope.tables.join(", ")));
        }
        prompt.push_str(". Prefer these objects unless the request clearly needs others.\n");
    }

    prompt.push_str(&format!(
        "
**User's Request:**
{request}

**Current Iteration:** {iteration}

{notes}

**Workflow:**
1. Read the schema and the request carefully
2. Write a {db} query that answers the request
3. Put the query in a ```sql ... ``` block; a short explanation before or after it is welcome
4. If execution fails, read the error and send corrected {db} SQL
5. If the results look right, say \"This is the final query\"
6. If the results look wrong, refine the query using the feedback

**Guidelines:**
- Use table and column names exactly as they appear in the schema
- Join on the relationships the schema implies
- Mind {db} data types and NULL semantics
- Start simple and iterate when needed

**Output Format:**
- Always include exactly one ```sql\\nYOUR_SQL_HERE\\n``` block with the query to run
- Include \"This is the final query\" once you are confident the query answers the request
- Sending the same SQL twice also ends the task",
        request = ctx.user_request.trim(),
        iteration = ctx.iteration,
        notes = dialect_notes(ctx.engine),
    ));

    if ctx.iteration > 0 {
        prompt.push_str(&format!(
            "\n\n**Note:** This is iteration {}. Review the execution feedback above before \
answering. Only change the query when the feedback shows a real problem; do not resend it \
with cosmetic edits such as reformatting or renamed aliases. Keep using correct {} syntax.",
            ctx.iteration, db
        ));
    }

    prompt
}
