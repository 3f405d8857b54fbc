//! Read-only query surface over the imported tables
//!
//! Ad-hoc SQL is restricted to `SELECT`/`WITH` statements and always runs in a
//! `READ ONLY` transaction under a 30 second timeout. The canned queries cover the
//! usual questions: volume by type, dentist and patient, schema introspection and
//! activities whose child row never made it in.

use aligner_common::EntityKind;
use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::{Column, PgPool, Row, TypeInfo, ValueRef};
use std::time::Duration;
use thiserror::Error;

/// Upper bound on any query run through this module
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Rows printed by [`QueryResult::render`] before truncating
pub const DISPLAY_LIMIT: usize = 100;

/// Keywords that never appear as a token in an accepted statement
const FORBIDDEN_KEYWORDS: [&str; 14] = [
    "INSERT", "UPDATE", "DELETE", "DROP", "CREATE", "ALTER", "TRUNCATE", "GRANT", "REVOKE",
    "COPY", "CALL", "EXECUTE", "MERGE", "VACUUM",
];

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Query timeout exceeded (30 seconds)")]
    Timeout,

    #[error("Query not allowed: {0}")]
    Forbidden(String),
}

/// Column names plus rows rendered as JSON values
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl QueryResult {
    /// Plain-text table of at most `limit` rows, followed by the row count
    pub fn render(&self, limit: usize) -> String {
        if self.rows.is_empty() {
            return "(0 rows)".to_string();
        }

        let mut out = self.columns.join(" | ");
        out.push('\n');
        out.push_str(&"-".repeat(out.len().saturating_sub(1)));

        for row in self.rows.iter().take(limit) {
            out.push('\n');
            let cells: Vec<String> = row.iter().map(render_cell).collect();
            out.push_str(&cells.join(" | "));
        }

        out.push('\n');
        if self.rows.len() > limit {
            out.push_str(&format!("(showing {} of {} rows)", limit, self.rows.len()));
        } else {
            out.push_str(&format!("({} rows)", self.rows.len()));
        }
        out
    }
}

fn render_cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "NULL".to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Blank out string literals, quoted identifiers and comments so only SQL
/// structure is left for [`validate_sql`] to inspect. `E'...'` literals honour
/// backslash escapes. An unterminated literal swallows the rest of the text;
/// the server rejects such a query anyway.
fn mask_literals(sql: &str) -> String {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            '\'' | '"' => {
                let backslash_escapes = c == '\''
                    && i > 0
                    && matches!(chars[i - 1], 'e' | 'E')
                    && (i < 2 || !(chars[i - 2].is_alphanumeric() || chars[i - 2] == '_'));
                i += 1;
                while i < chars.len() {
                    if backslash_escapes && chars[i] == '\\' {
                        i += 2;
                    } else if chars[i] == c && chars.get(i + 1) == Some(&c) {
                        i += 2;
                    } else if chars[i] == c {
                        i += 1;
                        break;
                    } else {
                        i += 1;
                    }
                }
                out.push(' ');
            },
            '-' if next == Some('-') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                out.push(' ');
            },
            '/' if next == Some('*') => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i += 2;
                out.push(' ');
            },
            _ => {
                out.push(c);
                i += 1;
            },
        }
    }
    out
}

/// Accept only single read statements starting with `SELECT` or `WITH`.
///
/// Keywords are matched as whole tokens outside literals and comments, so
/// `updated_at` or `WHERE note = 'please delete'` pass.
pub fn validate_sql(sql: &str) -> Result<(), QueryError> {
    let masked = mask_literals(sql);
    let trimmed = masked.trim().trim_end_matches(';').trim_end();

    if trimmed.contains(';') {
        return Err(QueryError::Forbidden(
            "Multiple statements are not allowed".to_string(),
        ));
    }

    let tokens: Vec<String> = trimmed
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(str::to_uppercase)
        .collect();

    match tokens.first().map(String::as_str) {
        Some("SELECT") | Some("WITH") => {},
        _ => {
            return Err(QueryError::Forbidden(
                "Only SELECT and WITH queries are allowed".to_string(),
            ))
        },
    }

    if let Some(keyword) = tokens
        .iter()
        .find(|t| FORBIDDEN_KEYWORDS.contains(&t.as_str()))
    {
        return Err(QueryError::Forbidden(format!(
            "{} statements are not allowed",
            keyword
        )));
    }

    Ok(())
}

/// Validate and run ad-hoc SQL
pub async fn execute(pool: &PgPool, sql: &str) -> Result<QueryResult, QueryError> {
    validate_sql(sql)?;
    read_only(pool, sql, None).await
}

/// Run `sql` inside a read-only transaction that is always rolled back
async fn read_only(pool: &PgPool, sql: &str, param: Option<i64>) -> Result<QueryResult, QueryError> {
    let mut tx = pool.begin().await?;
    sqlx::query("SET TRANSACTION READ ONLY")
        .execute(&mut *tx)
        .await?;

    let mut query = sqlx::query(sql);
    if let Some(param) = param {
        query = query.bind(param);
    }

    let rows = tokio::time::timeout(QUERY_TIMEOUT, query.fetch_all(&mut *tx))
        .await
        .map_err(|_| QueryError::Timeout)??;

    tx.rollback().await?;

    to_result(&rows)
}

fn to_result(rows: &[PgRow]) -> Result<QueryResult, QueryError> {
    let Some(first) = rows.first() else {
        return Ok(QueryResult::default());
    };

    let columns = first
        .columns()
        .iter()
        .map(|col| col.name().to_string())
        .collect();

    let rows = rows
        .iter()
        .map(|row| {
            row.columns()
                .iter()
                .enumerate()
                .map(|(idx, column)| value_to_json(row, idx, column.type_info().name()))
                .collect::<Result<Vec<_>, _>>()
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(QueryResult { columns, rows })
}

/// Convert one column value to JSON; NUMERIC keeps its exact text form
fn value_to_json(row: &PgRow, idx: usize, type_name: &str) -> Result<serde_json::Value, QueryError> {
    use serde_json::Value;

    if row.try_get_raw(idx)?.is_null() {
        return Ok(Value::Null);
    }

    let value = match type_name {
        "BOOL" => Value::Bool(row.try_get(idx)?),
        "INT2" => Value::Number(row.try_get::<i16, _>(idx)?.into()),
        "INT4" => Value::Number(row.try_get::<i32, _>(idx)?.into()),
        "INT8" => Value::Number(row.try_get::<i64, _>(idx)?.into()),
        "FLOAT4" => serde_json::json!(row.try_get::<f32, _>(idx)?),
        "FLOAT8" => serde_json::json!(row.try_get::<f64, _>(idx)?),
        "NUMERIC" => Value::String(row.try_get::<bigdecimal::BigDecimal, _>(idx)?.to_string()),
        "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" => Value::String(row.try_get(idx)?),
        "TIMESTAMP" => Value::String(row.try_get::<chrono::NaiveDateTime, _>(idx)?.to_string()),
        "TIMESTAMPTZ" => Value::String(
            row.try_get::<chrono::DateTime<chrono::Utc>, _>(idx)?
                .to_rfc3339(),
        ),
        "DATE" => Value::String(row.try_get::<chrono::NaiveDate, _>(idx)?.to_string()),
        "JSON" | "JSONB" => row.try_get(idx)?,
        _ => Value::String(
            row.try_get::<String, _>(idx)
                .unwrap_or_else(|_| format!("<{}>", type_name)),
        ),
    };

    Ok(value)
}

/// Predefined lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CannedQuery {
    /// Totals and the activity date range
    Stats,
    /// Top 50 activity types
    ByType,
    /// Top 50 dentists by activity count
    ByDentist,
    /// Activities of one patient, newest first
    Patient(i64),
    /// Tables and columns of the public schema
    Schema,
    /// Activities naming a known variant that have no child row
    Reconcile,
}

impl CannedQuery {
    pub fn sql(&self) -> String {
        match self {
            CannedQuery::Stats => r#"
SELECT COUNT(*) AS total_activities,
       COUNT(DISTINCT activity_type) AS activity_types,
       COUNT(DISTINCT patient_id) AS patients,
       COUNT(DISTINCT treatment_id) AS treatments,
       MIN(date_activity) AS first_activity,
       MAX(date_activity) AS last_activity
FROM activities"#
                .to_string(),
            CannedQuery::ByType => r#"
SELECT activity_type, COUNT(*) AS activity_count
FROM activities
GROUP BY activity_type
ORDER BY activity_count DESC
LIMIT 50"#
                .to_string(),
            CannedQuery::ByDentist => r#"
SELECT dentist_first_name, dentist_last_name, dentist_email, COUNT(*) AS activity_count
FROM activities
WHERE dentist_email IS NOT NULL OR dentist_last_name IS NOT NULL
GROUP BY dentist_first_name, dentist_last_name, dentist_email
ORDER BY activity_count DESC
LIMIT 50"#
                .to_string(),
            CannedQuery::Patient(_) => r#"
SELECT activity_id, activity_type, date_activity, description, meta_data_object_name
FROM activities
WHERE patient_id = $1
ORDER BY date_activity DESC NULLS LAST, activity_id DESC"#
                .to_string(),
            CannedQuery::Schema => r#"
SELECT table_name::text AS table_name,
       column_name::text AS column_name,
       data_type::text AS data_type
FROM information_schema.columns
WHERE table_schema = 'public'
ORDER BY table_name, ordinal_position"#
                .to_string(),
            CannedQuery::Reconcile => reconcile_sql(),
        }
    }

    pub async fn run(&self, pool: &PgPool) -> Result<QueryResult, QueryError> {
        let param = match self {
            CannedQuery::Patient(patient_id) => Some(*patient_id),
            _ => None,
        };
        read_only(pool, &self.sql(), param).await
    }
}

fn reconcile_sql() -> String {
    let missing: Vec<String> = EntityKind::ALL
        .iter()
        .map(|kind| {
            format!(
                "(a.meta_data_object_name = '{}' AND NOT EXISTS \
                 (SELECT 1 FROM {} c WHERE c.activity_id = a.activity_id))",
                kind.object_name(),
                kind.table_name()
            )
        })
        .collect();

    format!(
        "SELECT a.activity_id, a.meta_data_object_name, a.date_activity\n\
         FROM activities a\n\
         WHERE {}\n\
         ORDER BY a.activity_id",
        missing.join("\n   OR ")
    )
}
