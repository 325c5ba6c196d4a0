//! Schema metadata read from `INFORMATION_SCHEMA`.
//!
//! Everything is fetched up front and returned as plain records, the rest of
//! the crate never touches the connection.

use serde::{Deserialize, Serialize};
use sqlx::MySqlPool;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawColumn {
    pub table: String,
    pub column: String,
    pub nullable: bool,
    /// `DATA_TYPE`, e.g. `varchar`.
    pub data_type: String,
    /// `COLUMN_TYPE`, e.g. `enum('M','F')`.
    pub column_type: String,
    pub char_limit: Option<i64>,
    pub precision: Option<i64>,
    pub default: Option<String>,
}

/// One row of `KEY_COLUMN_USAGE`: a column taking part in a constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawKeyUsage {
    pub constraint: String,
    pub table: String,
    pub column: String,
    pub referenced_table: Option<String>,
    pub referenced_column: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSchema {
    pub tables: Vec<String>,
    pub columns: Vec<RawColumn>,
    pub unique: Vec<RawKeyUsage>,
    pub primary: Vec<RawKeyUsage>,
    pub foreign: Vec<RawKeyUsage>,
}

pub const UNIQUE: &str = "UNIQUE";
pub const PRIMARY_KEY: &str = "PRIMARY KEY";
pub const FOREIGN_KEY: &str = "FOREIGN KEY";

const TABLES_QUERY: &str = r#"SELECT
    CAST(TABLE_NAME AS CHAR)
FROM
    INFORMATION_SCHEMA.TABLES
WHERE
    TABLE_SCHEMA = ?
ORDER BY
    TABLE_NAME"#;

const COLUMNS_QUERY: &str = r#"SELECT
    CAST(TABLE_NAME AS CHAR),
    CAST(COLUMN_NAME AS CHAR),
    CAST(IS_NULLABLE AS CHAR),
    CAST(DATA_TYPE AS CHAR),
    CAST(COLUMN_TYPE AS CHAR),
    CAST(CHARACTER_MAXIMUM_LENGTH AS SIGNED),
    CAST(NUMERIC_PRECISION AS SIGNED),
    CAST(COLUMN_DEFAULT AS CHAR)
FROM
    INFORMATION_SCHEMA.COLUMNS
WHERE
    TABLE_SCHEMA = ?
ORDER BY
    TABLE_NAME, ORDINAL_POSITION"#;

const KEY_USAGE_QUERY: &str = r#"SELECT
    CAST(KCU.CONSTRAINT_NAME AS CHAR),
    CAST(KCU.TABLE_NAME AS CHAR),
    CAST(KCU.COLUMN_NAME AS CHAR),
    CAST(KCU.REFERENCED_TABLE_NAME AS CHAR),
    CAST(KCU.REFERENCED_COLUMN_NAME AS CHAR)
FROM
    INFORMATION_SCHEMA.KEY_COLUMN_USAGE AS KCU,
    INFORMATION_SCHEMA.TABLE_CONSTRAINTS AS TC
WHERE
    KCU.CONSTRAINT_SCHEMA = ?
    AND TC.TABLE_SCHEMA = KCU.TABLE_SCHEMA
    AND TC.CONSTRAINT_NAME = KCU.CONSTRAINT_NAME
    AND TC.TABLE_NAME = KCU.TABLE_NAME
    AND TC.CONSTRAINT_TYPE = ?
ORDER BY
    KCU.TABLE_NAME, KCU.CONSTRAINT_NAME, KCU.ORDINAL_POSITION"#;

type ColumnRow = (
    String,
    String,
    String,
    String,
    String,
    Option<i64>,
    Option<i64>,
    Option<String>,
);

type KeyUsageRow = (String, String, String, Option<String>, Option<String>);

pub async fn fetch_tables(pool: &MySqlPool, schema: &str) -> Result<Vec<String>, sqlx::Error> {
    let rows: Vec<(String,)> = sqlx::query_as(TABLES_QUERY).bind(schema).fetch_all(pool).await?;
    Ok(rows.into_iter().map(|(table,)| table).collect())
}

pub async fn fetch_columns(pool: &MySqlPool, schema: &str) -> Result<Vec<RawColumn>, sqlx::Error> {
    let rows: Vec<ColumnRow> = sqlx::query_as(COLUMNS_QUERY).bind(schema).fetch_all(pool).await?;
    Ok(rows
        .into_iter()
        .map(
            |(table, column, nullable, data_type, column_type, char_limit, precision, default)| {
                RawColumn {
                    table,
                    column,
                    nullable: nullable == "YES",
                    data_type,
                    column_type,
                    char_limit,
                    precision,
                    default,
                }
            },
        )
        .collect())
}

/// Key usages of every constraint of type `constraint_type`, e.g. [`UNIQUE`].
pub async fn fetch_key_usages(
    pool: &MySqlPool,
    schema: &str,
    constraint_type: &str,
) -> Result<Vec<RawKeyUsage>, sqlx::Error> {
    let rows: Vec<KeyUsageRow> = sqlx::query_as(KEY_USAGE_QUERY)
        .bind(schema)
        .bind(constraint_type)
        .fetch_all(pool)
        .await?;
    Ok(rows
        .into_iter()
        .map(
            |(constraint, table, column, referenced_table, referenced_column)| RawKeyUsage {
                constraint,
                table,
                column,
                referenced_table,
                referenced_column,
            },
        )
        .collect())
}

pub async fn fetch_raw_schema(pool: &MySqlPool, schema: &str) -> Result<RawSchema, sqlx::Error> {
    let raw = RawSchema {
        tables: fetch_tables(pool, schema).await?,
        columns: fetch_columns(pool, schema).await?,
        unique: fetch_key_usages(pool, schema, UNIQUE).await?,
        primary: fetch_key_usages(pool, schema, PRIMARY_KEY).await?,
        foreign: fetch_key_usages(pool, schema, FOREIGN_KEY).await?,
    };
    info!(
        "introspected {schema}: {} tables, {} columns, {} constraint columns",
        raw.tables.len(),
        raw.columns.len(),
        raw.unique.len() + raw.primary.len() + raw.foreign.len()
    );
    Ok(raw)
}
