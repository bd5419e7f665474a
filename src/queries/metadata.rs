use sea_query::{
    Expr, InsertStatement, OnConflict, PostgresQueryBuilder, Query, SelectStatement,
    SqliteQueryBuilder,
};

use crate::schema::Metadata;

fn select_by_key_stmt(key: &str) -> SelectStatement {
    Query::select()
        .column(Metadata::Value)
        .from(Metadata::Table)
        .and_where(Expr::col(Metadata::Key).eq(key))
        .to_owned()
}

fn upsert_stmt(key: &str, value: &str) -> InsertStatement {
    Query::insert()
        .into_table(Metadata::Table)
        .columns([Metadata::Key, Metadata::Value])
        .values_panic([key.into(), value.into()])
        .on_conflict(
            OnConflict::column(Metadata::Key)
                .update_column(Metadata::Value)
                .to_owned(),
        )
        .to_owned()
}

/// SELECT value FROM metadata WHERE key = ?
pub fn select_by_key(key: &str) -> String {
    select_by_key_stmt(key).to_string(SqliteQueryBuilder)
}

/// INSERT INTO metadata (key, value) VALUES (?, ?) ON CONFLICT (key) DO UPDATE SET value = excluded.value
pub fn upsert(key: &str, value: &str) -> String {
    upsert_stmt(key, value).to_string(SqliteQueryBuilder)
}

// ============================================================================
// PostgreSQL variants
// ============================================================================

/// SELECT value FROM metadata WHERE key = ? - PostgreSQL
pub fn select_by_key_pg(key: &str) -> String {
    select_by_key_stmt(key).to_string(PostgresQueryBuilder)
}

/// INSERT INTO metadata ... ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value - PostgreSQL
pub fn upsert_pg(key: &str, value: &str) -> String {
    upsert_stmt(key, value).to_string(PostgresQueryBuilder)
}
