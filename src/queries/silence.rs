use sea_query::{
    Expr, InsertStatement, OnConflict, PostgresQueryBuilder, Query, SelectStatement,
    SqliteQueryBuilder,
};

use crate::schema::SilenceAnalyses;

const ANALYSIS_COLUMNS: [SilenceAnalyses; 6] = [
    SilenceAnalyses::FilePath,
    SilenceAnalyses::Segments,
    SilenceAnalyses::DurationSeconds,
    SilenceAnalyses::ThresholdDb,
    SilenceAnalyses::MinSilenceDurationSeconds,
    SilenceAnalyses::AnalyzedAtMs,
];

/// Row values for one analysis, segments already serialized as JSON
pub struct AnalysisRow<'a> {
    pub file_path: &'a str,
    pub segments_json: &'a str,
    pub duration_seconds: f64,
    pub threshold_db: f64,
    pub min_silence_duration_seconds: f64,
    pub analyzed_at_ms: i64,
}

fn select_by_path_stmt(file_path: &str) -> SelectStatement {
    Query::select()
        .columns(ANALYSIS_COLUMNS)
        .from(SilenceAnalyses::Table)
        .and_where(Expr::col(SilenceAnalyses::FilePath).eq(file_path))
        .to_owned()
}

fn upsert_stmt(row: &AnalysisRow<'_>) -> InsertStatement {
    Query::insert()
        .into_table(SilenceAnalyses::Table)
        .columns(ANALYSIS_COLUMNS)
        .values_panic([
            row.file_path.into(),
            row.segments_json.into(),
            row.duration_seconds.into(),
            row.threshold_db.into(),
            row.min_silence_duration_seconds.into(),
            row.analyzed_at_ms.into(),
        ])
        .on_conflict(
            OnConflict::column(SilenceAnalyses::FilePath)
                .update_columns([
                    SilenceAnalyses::Segments,
                    SilenceAnalyses::DurationSeconds,
                    SilenceAnalyses::ThresholdDb,
                    SilenceAnalyses::MinSilenceDurationSeconds,
                    SilenceAnalyses::AnalyzedAtMs,
                ])
                .to_owned(),
        )
        .to_owned()
}

/// SELECT ... FROM silence_analyses WHERE file_path = ?
pub fn select_by_path(file_path: &str) -> String {
    select_by_path_stmt(file_path).to_string(SqliteQueryBuilder)
}

/// INSERT INTO silence_analyses (...) VALUES (...) ON CONFLICT (file_path) DO UPDATE SET ...
pub fn upsert(row: &AnalysisRow<'_>) -> String {
    upsert_stmt(row).to_string(SqliteQueryBuilder)
}

// ============================================================================
// PostgreSQL variants
// ============================================================================

/// Cached analysis by path - PostgreSQL
pub fn select_by_path_pg(file_path: &str) -> String {
    select_by_path_stmt(file_path).to_string(PostgresQueryBuilder)
}

/// Analysis upsert - PostgreSQL
pub fn upsert_pg(row: &AnalysisRow<'_>) -> String {
    upsert_stmt(row).to_string(PostgresQueryBuilder)
}
